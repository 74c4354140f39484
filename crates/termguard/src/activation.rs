//! Reference-counted activation of the watched signal set.
//!
//! The OS state is only touched on the 0 -> 1 and 1 -> 0 transitions of
//! the counter, so nested guards never undo an outer guard's installation.

use crate::error::GuardResult;
use crate::signals::WATCHED_SIGNALS;
use nix::sys::signal::Signal;

/// Storage for the dispositions that were active before interception.
///
/// Implementations own the saved entries: `intercept` records the current
/// disposition and installs the crash handler, `release` puts the recorded
/// disposition back. Intercepting a signal whose restore failed keeps the
/// entry recorded the first time.
pub(crate) trait DispositionTable {
    fn intercept(&mut self, signal: Signal) -> GuardResult<()>;
    fn release(&mut self, signal: Signal) -> GuardResult<()>;
}

/// Activation counter paired with the table it arms and disarms.
#[derive(Debug)]
pub(crate) struct Activation<T> {
    table: T,
    count: usize,
    /// Signals whose restore failed on the last disarm and that still carry
    /// the crash handler.
    stranded: usize,
}

impl<T: DispositionTable> Activation<T> {
    pub(crate) const fn new(table: T) -> Self {
        Activation {
            table,
            count: 0,
            stranded: 0,
        }
    }

    /// Number of live activations.
    pub(crate) fn count(&self) -> usize {
        self.count
    }

    #[cfg(test)]
    pub(crate) fn table(&self) -> &T {
        &self.table
    }

    #[cfg(test)]
    pub(crate) fn stranded(&self) -> usize {
        self.stranded
    }

    /// Register one more activation, arming the table on the first one.
    ///
    /// If arming fails, every signal already intercepted is released again
    /// and the counter is left untouched.
    pub(crate) fn acquire(&mut self) -> GuardResult<usize> {
        if self.count == 0 {
            self.arm()?;
        }
        self.count += 1;
        Ok(self.count)
    }

    /// Drop one activation, disarming the table when the last one goes.
    ///
    /// Restoration errors are logged and otherwise ignored.
    pub(crate) fn release(&mut self) -> usize {
        match self.count {
            0 => {
                log::warn!("Signal guard released without a matching activation");
                return 0;
            }
            1 => self.disarm(),
            _ => {}
        }
        self.count -= 1;
        self.count
    }

    fn arm(&mut self) -> GuardResult<()> {
        if self.stranded > 0 {
            log::debug!(
                "Arming with {} signal(s) still intercepted since the last disarm",
                self.stranded
            );
        }
        for (installed, &signal) in WATCHED_SIGNALS.iter().enumerate() {
            if let Err(err) = self.table.intercept(signal) {
                log::warn!("{err}; rolling back {installed} intercepted signal(s)");
                for &done in WATCHED_SIGNALS[..installed].iter().rev() {
                    if let Err(rollback) = self.table.release(done) {
                        log::warn!("{rollback}");
                    }
                }
                return Err(err);
            }
        }
        log::debug!("Intercepting {} signals", WATCHED_SIGNALS.len());
        Ok(())
    }

    /// Restore every signal. A signal that cannot be restored keeps the
    /// crash handler, which keeps chaining to the saved disposition, and is
    /// retried on the next disarm.
    fn disarm(&mut self) {
        self.stranded = 0;
        for &signal in WATCHED_SIGNALS.iter().rev() {
            if let Err(err) = self.table.release(signal) {
                log::warn!("{err}; the crash handler stays installed until the next disarm");
                self.stranded += 1;
            }
        }
        if self.stranded == 0 {
            log::debug!("Restored prior dispositions");
        } else {
            log::warn!("Unarmed with {} signal(s) still intercepted", self.stranded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GuardError;
    use nix::errno::Errno;
    use std::collections::HashMap;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Disposition {
        Original(usize),
        Crash,
    }

    /// Fake OS: every signal starts with a distinct "original" disposition.
    #[derive(Debug)]
    struct FakeTable {
        current: HashMap<Signal, Disposition>,
        saved: HashMap<Signal, Disposition>,
        intercepts: usize,
        releases: usize,
        fail_on: Option<Signal>,
        fail_release_on: Option<Signal>,
    }

    impl FakeTable {
        fn new() -> Self {
            let current = WATCHED_SIGNALS
                .iter()
                .enumerate()
                .map(|(i, s)| (*s, Disposition::Original(i)))
                .collect();
            FakeTable {
                current,
                saved: HashMap::new(),
                intercepts: 0,
                releases: 0,
                fail_on: None,
                fail_release_on: None,
            }
        }

        fn failing_on(signal: Signal) -> Self {
            FakeTable {
                fail_on: Some(signal),
                ..Self::new()
            }
        }

        fn all_original(&self) -> bool {
            WATCHED_SIGNALS
                .iter()
                .enumerate()
                .all(|(i, s)| self.current[s] == Disposition::Original(i))
        }

        fn all_intercepted(&self) -> bool {
            WATCHED_SIGNALS
                .iter()
                .all(|s| self.current[s] == Disposition::Crash)
        }
    }

    impl DispositionTable for FakeTable {
        fn intercept(&mut self, signal: Signal) -> GuardResult<()> {
            if self.fail_on == Some(signal) {
                return Err(GuardError::Install {
                    signal,
                    source: Errno::EINVAL,
                });
            }
            self.intercepts += 1;
            let prior = self.current.insert(signal, Disposition::Crash).unwrap();
            if prior != Disposition::Crash {
                assert!(self.saved.insert(signal, prior).is_none(), "saved twice");
            }
            Ok(())
        }

        fn release(&mut self, signal: Signal) -> GuardResult<()> {
            self.releases += 1;
            if self.fail_release_on == Some(signal) {
                return Err(GuardError::Restore {
                    signal,
                    source: Errno::EPERM,
                });
            }
            let prior = self.saved.remove(&signal).expect("release without intercept");
            self.current.insert(signal, prior);
            Ok(())
        }
    }

    #[test]
    fn test_single_activation_round_trip() {
        let mut activation = Activation::new(FakeTable::new());
        assert_eq!(activation.acquire().unwrap(), 1);
        assert!(activation.table().all_intercepted());

        assert_eq!(activation.release(), 0);
        assert!(activation.table().all_original());
        assert!(activation.table().saved.is_empty());
    }

    #[test]
    fn test_nested_activations_touch_os_only_at_outermost() {
        let mut activation = Activation::new(FakeTable::new());
        let n = WATCHED_SIGNALS.len();

        for depth in 1..=5 {
            assert_eq!(activation.acquire().unwrap(), depth);
            assert_eq!(activation.table().intercepts, n);
            assert_eq!(activation.table().releases, 0);
        }

        for remaining in (1..5).rev() {
            assert_eq!(activation.release(), remaining);
            assert!(activation.table().all_intercepted());
            assert_eq!(activation.table().releases, 0);
        }

        assert_eq!(activation.release(), 0);
        assert_eq!(activation.table().releases, n);
        assert!(activation.table().all_original());
    }

    #[test]
    fn test_sequential_cycles_do_not_drift() {
        let mut activation = Activation::new(FakeTable::new());
        for _ in 0..1000 {
            activation.acquire().unwrap();
            activation.release();
        }
        assert!(activation.table().all_original());
        assert_eq!(activation.table().intercepts, 1000 * WATCHED_SIGNALS.len());
        assert_eq!(activation.table().releases, 1000 * WATCHED_SIGNALS.len());
    }

    #[test]
    fn test_failed_install_rolls_back_partial_set() {
        let mut activation = Activation::new(FakeTable::failing_on(Signal::SIGABRT));
        let err = activation.acquire().unwrap_err();

        assert!(matches!(
            err,
            GuardError::Install {
                signal: Signal::SIGABRT,
                source: Errno::EINVAL
            }
        ));
        assert_eq!(activation.count(), 0);
        assert_eq!(activation.table().intercepts, 4);
        assert_eq!(activation.table().releases, 4);
        assert!(activation.table().all_original());
        assert!(activation.table().saved.is_empty());
    }

    #[test]
    fn test_failure_on_first_signal_releases_nothing() {
        let mut activation = Activation::new(FakeTable::failing_on(WATCHED_SIGNALS[0]));
        assert!(activation.acquire().is_err());
        assert_eq!(activation.table().releases, 0);
        assert!(activation.table().all_original());
    }

    #[test]
    fn test_activation_after_failure_can_still_arm() {
        let mut activation = Activation::new(FakeTable::failing_on(Signal::SIGTERM));
        assert!(activation.acquire().is_err());

        activation.table.fail_on = None;
        assert_eq!(activation.acquire().unwrap(), 1);
        assert!(activation.table().all_intercepted());
    }

    #[test]
    fn test_unbalanced_release_is_harmless() {
        let mut activation = Activation::new(FakeTable::new());
        assert_eq!(activation.release(), 0);
        assert_eq!(activation.table().releases, 0);
        assert!(activation.table().all_original());
    }

    #[test]
    fn test_failed_restore_is_retried_on_next_disarm() {
        let mut activation = Activation::new(FakeTable::new());
        activation.table.fail_release_on = Some(Signal::SIGINT);

        activation.acquire().unwrap();
        assert_eq!(activation.release(), 0);
        assert_eq!(activation.stranded(), 1);
        assert_eq!(activation.table().current[&Signal::SIGINT], Disposition::Crash);

        activation.table.fail_release_on = None;
        assert_eq!(activation.acquire().unwrap(), 1);
        assert!(activation.table().all_intercepted());
        assert_eq!(activation.release(), 0);
        assert_eq!(activation.stranded(), 0);
        assert!(activation.table().all_original());
        assert!(activation.table().saved.is_empty());
    }
}
