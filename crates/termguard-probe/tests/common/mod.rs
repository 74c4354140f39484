#![allow(dead_code)]
//! Common test utilities for termguard-probe integration tests.
//!
//! Provides a small PTY harness: the probe runs with a pseudo-terminal as
//! its controlling terminal, a reader thread collects everything it prints,
//! and tests can type into the terminal and wait for output.
#![cfg(unix)]

use portable_pty::{Child, CommandBuilder, ExitStatus, PtySize, native_pty_system};
use regex::Regex;
use std::io::{Read, Write};
use std::process::{Command, Output};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default timeout for waiting on terminal output (in milliseconds).
pub const DEFAULT_TIMEOUT_MS: u64 = 15000;

/// Run the probe with piped stdio and collect its output.
pub fn run_probe(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_termguard-probe"))
        .args(args)
        .output()
        .expect("Failed to run termguard-probe")
}

/// Number of non-overlapping occurrences of `needle` in `haystack`.
pub fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

/// Probe process attached to a pseudo-terminal.
pub struct Terminal {
    /// Everything the probe wrote to the terminal so far
    output: Arc<Mutex<String>>,
    /// Handle to write to the PTY
    writer: Box<dyn Write + Send>,
    /// Handle to the reader thread
    _reader_handle: JoinHandle<()>,
    /// Handle to the child process
    child: Box<dyn Child + Send + Sync>,
}

impl Terminal {
    /// Spawn the probe in a PTY with the given arguments.
    pub fn spawn(args: &[&str]) -> Result<Self, String> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| format!("Failed to open PTY: {}", e))?;

        let mut cmd = CommandBuilder::new(env!("CARGO_BIN_EXE_termguard-probe"));
        for arg in args {
            cmd.arg(*arg);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| format!("Failed to spawn termguard-probe: {}", e))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| format!("Failed to get PTY writer: {}", e))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| format!("Failed to get PTY reader: {}", e))?;

        // Drop slave end in parent process
        drop(pair.slave);

        let output = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&output);
        let reader_handle = thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&buf[..n]);
                        sink.lock().unwrap().push_str(&text);
                    }
                }
            }
        });

        Ok(Terminal {
            output,
            writer,
            _reader_handle: reader_handle,
            child,
        })
    }

    /// Snapshot of all output received so far.
    pub fn output(&self) -> String {
        self.output.lock().unwrap().clone()
    }

    /// Wait until the output contains `pattern`.
    pub fn expect(&self, pattern: &str) -> Result<(), String> {
        self.expect_timeout(pattern, DEFAULT_TIMEOUT_MS)
    }

    /// Wait until the output contains `pattern`, with a custom timeout.
    pub fn expect_timeout(&self, pattern: &str, timeout_ms: u64) -> Result<(), String> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.output().contains(pattern) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(format!(
                    "Timed out waiting for {:?}. Output so far:\n{}",
                    pattern,
                    self.output()
                ));
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    /// Wait until the output matches `re` and return the first match's captures
    /// as owned strings.
    pub fn expect_match(&self, re: &Regex) -> Result<Vec<String>, String> {
        let deadline = Instant::now() + Duration::from_millis(DEFAULT_TIMEOUT_MS);
        loop {
            let output = self.output();
            if let Some(captures) = re.captures(&output) {
                return Ok(captures
                    .iter()
                    .map(|m| m.map_or_else(String::new, |m| m.as_str().to_string()))
                    .collect());
            }
            if Instant::now() >= deadline {
                return Err(format!(
                    "Timed out waiting for /{}/. Output so far:\n{}",
                    re.as_str(),
                    output
                ));
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    /// Type text into the terminal.
    pub fn send(&mut self, text: &str) -> Result<(), String> {
        self.writer
            .write_all(text.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| format!("Failed to write to PTY: {}", e))
    }

    /// Wait for the probe to exit.
    pub fn wait(&mut self) -> Result<ExitStatus, String> {
        self.child
            .wait()
            .map_err(|e| format!("Failed to wait for termguard-probe: {}", e))
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}
