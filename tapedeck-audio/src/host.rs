/*
    Copyright (C) 2021-2023  Rafal Michalski

    This file is part of TAPEDECK, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! Platform dependent audio device streaming implementations.
//!
//! To make use of the native back-end enable the `cpal` feature of the
//! `tapedeck-audio` entry in the `[dependencies]` section of the Cargo
//! configuration file.
use std::sync::mpsc::sync_channel;
use std::thread;
use std::time::Duration;

#[cfg(feature = "cpal")]
pub mod cpal;

pub use crate::io::{LineError, LineErrorKind};

/// Drops an audio line off the calling thread, waiting at most `timeout` for
/// the device to drain.
///
/// Closing a hardware line may block on the device; doing it here keeps that
/// wait off the CPU emulation thread and bounded. Returns `false` when the
/// close did not finish in time - the line is then abandoned to its thread
/// instead of deadlocking the application.
pub fn close_line_with_timeout<L: Send + 'static>(line: L, timeout: Duration) -> bool {
    let (tx, rx) = sync_channel::<()>(1);
    thread::spawn(move || {
        drop(line);
        let _ = tx.send(());
    });
    rx.recv_timeout(timeout).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowClose(Duration);

    impl Drop for SlowClose {
        fn drop(&mut self) {
            thread::sleep(self.0);
        }
    }

    #[test]
    fn close_returns_within_the_timeout() {
        assert!(close_line_with_timeout(SlowClose(Duration::from_millis(1)),
                                        Duration::from_secs(1)));
        assert!(!close_line_with_timeout(SlowClose(Duration::from_millis(500)),
                                         Duration::from_millis(10)));
    }
}
