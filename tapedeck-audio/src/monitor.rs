/*
    Copyright (C) 2021-2023  Rafal Michalski

    This file is part of TAPEDECK, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The best-effort monitor line.
//!
//! A [Monitor] mirrors captured or generated frames to a secondary playback
//! line so a human can listen along. It is never allowed to affect the
//! primary data path: the real-time feed only ever try-locks the line handle,
//! a full line drops samples and a failing line disables itself with a soft
//! warning instead of an error.
//!
//! The line handle is shared with a control thread that opens and closes it
//! (e.g. on a device change), hence the mutex.
use core::fmt;
use std::sync::Mutex;

use crate::event::{AudioEvent, EventSender};
use crate::io::FrameSink;

/// Computes the monitor line buffer size in frames for a frame rate:
/// an eighth to half a second, so a slow device cannot stall the feeder.
pub fn monitor_buffer_frames(frame_rate: u32) -> u32 {
    let min = (frame_rate / 8).max(1);
    let max = (frame_rate / 2).max(1);
    min.next_power_of_two().clamp(min, max)
}

/// A secondary, non-authoritative playback path for human listening.
pub struct Monitor {
    line: Mutex<Option<Box<dyn FrameSink + Send>>>,
    events: EventSender,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
         .field("open", &self.is_open())
         .finish()
    }
}

impl Monitor {
    /// Creates a closed monitor reporting soft warnings to `events`.
    pub fn new(events: EventSender) -> Self {
        Monitor { line: Mutex::new(None), events }
    }
    /// Attaches a playback line, replacing any previous one.
    ///
    /// Called from a control thread, e.g. after the user picked a different
    /// output device.
    pub fn open(&self, line: Box<dyn FrameSink + Send>) {
        if let Ok(mut guard) = self.line.lock() {
            *guard = Some(line);
        }
    }
    /// Detaches and drops the playback line.
    pub fn close(&self) {
        if let Ok(mut guard) = self.line.lock() {
            *guard = None;
        }
    }
    /// Returns `true` while a line is attached.
    pub fn is_open(&self) -> bool {
        match self.line.try_lock() {
            Ok(guard) => guard.is_some(),
            Err(..) => false
        }
    }
    /// Mirrors interleaved samples to the line, best-effort.
    ///
    /// Never blocks: a contended handle or a full line loses the samples and
    /// a write failure closes the line with a [AudioEvent::MonitorWarning].
    pub fn feed(&self, samples: &[i16]) {
        let mut guard = match self.line.try_lock() {
            Ok(guard) => guard,
            Err(..) => return
        };
        if let Some(line) = guard.as_mut() {
            if let Err(error) = line.write_samples(samples) {
                log::warn!("monitor line disabled: {}", error);
                self.events.send(AudioEvent::MonitorWarning(error.to_string()));
                *guard = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_channel;
    use crate::io::{LineError, LineErrorKind, NullSink};
    use tapedeck_core::format::AudioFormat;

    #[derive(Debug)]
    struct BrokenSink(AudioFormat);

    impl FrameSink for BrokenSink {
        fn format(&self) -> &AudioFormat {
            &self.0
        }
        fn samples_free(&self) -> usize {
            0
        }
        fn write_samples(&mut self, _samples: &[i16]) -> Result<usize, LineError> {
            Err(("device unplugged".to_string(), LineErrorKind::AudioSubsystem).into())
        }
    }

    #[test]
    fn buffer_spans_an_eighth_to_half_a_second() {
        for &rate in [8000u32, 22050, 44100, 48000, 192_000].iter() {
            let frames = monitor_buffer_frames(rate);
            assert!(frames >= rate / 8, "rate {}", rate);
            assert!(frames <= rate / 2, "rate {}", rate);
        }
    }

    #[test]
    fn closed_monitor_swallows_samples() {
        let (events, _rx) = event_channel(4);
        let monitor = Monitor::new(events);
        assert!(!monitor.is_open());
        monitor.feed(&[1, 2, 3]);
    }

    #[test]
    fn failing_line_disables_itself_with_a_soft_warning() {
        let (events, rx) = event_channel(4);
        let monitor = Monitor::new(events);
        monitor.open(Box::new(BrokenSink(AudioFormat::default())));
        assert!(monitor.is_open());
        monitor.feed(&[1, 2, 3]);
        assert!(!monitor.is_open());
        assert!(matches!(rx.try_recv(), Ok(AudioEvent::MonitorWarning(..))));
        // subsequent feeds are ignored, the warning is not repeated
        monitor.feed(&[1, 2, 3]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn healthy_line_receives_the_samples() {
        let (events, _rx) = event_channel(4);
        let monitor = Monitor::new(events);
        monitor.open(Box::new(NullSink::new(AudioFormat::default())));
        monitor.feed(&[1, 2, 3]);
        assert!(monitor.is_open());
        monitor.close();
        assert!(!monitor.is_open());
    }
}
