/*
    Copyright (C) 2021-2023  Rafal Michalski

    This file is part of TAPEDECK, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The generation and recording stream driver.
//!
//! [AudioOut] pushes the signal an emulated machine writes to its tape or
//! sound line out to a [FrameSink] and, independently, feeds a run-length
//! [Recorder]. The emulation thread calls [AudioOut::write_value] or
//! [AudioOut::write_phase] once per relevant instruction; the elapsed CPU
//! cycles determine how many frames of the *previous* value are emitted
//! before the new value takes over.
//!
//! Writes to a full sink retry briefly with a short sleep and a capped
//! attempt count before declaring the line dead - never an unbounded block,
//! the CPU emulation thread owns this call. A dead line stops the primary
//! path only; an in-progress recording keeps going and stays salvageable.
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tapedeck_core::clock::{Cycles, FrameClock};
use tapedeck_core::format::AudioFormat;
use tapedeck_core::phase::{PhaseRunBuffer, PhaseSample};
use tapedeck_core::recorder::{Recorder, RecorderConfig, RecorderState};

use crate::event::{AudioEvent, EventSender};
use crate::io::{FrameSink, LineError, StreamState};
use crate::monitor::Monitor;

/// The number of frames staged for the sink in one go.
const WRITE_CHUNK_FRAMES: usize = 1024;
/// The number of retries before a sink that accepts nothing is declared dead.
const MAX_WRITE_RETRIES: u32 = 8;
/// How long a single full-sink retry sleeps.
const WRITE_RETRY_SLEEP: Duration = Duration::from_millis(2);

/// The generation / recording side of the tape interface.
///
/// Composed from a [FrameSink] implementation, a [FrameClock], an optional
/// [Recorder] and an [EventSender]; all state is owned by the emulation
/// thread.
#[derive(Debug)]
pub struct AudioOut<K> {
    sink: K,
    format: AudioFormat,
    clock: FrameClock,
    state: StreamState,
    line_ok: bool,
    value: i16,
    recorder: Option<Recorder>,
    events: EventSender,
    monitor: Option<Arc<Monitor>>,
    scratch: Vec<i16>,
}

impl<K: FrameSink> AudioOut<K> {
    /// Creates a streaming output into `sink` for a CPU clocked at `cpu_hz`.
    ///
    /// Announces the stream format to the observer.
    pub fn new(sink: K, cpu_hz: u32, events: EventSender) -> Result<Self, LineError> {
        let format = *sink.format();
        let clock = FrameClock::new(format.frame_rate, cpu_hz)?;
        events.send(AudioEvent::Format(format.to_string()));
        Ok(AudioOut {
            sink,
            format,
            clock,
            state: StreamState::Streaming,
            line_ok: true,
            value: 0,
            recorder: None,
            events,
            monitor: None,
            scratch: vec![0; WRITE_CHUNK_FRAMES * format.channels.max(1) as usize],
        })
    }
    /// Mirrors everything this stream generates to a monitor line.
    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }
    /// Observes the tape output level at CPU cycle `cycle` as a binary phase.
    pub fn write_phase(&mut self, cycle: Cycles, phase: bool) {
        self.write_value(cycle, PhaseSample::from_phase(phase).into_sample());
    }
    /// Observes the output `value` at CPU cycle `cycle`.
    ///
    /// Emits the frames that became due since the previous call at the
    /// previously observed value, then caches `value` for the next call.
    /// Called once per relevant instruction from the emulation thread; never
    /// blocks beyond the bounded sink retries and never panics on an audio
    /// failure.
    pub fn write_value(&mut self, cycle: Cycles, value: i16) {
        if self.state != StreamState::Streaming {
            return
        }
        let due = match self.clock.frames_due(cycle) {
            Ok(due) => due,
            Err(error) => {
                self.fail(error.into());
                return
            }
        };
        if due != 0 {
            if let Some(recorder) = self.recorder.as_mut() {
                let before = recorder.state();
                let halt = recorder.feed(self.value, due);
                let after = recorder.state();
                if let Some(halt) = halt {
                    self.events.send(AudioEvent::RecorderHalted(halt));
                }
                if after != before {
                    self.events.send(AudioEvent::RecorderStatus(after));
                }
            }
            self.push_frames(due);
        }
        self.value = value;
    }
    /// Arms a run-length recording of the values this stream observes.
    ///
    /// The recording runs at the stream's frame rate as a monophonic signal of
    /// `signal_bits` bits: `1` for a square-wave tape signal fed via
    /// [AudioOut::write_phase], the stream's sample size for sound capture.
    /// The recorder works whether or not the sink is still alive.
    pub fn start_recording(&mut self, signal_bits: u8, config: RecorderConfig) {
        if self.recorder.is_some() {
            return
        }
        let format = AudioFormat::new(self.format.frame_rate, signal_bits, 1, true);
        let recorder = Recorder::new(format, config);
        self.events.send(AudioEvent::RecorderStatus(recorder.state()));
        self.recorder = Some(recorder);
    }
    /// Suspends an armed recording.
    pub fn pause_recording(&mut self) {
        if let Some(recorder) = self.recorder.as_mut() {
            let halt = recorder.pause();
            let state = recorder.state();
            if let Some(halt) = halt {
                self.events.send(AudioEvent::RecorderHalted(halt));
            }
            self.events.send(AudioEvent::RecorderStatus(state));
        }
    }
    /// Resumes a suspended recording without waiting for a value change.
    pub fn resume_recording(&mut self) {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.resume();
            let state = recorder.state();
            self.events.send(AudioEvent::RecorderStatus(state));
        }
    }
    /// Disarms the recorder and hands its buffer off as a read-only source.
    ///
    /// The finished buffer is immediately playable via
    /// [PhaseRunSource][crate::input::PhaseRunSource] or serializable by a
    /// container codec; it survives this stream. Returns `None` when no
    /// recording was armed.
    pub fn finish_recording(&mut self) -> Option<Arc<PhaseRunBuffer>> {
        let recorder = self.recorder.take()?;
        self.events.send(AudioEvent::RecorderStatus(RecorderState::Disabled));
        Some(Arc::new(recorder.finish()))
    }
    /// Returns the state of the recorder, if one is armed.
    pub fn recorder_state(&self) -> Option<RecorderState> {
        self.recorder.as_ref().map(Recorder::state)
    }
    /// Stops the stream cleanly, flushing staged sink data.
    pub fn stop(&mut self) {
        if !self.state.is_terminal() {
            if self.line_ok {
                let _ = self.sink.flush();
            }
            self.state = StreamState::Stopped;
            self.events.send(AudioEvent::Finished);
        }
    }
    /// Re-enables a terminal stream, resyncing the clock and trusting the
    /// line again.
    pub fn enable(&mut self) {
        self.clock.resync();
        self.line_ok = true;
        self.state = StreamState::Streaming;
    }
    /// Returns the current stream state.
    #[inline]
    pub fn state(&self) -> StreamState {
        self.state
    }
    /// Returns `true` while the sink still accepts data.
    #[inline]
    pub fn is_line_ok(&self) -> bool {
        self.line_ok
    }
    /// Returns the immutable stream format.
    #[inline]
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }
    /// Returns a shared reference to the sink.
    pub fn get_ref(&self) -> &K {
        &self.sink
    }
    /// Returns a mutable reference to the sink.
    pub fn get_mut(&mut self) -> &mut K {
        &mut self.sink
    }
    /// Returns the underlying sink, dropping any armed recorder.
    pub fn into_inner(self) -> K {
        self.sink
    }

    fn push_frames(&mut self, due: u64) {
        let channels = self.format.channels.max(1) as usize;
        let mut left = due;
        while left > 0 {
            let frames = left.min((self.scratch.len() / channels) as u64) as usize;
            let samples = frames * channels;
            let value = self.value;
            for sample in self.scratch[..samples].iter_mut() {
                *sample = value;
            }
            if let Some(monitor) = self.monitor.as_ref() {
                monitor.feed(&self.scratch[..samples]);
            }
            if self.line_ok && !self.write_to_sink(samples) {
                // the recorder, if any, keeps running without the line
                return
            }
            left -= frames as u64;
        }
    }

    fn write_to_sink(&mut self, samples: usize) -> bool {
        let mut offset = 0;
        let mut retries = 0;
        while offset < samples {
            match self.sink.write_samples(&self.scratch[offset..samples]) {
                Ok(0) => {
                    retries += 1;
                    if retries > MAX_WRITE_RETRIES {
                        self.line_failed(LineError::line_closed());
                        return false
                    }
                    thread::sleep(WRITE_RETRY_SLEEP);
                }
                Ok(accepted) => {
                    offset += accepted;
                    retries = 0;
                }
                Err(error) => {
                    self.line_failed(error);
                    return false
                }
            }
        }
        true
    }

    fn line_failed(&mut self, error: LineError) {
        log::warn!("audio output line failed: {}", error);
        self.line_ok = false;
        self.events.send(AudioEvent::StreamError(error));
        if self.recorder.is_none() {
            self.state = StreamState::Error;
        }
    }

    fn fail(&mut self, error: LineError) {
        log::warn!("audio output stopped: {}", error);
        self.state = StreamState::Error;
        self.events.send(AudioEvent::StreamError(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_channel;
    use crate::io::NullSink;

    const CPU_HZ: u32 = 1_000_000;
    const RATE: u32 = 8000;

    fn sink() -> NullSink {
        NullSink::new(AudioFormat::new(RATE, 8, 1, false))
    }

    /// A sink that accepts a fixed number of samples, then refuses everything.
    #[derive(Debug)]
    struct RefusingSink {
        format: AudioFormat,
        accept: usize,
    }

    impl FrameSink for RefusingSink {
        fn format(&self) -> &AudioFormat {
            &self.format
        }
        fn samples_free(&self) -> usize {
            self.accept
        }
        fn write_samples(&mut self, samples: &[i16]) -> Result<usize, LineError> {
            let accepted = samples.len().min(self.accept);
            self.accept -= accepted;
            Ok(accepted)
        }
    }

    fn cycles_for_frames(frames: u64) -> Cycles {
        frames * CPU_HZ as u64 / RATE as u64
    }

    #[test]
    fn frames_emit_at_the_previous_value() {
        let (events, _rx) = event_channel(64);
        let mut out = AudioOut::new(sink(), CPU_HZ, events).unwrap();
        out.start_recording(8, RecorderConfig::default());
        out.write_value(0, -100);
        out.write_value(cycles_for_frames(50), 100);
        out.write_value(cycles_for_frames(80), -100);
        out.write_value(cycles_for_frames(100), -100);
        let buf = out.finish_recording().unwrap();
        // 50 low pre-rolled frames, 30 high, 20 low flushed at finish
        assert_eq!(100, buf.frame_count());
        assert_eq!(100, out.get_ref().frames_written());
    }

    #[test]
    fn recording_works_without_a_live_line() {
        let (events, rx) = event_channel(64);
        let refusing = RefusingSink { format: *sink().format(), accept: 16 };
        let mut out = AudioOut::new(refusing, CPU_HZ, events).unwrap();
        out.start_recording(1, RecorderConfig::default());
        out.write_phase(0, false);
        out.write_phase(cycles_for_frames(40), true);
        // the sink dies here: only 16 of 40 frames fit
        assert!(!out.is_line_ok());
        assert_eq!(StreamState::Streaming, out.state());
        out.write_phase(cycles_for_frames(60), false);
        out.write_phase(cycles_for_frames(70), false);
        let buf = out.finish_recording().unwrap();
        // 40 low, 20 high, 10 low, then the synthetic tail of 3 x 10
        assert_eq!(40 + 20 + 10 + 30, buf.frame_count());
        let received: Vec<_> = rx.try_iter().collect();
        assert!(received.iter().any(|ev| matches!(ev, AudioEvent::StreamError(..))));
    }

    #[test]
    fn dead_line_without_recorder_is_terminal() {
        let (events, rx) = event_channel(64);
        let refusing = RefusingSink { format: *sink().format(), accept: 0 };
        let mut out = AudioOut::new(refusing, CPU_HZ, events).unwrap();
        out.write_value(0, 0);
        out.write_value(cycles_for_frames(10), 0);
        assert_eq!(StreamState::Error, out.state());
        let received: Vec<_> = rx.try_iter().collect();
        assert!(received.iter().any(|ev| matches!(ev,
            AudioEvent::StreamError(e) if e.kind() == crate::io::LineErrorKind::LineClosed)));
        // terminal until re-enabled
        out.write_value(cycles_for_frames(20), 0);
        out.enable();
        assert_eq!(StreamState::Streaming, out.state());
    }

    #[test]
    fn recorder_status_changes_are_reported() {
        let (events, rx) = event_channel(64);
        let mut out = AudioOut::new(sink(), CPU_HZ, events).unwrap();
        out.start_recording(1, RecorderConfig::default());
        assert_eq!(Some(RecorderState::Init), out.recorder_state());
        out.write_phase(0, false);
        out.write_phase(cycles_for_frames(10), false);
        assert_eq!(Some(RecorderState::Idle), out.recorder_state());
        // the changed level is only fed on the call after the change
        out.write_phase(cycles_for_frames(20), true);
        assert_eq!(Some(RecorderState::Idle), out.recorder_state());
        out.write_phase(cycles_for_frames(30), true);
        assert_eq!(Some(RecorderState::Running), out.recorder_state());
        out.pause_recording();
        assert_eq!(Some(RecorderState::Pause), out.recorder_state());
        out.resume_recording();
        out.finish_recording().unwrap();
        assert_eq!(None, out.recorder_state());
        let statuses: Vec<_> = rx.try_iter().filter_map(|ev| match ev {
            AudioEvent::RecorderStatus(state) => Some(state),
            _ => None
        }).collect();
        assert_eq!(vec![RecorderState::Init, RecorderState::Idle, RecorderState::Running,
                        RecorderState::Pause, RecorderState::Running, RecorderState::Disabled],
                   statuses);
    }

    #[test]
    fn desync_stops_the_stream_with_a_report() {
        let (events, rx) = event_channel(64);
        let mut out = AudioOut::new(sink(), CPU_HZ, events).unwrap();
        out.write_value(5000, 0);
        out.write_value(6000, 0);
        out.write_value(100, 0);
        assert_eq!(StreamState::Error, out.state());
        assert!(rx.try_iter().any(|ev| matches!(ev, AudioEvent::StreamError(..))));
    }

    #[test]
    fn stop_flushes_and_reports() {
        let (events, rx) = event_channel(64);
        let mut out = AudioOut::new(sink(), CPU_HZ, events).unwrap();
        out.write_value(0, 0);
        out.stop();
        assert_eq!(StreamState::Stopped, out.state());
        assert!(rx.try_iter().any(|ev| ev == AudioEvent::Finished));
    }
}
