/*
    Copyright (C) 2021-2023  Rafal Michalski

    This file is part of TAPEDECK, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The tape session context.
//!
//! A [TapeDeck] is the explicit context object an emulator constructs its
//! audio streams from: one observer channel, one shared monitor line, one
//! recorder configuration. There is no process-wide state; several sessions
//! can coexist, each with its own observer.
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use tapedeck_core::format::AudioFormat;
use tapedeck_core::phase::PhaseRunBuffer;
use tapedeck_core::recorder::RecorderConfig;

use tapedeck_audio::event::{event_channel, AudioEvent, EventSender};
use tapedeck_audio::input::{AudioIn, PhaseRunSource};
use tapedeck_audio::io::{FrameSink, FrameSource, LineError, NullSink};
use tapedeck_audio::monitor::Monitor;
use tapedeck_audio::output::AudioOut;

/// The number of undelivered events the observer channel holds.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// The context from which an emulator's tape and sound streams are built.
#[derive(Debug)]
pub struct TapeDeck {
    cpu_hz: u32,
    /// Limits and policies applied to recordings armed via
    /// [TapeDeck::open_recorder].
    pub recorder_config: RecorderConfig,
    events: EventSender,
    monitor: Arc<Monitor>,
}

impl TapeDeck {
    /// Creates a session for a CPU clocked at `cpu_hz` together with the
    /// receiving end of its observer channel.
    pub fn new(cpu_hz: u32) -> (Self, Receiver<AudioEvent>) {
        let (events, receiver) = event_channel(EVENT_QUEUE_CAPACITY);
        let monitor = Arc::new(Monitor::new(events.clone()));
        let deck = TapeDeck {
            cpu_hz,
            recorder_config: RecorderConfig::default(),
            events,
            monitor
        };
        (deck, receiver)
    }
    /// Changes the emulated CPU clock rate for streams opened from now on.
    ///
    /// Streams already open keep their old rate; reopen them after a machine
    /// reset that retunes the clock.
    pub fn set_cpu_hz(&mut self, cpu_hz: u32) {
        self.cpu_hz = cpu_hz;
    }
    /// Returns the emulated CPU clock rate.
    pub fn cpu_hz(&self) -> u32 {
        self.cpu_hz
    }
    /// Returns a sender reporting to this session's observer.
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }
    /// Returns the session's shared monitor line.
    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }
    /// Opens a capture or playback-in stream over any [FrameSource].
    pub fn open_input<S: FrameSource>(&self, source: S) -> Result<AudioIn<S>, LineError> {
        AudioIn::new(source, self.cpu_hz, self.events.clone())
    }
    /// Opens an input stream mirrored to the session monitor.
    pub fn open_monitored_input<S: FrameSource>(&self, source: S) -> Result<AudioIn<S>, LineError> {
        Ok(self.open_input(source)?.with_monitor(Arc::clone(&self.monitor)))
    }
    /// Opens a playback-in stream over a finished recording or a decoded
    /// tape image.
    pub fn play_phase_buffer(&self, buf: Arc<PhaseRunBuffer>, frame_rate: u32)
                            -> Result<AudioIn<PhaseRunSource>, LineError>
    {
        self.open_input(PhaseRunSource::new(buf, frame_rate))
    }
    /// Opens a generating output stream into any [FrameSink].
    pub fn open_output<K: FrameSink>(&self, sink: K) -> Result<AudioOut<K>, LineError> {
        AudioOut::new(sink, self.cpu_hz, self.events.clone())
    }
    /// Opens an output stream mirrored to the session monitor.
    pub fn open_monitored_output<K: FrameSink>(&self, sink: K) -> Result<AudioOut<K>, LineError> {
        Ok(self.open_output(sink)?.with_monitor(Arc::clone(&self.monitor)))
    }
    /// Opens a lineless output stream armed for recording a 1-bit tape signal
    /// at `frame_rate`, using the session's [RecorderConfig].
    pub fn open_recorder(&self, frame_rate: u32) -> Result<AudioOut<NullSink>, LineError> {
        let sink = NullSink::new(AudioFormat::tape_signal(frame_rate));
        let mut out = self.open_output(sink)?;
        out.start_recording(1, self.recorder_config);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_session_records_and_replays() {
        let (deck, receiver) = TapeDeck::new(1_000_000);
        let mut out = deck.open_recorder(8000).unwrap();
        out.write_phase(0, false);
        out.write_phase(2500, true);   // 20 frames low
        out.write_phase(5000, false);  // 20 frames high
        out.write_phase(7500, false);  // 20 frames low
        let buf = out.finish_recording().unwrap();
        // 60 signal frames plus the synthetic tail of 3 x 20
        assert_eq!(120, buf.frame_count());
        let mut tape_in = deck.play_phase_buffer(buf, 8000).unwrap();
        tape_in.read_phase(0);
        assert!(!tape_in.read_phase(2500));
        assert!(tape_in.read_phase(5000));
        let events: Vec<_> = receiver.try_iter().collect();
        assert!(events.iter().any(|ev| matches!(ev, AudioEvent::RecorderStatus(..))));
        assert!(events.iter().any(|ev| matches!(ev, AudioEvent::Format(..))));
    }

    #[test]
    fn sessions_are_independent() {
        let (deck_a, _rx_a) = TapeDeck::new(3_500_000);
        let (mut deck_b, _rx_b) = TapeDeck::new(1_750_000);
        deck_b.set_cpu_hz(2_000_000);
        assert_eq!(3_500_000, deck_a.cpu_hz());
        assert_eq!(2_000_000, deck_b.cpu_hz());
        assert!(!deck_a.monitor().is_open());
    }
}
