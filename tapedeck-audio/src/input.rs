/*
    Copyright (C) 2021-2023  Rafal Michalski

    This file is part of TAPEDECK, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The capture and playback-in stream driver.
//!
//! [AudioIn] recovers the binary tape signal an emulated machine reads from
//! its cassette input, either from a live capture line or from a decoded tape
//! image. The emulation thread calls [AudioIn::read_phase] once per relevant
//! instruction; each call converts the elapsed CPU cycles into frames due,
//! pulls that many frames from the source in bulk and decides the phase from
//! the most recent sample against the auto-level window.
//!
//! Reading in bulk is what makes "turbo" playback work: with an unthrottled
//! emulated clock a single call happily chews through thousands of buffered
//! tape-image frames.
use std::sync::Arc;

use tapedeck_core::clock::{Cycles, FrameClock};
use tapedeck_core::format::AudioFormat;
use tapedeck_core::phase::{PhaseRunBuffer, PhaseRunReader};

use crate::event::{AudioEvent, EventSender};
use crate::io::{FrameSource, LineError, Seekable, StreamState};
use crate::level::LevelWindow;
use crate::monitor::Monitor;

/// The number of frames read from the source in one go.
const READ_CHUNK_FRAMES: usize = 2048;
/// The number of level-meter updates emitted per second of signal.
const METER_RATE: u32 = 20;
/// The smallest reported progress change, in permille.
const PROGRESS_STEP: u16 = 5;

/// The capture / playback-in side of the tape interface.
///
/// Composed from a [FrameSource] implementation, a [FrameClock], a
/// [LevelWindow] and an [EventSender]; all state is owned by the emulation
/// thread.
#[derive(Debug)]
pub struct AudioIn<S> {
    source: S,
    format: AudioFormat,
    clock: FrameClock,
    level: LevelWindow,
    state: StreamState,
    phase: bool,
    channel: u8,
    events: EventSender,
    monitor: Option<Arc<Monitor>>,
    scratch: Vec<i16>,
    meter_every: u64,
    meter_countdown: u64,
    last_permille: u16,
}

impl<S: FrameSource> AudioIn<S> {
    /// Creates a streaming input over `source` for a CPU clocked at `cpu_hz`.
    ///
    /// Announces the stream format to the observer.
    pub fn new(source: S, cpu_hz: u32, events: EventSender) -> Result<Self, LineError> {
        let format = *source.format();
        let clock = FrameClock::new(format.frame_rate, cpu_hz)?;
        let meter_every = (format.frame_rate as u64 / METER_RATE as u64).max(1);
        events.send(AudioEvent::Format(format.to_string()));
        Ok(AudioIn {
            source,
            format,
            clock,
            level: LevelWindow::new(format.frame_rate),
            state: StreamState::Streaming,
            phase: false,
            channel: 0,
            events,
            monitor: None,
            scratch: vec![0; READ_CHUNK_FRAMES * format.channels.max(1) as usize],
            meter_every,
            meter_countdown: meter_every,
            last_permille: 0
        })
    }
    /// Selects which channel of a multi-channel source decides the phase.
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel.min(self.format.channels.saturating_sub(1));
        self
    }
    /// Mirrors everything this stream reads to a monitor line.
    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }
    /// Returns the binary phase of the tape signal at CPU cycle `cycle`.
    ///
    /// Called once per relevant instruction from the emulation thread. Never
    /// blocks and never panics on an audio failure; a failed stream keeps
    /// returning the last decided phase.
    pub fn read_phase(&mut self, cycle: Cycles) -> bool {
        if self.state != StreamState::Streaming {
            return self.phase
        }
        let due = match self.clock.frames_due(cycle) {
            Ok(due) => due,
            Err(error) => {
                self.fail(error.into());
                return self.phase
            }
        };
        if due == 0 {
            return self.phase
        }
        let channels = self.format.channels.max(1) as usize;
        let channel = self.channel as usize;
        let mut left = due;
        let mut last_sample = None;
        while left > 0 {
            let want_frames = left.min((self.scratch.len() / channels) as u64) as usize;
            let ready_frames = self.source.samples_ready() / channels;
            let want = want_frames.min(ready_frames) * channels;
            if want == 0 {
                break
            }
            let got = match self.source.read_samples(&mut self.scratch[..want]) {
                Ok(got) => got,
                Err(error) => {
                    self.fail(error);
                    return self.phase
                }
            };
            let frames = got / channels;
            if frames == 0 {
                break
            }
            for frame in 0..frames {
                let sample = self.scratch[frame * channels + channel];
                self.level.update(sample);
                self.meter_countdown -= 1;
                if self.meter_countdown == 0 {
                    self.meter_countdown = self.meter_every;
                    let (min, max) = self.level.bounds();
                    self.events.send(AudioEvent::Level { min, max, value: self.level.value() });
                }
            }
            last_sample = Some(self.scratch[(frames - 1) * channels + channel]);
            if let Some(monitor) = self.monitor.as_ref() {
                monitor.feed(&self.scratch[..frames * channels]);
            }
            left -= frames as u64;
        }
        if let Some(sample) = last_sample {
            self.phase = self.level.phase(sample);
        }
        self.report_progress();
        if self.source.is_exhausted() {
            self.state = StreamState::Stopped;
            self.events.send(AudioEvent::Finished);
        }
        self.phase
    }
    /// Suspends or resumes the stream. Resuming resyncs the clock so the
    /// suspended stretch is not replayed in a burst.
    pub fn set_paused(&mut self, paused: bool) {
        match (self.state, paused) {
            (StreamState::Streaming, true) => {
                self.state = StreamState::Paused;
            }
            (StreamState::Paused, false) => {
                self.clock.resync();
                self.state = StreamState::Streaming;
            }
            _ => {}
        }
    }
    /// Stops the stream cleanly and notifies the observer.
    pub fn stop(&mut self) {
        if !self.state.is_terminal() {
            self.state = StreamState::Stopped;
            self.events.send(AudioEvent::Finished);
        }
    }
    /// Re-enables a terminal stream, resyncing the clock.
    pub fn enable(&mut self) {
        self.clock.resync();
        self.state = StreamState::Streaming;
    }
    /// Returns the current stream state.
    #[inline]
    pub fn state(&self) -> StreamState {
        self.state
    }
    /// Returns the most recently decided phase.
    #[inline]
    pub fn phase(&self) -> bool {
        self.phase
    }
    /// Returns the immutable stream format.
    #[inline]
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }
    /// Returns a shared reference to the source.
    pub fn get_ref(&self) -> &S {
        &self.source
    }
    /// Returns a mutable reference to the source.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.source
    }
    /// Returns the underlying source.
    pub fn into_inner(self) -> S {
        self.source
    }

    fn report_progress(&mut self) {
        if let Some((pos, total)) = self.source.progress() {
            if total != 0 {
                let permille = (pos.saturating_mul(1000) / total) as u16;
                if permille.abs_diff(self.last_permille) >= PROGRESS_STEP || permille == 1000 {
                    self.last_permille = permille;
                    self.events.send(AudioEvent::Progress { permille });
                }
            }
        }
    }

    fn fail(&mut self, error: LineError) {
        log::warn!("audio input stopped: {}", error);
        self.state = StreamState::Error;
        self.events.send(AudioEvent::StreamError(error));
    }
}

impl<S: FrameSource + Seekable> AudioIn<S> {
    /// Repositions a seekable transport, e.g. on a tape rewind.
    pub fn set_frame_pos(&mut self, pos: u64) {
        self.source.set_frame_pos(pos);
        self.clock.resync();
    }
}

/// A [FrameSource] over a finished [PhaseRunBuffer]: playback of a recorded
/// or decoded tape image in place of a live capture line.
///
/// This is the shape container codec factories produce when they turn a byte
/// buffer into a playable signal.
#[derive(Debug, Clone)]
pub struct PhaseRunSource {
    reader: PhaseRunReader,
    format: AudioFormat,
}

impl PhaseRunSource {
    /// Creates a playback source over a finished buffer at the given frame rate.
    pub fn new(buf: Arc<PhaseRunBuffer>, frame_rate: u32) -> Self {
        PhaseRunSource {
            reader: PhaseRunReader::new(buf),
            format: AudioFormat::tape_signal(frame_rate)
        }
    }
    /// Returns a shared reference to the underlying reader.
    pub fn get_ref(&self) -> &PhaseRunReader {
        &self.reader
    }
}

impl FrameSource for PhaseRunSource {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn samples_ready(&self) -> usize {
        self.reader.remaining().min(usize::MAX as u64) as usize
    }

    fn read_samples(&mut self, buf: &mut [i16]) -> Result<usize, LineError> {
        let mut count = 0;
        while count < buf.len() {
            match self.reader.read_sample::<i16>() {
                Some(sample) => {
                    buf[count] = sample;
                    count += 1;
                }
                None => break
            }
        }
        Ok(count)
    }

    fn is_exhausted(&self) -> bool {
        self.reader.remaining() == 0
    }

    fn progress(&self) -> Option<(u64, u64)> {
        Some((self.reader.frame_pos(), self.reader.frame_count()))
    }
}

impl Seekable for PhaseRunSource {
    fn set_frame_pos(&mut self, pos: u64) {
        self.reader.set_frame_pos(pos);
    }

    fn frame_pos(&self) -> u64 {
        self.reader.frame_pos()
    }

    fn frame_count(&self) -> u64 {
        self.reader.frame_count()
    }
}
