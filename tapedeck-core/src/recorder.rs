/*
    Copyright (C) 2021-2023  Rafal Michalski

    This file is part of TAPEDECK, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The tape recorder state machine.
//!
//! A [Recorder] turns the stream of output values an emulated machine writes
//! to its tape or sound line into a compact [PhaseRunBuffer]. Identical values
//! only bump a pending counter; run entries are written on value changes, so
//! a minute of silence costs a counter increment per call instead of a frame's
//! worth of storage per sample.
//!
//! All transitions go through a single function, [Recorder::feed], and every
//! way a recording can end - frame ceiling, silence ceiling, memory
//! exhaustion - is reported as a [RecorderHalt] value for the owner to pass to
//! its observer. Nothing in here panics or blocks; this runs on the emulation
//! thread.
use core::mem::take;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::format::AudioFormat;
use crate::phase::PhaseRunBuffer;

/// The number of seconds of signal the recording buffer is pre-sized for.
const ESTIMATE_SECS: u64 = 60;
/// The number of synthetic half-waves appended by the tail completion policy.
const TAIL_HALF_WAVES: u32 = 3;

/// Limits and policies of a [Recorder].
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecorderConfig {
    /// The hard ceiling on the total recorded frames, in minutes of signal.
    /// `0` lifts the ceiling.
    pub max_minutes: u32,
    /// The longest accepted stretch of an unchanging value while recording,
    /// in seconds. `0` lifts the limit.
    pub max_silence_secs: u32,
    /// Enables the tail completion policy: finished mono 1-bit recordings
    /// ending mid-cycle get [TAIL_HALF_WAVES] synthetic half-waves appended,
    /// so tape loading routines that wait for one more transition before
    /// recognizing end-of-data do not hang.
    pub tail_completion: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        RecorderConfig {
            max_minutes: 120,
            max_silence_secs: 60,
            tail_completion: true
        }
    }
}

/// The current state of a [Recorder].
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    /// Recording has ended; all [Recorder::feed] calls are ignored.
    Disabled,
    /// Armed, no value observed yet.
    Init,
    /// The first value has been cached; nothing written to the buffer yet.
    Idle,
    /// At least one value change has been recorded.
    Running,
    /// Suspended on request; resumes on the next value change.
    Pause,
}

/// The reason a recording ended on its own.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderHalt {
    /// The total recorded frames reached the configured ceiling.
    FrameLimit,
    /// An unchanging value stretch exceeded the configured silence limit.
    SilenceLimit,
    /// The run buffer could not grow; there is no memory for recording.
    OutOfMemory,
}

/// A run-length recorder of an emulated machine's output values.
///
/// Created armed ([RecorderState::Init]); discarded or [finished][Recorder::finish]
/// when disarmed. The [PhaseRunBuffer] it wrote survives the recorder as a
/// standalone playable and saveable artifact.
#[derive(Debug)]
pub struct Recorder {
    state: RecorderState,
    format: AudioFormat,
    tail_completion: bool,
    buf: PhaseRunBuffer,
    last_value: i16,
    pending: u64,
    total: u64,
    max_frames: u64,
    max_silence: u64,
}

#[inline]
fn phase_of(value: i16) -> bool {
    value >= 0
}

impl Recorder {
    /// Creates an armed recorder for a signal in the given `format`.
    ///
    /// The buffer reservation is an estimate of [ESTIMATE_SECS] of signal at
    /// the format's frame rate and channel count; it is best-effort and the
    /// buffer grows on demand past it.
    pub fn new(format: AudioFormat, config: RecorderConfig) -> Self {
        let estimate = format.frames_in_secs(ESTIMATE_SECS as u32)
                             .saturating_mul(format.channels as u64)
                             .min(usize::MAX as u64) as usize;
        Recorder {
            state: RecorderState::Init,
            format,
            tail_completion: config.tail_completion,
            buf: PhaseRunBuffer::with_capacity(estimate),
            last_value: 0,
            pending: 0,
            total: 0,
            max_frames: format.frames_in_secs(60).saturating_mul(config.max_minutes as u64),
            max_silence: format.frames_in_secs(config.max_silence_secs)
        }
    }
    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> RecorderState {
        self.state
    }
    /// Returns the format the recording was armed with.
    #[inline]
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }
    /// Returns the number of frames flushed to the buffer so far.
    #[inline]
    pub fn frames_recorded(&self) -> u64 {
        self.total
    }
    /// Observes `frames` frames of the output `value`.
    ///
    /// This is the single transition function of the recorder. Returns the
    /// halt reason when this call ended the recording; the caller reports it
    /// to its observer instead of propagating an error.
    pub fn feed(&mut self, value: i16, frames: u64) -> Option<RecorderHalt> {
        if frames == 0 {
            return None
        }
        match self.state {
            RecorderState::Disabled => None,
            RecorderState::Init => {
                self.last_value = value;
                self.pending = frames;
                self.state = RecorderState::Idle;
                None
            }
            RecorderState::Idle|RecorderState::Running => {
                if value == self.last_value {
                    self.pending += frames;
                    if self.state == RecorderState::Running
                       && self.max_silence != 0 && self.pending > self.max_silence {
                        self.state = RecorderState::Disabled;
                        return Some(RecorderHalt::SilenceLimit)
                    }
                    None
                }
                else {
                    let halt = self.flush_pending();
                    if halt.is_none() {
                        self.state = RecorderState::Running;
                        self.last_value = value;
                        self.pending = frames;
                    }
                    halt
                }
            }
            RecorderState::Pause => {
                if value != self.last_value {
                    // resume on a level change; the suspended stretch is not recorded
                    self.state = RecorderState::Running;
                    self.last_value = value;
                    self.pending = frames;
                }
                None
            }
        }
    }
    /// Suspends the recording on user request.
    ///
    /// A pending stretch in [RecorderState::Running] is flushed first so no
    /// half-flushed run is ever torn; the `Idle` pre-roll is discarded.
    pub fn pause(&mut self) -> Option<RecorderHalt> {
        match self.state {
            RecorderState::Running => {
                let halt = self.flush_pending();
                if halt.is_none() {
                    self.state = RecorderState::Pause;
                }
                halt
            }
            RecorderState::Init|RecorderState::Idle => {
                self.pending = 0;
                self.state = RecorderState::Pause;
                None
            }
            _ => None
        }
    }
    /// Resumes a suspended recording without waiting for a value change.
    pub fn resume(&mut self) {
        if self.state == RecorderState::Pause {
            self.state = RecorderState::Running;
            self.pending = 0;
        }
    }
    /// Ends the recording and returns the buffer it wrote.
    ///
    /// A pending stretch in [RecorderState::Running] is flushed; the `Idle`
    /// pre-roll of a recording that never changed value is discarded, so such
    /// a recording produces an empty buffer. When the tail completion policy
    /// applies - a mono 1-bit format and a non-zero trailing stretch - three
    /// synthetic half-waves of the trailing stretch's length are appended.
    pub fn finish(mut self) -> PhaseRunBuffer {
        let mut tail = 0;
        if self.state == RecorderState::Running {
            tail = self.pending;
            let _ = self.flush_pending();
        }
        if self.tail_completion && self.format.is_mono_bit_signal()
           && tail != 0 && !self.buf.is_out_of_memory() {
            let mut phase = !phase_of(self.last_value);
            for _ in 0..TAIL_HALF_WAVES {
                self.buf.add_samples(tail, phase);
                phase = !phase;
            }
        }
        self.buf
    }

    fn flush_pending(&mut self) -> Option<RecorderHalt> {
        let count = take(&mut self.pending);
        if count == 0 {
            return None
        }
        self.buf.add_samples(count, phase_of(self.last_value));
        if self.buf.is_out_of_memory() {
            self.state = RecorderState::Disabled;
            return Some(RecorderHalt::OutOfMemory)
        }
        self.total += count;
        if self.max_frames != 0 && self.total >= self.max_frames {
            self.state = RecorderState::Disabled;
            return Some(RecorderHalt::FrameLimit)
        }
        None
    }
}
