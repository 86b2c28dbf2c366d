/*
    Copyright (C) 2021-2023  Rafal Michalski

    This file is part of TAPEDECK, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! Run-length storage for binary square-wave signals.
//!
//! A [PhaseRunBuffer] compresses a long square wave into O(number of transitions)
//! bytes: each stored element is a signed 8-bit run whose magnitude counts
//! consecutive frames sharing one phase and whose sign encodes the phase itself.
//! Trailing silence is cheaper still - it is kept as a single lazy counter and
//! only ever materialized when more signal follows it.
//!
//! A buffer is writable solely by its creator. Once finished it is handed off
//! behind an [Arc] and any number of [PhaseRunReader]s can walk it, each with
//! a private cursor.
//!
//! The buffer is *not* safe for concurrent reading and writing of the same
//! region; capture always finishes before playback or saving begins.
use core::mem::take;
use core::slice;
use std::sync::Arc;

use crate::sample::AudioSample;

/// The largest number of samples a single stored run can hold.
pub const MAX_RUN_SAMPLES: u8 = i8::MAX as u8;

/// The smallest number of bytes the backing store grows by.
const RESERVE_MIN: usize = 256;
/// The largest number of bytes the backing store grows by in one step.
const RESERVE_MAX: usize = 1024 * 1024;

/// A single frame of a binary square-wave signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseSample {
    /// The low output level.
    Low,
    /// The high output level.
    High,
    /// Neither level: a frame of trailing silence.
    Pause,
}

/// A maximal stretch of consecutive frames sharing one phase,
/// yielded by [PhaseRunReader::run_lengths].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseRun {
    /// The binary phase of the stretch.
    pub phase: bool,
    /// The number of frames in the stretch.
    pub len: u64,
}

impl PhaseSample {
    /// Returns the binary phase, or `None` for a pause frame.
    #[inline]
    pub fn phase(self) -> Option<bool> {
        match self {
            PhaseSample::Low => Some(false),
            PhaseSample::High => Some(true),
            PhaseSample::Pause => None
        }
    }
    /// Creates a phase sample from a binary phase.
    #[inline]
    pub fn from_phase(phase: bool) -> Self {
        if phase { PhaseSample::High } else { PhaseSample::Low }
    }
    /// Maps the phase to the caller's numeric PCM convention: the two symbolic
    /// output amplitudes for the binary phases and the mid-scale silence value
    /// for a pause frame.
    #[inline]
    pub fn into_sample<T: AudioSample>(self) -> T {
        match self {
            PhaseSample::Low => T::max_neg_amplitude(),
            PhaseSample::High => T::max_pos_amplitude(),
            PhaseSample::Pause => T::silence()
        }
    }
}

/// An append-only, dynamically growing run-length buffer of a binary signal.
///
/// Appending is O(1) amortized. Consecutive stored runs only share a sign when
/// the preceding run is saturated at [MAX_RUN_SAMPLES]; equal-phase appends
/// otherwise extend the trailing run.
///
/// Appending never panics on memory exhaustion: a failed growth records an
/// out-of-memory condition, releases the backing storage and turns all further
/// appends into no-ops. The owner is expected to poll
/// [PhaseRunBuffer::is_out_of_memory] and report the condition; this code runs
/// on the emulation thread and must not unwind across it.
#[derive(Debug, Default)]
pub struct PhaseRunBuffer {
    runs: Vec<i8>,
    run_samples: u64,
    pause_samples: u64,
    oom: bool,
}

impl PhaseRunBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        PhaseRunBuffer::default()
    }
    /// Creates an empty buffer, attempting to reserve room for `capacity` runs.
    ///
    /// The reservation is best-effort: if it cannot be satisfied the buffer
    /// starts out small and grows on demand instead.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut runs = Vec::new();
        if runs.try_reserve_exact(capacity).is_err() {
            log::warn!("phase run buffer: could not reserve {} bytes up front", capacity);
        }
        PhaseRunBuffer { runs, ..PhaseRunBuffer::default() }
    }
    /// Appends a single frame of the given `phase`.
    #[inline]
    pub fn put_phase(&mut self, phase: bool) {
        self.add_samples(1, phase)
    }
    /// Appends `count` frames of the given `phase`.
    ///
    /// A pending pause is first materialized as an extension of the trailing
    /// phase, so the buffer's frame total stays exact.
    pub fn add_samples(&mut self, count: u64, phase: bool) {
        if self.oom || count == 0 {
            return
        }
        if self.pause_samples != 0 {
            let pause = take(&mut self.pause_samples);
            let trailing = self.last_phase().unwrap_or(false);
            self.push_runs(pause, trailing);
            if self.oom {
                return
            }
        }
        self.push_runs(count, phase);
    }
    /// Accounts for `count` frames of trailing silence without materializing runs.
    pub fn append_pause(&mut self, count: u64) {
        if self.oom {
            return
        }
        self.pause_samples = self.pause_samples.saturating_add(count);
    }
    /// Returns the total number of frames stored: the sum of all run magnitudes
    /// plus the trailing pause counter.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.run_samples + self.pause_samples
    }
    /// Returns the phase of the trailing run if any runs are stored.
    #[inline]
    pub fn last_phase(&self) -> Option<bool> {
        self.runs.last().map(|&run| run > 0)
    }
    /// Returns the number of stored run entries.
    #[inline]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }
    /// Exposes the raw signed run entries, e.g. for container codecs
    /// serializing the buffer to their wire layout.
    #[inline]
    pub fn runs(&self) -> &[i8] {
        &self.runs
    }
    /// Returns the number of frames in the trailing, not yet materialized pause.
    #[inline]
    pub fn pause_samples(&self) -> u64 {
        self.pause_samples
    }
    /// Returns `true` once a growth failure has aborted this buffer.
    #[inline]
    pub fn is_out_of_memory(&self) -> bool {
        self.oom
    }

    fn push_runs(&mut self, mut count: u64, phase: bool) {
        if let Some(last) = self.runs.last_mut() {
            let mag = last.unsigned_abs();
            if (*last > 0) == phase && mag < MAX_RUN_SAMPLES {
                let fill = ((MAX_RUN_SAMPLES - mag) as u64).min(count) as i8;
                *last += if phase { fill } else { -fill };
                self.run_samples += fill as u64;
                count -= fill as u64;
            }
        }
        if count == 0 {
            return
        }
        let needed = ((count + MAX_RUN_SAMPLES as u64 - 1) / MAX_RUN_SAMPLES as u64) as usize;
        if !self.reserve_runs(needed) {
            return
        }
        self.run_samples += count;
        let full: i8 = if phase { i8::MAX } else { -i8::MAX };
        while count >= MAX_RUN_SAMPLES as u64 {
            self.runs.push(full);
            count -= MAX_RUN_SAMPLES as u64;
        }
        if count != 0 {
            self.runs.push(if phase { count as i8 } else { -(count as i8) });
        }
    }

    fn reserve_runs(&mut self, additional: usize) -> bool {
        let spare = self.runs.capacity() - self.runs.len();
        if spare < additional {
            let want = additional - spare;
            let step = self.runs.capacity().clamp(RESERVE_MIN, RESERVE_MAX).max(want);
            if self.runs.try_reserve_exact(step).is_err()
               && self.runs.try_reserve_exact(want).is_err() {
                self.abort_out_of_memory();
                return false
            }
        }
        true
    }

    fn abort_out_of_memory(&mut self) {
        log::error!("phase run buffer: out of memory, recording aborted");
        self.oom = true;
        self.runs = Vec::new();
        self.run_samples = 0;
        self.pause_samples = 0;
    }
}

/// A pull-style reader over a finished [PhaseRunBuffer].
///
/// Yields one [PhaseSample] per stored frame, then drains the trailing pause.
/// Reading never blocks and never requires the writer to still exist.
#[derive(Debug, Clone)]
pub struct PhaseRunReader {
    buf: Arc<PhaseRunBuffer>,
    run_index: usize,
    run_remain: u8,
    pause_remain: u64,
    pos: u64,
}

impl PhaseRunReader {
    /// Creates a reader positioned at the first frame.
    pub fn new(buf: Arc<PhaseRunBuffer>) -> Self {
        let run_remain = buf.runs.first().map_or(0, |run| run.unsigned_abs());
        let pause_remain = buf.pause_samples;
        PhaseRunReader { buf, run_index: 0, run_remain, pause_remain, pos: 0 }
    }
    /// Returns the next frame, or `None` when the buffer is exhausted.
    pub fn next_sample(&mut self) -> Option<PhaseSample> {
        if self.run_index < self.buf.runs.len() {
            let run = self.buf.runs[self.run_index];
            debug_assert!(self.run_remain != 0);
            self.run_remain -= 1;
            self.pos += 1;
            if self.run_remain == 0 {
                self.run_index += 1;
                self.run_remain = self.buf.runs.get(self.run_index)
                                     .map_or(0, |run| run.unsigned_abs());
            }
            Some(PhaseSample::from_phase(run > 0))
        }
        else if self.pause_remain != 0 {
            self.pause_remain -= 1;
            self.pos += 1;
            Some(PhaseSample::Pause)
        }
        else {
            None
        }
    }
    /// Returns the next frame mapped to the sample type's PCM convention.
    #[inline]
    pub fn read_sample<T: AudioSample>(&mut self) -> Option<T> {
        self.next_sample().map(PhaseSample::into_sample)
    }
    /// Returns the current absolute frame position.
    #[inline]
    pub fn frame_pos(&self) -> u64 {
        self.pos
    }
    /// Returns the total number of frames in the underlying buffer.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.buf.frame_count()
    }
    /// Returns the number of frames left to read.
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.frame_count() - self.pos
    }
    /// Repositions the cursor at the absolute frame position `pos`.
    ///
    /// Walks the stored runs from the beginning, so the cost is proportional
    /// to the number of runs up to `pos`, never to `pos` itself. Positions
    /// past the end of the buffer are clamped.
    pub fn set_frame_pos(&mut self, pos: u64) {
        let pos = pos.min(self.frame_count());
        let mut left = pos;
        for (index, run) in self.buf.runs.iter().enumerate() {
            let mag = run.unsigned_abs() as u64;
            if left < mag {
                self.run_index = index;
                self.run_remain = (mag - left) as u8;
                self.pause_remain = self.buf.pause_samples;
                self.pos = pos;
                return
            }
            left -= mag;
        }
        self.run_index = self.buf.runs.len();
        self.run_remain = 0;
        self.pause_remain = self.buf.pause_samples - left;
        self.pos = pos;
    }
    /// Returns an iterator over the maximal same-phase stretches of the stored
    /// signal, merging runs chained by saturation. The trailing pause is not
    /// included; see [PhaseRunBuffer::pause_samples].
    pub fn run_lengths(&self) -> RunLengthIter<'_> {
        RunLengthIter { runs: self.buf.runs.iter(), pending: None }
    }
    /// Returns a shared reference to the underlying buffer.
    pub fn get_ref(&self) -> &Arc<PhaseRunBuffer> {
        &self.buf
    }
}

impl Iterator for PhaseRunReader {
    type Item = PhaseSample;

    #[inline]
    fn next(&mut self) -> Option<PhaseSample> {
        self.next_sample()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        let upper = if remaining <= usize::MAX as u64 {
            Some(remaining as usize)
        } else {
            None
        };
        (upper.unwrap_or(usize::MAX), upper)
    }
}

/// An iterator over maximal same-phase stretches, see [PhaseRunReader::run_lengths].
#[derive(Debug)]
pub struct RunLengthIter<'a> {
    runs: slice::Iter<'a, i8>,
    pending: Option<i8>,
}

impl<'a> Iterator for RunLengthIter<'a> {
    type Item = PhaseRun;

    fn next(&mut self) -> Option<PhaseRun> {
        let first = self.pending.take().or_else(|| self.runs.next().copied())?;
        let phase = first > 0;
        let mut last_mag = first.unsigned_abs();
        let mut len = last_mag as u64;
        // runs only chain behind a saturated predecessor
        while last_mag == MAX_RUN_SAMPLES {
            match self.runs.next().copied() {
                Some(run) if (run > 0) == phase => {
                    last_mag = run.unsigned_abs();
                    len += last_mag as u64;
                }
                Some(run) => {
                    self.pending = Some(run);
                    break
                }
                None => break
            }
        }
        Some(PhaseRun { phase, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(buf: PhaseRunBuffer) -> PhaseRunReader {
        PhaseRunReader::new(Arc::new(buf))
    }

    #[test]
    fn put_phase_round_trip_works() {
        let phases = [true, true, true, false, false, true];
        let mut buf = PhaseRunBuffer::new();
        for &phase in phases.iter() {
            buf.put_phase(phase);
        }
        assert_eq!(&[3, -2, 1], buf.runs());
        assert_eq!(6, buf.frame_count());
        assert_eq!(Some(true), buf.last_phase());
        let read: Vec<_> = reader(buf).filter_map(PhaseSample::phase).collect();
        assert_eq!(&phases[..], &read[..]);
    }

    #[test]
    fn long_runs_chain_without_phase_corruption() {
        let mut buf = PhaseRunBuffer::new();
        buf.add_samples(300, true);
        assert_eq!(&[127, 127, 46], buf.runs());
        assert_eq!(300, buf.frame_count());
        buf.put_phase(false);
        let mut rd = reader(buf);
        assert_eq!(300, rd.by_ref().take_while(|p| *p == PhaseSample::High).count());
        // take_while consumed the first Low sample
        assert_eq!(None, rd.next_sample());
    }

    #[test]
    fn single_phase_appends_extend_the_trailing_run() {
        let mut buf = PhaseRunBuffer::new();
        for _ in 0..130 {
            buf.put_phase(true);
        }
        assert_eq!(&[127, 3], buf.runs());
        assert_eq!(130, buf.frame_count());
        let read: Vec<_> = reader(buf).collect();
        assert_eq!(vec![PhaseSample::High; 130], read);
    }

    #[test]
    fn pause_drains_at_mid_scale() {
        let mut buf = PhaseRunBuffer::new();
        buf.add_samples(2, true);
        buf.append_pause(3);
        assert_eq!(5, buf.frame_count());
        assert_eq!(1, buf.run_count());
        let read: Vec<_> = reader(buf).collect();
        assert_eq!(vec![PhaseSample::High, PhaseSample::High,
                        PhaseSample::Pause, PhaseSample::Pause, PhaseSample::Pause], read);
    }

    #[test]
    fn pause_materializes_as_trailing_phase_when_signal_follows() {
        let mut buf = PhaseRunBuffer::new();
        buf.add_samples(3, true);
        buf.append_pause(4);
        buf.put_phase(false);
        assert_eq!(8, buf.frame_count());
        assert_eq!(0, buf.pause_samples());
        assert_eq!(&[7, -1], buf.runs());
    }

    #[test]
    fn sample_mapping_follows_pcm_convention() {
        assert_eq!(i16::MAX, PhaseSample::High.into_sample::<i16>());
        assert_eq!(i16::MIN, PhaseSample::Low.into_sample::<i16>());
        assert_eq!(0i16, PhaseSample::Pause.into_sample::<i16>());
        assert_eq!(0x80u8, PhaseSample::Pause.into_sample::<u8>());
        assert_eq!(255u8, PhaseSample::High.into_sample::<u8>());
    }

    #[test]
    fn seek_is_idempotent_with_skipping() {
        let mut buf = PhaseRunBuffer::new();
        buf.add_samples(200, true);
        buf.add_samples(5, false);
        buf.add_samples(1, true);
        buf.append_pause(10);
        let buf = Arc::new(buf);
        let template: Vec<_> = PhaseRunReader::new(Arc::clone(&buf)).collect();
        let frame_count = template.len() as u64;
        assert_eq!(216, frame_count);
        for pos in 0..=frame_count {
            let mut seeked = PhaseRunReader::new(Arc::clone(&buf));
            seeked.set_frame_pos(pos);
            assert_eq!(pos, seeked.frame_pos());
            let rest: Vec<_> = seeked.collect();
            assert_eq!(&template[pos as usize..], &rest[..]);
        }
        // positions past the end are clamped
        let mut seeked = PhaseRunReader::new(buf);
        seeked.set_frame_pos(frame_count + 100);
        assert_eq!(frame_count, seeked.frame_pos());
        assert_eq!(None, seeked.next_sample());
    }

    #[test]
    fn run_lengths_merge_chained_runs() {
        let mut buf = PhaseRunBuffer::new();
        buf.add_samples(300, true);
        buf.add_samples(127, false);
        buf.add_samples(127, false);
        buf.add_samples(2, true);
        let rd = reader(buf);
        let runs: Vec<_> = rd.run_lengths().collect();
        assert_eq!(vec![PhaseRun { phase: true, len: 300 },
                        PhaseRun { phase: false, len: 254 },
                        PhaseRun { phase: true, len: 2 }], runs);
    }

    #[test]
    fn empty_buffer_reads_nothing() {
        let mut rd = reader(PhaseRunBuffer::new());
        assert_eq!(None, rd.next_sample());
        assert_eq!(0, rd.frame_count());
    }
}
