/*
    Copyright (C) 2021-2023  Rafal Michalski

    This file is part of TAPEDECK, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! Mapping of CPU clock cycles onto an audio frame grid.
//!
//! The emulated CPU toggles its tape and sound lines at arbitrary,
//! cycle-counted instants while the audio side consumes and produces frames at
//! a fixed rate. [FrameClock] bridges the two domains by answering, for every
//! call, how many whole frames have become due since the previous call.
//!
//! Frames due are derived from the *cumulative* elapsed cycle count, never
//! from a rounded per-call delta, so rounding error can not accumulate:
//! after any sequence of calls the total number of emitted frames equals
//! `floor(elapsed * frame_rate / cpu_hz)` exactly.
use core::fmt;
use std::error::Error;

/// A count of emulated CPU clock cycles (T-states).
pub type Cycles = u64;

/// The largest audio frame rate a [FrameClock] accepts.
pub const MAX_FRAME_RATE: u32 = 384_000;

/// The largest elapsed cycle count a [FrameClock] converts before forcing a
/// resync.
///
/// Chosen so that `elapsed * frame_rate` can never overflow the 64-bit
/// accumulator for any accepted frame rate. At a 4 MHz CPU clock this spans
/// well over a hundred days of continuous emulation.
pub const MAX_ELAPSED_CYCLES: Cycles = u64::MAX / MAX_FRAME_RATE as u64;

/// The error type returned by [FrameClock] methods.
///
/// A desync is informational: the affected stream is force-stopped and
/// reported, the emulation itself continues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockError {
    /// The cycle counter moved backwards, e.g. after a CPU reset.
    CycleUnderflow,
    /// The elapsed cycle count exceeded [MAX_ELAPSED_CYCLES].
    CycleOverflow,
    /// The frame rate or the CPU clock rate is zero or out of range.
    InvalidRate,
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::CycleUnderflow => "the CPU cycle counter moved backwards".fmt(f),
            ClockError::CycleOverflow => "too many CPU cycles elapsed between calls".fmt(f),
            ClockError::InvalidRate => "invalid frame or CPU clock rate".fmt(f)
        }
    }
}

impl Error for ClockError {}

/// Converts a monotonically increasing CPU cycle counter into a monotonically
/// non-decreasing count of audio frames due.
#[derive(Clone, Copy, Debug)]
pub struct FrameClock {
    frame_rate: u32,
    cpu_hz: u32,
    begin_cycle: Option<Cycles>,
    last_cycle: Cycles,
    frames_total: u64,
}

impl FrameClock {
    /// Creates a clock converting cycles of a `cpu_hz` CPU clock into frames
    /// at `frame_rate`.
    pub fn new(frame_rate: u32, cpu_hz: u32) -> Result<Self, ClockError> {
        if frame_rate == 0 || frame_rate > MAX_FRAME_RATE || cpu_hz == 0 {
            return Err(ClockError::InvalidRate)
        }
        Ok(FrameClock {
            frame_rate,
            cpu_hz,
            begin_cycle: None,
            last_cycle: 0,
            frames_total: 0
        })
    }
    /// Returns the number of frames that became due since the previous call.
    ///
    /// The first call after creation or [FrameClock::resync] latches the
    /// cycle base and yields zero frames.
    pub fn frames_due(&mut self, cycle: Cycles) -> Result<u64, ClockError> {
        let begin = match self.begin_cycle {
            Some(begin) => begin,
            None => {
                self.begin_cycle = Some(cycle);
                self.last_cycle = cycle;
                return Ok(0)
            }
        };
        if cycle < self.last_cycle {
            return Err(ClockError::CycleUnderflow)
        }
        let elapsed = cycle - begin;
        if elapsed > MAX_ELAPSED_CYCLES {
            return Err(ClockError::CycleOverflow)
        }
        self.last_cycle = cycle;
        let total = elapsed * self.frame_rate as u64 / self.cpu_hz as u64;
        let due = total - self.frames_total;
        self.frames_total = total;
        Ok(due)
    }
    /// Forgets the cycle base; the next [FrameClock::frames_due] call
    /// re-latches it and emits zero frames.
    ///
    /// Use after a pause, a CPU reset or a clock rate change.
    pub fn resync(&mut self) {
        self.begin_cycle = None;
        self.last_cycle = 0;
        self.frames_total = 0;
    }
    /// Changes the emulated CPU clock rate, resyncing the cycle base.
    pub fn set_cpu_hz(&mut self, cpu_hz: u32) -> Result<(), ClockError> {
        if cpu_hz == 0 {
            return Err(ClockError::InvalidRate)
        }
        self.cpu_hz = cpu_hz;
        self.resync();
        Ok(())
    }
    /// Returns the total number of frames emitted since the cycle base was latched.
    #[inline]
    pub fn frames_total(&self) -> u64 {
        self.frames_total
    }
    /// Returns the audio frame rate.
    #[inline]
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }
    /// Returns the emulated CPU clock rate.
    #[inline]
    pub fn cpu_hz(&self) -> u32 {
        self.cpu_hz
    }
    /// Returns `true` once the cycle base has been latched.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.begin_cycle.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand::rngs::SmallRng;

    #[test]
    fn invalid_rates_are_rejected() {
        assert_eq!(ClockError::InvalidRate, FrameClock::new(0, 3_500_000).unwrap_err());
        assert_eq!(ClockError::InvalidRate, FrameClock::new(MAX_FRAME_RATE + 1, 3_500_000).unwrap_err());
        assert_eq!(ClockError::InvalidRate, FrameClock::new(44100, 0).unwrap_err());
        assert!(FrameClock::new(MAX_FRAME_RATE, 1).is_ok());
    }

    #[test]
    fn first_call_latches_and_emits_nothing() {
        let mut clock = FrameClock::new(44100, 3_500_000).unwrap();
        assert!(!clock.is_running());
        assert_eq!(0, clock.frames_due(123_456).unwrap());
        assert!(clock.is_running());
        assert_eq!(0, clock.frames_total());
    }

    #[test]
    fn frames_due_is_cumulative_and_exact() {
        let frame_rate = 44100u32;
        let cpu_hz = 3_500_000u32;
        let mut clock = FrameClock::new(frame_rate, cpu_hz).unwrap();
        let begin = 1000u64;
        clock.frames_due(begin).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);
        let mut cycle = begin;
        let mut emitted = 0u64;
        for _ in 0..1_000_000 {
            cycle += rng.gen_range(0..400);
            emitted += clock.frames_due(cycle).unwrap();
            let expected = (cycle - begin) * frame_rate as u64 / cpu_hz as u64;
            assert_eq!(expected, emitted);
            assert_eq!(expected, clock.frames_total());
        }
    }

    #[test]
    fn overflow_guard_is_exact() {
        let mut clock = FrameClock::new(MAX_FRAME_RATE, 1_000_000).unwrap();
        clock.frames_due(0).unwrap();
        // the guard boundary itself still converts without overflowing
        let due = clock.frames_due(MAX_ELAPSED_CYCLES).unwrap();
        assert_eq!(MAX_ELAPSED_CYCLES * MAX_FRAME_RATE as u64 / 1_000_000, due);
        let mut clock = FrameClock::new(MAX_FRAME_RATE, 1_000_000).unwrap();
        clock.frames_due(0).unwrap();
        assert_eq!(ClockError::CycleOverflow,
                   clock.frames_due(MAX_ELAPSED_CYCLES + 1).unwrap_err());
    }

    #[test]
    fn backwards_counter_is_a_desync() {
        let mut clock = FrameClock::new(44100, 3_500_000).unwrap();
        clock.frames_due(1000).unwrap();
        clock.frames_due(2000).unwrap();
        assert_eq!(ClockError::CycleUnderflow, clock.frames_due(1999).unwrap_err());
    }

    #[test]
    fn resync_restarts_the_base() {
        let mut clock = FrameClock::new(44100, 3_500_000).unwrap();
        clock.frames_due(0).unwrap();
        clock.frames_due(3_500_000).unwrap();
        assert_eq!(44100, clock.frames_total());
        clock.resync();
        assert_eq!(0, clock.frames_due(7_000_000).unwrap());
        assert_eq!(0, clock.frames_total());
        assert_eq!(44100, clock.frames_due(10_500_000).unwrap());
    }

    #[test]
    fn cpu_rate_change_resyncs() {
        let mut clock = FrameClock::new(44100, 3_500_000).unwrap();
        clock.frames_due(0).unwrap();
        clock.set_cpu_hz(7_000_000).unwrap();
        assert!(!clock.is_running());
        assert_eq!(0, clock.frames_due(1_000_000).unwrap());
        assert_eq!(44100 / 2, clock.frames_due(1_000_000 + 3_500_000).unwrap());
        assert_eq!(ClockError::InvalidRate, clock.set_cpu_hz(0).unwrap_err());
    }
}
