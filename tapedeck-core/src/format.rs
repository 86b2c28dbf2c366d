/*
    Copyright (C) 2021-2023  Rafal Michalski

    This file is part of TAPEDECK, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! PCM stream format description.
use core::fmt;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

/// The description of a PCM stream's sample layout and rate.
///
/// A format is immutable once a stream has been opened with it; changing any of
/// the parameters requires closing and reopening the stream. The derived byte
/// quantities - [AudioFormat::bytes_per_sample] and [AudioFormat::bytes_per_frame] -
/// are pure functions of the sample size and channel count.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// The number of frames per second.
    pub frame_rate: u32,
    /// The number of meaningful bits in a single sample.
    pub sample_bits: u8,
    /// The number of samples in a single frame.
    pub channels: u8,
    /// `true` if samples are signed, `false` if they are offset-binary.
    pub signed: bool,
    /// `true` if samples larger than one byte are stored big-endian.
    pub big_endian: bool,
}

impl AudioFormat {
    /// Creates a little-endian format from the given parameters.
    pub const fn new(frame_rate: u32, sample_bits: u8, channels: u8, signed: bool) -> Self {
        AudioFormat { frame_rate, sample_bits, channels, signed, big_endian: false }
    }
    /// Creates the format of a raw cassette signal: a monophonic 1-bit square wave.
    pub const fn tape_signal(frame_rate: u32) -> Self {
        AudioFormat::new(frame_rate, 1, 1, false)
    }
    /// Returns the number of bytes occupied by a single sample.
    pub const fn bytes_per_sample(&self) -> u32 {
        (self.sample_bits as u32 + 7) / 8
    }
    /// Returns the number of bytes occupied by a single frame.
    pub const fn bytes_per_frame(&self) -> u32 {
        self.bytes_per_sample() * self.channels as u32
    }
    /// Returns `true` if this format describes a monophonic 1-bit square-wave signal.
    pub const fn is_mono_bit_signal(&self) -> bool {
        self.channels == 1 && self.sample_bits == 1
    }
    /// Returns the number of frames that span the given duration in seconds.
    pub const fn frames_in_secs(&self, secs: u32) -> u64 {
        self.frame_rate as u64 * secs as u64
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat::new(44100, 16, 1, true)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz, {}-bit {}", self.frame_rate, self.sample_bits,
                  if self.signed { "signed" } else { "unsigned" })?;
        if self.bytes_per_sample() > 1 {
            write!(f, " {}", if self.big_endian { "BE" } else { "LE" })?;
        }
        match self.channels {
            1 => write!(f, ", mono"),
            2 => write!(f, ", stereo"),
            n => write!(f, ", {} channels", n)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_quantities_work() {
        let fmt = AudioFormat::new(44100, 16, 2, true);
        assert_eq!(2, fmt.bytes_per_sample());
        assert_eq!(4, fmt.bytes_per_frame());
        assert_eq!(44100 * 60, fmt.frames_in_secs(60));
        let fmt = AudioFormat::tape_signal(22050);
        assert_eq!(1, fmt.bytes_per_sample());
        assert_eq!(1, fmt.bytes_per_frame());
        assert!(fmt.is_mono_bit_signal());
        assert!(!AudioFormat::new(8000, 8, 1, false).is_mono_bit_signal());
    }

    #[test]
    fn display_describes_format() {
        assert_eq!("44100 Hz, 16-bit signed LE, stereo",
                   AudioFormat::new(44100, 16, 2, true).to_string());
        assert_eq!("22050 Hz, 1-bit unsigned, mono",
                   AudioFormat::tape_signal(22050).to_string());
        assert_eq!("8000 Hz, 8-bit unsigned, 4 channels",
                   AudioFormat::new(8000, 8, 4, false).to_string());
    }
}
