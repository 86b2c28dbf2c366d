/*
    Copyright (C) 2021-2023  Rafal Michalski

    This file is part of TAPEDECK, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! Capability traits and common types of the streaming layer.
//!
//! Concrete stream back-ends - live hardware lines, file-backed transports,
//! test fakes - implement [FrameSource] and [FrameSink] and are composed into
//! [AudioIn][crate::input::AudioIn] and [AudioOut][crate::output::AudioOut]
//! rather than inherited from. All samples cross these interfaces in the
//! library's signed 16-bit working domain, interleaved by channel.
use core::fmt;
use std::error::Error;

use tapedeck_core::clock::ClockError;
use tapedeck_core::format::AudioFormat;

/// A list specifying categories of [LineError].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineErrorKind {
    /// The audio subsystem host or device is not available.
    AudioSubsystem,
    /// An audio stream could not be created, modified or kept in sync.
    AudioStream,
    /// The desired audio parameters or other arguments are invalid.
    InvalidArguments,
    /// The line is closed or stopped accepting data mid-stream.
    LineClosed,
}

/// A common error type returned by the streaming layer and the audio hosts.
#[derive(Debug, Clone, PartialEq)]
pub struct LineError {
    description: String,
    kind: LineErrorKind
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.description.fmt(f)
    }
}

impl Error for LineError {}

impl LineError {
    /// Returns the corresponding category for this error.
    pub fn kind(&self) -> LineErrorKind {
        self.kind
    }
    /// Creates an error indicating the line stopped working.
    pub fn line_closed() -> Self {
        ("the audio line is closed or stopped accepting data".to_string(),
         LineErrorKind::LineClosed).into()
    }
}

impl From<(String, LineErrorKind)> for LineError {
    fn from((description, kind): (String, LineErrorKind)) -> Self {
        LineError { description, kind }
    }
}

impl From<ClockError> for LineError {
    fn from(error: ClockError) -> Self {
        (error.to_string(), LineErrorKind::AudioStream).into()
    }
}

/// The lifecycle state of a capture or playback stream.
///
/// `Stopped` and `Error` are terminal until the stream is re-enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created but not started.
    Idle,
    /// Actively exchanging frames with the back-end.
    Streaming,
    /// Suspended; the clock resyncs on resume.
    Paused,
    /// Cleanly stopped.
    Stopped,
    /// Stopped by a reported failure.
    Error,
}

impl StreamState {
    /// Returns `true` if the stream has ended, cleanly or not.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Stopped|StreamState::Error)
    }
    /// Returns `true` if the stream is actively exchanging frames.
    #[inline]
    pub fn is_streaming(self) -> bool {
        self == StreamState::Streaming
    }
}

/// A pull interface for frame providers: hardware capture lines, decoded
/// tape images, test fixtures.
pub trait FrameSource {
    /// Returns the immutable stream format.
    fn format(&self) -> &AudioFormat;
    /// Returns how many interleaved samples can be read without blocking.
    fn samples_ready(&self) -> usize;
    /// Reads at most `buf.len()` interleaved samples without blocking.
    ///
    /// Returns the number of samples read; `0` means no data is available
    /// right now, which is not an error.
    fn read_samples(&mut self, buf: &mut [i16]) -> Result<usize, LineError>;
    /// Returns `true` once the source can never produce data again,
    /// e.g. a tape image read to its end. Live lines stay inexhaustible.
    fn is_exhausted(&self) -> bool {
        false
    }
    /// Returns `(position, total)` in frames for transports with a known
    /// length, `None` for live lines.
    fn progress(&self) -> Option<(u64, u64)> {
        None
    }
}

/// A push interface for frame consumers: hardware playback lines, encoders,
/// test fixtures.
pub trait FrameSink {
    /// Returns the immutable stream format.
    fn format(&self) -> &AudioFormat;
    /// Returns how many interleaved samples can be written without blocking.
    fn samples_free(&self) -> usize;
    /// Writes at most `samples.len()` interleaved samples without blocking.
    ///
    /// Returns the number of samples accepted; `0` means the sink's buffer is
    /// full right now, which is not an error.
    fn write_samples(&mut self, samples: &[i16]) -> Result<usize, LineError>;
    /// Pushes any internally staged data towards the device.
    fn flush(&mut self) -> Result<(), LineError> {
        Ok(())
    }
}

/// Random frame access for transports over fully materialized data.
pub trait Seekable {
    /// Repositions the transport at the absolute frame position.
    fn set_frame_pos(&mut self, pos: u64);
    /// Returns the current absolute frame position.
    fn frame_pos(&self) -> u64;
    /// Returns the total number of frames.
    fn frame_count(&self) -> u64;
}

/// A sink that accepts and discards everything.
///
/// Lets an [AudioOut][crate::output::AudioOut] record without any hardware
/// line attached.
#[derive(Debug)]
pub struct NullSink {
    format: AudioFormat,
    frames: u64,
}

impl NullSink {
    /// Creates a sink pretending to consume frames in the given format.
    pub fn new(format: AudioFormat) -> Self {
        NullSink { format, frames: 0 }
    }
    /// Returns the number of frames discarded so far.
    pub fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl FrameSink for NullSink {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn samples_free(&self) -> usize {
        usize::MAX
    }

    fn write_samples(&mut self, samples: &[i16]) -> Result<usize, LineError> {
        self.frames += samples.len() as u64 / self.format.channels.max(1) as u64;
        Ok(samples.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_counts_frames() {
        let mut sink = NullSink::new(AudioFormat::new(8000, 16, 2, true));
        assert_eq!(usize::MAX, sink.samples_free());
        assert_eq!(6, sink.write_samples(&[0; 6]).unwrap());
        assert_eq!(3, sink.frames_written());
        sink.flush().unwrap();
    }

    #[test]
    fn clock_errors_convert_to_line_errors() {
        let err = LineError::from(ClockError::CycleOverflow);
        assert_eq!(LineErrorKind::AudioStream, err.kind());
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn terminal_states() {
        assert!(StreamState::Stopped.is_terminal());
        assert!(StreamState::Error.is_terminal());
        assert!(!StreamState::Streaming.is_terminal());
        assert!(StreamState::Streaming.is_streaming());
        assert!(!StreamState::Paused.is_streaming());
    }
}
