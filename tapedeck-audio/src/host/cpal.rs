/*
    Copyright (C) 2021-2023  Rafal Michalski

    This file is part of TAPEDECK, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! Audio device streaming implementation for [cpal](https://crates.io/crates/cpal).
//!
//! This module implements live [FrameSink] and [FrameSource] lines over the
//! [carousel][crate::carousel] using the **cpal** audio layer: [LineOut] feeds
//! a playback stream, [LineIn] drains a capture stream. Sample format
//! conversion between the device's native type and the library's signed
//! 16-bit working domain happens inside the audio callbacks.
//!
//! Requires "cpal" feature to be enabled.
use core::convert::TryInto;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use cpal::{
    Stream, SampleFormat,
    PlayStreamError, PauseStreamError, DefaultStreamConfigError, BuildStreamError,
    traits::{DeviceTrait, HostTrait, StreamTrait}
};

use tapedeck_core::format::AudioFormat;
use tapedeck_core::sample::{AudioSample, FromSample, IntoSample};

use crate::carousel::{create_carousel, CarouselConsumer, CarouselProducer};
use crate::io::{FrameSink, FrameSource, LineError, LineErrorKind};
use crate::monitor::monitor_buffer_frames;

/// The number of carousel chunks a live line circulates.
const LINE_CHUNKS: usize = 4;

/// A live playback line: a [FrameSink] whose frames come out of a speaker.
///
/// The stream keeps playing until the line is dropped; prefer
/// [close_line_with_timeout][super::close_line_with_timeout] over a plain
/// drop on a thread that must not stall.
pub struct LineOut {
    format: AudioFormat,
    producer: CarouselProducer<i16>,
    stream: Stream,
}

/// A live capture line: a [FrameSource] whose frames come from a microphone
/// or line input.
pub struct LineIn {
    format: AudioFormat,
    consumer: CarouselConsumer<i16>,
    stream: Stream,
}

/// The [Send] half of a split playback line.
///
/// [cpal::Stream] is not [Send]; splitting a [LineOut] with
/// [LineOut::into_parts] leaves the stream handle on the thread that created
/// it and yields this feed, which may travel to the emulation thread or into
/// a [Monitor][crate::monitor::Monitor].
pub struct LineFeed {
    format: AudioFormat,
    producer: CarouselProducer<i16>,
}

/// The [Send] half of a split capture line, see [LineIn::into_parts].
pub struct LineCapture {
    format: AudioFormat,
    consumer: CarouselConsumer<i16>,
}

impl LineOut {
    /// Opens a playback line on the default output device of the default host.
    ///
    /// `buffer_frames` bounds how far the line buffers ahead; pass
    /// [monitor_buffer_frames] for a monitor line or a smaller value for a
    /// tighter primary line.
    pub fn open_default(buffer_frames: u32) -> Result<Self, LineError> {
        let host = cpal::default_host();
        let device = host.default_output_device()
                     .ok_or_else(|| ("no default output device".to_string(),
                                     LineErrorKind::AudioSubsystem))?;
        Self::open(&device, buffer_frames)
    }
    /// Opens a playback line on the given device with its default stream
    /// configuration.
    pub fn open(device: &cpal::Device, buffer_frames: u32) -> Result<Self, LineError> {
        let default_config = device.default_output_config()?;
        let sample_format = default_config.sample_format();
        let config = default_config.config();
        let format = format_from_config(&config, sample_format)?;
        let chunk_samples = chunk_samples(&format, buffer_frames);
        let (producer, consumer) = create_carousel::<i16>(LINE_CHUNKS, chunk_samples);
        let stream = build_output_stream(device, &config, sample_format, consumer)?;
        stream.play()?;
        debug!("output line: {} ({:?}), chunk samples: {}", format, sample_format, chunk_samples);
        Ok(LineOut { format, producer, stream })
    }
    /// Suspends the device stream.
    pub fn pause(&self) -> Result<(), LineError> {
        self.stream.pause().map_err(From::from)
    }
    /// Resumes the device stream.
    pub fn play(&self) -> Result<(), LineError> {
        self.stream.play().map_err(From::from)
    }
    /// Splits the line into its [Send] feed and the device stream handle.
    ///
    /// The stream keeps playing for as long as its handle lives; the feed
    /// goes silent when the handle is dropped.
    pub fn into_parts(self) -> (LineFeed, Stream) {
        let LineOut { format, producer, stream } = self;
        (LineFeed { format, producer }, stream)
    }
}

impl FrameSink for LineFeed {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn samples_free(&self) -> usize {
        self.producer.samples_free()
    }

    fn write_samples(&mut self, samples: &[i16]) -> Result<usize, LineError> {
        Ok(self.producer.write_samples(samples))
    }

    fn flush(&mut self) -> Result<(), LineError> {
        self.producer.flush();
        Ok(())
    }
}

impl FrameSink for LineOut {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn samples_free(&self) -> usize {
        self.producer.samples_free()
    }

    fn write_samples(&mut self, samples: &[i16]) -> Result<usize, LineError> {
        Ok(self.producer.write_samples(samples))
    }

    fn flush(&mut self) -> Result<(), LineError> {
        self.producer.flush();
        Ok(())
    }
}

impl LineIn {
    /// Opens a capture line on the default input device of the default host.
    pub fn open_default(buffer_frames: u32) -> Result<Self, LineError> {
        let host = cpal::default_host();
        let device = host.default_input_device()
                     .ok_or_else(|| ("no default input device".to_string(),
                                     LineErrorKind::AudioSubsystem))?;
        Self::open(&device, buffer_frames)
    }
    /// Opens a capture line on the given device with its default stream
    /// configuration.
    pub fn open(device: &cpal::Device, buffer_frames: u32) -> Result<Self, LineError> {
        let default_config = device.default_input_config()?;
        let sample_format = default_config.sample_format();
        let config = default_config.config();
        let format = format_from_config(&config, sample_format)?;
        let chunk_samples = chunk_samples(&format, buffer_frames);
        let (producer, consumer) = create_carousel::<i16>(LINE_CHUNKS, chunk_samples);
        let stream = build_input_stream(device, &config, sample_format, producer)?;
        stream.play()?;
        debug!("input line: {} ({:?}), chunk samples: {}", format, sample_format, chunk_samples);
        Ok(LineIn { format, consumer, stream })
    }
    /// Suspends the device stream.
    pub fn pause(&self) -> Result<(), LineError> {
        self.stream.pause().map_err(From::from)
    }
    /// Resumes the device stream.
    pub fn play(&self) -> Result<(), LineError> {
        self.stream.play().map_err(From::from)
    }
    /// Splits the line into its [Send] capture end and the device stream
    /// handle.
    pub fn into_parts(self) -> (LineCapture, Stream) {
        let LineIn { format, consumer, stream } = self;
        (LineCapture { format, consumer }, stream)
    }
}

impl FrameSource for LineCapture {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn samples_ready(&self) -> usize {
        self.consumer.samples_queued()
    }

    fn read_samples(&mut self, buf: &mut [i16]) -> Result<usize, LineError> {
        Ok(self.consumer.read_samples(buf))
    }
}

impl FrameSource for LineIn {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn samples_ready(&self) -> usize {
        self.consumer.samples_queued()
    }

    fn read_samples(&mut self, buf: &mut [i16]) -> Result<usize, LineError> {
        Ok(self.consumer.read_samples(buf))
    }
}

/// Opens a playback line sized for a [Monitor][crate::monitor::Monitor] on
/// the default output device, split for hand-off.
///
/// Box the returned [LineFeed] into [Monitor::open][crate::monitor::Monitor::open]
/// and keep the [Stream] handle alive on the calling thread.
pub fn open_default_monitor_line() -> Result<(LineFeed, Stream), LineError> {
    let host = cpal::default_host();
    let device = host.default_output_device()
                 .ok_or_else(|| ("no default output device".to_string(),
                                 LineErrorKind::AudioSubsystem))?;
    let rate = device.default_output_config()?.config().sample_rate.0;
    Ok(LineOut::open(&device, monitor_buffer_frames(rate))?.into_parts())
}

/// Returns the names of all output devices of the default host.
pub fn output_device_names() -> Vec<String> {
    match cpal::default_host().output_devices() {
        Ok(devices) => devices.filter_map(|device| device.name().ok()).collect(),
        Err(error) => {
            warn!("could not enumerate output devices: {}", error);
            Vec::new()
        }
    }
}

/// Returns the names of all input devices of the default host.
pub fn input_device_names() -> Vec<String> {
    match cpal::default_host().input_devices() {
        Ok(devices) => devices.filter_map(|device| device.name().ok()).collect(),
        Err(error) => {
            warn!("could not enumerate input devices: {}", error);
            Vec::new()
        }
    }
}

fn chunk_samples(format: &AudioFormat, buffer_frames: u32) -> usize {
    let frames = (buffer_frames as usize / LINE_CHUNKS).max(1);
    frames * format.channels.max(1) as usize
}

fn format_from_config(config: &cpal::StreamConfig, sample_format: SampleFormat)
                     -> Result<AudioFormat, LineError>
{
    let channels: u8 = config.channels.try_into()
                       .map_err(|_| (format!("number of channels: {} exceed the maximum value of 255",
                                             config.channels),
                                     LineErrorKind::InvalidArguments))?;
    let signed = !matches!(sample_format, SampleFormat::U8|SampleFormat::U16|
                                          SampleFormat::U32|SampleFormat::U64);
    Ok(AudioFormat {
        frame_rate: config.sample_rate.0,
        sample_bits: (sample_format.sample_size() * 8) as u8,
        channels,
        signed,
        big_endian: cfg!(target_endian = "big")
    })
}

fn build_output_stream(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        sample_format: SampleFormat,
        consumer: CarouselConsumer<i16>
    ) -> Result<Stream, LineError>
{
    match sample_format {
        SampleFormat::I8 => output_stream_for::<i8>(device, config, consumer),
        SampleFormat::I16 => output_stream_for::<i16>(device, config, consumer),
        SampleFormat::U8 => output_stream_for::<u8>(device, config, consumer),
        SampleFormat::U16 => output_stream_for::<u16>(device, config, consumer),
        SampleFormat::F32 => output_stream_for::<f32>(device, config, consumer),
        sf => Err((format!("unsupported sample format: {:?}", sf),
                   LineErrorKind::InvalidArguments).into())
    }
}

fn output_stream_for<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut consumer: CarouselConsumer<i16>
    ) -> Result<Stream, LineError>
where T: cpal::SizedSample + AudioSample + FromSample<i16>
{
    let mut scratch = Vec::<i16>::new();
    let data_fn = move |out: &mut [T], _: &cpal::OutputCallbackInfo| {
        scratch.resize(out.len(), 0);
        let filled = consumer.read_samples(&mut scratch);
        for (target, &sample) in out.iter_mut().zip(scratch.iter().take(filled)) {
            *target = sample.into_sample();
        }
        for target in out[filled..].iter_mut() {
            *target = T::silence();
        }
        if filled < scratch.len() {
            trace!("output line underrun: {} samples", scratch.len() - filled);
        }
    };
    let err_fn = |err| error!("an error occurred on stream: {}", err);
    device.build_output_stream(config, data_fn, err_fn, None).map_err(From::from)
}

fn build_input_stream(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        sample_format: SampleFormat,
        producer: CarouselProducer<i16>
    ) -> Result<Stream, LineError>
{
    match sample_format {
        SampleFormat::I8 => input_stream_for::<i8>(device, config, producer),
        SampleFormat::I16 => input_stream_for::<i16>(device, config, producer),
        SampleFormat::U8 => input_stream_for::<u8>(device, config, producer),
        SampleFormat::U16 => input_stream_for::<u16>(device, config, producer),
        SampleFormat::F32 => input_stream_for::<f32>(device, config, producer),
        sf => Err((format!("unsupported sample format: {:?}", sf),
                   LineErrorKind::InvalidArguments).into())
    }
}

fn input_stream_for<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut producer: CarouselProducer<i16>
    ) -> Result<Stream, LineError>
where T: cpal::SizedSample + AudioSample, i16: FromSample<T>
{
    let mut scratch = Vec::<i16>::new();
    let data_fn = move |data: &[T], _: &cpal::InputCallbackInfo| {
        scratch.clear();
        scratch.extend(data.iter().map(|&sample| i16::from_sample(sample)));
        let written = producer.write_samples(&scratch);
        if written < scratch.len() {
            trace!("input line overrun: {} samples dropped", scratch.len() - written);
        }
    };
    let err_fn = |err| error!("an error occurred on stream: {}", err);
    device.build_input_stream(config, data_fn, err_fn, None).map_err(From::from)
}

impl From<PlayStreamError> for LineError {
    fn from(e: PlayStreamError) -> Self {
        let kind = match e {
            PlayStreamError::DeviceNotAvailable => LineErrorKind::AudioSubsystem,
            _ => LineErrorKind::AudioStream
        };
        (e.to_string(), kind).into()
    }
}

impl From<PauseStreamError> for LineError {
    fn from(e: PauseStreamError) -> Self {
        let kind = match e {
            PauseStreamError::DeviceNotAvailable => LineErrorKind::AudioSubsystem,
            _ => LineErrorKind::AudioStream
        };
        (e.to_string(), kind).into()
    }
}

impl From<DefaultStreamConfigError> for LineError {
    fn from(e: DefaultStreamConfigError) -> Self {
        let kind = match e {
            DefaultStreamConfigError::StreamTypeNotSupported => LineErrorKind::InvalidArguments,
            _ => LineErrorKind::AudioSubsystem
        };
        (e.to_string(), kind).into()
    }
}

impl From<BuildStreamError> for LineError {
    fn from(e: BuildStreamError) -> Self {
        let kind = match e {
            BuildStreamError::DeviceNotAvailable => LineErrorKind::AudioSubsystem,
            BuildStreamError::StreamConfigNotSupported|
            BuildStreamError::InvalidArgument => LineErrorKind::InvalidArguments,
            _ => LineErrorKind::AudioStream
        };
        (e.to_string(), kind).into()
    }
}
