/*
    Copyright (C) 2021-2023  Rafal Michalski

    This file is part of TAPEDECK, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The inter-thread sample carousel.
//!
//! A single-producer single-consumer queue of recycled sample chunks, the
//! hand-off between the emulation thread and a native audio thread. Chunks
//! travel to the consumer over one channel and come back for reuse over
//! another, so steady-state streaming allocates nothing.
//!
//! Both ends are strictly non-blocking: the producer reports how much room is
//! left instead of waiting for it and the consumer substitutes silence for
//! frames that have not arrived. A shared atomic counter answers "how many
//! samples are queued right now" on either side without locking.
use core::mem::replace;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

use tapedeck_core::sample::AudioSample;

/// A recycled chunk of interleaved samples.
#[derive(Debug)]
struct Chunk<T>(Vec<T>);

/// The writing end of a carousel.
#[derive(Debug)]
pub struct CarouselProducer<T> {
    staging: Vec<T>,
    chunk_samples: usize,
    capacity: usize,
    tx: SyncSender<Chunk<T>>,
    recycle_rx: Receiver<Chunk<T>>,
    queued: Arc<AtomicUsize>,
}

/// The reading end of a carousel.
#[derive(Debug)]
pub struct CarouselConsumer<T> {
    current: Vec<T>,
    cursor: usize,
    rx: Receiver<Chunk<T>>,
    recycle_tx: SyncSender<Chunk<T>>,
    queued: Arc<AtomicUsize>,
}

/// Creates an interconnected carousel pair able to hold `chunks` chunks of
/// `chunk_samples` interleaved samples each.
///
/// # Panics
/// Panics if `chunks` or `chunk_samples` is zero.
pub fn create_carousel<T: AudioSample>(chunks: usize, chunk_samples: usize)
                                      -> (CarouselProducer<T>, CarouselConsumer<T>)
{
    assert!(chunks != 0 && chunk_samples != 0);
    let (tx, rx) = sync_channel(chunks + 1);
    let (recycle_tx, recycle_rx) = sync_channel(chunks + 1);
    for _ in 0..chunks {
        recycle_tx.send(Chunk(Vec::with_capacity(chunk_samples))).unwrap(); // infallible
    }
    let queued = Arc::new(AtomicUsize::new(0));
    let producer = CarouselProducer {
        staging: Vec::with_capacity(chunk_samples),
        chunk_samples,
        capacity: chunks * chunk_samples,
        tx,
        recycle_rx,
        queued: Arc::clone(&queued)
    };
    let consumer = CarouselConsumer {
        current: Vec::new(),
        cursor: 0,
        rx,
        recycle_tx,
        queued
    };
    (producer, consumer)
}

impl<T: Copy> CarouselProducer<T> {
    /// Returns how many samples can be written right now without dropping.
    pub fn samples_free(&self) -> usize {
        let queued = self.queued.load(Ordering::Relaxed);
        self.capacity.saturating_sub(queued + self.staging.len())
    }
    /// Returns how many samples are in flight towards the consumer.
    pub fn samples_queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed) + self.staging.len()
    }
    /// Writes as many of `samples` as fit, returning the accepted count.
    ///
    /// Never blocks: accepts less, possibly zero, when the consumer has not
    /// returned chunks for reuse yet.
    pub fn write_samples(&mut self, samples: &[T]) -> usize {
        let mut written = 0;
        for &sample in samples.iter() {
            if self.staging.len() == self.chunk_samples && !self.rotate() {
                break
            }
            self.staging.push(sample);
            written += 1;
        }
        if self.staging.len() == self.chunk_samples {
            self.rotate();
        }
        written
    }
    /// Sends a partially filled staging chunk on its way, e.g. when the
    /// stream stops. Returns `false` if no chunk was free to rotate into.
    pub fn flush(&mut self) -> bool {
        if self.staging.is_empty() {
            return true
        }
        self.rotate()
    }

    fn rotate(&mut self) -> bool {
        match self.recycle_rx.try_recv() {
            Ok(Chunk(mut empty)) => {
                empty.clear();
                let full = replace(&mut self.staging, empty);
                self.queued.fetch_add(full.len(), Ordering::Relaxed);
                if self.tx.try_send(Chunk(full)).is_err() {
                    // consumer gone; pretend the carousel is eternally full
                    self.queued.store(self.capacity, Ordering::Relaxed);
                    return false
                }
                true
            }
            Err(..) => false
        }
    }
}

impl<T: Copy> CarouselConsumer<T> {
    /// Returns how many samples can be read right now.
    pub fn samples_queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed) + (self.current.len() - self.cursor)
    }
    /// Reads up to `out.len()` samples, returning the count actually copied.
    /// Never blocks.
    pub fn read_samples(&mut self, out: &mut [T]) -> usize {
        let mut filled = 0;
        while filled < out.len() {
            if self.cursor >= self.current.len() {
                if !self.next_chunk() {
                    break
                }
            }
            let n = (self.current.len() - self.cursor).min(out.len() - filled);
            out[filled..filled + n].copy_from_slice(&self.current[self.cursor..self.cursor + n]);
            self.cursor += n;
            filled += n;
        }
        filled
    }

    fn next_chunk(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(Chunk(chunk)) => {
                self.queued.fetch_sub(chunk.len(), Ordering::Relaxed);
                let spent = replace(&mut self.current, chunk);
                self.cursor = 0;
                let _ = self.recycle_tx.try_send(Chunk(spent));
                true
            }
            Err(..) => false
        }
    }
}

impl<T: AudioSample> CarouselConsumer<T> {
    /// Fills `out` with queued samples and pads the rest with silence.
    ///
    /// Made for audio-device callbacks; returns the number of real samples
    /// copied, the remainder was padded.
    pub fn fill_or_silence(&mut self, out: &mut [T]) -> usize {
        let filled = self.read_samples(out);
        for sample in out[filled..].iter_mut() {
            *sample = T::silence();
        }
        filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn samples_travel_in_order() {
        let (mut producer, mut consumer) = create_carousel::<i16>(4, 8);
        assert_eq!(32, producer.samples_free());
        let data: Vec<i16> = (0..20).collect();
        assert_eq!(20, producer.write_samples(&data));
        assert_eq!(20, producer.samples_queued());
        assert!(producer.flush());
        let mut out = [0i16; 32];
        assert_eq!(20, consumer.read_samples(&mut out));
        assert_eq!(&data[..], &out[..20]);
        assert_eq!(0, consumer.samples_queued());
    }

    #[test]
    fn producer_never_blocks_when_full() {
        let (mut producer, mut consumer) = create_carousel::<i16>(2, 4);
        let data = [1i16; 64];
        // 2 chunks in flight plus a full staging chunk
        let written = producer.write_samples(&data);
        assert_eq!(12, written);
        assert_eq!(0, producer.samples_free());
        assert_eq!(0, producer.write_samples(&data));
        // draining the consumer frees chunks for reuse
        let mut out = [0i16; 8];
        assert_eq!(8, consumer.read_samples(&mut out));
        assert!(producer.write_samples(&data) > 0);
    }

    #[test]
    fn consumer_pads_missing_frames_with_silence() {
        let (mut producer, mut consumer) = create_carousel::<i16>(2, 4);
        producer.write_samples(&[7i16; 4]);
        let mut out = [-1i16; 8];
        assert_eq!(4, consumer.fill_or_silence(&mut out));
        assert_eq!(&[7, 7, 7, 7, 0, 0, 0, 0], &out[..]);
    }

    #[test]
    fn carousel_streams_across_threads() {
        const TOTAL: usize = 20000;
        let (mut producer, mut consumer) = create_carousel::<i16>(4, 256);
        let reader = thread::spawn(move || {
            let mut target = Vec::with_capacity(TOTAL);
            let mut out = [0i16; 256];
            while target.len() < TOTAL {
                let n = consumer.read_samples(&mut out);
                if n == 0 {
                    thread::sleep(Duration::from_micros(100));
                    continue
                }
                target.extend_from_slice(&out[..n]);
            }
            target
        });
        let mut sent = 0usize;
        while sent < TOTAL {
            let chunk: Vec<i16> = (sent..sent + 128).map(|n| n as i16).collect();
            let mut offset = 0;
            while offset < chunk.len() {
                let n = producer.write_samples(&chunk[offset..]);
                if n == 0 {
                    thread::sleep(Duration::from_micros(100));
                }
                offset += n;
            }
            sent += chunk.len();
        }
        producer.flush();
        let target = reader.join().unwrap();
        let template: Vec<i16> = (0..TOTAL).map(|n| n as i16).collect();
        assert_eq!(template, target);
    }
}
