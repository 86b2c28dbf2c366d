/*
    Copyright (C) 2021-2023  Rafal Michalski

    This file is part of TAPEDECK, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! Observer notifications, decoupled from the real-time path.
//!
//! Streams report level-meter updates, playback progress, finish and error
//! notices over a bounded channel. The sending side never blocks: when the
//! observer falls behind, events are dropped and counted, because the
//! emulation thread can not wait for a GUI.
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};

use tapedeck_core::recorder::{RecorderHalt, RecorderState};

use crate::io::LineError;

/// The upper bound of the unified level-meter value in [AudioEvent::Level].
pub const LEVEL_LIMIT: u16 = u16::MAX;

/// A notification from a stream to its observer.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// A throttled level-meter update: the raw min/max sample bounds and the
    /// unified value in `0..=`[LEVEL_LIMIT].
    Level { min: i16, max: i16, value: u16 },
    /// Playback progress of a finite transport, in permille,
    /// reported at roughly 0.5% granularity.
    Progress { permille: u16 },
    /// A human-readable description of the stream's format.
    Format(String),
    /// The stream finished or was stopped cleanly.
    Finished,
    /// The recorder changed state.
    RecorderStatus(RecorderState),
    /// The recorder ended a recording on its own.
    RecorderHalted(RecorderHalt),
    /// The stream stopped on a failure.
    StreamError(LineError),
    /// The monitor line degraded; the primary path is unaffected.
    MonitorWarning(String),
}

/// The sending half of an observer channel.
///
/// Cloneable so that every stream of a session can report to the same
/// observer.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: SyncSender<AudioEvent>,
}

impl EventSender {
    /// Sends an event without ever blocking.
    ///
    /// Returns `false` if the event was dropped because the channel is full
    /// or the observer is gone.
    pub fn send(&self, event: AudioEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                log::trace!("audio event dropped, observer too slow: {:?}", event);
                false
            }
            Err(TrySendError::Disconnected(..)) => false
        }
    }
}

/// Creates an observer channel able to hold `capacity` undelivered events.
pub fn event_channel(capacity: usize) -> (EventSender, Receiver<AudioEvent>) {
    let (tx, rx) = sync_channel(capacity);
    (EventSender { tx }, rx)
}
