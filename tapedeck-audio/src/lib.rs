/*
    Copyright (C) 2021-2023  Rafal Michalski

    This file is part of TAPEDECK, a Rust library for building emulators.

    TAPEDECK is free software: you can redistribute it and/or modify it under
    the terms of the GNU Lesser General Public License (LGPL) as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    TAPEDECK is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Lesser General Public License for more details.

    You should have received a copy of the GNU Lesser General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.

    Author contact information: see Cargo.toml file, section [package.authors].
*/
//! The real-time components of the TAPEDECK library.
//!
//! This crate houses everything that touches time and threads: the capture
//! and playback stream drivers called from the emulation thread, the
//! inter-thread sample carousel, the best-effort monitor line and the native
//! audio host layer.
//!
//! The emulation thread never blocks in here beyond a few bounded
//! hardware-buffer retries and never sees a panic from an audio failure;
//! every error degrades a single stream and surfaces as an observer event.
pub mod carousel;
pub mod event;
pub mod host;
pub mod input;
pub mod io;
pub mod level;
pub mod monitor;
pub mod output;

pub use event::{event_channel, AudioEvent, EventSender};
pub use input::{AudioIn, PhaseRunSource};
pub use io::{FrameSink, FrameSource, LineError, LineErrorKind, NullSink, Seekable, StreamState};
pub use monitor::Monitor;
pub use output::AudioOut;
