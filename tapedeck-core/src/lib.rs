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
//! The core components of the TAPEDECK library.
//!
//! Everything in this crate is free of I/O and threads: the phase-run signal
//! buffers, the CPU cycle to audio frame clock and the tape recorder state
//! machine can all be exercised without any audio hardware.
pub mod clock;
pub mod format;
pub mod phase;
pub mod recorder;
pub mod sample;

pub use clock::{Cycles, FrameClock};
pub use format::AudioFormat;
pub use phase::{PhaseRunBuffer, PhaseRunReader, PhaseSample};
pub use recorder::{Recorder, RecorderConfig, RecorderHalt, RecorderState};
