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
//! TAPEDECK is a library of components for emulating the cassette tape
//! interface and sound generator output of the 8-bit home computer era.
//!
//! It bridges two clock domains that do not want to meet: the emulated CPU's
//! cycle-counted instruction stream, toggling a logical tape line at
//! arbitrary instants, and a host audio subsystem exchanging fixed-rate PCM
//! frames in real time. The same machinery substitutes a decoded tape image
//! for the live device and captures generated output into a compact
//! run-length recording.
//!
//! Start with a [session::TapeDeck], or compose the parts yourself:
//!
//! * [phase] - run-length square-wave storage and readers,
//! * [clock] - the CPU cycle to audio frame mapping,
//! * [recorder] - the run-length recorder state machine,
//! * [input] / [output] - the stream drivers called from the emulation thread,
//! * [monitor] - the best-effort listening line,
//! * [host] - native audio back-ends (behind the `cpal` feature).
pub use tapedeck_core::{clock, format, phase, recorder, sample};
pub use tapedeck_audio::{carousel, event, host, input, io, level, monitor, output};

pub mod session;

pub use session::TapeDeck;
