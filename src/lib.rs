// Copyright (C) 2025 Dayton Fishell
// PAL-64 Home Computer Emulator
// This file is part of PAL-64.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! PAL-64 Home Computer Emulator: real-time core
//!
//! This library provides the cycle-driven raster video synthesizer, the
//! wall-clock timing governor, the device lifecycle contract and the binary
//! snapshot encoding shared by every stateful component. The CPU interpreter,
//! memory bus and host windowing layer live behind the [`ExecutionUnit`],
//! [`Throttleable`] and frame-handoff interfaces.

pub mod config;
pub mod device;
pub mod emulator;
pub mod event;
pub mod input;
pub mod raster;
pub mod snapshot;
pub mod throttle;

pub use config::Config;
pub use device::DeviceControl;
// Re-export commonly used types
pub use emulator::{ExecutionUnit, FrameFormat, FrameHandoff, Machine, MachineHandle, PixelFormat};
pub use event::{EventBus, GovernorEvent, VideoEvent};
pub use input::{Joystick, JoystickMask, KeyEvent};
pub use raster::{PixelCommit, PixelCursor, RasterEngine};
pub use snapshot::{Snapshot, SnapshotError, SnapshotReader, SnapshotWriter};
pub use throttle::{Throttleable, TimingGovernor};
