// Copyright (C) 2025 Dayton Fishell
// PAL-64 Home Computer Emulator
// This file is part of PAL-64.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

// A simple demo driver for the PAL-64 core: runs a test-pattern execution
// unit on the emulation thread for a moment and reports what it produced.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use pal64_core::{
    Config, ExecutionUnit, Machine, RasterEngine, Throttleable, TimingGovernor, VideoEvent,
};

/// Raster geometry of the PAL display including borders.
const RASTER_WIDTH: usize = 400;
const RASTER_HEIGHT: usize = 280;

/// Stand-in for the CPU/chipset loop: paints a diagonal color gradient,
/// one pixel per cycle.
struct TestPattern {
    cycles: u64,
    throttled: u64,
}

impl Throttleable for TestPattern {
    fn throttle(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
        self.throttled += ms;
    }

    fn throttled_time(&self) -> u64 {
        self.throttled
    }

    fn reset_throttle_time(&mut self) {
        self.throttled = 0;
    }
}

impl ExecutionUnit for TestPattern {
    fn step(&mut self, video: &mut RasterEngine) -> u64 {
        let pos = self.cycles % (RASTER_WIDTH * RASTER_HEIGHT) as u64;
        let x = pos as usize % RASTER_WIDTH;
        let y = pos as usize / RASTER_WIDTH;
        let color =
            0xFF00_0000 | ((x * 255 / RASTER_WIDTH) as u32) << 16 | ((y * 255 / RASTER_HEIGHT) as u32) << 8;
        video.emit_pixel(color);
        self.cycles += 1;
        1
    }

    fn cycles(&self) -> u64 {
        self.cycles
    }
}

fn main() -> Result<()> {
    env_logger::init();

    println!("PAL-64 Emulator v0.1.0");
    println!("======================");
    println!();

    let config = Config::from_env();
    println!("Target speed: {} Hz, scale: {}", config.target_speed_hz, config.scale);

    let mut video = RasterEngine::new(RASTER_WIDTH, RASTER_HEIGHT, config.scale);
    video.subscribe(|event| {
        if let VideoEvent::FrameReady { frame } = event {
            log::debug!("frame {frame} ready");
        }
    });

    let governor = TimingGovernor::new(config.target_speed_hz);
    let unit = TestPattern {
        cycles: 0,
        throttled: 0,
    };
    let machine = Machine::new(
        unit,
        video,
        governor,
        (RASTER_WIDTH * RASTER_HEIGHT) as u64,
    );
    let handoff = machine.handoff();

    println!("Starting emulation thread...");
    let handle = machine.spawn();
    thread::sleep(Duration::from_millis(500));
    handle.pause();
    println!("Paused at frame {}", handoff.frame());
    thread::sleep(Duration::from_millis(100));
    handle.resume();
    thread::sleep(Duration::from_millis(200));

    let machine = handle
        .stop_and_join()
        .map_err(|_| anyhow::anyhow!("emulation thread panicked"))?;

    let format = handoff.format();
    println!();
    println!("Stopped after {} frames", machine.video().frame());
    println!(
        "Output: {}x{} ({:?}), {} cycles executed",
        format.width,
        format.height,
        format.format,
        machine.unit().cycles()
    );
    Ok(())
}
