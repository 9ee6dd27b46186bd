//! Machine integration: wires the raster engine, timing governor and device
//! lifecycle around an external execution unit, and owns the frame handoff
//! between the emulation thread and the presentation side.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::device::DeviceControl;
use crate::raster::RasterEngine;
use crate::snapshot::{Snapshot, SnapshotError, SnapshotReader, SnapshotWriter};
use crate::throttle::{Throttleable, TimingGovernor};

pub const SNAPSHOT_MAGIC: [u8; 4] = *b"P64S";
pub const SNAPSHOT_VERSION: u32 = 1;

/// Pixel encodings the frame accessor can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Argb8888,
}

/// Geometry and encoding of the published frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub width: usize,
    pub height: usize,
    /// Row pitch in pixels.
    pub stride: usize,
    pub format: PixelFormat,
}

/// Single-writer/single-reader handoff of completed frames.
///
/// The emulation thread publishes a copy of the scaled buffer once per frame;
/// the presentation thread pulls the latest completed frame whenever it likes
/// and never observes a buffer mid-update. The pixels and their frame number
/// live under one lock so a copy is always labeled with the frame it holds.
pub struct FrameHandoff {
    slot: Mutex<FrameSlot>,
    format: FrameFormat,
}

struct FrameSlot {
    pixels: Vec<u32>,
    frame: u64,
}

impl FrameHandoff {
    fn new(format: FrameFormat) -> Self {
        Self {
            slot: Mutex::new(FrameSlot {
                pixels: vec![0; format.stride * format.height],
                frame: 0,
            }),
            format,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrameSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Number of the most recently published frame, 0 before the first.
    pub fn frame(&self) -> u64 {
        self.lock().frame
    }

    fn publish(&self, pixels: &[u32], frame: u64) {
        let mut slot = self.lock();
        slot.pixels.copy_from_slice(pixels);
        slot.frame = frame;
    }

    /// Copy the latest completed frame into `out`, returning its number.
    pub fn latest(&self, out: &mut Vec<u32>) -> u64 {
        let slot = self.lock();
        out.clear();
        out.extend_from_slice(&slot.pixels);
        slot.frame
    }
}

/// The external CPU/chipset loop driving the machine.
///
/// One `step` executes the smallest schedulable slice of work (typically one
/// instruction), emitting pixels into the raster engine as chip cycles land
/// in the visible region, and returns the cycles consumed.
pub trait ExecutionUnit: Throttleable {
    fn step(&mut self, video: &mut RasterEngine) -> u64;

    /// Cumulative cycles executed since reset.
    fn cycles(&self) -> u64;
}

pub struct Machine<U: ExecutionUnit> {
    unit: U,
    video: RasterEngine,
    governor: TimingGovernor,
    control: Arc<DeviceControl>,
    handoff: Arc<FrameHandoff>,
    cycles_per_frame: u64,
}

impl<U: ExecutionUnit> Machine<U> {
    /// `cycles_per_frame` is the chip's cycle count per raster frame, the
    /// granularity of the frame handoff and of governor corrections.
    pub fn new(
        unit: U,
        video: RasterEngine,
        governor: TimingGovernor,
        cycles_per_frame: u64,
    ) -> Self {
        let format = FrameFormat {
            width: video.scaled_width(),
            height: video.scaled_height(),
            stride: video.scaled_width(),
            format: PixelFormat::Argb8888,
        };
        Self {
            unit,
            video,
            governor,
            control: Arc::new(DeviceControl::new()),
            handoff: Arc::new(FrameHandoff::new(format)),
            cycles_per_frame: cycles_per_frame.max(1),
        }
    }

    pub fn control(&self) -> Arc<DeviceControl> {
        Arc::clone(&self.control)
    }

    pub fn handoff(&self) -> Arc<FrameHandoff> {
        Arc::clone(&self.handoff)
    }

    pub fn unit(&self) -> &U {
        &self.unit
    }

    pub fn video(&self) -> &RasterEngine {
        &self.video
    }

    pub fn video_mut(&mut self) -> &mut RasterEngine {
        &mut self.video
    }

    pub fn governor(&self) -> &TimingGovernor {
        &self.governor
    }

    pub fn governor_mut(&mut self) -> &mut TimingGovernor {
        &mut self.governor
    }

    /// Execute one frame's worth of unit cycles and publish the result.
    pub fn run_frame(&mut self) {
        let target = self.unit.cycles() + self.cycles_per_frame;
        while self.unit.cycles() < target {
            if self.unit.step(&mut self.video) == 0 {
                break;
            }
        }
        self.handoff.publish(self.video.scaled(), self.video.frame());
    }

    /// The emulation loop. Returns when the device is stopped.
    ///
    /// Pausing idles here without consuming cycles; the governor is
    /// re-baselined afterwards so the idle period is not read as lost
    /// performance or artificial throttling.
    pub fn run(&mut self) {
        loop {
            if !self.control.is_running() {
                break;
            }
            if self.control.wait_while_paused() {
                self.unit.reset_throttle_time();
                let cycles = self.unit.cycles();
                self.governor.reset_measurement(cycles);
            }
            if !self.control.is_running() {
                break;
            }
            self.run_frame();
            let cycles = self.unit.cycles();
            self.governor.measure(cycles, &mut self.unit);
        }
    }

    /// Move the machine onto a dedicated emulation thread.
    pub fn spawn(self) -> MachineHandle<U>
    where
        U: Send + 'static,
    {
        self.control.start();
        let control = Arc::clone(&self.control);
        let handoff = Arc::clone(&self.handoff);
        let mut machine = self;
        let join = thread::spawn(move || {
            machine.run();
            machine
        });
        MachineHandle {
            control,
            handoff,
            join,
        }
    }

    /// Serialize the machine: magic, version, then each component depth-first.
    pub fn save_snapshot(&self) -> Vec<u8> {
        let mut w = SnapshotWriter::new();
        w.write_bytes(&SNAPSHOT_MAGIC);
        w.write_u32(SNAPSHOT_VERSION);
        self.video.save(&mut w);
        self.governor.save(&mut w);
        w.into_bytes()
    }

    /// Restore a machine snapshot. Any failure rejects the whole stream.
    pub fn load_snapshot(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        let mut r = SnapshotReader::new(data);
        let magic = r.read_bytes(4)?;
        if magic != SNAPSHOT_MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(magic);
            return Err(SnapshotError::BadMagic { found });
        }
        let version = r.read_u32()?;
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: version,
                expected: SNAPSHOT_VERSION,
            });
        }
        self.video.restore(&mut r)?;
        self.governor.restore(&mut r)?;
        Ok(())
    }
}

/// Control surface for a machine running on its own thread.
pub struct MachineHandle<U: ExecutionUnit> {
    control: Arc<DeviceControl>,
    handoff: Arc<FrameHandoff>,
    join: JoinHandle<Machine<U>>,
}

impl<U: ExecutionUnit> MachineHandle<U> {
    pub fn control(&self) -> &DeviceControl {
        &self.control
    }

    pub fn handoff(&self) -> &FrameHandoff {
        &self.handoff
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    /// Stop the machine and hand its ownership back once the emulation
    /// thread has exited its loop.
    pub fn stop_and_join(self) -> thread::Result<Machine<U>> {
        self.control.stop();
        self.join.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    const LIME: u32 = 0xFF32_CD32;

    /// Paints a solid color, one pixel per cycle.
    struct PatternUnit {
        color: u32,
        cycles: Arc<AtomicU64>,
        throttled: u64,
    }

    impl PatternUnit {
        fn new(color: u32) -> Self {
            Self {
                color,
                cycles: Arc::new(AtomicU64::new(0)),
                throttled: 0,
            }
        }
    }

    impl Throttleable for PatternUnit {
        fn throttle(&mut self, ms: u64) {
            self.throttled += ms;
        }

        fn throttled_time(&self) -> u64 {
            self.throttled
        }

        fn reset_throttle_time(&mut self) {
            self.throttled = 0;
        }
    }

    impl ExecutionUnit for PatternUnit {
        fn step(&mut self, video: &mut RasterEngine) -> u64 {
            video.emit_pixel(self.color);
            self.cycles.fetch_add(1, Ordering::Relaxed);
            1
        }

        fn cycles(&self) -> u64 {
            self.cycles.load(Ordering::Relaxed)
        }
    }

    fn test_machine(color: u32) -> Machine<PatternUnit> {
        let video = RasterEngine::new(8, 8, 1.0);
        let mut governor = TimingGovernor::new(1_000_000);
        governor.set_throttling_enabled(false);
        Machine::new(PatternUnit::new(color), video, governor, 64)
    }

    #[test]
    fn run_frame_publishes_completed_frame() {
        let mut machine = test_machine(LIME);
        machine.run_frame();

        assert_eq!(machine.video().frame(), 1);
        assert_eq!(machine.handoff.frame(), 1);

        let mut out = Vec::new();
        let frame = machine.handoff.latest(&mut out);
        assert_eq!(frame, 1);
        assert_eq!(out.len(), 64);
        assert!(out.iter().all(|&p| p == LIME));
    }

    /// Paints every pixel of a frame with that frame's number.
    struct StampUnit {
        cycles: u64,
        throttled: u64,
    }

    impl Throttleable for StampUnit {
        fn throttle(&mut self, ms: u64) {
            self.throttled += ms;
        }

        fn throttled_time(&self) -> u64 {
            self.throttled
        }

        fn reset_throttle_time(&mut self) {
            self.throttled = 0;
        }
    }

    impl ExecutionUnit for StampUnit {
        fn step(&mut self, video: &mut RasterEngine) -> u64 {
            let frame = self.cycles / 64 + 1;
            video.emit_pixel(0xFF00_0000 | frame as u32);
            self.cycles += 1;
            1
        }

        fn cycles(&self) -> u64 {
            self.cycles
        }
    }

    fn stamp_machine() -> Machine<StampUnit> {
        let video = RasterEngine::new(8, 8, 1.0);
        let mut governor = TimingGovernor::new(1_000_000);
        governor.set_throttling_enabled(false);
        Machine::new(
            StampUnit {
                cycles: 0,
                throttled: 0,
            },
            video,
            governor,
            64,
        )
    }

    #[test]
    fn latest_frame_number_matches_published_pixels() {
        let mut machine = stamp_machine();
        let mut out = Vec::new();

        for expected in 1u64..=20 {
            machine.run_frame();
            let frame = machine.handoff.latest(&mut out);
            assert_eq!(frame, expected);
            assert!(out.iter().all(|&p| u64::from(p & 0x00FF_FFFF) == frame));
        }
    }

    #[test]
    fn concurrent_reader_never_sees_mislabeled_frame() {
        let handle = stamp_machine().spawn();
        let handoff = Arc::clone(&handle.handoff);

        let reader = thread::spawn(move || {
            let mut out = Vec::new();
            for _ in 0..200 {
                let frame = handoff.latest(&mut out);
                if frame == 0 {
                    continue;
                }
                assert!(
                    out.iter().all(|&p| u64::from(p & 0x00FF_FFFF) == frame),
                    "frame {frame} labeled with someone else's pixels"
                );
            }
        });

        reader.join().unwrap();
        handle.stop_and_join().unwrap();
    }

    #[test]
    fn handoff_format_matches_scaled_geometry() {
        let video = RasterEngine::new(400, 280, 0.5);
        let mut governor = TimingGovernor::new(1_000_000);
        governor.set_throttling_enabled(false);
        let machine = Machine::new(PatternUnit::new(LIME), video, governor, 400 * 280);

        let format = machine.handoff().format();
        assert_eq!(format.width, 200);
        assert_eq!(format.height, 140);
        assert_eq!(format.stride, 200);
        assert_eq!(format.format, PixelFormat::Argb8888);
    }

    #[test]
    fn spawned_machine_runs_until_stopped() {
        let machine = test_machine(LIME);
        let handle = machine.spawn();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.handoff().frame() < 3 {
            assert!(std::time::Instant::now() < deadline, "no frames produced");
            thread::sleep(Duration::from_millis(1));
        }

        let machine = handle.stop_and_join().unwrap();
        assert!(!machine.control.is_running());
        assert!(machine.control.is_paused());
        assert!(machine.video().frame() >= 3);
    }

    #[test]
    fn paused_machine_consumes_no_cycles() {
        let machine = test_machine(LIME);
        let cycle_probe = Arc::clone(&machine.unit().cycles);
        let handle = machine.spawn();

        while handle.handoff().frame() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        handle.pause();
        // Let the loop reach its suspension point.
        thread::sleep(Duration::from_millis(30));
        let settled = cycle_probe.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(cycle_probe.load(Ordering::Relaxed), settled);

        handle.resume();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while cycle_probe.load(Ordering::Relaxed) == settled {
            assert!(std::time::Instant::now() < deadline, "did not resume");
            thread::sleep(Duration::from_millis(1));
        }
        handle.stop_and_join().unwrap();
    }

    #[test]
    fn snapshot_round_trip() {
        let mut machine = test_machine(LIME);
        machine.run_frame();
        machine.video_mut().set_border_color(0xFF11_2233);
        machine.governor_mut().set_target_speed(500_000);
        let cursor = machine.video().cursor();

        let bytes = machine.save_snapshot();

        let mut restored = test_machine(0);
        restored.load_snapshot(&bytes).unwrap();
        assert_eq!(restored.video().cursor(), cursor);
        assert_eq!(restored.video().border_color(), 0xFF11_2233);
        assert_eq!(restored.governor().target_speed(), 500_000);
    }

    #[test]
    fn snapshot_bad_magic_rejected() {
        let mut machine = test_machine(LIME);
        let mut bytes = machine.save_snapshot();
        bytes[0] = b'X';
        let err = machine.load_snapshot(&bytes).unwrap_err();
        assert!(matches!(err, SnapshotError::BadMagic { .. }));
    }

    #[test]
    fn snapshot_unsupported_version_rejected() {
        let mut machine = test_machine(LIME);
        let mut bytes = machine.save_snapshot();
        bytes[4] = 0xFF;
        let err = machine.load_snapshot(&bytes).unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedVersion { .. }));
    }

    #[test]
    fn snapshot_truncated_stream_rejected() {
        let mut machine = test_machine(LIME);
        let bytes = machine.save_snapshot();
        let err = machine.load_snapshot(&bytes[..10]).unwrap_err();
        assert!(matches!(err, SnapshotError::Truncated { .. }));
    }
}
