// This is free and unencumbered software released into the public domain.

//! In-memory camera, encoder and clock used by the unit tests.

use crate::shared::{
    CameraBackend, CameraDriver, CameraError, CameraProvider, CaptureSettings, Clock,
    EncoderFactory, EncoderProfile, Frame, Resolution, VideoSink,
};
use bytes::Bytes;
use std::{
    any::Any,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

#[derive(Default)]
pub struct FakeState {
    pub open_handles: usize,
    /// Number of upcoming reads that fail.
    pub fail_reads: u32,
    pub frames_read: u64,
    pub max_width: Option<u32>,
    /// Overrides what the device claims to deliver.
    pub reported_format: Option<(Resolution, f64)>,
    /// Simulated time spent inside each read.
    pub read_latency: Duration,
    pub clock: Option<Arc<ManualClock>>,
}

pub struct FakeProvider {
    devices: Vec<u32>,
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    pub fn with_devices(devices: impl IntoIterator<Item = u32>) -> Self {
        Self {
            devices: devices.into_iter().collect(),
            state: Arc::default(),
        }
    }

    pub fn state(&self) -> Arc<Mutex<FakeState>> {
        Arc::clone(&self.state)
    }
}

impl CameraProvider for FakeProvider {
    fn backend(&self) -> CameraBackend {
        CameraBackend::Virtual
    }

    fn open(&self, device: u32) -> Result<Box<dyn CameraDriver>, CameraError> {
        if !self.devices.contains(&device) {
            return Err(CameraError::cannot_open(device, "no such fake device"));
        }
        self.state.lock().unwrap().open_handles += 1;
        Ok(Box::new(FakeDriver {
            applied: None,
            state: Arc::clone(&self.state),
            released: false,
        }))
    }
}

pub struct FakeDriver {
    pub applied: Option<CaptureSettings>,
    state: Arc<Mutex<FakeState>>,
    released: bool,
}

impl CameraDriver for FakeDriver {
    fn backend(&self) -> CameraBackend {
        CameraBackend::Virtual
    }

    fn configure(&mut self, settings: &CaptureSettings) -> Result<(), CameraError> {
        let max = self.state.lock().unwrap().max_width;
        if max.is_some_and(|m| settings.resolution.width > m) {
            return Err(CameraError::driver(
                "configuring fake camera",
                std::io::Error::other("unsupported resolution"),
            ));
        }
        self.applied = Some(settings.clone());
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let mut state = self.state.lock().unwrap();
        if let Some(clock) = &state.clock {
            clock.advance(state.read_latency);
        }
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(CameraError::capture_failed("fake read miss"));
        }
        state.frames_read += 1;

        let r = self
            .applied
            .as_ref()
            .map(|s| s.resolution)
            .unwrap_or(Resolution::new(4, 4));
        let shade = (state.frames_read % 255) as u8;
        let data = vec![shade; (r.width * r.height * 3) as usize];
        Ok(Frame::new_rgb8(Bytes::from(data), r.width, r.height, r.width * 3)
            .with_timestamp_ns(state.frames_read))
    }

    fn current_format(&self) -> (Resolution, f64) {
        if let Some(f) = self.state.lock().unwrap().reported_format {
            return f;
        }
        self.applied
            .as_ref()
            .map(|s| (s.resolution, s.fps))
            .unwrap_or((Resolution::new(0, 0), 0.0))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.state.lock().unwrap().open_handles -= 1;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for FakeDriver {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Default)]
pub struct EncoderLog {
    pub attempts: Vec<EncoderProfile>,
    pub created: Vec<(EncoderProfile, PathBuf, Resolution, f64)>,
    pub frames: u64,
    pub finished: u32,
}

/// Encoder whose sinks append raw frames to the target file. Profiles at the
/// positions in `failing` refuse to initialize (after touching the file).
pub struct FakeEncoders {
    failing: Vec<usize>,
    profiles: Vec<EncoderProfile>,
    log: Arc<Mutex<EncoderLog>>,
}

impl FakeEncoders {
    pub fn new() -> Self {
        Self::failing([])
    }

    pub fn failing(positions: impl IntoIterator<Item = usize>) -> Self {
        Self {
            failing: positions.into_iter().collect(),
            profiles: crate::shared::FALLBACK_PROFILES.to_vec(),
            log: Arc::default(),
        }
    }

    pub fn log(&self) -> Arc<Mutex<EncoderLog>> {
        Arc::clone(&self.log)
    }
}

impl EncoderFactory for FakeEncoders {
    fn create(
        &self,
        profile: &EncoderProfile,
        path: &Path,
        resolution: Resolution,
        fps: f64,
    ) -> Result<Box<dyn VideoSink>, CameraError> {
        self.log.lock().unwrap().attempts.push(*profile);
        let position = self.profiles.iter().position(|p| p == profile);
        let file = File::create(path).map_err(|e| CameraError::write_failed("creating video", e))?;
        if position.is_some_and(|i| self.failing.contains(&i)) {
            return Err(CameraError::other(format!("{profile} unavailable")));
        }
        self.log
            .lock()
            .unwrap()
            .created
            .push((*profile, path.to_path_buf(), resolution, fps));
        Ok(Box::new(FakeSink {
            file: Some(file),
            log: Arc::clone(&self.log),
        }))
    }
}

struct FakeSink {
    file: Option<File>,
    log: Arc<Mutex<EncoderLog>>,
}

impl VideoSink for FakeSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), CameraError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CameraError::other("sink already finished"))?;
        file.write_all(&frame.data[..frame.data.len().min(16)])
            .map_err(|e| CameraError::write_failed("writing video frame", e))?;
        self.log.lock().unwrap().frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), CameraError> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .map_err(|e| CameraError::write_failed("finalizing video", e))?;
            self.log.lock().unwrap().finished += 1;
        }
        Ok(())
    }
}

impl Drop for FakeSink {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// Time only moves when somebody sleeps or a fake read takes time. An
/// optional alarm raises a flag once a given instant is reached.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    pub sleeps: Mutex<Vec<Duration>>,
    alarm: Mutex<Option<(Duration, Arc<AtomicBool>)>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_alarm(&self, at: Duration, flag: Arc<AtomicBool>) {
        *self.alarm.lock().unwrap() = Some((at, flag));
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
        if let Some((at, flag)) = &*self.alarm.lock().unwrap() {
            if *now >= *at {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, d: Duration) {
        self.sleeps.lock().unwrap().push(d);
        self.advance(d);
    }
}

pub fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
