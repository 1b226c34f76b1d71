// This is free and unencumbered software released into the public domain.

//! Idle/recording state machine, encoder negotiation at start, and the
//! frame-pacing loop behind duration-bounded recordings.

use crate::shared::{
    CameraError, CameraEvent, DEFAULT_FPS, DEFAULT_RESOLUTION, DeviceSession, EncoderFactory,
    EncoderProfile, FALLBACK_PROFILES, Frame, MAX_FPS, MIN_FPS, PRIMARY_CONTAINER, Resolution,
    SettingsUpdate, VIDEO_PREFIX, VideoSink, ensure_dir, negotiate, resolve_output_path,
};
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

/// Time allotted to one frame at `fps`.
pub fn frame_budget(fps: f64) -> Result<Duration, CameraError> {
    Duration::try_from_secs_f64(1.0 / fps)
        .map_err(|_| CameraError::invalid_config(format!("unusable frame rate {fps}")))
}

/// Monotonic time source for pacing.
pub trait Clock: Send + Sync {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
    fn sleep(&self, d: Duration);
}

#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
}

/// Live state of one recording; exists only while recording.
pub struct RecordingSession {
    path: PathBuf,
    profile: EncoderProfile,
    sink: Box<dyn VideoSink>,
    resolution: Resolution,
    fps: f64,
    started: Duration,
    frames_written: u64,
    frames_missed: u64,
}

impl core::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("path", &self.path)
            .field("profile", &self.profile)
            .field("resolution", &self.resolution)
            .field("fps", &self.fps)
            .field("frames_written", &self.frames_written)
            .field("frames_missed", &self.frames_missed)
            .finish()
    }
}

impl RecordingSession {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profile(&self) -> EncoderProfile {
        self.profile
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn frames_missed(&self) -> u64 {
        self.frames_missed
    }
}

/// Records video from a [`DeviceSession`] it owns but never opens or closes.
///
/// Dropping the controller finalizes any recording in progress.
pub struct RecordingController {
    session: DeviceSession,
    encoders: Box<dyn EncoderFactory>,
    profiles: Vec<EncoderProfile>,
    clock: Arc<dyn Clock>,
    recording: Option<RecordingSession>,
}

impl core::fmt::Debug for RecordingController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecordingController")
            .field("session", &self.session)
            .field("profiles", &self.profiles)
            .field("recording", &self.recording)
            .finish()
    }
}

impl RecordingController {
    pub fn new(session: DeviceSession, encoders: Box<dyn EncoderFactory>) -> Self {
        Self {
            session,
            encoders,
            profiles: FALLBACK_PROFILES.to_vec(),
            clock: Arc::new(SystemClock::default()),
            recording: None,
        }
    }

    pub fn with_profiles(mut self, profiles: impl Into<Vec<EncoderProfile>>) -> Self {
        self.profiles = profiles.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut DeviceSession {
        &mut self.session
    }

    pub fn state(&self) -> RecordingState {
        if self.recording.is_some() {
            RecordingState::Recording
        } else {
            RecordingState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn recording(&self) -> Option<&RecordingSession> {
        self.recording.as_ref()
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.recording.as_ref().map(|r| r.path())
    }

    /// Time since the current recording started.
    pub fn elapsed(&self) -> Option<Duration> {
        self.recording
            .as_ref()
            .map(|r| self.clock.now().saturating_sub(r.started))
    }

    /// Starts recording to `name` (or a timestamped name) and returns the
    /// path actually being written, which reflects the negotiated container.
    pub fn start_recording(&mut self, name: Option<&str>) -> Result<PathBuf, CameraError> {
        if !self.session.is_open() {
            return Err(CameraError::NotOpen);
        }
        if self.recording.is_some() {
            return Err(CameraError::AlreadyRecording);
        }

        let requested = resolve_output_path(
            self.session.output_dir(),
            VIDEO_PREFIX,
            name,
            PRIMARY_CONTAINER.extension(),
        );

        let (mut resolution, mut fps) = self.session.current_format()?;
        if !resolution.is_valid() {
            resolution = DEFAULT_RESOLUTION;
        }
        if !(MIN_FPS..=MAX_FPS).contains(&fps) {
            fps = DEFAULT_FPS;
        }

        ensure_dir(self.session.output_dir())?;
        let negotiated = negotiate(
            self.encoders.as_ref(),
            &self.profiles,
            &requested,
            resolution,
            fps,
            self.session.events(),
        )?;

        let advisory = self.session.settings().video_format;
        if advisory != negotiated.profile.container {
            camera_log!(debug, requested = %advisory, actual = %negotiated.profile.container, "configured video format is advisory");
        }

        camera_log!(info, path = %negotiated.path.display(), profile = %negotiated.profile, %resolution, fps, "recording started");
        self.session.events().emit(CameraEvent::RecordingStarted {
            path: negotiated.path.clone(),
        });

        let path = negotiated.path.clone();
        self.recording = Some(RecordingSession {
            path: negotiated.path,
            profile: negotiated.profile,
            sink: negotiated.sink,
            resolution,
            fps,
            started: self.clock.now(),
            frames_written: 0,
            frames_missed: 0,
        });
        Ok(path)
    }

    /// Updates the session's settings. While recording, a change of
    /// resolution or frame rate is refused with `AlreadyRecording` because
    /// the encoder was sized when the recording started.
    pub fn update_settings(&mut self, update: &SettingsUpdate) -> Result<Vec<String>, CameraError> {
        if self.recording.is_some() {
            let current = self.session.settings();
            let resizes = update.resolution.is_some_and(|r| r != current.resolution);
            let retimes = update.fps.is_some_and(|f| f != current.fps);
            if resizes || retimes {
                return Err(CameraError::AlreadyRecording);
            }
        }
        self.session.update_settings(update)
    }

    /// Hands one already-captured frame to the active encoder.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), CameraError> {
        let recording = self.recording.as_mut().ok_or(CameraError::NotRecording)?;
        recording.sink.write_frame(frame)?;
        recording.frames_written += 1;
        Ok(())
    }

    /// Counts a frame the device failed to deliver during recording.
    pub fn mark_frame_missed(&mut self) {
        if let Some(recording) = self.recording.as_mut() {
            recording.frames_missed += 1;
            self.session.events().emit(CameraEvent::FrameMissed);
        }
    }

    /// Finalizes the encoder and returns the recorded file's path. The
    /// controller is idle afterwards even when finalizing fails.
    pub fn stop_recording(&mut self) -> Result<PathBuf, CameraError> {
        let mut recording = self.recording.take().ok_or(CameraError::NotRecording)?;
        let finished = recording.sink.finish();

        let RecordingSession {
            path,
            frames_written,
            frames_missed,
            ..
        } = recording;

        if frames_missed > 0 {
            camera_log!(warn, path = %path.display(), frames_written, frames_missed, "recording is missing frames");
        }
        camera_log!(info, path = %path.display(), frames_written, "recording stopped");
        self.session.events().emit(CameraEvent::RecordingStopped {
            path: path.clone(),
            frames_written,
            frames_missed,
        });

        finished.map(|()| path)
    }

    /// Records for `duration`, pacing reads to the recording's frame rate.
    ///
    /// Setting `cancel` ends the recording early; the file is finalized the
    /// same way in every case. Failed reads are counted and skipped.
    pub fn record_for_duration(
        &mut self,
        duration: Duration,
        name: Option<&str>,
        cancel: &AtomicBool,
    ) -> Result<PathBuf, CameraError> {
        self.start_recording(name)?;
        let outcome = self.run_pacing_loop(duration, cancel);
        let stopped = self.stop_recording();
        outcome.and(stopped)
    }

    fn run_pacing_loop(&mut self, duration: Duration, cancel: &AtomicBool) -> Result<(), CameraError> {
        let Some(recording) = self.recording.as_ref() else {
            return Err(CameraError::NotRecording);
        };
        let started = recording.started;
        let budget = frame_budget(recording.fps)?;

        // One frame is always attempted so that no recording is left empty.
        let mut first = true;
        while first || self.clock.now().saturating_sub(started) < duration {
            if !first && cancel.load(Ordering::SeqCst) {
                camera_log!(info, "recording cancelled");
                break;
            }
            first = false;

            let tick = self.clock.now();
            match self.session.capture_frame() {
                Ok(frame) => self.write_frame(&frame)?,
                Err(err) => {
                    camera_log!(warn, error = %err, "failed to capture frame, skipping");
                    self.mark_frame_missed();
                },
            }

            let spent = self.clock.now().saturating_sub(tick);
            if let Some(rest) = budget.checked_sub(spent).filter(|d| !d.is_zero()) {
                self.clock.sleep(rest);
            }
        }
        Ok(())
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        if self.recording.is_some() {
            let _ = self.stop_recording();
        }
    }
}
