// This is free and unencumbered software released into the public domain.

//! A dedicated thread that owns a [`RecordingController`] (and through it
//! the device) for its whole lifetime.
//!
//! Other threads never touch the device: they send [`Command`]s through a
//! [`WorkerHandle`] and wait for the reply. While streaming, the worker
//! captures each frame once and gives that same frame to the active
//! recording and then to the preview sink.

use crate::shared::{
    CameraError, CaptureSettings, DEFAULT_FPS, FrameSink, RecordingController, SettingsUpdate,
    frame_budget,
};
use std::{
    path::PathBuf,
    sync::mpsc::{Receiver, RecvTimeoutError, Sender, SyncSender, channel, sync_channel},
    thread::JoinHandle,
    time::{Duration, Instant},
};

const COMMAND_CAPACITY: usize = 32;

type Reply<T> = Sender<Result<T, CameraError>>;

pub enum Command {
    CapturePhoto {
        name: Option<String>,
        reply: Reply<PathBuf>,
    },
    StartRecording {
        name: Option<String>,
        reply: Reply<PathBuf>,
    },
    StopRecording {
        reply: Reply<PathBuf>,
    },
    /// Replies once the recording has been finalized, whether it ran its
    /// course or was cut short by `StopRecording`.
    RecordFor {
        duration: Duration,
        name: Option<String>,
        reply: Reply<PathBuf>,
    },
    UpdateSettings {
        update: SettingsUpdate,
        reply: Reply<Vec<String>>,
    },
    Settings {
        reply: Sender<CaptureSettings>,
    },
    IsRecording {
        reply: Sender<bool>,
    },
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct WorkerHandle {
    tx: SyncSender<Command>,
}

impl WorkerHandle {
    fn request<T>(
        &self,
        make: impl FnOnce(Sender<T>) -> Command,
    ) -> Result<T, CameraError> {
        let (reply, rx) = channel();
        self.tx
            .send(make(reply))
            .map_err(|_| CameraError::other("camera worker has stopped"))?;
        rx.recv()
            .map_err(|_| CameraError::other("camera worker has stopped"))
    }

    pub fn capture_photo(&self, name: Option<&str>) -> Result<PathBuf, CameraError> {
        let name = name.map(str::to_string);
        self.request(|reply| Command::CapturePhoto { name, reply })?
    }

    pub fn start_recording(&self, name: Option<&str>) -> Result<PathBuf, CameraError> {
        let name = name.map(str::to_string);
        self.request(|reply| Command::StartRecording { name, reply })?
    }

    pub fn stop_recording(&self) -> Result<PathBuf, CameraError> {
        self.request(|reply| Command::StopRecording { reply })?
    }

    /// Blocks until the timed recording is finalized.
    pub fn record_for(&self, duration: Duration, name: Option<&str>) -> Result<PathBuf, CameraError> {
        let name = name.map(str::to_string);
        self.request(|reply| Command::RecordFor {
            duration,
            name,
            reply,
        })?
    }

    pub fn update_settings(&self, update: SettingsUpdate) -> Result<Vec<String>, CameraError> {
        self.request(|reply| Command::UpdateSettings { update, reply })?
    }

    pub fn settings(&self) -> Result<CaptureSettings, CameraError> {
        self.request(|reply| Command::Settings { reply })
    }

    pub fn is_recording(&self) -> Result<bool, CameraError> {
        self.request(|reply| Command::IsRecording { reply })
    }
}

pub struct CameraWorker {
    handle: WorkerHandle,
    join: Option<JoinHandle<()>>,
}

impl CameraWorker {
    /// Moves `controller` onto a new thread. With a `preview` sink the
    /// worker streams frames continuously; without one it only reads the
    /// device while recording.
    pub fn spawn(controller: RecordingController, preview: Option<FrameSink>) -> Self {
        let (tx, rx) = sync_channel::<Command>(COMMAND_CAPACITY);
        let join = std::thread::spawn(move || {
            Worker {
                controller,
                preview,
                timed: None,
            }
            .run(rx)
        });
        Self {
            handle: WorkerHandle { tx },
            join: Some(join),
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Stops any recording, closes the device and joins the thread.
    pub fn shutdown(&mut self) {
        let _ = self.handle.tx.send(Command::Shutdown);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl Drop for CameraWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct TimedRecording {
    duration: Duration,
    reply: Reply<PathBuf>,
}

struct Worker {
    controller: RecordingController,
    preview: Option<FrameSink>,
    timed: Option<TimedRecording>,
}

impl Worker {
    fn streaming(&self) -> bool {
        self.preview.is_some() || self.controller.is_recording()
    }

    fn run(mut self, rx: Receiver<Command>) {
        'run: loop {
            if !self.streaming() {
                match rx.recv() {
                    Ok(cmd) => {
                        if self.handle(cmd) {
                            continue;
                        }
                        break;
                    },
                    Err(_) => break,
                }
            }

            let tick = Instant::now();
            self.tick();

            let budget = self.pacing_budget();
            loop {
                match rx.recv_timeout(budget.saturating_sub(tick.elapsed())) {
                    Ok(cmd) => {
                        if !self.handle(cmd) {
                            break 'run;
                        }
                    },
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => break 'run,
                }
            }
        }

        self.finish_recording();
        self.controller.session_mut().close();
        camera_log!(debug, "camera worker stopped");
    }

    /// Paces to the recording's negotiated rate, or the session's otherwise.
    fn pacing_budget(&self) -> Duration {
        let fps = match self.controller.recording() {
            Some(recording) => recording.fps(),
            None => self.controller.session().settings().fps,
        };
        frame_budget(fps).unwrap_or_else(|_| Duration::from_secs_f64(1.0 / DEFAULT_FPS))
    }

    /// Reads one frame and fans it out. A failed read is logged and counted;
    /// a failed encoder write ends the recording.
    fn tick(&mut self) {
        match self.controller.session_mut().capture_frame() {
            Ok(frame) => {
                if self.controller.is_recording() {
                    if let Err(err) = self.controller.write_frame(&frame) {
                        camera_log!(warn, error = %err, "encoder write failed, stopping recording");
                        let _ = self.controller.stop_recording();
                        if let Some(timed) = self.timed.take() {
                            let _ = timed.reply.send(Err(err));
                        }
                    }
                }
                if let Some(preview) = &self.preview {
                    preview(frame);
                }
            },
            Err(err) => {
                camera_log!(warn, error = %err, "failed to capture frame");
                self.controller.mark_frame_missed();
            },
        }

        let due = match (&self.timed, self.controller.elapsed()) {
            (Some(timed), Some(elapsed)) => elapsed >= timed.duration,
            _ => false,
        };
        if due {
            self.finish_recording();
        }
    }

    fn finish_recording(&mut self) {
        if !self.controller.is_recording() {
            return;
        }
        let result = self.controller.stop_recording();
        match self.timed.take() {
            Some(timed) => {
                let _ = timed.reply.send(result);
            },
            None => drop(result),
        }
    }

    /// Returns `false` when the worker should exit.
    fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::CapturePhoto { name, reply } => {
                let _ = reply.send(self.controller.session_mut().capture_photo(name.as_deref()));
            },
            Command::StartRecording { name, reply } => {
                let _ = reply.send(self.controller.start_recording(name.as_deref()));
            },
            Command::StopRecording { reply } => {
                let result = self.controller.stop_recording();
                if let Some(timed) = self.timed.take() {
                    let copy = match &result {
                        Ok(path) => Ok(path.clone()),
                        Err(err) => Err(CameraError::other(err.to_string())),
                    };
                    let _ = timed.reply.send(copy);
                }
                let _ = reply.send(result);
            },
            Command::RecordFor {
                duration,
                name,
                reply,
            } => match self.controller.start_recording(name.as_deref()) {
                // The next tick writes at least one frame before the deadline check.
                Ok(_) => self.timed = Some(TimedRecording { duration, reply }),
                Err(err) => {
                    let _ = reply.send(Err(err));
                },
            },
            Command::UpdateSettings { update, reply } => {
                let _ = reply.send(self.controller.update_settings(&update));
            },
            Command::Settings { reply } => {
                let _ = reply.send(self.controller.session().settings().clone());
            },
            Command::IsRecording { reply } => {
                let _ = reply.send(self.controller.is_recording());
            },
            Command::Shutdown => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{
        CameraConfig, DeviceSession, Frame, PhotoFormat, Resolution,
        fake::{FakeEncoders, FakeProvider, file_len},
    };
    use std::sync::{Arc, Mutex};

    fn controller(dir: &std::path::Path, encoders: FakeEncoders) -> RecordingController {
        let mut session = DeviceSession::new(
            Box::new(FakeProvider::with_devices([0])),
            CameraConfig::default().with_output_dir(dir),
        );
        session
            .update_settings(&SettingsUpdate::new().with_resolution(4, 4).with_fps(200.0))
            .unwrap();
        session.open(0).unwrap();
        RecordingController::new(session, Box::new(encoders))
    }

    #[test]
    fn commands_round_trip_through_the_worker() {
        let tmp = tempfile::tempdir().unwrap();
        let mut worker = CameraWorker::spawn(controller(tmp.path(), FakeEncoders::new()), None);
        let h = worker.handle();

        let warnings = h
            .update_settings(SettingsUpdate::new().with_photo_format(PhotoFormat::Bmp))
            .unwrap();
        assert!(warnings.is_empty());
        assert_eq!(h.settings().unwrap().photo_format, PhotoFormat::Bmp);

        let photo = h.capture_photo(Some("still")).unwrap();
        assert!(photo.ends_with("still.bmp"));
        assert!(photo.exists());

        assert!(matches!(h.stop_recording(), Err(CameraError::NotRecording)));
        worker.shutdown();
        assert!(h.settings().is_err());
    }

    #[test]
    fn recording_and_preview_share_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let encoders = FakeEncoders::new();
        let log = encoders.log();
        let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
        let seen_cb = Arc::clone(&seen);
        let preview: FrameSink = Arc::new(move |frame: Frame| {
            seen_cb.lock().unwrap().push(frame.timestamp_ns);
        });

        let worker = CameraWorker::spawn(controller(tmp.path(), encoders), Some(preview));
        let h = worker.handle();

        h.start_recording(Some("live")).unwrap();
        assert!(h.is_recording().unwrap());
        std::thread::sleep(Duration::from_millis(100));
        let path = h.stop_recording().unwrap();
        assert!(path.ends_with("live.mp4"));
        assert!(!h.is_recording().unwrap());
        drop(worker);

        let written = log.lock().unwrap().frames;
        let previewed = seen.lock().unwrap().len() as u64;
        assert!(written > 0);
        // every recorded frame was also previewed; none were read twice
        assert!(previewed >= written);
        let stamps = seen.lock().unwrap().clone();
        let mut unique = stamps.clone();
        unique.dedup();
        assert_eq!(unique, stamps);
    }

    #[test]
    fn timed_recording_finishes_on_its_own() {
        let tmp = tempfile::tempdir().unwrap();
        let encoders = FakeEncoders::new();
        let log = encoders.log();
        let worker = CameraWorker::spawn(controller(tmp.path(), encoders), None);

        let path = worker
            .handle()
            .record_for(Duration::from_millis(100), Some("timed"))
            .unwrap();
        assert!(path.exists());
        assert!(log.lock().unwrap().frames > 0);
        assert_eq!(log.lock().unwrap().finished, 1);
        assert!(!worker.handle().is_recording().unwrap());
    }

    #[test]
    fn timed_recording_can_be_stopped_early() {
        let tmp = tempfile::tempdir().unwrap();
        let worker = CameraWorker::spawn(controller(tmp.path(), FakeEncoders::new()), None);
        let h = worker.handle();

        let timed = {
            let h = h.clone();
            std::thread::spawn(move || h.record_for(Duration::from_secs(60), Some("long")))
        };
        while !h.is_recording().unwrap() {
            std::thread::sleep(Duration::from_millis(5));
        }
        let stopped = h.stop_recording().unwrap();
        let finished = timed.join().unwrap().unwrap();
        assert_eq!(stopped, finished);
        assert!(!h.is_recording().unwrap());
    }

    #[test]
    fn zero_length_timed_recording_holds_a_frame() {
        let tmp = tempfile::tempdir().unwrap();
        let encoders = FakeEncoders::new();
        let log = encoders.log();
        let worker = CameraWorker::spawn(controller(tmp.path(), encoders), None);

        let path = worker
            .handle()
            .record_for(Duration::ZERO, Some("blink"))
            .unwrap();
        assert!(file_len(&path) > 0);
        assert_eq!(log.lock().unwrap().frames, 1);
        assert_eq!(log.lock().unwrap().finished, 1);
    }

    #[test]
    fn resizing_is_refused_mid_recording() {
        let tmp = tempfile::tempdir().unwrap();
        let worker = CameraWorker::spawn(controller(tmp.path(), FakeEncoders::new()), None);
        let h = worker.handle();

        h.start_recording(None).unwrap();
        assert!(matches!(
            h.update_settings(SettingsUpdate::new().with_resolution(8, 8)),
            Err(CameraError::AlreadyRecording)
        ));
        assert_eq!(h.settings().unwrap().resolution, Resolution::new(4, 4));
        assert!(h.is_recording().unwrap());

        h.stop_recording().unwrap();
        h.update_settings(SettingsUpdate::new().with_resolution(8, 8))
            .unwrap();
        assert_eq!(h.settings().unwrap().resolution, Resolution::new(8, 8));
    }

    #[test]
    fn pacing_follows_the_negotiated_rate() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = FakeProvider::with_devices([0]);
        let camera = provider.state();
        let mut session = DeviceSession::new(
            Box::new(provider),
            CameraConfig::default().with_output_dir(tmp.path()),
        );
        session
            .update_settings(&SettingsUpdate::new().with_fps(200.0))
            .unwrap();
        session.open(0).unwrap();
        camera.lock().unwrap().reported_format = Some((Resolution::new(0, 0), 0.0));

        let mut worker = Worker {
            controller: RecordingController::new(session, Box::new(FakeEncoders::new())),
            preview: None,
            timed: None,
        };
        assert_eq!(worker.pacing_budget(), Duration::from_millis(5));

        worker.controller.start_recording(None).unwrap();
        assert_eq!(worker.controller.recording().unwrap().fps(), DEFAULT_FPS);
        assert_eq!(
            worker.pacing_budget(),
            Duration::from_secs_f64(1.0 / DEFAULT_FPS)
        );
    }

    #[test]
    fn shutdown_finalizes_active_recording() {
        let tmp = tempfile::tempdir().unwrap();
        let encoders = FakeEncoders::new();
        let log = encoders.log();
        let worker = CameraWorker::spawn(controller(tmp.path(), encoders), None);
        worker.handle().start_recording(None).unwrap();
        drop(worker);
        assert_eq!(log.lock().unwrap().finished, 1);
    }
}
