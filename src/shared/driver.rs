// This is free and unencumbered software released into the public domain.

use crate::shared::{CameraError, CaptureSettings, EncoderProfile, Frame, Resolution};
use std::{
    any::Any,
    path::PathBuf,
    sync::{
        Arc,
        mpsc::{SyncSender, TrySendError},
    },
};

pub type FrameSink = Arc<dyn Fn(Frame) + Send + Sync + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraBackend {
    Ffmpeg,
    Virtual,
}

#[derive(Debug)]
pub enum CameraEvent {
    Opened {
        device: u32,
        backend: CameraBackend,
    },
    Closed {
        device: u32,
    },
    EncoderRejected {
        profile: EncoderProfile,
        reason: String,
    },
    /// `attempt` is the 0-based position of `profile` in the fallback list.
    EncoderSelected {
        profile: EncoderProfile,
        attempt: usize,
        path: PathBuf,
    },
    RecordingStarted {
        path: PathBuf,
    },
    RecordingStopped {
        path: PathBuf,
        frames_written: u64,
        frames_missed: u64,
    },
    FrameMissed,
    Warning {
        message: String,
    },
}

/// Optional, never-blocking event channel.
#[derive(Clone, Debug, Default)]
pub struct EventSink(Option<SyncSender<CameraEvent>>);

impl EventSink {
    pub fn new(tx: SyncSender<CameraEvent>) -> Self {
        Self(Some(tx))
    }

    pub fn emit(&self, event: CameraEvent) {
        if let Some(tx) = &self.0 {
            match tx.try_send(event) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {},
                Err(TrySendError::Full(_)) => {
                    camera_log!(trace, "event queue full, dropping event");
                },
            }
        }
    }
}

/// One open capture device.
///
/// `release` must be safe to call any number of times.
pub trait CameraDriver: Send {
    fn backend(&self) -> CameraBackend;

    /// Applies resolution, frame rate and any set image adjustments.
    fn configure(&mut self, settings: &CaptureSettings) -> Result<(), CameraError>;

    fn read_frame(&mut self) -> Result<Frame, CameraError>;

    /// What the device is actually delivering; zeros when it cannot tell.
    fn current_format(&self) -> (Resolution, f64);

    fn release(&mut self) {}

    fn as_any(&self) -> &dyn Any;
}

/// Opens capture devices by integer ID.
pub trait CameraProvider: Send {
    fn backend(&self) -> CameraBackend;

    fn open(&self, device: u32) -> Result<Box<dyn CameraDriver>, CameraError>;

    /// Briefly opens `device` and releases it again.
    fn probe(&self, device: u32) -> bool {
        match self.open(device) {
            Ok(driver) => {
                let _guard = scopeguard::guard(driver, |mut d| d.release());
                true
            },
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn event_sink_never_blocks() {
        let (tx, rx) = sync_channel(1);
        let sink = EventSink::new(tx);
        sink.emit(CameraEvent::FrameMissed);
        sink.emit(CameraEvent::Closed { device: 0 });
        assert!(matches!(rx.try_recv(), Ok(CameraEvent::FrameMissed)));
        assert!(rx.try_recv().is_err());

        drop(rx);
        sink.emit(CameraEvent::FrameMissed);
        EventSink::default().emit(CameraEvent::FrameMissed);
    }
}
