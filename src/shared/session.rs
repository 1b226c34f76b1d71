// This is free and unencumbered software released into the public domain.

use crate::shared::{
    CameraBackend, CameraConfig, CameraDriver, CameraError, CameraEvent, CameraProvider,
    CaptureSettings, EventSink, Frame, PHOTO_PREFIX, Resolution, SettingsUpdate, ensure_dir,
    load_settings, resolve_output_path, save_settings,
};
use std::path::{Path, PathBuf};

/// Device IDs probed by [`list_available_devices`].
pub const MAX_PROBED_DEVICES: u32 = 10;

/// Open/closed lifecycle of one capture device plus its effective settings.
///
/// Dropping the session closes the device.
pub struct DeviceSession {
    provider: Box<dyn CameraProvider>,
    device: u32,
    output_dir: PathBuf,
    settings: CaptureSettings,
    driver: Option<Box<dyn CameraDriver>>,
    events: EventSink,
}

impl core::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("backend", &self.provider.backend())
            .field("device", &self.device)
            .field("open", &self.is_open())
            .field("settings", &self.settings)
            .finish()
    }
}

impl DeviceSession {
    pub fn new(provider: Box<dyn CameraProvider>, config: CameraConfig) -> Self {
        Self {
            provider,
            device: config.device,
            output_dir: config.output_dir,
            settings: config.settings,
            driver: None,
            events: EventSink::default(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn device(&self) -> u32 {
        self.device
    }

    pub fn backend(&self) -> CameraBackend {
        self.provider.backend()
    }

    pub fn is_open(&self) -> bool {
        self.driver.is_some()
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Opens `device` and applies the current settings to it. A session that
    /// is already open is closed first.
    pub fn open(&mut self, device: u32) -> Result<(), CameraError> {
        self.close();

        let mut driver = match self.provider.open(device) {
            Ok(d) => d,
            Err(err @ CameraError::CannotOpen { .. }) => return Err(err),
            Err(err) => return Err(CameraError::cannot_open(device, err.to_string())),
        };
        if let Err(err) = driver.configure(&self.settings) {
            driver.release();
            return Err(CameraError::cannot_open(device, err.to_string()));
        }

        camera_log!(info, device, backend = ?driver.backend(), resolution = %self.settings.resolution, fps = self.settings.fps, "camera opened");
        self.events.emit(CameraEvent::Opened {
            device,
            backend: driver.backend(),
        });
        self.device = device;
        self.driver = Some(driver);
        Ok(())
    }

    /// Releases the device. Closing a closed session does nothing.
    pub fn close(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            driver.release();
            camera_log!(info, device = self.device, "camera closed");
            self.events.emit(CameraEvent::Closed {
                device: self.device,
            });
        }
    }

    /// Merges the recognized fields of `update` and, when open, re-applies the
    /// result to the device before returning. Returns the unrecognized keys.
    ///
    /// On failure the previous settings stay in effect.
    pub fn update_settings(&mut self, update: &SettingsUpdate) -> Result<Vec<String>, CameraError> {
        for key in &update.unknown {
            camera_log!(warn, key = %key, "unknown setting ignored");
            self.events.emit(CameraEvent::Warning {
                message: format!("unknown setting '{key}'"),
            });
        }

        let mut merged = self.settings.clone();
        merged.merge(update)?;

        if let Some(driver) = self.driver.as_mut() {
            if let Err(err) = driver.configure(&merged) {
                if driver.configure(&self.settings).is_err() {
                    camera_log!(warn, device = self.device, "device lost while restoring settings");
                    self.close();
                }
                return Err(err);
            }
        }

        self.settings = merged;
        Ok(update.unknown.clone())
    }

    pub fn load_settings(&mut self, path: impl AsRef<Path>) -> Result<Vec<String>, CameraError> {
        let update = load_settings(&path)?;
        camera_log!(info, path = %path.as_ref().display(), "settings loaded");
        self.update_settings(&update)
    }

    pub fn save_settings(&self, path: impl AsRef<Path>) -> Result<(), CameraError> {
        save_settings(&path, &self.settings)?;
        camera_log!(info, path = %path.as_ref().display(), "settings saved");
        Ok(())
    }

    /// What the open device is actually delivering.
    pub fn current_format(&self) -> Result<(Resolution, f64), CameraError> {
        self.driver
            .as_ref()
            .map(|d| d.current_format())
            .ok_or(CameraError::NotOpen)
    }

    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let driver = self
            .driver
            .as_mut()
            .ok_or_else(|| CameraError::capture_failed("camera is not open"))?;
        match driver.read_frame() {
            Ok(frame) => Ok(frame),
            Err(err @ CameraError::CaptureFailed(_)) => Err(err),
            Err(err) => Err(CameraError::capture_failed(err.to_string())),
        }
    }

    /// Captures one frame and writes it as a still image under the output
    /// directory.
    pub fn capture_photo(&mut self, name: Option<&str>) -> Result<PathBuf, CameraError> {
        let frame = self.capture_frame()?;
        let format = self.settings.photo_format;
        let path = resolve_output_path(&self.output_dir, PHOTO_PREFIX, name, format.extension());

        ensure_dir(&self.output_dir)?;
        frame
            .to_image()?
            .save_with_format(&path, format.image_format())
            .map_err(|e| CameraError::write_failed("writing photo", e))?;

        camera_log!(info, path = %path.display(), "photo saved");
        Ok(path)
    }

    /// Device IDs that can currently be opened. The device this session holds
    /// open is reported without being probed again.
    pub fn list_available_devices(&self) -> Vec<u32> {
        let held = self.is_open().then_some(self.device);
        (0..MAX_PROBED_DEVICES)
            .filter(|&id| Some(id) == held || self.provider.probe(id))
            .collect()
    }

    pub fn driver_as<T: 'static>(&self) -> Option<&T> {
        self.driver.as_ref()?.as_any().downcast_ref::<T>()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Probes the first [`MAX_PROBED_DEVICES`] IDs, in ascending order.
pub fn list_available_devices(provider: &dyn CameraProvider) -> Vec<u32> {
    (0..MAX_PROBED_DEVICES)
        .filter(|&id| provider.probe(id))
        .collect()
}
