// This is free and unencumbered software released into the public domain.

use crate::shared::CaptureSettings;
use std::path::PathBuf;

pub const DEFAULT_OUTPUT_DIR: &str = "./captures";

/// Everything a `DeviceSession` needs at construction; there are no
/// process-wide defaults beyond `Default`.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub device: u32,
    pub output_dir: PathBuf,
    pub settings: CaptureSettings,
    pub diagnostics: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: 0,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            settings: CaptureSettings::default(),
            diagnostics: false,
        }
    }
}

impl CameraConfig {
    pub fn new(device: u32) -> Self {
        Self {
            device,
            ..Default::default()
        }
    }

    pub fn with_device(mut self, device: u32) -> Self {
        self.device = device;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_settings(mut self, settings: CaptureSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }
}
