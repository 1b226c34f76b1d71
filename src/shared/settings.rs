// This is free and unencumbered software released into the public domain.

//! Capture settings, partial updates, and the flat JSON settings file.
//!
//! The three image adjustments use `None` for "leave the device default in
//! place". On disk that sentinel is written as `-1` (and `null` is accepted
//! when reading).

use crate::shared::CameraError;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fs, path::Path, str::FromStr};

pub const DEFAULT_RESOLUTION: Resolution = Resolution::new(1280, 720);
pub const DEFAULT_FPS: f64 = 30.0;

/// Accepted frame rates, inclusive.
pub const MIN_FPS: f64 = 0.1;
pub const MAX_FPS: f64 = 240.0;

const UNSET_SENTINEL: f64 = -1.0;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display("{width}x{height}")]
#[serde(from = "(u32, u32)", into = "(u32, u32)")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl From<Resolution> for (u32, u32) {
    fn from(r: Resolution) -> Self {
        (r.width, r.height)
    }
}

impl FromStr for Resolution {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().replace('×', "x");
        let Some((w, h)) = s.split_once(['x', 'X']) else {
            return Err(CameraError::invalid_config(format!(
                "invalid resolution '{s}', use WxH (e.g., 1280x720)"
            )));
        };
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| CameraError::invalid_config(format!("invalid width: {w}")))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| CameraError::invalid_config(format!("invalid height: {h}")))?;
        Ok(Self::new(width, height))
    }
}

#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoFormat {
    #[default]
    #[display("png")]
    Png,
    #[display("jpg")]
    #[serde(alias = "jpeg")]
    Jpg,
    #[display("bmp")]
    Bmp,
}

impl PhotoFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Bmp => "bmp",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            Self::Png => image::ImageFormat::Png,
            Self::Jpg => image::ImageFormat::Jpeg,
            Self::Bmp => image::ImageFormat::Bmp,
        }
    }
}

impl FromStr for PhotoFormat {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "bmp" => Ok(Self::Bmp),
            other => Err(CameraError::invalid_config(format!(
                "unknown photo format '{other}' (expected png, jpg or bmp)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoContainer {
    #[default]
    #[display("mp4")]
    Mp4,
    #[display("avi")]
    Avi,
    #[display("mkv")]
    Mkv,
}

impl VideoContainer {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Avi => "avi",
            Self::Mkv => "mkv",
        }
    }
}

impl FromStr for VideoContainer {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "avi" => Ok(Self::Avi),
            "mkv" => Ok(Self::Mkv),
            other => Err(CameraError::invalid_config(format!(
                "unknown video format '{other}' (expected mp4, avi or mkv)"
            ))),
        }
    }
}

/// Codecs are named by their fourcc, the way settings files spell them.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    #[default]
    #[display("avc1")]
    #[serde(rename = "avc1", alias = "h264", alias = "H264")]
    H264,
    #[display("mp4v")]
    #[serde(rename = "mp4v")]
    Mpeg4,
    #[display("XVID")]
    #[serde(rename = "XVID", alias = "xvid")]
    Xvid,
    #[display("MJPG")]
    #[serde(rename = "MJPG", alias = "mjpg", alias = "mjpeg")]
    Mjpeg,
}

impl FromStr for VideoCodec {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avc1" | "h264" => Ok(Self::H264),
            "mp4v" | "mpeg4" => Ok(Self::Mpeg4),
            "xvid" => Ok(Self::Xvid),
            "mjpg" | "mjpeg" => Ok(Self::Mjpeg),
            other => Err(CameraError::invalid_config(format!(
                "unknown video codec '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub resolution: Resolution,
    #[serde(alias = "frame_rate", alias = "frameRate")]
    pub fps: f64,
    pub photo_format: PhotoFormat,
    /// Advisory; the container is resolved when a recording starts.
    pub video_format: VideoContainer,
    /// Advisory; the codec is resolved when a recording starts.
    pub video_codec: VideoCodec,
    #[serde(with = "sentinel")]
    pub brightness: Option<f64>,
    #[serde(with = "sentinel")]
    pub contrast: Option<f64>,
    #[serde(with = "sentinel")]
    pub saturation: Option<f64>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            fps: DEFAULT_FPS,
            photo_format: PhotoFormat::Png,
            video_format: VideoContainer::Mp4,
            video_codec: VideoCodec::H264,
            brightness: None,
            contrast: None,
            saturation: None,
        }
    }
}

impl CaptureSettings {
    /// Applies every recognized field of `update`, or nothing at all when
    /// the update does not validate.
    pub fn merge(&mut self, update: &SettingsUpdate) -> Result<(), CameraError> {
        update.validate()?;

        if let Some(r) = update.resolution {
            self.resolution = r;
        }
        if let Some(fps) = update.fps {
            self.fps = fps;
        }
        if let Some(f) = update.photo_format {
            self.photo_format = f;
        }
        if let Some(f) = update.video_format {
            self.video_format = f;
        }
        if let Some(c) = update.video_codec {
            self.video_codec = c;
        }
        if let Some(b) = update.brightness {
            self.brightness = b;
        }
        if let Some(c) = update.contrast {
            self.contrast = c;
        }
        if let Some(s) = update.saturation {
            self.saturation = s;
        }
        Ok(())
    }

    pub fn adjustments(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        [
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("saturation", self.saturation),
        ]
        .into_iter()
        .filter_map(|(name, v)| v.map(|v| (name, v)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SettingKey {
    Resolution,
    Fps,
    PhotoFormat,
    VideoFormat,
    VideoCodec,
    Brightness,
    Contrast,
    Saturation,
}

impl SettingKey {
    fn lookup(key: &str) -> Option<Self> {
        Some(match key.trim() {
            "resolution" => Self::Resolution,
            "fps" | "frame_rate" | "frameRate" => Self::Fps,
            "photo_format" | "photoFormat" => Self::PhotoFormat,
            "video_format" | "videoFormat" | "videoContainer" => Self::VideoFormat,
            "video_codec" | "videoCodec" | "videoCodecPreference" => Self::VideoCodec,
            "brightness" => Self::Brightness,
            "contrast" => Self::Contrast,
            "saturation" => Self::Saturation,
            _ => return None,
        })
    }
}

/// A partial settings change. Fields left as `None` are untouched; for the
/// adjustments, `Some(None)` explicitly resets to the device default.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SettingsUpdate {
    pub resolution: Option<Resolution>,
    pub fps: Option<f64>,
    pub photo_format: Option<PhotoFormat>,
    pub video_format: Option<VideoContainer>,
    pub video_codec: Option<VideoCodec>,
    pub brightness: Option<Option<f64>>,
    pub contrast: Option<Option<f64>>,
    pub saturation: Option<Option<f64>>,
    /// Keys that were supplied but not recognized; reported, never applied.
    pub unknown: Vec<String>,
}

impl SettingsUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Some(Resolution::new(width, height));
        self
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn with_photo_format(mut self, format: PhotoFormat) -> Self {
        self.photo_format = Some(format);
        self
    }

    pub fn with_video_format(mut self, format: VideoContainer) -> Self {
        self.video_format = Some(format);
        self
    }

    pub fn with_brightness(mut self, level: Option<f64>) -> Self {
        self.brightness = Some(level);
        self
    }

    pub fn with_contrast(mut self, level: Option<f64>) -> Self {
        self.contrast = Some(level);
        self
    }

    pub fn with_saturation(mut self, level: Option<f64>) -> Self {
        self.saturation = Some(level);
        self
    }

    /// An update that sets every field to the values in `settings`.
    pub fn from_settings(settings: &CaptureSettings) -> Self {
        Self {
            resolution: Some(settings.resolution),
            fps: Some(settings.fps),
            photo_format: Some(settings.photo_format),
            video_format: Some(settings.video_format),
            video_codec: Some(settings.video_codec),
            brightness: Some(settings.brightness),
            contrast: Some(settings.contrast),
            saturation: Some(settings.saturation),
            unknown: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self
            == Self {
                unknown: self.unknown.clone(),
                ..Self::default()
            }
    }

    pub fn validate(&self) -> Result<(), CameraError> {
        if let Some(r) = self.resolution {
            if !r.is_valid() {
                return Err(CameraError::invalid_config(format!(
                    "resolution must be positive, got {r}"
                )));
            }
        }
        if let Some(fps) = self.fps {
            if !(MIN_FPS..=MAX_FPS).contains(&fps) {
                return Err(CameraError::invalid_config(format!(
                    "frame rate must be between {MIN_FPS} and {MAX_FPS}, got {fps}"
                )));
            }
        }
        for (name, level) in [
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("saturation", self.saturation),
        ] {
            if let Some(Some(v)) = level {
                if !v.is_finite() {
                    return Err(CameraError::invalid_config(format!(
                        "{name} must be a finite number"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Builds an update from a flat JSON object, collecting unrecognized keys.
    pub fn from_json(value: &Value) -> Result<Self, CameraError> {
        let Value::Object(map) = value else {
            return Err(CameraError::invalid_config(
                "settings must be a JSON object",
            ));
        };

        let mut update = Self::default();
        for (key, v) in map {
            let Some(k) = SettingKey::lookup(key) else {
                update.unknown.push(key.clone());
                continue;
            };
            update.set_json(k, key, v)?;
        }
        Ok(update)
    }

    /// Parses a `key=value` assignment as given on a command line.
    pub fn parse_assignment(&mut self, assignment: &str) -> Result<(), CameraError> {
        let Some((key, value)) = assignment.split_once('=') else {
            return Err(CameraError::invalid_config(format!(
                "expected key=value, got '{assignment}'"
            )));
        };
        let Some(k) = SettingKey::lookup(key) else {
            self.unknown.push(key.trim().to_string());
            return Ok(());
        };

        let value = value.trim();
        match k {
            SettingKey::Resolution => self.resolution = Some(value.parse()?),
            SettingKey::Fps => self.fps = Some(parse_number(key, value)?),
            SettingKey::PhotoFormat => self.photo_format = Some(value.parse()?),
            SettingKey::VideoFormat => self.video_format = Some(value.parse()?),
            SettingKey::VideoCodec => self.video_codec = Some(value.parse()?),
            SettingKey::Brightness => self.brightness = Some(parse_level(key, value)?),
            SettingKey::Contrast => self.contrast = Some(parse_level(key, value)?),
            SettingKey::Saturation => self.saturation = Some(parse_level(key, value)?),
        }
        Ok(())
    }

    fn set_json(&mut self, k: SettingKey, key: &str, v: &Value) -> Result<(), CameraError> {
        let bad = |e: serde_json::Error| CameraError::invalid_config(format!("{key}: {e}"));
        match k {
            SettingKey::Resolution => {
                self.resolution = Some(match v {
                    Value::String(s) => s.parse()?,
                    other => Resolution::deserialize(other).map_err(bad)?,
                });
            },
            SettingKey::Fps => self.fps = Some(f64::deserialize(v).map_err(bad)?),
            SettingKey::PhotoFormat => {
                self.photo_format = Some(PhotoFormat::deserialize(v).map_err(bad)?)
            },
            SettingKey::VideoFormat => {
                self.video_format = Some(VideoContainer::deserialize(v).map_err(bad)?)
            },
            SettingKey::VideoCodec => {
                self.video_codec = Some(VideoCodec::deserialize(v).map_err(bad)?)
            },
            SettingKey::Brightness => self.brightness = Some(json_level(v).map_err(bad)?),
            SettingKey::Contrast => self.contrast = Some(json_level(v).map_err(bad)?),
            SettingKey::Saturation => self.saturation = Some(json_level(v).map_err(bad)?),
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> Result<f64, CameraError> {
    value
        .parse()
        .map_err(|_| CameraError::invalid_config(format!("{key}: '{value}' is not a number")))
}

fn parse_level(key: &str, value: &str) -> Result<Option<f64>, CameraError> {
    match value {
        "unset" | "default" | "none" | "" => Ok(None),
        _ => parse_number(key, value).map(from_sentinel),
    }
}

fn json_level(v: &Value) -> Result<Option<f64>, serde_json::Error> {
    Option::<f64>::deserialize(v).map(|l| l.and_then(from_sentinel))
}

fn from_sentinel(v: f64) -> Option<f64> {
    if v == UNSET_SENTINEL { None } else { Some(v) }
}

mod sentinel {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(level: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(level.unwrap_or(super::UNSET_SENTINEL))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.and_then(super::from_sentinel))
    }
}

/// Reads a settings file into an update. Keys absent from the file stay
/// `None`, so merging leaves the current values intact.
pub fn load_settings(path: impl AsRef<Path>) -> Result<SettingsUpdate, CameraError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| CameraError::settings(path, e))?;
    let value: Value = serde_json::from_str(&text).map_err(|e| CameraError::settings(path, e))?;
    SettingsUpdate::from_json(&value)
}

pub fn save_settings(path: impl AsRef<Path>, settings: &CaptureSettings) -> Result<(), CameraError> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(settings).map_err(|e| CameraError::settings(path, e))?;
    fs::write(path, json + "\n").map_err(|e| CameraError::settings(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_documented_values() {
        let s = CaptureSettings::default();
        assert_eq!(s.resolution, Resolution::new(1280, 720));
        assert_eq!(s.fps, 30.0);
        assert_eq!(s.photo_format, PhotoFormat::Png);
        assert_eq!(s.adjustments().count(), 0);
    }

    #[test]
    fn resolution_parses_both_separators() {
        assert_eq!("1920x1080".parse::<Resolution>().unwrap(), Resolution::new(1920, 1080));
        assert_eq!(" 640 × 480 ".parse::<Resolution>().unwrap(), Resolution::new(640, 480));
        assert!("1920".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn invalid_update_changes_nothing() {
        let mut s = CaptureSettings::default();
        let update = SettingsUpdate::new()
            .with_photo_format(PhotoFormat::Bmp)
            .with_fps(0.0);
        assert!(matches!(s.merge(&update), Err(CameraError::InvalidConfig(_))));
        assert_eq!(s, CaptureSettings::default());

        let update = SettingsUpdate::new().with_resolution(0, 720);
        assert!(s.merge(&update).is_err());
        assert_eq!(s, CaptureSettings::default());
    }

    #[test]
    fn frame_rate_outside_bounds_is_rejected() {
        for fps in [1e-20, 0.05, 240.5, 1e300, f64::NAN, f64::INFINITY] {
            let update = SettingsUpdate::new().with_fps(fps);
            assert!(
                matches!(update.validate(), Err(CameraError::InvalidConfig(_))),
                "fps = {fps}"
            );
        }
        for fps in [MIN_FPS, 7.5, MAX_FPS] {
            assert!(SettingsUpdate::new().with_fps(fps).validate().is_ok());
        }
    }

    #[test]
    fn merge_touches_only_given_fields() {
        let mut s = CaptureSettings::default();
        s.merge(
            &SettingsUpdate::new()
                .with_resolution(640, 480)
                .with_brightness(Some(0.25)),
        )
        .unwrap();
        assert_eq!(s.resolution, Resolution::new(640, 480));
        assert_eq!(s.brightness, Some(0.25));
        assert_eq!(s.fps, DEFAULT_FPS);

        s.merge(&SettingsUpdate::new().with_brightness(None)).unwrap();
        assert_eq!(s.brightness, None);
    }

    #[test]
    fn json_update_reports_unknown_keys() {
        let update = SettingsUpdate::from_json(&json!({
            "resolution": [800, 600],
            "fps": 15,
            "photo_format": "jpeg",
            "video_codec": "MJPG",
            "contrast": -1,
            "saturation": null,
            "exposure": 3,
        }))
        .unwrap();

        assert_eq!(update.resolution, Some(Resolution::new(800, 600)));
        assert_eq!(update.fps, Some(15.0));
        assert_eq!(update.photo_format, Some(PhotoFormat::Jpg));
        assert_eq!(update.video_codec, Some(VideoCodec::Mjpeg));
        assert_eq!(update.contrast, Some(None));
        assert_eq!(update.saturation, Some(None));
        assert_eq!(update.brightness, None);
        assert_eq!(update.unknown, vec!["exposure".to_string()]);
    }

    #[test]
    fn json_update_rejects_wrong_types() {
        let err = SettingsUpdate::from_json(&json!({ "fps": "fast" })).unwrap_err();
        assert!(matches!(err, CameraError::InvalidConfig(_)));
        assert!(SettingsUpdate::from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn assignments_parse_like_the_command_line() {
        let mut update = SettingsUpdate::new();
        update.parse_assignment("resolution=1920x1080").unwrap();
        update.parse_assignment("fps=60").unwrap();
        update.parse_assignment("brightness=unset").unwrap();
        update.parse_assignment("contrast=0.5").unwrap();
        update.parse_assignment("zoom=2").unwrap();

        assert_eq!(update.resolution, Some(Resolution::new(1920, 1080)));
        assert_eq!(update.fps, Some(60.0));
        assert_eq!(update.brightness, Some(None));
        assert_eq!(update.contrast, Some(Some(0.5)));
        assert_eq!(update.unknown, vec!["zoom".to_string()]);
        assert!(update.parse_assignment("fps").is_err());
    }

    #[test]
    fn settings_file_keeps_sentinel_and_absent_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera_settings.json");

        let mut saved = CaptureSettings::default();
        saved.contrast = Some(40.0);
        save_settings(&path, &saved).unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["brightness"], json!(-1.0));
        assert_eq!(raw["resolution"], json!([1280, 720]));

        let mut loaded = CaptureSettings::default();
        loaded.merge(&load_settings(&path).unwrap()).unwrap();
        assert_eq!(loaded, saved);

        fs::write(&path, r#"{ "fps": 12, "lens": "wide" }"#).unwrap();
        let mut current = saved.clone();
        current.merge(&load_settings(&path).unwrap()).unwrap();
        assert_eq!(current.fps, 12.0);
        assert_eq!(current.contrast, Some(40.0));
    }

    #[test]
    fn missing_settings_file_is_reported() {
        let err = load_settings("/nonexistent/camera_settings.json").unwrap_err();
        assert!(matches!(err, CameraError::Settings { .. }));
    }
}
