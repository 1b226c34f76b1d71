// This is free and unencumbered software released into the public domain.

use crate::shared::CameraError;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const PHOTO_PREFIX: &str = "photo";
pub const VIDEO_PREFIX: &str = "video";

pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// `<dir>/<hint>.<ext>`, or `<dir>/<prefix>_<timestamp>.<ext>` without a hint.
/// A hint that already ends in `.<ext>` is used unchanged.
pub fn resolve_output_path(dir: &Path, prefix: &str, hint: Option<&str>, ext: &str) -> PathBuf {
    let name = match hint.map(str::trim).filter(|h| !h.is_empty()) {
        None => format!("{prefix}_{}.{ext}", timestamp()),
        Some(h) if has_extension(h, ext) => h.to_string(),
        Some(h) => format!("{h}.{ext}"),
    };
    dir.join(name)
}

fn has_extension(name: &str, ext: &str) -> bool {
    let suffix_len = ext.len() + 1;
    name.len() > suffix_len
        && name.is_char_boundary(name.len() - suffix_len)
        && name[name.len() - suffix_len..].eq_ignore_ascii_case(&format!(".{ext}"))
}

pub fn ensure_dir(dir: &Path) -> Result<(), CameraError> {
    fs::create_dir_all(dir).map_err(|e| CameraError::write_failed("creating output directory", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_name_gets_extension_once() {
        let dir = Path::new("captures");
        let a = resolve_output_path(dir, PHOTO_PREFIX, Some("shot"), "jpg");
        let b = resolve_output_path(dir, PHOTO_PREFIX, Some("shot.jpg"), "jpg");
        assert!(a.ends_with("shot.jpg"));
        assert_eq!(a, b);
    }

    #[test]
    fn other_extension_is_kept_and_suffixed() {
        let p = resolve_output_path(Path::new("out"), VIDEO_PREFIX, Some("clip.avi"), "mp4");
        assert_eq!(p, Path::new("out").join("clip.avi.mp4"));
        let p = resolve_output_path(Path::new("out"), VIDEO_PREFIX, Some("CLIP.MP4"), "mp4");
        assert_eq!(p, Path::new("out").join("CLIP.MP4"));
    }

    #[test]
    fn missing_name_uses_timestamp() {
        let p = resolve_output_path(Path::new("out"), PHOTO_PREFIX, None, "png");
        let name = p.file_name().unwrap().to_str().unwrap();
        // photo_YYYYMMDD_HHMMSS.png
        assert!(name.starts_with("photo_"));
        assert!(name.ends_with(".png"));
        assert_eq!(name.len(), "photo_".len() + 15 + ".png".len());

        let blank = resolve_output_path(Path::new("out"), VIDEO_PREFIX, Some("  "), "mp4");
        assert!(blank.file_name().unwrap().to_str().unwrap().starts_with("video_"));
    }

    #[test]
    fn ensure_dir_creates_nested_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
