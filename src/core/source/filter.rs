//! Media classification by extension and size.

use crate::core::record::MediaKind;
use std::collections::HashSet;

use super::SkipReason;

pub const DEFAULT_PHOTO_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "heic", "heif", "webp", "gif", "bmp", "tiff", "tif", "dng", "cr2",
    "nef", "arw", "raf",
];

pub const DEFAULT_VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "m4v", "avi", "mkv", "3gp", "mts", "m2ts", "wmv", "webm",
];

/// Decides which enumerated files are media worth scanning
#[derive(Debug, Clone)]
pub struct MediaFilter {
    photo_extensions: HashSet<String>,
    video_extensions: HashSet<String>,
    /// Inclusive lower size bound
    min_size: Option<u64>,
    /// Inclusive upper size bound
    max_size: Option<u64>,
    include_hidden: bool,
}

impl MediaFilter {
    /// Create a filter with the default photo and video extensions
    pub fn new() -> Self {
        Self {
            photo_extensions: normalize(DEFAULT_PHOTO_EXTENSIONS.iter().copied()),
            video_extensions: normalize(DEFAULT_VIDEO_EXTENSIONS.iter().copied()),
            min_size: None,
            max_size: None,
            include_hidden: false,
        }
    }

    /// Include hidden files and directories (names starting with .)
    pub fn with_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    pub fn with_photo_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.photo_extensions = normalize(extensions);
        self
    }

    pub fn with_video_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.video_extensions = normalize(extensions);
        self
    }

    pub fn with_size_bounds(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.min_size = min;
        self.max_size = max;
        self
    }

    pub fn include_hidden(&self) -> bool {
        self.include_hidden
    }

    /// Whether a single path component is hidden
    pub fn is_hidden_name(name: &str) -> bool {
        name.starts_with('.') && name != "." && name != ".."
    }

    /// Media kind for a path, from its extension
    pub fn media_kind(&self, path: &str) -> Option<MediaKind> {
        let name = path.rsplit('/').next().unwrap_or(path);
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() && !self.include_hidden {
            return None;
        }
        let ext = ext.to_lowercase();
        if self.photo_extensions.contains(&ext) {
            Some(MediaKind::Photo)
        } else if self.video_extensions.contains(&ext) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    /// Whether a size falls inside the configured bounds
    pub fn size_allowed(&self, size: u64) -> bool {
        self.min_size.map_or(true, |min| size >= min) && self.max_size.map_or(true, |max| size <= max)
    }

    /// Classify a file as media or explain why it is skipped
    pub fn classify(&self, path: &str, size: u64) -> Result<MediaKind, SkipReason> {
        let kind = self.media_kind(path).ok_or(SkipReason::UnsupportedType)?;
        if !self.size_allowed(size) {
            return Err(SkipReason::FilteredBySize);
        }
        Ok(kind)
    }
}

impl Default for MediaFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize<I, S>(extensions: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    extensions
        .into_iter()
        .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_classifies_photos_and_videos() {
        let filter = MediaFilter::new();
        assert_eq!(filter.media_kind("DCIM/IMG_0001.JPG"), Some(MediaKind::Photo));
        assert_eq!(filter.media_kind("raw/shot.CR2"), Some(MediaKind::Photo));
        assert_eq!(filter.media_kind("clips/holiday.mov"), Some(MediaKind::Video));
        assert_eq!(filter.media_kind("clips/a.M2TS"), Some(MediaKind::Video));
    }

    #[test]
    fn filter_rejects_other_types() {
        let filter = MediaFilter::new();
        assert_eq!(
            filter.classify("notes/todo.txt", 10),
            Err(SkipReason::UnsupportedType)
        );
        assert_eq!(filter.classify("README", 10), Err(SkipReason::UnsupportedType));
    }

    #[test]
    fn size_bounds_are_inclusive() {
        let filter = MediaFilter::new().with_size_bounds(Some(100), Some(200));
        assert!(filter.classify("a.jpg", 100).is_ok());
        assert!(filter.classify("a.jpg", 200).is_ok());
        assert_eq!(filter.classify("a.jpg", 99), Err(SkipReason::FilteredBySize));
        assert_eq!(filter.classify("a.jpg", 201), Err(SkipReason::FilteredBySize));
    }

    #[test]
    fn custom_extensions_are_normalized() {
        let filter = MediaFilter::new()
            .with_photo_extensions([".PNG"])
            .with_video_extensions(Vec::<String>::new());
        assert_eq!(filter.media_kind("x.png"), Some(MediaKind::Photo));
        assert_eq!(filter.media_kind("x.jpg"), None);
        assert_eq!(filter.media_kind("x.mp4"), None);
    }

    #[test]
    fn dotfile_without_stem_needs_hidden() {
        let filter = MediaFilter::new();
        assert_eq!(filter.media_kind(".jpg"), None);
        assert!(MediaFilter::is_hidden_name(".thumbnails"));
        assert!(!MediaFilter::is_hidden_name("photos"));
    }
}
