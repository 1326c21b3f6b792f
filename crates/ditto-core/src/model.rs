use std::path::{Path, PathBuf};

/// A regular file discovered by the walker. Flows through every pipeline
/// stage; owned by exactly one stage at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub size: u64,
    /// Modification time as Unix epoch seconds.
    pub mtime: i64,
}

/// A FileDescriptor paired with a hex-encoded SHA-256 digest. Whether the
/// digest covers the 64 KiB prefix or the whole file depends on the stage
/// that produced it; consumers treat it opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedFile {
    pub file: FileDescriptor,
    pub hash: String,
}

/// Coarse classification used for grouping and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Image,
    Video,
    Document,
    Other,
}

const IMAGE_EXTS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif", "heic", "heif", "avif",
];

const VIDEO_EXTS: &[&str] = &["mp4", "mov", "avi", "mkv", "wmv", "flv", "webm", "m4v"];

const DOCUMENT_EXTS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp",
];

impl FileType {
    /// Classify a path by its extension (case-insensitive).
    pub fn detect(path: &Path) -> FileType {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(e) => e.to_ascii_lowercase(),
            None => return FileType::Other,
        };
        if IMAGE_EXTS.contains(&ext.as_str()) {
            FileType::Image
        } else if VIDEO_EXTS.contains(&ext.as_str()) {
            FileType::Video
        } else if DOCUMENT_EXTS.contains(&ext.as_str()) {
            FileType::Document
        } else {
            FileType::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Video => "video",
            FileType::Document => "document",
            FileType::Other => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(FileType::detect(Path::new("/p/photo.JPG")), FileType::Image);
        assert_eq!(FileType::detect(Path::new("/p/clip.mkv")), FileType::Video);
        assert_eq!(FileType::detect(Path::new("/p/report.PDF")), FileType::Document);
        assert_eq!(FileType::detect(Path::new("/p/notes.txt")), FileType::Other);
        assert_eq!(FileType::detect(Path::new("/p/archive.tar.gz")), FileType::Other);
        assert_eq!(FileType::detect(Path::new("/p/no_extension")), FileType::Other);
    }
}
