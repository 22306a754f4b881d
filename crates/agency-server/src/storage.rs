use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Image formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl ImageKind {
    /// Map a `Content-Type` value (parameters ignored) to an image kind.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
        match mime.as_str() {
            "image/jpeg" | "image/jpg" => Some(ImageKind::Jpeg),
            "image/png" => Some(ImageKind::Png),
            "image/webp" => Some(ImageKind::Webp),
            "image/gif" => Some(ImageKind::Gif),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Webp => "webp",
            ImageKind::Gif => "gif",
        }
    }

    /// Whether `data` starts with this format's file signature.
    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            ImageKind::Jpeg => data.starts_with(&[0xFF, 0xD8, 0xFF]),
            ImageKind::Png => data.starts_with(b"\x89PNG\r\n\x1a\n"),
            ImageKind::Webp => data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP",
            ImageKind::Gif => data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a"),
        }
    }
}

#[derive(Debug)]
pub struct StoredUpload {
    pub id: Uuid,
    pub file_name: String,
    pub bytes: u64,
}

/// Writes uploaded images to a local directory under random names.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub async fn save(&self, kind: ImageKind, data: &[u8]) -> std::io::Result<StoredUpload> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let id = Uuid::new_v4();
        let file_name = format!("{id}.{}", kind.extension());
        tokio::fs::write(self.dir.join(&file_name), data).await?;

        tracing::info!(file = %file_name, bytes = data.len(), "stored upload");

        Ok(StoredUpload {
            id,
            file_name,
            bytes: data.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_content_type() {
        assert_eq!(ImageKind::from_content_type("image/png"), Some(ImageKind::Png));
        assert_eq!(ImageKind::from_content_type("IMAGE/JPEG"), Some(ImageKind::Jpeg));
        assert_eq!(
            ImageKind::from_content_type("image/webp; charset=binary"),
            Some(ImageKind::Webp)
        );
        assert_eq!(ImageKind::from_content_type("image/svg+xml"), None);
        assert_eq!(ImageKind::from_content_type("text/plain"), None);
    }

    #[test]
    fn test_signatures() {
        assert!(ImageKind::Png.matches(b"\x89PNG\r\n\x1a\nrest"));
        assert!(ImageKind::Jpeg.matches(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(ImageKind::Gif.matches(b"GIF89a...."));
        assert!(ImageKind::Webp.matches(b"RIFF\x00\x00\x00\x00WEBPVP8 "));

        assert!(!ImageKind::Png.matches(&[0xFF, 0xD8, 0xFF]));
        assert!(!ImageKind::Webp.matches(b"RIFF"));
        assert!(!ImageKind::Gif.matches(b""));
    }

    #[tokio::test]
    async fn test_save_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("nested"), 1024);
        let data = b"GIF89a-pixels";

        let stored = store.save(ImageKind::Gif, data).await.unwrap();

        assert_eq!(stored.bytes, data.len() as u64);
        assert_eq!(stored.file_name, format!("{}.gif", stored.id));
        let written = std::fs::read(store.dir().join(&stored.file_name)).unwrap();
        assert_eq!(written, data);
    }
}
