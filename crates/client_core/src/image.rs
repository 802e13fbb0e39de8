//! The image picked by the user, held in memory until submit or reset.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

const IMAGE_MIME_PREFIX: &str = "image/";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("'{file_name}' is not an image (content type {mime_type})")]
    NotAnImage {
        file_name: String,
        mime_type: String,
    },
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedImage {
    file_name: String,
    mime_type: String,
    bytes: Vec<u8>,
}

impl SelectedImage {
    /// Accepts the file only when its MIME type starts with `image/`.
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self, ImageError> {
        let file_name = file_name.into();
        let mime_type = mime_type.into();
        if !mime_type.starts_with(IMAGE_MIME_PREFIX) {
            return Err(ImageError::NotAnImage {
                file_name,
                mime_type,
            });
        }
        Ok(Self {
            file_name,
            mime_type,
            bytes,
        })
    }

    /// Reads a file from disk, guessing its MIME type from the extension.
    pub async fn from_path(path: &Path) -> Result<Self, ImageError> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        if !mime_type.starts_with(IMAGE_MIME_PREFIX) {
            return Err(ImageError::NotAnImage {
                file_name,
                mime_type,
            });
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ImageError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::new(file_name, mime_type, bytes)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn preview_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.bytes))
    }
}
