/// Uploaded images, kept as plain files under one directory.
///
/// Stored names are `<uuid>_<sanitised stem>.<extension>`. Lookups accept only
/// bare file names, so a request can never reach outside the directory.
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::info;

const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("invalid file type: {0}")]
    InvalidType(String),

    #[error("image not found: {0}")]
    NotFound(String),

    #[error("image io error: {0}")]
    Io(#[from] io::Error),
}

/// An image read back from disk, ready to embed in a request.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

impl StoredImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    /// Create the upload directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Whether `filename` has one of the accepted image extensions.
    pub fn is_allowed(filename: &str) -> bool {
        mime_for(filename).is_some()
    }

    /// Store an upload and return the generated file name.
    pub async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<String, ImageError> {
        let stored = stored_name(original_name)
            .ok_or_else(|| ImageError::InvalidType(original_name.to_string()))?;
        tokio::fs::write(self.root.join(&stored), bytes).await?;
        info!(filename = %stored, bytes = bytes.len(), "image uploaded");
        Ok(stored)
    }

    /// Read a previously stored image by its generated name.
    pub async fn load(&self, filename: &str) -> Result<StoredImage, ImageError> {
        let is_bare = !filename.is_empty()
            && Path::new(filename).file_name().and_then(|n| n.to_str()) == Some(filename);
        if !is_bare {
            return Err(ImageError::NotFound(filename.to_string()));
        }
        let path = self.root.join(filename);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(ImageError::NotFound(filename.to_string())),
        }
        let mime = mime_for(filename).ok_or_else(|| ImageError::InvalidType(filename.to_string()))?;
        let bytes = tokio::fs::read(&path).await?;
        Ok(StoredImage { bytes, mime })
    }
}

/// `<uuid>_<cleaned stem>.<lowercase extension>`, or `None` for a disallowed
/// extension. The extension is re-attached after cleaning, so a stem that
/// cleans away entirely still yields a loadable name.
fn stored_name(original_name: &str) -> Option<String> {
    mime_for(original_name)?;
    let base = original_name.rsplit(['/', '\\']).next().unwrap_or(original_name);
    let (stem, ext) = base.rsplit_once('.')?;
    Some(format!(
        "{}_{}.{}",
        uuid::Uuid::new_v4(),
        secure_filename(stem),
        ext.to_ascii_lowercase()
    ))
}

fn mime_for(filename: &str) -> Option<&'static str> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    Some(if ext == "png" { "image/png" } else { "image/jpeg" })
}

/// Last path component of a client-supplied name, reduced to ASCII
/// alphanumerics, `.`, `-` and `_`, with spaces turned into underscores.
fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            _ => None,
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_').to_string();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}
