use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::operations::EditKind;

/// One immutable image in the edit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub path: PathBuf,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub origin: EditKind,
}

impl Snapshot {
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).with_context(|| format!("failed reading {}", self.path.display()))
    }

    pub fn load_image(&self) -> Result<DynamicImage> {
        let bytes = self.read_bytes()?;
        image::load_from_memory(&bytes)
            .with_context(|| format!("failed decoding {}", self.path.display()))
    }

    /// Gemini-style `inlineData` part carrying the snapshot bytes.
    pub fn inline_part(&self) -> Result<Value> {
        let bytes = self.read_bytes()?;
        Ok(json!({
            "inlineData": {
                "mimeType": self.mime_type,
                "data": BASE64.encode(bytes),
            }
        }))
    }

    pub fn data_url(&self) -> Result<String> {
        let bytes = self.read_bytes()?;
        Ok(format!(
            "data:{};base64,{}",
            self.mime_type,
            BASE64.encode(bytes)
        ))
    }
}

/// Splits a `data:<mime>;base64,<payload>` URL into its MIME type and decoded bytes.
pub fn parse_data_url(url: &str) -> Result<(String, Vec<u8>)> {
    let Some(rest) = url.trim().strip_prefix("data:") else {
        bail!("invalid data URL: missing 'data:' prefix");
    };
    let Some((header, payload)) = rest.split_once(',') else {
        bail!("invalid data URL: missing ',' separator");
    };
    let mime = header
        .split(';')
        .next()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .context("invalid data URL: could not parse MIME type")?;
    if !header.split(';').any(|part| part.trim() == "base64") {
        bail!("invalid data URL: only base64 payloads are supported");
    }
    let bytes = BASE64
        .decode(payload.trim().as_bytes())
        .context("invalid data URL: base64 decode failed")?;
    Ok((mime.to_string(), bytes))
}

/// Writes snapshot files under `<session>/snapshots/`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    next_ordinal: u64,
}

impl SnapshotStore {
    pub fn new(session_dir: &Path) -> Result<Self> {
        let dir = session_dir.join("snapshots");
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        // Continue numbering when reopening a session directory.
        let next_ordinal = fs::read_dir(&dir)
            .with_context(|| format!("failed to list {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .count() as u64;
        Ok(Self { dir, next_ordinal })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copies a user-supplied image file into the store.
    pub fn import(&mut self, source: &Path) -> Result<Snapshot> {
        let bytes =
            fs::read(source).with_context(|| format!("failed reading {}", source.display()))?;
        self.persist(&bytes, None, EditKind::Upload)
            .with_context(|| format!("failed importing {}", source.display()))
    }

    /// Stores encoded image bytes. The format is sniffed from the bytes when `mime_type` is absent.
    pub fn persist(
        &mut self,
        bytes: &[u8],
        mime_type: Option<&str>,
        origin: EditKind,
    ) -> Result<Snapshot> {
        let format = match mime_type.and_then(ImageFormat::from_mime_type) {
            Some(format) => format,
            None => image::guess_format(bytes).context("unrecognized image format")?,
        };
        let decoded = image::load_from_memory_with_format(bytes, format)
            .context("image data could not be decoded")?;
        let ext = extension_for_format(format)?;

        let id = format!("{:02}-{}", self.next_ordinal, content_digest(bytes));
        let path = self.dir.join(format!("{id}.{ext}"));
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        self.next_ordinal += 1;

        Ok(Snapshot {
            id,
            path,
            mime_type: format.to_mime_type().to_string(),
            width: decoded.width(),
            height: decoded.height(),
            origin,
        })
    }

    /// Encodes a locally produced image as PNG and stores it.
    pub fn persist_image(&mut self, image: &DynamicImage, origin: EditKind) -> Result<Snapshot> {
        let bytes = encode_png(image)?;
        self.persist(&bytes, Some("image/png"), origin)
    }
}

pub(crate) fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(bytes)
}

fn extension_for_format(format: ImageFormat) -> Result<&'static str> {
    Ok(match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpg",
        ImageFormat::WebP => "webp",
        ImageFormat::Gif => "gif",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Tiff => "tiff",
        other => bail!("unsupported image format: {other:?}"),
    })
}

fn content_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)[..12].to_string()
}
