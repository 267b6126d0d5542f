//! `data:<mime>;base64,<payload>` URIs, the image interchange format of the diagram service.

use std::{fmt, io::Cursor, str::FromStr};

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{ImageFormat, RgbaImage};
use thiserror::Error;

pub const PNG: &str = "image/png";

#[derive(Debug, Error)]
pub enum DataUriError {
    #[error("not a data URI")]
    MissingScheme,
    #[error("data URI is not base64-encoded")]
    NotBase64,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Clone, PartialEq, Eq)]
pub struct DataUri {
    mime: String,
    data: Vec<u8>,
}

impl DataUri {
    pub fn new(mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            data,
        }
    }

    pub fn from_base64(mime: impl Into<String>, payload: &str) -> Result<Self, DataUriError> {
        Ok(Self::new(mime, STANDARD.decode(payload.trim())?))
    }

    pub fn encode_png(image: &RgbaImage) -> Result<Self, DataUriError> {
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(Self::new(PNG, png))
    }

    pub fn decode_image(&self) -> Result<RgbaImage, DataUriError> {
        Ok(image::load_from_memory(&self.data)?.to_rgba8())
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    #[cfg(test)]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The payload in standard base64.
    pub fn base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

impl FromStr for DataUri {
    type Err = DataUriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (header, payload) = s
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(','))
            .ok_or(DataUriError::MissingScheme)?;
        let header = header
            .strip_suffix(";base64")
            .ok_or(DataUriError::NotBase64)?;
        let mime = header.split(';').next().unwrap_or_default();
        Self::from_base64(mime, payload)
    }
}

impl fmt::Display for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime, self.base64())
    }
}

// Payloads are megabytes of base64; keep logs readable.
impl fmt::Debug for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataUri")
            .field("mime", &self.mime)
            .field("len", &self.data.len())
            .finish()
    }
}
