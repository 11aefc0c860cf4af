//! Encoded thumbnail bitmaps.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An encoded preview image (JPEG unless a thumbnailer says otherwise).
///
/// The bytes are reference counted, so cloning a thumbnail into events and
/// snapshots does not copy the bitmap. On the wire the data travels as
/// base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    /// MIME type of `data`, e.g. `image/jpeg`.
    pub mime: String,
    #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
    pub data: Bytes,
}

impl Thumbnail {
    pub fn jpeg(data: impl Into<Bytes>) -> Self {
        Self {
            mime: "image/jpeg".to_string(),
            data: data.into(),
        }
    }

    /// Render as a `data:` URL suitable for an `<img src>`.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.data))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn to_base64<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

fn from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}
