//! Upload identity, metadata, and the persisted resume record.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of leading bytes of the first chunk used as the content fingerprint.
pub const FINGERPRINT_LEN: usize = 16;

/// Identifies what is being uploaded. Immutable for the session's life.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadTarget {
    /// Destination bucket.
    pub bucket: String,
    /// Destination object name.
    pub object: String,
    /// Conditional write guard tied to the object generation, if any.
    pub if_generation_match: Option<i64>,
    /// Object metadata sent with the initiation request.
    pub metadata: ObjectMetadata,
}

impl UploadTarget {
    /// Creates a target with default metadata.
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
            if_generation_match: None,
            metadata: ObjectMetadata::default(),
        }
    }

    /// Stable identifier used to key the persisted resume record.
    pub fn record_key(&self) -> String {
        format!("{}/{}", self.bucket, self.object)
    }
}

/// Object metadata serialized as the initiation request body.
///
/// `extra` carries any provider-specific fields verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Byte-exact prefix of the first chunk sent for a session uri.
///
/// Holds the first `min(16, len)` bytes of the chunk. Persisted hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    /// Computes the fingerprint of the first chunk of a stream.
    pub fn of_first_chunk(data: &[u8]) -> Self {
        Self(data[..data.len().min(FINGERPRINT_LEN)].to_vec())
    }

    /// Returns `true` if `data` begins with the same fingerprint prefix.
    pub fn matches(&self, data: &[u8]) -> bool {
        *self == Self::of_first_chunk(data)
    }

    /// Hex encoding used in the persisted record.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Parses the hex encoding produced by [`Fingerprint::to_hex`].
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self(hex::decode(s)?))
    }

    /// Raw fingerprint bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Persisted cross-process record of a resumable session.
///
/// Created on the first successful initiation (fingerprint still absent),
/// completed when the first chunk is observed, deleted on terminal success
/// or on a content-mismatch restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRecord {
    pub session_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
}
