use flate2::read::GzDecoder;
use helmwatch_core::ReleaseRecord;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use std::{collections::BTreeMap, io::Read};

/// The secret type Helm assigns to release storage secrets.
pub const SECRET_TYPE: &str = "helm.sh/release.v1";

/// The label value marking an object as Helm-owned.
pub const OWNER: &str = "helm";

/// The prefix of release storage secret names.
const SECRET_KEY_PREFIX: &str = "sh.helm.release.v1.";

/// The key under which Helm stores the encoded release.
const PAYLOAD_KEY: &str = "release";

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

/// A backing-store object that may hold a Helm release record.
///
/// Implemented for the two storage drivers Helm supports in-cluster. An
/// object qualifies only if it carries the driver's Helm marker and a release
/// name label.
pub trait ReleaseObject:
    kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
    + serde::de::DeserializeOwned
    + Clone
    + std::fmt::Debug
    + Send
    + Sync
    + 'static
{
    /// Extracts the release snapshot from the object's labels.
    fn release(&self) -> Option<ReleaseRecord>;

    /// The base64 text of the stored release payload.
    fn payload(&self) -> Option<&[u8]>;

    /// Parses a storage object name into a release name and revision.
    fn parse_key(key: &str) -> Option<(String, u64)>;
}

/// The decoded release payload.
///
/// Helm stores the full release object; only the fields the pipeline reads
/// are decoded.
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct ReleasePayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub manifest: String,
}

/// Indicates a release payload that could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid gzip: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("invalid release document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decodes a stored release payload: base64 text wrapping an optionally
/// gzipped JSON document.
pub fn decode_payload(encoded: &[u8]) -> Result<ReleasePayload, PayloadError> {
    use base64::{engine::general_purpose::STANDARD, Engine};

    let raw = STANDARD.decode(encoded)?;
    let json = if raw.starts_with(&GZIP_MAGIC) {
        let mut buf = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut buf)
            .map_err(PayloadError::Gzip)?;
        buf
    } else {
        raw
    };

    Ok(serde_json::from_slice(&json)?)
}

fn release_from_labels(labels: &BTreeMap<String, String>) -> Option<ReleaseRecord> {
    let name = labels.get("name")?;
    let status = labels.get("status").map(String::as_str).unwrap_or_default();
    let version = labels
        .get("version")
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    Some(ReleaseRecord::new(name.as_str(), status, version))
}

fn parse_versioned(key: &str) -> Option<(String, u64)> {
    let (name, version) = key.rsplit_once(".v")?;
    if name.is_empty() {
        return None;
    }
    let version = version.parse().ok()?;
    Some((name.to_string(), version))
}

// === impl Secret ===

impl ReleaseObject for Secret {
    fn release(&self) -> Option<ReleaseRecord> {
        if self.type_.as_deref() != Some(SECRET_TYPE) {
            return None;
        }
        release_from_labels(self.labels())
    }

    fn payload(&self) -> Option<&[u8]> {
        let data = self.data.as_ref()?.get(PAYLOAD_KEY)?;
        Some(&data.0)
    }

    fn parse_key(key: &str) -> Option<(String, u64)> {
        parse_versioned(key.strip_prefix(SECRET_KEY_PREFIX)?)
    }
}

// === impl ConfigMap ===

impl ReleaseObject for ConfigMap {
    fn release(&self) -> Option<ReleaseRecord> {
        if self.labels().get("owner").map(String::as_str) != Some(OWNER) {
            return None;
        }
        release_from_labels(self.labels())
    }

    fn payload(&self) -> Option<&[u8]> {
        self.data.as_ref()?.get(PAYLOAD_KEY).map(String::as_bytes)
    }

    fn parse_key(key: &str) -> Option<(String, u64)> {
        parse_versioned(key)
    }
}
