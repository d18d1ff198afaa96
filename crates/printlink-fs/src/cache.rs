//! Sidecar metadata cache for g-code files.
//!
//! Extracting metadata (thumbnails, slicer headers) is expensive on slow
//! media, so results are cached next to the file as `.<basename>.cache`,
//! keyed by `(absolute_path, m_timestamp, size)`. A stale or unreadable
//! sidecar is treated as absent and re-extraction runs. Extraction is
//! delegated to the embedder through [`MetadataExtractor`]; the SDK ships
//! no slicer parsers of its own.

use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use printlink_io::StorageBackend;

/// Metadata extracted from one g-code file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Estimated print time, seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_print_time: Option<i64>,
    /// Layer height, mm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_height: Option<f64>,
    /// Filament material name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    /// Nozzle diameter the file was sliced for, mm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nozzle_diameter: Option<f64>,
    /// Preview thumbnail, PNG bytes (base64 in the sidecar).
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "ser_base64",
        deserialize_with = "de_base64",
        default
    )]
    pub thumbnail_png: Option<Vec<u8>>,
    /// Slicer-specific fields the SDK passes through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn ser_base64<S: serde::Serializer>(
    bytes: &Option<Vec<u8>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(b) => serializer.serialize_some(&BASE64.encode(b)),
        None => serializer.serialize_none(),
    }
}

fn de_base64<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Vec<u8>>, D::Error> {
    let text: Option<String> = Option::deserialize(deserializer)?;
    match text {
        Some(t) => BASE64
            .decode(t)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

impl MetadataRecord {
    /// True when extraction yielded nothing worth caching.
    pub fn is_empty(&self) -> bool {
        *self == MetadataRecord::default()
    }
}

/// Pluggable g-code metadata extraction.
///
/// Implementations parse slicer headers, embedded thumbnails, and whatever
/// else the printer model understands. An error means "no metadata", never
/// a failed operation.
pub trait MetadataExtractor: Send + Sync {
    /// Extracts metadata from the file at `physical`.
    fn extract(&self, physical: &Path) -> Result<MetadataRecord, String>;
}

/// The cache key: identity of the file version the record describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CacheKey {
    path: PathBuf,
    m_timestamp: i64,
    size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    key: CacheKey,
    record: MetadataRecord,
}

/// Lazy sidecar-file cache in front of a [`MetadataExtractor`].
pub struct MetadataCache {
    backend: Arc<dyn StorageBackend>,
    extractor: Arc<dyn MetadataExtractor>,
}

impl MetadataCache {
    pub fn new(backend: Arc<dyn StorageBackend>, extractor: Arc<dyn MetadataExtractor>) -> Self {
        Self { backend, extractor }
    }

    /// Sidecar path for a file: `.<basename>.cache` next to it.
    pub fn sidecar_path(physical: &Path) -> PathBuf {
        let basename = physical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        physical.with_file_name(format!(".{basename}.cache"))
    }

    /// Returns the metadata of a file version, extracting on miss.
    ///
    /// An empty extraction result writes no sidecar and returns `None`;
    /// extraction failure is logged and returns `None`.
    pub fn lookup(&self, physical: &Path, m_timestamp: i64, size: u64) -> Option<MetadataRecord> {
        let key = CacheKey {
            path: physical.to_path_buf(),
            m_timestamp,
            size,
        };
        if let Some(record) = self.read_sidecar(physical, &key) {
            return Some(record);
        }

        let record = match self.extractor.extract(physical) {
            Ok(record) => record,
            Err(err) => {
                warn!(path = %physical.display(), %err, "metadata extraction failed");
                return None;
            }
        };
        if record.is_empty() {
            debug!(path = %physical.display(), "extraction yielded nothing; not caching");
            return None;
        }
        self.write_sidecar(physical, &key, &record);
        Some(record)
    }

    /// Drops the sidecar of a file (called on modify and delete).
    pub fn invalidate(&self, physical: &Path) {
        let sidecar = Self::sidecar_path(physical);
        match self.backend.unlink(&sidecar) {
            Ok(()) => debug!(path = %physical.display(), "metadata cache invalidated"),
            Err(err) if err.is_not_found() => {}
            Err(err) => warn!(path = %sidecar.display(), %err, "cache unlink failed"),
        }
    }

    fn read_sidecar(&self, physical: &Path, key: &CacheKey) -> Option<MetadataRecord> {
        let sidecar = Self::sidecar_path(physical);
        let mut reader = self.backend.open_read(&sidecar).ok()?;
        let mut text = String::new();
        reader.read_to_string(&mut text).ok()?;
        let parsed: Sidecar = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(path = %sidecar.display(), %err, "unreadable sidecar; re-extracting");
                return None;
            }
        };
        if parsed.key != *key {
            debug!(path = %physical.display(), "stale sidecar");
            return None;
        }
        Some(parsed.record)
    }

    fn write_sidecar(&self, physical: &Path, key: &CacheKey, record: &MetadataRecord) {
        let sidecar = Self::sidecar_path(physical);
        let body = Sidecar {
            key: key.clone(),
            record: record.clone(),
        };
        let text = match serde_json::to_vec(&body) {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, "sidecar serialization failed");
                return;
            }
        };
        let result = self.backend.open_write(&sidecar).and_then(|mut w| {
            w.write_all(&text)?;
            Ok(())
        });
        if let Err(err) = result {
            warn!(path = %sidecar.display(), %err, "sidecar write failed");
        }
    }
}
