//! JSON-backed state store for the frame catalog.
//!
//! The whole application state lives in a single document that is read,
//! mutated, and rewritten as one unit. A process-wide mutex serializes
//! transactions; the lock is held for the full load-mutate-save span so two
//! writers can never interleave partial updates. Schema compatibility is
//! handled in exactly one place: [`normalize`], which runs on every load.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::de::{Deserializer, Error as DeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

pub const DEFAULT_ROTATION_SECONDS: u64 = 300;
pub const DEFAULT_DISPLAY_WIDTH: u32 = 600;
pub const DEFAULT_DISPLAY_HEIGHT: u32 = 448;

pub const MIN_ROTATION_SECONDS: u64 = 10;
pub const MIN_DISPLAY_DIMENSION: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "Settings::default_rotation_seconds")]
    pub rotation_seconds: u64,
    #[serde(default = "Settings::default_display_width")]
    pub display_width: u32,
    #[serde(default = "Settings::default_display_height")]
    pub display_height: u32,
}

impl Settings {
    fn default_rotation_seconds() -> u64 {
        DEFAULT_ROTATION_SECONDS
    }

    fn default_display_width() -> u32 {
        DEFAULT_DISPLAY_WIDTH
    }

    fn default_display_height() -> u32 {
        DEFAULT_DISPLAY_HEIGHT
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rotation_seconds: Self::default_rotation_seconds(),
            display_width: Self::default_display_width(),
            display_height: Self::default_display_height(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Pending,
    Ready,
}

/// One catalog entry. `order` ranks ready images only; pending records keep
/// it (and `processed_path`/`mode`) as `None` until the crop step promotes
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub original_path: String,
    #[serde(default)]
    pub processed_path: Option<String>,
    #[serde(default, deserialize_with = "status_or_none")]
    pub status: Option<ImageStatus>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ImageRecord {
    pub fn is_ready(&self) -> bool {
        self.status == Some(ImageStatus::Ready)
    }

    pub fn is_pending(&self) -> bool {
        self.status == Some(ImageStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerCursor {
    /// Index into the ready list (sorted by `order`) of the image shown
    /// last; `-1` means the rotation has not started yet.
    #[serde(default = "SchedulerCursor::not_started")]
    pub last_index: i64,
}

impl SchedulerCursor {
    fn not_started() -> i64 {
        -1
    }
}

impl Default for SchedulerCursor {
    fn default() -> Self {
        Self {
            last_index: Self::not_started(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default, deserialize_with = "images_or_empty")]
    pub images: Vec<ImageRecord>,
    #[serde(default)]
    pub scheduler: SchedulerCursor,
}

impl Document {
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings,
            images: Vec::new(),
            scheduler: SchedulerCursor::default(),
        }
    }

    /// Indexes of ready records sorted by `order` (stable, so records with
    /// equal or missing `order` keep their relative position).
    pub fn ready_indexes_sorted(&self) -> Vec<usize> {
        let mut indexes: Vec<usize> = self
            .images
            .iter()
            .enumerate()
            .filter(|(_, image)| image.is_ready())
            .map(|(index, _)| index)
            .collect();
        indexes.sort_by_key(|&index| self.images[index].order.unwrap_or(0));
        indexes
    }
}

/// Tolerate status values written by older schema versions: anything that is
/// not exactly `"pending"` or `"ready"` comes back as `None` and is derived
/// again during normalization.
fn status_or_none<'de, D>(deserializer: D) -> Result<Option<ImageStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(raw) => match raw.as_str() {
            "pending" => Some(ImageStatus::Pending),
            "ready" => Some(ImageStatus::Ready),
            _ => None,
        },
        _ => None,
    })
}

/// A document whose `images` field is not an array loses it (empty catalog);
/// an array whose entries cannot be parsed is corrupt and fails the load.
fn images_or_empty<'de, D>(deserializer: D) -> Result<Vec<ImageRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(DeError::custom))
            .collect(),
        _ => Ok(Vec::new()),
    }
}

/// Repair a freshly loaded document so the catalog invariants hold. Pure and
/// idempotent; returns whether anything was corrected.
pub fn normalize(doc: &mut Document) -> bool {
    let mut changed = false;

    let settings = &mut doc.settings;
    if settings.rotation_seconds < MIN_ROTATION_SECONDS {
        settings.rotation_seconds = MIN_ROTATION_SECONDS;
        changed = true;
    }
    if settings.display_width < MIN_DISPLAY_DIMENSION {
        settings.display_width = MIN_DISPLAY_DIMENSION;
        changed = true;
    }
    if settings.display_height < MIN_DISPLAY_DIMENSION {
        settings.display_height = MIN_DISPLAY_DIMENSION;
        changed = true;
    }

    for image in &mut doc.images {
        let status = match image.status {
            Some(status) => status,
            None => {
                // Legacy records carry no status; a processed asset means
                // the crop step already ran.
                let derived = if image.processed_path.is_some() {
                    ImageStatus::Ready
                } else {
                    ImageStatus::Pending
                };
                image.status = Some(derived);
                changed = true;
                derived
            }
        };

        match status {
            ImageStatus::Ready => {
                if image.mode.is_none() {
                    image.mode = Some("manual".to_string());
                    changed = true;
                }
            }
            ImageStatus::Pending => {
                if image.order.is_some() {
                    image.order = None;
                    changed = true;
                }
            }
        }
    }

    let ready = doc.ready_indexes_sorted();
    for (rank, &index) in ready.iter().enumerate() {
        let rank = rank as u32;
        if doc.images[index].order != Some(rank) {
            doc.images[index].order = Some(rank);
            changed = true;
        }
    }

    if doc.scheduler.last_index >= ready.len() as i64 {
        doc.scheduler.last_index = -1;
        changed = true;
    }

    changed
}

/// Owns the backing file and the transaction lock. Construct one per process
/// and share it via `Arc`; all catalog operations and the rotation task go
/// through the same instance.
#[derive(Debug)]
pub struct StateStore {
    state_file: PathBuf,
    defaults: Settings,
    lock: Mutex<()>,
}

impl StateStore {
    pub fn new(state_file: impl Into<PathBuf>, defaults: Settings) -> Self {
        Self {
            state_file: state_file.into(),
            defaults,
            lock: Mutex::new(()),
        }
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Load the document, creating it with defaults when the file is absent
    /// and rewriting it when normalization corrected anything. A file that
    /// does not parse is a hard error; it is never overwritten.
    pub fn load(&self) -> Result<Document> {
        let _guard = self.guard()?;
        self.load_locked()
    }

    pub fn save(&self, doc: &Document) -> Result<()> {
        let _guard = self.guard()?;
        self.save_locked(doc)
    }

    /// Read-only transaction: load under the lock and hand the document to
    /// the closure.
    pub fn read<T>(&self, f: impl FnOnce(&Document) -> T) -> Result<T> {
        let _guard = self.guard()?;
        let doc = self.load_locked()?;
        Ok(f(&doc))
    }

    /// Read-modify-write transaction. The lock is held across the whole
    /// span, and the document is written back only if the closure changed
    /// it, so failed operations leave the file untouched.
    pub fn update<T>(&self, f: impl FnOnce(&mut Document) -> T) -> Result<T> {
        let _guard = self.guard()?;
        let mut doc = self.load_locked()?;
        let before = doc.clone();
        let out = f(&mut doc);
        if doc != before {
            self.save_locked(&doc)?;
        }
        Ok(out)
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| anyhow!("state store lock poisoned"))
    }

    fn load_locked(&self) -> Result<Document> {
        if !self.state_file.exists() {
            let doc = Document::with_settings(self.defaults.clone());
            self.save_locked(&doc)?;
            info!(path = %self.state_file.display(), "created default state document");
            return Ok(doc);
        }

        let raw = fs::read_to_string(&self.state_file)
            .with_context(|| format!("failed to read {}", self.state_file.display()))?;
        let mut doc: Document = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.state_file.display()))?;

        normalize(&mut doc);
        let canonical = to_canonical_json(&doc)?;
        if canonical != raw {
            self.save_locked(&doc)?;
            debug!(path = %self.state_file.display(), "rewrote normalized state document");
        }
        Ok(doc)
    }

    fn save_locked(&self, doc: &Document) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = to_canonical_json(doc)?;
        // Write to a sibling and rename so an interrupted write never leaves
        // a torn document behind.
        let tmp = self.state_file.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.state_file)
            .with_context(|| format!("failed to replace {}", self.state_file.display()))?;
        Ok(())
    }
}

fn to_canonical_json(doc: &Document) -> Result<String> {
    serde_json::to_string_pretty(doc).context("failed to serialize state document")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ready(id: &str, order: Option<u32>) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            name: format!("image-{id}"),
            original_path: format!("data/images/originals/{id}.jpg"),
            processed_path: Some(format!("data/images/processed/{id}.png")),
            status: Some(ImageStatus::Ready),
            mode: Some("fit_crop".to_string()),
            order,
            created_at: None,
        }
    }

    #[test]
    fn missing_file_creates_default_document() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"), Settings::default());
        let doc = store.load().expect("load");
        assert!(doc.images.is_empty());
        assert_eq!(doc.scheduler.last_index, -1);
        assert_eq!(doc.settings.rotation_seconds, DEFAULT_ROTATION_SECONDS);
        assert!(store.state_file().exists());
    }

    #[test]
    fn corrupt_file_is_fatal_and_left_alone() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").expect("write");
        let store = StateStore::new(&path, Settings::default());
        assert!(store.load().is_err());
        assert_eq!(fs::read_to_string(&path).expect("read"), "{not json");
    }

    #[test]
    fn legacy_document_is_backfilled() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{
  "images": [
    {"id": "a", "name": "a.jpg", "original_path": "o/a.jpg",
     "processed_path": "p/a.png"},
    {"id": "b", "name": "b.jpg", "original_path": "o/b.jpg", "order": 3}
  ]
}"#,
        )
        .expect("write");

        let store = StateStore::new(&path, Settings::default());
        let doc = store.load().expect("load");

        assert_eq!(doc.settings.rotation_seconds, DEFAULT_ROTATION_SECONDS);
        assert_eq!(doc.settings.display_width, DEFAULT_DISPLAY_WIDTH);
        assert_eq!(doc.scheduler.last_index, -1);

        let a = &doc.images[0];
        assert!(a.is_ready());
        assert_eq!(a.mode.as_deref(), Some("manual"));
        assert_eq!(a.order, Some(0));

        // No processed asset means the record is still pending, and pending
        // records never carry an order.
        let b = &doc.images[1];
        assert!(b.is_pending());
        assert_eq!(b.mode, None);
        assert_eq!(b.order, None);

        // The corrected document was persisted.
        let reread: Document =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(reread, doc);
    }

    #[test]
    fn non_array_images_field_is_dropped() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"images": "oops"}"#).expect("write");
        let store = StateStore::new(&path, Settings::default());
        let doc = store.load().expect("load");
        assert!(doc.images.is_empty());
    }

    #[test]
    fn unknown_status_is_rederived() {
        let mut doc = Document::with_settings(Settings::default());
        doc.images.push(ImageRecord {
            status: None,
            ..ready("a", Some(0))
        });
        assert!(normalize(&mut doc));
        assert!(doc.images[0].is_ready());
    }

    #[test]
    fn normalize_recomputes_dense_order_with_stable_ties() {
        let mut doc = Document::with_settings(Settings::default());
        doc.images.push(ready("a", Some(7)));
        doc.images.push(ready("b", None));
        doc.images.push(ready("c", Some(7)));
        assert!(normalize(&mut doc));

        // b has no order (treated as 0) and sorts first; a and c tie at 7
        // and keep their original relative positions.
        assert_eq!(doc.images[0].order, Some(1)); // a
        assert_eq!(doc.images[1].order, Some(0)); // b
        assert_eq!(doc.images[2].order, Some(2)); // c
    }

    #[test]
    fn normalize_clamps_out_of_range_cursor() {
        let mut doc = Document::with_settings(Settings::default());
        doc.images.push(ready("a", Some(0)));
        doc.scheduler.last_index = 1;
        assert!(normalize(&mut doc));
        assert_eq!(doc.scheduler.last_index, -1);

        doc.scheduler.last_index = 0;
        assert!(!normalize(&mut doc));
    }

    #[test]
    fn normalize_clamps_settings_minimums() {
        let mut doc = Document::with_settings(Settings {
            rotation_seconds: 3,
            display_width: 10,
            display_height: 10,
        });
        assert!(normalize(&mut doc));
        assert_eq!(doc.settings.rotation_seconds, MIN_ROTATION_SECONDS);
        assert_eq!(doc.settings.display_width, MIN_DISPLAY_DIMENSION);
        assert_eq!(doc.settings.display_height, MIN_DISPLAY_DIMENSION);
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut doc = Document::with_settings(Settings::default());
        doc.images.push(ready("a", None));
        doc.images.push(ready("b", Some(5)));
        assert!(normalize(&mut doc));
        assert!(!normalize(&mut doc));
    }

    #[test]
    fn save_then_load_is_a_no_op() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"), Settings::default());
        let mut doc = store.load().expect("load");
        doc.images.push(ready("a", Some(0)));
        store.save(&doc).expect("save");

        let before = fs::read_to_string(store.state_file()).expect("read");
        let reloaded = store.load().expect("reload");
        let after = fs::read_to_string(store.state_file()).expect("read");
        assert_eq!(reloaded, doc);
        assert_eq!(before, after);
    }

    #[test]
    fn update_skips_write_when_unchanged() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"), Settings::default());
        store.load().expect("load");

        let before = fs::metadata(store.state_file()).expect("meta").modified();
        let count = store.update(|doc| doc.images.len()).expect("update");
        assert_eq!(count, 0);
        let after = fs::metadata(store.state_file()).expect("meta").modified();
        assert_eq!(before.ok(), after.ok());
    }
}
