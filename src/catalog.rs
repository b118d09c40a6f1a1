//! Image catalog: every operation is one store transaction (load, mutate,
//! save under the store's lock), so callers always observe a serializable
//! ordering. Unknown ids and bad reorder payloads come back as plain `bool`
//! results; only storage failures bubble up as errors.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::files::AssetStore;
use crate::store::{
    Document, ImageRecord, ImageStatus, MIN_DISPLAY_DIMENSION, MIN_ROTATION_SECONDS, StateStore,
};

/// What the upload collaborator hands over; the catalog fills in the rest.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub id: String,
    pub name: String,
    pub original_path: String,
}

impl NewImage {
    /// Mint a draft with a fresh id for an uploaded original.
    pub fn draft(name: impl Into<String>, original_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            original_path: original_path.into(),
        }
    }
}

#[derive(Clone)]
pub struct Catalog {
    store: Arc<StateStore>,
    assets: Arc<AssetStore>,
}

impl Catalog {
    pub fn new(store: Arc<StateStore>, assets: Arc<AssetStore>) -> Self {
        Self { store, assets }
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    /// Resolve a document-relative asset path to an absolute one.
    pub fn resolve_asset(&self, path: &str) -> PathBuf {
        self.assets.resolve(path)
    }

    /// Append an uploaded image in the pending (uncropped) phase.
    pub fn add_pending(&self, draft: NewImage) -> Result<ImageRecord> {
        let record = ImageRecord {
            name: if draft.name.trim().is_empty() {
                format!("image-{}", draft.id)
            } else {
                draft.name
            },
            id: draft.id,
            original_path: draft.original_path,
            processed_path: None,
            status: Some(ImageStatus::Pending),
            mode: None,
            order: None,
            created_at: Some(Utc::now()),
        };
        let stored = record.clone();
        self.store.update(move |doc| {
            doc.images.push(record);
        })?;
        info!(id = %stored.id, name = %stored.name, "added pending image");
        Ok(stored)
    }

    /// Pending images, first uploaded first.
    pub fn get_pending(&self) -> Result<Vec<ImageRecord>> {
        self.store.read(pending_sorted)
    }

    /// The pending image to crop after `current_id`: the first one when
    /// `current_id` is absent or unknown, the successor otherwise, `None`
    /// once the queue is exhausted.
    pub fn get_next_pending(&self, current_id: Option<&str>) -> Result<Option<ImageRecord>> {
        self.store.read(|doc| {
            let pending = pending_sorted(doc);
            let Some(current_id) = current_id else {
                return pending.first().cloned();
            };
            match pending.iter().position(|image| image.id == current_id) {
                Some(index) => pending.get(index + 1).cloned(),
                None => pending.first().cloned(),
            }
        })
    }

    /// Promote an image to the ready phase, appending it at the end of the
    /// display order. Re-marking an already-ready image (a re-crop) updates
    /// the processed asset and mode but keeps its slot.
    pub fn mark_ready(&self, id: &str, processed_path: &str, mode: &str) -> Result<bool> {
        let marked = self.store.update(|doc| {
            let other_ready = doc
                .images
                .iter()
                .filter(|image| image.is_ready() && image.id != id)
                .count() as u32;
            let Some(target) = doc.images.iter_mut().find(|image| image.id == id) else {
                return false;
            };
            if !target.is_ready() {
                target.order = Some(other_ready);
            }
            target.status = Some(ImageStatus::Ready);
            target.processed_path = Some(processed_path.to_string());
            target.mode = Some(mode.to_string());
            true
        })?;
        if marked {
            info!(id, mode, "marked image ready");
        } else {
            warn!(id, "mark_ready: unknown image id");
        }
        Ok(marked)
    }

    /// Ready images in display order.
    pub fn get_ready_sorted(&self) -> Result<Vec<ImageRecord>> {
        self.store.read(ready_sorted)
    }

    pub fn get(&self, id: &str) -> Result<Option<ImageRecord>> {
        self.store
            .read(|doc| doc.images.iter().find(|image| image.id == id).cloned())
    }

    /// Remove an image and its backing files, closing the gap it leaves in
    /// the display order. Asset deletion is best-effort; the record goes
    /// away regardless.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.store.update(|doc| {
            let Some(position) = doc.images.iter().position(|image| image.id == id) else {
                return None;
            };
            let target = doc.images.remove(position);
            compact_ready_order(doc);
            Some(target)
        })?;

        let Some(target) = removed else {
            warn!(id, "delete: unknown image id");
            return Ok(false);
        };

        for path in [Some(&target.original_path), target.processed_path.as_ref()]
            .into_iter()
            .flatten()
        {
            if path.is_empty() {
                continue;
            }
            if let Err(err) = self.assets.remove_best_effort(path) {
                warn!(id, path = %path, "failed to remove asset: {err:?}");
            }
        }
        info!(id, "deleted image");
        Ok(true)
    }

    /// Replace the display order. `ordered_ids` must be exactly the current
    /// ready ids — an extra, missing, or duplicate id rejects the whole
    /// request and leaves every order untouched.
    pub fn reorder(&self, ordered_ids: &[String]) -> Result<bool> {
        let applied = self.store.update(|doc| {
            let ready_ids: HashSet<&str> = doc
                .images
                .iter()
                .filter(|image| image.is_ready())
                .map(|image| image.id.as_str())
                .collect();
            let requested: HashSet<&str> = ordered_ids.iter().map(String::as_str).collect();
            if ordered_ids.len() != ready_ids.len() || requested != ready_ids {
                return false;
            }
            for image in &mut doc.images {
                if let Some(rank) = ordered_ids.iter().position(|id| *id == image.id) {
                    image.order = Some(rank as u32);
                }
            }
            true
        })?;
        if applied {
            info!(count = ordered_ids.len(), "reordered ready images");
        } else {
            warn!("reorder: ids do not match the current ready set");
        }
        Ok(applied)
    }

    pub fn rotation_seconds(&self) -> Result<u64> {
        self.store
            .read(|doc| doc.settings.rotation_seconds.max(MIN_ROTATION_SECONDS))
    }

    pub fn set_rotation_seconds(&self, seconds: u64) -> Result<()> {
        self.store.update(|doc| {
            doc.settings.rotation_seconds = seconds.max(MIN_ROTATION_SECONDS);
        })
    }

    pub fn display_size(&self) -> Result<(u32, u32)> {
        self.store.read(|doc| {
            (
                doc.settings.display_width.max(MIN_DISPLAY_DIMENSION),
                doc.settings.display_height.max(MIN_DISPLAY_DIMENSION),
            )
        })
    }

    pub fn set_display_size(&self, width: u32, height: u32) -> Result<()> {
        self.store.update(|doc| {
            doc.settings.display_width = width.max(MIN_DISPLAY_DIMENSION);
            doc.settings.display_height = height.max(MIN_DISPLAY_DIMENSION);
        })
    }

    /// The rotation transaction: advance the cursor one step over the ready
    /// list (wrapping) and return the image now under it. An empty ready
    /// list parks the cursor at -1.
    pub fn get_and_advance_next_image(&self) -> Result<Option<ImageRecord>> {
        self.store.update(|doc| {
            let ready = ready_sorted(doc);
            if ready.is_empty() {
                doc.scheduler.last_index = -1;
                return None;
            }
            let next_index = (doc.scheduler.last_index + 1).rem_euclid(ready.len() as i64);
            doc.scheduler.last_index = next_index;
            let image = ready[next_index as usize].clone();
            debug!(index = next_index, id = %image.id, "advanced rotation cursor");
            Some(image)
        })
    }
}

fn pending_sorted(doc: &Document) -> Vec<ImageRecord> {
    let mut pending: Vec<ImageRecord> = doc
        .images
        .iter()
        .filter(|image| image.is_pending())
        .cloned()
        .collect();
    pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    pending
}

fn ready_sorted(doc: &Document) -> Vec<ImageRecord> {
    doc.ready_indexes_sorted()
        .into_iter()
        .map(|index| doc.images[index].clone())
        .collect()
}

/// Re-rank the remaining ready images densely and clamp the rotation cursor
/// if it now points past the end.
fn compact_ready_order(doc: &mut Document) {
    let ready = doc.ready_indexes_sorted();
    for (rank, &index) in ready.iter().enumerate() {
        doc.images[index].order = Some(rank as u32);
    }
    if doc.scheduler.last_index >= ready.len() as i64 {
        doc.scheduler.last_index = -1;
    }
}
