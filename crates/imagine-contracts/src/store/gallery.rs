use serde_json::Value;

use super::kv::KvStore;
use crate::events::{ChangeEvent, EventBus};
use crate::models::ImageRecord;

pub const IMAGES_KEY: &str = "imagine2api_images";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    AlreadyEmpty,
    Cleared(usize),
}

/// Newest-first collection of generated images, persisted in full on every change.
///
/// Removal and clearing are expected to be confirmed by the caller first.
#[derive(Debug)]
pub struct GalleryStore {
    records: Vec<ImageRecord>,
    kv: KvStore,
    bus: EventBus,
}

impl GalleryStore {
    /// Rows that do not parse as a record are skipped one by one; the rest load.
    pub fn load(kv: KvStore, bus: EventBus) -> Self {
        let rows = match kv.get::<Vec<Value>>(IMAGES_KEY) {
            Ok(rows) => rows.unwrap_or_default(),
            Err(err) => {
                tracing::warn!("gallery could not be loaded, starting empty: {err:#}");
                Vec::new()
            }
        };
        let records = rows
            .into_iter()
            .enumerate()
            .filter_map(|(index, row)| match serde_json::from_value::<ImageRecord>(row) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::warn!(index, "skipping unreadable gallery record: {err}");
                    None
                }
            })
            .collect();
        Self { records, kv, bus }
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ImageRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn append(&mut self, record: ImageRecord) -> anyhow::Result<()> {
        self.records.insert(0, record);
        self.commit()
    }

    /// Prepends each record in turn, so the last one ends up first.
    pub fn append_all(&mut self, records: Vec<ImageRecord>) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            self.records.insert(0, record);
        }
        self.commit()
    }

    /// Returns `false` when no record carried `id`.
    pub fn remove(&mut self, id: &str) -> anyhow::Result<bool> {
        let before = self.records.len();
        self.records.retain(|record| record.id != id);
        if self.records.len() == before {
            return Ok(false);
        }
        self.commit()?;
        Ok(true)
    }

    pub fn clear(&mut self) -> anyhow::Result<ClearOutcome> {
        if self.records.is_empty() {
            return Ok(ClearOutcome::AlreadyEmpty);
        }
        let removed = self.records.len();
        self.records.clear();
        self.commit()?;
        Ok(ClearOutcome::Cleared(removed))
    }

    fn commit(&mut self) -> anyhow::Result<()> {
        self.bus.publish(ChangeEvent::GalleryChanged {
            count: self.records.len(),
        });
        self.kv.set(IMAGES_KEY, &self.records)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::{json, Value};

    use super::{ClearOutcome, GalleryStore, IMAGES_KEY};
    use crate::events::{ChangeEvent, EventBus};
    use crate::models::{AspectRatio, ImageRecord};
    use crate::store::KvStore;

    fn record(url: &str) -> ImageRecord {
        ImageRecord::new(url, "cat", AspectRatio::Square, None, 1.0)
    }

    #[test]
    fn append_prepends_newest_first() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut gallery = GalleryStore::load(KvStore::new(temp.path().join("s.json")), EventBus::new());
        gallery.append(record("http://x/1.jpg"))?;
        gallery.append(record("http://x/2.jpg"))?;
        gallery.append_all(vec![record("http://x/3.jpg"), record("http://x/4.jpg")])?;

        let urls: Vec<&str> = gallery.records().iter().map(|row| row.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["http://x/4.jpg", "http://x/3.jpg", "http://x/2.jpg", "http://x/1.jpg"]
        );
        Ok(())
    }

    #[test]
    fn append_then_remove_restores_state_and_storage() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let kv = KvStore::new(temp.path().join("s.json"));
        let mut gallery = GalleryStore::load(kv.clone(), EventBus::new());
        gallery.append(record("http://x/keep.jpg"))?;
        let before_records = gallery.records().to_vec();
        let before_disk = kv.get::<Value>(IMAGES_KEY)?;

        let added = record("http://x/temp.jpg");
        let id = added.id.clone();
        gallery.append(added)?;
        assert_eq!(gallery.len(), 2);
        assert!(gallery.remove(&id)?);

        assert_eq!(gallery.records(), before_records.as_slice());
        assert_eq!(kv.get::<Value>(IMAGES_KEY)?, before_disk);
        assert!(!gallery.remove(&id)?);
        Ok(())
    }

    #[test]
    fn clear_on_empty_is_a_no_op_without_writes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("s.json");
        let mut gallery = GalleryStore::load(KvStore::new(&path), EventBus::new());

        assert_eq!(gallery.clear()?, ClearOutcome::AlreadyEmpty);
        assert!(!path.exists());

        gallery.append(record("http://x/1.jpg"))?;
        assert_eq!(gallery.clear()?, ClearOutcome::Cleared(1));
        let written = std::fs::read_to_string(&path)?;

        assert_eq!(gallery.clear()?, ClearOutcome::AlreadyEmpty);
        assert_eq!(std::fs::read_to_string(&path)?, written);
        Ok(())
    }

    #[test]
    fn gallery_reloads_from_storage_and_publishes_changes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let kv = KvStore::new(temp.path().join("s.json"));
        let counts = Arc::new(Mutex::new(Vec::new()));
        let bus = EventBus::new();
        let sink = counts.clone();
        bus.subscribe(move |event| {
            if let ChangeEvent::GalleryChanged { count } = event {
                if let Ok(mut rows) = sink.lock() {
                    rows.push(*count);
                }
            }
        });

        let mut gallery = GalleryStore::load(kv.clone(), bus);
        let first = record("http://x/1.jpg");
        let id = first.id.clone();
        gallery.append(first)?;
        gallery.append(record("http://x/2.jpg"))?;
        gallery.remove(&id)?;

        let reloaded = GalleryStore::load(kv, EventBus::new());
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.records()[0].url, "http://x/2.jpg");
        assert!(reloaded.get(&id).is_none());
        assert_eq!(*counts.lock().unwrap(), vec![1, 2, 1]);
        Ok(())
    }

    #[test]
    fn corrupt_storage_loads_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("s.json");
        std::fs::write(&path, r#"{"imagine2api_images": "oops"}"#)?;

        let gallery = GalleryStore::load(KvStore::new(&path), EventBus::new());
        assert!(gallery.is_empty());
        Ok(())
    }

    #[test]
    fn unreadable_rows_are_skipped_and_the_rest_kept() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("s.json");
        let seeded = json!({
            "imagine2api_images": [
                {
                    "id": 1700000000001_i64,
                    "prompt": "edit without url",
                    "aspectRatio": "1:1",
                    "timestamp": 1700000000001_i64,
                    "duration": 2.5,
                    "isImageToImage": true
                },
                {
                    "id": 1700000000000_i64,
                    "url": "http://x/keep.jpg",
                    "prompt": "cat",
                    "aspectRatio": "2:3",
                    "timestamp": 1700000000000_i64,
                    "duration": 1.0
                }
            ]
        });
        std::fs::write(&path, serde_json::to_string(&seeded)?)?;
        let kv = KvStore::new(&path);

        let mut gallery = GalleryStore::load(kv.clone(), EventBus::new());
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.records()[0].url, "http://x/keep.jpg");
        assert_eq!(gallery.records()[0].id, "1700000000000");

        gallery.append(record("http://x/new.jpg"))?;
        let stored = kv.get::<Vec<ImageRecord>>(IMAGES_KEY)?.unwrap_or_default();
        let urls: Vec<&str> = stored.iter().map(|row| row.url.as_str()).collect();
        assert_eq!(urls, vec!["http://x/new.jpg", "http://x/keep.jpg"]);
        Ok(())
    }
}
