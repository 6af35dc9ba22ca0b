use std::path::PathBuf;

use imagine_contracts::events::{ChangeEvent, EventBus, Notice};
use imagine_contracts::models::ImageRecord;
use imagine_contracts::store::{ClearOutcome, GalleryStore, KvStore, Stats, StatsTracker};

use crate::dispatcher::{Dispatcher, GenerationRequest};
use crate::error::DispatchError;
use crate::transport::Transport;

/// One client session: dispatcher, gallery and stats sharing an [`EventBus`].
///
/// Gallery and stats are loaded from `state_path` once, at construction, and
/// written back in full after each change. Clearing the gallery leaves the
/// stats alone.
pub struct Studio<T: Transport> {
    dispatcher: Dispatcher<T>,
    gallery: GalleryStore,
    stats: StatsTracker,
    bus: EventBus,
    state_path: PathBuf,
}

impl<T: Transport> Studio<T> {
    pub fn open(transport: T, model: impl Into<String>, state_path: impl Into<PathBuf>) -> Self {
        Self::with_bus(transport, model, state_path, EventBus::new())
    }

    pub fn with_bus(
        transport: T,
        model: impl Into<String>,
        state_path: impl Into<PathBuf>,
        bus: EventBus,
    ) -> Self {
        let state_path = state_path.into();
        let kv = KvStore::new(&state_path);
        Self {
            dispatcher: Dispatcher::new(transport, model, bus.clone()),
            gallery: GalleryStore::load(kv.clone(), bus.clone()),
            stats: StatsTracker::load(kv, bus.clone()),
            bus,
            state_path,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn state_path(&self) -> &std::path::Path {
        &self.state_path
    }

    pub fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }

    pub fn gallery(&self) -> &GalleryStore {
        &self.gallery
    }

    pub fn stats(&self) -> Stats {
        self.stats.stats()
    }

    /// Dispatches `request` and applies its side effects: on success the
    /// records are prepended to the gallery and counted; on a failed call one
    /// failure is counted. Rejected requests change nothing but still notify.
    pub fn submit(&mut self, request: &GenerationRequest) -> Result<Vec<ImageRecord>, DispatchError> {
        let is_edit = request.is_edit();
        match self.dispatcher.dispatch(request) {
            Ok(outcome) => {
                let count = outcome.records.len();
                if let Err(err) = self.gallery.append_all(outcome.records.clone()) {
                    tracing::error!("failed to persist gallery: {err:#}");
                }
                if let Err(err) = self.stats.record_success(count as u64, outcome.duration) {
                    tracing::error!("failed to persist stats: {err:#}");
                }
                let message = if is_edit {
                    "Edit succeeded".to_string()
                } else {
                    format!("Generated {count} image(s)")
                };
                self.notify(Notice::success(message));
                Ok(outcome.records)
            }
            Err(err) => {
                if err.counts_as_failure() {
                    if let Err(persist_err) = self.stats.record_failure() {
                        tracing::error!("failed to persist stats: {persist_err:#}");
                    }
                    let action = if is_edit { "Edit" } else { "Generation" };
                    tracing::warn!(status = ?err.status(), "{action} failed: {err}");
                    self.notify(Notice::error(format!("{action} failed: {err}")));
                } else {
                    self.notify(Notice::error(err.to_string()));
                }
                Err(err)
            }
        }
    }

    /// Call only after the user confirmed the deletion.
    pub fn remove(&mut self, id: &str) -> anyhow::Result<bool> {
        let removed = self.gallery.remove(id)?;
        if removed {
            self.notify(Notice::success("Deleted"));
        } else {
            self.notify(Notice::error(format!("No image with id {id}")));
        }
        Ok(removed)
    }

    /// Call only after the user confirmed; an empty gallery is reported and left untouched.
    pub fn clear(&mut self) -> anyhow::Result<ClearOutcome> {
        let outcome = self.gallery.clear()?;
        match outcome {
            ClearOutcome::AlreadyEmpty => self.notify(Notice::error("No images to clear")),
            ClearOutcome::Cleared(count) => {
                self.notify(Notice::success(format!("Cleared {count} image(s)")))
            }
        }
        Ok(outcome)
    }

    fn notify(&self, notice: Notice) {
        self.bus.publish(ChangeEvent::Notice(notice));
    }
}
