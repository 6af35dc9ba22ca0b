mod gallery;
mod kv;
mod stats;

pub use gallery::{ClearOutcome, GalleryStore, IMAGES_KEY};
pub use kv::KvStore;
pub use stats::{Stats, StatsTracker, STATS_KEY};
