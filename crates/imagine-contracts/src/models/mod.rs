mod aspect;
mod record;

pub use aspect::{AspectRatio, QuickPreset, QUICK_PRESETS};
pub use record::{EditMode, ImageRecord};
