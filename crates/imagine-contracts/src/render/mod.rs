mod export;
mod gallery;
mod preview;

pub use export::{export_history, ExportFormat};
pub use gallery::{render_gallery_html, render_gallery_page, render_gallery_text, render_stats_text};
pub use preview::{PreviewInput, PreviewOverlay};
