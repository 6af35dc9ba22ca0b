use chrono::{DateTime, SecondsFormat};

use crate::models::ImageRecord;
use crate::store::Stats;

const EMPTY_STATE_HTML: &str = r#"<div class="empty-state">
  <h3>No images yet</h3>
  <p>Enter a prompt to start creating.</p>
</div>"#;

/// Grid markup for the gallery. Pure: derived only from the records.
pub fn render_gallery_html(records: &[ImageRecord]) -> String {
    if records.is_empty() {
        return EMPTY_STATE_HTML.to_string();
    }
    records
        .iter()
        .map(render_item_html)
        .collect::<Vec<String>>()
        .join("\n")
}

fn render_item_html(record: &ImageRecord) -> String {
    let id = escape_html(&record.id);
    let url = escape_html(&record.url);
    let prompt = escape_html(&record.prompt);
    let badge = match record.mode {
        Some(mode) => format!(r#"<span class="badge">{mode}</span>"#),
        None => String::new(),
    };
    format!(
        r#"<div class="gallery-item" data-id="{id}">
  <img src="{url}" alt="{prompt}" loading="lazy" data-preview="{url}">
  <div class="gallery-item-info">
    <div class="gallery-item-prompt" title="{prompt}">{prompt}</div>{badge}
    <div class="gallery-item-actions">
      <a class="download-btn" href="{url}" download>Download</a>
      <button class="delete-btn" data-delete="{id}">Delete</button>
    </div>
  </div>
</div>"#
    )
}

const PAGE_STYLE: &str = r#"<style>
.modal { display: none; position: fixed; inset: 0; background: rgba(0, 0, 0, 0.85); align-items: center; justify-content: center; }
.modal.active { display: flex; }
.modal img { max-width: 90vw; max-height: 90vh; }
.modal-close { position: absolute; top: 16px; right: 24px; color: #fff; font-size: 32px; cursor: pointer; }
.gallery-item img { cursor: zoom-in; }
</style>"#;

/// Overlay and delete wiring. Mirrors [`PreviewOverlay`](super::PreviewOverlay):
/// a thumbnail opens it; the close control, a click outside the image and
/// Escape close it; a click on the image keeps it open.
const PAGE_SCRIPT: &str = r#"<script>
(function () {
  const modal = document.getElementById('modal');
  const modalImage = document.getElementById('modalImage');
  const close = () => modal.classList.remove('active');
  document.querySelectorAll('[data-preview]').forEach((img) => {
    img.addEventListener('click', () => {
      modalImage.src = img.dataset.preview;
      modal.classList.add('active');
    });
  });
  document.getElementById('modalClose').addEventListener('click', close);
  modal.addEventListener('click', (e) => {
    if (e.target === modal) {
      close();
    }
  });
  document.addEventListener('keydown', (e) => {
    if (e.key === 'Escape') {
      close();
    }
  });
  document.querySelectorAll('[data-delete]').forEach((button) => {
    button.addEventListener('click', () => {
      if (!confirm('Delete this image?')) {
        return;
      }
      const item = button.closest('.gallery-item');
      if (item) {
        item.remove();
      }
    });
  });
})();
</script>"#;

/// Full standalone page: grid plus the shared preview overlay.
///
/// Deleting from the page only hides the item; the stored gallery is changed
/// through the CLI.
pub fn render_gallery_page(records: &[ImageRecord], stats: &Stats) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Imagine gallery</title>
{style}
</head>
<body>
<header class="stats">
  <span id="totalImages">{total}</span>
  <span id="successRate">{rate}%</span>
  <span id="avgTime">{avg}s</span>
</header>
<main id="galleryGrid">
{grid}
</main>
<div id="modal" class="modal"><span id="modalClose" class="modal-close">&times;</span><img id="modalImage" alt=""></div>
{script}
</body>
</html>
"#,
        total = stats.total,
        rate = stats.success_rate(),
        avg = stats.average_duration(),
        grid = render_gallery_html(records),
        style = PAGE_STYLE,
        script = PAGE_SCRIPT,
    )
}

pub fn render_gallery_text(records: &[ImageRecord]) -> String {
    if records.is_empty() {
        return "No images yet.".to_string();
    }
    let mut out = String::new();
    for record in records {
        let kind = match record.mode {
            Some(mode) => format!("edit/{mode}"),
            None => "text".to_string(),
        };
        out.push_str(&format!(
            "{}  {}  {:<5} {:<20} {:>6.1}s  {}\n    {}\n",
            record.id,
            format_timestamp(record.timestamp),
            record.aspect_ratio.as_str(),
            kind,
            record.duration,
            truncate_chars(&record.prompt, 60),
            record.url,
        ));
    }
    out
}

pub fn render_stats_text(stats: &Stats) -> String {
    format!(
        "total: {}  success: {}  failed: {}  success rate: {}%  avg: {}s",
        stats.total,
        stats.success,
        stats.failed,
        stats.success_rate(),
        stats.average_duration()
    )
}

pub(crate) fn format_timestamp(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| millis.to_string())
}

pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
