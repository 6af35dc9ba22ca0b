use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::Utc;
use imagine_contracts::models::ImageRecord;
use reqwest::blocking::Client as HttpClient;

const PROMPT_PREFIX_CHARS: usize = 30;

/// Fetches `record.url` into `dir`, returning the written path.
pub fn download_image(http: &HttpClient, record: &ImageRecord, dir: &Path) -> anyhow::Result<PathBuf> {
    let response = http
        .get(&record.url)
        .send()
        .with_context(|| format!("failed downloading image ({})", record.url))?;
    if !response.status().is_success() {
        let code = response.status().as_u16();
        bail!("image download failed ({code}): {}", record.url);
    }
    let bytes = response
        .bytes()
        .context("failed reading image bytes")?;

    fs::create_dir_all(dir).with_context(|| format!("failed creating {}", dir.display()))?;
    let path = dir.join(download_file_name(&record.prompt, Utc::now().timestamp_millis()));
    fs::write(&path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "image downloaded");
    Ok(path)
}

/// `<first 30 chars of prompt>_<millis>.jpg`, with characters that are unsafe
/// in file names replaced by `_`.
pub fn download_file_name(prompt: &str, millis: i64) -> String {
    let prefix: String = prompt
        .trim()
        .chars()
        .take(PROMPT_PREFIX_CHARS)
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect();
    let prefix = if prefix.is_empty() { "image".to_string() } else { prefix };
    format!("{prefix}_{millis}.jpg")
}
