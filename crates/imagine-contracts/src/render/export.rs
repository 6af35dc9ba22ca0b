use std::fmt;
use std::str::FromStr;

use super::gallery::format_timestamp;
use crate::models::ImageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Markdown => "md",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
            ExportFormat::Markdown => "text/markdown",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "md" | "markdown" => Ok(ExportFormat::Markdown),
            other => Err(format!("unknown export format '{other}'")),
        }
    }
}

pub fn export_history(records: &[ImageRecord], format: ExportFormat) -> anyhow::Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(records)?),
        ExportFormat::Csv => Ok(export_csv(records)),
        ExportFormat::Markdown => Ok(export_markdown(records)),
    }
}

fn export_csv(records: &[ImageRecord]) -> String {
    let mut out = String::from("id,timestamp,aspect_ratio,mode,duration_s,prompt,url\n");
    for record in records {
        let row = [
            record.id.clone(),
            format_timestamp(record.timestamp),
            record.aspect_ratio.to_string(),
            record.mode.map(|mode| mode.to_string()).unwrap_or_default(),
            format!("{:.2}", record.duration),
            record.prompt.clone(),
            record.url.clone(),
        ];
        let line = row
            .iter()
            .map(|field| csv_field(field))
            .collect::<Vec<String>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn export_markdown(records: &[ImageRecord]) -> String {
    let mut out = String::from("# Image history\n\n");
    if records.is_empty() {
        out.push_str("_No images._\n");
        return out;
    }
    out.push_str("| Time | Ratio | Mode | Duration | Prompt | Image |\n");
    out.push_str("| --- | --- | --- | --- | --- | --- |\n");
    for record in records {
        out.push_str(&format!(
            "| {} | {} | {} | {:.1}s | {} | ![]({}) |\n",
            format_timestamp(record.timestamp),
            record.aspect_ratio,
            record.mode.map(|mode| mode.to_string()).unwrap_or_else(|| "-".to_string()),
            record.duration,
            record.prompt.replace('|', "\\|").replace('\n', " "),
            record.url,
        ));
    }
    out
}
