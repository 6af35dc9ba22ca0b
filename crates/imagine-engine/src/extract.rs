use std::sync::OnceLock;

use regex::Regex;

// `http://` or `https://`, then no whitespace or `)`, ending in `.jpg`. Greedy.
const IMAGE_URL_PATTERN: &str = r"https?://[^\s)]+\.jpg";

fn image_url_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(IMAGE_URL_PATTERN).expect("image url pattern compiles"))
}

/// Image URLs found in free-form delta text, in order of appearance.
pub fn extract_image_urls(content: &str) -> Vec<String> {
    image_url_regex()
        .find_iter(content)
        .map(|found| found.as_str().to_string())
        .collect()
}
