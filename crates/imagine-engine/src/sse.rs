use std::io::{ErrorKind, Read};

use imagine_contracts::events::Progress;
use serde_json::Value;

use crate::error::DecodeError;
use crate::extract::extract_image_urls;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";
const READ_CHUNK_BYTES: usize = 8 * 1024;

pub type UrlExtractor = fn(&str) -> Vec<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Accumulating,
    Done,
}

/// Incremental reader for one streaming chat-completion response.
///
/// Bytes are buffered until a newline arrives, so frames split across network
/// chunks (even inside a multi-byte character) decode exactly as if the body
/// had arrived in one piece. One decoder per request; it is not resumable.
#[derive(Debug)]
pub struct StreamDecoder {
    pending: Vec<u8>,
    state: DecoderState,
    urls: Vec<String>,
    malformed_frames: usize,
    extractor: UrlExtractor,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::with_extractor(extract_image_urls)
    }

    pub fn with_extractor(extractor: UrlExtractor) -> Self {
        Self {
            pending: Vec::new(),
            state: DecoderState::Accumulating,
            urls: Vec::new(),
            malformed_frames: 0,
            extractor,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == DecoderState::Done
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn malformed_frames(&self) -> usize {
        self.malformed_frames
    }

    /// Processes every complete line in `chunk` plus what was pending; keeps the
    /// trailing partial line for the next call. No-op once done.
    pub fn feed(&mut self, chunk: &[u8], on_progress: &mut dyn FnMut(Progress)) {
        if self.is_done() {
            return;
        }
        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|byte| *byte == b'\n') {
            let end = start + offset;
            let line = self.pending[start..end].to_vec();
            start = end + 1;
            self.process_line(&line, on_progress);
            if self.is_done() {
                self.pending.clear();
                return;
            }
        }
        self.pending.drain(..start);
    }

    /// Marks end of input. An unterminated final fragment is discarded.
    pub fn finish(mut self) -> Vec<String> {
        if !self.pending.is_empty() {
            tracing::debug!(
                bytes = self.pending.len(),
                "discarding unterminated trailing stream fragment"
            );
            self.pending.clear();
        }
        self.state = DecoderState::Done;
        self.urls
    }

    /// Feeds everything `reader` yields until end of input or the `[DONE]`
    /// sentinel. Call [`finish`](Self::finish) afterwards.
    pub fn read_all<R: Read>(
        &mut self,
        mut reader: R,
        on_progress: &mut dyn FnMut(Progress),
    ) -> std::io::Result<()> {
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        while !self.is_done() {
            let read = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            self.feed(&buf[..read], on_progress);
        }
        Ok(())
    }

    pub fn decode_reader<R: Read>(
        mut self,
        reader: R,
        on_progress: &mut dyn FnMut(Progress),
    ) -> std::io::Result<Vec<String>> {
        self.read_all(reader, on_progress)?;
        Ok(self.finish())
    }

    fn process_line(&mut self, raw: &[u8], on_progress: &mut dyn FnMut(Progress)) {
        let text = String::from_utf8_lossy(raw);
        let line = text.strip_suffix('\r').unwrap_or(&*text);
        let Some(data) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };
        if data == DONE_SENTINEL {
            self.state = DecoderState::Done;
            return;
        }

        let frame: Value = match serde_json::from_str(data) {
            Ok(frame) => frame,
            Err(source) => {
                let err = DecodeError {
                    frame: data.to_string(),
                    source,
                };
                tracing::warn!(frame = %err.frame, "{err}");
                self.malformed_frames += 1;
                return;
            }
        };
        let Some(delta) = frame.pointer("/choices/0/delta") else {
            return;
        };

        if let Some(thinking) = delta
            .get("thinking")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
        {
            let percent = delta
                .get("thinking_progress")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            on_progress(Progress::new(thinking, percent));
        }

        if let Some(content) = delta
            .get("content")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
        {
            self.urls.extend((self.extractor)(content));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use imagine_contracts::events::Progress;

    use super::{DecoderState, StreamDecoder};

    const PAYLOAD: &str = concat!(
        ": keep-alive\n",
        "data: {\"choices\":[{\"delta\":{\"thinking\":\"drawing…\",\"thinking_progress\":35}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"![a](https://cdn.example.com/img/a.jpg)\"}}]}\n",
        "\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"more http://x/b.jpg and http://x/c.png\"}}]}\n",
        "data: {\"choices\":[{\"delta\":{}}]}\n",
        "data: [DONE]\n",
    );

    fn decode_chunks(chunks: &[&[u8]]) -> (Vec<String>, Vec<Progress>) {
        let mut progress = Vec::new();
        let mut decoder = StreamDecoder::new();
        for chunk in chunks {
            decoder.feed(chunk, &mut |update| progress.push(update));
        }
        (decoder.finish(), progress)
    }

    #[test]
    fn single_chunk_extracts_urls_and_progress() {
        let (urls, progress) = decode_chunks(&[PAYLOAD.as_bytes()]);
        assert_eq!(urls, vec!["https://cdn.example.com/img/a.jpg", "http://x/b.jpg"]);
        assert_eq!(progress, vec![Progress::new("drawing…", 35.0)]);
    }

    #[test]
    fn every_two_way_split_matches_single_chunk() {
        let bytes = PAYLOAD.as_bytes();
        let (expected, _) = decode_chunks(&[bytes]);
        for split in 0..=bytes.len() {
            let (urls, _) = decode_chunks(&[&bytes[..split], &bytes[split..]]);
            assert_eq!(urls, expected, "split at byte {split}");
        }
    }

    #[test]
    fn byte_at_a_time_matches_single_chunk() {
        let bytes = PAYLOAD.as_bytes();
        let (expected, expected_progress) = decode_chunks(&[bytes]);
        let singles: Vec<&[u8]> = bytes.chunks(1).collect();
        let (urls, progress) = decode_chunks(&singles);
        assert_eq!(urls, expected);
        assert_eq!(progress, expected_progress);
    }

    #[test]
    fn done_sentinel_stops_later_lines_and_chunks() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(
            b"data: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"http://x/late.jpg\"}}]}\n",
            &mut |_| {},
        );
        assert_eq!(decoder.state(), DecoderState::Done);
        decoder.feed(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"http://x/later.jpg\"}}]}\n",
            &mut |_| {},
        );
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn malformed_frame_is_skipped() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(
            b"data: {bad json}\ndata: {\"choices\":[{\"delta\":{\"content\":\"http://x/a.jpg\"}}]}\n",
            &mut |_| {},
        );
        assert_eq!(decoder.malformed_frames(), 1);
        assert_eq!(decoder.finish(), vec!["http://x/a.jpg"]);
    }

    #[test]
    fn crlf_lines_and_missing_progress_default_to_zero() {
        let mut progress = Vec::new();
        let mut decoder = StreamDecoder::new();
        decoder.feed(
            b"data: {\"choices\":[{\"delta\":{\"thinking\":\"step\"}}]}\r\ndata: [DONE]\r\n",
            &mut |update| progress.push(update),
        );
        assert!(decoder.is_done());
        assert_eq!(progress, vec![Progress::new("step", 0.0)]);
    }

    #[test]
    fn unterminated_trailing_fragment_is_dropped() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"http://x/a.jpg\"}}]}",
            &mut |_| {},
        );
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn custom_extractor_replaces_url_policy() {
        fn pngs(content: &str) -> Vec<String> {
            content
                .split_whitespace()
                .filter(|word| word.ends_with(".png"))
                .map(str::to_string)
                .collect()
        }
        let mut decoder = StreamDecoder::with_extractor(pngs);
        decoder.feed(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"http://x/a.jpg http://x/b.png\"}}]}\n",
            &mut |_| {},
        );
        assert_eq!(decoder.finish(), vec!["http://x/b.png"]);
    }

    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let end = (self.pos + self.step).min(self.data.len()).min(self.pos + buf.len());
            let n = end - self.pos;
            buf[..n].copy_from_slice(&self.data[self.pos..end]);
            self.pos = end;
            Ok(n)
        }
    }

    #[test]
    fn decode_reader_handles_small_reads() -> anyhow::Result<()> {
        let reader = Trickle {
            data: PAYLOAD.as_bytes().to_vec(),
            pos: 0,
            step: 7,
        };
        let urls = StreamDecoder::new().decode_reader(reader, &mut |_| {})?;
        assert_eq!(urls, vec!["https://cdn.example.com/img/a.jpg", "http://x/b.jpg"]);
        Ok(())
    }
}
