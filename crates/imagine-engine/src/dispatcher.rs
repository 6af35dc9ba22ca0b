use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use imagine_contracts::events::{ChangeEvent, EventBus, Progress};
use imagine_contracts::models::{AspectRatio, EditMode, ImageRecord};

use crate::error::DispatchError;
use crate::reference::{ReferenceImage, MAX_REFERENCE_BYTES};
use crate::sse::StreamDecoder;
use crate::transport::{EditUpload, StreamRequest, Transport};

pub const DEFAULT_STRENGTH: f32 = 0.8;

#[derive(Debug, Clone, PartialEq)]
pub struct EditOptions {
    pub image: ReferenceImage,
    pub mode: EditMode,
    pub strength: f32,
}

/// What the form submits. A reference image selects the edit path.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    pub count: u32,
    pub edit: Option<EditOptions>,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>, aspect_ratio: AspectRatio, count: u32) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio,
            count,
            edit: None,
        }
    }

    pub fn edit(
        prompt: impl Into<String>,
        aspect_ratio: AspectRatio,
        image: ReferenceImage,
        mode: EditMode,
        strength: f32,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio,
            count: 1,
            edit: Some(EditOptions {
                image,
                mode,
                strength,
            }),
        }
    }

    pub fn is_edit(&self) -> bool {
        self.edit.is_some()
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.prompt.trim().is_empty() {
            return Err(DispatchError::Validation("Please enter a prompt".to_string()));
        }
        match &self.edit {
            None if self.count == 0 => Err(DispatchError::Validation(
                "Image count must be at least 1".to_string(),
            )),
            None => Ok(()),
            Some(edit) => {
                if !(0.0..=1.0).contains(&edit.strength) {
                    return Err(DispatchError::Validation(format!(
                        "Strength must be between 0 and 1, got {}",
                        edit.strength
                    )));
                }
                if edit.image.bytes.is_empty() {
                    return Err(DispatchError::Validation(
                        "Reference image is empty".to_string(),
                    ));
                }
                if edit.image.bytes.len() > MAX_REFERENCE_BYTES {
                    return Err(DispatchError::Validation(
                        "Reference image must not exceed 10MB".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// In the order the service returned them.
    pub records: Vec<ImageRecord>,
    /// Wall-clock seconds for the whole call.
    pub duration: f64,
    pub is_edit: bool,
}

/// Runs one request/response cycle at a time against a [`Transport`].
pub struct Dispatcher<T: Transport> {
    transport: T,
    model: String,
    in_flight: AtomicBool,
    bus: EventBus,
}

/// Held for the duration of a dispatch. Dropping it re-enables submission and
/// resets progress, whatever the outcome.
pub struct InFlight<'a> {
    flag: &'a AtomicBool,
    bus: &'a EventBus,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.bus.publish(ChangeEvent::Progress(Progress::default()));
        self.bus.publish(ChangeEvent::Busy { in_flight: false });
    }
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T, model: impl Into<String>, bus: EventBus) -> Self {
        Self {
            transport,
            model: model.into(),
            in_flight: AtomicBool::new(false),
            bus,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn begin(&self) -> Result<InFlight<'_>, DispatchError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DispatchError::Busy)?;
        self.bus.publish(ChangeEvent::Busy { in_flight: true });
        Ok(InFlight {
            flag: &self.in_flight,
            bus: &self.bus,
        })
    }

    /// Validates, then sends exactly one request. Validation failures never
    /// reach the transport.
    pub fn dispatch(&self, request: &GenerationRequest) -> Result<DispatchOutcome, DispatchError> {
        request.validate()?;
        let _in_flight = self.begin()?;
        let prompt = request.prompt.trim();
        let started = Instant::now();
        match &request.edit {
            None => self.generate(prompt, request.aspect_ratio, request.count, started),
            Some(edit) => self.edit(prompt, request.aspect_ratio, edit, started),
        }
    }

    fn generate(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
        count: u32,
        started: Instant,
    ) -> Result<DispatchOutcome, DispatchError> {
        let request = StreamRequest::new(&self.model, prompt, aspect_ratio, count);
        let body = self.transport.open_stream(&request)?;

        let bus = &self.bus;
        let mut decoder = StreamDecoder::new();
        decoder
            .read_all(body, &mut |progress| {
                bus.publish(ChangeEvent::Progress(progress));
            })
            .map_err(|err| DispatchError::transport(None, format!("stream read failed: {err}")))?;
        let malformed = decoder.malformed_frames();
        let urls = decoder.finish();
        let duration = started.elapsed().as_secs_f64();

        if urls.is_empty() {
            let message = match malformed {
                0 => "No image URLs found in the response".to_string(),
                n => format!("No image URLs found in the response ({n} malformed frame(s) skipped)"),
            };
            return Err(DispatchError::EmptyResult(message));
        }
        let per_image = duration / urls.len() as f64;
        tracing::info!(
            transport = self.transport.name(),
            images = urls.len(),
            seconds = duration,
            "text-to-image finished"
        );
        let records = urls
            .into_iter()
            .map(|url| ImageRecord::new(url, prompt, aspect_ratio, None, per_image))
            .collect();
        Ok(DispatchOutcome {
            records,
            duration,
            is_edit: false,
        })
    }

    fn edit(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
        edit: &EditOptions,
        started: Instant,
    ) -> Result<DispatchOutcome, DispatchError> {
        let upload = EditUpload {
            prompt: prompt.to_string(),
            image: edit.image.clone(),
            mode: edit.mode,
            strength: edit.strength,
            aspect_ratio,
        };
        self.bus.publish(ChangeEvent::Progress(Progress::new(
            "Uploading reference image",
            10.0,
        )));
        let response = self.transport.submit_edit(&upload)?;
        self.bus
            .publish(ChangeEvent::Progress(Progress::new("Generating", 50.0)));
        let duration = started.elapsed().as_secs_f64();

        let urls = response.urls();
        if urls.is_empty() {
            return Err(DispatchError::EmptyResult(
                "No images returned by the edit request".to_string(),
            ));
        }
        tracing::info!(
            transport = self.transport.name(),
            images = urls.len(),
            mode = %edit.mode,
            seconds = duration,
            "image edit finished"
        );
        let records = urls
            .into_iter()
            .map(|url| ImageRecord::new(url, prompt, aspect_ratio, Some(edit.mode), duration))
            .collect();
        Ok(DispatchOutcome {
            records,
            duration,
            is_edit: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use imagine_contracts::events::{ChangeEvent, EventBus, Progress};
    use imagine_contracts::models::{AspectRatio, EditMode};
    use serde_json::json;

    use super::{Dispatcher, GenerationRequest, DEFAULT_STRENGTH};
    use crate::error::DispatchError;
    use crate::reference::{ReferenceImage, MAX_REFERENCE_BYTES};
    use crate::transport::{ByteStream, EditResponse, EditUpload, StreamRequest, Transport};

    #[derive(Default)]
    struct ScriptedTransport {
        stream_body: String,
        edit_body: serde_json::Value,
        stream_calls: Mutex<Vec<StreamRequest>>,
        edit_calls: Mutex<Vec<EditUpload>>,
    }

    impl Transport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream, DispatchError> {
            self.stream_calls.lock().unwrap().push(request.clone());
            Ok(Box::new(Cursor::new(self.stream_body.clone().into_bytes())))
        }

        fn submit_edit(&self, upload: &EditUpload) -> Result<EditResponse, DispatchError> {
            self.edit_calls.lock().unwrap().push(upload.clone());
            serde_json::from_value(self.edit_body.clone())
                .map_err(|err| DispatchError::transport(Some(200), err.to_string()))
        }
    }

    fn frame(content: &str) -> String {
        format!(
            "data: {}\n",
            json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    fn reference() -> ReferenceImage {
        ReferenceImage {
            bytes: vec![1, 2, 3],
            file_name: "ref.jpg".to_string(),
            mime: "image/jpeg".to_string(),
        }
    }

    #[test]
    fn text_path_splits_duration_across_urls() -> anyhow::Result<()> {
        let transport = ScriptedTransport {
            stream_body: frame("http://x/a.jpg") + &frame("http://x/b.jpg") + "data: [DONE]\n",
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(transport, "grok-imagine", EventBus::new());

        let outcome = dispatcher.dispatch(&GenerationRequest::text("  cat ", AspectRatio::Square, 2))?;

        assert_eq!(outcome.records.len(), 2);
        assert!(!outcome.is_edit);
        for record in &outcome.records {
            assert_eq!(record.prompt, "cat");
            assert!((record.duration * 2.0 - outcome.duration).abs() < 1e-12);
            assert!(!record.is_edit);
        }
        let calls = dispatcher.transport().stream_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].n, 2);
        assert_eq!(calls[0].messages[0].content, "cat");
        assert!(!dispatcher.is_busy());
        Ok(())
    }

    #[test]
    fn empty_stream_is_an_empty_result() {
        let transport = ScriptedTransport {
            stream_body: frame("sorry, nothing") + "data: [DONE]\n",
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(transport, "m", EventBus::new());
        let err = dispatcher
            .dispatch(&GenerationRequest::text("cat", AspectRatio::Square, 1))
            .err();
        assert!(matches!(err, Some(DispatchError::EmptyResult(_))));
    }

    #[test]
    fn empty_result_reports_skipped_frames() {
        let transport = ScriptedTransport {
            stream_body: "data: {bad json}\ndata: {\"choices\": [\ndata: [DONE]\n".to_string(),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(transport, "m", EventBus::new());
        let err = dispatcher
            .dispatch(&GenerationRequest::text("cat", AspectRatio::Square, 1))
            .err();
        match err {
            Some(DispatchError::EmptyResult(message)) => {
                assert_eq!(
                    message,
                    "No image URLs found in the response (2 malformed frame(s) skipped)"
                );
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn blank_prompt_never_reaches_transport() {
        let dispatcher = Dispatcher::new(ScriptedTransport::default(), "m", EventBus::new());
        let err = dispatcher
            .dispatch(&GenerationRequest::text(" \t\n", AspectRatio::Square, 1))
            .err();
        assert!(matches!(err, Some(DispatchError::Validation(_))));
        assert!(dispatcher.transport().stream_calls.lock().unwrap().is_empty());

        let bad_strength = GenerationRequest::edit("cat", AspectRatio::Square, reference(), EditMode::Upscale, 1.5);
        assert!(matches!(
            dispatcher.dispatch(&bad_strength).err(),
            Some(DispatchError::Validation(_))
        ));
        assert!(dispatcher.transport().edit_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn undecodable_oversized_reference_is_a_validation_error() {
        let image = ReferenceImage::prepare(vec![7; MAX_REFERENCE_BYTES + 1], "blob.bin", None);
        assert_eq!(image.bytes.len(), MAX_REFERENCE_BYTES + 1);

        let dispatcher = Dispatcher::new(ScriptedTransport::default(), "m", EventBus::new());
        let request = GenerationRequest::edit("cat", AspectRatio::Square, image, EditMode::Upscale, 0.5);
        assert!(matches!(
            dispatcher.dispatch(&request).err(),
            Some(DispatchError::Validation(message)) if message.contains("10MB")
        ));
        assert!(dispatcher.transport().edit_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn edit_path_shares_full_duration() -> anyhow::Result<()> {
        let transport = ScriptedTransport {
            edit_body: json!({"created": 1, "data": [{"url": "http://x/1.jpg"}, {"url": "http://x/2.jpg"}]}),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(transport, "m", EventBus::new());
        let request = GenerationRequest::edit(
            "make it blue",
            AspectRatio::Landscape,
            reference(),
            EditMode::BackgroundReplace,
            DEFAULT_STRENGTH,
        );

        let outcome = dispatcher.dispatch(&request)?;
        assert!(outcome.is_edit);
        assert_eq!(outcome.records.len(), 2);
        for record in &outcome.records {
            assert_eq!(record.duration, outcome.duration);
            assert_eq!(record.mode, Some(EditMode::BackgroundReplace));
            assert!(record.is_edit);
        }
        let calls = dispatcher.transport().edit_calls.lock().unwrap();
        assert_eq!(calls[0].strength, DEFAULT_STRENGTH);
        assert_eq!(calls[0].aspect_ratio, AspectRatio::Landscape);
        assert!(dispatcher.transport().stream_calls.lock().unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn edit_without_data_is_an_empty_result() {
        let transport = ScriptedTransport {
            edit_body: json!({"created": 1}),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(transport, "m", EventBus::new());
        let request = GenerationRequest::edit("x", AspectRatio::Square, reference(), EditMode::StyleTransfer, 0.5);
        assert!(matches!(
            dispatcher.dispatch(&request).err(),
            Some(DispatchError::EmptyResult(_))
        ));
    }

    #[test]
    fn second_begin_is_rejected_until_guard_drops() -> anyhow::Result<()> {
        let dispatcher = Dispatcher::new(ScriptedTransport::default(), "m", EventBus::new());
        let guard = dispatcher.begin()?;
        assert!(dispatcher.is_busy());
        assert!(matches!(
            dispatcher.dispatch(&GenerationRequest::text("cat", AspectRatio::Square, 1)).err(),
            Some(DispatchError::Busy)
        ));
        drop(guard);
        assert!(!dispatcher.is_busy());
        assert!(dispatcher.begin().is_ok());
        Ok(())
    }

    #[test]
    fn progress_and_busy_events_bracket_the_call() -> anyhow::Result<()> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let bus = EventBus::new();
        let sink = events.clone();
        bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        let thinking = format!(
            "data: {}\n",
            json!({"choices": [{"delta": {"thinking": "sketching", "thinking_progress": 60}}]})
        );
        let transport = ScriptedTransport {
            stream_body: thinking + &frame("http://x/a.jpg"),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(transport, "m", bus);
        dispatcher.dispatch(&GenerationRequest::text("cat", AspectRatio::Square, 1))?;

        let events = events.lock().unwrap();
        assert_eq!(events.first(), Some(&ChangeEvent::Busy { in_flight: true }));
        assert!(events.contains(&ChangeEvent::Progress(Progress::new("sketching", 60.0))));
        assert_eq!(
            events[events.len() - 2],
            ChangeEvent::Progress(Progress::default())
        );
        assert_eq!(events.last(), Some(&ChangeEvent::Busy { in_flight: false }));
        Ok(())
    }
}
