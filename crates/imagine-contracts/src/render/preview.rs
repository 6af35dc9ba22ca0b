use crate::models::ImageRecord;

/// Input reaching the full-size preview overlay while it is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewInput {
    CloseControl,
    ClickOutside,
    ClickImage,
    CancelKey,
}

/// Single shared full-size preview. At most one image is shown at a time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewOverlay {
    current: Option<String>,
}

impl PreviewOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opening replaces whatever was being previewed.
    pub fn open(&mut self, record: &ImageRecord) {
        self.current = Some(record.url.clone());
    }

    pub fn handle(&mut self, input: PreviewInput) {
        match input {
            PreviewInput::CloseControl | PreviewInput::ClickOutside | PreviewInput::CancelKey => {
                self.current = None;
            }
            PreviewInput::ClickImage => {}
        }
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current.as_deref()
    }
}
