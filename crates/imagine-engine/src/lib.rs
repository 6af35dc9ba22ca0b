//! Client engine for the image-generation API: request dispatch, stream
//! decoding, and the session that ties results to the persisted gallery.

pub mod config;
pub mod dispatcher;
pub mod download;
pub mod error;
pub mod extract;
pub mod reference;
pub mod sse;
pub mod studio;
pub mod transport;

pub use config::ClientConfig;
pub use dispatcher::{DispatchOutcome, Dispatcher, EditOptions, GenerationRequest, DEFAULT_STRENGTH};
pub use error::{status_hint, DecodeError, DispatchError};
pub use reference::ReferenceImage;
pub use sse::StreamDecoder;
pub use studio::Studio;
pub use transport::{HttpTransport, Transport};
