//! Core types for the EdgeFlow SDK.
//!
//! This crate defines the foundational abstractions shared by every other
//! EdgeFlow crate: the inbound message envelope, the per-message context
//! threaded through pipeline transforms, the Event DTOs, content-type
//! codec dispatch, topic pattern matching, and the configuration surface.

pub mod codec;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod event;
pub mod topics;

pub use codec::{PayloadFormat, decode_cbor, decode_json, encode_cbor, encode_json, payload_format};
pub use context::{
    Context, KEY_DEVICE_NAME, KEY_PIPELINE_ID, KEY_PROFILE_NAME, KEY_RECEIVED_TOPIC,
    KEY_SOURCE_NAME,
};
pub use envelope::{CONTENT_TYPE_CBOR, CONTENT_TYPE_JSON, MessageEnvelope};
pub use error::{CoreError, Result};
pub use event::{AddEventRequest, Event, Reading, API_VERSION};
pub use topics::topic_matches;

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::codec::{PayloadFormat, payload_format};
    pub use crate::config::{
        PipelineConfig, StoreAndForwardConfig, TriggerConfig, WritableConfig,
    };
    pub use crate::context::Context;
    pub use crate::envelope::MessageEnvelope;
    pub use crate::error::{CoreError, Result};
    pub use crate::event::{AddEventRequest, Event, Reading};
    pub use crate::topics::topic_matches;
}
