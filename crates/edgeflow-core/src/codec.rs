//! Content-type dispatch and payload codecs.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::envelope::{CONTENT_TYPE_CBOR, CONTENT_TYPE_JSON};
use crate::error::{CoreError, Result};

/// Codec selected by an envelope's content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Json,
    Cbor,
}

/// Select a codec from a content type string.
///
/// Only the first `;`-delimited token is considered, case-insensitively,
/// so `application/json; charset=utf-8` selects JSON.
pub fn payload_format(content_type: &str) -> Result<PayloadFormat> {
    let token = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    match token.as_str() {
        CONTENT_TYPE_JSON => Ok(PayloadFormat::Json),
        CONTENT_TYPE_CBOR => Ok(PayloadFormat::Cbor),
        _ => Err(CoreError::UnsupportedContentType(content_type.to_string())),
    }
}

/// Decode a JSON payload.
pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| CoreError::Decode(e.to_string()))
}

/// Encode a value as JSON.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Decode a CBOR payload.
pub fn decode_cbor<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    ciborium::de::from_reader(payload).map_err(|e| CoreError::Decode(e.to_string()))
}

/// Encode a value as CBOR.
pub fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| CoreError::Serialization(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    #[test]
    fn test_payload_format_strips_parameters() {
        assert_eq!(
            payload_format("application/json; charset=utf-8").unwrap(),
            PayloadFormat::Json
        );
        assert_eq!(
            payload_format("Application/CBOR").unwrap(),
            PayloadFormat::Cbor
        );
    }

    #[test]
    fn test_payload_format_rejects_unknown() {
        let err = payload_format("text/plain").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_cbor_round_trip() {
        let mut event = Event::new("profA", "DevA", "sourceX");
        event.add_simple_reading("Temperature", "Int64", "72");

        let bytes = encode_cbor(&event).unwrap();
        let back: Event = decode_cbor(&bytes).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_decode_json_malformed_is_400() {
        let err = decode_json::<Event>(b"not json").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
