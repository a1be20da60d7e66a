//! Decoding raw pub/sub payloads into [`Envelope`]s (`spec.md` §3 `SSEEventEnvelope`,
//! §4.8 "decode").
//!
//! Only the legacy/event-driven live-channel path needs this: a [`Publisher`]'s
//! [`Publisher::replay`](crate::repository::Publisher::replay) already returns
//! structured [`Envelope`]s, but its live channel (like the plain pub/sub text-mode
//! channel) carries opaque bytes that must be decoded on receipt.

use serde::Deserialize;

use crate::repository::Envelope;

/// Wire shape of one envelope frame published to a live channel.
#[derive(Deserialize)]
struct EnvelopeWire {
    id: i64,
    #[serde(rename = "type")]
    event_type: String,
    data: serde_json::Value,
}

/// Decode one live-channel payload into an [`Envelope`].
///
/// # Errors
///
/// Returns a human-readable message on malformed JSON or a missing/mistyped field;
/// the caller turns this into a `decode`-phase stream error.
pub fn decode_envelope(payload: &[u8]) -> Result<Envelope, String> {
    let wire: EnvelopeWire = serde_json::from_slice(payload).map_err(|err| err.to_string())?;
    let data = serde_json::to_vec(&wire.data).map_err(|err| err.to_string())?;
    Ok(Envelope {
        id: wire.id,
        event_type: wire.event_type,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_well_formed_frame() {
        let payload = br#"{"id":7,"type":"llm_chunk","data":{"text":"hi"}}"#;
        let envelope = decode_envelope(payload).unwrap();
        assert_eq!(envelope.id, 7);
        assert_eq!(envelope.event_type, "llm_chunk");
        assert_eq!(envelope.data, br#"{"text":"hi"}"#);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(decode_envelope(b"not json").is_err());
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(decode_envelope(br#"{"id":1}"#).is_err());
    }
}
