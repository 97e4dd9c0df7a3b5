use serde::{Deserialize, Serialize};

/// Status carried in a pub/sub message. `Queued` is never published by the
/// core itself (the session façade owns that decision — see DESIGN.md);
/// it is included here only because it is part of the wire vocabulary
/// clients must be able to deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Queued,
    Cached,
    Skipped,
    Evicted,
    Error,
}

/// Message published to a `(user_id, document_id)` channel. Tagged so a
/// client can deserialize either variant off the same stream without
/// probing fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PubSubMessage {
    Status {
        document_id: String,
        block_idx: u32,
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        model_slug: String,
        voice_slug: String,
    },
    Evicted {
        document_id: String,
        block_indices: Vec<u32>,
    },
}

impl PubSubMessage {
    pub fn cached(document_id: impl Into<String>, block_idx: u32, fingerprint: &str, model_slug: impl Into<String>, voice_slug: impl Into<String>) -> Self {
        Self::Status {
            document_id: document_id.into(),
            block_idx,
            status: Status::Cached,
            audio_url: Some(format!("/audio/{fingerprint}")),
            error: None,
            model_slug: model_slug.into(),
            voice_slug: voice_slug.into(),
        }
    }

    pub fn skipped(document_id: impl Into<String>, block_idx: u32, model_slug: impl Into<String>, voice_slug: impl Into<String>) -> Self {
        Self::Status {
            document_id: document_id.into(),
            block_idx,
            status: Status::Skipped,
            audio_url: None,
            error: None,
            model_slug: model_slug.into(),
            voice_slug: voice_slug.into(),
        }
    }

    /// `classification` must already be the short, user-safe string — no
    /// fingerprints, UUIDs, worker IDs, or raw infrastructure errors.
    pub fn error(document_id: impl Into<String>, block_idx: u32, classification: impl Into<String>, model_slug: impl Into<String>, voice_slug: impl Into<String>) -> Self {
        Self::Status {
            document_id: document_id.into(),
            block_idx,
            status: Status::Error,
            audio_url: None,
            error: Some(classification.into()),
            model_slug: model_slug.into(),
            voice_slug: voice_slug.into(),
        }
    }
}

/// Maps an internal error into the short, user-safe classification string
/// that is the only thing ever allowed to reach a `PubSubMessage::error`
/// field. Never forward `Display` of `QueueError`/`SynthesisError`
/// directly — those may embed fingerprints or worker IDs.
pub fn classify(err: &crate::error::SynthesisError) -> String {
    match err {
        crate::error::SynthesisError::Retryable(_) => "synthesis_temporarily_unavailable".to_string(),
        crate::error::SynthesisError::Permanent(_) => "synthesis_failed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_message_carries_audio_url() {
        let msg = PubSubMessage::cached("doc1", 3, "abcd", "kokoro", "af_heart");
        match msg {
            PubSubMessage::Status { audio_url, status, .. } => {
                assert_eq!(audio_url, Some("/audio/abcd".to_string()));
                assert_eq!(status, Status::Cached);
            }
            _ => panic!("expected Status variant"),
        }
    }

    #[test]
    fn serializes_with_type_tag() {
        let msg = PubSubMessage::cached("doc1", 3, "abcd", "kokoro", "af_heart");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"status\""));
    }

    #[test]
    fn classify_never_exposes_internal_details() {
        let err = crate::error::SynthesisError::Permanent("connection to fp=abcd123 worker=local/kokoro/cpu lost".to_string());
        let classification = classify(&err);
        assert!(!classification.contains("abcd123"));
        assert!(!classification.contains("local/kokoro/cpu"));
    }
}
