//! Queue message envelopes exchanged between stages
//!
//! Every envelope is a JSON object carrying a `type` tag plus the fields of
//! the matching request struct. Consumers decode into [`PipelineMessage`] and
//! match exhaustively; a tag that belongs to another stage is skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::records::{Contact, JobSpec};

/// Input of the parser stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParseRequest {
    pub processing_id: String,
    pub resume_id: String,
    pub job_id: String,
    pub object_key: String,
    pub file_name: String,
    #[serde(default)]
    pub contact: Contact,
    pub enqueued_at: DateTime<Utc>,
}

/// Input of the extractor stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractRequest {
    pub processing_id: String,
    pub resume_id: String,
    pub job_id: String,
    pub text: String,
    #[serde(default)]
    pub contact: Contact,
    pub enqueued_at: DateTime<Utc>,
}

/// Input of the scorer stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub processing_id: String,
    pub resume_id: String,
    pub job_id: String,
    pub skills: Map<String, Value>,
    pub job: JobSpec,
    pub enqueued_at: DateTime<Utc>,
}

/// Tagged union of all stage inputs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PipelineMessage {
    #[serde(rename = "PARSE_RESUME")]
    Parse(ParseRequest),
    #[serde(rename = "EXTRACT_SKILLS")]
    Extract(ExtractRequest),
    #[serde(rename = "SCORE_MATCH")]
    Score(ScoreRequest),
}

impl PipelineMessage {
    pub const PARSE: &'static str = "PARSE_RESUME";
    pub const EXTRACT: &'static str = "EXTRACT_SKILLS";
    pub const SCORE: &'static str = "SCORE_MATCH";
    pub const TAGS: [&'static str; 3] = [Self::PARSE, Self::EXTRACT, Self::SCORE];

    pub fn tag(&self) -> &'static str {
        match self {
            PipelineMessage::Parse(_) => Self::PARSE,
            PipelineMessage::Extract(_) => Self::EXTRACT,
            PipelineMessage::Score(_) => Self::SCORE,
        }
    }

    pub fn processing_id(&self) -> &str {
        match self {
            PipelineMessage::Parse(m) => &m.processing_id,
            PipelineMessage::Extract(m) => &m.processing_id,
            PipelineMessage::Score(m) => &m.processing_id,
        }
    }
}

/// Outcome of decoding a raw queue body
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Message(PipelineMessage),
    /// Well-formed envelope whose tag no stage knows
    Unknown { tag: String },
    /// Body that cannot be turned into a message; `tag` is set when the envelope named one
    Invalid {
        tag: Option<String>,
        processing_id: Option<String>,
        error: String,
    },
}

/// Decode a raw queue body, recovering the processing id from broken envelopes when possible
pub fn decode(body: &str) -> Decoded {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            return Decoded::Invalid {
                tag: None,
                processing_id: None,
                error: format!("body is not JSON: {}", e),
            }
        }
    };

    let processing_id = value
        .get("processingId")
        .and_then(Value::as_str)
        .map(String::from);

    let tag = match value.get("type").and_then(Value::as_str) {
        Some(tag) => tag.to_string(),
        None => {
            return Decoded::Invalid {
                tag: None,
                processing_id,
                error: "envelope has no type tag".to_string(),
            }
        }
    };

    if !PipelineMessage::TAGS.contains(&tag.as_str()) {
        return Decoded::Unknown { tag };
    }

    match serde_json::from_value(value) {
        Ok(message) => Decoded::Message(message),
        Err(e) => Decoded::Invalid {
            error: format!("invalid {} payload: {}", tag, e),
            tag: Some(tag),
            processing_id,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_request() -> ParseRequest {
        ParseRequest {
            processing_id: "p1".into(),
            resume_id: "r1".into(),
            job_id: "j1".into(),
            object_key: "resumes/r1/cv.txt".into(),
            file_name: "cv.txt".into(),
            contact: Contact::default(),
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn test_envelope_carries_tag() {
        let message = PipelineMessage::Parse(parse_request());
        let json: Value = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "PARSE_RESUME");
        assert_eq!(json["processingId"], "p1");

        let body = serde_json::to_string(&message).unwrap();
        assert_eq!(decode(&body), Decoded::Message(message));
    }

    #[test]
    fn test_unknown_tag() {
        let decoded = decode(r#"{"type":"RESIZE_IMAGE","processingId":"p9"}"#);
        assert_eq!(decoded, Decoded::Unknown { tag: "RESIZE_IMAGE".into() });
    }

    #[test]
    fn test_broken_payload_keeps_processing_id() {
        let decoded = decode(r#"{"type":"EXTRACT_SKILLS","processingId":"p2","resumeId":7}"#);
        match decoded {
            Decoded::Invalid {
                tag, processing_id, ..
            } => {
                assert_eq!(tag.as_deref(), Some("EXTRACT_SKILLS"));
                assert_eq!(processing_id.as_deref(), Some("p2"));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            decode("not json"),
            Decoded::Invalid {
                tag: None,
                processing_id: None,
                ..
            }
        ));
    }
}
