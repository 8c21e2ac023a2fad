//! Parsing boundary for source documents
//!
//! The source store is schemaless: field names drifted over the years and
//! timestamps appear in three encodings. This is the only place that looks at
//! raw JSON; it produces a typed [`SourceCaseRecord`] or rejects the document.

use crate::models::{ActorRef, AnalysisPayload, AudioAsset, SourceCaseRecord, TranscriptSegment};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

/// Why a document was rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("document has no id")]
    MissingId,

    #[error("document is not a JSON object")]
    NotAnObject,

    #[error("field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ParseError {
    ParseError::InvalidField {
        field,
        reason: reason.into(),
    }
}

/// Keys lifted out of the analysis object; everything else is a stage
const ANALYSIS_META_KEYS: &[&str] = &[
    "stages",
    "decisionMaker",
    "isDecisionMaker",
    "overallScore",
    "score",
    "summary",
];

/// Parse one raw source document
///
/// `fallback_id` is used when the document body has no `id` field (exports
/// keyed by document id).
pub fn parse_source_record(fallback_id: Option<&str>, doc: &Value) -> Result<SourceCaseRecord, ParseError> {
    let obj = doc.as_object().ok_or(ParseError::NotAnObject)?;

    let source_id = text(obj, &["id", "conversationId", "caseId"])
        .or_else(|| fallback_id.map(str::to_string))
        .filter(|id| !id.trim().is_empty())
        .ok_or(ParseError::MissingId)?;

    let mut record = SourceCaseRecord::new(source_id.trim());
    record.raw_customer_id = text(obj, &["customerId", "customerNumber", "customer_id", "leadId"]);
    record.customer_name = text(obj, &["customerName", "customer_name", "companyName"]);
    record.phone = text(obj, &["phone", "phoneNumber", "customerPhone"]);
    record.actor = ActorRef {
        external_id: text(obj, &["lineUserId", "userId", "ownerId", "salesUserId"]),
        display_name: text(obj, &["userName", "ownerName", "salesName"]),
        email: text(obj, &["userEmail", "ownerEmail", "email"]).map(|e| e.to_ascii_lowercase()),
    };
    record.unit = text(obj, &["unit", "productLine", "department"]);
    record.status = text(obj, &["status"]);
    record.record_type = text(obj, &["type", "recordType", "channel"]);
    record.summary = text(obj, &["summary"]);
    record.transcript = match obj.get("transcript") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => parse_transcript(value)?,
    };
    record.analysis = match first(obj, &["analysis", "meddic", "meddicAnalysis"]) {
        None => None,
        Some(value) => parse_analysis(value)?,
    };
    record.audio = parse_audio(obj)?;
    record.created_at = timestamp(obj, "createdAt")?;
    record.updated_at = timestamp(obj, "updatedAt")?;

    Ok(record)
}

/// First non-null value among `keys`
fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

/// First non-blank string (numbers are accepted and stringified)
fn text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| obj.get(*k)).find_map(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_transcript(value: &Value) -> Result<Vec<TranscriptSegment>, ParseError> {
    match value {
        Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        Value::String(s) => Ok(vec![TranscriptSegment {
            speaker: "unknown".to_string(),
            text: s.trim().to_string(),
            start: 0.0,
            end: 0.0,
        }]),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let seg = item
                    .as_object()
                    .ok_or_else(|| invalid("transcript", format!("segment {i} is not an object")))?;
                let text = text(seg, &["text", "content"])
                    .ok_or_else(|| invalid("transcript", format!("segment {i} has no text")))?;
                Ok(TranscriptSegment {
                    speaker: text_or(seg, &["speaker", "role"], "unknown"),
                    text,
                    start: first(seg, &["start", "startTime"]).and_then(number).unwrap_or(0.0),
                    end: first(seg, &["end", "endTime"]).and_then(number).unwrap_or(0.0),
                })
            })
            .collect(),
        _ => Err(invalid("transcript", "expected a list of segments or a string")),
    }
}

fn text_or(obj: &Map<String, Value>, keys: &[&str], default: &str) -> String {
    text(obj, keys).unwrap_or_else(|| default.to_string())
}

fn parse_analysis(value: &Value) -> Result<Option<AnalysisPayload>, ParseError> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid("analysis", "expected an object"))?;

    let stages = match obj.get("stages") {
        Some(Value::Object(stages)) => stages.clone(),
        Some(Value::Null) | None => obj
            .iter()
            .filter(|(k, _)| !ANALYSIS_META_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Some(_) => return Err(invalid("analysis", "'stages' must be an object")),
    };

    let decision_maker = first(obj, &["decisionMaker", "isDecisionMaker"]).map(|v| match v {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    });

    let payload = AnalysisPayload {
        stages,
        decision_maker,
        overall_score: first(obj, &["overallScore", "score"]).and_then(number),
        summary: text(obj, &["summary"]),
    };
    Ok(Some(payload))
}

fn parse_audio(obj: &Map<String, Value>) -> Result<Option<AudioAsset>, ParseError> {
    if let Some(audio) = first(obj, &["audio", "recording"]) {
        let audio = audio
            .as_object()
            .ok_or_else(|| invalid("audio", "expected an object"))?;
        let Some(uri) = text(audio, &["uri", "url", "path"]) else {
            return Ok(None);
        };
        return Ok(Some(AudioAsset {
            uri,
            duration_seconds: first(audio, &["duration", "durationSeconds"]).and_then(number),
            size_bytes: first(audio, &["size", "sizeBytes"])
                .and_then(number)
                .map(|s| s.max(0.0).round() as u64),
        }));
    }

    // Older documents kept the audio fields flat on the record
    Ok(text(obj, &["audioUrl", "recordingUrl"]).map(|uri| AudioAsset {
        uri,
        duration_seconds: first(obj, &["duration", "audioDuration"]).and_then(number),
        size_bytes: None,
    }))
}

fn timestamp(obj: &Map<String, Value>, field: &'static str) -> Result<Option<DateTime<Utc>>, ParseError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parse_timestamp(value)
            .map(Some)
            .ok_or_else(|| invalid(field, format!("unrecognised timestamp {value}"))),
    }
}

/// RFC 3339 / naive datetime strings, epoch seconds or millis, and
/// document-store timestamp objects
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                        .ok()
                        .map(|naive| Utc.from_utc_datetime(&naive))
                })
        }
        Value::Number(n) => {
            let raw = n.as_f64()?;
            // Values past ~1973 in millis are > 1e11; seconds stay below that until year 5138
            let millis = if raw.abs() > 1e11 { raw } else { raw * 1000.0 };
            Utc.timestamp_millis_opt(millis.round() as i64).single()
        }
        Value::Object(ts) => {
            let seconds = first(ts, &["_seconds", "seconds"]).and_then(Value::as_i64)?;
            let nanos = first(ts, &["_nanoseconds", "nanoseconds", "nanos"])
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Utc.timestamp_opt(seconds, u32::try_from(nanos).ok()?).single()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_document() {
        let doc = json!({
            "id": "M202511-IC004",
            "customerId": "202511\u{2010}122188",
            "customerName": "Harbor Logistics",
            "phone": "02-555-0101",
            "lineUserId": "U1234",
            "userName": "Mina",
            "userEmail": "Mina@Example.com",
            "unit": "Solar",
            "status": "analyzed",
            "type": "call",
            "transcript": [
                {"speaker": "sales", "text": "Hello", "start": 0.0, "end": 1.5},
                {"speaker": "customer", "text": "Hi", "startTime": 1.5, "endTime": 2.0}
            ],
            "summary": "Intro call",
            "analysis": {
                "metrics": {"score": 3},
                "champion": {"name": "Lee"},
                "decisionMaker": true,
                "overallScore": 72.5
            },
            "audio": {"uri": "gs://legacy/recordings/M202511-IC004.webm", "duration": 125.6, "size": 20480},
            "createdAt": {"_seconds": 1762070400, "_nanoseconds": 0},
            "updatedAt": "2025-11-03T08:00:00Z"
        });

        let record = parse_source_record(None, &doc).unwrap();
        assert_eq!(record.source_id, "M202511-IC004");
        assert_eq!(record.raw_customer_id.as_deref(), Some("202511\u{2010}122188"));
        assert_eq!(record.actor.external_id.as_deref(), Some("U1234"));
        assert_eq!(record.actor.email.as_deref(), Some("mina@example.com"));
        assert_eq!(record.transcript.len(), 2);
        assert_eq!(record.transcript[1].start, 1.5);

        let analysis = record.analysis.as_ref().unwrap();
        assert_eq!(analysis.stages.len(), 2);
        assert_eq!(analysis.decision_maker.as_deref(), Some("true"));
        assert_eq!(analysis.overall_score, Some(72.5));

        let audio = record.audio.as_ref().unwrap();
        assert_eq!(audio.size_bytes, Some(20480));
        assert_eq!(record.created_at.unwrap().timestamp(), 1762070400);
        assert!(record.updated_at.is_some());
    }

    #[test]
    fn test_fallback_id_and_minimal_document() {
        let record = parse_source_record(Some("doc-7"), &json!({"customerId": 12345})).unwrap();
        assert_eq!(record.source_id, "doc-7");
        assert_eq!(record.raw_customer_id.as_deref(), Some("12345"));
        assert!(record.transcript.is_empty());
        assert!(record.analysis.is_none());
        assert!(record.audio.is_none());
    }

    #[test]
    fn test_missing_id_rejected() {
        assert_eq!(parse_source_record(None, &json!({"customerId": "1"})), Err(ParseError::MissingId));
        assert_eq!(parse_source_record(None, &json!("text")), Err(ParseError::NotAnObject));
    }

    #[test]
    fn test_bad_timestamp_rejected() {
        let result = parse_source_record(None, &json!({"id": "A", "createdAt": "last tuesday"}));
        assert!(matches!(result, Err(ParseError::InvalidField { field: "createdAt", .. })));
    }

    #[test]
    fn test_string_transcript_becomes_one_segment() {
        let record = parse_source_record(None, &json!({"id": "A", "transcript": "full text"})).unwrap();
        assert_eq!(record.transcript.len(), 1);
        assert_eq!(record.transcript[0].speaker, "unknown");
    }

    #[test]
    fn test_flat_audio_fields() {
        let record = parse_source_record(
            None,
            &json!({"id": "A", "audioUrl": "gs://legacy/audio/A.m4a", "duration": "61.2"}),
        )
        .unwrap();
        let audio = record.audio.unwrap();
        assert_eq!(audio.uri, "gs://legacy/audio/A.m4a");
        assert_eq!(audio.duration_seconds, Some(61.2));
    }

    #[test]
    fn test_timestamp_encodings() {
        let expected = Utc.with_ymd_and_hms(2025, 11, 2, 8, 0, 0).unwrap();
        assert_eq!(parse_timestamp(&json!("2025-11-02T08:00:00Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2025-11-02 08:00:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!(expected.timestamp_millis())), Some(expected));
        assert_eq!(parse_timestamp(&json!(expected.timestamp())), Some(expected));
        assert_eq!(
            parse_timestamp(&json!({"seconds": expected.timestamp(), "nanos": 0})),
            Some(expected)
        );
        assert_eq!(parse_timestamp(&json!(true)), None);
    }
}
