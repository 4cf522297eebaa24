//! Extraction adapter — free announcement text to a structured record.
//!
//! Wraps a completion provider with a fixed extraction instruction and
//! enforces the structured-record contract. The provider is told to
//! return one JSON object only, but responses that wrap the object in
//! prose are tolerated: the first balanced `{...}` span is parsed and
//! everything around it ignored.
//!
//! No retries happen here — retry policy belongs to the caller.

pub mod openai;

pub use openai::OpenAiProvider;

use std::sync::Arc;

use async_trait::async_trait;

use crate::announce::StructuredAnnouncement;
use crate::error::{ExtractionError, LlmError};

/// A single-shot completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Send a prompt and return the raw text response.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Fixed instruction prepended to the announcement text.
const EXTRACTION_INSTRUCTION: &str = "\
Extract the event announcement fields from the text below.\n\
Return exactly one JSON object with the keys event_name, date, open_time, \
advance_price, door_price, ticket_link, venue, organizer.\n\
Every key must be present; use null for anything that is not in the text.\n\
Return the JSON object only, with no surrounding prose.";

/// Extraction adapter over a completion provider.
pub struct Extractor {
    provider: Arc<dyn CompletionProvider>,
}

impl Extractor {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    /// Extract a structured record from free announcement text.
    pub async fn extract(
        &self,
        free_text: &str,
    ) -> Result<StructuredAnnouncement, ExtractionError> {
        let prompt = format!("{EXTRACTION_INSTRUCTION}\n\nText:\n{free_text}");

        let response = self.provider.complete(&prompt).await.map_err(|e| {
            ExtractionError::ServiceUnavailable {
                reason: e.to_string(),
            }
        })?;

        let span = find_json_object(&response).ok_or(ExtractionError::NoJsonFound)?;

        let value: serde_json::Value =
            serde_json::from_str(span).map_err(|e| ExtractionError::MalformedJson {
                reason: e.to_string(),
            })?;

        let object = value
            .as_object()
            .ok_or_else(|| ExtractionError::MalformedJson {
                reason: "parsed JSON is not an object".to_string(),
            })?;

        Ok(StructuredAnnouncement {
            event_name: field_text(object.get("event_name")),
            date: field_text(object.get("date")),
            open_time: field_text(object.get("open_time")),
            advance_price: field_text(object.get("advance_price")),
            door_price: field_text(object.get("door_price")),
            ticket_link: field_text(object.get("ticket_link")),
            venue: field_text(object.get("venue")),
            organizer: field_text(object.get("organizer")),
        })
    }
}

/// A string field from the extraction object. Numbers are accepted
/// (models sometimes return prices unquoted); null and anything else is
/// absent.
fn field_text(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Find the first balanced `{...}` span in `text`, respecting string
/// literals and escapes.
pub fn find_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + idx + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedProvider {
        response: String,
    }

    #[async_trait]
    impl CompletionProvider for CannedProvider {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok(self.response.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl CompletionProvider for FailingProvider {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            Err(LlmError::RequestFailed {
                provider: "test".to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    fn extractor(response: &str) -> Extractor {
        Extractor::new(Arc::new(CannedProvider {
            response: response.to_string(),
        }))
    }

    // ── Balanced-object scanning ────────────────────────────────────

    #[test]
    fn finds_bare_object() {
        assert_eq!(find_json_object(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn finds_object_inside_prose() {
        let text = r#"Sure! Here is the JSON: {"a": 1} Hope that helps."#;
        assert_eq!(find_json_object(text), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn finds_nested_object() {
        let text = r#"{"a": {"b": 2}} trailing"#;
        assert_eq!(find_json_object(text), Some(r#"{"a": {"b": 2}}"#));
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let text = r#"{"a": "}{", "b": 1}"#;
        assert_eq!(find_json_object(text), Some(text));
    }

    #[test]
    fn escaped_quote_inside_string() {
        let text = r#"{"a": "say \"}\" loudly"}"#;
        assert_eq!(find_json_object(text), Some(text));
    }

    #[test]
    fn no_object_returns_none() {
        assert_eq!(find_json_object("no json here"), None);
        assert_eq!(find_json_object("unbalanced { only"), None);
    }

    // ── Extraction ──────────────────────────────────────────────────

    #[tokio::test]
    async fn extracts_from_clean_json() {
        let result = extractor(
            r#"{"event_name": "Live", "date": "2025-07-30", "open_time": "19:00",
               "advance_price": "3000", "door_price": "3500", "ticket_link": null,
               "venue": "Club X", "organizer": null}"#,
        )
        .extract("whatever")
        .await
        .unwrap();

        assert_eq!(result.event_name.as_deref(), Some("Live"));
        assert_eq!(result.ticket_link, None);
        assert_eq!(result.venue.as_deref(), Some("Club X"));
    }

    #[tokio::test]
    async fn extracts_from_prose_wrapped_json() {
        let result = extractor(
            r#"Here is the extracted data:
               {"event_name": "Live", "date": null, "open_time": null,
                "advance_price": null, "door_price": null, "ticket_link": null,
                "venue": null, "organizer": null}
               Let me know if you need anything else!"#,
        )
        .extract("whatever")
        .await
        .unwrap();

        assert_eq!(result.event_name.as_deref(), Some("Live"));
        assert_eq!(result.date, None);
    }

    #[tokio::test]
    async fn numeric_prices_are_accepted_as_strings() {
        let result = extractor(r#"{"advance_price": 3000, "door_price": 3500}"#)
            .extract("whatever")
            .await
            .unwrap();
        assert_eq!(result.advance_price.as_deref(), Some("3000"));
        assert_eq!(result.door_price.as_deref(), Some("3500"));
    }

    #[tokio::test]
    async fn missing_object_is_no_json_found() {
        let err = extractor("I could not find any event details, sorry.")
            .extract("whatever")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::NoJsonFound));
    }

    #[tokio::test]
    async fn broken_span_is_malformed_json() {
        let err = extractor(r#"{"event_name": "Live", }"#)
            .extract("whatever")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedJson { .. }));
    }

    #[tokio::test]
    async fn provider_failure_is_service_unavailable() {
        let extractor = Extractor::new(Arc::new(FailingProvider));
        let err = extractor.extract("whatever").await.unwrap_err();
        assert!(matches!(err, ExtractionError::ServiceUnavailable { .. }));
    }
}
