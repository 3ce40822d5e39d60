//! Intent Normalizer.
//!
//! Wraps the reasoning-service call:
//!
//! 1. find the operator named in the instruction ([`NoOperatorDetected`]
//!    otherwise);
//! 2. ask the [`ReasoningService`] for a `{tool, action, handedness}` reply;
//! 3. strip Markdown fences and any prose around the JSON object;
//! 4. validate the exact three-field shape ([`MalformedResponse`]
//!    otherwise, never retried here);
//! 5. attach the operator and fill the handedness from their profile when
//!    the reply has none.
//!
//! [`NoOperatorDetected`]: ScrubError::NoOperatorDetected
//! [`MalformedResponse`]: ScrubError::MalformedResponse

use std::sync::Arc;

use async_trait::async_trait;
use scrub_kernel::{OperatorProfile, OperatorProfiles};
use scrub_types::{Handedness, IntentRecord, IntentReply, ScrubError, SurgicalAction};
use serde_json::Value;
use tracing::{debug, info, warn};

const REPLY_FIELDS: [&str; 3] = ["tool", "action", "handedness"];

/// The external language-reasoning engine.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Return the raw reply text for `instruction`.  The operator table is
    /// supplied so the service can resolve handedness in context.
    async fn interpret(
        &self,
        instruction: &str,
        operators: &OperatorProfiles,
    ) -> Result<String, ScrubError>;
}

pub struct IntentNormalizer {
    operators: OperatorProfiles,
    reasoning: Arc<dyn ReasoningService>,
}

impl IntentNormalizer {
    pub fn new(operators: OperatorProfiles, reasoning: Arc<dyn ReasoningService>) -> Self {
        Self {
            operators,
            reasoning,
        }
    }

    pub fn operators(&self) -> &OperatorProfiles {
        &self.operators
    }

    pub fn detect_operator(&self, instruction: &str) -> Result<&OperatorProfile, ScrubError> {
        self.operators
            .detect(instruction)
            .ok_or(ScrubError::NoOperatorDetected)
    }

    /// Run the whole normalization for `instruction`.
    pub async fn normalize(&self, instruction: &str) -> Result<IntentRecord, ScrubError> {
        let operator = self.detect_operator(instruction)?.clone();
        self.interpret_for(instruction, &operator).await
    }

    /// Steps 2–5 for an operator that has already been detected.
    pub async fn interpret_for(
        &self,
        instruction: &str,
        operator: &OperatorProfile,
    ) -> Result<IntentRecord, ScrubError> {
        let raw = self.reasoning.interpret(instruction, &self.operators).await?;
        debug!(raw = %raw, "reasoning reply");

        let reply = parse_reply(&raw)?;
        let record = into_record(reply, operator);
        info!(
            operator = %operator.name,
            action = ?record.action.as_ref().map(|a| a.to_string()),
            tool = ?record.tool,
            handedness = ?record.handedness,
            "intent normalized"
        );
        Ok(record)
    }
}

/// Remove a surrounding ```` ```json ```` / ```` ``` ```` fence, if any.
pub fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    // A fence after other text only opens a block if another one closes it.
    if open > 0 && !trimmed[open + 3..].contains("```") {
        return trimmed;
    }
    let after = &trimmed[open + 3..];
    // Skip the info string ("json", "JSON", …) up to the end of that line
    // or the start of the payload.
    let body_start = after
        .find(|c: char| c == '\n' || c == '{' || c == '[')
        .unwrap_or(after.len());
    let after = &after[body_start..];
    let body = match after.find("```") {
        Some(close) => &after[..close],
        None => after,
    };
    body.trim()
}

/// Outermost `{ … }` span of `text`, for replies that wrap the object in
/// prose.
fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse and strictly validate a reasoning reply.
///
/// # Errors
///
/// [`ScrubError::MalformedResponse`] when no JSON object can be extracted,
/// when keys other than exactly `tool`, `action` and `handedness` are
/// present, or when a value is neither a string nor `null`.
pub fn parse_reply(raw: &str) -> Result<IntentReply, ScrubError> {
    let unfenced = strip_fences(raw);
    let value: Value = match serde_json::from_str(unfenced) {
        Ok(v) => v,
        Err(first) => {
            let candidate = outermost_object(unfenced).ok_or_else(|| {
                malformed(format!("no JSON object in reply: {first}"))
            })?;
            serde_json::from_str(candidate).map_err(|e| malformed(e.to_string()))?
        }
    };

    let Value::Object(map) = &value else {
        return Err(malformed("reply is not a JSON object".into()));
    };

    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_unstable();
    let mut expected = REPLY_FIELDS;
    expected.sort_unstable();
    if keys != expected {
        return Err(malformed(format!(
            "expected exactly the fields tool, action, handedness; got {keys:?}"
        )));
    }
    if let Some((key, _)) = map
        .iter()
        .find(|(_, v)| !matches!(v, Value::String(_) | Value::Null))
    {
        return Err(malformed(format!("field '{key}' must be a string or null")));
    }

    serde_json::from_value(value).map_err(|e| malformed(e.to_string()))
}

fn malformed(detail: String) -> ScrubError {
    warn!(%detail, "malformed reasoning reply");
    ScrubError::MalformedResponse(detail)
}

fn into_record(reply: IntentReply, operator: &OperatorProfile) -> IntentRecord {
    let handedness = reply
        .handedness
        .as_deref()
        .and_then(Handedness::parse)
        .unwrap_or(operator.handedness);
    IntentRecord {
        tool: reply.tool.filter(|t| !t.trim().is_empty()),
        action: reply.action.as_deref().and_then(SurgicalAction::parse),
        handedness: Some(handedness),
        operator: Some(operator.name.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Reasoning service that returns a canned reply and records calls.
    struct Canned {
        reply: Result<String, ScrubError>,
        calls: Mutex<Vec<String>>,
    }

    impl Canned {
        fn new(reply: Result<&str, ScrubError>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReasoningService for Canned {
        async fn interpret(
            &self,
            instruction: &str,
            _operators: &OperatorProfiles,
        ) -> Result<String, ScrubError> {
            self.calls.lock().unwrap().push(instruction.to_string());
            self.reply.clone()
        }
    }

    fn normalizer(service: Arc<Canned>) -> IntentNormalizer {
        IntentNormalizer::new(OperatorProfiles::default(), service)
    }

    const PLAIN: &str = r#"{"tool":"scalpel","action":"incision","handedness":"right"}"#;

    #[test]
    fn fenced_reply_parses_like_plain() {
        let fenced = format!("```json\n{PLAIN}\n```");
        assert_eq!(parse_reply(&fenced).unwrap(), parse_reply(PLAIN).unwrap());

        let inline = format!("```json {PLAIN} ```");
        assert_eq!(parse_reply(&inline).unwrap(), parse_reply(PLAIN).unwrap());

        let bare_fence = format!("```\n{PLAIN}\n```");
        assert_eq!(parse_reply(&bare_fence).unwrap(), parse_reply(PLAIN).unwrap());
    }

    #[test]
    fn trailing_stray_fence_keeps_payload() {
        let stray = format!("{PLAIN}\n```");
        assert_eq!(parse_reply(&stray).unwrap(), parse_reply(PLAIN).unwrap());

        let fenced_after_prose = format!("Here you go:\n```json\n{PLAIN}\n```");
        assert_eq!(strip_fences(&fenced_after_prose), PLAIN);
    }

    #[test]
    fn prose_around_object_is_ignored() {
        let chatty = format!("Sure! Here is the result: {PLAIN} Let me know.");
        let reply = parse_reply(&chatty).unwrap();
        assert_eq!(reply.tool.as_deref(), Some("scalpel"));
    }

    #[test]
    fn nulls_are_accepted() {
        let reply = parse_reply(r#"{"tool":null,"action":null,"handedness":null}"#).unwrap();
        assert!(reply.tool.is_none() && reply.action.is_none() && reply.handedness.is_none());
    }

    #[test]
    fn shape_violations_are_malformed() {
        for raw in [
            "not json at all",
            "[1, 2, 3]",
            r#"{"tool":"scalpel","action":"incision"}"#,
            r#"{"tool":"scalpel","action":"incision","handedness":"right","extra":1}"#,
            r#"{"tool":"scalpel","action":7,"handedness":"right"}"#,
            r#"{"tool":"scalpel","action":"incision","handedness":["right"]}"#,
            "",
        ] {
            assert!(
                matches!(parse_reply(raw), Err(ScrubError::MalformedResponse(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn operator_detection() {
        let n = normalizer(Canned::new(Ok(PLAIN)));
        assert_eq!(n.detect_operator("Kiran, stitch").unwrap().name, "kiran");
        assert_eq!(
            n.detect_operator("stitch please").unwrap_err(),
            ScrubError::NoOperatorDetected
        );
    }

    #[tokio::test]
    async fn normalize_builds_record() {
        let service = Canned::new(Ok(PLAIN));
        let n = normalizer(service.clone());
        let record = n.normalize("hi sharath, start the incision").await.unwrap();
        assert_eq!(record.tool.as_deref(), Some("scalpel"));
        assert_eq!(record.action, Some(SurgicalAction::Incision));
        assert_eq!(record.handedness, Some(Handedness::Right));
        assert_eq!(record.operator.as_deref(), Some("sharath"));
        assert_eq!(service.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fenced_reply_yields_identical_record() {
        let plain = normalizer(Canned::new(Ok(PLAIN)))
            .normalize("sharath, incision")
            .await
            .unwrap();
        let fenced_text = format!("```json {PLAIN} ```");
        let fenced = normalizer(Canned::new(Ok(fenced_text.as_str())))
            .normalize("sharath, incision")
            .await
            .unwrap();
        assert_eq!(plain, fenced);
    }

    #[tokio::test]
    async fn missing_handedness_comes_from_profile() {
        let service = Canned::new(Ok(r#"{"tool":"scissors","action":"stitch","handedness":null}"#));
        let record = normalizer(service).normalize("kiran, stitch").await.unwrap();
        assert_eq!(record.handedness, Some(Handedness::Left));
    }

    #[tokio::test]
    async fn unrecognized_handedness_comes_from_profile() {
        let service =
            Canned::new(Ok(r#"{"tool":"scissors","action":"stitch","handedness":"both"}"#));
        let record = normalizer(service).normalize("kiran, stitch").await.unwrap();
        assert_eq!(record.handedness, Some(Handedness::Left));
    }

    #[tokio::test]
    async fn reply_handedness_wins_over_profile() {
        let service =
            Canned::new(Ok(r#"{"tool":"forceps","action":"grasp","handedness":"left"}"#));
        let record = normalizer(service).normalize("sharath, grasp").await.unwrap();
        assert_eq!(record.handedness, Some(Handedness::Left));
    }

    #[tokio::test]
    async fn blank_action_becomes_none() {
        let service = Canned::new(Ok(r#"{"tool":"","action":"  ","handedness":"right"}"#));
        let record = normalizer(service).normalize("sharath, hello").await.unwrap();
        assert!(record.action.is_none());
        assert!(record.tool.is_none());
    }

    #[tokio::test]
    async fn unknown_operator_skips_reasoning() {
        let service = Canned::new(Ok(PLAIN));
        let err = normalizer(service.clone())
            .normalize("someone, incision")
            .await
            .unwrap_err();
        assert_eq!(err, ScrubError::NoOperatorDetected);
        assert!(service.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn service_failure_propagates() {
        let service = Canned::new(Err(ScrubError::ReasoningServiceFailure("down".into())));
        let err = normalizer(service).normalize("kiran, stitch").await.unwrap_err();
        assert!(matches!(err, ScrubError::ReasoningServiceFailure(_)));
    }
}
