//! Intent classifier: maps a query and its context to a routing decision.
//!
//! The oracle does the reasoning; this module owns the contract around it:
//! the fixed taxonomy, prompt assembly, response parsing and the fallback
//! policy. Unparseable or out-of-taxonomy answers degrade to `conversation`.
//! An oracle that fails outright is an error for the caller.

pub mod taxonomy;

pub use taxonomy::{ClassificationResult, TaskEntry, TaskTaxonomy, TaskType};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::context::RoutingContext;
use crate::error::ClassifierError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::store::Metadata;

/// Max tokens for the classification call. The answer is one small object.
const CLASSIFY_MAX_TOKENS: u32 = 256;

/// Routes queries using an oracle and a fixed taxonomy.
pub struct IntentClassifier {
    llm: Arc<dyn LlmProvider>,
    taxonomy: TaskTaxonomy,
    temperature: f32,
    timeout: Option<Duration>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, taxonomy: TaskTaxonomy) -> Self {
        Self {
            llm,
            taxonomy,
            temperature: 0.0,
            timeout: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Upper bound on each oracle call. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn taxonomy(&self) -> &TaskTaxonomy {
        &self.taxonomy
    }

    /// Classify `query`.
    ///
    /// Only oracle failures (including timeouts) are errors; anything the
    /// oracle says is turned into a result.
    pub async fn classify(
        &self,
        query: &str,
        ctx: &RoutingContext,
    ) -> Result<ClassificationResult, ClassifierError> {
        let digest = render_context_digest(ctx);
        debug!(digest = %digest, "Classification context");

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classification_system_prompt(&self.taxonomy, &digest)),
            ChatMessage::user(query),
        ])
        .with_temperature(self.temperature)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let call = self.llm.complete(request);
        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ClassifierError::Timeout(limit))??,
            None => call.await?,
        };

        let result = self.parse(&response.into_text());
        info!(
            task_type = %result.task_type,
            capability = %result.capability,
            params = %serde_json::Value::Object(result.parameters.clone()),
            "Query classified"
        );
        Ok(result)
    }

    /// Parse raw oracle output against this classifier's taxonomy.
    pub fn parse(&self, raw: &str) -> ClassificationResult {
        parse_classification_response(raw, &self.taxonomy)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Activity flags only. History text is never echoed into the prompt.
fn render_context_digest(ctx: &RoutingContext) -> String {
    let mut lines = Vec::new();
    if ctx.flags.document_activity {
        lines.push("The user has been discussing documents recently.");
    }
    if ctx.flags.image_activity {
        lines.push("The user has been generating images recently.");
    }
    if lines.is_empty() {
        return "No recent document or image activity.".to_string();
    }
    lines.join("\n")
}

fn build_classification_system_prompt(taxonomy: &TaskTaxonomy, digest: &str) -> String {
    format!(
        r#"You are an AI task classifier. Your job is to determine which component should handle a user query.

Available task categories:
{tasks}

User's conversation context:
{digest}

Analyze the user's query carefully, then respond with a JSON object containing:
1. The most appropriate task category from the list above
2. Any detected parameters needed for the task (e.g., location for weather or location for the event recommendation)

Response format must be valid JSON with a "task" field and a "params" object. Example:
{{"task": "agent_task:weather", "params": {{"location": "New York"}}}}

Example for event recommendation:
{{"task": "agent_task:recommender", "params": {{"location": "Singapore"}}}}

Respond with ONLY the JSON object."#,
        tasks = taxonomy.render(),
    )
}

// ── Response parsing ────────────────────────────────────────────────

/// Parse the oracle's answer. Never fails: every malformed answer becomes
/// the conversation fallback.
fn parse_classification_response(raw: &str, taxonomy: &TaskTaxonomy) -> ClassificationResult {
    let json_str = extract_json_object(raw);

    let value: serde_json::Value = match serde_json::from_str(&json_str) {
        Ok(v) => v,
        Err(e) => {
            warn!(raw_response = %raw, error = %e, "Classifier output is not JSON");
            return ClassificationResult::fallback();
        }
    };

    let Some(obj) = value.as_object() else {
        warn!(raw_response = %raw, "Classifier output is not a JSON object");
        return ClassificationResult::fallback();
    };

    let task = obj
        .get("task")
        .and_then(|t| t.as_str())
        .map(str::trim)
        .unwrap_or_default();
    if task.is_empty() {
        warn!(raw_response = %raw, "Classifier output has no task");
        return ClassificationResult::fallback();
    }
    if !taxonomy.contains(task) {
        warn!(task, "Classifier returned a task outside the taxonomy");
        return ClassificationResult::fallback();
    }

    let parameters: Metadata = obj
        .get("params")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    ClassificationResult::from_label(task, parameters).unwrap_or_else(|| {
        warn!(task, "Taxonomy label names no task type");
        ClassificationResult::fallback()
    })
}

/// Extract a JSON object from LLM output that might be wrapped in markdown.
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{')
        && let Some(object) = leading_json_value(trimmed)
    {
        return object.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let Some(start) = trimmed.find('{') {
        if let Some(object) = leading_json_value(&trimmed[start..]) {
            return object.to_string();
        }
        if let Some(end) = trimmed.rfind('}')
            && end > start
        {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}

/// The first complete JSON value at the start of `text`, ignoring whatever
/// follows it.
fn leading_json_value(text: &str) -> Option<&str> {
    let mut values = serde_json::Deserializer::from_str(text).into_iter::<serde_json::Value>();
    match values.next() {
        Some(Ok(_)) => Some(&text[..values.byte_offset()]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::CompletionResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CannedLlm {
        reply: Result<String, ()>,
        delay: Option<Duration>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl CannedLlm {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                delay: None,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(()),
                delay: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for CannedLlm {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.seen.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.reply {
                Ok(text) => Ok(CompletionResponse {
                    content: text.clone(),
                    ..Default::default()
                }),
                Err(()) => Err(LlmError::RequestFailed {
                    provider: "canned".into(),
                    reason: "connection refused".into(),
                }),
            }
        }
    }

    fn parse(raw: &str) -> ClassificationResult {
        parse_classification_response(raw, &TaskTaxonomy::default())
    }

    #[test]
    fn parses_agent_task_with_params() {
        let result = parse(r#"{"task": "agent_task:weather", "params": {"location": "Paris"}}"#);
        assert_eq!(result.task_type, TaskType::AgentTask);
        assert_eq!(result.capability, "weather");
        assert_eq!(result.parameters["location"], "Paris");
    }

    #[test]
    fn parses_plain_task() {
        let result = parse(r#"{"task": "document_qa", "params": {}}"#);
        assert_eq!(result.task_type, TaskType::DocumentQa);
        assert_eq!(result.capability, "");
        assert!(result.parameters.is_empty());
    }

    #[test]
    fn unwraps_markdown_fences() {
        let raw = "Sure!\n```json\n{\"task\": \"image_generation\", \"params\": {\"style\": \"oil\"}}\n```";
        let result = parse(raw);
        assert_eq!(result.task_type, TaskType::ImageGeneration);
        assert_eq!(result.parameters["style"], "oil");
    }

    #[test]
    fn ignores_prose_after_the_object() {
        let raw = "{\"task\": \"agent_task:weather\", \"params\": {\"location\": \"Paris\"}}\nThis request is about the weather.";
        let result = parse(raw);
        assert_eq!(result.task_type, TaskType::AgentTask);
        assert_eq!(result.capability, "weather");
        assert_eq!(result.parameters["location"], "Paris");
    }

    #[test]
    fn unwraps_object_surrounded_by_prose() {
        let raw = "Classification: {\"task\": \"agent_task:sql\", \"params\": {}} (confident)";
        assert_eq!(parse(raw).capability, "sql");

        let braces_in_prose = "Here you go: {\"task\": \"document_qa\", \"params\": {}} - note {braces}";
        assert_eq!(parse(braces_in_prose).task_type, TaskType::DocumentQa);
    }

    #[test]
    fn falls_back_on_malformed_output() {
        for raw in [
            "I think this is about weather",
            "",
            "[1, 2, 3]",
            r#"{"params": {"location": "Paris"}}"#,
            r#"{"task": "", "params": {}}"#,
            r#"{"task": 42}"#,
            r#"{"task": "agent_task:horoscope", "params": {}}"#,
            r#"{"task": "agent_task", "params": {}}"#,
            r#"{"task": "poetry"}"#,
        ] {
            assert_eq!(parse(raw), ClassificationResult::fallback(), "raw: {raw:?}");
        }
    }

    #[test]
    fn non_object_params_become_empty() {
        let result = parse(r#"{"task": "agent_task:sql", "params": "select everything"}"#);
        assert_eq!(result.capability, "sql");
        assert!(result.parameters.is_empty());
    }

    #[test]
    fn configured_agents_are_accepted() {
        let taxonomy = TaskTaxonomy::default().with_agent("stocks", "Share prices");
        let result = parse_classification_response(
            r#"{"task": "agent_task:stocks", "params": {"ticker": "ACME"}}"#,
            &taxonomy,
        );
        assert_eq!(result.capability, "stocks");
    }

    #[test]
    fn digest_reports_flags_only() {
        let mut ctx = RoutingContext::default();
        ctx.history.push(crate::store::Interaction::new(
            "secret question",
            "secret answer",
            Metadata::new(),
        ));
        assert_eq!(render_context_digest(&ctx), "No recent document or image activity.");

        ctx.flags.document_activity = true;
        ctx.flags.image_activity = true;
        let digest = render_context_digest(&ctx);
        assert!(digest.contains("documents"));
        assert!(digest.contains("images"));
        assert!(!digest.contains("secret"));
    }

    #[tokio::test]
    async fn classify_sends_taxonomy_and_query() {
        let llm = Arc::new(CannedLlm::ok(r#"{"task": "conversation", "params": {}}"#));
        let classifier = IntentClassifier::new(llm.clone(), TaskTaxonomy::default());

        let result = classifier
            .classify("Hello, my name is X", &RoutingContext::default())
            .await
            .unwrap();
        assert_eq!(result.task_type, TaskType::Conversation);

        let seen = llm.seen.lock().unwrap();
        let messages = &seen[0].messages;
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("- agent_task:recommender:"));
        assert_eq!(messages[1].content, "Hello, my name is X");
        assert_eq!(seen[0].max_tokens, Some(CLASSIFY_MAX_TOKENS));
    }

    #[tokio::test]
    async fn oracle_failure_is_an_error() {
        let classifier = IntentClassifier::new(Arc::new(CannedLlm::failing()), TaskTaxonomy::default());
        let err = classifier
            .classify("hi", &RoutingContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Oracle(_)));
    }

    #[tokio::test]
    async fn oracle_timeout_is_an_error() {
        let llm = CannedLlm {
            delay: Some(Duration::from_secs(5)),
            ..CannedLlm::ok("{}")
        };
        let classifier = IntentClassifier::new(Arc::new(llm), TaskTaxonomy::default())
            .with_timeout(Some(Duration::from_millis(20)));
        let err = classifier
            .classify("hi", &RoutingContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Timeout(_)));
    }
}
