//! Adapter that runs an agent/LLM call as a workflow job.
//!
//! The scheduler knows nothing about prompts, providers or retries. An
//! [`Agent`] implementation wraps whatever subsystem performs the call, and
//! [`AgentJob`] turns it into a [`Job`]: it renders the prompt from the
//! flow state, races the call against cancellation, retries failures and
//! stores the answer back into the state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::Job;
use crate::{Error, ExecutionContext, FlowState, Result};

/// Token usage statistics reported by an agent call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub prompt: u32,
    /// Tokens in the completion.
    pub completion: u32,
}

impl TokenUsage {
    /// Prompt plus completion tokens.
    pub fn total(&self) -> u32 {
        self.prompt.saturating_add(self.completion)
    }
}

/// A request handed to an [`Agent`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Optional system instructions.
    pub system: Option<String>,
    /// The rendered user prompt.
    pub prompt: String,
}

/// An agent's answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Generated content.
    pub content: String,
    /// Token usage, when the provider reports it.
    pub usage: Option<TokenUsage>,
}

impl AgentResponse {
    /// A response with the given content and no usage data.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }
}

/// The collaborator boundary to the agent/LLM subsystem.
///
/// Implementations may block for a long time; [`AgentJob`] stops waiting
/// as soon as the context is cancelled, dropping the in-flight call.
#[async_trait]
pub trait Agent: Send + Sync {
    /// A short name for logs (e.g. the provider or persona).
    fn name(&self) -> &str;

    /// Perform one call.
    async fn invoke(&self, ctx: &ExecutionContext, request: AgentRequest) -> Result<AgentResponse>;
}

/// A job that forwards to an [`Agent`].
///
/// The prompt is a template in which `{key}` is replaced by the flow-state
/// value under `key` (strings verbatim, other values as JSON). A missing key
/// fails the job with a validation error. Brace text that is not an
/// identifier, like `{"a": 1}`, is left alone; `{{` and `}}` escape braces.
/// The job's value is the response content as a JSON string.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use llm_jobflow::{Agent, AgentJob, AgentRequest, AgentResponse};
/// use llm_jobflow::{ExecutionContext, FlowState, Job, Result};
/// use std::sync::Arc;
///
/// struct Echo;
///
/// #[async_trait]
/// impl Agent for Echo {
///     fn name(&self) -> &str { "echo" }
///
///     async fn invoke(
///         &self,
///         _ctx: &ExecutionContext,
///         request: AgentRequest,
///     ) -> Result<AgentResponse> {
///         Ok(AgentResponse::text(request.prompt))
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let job = AgentJob::new("summarize", Arc::new(Echo), "Summarize: {article}")
///     .with_output_key("summary");
///
/// let state = FlowState::new();
/// state.set("article", "Rust 2024 ships.");
/// job.run(&ExecutionContext::new(), &state).await.unwrap();
/// assert_eq!(state.get_string("summary").unwrap(), "Summarize: Rust 2024 ships.");
/// # });
/// ```
pub struct AgentJob {
    id: String,
    agent: Arc<dyn Agent>,
    template: String,
    system: Option<String>,
    output_key: Option<String>,
    max_attempts: usize,
    retry_delay: Duration,
}

impl AgentJob {
    /// Create an agent job with a single attempt and no output key.
    pub fn new(id: impl Into<String>, agent: Arc<dyn Agent>, template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent,
            template: template.into(),
            system: None,
            output_key: None,
            max_attempts: 1,
            retry_delay: Duration::from_millis(500),
        }
    }

    /// Set the system instructions sent with every call.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Store the response content in the flow state under `key`.
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Total attempts per run, including the first. Clamped to at least 1.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Delay between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn invoke_once(
        &self,
        ctx: &ExecutionContext,
        request: AgentRequest,
    ) -> Result<AgentResponse> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            _ = ctx.cancelled() => Err(Error::Cancelled),
            response = self.agent.invoke(ctx, request) => response,
        }
    }
}

/// Replace each `{key}` in `template` with the state value under `key`.
///
/// Only identifier-shaped keys (letters, digits, `_`, `-`, `.`) are
/// placeholders; any other brace text, such as literal JSON, is copied
/// through. `{{` and `}}` produce literal braces.
fn render_prompt(template: &str, state: &FlowState) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        let key = tail[1..].find('}').map(|close| &tail[1..=close]);
        match key.filter(|k| is_placeholder_key(k)) {
            Some(key) => {
                match state.get(key) {
                    Some(Value::String(s)) => out.push_str(&s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => {
                        return Err(Error::Validation(format!(
                            "prompt placeholder '{{{key}}}' has no value in flow state"
                        )))
                    }
                }
                rest = &tail[key.len() + 2..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn is_placeholder_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[async_trait]
impl Job for AgentJob {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, ctx: &ExecutionContext, state: &FlowState) -> Result<Value> {
        let request = AgentRequest {
            system: self.system.clone(),
            prompt: render_prompt(&self.template, state)?,
        };

        let mut attempt = 1;
        let response = loop {
            match self.invoke_once(ctx, request.clone()).await {
                Ok(response) => break response,
                Err(e) if e.is_cancelled() || attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    warn!(
                        job_id = %self.id,
                        agent = %self.agent.name(),
                        attempt,
                        error = %e,
                        "Agent call failed, retrying"
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = ctx.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        };

        debug!(job_id = %self.id, agent = %self.agent.name(), attempt, "Agent call completed");
        if let Some(usage) = response.usage {
            ctx.emit_artifact(&self.id, "usage", &usage);
        }
        if let Some(key) = &self.output_key {
            state.set(key.clone(), response.content.clone());
        }
        Ok(Value::String(response.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkflowEvent;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` calls, then answers with the prompt.
    struct ScriptedAgent {
        failures: usize,
        calls: AtomicUsize,
        requests: Mutex<Vec<AgentRequest>>,
    }

    impl ScriptedAgent {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(
            &self,
            _ctx: &ExecutionContext,
            request: AgentRequest,
        ) -> Result<AgentResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            if call < self.failures {
                return Err(Error::Execution(format!("provider error #{call}")));
            }
            Ok(AgentResponse {
                content: format!("re: {}", request.prompt),
                usage: Some(TokenUsage { prompt: 10, completion: 5 }),
            })
        }
    }

    /// Never answers.
    struct HangingAgent;

    #[async_trait]
    impl Agent for HangingAgent {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn invoke(
            &self,
            _ctx: &ExecutionContext,
            _request: AgentRequest,
        ) -> Result<AgentResponse> {
            futures::future::pending().await
        }
    }

    #[test]
    fn test_render_prompt() {
        let state = FlowState::new();
        state.set("topic", "borrowck");
        state.set("n", 3);
        assert_eq!(
            render_prompt("Write {n} notes on {topic}.", &state).unwrap(),
            "Write 3 notes on borrowck."
        );
        assert_eq!(render_prompt("no placeholders", &state).unwrap(), "no placeholders");
        assert_eq!(render_prompt("open { brace", &state).unwrap(), "open { brace");
        assert!(matches!(
            render_prompt("{missing}", &state),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_render_prompt_keeps_literal_braces() {
        let state = FlowState::new();
        state.set("topic", "rust");
        assert_eq!(
            render_prompt(r#"Reply as {"topic": "{topic}", "n": 1}"#, &state).unwrap(),
            r#"Reply as {"topic": "rust", "n": 1}"#
        );
        assert_eq!(
            render_prompt("{{topic}} is {topic}", &state).unwrap(),
            "{topic} is rust"
        );
        assert_eq!(render_prompt("{} and }}", &state).unwrap(), "{} and }");
    }

    #[test]
    fn test_token_total_saturates() {
        let usage = TokenUsage {
            prompt: u32::MAX,
            completion: 7,
        };
        assert_eq!(usage.total(), u32::MAX);
    }

    #[tokio::test]
    async fn test_stores_output_and_records_usage() {
        let agent = ScriptedAgent::new(0);
        let job = AgentJob::new("reply", agent.clone(), "hi {name}")
            .with_system("be brief")
            .with_output_key("answer");

        let ctx = ExecutionContext::new();
        let state = FlowState::new();
        state.set("name", "ada");

        let value = job.run(&ctx, &state).await.unwrap();
        assert_eq!(value, json!("re: hi ada"));
        assert_eq!(state.get_string("answer").as_deref(), Some("re: hi ada"));

        let requests = agent.requests.lock().unwrap().clone();
        assert_eq!(requests[0].system.as_deref(), Some("be brief"));

        let usage = ctx.event_snapshot().into_iter().find_map(|e| match e.event {
            WorkflowEvent::Artifact { key, data, .. } if key == "usage" => Some(data),
            _ => None,
        });
        assert_eq!(usage, Some(json!({"prompt": 10, "completion": 5})));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let agent = ScriptedAgent::new(2);
        let job = AgentJob::new("retry", agent.clone(), "ping")
            .with_max_attempts(3)
            .with_retry_delay(Duration::from_millis(1));

        let value = job.run(&ExecutionContext::new(), &FlowState::new()).await.unwrap();
        assert_eq!(value, json!("re: ping"));
        assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let agent = ScriptedAgent::new(5);
        let job = AgentJob::new("retry", agent.clone(), "ping")
            .with_max_attempts(2)
            .with_retry_delay(Duration::from_millis(1));

        let err = job.run(&ExecutionContext::new(), &FlowState::new()).await.unwrap_err();
        assert!(err.to_string().contains("provider error #1"));
        assert_eq!(agent.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_pending_call() {
        let job = AgentJob::new("stuck", Arc::new(HangingAgent), "wait");
        let ctx = ExecutionContext::new();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), job.run(&ctx, &FlowState::new()))
            .await
            .expect("cancellation should end the call");
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_placeholder_fails_before_calling() {
        let agent = ScriptedAgent::new(0);
        let job = AgentJob::new("reply", agent.clone(), "{absent}");
        let err = job.run(&ExecutionContext::new(), &FlowState::new()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(agent.calls.load(Ordering::SeqCst), 0);
    }
}
