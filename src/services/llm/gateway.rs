//! Typed gateway over the chat transport.
//!
//! Every pipeline stage that talks to the model goes through [`LlmGateway`]:
//! scenarios serialize themselves into the user prompt, the gateway enforces
//! the per-call budget, retries transient transport faults with jittered
//! backoff, recovers one JSON-parse failure with a repair prompt, validates
//! the output into the scenario's typed response, and records token usage
//! and cost into the request tracer. Raw model output never leaves this
//! module.

use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::models::{LlmError, Pricing, TokenUsage};
use super::transport::{ChatCall, ChatOutcome, LlmTransport};
use crate::services::tracer::PipelineTracer;

/// Total wall-clock budget for one gateway call, retries included.
const CALL_BUDGET: Duration = Duration::from_secs(30);
/// Transport attempts per chat (initial + retries).
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_JITTER_MS: u64 = 250;

/// A single structured call to the model. The serialized form of the
/// implementor is the user prompt.
pub trait LlmScenario: Serialize + Send + Sync {
    type Response: DeserializeOwned + Send;

    fn name(&self) -> &'static str;

    fn system_prompt(&self) -> String;

    fn temperature(&self) -> f64 {
        0.2
    }

    fn max_tokens(&self) -> u32 {
        4096
    }
}

pub struct LlmGateway {
    transport: Arc<dyn LlmTransport>,
    pricing: Pricing,
}

impl LlmGateway {
    pub fn new(transport: Arc<dyn LlmTransport>, pricing: Pricing) -> Self {
        Self { transport, pricing }
    }

    /// Run a scenario call and return its validated response.
    ///
    /// Token usage of every completed chat (including a failed parse and its
    /// repair) is charged to the tracer; a cancelled in-flight chat charges
    /// nothing.
    pub async fn call<S: LlmScenario>(
        &self,
        scenario: &S,
        tracer: &PipelineTracer,
        cancel: &CancellationToken,
    ) -> Result<S::Response, LlmError> {
        let started = Instant::now();
        let user_prompt = serde_json::to_string_pretty(scenario)?;
        let call = ChatCall {
            system_prompt: scenario.system_prompt(),
            user_prompt,
            temperature: scenario.temperature(),
            max_tokens: scenario.max_tokens(),
        };

        let outcome = self.chat_with_retry(&call, cancel, started).await?;
        let mut usage = outcome.usage;

        match parse_json_response::<S::Response>(&outcome.content) {
            Ok(response) => {
                self.charge(scenario.name(), tracer, &usage);
                Ok(response)
            },
            Err(parse_err) => {
                tracing::warn!(
                    "LLM call {} returned unparseable JSON, attempting repair: {}",
                    scenario.name(),
                    parse_err
                );

                let repair_call = ChatCall {
                    system_prompt: call.system_prompt.clone(),
                    user_prompt: repair_prompt(&call.user_prompt, &outcome.content, &parse_err),
                    temperature: 0.0,
                    max_tokens: call.max_tokens,
                };

                let repair_outcome = self.chat_with_retry(&repair_call, cancel, started).await;
                match repair_outcome {
                    Ok(repaired) => {
                        usage.add(repaired.usage);
                        match parse_json_response::<S::Response>(&repaired.content) {
                            Ok(response) => {
                                self.charge(scenario.name(), tracer, &usage);
                                Ok(response)
                            },
                            Err(e) => {
                                self.charge(scenario.name(), tracer, &usage);
                                Err(LlmError::InvalidOutput(e))
                            },
                        }
                    },
                    Err(LlmError::Cancelled) => Err(LlmError::Cancelled),
                    Err(e) => {
                        self.charge(scenario.name(), tracer, &usage);
                        Err(e)
                    },
                }
            },
        }
    }

    fn charge(&self, name: &str, tracer: &PipelineTracer, usage: &TokenUsage) {
        tracer.record_llm(name, usage, self.pricing.cost_usd(usage));
    }

    /// One chat with transient-fault retries inside the remaining budget.
    async fn chat_with_retry(
        &self,
        call: &ChatCall,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<ChatOutcome, LlmError> {
        let mut last_err = LlmError::Timeout(CALL_BUDGET.as_secs());

        for attempt in 0..MAX_ATTEMPTS {
            let remaining = match CALL_BUDGET.checked_sub(started.elapsed()) {
                Some(r) if !r.is_zero() => r,
                _ => return Err(LlmError::Timeout(CALL_BUDGET.as_secs())),
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                r = tokio::time::timeout(remaining, self.transport.chat(call)) => {
                    r.unwrap_or(Err(LlmError::Timeout(CALL_BUDGET.as_secs())))
                }
            };

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff = BACKOFF_BASE_MS * 2u64.pow(attempt)
                        + rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
                    tracing::debug!(
                        "LLM transport attempt {} failed ({}), backing off {}ms",
                        attempt + 1,
                        e,
                        backoff
                    );
                    last_err = e;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_millis(backoff)) => {}
                    }
                },
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }
}

/// Parse model output, tolerating markdown code fences some providers emit
/// even in JSON mode.
fn parse_json_response<T: DeserializeOwned>(content: &str) -> Result<T, String> {
    let trimmed = content.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    serde_json::from_str(stripped).map_err(|e| e.to_string())
}

fn repair_prompt(original_user_prompt: &str, bad_content: &str, parse_error: &str) -> String {
    format!(
        "Your previous reply could not be parsed against the required JSON schema.\n\
         Parse error: {}\n\n\
         Your reply was:\n{}\n\n\
         Original request:\n{}\n\n\
         Respond again with ONLY the corrected JSON object. No prose, no code fences.",
        parse_error, bad_content, original_user_prompt
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Serialize)]
    struct EchoScenario;

    #[derive(Debug, Deserialize, PartialEq)]
    struct EchoResponse {
        value: i64,
    }

    impl LlmScenario for EchoScenario {
        type Response = EchoResponse;

        fn name(&self) -> &'static str {
            "echo"
        }

        fn system_prompt(&self) -> String {
            "echo".into()
        }
    }

    /// Transport returning scripted replies in order.
    struct ScriptedTransport {
        replies: Mutex<Vec<Result<ChatOutcome, LlmError>>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<ChatOutcome, LlmError>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies) })
        }
    }

    #[async_trait]
    impl LlmTransport for ScriptedTransport {
        async fn chat(&self, _call: &ChatCall) -> Result<ChatOutcome, LlmError> {
            self.replies
                .lock()
                .unwrap()
                .remove(0)
        }
    }

    fn ok(content: &str, input: i64, output: i64) -> Result<ChatOutcome, LlmError> {
        Ok(ChatOutcome {
            content: content.to_string(),
            usage: TokenUsage { input, output },
        })
    }

    fn gateway(transport: Arc<dyn LlmTransport>) -> LlmGateway {
        LlmGateway::new(transport, Pricing { input_cost_per_1k: 1.0, output_cost_per_1k: 2.0 })
    }

    #[tokio::test]
    async fn parses_and_charges() {
        let gw = gateway(ScriptedTransport::new(vec![ok(r#"{"value": 7}"#, 100, 10)]));
        let tracer = PipelineTracer::new();
        let resp = gw
            .call(&EchoScenario, &tracer, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp, EchoResponse { value: 7 });
        assert_eq!(tracer.total_tokens(), 110);
    }

    #[tokio::test]
    async fn tolerates_code_fences() {
        let gw = gateway(ScriptedTransport::new(vec![ok("```json\n{\"value\": 3}\n```", 1, 1)]));
        let tracer = PipelineTracer::new();
        let resp = gw
            .call(&EchoScenario, &tracer, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.value, 3);
    }

    #[tokio::test]
    async fn repairs_parse_failure_once() {
        let gw = gateway(ScriptedTransport::new(vec![
            ok("not json at all", 50, 5),
            ok(r#"{"value": 42}"#, 60, 6),
        ]));
        let tracer = PipelineTracer::new();
        let resp = gw
            .call(&EchoScenario, &tracer, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.value, 42);
        // both calls charged together
        assert_eq!(tracer.total_tokens(), 121);
    }

    #[tokio::test]
    async fn second_parse_failure_is_invalid_output() {
        let gw = gateway(ScriptedTransport::new(vec![
            ok("still not json", 10, 1),
            ok("worse", 10, 1),
        ]));
        let tracer = PipelineTracer::new();
        let err = gw
            .call(&EchoScenario, &tracer, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidOutput(_)));
        // usage of the failed attempts is still accounted
        assert_eq!(tracer.total_tokens(), 22);
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let gw = gateway(ScriptedTransport::new(vec![
            Err(LlmError::ApiError("503".into())),
            ok(r#"{"value": 1}"#, 5, 5),
        ]));
        let tracer = PipelineTracer::new();
        let resp = gw
            .call(&EchoScenario, &tracer, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.value, 1);
    }

    #[tokio::test]
    async fn cancelled_token_aborts() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let gw = gateway(ScriptedTransport::new(vec![ok(r#"{"value": 1}"#, 5, 5)]));
        let tracer = PipelineTracer::new();
        let err = gw.call(&EchoScenario, &tracer, &cancel).await.unwrap_err();
        assert!(matches!(err, LlmError::Cancelled));
        assert_eq!(tracer.total_tokens(), 0);
    }
}
