//! Per-request pipeline tracer.
//!
//! Collects stage timings, LLM call stats and cost for one request and is
//! attached to the final payload as `_pipeline`. Observation only; nothing
//! reads it to make decisions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use uuid::Uuid;

use super::llm::TokenUsage;

#[derive(Debug, Clone, Serialize)]
pub struct StageTrace {
    pub name: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmCallTrace {
    pub name: String,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceTotals {
    pub tokens: i64,
    pub cost_usd: f64,
}

/// Serializable `_pipeline` payload.
#[derive(Debug, Clone, Serialize)]
pub struct TraceReport {
    pub pipeline_id: Uuid,
    pub stages: Vec<StageTrace>,
    pub llm_calls: Vec<LlmCallTrace>,
    pub totals: TraceTotals,
}

#[derive(Default)]
struct TracerInner {
    stages: Vec<StageTrace>,
    llm_calls: Vec<LlmCallTrace>,
}

pub struct PipelineTracer {
    pipeline_id: Uuid,
    inner: Mutex<TracerInner>,
}

impl Default for PipelineTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineTracer {
    pub fn new() -> Self {
        Self { pipeline_id: Uuid::new_v4(), inner: Mutex::new(TracerInner::default()) }
    }

    pub fn pipeline_id(&self) -> Uuid {
        self.pipeline_id
    }

    pub fn begin_stage(&self, name: &str) {
        let mut inner = self.inner.lock().expect("tracer lock");
        inner.stages.push(StageTrace {
            name: name.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            ok: None,
        });
    }

    /// Close the most recent open stage with the given name.
    pub fn end_stage(&self, name: &str, ok: bool) {
        let mut inner = self.inner.lock().expect("tracer lock");
        if let Some(stage) = inner
            .stages
            .iter_mut()
            .rev()
            .find(|s| s.name == name && s.ended_at.is_none())
        {
            stage.ended_at = Some(Utc::now());
            stage.ok = Some(ok);
        }
    }

    pub fn record_llm(&self, name: &str, usage: &TokenUsage, cost_usd: f64) {
        let mut inner = self.inner.lock().expect("tracer lock");
        inner.llm_calls.push(LlmCallTrace {
            name: name.to_string(),
            tokens_in: usage.input,
            tokens_out: usage.output,
            cost_usd,
        });
    }

    pub fn total_tokens(&self) -> i64 {
        let inner = self.inner.lock().expect("tracer lock");
        inner.llm_calls.iter().map(|c| c.tokens_in + c.tokens_out).sum()
    }

    pub fn total_cost_usd(&self) -> f64 {
        let inner = self.inner.lock().expect("tracer lock");
        inner.llm_calls.iter().map(|c| c.cost_usd).sum()
    }

    pub fn report(&self) -> TraceReport {
        let inner = self.inner.lock().expect("tracer lock");
        TraceReport {
            pipeline_id: self.pipeline_id,
            stages: inner.stages.clone(),
            llm_calls: inner.llm_calls.clone(),
            totals: TraceTotals {
                tokens: inner.llm_calls.iter().map(|c| c.tokens_in + c.tokens_out).sum(),
                cost_usd: inner.llm_calls.iter().map(|c| c.cost_usd).sum(),
            },
        }
    }
}
