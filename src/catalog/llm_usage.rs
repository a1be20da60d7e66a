//! LLM token-usage instruments (`llm_*`).
//!
//! `llm_usage_failures_total` is emitted with the same four-label shape as every other
//! usage counter in this subsystem (`{component, provider, model, outcome}`), resolving
//! the label-shape ambiguity noted in `spec.md` §9.3 — see `DESIGN.md`.

use opentelemetry::metrics::{Counter, Histogram, Meter};

use super::execution::kv;
use crate::names::name;

const SUBSYSTEM: &str = "llm_usage";

fn latency_buckets() -> Vec<f64> {
    vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
}

/// Instruments recording LLM prompt/completion token usage and call outcomes.
#[derive(Clone, Debug)]
pub struct LlmUsageMetrics {
    prompt_tokens: Counter<u64>,
    completion_tokens: Counter<u64>,
    events: Counter<u64>,
    failures: Counter<u64>,
    latency: Histogram<f64>,
}

impl LlmUsageMetrics {
    pub(super) fn build(meter: &Meter) -> Self {
        Self {
            prompt_tokens: meter
                .u64_counter(name(SUBSYSTEM, "llm_prompt_tokens_total"))
                .with_description("Prompt tokens consumed, by component/provider/model.")
                .build(),
            completion_tokens: meter
                .u64_counter(name(SUBSYSTEM, "llm_completion_tokens_total"))
                .with_description("Completion tokens produced, by component/provider/model.")
                .build(),
            events: meter
                .u64_counter(name(SUBSYSTEM, "llm_usage_events_total"))
                .with_description("LLM calls completed, by component/provider/model/outcome.")
                .build(),
            failures: meter
                .u64_counter(name(SUBSYSTEM, "llm_usage_failures_total"))
                .with_description("LLM calls that failed, by component/provider/model/outcome.")
                .build(),
            latency: meter
                .f64_histogram(name(SUBSYSTEM, "llm_usage_latency_seconds"))
                .with_unit("s")
                .with_boundaries(latency_buckets())
                .with_description("LLM call latency, by component/provider/model/outcome.")
                .build(),
        }
    }

    pub(super) fn noop() -> Self {
        Self::build(super::noop_meter())
    }

    fn labels(component: &str, provider: &str, model: &str, outcome: &str) -> [opentelemetry::KeyValue; 4] {
        [
            kv("component", component),
            kv("provider", provider),
            kv("model", model),
            kv("outcome", outcome),
        ]
    }

    /// Record a successful LLM call: token counts, the usage event, and latency.
    pub fn record_success(
        &self,
        component: &str,
        provider: &str,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        seconds: f64,
    ) {
        let labels = Self::labels(component, provider, model, "success");
        self.prompt_tokens.add(prompt_tokens, &labels);
        self.completion_tokens.add(completion_tokens, &labels);
        self.events.add(1, &labels);
        self.latency.record(seconds, &labels);
    }

    /// Record a failed LLM call.
    pub fn record_failure(&self, component: &str, provider: &str, model: &str, seconds: f64) {
        let labels = Self::labels(component, provider, model, "failure");
        self.events.add(1, &labels);
        self.failures.add(1, &labels);
        self.latency.record(seconds, &labels);
    }
}

/// Provider-facing facade over the same `llm_*` instruments as [`LlmUsageMetrics`]
/// (`spec.md` §4.5 `LLMProviderMetrics()`, §9 "provider" facade).
///
/// [`LlmUsageMetrics`] is recorded by callers that know which component invoked the
/// LLM (a workflow step, a tool); this facade is recorded from inside the provider
/// client abstraction itself, which has no such component to report. Its calls carry
/// an empty `component` label, normalized to `"unknown"` by [`kv`] per the catalog's
/// label-normalization policy, rather than duplicating the instrument set.
#[derive(Clone, Debug)]
pub struct LlmProviderMetrics {
    inner: LlmUsageMetrics,
}

impl LlmProviderMetrics {
    pub(super) fn new(inner: LlmUsageMetrics) -> Self {
        Self { inner }
    }

    pub(super) fn noop() -> Self {
        Self::new(LlmUsageMetrics::noop())
    }

    /// Record a successful provider call: token counts, the usage event, and latency.
    pub fn record_success(&self, provider: &str, model: &str, prompt_tokens: u64, completion_tokens: u64, seconds: f64) {
        self.inner
            .record_success("", provider, model, prompt_tokens, completion_tokens, seconds);
    }

    /// Record a failed provider call.
    pub fn record_failure(&self, provider: &str, model: &str, seconds: f64) {
        self.inner.record_failure("", provider, model, seconds);
    }
}
