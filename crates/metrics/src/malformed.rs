//! Counters for responses that should have carried a tool call but did not.
//!
//! Counts are bucketed by reason at four levels: overall, per provider, per
//! model within a provider, and per tool within a model.

use std::{
    collections::BTreeMap,
    sync::{LazyLock, Mutex},
};

use {
    mend_toolcalls::{Diagnosis, MalformedReason},
    serde::Serialize,
};

use crate::{counter, toolcalls};

pub const UNKNOWN_PROVIDER: &str = "unknown-provider";
pub const UNKNOWN_MODEL: &str = "unknown-model";
pub const UNKNOWN_TOOL: &str = "unknown-tool";

/// One counter per [`MalformedReason`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReasonCounts {
    pub truncated: u64,
    pub validation_failed: u64,
    pub malformed_json: u64,
    pub natural_language_intent: u64,
}

impl ReasonCounts {
    pub fn get(&self, reason: MalformedReason) -> u64 {
        match reason {
            MalformedReason::Truncated => self.truncated,
            MalformedReason::ValidationFailed => self.validation_failed,
            MalformedReason::MalformedJson => self.malformed_json,
            MalformedReason::NaturalLanguageIntent => self.natural_language_intent,
        }
    }

    pub fn total(&self) -> u64 {
        self.truncated + self.validation_failed + self.malformed_json + self.natural_language_intent
    }

    fn bump(&mut self, reason: MalformedReason) {
        let slot = match reason {
            MalformedReason::Truncated => &mut self.truncated,
            MalformedReason::ValidationFailed => &mut self.validation_failed,
            MalformedReason::MalformedJson => &mut self.malformed_json,
            MalformedReason::NaturalLanguageIntent => &mut self.natural_language_intent,
        };
        *slot += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelMetrics {
    pub total: ReasonCounts,
    pub by_tool: BTreeMap<String, ReasonCounts>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderMetrics {
    pub total: ReasonCounts,
    pub by_model: BTreeMap<String, ModelMetrics>,
}

/// A point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MalformedMetrics {
    pub total: ReasonCounts,
    pub by_provider: BTreeMap<String, ProviderMetrics>,
}

impl MalformedMetrics {
    pub fn is_empty(&self) -> bool {
        self.total.total() == 0
    }
}

fn label<'a>(value: Option<&'a str>, fallback: &'a str) -> &'a str {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => fallback,
    }
}

/// Process-wide malformed-call counters, shared by reference.
#[derive(Debug, Default)]
pub struct MalformedMetricsStore {
    inner: Mutex<MalformedMetrics>,
}

impl MalformedMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one malformed response. Blank labels fall back to
    /// `unknown-provider`, `unknown-model` and `unknown-tool`.
    pub fn record(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
        reason: MalformedReason,
        tool: Option<&str>,
    ) {
        let provider = label(provider, UNKNOWN_PROVIDER);
        let model = label(model, UNKNOWN_MODEL);
        let tool = label(tool, UNKNOWN_TOOL);

        {
            let mut metrics = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            metrics.total.bump(reason);
            let by_provider = metrics.by_provider.entry(provider.to_string()).or_default();
            by_provider.total.bump(reason);
            let by_model = by_provider.by_model.entry(model.to_string()).or_default();
            by_model.total.bump(reason);
            by_model.by_tool.entry(tool.to_string()).or_default().bump(reason);
        }

        counter!(
            toolcalls::MALFORMED_TOTAL,
            "provider" => provider.to_string(),
            "model" => model.to_string(),
            "tool" => tool.to_string(),
            "reason" => reason.as_str()
        )
        .increment(1);
        tracing::debug!(provider, model, tool, reason = %reason, "recorded malformed tool call");
    }

    /// Count a diagnosis. Telemetry-only diagnoses are counted like any other.
    pub fn record_diagnosis(&self, provider: Option<&str>, model: Option<&str>, diagnosis: &Diagnosis) {
        self.record(provider, model, diagnosis.reason, diagnosis.tool_name.as_deref());
    }

    /// Deep copy of the current counters.
    pub fn snapshot(&self) -> MalformedMetrics {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Zero every counter.
    pub fn reset(&self) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = MalformedMetrics::default();
    }
}

// ── Process-wide store ──────────────────────────────────────────────────────

/// The store behind [`record_malformed`], [`snapshot_metrics`] and
/// [`reset_metrics`]. Hosts that want isolated counters create their own
/// [`MalformedMetricsStore`] instead.
pub fn shared_store() -> &'static MalformedMetricsStore {
    static STORE: LazyLock<MalformedMetricsStore> = LazyLock::new(MalformedMetricsStore::new);
    &STORE
}

pub fn record_malformed(
    provider: Option<&str>,
    model: Option<&str>,
    reason: MalformedReason,
    tool: Option<&str>,
) {
    shared_store().record(provider, model, reason, tool);
}

pub fn snapshot_metrics() -> MalformedMetrics {
    shared_store().snapshot()
}

pub fn reset_metrics() {
    shared_store().reset();
}
