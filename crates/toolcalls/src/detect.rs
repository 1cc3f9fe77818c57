//! Detection entry points: scan, repair, validate, then dedup and apply
//! read-only / mutating precedence.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::{debug, trace},
};

use crate::{
    config::{DetectionConfig, MutatingPolicy},
    diagnose::Diagnosis,
    json_repair::repair_json_with_depth,
    registry::{CallKind, ParsedCall, Rejection, check_call},
    scanner::{Candidate, scan},
};

/// Calls detected in one response.
///
/// `read_only` keeps first-seen order with structural duplicates removed;
/// `mutating` holds at most one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub read_only: Vec<ParsedCall>,
    pub mutating: Option<ParsedCall>,
}

impl DetectionResult {
    pub fn is_empty(&self) -> bool {
        self.read_only.is_empty() && self.mutating.is_none()
    }

    pub fn len(&self) -> usize {
        self.read_only.len() + usize::from(self.mutating.is_some())
    }

    /// Read-only calls in order, then the mutating call.
    pub fn calls(&self) -> impl Iterator<Item = &ParsedCall> {
        self.read_only.iter().chain(self.mutating.as_ref())
    }
}

/// Result of [`Detector::detect_or_diagnose`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Calls(DetectionResult),
    /// Nothing detected; `None` means the text reads as an ordinary reply.
    Diagnosed(Option<Diagnosis>),
}

/// What became of one candidate.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CandidateOutcome {
    Accepted(ParsedCall),
    Rejected(Rejection),
    /// Neither the strict parse nor repair produced an object.
    Unparseable,
}

pub(crate) struct Evaluated<'a> {
    pub candidate: Candidate<'a>,
    pub outcome: CandidateOutcome,
}

/// Detection bound to a [`DetectionConfig`].
#[derive(Debug, Clone, Default)]
pub struct Detector {
    config: DetectionConfig,
}

impl Detector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Strict parse, falling back to repair.
    pub fn parse_candidate(&self, text: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(text) {
            Ok(v) => Some(v),
            Err(_) => repair_json_with_depth(text, self.config.max_autoclose_depth),
        }
    }

    /// Return the first candidate, in scan order, that `validator` accepts.
    ///
    /// Each candidate is tried strictly first; repair only runs when the
    /// strict parse fails.
    pub fn detect<T, F>(&self, text: &str, validator: F) -> Option<T>
    where
        F: Fn(&Value) -> Option<T>,
    {
        scan(text).into_iter().find_map(|candidate| {
            let parsed = self.parse_candidate(candidate.text)?;
            let accepted = validator(&parsed);
            if accepted.is_none() {
                trace!(start = candidate.start, "candidate rejected by validator");
            }
            accepted
        })
    }

    /// First known tool call in the text, using the registry validator.
    pub fn detect_call(&self, text: &str) -> Option<ParsedCall> {
        let infer = self.config.infer_bare_shapes;
        self.detect(text, |parsed| check_call(parsed, infer).ok())
    }

    /// Every distinct call in the text, with precedence applied.
    pub fn detect_all(&self, text: &str) -> DetectionResult {
        let mut result = DetectionResult::default();

        for evaluated in self.evaluate(text) {
            let CandidateOutcome::Accepted(call) = evaluated.outcome else {
                continue;
            };
            match call.kind() {
                CallKind::ReadOnly => {
                    if result.read_only.iter().any(|seen| seen.same_call(&call)) {
                        trace!(tool = %call.tool, "dropping duplicate read-only call");
                    } else {
                        result.read_only.push(call);
                    }
                },
                CallKind::Mutating => match self.config.mutating_policy {
                    MutatingPolicy::Last => result.mutating = Some(call),
                    MutatingPolicy::First => {
                        if result.mutating.is_none() {
                            result.mutating = Some(call);
                        }
                    },
                },
                CallKind::Unknown => {},
            }
        }

        if !result.is_empty() {
            debug!(
                read_only = result.read_only.len(),
                mutating = result.mutating.as_ref().map(|c| c.tool.as_str()),
                "detected tool calls"
            );
        }
        result
    }

    /// Detect, and diagnose when nothing was found.
    pub fn detect_or_diagnose(&self, text: &str) -> Outcome {
        let result = self.detect_all(text);
        if result.is_empty() {
            Outcome::Diagnosed(self.diagnose(text))
        } else {
            Outcome::Calls(result)
        }
    }

    /// Run every candidate through parse, repair and validation.
    pub(crate) fn evaluate<'a>(&self, text: &'a str) -> Vec<Evaluated<'a>> {
        let infer = self.config.infer_bare_shapes;
        scan(text)
            .into_iter()
            .map(|candidate| {
                let outcome = match self.parse_candidate(candidate.text) {
                    Some(parsed) => match check_call(&parsed, infer) {
                        Ok(call) => CandidateOutcome::Accepted(call),
                        Err(rejection) => CandidateOutcome::Rejected(rejection),
                    },
                    None => CandidateOutcome::Unparseable,
                };
                Evaluated { candidate, outcome }
            })
            .collect()
    }
}

/// [`Detector::detect`] with the default configuration.
pub fn detect<T, F>(text: &str, validator: F) -> Option<T>
where
    F: Fn(&Value) -> Option<T>,
{
    Detector::default().detect(text, validator)
}

/// [`Detector::detect_all`] with the default configuration.
pub fn detect_all(text: &str) -> DetectionResult {
    Detector::default().detect_all(text)
}
