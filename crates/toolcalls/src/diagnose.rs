//! Explain why a response that looked like it wanted a tool produced none.
//!
//! Checks run in a fixed order and the first hit wins: truncation, failed
//! validation, unparseable JSON, then first-person intent in prose. Anything
//! else is an ordinary reply and diagnoses to `None`; an ambiguous sentence
//! stays silent rather than risk a false report.

use std::{fmt, str::FromStr, sync::LazyLock};

use {
    regex::Regex,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::{
    Error,
    detect::{CandidateOutcome, Detector, Evaluated},
    json_repair::open_brace_depth,
    registry::{Rejection, ToolName},
};

/// Why no call was detected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MalformedReason {
    Truncated,
    ValidationFailed,
    MalformedJson,
    NaturalLanguageIntent,
}

impl MalformedReason {
    pub const ALL: &'static [MalformedReason] = &[
        Self::Truncated,
        Self::ValidationFailed,
        Self::MalformedJson,
        Self::NaturalLanguageIntent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Truncated => "truncated",
            Self::ValidationFailed => "validation_failed",
            Self::MalformedJson => "malformed_json",
            Self::NaturalLanguageIntent => "natural_language_intent",
        }
    }
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MalformedReason {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|reason| reason.as_str() == s)
            .ok_or_else(|| Error::message(format!("unknown malformed reason: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub reason: MalformedReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Recorded for metrics only; never shown to the user.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub telemetry_only: bool,
}

impl Diagnosis {
    fn new(reason: MalformedReason, tool: Option<ToolName>) -> Self {
        Self {
            reason,
            tool_name: tool.map(|t| t.as_str().to_string()),
            telemetry_only: false,
        }
    }
}

#[allow(clippy::expect_used)]
fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("built-in pattern compiles")
}

/// `{"tool": "name"` in any quote style; the name is captured only when its
/// closing quote arrived.
static TOOL_OPENING: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"\{\s*["']?tool["']?\s*:\s*(?:["']([A-Za-z0-9_.\-]+)["'])?"#));

/// First-person commitment at the start of a sentence, after optional
/// filler; captures the rest of the sentence.
static COMMITMENT: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"^(?:(?:ok|okay|sure|alright|great|right|now|so|next|then|first)\b[\s,!:-]*)*(?:i'll|i will|we'll|we will|let me|let's|(?:i'm|i am|we're|we are)(?:\s+now)?(?:\s+going to|\s+gonna)?)\s+(.+)$",
    )
});

static NEGATED: LazyLock<Regex> = LazyLock::new(|| pattern(r"^(?:not|never)\b"));

static HEDGED: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"\b(?:if|when|whenever|unless|once|may|might|could|would|should|maybe|perhaps)\b")
});

static DELEGATION_VERB: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"\b(?:delegat(?:e|ing)|hand(?:ing)?|pass(?:ing)?|assign(?:ing)?|send(?:ing)?|forward(?:ing)?|rout(?:e|ing)|ask(?:ing)?)\b",
    )
});

static DELEGATION_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"\b(?:(coder|coding agent)|(researcher|research agent))\b")
});

impl Detector {
    /// Diagnose a response. Returns `None` when it holds a valid call or
    /// reads as an ordinary reply.
    pub fn diagnose(&self, text: &str) -> Option<Diagnosis> {
        let evaluated = self.evaluate(text);
        if evaluated
            .iter()
            .any(|e| matches!(e.outcome, CandidateOutcome::Accepted(_)))
        {
            return None;
        }

        let diagnosis = truncation(text)
            .or_else(|| validation_failure(&evaluated))
            .or_else(|| malformed_json(&evaluated))
            .or_else(|| natural_language_intent(text));

        if let Some(d) = &diagnosis {
            debug!(
                reason = %d.reason,
                tool = d.tool_name.as_deref().unwrap_or(""),
                telemetry_only = d.telemetry_only,
                "diagnosed missing tool call"
            );
        }
        diagnosis
    }
}

/// [`Detector::diagnose`] with the default configuration.
pub fn diagnose(text: &str) -> Option<Diagnosis> {
    Detector::default().diagnose(text)
}

// ── Checks ──────────────────────────────────────────────────────────────────

fn truncation(text: &str) -> Option<Diagnosis> {
    let opening = TOOL_OPENING.captures_iter(text).last()?;
    let start = opening.get(0)?.start();
    if open_brace_depth(&text[start..]) == 0 {
        return None;
    }
    let tool = opening
        .get(1)
        .and_then(|name| ToolName::lookup(name.as_str()));
    Some(Diagnosis::new(MalformedReason::Truncated, tool))
}

fn validation_failure(evaluated: &[Evaluated<'_>]) -> Option<Diagnosis> {
    let rejections = || {
        evaluated.iter().filter_map(|e| match &e.outcome {
            CandidateOutcome::Rejected(rejection) => Some(rejection),
            _ => None,
        })
    };

    if let Some(tool) = rejections().find_map(|r| match r {
        Rejection::InvalidArgs { tool, .. } => Some(*tool),
        _ => None,
    }) {
        return Some(Diagnosis::new(MalformedReason::ValidationFailed, Some(tool)));
    }

    rejections()
        .any(|r| matches!(r, Rejection::UnknownTool(_)))
        .then_some(Diagnosis {
            reason: MalformedReason::ValidationFailed,
            tool_name: None,
            telemetry_only: true,
        })
}

fn malformed_json(evaluated: &[Evaluated<'_>]) -> Option<Diagnosis> {
    evaluated
        .iter()
        .any(|e| {
            e.outcome == CandidateOutcome::Unparseable && TOOL_OPENING.is_match(e.candidate.text)
        })
        .then(|| Diagnosis::new(MalformedReason::MalformedJson, None))
}

fn natural_language_intent(text: &str) -> Option<Diagnosis> {
    text.split(['.', '!', '?', ';', '\n'])
        .find_map(|sentence| {
            let sentence = sentence.trim().to_lowercase().replace('\u{2019}', "'");
            delegation_intent(&sentence)
        })
        .map(|tool| Diagnosis::new(MalformedReason::NaturalLanguageIntent, Some(tool)))
}

/// The delegation a lowercased sentence commits to, if any.
fn delegation_intent(sentence: &str) -> Option<ToolName> {
    let rest = COMMITMENT.captures(sentence)?.get(1)?.as_str();
    if NEGATED.is_match(rest) || HEDGED.is_match(rest) {
        return None;
    }
    let verb = DELEGATION_VERB.find(rest)?;
    let target = DELEGATION_TARGET.captures(&rest[verb.end()..])?;
    if target.get(1).is_some() {
        Some(ToolName::DelegateCoder)
    } else {
        Some(ToolName::DelegateResearcher)
    }
}
