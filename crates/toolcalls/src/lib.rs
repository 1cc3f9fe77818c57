//! Tool-call extraction for LLM output: locate candidate JSON, repair it,
//! validate it against the tool registry, classify read-only vs mutating,
//! and diagnose responses that should have carried a call but did not.

pub mod config;
pub mod detect;
pub mod diagnose;
pub mod error;
pub mod json_repair;
pub mod registry;
pub mod scanner;

pub use {
    config::{DEFAULT_MAX_AUTOCLOSE_DEPTH, DetectionConfig, MutatingPolicy},
    detect::{DetectionResult, Detector, Outcome, detect, detect_all},
    diagnose::{Diagnosis, MalformedReason, diagnose},
    error::{Error, Result},
    json_repair::{repair_json, repair_json_with_depth},
    registry::{CallKind, ParsedCall, ToolCall, ToolName, check_call, validate_tool_call},
};
