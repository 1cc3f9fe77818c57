//! Known tools, their kinds, and the shape checks that accept a parsed
//! candidate as a call.
//!
//! Each tool decodes into its own typed variant of [`ToolCall`]; validation is
//! "does the candidate decode", plus non-empty checks on required strings.

use std::fmt;

use {
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
    tracing::trace,
};

/// Whether a call can change external state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    ReadOnly,
    Mutating,
    Unknown,
}

/// The closed set of tools the engine recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    SearchFiles,
    ReadFile,
    WebSearch,
    FetchPr,
    SandboxReadFile,
    SandboxDiff,
    AskUser,
    SandboxExec,
    SandboxWriteFile,
    SandboxPrepareCommit,
    DelegateCoder,
    DelegateResearcher,
}

impl ToolName {
    pub const ALL: &'static [ToolName] = &[
        Self::SearchFiles,
        Self::ReadFile,
        Self::WebSearch,
        Self::FetchPr,
        Self::SandboxReadFile,
        Self::SandboxDiff,
        Self::AskUser,
        Self::SandboxExec,
        Self::SandboxWriteFile,
        Self::SandboxPrepareCommit,
        Self::DelegateCoder,
        Self::DelegateResearcher,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SearchFiles => "search_files",
            Self::ReadFile => "read_file",
            Self::WebSearch => "web_search",
            Self::FetchPr => "fetch_pr",
            Self::SandboxReadFile => "sandbox_read_file",
            Self::SandboxDiff => "sandbox_diff",
            Self::AskUser => "ask_user",
            Self::SandboxExec => "sandbox_exec",
            Self::SandboxWriteFile => "sandbox_write_file",
            Self::SandboxPrepareCommit => "sandbox_prepare_commit",
            Self::DelegateCoder => "delegate_coder",
            Self::DelegateResearcher => "delegate_researcher",
        }
    }

    /// `ask_user` ends the turn waiting on a human, so it is exclusive like
    /// the state-changing tools.
    pub fn kind(self) -> CallKind {
        match self {
            Self::SearchFiles
            | Self::ReadFile
            | Self::WebSearch
            | Self::FetchPr
            | Self::SandboxReadFile
            | Self::SandboxDiff => CallKind::ReadOnly,
            Self::AskUser
            | Self::SandboxExec
            | Self::SandboxWriteFile
            | Self::SandboxPrepareCommit
            | Self::DelegateCoder
            | Self::DelegateResearcher => CallKind::Mutating,
        }
    }

    pub fn lookup(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }

    /// A validator that only accepts calls to this tool, for single-call
    /// detection of one expected tool type.
    pub fn validator(self) -> impl Fn(&Value) -> Option<ParsedCall> {
        move |parsed: &Value| validate_tool_call(parsed).filter(|call| call.tool == self.as_str())
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of the tool with this name; `Unknown` for names outside the registry.
pub fn kind_of(name: &str) -> CallKind {
    ToolName::lookup(name).map_or(CallKind::Unknown, ToolName::kind)
}

// ── Parsed calls ────────────────────────────────────────────────────────────

/// A candidate that survived repair and validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedCall {
    pub tool: String,
    pub args: Value,
}

impl ParsedCall {
    pub fn kind(&self) -> CallKind {
        kind_of(&self.tool)
    }

    /// Structural equality: same tool, and args equal as JSON values.
    ///
    /// `serde_json` compares objects as maps, so key order never matters,
    /// while array order and scalar types (`1` vs `"1"`) do.
    pub fn same_call(&self, other: &Self) -> bool {
        self.tool == other.tool && self.args == other.args
    }

    /// Decode into the typed variant for this tool.
    pub fn decode(&self) -> Result<ToolCall, serde_json::Error> {
        serde_json::from_value(json!({ "tool": self.tool, "args": self.args }))
    }
}

// ── Typed calls ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchFilesArgs {
    pub query: String,
    pub repo: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadFileArgs {
    pub repo: String,
    pub path: String,
    pub start_line: Option<u64>,
    pub end_line: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSearchArgs {
    pub query: String,
    pub max_results: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchPrArgs {
    pub repo: String,
    pub number: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxReadFileArgs {
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxDiffArgs {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskUserArgs {
    pub question: String,
    pub options: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxExecArgs {
    pub command: String,
    pub workdir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxWriteFileArgs {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxPrepareCommitArgs {
    pub message: String,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateArgs {
    pub task: String,
    pub context: Option<String>,
}

/// A decoded call, one variant per known tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum ToolCall {
    SearchFiles(SearchFilesArgs),
    ReadFile(ReadFileArgs),
    WebSearch(WebSearchArgs),
    FetchPr(FetchPrArgs),
    SandboxReadFile(SandboxReadFileArgs),
    SandboxDiff(SandboxDiffArgs),
    AskUser(AskUserArgs),
    SandboxExec(SandboxExecArgs),
    SandboxWriteFile(SandboxWriteFileArgs),
    SandboxPrepareCommit(SandboxPrepareCommitArgs),
    DelegateCoder(DelegateArgs),
    DelegateResearcher(DelegateArgs),
}

impl ToolCall {
    pub fn name(&self) -> ToolName {
        match self {
            Self::SearchFiles(_) => ToolName::SearchFiles,
            Self::ReadFile(_) => ToolName::ReadFile,
            Self::WebSearch(_) => ToolName::WebSearch,
            Self::FetchPr(_) => ToolName::FetchPr,
            Self::SandboxReadFile(_) => ToolName::SandboxReadFile,
            Self::SandboxDiff(_) => ToolName::SandboxDiff,
            Self::AskUser(_) => ToolName::AskUser,
            Self::SandboxExec(_) => ToolName::SandboxExec,
            Self::SandboxWriteFile(_) => ToolName::SandboxWriteFile,
            Self::SandboxPrepareCommit(_) => ToolName::SandboxPrepareCommit,
            Self::DelegateCoder(_) => ToolName::DelegateCoder,
            Self::DelegateResearcher(_) => ToolName::DelegateResearcher,
        }
    }

    /// Required strings that decoded but carry nothing.
    fn empty_required_field(&self) -> Option<&'static str> {
        let required: Vec<(&'static str, &str)> = match self {
            Self::SearchFiles(a) => vec![("query", a.query.as_str())],
            Self::ReadFile(a) => vec![("repo", a.repo.as_str()), ("path", a.path.as_str())],
            Self::WebSearch(a) => vec![("query", a.query.as_str())],
            Self::FetchPr(a) => vec![("repo", a.repo.as_str())],
            Self::SandboxReadFile(a) => vec![("path", a.path.as_str())],
            Self::SandboxDiff(_) => Vec::new(),
            Self::AskUser(a) => vec![("question", a.question.as_str())],
            Self::SandboxExec(a) => vec![("command", a.command.as_str())],
            Self::SandboxWriteFile(a) => vec![("path", a.path.as_str())],
            Self::SandboxPrepareCommit(a) => vec![("message", a.message.as_str())],
            Self::DelegateCoder(a) | Self::DelegateResearcher(a) => {
                vec![("task", a.task.as_str())]
            },
        };
        required
            .into_iter()
            .find(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| field)
    }
}

// ── Validation ──────────────────────────────────────────────────────────────

/// Why a parsed candidate was not accepted as a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No `tool` key and no inferable argument shape.
    NotACall,
    /// A `tool` key naming something outside the registry.
    UnknownTool(String),
    /// A known tool whose arguments do not fit its shape.
    InvalidArgs { tool: ToolName, reason: String },
}

/// Read a call's arguments, accepting the common key spellings.
fn call_args(obj: &serde_json::Map<String, Value>) -> Value {
    ["args", "arguments", "parameters"]
        .iter()
        .find_map(|key| obj.get(*key))
        .cloned()
        .unwrap_or_else(|| json!({}))
}

/// Argument-only objects that unambiguously match one tool's shape.
fn infer_from_shape(obj: &serde_json::Map<String, Value>) -> Option<ToolName> {
    let has_str = |key: &str| obj.get(key).is_some_and(Value::is_string);
    let has_range = obj.contains_key("start_line") || obj.contains_key("end_line");
    (has_str("repo") && has_str("path") && has_range).then_some(ToolName::ReadFile)
}

/// Accept or reject a parsed candidate.
pub fn check_call(parsed: &Value, infer_shapes: bool) -> Result<ParsedCall, Rejection> {
    let Some(obj) = parsed.as_object() else {
        return Err(Rejection::NotACall);
    };

    let (tool, args) = match obj.get("tool") {
        Some(Value::String(name)) => {
            let Some(tool) = ToolName::lookup(name) else {
                return Err(Rejection::UnknownTool(name.clone()));
            };
            (tool, call_args(obj))
        },
        Some(other) => return Err(Rejection::UnknownTool(other.to_string())),
        None if infer_shapes => match infer_from_shape(obj) {
            Some(tool) => (tool, parsed.clone()),
            None => return Err(Rejection::NotACall),
        },
        None => return Err(Rejection::NotACall),
    };

    let call = ParsedCall {
        tool: tool.as_str().to_string(),
        args,
    };
    let decoded = call.decode().map_err(|e| Rejection::InvalidArgs {
        tool,
        reason: e.to_string(),
    })?;
    if let Some(field) = decoded.empty_required_field() {
        return Err(Rejection::InvalidArgs {
            tool,
            reason: format!("required field `{field}` is empty"),
        });
    }
    trace!(tool = %tool, "accepted tool call");
    Ok(call)
}

/// The registry validator: any known tool with well-formed arguments.
pub fn validate_tool_call(parsed: &Value) -> Option<ParsedCall> {
    check_call(parsed, true).ok()
}
