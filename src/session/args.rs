//! Argument synthesis for the Claude-family and Codex CLIs (spec.md §4.2).
//!
//! Pure functions: given a config struct, produce the stable, ordered flag
//! vector the child process is spawned with. No I/O, no concurrency —
//! trivially unit-testable, mirroring the teacher's preference for small
//! pure builders (`agents::claude_config::generate_claude_settings`) over
//! ad-hoc `Command::args` calls scattered through the runner.

use std::collections::BTreeMap;

use serde_json::Value;

// ─── Claude family ────────────────────────────────────────────────────────

/// Mutually exclusive ways of scoping which tools a turn may use.
#[derive(Debug, Clone, Default)]
pub enum ToolsMode {
    #[default]
    Unspecified,
    Allowed(Vec<String>),
    Disallowed(Vec<String>),
    /// `--tools T,T,T`
    Combined(Vec<String>),
}

/// How to resume/identify a Claude-family session.
#[derive(Debug, Clone, Default)]
pub enum ClaudeResume {
    #[default]
    None,
    Resume(String),
    SessionId(String),
}

#[derive(Debug, Clone, Default)]
pub struct ClaudeArgsConfig {
    pub resume: ClaudeResume,
    pub model: Option<String>,
    pub fallback_model: Option<String>,
    pub system_prompt: Option<String>,
    pub append_system_prompt: Option<String>,
    pub tools: ToolsMode,
    pub dangerously_skip_permissions: bool,
    pub permission_mode: Option<String>,
    pub setting_sources: Vec<String>,
    pub add_dir: Vec<String>,
    pub max_budget_usd: Option<f64>,
}

/// Build the stable, ordered flag vector for a Claude-family CLI child.
pub fn build_claude_args(cfg: &ClaudeArgsConfig) -> Vec<String> {
    let mut args = vec![
        "--input-format".to_string(),
        "stream-json".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ];

    match &cfg.resume {
        ClaudeResume::None => {}
        ClaudeResume::Resume(sid) => {
            args.push("--resume".to_string());
            args.push(sid.clone());
        }
        ClaudeResume::SessionId(sid) => {
            args.push("--session-id".to_string());
            args.push(sid.clone());
        }
    }

    if let Some(m) = &cfg.model {
        args.push("--model".to_string());
        args.push(m.clone());
    }
    if let Some(m) = &cfg.fallback_model {
        args.push("--fallback-model".to_string());
        args.push(m.clone());
    }

    match (&cfg.system_prompt, &cfg.append_system_prompt) {
        (Some(p), _) => {
            args.push("--system-prompt".to_string());
            args.push(p.clone());
        }
        (None, Some(p)) => {
            args.push("--append-system-prompt".to_string());
            args.push(p.clone());
        }
        (None, None) => {}
    }

    match &cfg.tools {
        ToolsMode::Unspecified => {}
        ToolsMode::Allowed(ts) => {
            for t in ts {
                args.push("--allowedTools".to_string());
                args.push(t.clone());
            }
        }
        ToolsMode::Disallowed(ts) => {
            for t in ts {
                args.push("--disallowed-tools".to_string());
                args.push(t.clone());
            }
        }
        ToolsMode::Combined(ts) => {
            args.push("--tools".to_string());
            args.push(ts.join(","));
        }
    }

    if cfg.dangerously_skip_permissions {
        args.push("--dangerously-skip-permissions".to_string());
    }
    if let Some(m) = &cfg.permission_mode {
        args.push("--permission-mode".to_string());
        args.push(m.clone());
    }
    if !cfg.setting_sources.is_empty() {
        args.push("--setting-sources".to_string());
        args.push(cfg.setting_sources.join(","));
    }

    for d in &cfg.add_dir {
        args.push("--add-dir".to_string());
        args.push(d.clone());
    }

    if let Some(b) = cfg.max_budget_usd {
        args.push("--max-budget-usd".to_string());
        args.push(format!("{b}"));
    }

    args
}

// ─── Codex ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub enum CodexResume {
    #[default]
    None,
    Last {
        all: bool,
    },
    Session(String),
}

#[derive(Debug, Clone, Default)]
pub enum CodexApproval {
    #[default]
    Normal,
    FullAuto,
    DangerouslyBypassApprovalsAndSandbox,
}

/// A `-c key=value` override value. Serialized per spec.md §4.2: strings
/// JSON-quoted, bools and numbers bare, everything else JSON-marshaled.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideValue {
    String(String),
    Bool(bool),
    Number(f64),
    Json(Value),
}

impl OverrideValue {
    fn serialize(&self) -> String {
        match self {
            OverrideValue::String(s) => serde_json::to_string(s).unwrap_or_default(),
            OverrideValue::Bool(b) => b.to_string(),
            OverrideValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            OverrideValue::Json(v) => serde_json::to_string(v).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CodexArgsConfig {
    pub resume: CodexResume,
    pub model: Option<String>,
    pub profile: Option<String>,
    pub local_provider: Option<String>,
    pub oss: bool,
    pub color: Option<String>,
    pub enable: Vec<String>,
    pub disable: Vec<String>,
    pub skip_git_repo_check: bool,
    pub approval: CodexApproval,
    pub sandbox: Option<String>,
    pub ask_for_approval: Option<String>,
    pub cd: Option<String>,
    pub add_dir: Vec<String>,
    pub image: Vec<String>,
    pub output_schema: Option<String>,
    pub output_last_message: Option<String>,
    /// Client-level `-c` overrides, e.g. from a profile.
    pub client_overrides: BTreeMap<String, OverrideValue>,
    /// Request-level `-c` overrides; these win over `client_overrides` on
    /// key collision (request-over-client merge).
    pub request_overrides: BTreeMap<String, OverrideValue>,
    /// Injects `-c web_search="<mode>"` when set.
    pub web_search: Option<String>,
    pub prompt: Option<String>,
}

/// Merge `client` and `request` overrides, request winning on collision.
pub fn merge_overrides(
    client: &BTreeMap<String, OverrideValue>,
    request: &BTreeMap<String, OverrideValue>,
) -> BTreeMap<String, OverrideValue> {
    let mut merged = client.clone();
    for (k, v) in request {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Build the stable, ordered flag vector for a `codex exec` child.
pub fn build_codex_args(cfg: &CodexArgsConfig) -> Vec<String> {
    let mut args = vec!["exec".to_string()];

    match &cfg.resume {
        CodexResume::None => {}
        CodexResume::Last { all } => {
            args.push("resume".to_string());
            args.push("--last".to_string());
            if *all {
                args.push("--all".to_string());
            }
        }
        CodexResume::Session(sid) => {
            args.push("resume".to_string());
            args.push(sid.clone());
        }
    }

    args.push("--json".to_string());

    if let Some(m) = &cfg.model {
        args.push("--model".to_string());
        args.push(m.clone());
    }
    if let Some(p) = &cfg.profile {
        args.push("--profile".to_string());
        args.push(p.clone());
    }
    if let Some(lp) = &cfg.local_provider {
        args.push("--local-provider".to_string());
        args.push(lp.clone());
    }
    if cfg.oss {
        args.push("--oss".to_string());
    }
    if let Some(c) = &cfg.color {
        args.push("--color".to_string());
        args.push(c.clone());
    }
    for f in &cfg.enable {
        args.push("--enable".to_string());
        args.push(f.clone());
    }
    for f in &cfg.disable {
        args.push("--disable".to_string());
        args.push(f.clone());
    }
    if cfg.skip_git_repo_check {
        args.push("--skip-git-repo-check".to_string());
    }

    // Bypass flags suppress sandbox and approval flags.
    match cfg.approval {
        CodexApproval::Normal => {
            if let Some(s) = &cfg.sandbox {
                args.push("--sandbox".to_string());
                args.push(s.clone());
            }
            if let Some(a) = &cfg.ask_for_approval {
                args.push("--ask-for-approval".to_string());
                args.push(a.clone());
            }
        }
        CodexApproval::FullAuto => {
            args.push("--full-auto".to_string());
        }
        CodexApproval::DangerouslyBypassApprovalsAndSandbox => {
            args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
        }
    }

    if let Some(cd) = &cfg.cd {
        args.push("--cd".to_string());
        args.push(cd.clone());
    }
    for d in &cfg.add_dir {
        args.push("--add-dir".to_string());
        args.push(d.clone());
    }
    for img in &cfg.image {
        args.push("--image".to_string());
        args.push(img.clone());
    }
    if let Some(p) = &cfg.output_schema {
        args.push("--output-schema".to_string());
        args.push(p.clone());
    }
    if let Some(p) = &cfg.output_last_message {
        args.push("--output-last-message".to_string());
        args.push(p.clone());
    }

    let mut overrides = merge_overrides(&cfg.client_overrides, &cfg.request_overrides);
    if let Some(mode) = &cfg.web_search {
        overrides.insert(
            "web_search".to_string(),
            OverrideValue::String(mode.clone()),
        );
    }
    // BTreeMap iteration is already lexicographic by key.
    for (k, v) in &overrides {
        args.push("-c".to_string());
        args.push(format!("{k}={}", v.serialize()));
    }

    if let Some(p) = &cfg.prompt {
        args.push(p.clone());
    }

    args
}
