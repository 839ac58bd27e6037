use lazy_static::lazy_static;
use regex::Regex;

pub const MAX_PROMPT_CHARS: usize = 50_000;

lazy_static! {
    // Instruction-override and role-injection patterns. Matching any of
    // these fails the prompt outright unless the caller disabled blocking.
    static ref BLOCK_PATTERNS: Vec<(Regex, &'static str)> = vec![
        (
            Regex::new(r"(?i)ignore\s+(all\s+)?(previous|prior|above)\s+instructions").unwrap(),
            "instruction override",
        ),
        (
            Regex::new(r"(?i)disregard\s+(all\s+)?(previous|prior|your)\s+instructions").unwrap(),
            "instruction override",
        ),
        (
            Regex::new(r"(?i)forget\s+everything\s+(you|above)").unwrap(),
            "instruction override",
        ),
        (
            Regex::new(r"<\|im_start\|>|<\|im_end\|>").unwrap(),
            "role injection marker",
        ),
        (
            Regex::new(r"(?im)^\s*(system|assistant)\s*:\s*you\s+are").unwrap(),
            "role injection",
        ),
        (
            Regex::new(r"(?i)\bjailbreak\b.{0,40}\bmode\b").unwrap(),
            "jailbreak attempt",
        ),
    ];

    // Dangerous-command patterns replaced with `[REDACTED_<KIND>]`.
    static ref REDACT_PATTERNS: Vec<(Regex, &'static str)> = vec![
        (
            Regex::new(r"rm\s+-[a-zA-Z]*[rf][a-zA-Z]*\s+[^\s;|&]+").unwrap(),
            "RM_RF",
        ),
        (
            Regex::new(r"(?i)\bsudo\s+\S+").unwrap(),
            "PRIVILEGE_ESCALATION",
        ),
        (
            Regex::new(r"\bchmod\s+777\s+\S+").unwrap(),
            "PRIVILEGE_ESCALATION",
        ),
        (
            Regex::new(r"\b(eval|exec|system)\s*\(").unwrap(),
            "EVAL",
        ),
        (
            Regex::new(r":\(\)\s*\{\s*:\|:\s*&\s*\}\s*;\s*:").unwrap(),
            "FORK_BOMB",
        ),
        (
            Regex::new(r"(?i)(curl|wget)\s+[^\n|]*\|\s*(ba|z)?sh").unwrap(),
            "CURL_PIPE_SH",
        ),
    ];

    // Phrases worth flagging without blocking.
    static ref SUSPICION_PATTERNS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"(?i)\byou\s+are\s+now\b").unwrap(), "you are now"),
        (Regex::new(r"(?i)\bact\s+as\s+if\b").unwrap(), "act as if"),
        (Regex::new(r"(?i)\bpretend\s+to\s+be\b").unwrap(), "pretend to be"),
        (Regex::new(r"(?i)\bnew\s+persona\b").unwrap(), "new persona"),
    ];
}

/// Per-caller policy switches. Trusted callers may relax blocking and
/// redaction independently; warnings are produced regardless.
#[derive(Clone, Copy, Debug)]
pub struct SanitizeOptions {
    pub block: bool,
    pub redact: bool,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            block: true,
            redact: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SanitizedPrompt {
    pub text: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SanitizeError {
    Empty,
    Blocked(String),
}

impl std::fmt::Display for SanitizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SanitizeError::Empty => write!(f, "prompt is empty"),
            SanitizeError::Blocked(kind) => {
                write!(f, "prompt blocked: detected {kind}")
            }
        }
    }
}

impl std::error::Error for SanitizeError {}

/// Apply the three policies in order: block, redact, cap. Suspicion
/// heuristics only add warnings.
pub fn sanitize(prompt: &str, options: SanitizeOptions) -> Result<SanitizedPrompt, SanitizeError> {
    if prompt.trim().is_empty() {
        return Err(SanitizeError::Empty);
    }

    let mut warnings = Vec::new();

    for (pattern, kind) in BLOCK_PATTERNS.iter() {
        if pattern.is_match(prompt) {
            if options.block {
                return Err(SanitizeError::Blocked(kind.to_string()));
            }
            warnings.push(format!("blocking disabled: prompt matches {kind}"));
        }
    }

    let mut text = prompt.to_string();
    for (pattern, kind) in REDACT_PATTERNS.iter() {
        if !pattern.is_match(&text) {
            continue;
        }
        if options.redact {
            text = pattern
                .replace_all(&text, format!("[REDACTED_{kind}]").as_str())
                .into_owned();
            warnings.push(format!("redacted {kind} pattern from prompt"));
        } else {
            warnings.push(format!("redaction disabled: prompt matches {kind}"));
        }
    }

    for (pattern, label) in SUSPICION_PATTERNS.iter() {
        if pattern.is_match(&text) {
            warnings.push(format!("suspicious phrasing: \"{label}\""));
        }
    }

    if text.chars().count() > MAX_PROMPT_CHARS {
        text = text.chars().take(MAX_PROMPT_CHARS).collect();
        warnings.push(format!("prompt truncated to {MAX_PROMPT_CHARS} characters"));
    }

    Ok(SanitizedPrompt { text, warnings })
}
