use serde::{Deserialize, Serialize};

/// How much the current request is allowed to do. Levels are totally
/// ordered; a higher level permits everything a lower level permits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutonomyLevel {
    ReadOnly,
    Low,
    Medium,
    High,
}

impl AutonomyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutonomyLevel::ReadOnly => "read-only",
            AutonomyLevel::Low => "low",
            AutonomyLevel::Medium => "medium",
            AutonomyLevel::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "read-only" | "readonly" | "read_only" => Some(Self::ReadOnly),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn all() -> &'static [AutonomyLevel] {
        &[
            AutonomyLevel::ReadOnly,
            AutonomyLevel::Low,
            AutonomyLevel::Medium,
            AutonomyLevel::High,
        ]
    }

    pub fn permits(&self, required: AutonomyLevel) -> bool {
        *self >= required
    }
}

impl std::fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AutonomyLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| format!("unknown autonomy level `{value}`"))
    }
}

/// Coarse category of side effect a call wants to perform. Closed set;
/// every permissioned operation in the system names exactly one class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    ReadFile,
    WriteFile,
    GitRead,
    GitCommit,
    GitPush,
    GitBranch,
    InstallDependency,
    ExecuteCommand,
    ExternalApi,
    McpCall,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::ReadFile => "read_file",
            OperationClass::WriteFile => "write_file",
            OperationClass::GitRead => "git_read",
            OperationClass::GitCommit => "git_commit",
            OperationClass::GitPush => "git_push",
            OperationClass::GitBranch => "git_branch",
            OperationClass::InstallDependency => "install_dependency",
            OperationClass::ExecuteCommand => "execute_command",
            OperationClass::ExternalApi => "external_api",
            OperationClass::McpCall => "mcp_call",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "read_file" => Some(Self::ReadFile),
            "write_file" => Some(Self::WriteFile),
            "git_read" => Some(Self::GitRead),
            "git_commit" => Some(Self::GitCommit),
            "git_push" => Some(Self::GitPush),
            "git_branch" => Some(Self::GitBranch),
            "install_dependency" => Some(Self::InstallDependency),
            "execute_command" => Some(Self::ExecuteCommand),
            "external_api" => Some(Self::ExternalApi),
            "mcp_call" => Some(Self::McpCall),
            _ => None,
        }
    }

    pub fn all() -> &'static [OperationClass] {
        &[
            OperationClass::ReadFile,
            OperationClass::WriteFile,
            OperationClass::GitRead,
            OperationClass::GitCommit,
            OperationClass::GitPush,
            OperationClass::GitBranch,
            OperationClass::InstallDependency,
            OperationClass::ExecuteCommand,
            OperationClass::ExternalApi,
            OperationClass::McpCall,
        ]
    }

    /// Minimum autonomy level at which this operation is permitted. The
    /// mapping is total and monotone over the level order.
    pub fn required_level(&self) -> AutonomyLevel {
        match self {
            OperationClass::ReadFile | OperationClass::GitRead => AutonomyLevel::ReadOnly,
            OperationClass::WriteFile | OperationClass::McpCall => AutonomyLevel::Low,
            OperationClass::GitCommit
            | OperationClass::GitBranch
            | OperationClass::InstallDependency
            | OperationClass::ExecuteCommand => AutonomyLevel::Medium,
            OperationClass::GitPush | OperationClass::ExternalApi => AutonomyLevel::High,
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OperationClass {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| format!("unknown operation class `{value}`"))
    }
}

/// Outcome of a pure permission check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCheck {
    pub allowed: bool,
    pub required_level: AutonomyLevel,
    pub reason: Option<String>,
}

/// Decide whether `operation` is permitted at `level`. Pure; the effectful
/// wrapper in steward-core records the decision to the audit trail.
pub fn check(level: AutonomyLevel, operation: OperationClass) -> PermissionCheck {
    let required = operation.required_level();
    if level.permits(required) {
        PermissionCheck {
            allowed: true,
            required_level: required,
            reason: None,
        }
    } else {
        PermissionCheck {
            allowed: false,
            required_level: required,
            reason: Some(format!(
                "operation `{}` requires autonomy `{}` but the current level is `{}`; grant level {} to allow",
                operation, required, level, required
            )),
        }
    }
}

/// Either a concrete level or the `auto` token, resolved at workflow entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutonomySelector {
    Auto,
    #[serde(untagged)]
    Level(AutonomyLevel),
}

impl AutonomySelector {
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("auto") {
            return Some(Self::Auto);
        }
        AutonomyLevel::parse(value).map(Self::Level)
    }
}

/// Per-workflow defaults used when the caller passes `auto`. Workflows not
/// listed here fall back to Medium.
const WORKFLOW_DEFAULT_AUTONOMY: &[(&str, AutonomyLevel)] = &[
    ("parallel-review", AutonomyLevel::ReadOnly),
    ("validate-last-commit", AutonomyLevel::ReadOnly),
    ("pre-commit-validate", AutonomyLevel::ReadOnly),
    ("init-session", AutonomyLevel::ReadOnly),
    ("bug-hunt", AutonomyLevel::Low),
    ("feature-design", AutonomyLevel::Medium),
];

pub fn resolve_autonomy(selector: AutonomySelector, workflow: &str) -> AutonomyLevel {
    match selector {
        AutonomySelector::Level(level) => level,
        AutonomySelector::Auto => WORKFLOW_DEFAULT_AUTONOMY
            .iter()
            .find(|(name, _)| *name == workflow)
            .map(|(_, level)| *level)
            .unwrap_or(AutonomyLevel::Medium),
    }
}
