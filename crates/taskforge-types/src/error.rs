use crate::{ErrorKind, Target};

/// The complete error taxonomy. Library crates return `Result<T, OrchestratorError>`;
/// only the facade/CLI boundary wraps this in `anyhow`.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("provider {target} rate limited{}", retry_after_ms.map(|ms| format!(" (retry after {ms}ms)")).unwrap_or_default())]
    ProviderRateLimit {
        target: Target,
        retry_after_ms: Option<u64>,
    },

    #[error("provider {target} returned a transient error: {message}")]
    ProviderTransient { target: Target, message: String },

    #[error("provider {target} rejected credentials")]
    ProviderAuth { target: Target },

    #[error("provider {target} rejected the request: {message}")]
    ProviderValidation { target: Target, message: String },

    #[error("daily budget exceeded: cap={cap_micros} accumulated={accumulated_micros} estimated={estimated_micros}")]
    BudgetExceeded {
        cap_micros: i64,
        accumulated_micros: i64,
        estimated_micros: i64,
    },

    #[error("no routing target available after exhausting fallbacks")]
    NoTarget,

    #[error("no valid providers: every configured provider failed credential validation")]
    NoValidProviders,

    #[error("stage {stage_index} timed out after {timeout_ms}ms")]
    StageTimeout { stage_index: usize, timeout_ms: u64 },

    #[error("worktree operation failed: {0}")]
    WorktreeFailure(String),

    #[error("cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Validation(_) => ErrorKind::Validation,
            OrchestratorError::Config(_) => ErrorKind::Config,
            OrchestratorError::ProviderRateLimit { .. } => ErrorKind::ProviderRateLimit,
            OrchestratorError::ProviderTransient { .. } => ErrorKind::ProviderTransient,
            OrchestratorError::ProviderAuth { .. } => ErrorKind::ProviderAuth,
            OrchestratorError::ProviderValidation { .. } => ErrorKind::ProviderValidation,
            OrchestratorError::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            OrchestratorError::NoTarget => ErrorKind::NoTarget,
            OrchestratorError::NoValidProviders => ErrorKind::Config,
            OrchestratorError::StageTimeout { .. } => ErrorKind::StageTimeout,
            OrchestratorError::WorktreeFailure(_) => ErrorKind::WorktreeFailure,
            OrchestratorError::Cancelled => ErrorKind::Cancelled,
            OrchestratorError::NotFound(_) => ErrorKind::Validation,
            OrchestratorError::Io(_) => ErrorKind::WorktreeFailure,
            OrchestratorError::Serde(_) => ErrorKind::Validation,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Exit code for the CLI shell, per the §6 callable-surface table.
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::Config(_) => 2,
            OrchestratorError::BudgetExceeded { .. } => 3,
            OrchestratorError::NoValidProviders => 4,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
