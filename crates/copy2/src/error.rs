#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppErrorDetail {
    Message(String),
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
}

impl std::fmt::Display for AppErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(message) => write!(f, "{message}"),
            Self::Io { kind, message } => write!(f, "{kind}: {message}"),
        }
    }
}

impl From<String> for AppErrorDetail {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<&str> for AppErrorDetail {
    fn from(value: &str) -> Self {
        Self::Message(value.to_string())
    }
}

impl From<std::io::Error> for AppErrorDetail {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<copy2_core::auto_update::AutoUpdateError> for AppErrorDetail {
    fn from(value: copy2_core::auto_update::AutoUpdateError) -> Self {
        Self::Message(value.to_string())
    }
}

impl From<copy2_core::ReleaseError> for AppErrorDetail {
    fn from(value: copy2_core::ReleaseError) -> Self {
        Self::Message(value.to_string())
    }
}

impl From<copy2_core::ScriptError> for AppErrorDetail {
    fn from(value: copy2_core::ScriptError) -> Self {
        Self::Message(value.to_string())
    }
}

impl From<copy2_store::PersistError> for AppErrorDetail {
    fn from(value: copy2_store::PersistError) -> Self {
        Self::Message(value.to_string())
    }
}

impl From<serde_json::Error> for AppErrorDetail {
    fn from(value: serde_json::Error) -> Self {
        Self::Message(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    Message(String),
    Timeout {
        operation: &'static str,
        seconds: u64,
    },
    UpdateCheckFailed {
        target: &'static str,
        details: AppErrorDetail,
    },
    AutoUpdateFailed {
        phase: &'static str,
        details: AppErrorDetail,
    },
    StoreFailed {
        action: &'static str,
        details: AppErrorDetail,
    },
    SettingsFailed {
        action: &'static str,
        details: AppErrorDetail,
    },
    EntryNotFound {
        position: usize,
    },
}

impl AppError {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn timeout(operation: &'static str, seconds: u64) -> Self {
        Self::Timeout { operation, seconds }
    }

    pub fn update_check_failed(target: &'static str, details: impl Into<AppErrorDetail>) -> Self {
        Self::UpdateCheckFailed {
            target,
            details: details.into(),
        }
    }

    pub fn auto_update_failed(phase: &'static str, details: impl Into<AppErrorDetail>) -> Self {
        Self::AutoUpdateFailed {
            phase,
            details: details.into(),
        }
    }

    pub fn store_failed(action: &'static str, details: impl Into<AppErrorDetail>) -> Self {
        Self::StoreFailed {
            action,
            details: details.into(),
        }
    }

    pub fn settings_failed(action: &'static str, details: impl Into<AppErrorDetail>) -> Self {
        Self::SettingsFailed {
            action,
            details: details.into(),
        }
    }

    pub fn entry_not_found(position: usize) -> Self {
        Self::EntryNotFound { position }
    }
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<&str> for AppError {
    fn from(value: &str) -> Self {
        Self::Message(value.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(message) => write!(f, "{message}"),
            Self::Timeout { operation, seconds } => {
                write!(f, "{operation} timed out after {seconds}s")
            }
            Self::UpdateCheckFailed { target, details } => {
                write!(f, "{target} update check failed: {details}")
            }
            Self::AutoUpdateFailed { phase, details } => {
                write!(f, "App update {phase} failed: {details}")
            }
            Self::StoreFailed { action, details } => {
                write!(f, "Could not {action} history: {details}")
            }
            Self::SettingsFailed { action, details } => {
                write!(f, "Could not {action} settings: {details}")
            }
            Self::EntryNotFound { position } => write!(f, "No history entry #{position}"),
        }
    }
}

impl std::error::Error for AppError {}
