use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

/// Conditions that keep recurring from one root cause. Each is shown once
/// per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepeatingWarning {
    CaptureBlocked,
    ProtectedOverSoftCap,
    ProtectedOverHardCap,
}

#[derive(Debug, Default)]
pub struct WarnOnce {
    shown: HashSet<RepeatingWarning>,
}

impl WarnOnce {
    /// True the first time `warning` is raised this session.
    pub fn first(&mut self, warning: RepeatingWarning) -> bool {
        self.shown.insert(warning)
    }
}
