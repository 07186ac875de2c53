/// Per-row message, the soft-failure channel for submission errors: the
/// message is attached to an edit entry and rendered by the application,
/// never thrown.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub severity: MessageSeverity,
    pub summary: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MessageSeverity {
    Error,
    Warning,
    Info,
}

impl Message {
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: MessageSeverity::Error,
            summary: summary.into(),
            detail: None,
        }
    }

    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: MessageSeverity::Warning,
            summary: summary.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
