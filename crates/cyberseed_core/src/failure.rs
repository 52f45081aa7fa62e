use std::fmt;

/// Coarse origin of a run-aborting error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Http,
    Database,
    Other,
}

impl FailureKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Http => "HTTPError",
            Self::Database => "DBError",
            Self::Other => "Error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

/// Finds the first transport or persistence error anywhere in the chain.
pub fn classify(error: &anyhow::Error) -> FailureKind {
    for cause in error.chain() {
        if cause.is::<reqwest::Error>() {
            return FailureKind::Http;
        }
        if cause.is::<rusqlite::Error>() || cause.is::<postgres::Error>() {
            return FailureKind::Database;
        }
    }
    FailureKind::Other
}

/// One-line diagnostic: `[Kind] outer context: inner cause`.
pub fn render(error: &anyhow::Error) -> String {
    format!("[{}] {error:#}", classify(error))
}
