use std::path::PathBuf;
use thiserror::Error;

/// Configuration-time failures. Anything in here aborts the scan before it starts.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid target {input:?}: {reason}")]
    InvalidTarget { input: String, reason: String },
    #[error("cannot read wordlist {}: {source}", path.display())]
    Wordlist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid key=value pair {0:?}")]
    KeyValue(String),
    #[error("invalid {what}: {value:?}")]
    Invalid { what: &'static str, value: String },
}

impl ScanError {
    pub fn invalid(what: &'static str, value: impl Into<String>) -> Self {
        ScanError::Invalid { what, value: value.into() }
    }
}
