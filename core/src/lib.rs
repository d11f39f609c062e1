//! Core types shared by the jndiscan engine crates.

pub mod error;
pub mod marker;
pub mod model;
pub mod pool;

use serde::{Serialize, Serializer};
use std::fmt;
use url::Url;

pub use error::ScanError;
pub use marker::{Marker, MarkerScanner};
pub use model::*;
pub use pool::WorkerPool;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// A scan target. Identity is the normalized URL string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target(Url);

impl Target {
    /// Parse and normalize an http(s) URL. Bare hosts without a scheme are rejected.
    pub fn parse(input: &str) -> Result<Self, ScanError> {
        let url = Url::parse(input.trim()).map_err(|e| ScanError::InvalidTarget { input: input.to_string(), reason: e.to_string() })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ScanError::InvalidTarget { input: input.to_string(), reason: format!("unsupported scheme {}", url.scheme()) });
        }
        if url.host_str().is_none() {
            return Err(ScanError::InvalidTarget { input: input.to_string(), reason: "missing host".into() });
        }
        Ok(Target(url))
    }

    pub fn url(&self) -> &Url { &self.0 }

    pub fn host(&self) -> &str { self.0.host_str().unwrap_or_default() }

    pub fn as_str(&self) -> &str { self.0.as_str() }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> { s.serialize_str(self.as_str()) }
}
