//! Per-attempt markers and their extraction from callback traffic.

use crate::ScanError;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Unique token tying an out-of-band callback back to the attempt that caused it.
/// Always 32 lowercase hex characters, which keeps it a valid DNS label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Marker(String);

impl Marker {
    pub fn new() -> Self {
        Marker(Uuid::new_v4().simple().to_string())
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.to_ascii_lowercase();
        if s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit()) { Some(Marker(s)) } else { None }
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl Default for Marker {
    fn default() -> Self { Marker::new() }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Finds `<marker>.<resource>` in query names, distinguished names or raw bytes.
#[derive(Debug, Clone)]
pub struct MarkerScanner {
    re: Regex,
}

impl MarkerScanner {
    pub fn new(resource: &str) -> Result<Self, ScanError> {
        let resource = resource.trim_matches('.');
        if resource.is_empty() {
            return Err(ScanError::invalid("resource", resource));
        }
        let pattern = format!(r"(?i)\b([0-9a-f]{{32}})\.{}\b", regex::escape(resource));
        let re = Regex::new(&pattern).map_err(|_| ScanError::invalid("resource", resource))?;
        Ok(MarkerScanner { re })
    }

    pub fn find_all(&self, haystack: &str) -> Vec<Marker> {
        let mut out: Vec<Marker> = Vec::new();
        for cap in self.re.captures_iter(haystack) {
            if let Some(m) = cap.get(1).and_then(|m| Marker::parse(m.as_str())) {
                if !out.contains(&m) { out.push(m); }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn markers_are_unique_hex_labels() {
        let set: HashSet<Marker> = (0..1000).map(|_| Marker::new()).collect();
        assert_eq!(set.len(), 1000);
        let m = Marker::new();
        assert_eq!(m.as_str().len(), 32);
        assert!(m.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn scanner_finds_marker_with_any_suffix() {
        let m = Marker::new();
        let s = MarkerScanner::new("l4s").unwrap();
        assert_eq!(s.find_all(&format!("{}.l4s", m)), vec![m.clone()]);
        assert_eq!(s.find_all(&format!("{}.l4s.corp.example", m)), vec![m.clone()]);
        // resolvers may randomize case
        assert_eq!(s.find_all(&format!("{}.L4S", m.as_str().to_uppercase())), vec![m.clone()]);
        assert_eq!(s.find_all(&format!("\x04\x20{}.l4s\x0a\x01", m)), vec![m]);
    }

    #[test]
    fn scanner_ignores_other_resources() {
        let m = Marker::new();
        let s = MarkerScanner::new("l4s").unwrap();
        assert!(s.find_all(&format!("{}.l4sx", m)).is_empty());
        assert!(s.find_all(&format!("{}.other", m)).is_empty());
        assert!(s.find_all("deadbeef.l4s").is_empty());
        assert!(MarkerScanner::new("").is_err());
    }

    #[test]
    fn scanner_reports_each_marker_once() {
        let (a, b) = (Marker::new(), Marker::new());
        let s = MarkerScanner::new("l4s").unwrap();
        assert_eq!(s.find_all(&format!("{a}.l4s {b}.l4s {a}.l4s")), vec![a, b]);
    }
}
