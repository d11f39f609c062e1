use crate::report::OutputFormat;
use anyhow::{bail, Context, Result};
use jndiscan_core::{CatcherKind, RequestType};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG: &str = "jndiscan.yaml";

/// Defaults for `remote` scans. Durations use the same syntax as the CLI.
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    pub catcher_type: Option<CatcherKind>,
    pub caddr: Option<String>,
    pub bind: Option<SocketAddr>,
    pub resource: Option<String>,
    pub proxy: Option<String>,
    pub timeout: Option<String>,
    pub wait: Option<String>,
    pub max_threads: Option<usize>,
    pub max_form_submits: Option<usize>,
    pub request_types: Option<Vec<RequestType>>,
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub remote: Option<RemoteConfig>,
}

/// An explicit path must exist; the default file is optional.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    let cfg = serde_yaml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(Some(cfg))
}

/// `500ms`, `3s`, `2m`, `1h`, or a plain number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit() && c != '.').unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let n: f64 = num.parse().with_context(|| format!("invalid duration {:?}", s))?;
    let secs = match unit.trim() {
        "ms" => n / 1000.0,
        "" | "s" => n,
        "m" => n * 60.0,
        "h" => n * 3600.0,
        other => bail!("invalid duration unit {:?} in {:?}", other, s),
    };
    if !secs.is_finite() || secs < 0.0 { bail!("invalid duration {:?}", s); }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("3d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn loads_remote_section() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "remote:\n  catcher_type: ldap\n  caddr: 10.0.0.5:1389\n  wait: 10s\n  request_types: [get, post]\n  format: jsonl").unwrap();
        let cfg = load_config(Some(f.path())).unwrap().unwrap();
        let r = cfg.remote.unwrap();
        assert_eq!(r.catcher_type, Some(CatcherKind::Ldap));
        assert_eq!(r.caddr.as_deref(), Some("10.0.0.5:1389"));
        assert_eq!(r.request_types, Some(vec![RequestType::Get, RequestType::Post]));
        assert_eq!(r.format, Some(OutputFormat::Jsonl));
    }

    #[test]
    fn malformed_or_missing_files_are_errors() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "remote:\n  catcher_typo: dns").unwrap();
        assert!(load_config(Some(f.path())).is_err());
        assert!(load_config(Some(Path::new("/nonexistent/jndiscan.yaml"))).is_err());
    }
}
