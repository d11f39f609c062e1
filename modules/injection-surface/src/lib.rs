//! Injection surface enumeration, plus the wordlist and `key=value` inputs feeding it.

use jndiscan_core::{is_template, ConstantValues, InjectionPoint, RequestType, ScanError, Surface, ValueSource};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

pub const USER_AGENT: &str = "User-Agent";

/// Headers that commonly end up in access or audit logs.
pub const DEFAULT_HEADERS: &[&str] = &[
    "Accept", "Accept-Charset", "Accept-Datetime", "Accept-Language", "Cache-Control", "Contact",
    "Cookie", "DNT", "Forwarded", "Forwarded-For", "Forwarded-For-Ip", "Forwarded-Proto", "From",
    "Max-Forwards", "Origin", "Originating-IP", "Pragma", "Referer", "True-Client-IP", "Via",
    "Warning", "X-Api-Version", "X-ATT-DeviceId", "X-Client-IP", "X-Correlation-ID", "X-Csrf-Token",
    "X-Forwarded", "X-Forwarded-For", "X-Forwarded-Host", "X-Forwarded-Server", "X-Host",
    "X-Http-Destinationurl", "X-Http-Host-Override", "X-Original-URL", "X-Originating-IP",
    "X-Real-IP", "X-Remote-Addr", "X-Remote-IP", "X-Request-ID", "X-Requested-With", "X-Wap-Profile",
];

#[derive(Debug, Clone, Default)]
pub struct SurfaceConfig {
    pub request_types: Vec<RequestType>,
    /// Header names to fuzz; empty means `DEFAULT_HEADERS`.
    pub headers: Vec<String>,
    pub header_values: BTreeMap<String, String>,
    pub params: Vec<String>,
    pub param_values: BTreeMap<String, String>,
    pub fields: Vec<String>,
    pub field_values: BTreeMap<String, String>,
    pub user_agent_fuzzing: bool,
}

/// Compute the ordered, duplicate-free injection points for one scan. Headers apply to
/// every request type, query params to `get`, body fields to `post` and `json`. Fixed
/// values without a placeholder are not points; see [`constants`].
pub fn enumerate(cfg: &SurfaceConfig) -> Vec<InjectionPoint> {
    let mut header_names: Vec<String> = if cfg.headers.is_empty() {
        DEFAULT_HEADERS.iter().map(|s| s.to_string()).collect()
    } else {
        cfg.headers.clone()
    };
    let has_ua = header_names.iter().any(|h| h.eq_ignore_ascii_case(USER_AGENT));
    if cfg.user_agent_fuzzing && !has_ua {
        header_names.push(USER_AGENT.to_string());
    } else if !cfg.user_agent_fuzzing {
        header_names.retain(|h| !h.eq_ignore_ascii_case(USER_AGENT));
    }
    let header_values: BTreeMap<String, String> = cfg
        .header_values
        .iter()
        .filter(|(k, _)| cfg.user_agent_fuzzing || !k.eq_ignore_ascii_case(USER_AGENT))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut types = cfg.request_types.clone();
    dedup_in_order(&mut types);
    for rt in types {
        push_surface(&mut out, &mut seen, rt, Surface::Header, &header_names, &header_values);
        match rt {
            RequestType::Get => push_surface(&mut out, &mut seen, rt, Surface::QueryParam, &cfg.params, &cfg.param_values),
            RequestType::Post | RequestType::Json => push_surface(&mut out, &mut seen, rt, Surface::BodyField, &cfg.fields, &cfg.field_values),
        }
    }
    tracing::debug!(points = out.len(), "injection surface enumerated");
    out
}

/// The `--set-*` values that carry no placeholder. They go out unchanged on every
/// request of a matching type, alongside whatever point that request fuzzes.
pub fn constants(cfg: &SurfaceConfig) -> ConstantValues {
    let pick = |m: &BTreeMap<String, String>| -> Vec<(String, String)> {
        m.iter().filter(|(_, v)| !is_template(v)).map(|(k, v)| (k.clone(), v.clone())).collect()
    };
    ConstantValues { headers: pick(&cfg.header_values), params: pick(&cfg.param_values), fields: pick(&cfg.field_values) }
}

fn push_surface(
    out: &mut Vec<InjectionPoint>,
    seen: &mut HashSet<(RequestType, Surface, String)>,
    request_type: RequestType,
    surface: Surface,
    names: &[String],
    fixed: &BTreeMap<String, String>,
) {
    let lookup = |name: &str| {
        if surface == Surface::Header {
            fixed.iter().find(|(k, _)| k.eq_ignore_ascii_case(name))
        } else {
            fixed.get_key_value(name)
        }
    };
    // fixed values win over wordlist entries of the same name; constant ones drop the name
    let candidates = names
        .iter()
        .filter_map(|n| match lookup(n) {
            Some((k, v)) if is_template(v) => Some((k.clone(), ValueSource::Fixed(v.clone()))),
            Some(_) => None,
            None => Some((n.clone(), ValueSource::Wordlist)),
        })
        .chain(fixed.iter().filter(|(_, v)| is_template(v)).map(|(k, v)| (k.clone(), ValueSource::Fixed(v.clone()))));
    for (name, source) in candidates {
        let point = InjectionPoint { request_type, surface, name, source };
        if seen.insert(point.key()) { out.push(point); }
    }
}

fn dedup_in_order<T: PartialEq + Clone>(v: &mut Vec<T>) {
    let mut kept: Vec<T> = Vec::with_capacity(v.len());
    for x in v.drain(..) { if !kept.contains(&x) { kept.push(x); } }
    *v = kept;
}

/// One entry per line, trimmed; blank lines and repeated entries are dropped.
pub fn parse_wordlist(content: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in content.lines() {
        let w = line.trim();
        if w.is_empty() { continue; }
        if !out.iter().any(|e| e == w) { out.push(w.to_string()); }
    }
    out
}

pub fn load_wordlist(path: &Path) -> Result<Vec<String>, ScanError> {
    let content = std::fs::read_to_string(path).map_err(|source| ScanError::Wordlist { path: path.to_path_buf(), source })?;
    Ok(parse_wordlist(&content))
}

/// Literal entries followed by the entries of an optional wordlist file.
pub fn merge_entries(literal: &[String], file: Option<&Path>) -> Result<Vec<String>, ScanError> {
    let mut out: Vec<String> = literal.iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    if let Some(path) = file { out.extend(load_wordlist(path)?); }
    dedup_in_order(&mut out);
    Ok(out)
}

/// Split `key=value` at the first `=`. The value may be empty, the key may not.
pub fn parse_key_value(s: &str) -> Result<(String, String), ScanError> {
    let (k, v) = s.split_once('=').ok_or_else(|| ScanError::KeyValue(s.to_string()))?;
    let k = k.trim();
    if k.is_empty() { return Err(ScanError::KeyValue(s.to_string())); }
    Ok((k.to_string(), v.to_string()))
}

pub fn parse_key_values(pairs: &[String]) -> Result<BTreeMap<String, String>, ScanError> {
    pairs.iter().map(|p| parse_key_value(p)).collect()
}
