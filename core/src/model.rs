//! Data model shared by the enumerator, executor, catchers and correlator.

use crate::{Marker, ScanError, Target};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc;

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType { Get, Post, Json }

impl RequestType {
    pub const ALL: [RequestType; 3] = [RequestType::Get, RequestType::Post, RequestType::Json];

    pub fn as_str(&self) -> &'static str {
        match self { RequestType::Get => "get", RequestType::Post => "post", RequestType::Json => "json" }
    }
}

impl FromStr for RequestType {
    type Err = ScanError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "get" => Ok(RequestType::Get),
            "post" => Ok(RequestType::Post),
            "json" => Ok(RequestType::Json),
            _ => Err(ScanError::invalid("request type", s)),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Where in the request the payload is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Surface { Header, QueryParam, BodyField }

impl Surface {
    pub fn as_str(&self) -> &'static str {
        match self { Surface::Header => "header", Surface::QueryParam => "query-param", Surface::BodyField => "body-field" }
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueSource {
    Wordlist,
    /// Fixed value template; `{{payload}}` is substituted with the rendered payload.
    Fixed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct InjectionPoint {
    pub request_type: RequestType,
    pub surface: Surface,
    pub name: String,
    pub source: ValueSource,
}

impl InjectionPoint {
    /// Identity used for de-duplication. Header names are case-insensitive.
    pub fn key(&self) -> (RequestType, Surface, String) {
        let name = if self.surface == Surface::Header { self.name.to_ascii_lowercase() } else { self.name.clone() };
        (self.request_type, self.surface, name)
    }

    /// The value actually sent for this point, given the rendered payload.
    pub fn value(&self, payload: &str) -> String {
        match &self.source {
            ValueSource::Wordlist => payload.to_string(),
            ValueSource::Fixed(template) => template.replace("{{payload}}", payload),
        }
    }
}

impl fmt::Display for InjectionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.request_type, self.surface, self.name)
    }
}

/// Whether a fixed value carries the marker once rendered. Values that don't are sent
/// as constants instead of becoming injection points.
pub fn is_template(value: &str) -> bool {
    value.contains("{{payload}}") || value.contains("{{resource}}")
}

/// Fixed values without a placeholder, sent unchanged on every request they apply to:
/// headers on all of them, params on `get`, fields on `post` and `json`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantValues {
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub fields: Vec<(String, String)>,
}

impl ConstantValues {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.params.is_empty() && self.fields.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatcherKind { Dns, Ldap, Tcp, None }

impl CatcherKind {
    /// JNDI protocol the payload must use to reach this catcher.
    pub fn protocol(&self) -> &'static str {
        match self { CatcherKind::Dns => "dns", _ => "ldap" }
    }

    pub fn is_active(&self) -> bool { *self != CatcherKind::None }

    pub fn as_str(&self) -> &'static str {
        match self { CatcherKind::Dns => "dns", CatcherKind::Ldap => "ldap", CatcherKind::Tcp => "tcp", CatcherKind::None => "none" }
    }
}

impl FromStr for CatcherKind {
    type Err = ScanError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dns" => Ok(CatcherKind::Dns),
            "ldap" => Ok(CatcherKind::Ldap),
            "tcp" => Ok(CatcherKind::Tcp),
            "none" => Ok(CatcherKind::None),
            _ => Err(ScanError::invalid("catcher type", s)),
        }
    }
}

impl fmt::Display for CatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// One request sent for (target, injection point, payload variant).
#[derive(Debug, Clone, Serialize)]
pub struct ProbeAttempt {
    pub target: Target,
    pub point: InjectionPoint,
    pub variant: String,
    pub payload: String,
    pub marker: Marker,
    pub sent_at: String,
    pub status: Option<u16>,
    pub error: Option<String>,
}

impl ProbeAttempt {
    pub fn new(target: Target, point: InjectionPoint, variant: impl Into<String>, payload: String, marker: Marker) -> Self {
        ProbeAttempt { target, point, variant: variant.into(), payload, marker, sent_at: now_rfc3339(), status: None, error: None }
    }
}

/// Writes into the attempt ledger: once when an attempt is created, once with its outcome.
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    Sent(ProbeAttempt),
    Outcome { marker: Marker, status: Option<u16>, error: Option<String> },
}

pub type LedgerSender = mpsc::UnboundedSender<LedgerEvent>;
pub type LedgerReceiver = mpsc::UnboundedReceiver<LedgerEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackEvent {
    pub marker: Marker,
    pub observed_at: String,
    pub kind: CatcherKind,
    pub peer: Option<SocketAddr>,
    /// What carried the marker: the DNS query name, the LDAP base DN, or the matched bytes.
    pub detail: String,
}

impl CallbackEvent {
    pub fn new(marker: Marker, kind: CatcherKind, peer: Option<SocketAddr>, detail: impl Into<String>) -> Self {
        CallbackEvent { marker, observed_at: now_rfc3339(), kind, peer, detail: detail.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Confirmation { Confirmed, SentUnconfirmed, TransportError }

impl Confirmation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confirmation::Confirmed => "confirmed",
            Confirmation::SentUnconfirmed => "sent-unconfirmed",
            Confirmation::TransportError => "transport-error",
        }
    }
}

impl fmt::Display for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Terminal artifact of the pipeline, one per attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub target: Target,
    pub point: InjectionPoint,
    pub variant: String,
    pub marker: Marker,
    pub payload: String,
    pub state: Confirmation,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub sent_at: String,
    pub callback: Option<CallbackEvent>,
}

impl ScanResult {
    pub fn from_attempt(attempt: ProbeAttempt, state: Confirmation, callback: Option<CallbackEvent>) -> Self {
        ScanResult {
            target: attempt.target,
            point: attempt.point,
            variant: attempt.variant,
            marker: attempt.marker,
            payload: attempt.payload,
            state,
            status: attempt.status,
            error: attempt.error,
            sent_at: attempt.sent_at,
            callback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_keys_ignore_case() {
        let a = InjectionPoint { request_type: RequestType::Get, surface: Surface::Header, name: "X-Api-Version".into(), source: ValueSource::Wordlist };
        let b = InjectionPoint { name: "x-api-version".into(), ..a.clone() };
        assert_eq!(a.key(), b.key());
        let p = InjectionPoint { surface: Surface::QueryParam, ..a.clone() };
        let q = InjectionPoint { name: "x-api-version".into(), ..p.clone() };
        assert_ne!(p.key(), q.key());
    }

    #[test]
    fn fixed_values_wrap_the_payload() {
        let p = InjectionPoint { request_type: RequestType::Get, surface: Surface::Header, name: "Authorization".into(), source: ValueSource::Fixed("Bearer {{payload}}".into()) };
        assert_eq!(p.value("${jndi:x}"), "Bearer ${jndi:x}");
        let w = InjectionPoint { source: ValueSource::Wordlist, ..p };
        assert_eq!(w.value("${jndi:x}"), "${jndi:x}");
    }

    #[test]
    fn only_marker_bearing_values_are_templates() {
        assert!(is_template("Bearer {{payload}}"));
        assert!(is_template("https://x/{{resource}}"));
        assert!(!is_template("session=abc"));
        assert!(!is_template("{{caddr}}"));
    }

    #[test]
    fn parse_enums() {
        assert_eq!("JSON".parse::<RequestType>().unwrap(), RequestType::Json);
        assert!("put".parse::<RequestType>().is_err());
        assert_eq!("ldap".parse::<CatcherKind>().unwrap().protocol(), "ldap");
        assert_eq!("tcp".parse::<CatcherKind>().unwrap().protocol(), "ldap");
        assert_eq!("dns".parse::<CatcherKind>().unwrap().protocol(), "dns");
        assert!(!"none".parse::<CatcherKind>().unwrap().is_active());
        assert!("smtp".parse::<CatcherKind>().is_err());
    }
}
