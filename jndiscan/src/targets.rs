//! Target expansion for `remote url` and `remote cidr`. CIDR hosts are produced on
//! demand so a /8 costs no more memory than a /32.

use anyhow::{Context, Result};
use ipnet::{IpAddrRange, IpNet};
use jndiscan_core::{ScanError, Target};
use std::net::IpAddr;
use tracing::debug;

pub const DEFAULT_SCHEMAS: [&str; 2] = ["http", "https"];

pub fn url_target(url: &str) -> Result<Target> {
    Ok(Target::parse(url)?)
}

/// Host addresses of a CIDR. A bare address is a range of one.
pub fn expand_cidr(cidr: &str) -> Result<IpAddrRange> {
    let cidr = cidr.trim();
    if let Ok(ip) = cidr.parse::<IpAddr>() { return Ok(IpNet::from(ip).hosts()); }
    let net: IpNet = cidr.parse().with_context(|| format!("invalid CIDR {:?}", cidr))?;
    Ok(net.hosts())
}

/// One `scheme://host[:port]/` target per host and scheme, host-major.
pub fn cidr_targets(cidr: &str, schemas: &[String], port: Option<u16>) -> Result<CidrTargets> {
    let schemas: Vec<String> = if schemas.is_empty() {
        DEFAULT_SCHEMAS.iter().map(|s| s.to_string()).collect()
    } else {
        schemas.iter().map(|s| s.trim().to_ascii_lowercase()).collect()
    };
    if let Some(bad) = schemas.iter().find(|s| !DEFAULT_SCHEMAS.contains(&s.as_str())) {
        return Err(ScanError::invalid("scheme", bad).into());
    }
    Ok(CidrTargets { hosts: expand_cidr(cidr)?, schemas, port, host: None, next_schema: 0 })
}

#[derive(Debug, Clone)]
pub struct CidrTargets {
    hosts: IpAddrRange,
    schemas: Vec<String>,
    port: Option<u16>,
    host: Option<String>,
    next_schema: usize,
}

impl Iterator for CidrTargets {
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        loop {
            if let Some(host) = &self.host {
                if let Some(scheme) = self.schemas.get(self.next_schema) {
                    self.next_schema += 1;
                    let url = match self.port {
                        Some(p) => format!("{}://{}:{}/", scheme, host, p),
                        None => format!("{}://{}/", scheme, host),
                    };
                    match Target::parse(&url) {
                        Ok(t) => return Some(t),
                        Err(e) => {
                            debug!(%url, error = %e, "skipping unusable target");
                            continue;
                        }
                    }
                }
            }
            self.host = Some(match self.hosts.next()? {
                IpAddr::V4(v4) => v4.to_string(),
                IpAddr::V6(v6) => format!("[{}]", v6),
            });
            self.next_schema = 0;
        }
    }
}

/// Everything a scan will visit, in order.
#[derive(Debug, Clone)]
pub enum Targets {
    Url(std::option::IntoIter<Target>),
    Cidr(CidrTargets),
}

impl Targets {
    pub fn one(target: Target) -> Self { Targets::Url(Some(target).into_iter()) }
}

impl Iterator for Targets {
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        match self {
            Targets::Url(t) => t.next(),
            Targets::Cidr(c) => c.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(t: impl Iterator<Item = Target>) -> Vec<String> { t.map(|t| t.as_str().to_string()).collect() }

    #[test]
    fn expands_hosts_only() {
        let ips: Vec<IpAddr> = expand_cidr("192.168.1.0/30").unwrap().collect();
        assert_eq!(ips, vec!["192.168.1.1".parse::<IpAddr>().unwrap(), "192.168.1.2".parse().unwrap()]);
        assert_eq!(expand_cidr("10.0.0.7").unwrap().count(), 1);
        assert!(expand_cidr("10.0.0.0/33").is_err());
    }

    #[test]
    fn targets_per_scheme() {
        let t = cidr_targets("192.168.1.0/30", &[], None).unwrap();
        assert_eq!(urls(t), vec!["http://192.168.1.1/", "https://192.168.1.1/", "http://192.168.1.2/", "https://192.168.1.2/"]);
        let t = cidr_targets("10.0.0.1/32", &["HTTPS".to_string()], Some(8443)).unwrap();
        assert_eq!(urls(t), vec!["https://10.0.0.1:8443/"]);
        assert!(cidr_targets("10.0.0.1/32", &["ftp".to_string()], None).is_err());
    }

    #[test]
    fn wide_ranges_are_walked_lazily() {
        let t = cidr_targets("10.0.0.0/8", &[], None).unwrap();
        assert_eq!(urls(t.take(3)), vec!["http://10.0.0.1/", "https://10.0.0.1/", "http://10.0.0.2/"]);
        let t = cidr_targets("fd00::/64", &["http".to_string()], None).unwrap();
        assert_eq!(urls(t.take(2)), vec!["http://[fd00::]/", "http://[fd00::1]/"]);
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let t: Vec<Target> = cidr_targets("fd00::1/128", &["http".to_string()], Some(8080)).unwrap().collect();
        assert_eq!(t[0].as_str(), "http://[fd00::1]:8080/");
        assert_eq!(t[0].host(), "[fd00::1]");
    }

    #[test]
    fn url_targets_are_validated() {
        assert!(url_target("http://example.test/login").is_ok());
        assert!(url_target("example.test").is_err());
        assert_eq!(urls(Targets::one(url_target("http://example.test/").unwrap())), vec!["http://example.test/"]);
    }
}
