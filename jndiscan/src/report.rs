//! Result output: text lines, a JSON array, JSON lines, or CSV.

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use jndiscan_core::{Confirmation, ScanResult};
use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Jsonl,
}

const CSV_HEADER: [&str; 14] = [
    "target", "request_type", "surface", "name", "variant", "marker", "state", "status", "error",
    "sent_at", "callback_kind", "callback_peer", "callback_at", "payload",
];

enum Sink<W: Write> {
    Lines(W),
    Csv(csv::Writer<W>),
}

/// Receives settled results as they stream out of the correlator. Confirmed results are
/// always reported; the rest only in verbose mode.
pub struct Reporter<W: Write> {
    format: OutputFormat,
    verbose: bool,
    sink: Sink<W>,
    collected: Vec<ScanResult>,
}

pub type BoxedReporter = Reporter<Box<dyn Write + Send>>;

impl BoxedReporter {
    /// Stdout unless `out` is given. CSV needs a file.
    pub fn open(format: OutputFormat, verbose: bool, out: Option<&Path>, csv: bool) -> Result<Self> {
        if csv && out.is_none() { bail!("--csv requires --out"); }
        let w: Box<dyn Write + Send> = match out {
            Some(p) => Box::new(BufWriter::new(File::create(p).with_context(|| format!("creating {}", p.display()))?)),
            None => Box::new(io::stdout()),
        };
        if csv { Reporter::csv(verbose, w) } else { Ok(Reporter::new(format, verbose, w)) }
    }
}

impl<W: Write> Reporter<W> {
    pub fn new(format: OutputFormat, verbose: bool, w: W) -> Self {
        Reporter { format, verbose, sink: Sink::Lines(w), collected: Vec::new() }
    }

    pub fn csv(verbose: bool, w: W) -> Result<Self> {
        let mut wtr = csv::Writer::from_writer(w);
        wtr.write_record(CSV_HEADER)?;
        Ok(Reporter { format: OutputFormat::Text, verbose, sink: Sink::Csv(wtr), collected: Vec::new() })
    }

    pub fn wants(&self, r: &ScanResult) -> bool { self.verbose || r.state == Confirmation::Confirmed }

    pub fn write(&mut self, r: ScanResult) -> Result<()> {
        if !self.wants(&r) { return Ok(()); }
        match &mut self.sink {
            Sink::Csv(wtr) => wtr.write_record(csv_row(&r))?,
            Sink::Lines(w) => match self.format {
                OutputFormat::Text => writeln!(w, "{}", text_line(&r))?,
                OutputFormat::Jsonl => {
                    writeln!(w, "{}", serde_json::to_string(&r)?)?;
                    w.flush()?;
                }
                OutputFormat::Json => self.collected.push(r),
            },
        }
        Ok(())
    }

    /// Flush everything; a JSON report is written here as one array.
    pub fn finish(self) -> Result<W> {
        match self.sink {
            Sink::Csv(wtr) => wtr.into_inner().map_err(|e| anyhow::anyhow!("flushing csv: {}", e.error())),
            Sink::Lines(mut w) => {
                if self.format == OutputFormat::Json {
                    writeln!(w, "{}", serde_json::to_string_pretty(&self.collected)?)?;
                }
                w.flush()?;
                Ok(w)
            }
        }
    }
}

fn text_line(r: &ScanResult) -> String {
    let mut line = format!("[{}] {} {} ({}) marker={}", r.state, r.target, r.point, r.variant, r.marker);
    if let Some(s) = r.status { line.push_str(&format!(" status={}", s)); }
    if let Some(cb) = &r.callback {
        line.push_str(&format!(" callback={}", cb.kind));
        if let Some(peer) = cb.peer { line.push_str(&format!(" from={}", peer)); }
    }
    if let Some(e) = &r.error { line.push_str(&format!(" error={:?}", e)); }
    line
}

fn csv_row(r: &ScanResult) -> [String; 14] {
    let cb = r.callback.as_ref();
    [
        r.target.to_string(),
        r.point.request_type.to_string(),
        r.point.surface.to_string(),
        r.point.name.clone(),
        r.variant.clone(),
        r.marker.to_string(),
        r.state.to_string(),
        r.status.map(|v| v.to_string()).unwrap_or_default(),
        r.error.clone().unwrap_or_default(),
        r.sent_at.clone(),
        cb.map(|c| c.kind.to_string()).unwrap_or_default(),
        cb.and_then(|c| c.peer).map(|p| p.to_string()).unwrap_or_default(),
        cb.map(|c| c.observed_at.clone()).unwrap_or_default(),
        r.payload.clone(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use jndiscan_core::{CallbackEvent, CatcherKind, InjectionPoint, Marker, ProbeAttempt, RequestType, Surface, Target, ValueSource};

    fn result(state: Confirmation) -> ScanResult {
        let point = InjectionPoint { request_type: RequestType::Get, surface: Surface::Header, name: "X-Api-Version".into(), source: ValueSource::Wordlist };
        let marker = Marker::new();
        let mut a = ProbeAttempt::new(Target::parse("http://example.test/login").unwrap(), point, "canonical", format!("${{jndi:dns://10.0.0.5:53/{}.l4s}}", marker), marker.clone());
        a.status = Some(200);
        let cb = (state == Confirmation::Confirmed).then(|| CallbackEvent::new(marker, CatcherKind::Dns, Some("10.9.9.9:5353".parse().unwrap()), "x"));
        ScanResult::from_attempt(a, state, cb)
    }

    fn render(format: OutputFormat, verbose: bool, results: Vec<ScanResult>) -> String {
        let mut rep = Reporter::new(format, verbose, Vec::new());
        for r in results { rep.write(r).unwrap(); }
        String::from_utf8(rep.finish().unwrap()).unwrap()
    }

    #[test]
    fn text_reports_confirmed_unless_verbose() {
        let out = render(OutputFormat::Text, false, vec![result(Confirmation::Confirmed), result(Confirmation::SentUnconfirmed)]);
        assert_eq!(out.lines().count(), 1);
        assert!(out.starts_with("[confirmed] http://example.test/login get header X-Api-Version (canonical)"));
        assert!(out.contains("callback=dns from=10.9.9.9:5353"));
        let out = render(OutputFormat::Text, true, vec![result(Confirmation::Confirmed), result(Confirmation::TransportError)]);
        assert_eq!(out.lines().count(), 2);
        assert!(out.contains("[transport-error]"));
    }

    #[test]
    fn jsonl_and_json() {
        let out = render(OutputFormat::Jsonl, true, vec![result(Confirmation::Confirmed), result(Confirmation::SentUnconfirmed)]);
        let rows: Vec<serde_json::Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(rows[0]["state"], "confirmed");
        assert_eq!(rows[0]["point"]["surface"], "header");
        assert_eq!(rows[1]["state"], "sent-unconfirmed");
        assert!(rows[1]["callback"].is_null());

        let out = render(OutputFormat::Json, false, vec![result(Confirmation::Confirmed)]);
        let arr: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(render(OutputFormat::Json, false, vec![]).trim(), "[]");
    }

    #[test]
    fn csv_rows() {
        let mut rep = Reporter::csv(false, Vec::new()).unwrap();
        rep.write(result(Confirmation::Confirmed)).unwrap();
        rep.write(result(Confirmation::SentUnconfirmed)).unwrap();
        let out = String::from_utf8(rep.finish().unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("target,request_type,surface,name"));
        assert!(lines[1].contains(",confirmed,200,"));
    }

    #[test]
    fn csv_needs_a_file() {
        assert!(BoxedReporter::open(OutputFormat::Text, false, None, true).is_err());
    }
}
