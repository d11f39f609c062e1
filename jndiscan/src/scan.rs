//! Wires the engine together for one `remote` scan.

use crate::args::RemoteArgs;
use crate::config::{parse_duration, RemoteConfig};
use crate::report::BoxedReporter;
use crate::targets::Targets;
use anyhow::{bail, Context, Result};
use correlator::{Correlator, Summary};
use injection_surface::{constants, enumerate, merge_entries, parse_key_values, SurfaceConfig};
use jndiscan_core::{CatcherKind, RequestType, ScanError, WorkerPool};
use payloads::{Obfuscation, PayloadGenerator, PayloadOptions};
use probe::{Dispatcher, Executor, FormSubmitHandler, Jobs, ProbeOptions, UnauthorizedHandler};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_RESOURCE: &str = "l4s";
pub const DEFAULT_MAX_THREADS: usize = 150;
pub const DEFAULT_MAX_FORM_SUBMITS: usize = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Fully resolved scan configuration: CLI over config file over defaults.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub targets: Targets,
    pub surface: SurfaceConfig,
    pub payloads: PayloadOptions,
    pub probe: ProbeOptions,
    pub catcher_bind: SocketAddr,
    pub auth_fuzzing: bool,
    pub form_fuzzing: bool,
    pub max_threads: usize,
    pub max_form_submits: usize,
    /// `None` waits for callbacks until interrupted.
    pub wait: Option<Duration>,
    pub max_scan_time: Option<Duration>,
}

impl ScanSettings {
    pub fn resolve(targets: Targets, mut args: RemoteArgs, cfg: Option<&RemoteConfig>) -> Result<Self> {
        args.apply_all();
        let cfg = cfg.cloned().unwrap_or_default();

        let request_types = if !args.request_types.is_empty() {
            args.request_types.clone()
        } else {
            cfg.request_types.clone().unwrap_or_else(|| vec![RequestType::Get])
        };
        let surface = SurfaceConfig {
            request_types,
            headers: merge_entries(&args.headers, args.headers_file.as_deref())?,
            header_values: parse_key_values(&args.set_header)?,
            params: merge_entries(&args.params, args.params_file.as_deref())?,
            param_values: parse_key_values(&args.set_param)?,
            fields: merge_entries(&args.fields, args.fields_file.as_deref())?,
            field_values: parse_key_values(&args.set_field)?,
            user_agent_fuzzing: !args.no_user_agent_fuzzing,
        };

        let catcher = args.catcher_type.or(cfg.catcher_type).unwrap_or(CatcherKind::Dns);
        let Some(caddr) = args.caddr.clone().or(cfg.caddr.clone()) else {
            bail!("--caddr is required: the address targets should call back to");
        };
        let catcher_bind = match args.bind.or(cfg.bind) {
            Some(b) => b,
            None => bind_addr(&caddr, catcher)?,
        };
        let payloads = PayloadOptions {
            catcher,
            caddr,
            resource: args.resource.clone().or(cfg.resource.clone()).unwrap_or_else(|| DEFAULT_RESOURCE.to_string()),
            custom: merge_entries(&args.payloads, args.payloads_file.as_deref())?,
            obfuscation: if args.waf_bypass {
                Obfuscation::All
            } else if args.waf_bypass_random {
                Obfuscation::Random
            } else {
                Obfuscation::Canonical
            },
            cve_2021_45046: args.check_cve_2021_45046,
        };

        let basic_auth = match &args.basic_auth {
            Some(s) => Some(s.split_once(':').map(|(u, p)| (u.to_string(), p.to_string())).ok_or_else(|| ScanError::invalid("basic auth (want user:pass)", s))?),
            None => None,
        };
        let timeout = duration_or(args.timeout.as_deref().or(cfg.timeout.as_deref()), DEFAULT_TIMEOUT)?;
        let probe = ProbeOptions {
            timeout,
            follow_redirects: !args.no_redirect,
            proxy: args.proxy.clone().or(cfg.proxy.clone()),
            basic_auth,
            constants: constants(&surface),
            ..ProbeOptions::default()
        };
        let wait = if args.no_wait_timeout {
            None
        } else {
            Some(duration_or(args.wait.as_deref().or(cfg.wait.as_deref()), DEFAULT_WAIT)?)
        };
        let max_scan_time = args.max_scan_time.as_deref().map(parse_duration).transpose()?;

        Ok(ScanSettings {
            targets,
            surface,
            payloads,
            probe,
            catcher_bind,
            auth_fuzzing: args.auth_fuzzing,
            form_fuzzing: args.form_fuzzing,
            max_threads: args.max_threads.or(cfg.max_threads).unwrap_or(DEFAULT_MAX_THREADS),
            max_form_submits: args.max_form_submits.or(cfg.max_form_submits).unwrap_or(DEFAULT_MAX_FORM_SUBMITS),
            wait,
            max_scan_time,
        })
    }
}

fn duration_or(s: Option<&str>, default: Duration) -> Result<Duration> {
    s.map(parse_duration).transpose().map(|d| d.unwrap_or(default))
}

/// Where the catcher listens when `--bind` is not given: the port of `caddr` on all
/// interfaces, or the protocol's default port.
pub fn bind_addr(caddr: &str, kind: CatcherKind) -> Result<SocketAddr> {
    let default_port = if kind == CatcherKind::Dns { 53 } else { 389 };
    if let Ok(sa) = caddr.parse::<SocketAddr>() { return Ok(sa); }
    if let Ok(ip) = caddr.parse::<IpAddr>() { return Ok(SocketAddr::new(ip, default_port)); }
    let port = match caddr.rsplit_once(':') {
        Some((_, p)) => p.parse::<u16>().with_context(|| format!("invalid port in --caddr {:?}", caddr))?,
        None => default_port,
    };
    Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
}

/// Run one scan to completion or cancellation. Configuration and catcher failures are
/// errors; per-request failures end up in the report.
pub async fn run(settings: ScanSettings, mut reporter: BoxedReporter, cancel: CancellationToken) -> Result<Summary> {
    let kind = settings.payloads.catcher;
    let mut catcher = catcher::start(kind, settings.catcher_bind, &settings.payloads.resource)
        .await
        .context("starting callback catcher")?;

    let points = enumerate(&settings.surface);
    let generator = PayloadGenerator::new(&settings.payloads);
    let jobs = Jobs::new(settings.targets, points.clone(), generator.variants().to_vec());
    info!(points = points.len(), variants = generator.variants().len(), per_target = jobs.per_target(), catcher = %kind, "starting scan");
    if !settings.probe.constants.is_empty() {
        debug!(constants = ?settings.probe.constants, "constant values sent with every request");
    }
    if !kind.is_active() {
        warn!("no catcher running; attempts can only be reported as sent");
    }

    let mut dispatcher = Dispatcher::new();
    if settings.auth_fuzzing { dispatcher.register(UnauthorizedHandler); }
    if settings.form_fuzzing { dispatcher.register(FormSubmitHandler::new(settings.max_form_submits)); }
    debug!(handlers = dispatcher.len(), "secondary handlers registered");
    let executor = Arc::new(Executor::new(&settings.probe, generator, dispatcher)?);

    if let Some(limit) = settings.max_scan_time {
        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = c.cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    warn!(?limit, "scan time limit reached");
                    c.cancel();
                }
            }
        });
    }

    let (ledger_tx, ledger_rx) = mpsc::unbounded_channel();
    let (results_tx, mut results_rx) = mpsc::unbounded_channel();
    let exec = tokio::spawn(executor.run(jobs, WorkerPool::new(settings.max_threads), ledger_tx, cancel.clone()));
    let report = tokio::spawn(async move {
        while let Some(r) = results_rx.recv().await { reporter.write(r)?; }
        reporter.finish().map(|_| ())
    });

    let correlator = Correlator::new(settings.wait, kind.is_active());
    let summary = correlator.run(ledger_rx, catcher.events(), results_tx, cancel.clone()).await;
    let started = exec.await.context("executor task failed")?;
    catcher.stop().await;
    report.await.context("report task failed")??;

    info!(started, attempts = summary.attempts, confirmed = summary.confirmed, unconfirmed = summary.unconfirmed, transport_errors = summary.transport_errors, "scan finished");
    Ok(summary)
}
