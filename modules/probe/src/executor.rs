//! Bounded fan-out of probe attempts over (target, injection point, variant).

use crate::dispatcher::{DispatchContext, Dispatcher};
use crate::request::{Credentials, ProbeRequest};
use crate::response::ProbeResponse;
use crate::{build_client, ProbeOptions};
use anyhow::Result;
use jndiscan_core::{ConstantValues, InjectionPoint, LedgerEvent, LedgerSender, Marker, ProbeAttempt, Target, WorkerPool};
use payloads::{PayloadGenerator, PayloadTemplate};
use reqwest::Client;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ProbeJob {
    pub target: Target,
    pub point: InjectionPoint,
    pub variant: PayloadTemplate,
}

/// Lazy cross product of targets, points and variants, target-major. Targets are pulled
/// from the underlying iterator one at a time, so a large CIDR range costs nothing until
/// a worker slot frees up.
#[derive(Debug, Clone)]
pub struct Jobs<T> {
    targets: T,
    points: Vec<InjectionPoint>,
    variants: Vec<PayloadTemplate>,
    current: Option<Target>,
    next: usize,
}

impl<T: Iterator<Item = Target>> Jobs<T> {
    pub fn new<I>(targets: I, points: Vec<InjectionPoint>, variants: Vec<PayloadTemplate>) -> Self
    where
        I: IntoIterator<Item = Target, IntoIter = T>,
    {
        Jobs { targets: targets.into_iter(), points, variants, current: None, next: 0 }
    }

    /// Attempts made against each target.
    pub fn per_target(&self) -> usize { self.points.len() * self.variants.len() }
}

impl<T: Iterator<Item = Target>> Iterator for Jobs<T> {
    type Item = ProbeJob;

    fn next(&mut self) -> Option<ProbeJob> {
        let per_target = self.per_target();
        if per_target == 0 { return None; }
        if self.current.is_none() || self.next == per_target {
            self.current = Some(self.targets.next()?);
            self.next = 0;
        }
        let target = self.current.clone()?;
        let (p, v) = (self.next / self.variants.len(), self.next % self.variants.len());
        self.next += 1;
        Some(ProbeJob { target, point: self.points[p].clone(), variant: self.variants[v].clone() })
    }
}

pub struct Executor {
    client: Client,
    generator: PayloadGenerator,
    dispatcher: Dispatcher,
    constants: ConstantValues,
    auth: Option<Credentials>,
    max_body_bytes: usize,
}

impl Executor {
    pub fn new(opts: &ProbeOptions, generator: PayloadGenerator, dispatcher: Dispatcher) -> Result<Self> {
        let client = build_client(opts)?;
        let auth = opts.basic_auth.clone().map(|(username, password)| Credentials::Basic { username, password });
        Ok(Executor { client, generator, dispatcher, constants: opts.constants.clone(), auth, max_body_bytes: opts.max_body_bytes })
    }

    /// Run every job, at most `pool.size()` at a time. Stops handing out work once
    /// `cancel` fires; in-flight attempts abandon their request. Returns the number of
    /// attempts started.
    pub async fn run<I>(self: Arc<Self>, jobs: I, pool: WorkerPool, ledger: LedgerSender, cancel: CancellationToken) -> usize
    where
        I: IntoIterator<Item = ProbeJob>,
    {
        debug!(slots = pool.size(), "executor started");
        let mut set = JoinSet::new();
        let mut started = 0usize;
        for job in jobs {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    pool.close();
                    break;
                }
                p = pool.acquire() => match p { Ok(p) => p, Err(_) => break },
            };
            let this = self.clone();
            let ledger = ledger.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                this.execute(job, &ledger, &cancel).await;
                drop(permit);
            });
            started += 1;
            while let Some(res) = set.try_join_next() { reap(res); }
        }
        while let Some(res) = set.join_next().await { reap(res); }
        debug!(started, "executor drained");
        started
    }

    async fn execute(&self, job: ProbeJob, ledger: &LedgerSender, cancel: &CancellationToken) {
        let marker = Marker::new();
        let payload = self.generator.render(&job.variant.template, &marker);
        let value = self.generator.render(&job.point.value(&payload), &marker);
        let attempt = ProbeAttempt::new(job.target.clone(), job.point.clone(), job.variant.name.clone(), value.clone(), marker.clone());
        // The attempt must be in the ledger before anything can call back for it.
        if ledger.send(LedgerEvent::Sent(attempt)).is_err() { return; }

        let request = match ProbeRequest::for_point(&job.target, &job.point, &value, &self.constants, self.auth.clone()) {
            Ok(r) => r,
            Err(e) => {
                debug!(point = %job.point, error = %e, "could not build request");
                outcome(ledger, &marker, None, Some(format!("{:#}", e)));
                return;
            }
        };
        debug!("checking {} for {} via {}", job.target, job.variant.name, job.point);

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            r = request.send(&self.client) => r,
        };
        let resp = match sent {
            Ok(r) => r,
            Err(e) => {
                debug!(url = %request.url, error = %e, "request failed");
                outcome(ledger, &marker, None, Some(format!("{:#}", e)));
                return;
            }
        };
        outcome(ledger, &marker, Some(resp.status().as_u16()), None);
        if self.dispatcher.is_empty() { return; }

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            r = ProbeResponse::read(resp, self.max_body_bytes, self.dispatcher.needs_body()) => r,
        };
        let response = match read {
            Ok(r) => r,
            Err(e) => {
                debug!(url = %request.url, error = %e, "response body unreadable, skipping secondary handlers");
                return;
            }
        };

        let ctx = DispatchContext { client: &self.client, target: &job.target, request: &request, response: &response, payload: &payload, marker: &marker };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            n = self.dispatcher.dispatch(&ctx) => {
                if n > 0 { debug!(marker = %marker, requests = n, "secondary probes sent"); }
            }
        }
    }
}

fn outcome(ledger: &LedgerSender, marker: &Marker, status: Option<u16>, error: Option<String>) {
    let _ = ledger.send(LedgerEvent::Outcome { marker: marker.clone(), status, error });
}

fn reap(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        if e.is_panic() { warn!(error = %e, "probe task panicked"); }
    }
}
