//! Owns the attempt ledger and joins it with callback events.
//!
//! Every attempt goes `pending -> confirmed | sent-unconfirmed | transport-error`
//! exactly once. A callback confirms a pending attempt until its deadline (send time
//! plus the wait window). After that, or with no active catcher, the attempt
//! settles on what the HTTP side saw.

use jndiscan_core::{CallbackEvent, Confirmation, LedgerEvent, LedgerReceiver, Marker, ProbeAttempt, ScanResult};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub attempts: usize,
    pub confirmed: usize,
    pub unconfirmed: usize,
    pub transport_errors: usize,
    /// Callbacks whose marker matched nothing pending.
    pub stray_callbacks: usize,
}

impl Summary {
    fn count(&mut self, state: Confirmation) {
        match state {
            Confirmation::Confirmed => self.confirmed += 1,
            Confirmation::SentUnconfirmed => self.unconfirmed += 1,
            Confirmation::TransportError => self.transport_errors += 1,
        }
    }
}

struct Pending {
    attempt: ProbeAttempt,
    responded: bool,
}

pub struct Correlator {
    wait: Option<Duration>,
    catcher_active: bool,
    pending: HashMap<Marker, Pending>,
    deadlines: BinaryHeap<Reverse<(Instant, Marker)>>,
    summary: Summary,
}

impl Correlator {
    /// `wait: None` keeps attempts open until cancellation.
    pub fn new(wait: Option<Duration>, catcher_active: bool) -> Self {
        Correlator { wait, catcher_active, pending: HashMap::new(), deadlines: BinaryHeap::new(), summary: Summary::default() }
    }

    pub fn pending(&self) -> usize { self.pending.len() }

    pub fn summary(&self) -> Summary { self.summary }

    pub fn record(&mut self, event: LedgerEvent, now: Instant) -> Option<ScanResult> {
        match event {
            LedgerEvent::Sent(attempt) => {
                self.summary.attempts += 1;
                if let Some(wait) = self.wait {
                    self.deadlines.push(Reverse((now + wait, attempt.marker.clone())));
                }
                self.pending.insert(attempt.marker.clone(), Pending { attempt, responded: false });
                None
            }
            LedgerEvent::Outcome { marker, status, error } => {
                let entry = self.pending.get_mut(&marker)?;
                entry.attempt.status = status;
                entry.attempt.error = error;
                entry.responded = true;
                // Without a catcher nothing can confirm; with one, a request that timed
                // out may still have triggered the lookup, so keep waiting.
                if self.catcher_active { return None; }
                let state = settled(&entry.attempt);
                self.finish(&marker, state, None)
            }
        }
    }

    pub fn on_callback(&mut self, event: CallbackEvent) -> Option<ScanResult> {
        if !self.pending.contains_key(&event.marker) {
            debug!(marker = %event.marker, kind = %event.kind, "callback for unknown or settled attempt");
            self.summary.stray_callbacks += 1;
            return None;
        }
        let marker = event.marker.clone();
        self.finish(&marker, Confirmation::Confirmed, Some(event))
    }

    /// Settle every attempt whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<ScanResult> {
        let mut out = Vec::new();
        while let Some(Reverse((at, _))) = self.deadlines.peek() {
            if *at > now { break; }
            let Some(Reverse((_, marker))) = self.deadlines.pop() else { break };
            let Some(entry) = self.pending.get(&marker) else { continue };
            let state = settled(&entry.attempt);
            out.extend(self.finish(&marker, state, None));
        }
        out
    }

    /// Settle everything still pending, as on cancellation.
    pub fn drain(&mut self) -> Vec<ScanResult> {
        let markers: Vec<Marker> = self.pending.keys().cloned().collect();
        self.deadlines.clear();
        let mut out = Vec::new();
        for m in markers {
            let Some(entry) = self.pending.get(&m) else { continue };
            let state = if entry.responded { settled(&entry.attempt) } else { Confirmation::SentUnconfirmed };
            out.extend(self.finish(&m, state, None));
        }
        out
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.peek().map(|Reverse((at, _))| *at)
    }

    fn finish(&mut self, marker: &Marker, state: Confirmation, callback: Option<CallbackEvent>) -> Option<ScanResult> {
        let entry = self.pending.remove(marker)?;
        self.summary.count(state);
        if state == Confirmation::Confirmed {
            info!(target_url = %entry.attempt.target, point = %entry.attempt.point, variant = %entry.attempt.variant, marker = %marker, "confirmed vulnerable");
        } else {
            debug!(target_url = %entry.attempt.target, point = %entry.attempt.point, marker = %marker, %state, "attempt settled");
        }
        Some(ScanResult::from_attempt(entry.attempt, state, callback))
    }

    /// Drive the ledger until the executor is done and nothing is pending, or until
    /// `cancel` fires. Settled results are streamed to `results`.
    pub async fn run(
        mut self,
        mut ledger: LedgerReceiver,
        mut callbacks: Option<&mut UnboundedReceiver<CallbackEvent>>,
        results: UnboundedSender<ScanResult>,
        cancel: CancellationToken,
    ) -> Summary {
        let emit = |r: ScanResult| { let _ = results.send(r); };
        let mut ledger_open = true;
        let mut callbacks_open = callbacks.is_some();
        loop {
            if !ledger_open && self.pending.is_empty() { break; }
            let next = self.next_deadline();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(pending = self.pending(), "scan cancelled, settling pending attempts");
                    while let Ok(ev) = ledger.try_recv() { if let Some(r) = self.record(ev, Instant::now()) { emit(r); } }
                    self.drain().into_iter().for_each(emit);
                    break;
                }
                ev = ledger.recv(), if ledger_open => match ev {
                    Some(ev) => { if let Some(r) = self.record(ev, Instant::now()) { emit(r); } }
                    None => ledger_open = false,
                },
                cb = next_callback(&mut callbacks), if callbacks_open => match cb {
                    Some(cb) => { if let Some(r) = self.on_callback(cb) { emit(r); } }
                    None => callbacks_open = false,
                },
                _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                    self.expire(Instant::now()).into_iter().for_each(emit);
                }
            }
        }
        self.summary
    }
}

/// What an attempt ends as when no callback arrived for it.
fn settled(attempt: &ProbeAttempt) -> Confirmation {
    if attempt.status.is_none() && attempt.error.is_some() { Confirmation::TransportError } else { Confirmation::SentUnconfirmed }
}

async fn next_callback(rx: &mut Option<&mut UnboundedReceiver<CallbackEvent>>) -> Option<CallbackEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
