//! Out-of-band callback listeners. Each one watches its protocol for
//! `<marker>.<resource>` and turns every sighting into a `CallbackEvent`.

mod ber;
pub mod dns;
pub mod ldap;
pub mod tcp;

use jndiscan_core::{CallbackEvent, CatcherKind, Marker, MarkerScanner, ScanError};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CatcherError {
    #[error("cannot bind {kind} catcher on {addr}: {source}")]
    Bind {
        kind: CatcherKind,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ScanError),
}

/// Shared by every listener: finds markers and forwards them as events.
#[derive(Clone)]
pub(crate) struct Emitter {
    kind: CatcherKind,
    scanner: MarkerScanner,
    tx: UnboundedSender<CallbackEvent>,
}

impl Emitter {
    pub(crate) fn find(&self, haystack: &str) -> Vec<Marker> { self.scanner.find_all(haystack) }

    pub(crate) fn emit(&self, marker: Marker, peer: Option<SocketAddr>, detail: &str) {
        info!(kind = %self.kind, marker = %marker, peer = ?peer, "callback received");
        let _ = self.tx.send(CallbackEvent::new(marker, self.kind, peer, detail));
    }

    /// Emits one event per distinct marker in `haystack`; returns how many.
    pub(crate) fn scan(&self, haystack: &str, peer: Option<SocketAddr>) -> usize {
        let markers = self.find(haystack);
        let n = markers.len();
        for m in markers { self.emit(m, peer, haystack); }
        n
    }
}

/// Pause after a failed accept or recv so a persistent error (EMFILE, a dead socket)
/// cannot spin the loop. Doubles per consecutive failure, capped at one second.
#[derive(Debug, Default)]
pub(crate) struct Backoff {
    failures: u32,
}

impl Backoff {
    const BASE: Duration = Duration::from_millis(50);
    const MAX: Duration = Duration::from_secs(1);

    pub(crate) fn reset(&mut self) { self.failures = 0; }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = Self::BASE.saturating_mul(1 << self.failures.min(5)).min(Self::MAX);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Sleep for the next delay, or return early once `cancel` fires.
    pub(crate) async fn wait(&mut self, cancel: &CancellationToken) {
        let delay = self.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Serve every accepted connection with `session` until cancelled. Open sessions are
/// aborted on the way out.
pub(crate) async fn accept_loop<F, Fut>(listener: TcpListener, emitter: Emitter, cancel: CancellationToken, session: F)
where
    F: Fn(TcpStream, SocketAddr, Emitter, CancellationToken) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let kind = emitter.kind;
    let mut sessions = JoinSet::new();
    let mut backoff = Backoff::default();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    backoff.reset();
                    debug!(%kind, %peer, "connection accepted");
                    let fut = session(stream, peer, emitter.clone(), cancel.clone());
                    sessions.spawn(async move {
                        if let Err(e) = fut.await { debug!(%kind, %peer, error = %e, "session ended"); }
                    });
                }
                Err(e) => {
                    warn!(%kind, error = %e, "accept failed");
                    backoff.wait(&cancel).await;
                }
            },
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }
    sessions.shutdown().await;
}

/// A running listener. Dropping the handle without `stop` leaves the task to die with
/// the runtime.
pub struct CatcherHandle {
    kind: CatcherKind,
    local_addr: Option<SocketAddr>,
    events: Option<UnboundedReceiver<CallbackEvent>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CatcherHandle {
    fn idle() -> Self {
        CatcherHandle { kind: CatcherKind::None, local_addr: None, events: None, cancel: CancellationToken::new(), task: None }
    }

    pub fn kind(&self) -> CatcherKind { self.kind }

    /// Address actually bound; differs from the requested one when port 0 was asked for.
    pub fn local_addr(&self) -> Option<SocketAddr> { self.local_addr }

    /// Callback stream. `None` for the `none` catcher.
    pub fn events(&mut self) -> Option<&mut UnboundedReceiver<CallbackEvent>> { self.events.as_mut() }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        debug!(kind = %self.kind, "catcher stopped");
    }
}

/// Bind the listener for `kind` on `bind` and start serving. Binding happens before
/// this returns, so a bind failure surfaces here rather than mid-scan.
pub async fn start(kind: CatcherKind, bind: SocketAddr, resource: &str) -> Result<CatcherHandle, CatcherError> {
    if !kind.is_active() {
        return Ok(CatcherHandle::idle());
    }
    let scanner = MarkerScanner::new(resource)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let emitter = Emitter { kind, scanner, tx };
    let cancel = CancellationToken::new();
    let bind_err = |source| CatcherError::Bind { kind, addr: bind, source };
    let (local_addr, task) = match kind {
        CatcherKind::Dns => {
            let sock = tokio::net::UdpSocket::bind(bind).await.map_err(bind_err)?;
            let addr = sock.local_addr().map_err(bind_err)?;
            (addr, tokio::spawn(dns::serve(sock, emitter, cancel.clone())))
        }
        CatcherKind::Ldap | CatcherKind::Tcp => {
            let listener = tokio::net::TcpListener::bind(bind).await.map_err(bind_err)?;
            let addr = listener.local_addr().map_err(bind_err)?;
            let task = if kind == CatcherKind::Ldap {
                tokio::spawn(ldap::serve(listener, emitter, cancel.clone()))
            } else {
                tokio::spawn(tcp::serve(listener, emitter, cancel.clone()))
            };
            (addr, task)
        }
        CatcherKind::None => return Ok(CatcherHandle::idle()),
    };
    info!(kind = %kind, addr = %local_addr, "catcher listening");
    Ok(CatcherHandle { kind, local_addr: Some(local_addr), events: Some(rx), cancel, task: Some(task) })
}

#[cfg(test)]
pub(crate) fn test_emitter(kind: CatcherKind) -> (Emitter, UnboundedReceiver<CallbackEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Emitter { kind, scanner: MarkerScanner::new("l4s").unwrap(), tx }, rx)
}
