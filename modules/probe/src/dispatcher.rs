//! Secondary handlers: follow-up probes triggered by the shape of a response.
//!
//! Every handler reuses the payload (and so the marker) of the attempt that triggered
//! it, so a callback caused by a follow-up still attributes to the original attempt.

use crate::forms::extract_forms;
use crate::request::{Credentials, ProbeRequest};
use crate::response::ProbeResponse;
use async_trait::async_trait;
use futures::future::join_all;
use jndiscan_core::{Marker, Target};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Everything a handler may look at for one completed attempt.
pub struct DispatchContext<'a> {
    pub client: &'a Client,
    pub target: &'a Target,
    pub request: &'a ProbeRequest,
    pub response: &'a ProbeResponse,
    pub payload: &'a str,
    pub marker: &'a Marker,
}

#[async_trait]
pub trait SecondaryHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Trigger condition. Cheap; evaluated for every response.
    fn matches(&self, response: &ProbeResponse) -> bool;

    /// Whether the trigger or the handler look at the response body.
    fn needs_body(&self) -> bool { false }

    /// Issue follow-up probes. Failures are absorbed; returns the number of requests sent.
    async fn handle(&self, ctx: &DispatchContext<'_>) -> usize;
}

/// Open registry of handlers. Conditions are evaluated in registration order, matching
/// handlers run concurrently.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Vec<Arc<dyn SecondaryHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self { Self::default() }

    pub fn register(&mut self, handler: impl SecondaryHandler + 'static) -> &mut Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn len(&self) -> usize { self.handlers.len() }

    pub fn is_empty(&self) -> bool { self.handlers.is_empty() }

    pub fn needs_body(&self) -> bool { self.handlers.iter().any(|h| h.needs_body()) }

    pub async fn dispatch(&self, ctx: &DispatchContext<'_>) -> usize {
        let matched: Vec<&Arc<dyn SecondaryHandler>> = self.handlers.iter().filter(|h| h.matches(ctx.response)).collect();
        if matched.is_empty() { return 0; }
        for h in &matched { debug!(handler = h.name(), url = %ctx.request.url, marker = %ctx.marker, "secondary handler triggered"); }
        join_all(matched.iter().map(|h| h.handle(ctx))).await.into_iter().sum()
    }
}

/// Reissues the request with the payload as credentials when the response carries a
/// `WWW-Authenticate` challenge: Basic user and password for a Basic challenge, a
/// bearer token otherwise.
pub struct UnauthorizedHandler;

#[async_trait]
impl SecondaryHandler for UnauthorizedHandler {
    fn name(&self) -> &'static str { "unauthorized" }

    fn matches(&self, response: &ProbeResponse) -> bool { response.www_authenticate().is_some() }

    async fn handle(&self, ctx: &DispatchContext<'_>) -> usize {
        let challenge = ctx.response.www_authenticate().unwrap_or_default().trim_start();
        let basic = challenge.get(..5).is_some_and(|s| s.eq_ignore_ascii_case("basic"));
        let (auth, how) = if basic {
            (Credentials::Basic { username: ctx.payload.to_string(), password: ctx.payload.to_string() }, "basic auth")
        } else {
            (Credentials::Bearer(ctx.payload.to_string()), "bearer")
        };
        debug!("checking {} for {} with {}", ctx.payload, ctx.request.url, how);
        let req = ctx.request.clone().with_auth(auth);
        if let Err(e) = req.send(ctx.client).await {
            debug!(error = %e, url = %req.url, "auth probe failed");
        }
        1
    }
}

/// Fills every field of every in-scope form on an HTML page with the payload and
/// submits the forms concurrently. Forms whose action leaves the target host are skipped.
pub struct FormSubmitHandler {
    slots: Arc<Semaphore>,
}

impl FormSubmitHandler {
    /// `max_concurrent` caps submissions across all invocations of this handler.
    pub fn new(max_concurrent: usize) -> Self {
        FormSubmitHandler { slots: Arc::new(Semaphore::new(max_concurrent.max(1))) }
    }
}

#[async_trait]
impl SecondaryHandler for FormSubmitHandler {
    fn name(&self) -> &'static str { "form-submit" }

    fn matches(&self, response: &ProbeResponse) -> bool {
        response.is_html() && response.body.to_ascii_lowercase().contains("<form")
    }

    fn needs_body(&self) -> bool { true }

    async fn handle(&self, ctx: &DispatchContext<'_>) -> usize {
        let forms = extract_forms(&ctx.response.body);
        if forms.is_empty() {
            debug!("no forms found in response from {}", ctx.response.final_url);
            return 0;
        }
        let mut requests = Vec::new();
        for form in forms {
            let Some(action) = form.resolve_action(&ctx.response.final_url) else {
                debug!(action = %form.action, "unparsable form action");
                continue;
            };
            if !in_scope(&action, ctx.target) {
                debug!("hostname {} out of scope", action.host_str().unwrap_or_default());
                continue;
            }
            let mut req = form.to_request(action, ctx.payload, &ctx.request.headers);
            req.auth = ctx.request.auth.clone();
            requests.push(req);
        }
        let submissions = requests.iter().map(|req| async move {
            let Ok(_slot) = self.slots.acquire().await else { return 0 };
            debug!("checking {} for {}", ctx.payload, req.url);
            if let Err(e) = req.send(ctx.client).await {
                debug!(error = %e, url = %req.url, "form submission failed");
            }
            1
        });
        join_all(submissions).await.into_iter().sum()
    }
}

fn in_scope(action: &url::Url, target: &Target) -> bool {
    action.host_str().is_some_and(|h| h.eq_ignore_ascii_case(target.host()))
}
