//! HTTP side of the engine: request construction, the probe executor and the
//! secondary handlers chained onto its responses.

pub mod dispatcher;
pub mod executor;
pub mod forms;
pub mod request;
pub mod response;

use anyhow::{Context, Result};
use jndiscan_core::ConstantValues;
use reqwest::{redirect::Policy, Client, Proxy};
use std::time::Duration;

pub use dispatcher::{DispatchContext, Dispatcher, FormSubmitHandler, SecondaryHandler, UnauthorizedHandler};
pub use executor::{Executor, Jobs, ProbeJob};
pub use forms::{extract_forms, HtmlForm};
pub use request::{Credentials, ProbeRequest, RequestBody};
pub use response::ProbeResponse;

const MAX_REDIRECTS: usize = 10;

/// Transport policy applied uniformly to every request of a scan.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub proxy: Option<String>,
    pub basic_auth: Option<(String, String)>,
    pub user_agent: String,
    /// Cap on how much of a response body handlers get to see.
    pub max_body_bytes: usize,
    /// Placeholder-free `--set-*` values sent on every request.
    pub constants: ConstantValues,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        ProbeOptions {
            timeout: Duration::from_secs(3),
            follow_redirects: true,
            proxy: None,
            basic_auth: None,
            user_agent: format!("jndiscan/{}", jndiscan_core::version()),
            max_body_bytes: 512 * 1024,
            constants: ConstantValues::default(),
        }
    }
}

/// Build the client shared read-only by all workers.
pub fn build_client(opts: &ProbeOptions) -> Result<Client> {
    let redirect = if opts.follow_redirects { same_host_redirects() } else { Policy::none() };
    let mut builder = Client::builder()
        .redirect(redirect)
        .timeout(opts.timeout)
        .user_agent(opts.user_agent.clone())
        .danger_accept_invalid_certs(true)
        .brotli(true)
        .gzip(true)
        .deflate(true);
    if let Some(proxy) = &opts.proxy {
        builder = builder.proxy(Proxy::all(proxy).with_context(|| format!("invalid proxy {}", proxy))?);
    }
    builder.build().context("building http client")
}

/// Follow redirects only while they stay on the host of the original request.
fn same_host_redirects() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        let origin = attempt.previous().first().and_then(|u| u.host_str()).map(str::to_owned);
        if origin.as_deref() == attempt.url().host_str() { attempt.follow() } else { attempt.stop() }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_rejects_bad_proxy() {
        let opts = ProbeOptions { proxy: Some("::not a url::".into()), ..Default::default() };
        assert!(build_client(&opts).is_err());
        assert!(build_client(&ProbeOptions::default()).is_ok());
    }
}
