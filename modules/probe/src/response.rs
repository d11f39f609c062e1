use reqwest::header::{HeaderMap, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Response, StatusCode};
use url::Url;

/// What the dispatcher sees of a completed request. Dropped once dispatch finishes.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// URL after redirects; form actions resolve against it.
    pub final_url: Url,
    pub body: String,
}

impl ProbeResponse {
    /// Capture status, headers and, if asked for, up to `max_body` bytes of body.
    pub async fn read(mut resp: Response, max_body: usize, with_body: bool) -> reqwest::Result<Self> {
        let status = resp.status();
        let headers = resp.headers().clone();
        let final_url = resp.url().clone();
        let mut body = Vec::new();
        if with_body {
            while let Some(chunk) = resp.chunk().await? {
                let room = max_body.saturating_sub(body.len());
                body.extend_from_slice(&chunk[..chunk.len().min(room)]);
                if body.len() >= max_body { break; }
            }
        }
        Ok(ProbeResponse { status, headers, final_url, body: String::from_utf8_lossy(&body).into_owned() })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn www_authenticate(&self) -> Option<&str> {
        self.headers.get(WWW_AUTHENTICATE).and_then(|v| v.to_str().ok())
    }

    pub fn is_html(&self) -> bool {
        let ct_is_html = self.header(CONTENT_TYPE.as_str()).map(|s| s.to_ascii_lowercase().contains("text/html")).unwrap_or(false);
        ct_is_html || self.body.to_ascii_lowercase().contains("<html")
    }
}
