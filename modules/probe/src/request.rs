use anyhow::{bail, Result};
use jndiscan_core::{ConstantValues, InjectionPoint, RequestType, Surface, Target};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::{Map, Value};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    Json(Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    Bearer(String),
}

/// Owned description of an outbound request. Kept around so secondary handlers can
/// reissue a variation of it.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub auth: Option<Credentials>,
}

impl ProbeRequest {
    pub fn new(method: Method, url: Url) -> Self {
        ProbeRequest { method, url, headers: HeaderMap::new(), body: RequestBody::Empty, auth: None }
    }

    /// The request placing `value` at `point`: get carries it in a header or the query
    /// string, post in a urlencoded body, json in a JSON object body. Constant values
    /// for the request type go in first.
    pub fn for_point(target: &Target, point: &InjectionPoint, value: &str, constants: &ConstantValues, auth: Option<Credentials>) -> Result<Self> {
        let (method, body) = match point.request_type {
            RequestType::Get => (Method::GET, RequestBody::Empty),
            RequestType::Post => (Method::POST, RequestBody::Form(Vec::new())),
            RequestType::Json => (Method::POST, RequestBody::Json(Value::Object(Map::new()))),
        };
        let mut req = ProbeRequest { body, auth, ..ProbeRequest::new(method, target.url().clone()) };
        for (name, v) in &constants.headers { req.set_header(name, v)?; }
        if point.request_type == RequestType::Get {
            for (name, v) in &constants.params { req.url.query_pairs_mut().append_pair(name, v); }
        } else {
            for (name, v) in &constants.fields { req.set_field(name, v); }
        }
        match point.surface {
            Surface::Header => req.set_header(&point.name, value)?,
            Surface::QueryParam => {
                req.url.query_pairs_mut().append_pair(&point.name, value);
            }
            Surface::BodyField => {
                if !req.set_field(&point.name, value) {
                    bail!("{} requests have no body for field {}", point.request_type, point.name);
                }
            }
        }
        Ok(req)
    }

    fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        self.headers.insert(HeaderName::from_bytes(name.as_bytes())?, HeaderValue::from_str(value)?);
        Ok(())
    }

    /// False when the request has no body to carry fields.
    fn set_field(&mut self, name: &str, value: &str) -> bool {
        match &mut self.body {
            RequestBody::Form(pairs) => pairs.push((name.to_string(), value.to_string())),
            RequestBody::Json(Value::Object(map)) => {
                map.insert(name.to_string(), Value::String(value.to_string()));
            }
            _ => return false,
        }
        true
    }

    pub fn with_auth(mut self, auth: Credentials) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn builder(&self, client: &Client) -> RequestBuilder {
        let mut b = client.request(self.method.clone(), self.url.clone()).headers(self.headers.clone());
        b = match &self.body {
            RequestBody::Empty => b,
            RequestBody::Form(pairs) => b.form(pairs),
            RequestBody::Json(v) => b.json(v),
        };
        match &self.auth {
            Some(Credentials::Basic { username, password }) => b.basic_auth(username, Some(password)),
            Some(Credentials::Bearer(token)) => b.bearer_auth(token),
            None => b,
        }
    }

    pub async fn send(&self, client: &Client) -> reqwest::Result<Response> {
        self.builder(client).send().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jndiscan_core::ValueSource;

    fn point(rt: RequestType, surface: Surface, name: &str) -> InjectionPoint {
        InjectionPoint { request_type: rt, surface, name: name.into(), source: ValueSource::Wordlist }
    }

    fn target() -> Target { Target::parse("http://example.test/login?x=1").unwrap() }

    #[test]
    fn get_header_point() {
        let r = ProbeRequest::for_point(&target(), &point(RequestType::Get, Surface::Header, "X-Api-Version"), "${jndi:x}", &ConstantValues::default(), None).unwrap();
        assert_eq!(r.method, Method::GET);
        assert_eq!(r.headers.get("x-api-version").unwrap(), "${jndi:x}");
        assert_eq!(r.body, RequestBody::Empty);
    }

    #[test]
    fn get_query_point_keeps_existing_query() {
        let r = ProbeRequest::for_point(&target(), &point(RequestType::Get, Surface::QueryParam, "q"), "${jndi:x}", &ConstantValues::default(), None).unwrap();
        let pairs: Vec<(String, String)> = r.url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("x".into(), "1".into()), ("q".into(), "${jndi:x}".into())]);
    }

    #[test]
    fn post_and_json_bodies() {
        let r = ProbeRequest::for_point(&target(), &point(RequestType::Post, Surface::BodyField, "username"), "p", &ConstantValues::default(), None).unwrap();
        assert_eq!(r.method, Method::POST);
        assert_eq!(r.body, RequestBody::Form(vec![("username".into(), "p".into())]));
        let r = ProbeRequest::for_point(&target(), &point(RequestType::Json, Surface::BodyField, "username"), "p", &ConstantValues::default(), None).unwrap();
        assert_eq!(r.body, RequestBody::Json(serde_json::json!({ "username": "p" })));
    }

    #[test]
    fn constants_ride_along_with_every_point() {
        let c = ConstantValues {
            headers: vec![("Cookie".into(), "session=abc".into())],
            params: vec![("lang".into(), "en".into())],
            fields: vec![("csrf".into(), "t0k".into())],
        };
        let r = ProbeRequest::for_point(&target(), &point(RequestType::Get, Surface::QueryParam, "q"), "${jndi:x}", &c, None).unwrap();
        assert_eq!(r.headers.get("cookie").unwrap(), "session=abc");
        let pairs: Vec<(String, String)> = r.url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("x".into(), "1".into()), ("lang".into(), "en".into()), ("q".into(), "${jndi:x}".into())]);

        let r = ProbeRequest::for_point(&target(), &point(RequestType::Json, Surface::Header, "X-Api-Version"), "${jndi:x}", &c, None).unwrap();
        assert_eq!(r.headers.get("cookie").unwrap(), "session=abc");
        assert_eq!(r.body, RequestBody::Json(serde_json::json!({ "csrf": "t0k" })));
        assert_eq!(r.url.query(), Some("x=1"));

        let bad = ConstantValues { headers: vec![("bad header".into(), "v".into())], ..Default::default() };
        assert!(ProbeRequest::for_point(&target(), &point(RequestType::Get, Surface::QueryParam, "q"), "p", &bad, None).is_err());
    }

    #[test]
    fn invalid_header_names_are_errors() {
        assert!(ProbeRequest::for_point(&target(), &point(RequestType::Get, Surface::Header, "bad header"), "p", &ConstantValues::default(), None).is_err());
        assert!(ProbeRequest::for_point(&target(), &point(RequestType::Get, Surface::BodyField, "f"), "p", &ConstantValues::default(), None).is_err());
    }
}
