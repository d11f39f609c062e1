//! HTML form extraction for the form-submission handler.

use crate::request::{ProbeRequest, RequestBody};
use reqwest::header::HeaderMap;
use reqwest::Method;
use scraper::{Html, Selector};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlForm {
    /// Raw action attribute; empty means the page itself.
    pub action: String,
    pub method: Method,
    pub fields: Vec<String>,
}

/// All `<form>` elements of a page with their named, submittable fields.
/// Malformed markup yields whatever the parser recovered, possibly nothing.
pub fn extract_forms(body: &str) -> Vec<HtmlForm> {
    let doc = Html::parse_document(body);
    let (Ok(form_sel), Ok(field_sel)) = (Selector::parse("form"), Selector::parse("input, textarea, select")) else {
        return Vec::new();
    };
    let mut forms = Vec::new();
    for form in doc.select(&form_sel) {
        let action = form.value().attr("action").unwrap_or("").trim().to_string();
        let method = match form.value().attr("method").map(|m| m.trim().to_ascii_lowercase()) {
            Some(m) if m == "post" => Method::POST,
            _ => Method::GET,
        };
        let mut fields: Vec<String> = Vec::new();
        for el in form.select(&field_sel) {
            let ty = el.value().attr("type").unwrap_or("text").to_ascii_lowercase();
            if matches!(ty.as_str(), "submit" | "button" | "reset" | "image") { continue; }
            if let Some(name) = el.value().attr("name").filter(|n| !n.is_empty()) {
                if !fields.iter().any(|f| f == name) { fields.push(name.to_string()); }
            }
        }
        forms.push(HtmlForm { action, method, fields });
    }
    forms
}

impl HtmlForm {
    /// Absolute action URL, resolved against the page the form was found on.
    pub fn resolve_action(&self, page: &Url) -> Option<Url> {
        if self.action.is_empty() { return Some(page.clone()); }
        page.join(&self.action).ok()
    }

    /// The submission request with every field set to `value`.
    pub fn to_request(&self, mut action: Url, value: &str, headers: &HeaderMap) -> ProbeRequest {
        let values: Vec<(String, String)> = self.fields.iter().map(|f| (f.clone(), value.to_string())).collect();
        action.set_fragment(None);
        let mut req = if self.method == Method::GET {
            action.set_query(None);
            if !values.is_empty() { action.query_pairs_mut().extend_pairs(values.iter()); }
            ProbeRequest::new(Method::GET, action)
        } else {
            ProbeRequest { body: RequestBody::Form(values), ..ProbeRequest::new(Method::POST, action) }
        };
        req.headers = headers.clone();
        req
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <form action="/login" method="POST">
          <input name="user"><input type="password" name="pass">
          <input type="submit" name="go" value="Go"><button name="b">x</button>
        </form>
        <form><textarea name="comment"></textarea><select name="lang"></select><input name="comment"></form>
        <form action="https://other.test/collect" method="get"><input name="email"></form>
    </body></html>"#;

    #[test]
    fn extracts_forms_and_fields() {
        let forms = extract_forms(PAGE);
        assert_eq!(forms.len(), 3);
        assert_eq!(forms[0], HtmlForm { action: "/login".into(), method: Method::POST, fields: vec!["user".into(), "pass".into()] });
        assert_eq!(forms[1].method, Method::GET);
        assert_eq!(forms[1].fields, vec!["comment", "lang"]);
        assert!(extract_forms("<p>no forms</p>").is_empty());
        assert!(extract_forms("<form <<<").len() <= 1);
    }

    #[test]
    fn resolves_actions_against_the_page() {
        let page = Url::parse("http://example.test/app/index.html").unwrap();
        let forms = extract_forms(PAGE);
        assert_eq!(forms[0].resolve_action(&page).unwrap().as_str(), "http://example.test/login");
        assert_eq!(forms[1].resolve_action(&page).unwrap(), page);
        assert_eq!(forms[2].resolve_action(&page).unwrap().host_str(), Some("other.test"));
    }

    #[test]
    fn builds_submission_requests() {
        let forms = extract_forms(PAGE);
        let post = forms[0].to_request(Url::parse("http://example.test/login").unwrap(), "P", &HeaderMap::new());
        assert_eq!(post.method, Method::POST);
        assert_eq!(post.body, RequestBody::Form(vec![("user".into(), "P".into()), ("pass".into(), "P".into())]));
        let get = forms[1].to_request(Url::parse("http://example.test/search?old=1#top").unwrap(), "P", &HeaderMap::new());
        assert_eq!(get.method, Method::GET);
        assert_eq!(get.url.as_str(), "http://example.test/search?comment=P&lang=P");
    }
}
