//! Request and response data model.
//!
//! Requests are described declaratively and handed to the scheme adapter;
//! responses are captured into a plain structure so that pseudo-requests
//! (`file://`, `bash://`, `sql://`) can synthesize them as well.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::utils::opt_duration_serde;

/// Where request parameters end up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamsAs {
    /// Appended to the query string (the default).
    #[default]
    #[serde(rename = "URL", alias = "url")]
    Url,
    /// Form-encoded request body.
    #[serde(rename = "body")]
    Body,
    /// Multipart request body.
    #[serde(rename = "multipart")]
    Multipart,
}

/// A cookie sent with the request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// HTTP basic authentication credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Ordered multimap used for headers and parameters.
///
/// Values keep their declaration order; header lookup is case-insensitive
/// through [`first_header`].
pub type ValueMap = BTreeMap<String, Vec<String>>;

/// Case-insensitive lookup of the first value of a header.
pub fn first_header<'a>(headers: &'a ValueMap, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, vs)| vs.first())
        .map(|s| s.as_str())
}

/// All values of a header, case-insensitively.
pub fn all_headers<'a>(headers: &'a ValueMap, name: &str) -> Vec<&'a str> {
    headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(name))
        .flat_map(|(_, vs)| vs.iter().map(|s| s.as_str()))
        .collect()
}

/// A declarative request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase", deny_unknown_fields)]
pub struct Request {
    /// HTTP method; empty means GET.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,

    /// Target URL. The scheme selects the adapter.
    #[serde(rename = "URL")]
    pub url: String,

    /// Header name to ordered value list.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub header: ValueMap,

    /// Parameter name to ordered value list.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub params: ValueMap,

    /// Parameter placement.
    pub params_as: ParamsAs,

    /// Request body.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,

    /// Cookies to send.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<Cookie>,

    /// Follow redirects, recording the chain.
    pub follow_redirects: bool,

    /// Per-request timeout; zero uses the default.
    #[serde(with = "opt_duration_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Basic authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,

    /// Named client pool this request should use.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_pool: String,
}

impl Default for Request {
    fn default() -> Self {
        Request {
            method: String::new(),
            url: String::new(),
            header: BTreeMap::new(),
            params: BTreeMap::new(),
            params_as: ParamsAs::Url,
            body: String::new(),
            cookies: Vec::new(),
            follow_redirects: false,
            timeout: None,
            basic_auth: None,
            client_pool: String::new(),
        }
    }
}

impl Request {
    pub fn method_or_get(&self) -> &str {
        if self.method.is_empty() {
            "GET"
        } else {
            &self.method
        }
    }
}

/// A captured response.
///
/// For pseudo-requests the HTTP-shaped fields are synthesized by the
/// adapter. The originating request is kept by value; the response owns
/// the recorded bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Response {
    pub status_code: u16,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub proto: String,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub header: ValueMap,

    /// Raw body bytes.
    #[serde(skip)]
    pub body: Vec<u8>,

    /// Error encountered while reading the body, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_err: Option<String>,

    /// Wall-clock duration of the exchange.
    #[serde(with = "opt_duration_serde", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,

    /// Intermediate URLs visited while following redirects, in order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub redirections: Vec<String>,

    /// The request that produced this response.
    pub request: Request,
}

impl Response {
    /// The body as UTF-8 (lossy).
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body bytes, or the recorded read error.
    pub fn body_checked(&self) -> Result<&[u8], &str> {
        match &self.body_err {
            Some(e) => Err(e.as_str()),
            None => Ok(&self.body),
        }
    }

    /// First value of a header, case-insensitive.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        first_header(&self.header, name)
    }

    /// All `Set-Cookie` header values.
    pub fn set_cookies(&self) -> Vec<&str> {
        all_headers(&self.header, "set-cookie")
    }

    /// Final URL of the exchange (last redirect target or the request URL).
    pub fn final_url(&self) -> &str {
        self.redirections
            .last()
            .map(|s| s.as_str())
            .unwrap_or(&self.request.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_header_case_insensitive() {
        let mut h = ValueMap::new();
        h.insert("Content-Type".into(), vec!["text/html".into()]);
        assert_eq!(first_header(&h, "content-type"), Some("text/html"));
        assert_eq!(first_header(&h, "CONTENT-TYPE"), Some("text/html"));
        assert_eq!(first_header(&h, "accept"), None);
    }

    #[test]
    fn test_set_cookies_collects_all() {
        let mut h = ValueMap::new();
        h.insert(
            "Set-Cookie".into(),
            vec!["a=1; Path=/".into(), "b=2".into()],
        );
        let resp = Response {
            header: h,
            ..Response::default()
        };
        assert_eq!(resp.set_cookies().len(), 2);
    }

    #[test]
    fn test_final_url_prefers_redirect_chain() {
        let resp = Response {
            redirections: vec!["http://x/1".into(), "http://x/2".into()],
            request: Request {
                url: "http://x/0".into(),
                ..Request::default()
            },
            ..Response::default()
        };
        assert_eq!(resp.final_url(), "http://x/2");
    }

    #[test]
    fn test_request_document_parses() {
        let doc = r#"{
            "Method": "POST",
            "URL": "https://example.org/api",
            "Header": {"Accept": ["application/json"]},
            "Params": {"q": ["rust"]},
            "ParamsAs": "body",
            "Body": "payload",
            "FollowRedirects": true,
            "Timeout": "2s"
        }"#;
        let r: Request = serde_json::from_str(doc).unwrap();
        assert_eq!(r.method, "POST");
        assert_eq!(r.params_as, ParamsAs::Body);
        assert_eq!(r.timeout, Some(Duration::from_secs(2)));
        assert!(r.follow_redirects);
    }
}
