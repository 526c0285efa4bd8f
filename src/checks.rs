//! Response assertion checks.
//!
//! A [`Check`] is one assertion applied to a captured [`Response`]. Checks
//! are an internally tagged enum: the declarative form carries the check
//! name in a `Check` field, so marshalling round-trips exactly. A process
//! registry maps check names to constructors for the loader; registration
//! happens at program start, never during execution.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::sync::{OnceLock, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::condition::{Condition, ConditionError};
use crate::html::{HtmlContains, HtmlContainsText, HtmlTag, Links, ValidHtml};
use crate::img::ImageCheck;
use crate::json::{JsonCheck, JsonExpr};
use crate::latency::LatencyCheck;
use crate::request::Response;
use crate::scope::Replacer;
use crate::status::Status;
use crate::utils::opt_duration_serde;
use crate::xml::XmlCheck;

/// The closed failure taxonomy of check execution.
#[derive(Error, Debug)]
pub enum CheckError {
    /// Something required was not found.
    #[error("not found")]
    NotFound,

    /// Something forbidden was present.
    #[error("found forbidden")]
    FoundForbidden,

    /// The response body could not be read.
    #[error("unreadable body")]
    BadBody,

    /// The check could not evaluate because its input was unavailable.
    #[error("cannot check: {0}")]
    CantCheck(String),

    /// The check's configuration is invalid.
    #[error("malformed check: {0}")]
    Malformed(String),

    /// A plain assertion failure.
    #[error("{0}")]
    Failed(String),
}

impl CheckError {
    /// The test status a failing check maps to.
    pub fn status(&self) -> Status {
        match self {
            CheckError::Malformed(_) => Status::Bogus,
            CheckError::CantCheck(_) => Status::Error,
            _ => Status::Fail,
        }
    }
}

impl From<ConditionError> for CheckError {
    fn from(e: ConditionError) -> Self {
        match e {
            ConditionError::MissingText | ConditionError::MissingMatch => CheckError::NotFound,
            ConditionError::ForbiddenText | ConditionError::ForbiddenMatch => {
                CheckError::FoundForbidden
            }
            ConditionError::BadRegexp(e) => CheckError::Malformed(e.to_string()),
            other => CheckError::Failed(other.to_string()),
        }
    }
}

/// Extra facilities a check may need during execution.
pub struct CheckContext<'a> {
    /// Client used by checks that issue further requests (Links, Latency).
    pub client: &'a reqwest::Client,
}

/// Verdict of one check on one response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckResult {
    /// The check's registered name.
    pub name: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One assertion over a captured response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "Check")]
pub enum Check {
    StatusCode(StatusCode),
    Header(Header),
    Body(Body),
    BodyContains(BodyContains),
    BodyMatch(BodyMatch),
    #[serde(rename = "UTF8Encoded")]
    Utf8Encoded(Utf8Encoded),
    ContentType(ContentType),
    Identity(Identity),
    ResponseTime(ResponseTime),
    Redirect(Redirect),
    RedirectChain(RedirectChain),
    #[serde(rename = "FinalURL")]
    FinalUrl(FinalUrl),
    SetCookie(SetCookie),
    DeleteCookie(DeleteCookie),
    AnyOne(AnyOne),
    #[serde(rename = "HTMLContains")]
    HtmlContains(HtmlContains),
    #[serde(rename = "HTMLContainsText")]
    HtmlContainsText(HtmlContainsText),
    #[serde(rename = "HTMLTag")]
    HtmlTag(HtmlTag),
    #[serde(rename = "ValidHTML")]
    ValidHtml(ValidHtml),
    Links(Links),
    #[serde(rename = "JSON")]
    Json(JsonCheck),
    #[serde(rename = "JSONExpr")]
    JsonExpr(JsonExpr),
    #[serde(rename = "XML")]
    Xml(XmlCheck),
    Image(ImageCheck),
    Latency(LatencyCheck),
}

impl Check {
    /// The registered name of this check.
    pub fn name(&self) -> &'static str {
        match self {
            Check::StatusCode(_) => "StatusCode",
            Check::Header(_) => "Header",
            Check::Body(_) => "Body",
            Check::BodyContains(_) => "BodyContains",
            Check::BodyMatch(_) => "BodyMatch",
            Check::Utf8Encoded(_) => "UTF8Encoded",
            Check::ContentType(_) => "ContentType",
            Check::Identity(_) => "Identity",
            Check::ResponseTime(_) => "ResponseTime",
            Check::Redirect(_) => "Redirect",
            Check::RedirectChain(_) => "RedirectChain",
            Check::FinalUrl(_) => "FinalURL",
            Check::SetCookie(_) => "SetCookie",
            Check::DeleteCookie(_) => "DeleteCookie",
            Check::AnyOne(_) => "AnyOne",
            Check::HtmlContains(_) => "HTMLContains",
            Check::HtmlContainsText(_) => "HTMLContainsText",
            Check::HtmlTag(_) => "HTMLTag",
            Check::ValidHtml(_) => "ValidHTML",
            Check::Links(_) => "Links",
            Check::Json(_) => "JSON",
            Check::JsonExpr(_) => "JSONExpr",
            Check::Xml(_) => "XML",
            Check::Image(_) => "Image",
            Check::Latency(_) => "Latency",
        }
    }

    /// Compile regexes, selectors and paths. Idempotent; called once
    /// before the first execution attempt.
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        match self {
            Check::Header(c) => c.prepare(),
            Check::Body(c) => c.prepare(),
            Check::BodyMatch(c) => c.prepare(),
            Check::ResponseTime(c) => c.prepare(),
            Check::SetCookie(c) => c.prepare(),
            Check::AnyOne(c) => c.prepare(),
            Check::HtmlContains(c) => c.prepare(),
            Check::HtmlContainsText(c) => c.prepare(),
            Check::HtmlTag(c) => c.prepare(),
            Check::Json(c) => c.prepare(),
            Check::JsonExpr(c) => c.prepare(),
            Check::Xml(c) => c.prepare(),
            Check::Image(c) => c.prepare(),
            Check::Latency(c) => c.prepare(),
            _ => Ok(()),
        }
    }

    /// Run the assertion against a captured response.
    ///
    /// Returns a boxed future (rather than being an `async fn`) so the
    /// mutually-recursive call through `AnyOne::execute` has a concrete,
    /// `Send`-able type to box into instead of an unresolvable opaque type.
    pub fn execute<'a>(
        &'a self,
        resp: &'a Response,
        ctx: &'a CheckContext<'_>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), CheckError>> + Send + 'a>>
    {
        Box::pin(async move {
            match self {
                Check::StatusCode(c) => c.execute(resp),
                Check::Header(c) => c.execute(resp),
                Check::Body(c) => c.execute(resp),
                Check::BodyContains(c) => c.execute(resp),
                Check::BodyMatch(c) => c.execute(resp),
                Check::Utf8Encoded(c) => c.execute(resp),
                Check::ContentType(c) => c.execute(resp),
                Check::Identity(c) => c.execute(resp),
                Check::ResponseTime(c) => c.execute(resp),
                Check::Redirect(c) => c.execute(resp),
                Check::RedirectChain(c) => c.execute(resp),
                Check::FinalUrl(c) => c.execute(resp),
                Check::SetCookie(c) => c.execute(resp),
                Check::DeleteCookie(c) => c.execute(resp),
                Check::AnyOne(c) => c.execute(resp, ctx).await,
                Check::HtmlContains(c) => c.execute(resp),
                Check::HtmlContainsText(c) => c.execute(resp),
                Check::HtmlTag(c) => c.execute(resp),
                Check::ValidHtml(c) => c.execute(resp),
                Check::Links(c) => c.execute(resp, ctx).await,
                Check::Json(c) => c.execute(resp),
                Check::JsonExpr(c) => c.execute(resp),
                Check::Xml(c) => c.execute(resp),
                Check::Image(c) => c.execute(resp),
                Check::Latency(c) => c.execute(resp, ctx).await,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Registry

/// Constructor for a default-configured check.
pub type CheckFactory = fn() -> Check;

fn builtin_checks() -> BTreeMap<String, CheckFactory> {
    let mut m: BTreeMap<String, CheckFactory> = BTreeMap::new();
    m.insert("StatusCode".into(), || Check::StatusCode(StatusCode::default()));
    m.insert("Header".into(), || Check::Header(Header::default()));
    m.insert("Body".into(), || Check::Body(Body::default()));
    m.insert("BodyContains".into(), || {
        Check::BodyContains(BodyContains::default())
    });
    m.insert("BodyMatch".into(), || Check::BodyMatch(BodyMatch::default()));
    m.insert("UTF8Encoded".into(), || {
        Check::Utf8Encoded(Utf8Encoded::default())
    });
    m.insert("ContentType".into(), || {
        Check::ContentType(ContentType::default())
    });
    m.insert("Identity".into(), || Check::Identity(Identity::default()));
    m.insert("ResponseTime".into(), || {
        Check::ResponseTime(ResponseTime::default())
    });
    m.insert("Redirect".into(), || Check::Redirect(Redirect::default()));
    m.insert("RedirectChain".into(), || {
        Check::RedirectChain(RedirectChain::default())
    });
    m.insert("FinalURL".into(), || Check::FinalUrl(FinalUrl::default()));
    m.insert("SetCookie".into(), || Check::SetCookie(SetCookie::default()));
    m.insert("DeleteCookie".into(), || {
        Check::DeleteCookie(DeleteCookie::default())
    });
    m.insert("AnyOne".into(), || Check::AnyOne(AnyOne::default()));
    m.insert("HTMLContains".into(), || {
        Check::HtmlContains(HtmlContains::default())
    });
    m.insert("HTMLContainsText".into(), || {
        Check::HtmlContainsText(HtmlContainsText::default())
    });
    m.insert("HTMLTag".into(), || Check::HtmlTag(HtmlTag::default()));
    m.insert("ValidHTML".into(), || Check::ValidHtml(ValidHtml::default()));
    m.insert("Links".into(), || Check::Links(Links::default()));
    m.insert("JSON".into(), || Check::Json(JsonCheck::default()));
    m.insert("JSONExpr".into(), || Check::JsonExpr(JsonExpr::default()));
    m.insert("XML".into(), || Check::Xml(XmlCheck::default()));
    m.insert("Image".into(), || Check::Image(ImageCheck::default()));
    m.insert("Latency".into(), || Check::Latency(LatencyCheck::default()));
    m
}

fn registry() -> &'static RwLock<BTreeMap<String, CheckFactory>> {
    static REGISTRY: OnceLock<RwLock<BTreeMap<String, CheckFactory>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(builtin_checks()))
}

/// Register an additional check constructor. Intended for program start.
pub fn register_check(name: &str, factory: CheckFactory) {
    if let Ok(mut table) = registry().write() {
        table.insert(name.to_string(), factory);
    }
}

/// Construct a default-configured check by its registered name.
pub fn new_check(name: &str) -> Option<Check> {
    registry().read().ok()?.get(name).map(|f| f())
}

/// All registered check names, sorted.
pub fn check_names() -> Vec<String> {
    registry()
        .read()
        .map(|t| t.keys().cloned().collect())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Variable substitution

/// Returns a copy of `check` with the replacer applied to every string
/// field and every integer substitution applied to numeric fields.
pub fn substitute_check(check: &Check, repl: &Replacer) -> Result<Check, CheckError> {
    let mut value =
        serde_json::to_value(check).map_err(|e| CheckError::Malformed(e.to_string()))?;
    substitute_value(&mut value, repl);
    serde_json::from_value(value).map_err(|e| CheckError::Malformed(e.to_string()))
}

pub(crate) fn substitute_value(v: &mut serde_json::Value, repl: &Replacer) {
    match v {
        serde_json::Value::String(s) => {
            let replaced = repl.replace(s);
            if replaced != *s {
                *s = replaced;
            }
        }
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                let replaced = repl.replace_int(i);
                if replaced != i {
                    *v = serde_json::Value::from(replaced);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                substitute_value(item, repl);
            }
        }
        serde_json::Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                // The discriminator names the check, it is not user data.
                if key == "Check" || key == "Extractor" {
                    continue;
                }
                substitute_value(item, repl);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Simple checks

/// Passes iff the response code equals the expectation exactly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct StatusCode {
    pub expect: u16,
}

impl StatusCode {
    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        if resp.status_code == self.expect {
            Ok(())
        } else {
            Err(CheckError::Failed(format!(
                "got status {}, want {}",
                resp.status_code, self.expect
            )))
        }
    }
}

/// Checks presence/absence of a header and a condition on its first value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Header {
    /// The header to look up.
    pub header: String,

    /// Passes iff the header is not present.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub absent: bool,

    #[serde(flatten)]
    pub condition: Condition,
}

impl Header {
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        if self.header.is_empty() {
            return Err(CheckError::Malformed("empty header name".into()));
        }
        self.condition.compile().map_err(CheckError::from)
    }

    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let value = resp.header_value(&self.header);
        if self.absent {
            return match value {
                Some(_) => Err(CheckError::FoundForbidden),
                None => Ok(()),
            };
        }
        let value = value.ok_or(CheckError::NotFound)?;
        if self.condition.is_empty() {
            return Ok(());
        }
        self.condition.fulfilled(value).map_err(CheckError::from)
    }
}

/// Applies a condition to the raw body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Body {
    #[serde(flatten)]
    pub condition: Condition,
}

impl Body {
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        self.condition.compile().map_err(CheckError::from)
    }

    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let body = resp.body_checked().map_err(|_| CheckError::BadBody)?;
        self.condition.fulfilled_bytes(body).map_err(CheckError::from)
    }
}

/// Shorthand for a body containment test with count semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct BodyContains {
    pub text: String,

    /// 0: at least once; >0: exactly that often; <0: must not occur.
    #[serde(skip_serializing_if = "is_zero")]
    pub count: i64,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

impl BodyContains {
    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let body = resp.body_checked().map_err(|_| CheckError::BadBody)?;
        let body = String::from_utf8_lossy(body);
        let cnt = body.matches(&self.text).count();
        if self.count == 0 && cnt == 0 {
            Err(CheckError::NotFound)
        } else if self.count < 0 && cnt > 0 {
            Err(CheckError::FoundForbidden)
        } else if self.count > 0 && cnt as i64 != self.count {
            Err(CheckError::Failed(format!(
                "found {} occurrences of {:?}, want {}",
                cnt, self.text, self.count
            )))
        } else {
            Ok(())
        }
    }
}

/// The body must match a regular expression.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct BodyMatch {
    pub regexp: String,

    #[serde(skip)]
    re: Option<regex::Regex>,
}

impl BodyMatch {
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        if self.re.is_none() {
            self.re = Some(
                regex::Regex::new(&self.regexp)
                    .map_err(|e| CheckError::Malformed(e.to_string()))?,
            );
        }
        Ok(())
    }

    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let body = resp.body_checked().map_err(|_| CheckError::BadBody)?;
        let body = String::from_utf8_lossy(body);
        let matched = match &self.re {
            Some(re) => re.is_match(&body),
            None => regex::Regex::new(&self.regexp)
                .map_err(|e| CheckError::Malformed(e.to_string()))?
                .is_match(&body),
        };
        if matched {
            Ok(())
        } else {
            Err(CheckError::NotFound)
        }
    }
}

/// The body must be valid UTF-8 without byte order marks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Utf8Encoded {}

impl Utf8Encoded {
    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let body = resp.body_checked().map_err(|_| CheckError::BadBody)?;
        match std::str::from_utf8(body) {
            Ok(text) => {
                for (i, ch) in text.chars().enumerate() {
                    if ch == '\u{feff}' {
                        return Err(CheckError::Failed(format!(
                            "unicode BOM at character {}",
                            i
                        )));
                    }
                }
                Ok(())
            }
            Err(e) => {
                let char_offset = std::str::from_utf8(&body[..e.valid_up_to()])
                    .map(|s| s.chars().count())
                    .unwrap_or(0);
                Err(CheckError::Failed(format!(
                    "invalid UTF-8 at character {} in body",
                    char_offset
                )))
            }
        }
    }
}

/// The response media type must equal (or start with) the expectation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ContentType {
    /// Full media type ("text/html") or bare main type ("text").
    pub is: String,
}

impl ContentType {
    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let ct = resp
            .header_value("content-type")
            .ok_or(CheckError::NotFound)?;
        let media_type = ct.split(';').next().unwrap_or("").trim();
        let ok = if self.is.contains('/') {
            media_type == self.is
        } else {
            media_type.split('/').next() == Some(self.is.as_str())
        };
        if ok {
            Ok(())
        } else {
            Err(CheckError::Failed(format!(
                "content type is {:?}, want {:?}",
                media_type, self.is
            )))
        }
    }
}

/// SHA-1 of the body must equal the given hex digest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Identity {
    #[serde(rename = "SHA1")]
    pub sha1: String,
}

impl Identity {
    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let body = resp.body_checked().map_err(|_| CheckError::BadBody)?;
        let digest = Sha1::digest(body);
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        if hex.eq_ignore_ascii_case(&self.sha1) {
            Ok(())
        } else {
            Err(CheckError::Failed(format!(
                "body SHA-1 is {}, want {}",
                hex, self.sha1
            )))
        }
    }
}

/// The response duration must lie in the half-open interval
/// `(Higher, Lower]`. A zero bound disables the respective side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ResponseTime {
    /// The duration must be strictly above this bound.
    #[serde(with = "opt_duration_serde", skip_serializing_if = "Option::is_none")]
    pub higher: Option<Duration>,

    /// The duration must be at or below this bound.
    #[serde(with = "opt_duration_serde", skip_serializing_if = "Option::is_none")]
    pub lower: Option<Duration>,
}

impl ResponseTime {
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        if let (Some(h), Some(l)) = (self.higher, self.lower) {
            if h >= l {
                return Err(CheckError::Malformed(format!(
                    "Higher ({:?}) must be below Lower ({:?})",
                    h, l
                )));
            }
        }
        Ok(())
    }

    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        // Prepare may have been skipped for ad-hoc checks.
        if let (Some(h), Some(l)) = (self.higher, self.lower) {
            if h >= l {
                return Err(CheckError::Malformed(format!(
                    "Higher ({:?}) must be below Lower ({:?})",
                    h, l
                )));
            }
        }
        let duration = resp
            .duration
            .ok_or_else(|| CheckError::CantCheck("no duration recorded".into()))?;
        if let Some(l) = self.lower {
            if duration > l {
                return Err(CheckError::Failed(format!(
                    "response took {:?}, want at most {:?}",
                    duration, l
                )));
            }
        }
        if let Some(h) = self.higher {
            if duration <= h {
                return Err(CheckError::Failed(format!(
                    "response took {:?}, want more than {:?}",
                    duration, h
                )));
            }
        }
        Ok(())
    }
}

// Match a URL against an expectation; a trailing "..." is a prefix wildcard.
fn url_matches(expect: &str, actual: &str) -> bool {
    match expect.strip_suffix("...") {
        Some(prefix) => actual.starts_with(prefix),
        None => actual == expect,
    }
}

/// The response must be a redirect to the given location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Redirect {
    /// Target location; a trailing "..." matches any suffix.
    pub to: String,

    /// Expected redirect status; 0 accepts any 3xx.
    #[serde(skip_serializing_if = "is_zero_u16")]
    pub status_code: u16,
}

fn is_zero_u16(n: &u16) -> bool {
    *n == 0
}

impl Redirect {
    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        if !(300..400).contains(&resp.status_code) {
            return Err(CheckError::Failed(format!(
                "got status {}, want a redirect",
                resp.status_code
            )));
        }
        if self.status_code != 0 && resp.status_code != self.status_code {
            return Err(CheckError::Failed(format!(
                "got redirect status {}, want {}",
                resp.status_code, self.status_code
            )));
        }
        let location = resp
            .header_value("location")
            .ok_or_else(|| CheckError::Failed("redirect without Location header".into()))?;
        if url_matches(&self.to, location) {
            Ok(())
        } else {
            Err(CheckError::Failed(format!(
                "redirected to {:?}, want {:?}",
                location, self.to
            )))
        }
    }
}

/// The recorded redirect chain must visit the given URLs in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RedirectChain {
    pub via: Vec<String>,
}

impl RedirectChain {
    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let mut chain = resp.redirections.iter();
        for expect in &self.via {
            let found = chain.any(|actual| url_matches(expect, actual));
            if !found {
                return Err(CheckError::Failed(format!(
                    "redirect chain {:?} misses {:?}",
                    resp.redirections, expect
                )));
            }
        }
        Ok(())
    }
}

/// The final URL after redirects must equal the expectation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct FinalUrl {
    pub is: String,
}

impl FinalUrl {
    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let actual = resp.final_url();
        if url_matches(&self.is, actual) {
            Ok(())
        } else {
            Err(CheckError::Failed(format!(
                "final URL is {:?}, want {:?}",
                actual, self.is
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Cookie checks

/// A parsed Set-Cookie header.
#[derive(Debug, Default)]
pub(crate) struct SetCookieAttrs {
    pub name: String,
    pub value: String,
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
    pub max_age: Option<i64>,
    pub expires: Option<chrono::DateTime<chrono::FixedOffset>>,
}

pub(crate) fn parse_set_cookie(raw: &str) -> Option<SetCookieAttrs> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let mut cookie = SetCookieAttrs {
        name: name.trim().to_string(),
        value: value.trim().to_string(),
        ..SetCookieAttrs::default()
    };
    for attr in parts {
        let attr = attr.trim();
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attr, ""),
        };
        if key.eq_ignore_ascii_case("path") {
            cookie.path = val.to_string();
        } else if key.eq_ignore_ascii_case("httponly") {
            cookie.http_only = true;
        } else if key.eq_ignore_ascii_case("secure") {
            cookie.secure = true;
        } else if key.eq_ignore_ascii_case("max-age") {
            cookie.max_age = val.parse().ok();
        } else if key.eq_ignore_ascii_case("expires") {
            cookie.expires = chrono::DateTime::parse_from_rfc2822(val).ok();
        }
    }
    Some(cookie)
}

impl SetCookieAttrs {
    /// Remaining lifetime; Max-Age wins over Expires.
    fn lifetime(&self) -> Option<chrono::Duration> {
        if let Some(secs) = self.max_age {
            return Some(chrono::Duration::seconds(secs));
        }
        self.expires
            .map(|exp| exp.signed_duration_since(chrono::Utc::now()))
    }

    fn is_persistent(&self) -> bool {
        self.max_age.is_some() || self.expires.is_some()
    }

    /// True if this header deletes the cookie.
    fn is_deletion(&self) -> bool {
        if let Some(secs) = self.max_age {
            return secs <= 0;
        }
        if let Some(exp) = self.expires {
            return exp < chrono::Utc::now();
        }
        self.value.is_empty()
    }
}

/// Asserts a Set-Cookie header for a named cookie with optional nested
/// conditions and attribute flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SetCookie {
    pub name: String,

    #[serde(skip_serializing_if = "Condition::is_empty")]
    pub value: Condition,

    #[serde(skip_serializing_if = "Condition::is_empty")]
    pub path: Condition,

    /// Minimal remaining lifetime of the cookie.
    #[serde(with = "opt_duration_serde", skip_serializing_if = "Option::is_none")]
    pub min_lifetime: Option<Duration>,

    /// Space-separated flags that must all hold:
    /// "httpOnly", "secure", "persistent", "session".
    #[serde(rename = "Type", skip_serializing_if = "String::is_empty")]
    pub type_flags: String,
}

impl SetCookie {
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        for flag in self.type_flags.split_whitespace() {
            match flag {
                "httpOnly" | "secure" | "persistent" | "session" => {}
                other => {
                    return Err(CheckError::Malformed(format!(
                        "unknown cookie type flag {:?}",
                        other
                    )))
                }
            }
        }
        self.value.compile()?;
        self.path.compile()?;
        Ok(())
    }

    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let cookie = resp
            .set_cookies()
            .iter()
            .filter_map(|raw| parse_set_cookie(raw))
            .find(|c| c.name == self.name)
            .ok_or(CheckError::NotFound)?;

        self.value.fulfilled(&cookie.value)?;
        self.path.fulfilled(&cookie.path)?;

        for flag in self.type_flags.split_whitespace() {
            let ok = match flag {
                "httpOnly" => cookie.http_only,
                "secure" => cookie.secure,
                "persistent" => cookie.is_persistent(),
                "session" => !cookie.is_persistent(),
                _ => return Err(CheckError::Malformed(format!("unknown flag {:?}", flag))),
            };
            if !ok {
                return Err(CheckError::Failed(format!(
                    "cookie {:?} is not {}",
                    self.name, flag
                )));
            }
        }

        if let Some(min) = self.min_lifetime {
            let lifetime = cookie.lifetime().ok_or_else(|| {
                CheckError::Failed(format!("cookie {:?} has no lifetime", self.name))
            })?;
            let want = chrono::Duration::from_std(min)
                .map_err(|e| CheckError::Malformed(e.to_string()))?;
            if lifetime < want {
                return Err(CheckError::Failed(format!(
                    "cookie {:?} expires in {}, want at least {}",
                    self.name, lifetime, want
                )));
            }
        }

        Ok(())
    }
}

/// Asserts a Set-Cookie header that clears the named cookie.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct DeleteCookie {
    pub name: String,
}

impl DeleteCookie {
    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let cookie = resp
            .set_cookies()
            .iter()
            .filter_map(|raw| parse_set_cookie(raw))
            .find(|c| c.name == self.name)
            .ok_or(CheckError::NotFound)?;
        if cookie.is_deletion() {
            Ok(())
        } else {
            Err(CheckError::Failed(format!(
                "cookie {:?} is set, not deleted",
                self.name
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Combinators

/// Passes iff any of the sub-checks passes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct AnyOne {
    pub of: Vec<Check>,
}

impl AnyOne {
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        if self.of.is_empty() {
            return Err(CheckError::Malformed("AnyOne without sub-checks".into()));
        }
        for check in &mut self.of {
            check.prepare()?;
        }
        Ok(())
    }

    pub async fn execute(
        &self,
        resp: &Response,
        ctx: &CheckContext<'_>,
    ) -> Result<(), CheckError> {
        let mut last = String::new();
        for check in &self.of {
            match check.execute(resp, ctx).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(check = check.name(), error = %e, "AnyOne alternative failed");
                    last = e.to_string();
                }
            }
        }
        Err(CheckError::Failed(format!(
            "none of {} checks passed (last: {})",
            self.of.len(),
            last
        )))
    }
}

// ---------------------------------------------------------------------------

/// Run every check against the response, collecting per-check verdicts.
pub async fn run_checks(
    checks: &[Check],
    resp: &Response,
    ctx: &CheckContext<'_>,
) -> Vec<CheckResult> {
    let mut results = Vec::with_capacity(checks.len());
    for check in checks {
        let result = match check.execute(resp, ctx).await {
            Ok(()) => CheckResult {
                name: check.name().to_string(),
                status: Status::Pass,
                error: None,
            },
            Err(e) => CheckResult {
                name: check.name().to_string(),
                status: e.status(),
                error: Some(e.to_string()),
            },
        };
        results.push(result);
    }
    results
}
