//! HTML checks: CSS-selector assertions, structural validation and
//! link crawling.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::checks::{CheckContext, CheckError};
use crate::request::Response;
use crate::utils::opt_duration_serde;

fn parse_selector(selector: &str) -> Result<Selector, CheckError> {
    if selector.trim().is_empty() {
        return Err(CheckError::Malformed("empty selector".into()));
    }
    Selector::parse(selector)
        .map_err(|e| CheckError::Malformed(format!("bad selector {:?}: {}", selector, e)))
}

// Whitespace-normalized text content of an element.
fn text_content(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

fn html_body(resp: &Response) -> Result<String, CheckError> {
    let body = resp.body_checked().map_err(|_| CheckError::BadBody)?;
    Ok(String::from_utf8_lossy(body).into_owned())
}

// Shared count semantics: 0 = at least one, >0 = exactly, <0 = none.
fn check_count(found: usize, want: i64) -> Result<(), CheckError> {
    if want == 0 && found == 0 {
        Err(CheckError::NotFound)
    } else if want < 0 && found > 0 {
        Err(CheckError::FoundForbidden)
    } else if want > 0 && found as i64 != want {
        Err(CheckError::Failed(format!(
            "found {} matching elements, want {}",
            found, want
        )))
    } else {
        Ok(())
    }
}

/// Parses the body as HTML5 and counts elements matching a CSS selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct HtmlContains {
    pub selector: String,

    /// 0: at least one match; >0: exactly that many; <0: none allowed.
    #[serde(skip_serializing_if = "is_zero")]
    pub count: i64,

    #[serde(skip)]
    compiled: Option<Selector>,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

impl HtmlContains {
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        if self.compiled.is_none() {
            self.compiled = Some(parse_selector(&self.selector)?);
        }
        Ok(())
    }

    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let owned;
        let sel = match &self.compiled {
            Some(s) => s,
            None => {
                owned = parse_selector(&self.selector)?;
                &owned
            }
        };
        let doc = Html::parse_document(&html_body(resp)?);
        let found = doc.select(sel).count();
        check_count(found, self.count)
    }
}

/// Presence/count of nodes matching a selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct HtmlTag {
    pub selector: String,

    #[serde(skip_serializing_if = "is_zero")]
    pub count: i64,

    #[serde(skip)]
    compiled: Option<Selector>,
}

impl HtmlTag {
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        if self.compiled.is_none() {
            self.compiled = Some(parse_selector(&self.selector)?);
        }
        Ok(())
    }

    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let owned;
        let sel = match &self.compiled {
            Some(s) => s,
            None => {
                owned = parse_selector(&self.selector)?;
                &owned
            }
        };
        let doc = Html::parse_document(&html_body(resp)?);
        check_count(doc.select(sel).count(), self.count)
    }
}

/// Verifies the text content of elements matching a selector.
///
/// By default every configured text must occur among the matched elements'
/// contents. `InOrder` requires them as a subsequence, `Complete` requires
/// the matched contents to consist of exactly the configured texts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct HtmlContainsText {
    pub selector: String,

    pub text: Vec<String>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub complete: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub in_order: bool,

    #[serde(skip)]
    compiled: Option<Selector>,
}

impl HtmlContainsText {
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        if self.compiled.is_none() {
            self.compiled = Some(parse_selector(&self.selector)?);
        }
        Ok(())
    }

    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let owned;
        let sel = match &self.compiled {
            Some(s) => s,
            None => {
                owned = parse_selector(&self.selector)?;
                &owned
            }
        };
        let doc = Html::parse_document(&html_body(resp)?);
        let actual: Vec<String> = doc.select(sel).map(text_content).collect();

        if self.complete {
            if self.in_order {
                if actual != self.text {
                    return Err(CheckError::Failed(format!(
                        "texts {:?} do not equal {:?}",
                        actual, self.text
                    )));
                }
                return Ok(());
            }
            let mut sorted_actual = actual.clone();
            let mut sorted_want = self.text.clone();
            sorted_actual.sort();
            sorted_want.sort();
            if sorted_actual != sorted_want {
                return Err(CheckError::Failed(format!(
                    "texts {:?} are not exactly {:?}",
                    actual, self.text
                )));
            }
            return Ok(());
        }

        if self.in_order {
            let mut rest = actual.iter();
            for want in &self.text {
                if !rest.any(|a| a == want) {
                    return Err(CheckError::Failed(format!(
                        "text {:?} missing (in order) from {:?}",
                        want, actual
                    )));
                }
            }
            return Ok(());
        }

        for want in &self.text {
            if !actual.iter().any(|a| a == want) {
                return Err(CheckError::Failed(format!(
                    "text {:?} missing from {:?}",
                    want, actual
                )));
            }
        }
        Ok(())
    }
}

/// Validates basic HTML5 structure.
///
/// The checks performed are named "doctype", "uniqueids" and "label";
/// each can be switched off via the ignore set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ValidHtml {
    pub ignore: Vec<String>,
}

impl ValidHtml {
    fn ignored(&self, what: &str) -> bool {
        self.ignore.iter().any(|i| i.eq_ignore_ascii_case(what))
    }

    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let body = html_body(resp)?;
        let mut problems: Vec<String> = Vec::new();

        if !self.ignored("doctype") {
            let head = body.trim_start();
            if !head
                .get(..9)
                .map(|p| p.eq_ignore_ascii_case("<!doctype"))
                .unwrap_or(false)
            {
                problems.push("missing doctype declaration".into());
            }
        }

        let doc = Html::parse_document(&body);

        if !self.ignored("uniqueids") {
            let mut seen = BTreeSet::new();
            let all = Selector::parse("[id]")
                .map_err(|e| CheckError::Malformed(e.to_string()))?;
            for el in doc.select(&all) {
                if let Some(id) = el.value().attr("id") {
                    if !seen.insert(id.to_string()) {
                        problems.push(format!("duplicate id {:?}", id));
                    }
                }
            }
        }

        if !self.ignored("label") {
            let ids: BTreeSet<String> = {
                let all = Selector::parse("[id]")
                    .map_err(|e| CheckError::Malformed(e.to_string()))?;
                doc.select(&all)
                    .filter_map(|el| el.value().attr("id").map(|s| s.to_string()))
                    .collect()
            };
            let labels = Selector::parse("label[for]")
                .map_err(|e| CheckError::Malformed(e.to_string()))?;
            for el in doc.select(&labels) {
                if let Some(target) = el.value().attr("for") {
                    if !ids.contains(target) {
                        problems.push(format!("label references unknown id {:?}", target));
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CheckError::Failed(problems.join("; ")))
        }
    }
}

/// Extracts link references from the document and probes each one.
///
/// Fails unless every in-scope link answers with a 2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Links {
    /// Space-separated tags to harvest: any of "a", "img", "link",
    /// "script".
    pub which: String,

    /// Probe with HEAD instead of GET.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub head: bool,

    /// Maximum concurrent probes.
    pub concurrency: usize,

    /// If non-empty, only URLs with one of these prefixes are probed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub only_links: Vec<String>,

    /// URLs with one of these prefixes are never probed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignored_links: Vec<String>,

    /// Per-probe timeout.
    #[serde(with = "opt_duration_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl Default for Links {
    fn default() -> Self {
        Links {
            which: "a img link script".into(),
            head: false,
            concurrency: 4,
            only_links: Vec::new(),
            ignored_links: Vec::new(),
            timeout: None,
        }
    }
}

impl Links {
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        if self.which.trim().is_empty() {
            self.which = "a img link script".into();
        }
        for tag in self.which.split_whitespace() {
            match tag {
                "a" | "img" | "link" | "script" => {}
                other => {
                    return Err(CheckError::Malformed(format!(
                        "unknown link tag {:?}",
                        other
                    )))
                }
            }
        }
        if self.concurrency == 0 {
            self.concurrency = 4;
        }
        Ok(())
    }

    // Collect absolute, in-scope URLs from the document. Kept synchronous
    // so the parsed document never crosses an await point.
    fn collect_urls(&self, resp: &Response) -> Result<BTreeSet<String>, CheckError> {
        let body = html_body(resp)?;
        let base = url::Url::parse(resp.final_url())
            .map_err(|e| CheckError::CantCheck(format!("bad base URL: {}", e)))?;

        let doc = Html::parse_document(&body);
        let mut refs: Vec<String> = Vec::new();
        for tag in self.which.split_whitespace() {
            let (selector, attr) = match tag {
                "a" => ("a[href]", "href"),
                "link" => ("link[href]", "href"),
                "img" => ("img[src]", "src"),
                "script" => ("script[src]", "src"),
                _ => continue,
            };
            let sel = Selector::parse(selector)
                .map_err(|e| CheckError::Malformed(e.to_string()))?;
            for el in doc.select(&sel) {
                if let Some(r) = el.value().attr(attr) {
                    refs.push(r.to_string());
                }
            }
        }

        let mut urls = BTreeSet::new();
        for r in refs {
            let joined = match base.join(&r) {
                Ok(u) => u,
                Err(_) => continue,
            };
            if joined.scheme() != "http" && joined.scheme() != "https" {
                continue;
            }
            let s = joined.to_string();
            if !self.only_links.is_empty()
                && !self.only_links.iter().any(|p| s.starts_with(p.as_str()))
            {
                continue;
            }
            if self.ignored_links.iter().any(|p| s.starts_with(p.as_str())) {
                continue;
            }
            urls.insert(s);
        }
        Ok(urls)
    }

    pub async fn execute(
        &self,
        resp: &Response,
        ctx: &CheckContext<'_>,
    ) -> Result<(), CheckError> {
        let urls = self.collect_urls(resp)?;
        if urls.is_empty() {
            debug!("no links to check");
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut handles = Vec::with_capacity(urls.len());
        for link in urls {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| CheckError::CantCheck(e.to_string()))?;
            let client = ctx.client.clone();
            let head = self.head;
            let timeout = self.timeout;
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let mut builder = if head {
                    client.head(&link)
                } else {
                    client.get(&link)
                };
                if let Some(t) = timeout {
                    builder = builder.timeout(t);
                }
                match builder.send().await {
                    Ok(r) if r.status().is_success() => None,
                    Ok(r) => Some(format!("{}: status {}", link, r.status().as_u16())),
                    Err(e) => Some(format!("{}: {}", link, e)),
                }
            }));
        }

        let mut broken = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Some(problem)) => broken.push(problem),
                Ok(None) => {}
                Err(e) => broken.push(format!("probe task failed: {}", e)),
            }
        }

        if broken.is_empty() {
            Ok(())
        } else {
            warn!(broken = broken.len(), "broken links found");
            Err(CheckError::Failed(broken.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"<!doctype html>
<html>
<head><title>CSS Selectors</title></head>
<body>
<h1 id="mt">FooBar</h1>
<p class="X">Hello <span class="X">World</span><p>
<p class="X" id="end">Thanks!</p>
</body>
</html>
"#;

    fn resp() -> Response {
        Response {
            status_code: 200,
            body: FIXTURE.as_bytes().to_vec(),
            ..Response::default()
        }
    }

    #[test]
    fn test_html_contains_counting() {
        let mut c = HtmlContains {
            selector: "h1".into(),
            ..HtmlContains::default()
        };
        c.prepare().unwrap();
        assert!(c.execute(&resp()).is_ok());

        let mut c = HtmlContains {
            selector: "p.X".into(),
            count: 2,
            ..HtmlContains::default()
        };
        c.prepare().unwrap();
        assert!(c.execute(&resp()).is_ok());

        let mut c = HtmlContains {
            selector: "h2".into(),
            ..HtmlContains::default()
        };
        c.prepare().unwrap();
        assert!(matches!(c.execute(&resp()), Err(CheckError::NotFound)));

        let mut c = HtmlContains {
            selector: "h1".into(),
            count: 2,
            ..HtmlContains::default()
        };
        c.prepare().unwrap();
        assert!(matches!(c.execute(&resp()), Err(CheckError::Failed(_))));

        let mut c = HtmlContains {
            selector: "h1".into(),
            count: -1,
            ..HtmlContains::default()
        };
        c.prepare().unwrap();
        assert!(matches!(
            c.execute(&resp()),
            Err(CheckError::FoundForbidden)
        ));
    }

    #[test]
    fn test_empty_selector_is_malformed() {
        let mut c = HtmlContains::default();
        assert!(matches!(c.prepare(), Err(CheckError::Malformed(_))));
    }

    #[test]
    fn test_html_contains_text() {
        let mut c = HtmlContainsText {
            selector: "p.X".into(),
            text: vec!["Hello World".into(), "Thanks!".into()],
            ..HtmlContainsText::default()
        };
        c.prepare().unwrap();
        assert!(c.execute(&resp()).is_ok());

        let mut c = HtmlContainsText {
            selector: "#mt".into(),
            text: vec!["FooBar".into()],
            complete: true,
            ..HtmlContainsText::default()
        };
        c.prepare().unwrap();
        assert!(c.execute(&resp()).is_ok());

        let mut c = HtmlContainsText {
            selector: "p.X".into(),
            text: vec!["Hello World".into(), "FooBar".into()],
            ..HtmlContainsText::default()
        };
        c.prepare().unwrap();
        assert!(c.execute(&resp()).is_err());

        // Two p.X elements but only one expected text.
        let mut c = HtmlContainsText {
            selector: "p.X".into(),
            text: vec!["Hello World".into()],
            complete: true,
            ..HtmlContainsText::default()
        };
        c.prepare().unwrap();
        assert!(c.execute(&resp()).is_err());
    }

    #[test]
    fn test_html_contains_text_in_order() {
        let mut c = HtmlContainsText {
            selector: "p.X".into(),
            text: vec!["Hello World".into(), "Thanks!".into()],
            in_order: true,
            ..HtmlContainsText::default()
        };
        c.prepare().unwrap();
        assert!(c.execute(&resp()).is_ok());

        let mut c = HtmlContainsText {
            selector: "p.X".into(),
            text: vec!["Thanks!".into(), "Hello World".into()],
            in_order: true,
            ..HtmlContainsText::default()
        };
        c.prepare().unwrap();
        assert!(c.execute(&resp()).is_err());
    }

    #[test]
    fn test_valid_html() {
        let c = ValidHtml::default();
        assert!(c.execute(&resp()).is_ok());

        let dup = Response {
            body: b"<!doctype html><html><body>\
                <div id=\"a\"></div><div id=\"a\"></div></body></html>"
                .to_vec(),
            ..Response::default()
        };
        assert!(c.execute(&dup).is_err());

        let no_doctype = Response {
            body: b"<html><body></body></html>".to_vec(),
            ..Response::default()
        };
        assert!(c.execute(&no_doctype).is_err());
        let lax = ValidHtml {
            ignore: vec!["doctype".into()],
        };
        assert!(lax.execute(&no_doctype).is_ok());
    }

    #[test]
    fn test_links_url_collection() {
        let body = r#"<!doctype html><html><body>
            <a href="/page">go</a>
            <a href="https://other.example/x">ext</a>
            <a href="mailto:x@example.org">mail</a>
            <img src="/logo.png">
            <script src="app.js"></script>
        </body></html>"#;
        let resp = Response {
            body: body.as_bytes().to_vec(),
            request: crate::request::Request {
                url: "https://host.example/dir/".into(),
                ..crate::request::Request::default()
            },
            ..Response::default()
        };

        let links = Links::default();
        let urls = links.collect_urls(&resp).unwrap();
        assert!(urls.contains("https://host.example/page"));
        assert!(urls.contains("https://host.example/logo.png"));
        assert!(urls.contains("https://host.example/dir/app.js"));
        assert!(urls.contains("https://other.example/x"));
        assert!(!urls.iter().any(|u| u.starts_with("mailto:")));

        let scoped = Links {
            only_links: vec!["https://host.example/".into()],
            ..Links::default()
        };
        let urls = scoped.collect_urls(&resp).unwrap();
        assert!(!urls.contains("https://other.example/x"));

        let filtered = Links {
            ignored_links: vec!["https://other.example/".into()],
            ..Links::default()
        };
        let urls = filtered.collect_urls(&resp).unwrap();
        assert!(!urls.contains("https://other.example/x"));
    }

    #[test]
    fn test_links_rejects_unknown_tag() {
        let mut links = Links {
            which: "a frame".into(),
            ..Links::default()
        };
        assert!(matches!(links.prepare(), Err(CheckError::Malformed(_))));
    }
}
