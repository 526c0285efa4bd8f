//! Variable extraction from HTTP responses.
//!
//! Extractors pull a string value out of a captured response (or the
//! clock) for use in subsequent tests. Like checks they are an internally
//! tagged enum, so the declarative form names the extractor in an
//! `Extractor` field and round-trips exactly.

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::checks::parse_set_cookie;
use crate::json::find_json_element;
use crate::request::Response;
use crate::scope::Variables;

/// Errors that can occur during variable extraction.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("header {0} not received")]
    HeaderNotFound(String),

    #[error("cookie {0} not received")]
    CookieNotFound(String),

    #[error("no match found in {0:?}")]
    RegexNoMatch(String),

    #[error("no submatch {0} in regex")]
    NoSuchSubmatch(usize),

    #[error("regex compilation failed: {0}")]
    BadRegex(#[from] regex::Error),

    #[error("bad selector: {0}")]
    BadSelector(String),

    #[error("no element matching {0:?}")]
    ElementNotFound(String),

    #[error("attribute {0:?} not present")]
    AttributeNotFound(String),

    #[error("JSON: {0}")]
    Json(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("unreadable body")]
    BadBody,

    #[error("{0}")]
    Other(String),
}

/// Sentinel attribute selecting an element's text content.
pub const TEXT_ATTRIBUTE: &str = "~text~";

/// Ordered mapping of variable names to extractors.
pub type ExtractorMap = BTreeMap<String, Extractor>;

/// One way of pulling a string out of a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "Extractor")]
pub enum Extractor {
    HeaderExtractor(HeaderExtractor),
    CookieExtractor(CookieExtractor),
    BodyExtractor(BodyExtractor),
    #[serde(rename = "HTMLExtractor")]
    HtmlExtractor(HtmlExtractor),
    #[serde(rename = "JSONExtractor")]
    JsonExtractor(JsonExtractor),
    #[serde(rename = "JSExtractor")]
    JsExtractor(JsExtractor),
    SetTimestamp(SetTimestamp),
}

impl Extractor {
    pub fn name(&self) -> &'static str {
        match self {
            Extractor::HeaderExtractor(_) => "HeaderExtractor",
            Extractor::CookieExtractor(_) => "CookieExtractor",
            Extractor::BodyExtractor(_) => "BodyExtractor",
            Extractor::HtmlExtractor(_) => "HTMLExtractor",
            Extractor::JsonExtractor(_) => "JSONExtractor",
            Extractor::JsExtractor(_) => "JSExtractor",
            Extractor::SetTimestamp(_) => "SetTimestamp",
        }
    }

    /// Extract a value from the response.
    pub fn extract(&self, resp: &Response, test_name: &str) -> Result<String, ExtractionError> {
        match self {
            Extractor::HeaderExtractor(e) => e.extract(resp),
            Extractor::CookieExtractor(e) => e.extract(resp),
            Extractor::BodyExtractor(e) => e.extract(resp),
            Extractor::HtmlExtractor(e) => e.extract(resp),
            Extractor::JsonExtractor(e) => e.extract(resp),
            Extractor::JsExtractor(e) => e.extract(resp, test_name),
            Extractor::SetTimestamp(e) => e.extract(),
        }
    }
}

/// Constructor for a default-configured extractor.
pub type ExtractorFactory = fn() -> Extractor;

fn builtin_extractors() -> BTreeMap<String, ExtractorFactory> {
    let mut m: BTreeMap<String, ExtractorFactory> = BTreeMap::new();
    m.insert("HeaderExtractor".into(), || {
        Extractor::HeaderExtractor(HeaderExtractor::default())
    });
    m.insert("CookieExtractor".into(), || {
        Extractor::CookieExtractor(CookieExtractor::default())
    });
    m.insert("BodyExtractor".into(), || {
        Extractor::BodyExtractor(BodyExtractor::default())
    });
    m.insert("HTMLExtractor".into(), || {
        Extractor::HtmlExtractor(HtmlExtractor::default())
    });
    m.insert("JSONExtractor".into(), || {
        Extractor::JsonExtractor(JsonExtractor::default())
    });
    m.insert("JSExtractor".into(), || {
        Extractor::JsExtractor(JsExtractor::default())
    });
    m.insert("SetTimestamp".into(), || {
        Extractor::SetTimestamp(SetTimestamp::default())
    });
    m
}

fn registry() -> &'static std::sync::RwLock<BTreeMap<String, ExtractorFactory>> {
    static REGISTRY: std::sync::OnceLock<std::sync::RwLock<BTreeMap<String, ExtractorFactory>>> =
        std::sync::OnceLock::new();
    REGISTRY.get_or_init(|| std::sync::RwLock::new(builtin_extractors()))
}

/// Register an additional extractor constructor. Intended for program
/// start.
pub fn register_extractor(name: &str, factory: ExtractorFactory) {
    if let Ok(mut table) = registry().write() {
        table.insert(name.to_string(), factory);
    }
}

/// Construct a default-configured extractor by its registered name.
pub fn new_extractor(name: &str) -> Option<Extractor> {
    registry().read().ok()?.get(name).map(|f| f())
}

/// All registered extractor names, sorted.
pub fn extractor_names() -> Vec<String> {
    registry()
        .read()
        .map(|t| t.keys().cloned().collect())
        .unwrap_or_default()
}

/// Run every extractor; successfully extracted values are returned as a
/// variable mapping, failures are collected separately.
pub fn extract_variables(
    extractors: &ExtractorMap,
    resp: &Response,
    test_name: &str,
) -> (Variables, Vec<(String, ExtractionError)>) {
    let mut variables = Variables::new();
    let mut failures = Vec::new();

    for (name, extractor) in extractors {
        match extractor.extract(resp, test_name) {
            Ok(value) => {
                debug!(variable = %name, value = %value, "extracted variable");
                variables.insert(name.clone(), value);
            }
            Err(e) => {
                warn!(variable = %name, error = %e, "variable extraction failed");
                failures.push((name.clone(), e));
            }
        }
    }

    (variables, failures)
}

/// Returns the first value of a header. The lookup is case-sensitive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct HeaderExtractor {
    pub name: String,
}

impl HeaderExtractor {
    pub fn extract(&self, resp: &Response) -> Result<String, ExtractionError> {
        resp.header
            .get(&self.name)
            .and_then(|vs| vs.first())
            .cloned()
            .ok_or_else(|| ExtractionError::HeaderNotFound(self.name.clone()))
    }
}

/// Looks up a cookie by name in the Set-Cookie headers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CookieExtractor {
    pub name: String,
}

impl CookieExtractor {
    pub fn extract(&self, resp: &Response) -> Result<String, ExtractionError> {
        resp.set_cookies()
            .iter()
            .filter_map(|raw| parse_set_cookie(raw))
            .find(|c| c.name == self.name)
            .map(|c| c.value)
            .ok_or_else(|| ExtractionError::CookieNotFound(self.name.clone()))
    }
}

/// Applies a regular expression to the body and returns a submatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct BodyExtractor {
    pub regexp: String,

    /// 0 is the whole match, 1 the first capture group, and so on.
    #[serde(skip_serializing_if = "is_zero")]
    pub submatch: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl BodyExtractor {
    pub fn extract(&self, resp: &Response) -> Result<String, ExtractionError> {
        let body = resp.body_checked().map_err(|_| ExtractionError::BadBody)?;
        let body = String::from_utf8_lossy(body);
        let re = regex::Regex::new(&self.regexp)?;
        let captures = re
            .captures(&body)
            .ok_or_else(|| ExtractionError::RegexNoMatch(clip(&body)))?;
        captures
            .get(self.submatch)
            .map(|m| m.as_str().to_string())
            .ok_or(ExtractionError::NoSuchSubmatch(self.submatch))
    }
}

fn clip(s: &str) -> String {
    let mut end = s.len().min(40);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Runs a CSS selector and returns an attribute value or, with the
/// sentinel attribute `~text~`, the element's text content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct HtmlExtractor {
    pub selector: String,
    pub attribute: String,
}

impl HtmlExtractor {
    pub fn extract(&self, resp: &Response) -> Result<String, ExtractionError> {
        let body = resp.body_checked().map_err(|_| ExtractionError::BadBody)?;
        let body = String::from_utf8_lossy(body);
        let selector = Selector::parse(&self.selector)
            .map_err(|e| ExtractionError::BadSelector(e.to_string()))?;
        let doc = Html::parse_document(&body);
        let element = doc
            .select(&selector)
            .next()
            .ok_or_else(|| ExtractionError::ElementNotFound(self.selector.clone()))?;

        if self.attribute == TEXT_ATTRIBUTE {
            let text = element
                .text()
                .flat_map(|t| t.split_whitespace())
                .collect::<Vec<_>>()
                .join(" ");
            Ok(text)
        } else {
            element
                .value()
                .attr(&self.attribute)
                .map(|v| v.to_string())
                .ok_or_else(|| ExtractionError::AttributeNotFound(self.attribute.clone()))
        }
    }
}

/// Navigates a dotted path into the JSON body. String values are
/// unquoted; an `Embedded` extractor recursively parses a string value
/// as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct JsonExtractor {
    pub element: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub sep: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedded: Option<Box<JsonExtractor>>,
}

impl JsonExtractor {
    pub fn extract(&self, resp: &Response) -> Result<String, ExtractionError> {
        let body = resp.body_checked().map_err(|_| ExtractionError::BadBody)?;
        self.extract_from(&String::from_utf8_lossy(body))
    }

    fn extract_from(&self, doc: &str) -> Result<String, ExtractionError> {
        let fragment = find_json_element(doc, &self.element, &self.sep)
            .map_err(|e| ExtractionError::Json(e.to_string()))?;
        let value: JsonValue = serde_json::from_str(&fragment)
            .map_err(|e| ExtractionError::Json(e.to_string()))?;

        if let Some(embedded) = &self.embedded {
            let inner = match value {
                JsonValue::String(s) => s,
                other => {
                    return Err(ExtractionError::Json(format!(
                        "element {} is not an embedded JSON string but {}",
                        self.element, other
                    )))
                }
            };
            return embedded.extract_from(&inner);
        }

        Ok(match value {
            JsonValue::String(s) => s,
            JsonValue::Null => String::new(),
            other => other.to_string(),
        })
    }
}

/// Evaluates a script; the completion value's string form is the result.
/// Returning an array signals an error whose message is the array's
/// first element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct JsExtractor {
    pub script: String,
}

impl JsExtractor {
    pub fn extract(&self, resp: &Response, test_name: &str) -> Result<String, ExtractionError> {
        let body = resp.body_str();
        let runtime =
            rquickjs::Runtime::new().map_err(|e| ExtractionError::Script(e.to_string()))?;
        let context = rquickjs::Context::full(&runtime)
            .map_err(|e| ExtractionError::Script(e.to_string()))?;

        context.with(|ctx| {
            let prelude = format!(
                "var Test = {};",
                serde_json::json!({
                    "Name": test_name,
                    "Response": { "BodyStr": body },
                })
            );
            ctx.eval::<(), _>(prelude)
                .map_err(|e| ExtractionError::Script(e.to_string()))?;

            let value: rquickjs::Value = ctx
                .eval(self.script.as_str())
                .map_err(|e| ExtractionError::Script(script_error(&ctx, e)))?;

            if value.is_undefined() {
                return Err(ExtractionError::Script("undefined".into()));
            }
            if value.is_null() {
                return Err(ExtractionError::Script("null".into()));
            }
            if value.is_function() {
                return Err(ExtractionError::Script("extracted Function".into()));
            }
            if let Some(array) = value.as_array() {
                let message = array
                    .get::<rquickjs::Coerced<String>>(0)
                    .map(|c| c.0)
                    .unwrap_or_else(|_| "script returned an array".into());
                return Err(ExtractionError::Script(message));
            }
            if let Some(obj) = value.as_object() {
                // An object result reports its first string property.
                let mut message = None;
                if let Ok(props) = obj
                    .props::<String, rquickjs::Coerced<String>>()
                    .collect::<Result<Vec<_>, _>>()
                {
                    message = props.into_iter().next().map(|(_, v)| v.0);
                }
                return Err(ExtractionError::Script(
                    message.unwrap_or_else(|| "script returned an object".into()),
                ));
            }

            let coerced: rquickjs::Coerced<String> = value
                .get()
                .map_err(|e| ExtractionError::Script(e.to_string()))?;
            Ok(coerced.0)
        })
    }
}

fn script_error(ctx: &rquickjs::Ctx<'_>, e: rquickjs::Error) -> String {
    if matches!(e, rquickjs::Error::Exception) {
        format!("{:?}", ctx.catch())
    } else {
        e.to_string()
    }
}

/// Yields a formatted timestamp relative to now.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SetTimestamp {
    #[serde(skip_serializing_if = "is_zero_i32")]
    pub delta_year: i32,

    #[serde(skip_serializing_if = "is_zero_i32")]
    pub delta_month: i32,

    #[serde(skip_serializing_if = "is_zero_i64")]
    pub delta_day: i64,

    /// Additional offset in seconds, may be negative.
    #[serde(rename = "DeltaT", skip_serializing_if = "is_zero_i64")]
    pub delta_t: i64,

    /// A strftime layout; defaults to "%Y-%m-%d %H:%M:%S".
    #[serde(skip_serializing_if = "String::is_empty")]
    pub format: String,
}

fn is_zero_i32(n: &i32) -> bool {
    *n == 0
}

fn is_zero_i64(n: &i64) -> bool {
    *n == 0
}

impl SetTimestamp {
    pub fn extract(&self) -> Result<String, ExtractionError> {
        self.at(chrono::Utc::now())
    }

    fn at(&self, now: chrono::DateTime<chrono::Utc>) -> Result<String, ExtractionError> {
        let months = self.delta_year * 12 + self.delta_month;
        let shifted = if months >= 0 {
            now.checked_add_months(chrono::Months::new(months as u32))
        } else {
            now.checked_sub_months(chrono::Months::new((-months) as u32))
        }
        .ok_or_else(|| ExtractionError::Other("timestamp out of range".into()))?;

        let shifted = shifted
            + chrono::Duration::days(self.delta_day)
            + chrono::Duration::seconds(self.delta_t);

        let layout = if self.format.is_empty() {
            "%Y-%m-%d %H:%M:%S"
        } else {
            &self.format
        };
        Ok(shifted.format(layout).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EXAMPLE_HTML: &str = r#"
<html>
  <head>
    <meta http-equiv="content-type" content="text/html; charset=UTF-8" />
    <meta name="_csrf" content="18f0ca3f-a50a-437f-9bd1-15c0caa28413" />
    <title>Dummy HTML</title>
  </head>
  <body>
    <h1>Headline</h1>
    <div class="token"><span>
	DEAD-BEEF-0007

</span></div>
  </body>
</html>"#;

    fn resp(body: &str) -> Response {
        Response {
            body: body.as_bytes().to_vec(),
            ..Response::default()
        }
    }

    #[test]
    fn test_html_extractor_attribute_and_text() {
        let ex = HtmlExtractor {
            selector: r#"head meta[name="_csrf"]"#.into(),
            attribute: "content".into(),
        };
        assert_eq!(
            ex.extract(&resp(EXAMPLE_HTML)).unwrap(),
            "18f0ca3f-a50a-437f-9bd1-15c0caa28413"
        );

        let ex = HtmlExtractor {
            selector: "body div.token > span".into(),
            attribute: TEXT_ATTRIBUTE.into(),
        };
        assert_eq!(ex.extract(&resp(EXAMPLE_HTML)).unwrap(), "DEAD-BEEF-0007");
    }

    #[test]
    fn test_body_extractor_submatches() {
        let body = "Hello World! Foo 123 xyz ABC. Dog and cat.";
        let ex = BodyExtractor {
            regexp: "([1-9]+) (...) ([^ .]*)".into(),
            submatch: 0,
        };
        assert_eq!(ex.extract(&resp(body)).unwrap(), "123 xyz ABC");

        let ex = BodyExtractor {
            regexp: "([1-9]+) (...) ([^ .]*)".into(),
            submatch: 2,
        };
        assert_eq!(ex.extract(&resp(body)).unwrap(), "xyz");

        let err = ex.extract(&resp("blablabla")).unwrap_err();
        assert_eq!(err.to_string(), r#"no match found in "blablabla""#);
    }

    #[test]
    fn test_json_extractor() {
        let doc = r#"{"a":"foo", "b":"bar", "c": [1,2,3], "n": null, "id": -1206699}"#;
        let ex = |element: &str| JsonExtractor {
            element: element.into(),
            ..JsonExtractor::default()
        };
        assert_eq!(ex("a").extract(&resp(doc)).unwrap(), "foo");
        assert_eq!(ex("c.2").extract(&resp(doc)).unwrap(), "3");
        assert_eq!(ex("c").extract(&resp(doc)).unwrap(), "[1,2,3]");
        assert_eq!(ex("n").extract(&resp(doc)).unwrap(), "");
        assert_eq!(ex("id").extract(&resp(doc)).unwrap(), "-1206699");
        assert!(ex("missing").extract(&resp(doc)).is_err());
    }

    #[test]
    fn test_embedded_json_extractor() {
        let doc = r#"{
  "array":  "[123,-789,true,\"wuz\", null]",
  "object": "{\"a\": -44, \"b\": \"foo\", \"c\": true}"
}"#;
        let ex = |outer: &str, inner: &str| JsonExtractor {
            element: outer.into(),
            embedded: Some(Box::new(JsonExtractor {
                element: inner.into(),
                ..JsonExtractor::default()
            })),
            ..JsonExtractor::default()
        };
        assert_eq!(ex("array", "0").extract(&resp(doc)).unwrap(), "123");
        assert_eq!(ex("array", "3").extract(&resp(doc)).unwrap(), "wuz");
        assert_eq!(ex("object", "a").extract(&resp(doc)).unwrap(), "-44");
        assert_eq!(ex("object", "c").extract(&resp(doc)).unwrap(), "true");
    }

    #[test]
    fn test_cookie_extractor_first_wins() {
        let mut response = Response::default();
        response.header.insert(
            "Set-Cookie".into(),
            vec![
                "foo=bar".into(),
                "sessionid=123abc456".into(),
                "foo=wuz".into(),
            ],
        );
        let ex = CookieExtractor {
            name: "sessionid".into(),
        };
        assert_eq!(ex.extract(&response).unwrap(), "123abc456");

        let ex = CookieExtractor { name: "foo".into() };
        assert_eq!(ex.extract(&response).unwrap(), "bar");

        let ex = CookieExtractor {
            name: "missing".into(),
        };
        assert_eq!(
            ex.extract(&response).unwrap_err().to_string(),
            "cookie missing not received"
        );
    }

    #[test]
    fn test_header_extractor_is_case_sensitive() {
        let mut response = Response::default();
        response.header.insert(
            "X-CSRF-Token".into(),
            vec![
                "9b8220154ac56d518ffbef8fdb3b57bb".into(),
                "83a50c517db35fd2620c09770c4ec98c".into(),
            ],
        );

        let ex = HeaderExtractor {
            name: "X-CSRF-Token".into(),
        };
        assert_eq!(
            ex.extract(&response).unwrap(),
            "9b8220154ac56d518ffbef8fdb3b57bb"
        );

        let ex = HeaderExtractor {
            name: "x-csrf-token".into(),
        };
        assert_eq!(
            ex.extract(&response).unwrap_err().to_string(),
            "header x-csrf-token not received"
        );
    }

    #[test]
    fn test_js_extractor() {
        let response = resp(r#"[{"id": 78, "code": "ZG", "name": "Zug"}]"#);

        let run = |script: &str| {
            JsExtractor {
                script: script.into(),
            }
            .extract(&response, "JavaScript everywhere")
        };

        assert_eq!(run("123;").unwrap(), "123");
        assert_eq!(run("true;").unwrap(), "true");
        assert_eq!(run("\"abc\";").unwrap(), "abc");
        assert_eq!(run("Test.Name;").unwrap(), "JavaScript everywhere");
        assert_eq!(
            run("JSON.parse(Test.Response.BodyStr)[0].id;").unwrap(),
            "78"
        );

        assert!(run("null;").is_err());
        assert!(run("var a; a;").is_err());
        let err = run("[\"Ooops\"];").unwrap_err();
        assert_eq!(err.to_string(), "script error: Ooops");
        assert!(run("var f = function() { return 7; }; f;").is_err());
    }

    #[test]
    fn test_set_timestamp() {
        let now = chrono::Utc.with_ymd_and_hms(2020, 1, 15, 10, 30, 0).unwrap();

        let ts = SetTimestamp::default();
        assert_eq!(ts.at(now).unwrap(), "2020-01-15 10:30:00");

        let ts = SetTimestamp {
            delta_t: 20,
            ..SetTimestamp::default()
        };
        assert_eq!(ts.at(now).unwrap(), "2020-01-15 10:30:20");

        let ts = SetTimestamp {
            delta_year: 1,
            delta_month: 2,
            delta_day: 3,
            format: "%Y-%m-%d".into(),
            ..SetTimestamp::default()
        };
        assert_eq!(ts.at(now).unwrap(), "2021-03-18");

        let ts = SetTimestamp {
            delta_month: -1,
            format: "%Y-%m".into(),
            ..SetTimestamp::default()
        };
        assert_eq!(ts.at(now).unwrap(), "2019-12");
    }

    #[test]
    fn test_extractor_map_roundtrip() {
        let mut map = ExtractorMap::new();
        map.insert(
            "Foo".into(),
            Extractor::HtmlExtractor(HtmlExtractor {
                selector: "div.footer span.year".into(),
                attribute: TEXT_ATTRIBUTE.into(),
            }),
        );
        map.insert(
            "Bar".into(),
            Extractor::BodyExtractor(BodyExtractor {
                regexp: "[A-Z]+[0-9]+".into(),
                submatch: 1,
            }),
        );

        let json = serde_json::to_string_pretty(&map).unwrap();
        assert!(json.contains("\"Extractor\": \"HTMLExtractor\""));
        assert!(json.contains("\"Extractor\": \"BodyExtractor\""));

        let back: ExtractorMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        match &back["Foo"] {
            Extractor::HtmlExtractor(e) => assert_eq!(e.attribute, TEXT_ATTRIBUTE),
            other => panic!("wrong extractor {:?}", other),
        }
        match &back["Bar"] {
            Extractor::BodyExtractor(e) => assert_eq!(e.submatch, 1),
            other => panic!("wrong extractor {:?}", other),
        }
    }

    #[test]
    fn test_extractor_registry_roundtrip() {
        for name in extractor_names() {
            let extractor = new_extractor(&name).unwrap();
            assert_eq!(extractor.name(), name);
            let json = serde_json::to_value(&extractor).unwrap();
            assert_eq!(
                json.get("Extractor").and_then(|v| v.as_str()),
                Some(name.as_str())
            );
            let back: Extractor = serde_json::from_value(json).unwrap();
            assert_eq!(back.name(), name);
        }
    }

    #[test]
    fn test_extract_variables_partial_failure() {
        let doc = r#"{"user": {"id": "123"}}"#;
        let mut map = ExtractorMap::new();
        map.insert(
            "USERID".into(),
            Extractor::JsonExtractor(JsonExtractor {
                element: "user.id".into(),
                ..JsonExtractor::default()
            }),
        );
        map.insert(
            "MISSING".into(),
            Extractor::JsonExtractor(JsonExtractor {
                element: "does.not.exist".into(),
                ..JsonExtractor::default()
            }),
        );

        let (vars, failures) = extract_variables(&map, &resp(doc), "t");
        assert_eq!(vars.get("USERID"), Some(&"123".to_string()));
        assert_eq!(vars.len(), 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "MISSING");
    }
}
