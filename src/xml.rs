//! XPath checks against XML bodies.

use serde::{Deserialize, Serialize};
use sxd_document::parser as xml_parser;
use sxd_xpath::{Factory, Value as XPathValue};

use crate::checks::CheckError;
use crate::condition::Condition;
use crate::request::Response;

/// Evaluates an XPath expression and applies a condition to the string
/// value of the addressed element. A missing element fails the check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct XmlCheck {
    /// XPath 1.0 expression.
    pub path: String,

    #[serde(flatten)]
    pub condition: Condition,
}

impl XmlCheck {
    /// Validates the XPath expression; the compiled form is rebuilt at
    /// execution time because it is not clonable.
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        if self.path.trim().is_empty() {
            return Err(CheckError::Malformed("empty XPath".into()));
        }
        self.build_xpath()?;
        self.condition.compile().map_err(CheckError::from)
    }

    fn build_xpath(&self) -> Result<sxd_xpath::XPath, CheckError> {
        Factory::new()
            .build(&self.path)
            .map_err(|e| CheckError::Malformed(format!("bad XPath {:?}: {}", self.path, e)))?
            .ok_or_else(|| CheckError::Malformed(format!("bad XPath {:?}", self.path)))
    }

    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let body = resp.body_checked().map_err(|_| CheckError::BadBody)?;
        let body = String::from_utf8_lossy(body);

        let package = xml_parser::parse(&body)
            .map_err(|e| CheckError::Failed(format!("invalid XML: {}", e)))?;
        let document = package.as_document();

        let xpath = self.build_xpath()?;
        let context = sxd_xpath::Context::new();
        let value = xpath
            .evaluate(&context, document.root())
            .map_err(|e| CheckError::Failed(format!("XPath evaluation: {}", e)))?;

        let text = match value {
            XPathValue::Nodeset(nodes) => {
                let node = nodes
                    .document_order_first()
                    .ok_or_else(|| CheckError::Failed(format!("no such element {}", self.path)))?;
                node.string_value()
            }
            XPathValue::String(s) => s,
            XPathValue::Number(n) => n.to_string(),
            XPathValue::Boolean(b) => b.to_string(),
        };

        self.condition.fulfilled(&text).map_err(CheckError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0"?>
<library>
  <book id="b1"><title>Rust in Action</title><year>2021</year></book>
  <book id="b2"><title>The Go Programming Language</title><year>2015</year></book>
</library>"#;

    fn resp() -> Response {
        Response {
            body: DOC.as_bytes().to_vec(),
            ..Response::default()
        }
    }

    #[test]
    fn test_xpath_element_value() {
        let mut c = XmlCheck {
            path: "/library/book[1]/title".into(),
            condition: Condition {
                equals: "Rust in Action".into(),
                ..Condition::default()
            },
        };
        c.prepare().unwrap();
        assert!(c.execute(&resp()).is_ok());
    }

    #[test]
    fn test_xpath_missing_element() {
        let mut c = XmlCheck {
            path: "/library/magazine".into(),
            ..XmlCheck::default()
        };
        c.prepare().unwrap();
        let err = c.execute(&resp()).unwrap_err();
        assert!(err.to_string().contains("no such element"));
    }

    #[test]
    fn test_xpath_count_function() {
        let mut c = XmlCheck {
            path: "count(/library/book)".into(),
            condition: Condition {
                equals: "2".into(),
                ..Condition::default()
            },
        };
        c.prepare().unwrap();
        assert!(c.execute(&resp()).is_ok());
    }

    #[test]
    fn test_invalid_xml_body() {
        let mut c = XmlCheck {
            path: "/library".into(),
            ..XmlCheck::default()
        };
        c.prepare().unwrap();
        let bad = Response {
            body: b"<library><book></library>".to_vec(),
            ..Response::default()
        };
        assert!(c.execute(&bad).is_err());
    }

    #[test]
    fn test_empty_path_is_malformed() {
        let mut c = XmlCheck::default();
        assert!(matches!(c.prepare(), Err(CheckError::Malformed(_))));
    }
}
