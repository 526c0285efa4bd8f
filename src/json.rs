//! JSON checks: dotted-element navigation and boolean expressions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checks::CheckError;
use crate::condition::Condition;
use crate::request::Response;

/// Locate the element addressed by `element` in `doc` and render it as a
/// JSON fragment. An empty element or "." addresses the whole document.
/// The separator between path segments is configurable (default ".").
pub fn find_json_element(doc: &str, element: &str, sep: &str) -> Result<String, CheckError> {
    let sep = if sep.is_empty() { "." } else { sep };
    let segments: Vec<&str> = element.split(sep).filter(|s| !s.is_empty()).collect();

    if segments.is_empty() {
        // Whole document; must at least parse.
        serde_json::from_str::<Value>(doc)
            .map_err(|e| CheckError::Failed(e.to_string()))?;
        return Ok(doc.trim().to_string());
    }

    let root: Value =
        serde_json::from_str(doc).map_err(|e| CheckError::Failed(e.to_string()))?;

    let mut current = &root;
    let mut path = String::new();
    for seg in segments {
        if !path.is_empty() {
            path.push_str(sep);
        }
        path.push_str(seg);
        current = match current {
            Value::Array(items) => {
                let idx: usize = seg.parse().map_err(|_| {
                    CheckError::Failed(format!("{} is not a valid index", seg))
                })?;
                items.get(idx).ok_or_else(|| {
                    CheckError::Failed(format!(
                        "no index {} in array of len {}",
                        idx,
                        items.len()
                    ))
                })?
            }
            Value::Object(map) => map.get(seg).ok_or_else(|| {
                CheckError::Failed(format!("element {} not found", path))
            })?,
            _ => {
                return Err(CheckError::Failed(format!(
                    "element {} not found",
                    path
                )))
            }
        };
    }

    serde_json::to_string(current).map_err(|e| CheckError::Failed(e.to_string()))
}

/// Navigates the body via a dotted path and applies a condition to the
/// addressed raw fragment. An `Embedded` check recursively parses a
/// string value as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct JsonCheck {
    /// Dotted path; "." or empty addresses the whole document.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub element: String,

    /// Path separator, default ".".
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sep: String,

    #[serde(flatten)]
    pub condition: Condition,

    /// Recursive check on a string value re-parsed as JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedded: Option<Box<JsonCheck>>,
}

impl JsonCheck {
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        self.condition.compile().map_err(CheckError::from)?;
        if let Some(embedded) = &mut self.embedded {
            embedded.prepare()?;
        }
        Ok(())
    }

    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let body = resp.body_checked().map_err(|_| CheckError::BadBody)?;
        let body = String::from_utf8_lossy(body);
        self.run_on(&body)
    }

    fn run_on(&self, doc: &str) -> Result<(), CheckError> {
        let fragment = find_json_element(doc, &self.element, &self.sep)?;

        if let Some(embedded) = &self.embedded {
            // The addressed value must be a JSON string whose content is
            // itself JSON.
            let inner: Value = serde_json::from_str(&fragment)
                .map_err(|e| CheckError::Failed(e.to_string()))?;
            let inner_doc = match inner {
                Value::String(s) => s,
                other => {
                    return Err(CheckError::Failed(format!(
                        "element {} is not an embedded JSON string but {}",
                        self.element, other
                    )))
                }
            };
            embedded.run_on(&inner_doc)?;
        }

        if !self.condition.is_empty() {
            self.condition.fulfilled(&fragment).map_err(CheckError::from)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSONExpr

/// Evaluates a boolean expression over the JSON body.
///
/// Supported: `==`, `!=`, `<`, `<=`, `>`, `>=`, `&&`, `||`, `!`,
/// parentheses, the functions `$len`, `$max`, `$min`, `$has`, `$match`,
/// and path literals of the form `.foo.bar[1]` (`.` alone addresses the
/// whole document).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct JsonExpr {
    pub expression: String,
}

impl JsonExpr {
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        if self.expression.trim().is_empty() {
            return Err(CheckError::Malformed("empty expression".into()));
        }
        // Parse once to reject syntax errors early.
        Parser::new(&self.expression)
            .parse()
            .map_err(CheckError::Malformed)?;
        Ok(())
    }

    pub fn execute(&self, resp: &Response) -> Result<(), CheckError> {
        let body = resp.body_checked().map_err(|_| CheckError::BadBody)?;
        let doc: Value = serde_json::from_str(&String::from_utf8_lossy(body))
            .map_err(|e| CheckError::Failed(e.to_string()))?;

        let expr = Parser::new(&self.expression)
            .parse()
            .map_err(CheckError::Malformed)?;
        match eval(&expr, &doc).map_err(CheckError::Failed)? {
            Value::Bool(true) => Ok(()),
            Value::Bool(false) => Err(CheckError::Failed(format!(
                "expression {:?} is false",
                self.expression
            ))),
            other => Err(CheckError::Malformed(format!(
                "expression yields {} instead of a boolean",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Path(Vec<PathStep>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Len,
    Max,
    Min,
    Has,
    Match,
}

#[derive(Debug, Clone)]
enum PathStep {
    Key(String),
    Index(usize),
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    src: &'a str,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Parser {
            chars: src.chars().collect(),
            pos: 0,
            src,
        }
    }

    fn parse(&mut self) -> Result<Expr, String> {
        let expr = self.parse_or()?;
        self.skip_ws();
        if self.pos != self.chars.len() {
            return Err(format!(
                "trailing input at position {} in {:?}",
                self.pos, self.src
            ));
        }
        Ok(expr)
    }

    fn skip_ws(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        let t: Vec<char> = token.chars().collect();
        if self.chars[self.pos..].starts_with(&t) {
            self.pos += t.len();
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.eat("||") {
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_cmp()?;
        while self.eat("&&") {
            let right = self.parse_cmp()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr, String> {
        let left = self.parse_unary()?;
        self.skip_ws();
        let op = if self.eat("==") {
            BinOp::Eq
        } else if self.eat("!=") {
            BinOp::Ne
        } else if self.eat("<=") {
            BinOp::Le
        } else if self.eat(">=") {
            BinOp::Ge
        } else if self.eat("<") {
            BinOp::Lt
        } else if self.eat(">") {
            BinOp::Gt
        } else {
            return Ok(left);
        };
        let right = self.parse_unary()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        self.skip_ws();
        if self.peek() == Some('!')
            && self.chars.get(self.pos + 1).copied() != Some('=')
        {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.parse_or()?;
                if !self.eat(")") {
                    return Err(format!("missing ')' at position {}", self.pos));
                }
                Ok(inner)
            }
            Some('"') => self.parse_string().map(|s| Expr::Literal(Value::String(s))),
            Some('$') => self.parse_call(),
            Some('.') => self.parse_path(),
            Some(c) if c.is_ascii_digit() || c == '-' => self.parse_number(),
            Some(c) if c.is_alphabetic() => {
                let word = self.parse_ident();
                match word.as_str() {
                    "true" => Ok(Expr::Literal(Value::Bool(true))),
                    "false" => Ok(Expr::Literal(Value::Bool(false))),
                    "null" => Ok(Expr::Literal(Value::Null)),
                    other => Err(format!("unknown identifier {:?}", other)),
                }
            }
            other => Err(format!("unexpected input {:?} at {}", other, self.pos)),
        }
    }

    fn parse_ident(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .map(|c| c.is_alphanumeric() || c == '_')
            .unwrap_or(false)
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn parse_string(&mut self) -> Result<String, String> {
        self.pos += 1; // opening quote
        let mut out = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c) => {
                            out.push(c);
                            self.pos += 1;
                        }
                        None => return Err("unterminated escape".into()),
                    }
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
                None => return Err("unterminated string".into()),
            }
        }
    }

    fn parse_number(&mut self) -> Result<Expr, String> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self
            .peek()
            .map(|c| c.is_ascii_digit() || c == '.')
            .unwrap_or(false)
        {
            // A '.' after digits could start a path only at the top level;
            // inside numbers it is a decimal point when followed by a digit.
            if self.chars[self.pos] == '.'
                && !self
                    .chars
                    .get(self.pos + 1)
                    .map(|c| c.is_ascii_digit())
                    .unwrap_or(false)
            {
                break;
            }
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let num: serde_json::Number = text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .ok_or_else(|| format!("bad number {:?}", text))?;
        Ok(Expr::Literal(Value::Number(num)))
    }

    fn parse_call(&mut self) -> Result<Expr, String> {
        self.pos += 1; // '$'
        let name = self.parse_ident();
        let func = match name.as_str() {
            "len" => Func::Len,
            "max" => Func::Max,
            "min" => Func::Min,
            "has" => Func::Has,
            "match" => Func::Match,
            other => return Err(format!("unknown function ${}", other)),
        };
        if !self.eat("(") {
            return Err(format!("expected '(' after ${}", name));
        }
        let mut args = vec![self.parse_or()?];
        while self.eat(",") {
            args.push(self.parse_or()?);
        }
        if !self.eat(")") {
            return Err(format!("missing ')' in ${} call", name));
        }
        let want = match func {
            Func::Len | Func::Max | Func::Min => 1,
            Func::Has | Func::Match => 2,
        };
        if args.len() != want {
            return Err(format!(
                "${} takes {} argument(s), got {}",
                name,
                want,
                args.len()
            ));
        }
        Ok(Expr::Call(func, args))
    }

    fn parse_path(&mut self) -> Result<Expr, String> {
        let mut steps = Vec::new();
        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    let key = self.parse_ident();
                    if !key.is_empty() {
                        steps.push(PathStep::Key(key));
                    }
                }
                Some('[') => {
                    self.pos += 1;
                    let start = self.pos;
                    while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                        self.pos += 1;
                    }
                    let text: String = self.chars[start..self.pos].iter().collect();
                    let idx: usize =
                        text.parse().map_err(|_| format!("bad index {:?}", text))?;
                    if !self.eat("]") {
                        return Err("missing ']' in path".into());
                    }
                    steps.push(PathStep::Index(idx));
                }
                _ => break,
            }
        }
        Ok(Expr::Path(steps))
    }
}

fn eval(expr: &Expr, doc: &Value) -> Result<Value, String> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path(steps) => {
            let mut current = doc;
            for step in steps {
                current = match (step, current) {
                    (PathStep::Key(k), Value::Object(map)) => map
                        .get(k)
                        .ok_or_else(|| format!("element {} not found", k))?,
                    (PathStep::Index(i), Value::Array(items)) => items
                        .get(*i)
                        .ok_or_else(|| format!("no index {} in array of len {}", i, items.len()))?,
                    (step, other) => {
                        return Err(format!("cannot navigate {:?} into {}", step, other))
                    }
                };
            }
            Ok(current.clone())
        }
        Expr::Not(inner) => match eval(inner, doc)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(format!("cannot negate {}", other)),
        },
        Expr::Binary(op, left, right) => {
            let l = eval(left, doc)?;
            match op {
                BinOp::And | BinOp::Or => {
                    let lb = as_bool(&l)?;
                    // Short-circuit.
                    if *op == BinOp::And && !lb {
                        return Ok(Value::Bool(false));
                    }
                    if *op == BinOp::Or && lb {
                        return Ok(Value::Bool(true));
                    }
                    let rb = as_bool(&eval(right, doc)?)?;
                    Ok(Value::Bool(rb))
                }
                BinOp::Eq => Ok(Value::Bool(values_equal(&l, &eval(right, doc)?))),
                BinOp::Ne => Ok(Value::Bool(!values_equal(&l, &eval(right, doc)?))),
                BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                    let r = eval(right, doc)?;
                    let ord = compare(&l, &r)?;
                    let ok = match op {
                        BinOp::Lt => ord.is_lt(),
                        BinOp::Le => ord.is_le(),
                        BinOp::Gt => ord.is_gt(),
                        BinOp::Ge => ord.is_ge(),
                        _ => unreachable!(),
                    };
                    Ok(Value::Bool(ok))
                }
            }
        }
        Expr::Call(func, args) => {
            let first = eval(&args[0], doc)?;
            match func {
                Func::Len => {
                    let len = match &first {
                        Value::Array(a) => a.len(),
                        Value::Object(o) => o.len(),
                        Value::String(s) => s.chars().count(),
                        other => return Err(format!("$len of {}", other)),
                    };
                    Ok(Value::from(len as i64))
                }
                Func::Max | Func::Min => {
                    let items = match &first {
                        Value::Array(a) if !a.is_empty() => a,
                        Value::Array(_) => {
                            return Err("$max/$min of empty array".into())
                        }
                        other => return Err(format!("$max/$min of {}", other)),
                    };
                    let mut best: Option<f64> = None;
                    for item in items {
                        let n = item
                            .as_f64()
                            .ok_or_else(|| format!("non-numeric element {}", item))?;
                        best = Some(match best {
                            None => n,
                            Some(b) if *func == Func::Max => b.max(n),
                            Some(b) => b.min(n),
                        });
                    }
                    let n = serde_json::Number::from_f64(best.unwrap_or(0.0))
                        .ok_or("non-finite result")?;
                    Ok(Value::Number(n))
                }
                Func::Has => {
                    let needle = eval(&args[1], doc)?;
                    match &first {
                        Value::Array(items) => Ok(Value::Bool(
                            items.iter().any(|i| values_equal(i, &needle)),
                        )),
                        other => Err(format!("$has over {}", other)),
                    }
                }
                Func::Match => {
                    let pattern = match &first {
                        Value::String(s) => s.clone(),
                        other => return Err(format!("$match pattern is {}", other)),
                    };
                    let subject = match eval(&args[1], doc)? {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    let re = regex::Regex::new(&pattern).map_err(|e| e.to_string())?;
                    Ok(Value::Bool(re.is_match(&subject)))
                }
            }
        }
    }
}

fn as_bool(v: &Value) -> Result<bool, String> {
    match v {
        Value::Bool(b) => Ok(*b),
        other => Err(format!("expected boolean, got {}", other)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, String> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x
            .partial_cmp(&y)
            .ok_or_else(|| "incomparable numbers".to_string());
    }
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Ok(x.cmp(y));
    }
    Err(format!("cannot compare {} and {}", a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_json_element() {
        let doc = r#"{"a":"foo", "b":"bar", "c": [1,2,3]}"#;
        assert_eq!(find_json_element(doc, "a", ".").unwrap(), "\"foo\"");
        assert_eq!(find_json_element(doc, "c.2", ".").unwrap(), "3");
        assert_eq!(find_json_element(doc, "c", ".").unwrap(), "[1,2,3]");
        assert!(find_json_element(doc, "qux", ".")
            .unwrap_err()
            .to_string()
            .contains("element qux not found"));
        assert!(find_json_element(doc, "c.5", ".")
            .unwrap_err()
            .to_string()
            .contains("no index 5"));
        assert!(find_json_element(doc, "c.foo", ".")
            .unwrap_err()
            .to_string()
            .contains("not a valid index"));
    }

    #[test]
    fn test_find_json_element_whole_document() {
        assert_eq!(find_json_element("123", "", ".").unwrap(), "123");
        assert_eq!(find_json_element("123", ".", ".").unwrap(), "123");
        assert_eq!(
            find_json_element(r#"{"A": 1}"#, ".", ".").unwrap(),
            r#"{"A": 1}"#
        );
        assert!(find_json_element(r#"{"foo": 5, "blub"#, ".", ".").is_err());
    }

    #[test]
    fn test_find_json_element_custom_sep() {
        let doc = r#"{"bar": [1,2,3]}"#;
        assert_eq!(find_json_element(doc, "bar#1", "#").unwrap(), "2");
    }

    #[test]
    fn test_find_json_element_sloppy_dots() {
        let doc = r#"{"A": [0, 1, {"B": true, "C": 2.72}, 3]}"#;
        assert_eq!(find_json_element(doc, ".A...2.C..", ".").unwrap(), "2.72");
    }

    #[test]
    fn test_json_check_conditions() {
        let resp = |body: &str| Response {
            body: body.as_bytes().to_vec(),
            ..Response::default()
        };
        let jr = resp(r#"{"foo": 5, "bar": [1,2,3]}"#);

        let mut c = JsonCheck {
            element: "foo".into(),
            condition: Condition {
                equals: "5".into(),
                ..Condition::default()
            },
            ..JsonCheck::default()
        };
        c.prepare().unwrap();
        assert!(c.execute(&jr).is_ok());

        let mut c = JsonCheck {
            element: "bar.1".into(),
            condition: Condition {
                equals: "2".into(),
                ..Condition::default()
            },
            ..JsonCheck::default()
        };
        c.prepare().unwrap();
        assert!(c.execute(&jr).is_ok());

        // Strings keep their quotes in the raw fragment.
        let ar = resp(r#"["jo nesbo", "jo nesbo harry hole"]"#);
        let mut c = JsonCheck {
            element: "0".into(),
            condition: Condition {
                equals: "\"jo nesbo\"".into(),
                ..Condition::default()
            },
            ..JsonCheck::default()
        };
        c.prepare().unwrap();
        assert!(c.execute(&ar).is_ok());

        // Whole-document validation.
        let mut empty = JsonCheck::default();
        empty.prepare().unwrap();
        assert!(empty.execute(&jr).is_ok());
        assert!(empty.execute(&resp(r#"{"foo": 5, "blub"#)).is_err());
    }

    #[test]
    fn test_json_check_embedded() {
        let jrm = Response {
            body: br#""{\"foo\":5,\"bar\":[1,2,3]}""#.to_vec(),
            ..Response::default()
        };
        let mut c = JsonCheck {
            element: ".".into(),
            embedded: Some(Box::new(JsonCheck {
                element: "bar.1".into(),
                condition: Condition {
                    equals: "2".into(),
                    ..Condition::default()
                },
                ..JsonCheck::default()
            })),
            ..JsonCheck::default()
        };
        c.prepare().unwrap();
        assert!(c.execute(&jrm).is_ok());

        let mut wrong = JsonCheck {
            element: ".".into(),
            embedded: Some(Box::new(JsonCheck {
                element: "bar.1".into(),
                condition: Condition {
                    equals: "XX".into(),
                    ..Condition::default()
                },
                ..JsonCheck::default()
            })),
            ..JsonCheck::default()
        };
        wrong.prepare().unwrap();
        assert!(wrong.execute(&jrm).is_err());
    }

    fn expr_resp(body: &str) -> Response {
        Response {
            body: body.as_bytes().to_vec(),
            ..Response::default()
        }
    }

    fn run_expr(body: &str, expression: &str) -> Result<(), CheckError> {
        let mut c = JsonExpr {
            expression: expression.into(),
        };
        c.prepare()?;
        c.execute(&expr_resp(body))
    }

    #[test]
    fn test_json_expr_basic() {
        let jr = r#"{"foo": 5, "bar": [1,2,3]}"#;
        assert!(run_expr(jr, "(.foo == 5) && ($len(.bar)==3) && (.bar[1]==2)").is_ok());
        assert!(run_expr(jr, "$max(.bar) == 3").is_ok());
        assert!(run_expr(jr, "$min(.bar) == 1").is_ok());
        assert!(run_expr(jr, "$has(.bar, 2)").is_ok());
        assert!(run_expr(jr, "$has(.bar, 7)").is_err());
        assert!(run_expr(jr, ".foo == 3").is_err());
        assert!(run_expr(jr, "!(.foo == 3)").is_ok());
        assert!(run_expr(jr, ".foo != 3").is_ok());
        assert!(run_expr(jr, ".foo > 4 && .foo < 6").is_ok());
    }

    #[test]
    fn test_json_expr_whole_document_array() {
        let ar = r#"["jo nesbo",["a","b","c","d","e","f","jo nesbo pupspulver"],{},[]]"#;
        assert!(run_expr(ar, "$len(.) > 3").is_ok());
        assert!(run_expr(ar, "$len(.) == 4").is_ok());
        assert!(run_expr(ar, "$len(.) > 4").is_err());
        assert!(run_expr(ar, ".[0] == \"jo nesbo\"").is_ok());
        assert!(run_expr(ar, "$len(.[1]) == 7").is_ok());
        assert!(run_expr(ar, ".[1][6] == \"jo nesbo pupspulver\"").is_ok());
    }

    #[test]
    fn test_json_expr_match() {
        let doc = r#"{"uuid": "ad09b43c-6538-11e6-8b77-86f30ca893d3"}"#;
        assert!(run_expr(doc, "$match(\"^[0-9a-f-]+$\", .uuid)").is_ok());
        assert!(run_expr(doc, "$match(\"^xyz$\", .uuid)").is_err());
    }

    #[test]
    fn test_json_expr_malformed() {
        let mut empty = JsonExpr::default();
        assert!(matches!(empty.prepare(), Err(CheckError::Malformed(_))));

        let mut bad = JsonExpr {
            expression: ".foo ==".into(),
        };
        assert!(bad.prepare().is_err());

        // Non-boolean result is a configuration problem.
        assert!(matches!(
            run_expr(r#"{"foo": 5}"#, ".foo"),
            Err(CheckError::Malformed(_))
        ));
    }
}
