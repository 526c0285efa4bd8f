//! Reusable text predicates.
//!
//! A [`Condition`] is a conjunction of simple tests against a string:
//! prefix, suffix, containment, equality, regular expression matching and
//! length bounds. Conditions are embedded in several checks (Body, Header,
//! JSON, XML, SetCookie) and share their counting semantics.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors naming the violated clause of a condition.
#[derive(Error, Debug)]
pub enum ConditionError {
    #[error("bad prefix, got {0:?}")]
    BadPrefix(String),

    #[error("bad suffix, got {0:?}")]
    BadSuffix(String),

    #[error("not equal, got {0:?}")]
    NotEqual(String),

    #[error("missing text")]
    MissingText,

    #[error("forbidden text")]
    ForbiddenText,

    #[error("found {found} occurrences, want {want}")]
    WrongTextCount { found: usize, want: i64 },

    #[error("missing match")]
    MissingMatch,

    #[error("forbidden match")]
    ForbiddenMatch,

    #[error("found {found} matches, want {want}")]
    WrongMatchCount { found: usize, want: i64 },

    #[error("too short, was {0}")]
    TooShort(usize),

    #[error("too long, was {0}")]
    TooLong(usize),

    #[error("invalid regexp: {0}")]
    BadRegexp(#[from] regex::Error),
}

/// A conjunction of tests against a string.
///
/// `Count` applies to both `Contains` and `Regexp`: 0 means any positive
/// number of occurrences, a positive value requires exactly that many and
/// a negative value forbids any occurrence. `Min`/`Max` bound the byte
/// length of the subject; a zero value disables the respective bound.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Condition {
    /// Required prefix.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub prefix: String,

    /// Required suffix.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub suffix: String,

    /// The whole subject must equal this value.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub equals: String,

    /// Text that must (or, with a negative count, must not) occur.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub contains: String,

    /// Regular expression to look for.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub regexp: String,

    /// Occurrence count for Contains and Regexp.
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub count: i64,

    /// Minimum byte length, 0 disables.
    #[serde(skip_serializing_if = "is_zero_usize")]
    pub min: usize,

    /// Maximum byte length, 0 disables.
    #[serde(skip_serializing_if = "is_zero_usize")]
    pub max: usize,

    #[serde(skip)]
    pub(crate) re: Option<Regex>,
}

fn is_zero_i64(n: &i64) -> bool {
    *n == 0
}

fn is_zero_usize(n: &usize) -> bool {
    *n == 0
}

impl Condition {
    /// Compile the regular expression. Idempotent.
    pub fn compile(&mut self) -> Result<(), ConditionError> {
        if !self.regexp.is_empty() && self.re.is_none() {
            self.re = Some(Regex::new(&self.regexp)?);
        }
        Ok(())
    }

    /// True if no clause is configured at all.
    pub fn is_empty(&self) -> bool {
        self.prefix.is_empty()
            && self.suffix.is_empty()
            && self.equals.is_empty()
            && self.contains.is_empty()
            && self.regexp.is_empty()
            && self.min == 0
            && self.max == 0
    }

    /// Check whether `s` satisfies all configured clauses.
    pub fn fulfilled(&self, s: &str) -> Result<(), ConditionError> {
        if !self.prefix.is_empty() && !s.starts_with(&self.prefix) {
            let n = self.prefix.len().min(s.len());
            return Err(ConditionError::BadPrefix(clip(s, 0, n)));
        }

        if !self.suffix.is_empty() && !s.ends_with(&self.suffix) {
            let n = self.suffix.len().min(s.len());
            return Err(ConditionError::BadSuffix(clip(s, s.len() - n, s.len())));
        }

        if !self.equals.is_empty() && s != self.equals {
            return Err(ConditionError::NotEqual(clip(s, 0, s.len().min(40))));
        }

        if !self.contains.is_empty() {
            let cnt = s.matches(&self.contains).count();
            if self.count == 0 && cnt == 0 {
                return Err(ConditionError::MissingText);
            } else if self.count < 0 && cnt > 0 {
                return Err(ConditionError::ForbiddenText);
            } else if self.count > 0 && cnt as i64 != self.count {
                return Err(ConditionError::WrongTextCount {
                    found: cnt,
                    want: self.count,
                });
            }
        }

        if !self.regexp.is_empty() {
            // Fall back to an ad-hoc compile if prepare was skipped.
            let owned;
            let re = match &self.re {
                Some(re) => re,
                None => {
                    owned = Regex::new(&self.regexp)?;
                    &owned
                }
            };
            let cnt = re.find_iter(s).count();
            if self.count == 0 && cnt == 0 {
                return Err(ConditionError::MissingMatch);
            } else if self.count < 0 && cnt > 0 {
                return Err(ConditionError::ForbiddenMatch);
            } else if self.count > 0 && cnt as i64 != self.count {
                return Err(ConditionError::WrongMatchCount {
                    found: cnt,
                    want: self.count,
                });
            }
        }

        if self.min > 0 && s.len() < self.min {
            return Err(ConditionError::TooShort(s.len()));
        }

        if self.max > 0 && s.len() > self.max {
            return Err(ConditionError::TooLong(s.len()));
        }

        Ok(())
    }

    /// Like [`fulfilled`](Self::fulfilled) for raw bytes.
    pub fn fulfilled_bytes(&self, b: &[u8]) -> Result<(), ConditionError> {
        self.fulfilled(&String::from_utf8_lossy(b))
    }
}

// Clip to char boundaries so error messages never panic on multi-byte input.
fn clip(s: &str, from: usize, to: usize) -> String {
    let mut from = from;
    while from > 0 && !s.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = to;
    while to < s.len() && !s.is_char_boundary(to) {
        to += 1;
    }
    s[from..to].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond() -> Condition {
        Condition::default()
    }

    #[test]
    fn test_prefix_suffix() {
        let c = Condition {
            prefix: "Hello".into(),
            suffix: "!".into(),
            ..cond()
        };
        assert!(c.fulfilled("Hello World!").is_ok());
        assert!(matches!(
            c.fulfilled("Goodbye World!"),
            Err(ConditionError::BadPrefix(_))
        ));
        assert!(matches!(
            c.fulfilled("Hello World"),
            Err(ConditionError::BadSuffix(_))
        ));
    }

    #[test]
    fn test_equals() {
        let c = Condition {
            equals: "42".into(),
            ..cond()
        };
        assert!(c.fulfilled("42").is_ok());
        assert!(c.fulfilled("43").is_err());
    }

    #[test]
    fn test_contains_count_semantics() {
        let body = "foo bar baz foo foo";

        let any = Condition {
            contains: "foo".into(),
            ..cond()
        };
        assert!(any.fulfilled(body).is_ok());

        let exact = Condition {
            contains: "foo".into(),
            count: 3,
            ..cond()
        };
        assert!(exact.fulfilled(body).is_ok());

        let wrong = Condition {
            contains: "foo".into(),
            count: 2,
            ..cond()
        };
        assert!(matches!(
            wrong.fulfilled(body),
            Err(ConditionError::WrongTextCount { found: 3, want: 2 })
        ));

        let forbidden = Condition {
            contains: "bar".into(),
            count: -1,
            ..cond()
        };
        assert!(matches!(
            forbidden.fulfilled(body),
            Err(ConditionError::ForbiddenText)
        ));

        let absent_forbidden = Condition {
            contains: "wup".into(),
            count: -1,
            ..cond()
        };
        assert!(absent_forbidden.fulfilled(body).is_ok());
    }

    #[test]
    fn test_regexp_count_semantics() {
        let mut c = Condition {
            regexp: "fo+".into(),
            count: 3,
            ..cond()
        };
        c.compile().unwrap();
        assert!(c.fulfilled("foo fo foooo").is_ok());
        assert!(c.fulfilled("foo fo").is_err());

        let mut neg = Condition {
            regexp: "[0-9]+".into(),
            count: -1,
            ..cond()
        };
        neg.compile().unwrap();
        assert!(neg.fulfilled("no digits here").is_ok());
        assert!(matches!(
            neg.fulfilled("route 66"),
            Err(ConditionError::ForbiddenMatch)
        ));
    }

    #[test]
    fn test_length_bounds() {
        let c = Condition {
            min: 3,
            max: 5,
            ..cond()
        };
        assert!(c.fulfilled("abc").is_ok());
        assert!(c.fulfilled("abcde").is_ok());
        assert!(matches!(c.fulfilled("ab"), Err(ConditionError::TooShort(2))));
        assert!(matches!(
            c.fulfilled("abcdef"),
            Err(ConditionError::TooLong(6))
        ));
    }

    #[test]
    fn test_compile_rejects_bad_regexp() {
        let mut c = Condition {
            regexp: "(unclosed".into(),
            ..cond()
        };
        assert!(c.compile().is_err());
    }

    #[test]
    fn test_idempotence() {
        let mut c = Condition {
            regexp: "a+".into(),
            ..cond()
        };
        c.compile().unwrap();
        c.compile().unwrap();
        assert!(c.fulfilled("aaa").is_ok());
        assert!(c.fulfilled("aaa").is_ok());
    }

    #[test]
    fn test_serde_roundtrip() {
        let c = Condition {
            contains: "foo".into(),
            count: 2,
            min: 1,
            ..cond()
        };
        let json = serde_json::to_string(&c).unwrap();
        let back: Condition = serde_json::from_str(&json).unwrap();
        assert_eq!(back.contains, "foo");
        assert_eq!(back.count, 2);
        assert_eq!(back.min, 1);
    }
}
