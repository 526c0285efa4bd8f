//! Layered variable scopes and `{{NAME}}` substitution.
//!
//! Scopes are plain name-to-value maps layered at construction time: the
//! outer scope wins over inner defaults. A [`Replacer`] is compiled once
//! per element from the effective scope and applied to all string fields;
//! keys of the form `#123` denote integer substitutions.

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use thiserror::Error;

/// Name-to-value mapping.
pub type Variables = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("bad integer substitution {key:?}: {reason}")]
    BadIntSubstitution { key: String, reason: String },

    #[error("bad now-variable delta unit {0:?}")]
    BadNowUnit(char),

    #[error("unparsable special variable {0:?}")]
    BadSpecial(String),
}

/// Default layout for `{{NOW}}`, an RFC 1123 timestamp in UTC.
pub const DEFAULT_NOW_LAYOUT: &str = "%a, %d %b %Y %H:%M:%S UTC";

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// The next value of the global COUNTER auto-variable.
pub fn next_counter() -> u64 {
    COUNTER.fetch_add(1, Ordering::Relaxed) + 1
}

/// A fresh value for the RANDOM auto-variable: eight decimal digits.
pub fn random_value() -> String {
    format!("{:08}", rand::thread_rng().gen_range(0..100_000_000u64))
}

/// Build a new scope: `inner` provides defaults, `outer` overrides them.
/// With `auto` set, the COUNTER and RANDOM variables are generated unless
/// already bound.
pub fn new_scope(outer: &Variables, inner: &Variables, auto: bool) -> Variables {
    let mut scope = inner.clone();
    for (k, v) in outer {
        scope.insert(k.clone(), v.clone());
    }
    if auto {
        scope
            .entry("COUNTER".to_string())
            .or_insert_with(|| next_counter().to_string());
        scope
            .entry("RANDOM".to_string())
            .or_insert_with(random_value);
    }
    scope
}

/// Compiled substitution: string pairs plus integer replacements.
#[derive(Debug, Clone, Default)]
pub struct Replacer {
    pairs: Vec<(String, String)>,
    ints: BTreeMap<i64, i64>,
}

impl Replacer {
    /// Apply all string substitutions to `s`.
    pub fn replace(&self, s: &str) -> String {
        let mut out = s.to_string();
        for (from, to) in &self.pairs {
            if out.contains(from.as_str()) {
                out = out.replace(from.as_str(), to);
            }
        }
        out
    }

    /// Apply integer substitutions to `i`.
    pub fn replace_int(&self, i: i64) -> i64 {
        self.ints.get(&i).copied().unwrap_or(i)
    }
}

/// Compile a replacer from a variable mapping. A key of the form `#123`
/// is an integer substitution; any other key `K` substitutes `{{K}}`.
pub fn new_replacer(vars: &Variables) -> Result<Replacer, ScopeError> {
    let mut pairs = Vec::with_capacity(vars.len());
    let mut ints = BTreeMap::new();
    for (k, v) in vars {
        if let Some(num) = k.strip_prefix('#') {
            let from: i64 = num.parse().map_err(|e: std::num::ParseIntError| {
                ScopeError::BadIntSubstitution {
                    key: k.clone(),
                    reason: e.to_string(),
                }
            })?;
            let to: i64 =
                v.parse()
                    .map_err(|e: std::num::ParseIntError| ScopeError::BadIntSubstitution {
                        key: k.clone(),
                        reason: e.to_string(),
                    })?;
            ints.insert(from, to);
        } else {
            pairs.push((format!("{{{{{}}}}}", k), v.clone()));
        }
    }
    // Longer names first so FOOBAR is replaced before FOO.
    pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(&b.0)));
    Ok(Replacer { pairs, ints })
}

// ---------------------------------------------------------------------------
// Special variables

fn now_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{\{NOW *(?:([+-]) *([0-9]+)([smhd]))? *(?:\| *"([^"]*)")?\}\}"#)
            .expect("static regex")
    })
}

fn random_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{RANDOM\}\}").expect("static regex"))
}

/// Collect all occurrences of `{{NOW ...}}` and `{{RANDOM}}` in `s`.
pub fn add_special_variables(s: &str, set: &mut BTreeSet<String>) {
    for m in now_re().find_iter(s) {
        set.insert(m.as_str().to_string());
    }
    for m in random_re().find_iter(s) {
        set.insert(m.as_str().to_string());
    }
}

/// Produce values for all special-variable occurrences, keyed by the
/// variable name (the occurrence without its surrounding braces).
pub fn special_variables(
    now: DateTime<Utc>,
    names: &BTreeSet<String>,
) -> Result<Variables, ScopeError> {
    let mut vars = Variables::new();
    for occurrence in names {
        let key = occurrence
            .strip_prefix("{{")
            .and_then(|s| s.strip_suffix("}}"))
            .ok_or_else(|| ScopeError::BadSpecial(occurrence.clone()))?
            .to_string();
        if vars.contains_key(&key) {
            continue;
        }
        if occurrence.starts_with("{{NOW") {
            vars.insert(key, now_variable(now, occurrence)?);
        } else {
            vars.insert(key, random_value());
        }
    }
    Ok(vars)
}

// Interpret one {{NOW ...}} occurrence.
fn now_variable(now: DateTime<Utc>, occurrence: &str) -> Result<String, ScopeError> {
    let caps = now_re()
        .captures(occurrence)
        .ok_or_else(|| ScopeError::BadSpecial(occurrence.to_string()))?;

    let mut t = now;
    if let (Some(sign), Some(num), Some(unit)) = (caps.get(1), caps.get(2), caps.get(3)) {
        let n: i64 = num
            .as_str()
            .parse()
            .map_err(|_| ScopeError::BadSpecial(occurrence.to_string()))?;
        let n = if sign.as_str() == "-" { -n } else { n };
        let unit_char = unit.as_str().chars().next().unwrap_or('s');
        let seconds = match unit_char {
            's' => n,
            'm' => n * 60,
            'h' => n * 3600,
            'd' => n * 86_400,
            other => return Err(ScopeError::BadNowUnit(other)),
        };
        t += chrono::Duration::seconds(seconds);
    }

    let layout = caps
        .get(4)
        .map(|m| m.as_str())
        .filter(|l| !l.is_empty())
        .unwrap_or(DEFAULT_NOW_LAYOUT);
    Ok(t.format(layout).to_string())
}
