//! Small shared helpers.

use std::time::Duration;

/// Parses a duration string in the format "250ms", "3s", "2m", "1h", "1d".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("duration string cannot be empty".to_string());
    }

    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let (value_str, unit): (&str, &str) = if let Some(v) = s.strip_suffix("ms") {
        (v, "ms")
    } else if let Some(v) = s.strip_suffix('s') {
        (v, "s")
    } else if let Some(v) = s.strip_suffix('m') {
        (v, "m")
    } else if let Some(v) = s.strip_suffix('h') {
        (v, "h")
    } else if let Some(v) = s.strip_suffix('d') {
        (v, "d")
    } else {
        return Err(format!(
            "unknown duration unit in '{}'; use ms, s, m, h or d",
            s
        ));
    };

    let value: f64 = value_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid numeric value in duration: '{}'", value_str))?;
    if value < 0.0 {
        return Err(format!("negative duration: '{}'", s));
    }

    let millis = match unit {
        "ms" => value,
        "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        "d" => value * 86_400_000.0,
        _ => unreachable!(),
    };

    Ok(Duration::from_millis(millis.round() as u64))
}

/// Renders a duration in the same unit family parse_duration accepts.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        "0s".to_string()
    } else if ms % 1000 != 0 {
        format!("{}ms", ms)
    } else {
        format!("{}s", ms / 1000)
    }
}

/// Serde adapter for `Duration` fields written as "3s"/"250ms" strings
/// (or plain seconds).
pub mod duration_serde {
    use super::{format_duration, parse_duration};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Seconds(n) => Ok(Duration::from_secs(n)),
            Repr::Text(t) => parse_duration(&t).map_err(D::Error::custom),
        }
    }
}

/// Like [`duration_serde`] for optional fields.
pub mod opt_duration_serde {
    use super::{format_duration, parse_duration};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&format_duration(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let repr = Option::<Repr>::deserialize(d)?;
        match repr {
            None => Ok(None),
            Some(Repr::Seconds(n)) => Ok(Some(Duration::from_secs(n))),
            Some(Repr::Text(t)) => parse_duration(&t).map(Some).map_err(D::Error::custom),
        }
    }
}
