use std::str::FromStr;

use config::{Config, Environment};
use eyre::{eyre, Result, WrapErr};
use serde::de::DeserializeOwned;

/// Deserialize a raw settings struct from the process environment.
///
/// Field names correspond 1:1 with env var names (lowercased); every field
/// should be an `Option<String>` since env values are untyped.
pub fn fragment<T: DeserializeOwned>() -> Result<T> {
    let cfg = Config::builder()
        .add_source(Environment::default())
        .build()
        .wrap_err("reading environment")?;
    cfg.try_deserialize()
        .wrap_err("deserializing settings from environment")
}

/// Parse an optional env value, falling back to `default` when unset.
pub fn parse_opt<T: FromStr>(name: &str, value: Option<String>, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| eyre!("invalid {name}={raw}: {e}")),
        None => Ok(default),
    }
}

/// Parse a boolean env value (`1`/`true`/`yes` are true, `0`/`false`/`no`
/// false), falling back to `default` when unset.
pub fn parse_bool(name: &str, value: Option<String>, default: bool) -> Result<bool> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(eyre!("invalid {name}={other}: expected a boolean")),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_opt_applies_default_and_reports_the_variable() {
        assert_eq!(parse_opt("N", None, 7u32).unwrap(), 7);
        assert_eq!(parse_opt("N", Some(" 42 ".into()), 7u32).unwrap(), 42);
        let err = parse_opt("N", Some("x".into()), 7u32).unwrap_err();
        assert!(err.to_string().contains("N=x"));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("B", Some("1".into()), false).unwrap());
        assert!(parse_bool("B", Some("TRUE".into()), false).unwrap());
        assert!(!parse_bool("B", Some("off".into()), true).unwrap());
        assert!(parse_bool("B", None, true).unwrap());
        assert!(parse_bool("B", Some("maybe".into()), true).is_err());
    }
}
