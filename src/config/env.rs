//! Typed environment lookup.
//!
//! Unset keys and unparsable values fall back to the caller's default.
//! Lookups go through a closure so tests can feed a map instead of
//! mutating the process environment.

use std::collections::HashMap;
use std::str::FromStr;

pub struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }

    /// Raw value, `None` when unset or empty.
    pub fn opt_string(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    pub fn string(&self, key: &str, default: &str) -> String {
        self.opt_string(key).unwrap_or_else(|| default.to_string())
    }

    pub fn opt_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.opt_string(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn parsed<T: FromStr>(&self, key: &str, default: T) -> T {
        self.opt_parsed(key).unwrap_or(default)
    }

    /// `true|1|yes|on` (any case) are true; anything else set is false.
    pub fn flag(&self, key: &str, default: bool) -> bool {
        match self.opt_string(key) {
            Some(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"),
            None => default,
        }
    }
}

/// Reader over the live process environment.
pub fn process_env() -> EnvReader<impl Fn(&str) -> Option<String>> {
    EnvReader::new(|k: &str| std::env::var(k).ok())
}

/// Reader over a fixed map.
pub fn map_env(map: HashMap<String, String>) -> EnvReader<impl Fn(&str) -> Option<String>> {
    EnvReader::new(move |k: &str| map.get(k).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(pairs: &[(&str, &str)]) -> EnvReader<impl Fn(&str) -> Option<String>> {
        map_env(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn unset_returns_default() {
        let env = reader(&[]);
        assert_eq!(env.string("AWS_REGION", "us-east-1"), "us-east-1");
        assert_eq!(env.parsed("BEDROCK_MAX_TOKENS", 4096u32), 4096);
        assert!(env.flag("ENABLE_X", true));
    }

    #[test]
    fn unparsable_number_returns_default() {
        let env = reader(&[("BEDROCK_MAX_TOKENS", "lots"), ("BEDROCK_TEMPERATURE", "hot")]);
        assert_eq!(env.parsed("BEDROCK_MAX_TOKENS", 4096u32), 4096);
        assert_eq!(env.parsed("BEDROCK_TEMPERATURE", 0.7f64), 0.7);
    }

    #[test]
    fn parses_numbers_with_whitespace() {
        let env = reader(&[("BEDROCK_TOP_K", " 40 ")]);
        assert_eq!(env.parsed("BEDROCK_TOP_K", 250u32), 40);
    }

    #[test]
    fn flag_truthy_values() {
        for v in ["true", "TRUE", "1", "yes", "On"] {
            let pairs = [("F", v)];
            let env = reader(&pairs);
            assert!(env.flag("F", false), "{v} should be true");
        }
        for v in ["false", "0", "no", "maybe"] {
            let pairs = [("F", v)];
            let env = reader(&pairs);
            assert!(!env.flag("F", true), "{v} should be false");
        }
    }

    #[test]
    fn empty_is_unset() {
        let env = reader(&[("AWS_PROFILE", "")]);
        assert_eq!(env.opt_string("AWS_PROFILE"), None);
    }
}
