//! convenience fns for reading env vars

use anyhow::Context;

use std::{env, str};

/// Returns the value of `name`, or `default` if unset, parsed as `T`. The
/// error names the variable.
pub fn parse_var_with_err<T, S>(name: &str, default: S) -> anyhow::Result<T>
where
    T: str::FromStr,
    <T as str::FromStr>::Err: std::error::Error + Send + Sync + 'static,
    S: ToString,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
        .with_context(|| format!("failed to parse env var {name}"))
}

/// Returns the trimmed value of `name` if it is set and not blank.
pub fn var_non_blank(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_with_err_default() {
        let v: u64 = parse_var_with_err("DEVPOOL_TEST_UNSET_VAR", 30).unwrap();
        assert_eq!(v, 30);
        let v: String = parse_var_with_err("DEVPOOL_TEST_UNSET_VAR", "standard").unwrap();
        assert_eq!(v, "standard");
    }

    #[test]
    fn test_var_non_blank_unset() {
        assert_eq!(var_non_blank("DEVPOOL_TEST_UNSET_VAR"), None);
    }
}
