use anyhow::{bail, Result};
use std::env;

/// Expands `${VAR}` references using the process environment
///
/// Used on `werk.toml` before it is parsed.
///
/// ```
/// # std::env::set_var("WERK_DOC_REGISTRY", "quay.io/jetstack");
/// let input = r#"registry = "${WERK_DOC_REGISTRY}"
/// jobs = ${WERK_DOC_JOBS:-4}
/// price = "$$5""#;
/// let result = werk::config_expansion::expand_env_vars(input).unwrap();
/// assert!(result.contains(r#"registry = "quay.io/jetstack""#));
/// assert!(result.contains("jobs = 4"));
/// assert!(result.contains(r#"price = "$5""#));
/// ```
pub fn expand_env_vars(content: &str) -> Result<String> {
    expand_vars(content, |name| env::var(name).ok())
}

/// Expands variable references using `lookup`
///
/// Supports:
/// - `${VAR}` - required variable (error if `lookup` has no value)
/// - `${VAR:-default}` - fallback when the variable is unset
/// - `$$` - literal dollar sign
///
/// A `$` not followed by `{` or `$` is kept as is.
pub fn expand_vars<F>(content: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();

                let mut expr = String::new();
                let mut depth = 1;
                let mut closed = false;
                for ch in chars.by_ref() {
                    match ch {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                closed = true;
                                break;
                            }
                        }
                        _ => {}
                    }
                    expr.push(ch);
                }

                if !closed {
                    bail!("Unterminated variable reference '${{{}'", expr);
                }

                let (name, default) = match expr.split_once(":-") {
                    Some((name, default)) => (name, Some(default)),
                    None => (expr.as_str(), None),
                };

                match (lookup(name), default) {
                    (Some(value), _) => result.push_str(&value),
                    (None, Some(default)) => result.push_str(default),
                    (None, None) => bail!(
                        "Variable '{}' is required but not set. \
                         Use ${{{}:-default}} to provide a default value.",
                        name,
                        name
                    ),
                }
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_expand_with_lookup() {
        let output = expand_vars(
            "image ${registry}/trust-manager:${tag}",
            lookup(&[("registry", "quay.io/jetstack"), ("tag", "v0.9.0")]),
        )
        .unwrap();
        assert_eq!(output, "image quay.io/jetstack/trust-manager:v0.9.0");
    }

    #[test]
    fn test_default_used_when_unset() {
        let output = expand_vars("${platforms:-linux/amd64}", lookup(&[])).unwrap();
        assert_eq!(output, "linux/amd64");
    }

    #[test]
    fn test_value_wins_over_default() {
        let output = expand_vars("${tag:-latest}", lookup(&[("tag", "v1")])).unwrap();
        assert_eq!(output, "v1");
    }

    #[test]
    fn test_escaped_and_bare_dollar() {
        let output = expand_vars("$$HOME costs $5", lookup(&[])).unwrap();
        assert_eq!(output, "$HOME costs $5");
    }

    #[test]
    fn test_missing_required_var() {
        let err = expand_vars("${registry}", lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("Variable 'registry' is required"));
    }

    #[test]
    fn test_unterminated_reference() {
        assert!(expand_vars("${registry", lookup(&[])).is_err());
    }

    #[test]
    fn test_nested_braces_in_default() {
        let output = expand_vars(r#"${MISSING:-{"a": 1}}"#, lookup(&[])).unwrap();
        assert_eq!(output, r#"{"a": 1}"#);
    }

    #[test]
    #[serial]
    fn test_expand_env_vars() {
        env::set_var("WERK_TEST_JOBS", "8");
        let output = expand_env_vars("jobs = ${WERK_TEST_JOBS}").unwrap();
        assert_eq!(output, "jobs = 8");
        env::remove_var("WERK_TEST_JOBS");
    }
}
