//! Field validators and the runtime helpers they rely on.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use regex::Regex;

use crate::value::Value;

/// Thread-safe regex cache for compiled patterns.
///
/// Patterns are compiled lazily on first use and cached for the lifetime
/// of the program.
struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(pattern)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(RegexCache::new)
}

/// Check if a string matches a regex pattern.
///
/// An invalid pattern never matches; the problem is logged instead of
/// surfacing as a panic in the middle of a save.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid regex pattern in validation, treating as non-match"
            );
            false
        }
    }
}

/// Validate a regex pattern up front, e.g. while building a mapper.
///
/// Returns an error message if the pattern is invalid, None if valid.
pub fn validate_pattern(pattern: &str) -> Option<String> {
    match Regex::new(pattern) {
        Ok(_) => None,
        Err(e) => Some(format!("invalid regex pattern: {e}")),
    }
}

type CustomCheck = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// One validation unit attached to a field.
///
/// Every validator except [`Validator::Required`] accepts NULL; nullability
/// is the business of `Required` alone.
#[derive(Clone)]
pub enum Validator {
    /// Value must not be NULL.
    Required,
    /// Text length (in characters) or blob length must not exceed the limit.
    MaxLength(usize),
    /// Text must match the regular expression.
    Pattern(String),
    /// Numeric value must fall within the inclusive bounds.
    Range { min: Option<f64>, max: Option<f64> },
    /// Arbitrary predicate returning a human-readable message on failure.
    Custom(CustomCheck),
}

impl Validator {
    pub fn custom<F>(check: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        Validator::Custom(Arc::new(check))
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Validator::Pattern(pattern.into())
    }

    pub fn range(min: Option<f64>, max: Option<f64>) -> Self {
        Validator::Range { min, max }
    }

    /// Run the check, returning the failure message.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            Validator::Required => {
                if value.is_null() {
                    return Err("This field is required.".to_string());
                }
            }
            Validator::MaxLength(max) => {
                if let Some(len) = value.len_for_validation() {
                    if len > *max {
                        return Err(format!(
                            "Ensure this value has at most {max} characters (it has {len})."
                        ));
                    }
                }
            }
            Validator::Pattern(pattern) => {
                if let Some(s) = value.as_str() {
                    if !matches_pattern(s, pattern) {
                        return Err("Enter a valid value.".to_string());
                    }
                }
            }
            Validator::Range { min, max } => {
                if let Some(n) = value.as_f64() {
                    if min.is_some_and(|m| n < m) {
                        return Err(format!(
                            "Ensure this value is greater than or equal to {}.",
                            min.unwrap_or_default()
                        ));
                    }
                    if max.is_some_and(|m| n > m) {
                        return Err(format!(
                            "Ensure this value is less than or equal to {}.",
                            max.unwrap_or_default()
                        ));
                    }
                }
            }
            Validator::Custom(check) => check(value)?,
        }
        Ok(())
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::Required => f.write_str("Required"),
            Validator::MaxLength(n) => f.debug_tuple("MaxLength").field(n).finish(),
            Validator::Pattern(p) => f.debug_tuple("Pattern").field(p).finish(),
            Validator::Range { min, max } => f
                .debug_struct("Range")
                .field("min", min)
                .field("max", max)
                .finish(),
            Validator::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_email_pattern() {
        let email_pattern = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";

        assert!(matches_pattern("test@example.com", email_pattern));
        assert!(matches_pattern("user.name+tag@domain.org", email_pattern));
        assert!(!matches_pattern("invalid", email_pattern));
        assert!(!matches_pattern("@example.com", email_pattern));
    }

    #[test]
    fn test_invalid_pattern_returns_false() {
        assert!(!matches_pattern("anything", r"[unclosed"));
    }

    #[test]
    fn test_validate_pattern() {
        assert!(validate_pattern(r"^[a-z]+$").is_none());
        let result = validate_pattern(r"[unclosed");
        assert!(result.is_some_and(|m| m.contains("invalid regex pattern")));
    }

    #[test]
    fn test_required() {
        assert!(Validator::Required.check(&Value::Null).is_err());
        assert!(Validator::Required.check(&Value::Int(0)).is_ok());
    }

    #[test]
    fn test_max_length_skips_null() {
        let v = Validator::MaxLength(3);
        assert!(v.check(&Value::Null).is_ok());
        assert!(v.check(&Value::from("abc")).is_ok());
        assert!(v.check(&Value::from("abcd")).is_err());
    }

    #[test]
    fn test_pattern_validator() {
        let v = Validator::pattern(r"^[a-z]{2}$");
        assert!(v.check(&Value::from("en")).is_ok());
        assert!(v.check(&Value::from("english")).is_err());
    }

    #[test]
    fn test_range_validator() {
        let v = Validator::range(Some(0.0), Some(10.0));
        assert!(v.check(&Value::Int(5)).is_ok());
        assert!(v.check(&Value::Int(-1)).is_err());
        assert!(v.check(&Value::Float(10.5)).is_err());
    }

    #[test]
    fn test_custom_validator() {
        let v = Validator::custom(|value| match value.as_i64() {
            Some(n) if n % 2 == 0 => Ok(()),
            _ => Err("must be even".to_string()),
        });
        assert!(v.check(&Value::Int(4)).is_ok());
        assert_eq!(v.check(&Value::Int(3)), Err("must be even".to_string()));
    }
}
