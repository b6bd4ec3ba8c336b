use std::collections::HashSet;

use super::alphabet::is_alphabet_symbol;
use crate::config::CodeConfig;
use crate::error::{Error, Result};

/// Codes that would shadow routes or read as system pages.
pub const DEFAULT_RESERVED_WORDS: &[&str] = &[
    "admin",
    "api",
    "app",
    "assets",
    "auth",
    "dashboard",
    "favicon.ico",
    "health",
    "help",
    "login",
    "logout",
    "metrics",
    "register",
    "robots.txt",
    "settings",
    "signup",
    "static",
    "status",
    "support",
    "www",
];

/// Shape and reserved-word rules for caller-supplied codes.
#[derive(Debug, Clone)]
pub struct CodePolicy {
    min_length: usize,
    max_length: usize,
    reserved: HashSet<String>,
}

impl CodePolicy {
    pub fn new(min_length: usize, max_length: usize, reserved: &[String]) -> Self {
        Self {
            min_length,
            max_length,
            reserved: reserved.iter().map(|w| w.to_ascii_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &CodeConfig) -> Self {
        Self::new(
            config.min_custom_length,
            config.max_custom_length,
            &config.reserved_words,
        )
    }

    /// Basic shape: symbols of the generated-code alphabet plus `-` and `_`,
    /// within the length bounds. Look-alikes such as `0`, `O`, `l`, `1` and
    /// `I` are rejected.
    pub fn check_shape(&self, code: &str) -> Result<()> {
        let len = code.chars().count();
        if len < self.min_length || len > self.max_length {
            return Err(Error::validation(format!(
                "short code must be {}-{} characters, got {len}",
                self.min_length, self.max_length
            )));
        }
        if let Some(bad) = code
            .chars()
            .find(|c| !(is_alphabet_symbol(*c) || *c == '-' || *c == '_'))
        {
            return Err(Error::validation(format!(
                "short code contains invalid character '{bad}'"
            )));
        }
        Ok(())
    }

    /// Shape plus reserved-word check. Existence is checked by the caller.
    pub fn check_custom(&self, code: &str) -> Result<()> {
        self.check_shape(code)?;
        if self.is_reserved(code) {
            return Err(Error::validation(format!("short code '{code}' is reserved")));
        }
        Ok(())
    }

    pub fn is_reserved(&self, code: &str) -> bool {
        self.reserved.contains(&code.to_ascii_lowercase())
    }
}

impl Default for CodePolicy {
    fn default() -> Self {
        Self::from_config(&CodeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_rules() {
        let policy = CodePolicy::default();
        assert!(policy.check_shape("abc234").is_ok());
        assert!(policy.check_shape("my-page_2").is_ok());
        assert!(policy.check_shape("ab").is_err());
        assert!(policy.check_shape(&"a".repeat(65)).is_err());
        assert!(policy.check_shape("has space").is_err());
        assert!(policy.check_shape("émoji").is_err());
        assert!(policy.check_shape("a/b/c").is_err());
    }

    #[test]
    fn test_look_alike_symbols_rejected() {
        let policy = CodePolicy::default();
        for code in ["O0l1I", "abc0", "abcO", "abcl", "abc1", "abcI", "hello"] {
            assert!(policy.check_shape(code).is_err(), "{code} should be rejected");
        }
    }

    #[test]
    fn test_reserved_words_are_case_insensitive() {
        let policy = CodePolicy::default();
        assert!(policy.check_custom("Admin").is_err());
        assert!(policy.check_custom("STATUS").is_err());
        assert!(policy.check_custom("summer").is_ok());
    }

    #[test]
    fn test_custom_reserved_list() {
        let policy = CodePolicy::new(3, 10, &["promo".to_string()]);
        assert!(policy.is_reserved("PROMO"));
        assert!(!policy.is_reserved("admin"));
    }
}
