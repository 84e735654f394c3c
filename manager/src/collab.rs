//! Interfaces of the checking helpers that problem logic may call.
//!
//! Token parsing and output comparison are not part of the pipe protocol;
//! the manager only consumes them through these traits. The bundled
//! implementations are deliberately minimal.

use std::collections::{HashMap, VecDeque};

use crate::error::CheckError;

/// Sequential access to input tokens with automatic bound checks.
pub trait TokenService {
    /// Next raw token; `name` is only used in error messages.
    fn next_token(&mut self, name: &str) -> Result<String, CheckError>;

    /// Next token as an integer, checked against the bound registered for `name`.
    fn parse_and_auto_check(&mut self, name: &str) -> Result<i64, CheckError>;
}

/// Decides whether a contestant's output matches the reference.
pub trait OutputComparator {
    fn compare(&self, contestant: &str, reference: &str) -> bool;
}

/// Whitespace-separated tokens held in memory.
#[derive(Debug, Clone, Default)]
pub struct WhitespaceTokens {
    tokens: VecDeque<String>,
    bounds: HashMap<String, (i64, i64)>,
}

impl WhitespaceTokens {
    pub fn new(text: &str) -> Self {
        Self {
            tokens: text.split_whitespace().map(str::to_string).collect(),
            bounds: HashMap::new(),
        }
    }

    /// Register an inclusive bound for values parsed under `name`.
    pub fn bound(mut self, name: &str, low: i64, high: i64) -> Self {
        self.bounds.insert(name.to_string(), (low, high));
        self
    }

    pub fn remaining(&self) -> usize {
        self.tokens.len()
    }
}

impl TokenService for WhitespaceTokens {
    fn next_token(&mut self, name: &str) -> Result<String, CheckError> {
        self.tokens
            .pop_front()
            .ok_or_else(|| CheckError::Missing(name.to_string()))
    }

    fn parse_and_auto_check(&mut self, name: &str) -> Result<i64, CheckError> {
        let raw = self.next_token(name)?;
        let value: i64 = raw.parse().map_err(|_| CheckError::NotInteger {
            name: name.to_string(),
            value: raw.clone(),
        })?;
        if let Some(&(low, high)) = self.bounds.get(name)
            && !(low..=high).contains(&value)
        {
            return Err(CheckError::OutOfBounds {
                name: name.to_string(),
                value,
                low,
                high,
            });
        }
        Ok(value)
    }
}

/// Equal after trimming trailing whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl OutputComparator for ExactMatch {
    fn compare(&self, contestant: &str, reference: &str) -> bool {
        contestant.trim_end() == reference.trim_end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_in_order_with_bounds() {
        let mut tokens = WhitespaceTokens::new("3\n a  b\tc\n").bound("q", 1, 10);
        assert_eq!(tokens.parse_and_auto_check("q").expect("q"), 3);
        assert_eq!(tokens.next_token("query").expect("a"), "a");
        assert_eq!(tokens.remaining(), 2);
    }

    #[test]
    fn bound_violation_is_reported() {
        let mut tokens = WhitespaceTokens::new("11").bound("q", 1, 10);
        let err = tokens.parse_and_auto_check("q").unwrap_err();
        assert!(matches!(err, CheckError::OutOfBounds { value: 11, .. }));
    }

    #[test]
    fn non_integer_and_missing_tokens() {
        let mut tokens = WhitespaceTokens::new("x");
        assert!(matches!(
            tokens.parse_and_auto_check("q"),
            Err(CheckError::NotInteger { .. })
        ));
        assert!(matches!(tokens.next_token("q"), Err(CheckError::Missing(_))));
    }

    #[test]
    fn exact_match_ignores_trailing_whitespace() {
        assert!(ExactMatch.compare("abc \r", "abc"));
        assert!(!ExactMatch.compare(" abc", "abc"));
    }
}
