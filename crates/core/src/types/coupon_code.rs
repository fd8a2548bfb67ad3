//! Coupon code type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`CouponCode`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CouponCodeError {
    /// The input is empty after trimming.
    #[error("coupon code cannot be empty")]
    Empty,
    /// The input is too long.
    #[error("coupon code must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The input contains a character outside `A-Z`, `0-9`, `-` and `_`.
    #[error("coupon code contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// A normalized coupon code.
///
/// Codes are matched case-insensitively, so parsing trims surrounding
/// whitespace and uppercases the input.
///
/// ## Constraints
///
/// - Length: 1-32 characters after trimming
/// - Characters: ASCII letters, digits, `-` and `_`
///
/// ## Examples
///
/// ```
/// use duka_core::CouponCode;
///
/// assert_eq!(CouponCode::parse(" save10 ").unwrap().as_str(), "SAVE10");
/// assert!(CouponCode::parse("").is_err());
/// assert!(CouponCode::parse("SAVE 10").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CouponCode(String);

impl CouponCode {
    /// Maximum length of a coupon code.
    pub const MAX_LENGTH: usize = 32;

    /// Parse a `CouponCode` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the trimmed input:
    /// - Is empty
    /// - Is longer than 32 characters
    /// - Contains characters other than letters, digits, `-` or `_`
    pub fn parse(s: &str) -> Result<Self, CouponCodeError> {
        let trimmed = s.trim();

        if trimmed.is_empty() {
            return Err(CouponCodeError::Empty);
        }

        if trimmed.chars().count() > Self::MAX_LENGTH {
            return Err(CouponCodeError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(CouponCodeError::InvalidCharacter(bad));
        }

        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `CouponCode` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CouponCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for CouponCode {
    type Err = CouponCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for CouponCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_case_and_whitespace() {
        let code = CouponCode::parse("  freeship\n").unwrap();
        assert_eq!(code.as_str(), "FREESHIP");
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(CouponCode::parse("   "), Err(CouponCodeError::Empty));
    }

    #[test]
    fn test_parse_too_long() {
        let long = "A".repeat(33);
        assert!(matches!(
            CouponCode::parse(&long),
            Err(CouponCodeError::TooLong { max: 32 })
        ));
    }

    #[test]
    fn test_parse_invalid_character() {
        assert_eq!(
            CouponCode::parse("SAVE%10"),
            Err(CouponCodeError::InvalidCharacter('%'))
        );
    }

    #[test]
    fn test_parse_allows_dash_and_underscore() {
        assert!(CouponCode::parse("black-friday_24").is_ok());
    }

    #[test]
    fn test_display() {
        let code = CouponCode::parse("save20").unwrap();
        assert_eq!(format!("{code}"), "SAVE20");
    }
}
