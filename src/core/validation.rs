//! Validation for directory entry names
//!
//! Entry names are stored as UTF-16 in a 64-byte slot, so they are limited
//! to 31 code units plus a terminator.

use crate::error::{CompoundError, Result};
use regex::Regex;

/// A validated storage or stream name, kept in its on-disk UTF-16 form
///
/// # Rules
/// - 1 to 31 UTF-16 code units
/// - None of `\`, `/`, `:` or `!`
///
/// # Examples
///
/// ```
/// use compound_rs::core::validation::EntryName;
///
/// let name = EntryName::new("Workbook").unwrap();
/// assert_eq!(name.as_units().len(), 8);
///
/// assert!(EntryName::new("a/b").is_err());
/// assert!(EntryName::new("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryName(Vec<u16>);

impl EntryName {
    /// Characters that may not appear in a name
    const FORBIDDEN: &'static str = r"[\\/:!]";

    /// Maximum length in UTF-16 code units
    pub const MAX_LENGTH: usize = 31;

    pub fn new(name: &str) -> Result<Self> {
        Self::validate(name)?;
        Ok(EntryName(name.encode_utf16().collect()))
    }

    fn validate(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(CompoundError::InvalidName(
                "name cannot be empty".to_string(),
            ));
        }

        let units = name.encode_utf16().count();
        if units > Self::MAX_LENGTH {
            return Err(CompoundError::InvalidName(format!(
                "'{}' is {} UTF-16 units long (max {})",
                name,
                units,
                Self::MAX_LENGTH
            )));
        }

        let re = Regex::new(Self::FORBIDDEN)
            .map_err(|e| CompoundError::InvalidName(e.to_string()))?;
        if re.is_match(name) {
            return Err(CompoundError::InvalidName(format!(
                "'{}' contains one of \\ / : !",
                name
            )));
        }

        Ok(())
    }

    pub fn as_units(&self) -> &[u16] {
        &self.0
    }

    pub fn into_units(self) -> Vec<u16> {
        self.0
    }
}

impl std::fmt::Display for EntryName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf16_lossy(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(EntryName::new("Workbook").is_ok());
        assert!(EntryName::new("\u{5}SummaryInformation").is_ok());
        assert!(EntryName::new("Root Entry").is_ok());
        assert!(EntryName::new(&"x".repeat(31)).is_ok());
    }

    #[test]
    fn test_forbidden_characters() {
        for name in ["a\\b", "a/b", "C:", "Hi!"] {
            let err = EntryName::new(name).unwrap_err();
            assert!(matches!(err, CompoundError::InvalidName(_)), "{name}");
        }
    }

    #[test]
    fn test_length_limit() {
        assert!(EntryName::new("").is_err());
        assert!(EntryName::new(&"x".repeat(32)).is_err());

        // Length is counted in UTF-16 units, not bytes
        let wide = "\u{00E9}".repeat(31);
        assert_eq!(wide.len(), 62);
        assert!(EntryName::new(&wide).is_ok());
    }

    #[test]
    fn test_display() {
        let name = EntryName::new("Stream").unwrap();
        assert_eq!(name.to_string(), "Stream");
        assert_eq!(name.into_units(), "Stream".encode_utf16().collect::<Vec<_>>());
    }
}
