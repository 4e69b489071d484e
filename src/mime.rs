//! MIME type parsing and wildcard matching

use std::fmt;

/// A `type/subtype` pair, lowercased and without parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MimeType {
    kind: String,
    subtype: String,
}

impl MimeType {
    /// Parse a content type such as `text/html; charset=utf-8`.
    ///
    /// Returns `None` when there is no `/` separator.
    pub fn parse(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or_default().trim();
        let (kind, subtype) = essence.split_once('/')?;
        Some(Self {
            kind: kind.trim().to_ascii_lowercase(),
            subtype: subtype.trim().to_ascii_lowercase(),
        })
    }

    /// Top level type, e.g. `text`
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Subtype, e.g. `html`
    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    /// Whether this is `*/*`
    pub fn is_wildcard(&self) -> bool {
        self.kind == "*" && self.subtype == "*"
    }

    /// Whether `self`, used as an acceptable type, admits `other`.
    ///
    /// Checked in order: exact match, `type/*`, `*/subtype`, `*/*`.
    pub fn matches(&self, other: &MimeType) -> bool {
        if self.kind == other.kind && self.subtype == other.subtype {
            return true;
        }
        if self.kind == other.kind && self.subtype == "*" {
            return true;
        }
        if self.kind == "*" && self.subtype == other.subtype {
            return true;
        }
        self.is_wildcard()
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)
    }
}

/// Split an `Accept` header into its media ranges, ignoring quality parameters
pub fn parse_accept(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|part| MimeType::parse(part))
        .map(|mime| mime.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mime(value: &str) -> MimeType {
        MimeType::parse(value).unwrap()
    }

    #[test]
    fn parse_trims_and_drops_parameters() {
        let parsed = mime("  Text/HTML ; charset=utf-8");
        assert_eq!(parsed.kind(), "text");
        assert_eq!(parsed.subtype(), "html");
        assert!(MimeType::parse("nonsense").is_none());
    }

    #[test]
    fn matching_precedence() {
        let response = mime("application/json");
        assert!(mime("application/json").matches(&response));
        assert!(mime("application/*").matches(&response));
        assert!(mime("*/json").matches(&response));
        assert!(mime("*/*").matches(&response));
        assert!(!mime("text/*").matches(&response));
        assert!(!mime("text/json").matches(&response));
        assert!(!mime("image/png").matches(&response));
    }

    #[test]
    fn accept_header_ranges() {
        assert_eq!(
            parse_accept("application/json, text/*;q=0.5, */*;q=0.1"),
            vec!["application/json", "text/*", "*/*"]
        );
    }
}
