//! Which responses count as a failed authentication.

use std::fmt;
use std::str::FromStr;

use crate::error::BannerError;

/// Response status codes treated as authentication failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailurePolicy {
    status_codes: Vec<u16>,
}

impl Default for FailurePolicy {
    /// `401 Unauthorized` and `403 Forbidden`.
    fn default() -> Self {
        Self {
            status_codes: vec![401, 403],
        }
    }
}

impl FailurePolicy {
    pub fn new(status_codes: Vec<u16>) -> Self {
        Self { status_codes }
    }

    /// Parses a comma-separated list such as `"401, 403"`.
    ///
    /// Whitespace around items is ignored and an empty string yields an
    /// empty policy.
    pub fn parse(list: &str) -> Result<Self, BannerError> {
        if list.trim().is_empty() {
            return Ok(Self::new(Vec::new()));
        }
        let status_codes = list
            .split(',')
            .map(str::trim)
            .enumerate()
            .map(|(i, item)| {
                item.parse::<u16>().map_err(|_| {
                    BannerError::InvalidConfig(format!(
                        "can not parse item {i} (zero based) of status code list '{list}'"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(status_codes))
    }

    pub fn status_codes(&self) -> &[u16] {
        &self.status_codes
    }

    /// `true` if `status` is listed or the handler flagged the request as a
    /// failed authentication.
    pub fn is_failure(&self, status: u16, flagged: bool) -> bool {
        flagged || self.status_codes.contains(&status)
    }
}

impl FromStr for FailurePolicy {
    type Err = BannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, code) in self.status_codes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{code}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_401_and_403() {
        let policy = FailurePolicy::default();
        assert!(policy.is_failure(401, false));
        assert!(policy.is_failure(403, false));
        assert!(!policy.is_failure(200, false));
        assert!(!policy.is_failure(500, false));
    }

    #[test]
    fn flag_overrides_status() {
        assert!(FailurePolicy::default().is_failure(200, true));
    }

    #[test]
    fn parse_tolerates_whitespace() {
        let policy = FailurePolicy::parse(" 401 ,403,  407").unwrap();
        assert_eq!(policy.status_codes(), &[401, 403, 407]);
    }

    #[test]
    fn parse_empty_is_empty() {
        assert!(FailurePolicy::parse("").unwrap().status_codes().is_empty());
        assert!(FailurePolicy::parse("  ").unwrap().status_codes().is_empty());
    }

    #[test]
    fn parse_error_names_position() {
        let err = FailurePolicy::parse("401,abc").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("item 1"), "{msg}");
        assert!(msg.contains("'401,abc'"), "{msg}");
    }

    #[test]
    fn display_joins_with_comma_space() {
        assert_eq!(FailurePolicy::default().to_string(), "401, 403");
        assert_eq!(FailurePolicy::new(vec![]).to_string(), "");
    }
}
