//! Version values of the form `major.minor.micro[.qualifier]`.

use std::fmt;
use std::str::FromStr;

use crate::error::{DfiError, Result};

/// A parsed version.
///
/// Versions order lexicographically on (major, minor, micro, qualifier); the
/// empty qualifier sorts before any non-empty one.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    pub qualifier: String,
}

impl Version {
    pub fn new(major: u32, minor: u32, micro: u32, qualifier: impl Into<String>) -> Self {
        Version {
            major,
            minor,
            micro,
            qualifier: qualifier.into(),
        }
    }
}

fn parse_number(part: &str) -> Result<u32> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DfiError::parse(format!("invalid version part '{part}'")));
    }
    part.parse::<u32>()
        .map_err(|_| DfiError::parse(format!("invalid version part '{part}'")))
}

impl FromStr for Version {
    type Err = DfiError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('.');
        let major = parse_number(
            parts
                .next()
                .ok_or_else(|| DfiError::parse(format!("invalid version '{s}'")))?,
        )?;
        let minor = parts.next().map(parse_number).transpose()?.unwrap_or(0);
        let micro = parts.next().map(parse_number).transpose()?.unwrap_or(0);
        let qualifier = match parts.next() {
            Some(q) => {
                let valid = !q.is_empty()
                    && q.bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
                if !valid {
                    return Err(DfiError::parse(format!("invalid version qualifier '{q}'")));
                }
                q.to_string()
            }
            None => String::new(),
        };
        if parts.next().is_some() {
            return Err(DfiError::parse(format!("invalid version '{s}'")));
        }
        Ok(Version {
            major,
            minor,
            micro,
            qualifier,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}
