//! Machine tags - `<machine>:<snapshot>` pairs naming a context's target.

use crate::error::CoreError;
use std::fmt;
use std::str::FromStr;

/// Separator between the machine and snapshot parts of a tag.
pub const TAG_SEPARATOR: char = ':';

/// A parsed `<machine>:<snapshot>` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MachineTag {
    machine: String,
    snapshot: String,
}

impl MachineTag {
    /// Build a tag from its parts.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidTag`] if either part is empty or contains the separator.
    pub fn new(machine: impl Into<String>, snapshot: impl Into<String>) -> Result<Self, CoreError> {
        let machine = machine.into();
        let snapshot = snapshot.into();
        let tag = format!("{machine}{TAG_SEPARATOR}{snapshot}");
        if machine.contains(TAG_SEPARATOR) || snapshot.contains(TAG_SEPARATOR) {
            return Err(CoreError::InvalidTag {
                tag,
                reason: "names may not contain ':'",
            });
        }
        Self::validate(&tag, &machine, &snapshot)?;
        Ok(Self { machine, snapshot })
    }

    /// Parse `<machine>:<snapshot>`.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidTag`] if the separator is missing, appears
    /// more than once, or either part is empty.
    pub fn parse(tag: &str) -> Result<Self, CoreError> {
        let (machine, snapshot) =
            tag.split_once(TAG_SEPARATOR)
                .ok_or_else(|| CoreError::InvalidTag {
                    tag: tag.to_string(),
                    reason: "missing ':' separator",
                })?;
        if snapshot.contains(TAG_SEPARATOR) {
            return Err(CoreError::InvalidTag {
                tag: tag.to_string(),
                reason: "more than one ':' separator",
            });
        }
        Self::validate(tag, machine, snapshot)?;
        Ok(Self {
            machine: machine.to_string(),
            snapshot: snapshot.to_string(),
        })
    }

    fn validate(tag: &str, machine: &str, snapshot: &str) -> Result<(), CoreError> {
        if machine.is_empty() {
            return Err(CoreError::InvalidTag {
                tag: tag.to_string(),
                reason: "machine name is empty",
            });
        }
        if snapshot.is_empty() {
            return Err(CoreError::InvalidTag {
                tag: tag.to_string(),
                reason: "snapshot name is empty",
            });
        }
        Ok(())
    }

    /// Machine name part.
    pub fn machine(&self) -> &str {
        &self.machine
    }

    /// Snapshot name part.
    pub fn snapshot(&self) -> &str {
        &self.snapshot
    }
}

impl FromStr for MachineTag {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MachineTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{TAG_SEPARATOR}{}", self.machine, self.snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let tag = MachineTag::parse("vm1:clean").unwrap();
        assert_eq!(tag.machine(), "vm1");
        assert_eq!(tag.snapshot(), "clean");
        assert_eq!(tag.to_string(), "vm1:clean");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["vm1", "vm1:", ":clean", ":", "", "a:b:c"] {
            let err = MachineTag::parse(bad).unwrap_err();
            assert!(
                matches!(err, CoreError::InvalidTag { .. }),
                "expected InvalidTag for {bad:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_from_str() {
        let tag: MachineTag = "win10:fresh".parse().unwrap();
        assert_eq!(tag, MachineTag::new("win10", "fresh").unwrap());
    }

    #[test]
    fn test_new_rejects_separator_in_names() {
        assert!(MachineTag::new("a:b", "c").is_err());
        assert!(MachineTag::new("a", "").is_err());
    }
}
