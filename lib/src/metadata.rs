//! The two-line `metadata` file that travels with every delta package.
//!
//! The deploy side reads it back to decide whether the delta applies to the
//! commit currently on the device, so the format is a stable contract:
//! a `From-sha:` line followed by a `To-sha:` line. The "from" identifier is
//! normally a commit checksum; for baseline deltas it is the bare machine
//! name, which the device checks against its own ref instead.

use std::fmt::{self, Display};
use std::str::FromStr;

use anyhow::{Context, Result};
use camino::Utf8Path;

/// Name of the metadata file inside the output directory.
pub(crate) const METADATA_FILENAME: &str = "metadata";

const FROM_PREFIX: &str = "From-sha:";
const TO_PREFIX: &str = "To-sha:";

/// The from/to identifier pair recorded alongside a generated delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeltaMetadata {
    pub(crate) from_id: String,
    pub(crate) to_id: String,
}

impl DeltaMetadata {
    pub(crate) fn new(from_id: impl Into<String>, to_id: impl Into<String>) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
        }
    }

    /// Write the metadata file into `dir`.
    pub(crate) fn write_to(&self, dir: &Utf8Path) -> Result<()> {
        let path = dir.join(METADATA_FILENAME);
        std::fs::write(&path, self.to_string()).with_context(|| format!("Writing {path}"))
    }
}

impl Display for DeltaMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{FROM_PREFIX}{}", self.from_id)?;
        writeln!(f, "{TO_PREFIX}{}", self.to_id)
    }
}

impl FromStr for DeltaMetadata {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut lines = s.lines();
        let from_id = lines
            .next()
            .and_then(|line| line.strip_prefix(FROM_PREFIX))
            .with_context(|| format!("Missing {FROM_PREFIX} line"))?;
        let to_id = lines
            .next()
            .and_then(|line| line.strip_prefix(TO_PREFIX))
            .with_context(|| format!("Missing {TO_PREFIX} line"))?;
        Ok(Self::new(from_id, to_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn test_format() {
        let md = DeltaMetadata::new("def456", "abc123");
        assert_eq!(md.to_string(), "From-sha:def456\nTo-sha:abc123\n");
        // Baseline deltas carry the machine name instead of a checksum.
        let md = DeltaMetadata::new("myboard", "abc123");
        assert_eq!(md.to_string(), "From-sha:myboard\nTo-sha:abc123\n");
    }

    #[test]
    fn test_parse() {
        let md: DeltaMetadata = "From-sha:def456\nTo-sha:abc123\n".parse().unwrap();
        assert_eq!(md, DeltaMetadata::new("def456", "abc123"));
        assert!("To-sha:abc123\n".parse::<DeltaMetadata>().is_err());
        assert!("From-sha:def456\n".parse::<DeltaMetadata>().is_err());
    }

    #[test]
    fn test_roundtrip() {
        for md in [
            DeltaMetadata::new("def456", "abc123"),
            DeltaMetadata::new("myboard", "abc123"),
        ] {
            let parsed: DeltaMetadata = md.to_string().parse().unwrap();
            assert_eq!(parsed, md);
        }
    }

    #[test]
    fn test_write_to() -> Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path()).unwrap();
        DeltaMetadata::new("def456", "abc123").write_to(dir)?;
        let data = std::fs::read_to_string(dir.join(METADATA_FILENAME))?;
        assert_eq!(data, "From-sha:def456\nTo-sha:abc123\n");
        Ok(())
    }
}
