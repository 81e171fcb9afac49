//! Device product versions (`Lockdown.ProductVersion`).
//!
//! Backups from devices newer than iOS 10.2 differ in layout:
//!
//! - the keybag password goes through an extra PBKDF2-SHA256 pass
//! - metadata lives in `Manifest.db` instead of `Manifest.mbdb`
//! - content files sit in two-character fan-out directories

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Last product version that uses the legacy backup layout.
pub const LAST_LEGACY_VERSION: ProductVersion = ProductVersion {
    components: [10, 2, 0],
    len: 2,
};

/// A dotted numeric version such as `10.3` or `9.0.1`.
///
/// Missing trailing components compare as zero, so `10.2 == 10.2.0`.
#[derive(Debug, Clone, Copy)]
pub struct ProductVersion {
    components: [u32; 3],
    len: usize,
}

impl ProductVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        ProductVersion {
            components: [major, minor, patch],
            len: 3,
        }
    }

    pub fn major(&self) -> u32 {
        self.components[0]
    }

    pub fn minor(&self) -> u32 {
        self.components[1]
    }

    pub fn patch(&self) -> u32 {
        self.components[2]
    }

    /// True for backups written after the 10.2 format change.
    pub fn is_modern(&self) -> bool {
        *self > LAST_LEGACY_VERSION
    }
}

impl FromStr for ProductVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let parts: Vec<&str> = trimmed.split('.').collect();
        if trimmed.is_empty() || parts.len() > 3 {
            return Err(Error::InvalidVersion(s.to_string()));
        }

        let mut components = [0u32; 3];
        for (slot, part) in components.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| Error::InvalidVersion(s.to_string()))?;
        }

        Ok(ProductVersion {
            components,
            len: parts.len(),
        })
    }
}

impl PartialEq for ProductVersion {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for ProductVersion {}

impl PartialOrd for ProductVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProductVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts: Vec<String> = self.components[..self.len.max(1)]
            .iter()
            .map(|c| c.to_string())
            .collect();
        write!(f, "{}", parts.join("."))
    }
}
