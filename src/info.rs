//! Key-value hints for collective operations.
//!
//! [`Info`] holds string hints that tune how schedules are built, in the same
//! spirit as `MPI_Info`. The recognised keys are listed on
//! [`ScanConfig::from_info`](crate::ScanConfig::from_info); unknown keys are
//! kept but ignored.
//!
//! # Example
//!
//! ```
//! use ferroscan::Info;
//!
//! let mut info = Info::new();
//! info.set("scan_algorithm", "flat").unwrap();
//! assert_eq!(info.get("scan_algorithm"), Some("flat"));
//! ```

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Maximum length of a hint key, matching `MPI_MAX_INFO_KEY`.
pub const INFO_KEY_MAX_LEN: usize = 255;

/// Maximum length of a hint value, matching `MPI_MAX_INFO_VAL`.
pub const INFO_VALUE_MAX_LEN: usize = 1024;

/// A set of string hints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Info {
    entries: BTreeMap<String, String>,
}

impl Info {
    /// Create an empty hint set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key-value pair, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the key is empty or either side is
    /// longer than the MPI limits.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() || key.len() > INFO_KEY_MAX_LEN {
            return Err(Error::InvalidConfig {
                key: key.into(),
                value: format!("key length must be 1..={INFO_KEY_MAX_LEN}"),
            });
        }
        if value.len() > INFO_VALUE_MAX_LEN {
            return Err(Error::InvalidConfig {
                key: key.into(),
                value: format!("value longer than {INFO_VALUE_MAX_LEN} bytes"),
            });
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Get the value associated with a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Remove a key. Returns the previous value, if any.
    pub fn delete(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key is set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
