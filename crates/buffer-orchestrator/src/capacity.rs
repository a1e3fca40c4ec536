// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device memory capacity of one kernel's bank.

use crate::DriverError;
use std::fmt;

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// Size of the memory bank behind one kernel index.
///
/// # Parsing
/// Accepts `"512M"`, `"512MB"`, `"1G"`, `"1GB"`, `"2048K"`, `"2048KB"` or a
/// plain byte count. Case-insensitive.
///
/// # Examples
/// ```
/// use buffer_orchestrator::DeviceCapacity;
///
/// let c = DeviceCapacity::parse("1G").unwrap();
/// assert_eq!(c.as_mb(), 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceCapacity {
    bytes: usize,
}

impl DeviceCapacity {
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    pub fn from_mb(mb: usize) -> Self {
        Self { bytes: mb * MB }
    }

    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Capacity in megabytes (truncated).
    pub fn as_mb(&self) -> usize {
        self.bytes / MB
    }

    pub fn parse(s: &str) -> Result<Self, DriverError> {
        let s = s.trim();
        let upper = s.to_uppercase();
        let (digits, multiplier) = [
            ("GB", GB),
            ("G", GB),
            ("MB", MB),
            ("M", MB),
            ("KB", KB),
            ("K", KB),
            ("B", 1),
        ]
        .iter()
        .find(|(suffix, _)| upper.ends_with(suffix))
        .map_or((s, 1), |(suffix, mult)| (&s[..s.len() - suffix.len()], *mult));

        let value: usize = digits.trim().parse().map_err(|_| {
            DriverError::InvalidCapacity(format!(
                "'{s}': expected a number with an optional K, M or G suffix"
            ))
        })?;
        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| DriverError::InvalidCapacity(format!("'{s}' overflows")))?;
        if bytes == 0 {
            return Err(DriverError::InvalidCapacity(format!("'{s}' is zero")));
        }
        Ok(Self { bytes })
    }
}

impl Default for DeviceCapacity {
    fn default() -> Self {
        Self::from_mb(512)
    }
}

impl fmt::Display for DeviceCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bytes >= GB && self.bytes % GB == 0 {
            write!(f, "{} GB", self.bytes / GB)
        } else if self.bytes >= MB && self.bytes % MB == 0 {
            write!(f, "{} MB", self.bytes / MB)
        } else if self.bytes >= KB && self.bytes % KB == 0 {
            write!(f, "{} KB", self.bytes / KB)
        } else {
            write!(f, "{} B", self.bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(DeviceCapacity::parse("512M").unwrap().as_mb(), 512);
        assert_eq!(DeviceCapacity::parse("512mb").unwrap().as_mb(), 512);
        assert_eq!(DeviceCapacity::parse("2g").unwrap().as_mb(), 2048);
        assert_eq!(DeviceCapacity::parse("64K").unwrap().as_bytes(), 64 * 1024);
        assert_eq!(DeviceCapacity::parse(" 4096 ").unwrap().as_bytes(), 4096);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(DeviceCapacity::parse("").is_err());
        assert!(DeviceCapacity::parse("lots").is_err());
        assert!(DeviceCapacity::parse("0M").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(DeviceCapacity::default().to_string(), "512 MB");
        assert_eq!(DeviceCapacity::from_bytes(8192).to_string(), "8 KB");
        assert_eq!(DeviceCapacity::from_bytes(100).to_string(), "100 B");
    }

    #[test]
    fn test_serde_roundtrip() {
        let c = DeviceCapacity::from_mb(256);
        let json = serde_json::to_string(&c).unwrap();
        let back: DeviceCapacity = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }
}
