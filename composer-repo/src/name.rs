//! Package names of the form `vendor/package`.

use crate::error::{AppError, AppResult};
use crate::storage::Key;
use std::fmt;
use std::str::FromStr;

/// A Composer package name, e.g. `psr/log`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageName {
    vendor: String,
    package: String,
}

impl PackageName {
    pub fn parse(value: &str) -> AppResult<Self> {
        let parts: Vec<&str> = value.split('/').collect();
        match parts.as_slice() {
            [vendor, package] if !vendor.is_empty() && !package.is_empty() => Ok(Self {
                vendor: (*vendor).to_string(),
                package: (*package).to_string(),
            }),
            _ => {
                tracing::warn!(name = %value, "Rejected malformed package name");
                Err(AppError::BadRequest(format!(
                    "Invalid name. Should be like '[vendor]/[package]': '{value}'"
                )))
            }
        }
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    /// Storage key of the per-package registry: `vendor/package.json`.
    pub fn key(&self) -> Key {
        Key::from_parts([self.vendor.as_str(), &format!("{}.json", self.package)])
    }
}

impl FromStr for PackageName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.vendor, self.package)
    }
}
