//! Directory value types shared between the pool and its callers

use serde::{Deserialize, Serialize};

use crate::error::RC_PROTOCOL_ERROR;
use crate::{Error, Result};

// ============================================================================
// Attribute Mutations
// ============================================================================

/// Kind of a single-attribute modification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationKind {
    /// Add a value to the attribute
    Add,
    /// Replace every value of the attribute
    Replace,
    /// Remove one value, or the whole attribute when no value is given
    Delete,
}

impl ModificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModificationKind::Add => "add",
            ModificationKind::Replace => "replace",
            ModificationKind::Delete => "delete",
        }
    }

    /// ADD and REPLACE carry a value, DELETE only optionally
    pub fn requires_value(&self) -> bool {
        !matches!(self, ModificationKind::Delete)
    }
}

impl std::fmt::Display for ModificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attribute modification applied to a target entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMutation {
    pub kind: ModificationKind,
    pub attribute: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl AttributeMutation {
    pub fn add(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: ModificationKind::Add,
            attribute: attribute.into(),
            value: Some(value.into()),
        }
    }

    pub fn replace(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: ModificationKind::Replace,
            attribute: attribute.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(attribute: impl Into<String>) -> Self {
        Self {
            kind: ModificationKind::Delete,
            attribute: attribute.into(),
            value: None,
        }
    }

    /// Remove a single value, leaving the attribute's other values in place
    pub fn delete_value(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: ModificationKind::Delete,
            attribute: attribute.into(),
            value: Some(value.into()),
        }
    }

    /// Check the value rule for mutations that were built by hand or deserialized.
    ///
    /// ADD and REPLACE need a value. DELETE may carry one, in which case only
    /// that value is removed.
    pub fn validate(&self, dn: &str) -> Result<()> {
        let malformed = |message: String| Error::Protocol {
            operation: format!("modify ({} {})", self.kind, self.attribute),
            dn: dn.to_string(),
            code: RC_PROTOCOL_ERROR,
            message,
        };

        if self.attribute.trim().is_empty() {
            return Err(malformed("attribute name must not be empty".into()));
        }

        if self.kind.requires_value() && self.value.is_none() {
            return Err(malformed(format!(
                "{} of '{}' requires a value",
                self.kind, self.attribute
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Server Information
// ============================================================================

/// Subset of the root DSE reported by the server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootDse {
    pub vendor: Option<String>,
    pub version: Option<String>,
    pub naming_contexts: Vec<String>,
    pub supported_ldap_version: Vec<String>,
}
