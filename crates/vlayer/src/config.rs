// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Manager configuration
//!
//! ```yaml
//! virtual_state_threshold: 5000
//! parameterized_view_threshold: 100
//! changelog_threshold: 10000
//! deleted_externals_capacity: 4096
//! ```
//!
//! Every field is optional; missing fields take the defaults below.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_VIRTUAL_STATE_THRESHOLD: usize = 5000;
pub const DEFAULT_PARAMETERIZED_VIEW_THRESHOLD: usize = 100;
pub const DEFAULT_CHANGELOG_THRESHOLD: usize = 10000;
pub const DEFAULT_DELETED_EXTERNALS_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Virtual states materialized in one edit cycle before a warning
    pub virtual_state_threshold: usize,
    /// Parameterized views materialized in one edit cycle before a warning
    pub parameterized_view_threshold: usize,
    /// Entries in one change log before a warning
    pub changelog_threshold: usize,
    /// Bound on the manager-wide deleted externals record
    pub deleted_externals_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            virtual_state_threshold: DEFAULT_VIRTUAL_STATE_THRESHOLD,
            parameterized_view_threshold: DEFAULT_PARAMETERIZED_VIEW_THRESHOLD,
            changelog_threshold: DEFAULT_CHANGELOG_THRESHOLD,
            deleted_externals_capacity: DEFAULT_DELETED_EXTERNALS_CAPACITY,
        }
    }
}

impl ManagerConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: ManagerConfig = serde_yaml_ng::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("virtual_state_threshold", self.virtual_state_threshold),
            ("parameterized_view_threshold", self.parameterized_view_threshold),
            ("changelog_threshold", self.changelog_threshold),
            ("deleted_externals_capacity", self.deleted_externals_capacity),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}
