use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[cfg(test)]
mod tests;

/// Runtime tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Maximum nesting of recursively built observer groups.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Whether registry subscriptions receive the current value on subscribe.
    #[serde(default = "default_emit_initial")]
    pub emit_initial: bool,

    /// Re-entrant update passes allowed for one expression before it is reported as cyclic.
    #[serde(default = "default_max_update_passes")]
    pub max_update_passes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            emit_initial: default_emit_initial(),
            max_update_passes: default_max_update_passes(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(Error::type_error("config: max_depth must be greater than 0"));
        }
        if self.max_update_passes == 0 {
            return Err(Error::type_error(
                "config: max_update_passes must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn default_max_depth() -> usize {
    64
}
fn default_emit_initial() -> bool {
    true
}
fn default_max_update_passes() -> usize {
    16
}
