/// Evaluator configuration.
///
/// Loaded from JSON; every field is optional and falls back to its default.
///
/// ```
/// use aggview::EvaluatorConfig;
///
/// let config = EvaluatorConfig::from_json(r#"{ "null_keys_distinct": false }"#).unwrap();
/// assert!(!config.null_keys_distinct);
/// assert!(config.incremental);
/// ```

use crate::error::{Result, ViewError};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluatorConfig {
    /// NULL grouping keys never compare equal, so every row with a NULL key
    /// forms its own group. `false` groups NULL keys together.
    pub null_keys_distinct: bool,

    /// Live views replay the table changeset instead of rebuilding on every read.
    pub incremental: bool,

    /// A live view rebuilds instead of replaying when more changes than this
    /// are pending.
    pub max_pending_changes: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            null_keys_distinct: true,
            incremental: true,
            max_pending_changes: 1024,
        }
    }
}

impl EvaluatorConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ViewError::Config(e.to_string()))
    }
}
