use serde::{Deserialize, Serialize};

/// Options controlling IR construction.
///
/// Deserializes from maps with kebab-case keys, e.g. `{"enable-preintegration": false}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Parameters {
    /// When disabled, every block is integrated at runtime in `safe` mode.
    pub enable_preintegration: bool,
    /// Absolute tolerance for comparing table values.
    pub table_tolerance: f64,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            enable_preintegration: true,
            table_tolerance: 1e-10,
        }
    }
}

impl Parameters {
    pub fn with_preintegration(mut self, enable: bool) -> Self {
        self.enable_preintegration = enable;
        self
    }

    pub fn with_table_tolerance(mut self, tolerance: f64) -> Self {
        self.table_tolerance = tolerance;
        self
    }
}
