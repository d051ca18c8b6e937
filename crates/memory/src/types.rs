//! Shared memory-tier types.

use serde::{Deserialize, Serialize};

/// Usage statistics for one memory tier, surfaced via the admin endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub tier: String,
    pub item_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_percent: Option<f64>,
    pub avg_importance: f64,
    pub total_access_count: i64,
}

pub(crate) fn validate_importance(tier: &str, importance: f64) -> murmur_common::Result<()> {
    if !(0.0..=1.0).contains(&importance) {
        return Err(murmur_common::MurmurError::memory(
            tier,
            format!("importance must be within [0, 1], got {importance}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importance_bounds() {
        assert!(validate_importance("core", 0.0).is_ok());
        assert!(validate_importance("core", 1.0).is_ok());
        assert!(validate_importance("core", -0.1).is_err());
        assert!(validate_importance("core", 1.1).is_err());
    }
}
