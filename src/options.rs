use serde::{Deserialize, Serialize};

/// Caller-supplied flags that change how a single decision is made.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecideOption {
    /// Bypass the bandit decision cache entirely: neither read nor write it.
    IgnoreCmabCache,
    /// Clear the whole bandit decision cache before deciding.
    ResetCmabCache,
    /// Remove the cached bandit decision for this user and rule before deciding.
    InvalidateUserCmabCache,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_wire_names() {
        assert_eq!(
            serde_json::to_string(&DecideOption::InvalidateUserCmabCache).unwrap(),
            "\"INVALIDATE_USER_CMAB_CACHE\""
        );
        let option: DecideOption = serde_json::from_str("\"IGNORE_CMAB_CACHE\"").unwrap();
        assert_eq!(option, DecideOption::IgnoreCmabCache);
    }
}
