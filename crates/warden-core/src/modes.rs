//! Global system mode and per-domain automation preferences.

use serde::{Deserialize, Serialize};

/// The kernel's global operating mode.
///
/// The safe default is `Shadow`: the validator evaluates and audits, but
/// nothing is forwarded to the Sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemMode {
    /// Full agency: approved actions flow to the Sentinel.
    Active,
    /// Evaluate and log only; the action stream stays silent.
    #[default]
    Shadow,
    /// Everything is denied with reason "paused".
    Paused,
}

impl SystemMode {
    /// Canonical storage form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Shadow => "SHADOW",
            Self::Paused => "PAUSED",
        }
    }

    /// Parses the storage form.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ACTIVE" => Some(Self::Active),
            "SHADOW" => Some(Self::Shadow),
            "PAUSED" => Some(Self::Paused),
            _ => None,
        }
    }
}

impl std::fmt::Display for SystemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-application-domain automation preference.
///
/// Domain `"*"` is the global fallback and is seeded to `Auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutomationMode {
    /// Auto-approve low-risk proposals.
    #[default]
    Auto,
    /// Hold everything for the user.
    Manual,
}

impl AutomationMode {
    /// Canonical storage form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
        }
    }

    /// Parses the storage form.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "AUTO" => Some(Self::Auto),
            "MANUAL" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for AutomationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_is_the_default_system_mode() {
        assert_eq!(SystemMode::default(), SystemMode::Shadow);
    }

    #[test]
    fn system_mode_round_trips() {
        for mode in [SystemMode::Active, SystemMode::Shadow, SystemMode::Paused] {
            assert_eq!(SystemMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(SystemMode::parse("OFF"), None);
    }

    #[test]
    fn automation_mode_round_trips() {
        assert_eq!(AutomationMode::parse("AUTO"), Some(AutomationMode::Auto));
        assert_eq!(AutomationMode::parse("MANUAL"), Some(AutomationMode::Manual));
        assert_eq!(AutomationMode::parse("auto"), None);
    }
}
