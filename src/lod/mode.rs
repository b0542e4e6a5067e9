use serde::{Deserialize, Serialize};

/// Render-quality tier shared by the controller, the pools and the
/// clustering engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RenderMode {
    High,
    Medium,
    Low,
}

/// Markers are tiered by the same three levels as the renderer
pub type QualityTier = RenderMode;

impl RenderMode {
    pub const ALL: [RenderMode; 3] = [RenderMode::High, RenderMode::Medium, RenderMode::Low];

    /// One tier cheaper, saturating at `Low`
    pub fn downgraded(self) -> Self {
        match self {
            Self::High => Self::Medium,
            Self::Medium | Self::Low => Self::Low,
        }
    }

    /// One tier richer, saturating at `High`
    pub fn upgraded(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl Default for RenderMode {
    fn default() -> Self {
        Self::High
    }
}

impl std::fmt::Display for RenderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_step_transitions() {
        assert_eq!(RenderMode::High.downgraded(), RenderMode::Medium);
        assert_eq!(RenderMode::Medium.downgraded(), RenderMode::Low);
        assert_eq!(RenderMode::Low.downgraded(), RenderMode::Low);
        assert_eq!(RenderMode::Low.upgraded(), RenderMode::Medium);
        assert_eq!(RenderMode::High.upgraded(), RenderMode::High);
    }
}
