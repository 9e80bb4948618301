use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Message priority levels; each one gets its own worker per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High = 1,
    Medium = 2,
    Low = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Priority {
    /// All priority levels, highest first
    pub fn all() -> &'static [Priority] {
        &[Self::High, Self::Medium, Self::Low]
    }

    /// Rank used by the polling policy (1 = highest)
    pub fn rank(self) -> u32 {
        self as u32
    }

    /// Create from rank
    pub fn from_rank(rank: u32) -> Option<Self> {
        match rank {
            1 => Some(Self::High),
            2 => Some(Self::Medium),
            3 => Some(Self::Low),
            _ => None,
        }
    }

    /// Delay a worker sleeps after each per-message step.
    ///
    /// `10^(rank * 2)` microseconds: 100µs, 10ms, 1s.
    pub fn polling_delay(self) -> Duration {
        Duration::from_micros(10u64.pow(self.rank() * 2))
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Key used in transport envelopes
    pub fn key(self) -> &'static str {
        match self {
            Self::High => "priority_high",
            Self::Medium => "priority_medium",
            Self::Low => "priority_low",
        }
    }

    /// Resolve a transport envelope key
    pub fn from_key(key: &str) -> Option<Self> {
        Self::all().iter().copied().find(|p| p.key() == key)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_lowercase();
        if let Some(priority) = Self::from_key(&lowered) {
            return Ok(priority);
        }
        match lowered.as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_delay_grows_exponentially() {
        assert_eq!(Priority::High.polling_delay(), Duration::from_micros(100));
        assert_eq!(Priority::Medium.polling_delay(), Duration::from_micros(10_000));
        assert_eq!(Priority::Low.polling_delay(), Duration::from_micros(1_000_000));

        assert!(Priority::High.polling_delay() < Priority::Medium.polling_delay());
        assert!(Priority::Medium.polling_delay() < Priority::Low.polling_delay());
    }

    #[test]
    fn parses_names_and_keys() {
        assert_eq!("LOW".parse::<Priority>().unwrap(), Priority::Low);
        assert_eq!("priority_high".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
        assert_eq!(Priority::from_rank(2), Some(Priority::Medium));
        assert_eq!(Priority::from_rank(4), None);
    }
}
