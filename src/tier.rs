use std::{convert::Infallible, fmt, str::FromStr};

use utoipa::ToSchema;

use crate::conf::ConfQuota;

/// Subscription level. Controls the search ceiling and reset cadence.
#[derive(
    serde::Serialize,
    serde::Deserialize,
    ToSchema,
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Standard,
    Pro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Resets when the calendar month changes.
    Monthly,
    /// Resets 24 hours after the previous reset.
    Daily,
}

/// A search ceiling. `Unlimited` is its own variant rather than a big
/// number, so it can never be mistaken for one and shown to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Bounded(u64),
    Unlimited,
}

impl Tier {
    #[must_use]
    pub fn cadence(self) -> Cadence {
        match self {
            Self::Free => Cadence::Monthly,
            Self::Standard | Self::Pro => Cadence::Daily,
        }
    }

    #[must_use]
    pub fn limit(self, conf: &ConfQuota) -> Limit {
        match self {
            Self::Free => Limit::Bounded(conf.free_limit),
            Self::Standard => Limit::Bounded(conf.standard_limit),
            Self::Pro => Limit::Unlimited,
        }
    }

    /// Lenient parse of a value coming off the wire: anything unknown is
    /// treated as free.
    #[must_use]
    pub fn from_wire(s: Option<&str>) -> Option<Self> {
        s.map(|s| s.parse().unwrap_or_default())
    }
}

impl FromStr for Tier {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tier = match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Self::Standard,
            "pro" => Self::Pro,
            _ => Self::Free,
        };
        Ok(tier)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Free => "free",
            Self::Standard => "standard",
            Self::Pro => "pro",
        };
        f.write_str(s)
    }
}

impl Limit {
    #[must_use]
    pub fn is_reached_by(self, count: u64) -> bool {
        match self {
            Self::Bounded(max) => count >= max,
            Self::Unlimited => false,
        }
    }

    #[must_use]
    pub fn as_option(self) -> Option<u64> {
        match self {
            Self::Bounded(max) => Some(max),
            Self::Unlimited => None,
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(max) => write!(f, "{max}"),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

// Unlimited goes over the wire as null.
impl serde::Serialize for Limit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.as_option().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Limit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let max = Option::<u64>::deserialize(deserializer)?;
        Ok(max.map_or(Self::Unlimited, Self::Bounded))
    }
}
