use utoipa::ToSchema;

use crate::tier::{Limit, Tier};

/// A user's row in the remote usage table. The remote store owns it;
/// we only read, reset and increment.
#[derive(serde::Serialize, serde::Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub user_id: String,
    pub search_count: u64,
    /// RFC 3339. Kept as text: a malformed value must reach the reset
    /// rule (which treats it as expired) rather than fail the read.
    #[serde(default)]
    pub last_reset_date: Option<String>,
    /// Left as text on the wire; unknown values are read as free. Never
    /// sent as null, which would wipe a tier set by billing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

impl UsageRecord {
    #[must_use]
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            search_count: 0,
            last_reset_date: None,
            tier: None,
        }
    }

    #[must_use]
    pub fn tier(&self) -> Option<Tier> {
        Tier::from_wire(self.tier.as_deref())
    }
}

/// A row of the search-history table.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct SearchRecord {
    pub query: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(serde::Serialize, serde::Deserialize, ToSchema, Debug, Clone, PartialEq, Eq)]
pub struct KeywordFrequency {
    pub keyword: String,
    pub count: u64,
}

#[derive(serde::Serialize, serde::Deserialize, ToSchema, Debug, Clone, Copy, PartialEq)]
pub struct Usage {
    pub count: u64,
    /// Absent when unlimited.
    #[schema(value_type = Option<u64>)]
    pub limit: Limit,
    pub tier: Tier,
}

#[derive(serde::Serialize, serde::Deserialize, ToSchema, Debug, Clone, Copy, PartialEq)]
pub struct LimitCheck {
    pub reached: bool,
    pub current_count: u64,
    /// Absent when unlimited.
    #[schema(value_type = Option<u64>)]
    pub limit: Limit,
}
