use std::time::{Duration, SystemTime, SystemTimeError, UNIX_EPOCH};

use crate::{conf::ConfJwt, tier::Tier};

use super::jwt;

/// Who is searching. The tier claim, when the issuer knows it, is only a
/// hint: the stored usage record has the final say.
#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
pub struct Claims {
    pub sub: String,
    aud: String,
    iss: String,
    exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
}

impl Claims {
    pub fn new(
        sub: &str,
        tier: Option<Tier>,
        ttl: Duration,
        jwt_conf: &ConfJwt,
    ) -> Result<Self, SystemTimeError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
        let exp = now.saturating_add(ttl).as_secs();
        Ok(Self {
            sub: sub.to_string(),
            aud: jwt_conf.audience.clone(),
            iss: jwt_conf.issuer.clone(),
            exp,
            tier,
        })
    }

    pub fn to_str(&self, codec: &jwt::Codec) -> jwt::Result<String> {
        codec.encode(self)
    }

    pub fn from_str(str: &str, codec: &jwt::Codec) -> jwt::Result<Self> {
        codec.decode::<Self>(str)
    }
}
