use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation,
};

use crate::conf::ConfJwt;

pub type Result<T> = jsonwebtoken::errors::Result<T>;

/// HS256 keys and validation rules, built once from config.
#[derive(Clone)]
pub struct Codec {
    header: Header,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl Codec {
    #[must_use]
    pub fn new(conf: &ConfJwt) -> Self {
        let secret = conf.secret.as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0; // "exp" should mean what it says.
        validation.set_audience(&[&conf.audience]);
        validation.set_issuer(&[&conf.issuer]);
        Self {
            header: Header::new(Algorithm::HS256),
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn encode<T: serde::Serialize>(&self, claims: &T) -> Result<String> {
        jsonwebtoken::encode(&self.header, claims, &self.encoding)
    }

    pub fn decode<T: serde::de::DeserializeOwned>(&self, token: &str) -> Result<T> {
        let TokenData { claims, .. } =
            jsonwebtoken::decode::<T>(token, &self.decoding, &self.validation)?;
        Ok(claims)
    }
}
