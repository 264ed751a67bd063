use std::{
    fmt::Debug,
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, LazyLock},
    time::Duration,
};

use anyhow::{ensure, Context};

pub static GLOBAL: LazyLock<Arc<Conf>> = LazyLock::new(|| {
    let conf = read_or_create_default().unwrap_or_else(|error| {
        panic!("Failed to initialize global config: {error:?}")
    });
    Arc::new(conf)
});

#[must_use]
pub fn global() -> Arc<Conf> {
    (*GLOBAL).clone()
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct Conf {
    #[serde(
        serialize_with = "serialize_log_level",
        deserialize_with = "deserialize_log_level"
    )]
    pub log_level: tracing::Level,
    pub addr: IpAddr,
    pub port: u16,
    pub jwt: ConfJwt,
    pub remote: ConfRemote,
    pub quota: ConfQuota,
    pub trending: ConfTrending,
    /// Seconds between live-stats polls.
    pub live_poll_interval: f32,
    pub cache: ConfCache,
    pub tls: Option<Tls>,
}

impl Conf {
    #[must_use]
    pub fn live_poll_interval(&self) -> Duration {
        Duration::from_secs_f32(self.live_poll_interval)
    }

    /// Durations are read as seconds and must convert without panicking.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure_positive_secs("live_poll_interval", self.live_poll_interval)?;
        ensure_positive_secs("remote.timeout", self.remote.timeout)?;
        let busy = self.cache.sqlite_busy_timeout;
        ensure!(
            busy.is_finite() && busy >= 0.0,
            "cache.sqlite_busy_timeout must be a non-negative number of \
            seconds, got {busy}"
        );
        Ok(())
    }
}

fn ensure_positive_secs(name: &str, secs: f32) -> anyhow::Result<()> {
    ensure!(
        secs.is_finite() && secs > 0.0,
        "{name} must be a positive number of seconds, got {secs}"
    );
    Ok(())
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            addr: "127.0.0.1".parse().unwrap_or_else(|_| {
                unreachable!("Fat-fingered default IP address!")
            }),
            port: 3001,
            jwt: ConfJwt::default(),
            remote: ConfRemote::default(),
            quota: ConfQuota::default(),
            trending: ConfTrending::default(),
            live_poll_interval: 30.0,
            cache: ConfCache::default(),
            tls: None,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct Tls {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize, Clone)]
pub struct ConfJwt {
    pub secret: String,
    pub audience: String,
    pub issuer: String,
}

impl Default for ConfJwt {
    fn default() -> Self {
        Self {
            secret: "super-secret".to_string(),
            audience: "authenticated".to_string(),
            issuer: "tally".to_string(),
        }
    }
}

impl Debug for ConfJwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfJwt")
            .field("secret", &"<XXXXX>")
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .finish()
    }
}

/// The remote record store: a PostgREST-style table API.
#[derive(serde::Serialize, serde::Deserialize, Clone)]
pub struct ConfRemote {
    pub base_url: String,
    pub api_key: String,
    pub usage_table: String,
    pub history_table: String,
    /// Seconds.
    pub timeout: f32,
}

impl ConfRemote {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f32(self.timeout)
    }
}

impl Default for ConfRemote {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:54321".to_string(),
            api_key: String::new(),
            usage_table: "users".to_string(),
            history_table: "search_history".to_string(),
            timeout: 10.0,
        }
    }
}

impl Debug for ConfRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfRemote")
            .field("base_url", &self.base_url)
            .field("api_key", &"<XXXXX>")
            .field("usage_table", &self.usage_table)
            .field("history_table", &self.history_table)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Per-period search ceilings. Free counts per calendar month, standard
/// per rolling day. Pro has no ceiling.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Copy)]
pub struct ConfQuota {
    pub free_limit: u64,
    pub standard_limit: u64,
}

impl Default for ConfQuota {
    fn default() -> Self {
        Self {
            free_limit: 25,
            standard_limit: 25,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct ConfTrending {
    pub window_size: u32,
    pub top_n: usize,
    /// Shown, with zero counts, when history cannot be fetched.
    pub placeholders: Vec<String>,
}

impl Default for ConfTrending {
    fn default() -> Self {
        Self {
            window_size: 100,
            top_n: 10,
            placeholders: [
                "ai tools",
                "digital marketing",
                "social media trends",
                "content creation",
                "influencer marketing",
                "brand strategy",
                "video editing",
                "productivity apps",
                "e-commerce",
                "startup growth",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct ConfCache {
    pub file: PathBuf,
    pub sqlite_busy_timeout: f32,
}

impl Default for ConfCache {
    fn default() -> Self {
        Self {
            file: PathBuf::from("data/cache.db"),
            sqlite_busy_timeout: 60.0,
        }
    }
}

fn serialize_log_level<S>(
    level: &tracing::Level,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let s = level.to_string();
    serializer.serialize_str(&s)
}

fn deserialize_log_level<'de, D>(
    deserializer: D,
) -> Result<tracing::Level, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    let s = String::deserialize(deserializer)?;
    tracing::Level::from_str(&s).map_err(serde::de::Error::custom)
}

pub fn read_or_create_default() -> anyhow::Result<Conf> {
    let path = "conf/conf.toml";
    read_or_create_default_(path).context(path)
}

pub fn read_or_create_default_<P: AsRef<Path>>(
    path: P,
) -> anyhow::Result<Conf> {
    let path = path.as_ref();
    let conf: Conf = if fs::exists(path)? {
        let s = fs::read_to_string(path)?;
        toml::from_str(&s)?
    } else {
        if let Some(parent) = path.parent() {
            let ctx = format!(
                "Failed to create parent directory \
                for conf file: {path:?}"
            );
            fs::create_dir_all(parent).context(ctx)?;
        }
        let conf = Conf::default();
        let s = toml::to_string_pretty(&conf)?;
        fs::write(path, s)?;
        conf
    };
    conf.validate()?;
    Ok(conf)
}
