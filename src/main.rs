use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use tally::{live::LiveStats, server::AppState, tier::Tier, trending::Period};

#[derive(Parser, Debug)]
struct Cli {
    /// Working directory, with config and data files.
    #[clap(short, long, default_value = "data")]
    dir: PathBuf,

    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(clap::Subcommand, Debug)]
enum Cmd {
    /// Serve the HTTP API.
    Server,

    /// Mint a token for a user.
    Jwt {
        uid: String,
        ttl: f64,
        #[clap(long)]
        tier: Option<Tier>,
    },

    /// Searches used this period.
    Usage { uid: String },

    /// Whether the user's search ceiling is reached.
    Check {
        uid: String,
        #[clap(long, default_value = "free")]
        tier: Tier,
    },

    /// Count one search.
    Record {
        uid: String,
        /// Used when the stored record has no tier.
        #[clap(long)]
        tier: Option<Tier>,
    },

    /// Most searched keywords.
    Trending {
        #[clap(long)]
        limit: Option<usize>,
        #[clap(long, default_value = "all")]
        period: Period,
    },

    /// Print the user's limit check whenever it changes.
    Watch {
        uid: String,
        #[clap(long, default_value = "free")]
        tier: Tier,
        /// Stop after this many seconds. Runs until interrupted otherwise.
        #[clap(long)]
        for_secs: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    human_panic_setup();
    let cli = Cli::parse();
    set_current_dir(&cli.dir)?;
    tally::tracing::init()?;
    tracing::debug!(?cli, "Starting.");
    let conf = tally::conf::global();
    match cli.cmd {
        Cmd::Server => tally::server::run().await,
        Cmd::Jwt { uid, ttl, tier } => {
            let claims = tally::auth::Claims::new(
                &uid,
                tier,
                Duration::from_secs_f64(ttl),
                &conf.jwt,
            )?;
            let codec = tally::jwt::Codec::new(&conf.jwt);
            let encoded: String = claims.to_str(&codec)?;
            println!("{encoded}");
            Ok(())
        }
        Cmd::Usage { uid } => {
            let state = AppState::connect(conf).await?;
            print_json(&state.tracker.get_usage(&uid).await)
        }
        Cmd::Check { uid, tier } => {
            let state = AppState::connect(conf).await?;
            print_json(&state.tracker.check_limit(&uid, tier).await)
        }
        Cmd::Record { uid, tier } => {
            let state = AppState::connect(conf).await?;
            print_json(&state.tracker.record_search(&uid, tier).await?)
        }
        Cmd::Trending { limit, period } => {
            let state = AppState::connect(conf.clone()).await?;
            let top_n = limit.unwrap_or(conf.trending.top_n);
            let keywords = state
                .aggregator
                .top_keywords(conf.trending.window_size, top_n, period)
                .await;
            print_json(&keywords)
        }
        Cmd::Watch {
            uid,
            tier,
            for_secs,
        } => {
            let state = AppState::connect(conf.clone()).await?;
            let mut live = LiveStats::spawn(
                state.tracker,
                &uid,
                tier,
                conf.live_poll_interval(),
            );
            let deadline = async {
                match for_secs {
                    Some(secs) => {
                        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                    }
                    None => {
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
            };
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    () = &mut deadline => break,
                    check = live.changed() => match check {
                        Some(check) => print_json(&check)?,
                        None => break,
                    },
                }
            }
            live.unsubscribe().await;
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    println!("{s}");
    Ok(())
}

fn set_current_dir(path: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(path)
        .context(format!("Failed to create directory path: {path:?}"))?;
    env::set_current_dir(path)
        .context(format!("Failed to set current directory to {path:?}"))?;
    Ok(())
}

fn human_panic_setup() {
    macro_rules! repo {
        () => {
            env!("CARGO_PKG_REPOSITORY")
        };
    }
    human_panic::setup_panic!(human_panic::Metadata::new(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
    .authors(env!("CARGO_PKG_AUTHORS"))
    .homepage(repo!())
    .support(concat!("- Submit an issue at ", repo!(), "/issues")));
}
