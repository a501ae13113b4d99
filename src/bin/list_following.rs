use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pixiv_harvest::config::{self, Config};
use pixiv_harvest::model::{FollowVisibility, FollowingQuery};
use pixiv_harvest::pixiv::{PixivApi, PixivClient};

#[derive(Debug, Parser)]
#[command(author, version, about = "List the accounts a pixiv user follows")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Numeric pixiv user id
    user_id: String,

    #[arg(long, default_value_t = 0)]
    offset: u32,

    #[arg(long, default_value_t = 24)]
    limit: u32,

    /// show (public) or hide (private, own account only)
    #[arg(long, default_value_t = FollowVisibility::Show)]
    rest: FollowVisibility,

    /// Only follows filed under this tag
    #[arg(long, default_value = "")]
    tag: String,

    /// Locale for the request; overrides `pixiv.lang`
    #[arg(long)]
    lang: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pixiv_harvest=info,warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut cfg = if args.config.exists() {
        config::load(Some(&args.config))?
    } else {
        Config::default()
    };
    cfg.apply_env();
    if let Some(lang) = &args.lang {
        cfg.pixiv.lang = lang.clone();
    }
    config::validate(&cfg)?;

    let client = PixivClient::from_settings(&cfg.pixiv)?;
    let query = FollowingQuery {
        offset: args.offset,
        limit: args.limit,
        rest: args.rest,
        tag: args.tag,
    };
    let page = client.following(&args.user_id, &query).await?;
    info!(user_id = %args.user_id, total = page.total, listed = page.users.len(), "following");

    for user in &page.users {
        println!(
            "{}\t{}\t{} artworks\t{}",
            user.user_id,
            user.user_name,
            user.illusts.len(),
            user.profile_image_url
        );
    }
    Ok(())
}
