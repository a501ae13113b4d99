use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pixiv_harvest::backoff::TokioSleeper;
use pixiv_harvest::config::{self, Config};
use pixiv_harvest::crawler::{CrawlOutcome, PageCrawler};
use pixiv_harvest::db;
use pixiv_harvest::model::{MediaType, Order, SafetyMode, SearchParams, TagMatch};
use pixiv_harvest::pixiv::PixivClient;

#[derive(Debug, Parser)]
#[command(author, version, about = "Crawl pixiv artwork search results into SQLite")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Search keyword (tag)
    keyword: String,

    /// date_d, date or popular_d
    #[arg(long, default_value_t = Order::DateDesc)]
    order: Order,

    /// all, safe or r18
    #[arg(long, default_value_t = SafetyMode::All)]
    mode: SafetyMode,

    /// s_tag_full, s_tag or s_tc
    #[arg(long, default_value_t = TagMatch::TagFull)]
    s_mode: TagMatch,

    /// all, illust, manga or illust_and_ugoira
    #[arg(long = "type", default_value_t = MediaType::Illust)]
    media_type: MediaType,

    /// Locale for every request; overrides `pixiv.lang`
    #[arg(long)]
    lang: Option<String>,

    /// Earliest creation date (YYYY-MM-DD)
    #[arg(long)]
    scd: Option<NaiveDate>,

    /// Latest creation date (YYYY-MM-DD)
    #[arg(long)]
    ecd: Option<NaiveDate>,

    /// Minimum width
    #[arg(long)]
    wgt: Option<u32>,

    /// Minimum height
    #[arg(long)]
    hgt: Option<u32>,

    /// -1 portrait, 0 square, 1 landscape
    #[arg(long, allow_hyphen_values = true)]
    ratio: Option<i32>,

    /// 1 excludes AI-generated works
    #[arg(long)]
    ai_type: Option<u8>,
}

impl Args {
    fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(lang) = &self.lang {
            cfg.pixiv.lang = lang.clone();
        }
    }

    /// Search parameters for page 1. `lang` is the client's locale.
    fn search_params(&self, lang: &str) -> SearchParams {
        SearchParams {
            order: self.order,
            mode: self.mode,
            s_mode: self.s_mode,
            media_type: self.media_type,
            lang: lang.to_string(),
            scd: self.scd,
            ecd: self.ecd,
            wgt: self.wgt,
            hgt: self.hgt,
            ratio: self.ratio,
            ai_type: self.ai_type,
            ..SearchParams::new(self.keyword.clone())
        }
    }
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
        info!(path = %args.config.display(), "config file not found; using defaults");
        Config::default()
    };
    cfg.apply_env();
    args.apply_overrides(&mut cfg);
    config::validate(&cfg)?;

    let client = PixivClient::from_settings(&cfg.pixiv)?;
    let pool = db::init_pool(&cfg.database.url).await?;
    db::run_migrations(&pool).await?;

    let sleeper = TokioSleeper;
    let crawler = PageCrawler::new(
        &client,
        &pool,
        &sleeper,
        cfg.crawl.clone(),
        cfg.ingest.clone(),
    );
    let report = crawler.run(&args.search_params(client.lang())).await;

    info!(
        total = report.total,
        last_page = report.last_page,
        pages_ingested = report.pages_ingested,
        skipped_pages = ?report.skipped_pages,
        rows_inserted = report.ingest.rows_inserted,
        duplicates = report.ingest.duplicates,
        records_dropped = report.ingest.records_dropped,
        "crawl report"
    );
    match report.outcome {
        CrawlOutcome::Done { .. } => Ok(()),
        CrawlOutcome::Aborted(reason) => bail!("crawl aborted: {}", reason),
    }
}
