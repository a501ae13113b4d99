use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pixiv_harvest::config::{self, Config};
use pixiv_harvest::db::{self, StoredImage};

#[derive(Debug, Parser)]
#[command(author, version, about = "Query the harvested image store")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Number of stored sub-page rows
    Count {
        /// Only rows carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },
    /// Most frequent tags
    Tags {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Every distinct tag, sorted
    AllTags,
    /// Newest rows
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Rows carrying a tag, newest first
    ByTag {
        tag: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },
    /// Rows of one user, newest first
    ByUser {
        user_id: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },
}

fn print_images(images: &[StoredImage]) {
    for img in images {
        println!(
            "{}_p{}\t{}\t{}x{}\t{}\t{}\t{}",
            img.img_id,
            img.page,
            img.created.format("%Y-%m-%d %H:%M"),
            img.width,
            img.height,
            img.user_name,
            img.title,
            img.urls.original
        );
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
        Config::default()
    };
    cfg.apply_env();
    config::validate(&cfg)?;

    let pool = db::init_pool(&cfg.database.url).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Count { tag: Some(tag) } => {
            println!("{}", db::count_images_by_tag(&pool, &tag).await?);
        }
        Command::Count { tag: None } => {
            println!("{}", db::count_images(&pool).await?);
        }
        Command::Tags { limit } => {
            for tc in db::top_tags(&pool, limit).await? {
                println!("{}\t{}", tc.count, tc.tag);
            }
        }
        Command::AllTags => {
            for tag in db::all_unique_tags(&pool).await? {
                println!("{}", tag);
            }
        }
        Command::Recent { limit } => {
            print_images(&db::recent_images(&pool, limit).await?);
        }
        Command::ByTag {
            tag,
            page,
            page_size,
        } => {
            print_images(&db::images_by_tag(&pool, &tag, page, page_size).await?);
        }
        Command::ByUser {
            user_id,
            page,
            page_size,
        } => {
            print_images(&db::images_by_user(&pool, &user_id, page, page_size).await?);
        }
    }
    Ok(())
}
