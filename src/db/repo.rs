use super::model::{NewImage, StoredImage, TagCount};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

/// 24 bound columns per row keeps a full statement well under SQLite's
/// host-parameter limit.
const MAX_ROWS_PER_STATEMENT: usize = 500;

const IMAGE_COLUMNS: &str = "id, img_id, page, page_count, title, tags, urls, user_id, user_name, \
     width, height, bookmarks, x_restrict, ai_type, created, file_ext, score";

/// Destination of ingested batches.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Insert `rows` in one transaction, skipping rows whose (img_id, page)
    /// already exists. Returns the number of rows actually inserted.
    async fn insert_batch(&self, rows: &[NewImage]) -> Result<u64>;
}

#[async_trait]
impl ImageStore for SqlitePool {
    async fn insert_batch(&self, rows: &[NewImage]) -> Result<u64> {
        insert_images(self, rows).await
    }
}

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {}", normalized))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. Leaves in-memory URLs
/// untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    // Pass through non-sqlite schemes
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    rebuilt.push('?');
    match query_part {
        Some(q) if q.contains("mode=") => rebuilt.push_str(q),
        Some(q) => {
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Bulk insert with conflict-ignore semantics on (img_id, page), atomically.
#[instrument(skip_all, fields(rows = rows.len()))]
pub async fn insert_images(pool: &Pool, rows: &[NewImage]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut inserted = 0;
    for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
        let encoded = chunk
            .iter()
            .map(|row| Ok((serde_json::to_string(&row.tags)?, serde_json::to_string(&row.urls)?)))
            .collect::<Result<Vec<(String, String)>>>()?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO images (img_id, page, page_count, hash, title, description, tags, urls, url, \
             user_id, user_name, user_avatar, width, height, bookmarks, views, source, x_restrict, \
             ai_type, created, updated, size_kb, file_ext, score) ",
        );
        qb.push_values(chunk.iter().zip(encoded), |mut b, (row, (tags, urls))| {
            b.push_bind(row.img_id.clone())
                .push_bind(i64::from(row.page))
                .push_bind(i64::from(row.page_count))
                .push_bind(row.hash.clone())
                .push_bind(row.title.clone())
                .push_bind(row.description.clone())
                .push_bind(tags)
                .push_bind(urls)
                .push_bind(row.url.clone())
                .push_bind(row.user_id.clone())
                .push_bind(row.user_name.clone())
                .push_bind(row.user_avatar.clone())
                .push_bind(row.width)
                .push_bind(row.height)
                .push_bind(row.bookmarks)
                .push_bind(row.views)
                .push_bind(row.source.clone())
                .push_bind(row.x_restrict)
                .push_bind(row.ai_type)
                .push_bind(row.created)
                .push_bind(row.updated)
                .push_bind(0_i64)
                .push_bind(row.file_ext.clone())
                .push_bind(row.score);
        });
        qb.push(" ON CONFLICT(img_id, page) DO NOTHING");

        let res = qb.build().execute(&mut *tx).await?;
        inserted += res.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

fn map_image(row: &SqliteRow) -> Result<StoredImage> {
    let tags: String = row.try_get("tags")?;
    let urls: String = row.try_get("urls")?;
    Ok(StoredImage {
        id: row.try_get("id")?,
        img_id: row.try_get("img_id")?,
        page: row.try_get("page")?,
        page_count: row.try_get("page_count")?,
        title: row.try_get("title")?,
        tags: serde_json::from_str(&tags).context("tags column is not a JSON array")?,
        urls: serde_json::from_str(&urls).context("urls column is not a JSON object")?,
        user_id: row.try_get("user_id")?,
        user_name: row.try_get("user_name")?,
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        bookmarks: row.try_get("bookmarks")?,
        x_restrict: row.try_get("x_restrict")?,
        ai_type: row.try_get("ai_type")?,
        created: row.try_get("created")?,
        file_ext: row.try_get("file_ext")?,
        score: row.try_get("score")?,
    })
}

fn page_offset(page: u32, page_size: u32) -> i64 {
    i64::from(page.max(1) - 1) * i64::from(page_size)
}

#[instrument(skip_all)]
pub async fn count_images(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn count_images_by_tag(pool: &Pool, tag: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM images \
         WHERE EXISTS (SELECT 1 FROM json_each(images.tags) WHERE json_each.value = ?)",
    )
    .bind(tag)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Newest first, `page` is 1-based.
#[instrument(skip_all)]
pub async fn images_by_tag(
    pool: &Pool,
    tag: &str,
    page: u32,
    page_size: u32,
) -> Result<Vec<StoredImage>> {
    let sql = format!(
        "SELECT {} FROM images \
         WHERE EXISTS (SELECT 1 FROM json_each(images.tags) WHERE json_each.value = ?) \
         ORDER BY created DESC, id DESC LIMIT ? OFFSET ?",
        IMAGE_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(tag)
        .bind(i64::from(page_size))
        .bind(page_offset(page, page_size))
        .fetch_all(pool)
        .await?;
    rows.iter().map(map_image).collect()
}

/// Newest first, `page` is 1-based.
#[instrument(skip_all)]
pub async fn images_by_user(
    pool: &Pool,
    user_id: &str,
    page: u32,
    page_size: u32,
) -> Result<Vec<StoredImage>> {
    let sql = format!(
        "SELECT {} FROM images WHERE user_id = ? ORDER BY created DESC, id DESC LIMIT ? OFFSET ?",
        IMAGE_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .bind(i64::from(page_size))
        .bind(page_offset(page, page_size))
        .fetch_all(pool)
        .await?;
    rows.iter().map(map_image).collect()
}

#[instrument(skip_all)]
pub async fn recent_images(pool: &Pool, limit: u32) -> Result<Vec<StoredImage>> {
    let sql = format!(
        "SELECT {} FROM images ORDER BY created DESC, id DESC LIMIT ?",
        IMAGE_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await?;
    rows.iter().map(map_image).collect()
}

/// Most frequent tags across stored rows.
#[instrument(skip_all)]
pub async fn top_tags(pool: &Pool, limit: u32) -> Result<Vec<TagCount>> {
    let rows = sqlx::query(
        "SELECT j.value AS tag, COUNT(*) AS freq FROM images, json_each(images.tags) AS j \
         GROUP BY j.value ORDER BY freq DESC, tag ASC LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(TagCount {
                tag: row.try_get("tag")?,
                count: row.try_get("freq")?,
            })
        })
        .collect()
}

#[instrument(skip_all)]
pub async fn all_unique_tags(pool: &Pool) -> Result<Vec<String>> {
    let tags: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT j.value FROM images, json_each(images.tags) AS j ORDER BY j.value",
    )
    .fetch_all(pool)
    .await?;
    Ok(tags)
}
