//! Records written by ingestion and rows returned by reporting queries.
//!
//! Keep these structs focused on the data. Expansion from artworks lives in
//! `crate::ingest`.

use chrono::{DateTime, Utc};

use crate::model::ImageUrls;

/// One insertable row, keyed by (`img_id`, `page`).
#[derive(Debug, Clone, PartialEq)]
pub struct NewImage {
    pub img_id: String,
    pub page: u32,
    pub page_count: u32,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub urls: ImageUrls,
    pub url: String,
    pub user_id: String,
    pub user_name: String,
    pub user_avatar: Option<String>,
    pub width: i64,
    pub height: i64,
    pub bookmarks: i64,
    pub views: i64,
    pub source: String,
    pub x_restrict: i64,
    pub ai_type: i64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub file_ext: String,
    pub hash: String,
    pub score: i64,
}

/// Row slice returned by the reporting queries.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub id: i64,
    pub img_id: String,
    pub page: i64,
    pub page_count: i64,
    pub title: String,
    pub tags: Vec<String>,
    pub urls: ImageUrls,
    pub user_id: String,
    pub user_name: String,
    pub width: i64,
    pub height: i64,
    pub bookmarks: i64,
    pub x_restrict: i64,
    pub ai_type: i64,
    pub created: DateTime<Utc>,
    pub file_ext: String,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}
