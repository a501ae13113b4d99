pub mod backoff;
pub mod config;
pub mod crawler;
pub mod db;
pub mod enrich;
pub mod ingest;
pub mod model;
pub mod pixiv;
