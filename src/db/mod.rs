//! Database module: record models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: the insertable record and the row types returned by queries.
//! - `repo`: SQL-only functions plus the `ImageStore` seam used by ingestion.
//!
//! External modules should import from `pixiv_harvest::db`; the repository API and the models
//! are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{NewImage, StoredImage, TagCount};
