//! Raw response payloads of the pixiv ajax endpoints and their mapping into
//! the domain types. All tolerance for missing or oddly-typed fields lives here.

use chrono::DateTime;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use crate::model::{FollowingPage, ImageUrls, Item, PageMeta, SearchPage, User};

/// Absent keys fall back through `#[serde(default)]`; this covers explicit `null`.
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize, Debug, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchBody {
    #[serde(deserialize_with = "null_default")]
    pub illust_manga: IllustManga,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct IllustManga {
    #[serde(deserialize_with = "null_default")]
    pub data: Vec<Value>,
    #[serde(deserialize_with = "null_default")]
    pub total: u64,
    #[serde(deserialize_with = "null_default")]
    pub last_page: u32,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct RawIllust {
    pub id: Value,
    #[serde(deserialize_with = "null_default")]
    pub title: String,
    #[serde(deserialize_with = "null_default")]
    pub illust_type: i64,
    #[serde(deserialize_with = "null_default")]
    pub x_restrict: i64,
    #[serde(deserialize_with = "null_default")]
    pub url: String,
    #[serde(deserialize_with = "null_default")]
    pub description: String,
    #[serde(deserialize_with = "null_default")]
    pub tags: Vec<String>,
    pub user_id: Value,
    #[serde(deserialize_with = "null_default")]
    pub user_name: String,
    #[serde(deserialize_with = "null_default")]
    pub width: i64,
    #[serde(deserialize_with = "null_default")]
    pub height: i64,
    #[serde(deserialize_with = "null_default")]
    pub page_count: u32,
    pub bookmark_data: Option<Value>,
    pub create_date: Option<String>,
    pub update_date: Option<String>,
    #[serde(deserialize_with = "null_default")]
    pub ai_type: i64,
    #[serde(deserialize_with = "null_default")]
    pub profile_image_url: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct RawPageMeta {
    #[serde(deserialize_with = "null_default")]
    pub urls: RawUrls,
    #[serde(deserialize_with = "null_default")]
    pub width: i64,
    #[serde(deserialize_with = "null_default")]
    pub height: i64,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct RawUrls {
    #[serde(deserialize_with = "null_default")]
    pub original: String,
    #[serde(deserialize_with = "null_default")]
    pub regular: String,
    #[serde(deserialize_with = "null_default")]
    pub small: String,
    #[serde(deserialize_with = "null_default")]
    pub thumb_mini: String,
}

impl From<RawPageMeta> for PageMeta {
    fn from(raw: RawPageMeta) -> Self {
        PageMeta {
            urls: ImageUrls {
                original: raw.urls.original,
                regular: raw.urls.regular,
                small: raw.urls.small,
                thumb_mini: raw.urls.thumb_mini,
            },
            width: raw.width,
            height: raw.height,
        }
    }
}

/// Ids show up both as JSON strings and as numbers.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Map one entry of `illustManga.data` into an [`Item`].
///
/// Returns `None` for entries that cannot identify an artwork (ad
/// placeholders, missing id or creation date). Every other field falls back
/// to its default.
pub fn item_from_value(value: Value) -> Option<Item> {
    let raw: RawIllust = match serde_json::from_value(value) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(%err, "skipping search entry with unexpected shape");
            return None;
        }
    };

    let id = id_string(&raw.id)?;
    let create_date = match raw
        .create_date
        .as_deref()
        .map(DateTime::parse_from_rfc3339)
    {
        Some(Ok(date)) => date,
        Some(Err(err)) => {
            warn!(id = %id, %err, "skipping artwork with unparseable createDate");
            return None;
        }
        None => {
            warn!(id = %id, "skipping artwork without createDate");
            return None;
        }
    };
    let update_date = raw
        .update_date
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .unwrap_or(create_date);
    let bookmark_count = raw
        .bookmark_data
        .as_ref()
        .and_then(|b| b.get("count"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    Some(Item {
        id,
        title: raw.title,
        description: raw.description,
        illust_type: raw.illust_type,
        x_restrict: raw.x_restrict,
        url: raw.url,
        tags: raw.tags,
        user_id: id_string(&raw.user_id).unwrap_or_default(),
        user_name: raw.user_name,
        profile_image_url: raw.profile_image_url,
        width: raw.width,
        height: raw.height,
        page_count: raw.page_count,
        bookmark_count,
        ai_type: raw.ai_type,
        create_date,
        update_date,
        meta: Vec::new(),
    })
}

pub fn search_page_from_body(body: SearchBody) -> SearchPage {
    let IllustManga {
        data,
        total,
        last_page,
    } = body.illust_manga;
    SearchPage {
        items: data.into_iter().filter_map(item_from_value).collect(),
        total,
        last_page,
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct FollowingBody {
    #[serde(deserialize_with = "null_default")]
    pub users: Vec<Value>,
    #[serde(deserialize_with = "null_default")]
    pub total: u64,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct RawUser {
    pub user_id: Value,
    #[serde(deserialize_with = "null_default")]
    pub user_name: String,
    #[serde(deserialize_with = "null_default")]
    pub profile_image_url: String,
    #[serde(deserialize_with = "null_default")]
    pub profile_image_small_url: String,
    #[serde(deserialize_with = "null_default")]
    pub user_comment: String,
    #[serde(deserialize_with = "null_default")]
    pub premium: bool,
    #[serde(deserialize_with = "null_default")]
    pub following: bool,
    #[serde(deserialize_with = "null_default")]
    pub followed: bool,
    #[serde(deserialize_with = "null_default")]
    pub is_blocking: bool,
    #[serde(deserialize_with = "null_default")]
    pub is_mypixiv: bool,
    #[serde(deserialize_with = "null_default")]
    pub illusts: Vec<Value>,
}

/// Map one entry of a following list. Entries without a user id are skipped.
pub fn user_from_value(value: Value) -> Option<User> {
    let raw: RawUser = match serde_json::from_value(value) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(%err, "skipping followed user with unexpected shape");
            return None;
        }
    };
    let user_id = id_string(&raw.user_id)?;
    Some(User {
        user_id,
        user_name: raw.user_name,
        profile_image_url: raw.profile_image_url,
        profile_image_small_url: raw.profile_image_small_url,
        user_comment: raw.user_comment,
        premium: raw.premium,
        following: raw.following,
        followed: raw.followed,
        is_blocking: raw.is_blocking,
        is_mypixiv: raw.is_mypixiv,
        illusts: raw.illusts.into_iter().filter_map(item_from_value).collect(),
    })
}

pub fn following_page_from_body(body: FollowingBody) -> FollowingPage {
    FollowingPage {
        users: body.users.into_iter().filter_map(user_from_value).collect(),
        total: body.total,
    }
}
