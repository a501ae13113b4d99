use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// URL variants of a single sub-page image.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageUrls {
    pub original: String,
    pub regular: String,
    pub small: String,
    pub thumb_mini: String,
}

/// Dimensions and URLs of one sub-page of an artwork.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageMeta {
    pub urls: ImageUrls,
    pub width: i64,
    pub height: i64,
}

/// An artwork discovered through search.
///
/// `meta` stays empty until the enricher attaches the per-sub-page metadata;
/// unenriched items are never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub description: String,
    pub illust_type: i64,
    pub x_restrict: i64,
    pub url: String,
    pub tags: Vec<String>,
    pub user_id: String,
    pub user_name: String,
    pub profile_image_url: String,
    pub width: i64,
    pub height: i64,
    pub page_count: u32,
    pub bookmark_count: i64,
    pub ai_type: i64,
    pub create_date: DateTime<FixedOffset>,
    pub update_date: DateTime<FixedOffset>,
    pub meta: Vec<PageMeta>,
}

impl Item {
    pub fn is_enriched(&self) -> bool {
        !self.meta.is_empty()
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub items: Vec<Item>,
    pub total: u64,
    pub last_page: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    #[serde(rename = "date_d")]
    DateDesc,
    #[serde(rename = "date")]
    DateAsc,
    #[serde(rename = "popular_d")]
    PopularDesc,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::DateDesc => "date_d",
            Order::DateAsc => "date",
            Order::PopularDesc => "popular_d",
        }
    }
}

impl FromStr for Order {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date_d" => Ok(Order::DateDesc),
            "date" => Ok(Order::DateAsc),
            "popular_d" => Ok(Order::PopularDesc),
            other => Err(format!("unknown order '{}' (date_d, date, popular_d)", other)),
        }
    }
}

/// Safety mode of the search.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SafetyMode {
    #[default]
    All,
    Safe,
    R18,
}

impl SafetyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyMode::All => "all",
            SafetyMode::Safe => "safe",
            SafetyMode::R18 => "r18",
        }
    }
}

impl FromStr for SafetyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(SafetyMode::All),
            "safe" => Ok(SafetyMode::Safe),
            "r18" => Ok(SafetyMode::R18),
            other => Err(format!("unknown mode '{}' (all, safe, r18)", other)),
        }
    }
}

/// How the keyword is matched against artworks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TagMatch {
    #[default]
    #[serde(rename = "s_tag_full")]
    TagFull,
    #[serde(rename = "s_tag")]
    TagPartial,
    #[serde(rename = "s_tc")]
    TitleCaption,
}

impl TagMatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagMatch::TagFull => "s_tag_full",
            TagMatch::TagPartial => "s_tag",
            TagMatch::TitleCaption => "s_tc",
        }
    }
}

impl FromStr for TagMatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s_tag_full" => Ok(TagMatch::TagFull),
            "s_tag" => Ok(TagMatch::TagPartial),
            "s_tc" => Ok(TagMatch::TitleCaption),
            other => Err(format!("unknown s_mode '{}' (s_tag_full, s_tag, s_tc)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    All,
    #[default]
    Illust,
    Manga,
    IllustAndUgoira,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::All => "all",
            MediaType::Illust => "illust",
            MediaType::Manga => "manga",
            MediaType::IllustAndUgoira => "illust_and_ugoira",
        }
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(MediaType::All),
            "illust" => Ok(MediaType::Illust),
            "manga" => Ok(MediaType::Manga),
            "illust_and_ugoira" => Ok(MediaType::IllustAndUgoira),
            other => Err(format!(
                "unknown type '{}' (all, illust, manga, illust_and_ugoira)",
                other
            )),
        }
    }
}

/// Which part of a following list to return.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FollowVisibility {
    #[default]
    Show,
    Hide,
}

impl FollowVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowVisibility::Show => "show",
            FollowVisibility::Hide => "hide",
        }
    }
}

impl FromStr for FollowVisibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "show" => Ok(FollowVisibility::Show),
            "hide" => Ok(FollowVisibility::Hide),
            other => Err(format!("unknown rest '{}' (show, hide)", other)),
        }
    }
}

macro_rules! display_as_str {
    ($($t:ty),*) => {
        $(impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(Order, SafetyMode, TagMatch, MediaType, FollowVisibility);

/// Query parameters of the artwork search endpoint.
///
/// Serializes to the query string; the keyword travels in the URL path and
/// unset optional filters are left out.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SearchParams {
    #[serde(skip)]
    pub keyword: String,
    pub p: u32,
    pub order: Order,
    pub mode: SafetyMode,
    pub csw: u8,
    pub s_mode: TagMatch,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scd: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecd: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wgt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hgt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_type: Option<u8>,
}

impl SearchParams {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            p: 1,
            order: Order::default(),
            mode: SafetyMode::default(),
            csw: 1,
            s_mode: TagMatch::default(),
            media_type: MediaType::default(),
            lang: "zh".to_string(),
            scd: None,
            ecd: None,
            wgt: None,
            hgt: None,
            ratio: None,
            ai_type: None,
        }
    }

    /// Same query, different result page.
    pub fn for_page(&self, page: u32) -> Self {
        Self {
            p: page,
            ..self.clone()
        }
    }
}

/// Query of the following-list endpoint. The user id travels in the path and
/// the locale comes from the client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FollowingQuery {
    pub offset: u32,
    pub limit: u32,
    pub rest: FollowVisibility,
    /// Only users followed under this tag; empty means all.
    pub tag: String,
}

impl Default for FollowingQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 24,
            rest: FollowVisibility::Show,
            tag: String::new(),
        }
    }
}

/// A followed account with its latest artworks.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub user_id: String,
    pub user_name: String,
    pub profile_image_url: String,
    pub profile_image_small_url: String,
    pub user_comment: String,
    pub premium: bool,
    pub following: bool,
    pub followed: bool,
    pub is_blocking: bool,
    pub is_mypixiv: bool,
    pub illusts: Vec<Item>,
}

/// One page of a following list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FollowingPage {
    pub users: Vec<User>,
    pub total: u64,
}
