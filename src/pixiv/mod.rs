use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, ORIGIN, REFERER};
use reqwest::{Client, Proxy, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::PixivSettings;
use crate::model::{FollowingPage, FollowingQuery, PageMeta, SearchPage, SearchParams};
use crate::pixiv::model::{
    following_page_from_body, search_page_from_body, FollowingBody, RawPageMeta, SearchBody,
};

pub mod model;

pub const PIXIV_BASE: &str = "https://www.pixiv.net/";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/112.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum PixivError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("pixiv returned an error: {message}")]
    Api { message: String },
    #[error("invalid response payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid request url: {0}")]
    Url(String),
}

impl PixivError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PixivError::Timeout { .. } | PixivError::Network(_) => true,
            PixivError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            PixivError::Api { .. } | PixivError::Decode(_) | PixivError::Url(_) => false,
        }
    }
}

impl From<reqwest::Error> for PixivError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PixivError::Timeout {
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            PixivError::Network(err)
        }
    }
}

/// The pixiv ajax endpoints this crate reads.
#[async_trait]
pub trait PixivApi: Send + Sync {
    /// One page of artwork search results.
    async fn search(&self, params: &SearchParams) -> Result<SearchPage, PixivError>;

    /// Per-sub-page metadata of one artwork, in sub-page order.
    async fn illust_pages(&self, illust_id: &str) -> Result<Vec<PageMeta>, PixivError>;

    /// Accounts followed by `user_id`, with their latest artworks.
    async fn following(
        &self,
        user_id: &str,
        query: &FollowingQuery,
    ) -> Result<FollowingPage, PixivError>;
}

#[derive(Clone)]
pub struct PixivClient {
    http: Client,
    base_url: Url,
    lang: String,
}

impl fmt::Debug for PixivClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixivClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct LangQuery<'a> {
    lang: &'a str,
}

impl PixivClient {
    /// Locale sent with metadata and following requests.
    pub fn lang(&self) -> &str {
        &self.lang
    }

    pub fn from_settings(settings: &PixivSettings) -> anyhow::Result<Self> {
        let base_url = Url::parse(&settings.base_url)
            .with_context(|| format!("invalid pixiv base url '{}'", settings.base_url))?;

        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static(PIXIV_BASE));
        headers.insert(ORIGIN, HeaderValue::from_static("https://www.pixiv.net"));
        if !settings.token.trim().is_empty() {
            let mut cookie = HeaderValue::from_str(&format!("PHPSESSID={}", settings.token.trim()))
                .context("token is not a valid cookie value")?;
            cookie.set_sensitive(true);
            headers.insert(COOKIE, cookie);
        }

        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs));
        builder = match settings.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(proxy) => builder.proxy(
                Proxy::all(proxy).with_context(|| format!("invalid proxy '{}'", proxy))?,
            ),
            None => builder.no_proxy(),
        };
        let http = builder.build().context("failed to build reqwest client")?;

        Ok(Self {
            http,
            base_url,
            lang: settings.lang.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, PixivError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PixivError::Url(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET `url` and return the `body` of the JSON envelope.
    async fn get_body<T, Q>(&self, url: Url, query: &Q) -> Result<T, PixivError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        debug!(url = %url, "pixiv request");
        let res = self.http.get(url).query(query).send().await?;
        let status = res.status();
        let text = res.text().await?;
        if status != StatusCode::OK {
            return Err(PixivError::Status { status, body: text });
        }

        let mut envelope: Value = serde_json::from_str(&text)?;
        if envelope.get("error").and_then(Value::as_bool).unwrap_or(false) {
            let message = envelope
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(PixivError::Api { message });
        }
        let body = envelope
            .get_mut("body")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok(serde_json::from_value(body)?)
    }
}

#[async_trait]
impl PixivApi for PixivClient {
    async fn search(&self, params: &SearchParams) -> Result<SearchPage, PixivError> {
        let url = self.endpoint(&["ajax", "search", "artworks", &params.keyword])?;
        let body: Option<SearchBody> = self.get_body(url, params).await?;
        Ok(search_page_from_body(body.unwrap_or_default()))
    }

    async fn illust_pages(&self, illust_id: &str) -> Result<Vec<PageMeta>, PixivError> {
        let url = self.endpoint(&["ajax", "illust", illust_id, "pages"])?;
        let query = LangQuery { lang: &self.lang };
        let body: Option<Vec<RawPageMeta>> = self.get_body(url, &query).await?;
        Ok(body
            .unwrap_or_default()
            .into_iter()
            .map(PageMeta::from)
            .collect())
    }

    async fn following(
        &self,
        user_id: &str,
        query: &FollowingQuery,
    ) -> Result<FollowingPage, PixivError> {
        let mut url = self.endpoint(&["ajax", "user", user_id, "following"])?;
        url.query_pairs_mut().append_pair("lang", &self.lang);
        let body: Option<FollowingBody> = self.get_body(url, query).await?;
        Ok(following_page_from_body(body.unwrap_or_default()))
    }
}
