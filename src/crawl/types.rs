// src/crawl/types.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// One result entry as scraped, before identity is assigned.
///
/// A search page yields stubs (url/title/price); `Fetcher::detail` fills in the
/// description and location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RawListing {
    pub url: String,
    pub title: String,
    pub price: String, // display form, e.g. "$450"
    pub description: Option<String>,
    pub location_zip: Option<String>,
}

impl RawListing {
    pub fn stub(url: impl Into<String>, title: impl Into<String>, price: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            price: price.into(),
            description: None,
            location_zip: None,
        }
    }
}

/// A discovered item. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Listing {
    pub identity: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub price: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_zip: Option<String>,
}

impl Listing {
    /// `identity` is computed from the search stub and carried over, so a
    /// detail page that reformats the price does not change it.
    pub fn from_raw(identity: String, raw: RawListing) -> Self {
        Self {
            identity,
            url: raw.url,
            description: raw.description.unwrap_or_else(|| raw.title.clone()),
            title: raw.title,
            price: raw.price,
            location_zip: raw.location_zip.filter(|z| !z.is_empty()),
        }
    }
}

/// Source of listings. Results must come back newest first.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Search URL for the given keywords and location.
    fn search_url(&self, keywords: &str, location: &str, distance: u32) -> Result<String, FetchError>;

    /// Result page in rank order. An empty page is `Ok(vec![])`, never an error.
    async fn search(&self, search_url: &str) -> Result<Vec<RawListing>, FetchError>;

    /// Full listing for one stub.
    async fn detail(&self, stub: RawListing) -> Result<RawListing, FetchError>;

    fn name(&self) -> &'static str;
}
