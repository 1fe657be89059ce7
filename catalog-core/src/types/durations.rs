//! Cache categories and their maximum ages.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    TTL_AUTOCOMPLETE, TTL_ITEM_DETAIL, TTL_SEARCH, TTL_SEASONAL, TTL_TAXONOMY, TTL_TOP_LIST,
};
use crate::error::FetchError;

/// Semantic category of a cached request.
///
/// Every cache key a caller uses resolves to exactly one category, chosen by
/// the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheCategory {
    /// Ranked top lists
    TopList,
    /// Seasonal listings
    Seasonal,
    /// A single item's full record
    ItemDetail,
    /// Search result pages
    Search,
    /// Genres and other taxonomy lists
    Taxonomy,
    /// Type-ahead suggestions
    Autocomplete,
}

impl CacheCategory {
    /// All categories, in table order.
    pub const ALL: [CacheCategory; 6] = [
        CacheCategory::TopList,
        CacheCategory::Seasonal,
        CacheCategory::ItemDetail,
        CacheCategory::Search,
        CacheCategory::Taxonomy,
        CacheCategory::Autocomplete,
    ];

    /// Stable kebab-case name, as used in config and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::TopList => "top-list",
            CacheCategory::Seasonal => "seasonal",
            CacheCategory::ItemDetail => "item-detail",
            CacheCategory::Search => "search",
            CacheCategory::Taxonomy => "taxonomy",
            CacheCategory::Autocomplete => "autocomplete",
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheCategory {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        CacheCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| FetchError::Config(format!("unknown cache category: {s}")))
    }
}

/// Category → maximum age table.
///
/// Read-only at runtime. Values are whole seconds so the table reads the same
/// in env vars and config files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationTable {
    /// Max age of top lists, in seconds
    pub top_list_secs: u64,
    /// Max age of seasonal lists, in seconds
    pub seasonal_secs: u64,
    /// Max age of item detail, in seconds
    pub item_detail_secs: u64,
    /// Max age of search results, in seconds
    pub search_secs: u64,
    /// Max age of taxonomy lists, in seconds
    pub taxonomy_secs: u64,
    /// Max age of autocomplete suggestions, in seconds
    pub autocomplete_secs: u64,
}

impl Default for DurationTable {
    fn default() -> Self {
        Self {
            top_list_secs: TTL_TOP_LIST.as_secs(),
            seasonal_secs: TTL_SEASONAL.as_secs(),
            item_detail_secs: TTL_ITEM_DETAIL.as_secs(),
            search_secs: TTL_SEARCH.as_secs(),
            taxonomy_secs: TTL_TAXONOMY.as_secs(),
            autocomplete_secs: TTL_AUTOCOMPLETE.as_secs(),
        }
    }
}

impl DurationTable {
    /// Returns the max age for a category.
    pub fn max_age(&self, category: CacheCategory) -> Duration {
        Duration::from_secs(*self.slot(category))
    }

    /// Overrides one category's max age (whole seconds are kept).
    pub fn with_max_age(mut self, category: CacheCategory, max_age: Duration) -> Self {
        *self.slot_mut(category) = max_age.as_secs();
        self
    }

    fn slot(&self, category: CacheCategory) -> &u64 {
        match category {
            CacheCategory::TopList => &self.top_list_secs,
            CacheCategory::Seasonal => &self.seasonal_secs,
            CacheCategory::ItemDetail => &self.item_detail_secs,
            CacheCategory::Search => &self.search_secs,
            CacheCategory::Taxonomy => &self.taxonomy_secs,
            CacheCategory::Autocomplete => &self.autocomplete_secs,
        }
    }

    fn slot_mut(&mut self, category: CacheCategory) -> &mut u64 {
        match category {
            CacheCategory::TopList => &mut self.top_list_secs,
            CacheCategory::Seasonal => &mut self.seasonal_secs,
            CacheCategory::ItemDetail => &mut self.item_detail_secs,
            CacheCategory::Search => &mut self.search_secs,
            CacheCategory::Taxonomy => &mut self.taxonomy_secs,
            CacheCategory::Autocomplete => &mut self.autocomplete_secs,
        }
    }
}
