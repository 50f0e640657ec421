//! # Catalog Search Seam
//!
//! The queue does not talk HTTP. Whatever client actually queries the
//! catalog (and caches results) implements [`CatalogSearch`]; the
//! rate-limited wrappers in `retry.rs` gate and retry calls into it.

use async_trait::async_trait;

/// First page, as the catalog numbers them.
pub const DEFAULT_PAGE: u32 = 1;

/// Default page size for title searches.
pub const DEFAULT_PER_PAGE: u32 = 50;

/// External search client the wrappers delegate to.
///
/// Implementations own HTTP, authentication and result caching. Errors are
/// handed back to the wrapper's caller unchanged once retries run out, so
/// keep whatever detail (status codes, bodies) the caller may need.
#[async_trait]
pub trait CatalogSearch: Send + Sync {
    /// One page of results.
    type Output: Send;

    /// Failure of a single call.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Plain title search.
    async fn search(&self, request: &SearchRequest) -> Result<Self::Output, Self::Error>;

    /// Filtered search with genres, tags, formats and sort keys.
    async fn advanced_search(
        &self,
        request: &AdvancedSearchRequest,
    ) -> Result<Self::Output, Self::Error>;
}

/// Parameters of a plain title search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Title text.
    pub query: String,
    /// 1-based page.
    pub page: u32,
    /// Results per page.
    pub per_page: u32,
    /// Bearer token, if the user is signed in.
    pub token: Option<String>,
    /// Ask the client to skip its result cache. Passed through untouched.
    pub bypass_cache: bool,
}

impl SearchRequest {
    /// First page of `query`, default page size, anonymous, cached.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            page: DEFAULT_PAGE,
            per_page: DEFAULT_PER_PAGE,
            token: None,
            bypass_cache: false,
        }
    }

    /// Selects a page and page size.
    pub fn with_page(mut self, page: u32, per_page: u32) -> Self {
        self.page = page;
        self.per_page = per_page;
        self
    }

    /// Attaches an auth token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the cache bypass flag.
    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }
}

/// Parameters of a filtered search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvancedSearchRequest {
    /// Title text.
    pub query: String,
    /// 1-based page.
    pub page: u32,
    /// Results per page.
    pub per_page: u32,
    /// Genre names every result must carry.
    pub genres: Vec<String>,
    /// Tag names every result must carry.
    pub tags: Vec<String>,
    /// Allowed media formats (e.g. `MANGA`, `ONE_SHOT`, `NOVEL`).
    pub formats: Vec<String>,
    /// Sort keys in priority order.
    pub sort: Vec<String>,
    /// Bearer token, if the user is signed in.
    pub token: Option<String>,
    /// Ask the client to skip its result cache. Passed through untouched.
    pub bypass_cache: bool,
}

impl AdvancedSearchRequest {
    /// First page of `query` with no filters.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            page: DEFAULT_PAGE,
            per_page: DEFAULT_PER_PAGE,
            genres: Vec::new(),
            tags: Vec::new(),
            formats: Vec::new(),
            sort: Vec::new(),
            token: None,
            bypass_cache: false,
        }
    }

    /// Selects a page and page size.
    pub fn with_page(mut self, page: u32, per_page: u32) -> Self {
        self.page = page;
        self.per_page = per_page;
        self
    }

    /// Adds a required genre.
    pub fn genre(mut self, genre: impl Into<String>) -> Self {
        self.genres.push(genre.into());
        self
    }

    /// Adds a required tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Adds an allowed format.
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.formats.push(format.into());
        self
    }

    /// Appends a sort key.
    pub fn sort_by(mut self, key: impl Into<String>) -> Self {
        self.sort.push(key.into());
        self
    }

    /// Attaches an auth token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the cache bypass flag.
    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }

    /// True when no filter narrows the search.
    pub fn is_unfiltered(&self) -> bool {
        self.genres.is_empty() && self.tags.is_empty() && self.formats.is_empty()
    }
}
