//! Grants search/detail API contracts, the paginating crawler and the detail
//! enricher, with a live Grants.gov client and a fixture-first offline client.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fof_core::{EnrichedOpportunity, FieldKeys, OpportunityHit};
use fof_storage::{FetchError, HttpFetcher};
use futures::stream::{self, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "fof-adapters";

pub const GRANTS_GOV_SEARCH_URL: &str = "https://api.grants.gov/v1/api/search2";
pub const GRANTS_GOV_FETCH_URL: &str = "https://api.grants.gov/v1/api/fetchOpportunity";

/// Body of one search call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub keyword: String,
    pub rows: usize,
    pub opp_statuses: String,
    pub start_record_num: usize,
    pub opp_num: String,
    pub eligibilities: String,
    pub agencies: String,
    pub aln: String,
    pub funding_categories: String,
}

impl SearchRequest {
    pub fn page(keyword: &str, rows: usize, opp_statuses: &str, start_record_num: usize) -> Self {
        Self {
            keyword: keyword.to_string(),
            rows,
            opp_statuses: opp_statuses.to_string(),
            start_record_num,
            opp_num: String::new(),
            eligibilities: String::new(),
            agencies: String::new(),
            aln: String::new(),
            funding_categories: String::new(),
        }
    }
}

/// One decoded search response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchPage {
    pub hit_count: usize,
    pub hits: Vec<OpportunityHit>,
}

impl SearchPage {
    /// Reads `data.hitCount` and `data.oppHits`; absent pieces become zero/empty.
    pub fn from_response(body: &JsonValue) -> Self {
        let data = body.get("data").unwrap_or(&JsonValue::Null);
        let hit_count = data
            .get("hitCount")
            .and_then(JsonValue::as_u64)
            .unwrap_or(0) as usize;
        let hits = data
            .get("oppHits")
            .and_then(JsonValue::as_array)
            .map(|raw| raw.iter().map(OpportunityHit::from_json).collect())
            .unwrap_or_default();
        Self { hit_count, hits }
    }
}

/// Crawl-fatal failure of a search call.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("encoding search request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure of a single detail fetch; absorbed by the enricher.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no detail record for {0}")]
    NotFound(String),
}

#[async_trait]
pub trait GrantsApi: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, TransportError>;

    /// Raw detail payload for one opportunity number.
    async fn fetch_detail(&self, opp_number: &str) -> Result<JsonValue, EnrichmentError>;
}

/// Live Grants.gov client.
///
/// Search pages are always sent once: a failed page aborts the crawl. The
/// fetcher's backoff policy only applies to detail fetches.
#[derive(Debug)]
pub struct GrantsGovApi {
    search_http: HttpFetcher,
    detail_http: HttpFetcher,
    search_url: String,
    fetch_url: String,
}

impl GrantsGovApi {
    pub fn with_endpoints(
        http: HttpFetcher,
        search_url: impl Into<String>,
        fetch_url: impl Into<String>,
    ) -> Self {
        Self {
            search_http: http.without_retries(),
            detail_http: http,
            search_url: search_url.into(),
            fetch_url: fetch_url.into(),
        }
    }
}

#[async_trait]
impl GrantsApi for GrantsGovApi {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, TransportError> {
        let body = serde_json::to_value(request)?;
        let response = self.search_http.post_json(&self.search_url, &body).await?;
        Ok(SearchPage::from_response(&response))
    }

    async fn fetch_detail(&self, opp_number: &str) -> Result<JsonValue, EnrichmentError> {
        let body = json!({ "oppNum": opp_number });
        Ok(self.detail_http.post_json(&self.fetch_url, &body).await?)
    }
}

/// Offline API backed by captured response payloads.
///
/// Search pages are served by index `startRecordNum / rows`; requests past the
/// last page get an empty page. Detail payloads are keyed by opportunity number.
#[derive(Debug, Default)]
pub struct FixtureGrantsApi {
    pages: Vec<JsonValue>,
    details: HashMap<String, JsonValue>,
    failing_page: Option<usize>,
    search_log: Mutex<Vec<SearchRequest>>,
    detail_log: Mutex<Vec<String>>,
}

impl FixtureGrantsApi {
    pub fn new(pages: Vec<JsonValue>, details: HashMap<String, JsonValue>) -> Self {
        Self {
            pages,
            details,
            ..Default::default()
        }
    }

    /// Loads `search_pages.json` (array of search responses) and
    /// `details/<opp number>.json` from `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let pages: Vec<JsonValue> = read_json_file(dir.join("search_pages.json"))?;

        let mut details = HashMap::new();
        let details_dir = dir.join("details");
        if details_dir.is_dir() {
            let entries = fs::read_dir(&details_dir)
                .with_context(|| format!("reading {}", details_dir.display()))?;
            for entry in entries {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                details.insert(stem.to_string(), read_json_file(&path)?);
            }
        }

        Ok(Self::new(pages, details))
    }

    /// Makes the search call for page `index` fail with HTTP 500.
    pub fn failing_at_page(mut self, index: usize) -> Self {
        self.failing_page = Some(index);
        self
    }

    pub fn search_requests(&self) -> Vec<SearchRequest> {
        self.search_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn detail_requests(&self) -> Vec<String> {
        self.detail_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GrantsApi for FixtureGrantsApi {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, TransportError> {
        if let Ok(mut log) = self.search_log.lock() {
            log.push(request.clone());
        }
        let index = request.start_record_num / request.rows.max(1);
        if self.failing_page == Some(index) {
            return Err(TransportError::Fetch(FetchError::HttpStatus {
                status: 500,
                url: format!("fixture://search/{index}"),
            }));
        }
        Ok(self
            .pages
            .get(index)
            .map(SearchPage::from_response)
            .unwrap_or_default())
    }

    async fn fetch_detail(&self, opp_number: &str) -> Result<JsonValue, EnrichmentError> {
        if let Ok(mut log) = self.detail_log.lock() {
            log.push(opp_number.to_string());
        }
        self.details
            .get(opp_number)
            .cloned()
            .ok_or_else(|| EnrichmentError::NotFound(opp_number.to_string()))
    }
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Parameters of one crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlRequest {
    pub keyword: String,
    pub page_size: usize,
    pub status_filter: String,
    /// Safety cap on accumulated hits; 0 disables it.
    pub max_records: usize,
}

/// Sequential pager over the search endpoint.
pub struct SearchCrawler {
    api: Arc<dyn GrantsApi>,
}

impl SearchCrawler {
    pub fn new(api: Arc<dyn GrantsApi>) -> Self {
        Self { api }
    }

    /// Pages from record 0 until a page comes back empty, the hit count
    /// reported by the first page is reached, or `max_records` is reached.
    ///
    /// The first page's total is captured once and never refreshed. The offset
    /// always advances by `page_size`, even after a short page.
    pub async fn fetch_all(
        &self,
        request: &CrawlRequest,
    ) -> Result<Vec<OpportunityHit>, TransportError> {
        let span = info_span!("crawl", keyword = %request.keyword);
        self.crawl(request).instrument(span).await
    }

    async fn crawl(&self, request: &CrawlRequest) -> Result<Vec<OpportunityHit>, TransportError> {
        let page_size = request.page_size.max(1);
        let mut all_hits = Vec::new();
        let mut start_record = 0usize;
        let mut total_expected: Option<usize> = None;

        loop {
            let page = self
                .api
                .search(&SearchRequest::page(
                    &request.keyword,
                    page_size,
                    &request.status_filter,
                    start_record,
                ))
                .await?;

            let expected = *total_expected.get_or_insert(page.hit_count);
            let page_len = page.hits.len();
            all_hits.extend(page.hits);
            info!(fetched = all_hits.len(), expected, start_record, "fetched search page");

            if page_len == 0 {
                break;
            }
            if expected > 0 && all_hits.len() >= expected {
                break;
            }
            if request.max_records > 0 && all_hits.len() >= request.max_records {
                break;
            }

            start_record += page_size;
        }

        info!(total = all_hits.len(), "finished crawl");
        Ok(all_hits)
    }
}

/// Merges detail-record text into hits. Never fails: a missing number skips
/// the fetch, and a failed fetch leaves the enrichment fields empty.
pub struct DetailEnricher {
    api: Arc<dyn GrantsApi>,
    concurrency: usize,
}

impl DetailEnricher {
    pub fn new(api: Arc<dyn GrantsApi>, concurrency: usize) -> Self {
        Self {
            api,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn enrich(&self, hit: OpportunityHit) -> EnrichedOpportunity {
        if !hit.has_number() {
            return EnrichedOpportunity::unenriched(hit);
        }
        match self.api.fetch_detail(&hit.number).await {
            Ok(payload) => merge_detail(hit, payload.get("data").unwrap_or(&JsonValue::Null)),
            Err(err) => {
                warn!(opp_number = %hit.number, error = %err, "detail enrichment failed");
                EnrichedOpportunity::unenriched(hit)
            }
        }
    }

    /// Enriches with at most `concurrency` fetches in flight; output order
    /// matches input order.
    pub async fn enrich_all(&self, hits: Vec<OpportunityHit>) -> Vec<EnrichedOpportunity> {
        let total = hits.len();
        let enriched = stream::iter(hits)
            .map(|hit| self.enrich(hit))
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;
        debug!(total, "enrichment complete");
        enriched
    }
}

/// Resolves each enrichment field through its ordered key list.
pub fn merge_detail(hit: OpportunityHit, detail: &JsonValue) -> EnrichedOpportunity {
    let fallback_url = hit.url.clone().unwrap_or_default();
    EnrichedOpportunity {
        eligibility: FieldKeys::DETAIL_ELIGIBILITY.resolve_or(detail, ""),
        synopsis: FieldKeys::DETAIL_SYNOPSIS.resolve_or(detail, ""),
        category: FieldKeys::DETAIL_CATEGORY.resolve_or(detail, ""),
        url: FieldKeys::DETAIL_URL.resolve_or(detail, &fallback_url),
        hit,
    }
}
