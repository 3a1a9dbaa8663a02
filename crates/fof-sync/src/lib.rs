//! Discovery pipeline orchestration: crawl, deadline screen, enrich, score,
//! rank and export.

pub mod export;
pub mod filter;
pub mod scoring;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use fof_adapters::{
    CrawlRequest, DetailEnricher, GrantsApi, GrantsGovApi, SearchCrawler, GRANTS_GOV_FETCH_URL,
    GRANTS_GOV_SEARCH_URL,
};
use fof_core::{ExportRow, KeywordTaxonomy, OpportunityHit};
use fof_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher, OutputStore};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub use export::{Exporter, Manifest, ManifestFile};
pub use filter::{DeadlineFilter, QuantilePolicy, QuantileSelection, ThresholdPolicy};
pub use scoring::{BucketWeight, Scorer, ScoringPolicy};

pub const CRATE_NAME: &str = "fof-sync";

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub keyword: String,
    pub page_size: usize,
    pub opp_statuses: String,
    pub max_records: usize,
    pub min_days_to_deadline: i64,
    pub taxonomy_path: PathBuf,
    pub output_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub http_retries: usize,
    pub enrich_concurrency: usize,
    pub search_url: String,
    pub fetch_url: String,
    pub write_parquet: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            keyword: "education OR youth OR workforce".to_string(),
            page_size: 200,
            opp_statuses: "forecasted|posted".to_string(),
            max_records: 2000,
            min_days_to_deadline: filter::DEFAULT_MIN_DAYS_TO_DEADLINE,
            taxonomy_path: PathBuf::from("config/internal_keywords.json"),
            output_dir: PathBuf::from("."),
            user_agent: "fof-bot/0.1".to_string(),
            http_timeout_secs: 30,
            http_retries: 0,
            enrich_concurrency: 8,
            search_url: GRANTS_GOV_SEARCH_URL.to_string(),
            fetch_url: GRANTS_GOV_FETCH_URL.to_string(),
            write_parquet: false,
        }
    }
}

impl DiscoveryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            keyword: env_or("FOF_KEYWORD", defaults.keyword),
            page_size: env_parse("FOF_PAGE_SIZE", defaults.page_size),
            opp_statuses: env_or("FOF_OPP_STATUSES", defaults.opp_statuses),
            max_records: env_parse("FOF_MAX_RECORDS", defaults.max_records),
            min_days_to_deadline: env_parse(
                "FOF_MIN_DAYS_TO_DEADLINE",
                defaults.min_days_to_deadline,
            ),
            taxonomy_path: std::env::var("FOF_TAXONOMY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.taxonomy_path),
            output_dir: std::env::var("FOF_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            user_agent: env_or("FOF_USER_AGENT", defaults.user_agent),
            http_timeout_secs: env_parse("FOF_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            http_retries: env_parse("FOF_HTTP_RETRIES", defaults.http_retries),
            enrich_concurrency: env_parse("FOF_ENRICH_CONCURRENCY", defaults.enrich_concurrency),
            search_url: env_or("FOF_SEARCH_URL", defaults.search_url),
            fetch_url: env_or("FOF_FETCH_URL", defaults.fetch_url),
            write_parquet: std::env::var("FOF_WRITE_PARQUET")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.write_parquet),
        }
    }

    pub fn crawl_request(&self) -> CrawlRequest {
        CrawlRequest {
            keyword: self.keyword.clone(),
            page_size: self.page_size,
            status_filter: self.opp_statuses.clone(),
            max_records: self.max_records,
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            max_in_flight: self.enrich_concurrency.max(1),
            backoff: BackoffPolicy::with_retries(self.http_retries),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Reads the mission/programs/technology lists from a JSON or YAML file
/// (chosen by extension) and normalises the keywords.
pub fn load_taxonomy(path: impl AsRef<Path>) -> Result<KeywordTaxonomy> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let taxonomy: KeywordTaxonomy = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => {
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        _ => serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?,
    };
    let taxonomy = taxonomy.normalized();
    if taxonomy.is_empty() {
        warn!(path = %path.display(), "keyword taxonomy is empty; every score will be bonus-only");
    }
    Ok(taxonomy)
}

/// Every relevance policy applied to one scored set.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingPolicies {
    pub threshold: ThresholdPolicy,
    pub quantile: QuantilePolicy,
    pub top_k: usize,
    pub fit_top: usize,
}

impl Default for RankingPolicies {
    fn default() -> Self {
        Self {
            threshold: ThresholdPolicy::default(),
            quantile: QuantilePolicy::default(),
            top_k: 100,
            fit_top: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedSets {
    /// Every scored row, Score descending.
    pub full: Vec<ExportRow>,
    pub relevant: Vec<ExportRow>,
    pub adaptive: QuantileSelection,
    pub top_k: Vec<ExportRow>,
    pub fit: Vec<ExportRow>,
}

impl RankedSets {
    /// Relevant rows if any survived, otherwise the head of the full set.
    pub fn preview(&self, n: usize) -> &[ExportRow] {
        let source = if self.relevant.is_empty() {
            &self.full
        } else {
            &self.relevant
        };
        &source[..n.min(source.len())]
    }
}

pub fn rank(mut rows: Vec<ExportRow>, policies: &RankingPolicies) -> RankedSets {
    filter::sort_by_score_desc(&mut rows);
    let relevant = policies.threshold.apply(&rows);
    let adaptive = policies.quantile.apply(&rows);
    let top_k = filter::top_k(&rows, policies.top_k);
    let fit = filter::fit_weighted(&rows, policies.fit_top);
    RankedSets {
        full: rows,
        relevant,
        adaptive,
        top_k,
        fit,
    }
}

/// Writes every ranked table plus the manifest.
pub async fn export_ranked(
    exporter: &Exporter,
    sets: &RankedSets,
    write_parquet: bool,
) -> Result<Vec<ManifestFile>> {
    let mut files = vec![
        exporter.write_csv(export::FULL_CSV, &sets.full).await?,
        exporter.write_csv(export::RELEVANT_CSV, &sets.relevant).await?,
        exporter.write_csv(export::ADAPTIVE_CSV, &sets.adaptive.rows).await?,
        exporter.write_csv(export::TOPK_CSV, &sets.top_k).await?,
        exporter.write_csv(export::FIT_CSV, &sets.fit).await?,
    ];
    if write_parquet {
        files.push(exporter.write_parquet(export::FULL_PARQUET, &sets.full).await?);
    }
    exporter.write_manifest(files.clone()).await?;
    Ok(files)
}

/// Keeps the first hit per opportunity number; hits without a number are kept.
pub fn dedupe_hits(hits: Vec<OpportunityHit>) -> Vec<OpportunityHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| !hit.has_number() || seen.insert(hit.number.clone()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreStats {
    pub min: u32,
    pub max: u32,
    pub mean: f64,
}

pub fn score_stats(rows: &[ExportRow]) -> Option<ScoreStats> {
    let min = rows.iter().map(|r| r.score).min()?;
    let max = rows.iter().map(|r| r.score).max()?;
    let sum: u64 = rows.iter().map(|r| u64::from(r.score)).sum();
    Some(ScoreStats {
        min,
        max,
        mean: sum as f64 / rows.len() as f64,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub crawled: usize,
    pub unique: usize,
    pub after_deadline: usize,
    pub relevant: usize,
    pub adaptive: usize,
    pub stats: Option<ScoreStats>,
    pub outputs: Vec<ManifestFile>,
    pub preview: Vec<ExportRow>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The crawl returned nothing; nothing was scored or written.
    NoOpportunities,
    Completed(RunSummary),
}

pub struct DiscoveryPipeline {
    config: DiscoveryConfig,
    api: Arc<dyn GrantsApi>,
    scorer: Scorer,
    deadline: DeadlineFilter,
    ranking: RankingPolicies,
    exporter: Exporter,
}

impl DiscoveryPipeline {
    pub fn new(
        config: DiscoveryConfig,
        api: Arc<dyn GrantsApi>,
        taxonomy: KeywordTaxonomy,
    ) -> Self {
        let deadline = DeadlineFilter::new(config.min_days_to_deadline);
        let exporter = Exporter::new(OutputStore::new(config.output_dir.clone()));
        Self {
            config,
            api,
            scorer: Scorer::new(taxonomy, ScoringPolicy::default()),
            deadline,
            ranking: RankingPolicies::default(),
            exporter,
        }
    }

    pub fn with_policies(mut self, scoring: ScoringPolicy, ranking: RankingPolicies) -> Self {
        self.scorer = Scorer::new(self.scorer.taxonomy().clone(), scoring);
        self.ranking = ranking;
        self
    }

    pub async fn run_once(&self, today: NaiveDate) -> Result<RunOutcome> {
        let run_id = Uuid::new_v4();
        self.run(run_id, today)
            .instrument(info_span!("discovery_run", %run_id))
            .await
    }

    async fn run(&self, run_id: Uuid, today: NaiveDate) -> Result<RunOutcome> {
        let started_at = Utc::now();

        let hits = SearchCrawler::new(self.api.clone())
            .fetch_all(&self.config.crawl_request())
            .await
            .context("crawling search results")?;
        let crawled = hits.len();
        if hits.is_empty() {
            info!("no opportunities returned");
            return Ok(RunOutcome::NoOpportunities);
        }

        let hits = dedupe_hits(hits);
        let unique = hits.len();

        let hits = hits
            .into_iter()
            .filter(|hit| self.deadline.passes(&hit.close_date, today))
            .collect::<Vec<_>>();
        let after_deadline = hits.len();
        info!(crawled, unique, after_deadline, "deadline filter applied");

        let enriched = DetailEnricher::new(self.api.clone(), self.config.enrich_concurrency)
            .enrich_all(hits)
            .await;

        let rows = enriched
            .iter()
            .map(|opp| ExportRow::derive(opp, &self.scorer.score_opportunity(opp), today))
            .collect::<Vec<_>>();
        let stats = score_stats(&rows);

        let sets = rank(rows, &self.ranking);
        info!(
            relevant = sets.relevant.len(),
            adaptive = sets.adaptive.rows.len(),
            quantile = sets.adaptive.quantile,
            "ranking complete"
        );

        let outputs = export_ranked(&self.exporter, &sets, self.config.write_parquet).await?;

        Ok(RunOutcome::Completed(RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            crawled,
            unique,
            after_deadline,
            relevant: sets.relevant.len(),
            adaptive: sets.adaptive.rows.len(),
            stats,
            outputs,
            preview: sets.preview(10).to_vec(),
        }))
    }
}

pub fn live_api(config: &DiscoveryConfig) -> Result<Arc<dyn GrantsApi>> {
    let http = HttpFetcher::new(config.http_client_config())?;
    Ok(Arc::new(GrantsGovApi::with_endpoints(
        http,
        config.search_url.clone(),
        config.fetch_url.clone(),
    )))
}

pub async fn run_discovery_from_env(today: NaiveDate) -> Result<RunOutcome> {
    let config = DiscoveryConfig::from_env();
    let taxonomy = load_taxonomy(&config.taxonomy_path)?;
    let api = live_api(&config)?;
    DiscoveryPipeline::new(config, api, taxonomy).run_once(today).await
}

/// Re-ranks a previously exported full table and rewrites the ranked tables.
pub async fn rerank_full_table(
    input: impl AsRef<Path>,
    output_dir: impl Into<PathBuf>,
    policies: &RankingPolicies,
) -> Result<RankedSets> {
    let rows = export::read_rows(input)?;
    let sets = rank(rows, policies);
    let exporter = Exporter::new(OutputStore::new(output_dir));
    export_ranked(&exporter, &sets, false).await?;
    Ok(sets)
}
