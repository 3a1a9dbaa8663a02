use std::path::PathBuf;
use std::sync::Arc;

use fof_adapters::{CrawlRequest, DetailEnricher, FixtureGrantsApi, SearchCrawler};

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/grants-gov/sample")
}

#[tokio::test]
async fn grants_gov_snapshot_crawls_and_enriches() {
    let api = Arc::new(FixtureGrantsApi::from_dir(fixture_dir()).unwrap());

    let hits = SearchCrawler::new(api.clone())
        .fetch_all(&CrawlRequest {
            keyword: "education OR youth OR workforce".into(),
            page_size: 2,
            status_filter: "forecasted|posted".into(),
            max_records: 2000,
        })
        .await
        .unwrap();

    assert_eq!(hits.len(), 3);
    assert_eq!(api.search_requests().len(), 2);
    assert_eq!(hits[2].number, "NSF-26-540");
    assert_eq!(hits[2].agency, "U.S. National Science Foundation");
    assert_eq!(hits[2].close_date, "2026-12-01");

    let enriched = DetailEnricher::new(api.clone(), 4).enrich_all(hits).await;
    assert_eq!(enriched.len(), 3);

    let community = &enriched[0];
    assert_eq!(
        community.eligibility,
        "Nonprofits having a 501(c)(3) status; Independent school districts"
    );
    assert_eq!(community.url, "https://www.grants.gov/search-results-detail/358101");

    let youthbuild = &enriched[1];
    assert!(youthbuild.synopsis.is_empty());
    assert!(youthbuild.url.is_empty());

    let nsf = &enriched[2];
    assert!(nsf.synopsis.starts_with("Funds robotics clubs"));
    assert_eq!(nsf.category, "Science and Technology; Education");
}
