//! Output-directory storage and the JSON-over-HTTP transport used by the
//! Grants.gov client.

mod http;
mod output;

pub use http::{BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher};
pub use output::{OutputStore, StoredOutput};

pub const CRATE_NAME: &str = "fof-storage";
