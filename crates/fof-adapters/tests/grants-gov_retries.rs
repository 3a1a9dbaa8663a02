use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fof_adapters::{GrantsApi, GrantsGovApi, SearchRequest, TransportError};
use fof_storage::{BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const UNAVAILABLE: &[u8] =
    b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

/// Local endpoint that answers every request with 503 and counts requests.
async fn unavailable_endpoint() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = requests.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let counter = counter.clone();
            tokio::spawn(async move {
                read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = socket.write_all(UNAVAILABLE).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (format!("http://{addr}/"), requests)
}

async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
        let body_len = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= head_end + 4 + body_len {
            return;
        }
    }
}

fn retrying_api(search_url: String, fetch_url: String) -> GrantsGovApi {
    for var in ["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"] {
        std::env::remove_var(var);
    }
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(5),
        backoff: BackoffPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
        },
        ..HttpClientConfig::default()
    })
    .unwrap();
    GrantsGovApi::with_endpoints(http, search_url, fetch_url)
}

#[tokio::test]
async fn search_pages_are_never_retried_but_details_are() {
    let (search_url, search_requests) = unavailable_endpoint().await;
    let (fetch_url, detail_requests) = unavailable_endpoint().await;
    let api = retrying_api(search_url, fetch_url);

    let err = api
        .search(&SearchRequest::page("education", 25, "posted", 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::Fetch(FetchError::HttpStatus { status: 503, .. })
    ));
    assert_eq!(search_requests.load(Ordering::SeqCst), 1);

    assert!(api.fetch_detail("ED-26-001").await.is_err());
    assert_eq!(detail_requests.load(Ordering::SeqCst), 3);
}
