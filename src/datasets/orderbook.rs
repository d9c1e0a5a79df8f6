//! Spot order-book snapshots and their depth profiles

use futures::StreamExt;
use tracing::{info, warn};

use crate::client::{query, ApiClient, Paginator};
use crate::liquidity::{aggregate_snapshots, snapshots_from_page, LiquidityProfile};

#[derive(Debug, Clone, Default)]
pub struct SnapshotQuery {
    pub exchange: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// Stop after processing this many pages; `None` walks the whole history.
    ///
    /// A page's next link is fetched before the page is handed out, so a
    /// limit of `n` still sends `n + 1` requests when more pages exist.
    pub max_pages: Option<usize>,
}

/// Lazily page through `/markets/spot/order-book-snapshots/{instrument}`
pub fn snapshot_pages<'a>(client: &'a ApiClient, instrument: &str, request: &SnapshotQuery) -> Paginator<'a> {
    let mut params = query(&[("exchange", request.exchange.as_str()), ("timeFormat", "hr")]);
    if let Some(start) = &request.start_date {
        params.push(("startDate".to_string(), start.clone()));
    }
    if let Some(end) = &request.end_date {
        params.push(("endDate".to_string(), end.clone()));
    }

    client.paginate(
        &format!("/markets/spot/order-book-snapshots/{}", instrument),
        params,
        Vec::new(),
    )
}

/// Depth profile of every snapshot on every page, in page order
pub async fn collect_liquidity(
    client: &ApiClient,
    instrument: &str,
    request: &SnapshotQuery,
    step_bps: f64,
) -> Vec<LiquidityProfile> {
    let limit = request.max_pages.unwrap_or(usize::MAX);
    let mut pages = Box::pin(snapshot_pages(client, instrument, request).into_stream().take(limit));

    let mut profiles = Vec::new();
    let mut page_no = 0usize;
    while let Some(page) = pages.next().await {
        page_no += 1;
        let Some(body) = page.json().filter(|_| page.is_ok()) else {
            warn!(
                status = page.status,
                url = page.request_url.as_deref().unwrap_or_default(),
                "Skipping failed snapshot page"
            );
            continue;
        };
        match snapshots_from_page(body) {
            Ok(snapshots) => {
                let batch = aggregate_snapshots(&snapshots, step_bps);
                info!("Page {}: {} snapshots profiled", page_no, batch.len());
                profiles.extend(batch);
            }
            Err(e) => warn!("Page {} has malformed snapshots: {}", page_no, e),
        }
    }
    profiles
}
