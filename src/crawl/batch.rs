//! Bounded-concurrency batch processing
//!
//! Both the discovery crawl and the query-time fetch stage cap their
//! simultaneous outbound requests: items run in batches of at most
//! `concurrency`, each batch completes before the next starts, and a fixed
//! delay separates batches to respect third-party rate limits.

use futures::future::join_all;
use std::future::Future;
use std::time::Duration;

/// Run `f` over every item with at most `concurrency` in flight at once
///
/// Results come back in input order. The delay is skipped after the final
/// batch.
pub async fn process_in_batches<T, F, Fut, R>(
    items: Vec<T>,
    concurrency: usize,
    delay: Duration,
    f: F,
) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let concurrency = concurrency.max(1);
    let mut results = Vec::with_capacity(items.len());
    let batches: Vec<Vec<T>> = {
        let mut batches = Vec::new();
        let mut current = Vec::with_capacity(concurrency);
        for item in items {
            current.push(item);
            if current.len() == concurrency {
                batches.push(std::mem::replace(&mut current, Vec::with_capacity(concurrency)));
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    };
    let batch_count = batches.len();

    for (i, batch) in batches.into_iter().enumerate() {
        results.extend(join_all(batch.into_iter().map(&f)).await);
        if i + 1 < batch_count && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    results
}
