//! JSONL replay feed
//!
//! Reads newline-delimited JSON (a file, or stdin for `-`) and pushes one
//! delivery per breadcrumb into the partition queues. A line holding a JSON
//! array is split into one delivery per element, matching the per-vehicle
//! arrays the fetch step saves. Lines that are not JSON are forwarded as-is
//! so the pipeline counts them as decode errors.

use crate::pipeline::router::TripRouter;
use crate::transport::source::Delivery;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

/// Open a replay source: `-` is stdin, anything else a file path
pub async fn open_source(source: &str) -> std::io::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if source == "-" {
        Ok(Box::new(BufReader::new(tokio::io::stdin())))
    } else {
        let file = tokio::fs::File::open(source).await?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Split one input line into message payloads
pub fn split_line(line: &str) -> Vec<Vec<u8>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if trimmed.starts_with('[') {
        if let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(trimmed) {
            return items
                .iter()
                .filter_map(|item| serde_json::to_vec(item).ok())
                .collect();
        }
    }

    vec![trimmed.as_bytes().to_vec()]
}

/// Feed every line of `reader` through `router`
///
/// Returns the number of deliveries routed. Stops early, without error, when
/// the partitions have shut down.
pub async fn feed_lines<R>(reader: R, router: &TripRouter) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut next_id = 0u64;

    while let Some(line) = lines.next_line().await? {
        for payload in split_line(&line) {
            next_id += 1;
            if router.route(Delivery::new(next_id, payload)).await.is_err() {
                log::info!("🛑 Partitions closed, feed stopped after {} messages", next_id - 1);
                return Ok(next_id - 1);
            }
        }
    }

    log::info!("📭 Feed exhausted after {} messages", next_id);
    Ok(next_id)
}

/// Spawn the replay feed; the router (and with it every partition sender) is
/// dropped when the feed ends, which lets the consumers drain
pub fn spawn_jsonl_feed(source: String, router: TripRouter) -> JoinHandle<std::io::Result<u64>> {
    tokio::spawn(async move {
        let name = if source == "-" { "stdin" } else { source.as_str() };
        log::info!("📥 Reading breadcrumbs from {}", name);
        let reader = open_source(&source).await?;
        feed_lines(reader, &router).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_split_line_variants() {
        assert!(split_line("   ").is_empty());
        assert_eq!(split_line(r#"{"A": 1}"#), vec![br#"{"A": 1}"#.to_vec()]);
        assert_eq!(split_line(r#"[{"A":1},{"A":2}]"#).len(), 2);
        assert_eq!(split_line("[not json"), vec![b"[not json".to_vec()]);
    }

    #[tokio::test]
    async fn test_feed_lines_routes_everything() {
        let (tx, mut rx) = mpsc::channel(16);
        let router = TripRouter::new(vec![tx]);
        let input = concat!(
            "{\"EVENT_NO_TRIP\": 1}\n",
            "\n",
            "[{\"EVENT_NO_TRIP\": 2}, {\"EVENT_NO_TRIP\": 3}]\n",
            "garbage\n",
        );

        let count = feed_lines(input.as_bytes(), &router).await.unwrap();
        drop(router);

        assert_eq!(count, 4);
        let mut ids = Vec::new();
        while let Some(delivery) = rx.recv().await {
            ids.push(delivery.id);
        }
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_feed_stops_when_consumers_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let router = TripRouter::new(vec![tx]);

        let count = feed_lines("{}\n{}\n".as_bytes(), &router).await.unwrap();
        assert_eq!(count, 0);
    }
}
