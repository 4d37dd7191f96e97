//! Trip-id sharding across consumer partitions
//!
//! Rules 8-10 compare a record with the previous one for the same trip, so
//! every message for a trip must reach the same sequential consumer. The
//! router peeks `EVENT_NO_TRIP` and sends the delivery to partition
//! `trip_id mod N`. Payloads without a readable trip id go to partition 0,
//! where they are counted as decode or completeness failures.

use crate::transport::{Delivery, TransportError};
use serde::Deserialize;
use tokio::sync::mpsc;

#[derive(Deserialize)]
struct TripKey {
    #[serde(rename = "EVENT_NO_TRIP", default)]
    trip_id: Option<i64>,
}

#[derive(Clone)]
pub struct TripRouter {
    partitions: Vec<mpsc::Sender<Delivery>>,
}

impl TripRouter {
    pub fn new(partitions: Vec<mpsc::Sender<Delivery>>) -> Self {
        Self { partitions }
    }

    /// Partition index for a raw payload
    pub fn partition_for(&self, payload: &[u8]) -> usize {
        let n = self.partitions.len().max(1) as i64;
        serde_json::from_slice::<TripKey>(payload)
            .ok()
            .and_then(|key| key.trip_id)
            .map(|trip_id| trip_id.rem_euclid(n) as usize)
            .unwrap_or(0)
    }

    /// Hand a delivery to its partition, waiting for queue space
    pub async fn route(&self, delivery: Delivery) -> Result<usize, TransportError> {
        let index = self.partition_for(&delivery.payload);
        let partition = self.partitions.get(index).ok_or(TransportError::Closed)?;

        partition.send(delivery).await.map_err(|_| TransportError::Closed)?;
        Ok(index)
    }
}
