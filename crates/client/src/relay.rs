//! Ordered trickle-ICE candidate relay
//!
//! Local candidates surface from the ICE agent before the server has told
//! us our connection id. The relay queues them, then forwards every
//! candidate to the signaling endpoint in discovery order once the id is
//! known. A single consumer task gives a total order with no duplication.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use voicebridge_transport::IceCandidate;

use crate::signaling::SignalingApi;
use crate::ClientError;

/// Destination for relayed candidates
#[async_trait]
pub trait CandidateSink: Send + Sync {
    async fn deliver(
        &self,
        connection_id: &str,
        candidates: &[IceCandidate],
    ) -> Result<(), ClientError>;
}

#[async_trait]
impl CandidateSink for SignalingApi {
    async fn deliver(
        &self,
        connection_id: &str,
        candidates: &[IceCandidate],
    ) -> Result<(), ClientError> {
        self.send_candidates(connection_id, candidates).await
    }
}

/// Relay task handle
pub struct CandidateRelay {
    queue: mpsc::UnboundedSender<IceCandidate>,
    id_tx: watch::Sender<Option<String>>,
    task: JoinHandle<()>,
}

impl CandidateRelay {
    pub fn spawn(sink: Arc<dyn CandidateSink>) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<IceCandidate>();
        let (id_tx, mut id_rx) = watch::channel(None::<String>);

        let task = tokio::spawn(async move {
            // Nothing can be posted before the answer arrives
            let connection_id = loop {
                if let Some(id) = id_rx.borrow().clone() {
                    break id;
                }
                if id_rx.changed().await.is_err() {
                    return;
                }
            };

            while let Some(first) = rx.recv().await {
                // Batch whatever has already queued up, preserving order
                let mut batch = vec![first];
                while let Ok(candidate) = rx.try_recv() {
                    batch.push(candidate);
                }

                if let Err(e) = sink.deliver(&connection_id, &batch).await {
                    // Dropped candidates are recoverable; the other pair
                    // candidates usually suffice
                    tracing::warn!(error = %e, count = batch.len(), "Candidate delivery failed");
                }
            }
        });

        Self { queue, id_tx, task }
    }

    /// Queue one local candidate; order of calls is the order of delivery
    pub fn push(&self, candidate: IceCandidate) {
        let _ = self.queue.send(candidate);
    }

    /// Unblock delivery once the server has assigned our id
    pub fn set_connection_id(&self, id: String) {
        let _ = self.id_tx.send(Some(id));
    }

    /// Stop relaying; queued candidates are dropped
    pub fn stop(&self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct RecordingSink {
        batches: Mutex<Vec<(String, Vec<IceCandidate>)>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
            })
        }

        fn delivered(&self) -> Vec<String> {
            self.batches
                .lock()
                .iter()
                .flat_map(|(_, batch)| batch.iter().map(|c| c.candidate.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl CandidateSink for RecordingSink {
        async fn deliver(
            &self,
            connection_id: &str,
            candidates: &[IceCandidate],
        ) -> Result<(), ClientError> {
            self.batches
                .lock()
                .push((connection_id.to_string(), candidates.to_vec()));
            Ok(())
        }
    }

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n}"),
            sdp_mid: Some("audio".to_string()),
            sdp_mline_index: Some(0),
        }
    }

    #[tokio::test]
    async fn test_candidates_held_until_id_known() {
        let sink = RecordingSink::new();
        let relay = CandidateRelay::spawn(sink.clone());

        relay.push(candidate(1));
        relay.push(candidate(2));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink.delivered().is_empty());

        relay.set_connection_id("conn-1".to_string());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(sink.delivered(), vec!["candidate:1", "candidate:2"]);
        assert!(sink.batches.lock().iter().all(|(id, _)| id == "conn-1"));
    }

    #[tokio::test]
    async fn test_total_order_no_duplicates() {
        let sink = RecordingSink::new();
        let relay = CandidateRelay::spawn(sink.clone());
        relay.set_connection_id("conn-2".to_string());

        for n in 0..20 {
            relay.push(candidate(n));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let delivered = sink.delivered();
        let expected: Vec<String> = (0..20).map(|n| format!("candidate:{n}")).collect();
        assert_eq!(delivered, expected);
    }

    #[tokio::test]
    async fn test_late_candidates_follow_early_ones() {
        let sink = RecordingSink::new();
        let relay = CandidateRelay::spawn(sink.clone());

        relay.push(candidate(1));
        relay.set_connection_id("conn-3".to_string());
        tokio::time::sleep(Duration::from_millis(20)).await;
        relay.push(candidate(2));
        relay.push(candidate(3));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            sink.delivered(),
            vec!["candidate:1", "candidate:2", "candidate:3"]
        );
    }
}
