//! Background parse worker: one document at a time, oldest first. A failed
//! document is recorded and skipped; the loop itself never dies.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::RagService;

/// Poll interval when no upload nudges arrive (covers documents recovered
/// at startup and nudges lost to a full channel).
const IDLE_POLL: Duration = Duration::from_secs(5);

pub fn spawn(service: Arc<RagService>, mut rx: mpsc::Receiver<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("parse worker started");
        loop {
            while let Some((base, doc_id)) = service.oldest_pending().await {
                service.process_document(&base, doc_id).await;
            }
            tokio::select! {
                nudge = rx.recv() => {
                    if nudge.is_none() {
                        info!("parse worker shutting down");
                        return;
                    }
                }
                _ = tokio::time::sleep(IDLE_POLL) => {}
            }
        }
    })
}
