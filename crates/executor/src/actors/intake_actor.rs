use std::time::Duration;

use async_trait::async_trait;
use common::{
    actors::{Actor, ActorType, ControlMessage},
    models::SignalDraft,
};
use tokio::{
    sync::{broadcast, mpsc},
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::services::draft_inbox::{DraftInbox, InboxError};

/// Polls the draft inbox and hands every draft to the trading actor.
pub struct SignalIntakeActor {
    inbox: DraftInbox,
    drafts_tx: broadcast::Sender<SignalDraft>,
    poll_interval: Duration,
}

impl SignalIntakeActor {
    pub fn new(inbox: DraftInbox, drafts_tx: broadcast::Sender<SignalDraft>, poll_interval: Duration) -> Self {
        Self {
            inbox,
            drafts_tx,
            poll_interval,
        }
    }

    /// Publishes every pending file. Returns the number of drafts sent.
    /// A file only moves to `processed/` once all its drafts are out.
    pub async fn poll(&self) -> Result<usize, InboxError> {
        let mut sent = 0;
        for path in self.inbox.pending().await? {
            let drafts = match self.inbox.read(&path).await {
                Ok(drafts) => drafts,
                Err(InboxError::Parse { path, source }) => {
                    warn!(path = %path.display(), error = %source, "Draft file rejected");
                    self.inbox.mark_rejected(&path).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let count = drafts.len();
            let mut delivered = true;
            for draft in drafts {
                if self.drafts_tx.send(draft).is_err() {
                    delivered = false;
                    break;
                }
            }
            if !delivered {
                // The trading feed is gone; retry the whole file next poll.
                debug!(path = %path.display(), "No trading actor subscribed");
                break;
            }

            self.inbox.mark_processed(&path).await?;
            info!(path = %path.display(), drafts = count, "Draft file consumed");
            sent += count;
        }
        Ok(sent)
    }
}

#[async_trait]
impl Actor for SignalIntakeActor {
    fn name(&self) -> ActorType {
        ActorType::SignalIntakeActor
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let _heartbeat = self.spawn_heartbeat(supervisor_tx.clone());
        info!(interval = ?self.poll_interval, "Starting signal intake");
        self.inbox.ensure_dirs().await?;

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = self.poll().await {
                error!(error = %e, "Draft inbox poll failed");
                supervisor_tx
                    .send(ControlMessage::Error(self.name(), e.to_string()))
                    .await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRAFT: &str = r#"{
        "currency": "ETHUSDT", "signal_type": "LONG", "entry": "2000",
        "targets": ["2100"], "stop_loss": "1900"
    }"#;

    #[tokio::test]
    async fn test_drafts_are_broadcast_and_files_archived() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("001.json"), format!("[{DRAFT}, {DRAFT}]")).unwrap();
        std::fs::write(dir.path().join("002.json"), "not json").unwrap();

        let (tx, mut rx) = broadcast::channel(8);
        let intake = SignalIntakeActor::new(DraftInbox::new(dir.path()), tx, Duration::from_secs(1));

        assert_eq!(intake.poll().await.unwrap(), 2);
        assert_eq!(rx.try_recv().unwrap().currency, "ETHUSDT");
        assert_eq!(rx.try_recv().unwrap().currency, "ETHUSDT");
        assert!(dir.path().join("processed/001.json").exists());
        assert!(dir.path().join("rejected/002.json").exists());
    }

    #[tokio::test]
    async fn test_file_stays_when_nobody_listens() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("001.json");
        std::fs::write(&file, DRAFT).unwrap();

        let (tx, rx) = broadcast::channel::<SignalDraft>(8);
        drop(rx);
        let intake = SignalIntakeActor::new(DraftInbox::new(dir.path()), tx, Duration::from_secs(1));

        assert_eq!(intake.poll().await.unwrap(), 0);
        assert!(file.exists());
    }
}
