use std::time::Duration;

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorType {
    TradingActor,
    SignalIntakeActor,
}

/// Messages sent from Actors to the Supervisor
#[derive(Debug, Clone)]
pub enum ControlMessage {
    Heartbeat(ActorType),
    Shutdown(ActorType),
    Error(ActorType, String),
}

/// Stops the heartbeat task when the owning actor returns or is aborted.
pub struct HeartbeatGuard(JoinHandle<()>);

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// The trait that all restartable services must implement
#[async_trait]
pub trait Actor: Send + Sync {
    fn name(&self) -> ActorType;

    /// The main loop of the actor.
    /// It must keep `ControlMessage::Heartbeat` flowing to the supervisor.
    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()>;

    /// Beats every 500ms until the returned guard is dropped.
    fn spawn_heartbeat(&self, supervisor_tx: mpsc::Sender<ControlMessage>) -> HeartbeatGuard {
        let name = self.name();
        HeartbeatGuard(tokio::spawn(async move {
            loop {
                if supervisor_tx
                    .send(ControlMessage::Heartbeat(name))
                    .await
                    .is_err()
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }))
    }
}
