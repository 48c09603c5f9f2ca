use std::{collections::HashMap, time::Duration};
use tracing::{error, info, warn};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant},
};

use crate::actors::{Actor, ActorType, ControlMessage};

type ActorFactory = Box<dyn Fn() -> Box<dyn Actor> + Send + Sync>;

/// Restarts actors whose heartbeat goes silent. The old task is always
/// aborted before its replacement is spawned, so two instances never overlap.
pub struct Supervisor {
    actor_factories: HashMap<ActorType, ActorFactory>,
    spawn_order: Vec<ActorType>,
    pulses: HashMap<ActorType, Instant>,
    handles: HashMap<ActorType, JoinHandle<()>>,
    check_interval: Duration,
    timeout: Duration,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            actor_factories: HashMap::new(),
            spawn_order: Vec::new(),
            pulses: HashMap::new(),
            handles: HashMap::new(),
            check_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(3),
        }
    }

    /// Actors start in registration order, so a consumer registered first
    /// is subscribed before its producer runs.
    pub fn register_actor(&mut self, actor_type: ActorType, factory: ActorFactory) {
        if self.actor_factories.insert(actor_type, factory).is_none() {
            self.spawn_order.push(actor_type);
        }
    }

    pub async fn start(&mut self) {
        let mut check_interval = time::interval(self.check_interval);
        let (supervisor_tx, mut supervisor_rx) = mpsc::channel::<ControlMessage>(512);

        for actor in self.spawn_order.clone() {
            self.spawn_actor(actor, supervisor_tx.clone());
        }

        loop {
            tokio::select! {
                Some(msg) = supervisor_rx.recv() => {
                    match msg {
                        ControlMessage::Heartbeat(actor_type) => {
                            if self.handles.contains_key(&actor_type) {
                                self.pulses.insert(actor_type, Instant::now());
                            }
                        }
                        ControlMessage::Shutdown(actor_type) => {
                            warn!(actor = ?actor_type, "Actor is shutting down gracefully");
                            self.pulses.remove(&actor_type);
                            if let Some(handle) = self.handles.remove(&actor_type) {
                                handle.abort();
                            }
                        }
                        ControlMessage::Error(actor_type, error_msg) => {
                            error!(actor = ?actor_type, error = %error_msg, "Actor reported error");
                        }
                    }
                }

                _ = check_interval.tick() => {
                    let dead_timeout = Instant::now() - self.timeout;
                    let dead_actors: Vec<ActorType> = self
                        .pulses
                        .iter()
                        .filter(|(_, last)| **last < dead_timeout)
                        .map(|(actor, _)| *actor)
                        .collect();

                    for actor in dead_actors {
                        warn!(actor = ?actor, "Actor is unresponsive, restarting");
                        if let Some(handle) = self.handles.remove(&actor) {
                            handle.abort();
                        }
                        self.spawn_actor(actor, supervisor_tx.clone());
                    }
                }
            }
        }
    }

    fn spawn_actor(&mut self, actor_type: ActorType, tx: mpsc::Sender<ControlMessage>) {
        let Some(factory) = self.actor_factories.get(&actor_type) else {
            return;
        };
        let mut new_actor = factory();
        let handle = tokio::spawn(async move {
            if let Err(e) = new_actor.run(tx).await {
                error!(actor = ?actor_type, error = %e, "Actor crashed");
            }
        });
        info!(actor = ?actor_type, "Actor spawned");
        self.handles.insert(actor_type, handle);
        self.pulses.insert(actor_type, Instant::now());
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
