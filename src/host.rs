//! The worker runtime: registration lifecycle, client control and event
//! dispatch.
//!
//! A registration has at most one active worker (the one answering fetches)
//! and at most one waiting worker (installed, not yet activated). A newly
//! registered worker is installed first; it activates immediately when it
//! asked to skip waiting or when nothing is active, and waits otherwise.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cache::CacheStorage;
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::event::{ExtendableEvent, FetchEvent, LifecycleEvent, MessageEvent};
use crate::fetch::Fetcher;
use crate::http::{Request, Response};
use crate::worker::OfflineWorker;

/// Lifecycle state of a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Created, no event dispatched yet.
    Parsed,
    /// Install event in progress.
    Installing,
    /// Installed, waiting to activate.
    Installed,
    /// Activate event in progress.
    Activating,
    /// Active and answering fetches.
    Activated,
    /// Failed to install or replaced by a newer worker.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parsed => write!(f, "parsed"),
            Self::Installing => write!(f, "installing"),
            Self::Installed => write!(f, "installed"),
            Self::Activating => write!(f, "activating"),
            Self::Activated => write!(f, "activated"),
            Self::Redundant => write!(f, "redundant"),
        }
    }
}

/// Snapshot of one worker for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub id: Uuid,
    pub cache_name: String,
    pub state: WorkerState,
}

/// Snapshot of the registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostStatus {
    pub active: Option<WorkerStatus>,
    pub waiting: Option<WorkerStatus>,
    pub clients: usize,
    pub controlled_clients: usize,
}

struct Registration<C, F> {
    active: Option<OfflineWorker<C, F>>,
    waiting: Option<OfflineWorker<C, F>>,
    /// Open clients and the id of the worker controlling each.
    clients: HashMap<Uuid, Option<Uuid>>,
}

fn transition<C, F>(worker: &OfflineWorker<C, F>, state: WorkerState)
where
    C: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    log::info!(
        "Worker {} ({}) is {state}",
        worker.scope().id(),
        worker.config().cache_name
    );
}

fn status_of<C, F>(worker: &OfflineWorker<C, F>, state: WorkerState) -> WorkerStatus
where
    C: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    WorkerStatus {
        id: worker.scope().id(),
        cache_name: worker.config().cache_name.clone(),
        state,
    }
}

/// Hosts worker instances over a shared cache store and network.
pub struct WorkerHost<C, F> {
    caches: Arc<C>,
    network: Arc<F>,
    registration: Mutex<Registration<C, F>>,
}

impl<C, F> WorkerHost<C, F>
where
    C: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    #[must_use]
    pub fn new(caches: Arc<C>, network: Arc<F>) -> Self {
        Self {
            caches,
            network,
            registration: Mutex::new(Registration {
                active: None,
                waiting: None,
                clients: HashMap::new(),
            }),
        }
    }

    #[must_use]
    pub fn caches(&self) -> &C {
        &self.caches
    }

    /// Installs a new worker for `config` and activates it if it may.
    ///
    /// Fetches keep going to the currently active worker while the new one
    /// installs. Returns the new worker's state: `Activated` or `Installed`
    /// (waiting).
    ///
    /// # Errors
    ///
    /// Returns the install failure; the new worker is then redundant and the
    /// registration is unchanged.
    pub async fn register(&self, config: WorkerConfig) -> Result<WorkerState> {
        config.validate()?;
        let worker = OfflineWorker::new(config, Arc::clone(&self.caches), Arc::clone(&self.network));
        transition(&worker, WorkerState::Parsed);

        transition(&worker, WorkerState::Installing);
        let mut event = ExtendableEvent::new(LifecycleEvent::Install);
        worker.on_install(&mut event);
        if let Err(e) = event.settle().await {
            log::error!("Install of {} failed: {e}", worker.config().cache_name);
            transition(&worker, WorkerState::Redundant);
            return Err(e);
        }
        transition(&worker, WorkerState::Installed);

        let mut registration = self.registration.lock().await;
        if let Some(previous) = registration.waiting.take() {
            transition(&previous, WorkerState::Redundant);
        }
        if registration.active.is_none() || worker.scope().skip_waiting_requested() {
            Self::activate(&mut registration, worker).await;
            Ok(WorkerState::Activated)
        } else {
            registration.waiting = Some(worker);
            Ok(WorkerState::Installed)
        }
    }

    /// Activates a worker for `config` over a generation the store already
    /// holds, without installing it again.
    ///
    /// This is how a restarted host keeps serving a persisted cache while
    /// the network is down.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the store has no generation named
    /// `config.cache_name`.
    pub async fn resume(&self, config: WorkerConfig) -> Result<WorkerState> {
        config.validate()?;
        if !self.caches.has(&config.cache_name).await? {
            return Err(Error::InvalidState(format!(
                "no cached generation {}",
                config.cache_name
            )));
        }
        let worker = OfflineWorker::new(config, Arc::clone(&self.caches), Arc::clone(&self.network));
        log::info!("Resuming cached generation {}", worker.config().cache_name);
        transition(&worker, WorkerState::Installed);

        let mut registration = self.registration.lock().await;
        if let Some(previous) = registration.waiting.take() {
            transition(&previous, WorkerState::Redundant);
        }
        Self::activate(&mut registration, worker).await;
        Ok(WorkerState::Activated)
    }

    /// Runs the activate event and promotes `worker`. Fetches are held by the
    /// registration lock until activation finishes.
    async fn activate(registration: &mut Registration<C, F>, worker: OfflineWorker<C, F>) {
        transition(&worker, WorkerState::Activating);
        let mut event = ExtendableEvent::new(LifecycleEvent::Activate);
        worker.on_activate(&mut event);
        if let Err(e) = event.settle().await {
            log::warn!("Activate of {} failed: {e}", worker.config().cache_name);
        }

        if let Some(previous) = registration.active.take() {
            transition(&previous, WorkerState::Redundant);
        }
        if worker.scope().take_claim() {
            let id = worker.scope().id();
            for controller in registration.clients.values_mut() {
                *controller = Some(id);
            }
            log::info!("Worker {id} claimed {} clients", registration.clients.len());
        }
        transition(&worker, WorkerState::Activated);
        registration.active = Some(worker);
    }

    /// Posts a message to the waiting worker, or the active one if none is
    /// waiting. A waiting worker that asks to skip waiting is activated.
    ///
    /// Returns true if the worker recognised the message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if no worker is registered.
    pub async fn post_message(&self, data: serde_json::Value) -> Result<bool> {
        let event = MessageEvent::new(data);
        let mut registration = self.registration.lock().await;

        if let Some(waiting) = registration.waiting.take() {
            let recognised = waiting.on_message(&event);
            if waiting.scope().skip_waiting_requested() {
                Self::activate(&mut registration, waiting).await;
            } else {
                registration.waiting = Some(waiting);
            }
            return Ok(recognised);
        }

        registration
            .active
            .as_ref()
            .map(|active| active.on_message(&event))
            .ok_or_else(|| Error::InvalidState("no worker to receive message".to_string()))
    }

    /// Dispatches a fetch event to the active worker. Requests the worker does
    /// not answer, and all requests while no worker is active, go straight to
    /// the network.
    ///
    /// # Errors
    ///
    /// Returns the failure of whichever path produced no response.
    pub async fn fetch(&self, request: &Request) -> Result<Response> {
        let active = self.registration.lock().await.active.clone();
        if let Some(worker) = active {
            let mut event = FetchEvent::new(request.clone());
            worker.on_fetch(&mut event);
            if let Some(response) = event.into_response() {
                return response.await;
            }
        }
        self.network.fetch(request).await
    }

    /// Opens a client. It is controlled by the active worker, if any.
    pub async fn open_client(&self) -> Uuid {
        let mut registration = self.registration.lock().await;
        let id = Uuid::new_v4();
        let controller = registration.active.as_ref().map(|w| w.scope().id());
        registration.clients.insert(id, controller);
        id
    }

    /// Closes a client. Returns false if it was not open.
    pub async fn close_client(&self, client: Uuid) -> bool {
        self.registration.lock().await.clients.remove(&client).is_some()
    }

    /// Returns the id of the worker controlling `client`.
    pub async fn controller_of(&self, client: Uuid) -> Option<Uuid> {
        self.registration
            .lock()
            .await
            .clients
            .get(&client)
            .copied()
            .flatten()
    }

    /// Id of the active worker.
    pub async fn active_id(&self) -> Option<Uuid> {
        self.registration
            .lock()
            .await
            .active
            .as_ref()
            .map(|w| w.scope().id())
    }

    pub async fn status(&self) -> HostStatus {
        let registration = self.registration.lock().await;
        HostStatus {
            active: registration
                .active
                .as_ref()
                .map(|w| status_of(w, WorkerState::Activated)),
            waiting: registration
                .waiting
                .as_ref()
                .map(|w| status_of(w, WorkerState::Installed)),
            clients: registration.clients.len(),
            controlled_clients: registration
                .clients
                .values()
                .filter(|c| c.is_some())
                .count(),
        }
    }
}
