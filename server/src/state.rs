//! # Server State
//!
//! Shared state handed to every handler:
//! - **Connection registry**: live WebSocket clients and their outbound queues
//! - **Throttlers**: the global connect limit and the per-client send limit
//! - **Job queue**: the sending half of the serial recognition worker
//!
//! Registries use [`DashMap`] since connections are handled concurrently.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{ConfigError, ServerConfig};
use crate::recognizer::Recognizer;
use crate::throttle::Throttler;
use crate::worker::{self, JobQueue};

/// Outbound queue of one client. Carries complete envelope frames.
pub type ClientTx = mpsc::UnboundedSender<Vec<u8>>;

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub addr: SocketAddr,
    pub tx: ClientTx,
}

#[derive(Clone)]
pub struct AppState {
    /// Live connections keyed by connection ID.
    pub connections: Arc<DashMap<Uuid, ClientInfo>>,

    pub connect_throttle: Arc<Throttler>,
    pub send_throttle: Arc<Throttler>,
    pub jobs: JobQueue,
}

impl AppState {
    /// Builds the state and starts the job worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: &ServerConfig,
        recognizer: Arc<dyn Recognizer>,
    ) -> Result<(Self, JoinHandle<()>), ConfigError> {
        let connect_throttle = Arc::new(Throttler::new(config.connect_limit)?);
        let send_throttle = Arc::new(Throttler::new(config.send_limit)?);
        let (jobs, worker) = worker::spawn_worker(recognizer, config.job_timeout);

        let state = Self {
            connections: Arc::new(DashMap::new()),
            connect_throttle,
            send_throttle,
            jobs,
        };
        Ok((state, worker))
    }

    pub fn client_count(&self) -> usize {
        self.connections.len()
    }
}
