//! OrchestratorHandle - operator control surface

use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::domain::SearchFilters;

use super::messages::{Control, OrchestratorError};
use super::status::RunStatus;

/// Cloneable handle for starting, pausing and observing runs
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Control>,
    status_rx: watch::Receiver<RunStatus>,
}

impl OrchestratorHandle {
    pub(crate) fn new(tx: mpsc::Sender<Control>, status_rx: watch::Receiver<RunStatus>) -> Self {
        Self { tx, status_rx }
    }

    /// Start a run; returns the run session ID
    pub async fn start(&self, filters: SearchFilters) -> Result<String, OrchestratorError> {
        debug!(%filters, "OrchestratorHandle::start: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Control::Start {
                filters,
                reply: reply_tx,
            })
            .await
            .map_err(|_| OrchestratorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| OrchestratorError::ChannelClosed)?
    }

    /// Stop the active run; an in-flight send finishes first
    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        debug!("OrchestratorHandle::stop: called");
        self.send(Control::Stop).await
    }

    pub async fn pause(&self) -> Result<(), OrchestratorError> {
        debug!("OrchestratorHandle::pause: called");
        self.send(Control::Pause).await
    }

    pub async fn resume(&self) -> Result<(), OrchestratorError> {
        debug!("OrchestratorHandle::resume: called");
        self.send(Control::Resume).await
    }

    async fn send(&self, control: Control) -> Result<(), OrchestratorError> {
        self.tx.send(control).await.map_err(|_| OrchestratorError::ChannelClosed)
    }

    /// Latest published status
    pub fn status(&self) -> RunStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status_rx.clone()
    }

    /// Wait until the published status satisfies `predicate`
    pub async fn wait_for(&self, predicate: impl FnMut(&RunStatus) -> bool) -> Result<RunStatus, OrchestratorError> {
        let mut rx = self.status_rx.clone();
        let status = rx
            .wait_for(predicate)
            .await
            .map_err(|_| OrchestratorError::ChannelClosed)?;
        Ok(status.clone())
    }
}
