//! Drives one rowset engine against a transport.
//!
//! The engine itself never performs I/O: it hands out load tickets and save
//! requests and expects their outcomes back. [`RowsetDriver`] closes that
//! loop on the tokio runtime. The engine lock is never held across an
//! await point, so signal handlers run without the transport blocking them;
//! they must not lock the same engine again.

use std::sync::Arc;

use horizon_grid::{
    LoadTicket, PendingSave, ReloadDecision, ReloadOptions, RowsetModel, SaveEffect, SharedRowset,
    TransportFailure,
};
use horizon_grid_core::logging::targets;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::transport::RowsetTransport;

/// Cancels the load in flight, if any.
struct LoadHandle {
    id: u64,
    cancel_tx: oneshot::Sender<()>,
}

/// Performs the loads and saves of one engine.
pub struct RowsetDriver {
    model: SharedRowset,
    transport: Arc<dyn RowsetTransport>,
    load: Mutex<Option<LoadHandle>>,
}

impl RowsetDriver {
    pub fn new(model: SharedRowset, transport: Arc<dyn RowsetTransport>) -> Self {
        Self {
            model,
            transport,
            load: Mutex::new(None),
        }
    }

    /// Wrap a fresh engine.
    pub fn with_model(model: RowsetModel, transport: Arc<dyn RowsetTransport>) -> Self {
        Self::new(Arc::new(Mutex::new(model)), transport)
    }

    pub fn model(&self) -> &SharedRowset {
        &self.model
    }

    /// Name the engine is registered under for push reloads.
    pub fn rowset_name(&self) -> Option<String> {
        self.model.lock().config().rowset_name.clone()
    }

    /// Reload the engine and, when a fetch is needed, perform it.
    ///
    /// Starting a load cancels the one in flight.
    pub async fn reload(&self, opts: ReloadOptions) -> ReloadDecision {
        let decision = self.model.lock().reload(opts);
        if let ReloadDecision::Fetch(ticket) = &decision {
            self.fetch(ticket.clone()).await;
        }
        decision
    }

    async fn fetch(&self, ticket: LoadTicket) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let previous = self.load.lock().replace(LoadHandle {
            id: ticket.id,
            cancel_tx,
        });
        if let Some(previous) = previous {
            tracing::debug!(target: targets::LOAD, id = previous.id, "superseded load cancelled");
            let _ = previous.cancel_tx.send(());
        }

        let result = tokio::select! {
            result = self.transport.load(&ticket) => result.map_err(TransportFailure::from),
            _ = cancel_rx => Err(TransportFailure::Abort),
        };

        {
            let mut load = self.load.lock();
            if load.as_ref().is_some_and(|h| h.id == ticket.id) {
                load.take();
            }
        }
        self.model.lock().finish_load(ticket.id, result);
    }

    /// Save the engine and submit every request it produced, auto-saves
    /// queued earlier first.
    pub async fn save(&self) -> SaveEffect {
        let (effect, mut pending) = {
            let mut model = self.model.lock();
            let pending = model.take_pending_saves();
            (model.save(), pending)
        };
        if let SaveEffect::Submit(request) = &effect {
            pending.push(request.clone());
        }
        self.submit(pending).await;
        effect
    }

    /// Submit the auto-saves the engine queued. Returns how many were sent.
    pub async fn flush(&self) -> usize {
        let pending = self.model.lock().take_pending_saves();
        let count = pending.len();
        self.submit(pending).await;
        count
    }

    async fn submit(&self, pending: Vec<PendingSave>) {
        if pending.is_empty() {
            return;
        }
        let Some(url) = self.model.lock().config().rowset_url.clone() else {
            tracing::warn!(target: targets::SAVE, "save requests without a rowset url dropped");
            return;
        };
        for save in pending {
            let result = self
                .transport
                .save(&url, &save.request)
                .await
                .map_err(TransportFailure::from);
            self.model.lock().finish_save(save.id, result);
        }
    }

    /// Cancel the load in flight and forget every pending request.
    pub fn abort(&self) {
        if let Some(handle) = self.load.lock().take() {
            let _ = handle.cancel_tx.send(());
        }
        self.model.lock().abort_all();
    }

    pub fn is_loading(&self) -> bool {
        self.load.lock().is_some()
    }
}

impl std::fmt::Debug for RowsetDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowsetDriver")
            .field("loading", &self.is_loading())
            .finish()
    }
}
