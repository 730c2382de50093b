//! A transport with scripted registration outcomes.
//!
//! Wraps the in-memory backend so connections behave normally while
//! `register` can be made to report a taken identifier or a hard failure,
//! and `dial` can be held back to keep a joiner in `Connecting`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use monetus_sync::{
    MemoryConnection, MemoryListener, MemoryNetwork, MemoryTransport, RendezvousId, SyncError,
    Transport,
};

/// Outcome for one `register` call.
#[derive(Debug, Clone)]
pub enum Registration {
    /// Delegate to the in-memory backend.
    Pass,
    /// Fail with `IdentifierUnavailable`.
    Taken,
    /// Fail with `Connection` and this reason.
    Fail(String),
}

/// Transport whose `register` results follow a script.
///
/// Once the script runs out every call passes through.
pub struct ScriptedTransport {
    inner: MemoryTransport,
    script: Mutex<VecDeque<Registration>>,
    calls: Mutex<Vec<Option<RendezvousId>>>,
    dials_open: watch::Sender<bool>,
}

impl ScriptedTransport {
    /// Create a transport on `network` that plays `script` in order.
    pub fn new(network: &Arc<MemoryNetwork>, script: impl IntoIterator<Item = Registration>) -> Self {
        Self {
            inner: network.transport(),
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            dials_open: watch::Sender::new(true),
        }
    }

    /// Make every `dial` wait until [`release_dials`](Self::release_dials).
    pub fn hold_dials(&self) {
        self.dials_open.send_replace(false);
    }

    /// Let held and future dials through.
    pub fn release_dials(&self) {
        self.dials_open.send_replace(true);
    }

    /// The `preferred` argument of every `register` call so far.
    pub fn register_calls(&self) -> Vec<Option<RendezvousId>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn next(&self, preferred: Option<&RendezvousId>) -> Registration {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(preferred.cloned());
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or(Registration::Pass)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    type Connection = MemoryConnection;
    type Listener = MemoryListener;

    async fn register(&self, preferred: Option<&RendezvousId>) -> monetus_sync::Result<MemoryListener> {
        match self.next(preferred) {
            Registration::Pass => self.inner.register(preferred).await,
            Registration::Taken => {
                let id = match preferred {
                    Some(id) => id.clone(),
                    None => RendezvousId::generate_token(&mut rand::thread_rng()),
                };
                Err(SyncError::IdentifierUnavailable(id))
            }
            Registration::Fail(reason) => Err(SyncError::Connection(reason)),
        }
    }

    async fn dial(&self, target: &RendezvousId) -> monetus_sync::Result<MemoryConnection> {
        let mut open = self.dials_open.subscribe();
        if open.wait_for(|open| *open).await.is_err() {
            return Err(SyncError::Connection("transport shut down".into()));
        }
        self.inner.dial(target).await
    }
}
