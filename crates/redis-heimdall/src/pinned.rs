//! The single connection held by the light and subscription clients.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::guard::GuardedConnection;

#[derive(Clone, Default)]
pub(crate) struct PinnedConnection {
    slot: Arc<Mutex<Option<GuardedConnection>>>,
}

impl PinnedConnection {
    pub(crate) fn get(&self) -> Option<GuardedConnection> {
        self.slot.lock().clone()
    }

    /// Pins `conn` unless a connection is already pinned. Returns the pinned
    /// connection and, when `conn` lost the race, `conn` itself so the caller
    /// can close it.
    pub(crate) fn get_or_set(
        &self,
        conn: GuardedConnection,
    ) -> (GuardedConnection, Option<GuardedConnection>) {
        let mut slot = self.slot.lock();
        match &*slot {
            Some(pinned) => (pinned.clone(), Some(conn)),
            None => {
                *slot = Some(conn.clone());
                (conn, None)
            }
        }
    }

    /// Unpins and closes the held connection.
    pub(crate) async fn release(&self) {
        let taken = self.slot.lock().take();
        if let Some(conn) = taken {
            conn.close().await;
        }
    }

    /// Unpins and closes `conn` if it is still the pinned connection.
    pub(crate) async fn release_if(&self, conn: &GuardedConnection) {
        let taken = {
            let mut slot = self.slot.lock();
            match &*slot {
                Some(pinned) if pinned.ptr_eq(conn) => slot.take(),
                _ => None,
            }
        };
        if let Some(conn) = taken {
            conn.close().await;
        }
    }
}

impl std::fmt::Debug for PinnedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedConnection")
            .field("pinned", &self.slot.lock().is_some())
            .finish()
    }
}
