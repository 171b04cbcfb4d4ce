use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};
use crate::util::{Slot, defer};

/// The exclusivity gate that keeps at most one correlated GATT operation in flight on a link.
///
/// Waiters are served in FIFO order. The gate is released when the returned guard is dropped,
/// so a caller whose future is dropped mid-operation never leaves it held.
#[derive(Debug, Clone, Default)]
pub struct OperationMutex {
    inner: Arc<Mutex<()>>,
}

/// Proof that the holder owns the [`OperationMutex`].
#[derive(Debug)]
pub struct OperationGuard {
    _guard: OwnedMutexGuard<()>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        tracing::trace!("operation gate released");
    }
}

impl OperationMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the gate is free and takes it.
    pub async fn lock(&self) -> OperationGuard {
        let guard = self.inner.clone().lock_owned().await;
        tracing::trace!("operation gate acquired");
        OperationGuard { _guard: guard }
    }

    /// Takes the gate if nobody holds it.
    pub fn try_lock(&self) -> Option<OperationGuard> {
        let guard = self.inner.clone().try_lock_owned().ok()?;
        tracing::trace!("operation gate acquired without waiting");
        Some(OperationGuard { _guard: guard })
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// Runs one request/response exchange while holding the gate.
    ///
    /// `slot` is armed before `issue` starts the command and is disarmed on every exit path,
    /// before the gate is released.
    pub(crate) async fn correlate<T, E>(
        &self,
        slot: &Slot<Result<T>>,
        issue: impl FnOnce() -> std::result::Result<(), E>,
    ) -> Result<T>
    where
        Error: From<E>,
    {
        let _guard = self.lock().await;
        let receiver = slot.arm();
        let _disarm = defer(|| slot.disarm());
        issue()?;
        receiver.await?
    }
}
