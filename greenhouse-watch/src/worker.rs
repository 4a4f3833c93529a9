//! Mount-scoped watching on behalf of a consumer.
//!
//! A `WatchWorker` ties a subscription to the lifetime of whatever mounted it: mounting binds
//! the consumer identity into the addressable state and watches whatever identity resolves from
//! it, and unmounting (explicitly or by dropping the worker) releases the subscription.

use crate::error::WatchResult;
use crate::identity::{ConsumerIdentity, ConsumerIdentityBinding};
use crate::watchers::{CancellationHandle, WatchManager};

/// Keeps a consumer's subscription alive for as long as the worker is mounted.
pub struct WatchWorker {
    binding: ConsumerIdentityBinding,
    manager: WatchManager,
    /// The handle of the current subscription, a no-op handle while nothing is watched.
    handle: CancellationHandle,
}

impl WatchWorker {
    /// Create a new instance.
    pub fn new(binding: ConsumerIdentityBinding, manager: WatchManager) -> Self {
        Self {
            binding,
            manager,
            handle: CancellationHandle::noop(),
        }
    }

    pub fn manager(&self) -> &WatchManager {
        &self.manager
    }

    /// Mount this worker for the given consumer.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn mount(&mut self, consumer: &ConsumerIdentity) -> WatchResult<()> {
        self.binding.bind(consumer);
        let resolved = self.binding.resolve();
        if resolved.is_empty() {
            if self.release() {
                tracing::debug!("mounted without a consumer identity, previous watch stopped");
            }
            return Ok(());
        }
        self.handle = self.manager.watch(&resolved).await?;
        Ok(())
    }

    /// Re-resolve the bound identity & follow any change to it.
    ///
    /// A changed identity replaces the current subscription, the old one being stopped first. An
    /// identity which is no longer addressable stops the current subscription. Returns `true` if
    /// the subscription was changed.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn sync(&mut self) -> WatchResult<bool> {
        let resolved = self.binding.resolve();
        let active = self.manager.active_consumer().cloned();
        if resolved.is_empty() {
            if active.is_none() && !self.handle.is_live() {
                return Ok(false);
            }
            tracing::debug!("consumer identity no longer bound, stopping watch");
            self.release();
            return Ok(true);
        }
        if active.as_ref() == Some(&resolved) {
            return Ok(false);
        }
        tracing::debug!(consumer = %resolved, "consumer identity changed, restarting watch");
        self.handle = self.manager.watch(&resolved).await?;
        Ok(true)
    }

    /// Unmount this worker, releasing its subscription.
    ///
    /// Returns `true` if a subscription was released by this call.
    pub fn unmount(&mut self) -> bool {
        let released = self.release();
        if released {
            tracing::debug!("watch worker unmounted");
        }
        released
    }

    fn release(&mut self) -> bool {
        let handle = std::mem::take(&mut self.handle);
        if let Some(consumer) = handle.consumer() {
            tracing::trace!(%consumer, "releasing watch");
        }
        let released = !handle.is_noop() && handle.cancel();
        self.manager.stop() || released
    }
}

impl Drop for WatchWorker {
    fn drop(&mut self) {
        self.unmount();
    }
}
