use std::sync::Mutex;

use tokio::sync::oneshot;

/// One-shot completion flag for the leaf currently being visited on a tab.
///
/// The walker arms it before activating a leaf and suspends on the returned
/// receiver for video leaves; the bridge sets it exactly once when the
/// triggered download has concluded. Arming replaces any leftover sender, so
/// a manifest request from an earlier leaf can never satisfy a later wait.
#[derive(Debug, Default)]
pub struct DownloadSignal {
    armed: Mutex<Option<oneshot::Sender<anyhow::Result<()>>>>,
}

impl DownloadSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) -> oneshot::Receiver<anyhow::Result<()>> {
        let (tx, rx) = oneshot::channel();
        let mut slot = self.armed.lock().expect("download signal lock poisoned");
        *slot = Some(tx);
        rx
    }

    /// Delivers the download outcome to the armed waiter. Setting with no
    /// waiter armed means the rule was already cleared; the outcome is
    /// dropped with a warning instead of leaking into the next leaf.
    pub fn set(&self, outcome: anyhow::Result<()>) {
        let tx = self
            .armed
            .lock()
            .expect("download signal lock poisoned")
            .take();
        match tx {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    tracing::warn!("download signal receiver dropped before completion");
                }
            }
            None => tracing::warn!("download concluded with no armed signal; outcome dropped"),
        }
    }

    pub fn clear(&self) {
        self.armed
            .lock()
            .expect("download signal lock poisoned")
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot::error::TryRecvError;

    #[tokio::test]
    async fn set_resolves_the_armed_waiter() {
        let signal = DownloadSignal::new();
        let rx = signal.arm();
        signal.set(Ok(()));
        assert!(rx.await.expect("signal sender dropped").is_ok());
    }

    #[tokio::test]
    async fn set_carries_the_download_error() {
        let signal = DownloadSignal::new();
        let rx = signal.arm();
        signal.set(Err(anyhow::anyhow!("manifest fetch failed")));
        let outcome = rx.await.expect("signal sender dropped");
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn stale_set_does_not_satisfy_a_later_wait() {
        let signal = DownloadSignal::new();
        let first = signal.arm();
        signal.set(Ok(()));
        assert!(first.await.is_ok());

        // next leaf arms a fresh channel; the previous set must not leak in
        let mut second = signal.arm();
        assert!(matches!(second.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn clear_drops_the_armed_sender() {
        let signal = DownloadSignal::new();
        let rx = signal.arm();
        signal.clear();
        assert!(rx.await.is_err());

        // setting after clear is a no-op rather than a panic
        signal.set(Ok(()));
    }

    #[tokio::test]
    async fn rearming_replaces_the_previous_sender() {
        let signal = DownloadSignal::new();
        let first = signal.arm();
        let _second = signal.arm();
        // the first receiver's sender was replaced, so it errors out
        assert!(first.await.is_err());
    }
}
