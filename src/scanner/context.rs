//! Per-session cancellation and progress

use crate::scanner::ScanProgress;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const PROGRESS_CAPACITY: usize = 256;

/// State shared between a running scan and its observers.
///
/// Cloning yields another handle to the same session.
#[derive(Debug, Clone)]
pub struct ScanContext {
    cancel: CancellationToken,
    progress: broadcast::Sender<ScanProgress>,
}

impl Default for ScanContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanContext {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Use an externally owned cancellation token, e.g. one wired to Ctrl-C
    pub fn with_token(cancel: CancellationToken) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);
        Self { cancel, progress }
    }

    /// A handle for a nested scan: cancelled along with this context, and
    /// publishing to the same subscribers.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            progress: self.progress.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Publish a progress event; having no subscribers is fine.
    pub(crate) fn publish(&self, event: ScanProgress) {
        let _ = self.progress.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events() {
        let ctx = ScanContext::new();
        let mut rx = ctx.subscribe();
        ctx.publish(ScanProgress::new("127.0.0.1", 1, 2));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.percent, 50.0);
    }

    #[test]
    fn clones_share_cancellation() {
        let ctx = ScanContext::new();
        let handle = ctx.clone();
        handle.cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn child_shares_progress_but_not_upward_cancellation() {
        let parent = ScanContext::new();
        let mut rx = parent.subscribe();
        let child = parent.child();

        child.publish(ScanProgress::new("127.0.0.1", 3, 4));
        assert_eq!(rx.recv().await.unwrap().ports_scanned, 3);

        child.cancel();
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
    }
}
