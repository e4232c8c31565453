use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Emitted after each completed step. Advisory only: a sink that drops events
/// does not change the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub step_index: usize,
    pub total_steps: usize,
    pub label: String,
}

impl ProgressEvent {
    pub fn percent(&self) -> u8 {
        if self.total_steps == 0 {
            return 100;
        }
        (((self.step_index + 1) * 100) / self.total_steps).min(100) as u8
    }
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn report(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

/// Cooperative cancellation flag, checked by the coordinator between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Per-run capabilities handed to the coordinator by the caller.
#[derive(Clone)]
pub struct RunContext {
    pub progress: Arc<dyn ProgressSink>,
    pub cancel: CancelToken,
}

impl RunContext {
    pub fn new(progress: Arc<dyn ProgressSink>, cancel: CancelToken) -> Self {
        Self { progress, cancel }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            progress: Arc::new(NoProgress),
            cancel: CancelToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_down_and_caps() {
        let event = ProgressEvent {
            step_index: 0,
            total_steps: 3,
            label: "Connect".into(),
        };
        assert_eq!(event.percent(), 33);
        let last = ProgressEvent {
            step_index: 2,
            ..event
        };
        assert_eq!(last.percent(), 100);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
    }
}
