//! Host back-reference.
//!
//! The dispatch loop holds its host as a `Weak` and upgrades it for every
//! message, so a pipeline never keeps its host alive.

use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use replaycam_ipc::{
    event_channel, PipelineEvent, PipelineMetrics, PipelineState, EVENT_CHANNEL_CAPACITY,
};

/// Receives pipeline callbacks on the dispatch thread.
///
/// Every method has an empty default so hosts implement only what they use.
pub trait PipelineHost: Send + Sync {
    /// A save finished; `status == 0` means success.
    fn file_save_complete(&self, _status: i32, _path: Option<&Path>) {}

    /// Currently buffered duration.
    fn buffer_status(&self, _duration_usec: u64) {}

    /// A capture request was rejected.
    fn capture_rejected(&self, _reason: &str) {}

    /// Saving indicator blink.
    fn blink(&self, _visible: bool) {}

    /// Periodic metrics.
    fn metrics(&self, _metrics: &PipelineMetrics) {}

    /// Pipeline state transition.
    fn state_changed(&self, _previous: &PipelineState, _current: &PipelineState) {}

    /// A pipeline error.
    fn error(&self, _recoverable: bool, _message: &str) {}
}

/// Host that forwards callbacks as [`PipelineEvent`]s.
///
/// Save results, rejections and errors are always queued. Buffer status,
/// blink, metrics and state events are dropped while
/// [`EVENT_CHANNEL_CAPACITY`] events are waiting.
pub struct ChannelHost {
    event_tx: Sender<PipelineEvent>,
}

impl ChannelHost {
    /// Forward events to `event_tx`.
    pub fn new(event_tx: Sender<PipelineEvent>) -> Self {
        Self { event_tx }
    }

    /// Create a host and the receiving end of its event channel.
    pub fn channel() -> (Arc<Self>, Receiver<PipelineEvent>) {
        let (tx, rx) = event_channel();
        (Arc::new(Self::new(tx)), rx)
    }

    fn send_event(&self, event: PipelineEvent) {
        if self.event_tx.len() >= EVENT_CHANNEL_CAPACITY {
            warn!("Event channel backed up, dropping {:?}", event);
            return;
        }
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }

    fn send_terminal(&self, event: PipelineEvent) {
        if let Err(e) = self.event_tx.send(event) {
            warn!("Host receiver gone, lost {:?}", e.into_inner());
        }
    }
}

impl PipelineHost for ChannelHost {
    fn file_save_complete(&self, status: i32, path: Option<&Path>) {
        self.send_terminal(PipelineEvent::FileSaveComplete {
            status,
            path: path.map(Path::to_path_buf),
        });
    }

    fn buffer_status(&self, duration_usec: u64) {
        self.send_event(PipelineEvent::BufferStatus { duration_usec });
    }

    fn capture_rejected(&self, reason: &str) {
        self.send_terminal(PipelineEvent::CaptureRejected {
            reason: reason.to_string(),
        });
    }

    fn blink(&self, visible: bool) {
        self.send_event(PipelineEvent::Blink { visible });
    }

    fn metrics(&self, metrics: &PipelineMetrics) {
        self.send_event(PipelineEvent::Metrics(metrics.clone()));
    }

    fn state_changed(&self, previous: &PipelineState, current: &PipelineState) {
        self.send_event(PipelineEvent::StateChanged {
            previous: Box::new(previous.clone()),
            current: Box::new(current.clone()),
        });
    }

    fn error(&self, recoverable: bool, message: &str) {
        self.send_terminal(PipelineEvent::Error {
            recoverable,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_channel_host_forwards_events() {
        let (host, rx) = ChannelHost::channel();

        host.file_save_complete(0, Some(Path::new("clip.mp4")));
        host.capture_rejected("busy");
        host.state_changed(&PipelineState::Running, &PipelineState::Stopped);

        match rx.try_recv().unwrap() {
            PipelineEvent::FileSaveComplete { status, path } => {
                assert_eq!(status, 0);
                assert_eq!(path, Some(PathBuf::from("clip.mp4")));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            PipelineEvent::CaptureRejected { reason } if reason == "busy"
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            PipelineEvent::StateChanged { current, .. } if current.is_stopped()
        ));
    }

    #[test]
    fn test_backed_up_channel_drops_periodic_events() {
        let (host, rx) = ChannelHost::channel();
        for i in 0..EVENT_CHANNEL_CAPACITY as u64 {
            host.buffer_status(i);
        }
        host.blink(true);
        host.metrics(&PipelineMetrics::default());
        assert_eq!(rx.len(), EVENT_CHANNEL_CAPACITY);

        host.file_save_complete(0, None);
        host.capture_rejected("busy");
        host.error(false, "encoder failed");
        assert_eq!(rx.len(), EVENT_CHANNEL_CAPACITY + 3);

        let tail: Vec<_> = rx.try_iter().skip(EVENT_CHANNEL_CAPACITY).collect();
        assert!(matches!(
            tail[0],
            PipelineEvent::FileSaveComplete { status: 0, path: None }
        ));
        assert!(matches!(&tail[1], PipelineEvent::CaptureRejected { reason } if reason == "busy"));
        assert!(matches!(&tail[2], PipelineEvent::Error { recoverable: false, .. }));
    }

    #[test]
    fn test_terminal_event_after_receiver_dropped() {
        let (host, rx) = ChannelHost::channel();
        drop(rx);
        // Logged and discarded.
        host.file_save_complete(2, None);
    }

    #[test]
    fn test_default_methods_are_no_ops() {
        struct Quiet;
        impl PipelineHost for Quiet {}

        let host: Arc<dyn PipelineHost> = Arc::new(Quiet);
        host.buffer_status(1);
        host.error(true, "ignored");
    }
}
