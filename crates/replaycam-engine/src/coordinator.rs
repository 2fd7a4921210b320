//! Capture button semantics on top of the encoder's save path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use replaycam_encoder::{CircularEncoder, EncoderError, EncoderResult};

/// Something that can start a save.
pub trait SaveTarget {
    /// Start writing the buffered video to `destination`.
    fn save_video(&mut self, destination: PathBuf) -> EncoderResult<()>;
}

impl SaveTarget for CircularEncoder {
    fn save_video(&mut self, destination: PathBuf) -> EncoderResult<()> {
        CircularEncoder::save_video(self, destination)
    }
}

/// Outcome of a capture request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The save was started; completion arrives as `FileSaveComplete`.
    Started,

    /// The request was dropped; the reason is reported to the host.
    Rejected(String),
}

/// Single-flight gate in front of the save path.
///
/// Requests are disabled from acceptance until the matching
/// `FileSaveComplete` is delivered.
pub struct SaveCoordinator {
    in_progress: Option<PathBuf>,
    enabled: Arc<AtomicBool>,
    accepted: u64,
    rejected: u64,
}

impl SaveCoordinator {
    /// Create a coordinator. `enabled` is shared with the pipeline handle.
    pub fn new(enabled: Arc<AtomicBool>) -> Self {
        enabled.store(true, Ordering::SeqCst);
        Self {
            in_progress: None,
            enabled,
            accepted: 0,
            rejected: 0,
        }
    }

    /// Returns true while a save is in flight.
    pub fn is_in_progress(&self) -> bool {
        self.in_progress.is_some()
    }

    /// Destination of the save in flight.
    pub fn current_path(&self) -> Option<&Path> {
        self.in_progress.as_deref()
    }

    /// Returns true if a new request would be accepted.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Requests accepted so far.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Requests rejected so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Start a save into `path` unless one is already running.
    pub fn request_capture(&mut self, path: PathBuf, target: &mut impl SaveTarget) -> CaptureOutcome {
        if let Some(ref current) = self.in_progress {
            info!(
                requested = %path.display(),
                current = %current.display(),
                "Capture ignored: save already in progress"
            );
            self.rejected += 1;
            return CaptureOutcome::Rejected(EncoderError::AlreadyInProgress.to_string());
        }

        self.enabled.store(false, Ordering::SeqCst);
        self.in_progress = Some(path.clone());

        match target.save_video(path) {
            Ok(()) => {
                self.accepted += 1;
                debug!("Capture started");
                CaptureOutcome::Started
            }
            Err(e) => {
                warn!("Capture failed to start: {}", e);
                self.in_progress = None;
                self.enabled.store(true, Ordering::SeqCst);
                self.rejected += 1;
                CaptureOutcome::Rejected(e.to_string())
            }
        }
    }

    /// Re-enable requests after a save finished. Returns the destination of
    /// the finished save.
    pub fn complete(&mut self, status: i32) -> Option<PathBuf> {
        let path = self.in_progress.take();
        match path {
            Some(ref p) => info!(status, path = %p.display(), "Capture finished"),
            None => warn!(status, "Save completion without a capture in flight"),
        }
        self.enabled.store(true, Ordering::SeqCst);
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeTarget {
        saves: Vec<PathBuf>,
        fail: Option<fn() -> EncoderError>,
    }

    impl SaveTarget for FakeTarget {
        fn save_video(&mut self, destination: PathBuf) -> EncoderResult<()> {
            if let Some(fail) = self.fail {
                return Err(fail());
            }
            self.saves.push(destination);
            Ok(())
        }
    }

    #[test]
    fn test_second_request_is_rejected_until_complete() {
        let enabled = Arc::new(AtomicBool::new(false));
        let mut coordinator = SaveCoordinator::new(Arc::clone(&enabled));
        let mut target = FakeTarget::default();
        assert!(enabled.load(Ordering::SeqCst));

        assert_eq!(
            coordinator.request_capture("a.mp4".into(), &mut target),
            CaptureOutcome::Started
        );
        assert!(!enabled.load(Ordering::SeqCst));
        assert!(matches!(
            coordinator.request_capture("b.mp4".into(), &mut target),
            CaptureOutcome::Rejected(_)
        ));
        assert_eq!(target.saves, vec![PathBuf::from("a.mp4")]);

        assert_eq!(coordinator.complete(0), Some(PathBuf::from("a.mp4")));
        assert!(coordinator.is_enabled());
        assert_eq!(
            coordinator.request_capture("c.mp4".into(), &mut target),
            CaptureOutcome::Started
        );
        assert_eq!(coordinator.accepted(), 2);
        assert_eq!(coordinator.rejected(), 1);
    }

    #[test]
    fn test_failed_start_re_enables() {
        let mut coordinator = SaveCoordinator::new(Arc::new(AtomicBool::new(true)));
        let mut target = FakeTarget {
            fail: Some(|| EncoderError::EncoderClosed),
            ..Default::default()
        };

        let outcome = coordinator.request_capture("a.mp4".into(), &mut target);
        assert!(matches!(outcome, CaptureOutcome::Rejected(reason) if reason.contains("closed")));
        assert!(coordinator.is_enabled());
        assert!(!coordinator.is_in_progress());
    }

    #[test]
    fn test_stray_completion_is_harmless() {
        let mut coordinator = SaveCoordinator::new(Arc::new(AtomicBool::new(true)));
        assert_eq!(coordinator.complete(3), None);
        assert!(coordinator.is_enabled());
    }
}
