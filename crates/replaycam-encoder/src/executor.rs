//! Execution contexts for save jobs.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use crate::error::EncoderError;
use crate::save::SaveJob;
use crate::EncoderResult;

/// Runs save jobs off the dispatch thread.
pub trait SaveExecutor: Send + Sync {
    /// Accept `job` for execution. Hands the job back if it cannot run.
    fn execute(&self, job: SaveJob) -> Result<(), SaveJob>;

    /// Executor name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Runs jobs on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl SaveExecutor for InlineExecutor {
    fn execute(&self, job: SaveJob) -> Result<(), SaveJob> {
        job.run();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}

/// Runs jobs one at a time on a dedicated worker thread.
///
/// Dropping the executor stops accepting jobs without waiting for the one in
/// flight; use [`BackgroundExecutor::join`] to wait.
pub struct BackgroundExecutor {
    tx: Mutex<Option<Sender<SaveJob>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundExecutor {
    /// Spawn the worker thread.
    #[instrument(name = "save_executor_spawn")]
    pub fn spawn(name: &str) -> EncoderResult<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || Self::run(rx))
            .map_err(|e| EncoderError::Initialization(format!("save thread: {}", e)))?;

        debug!("Save executor started");
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    fn run(rx: Receiver<SaveJob>) {
        for job in rx.iter() {
            let status = job.run();
            debug!(status = status.code(), "Save job finished");
        }
        debug!("Save executor exiting");
    }

    /// Stop accepting jobs. Queued jobs still run.
    pub fn close(&self) {
        if self.tx.lock().take().is_some() {
            info!("Save executor closed");
        }
    }

    /// Close and wait for queued jobs to finish.
    pub fn join(&self) {
        self.close();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl SaveExecutor for BackgroundExecutor {
    fn execute(&self, job: SaveJob) -> Result<(), SaveJob> {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(job).map_err(|e| e.into_inner()),
            None => Err(job),
        }
    }

    fn name(&self) -> &'static str {
        "background"
    }
}

impl Drop for BackgroundExecutor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use replaycam_ipc::SaveStatus;

    use super::*;
    use crate::ring::SaveSnapshot;
    use crate::save::{MuxFailure, MuxSummary, Muxer};

    struct NamedThreadMuxer;

    impl Muxer for NamedThreadMuxer {
        fn mux(&self, _: &SaveSnapshot, destination: &Path) -> Result<MuxSummary, MuxFailure> {
            match thread::current().name() {
                Some("save-test") => Ok(MuxSummary {
                    path: destination.to_path_buf(),
                    samples: 0,
                    duration_usec: 0,
                    bytes_written: 0,
                }),
                _ => Err(MuxFailure::new(SaveStatus::Mux, "wrong thread")),
            }
        }

        fn name(&self) -> &'static str {
            "named-thread"
        }
    }

    struct PanickingMuxer;

    impl Muxer for PanickingMuxer {
        fn mux(&self, _: &SaveSnapshot, _: &Path) -> Result<MuxSummary, MuxFailure> {
            panic!("muxer blew up");
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    fn job(tx: Sender<SaveStatus>) -> SaveJob {
        SaveJob::new(
            SaveSnapshot {
                chunks: Vec::new(),
                format: None,
            },
            PathBuf::from("out.mp4"),
            Arc::new(NamedThreadMuxer),
            Box::new(move |status| {
                let _ = tx.send(status);
            }),
        )
    }

    #[test]
    fn test_background_runs_on_worker_thread() {
        let executor = BackgroundExecutor::spawn("save-test").unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();

        assert!(executor.execute(job(tx)).is_ok());
        let status = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(status, SaveStatus::Success);
        executor.join();
    }

    #[test]
    fn test_panicking_muxer_still_reports() {
        let executor = BackgroundExecutor::spawn("save-test").unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();

        let panicking = SaveJob::new(
            SaveSnapshot {
                chunks: Vec::new(),
                format: None,
            },
            PathBuf::from("boom.mp4"),
            Arc::new(PanickingMuxer),
            {
                let tx = tx.clone();
                Box::new(move |status| {
                    let _ = tx.send(status);
                })
            },
        );
        assert!(executor.execute(panicking).is_ok());
        let status = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(status, SaveStatus::Mux);

        // The worker survives and takes the next job.
        assert!(executor.execute(job(tx)).is_ok());
        let status = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(status, SaveStatus::Success);
        executor.join();
    }

    #[test]
    fn test_closed_executor_returns_job() {
        let executor = BackgroundExecutor::spawn("save-test").unwrap();
        executor.close();

        let (tx, rx) = crossbeam_channel::unbounded();
        let rejected = executor.execute(job(tx)).unwrap_err();
        assert_eq!(rejected.destination(), Path::new("out.mp4"));

        rejected.abandon(SaveStatus::ExecutorUnavailable);
        assert_eq!(rx.try_recv().unwrap(), SaveStatus::ExecutorUnavailable);
    }

    #[test]
    fn test_inline_runs_in_place() {
        let (tx, rx) = crossbeam_channel::unbounded();
        InlineExecutor.execute(job(tx)).unwrap();
        // Not the worker thread, so the muxer reports a failure.
        assert_eq!(rx.try_recv().unwrap(), SaveStatus::Mux);
    }
}
