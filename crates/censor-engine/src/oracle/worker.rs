//! Bounded oracle worker pool
//!
//! Model evaluation runs on dedicated threads fed through a bounded
//! channel. Callers wait at most the configured timeout for a reply; a
//! reply arriving after that is discarded by the worker. Shutdown waits the
//! same timeout for workers to exit and detaches any still busy.

use super::{ModelShape, OracleError, ScoringOracle};
use crate::config::OracleConfig;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

type Reply = Result<Vec<f32>, OracleError>;

/// One pending evaluation
struct Request {
    model: String,
    features: Vec<f32>,
    reply: Sender<Reply>,
}

/// Timeout-bounded wrapper around any oracle
pub struct BoundedOracle {
    inner: Arc<dyn ScoringOracle>,
    requests: Option<Sender<Request>>,
    workers: Vec<thread::JoinHandle<()>>,
    /// Disconnects once every worker has left its loop
    exited: Receiver<()>,
    timeout: Duration,
}

impl BoundedOracle {
    /// Start the worker pool described by `[oracle]`
    pub fn spawn(inner: Arc<dyn ScoringOracle>, config: &OracleConfig) -> Result<Self, OracleError> {
        Self::new(inner, config.workers, config.queue_depth, config.timeout())
    }

    /// Start `workers` threads sharing a queue of `queue_depth` requests
    pub fn new(
        inner: Arc<dyn ScoringOracle>,
        workers: usize,
        queue_depth: usize,
        timeout: Duration,
    ) -> Result<Self, OracleError> {
        let (tx, rx) = bounded::<Request>(queue_depth);
        let (exit_tx, exited) = bounded::<()>(0);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers.max(1) {
            let rx = rx.clone();
            let inner = Arc::clone(&inner);
            let exit_tx = exit_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("censor-oracle-{}", worker_id))
                .spawn(move || {
                    debug!("Oracle worker {} starting", worker_id);
                    for request in rx.iter() {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            inner.evaluate(&request.model, &request.features)
                        }))
                        .unwrap_or_else(|_| {
                            error!(model = %request.model, "oracle worker {} caught a panic", worker_id);
                            Err(OracleError::Evaluation("model panicked".into()))
                        });
                        // Caller may have timed out already
                        let _ = request.reply.send(result);
                    }
                    debug!("Oracle worker {} stopped", worker_id);
                    drop(exit_tx);
                })
                .map_err(|e| OracleError::Spawn(e.to_string()))?;
            handles.push(handle);
        }

        drop(exit_tx);

        Ok(Self {
            inner,
            requests: Some(tx),
            workers: handles,
            exited,
            timeout,
        })
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl ScoringOracle for BoundedOracle {
    fn evaluate(&self, model: &str, features: &[f32]) -> Result<Vec<f32>, OracleError> {
        let requests = self.requests.as_ref().ok_or(OracleError::Disconnected)?;
        let (reply, response) = bounded(1);

        requests
            .try_send(Request {
                model: model.to_string(),
                features: features.to_vec(),
                reply,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => OracleError::Busy,
                TrySendError::Disconnected(_) => OracleError::Disconnected,
            })?;

        match response.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(OracleError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(OracleError::Disconnected),
        }
    }

    fn shape(&self, model: &str) -> Option<ModelShape> {
        self.inner.shape(model)
    }
}

impl Drop for BoundedOracle {
    fn drop(&mut self) {
        self.requests.take();

        let deadline = Instant::now() + self.timeout;
        match self.exited.recv_deadline(deadline) {
            Err(RecvTimeoutError::Timeout) => {
                let stuck = self.workers.iter().filter(|h| !h.is_finished()).count();
                warn!(stuck, timeout = ?self.timeout, "abandoning oracle workers still evaluating");
                for handle in self.workers.drain(..) {
                    if handle.is_finished() {
                        let _ = handle.join();
                    }
                }
            }
            _ => {
                for handle in self.workers.drain(..) {
                    let _ = handle.join();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{unbounded, Receiver};

    struct Fixed(Vec<f32>);

    impl ScoringOracle for Fixed {
        fn evaluate(&self, _model: &str, _features: &[f32]) -> Result<Vec<f32>, OracleError> {
            Ok(self.0.clone())
        }

        fn shape(&self, _model: &str) -> Option<ModelShape> {
            Some(ModelShape {
                input_len: 2,
                output_channels: self.0.len(),
            })
        }
    }

    /// Blocks every evaluation until the gate sender is dropped
    struct Gated {
        entered: Sender<()>,
        gate: Receiver<()>,
    }

    impl ScoringOracle for Gated {
        fn evaluate(&self, _model: &str, _features: &[f32]) -> Result<Vec<f32>, OracleError> {
            let _ = self.entered.send(());
            let _ = self.gate.recv();
            Ok(vec![1.0])
        }

        fn shape(&self, _model: &str) -> Option<ModelShape> {
            None
        }
    }

    struct Panics;

    impl ScoringOracle for Panics {
        fn evaluate(&self, _model: &str, _features: &[f32]) -> Result<Vec<f32>, OracleError> {
            panic!("bad model")
        }

        fn shape(&self, _model: &str) -> Option<ModelShape> {
            None
        }
    }

    #[test]
    fn test_passes_through() {
        let oracle = BoundedOracle::new(Arc::new(Fixed(vec![0.9])), 2, 8, Duration::from_secs(5)).unwrap();

        assert_eq!(oracle.evaluate("m", &[1.0, 2.0]).unwrap(), vec![0.9]);
        assert_eq!(oracle.shape("m").unwrap().output_channels, 1);
    }

    #[test]
    fn test_timeout_then_busy() {
        let (entered_tx, entered_rx) = unbounded();
        let (gate_tx, gate_rx) = unbounded::<()>();
        let inner = Arc::new(Gated {
            entered: entered_tx,
            gate: gate_rx,
        });
        let oracle = BoundedOracle::new(inner, 1, 1, Duration::from_millis(30)).unwrap();

        // Worker picks this up and blocks
        assert!(matches!(oracle.evaluate("m", &[]), Err(OracleError::Timeout(_))));
        entered_rx.recv().unwrap();

        // Sits in the queue
        assert!(matches!(oracle.evaluate("m", &[]), Err(OracleError::Timeout(_))));
        // Queue full
        assert!(matches!(oracle.evaluate("m", &[]), Err(OracleError::Busy)));

        drop(gate_tx);
    }

    #[test]
    fn test_panic_becomes_error() {
        let oracle = BoundedOracle::new(Arc::new(Panics), 1, 4, Duration::from_secs(5)).unwrap();

        assert!(matches!(oracle.evaluate("m", &[]), Err(OracleError::Evaluation(_))));
        // Worker survives
        assert!(matches!(oracle.evaluate("m", &[]), Err(OracleError::Evaluation(_))));
    }

    #[test]
    fn test_drop_abandons_stuck_worker() {
        let (entered_tx, entered_rx) = unbounded();
        let (gate_tx, gate_rx) = unbounded::<()>();
        let inner = Arc::new(Gated {
            entered: entered_tx,
            gate: gate_rx,
        });
        let oracle = BoundedOracle::new(inner, 2, 4, Duration::from_millis(50)).unwrap();

        assert!(matches!(oracle.evaluate("m", &[]), Err(OracleError::Timeout(_))));
        entered_rx.recv().unwrap();

        let (done_tx, done_rx) = unbounded();
        thread::spawn(move || {
            drop(oracle);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());

        drop(gate_tx);
    }
}
