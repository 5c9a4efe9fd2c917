//! Progress reporting and cooperative cancellation for long-running training.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{Error, Result};

/// The phases of [`Trainer::train`](crate::Trainer::train), in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    AcquireVocab,
    FilterSortVocab,
    BuildHuffman,
    TrainNetwork,
}

/// Receives stage notifications, each with a fraction of the stage completed
/// in `0.0..=1.0`.
///
/// During `TrainNetwork` this is called from worker threads.
pub trait ProgressListener: Send + Sync {
    fn update(&self, stage: Stage, progress: f64);
}

impl<F> ProgressListener for F
where
    F: Fn(Stage, f64) + Send + Sync,
{
    fn update(&self, stage: Stage, progress: f64) {
        self(stage, progress)
    }
}

/// A listener that ignores everything.
impl ProgressListener for () {
    fn update(&self, _stage: Stage, _progress: f64) {}
}

/// Shared flag used to ask a running training job to stop.
///
/// Clones share the flag, so a clone can be handed to a listener or another
/// thread and canceled from there.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns `Err(Error::Interrupted)` if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}
