//! Stage-level progress reporting.
//!
//! The pipeline reports which [`Stage`] it is in through a
//! [`ProgressCallback`]. Rendering is left to the caller: the CLI draws an
//! `indicatif` bar, tests pass [`NullProgress`].

use std::fmt;
use std::sync::Arc;

/// Receives progress updates from a pipeline run.
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected units of work.
    fn set_total(&self, total: u64);

    /// Advance progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);
}

/// Ignores all progress updates.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Normalize,
    Reproject,
    Region,
    Join,
    Classify,
    Simplify,
    Sightings,
    Assemble,
}

impl Stage {
    pub const ALL: [Self; 8] = [
        Self::Normalize,
        Self::Reproject,
        Self::Region,
        Self::Join,
        Self::Classify,
        Self::Simplify,
        Self::Sightings,
        Self::Assemble,
    ];

    /// Marks `self` as started on `progress`, counting the previous stage
    /// as done.
    pub(crate) fn start(self, progress: &Arc<dyn ProgressCallback>) {
        if self != Self::Normalize {
            progress.inc(1);
        }
        progress.set_message(self.to_string());
        log::debug!("Stage: {self}");
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normalize => "Normalizing codes",
            Self::Reproject => "Reprojecting",
            Self::Region => "Filtering to region",
            Self::Join => "Joining attributes",
            Self::Classify => "Classifying abundance",
            Self::Simplify => "Simplifying boundaries",
            Self::Sightings => "Expanding sightings",
            Self::Assemble => "Assembling layers",
        })
    }
}
