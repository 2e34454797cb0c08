//! Progress tracking and resume.
//!
//! [`ProgressTracker`] turns out-of-order chunks into ordered output and
//! knows how much of it is safely delivered. [`ResumeToken`] captures that
//! so an interrupted transfer can continue, and a [`ResumeStore`] keeps it.

mod resume;
mod tracker;

pub use resume::{FileResumeStore, MemoryResumeStore, ResumeStore, ResumeToken};
pub use tracker::{ProgressCallback, ProgressTracker};
