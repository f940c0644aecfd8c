//! specdaq-io: List-mode file access and threaded acquisition sessions.
//!
//! This crate replays memory-mapped list-mode dumps as spills and runs the
//! producer, parser and sink workers of an acquisition session around two
//! bounded queues.
//!
//! # Key Components
//!
//! - [`BoundedQueue`] - Blocking FIFO with backpressure and a closed state
//! - [`PipelineConfig`] - Queue depth, spill size and memory budget
//! - [`ListModeFile`], [`FileSpillSource`] - Memory-mapped replay via memmap2
//! - [`RecordScanner`] - Record boundary discovery
//! - [`Session`] - Start/stop lifecycle of one acquisition
//!

mod config;
mod error;
mod queue;
mod reader;
pub mod scanner;
mod session;

pub use config::{PipelineConfig, DEFAULT_SPILL_WORDS};
pub use error::{Error, Result};
pub use queue::BoundedQueue;
pub use reader::{FileSpillSource, ListModeFile};
pub use scanner::{RecordScanner, RecordSpan, ScanStop};
pub use session::{Session, SessionSummary, SpillSource};
