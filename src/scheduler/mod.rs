//! Job scheduling engine
//!
//! A single [`SchedulerService`] owns every scheduled pipeline job for the
//! process lifetime. Jobs are registered once with a [`Trigger`] and fired by
//! one trigger-evaluation loop; overlapping firings of the same job are
//! skipped, never queued.
//!
//! # Example
//!
//! ```no_run
//! use marketpulse::config::Config;
//! use marketpulse::events::EventRecorder;
//! use marketpulse::scheduler::{SchedulerService, StartOptions};
//! use marketpulse::state::StateStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let store = StateStore::new(config.state.path.clone());
//!     let recorder = EventRecorder::new(config.scheduler.history_capacity);
//!
//!     let scheduler = Arc::new(SchedulerService::new(config, store, recorder)?);
//!     scheduler.start(StartOptions::standard())?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     scheduler.stop().await;
//!     Ok(())
//! }
//! ```

mod core;
mod error;
mod jobs;

pub use core::{RunOnceOutcome, SchedulerService};
pub use error::{SchedulerError, SchedulerResult};
pub use jobs::{JobGroup, JobOutcome, JobUnit, StartOptions, Trigger};
