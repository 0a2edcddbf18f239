//! MarketPulse scheduler
//!
//! Operational core of an automated market-news service: a job scheduler
//! driving periodic collection, AI impact analysis and report delivery, plus
//! the resilience layer around it (event recording, health evaluation,
//! debounced automatic recovery and durable state).
//!
//! The external integrations themselves (feeds, models, SMTP) sit behind the
//! traits in [`pipeline`]; everything in this crate works against those
//! seams.

pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod monitor;
pub mod pipeline;
pub mod recovery;
pub mod scheduler;
pub mod state;

pub use config::Config;
pub use error::{AppError, Result};
