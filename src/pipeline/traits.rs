//! Collaborator seams
//!
//! The scheduler calls out to external systems only through these traits, so
//! the engine and its tests never depend on live feeds, models or SMTP.

use super::{AnalyzedItem, CollectionSummary, ImpactReport};
use async_trait::async_trait;

/// Fetches news from the configured sources and stores anything new.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self) -> anyhow::Result<CollectionSummary>;
}

/// Scores stored items for market impact.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyze items that have not been scored yet.
    async fn analyze_pending(&self) -> anyhow::Result<Vec<AnalyzedItem>>;

    /// High-impact items from the current reporting day, for report jobs.
    async fn highlights(&self) -> anyhow::Result<Vec<AnalyzedItem>>;
}

/// Delivers rendered reports.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_report(
        &self,
        report: &ImpactReport,
        recipients: &[String],
    ) -> anyhow::Result<()>;
}

/// Prunes aged pipeline data.
#[async_trait]
pub trait Maintainer: Send + Sync {
    /// Returns the number of records removed.
    async fn prune(&self) -> anyhow::Result<u64>;
}
