//! Inert collaborator implementations
//!
//! Used when a real integration is not wired: jobs still run and record
//! events, but nothing is fetched, scored or sent. Also the backbone of the
//! engine tests.

use super::traits::{Analyzer, Collector, Mailer, Maintainer};
use super::{AnalyzedItem, CollectionSummary, ImpactReport};
use async_trait::async_trait;
use tracing::info;

pub struct NullCollector;

#[async_trait]
impl Collector for NullCollector {
    async fn collect(&self) -> anyhow::Result<CollectionSummary> {
        info!("collector not wired, collection pass is a no-op");
        Ok(CollectionSummary::default())
    }
}

pub struct NullAnalyzer;

#[async_trait]
impl Analyzer for NullAnalyzer {
    async fn analyze_pending(&self) -> anyhow::Result<Vec<AnalyzedItem>> {
        info!("analyzer not wired, nothing scored");
        Ok(Vec::new())
    }

    async fn highlights(&self) -> anyhow::Result<Vec<AnalyzedItem>> {
        Ok(Vec::new())
    }
}

pub struct NullMailer;

#[async_trait]
impl Mailer for NullMailer {
    async fn send_report(
        &self,
        report: &ImpactReport,
        recipients: &[String],
    ) -> anyhow::Result<()> {
        info!(
            subject = %report.subject,
            recipients = recipients.len(),
            "mailer not wired, report discarded"
        );
        Ok(())
    }
}

pub struct NullMaintainer;

#[async_trait]
impl Maintainer for NullMaintainer {
    async fn prune(&self) -> anyhow::Result<u64> {
        Ok(0)
    }
}
