//! News pipeline domain model
//!
//! The scheduler itself is domain-agnostic; everything market-news specific
//! lives here. Collection, analysis and mail delivery are performed by
//! external collaborators behind the traits in [`traits`]; this module
//! defines the data passed between them and the job catalog wiring them to
//! triggers.

mod noop;
mod tasks;
mod traits;

pub use noop::{NullAnalyzer, NullCollector, NullMailer, NullMaintainer};
pub use tasks::{build_jobs, component_probes, Collaborators};
pub use traits::{Analyzer, Collector, Mailer, Maintainer};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One collected news article
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: Uuid,
    pub title: String,
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
}

/// Result of a collection pass
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CollectionSummary {
    /// Items fetched from all sources
    pub fetched: usize,
    /// Items not previously seen
    pub new_items: usize,
}

/// Market-impact classification assigned by the analyzer
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ImpactLevel {
    High,
    Medium,
    Low,
}

/// An item with its analysis attached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedItem {
    pub item: NewsItem,
    pub impact: ImpactLevel,
    /// Model confidence in [0, 1]
    pub score: f64,
    pub rationale: String,
}

/// What a report mail is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ReportKind {
    /// Regular intraday digest of high-impact items
    Digest,
    /// End-of-day roundup
    DailySummary,
}

/// A rendered report handed to the mailer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactReport {
    pub subject: String,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<AnalyzedItem>,
}

impl ImpactReport {
    pub fn new(kind: ReportKind, mut items: Vec<AnalyzedItem>) -> Self {
        // Highest-impact, highest-confidence items first.
        items.sort_by(|a, b| {
            impact_rank(a.impact)
                .cmp(&impact_rank(b.impact))
                .then(b.score.total_cmp(&a.score))
        });

        let generated_at = Utc::now();
        let subject = match kind {
            ReportKind::Digest => format!(
                "Market impact digest: {} items ({})",
                items.len(),
                generated_at.format("%Y-%m-%d %H:%M UTC"),
            ),
            ReportKind::DailySummary => format!(
                "Daily market summary for {}",
                generated_at.format("%Y-%m-%d"),
            ),
        };

        Self {
            subject,
            generated_at,
            items,
        }
    }

    pub fn high_impact_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.impact == ImpactLevel::High)
            .count()
    }
}

fn impact_rank(level: ImpactLevel) -> u8 {
    match level {
        ImpactLevel::High => 0,
        ImpactLevel::Medium => 1,
        ImpactLevel::Low => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzed(title: &str, impact: ImpactLevel, score: f64) -> AnalyzedItem {
        AnalyzedItem {
            item: NewsItem {
                id: Uuid::new_v4(),
                title: title.to_string(),
                source: "test".to_string(),
                url: "https://example.com".to_string(),
                published_at: Utc::now(),
            },
            impact,
            score,
            rationale: "test".to_string(),
        }
    }

    #[test]
    fn test_report_orders_by_impact_then_score() {
        let report = ImpactReport::new(
            ReportKind::Digest,
            vec![
                analyzed("low", ImpactLevel::Low, 0.9),
                analyzed("high-weak", ImpactLevel::High, 0.4),
                analyzed("high-strong", ImpactLevel::High, 0.8),
            ],
        );

        assert_eq!(report.items[0].item.title, "high-strong");
        assert_eq!(report.items[1].item.title, "high-weak");
        assert_eq!(report.items[2].item.title, "low");
        assert_eq!(report.high_impact_count(), 2);
    }
}
