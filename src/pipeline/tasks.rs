//! Job catalog
//!
//! Builds the predefined pipeline jobs from configuration and wires each to
//! its collaborators. A job is only registered when every collaborator it
//! needs is present; the health evaluator reports missing ones as down.

use super::traits::{Analyzer, Collector, Mailer, Maintainer};
use super::{ImpactReport, ReportKind};
use crate::config::{Config, TimeOfDayJobConfig, WindowedJobConfig};
use crate::health::ComponentProbe;
use crate::scheduler::{JobGroup, JobUnit, SchedulerError, SchedulerResult, Trigger};
use chrono::NaiveTime;
use std::sync::Arc;
use tracing::info;

pub const JOB_NEWS_COLLECTION: &str = "news_collection";
pub const JOB_AI_ANALYSIS: &str = "ai_analysis";
pub const JOB_EMAIL_REPORT: &str = "email_report";
pub const JOB_FULL_PIPELINE: &str = "full_pipeline";
pub const JOB_MORNING_COLLECTION: &str = "morning_collection";
pub const JOB_TRADING_HOURS: &str = "trading_hours_collection";
pub const JOB_EVENING_COLLECTION: &str = "evening_collection";
pub const JOB_DAILY_SUMMARY: &str = "daily_summary";
pub const JOB_MAINTENANCE: &str = "maintenance";

/// The external systems the pipeline jobs call into. Absent entries disable
/// the jobs that need them.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub collector: Option<Arc<dyn Collector>>,
    pub analyzer: Option<Arc<dyn Analyzer>>,
    pub mailer: Option<Arc<dyn Mailer>>,
    pub maintainer: Option<Arc<dyn Maintainer>>,
}

impl Collaborators {
    /// Everything wired to inert implementations; jobs run but touch nothing.
    pub fn inert() -> Self {
        Self {
            collector: Some(Arc::new(super::NullCollector)),
            analyzer: Some(Arc::new(super::NullAnalyzer)),
            mailer: Some(Arc::new(super::NullMailer)),
            maintainer: Some(Arc::new(super::NullMaintainer)),
        }
    }
}

/// Build every enabled, fully-wired job from the configuration.
pub fn build_jobs(config: &Config, collab: &Collaborators) -> SchedulerResult<Vec<JobUnit>> {
    let jobs_cfg = &config.jobs;
    let recipients = config.report.recipients.clone();
    let mut jobs = Vec::new();

    if jobs_cfg.collection.enabled {
        if let Some(collector) = &collab.collector {
            jobs.push(
                collection_job(
                    JOB_NEWS_COLLECTION,
                    "News collection",
                    Trigger::Interval(jobs_cfg.collection.interval()),
                    JobGroup::Collection,
                    Arc::clone(collector),
                )
            );
        }
    }

    if jobs_cfg.analysis.enabled {
        if let Some(analyzer) = &collab.analyzer {
            let analyzer = Arc::clone(analyzer);
            jobs.push(
                JobUnit::new(
                    JOB_AI_ANALYSIS,
                    "AI impact analysis",
                    Trigger::Interval(jobs_cfg.analysis.interval()),
                    JobGroup::Analysis,
                    move || {
                        let analyzer = Arc::clone(&analyzer);
                        async move {
                            match analyzer.analyze_pending().await {
                                Ok(items) => {
                                    let high = items
                                        .iter()
                                        .filter(|i| i.impact == super::ImpactLevel::High)
                                        .count();
                                    Ok(format!("analyzed {} items, {high} high impact", items.len()))
                                }
                                Err(err) => Err(format!("analysis failed: {err:#}")),
                            }
                        }
                    },
                )
                .with_component("analyzer"),
            );
        }
    }

    if jobs_cfg.email_report.enabled {
        if let (Some(analyzer), Some(mailer)) = (&collab.analyzer, &collab.mailer) {
            jobs.push(
                report_job(
                    JOB_EMAIL_REPORT,
                    "Email impact report",
                    Trigger::cron(&jobs_cfg.email_report.schedule)?,
                    JobGroup::Email,
                    ReportKind::Digest,
                    Arc::clone(analyzer),
                    Arc::clone(mailer),
                    recipients.clone(),
                )
            );
        }
    }

    if jobs_cfg.full_pipeline.enabled {
        if let (Some(collector), Some(analyzer), Some(mailer)) =
            (&collab.collector, &collab.analyzer, &collab.mailer)
        {
            let collector = Arc::clone(collector);
            let analyzer = Arc::clone(analyzer);
            let mailer = Arc::clone(mailer);
            let to = recipients.clone();
            jobs.push(
                JobUnit::new(
                    JOB_FULL_PIPELINE,
                    "Full pipeline pass",
                    Trigger::Interval(jobs_cfg.full_pipeline.interval()),
                    JobGroup::FullPipeline,
                    move || {
                        let collector = Arc::clone(&collector);
                        let analyzer = Arc::clone(&analyzer);
                        let mailer = Arc::clone(&mailer);
                        let to = to.clone();
                        async move {
                            run_full_pipeline(collector, analyzer, mailer, to).await
                        }
                    },
                )
                .with_component("collector"),
            );
        }
    }

    let strategy = &jobs_cfg.strategy;
    if strategy.morning.enabled {
        if let (Some(collector), Some(analyzer), Some(mailer)) =
            (&collab.collector, &collab.analyzer, &collab.mailer)
        {
            let collector = Arc::clone(collector);
            let analyzer = Arc::clone(analyzer);
            let mailer = Arc::clone(mailer);
            let to = recipients.clone();
            jobs.push(
                JobUnit::new(
                    JOB_MORNING_COLLECTION,
                    "Morning collection and digest",
                    daily_trigger(&strategy.morning)?,
                    JobGroup::Strategy,
                    move || {
                        let collector = Arc::clone(&collector);
                        let analyzer = Arc::clone(&analyzer);
                        let mailer = Arc::clone(&mailer);
                        let to = to.clone();
                        async move {
                            run_full_pipeline(collector, analyzer, mailer, to).await
                        }
                    },
                )
                .with_component("collector"),
            );
        }
    }

    if strategy.trading_hours.enabled {
        if let Some(collector) = &collab.collector {
            jobs.push(
                collection_job(
                    JOB_TRADING_HOURS,
                    "Trading-hours collection",
                    windowed_trigger(&strategy.trading_hours)?,
                    JobGroup::Strategy,
                    Arc::clone(collector),
                )
            );
        }
    }

    if strategy.evening.enabled {
        if let Some(collector) = &collab.collector {
            jobs.push(
                collection_job(
                    JOB_EVENING_COLLECTION,
                    "Evening collection",
                    daily_trigger(&strategy.evening)?,
                    JobGroup::Strategy,
                    Arc::clone(collector),
                )
            );
        }
    }

    if strategy.daily_summary.enabled {
        if let (Some(analyzer), Some(mailer)) = (&collab.analyzer, &collab.mailer) {
            jobs.push(
                report_job(
                    JOB_DAILY_SUMMARY,
                    "Daily summary mail",
                    daily_trigger(&strategy.daily_summary)?,
                    JobGroup::Strategy,
                    ReportKind::DailySummary,
                    Arc::clone(analyzer),
                    Arc::clone(mailer),
                    recipients,
                )
            );
        }
    }

    if jobs_cfg.maintenance.enabled {
        if let Some(maintainer) = &collab.maintainer {
            let maintainer = Arc::clone(maintainer);
            jobs.push(JobUnit::new(
                JOB_MAINTENANCE,
                "Nightly maintenance",
                daily_trigger(&jobs_cfg.maintenance)?,
                JobGroup::Maintenance,
                move || {
                    let maintainer = Arc::clone(&maintainer);
                    async move {
                        match maintainer.prune().await {
                            Ok(removed) => Ok(format!("pruned {removed} aged records")),
                            Err(err) => Err(format!("maintenance failed: {err:#}")),
                        }
                    }
                },
            ));
        }
    }

    info!(jobs = jobs.len(), "job catalog built");
    Ok(jobs)
}

/// Liveness inputs for the health evaluator.
pub fn component_probes(collab: &Collaborators) -> Vec<ComponentProbe> {
    let owned = |ids: &[&str]| ids.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    vec![
        // The scheduler itself: wired by definition, no jobs of its own.
        ComponentProbe::new("scheduler", true, Vec::new()),
        ComponentProbe::new(
            "collector",
            collab.collector.is_some(),
            owned(&[
                JOB_NEWS_COLLECTION,
                JOB_FULL_PIPELINE,
                JOB_MORNING_COLLECTION,
                JOB_TRADING_HOURS,
                JOB_EVENING_COLLECTION,
            ]),
        ),
        ComponentProbe::new(
            "analyzer",
            collab.analyzer.is_some(),
            owned(&[JOB_AI_ANALYSIS, JOB_FULL_PIPELINE]),
        ),
        ComponentProbe::new(
            "mailer",
            collab.mailer.is_some(),
            owned(&[JOB_EMAIL_REPORT, JOB_DAILY_SUMMARY]),
        ),
    ]
}

fn collection_job(
    id: &str,
    name: &str,
    trigger: Trigger,
    group: JobGroup,
    collector: Arc<dyn Collector>,
) -> JobUnit {
    JobUnit::new(id, name, trigger, group, move || {
        let collector = Arc::clone(&collector);
        async move {
            match collector.collect().await {
                Ok(summary) => Ok(format!(
                    "collected {} items ({} new)",
                    summary.fetched, summary.new_items
                )),
                Err(err) => Err(format!("collection failed: {err:#}")),
            }
        }
    })
    .with_component("collector")
}

#[allow(clippy::too_many_arguments)]
fn report_job(
    id: &str,
    name: &str,
    trigger: Trigger,
    group: JobGroup,
    kind: ReportKind,
    analyzer: Arc<dyn Analyzer>,
    mailer: Arc<dyn Mailer>,
    recipients: Vec<String>,
) -> JobUnit {
    JobUnit::new(id, name, trigger, group, move || {
        let analyzer = Arc::clone(&analyzer);
        let mailer = Arc::clone(&mailer);
        let recipients = recipients.clone();
        async move {
            let items = analyzer
                .highlights()
                .await
                .map_err(|err| format!("report query failed: {err:#}"))?;

            if items.is_empty() && kind == ReportKind::Digest {
                return Ok("no high-impact items, digest skipped".to_string());
            }

            let report = ImpactReport::new(kind, items);
            let count = report.items.len();
            mailer
                .send_report(&report, &recipients)
                .await
                .map_err(|err| format!("mail delivery failed: {err:#}"))?;
            Ok(format!("sent {kind} with {count} items"))
        }
    })
    .with_component("mailer")
}

async fn run_full_pipeline(
    collector: Arc<dyn Collector>,
    analyzer: Arc<dyn Analyzer>,
    mailer: Arc<dyn Mailer>,
    recipients: Vec<String>,
) -> Result<String, String> {
    let summary = collector
        .collect()
        .await
        .map_err(|err| format!("collection failed: {err:#}"))?;

    let analyzed = analyzer
        .analyze_pending()
        .await
        .map_err(|err| format!("analysis failed: {err:#}"))?;

    let report = ImpactReport::new(ReportKind::Digest, analyzed);
    let high = report.high_impact_count();
    if high > 0 {
        mailer
            .send_report(&report, &recipients)
            .await
            .map_err(|err| format!("mail delivery failed: {err:#}"))?;
    }

    Ok(format!(
        "pipeline pass: {} fetched, {} analyzed, {} high impact",
        summary.fetched,
        report.items.len(),
        high
    ))
}

fn daily_trigger(cfg: &TimeOfDayJobConfig) -> SchedulerResult<Trigger> {
    let time = NaiveTime::from_hms_opt(cfg.hour, cfg.minute, 0).ok_or_else(|| {
        SchedulerError::Configuration(format!("invalid time of day: {}:{:02}", cfg.hour, cfg.minute))
    })?;
    Ok(Trigger::DailyAt(time))
}

fn windowed_trigger(cfg: &WindowedJobConfig) -> SchedulerResult<Trigger> {
    Ok(Trigger::Windowed {
        start: parse_hhmm(&cfg.window_start)?,
        end: parse_hhmm(&cfg.window_end)?,
        every: cfg.interval(),
    })
}

fn parse_hhmm(value: &str) -> SchedulerResult<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| SchedulerError::Configuration(format!("invalid HH:MM time: {value}")))
}
