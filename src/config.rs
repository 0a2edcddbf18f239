use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scheduler engine configuration
    pub scheduler: SchedulerConfig,

    /// Predefined jobs configuration
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Monitor loop configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Health evaluation thresholds
    #[serde(default)]
    pub health: HealthConfig,

    /// Automatic recovery configuration
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// State persistence configuration
    #[serde(default)]
    pub state: StateConfig,

    /// Report delivery configuration
    #[serde(default)]
    pub report: ReportConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the embedded defaults, an optional file and
    /// environment variables (prefix: MARKETPULSE, separator: `__`)
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(
                config::Environment::with_prefix("MARKETPULSE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            jobs: JobsConfig::default(),
            monitor: MonitorConfig::default(),
            health: HealthConfig::default(),
            recovery: RecoveryConfig::default(),
            state: StateConfig::default(),
            report: ReportConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Configuration for the scheduler engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the scheduler is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Timezone for calendar triggers (e.g. "UTC", "Asia/Shanghai")
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Grace period on stop before in-flight executions are abandoned
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    /// Number of execution events kept in memory
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl SchedulerConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: default_timezone(),
            stop_grace_secs: default_stop_grace(),
            history_capacity: default_history_capacity(),
        }
    }
}

/// Configuration for the predefined pipeline jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Periodic news collection
    pub collection: IntervalJobConfig,

    /// Periodic AI impact analysis
    pub analysis: IntervalJobConfig,

    /// Email report delivery (cron expression, seconds field first)
    pub email_report: CronJobConfig,

    /// Collect + analyze + mail in one unit
    pub full_pipeline: IntervalJobConfig,

    /// Multi-slot collection strategy
    pub strategy: StrategyConfig,

    /// Nightly maintenance
    pub maintenance: TimeOfDayJobConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            collection: IntervalJobConfig {
                enabled: true,
                interval_minutes: 30,
            },
            analysis: IntervalJobConfig {
                enabled: true,
                interval_minutes: 60,
            },
            email_report: CronJobConfig {
                enabled: true,
                // 09:00 and 18:00 daily
                schedule: "0 0 9,18 * * *".to_string(),
            },
            full_pipeline: IntervalJobConfig {
                enabled: true,
                interval_minutes: 120,
            },
            strategy: StrategyConfig::default(),
            maintenance: TimeOfDayJobConfig {
                enabled: true,
                hour: 3,
                minute: 0,
            },
        }
    }
}

/// Multi-slot collection strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Morning collection with an immediate mail-out
    pub morning: TimeOfDayJobConfig,

    /// Micro-interval collection during trading hours
    pub trading_hours: WindowedJobConfig,

    /// Evening collection without mail
    pub evening: TimeOfDayJobConfig,

    /// End-of-day summary mail
    pub daily_summary: TimeOfDayJobConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            morning: TimeOfDayJobConfig {
                enabled: true,
                hour: 8,
                minute: 0,
            },
            trading_hours: WindowedJobConfig {
                enabled: true,
                window_start: "08:00".to_string(),
                window_end: "16:00".to_string(),
                interval_minutes: 3,
            },
            evening: TimeOfDayJobConfig {
                enabled: true,
                hour: 22,
                minute: 0,
            },
            daily_summary: TimeOfDayJobConfig {
                enabled: true,
                hour: 23,
                minute: 30,
            },
        }
    }
}

/// A job firing on a fixed interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalJobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub interval_minutes: u64,
}

impl IntervalJobConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

/// A job driven by a cron expression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub schedule: String,
}

/// A job firing once daily at a fixed local time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeOfDayJobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub hour: u32,
    pub minute: u32,
}

/// A job firing on a sub-interval restricted to a time-of-day window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowedJobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Window start, "HH:MM"
    pub window_start: String,

    /// Window end, "HH:MM"
    pub window_end: String,

    pub interval_minutes: u64,
}

impl WindowedJobConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

/// Configuration for the monitor loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Whether the monitor loop is spawned on scheduler start
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between monitor ticks
    #[serde(default = "default_monitor_tick")]
    pub tick_secs: u64,

    /// Number of recent events shown in the dashboard snapshot
    #[serde(default = "default_event_tail")]
    pub event_tail: usize,
}

impl MonitorConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_monitor_tick(),
            event_tail: default_event_tail(),
        }
    }
}

/// Health evaluation thresholds
///
/// The failure window is bounded both by count and by age; the verdict is
/// computed over the most recent `window_events` executions no older than
/// `window_minutes`. Overlap skips are not executions and never occupy a
/// window slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_window_events")]
    pub window_events: usize,

    #[serde(default = "default_window_minutes")]
    pub window_minutes: u64,

    /// Failure rate above which the verdict turns critical
    #[serde(default = "default_degraded_threshold")]
    pub degraded_threshold: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_events: default_window_events(),
            window_minutes: default_window_minutes(),
            degraded_threshold: default_degraded_threshold(),
        }
    }
}

/// Automatic recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Whether critical verdicts may trigger an automatic restart
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Consecutive critical monitor ticks required before restarting
    #[serde(default = "default_debounce_ticks")]
    pub debounce_ticks: u32,

    /// Quiet period after a restart before recovery may re-arm
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ticks: default_debounce_ticks(),
            cooldown_secs: default_cooldown(),
        }
    }
}

/// State persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Snapshot file path
    #[serde(default = "default_state_path")]
    pub path: PathBuf,

    /// Number of events included in the persisted snapshot
    #[serde(default = "default_persisted_history")]
    pub persisted_history: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            persisted_history: default_persisted_history(),
        }
    }
}

/// Report delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReportConfig {
    /// Mail recipients for report jobs
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default tracing directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_stop_grace() -> u64 {
    30
}

fn default_history_capacity() -> usize {
    500
}

fn default_monitor_tick() -> u64 {
    60
}

fn default_event_tail() -> usize {
    10
}

fn default_window_events() -> usize {
    20
}

fn default_window_minutes() -> u64 {
    60
}

fn default_degraded_threshold() -> f64 {
    0.3
}

fn default_debounce_ticks() -> u32 {
    3
}

fn default_cooldown() -> u64 {
    600
}

fn default_state_path() -> PathBuf {
    PathBuf::from("data/scheduler_state.json")
}

fn default_persisted_history() -> usize {
    50
}

fn default_log_level() -> String {
    "marketpulse=info".to_string()
}
