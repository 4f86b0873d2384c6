//! Process configuration, read from the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use taskforge_infra::jobs::{
    BackoffPolicy, BackoffStrategy, RetentionPolicy, RetryPolicy, WorkerPoolConfig,
};
use taskforge_observability::{LogFormat, LogSettings};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub host: IpAddr,
    pub port: u16,
    pub log: LogSettings,
    pub queue_name: String,
    pub worker_concurrency: usize,
    pub max_attempts: u32,
    pub backoff_strategy: BackoffStrategy,
    pub backoff_base: Duration,
    /// Cap on a single retry delay, before jitter
    pub backoff_max_delay: Option<Duration>,
    pub backoff_jitter: f64,
    pub poll_interval: Duration,
    pub keep_completed: usize,
    pub keep_failed: usize,
    pub handler_timeout: Option<Duration>,
    pub reminder_duration: Duration,
    pub report_duration: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
            log: LogSettings::default(),
            queue_name: "task-queue".to_string(),
            worker_concurrency: 5,
            max_attempts: 3,
            backoff_strategy: BackoffStrategy::Exponential,
            backoff_base: Duration::from_millis(2000),
            backoff_max_delay: None,
            backoff_jitter: 0.0,
            poll_interval: Duration::from_millis(250),
            keep_completed: 100,
            keep_failed: 50,
            handler_timeout: None,
            reminder_duration: Duration::from_millis(1000),
            report_duration: Duration::from_millis(3000),
        }
    }
}

impl AppConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; unset or blank keys keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = get("NODE_ENV")
            .or_else(|| get("APP_ENV"))
            .unwrap_or(defaults.environment);

        let log = LogSettings {
            level: get("LOG_LEVEL").unwrap_or(defaults.log.level),
            format: match get("LOG_FORMAT") {
                Some(v) => v.parse::<LogFormat>().map_err(|e| invalid("LOG_FORMAT", &v, e))?,
                None if environment == "development" => LogFormat::Pretty,
                None => LogFormat::Json,
            },
        };

        let backoff_jitter = parse(&get, "JOB_BACKOFF_JITTER", defaults.backoff_jitter)?;
        if !(0.0..=1.0).contains(&backoff_jitter) {
            return Err(invalid(
                "JOB_BACKOFF_JITTER",
                &backoff_jitter.to_string(),
                "must be between 0 and 1",
            ));
        }

        let worker_concurrency = parse(&get, "WORKER_CONCURRENCY", defaults.worker_concurrency)?;
        if worker_concurrency == 0 {
            return Err(invalid("WORKER_CONCURRENCY", "0", "must be at least 1"));
        }
        let max_attempts = parse(&get, "JOB_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(invalid("JOB_MAX_ATTEMPTS", "0", "must be at least 1"));
        }

        let backoff_max_delay = match get("JOB_BACKOFF_MAX_DELAY_MS") {
            Some(_) => Some(millis(&get, "JOB_BACKOFF_MAX_DELAY_MS", Duration::ZERO)?),
            None => None,
        };

        let handler_timeout = match get("JOB_HANDLER_TIMEOUT_MS") {
            Some(_) => Some(millis(&get, "JOB_HANDLER_TIMEOUT_MS", Duration::ZERO)?),
            None => None,
        };

        Ok(Self {
            environment,
            host: parse(&get, "HOST", defaults.host)?,
            port: parse(&get, "PORT", defaults.port)?,
            log,
            queue_name: get("QUEUE_NAME").unwrap_or(defaults.queue_name),
            worker_concurrency,
            max_attempts,
            backoff_strategy: parse(&get, "JOB_BACKOFF_STRATEGY", defaults.backoff_strategy)?,
            backoff_base: millis(&get, "JOB_BACKOFF_BASE_MS", defaults.backoff_base)?,
            backoff_max_delay,
            backoff_jitter,
            poll_interval: millis(&get, "QUEUE_POLL_INTERVAL_MS", defaults.poll_interval)?,
            keep_completed: parse(&get, "QUEUE_KEEP_COMPLETED", defaults.keep_completed)?,
            keep_failed: parse(&get, "QUEUE_KEEP_FAILED", defaults.keep_failed)?,
            handler_timeout,
            reminder_duration: millis(&get, "REMINDER_DURATION_MS", defaults.reminder_duration)?,
            report_duration: millis(&get, "REPORT_DURATION_MS", defaults.report_duration)?,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = match self.backoff_strategy {
            BackoffStrategy::Exponential => BackoffPolicy::exponential(self.backoff_base),
            BackoffStrategy::Fixed => BackoffPolicy::fixed(self.backoff_base),
        };
        let backoff = match self.backoff_max_delay {
            Some(max) => backoff.with_max_delay(max),
            None => backoff,
        };
        RetryPolicy::new(self.max_attempts, backoff.with_jitter(self.backoff_jitter))
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            keep_completed: self.keep_completed,
            keep_failed: self.keep_failed,
        }
    }

    pub fn worker_pool(&self) -> WorkerPoolConfig {
        let config = WorkerPoolConfig::default()
            .with_name(self.queue_name.clone())
            .with_concurrency(self.worker_concurrency)
            .with_poll_interval(self.poll_interval);
        match self.handler_timeout {
            Some(timeout) => config.with_handler_timeout(timeout),
            None => config,
        }
    }
}

fn invalid(key: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => v.trim().parse().map_err(|e| invalid(key, &v, e)),
        None => Ok(default),
    }
}

fn millis<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    Ok(Duration::from_millis(parse(get, key, default.as_millis() as u64)?))
}
