use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::card::StrategyKind;
use crate::detect::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_RATIO_TOLERANCE, DEFAULT_SCALE_RATIO};
use crate::similarity::{
    DEFAULT_FEATURE_THRESHOLD, DEFAULT_HASH_THRESHOLD, DEFAULT_HISTOGRAM_THRESHOLD,
    DEFAULT_LOWE_RATIO,
};

const DEFAULT_DB_PATH: &str = "spoilers.db";
const DEFAULT_CRAWL_INTERVAL_SECS: u64 = 60;
const DEFAULT_WINDOW_DAYS: u64 = 45;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MODEL_WIDTH: u32 = 416;
const DEFAULT_MODEL_HEIGHT: u32 = 416;
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Deserialize, Default)]
struct HarvesterConfigFile {
    db_path: Option<String>,
    crawl_interval_secs: Option<u64>,
    window_days: Option<u64>,
    fetch_timeout_secs: Option<u64>,
    detector: Option<DetectorConfigFile>,
    strategy: Option<StrategyConfigFile>,
    sources: Option<SourcesConfigFile>,
    notify: Option<NotifyConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    model_path: Option<String>,
    model_width: Option<u32>,
    model_height: Option<u32>,
    confidence_threshold: Option<f32>,
    ratio_tolerance: Option<f32>,
    scale_ratio: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct StrategyConfigFile {
    method: Option<String>,
    histogram_threshold: Option<f64>,
    hash_threshold: Option<u32>,
    feature_threshold: Option<usize>,
    lowe_ratio: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct SourcesConfigFile {
    primary_url: Option<String>,
    scrape_url: Option<String>,
    forum_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    bot_endpoint: Option<String>,
    chat_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    pub db_path: String,
    pub crawl_interval: Duration,
    pub window: Duration,
    pub fetch_timeout: Duration,
    pub detector: DetectorSettings,
    pub strategy: StrategySettings,
    pub sources: SourceSettings,
    pub notify: NotifySettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub model_path: Option<String>,
    pub model_width: u32,
    pub model_height: u32,
    pub confidence_threshold: f32,
    pub ratio_tolerance: f32,
    pub scale_ratio: f64,
}

#[derive(Debug, Clone)]
pub struct StrategySettings {
    pub method: StrategyKind,
    pub histogram_threshold: f64,
    pub hash_threshold: u32,
    pub feature_threshold: usize,
    pub lowe_ratio: f32,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub primary_url: Option<String>,
    pub scrape_url: Option<String>,
    pub forum_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NotifySettings {
    pub bot_endpoint: Option<String>,
    pub chat_id: Option<String>,
}

impl HarvesterConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SPOILER_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load with an explicit config path (CLI override); falls back to
    /// `SPOILER_CONFIG` handling when `path` is `None`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => match std::env::var("SPOILER_CONFIG").ok() {
                Some(env_path) => Some(read_config_file(Path::new(&env_path))?),
                None => None,
            },
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: HarvesterConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let crawl_interval = Duration::from_secs(
            file.crawl_interval_secs
                .unwrap_or(DEFAULT_CRAWL_INTERVAL_SECS),
        );
        let window =
            Duration::from_secs(file.window_days.unwrap_or(DEFAULT_WINDOW_DAYS) * SECONDS_PER_DAY);
        let fetch_timeout = Duration::from_secs(
            file.fetch_timeout_secs
                .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
        );

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            model_path: detector_file.model_path,
            model_width: detector_file.model_width.unwrap_or(DEFAULT_MODEL_WIDTH),
            model_height: detector_file.model_height.unwrap_or(DEFAULT_MODEL_HEIGHT),
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            ratio_tolerance: detector_file
                .ratio_tolerance
                .unwrap_or(DEFAULT_RATIO_TOLERANCE),
            scale_ratio: detector_file.scale_ratio.unwrap_or(DEFAULT_SCALE_RATIO),
        };

        let strategy_file = file.strategy.unwrap_or_default();
        let method = match strategy_file.method {
            Some(name) => StrategyKind::parse(&name)
                .ok_or_else(|| anyhow!("unknown similarity strategy '{}'", name))?,
            None => StrategyKind::Histogram,
        };
        let strategy = StrategySettings {
            method,
            histogram_threshold: strategy_file
                .histogram_threshold
                .unwrap_or(DEFAULT_HISTOGRAM_THRESHOLD),
            hash_threshold: strategy_file.hash_threshold.unwrap_or(DEFAULT_HASH_THRESHOLD),
            feature_threshold: strategy_file
                .feature_threshold
                .unwrap_or(DEFAULT_FEATURE_THRESHOLD),
            lowe_ratio: strategy_file.lowe_ratio.unwrap_or(DEFAULT_LOWE_RATIO),
        };

        let sources_file = file.sources.unwrap_or_default();
        let sources = SourceSettings {
            primary_url: sources_file.primary_url,
            scrape_url: sources_file.scrape_url,
            forum_url: sources_file.forum_url,
        };

        let notify_file = file.notify.unwrap_or_default();
        let notify = NotifySettings {
            bot_endpoint: notify_file.bot_endpoint,
            chat_id: notify_file.chat_id,
        };

        Ok(Self {
            db_path,
            crawl_interval,
            window,
            fetch_timeout,
            detector,
            strategy,
            sources,
            notify,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("SPOILER_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(interval) = std::env::var("SPOILER_CRAWL_INTERVAL_SECS") {
            let seconds: u64 = interval.parse().map_err(|_| {
                anyhow!("SPOILER_CRAWL_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.crawl_interval = Duration::from_secs(seconds);
        }
        if let Ok(days) = std::env::var("SPOILER_WINDOW_DAYS") {
            let days: u64 = days
                .parse()
                .map_err(|_| anyhow!("SPOILER_WINDOW_DAYS must be an integer number of days"))?;
            self.window = Duration::from_secs(days * SECONDS_PER_DAY);
        }
        if let Ok(strategy) = std::env::var("SPOILER_STRATEGY") {
            if !strategy.trim().is_empty() {
                self.strategy.method = StrategyKind::parse(&strategy)
                    .ok_or_else(|| anyhow!("unknown similarity strategy '{}'", strategy))?;
            }
        }
        if let Ok(path) = std::env::var("SPOILER_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(path);
            }
        }
        if let Ok(url) = std::env::var("SPOILER_PRIMARY_URL") {
            if !url.trim().is_empty() {
                self.sources.primary_url = Some(url);
            }
        }
        if let Ok(url) = std::env::var("SPOILER_SCRAPE_URL") {
            if !url.trim().is_empty() {
                self.sources.scrape_url = Some(url);
            }
        }
        if let Ok(url) = std::env::var("SPOILER_FORUM_URL") {
            if !url.trim().is_empty() {
                self.sources.forum_url = Some(url);
            }
        }
        if let Ok(endpoint) = std::env::var("SPOILER_BOT_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.notify.bot_endpoint = Some(endpoint);
            }
        }
        if let Ok(chat_id) = std::env::var("SPOILER_CHAT_ID") {
            if !chat_id.trim().is_empty() {
                self.notify.chat_id = Some(chat_id);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.crawl_interval.as_secs() == 0 {
            return Err(anyhow!("crawl interval must be greater than zero"));
        }
        if self.window.as_secs() == 0 {
            return Err(anyhow!("spoiler window must be greater than zero"));
        }
        if !(self.detector.scale_ratio > 0.0 && self.detector.scale_ratio <= 1.0) {
            return Err(anyhow!("detector scale ratio must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(anyhow!("confidence threshold must be in [0, 1]"));
        }
        if self.detector.ratio_tolerance < 0.0 {
            return Err(anyhow!("aspect ratio tolerance must not be negative"));
        }
        if !(self.strategy.lowe_ratio > 0.0 && self.strategy.lowe_ratio < 1.0) {
            return Err(anyhow!("lowe ratio must be in (0, 1)"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<HarvesterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
