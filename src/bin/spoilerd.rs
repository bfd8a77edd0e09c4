//! spoilerd - card spoiler harvester daemon
//!
//! This daemon:
//! 1. Loads configuration (JSON file + environment overrides)
//! 2. Rehydrates the spoiler window from the record store
//! 3. Polls the configured source feeds on a fixed minimum interval
//! 4. Extracts card sub-images from cluttered photos with the detector
//! 5. Screens every card for duplicates, in-batch then historical
//! 6. Persists accepted spoilers and forwards them to the notification sink

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;

use spoiler_harvester::{
    now_s, select_comparator, BotSink, CardDetector, CrawlSettings, Crawler, DuplicateEngine,
    ForumFeed, HarvesterConfig, LogSink, NotificationSink, PrimaryFeed, ScrapeFeed,
    SpoilerSource, SpoilerWindow, SqliteSpoilerStore, StrategyKind, StubScorer, VisionScorer,
};

#[derive(Debug, Parser)]
#[command(name = "spoilerd", about = "Card spoiler harvester daemon")]
struct Args {
    /// Path to the JSON config file (overrides SPOILER_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single crawl cycle and exit.
    #[arg(long)]
    once: bool,

    /// Override the similarity strategy (features|histogram|phash).
    #[arg(long)]
    strategy: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = HarvesterConfig::load_from(args.config.as_deref())?;
    if let Some(strategy) = &args.strategy {
        cfg.strategy.method = StrategyKind::parse(strategy)
            .ok_or_else(|| anyhow!("unknown similarity strategy '{}'", strategy))?;
    }

    log::info!(
        "spoilerd starting: db={}, strategy={}, window={}d, interval={}s",
        cfg.db_path,
        cfg.strategy.method,
        cfg.window.as_secs() / 86_400,
        cfg.crawl_interval.as_secs()
    );

    let mut store = SqliteSpoilerStore::open(&cfg.db_path)?;
    let window = SpoilerWindow::rehydrate(&mut store, cfg.window, now_s()?)?;
    log::info!("rehydrated {} spoiler(s) from the record store", window.len());

    let comparator = select_comparator(&cfg.strategy);
    let engine = DuplicateEngine::new(comparator);
    let detector = CardDetector::new(build_scorer(&cfg)?)
        .with_scale_ratio(cfg.detector.scale_ratio);
    let sources = build_sources(&cfg)?;
    if sources.is_empty() {
        log::warn!("no source feeds configured; cycles will be empty");
    }
    let sink = build_sink(&cfg);

    let settings = CrawlSettings {
        interval: cfg.crawl_interval,
        confidence_threshold: cfg.detector.confidence_threshold,
        ratio_tolerance: cfg.detector.ratio_tolerance,
    };
    let mut crawler = Crawler::new(
        sources,
        detector,
        engine,
        window,
        Box::new(store),
        sink,
        settings,
    );

    if args.once {
        return crawler.run_once();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("stop requested");
        flag.store(true, Ordering::Relaxed);
    })?;

    crawler.run(&stop);
    Ok(())
}

#[cfg(feature = "backend-tract")]
fn build_scorer(cfg: &HarvesterConfig) -> Result<Box<dyn VisionScorer>> {
    use spoiler_harvester::TractScorer;

    match &cfg.detector.model_path {
        Some(path) => {
            let scorer =
                TractScorer::new(path, cfg.detector.model_width, cfg.detector.model_height)?;
            log::info!("detection model loaded from {path}");
            Ok(Box::new(scorer))
        }
        None => {
            log::warn!("no detection model configured; using stub scorer");
            Ok(Box::new(StubScorer::new()))
        }
    }
}

#[cfg(not(feature = "backend-tract"))]
fn build_scorer(cfg: &HarvesterConfig) -> Result<Box<dyn VisionScorer>> {
    if cfg.detector.model_path.is_some() {
        log::warn!("model path configured but backend-tract is disabled; using stub scorer");
    }
    Ok(Box::new(StubScorer::new()))
}

fn build_sources(cfg: &HarvesterConfig) -> Result<Vec<Box<dyn SpoilerSource>>> {
    let mut sources: Vec<Box<dyn SpoilerSource>> = Vec::new();
    if let Some(url) = &cfg.sources.primary_url {
        sources.push(Box::new(PrimaryFeed::new(url.clone(), cfg.fetch_timeout)));
    }
    if let Some(url) = &cfg.sources.scrape_url {
        sources.push(Box::new(ScrapeFeed::new(url.clone(), cfg.fetch_timeout)?));
    }
    if let Some(url) = &cfg.sources.forum_url {
        sources.push(Box::new(ForumFeed::new(url.clone(), cfg.fetch_timeout)?));
    }
    Ok(sources)
}

fn build_sink(cfg: &HarvesterConfig) -> Box<dyn NotificationSink> {
    match (&cfg.notify.bot_endpoint, &cfg.notify.chat_id) {
        (Some(endpoint), Some(chat_id)) => Box::new(BotSink::new(
            endpoint.clone(),
            chat_id.clone(),
            cfg.fetch_timeout,
        )),
        _ => {
            log::warn!("no bot endpoint configured; spoilers will only be logged");
            Box::new(LogSink)
        }
    }
}
