use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use risklens::config::{Config, RulesConfig};
use risklens::core::pipeline::run_pipeline;
use risklens::db::SharedDatabase;
use risklens::engine::DecisionEngine;
use risklens::feed::zmq_sub::start_zmq_subscriber;
use risklens::notifications::Notifier;
use risklens::ruleset::watcher::{RulesWatcher, watch_rules_file};
use risklens::ruleset::{ActiveRules, RuleSet, RuleSetDefinition};

fn main() {
    if let Err(e) = run() {
        eprintln!("risklens: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("risklens=info".parse()?))
        .init();

    tracing::info!("RiskLens starting...");

    let config = Config::load(Config::path_from_env());
    tracing::info!("Config: {:?}", config);

    let rules = Arc::new(ActiveRules::new(load_rules(&config.rules)?));
    tracing::info!(version = rules.version(), "Rule set active");
    let _watcher = start_watcher(&config.rules, &rules);

    // Open decision audit log
    let db_path = Path::new(&config.database.path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = SharedDatabase::open(db_path)?;
    tracing::info!("Decision store opened at {}", config.database.path);

    let engine = Arc::new(DecisionEngine::new(rules, config.engine.settings()));
    let notifier = Arc::new(Notifier::new(&config.notifications));

    // Feed → pipeline channel
    let (alert_tx, alert_rx) = mpsc::unbounded_channel();
    let _feed_handle = start_zmq_subscriber(config.feed.clone(), alert_tx);
    tracing::info!("Alert subscriber started");

    let rt = tokio::runtime::Runtime::new()?;
    let stats = rt.block_on(run_pipeline(
        alert_rx,
        engine,
        Arc::new(db),
        notifier,
        config.engine.max_in_flight,
    ));
    tracing::info!(?stats, "RiskLens stopped");
    Ok(())
}

/// Rules file if present, otherwise the bundled defaults.
fn load_rules(config: &RulesConfig) -> Result<RuleSet, Box<dyn Error>> {
    let path = Path::new(&config.path);
    if !path.exists() {
        tracing::info!("Rules file {} not found, using built-in rules", path.display());
        return Ok(RuleSet::builtin()?);
    }
    let ruleset = RuleSet::compile(RuleSetDefinition::from_file(path)?)?;
    tracing::info!("Rules loaded from {}", path.display());
    Ok(ruleset)
}

fn start_watcher(config: &RulesConfig, rules: &Arc<ActiveRules>) -> Option<RulesWatcher> {
    if !config.watch {
        return None;
    }
    match watch_rules_file(Path::new(&config.path), Arc::clone(rules)) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!("Rules hot-reload disabled: {e}");
            None
        }
    }
}
