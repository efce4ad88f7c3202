//! Marionette - loads every `*.rhai` avatar in a directory and drives it.
//!
//! ```text
//! main() -> load config -> Driver::load_dir() -> settle() -> run(ticks) -> summary
//! ```
//!
//! Avatar creation runs on tokio's blocking pool, sized by
//! `[runtime] creation_threads`. Frames run on the main thread; the
//! watchdog marks any avatar that overruns its budget.

mod args;
mod driver;
mod summary;

use std::env;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::Builder;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use marionette_config::MarionetteConfig;
use marionette_exchange::EventRegistry;
use marionette_runtime::{TracingReporter, Watchdog};
use marionette_script::{Budgets, ScriptHost};
use marionette_types::ProfilingCategories;

use crate::args::{Args, USAGE};
use crate::driver::Driver;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
}

fn load_config(args: &Args) -> Result<MarionetteConfig> {
    match &args.config {
        Some(path) => MarionetteConfig::load_from(path).context("failed to load --config"),
        None => Ok(MarionetteConfig::load_or_default()),
    }
}

fn budgets(config: &MarionetteConfig) -> Budgets {
    Budgets {
        init: config.budgets.init(),
        tick: config.budgets.tick(),
        render: config.budgets.render(),
        callback: config.budgets.callback(),
    }
}

fn main() -> Result<()> {
    let args = Args::parse(env::args().skip(1))?;
    if args.help {
        println!("{USAGE}");
        return Ok(());
    }

    init_tracing();

    let config = load_config(&args)?;
    let dir = args
        .dir
        .clone()
        .or_else(|| config.avatars.dir())
        .context("no avatar directory: pass --dir or set [avatars] dir")?;

    let runtime = Builder::new_multi_thread()
        .enable_time()
        .max_blocking_threads(config.runtime.creation_threads.max(1))
        .build()
        .context("failed to start async runtime")?;

    let (categories, category_ids) = ProfilingCategories::standard();
    let watchdog = Watchdog::start(config.watchdog.resolution(), Arc::new(categories))
        .context("failed to start watchdog")?;
    let (events, event_ids) = EventRegistry::standard();
    let host = ScriptHost::new(
        Arc::new(watchdog),
        category_ids,
        Arc::new(events),
        Arc::new(TracingReporter),
    )
    .with_budgets(budgets(&config))
    .with_memory_limit(config.memory.max_bytes_per_avatar);

    let driver = Driver::new(runtime.handle().clone(), host, event_ids);
    let launched = driver.load_dir(&dir)?;
    // Creation cannot be interrupted; give it the init budget plus slack.
    let settle_timeout = config.budgets.init() * 2 + Duration::from_secs(1);
    let loaded = runtime.block_on(driver.settle(settle_timeout));
    tracing::info!(launched, loaded, dir = %dir.display(), "Avatars settled");

    driver.run(args.ticks);

    let summary = driver.summary(args.ticks);
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("failed to encode summary")?
        );
    } else {
        print!("{summary}");
    }

    driver.shutdown();
    Ok(())
}
