mod counter;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use tracing::info;

use ricochet_common::{init_tracing, load_config, EngineConfig};
use ricochet_engine::{EpicMiddleware, Store, TracingMiddleware};

use counter::{CounterEvent, CounterState};

#[tokio::main]
async fn main() -> Result<()> {
    // A config file, when given, replaces the environment entirely.
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => load_config(&path)?,
        None => EngineConfig::from_env()?,
    };
    init_tracing(&config)?;

    info!("Ricochet demo starting...");
    config.log_summary();

    let epics = EpicMiddleware::new();
    let mut builder = Store::builder(counter::reducer(), CounterState::default())
        .with_scheduler(epics.scheduler().clone());
    if config.trace_dispatch {
        builder = builder.with_middleware(TracingMiddleware);
    }
    let store = builder.with_middleware(epics.clone()).build();

    let mut counts = epics.states().select(|state: &CounterState| state.count);
    tokio::spawn(async move {
        while let Some(count) = counts.next().await {
            info!(count, "count changed");
        }
    });

    epics
        .runner()
        .run(counter::root_epic(Duration::from_millis(config.demo_tick_ms))?)?;
    store.dispatch(CounterEvent::Start);

    info!("Running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    store.dispatch(CounterEvent::EpicEnd);
    let state = store.state();
    let pace = counter::pace().select(&state);
    info!(
        ticks = state.ticks,
        count = state.count,
        milestones = ?state.milestones,
        ticks_per_increment = ?pace,
        "Ricochet demo stopped"
    );
    Ok(())
}
