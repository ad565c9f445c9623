use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use comm_fabric::Simulation;
use comm_fabric::config::ScenarioConfig;

#[derive(Parser)]
#[command(name = "comm-fabric", about = "Runs a comm fabric scenario")]
struct Cli {
    /// Scenario file (JSON)
    scenario: String,

    /// Simulated time to stop at; defaults to the scenario end time
    #[arg(long)]
    until: Option<f64>,

    /// Overrides the scenario seed
    #[arg(long)]
    seed: Option<u64>,

    /// Emit logs through tracing-subscriber instead of env_logger
    #[arg(long)]
    tracing: bool,

    /// Print notification counts by kind when the run ends
    #[arg(long)]
    summary: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.tracing {
        tracing_subscriber::fmt().init();
    } else {
        env_logger::init();
    }

    let mut scenario = ScenarioConfig::load(&cli.scenario)
        .with_context(|| format!("failed to load scenario {}", cli.scenario))?;
    if let Some(seed) = cli.seed {
        scenario.seed = seed;
    }
    let mut simulation = Simulation::from_config(&scenario)?;

    let counts: Rc<RefCell<BTreeMap<&'static str, usize>>> = Rc::new(RefCell::new(BTreeMap::new()));
    let sink = counts.clone();
    simulation.subscribe(move |time, notification| {
        info!("[{:10.3}] {:?}", time, notification);
        *sink.borrow_mut().entry(notification.kind_name()).or_default() += 1;
    });

    let end = cli.until.unwrap_or(scenario.end_time);
    let executed = simulation.run_until(end)?;
    info!("Stopped at {:.3} after {} events", simulation.now(), executed);

    if cli.summary {
        println!("events executed: {}", executed);
        for (kind, count) in counts.borrow().iter() {
            println!("{:<24} {}", kind, count);
        }
    }
    Ok(())
}
