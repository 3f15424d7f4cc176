use anyhow::Result;
use fare_watch::amadeus::AmadeusRest;
use fare_watch::config::Config;
use fare_watch::engine::StopReason;
use fare_watch::store::Store;
use fare_watch::{maintenance, RunCoordinator};

enum Command {
    Run,
    ResetBest(String),
    PruneBest,
}

fn parse_args(args: &[String]) -> Result<Command> {
    match args {
        [] => Ok(Command::Run),
        [flag] if flag == "--prune-best" => Ok(Command::PruneBest),
        [flag, key] if flag == "--reset-best" => Ok(Command::ResetBest(key.clone())),
        [flag] if flag == "--reset-best" => anyhow::bail!("--reset-best needs a route key"),
        other => anyhow::bail!(
            "unexpected arguments {:?}\nusage: fare-watch [--reset-best <route_key> | --prune-best]",
            other
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fare_watch=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    // Load saved keys from .env (real env vars take precedence)
    Config::load_env_file();

    let config_path = Config::default_path();
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides()?;

    match command {
        Command::ResetBest(key) => {
            let store = Store::new(config.storage.clone());
            if maintenance::reset_route(&store, &key)? {
                println!("Reset best record for {}", key);
            } else {
                println!("No best record for {}", key);
            }
            return Ok(());
        }
        Command::PruneBest => {
            let store = Store::new(config.storage.clone());
            let removed = maintenance::prune_to_last_run(&store)?;
            println!("Pruned {} best record(s)", removed.len());
            for key in removed {
                println!("  {}", key);
            }
            return Ok(());
        }
        Command::Run => {}
    }

    // Everything that can be wrong with the configuration fails here,
    // before any network call.
    let specs = config.route_specs()?;
    let credentials = Config::credentials()?;
    let api = AmadeusRest::new(&config.api, credentials)?;
    tracing::info!(
        config = %config_path.display(),
        api = api.base_url(),
        routes = specs.len(),
        "configuration loaded"
    );

    let report = RunCoordinator::new(&config, specs, api).run().await?;

    let s = &report.stats;
    println!(
        "run {}: {}/{} instances queried, {} ok, {} error, {} offers, {} alert(s)",
        report.run_id,
        s.instances_queried,
        s.instances_total,
        s.calls_ok,
        s.calls_error,
        s.offers_saved,
        s.alerts
    );
    for alert in &report.alerts {
        println!("  ALERT {}", alert.message);
    }

    match &report.stop {
        Some(StopReason::Auth(msg)) => anyhow::bail!("run aborted, authentication failed: {}", msg),
        Some(StopReason::RateLimit) => {
            println!("  stopped early: rate-limit circuit breaker tripped");
            Ok(())
        }
        None => Ok(()),
    }
}
