mod cli;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use service_fixtures::descriptor::BUILTIN_KINDS;
use service_fixtures::{
    Error as FixturesError, FixturesConfig, OutputMode, Parser as ConfigParser, StandaloneService,
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(fixtures_error) = e.downcast_ref::<FixturesError>() {
            eprintln!("Error: {}", fixtures_error.with_suggestion());
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let config = load_config(&cli)?;
    let coordinator_config = config.coordinator_config().with_env_overrides()?;
    let output_mode = if cli.verbose {
        OutputMode::Passthrough
    } else {
        OutputMode::Null
    };

    let kinds: Vec<String> = if cli.services.is_empty() {
        BUILTIN_KINDS.iter().map(|k| k.to_string()).collect()
    } else {
        cli.services.clone()
    };

    let details_dir = std::path::absolute(&cli.details_dir)
        .with_context(|| format!("Invalid details directory {}", cli.details_dir.display()))?;

    let mut services = Vec::with_capacity(kinds.len());
    for kind in &kinds {
        let descriptor = config.descriptor(kind).ok_or_else(|| {
            FixturesError::Config(format!(
                "Unknown service '{}'. Known services: {}",
                kind,
                config.kinds().join(", ")
            ))
        })?;

        let mut service = StandaloneService::new(descriptor, &details_dir, output_mode);
        if let Err(e) = service.start(coordinator_config.startup_timeout).await {
            stop_all(&mut services).await;
            return Err(e.into());
        }
        services.push(service);
    }

    for service in &services {
        if let Some(line) = service.env_export_line() {
            println!("{}", line);
        }
    }
    tracing::info!("For a .env file:");
    for service in &services {
        if let Some(line) = service.dotenv_line() {
            tracing::info!("  {}", line);
        }
    }

    tracing::info!("Services running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    stop_all(&mut services).await;
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<FixturesConfig> {
    let parser = ConfigParser::new();
    if let Some(path) = &cli.config {
        return Ok(parser.load_config(path)?);
    }
    match parser.find_config_file() {
        Ok(path) => {
            tracing::debug!("Using config {}", path.display());
            Ok(parser.load_config(&path)?)
        }
        Err(_) => Ok(FixturesConfig::default()),
    }
}

/// Stop in reverse start order. Failures are logged, not returned.
async fn stop_all(services: &mut Vec<StandaloneService>) {
    while let Some(mut service) = services.pop() {
        if let Err(e) = service.stop().await {
            tracing::warn!("Failed to stop '{}': {}", service.kind(), e);
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
