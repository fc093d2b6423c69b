use anyhow::{Context, Result};
use clap::Parser;

use typhoon::config::{Cli, Command, Config};
use typhoon::mock_server::MockServer;

fn main() -> Result<()> {
    // Load .env before clap reads env fallbacks
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run(args) => {
            let config = args
                .config_file()
                .and_then(|file| file.into_config())
                .context("Invalid configuration")?;
            let runtime = build_runtime(config.num_cpu)?;
            runtime.block_on(run(config, args.load.json))
        }
        Command::Standalone(args) => {
            let mut config = Config::new(String::new());
            config.keep_alive = true;
            args.load
                .apply_to(&mut config)
                .context("Invalid configuration")?;

            let runtime = build_runtime(config.num_cpu)?;
            runtime.block_on(async move {
                let mut server = MockServer::new(args.mock_config());
                let port = server.start().await.context("Failed to start mock server")?;
                tracing::info!(port, "Mock server started");

                config.target = server.url();
                let result = run(config, args.load.json).await;
                server.stop();
                result
            })
        }
    }
}

/// Build the runtime the workers are scheduled on; 0 keeps one thread per core
fn build_runtime(worker_threads: usize) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if worker_threads > 0 {
        builder.worker_threads(worker_threads);
    }
    builder.build().context("Failed to build async runtime")
}

async fn run(config: Config, json_output: bool) -> Result<()> {
    let mut typhoon = config.typhoon().context("Failed to prepare load test")?;

    let stopper = typhoon.stop_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C signal, stopping load test...");
            stopper.stop();
        }
    });

    if !json_output {
        println!("Testing : {}", config.target);
    }

    let report = typhoon.start().await;

    if json_output {
        println!("{}", report.to_json());
    } else {
        println!("{}", report);
    }

    Ok(())
}
