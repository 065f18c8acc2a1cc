use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration as StdDuration;
use station_resample::config::Config;
use station_resample::dataset::{Dataset, DatasetHandle, StationId};
use station_resample::query::{
    AnimationQuery, DailyAveragesQuery, QueryService, SnapshotQuery, TimeSeriesQuery,
};
use station_resample::reloader::Reloader;
use station_resample::server;
use station_resample::shutdown::shutdown_signal;
use station_resample::time::{parse_date, parse_interval, parse_timestamp};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "station-resample")]
#[command(about = "Resample weather station readings onto arbitrary instants and time grids")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    config: PathBuf,

    /// Station CSV, overriding dataset.csv_path (the config file becomes optional)
    #[arg(long)]
    csv: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stations
    Stations {
        /// Only AirLink (AIR) devices
        #[arg(long)]
        airlink: bool,
    },
    /// Every station's values at one instant
    Snapshot {
        #[arg(long, value_parser = parse_timestamp)]
        at: DateTime<Utc>,
        #[arg(long = "var")]
        variables: Vec<String>,
    },
    /// Snapshots on a regular grid
    Animate {
        #[arg(long, value_parser = parse_timestamp)]
        start: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_timestamp)]
        end: Option<DateTime<Utc>>,
        /// e.g. 15min, 1h, 3600
        #[arg(long, value_parser = parse_interval)]
        interval: Option<Duration>,
        #[arg(long = "var")]
        variables: Vec<String>,
    },
    /// One station's readings, native or on a regular grid
    Series {
        #[arg(long)]
        station: StationId,
        #[arg(long, value_parser = parse_timestamp)]
        start: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_timestamp)]
        end: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_interval)]
        interval: Option<Duration>,
        #[arg(long = "var")]
        variables: Vec<String>,
    },
    /// Dataset overview
    Summary,
    /// Per-station averages for one day
    Averages {
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
        #[arg(long = "var")]
        variables: Vec<String>,
    },
    /// Answer JSON-lines requests on stdin until EOF or a shutdown signal
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries results, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,station_resample=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let csv_path = config.dataset.csv_path.clone();
    let dataset = tokio::task::spawn_blocking(move || Dataset::load(csv_path))
        .await?
        .with_context(|| {
            format!(
                "Failed to load station data from {}",
                config.dataset.csv_path.display()
            )
        })?;

    match cli.command {
        Command::Serve => {
            serve(config, dataset).await?;
            // tokio's stdin read can't be cancelled and would hold the runtime open
            std::process::exit(0);
        }
        command => {
            let service = QueryService::new(Arc::new(dataset), config.resampling);
            run_query(&service, command)
        }
    }
}

fn run_query(service: &QueryService, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Stations { airlink } => {
            let stations = if airlink {
                service.airlink_stations()
            } else {
                service.list_stations()
            };
            print_json(&stations)
        }
        Command::Snapshot { at, variables } => {
            let snapshot = service.get_snapshot(&SnapshotQuery {
                timestamp: at,
                variables: Some(variables),
            })?;
            print_json(&snapshot)
        }
        Command::Animate {
            start,
            end,
            interval,
            variables,
        } => {
            let animation = service.get_animation(&AnimationQuery {
                start,
                end,
                interval,
                variables: Some(variables),
            })?;
            info!("Rendering {} frames", animation.frame_count());
            print_json(&animation)
        }
        Command::Series {
            station,
            start,
            end,
            interval,
            variables,
        } => {
            let series = service.get_time_series(&TimeSeriesQuery {
                station_id: station,
                variables: Some(variables),
                start,
                end,
                interval,
            })?;
            print_json(&series)
        }
        Command::Summary => print_json(&service.summary()),
        Command::Averages { date, variables } => {
            let averages = service.daily_averages(&DailyAveragesQuery {
                date,
                variables: Some(variables),
            })?;
            print_json(&averages)
        }
        Command::Serve => anyhow::bail!("serve is not a one-shot query"),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.csv {
        Some(csv) if !cli.config.exists() => {
            info!("No config at {}, using defaults", cli.config.display());
            Config::from_csv_path(csv.clone())
        }
        _ => Config::load(&cli.config).map_err(|e| {
            anyhow::anyhow!(
                "Failed to load configuration: {}\n\n\
                 Make sure:\n\
                 1. {} exists (or pass --csv)\n\
                 2. All required environment variables are set (check .env.example)\n\
                 3. Create a .env file if needed",
                e,
                cli.config.display()
            )
        })?,
    };

    if let Some(csv) = &cli.csv {
        config.dataset.csv_path = csv.clone();
    }
    config.validate()?;
    info!("Configuration loaded");

    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

async fn serve(config: Config, dataset: Dataset) -> anyhow::Result<()> {
    info!("Station resample server starting...");

    let handle = DatasetHandle::new(dataset);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let reloader = if config.dataset.reload_interval_seconds > 0 {
        let mut reloader = Reloader::new(
            config.dataset.csv_path.clone(),
            StdDuration::from_secs(config.dataset.reload_interval_seconds),
            handle.clone(),
            shutdown_rx.clone(),
        );
        Some(tokio::spawn(async move {
            if let Err(e) = reloader.run().await {
                error!("Reloader error: {}", e);
            }
        }))
    } else {
        info!("Dataset reloading disabled");
        None
    };

    let handled = server::serve_lines(
        handle,
        config.resampling,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown_rx,
    )
    .await?;

    // EOF does not notify the reloader
    if let Some(task) = reloader {
        task.abort();
    }

    info!("Station resample server shutting down after {} requests", handled);
    Ok(())
}
