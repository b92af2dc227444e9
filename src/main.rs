use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use log::error;

use workout_sync::{
    Credentials, HttpWorkoutClient, MapBatchBuilder, Offline, Result, SyncConfig, SyncEngine,
    SyncMode, WorkoutStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sync a workout archive and build route maps", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "WORKOUT_SYNC_CONFIG", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Data root, overriding `paths.root`
    #[arg(long, value_hint = ValueHint::DirPath)]
    root: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download tracks for workouts not yet in the archive
    Quick(SyncArgs),
    /// Merge all remote metadata and repair missing or broken tracks
    Full(SyncArgs),
    /// Add workouts from the saved remote list without going online
    Local(LocalArgs),
    /// Build simplified route artifacts and the route collection
    Maps(MapArgs),
}

#[derive(Args, Debug)]
struct SyncArgs {
    /// Build missing route artifacts after the sync
    #[arg(long, action = ArgAction::SetTrue)]
    maps: bool,
}

#[derive(Args, Debug)]
struct LocalArgs {
    /// Remote list CSV to read instead of the configured backup
    #[arg(long, value_hint = ValueHint::FilePath)]
    csv: Option<PathBuf>,

    /// Build missing route artifacts after the sync
    #[arg(long, action = ArgAction::SetTrue)]
    maps: bool,
}

#[derive(Args, Debug)]
struct MapArgs {
    /// Regenerate every artifact, not only missing ones
    #[arg(long, action = ArgAction::SetTrue)]
    rebuild: bool,

    /// Workout types to include (comma separated), overriding `map.workout_types`
    #[arg(long, value_delimiter = ',')]
    types: Vec<String>,

    /// Simplification tolerance in meters, overriding `map.tolerance_m`
    #[arg(long)]
    tolerance: Option<f64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::default(),
    };
    if let Some(root) = cli.root {
        config.paths.root = root;
    }

    match cli.command {
        Command::Quick(args) => sync_online(&config, SyncMode::Quick, args.maps),
        Command::Full(args) => sync_online(&config, SyncMode::Full, args.maps),
        Command::Local(args) => {
            let mut engine = SyncEngine::from_config(&config, Offline)?;
            let summary = match &args.csv {
                Some(path) => engine.local_csv_sync(path)?,
                None => engine.run(SyncMode::LocalCsv)?,
            };
            println!("{}", summary);
            if args.maps {
                build_maps(&config, engine.into_store(), false)?;
            }
            Ok(())
        }
        Command::Maps(args) => {
            if !args.types.is_empty() {
                config.map.workout_types = args.types;
            }
            if let Some(tolerance) = args.tolerance {
                config.map.tolerance_m = tolerance;
            }
            config.validate()?;
            let store = WorkoutStore::load(&config.paths)?;
            build_maps(&config, store, args.rebuild)
        }
    }
}

fn sync_online(config: &SyncConfig, mode: SyncMode, maps: bool) -> Result<()> {
    let credentials = Credentials::from_env(&config.remote)?;
    let client = HttpWorkoutClient::new(config.remote.clone(), credentials)?;
    let mut engine = SyncEngine::from_config(config, client)?;

    let summary = engine.run(mode)?;
    println!("{}", summary);
    if !summary.failed_ids.is_empty() {
        println!("failed: {}", summary.failed_ids.join(", "));
    }

    if maps {
        build_maps(config, engine.into_store(), false)?;
    }
    Ok(())
}

fn build_maps(config: &SyncConfig, mut store: WorkoutStore, rebuild: bool) -> Result<()> {
    let types: BTreeSet<String> = config
        .map
        .workout_types
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let builder = MapBatchBuilder::from_config(config);
    let summary = builder.simplify_workouts(&mut store, &types, !rebuild)?;
    println!("maps: {}", summary);

    let out = config.paths.route_collection_path();
    let routes = builder.write_route_collection(&out)?;
    println!("route collection: {} routes in {}", routes, out.display());
    Ok(())
}
