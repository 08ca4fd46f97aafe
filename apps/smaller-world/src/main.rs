//! smaller world server and admin CLI.

use clap::{Parser, Subcommand};
use smaller_world::cli::{cmd_create_user, cmd_init, cmd_push_missing, cmd_serve, cmd_status};
use smaller_world::config::Config;
use smaller_world::error::CliError;
use smaller_world_core::ids::PostId;
use smaller_world_core::service::auth::NewUser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smaller-world")]
#[command(about = "A small social space for you and your friends", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "smaller-world.toml", env = "SMALLER_WORLD_CONFIG")]
    config: PathBuf,

    /// Database path (overrides `storage.path`)
    #[arg(short, long, env = "SMALLER_WORLD_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database
    Init {
        /// Replace an existing database
        #[arg(long)]
        force: bool,
    },
    /// Show record counts and pending work
    Status {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Register a user and their world
    CreateUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone_number: String,
        #[arg(long)]
        handle: String,
        #[arg(long, default_value = "America/New_York")]
        time_zone: String,
    },
    /// Notify friends who have not seen a post
    PushMissing {
        #[arg(long)]
        post_id: PostId,
    },
    /// Run the HTTP server, job queue and cron
    Serve {
        /// Bind address (overrides `server.bind`)
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("smaller_world=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = Config::load(&cli.config)?;
    if let Some(database) = cli.database {
        config.storage.path = database;
    }
    let db_path = config.storage.path.clone();

    match cli.command {
        Command::Init { force } => cmd_init(&db_path, force),
        Command::Status { json } => cmd_status(&db_path, &config, json),
        Command::CreateUser {
            name,
            phone_number,
            handle,
            time_zone,
        } => {
            let params = NewUser {
                name,
                phone_number,
                time_zone_name: time_zone,
                handle,
            };
            cmd_create_user(&db_path, &config, &params).map(|_| ())
        }
        Command::PushMissing { post_id } => cmd_push_missing(&db_path, &config, post_id).await.map(|_| ()),
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            cmd_serve(&db_path, &config).await
        }
    }
}
