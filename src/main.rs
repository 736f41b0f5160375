use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use bookworm_lib::commands;
use bookworm_lib::config::ClientConfig;
use bookworm_lib::Bookworm;

/// Command line client for the Bookworm library service
#[derive(Debug, Parser)]
#[command(name = "bookworm", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the API base URL
    #[arg(long, global = true, env = "BOOKWORM_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in with e-mail and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "BOOKWORM_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        username: String,
        #[arg(long, env = "BOOKWORM_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Fetch the current profile
    Me,
    /// Show the local session state
    Status,
    /// Sign out and forget stored credentials
    Logout,
    /// Upload a new avatar image
    Avatar { file: PathBuf },
    /// Delete the account
    DeleteAccount,
    /// Ask the navigation guard about a route
    Navigate { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    bookworm_lib::init_logging();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load(),
    };
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }

    let app = Bookworm::new(config)?;
    tracing::debug!(api = %app.config().api_base_url, "Starting");

    match &cli.command {
        Command::Login { email, password } => commands::login(&app, email, password).await,
        Command::Register {
            email,
            username,
            password,
        } => commands::register(&app, email, username, password).await,
        Command::Me => commands::me(&app).await,
        Command::Status => commands::status(&app),
        Command::Logout => commands::logout(&app),
        Command::Avatar { file } => commands::avatar(&app, file).await,
        Command::DeleteAccount => commands::delete_account(&app).await,
        Command::Navigate { path } => commands::navigate(&app, path).await,
    }
}
