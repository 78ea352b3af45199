mod commands;
mod output;

use clap::{Parser, Subcommand};
use invoicer_core::config;
use miette::Result;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "invoicer")]
#[command(about = "Invoicer admin panel CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Backend URL (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// Run against an in-process backend seeded with demo data
    #[arg(long)]
    memory: bool,

    /// Sign in as this user before running the command
    #[arg(long, short = 'u')]
    email: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List records of a collection
    List {
        resource: String,
        #[arg(long, default_value = "1")]
        page: u32,
        /// Page size (defaults to the configured list size)
        #[arg(long)]
        per_page: Option<u32>,
        /// Sort key, `-field` for descending; repeatable
        #[arg(long, allow_hyphen_values = true)]
        sort: Vec<String>,
        /// Filter as `field:operator:value`; repeatable
        #[arg(long)]
        filter: Vec<String>,
    },
    /// Show one record
    Get { resource: String, id: String },
    /// Create a record from a JSON object
    Create { resource: String, json: String },
    /// Update a record with a partial JSON object
    Update {
        resource: String,
        id: String,
        json: String,
    },
    /// Delete a record
    Delete { resource: String, id: String },
    /// Revenue and invoice statistics
    Dashboard {
        /// all, this-month, last-month or this-year
        #[arg(long, default_value = "all")]
        range: String,
    },
    /// Stream changes to a collection until interrupted
    Watch {
        resource: String,
        /// Only these actions (create, update, delete); repeatable
        #[arg(long)]
        action: Vec<String>,
        /// Only these record ids; repeatable
        #[arg(long)]
        id: Vec<String>,
    },
    /// Show the signed-in identity
    Whoami,
    /// Show collections after all migrations
    Schema,
    /// Configuration management
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Save current configuration to file
    Save {
        /// Path to save configuration
        #[arg(default_value = "invoicer.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .rgb_colors(miette::RgbColors::Preferred)
                .with_cause_chain()
                .with_syntax_highlighting(miette::highlighters::SyntectHighlighter::default())
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))?;
    miette::set_panic_hook();
    let cli = Cli::parse();

    use tracing_subscriber::{EnvFilter, fmt};

    let filter = if cli.debug {
        EnvFilter::new("invoicer_core=debug,invoicer_cli=debug,invoicer=debug")
    } else {
        EnvFilter::new("invoicer_core=info,invoicer_cli=info,invoicer=info,warn")
    };

    fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_timer(tracing_subscriber::fmt::time::LocalTime::rfc_3339())
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let mut config = if let Some(config_path) = &cli.config {
        info!("Loading config from: {:?}", config_path);
        config::load_config(config_path).await?
    } else {
        info!("Loading config from standard locations");
        config::load_config_from_standard_locations().await?
    };
    config = config.with_env_overrides();

    if let Some(url) = &cli.url {
        info!("Overriding backend url with: {}", url);
        config.backend.url = url.clone();
    }

    tracing::debug!("Using backend config: {:?}", config.backend);

    // config commands never touch the backend
    if let Commands::Config { cmd } = &cli.command {
        return match cmd {
            ConfigCommands::Show => commands::config::show(&config).await,
            ConfigCommands::Save { path } => commands::config::save(&config, path).await,
        };
    }
    if let Commands::Schema = &cli.command {
        return commands::schema::show();
    }

    let session = commands::connect(&config, cli.memory, cli.email.as_deref()).await?;

    let outcome = match &cli.command {
        Commands::List {
            resource,
            page,
            per_page,
            sort,
            filter,
        } => {
            commands::records::list(
                &session,
                resource,
                *page,
                per_page.unwrap_or(config.list.default_page_size),
                sort,
                filter,
            )
            .await
        }
        Commands::Get { resource, id } => commands::records::get(&session, resource, id).await,
        Commands::Create { resource, json } => {
            commands::records::create(&session, resource, json).await
        }
        Commands::Update { resource, id, json } => {
            commands::records::update(&session, resource, id, json).await
        }
        Commands::Delete { resource, id } => {
            commands::records::delete(&session, resource, id).await
        }
        Commands::Dashboard { range } => {
            commands::dashboard::show(&session, range, config.list.dashboard_page_size).await
        }
        Commands::Watch {
            resource,
            action,
            id,
        } => commands::watch::watch(&session, resource, action, id).await,
        Commands::Whoami => commands::auth::whoami(&session).await,
        Commands::Schema | Commands::Config { .. } => Ok(()),
    };

    session.finish(outcome).await
}
