use anyhow::{anyhow, Context, Result};
use cfkit::cf::auth::Credentials;
use cfkit::cf::client::CfClient;
use cfkit::cf::http::format_cf_error;
use cfkit::config::Config;
use cfkit::error::CfError;
use cfkit::resource::CloudControllerClient;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use uuid::Uuid;

/// Cloud Foundry client
#[derive(Parser, Debug)]
#[command(name = "cfkit", version = cfkit::VERSION, about, long_about = None)]
struct Args {
    /// Cloud Controller API URL
    #[arg(long, global = true)]
    api: Option<String>,

    /// User to log in as (password from CF_PASSWORD)
    #[arg(short, long, global = true)]
    username: Option<String>,

    /// Identity provider origin
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Target space guid
    #[arg(short, long, global = true)]
    space: Option<Uuid>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json", global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List applications
    Apps,
    /// Show one application
    App { name: String },
    /// List the routes of an application
    Routes { app: String },
    /// Map a route URI to an application, creating the route if needed
    MapRoute { app: String, uri: String },
    /// List service instances
    Services,
    /// Show one service instance
    Service { name: String },
    /// List stacks
    Stacks,
    /// List the tasks of an application
    Tasks { app: String },
    /// Show the current token (without its value)
    Token,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cfkit {} started with log level: {:?}", cfkit::VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("cfkit").join("cfkit.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cfkit").join("cfkit.log");
    }
    PathBuf::from("cfkit.log")
}

fn print<T: Serialize>(format: OutputFormat, value: &T) -> Result<()> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

/// Token facts safe to print
#[derive(Serialize)]
struct TokenInfo {
    strategy: &'static str,
    token_type: String,
    scopes: Vec<String>,
    expires_at: String,
    exchanged: bool,
}

async fn connect(args: &Args, config: &Config) -> Result<CloudControllerClient<CfClient>> {
    let api_url = config
        .effective_api_url(args.api.as_deref())
        .ok_or_else(|| anyhow!("No API configured. Set CF_API or use --api"))?;
    let username = config
        .effective_username(args.username.as_deref())
        .ok_or_else(|| anyhow!("No user configured. Set CF_USERNAME or use --username"))?;
    let password = config
        .effective_password()
        .ok_or_else(|| anyhow!("CF_PASSWORD is not set"))?;
    let space = config.effective_space(args.space)?;

    let credentials = Credentials::password(&username, &password)
        .client(&config.effective_client_id(), &config.effective_client_secret());
    let options = config.login_options(config.effective_origin(args.origin.as_deref()));

    tracing::info!("Logging in to {} as {}", api_url, username);
    let cf = CfClient::login(&api_url, credentials, &options)
        .await
        .map_err(report)
        .with_context(|| format!("Login to {} failed", api_url))?;

    let client = CloudControllerClient::new(Arc::new(cf));
    Ok(match space {
        Some(space) => client.with_space(space),
        None => client,
    })
}

/// Turn a client error into a short user-facing message
fn report(error: CfError) -> anyhow::Error {
    tracing::debug!("Command failed: {:?}", error);
    anyhow!(format_cf_error(&error))
}

async fn app_guid(client: &CloudControllerClient<CfClient>, name: &str) -> Result<Uuid> {
    client
        .get_application(name, true)
        .await
        .map_err(report)?
        .and_then(|app| app.guid())
        .ok_or_else(|| anyhow!("Application '{}' has no guid", name))
}

async fn run(args: &Args, client: &CloudControllerClient<CfClient>) -> Result<()> {
    let format = args.output;
    match &args.command {
        Command::Apps => print(format, &client.get_applications().await.map_err(report)?),
        Command::App { name } => {
            print(format, &client.get_application(name, true).await.map_err(report)?)
        },
        Command::Routes { app } => {
            let guid = app_guid(client, app).await?;
            print(format, &client.get_routes(guid).await.map_err(report)?)
        },
        Command::MapRoute { app, uri } => {
            let guid = app_guid(client, app).await?;
            print(format, &client.add_route(guid, uri).await.map_err(report)?)
        },
        Command::Services => print(format, &client.get_service_instances().await.map_err(report)?),
        Command::Service { name } => print(
            format,
            &client.get_service_instance(name, true).await.map_err(report)?,
        ),
        Command::Stacks => print(format, &client.get_stacks().await.map_err(report)?),
        Command::Tasks { app } => {
            let guid = app_guid(client, app).await?;
            print(format, &client.get_tasks(guid).await.map_err(report)?)
        },
        Command::Token => {
            let tokens = &client.provider().tokens;
            let token = tokens
                .get_token()
                .await
                .map_err(report)?
                .ok_or_else(|| anyhow!("Not logged in"))?;
            print(
                format,
                &TokenInfo {
                    strategy: tokens.strategy_name(),
                    token_type: token.token_type.clone(),
                    scopes: token.scopes.iter().cloned().collect(),
                    expires_at: token.expires_at.to_rfc3339(),
                    exchanged: token.effective_value() != token.value,
                },
            )
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let mut config = Config::load();
    let client = connect(&args, &config).await?;

    run(&args, &client).await?;

    if args.api.is_some() || args.space.is_some() {
        config.set_target(client.provider().api_url(), args.space)?;
    }

    Ok(())
}
