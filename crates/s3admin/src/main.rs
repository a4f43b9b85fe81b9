use std::env;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, info, warn};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use s3admin::api::{self, AppState};
use s3admin::auth::{AuthService, SigningKeypair, SystemClock};
use s3admin::settings::{self, APP_NAME, AppConfig};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("config file: {}", ctx.config_file.display());

    match cli.command {
        Command::Serve(cmd) => async_main(ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Keygen => handle_keygen(&ctx),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "s3admin - administrative console for S3-compatible object storage.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Output machine readable YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Include source locations in log lines
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP API server
    Serve(ServeCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print a fresh session signing key
    Keygen,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    config_file: PathBuf,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let config_file = settings::resolve_config_path(common.config.clone())?;
        let config = settings::load_config(&config_file)?;
        Ok(Self {
            common,
            config_file,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{APP_NAME}={level},tower_http={level}"))
        });

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // Also init env_logger for log crate users
        let mut builder = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(&self.config.logging.level),
        );
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let mut server = ctx.config.server.clone();
    if let Some(host) = cmd.host {
        server.host = host;
    }
    if let Some(port) = cmd.port {
        server.port = port;
    }
    let root_url = server.effective_root_url();

    let shutdown = CancellationToken::new();

    let auth = AuthService::from_config(
        ctx.config.auth.clone(),
        &root_url,
        Arc::new(SystemClock),
        &shutdown,
    )
    .await
    .map_err(|e| match e {
        s3admin::auth::AuthError::Configuration(detail) => {
            anyhow::anyhow!("authentication setup failed: {detail}")
        }
        other => anyhow::Error::new(other).context("authentication setup failed"),
    })?;
    let auth = Arc::new(auth);

    let state = AppState::new(auth.clone(), shutdown.clone())
        .with_allowed_origins(server.allowed_origins.clone());
    let app = api::create_router(state);

    let addr: SocketAddr = format!("{}:{}", server.host, server.port)
        .parse()
        .context("invalid address")?;

    info!("Listening on http://{} (public URL {})", addr, root_url);

    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;

    let signal_token = shutdown.clone();
    let shutdown_signal = async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("running server")?;

    auth.shutdown();
    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else if ctx.common.yaml {
                println!(
                    "{}",
                    serde_yaml::to_string(&ctx.config).context("serializing config to YAML")?
                );
            } else {
                println!(
                    "{}",
                    toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?
                );
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.config_file.display());
            Ok(())
        }
        ConfigCommand::Init { force } => {
            if ctx.config_file.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    ctx.config_file.display()
                );
            }
            settings::write_default_config(&ctx.config_file)?;
            info!("Wrote {}", ctx.config_file.display());
            Ok(())
        }
    }
}

fn handle_keygen(ctx: &RuntimeContext) -> Result<()> {
    let keys = SigningKeypair::generate().context("generating signing key")?;
    let public_pem = keys.public_key_pem().context("encoding public key")?;

    if ctx.common.json {
        let out = serde_json::json!({
            "private_key": keys.encode_private_key(),
            "public_key_pem": public_pem,
            "kid": keys.key_id(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("# auth.session.signing_key (keep secret)");
        println!("{}", keys.encode_private_key());
        println!();
        println!("# public key, kid {}", keys.key_id());
        print!("{public_pem}");
    }
    Ok(())
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}
