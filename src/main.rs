use std::{net::SocketAddr, path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use gatehouse::{
    Gateway, GracefulShutdown, HttpClientAdapter,
    config::{GatewayConfig, GatewayConfigValidator, loader::load_config},
    metrics,
    tracing_setup::{self, LogFormat},
    utils::spawn_hangup_handler,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file (TOML, YAML or JSON); environment only when omitted
    #[clap(short, long, global = true)]
    config: Option<String>,

    #[clap(long, value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the gateway server (default)
    Serve,
    /// Validate configuration file
    Validate,
    /// Write a starter configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "gatehouse.toml")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    match args.command.unwrap_or(Commands::Serve) {
        Commands::Validate => validate_config_command(args.config.as_deref()).await,
        Commands::Init { output } => init_config_command(&output).await,
        Commands::Serve => serve(args.config.as_deref(), args.log_format).await,
    }
}

async fn serve(config_path: Option<&str>, log_format: LogFormat) -> Result<()> {
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default for aws-lc-rs reported an error: {:?}. \
            A provider was probably installed already.",
            e
        );
    }

    tracing_setup::init_tracing(log_format, None)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    metrics::init_metrics().map_err(|e| eyre!("Failed to initialize metrics: {}", e))?;

    let config: GatewayConfig = load_config(config_path)
        .await
        .context("Failed to load configuration")?;
    GatewayConfigValidator::validate(&config).context("Invalid configuration")?;

    let http_client = Arc::new(
        HttpClientAdapter::with_timeout(config.proxy.timeout()?)
            .context("Failed to create HTTP client adapter")?,
    );
    let gateway = Gateway::build(&config, http_client)
        .await
        .context("Failed to assemble gateway")?;

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        let reason = signal_handler_shutdown.run_signal_handler().await;
        tracing::info!("Shutdown signal received: {:?}", reason);
    });

    let reloader = gateway.spawn_role_guard_reloader(&config, graceful_shutdown.token())?;

    let fallback = gateway.fallback.clone();
    let hangup = spawn_hangup_handler(graceful_shutdown.token(), move || {
        let fallback = fallback.clone();
        async move { fallback.reload_routes().await }
    });

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!(
        "Gatehouse listening on {} ({} routes, RoleGuard: {})",
        addr,
        gateway.routes.len().await,
        config.roleguard_path.is_some()
    );

    let token = graceful_shutdown.token();
    axum::serve(listener, gateway.router())
        .with_graceful_shutdown(token.cancelled_owned())
        .await
        .context("Server error")?;

    graceful_shutdown.drain(hangup).await;
    if let Some(reloader) = reloader {
        graceful_shutdown.drain(reloader).await;
    }
    tracing::info!("Graceful shutdown completed");
    Ok(())
}

async fn validate_config_command(config_path: Option<&str>) -> Result<()> {
    if let Some(path) = config_path {
        println!("🔍 Validating configuration file: {path}");
        if !Path::new(path).exists() {
            eprintln!("❌ Error: Configuration file '{path}' not found");
            std::process::exit(1);
        }
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Routes File: {}", config.routes_path.display());
            println!("   • RoleGuard: {}", config.roleguard_path.is_some());
            println!("   • Token Auth: {}", config.auth.jwt_secret.is_some());
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Gatehouse API Gateway Configuration

listen_addr = "0.0.0.0:8010"

# Route table, rewritten atomically on every change
routes_path = "Configuration/routes.json"

# RoleGuard rules (YAML or JSON), polled for changes
# roleguard_path = "Configuration/roleguard.yaml"
roleguard_poll_interval = "2s"

# Requests per minute for routes without their own limit
default_rate_limit = 60

[auth]
# HS256 secret for bearer tokens
# jwt_secret = "change-me"

[breaker]
failure_threshold = 5
cooldown = "30s"

[proxy]
timeout = "30s"
# Request bodies above this many bytes are answered with 413
max_body = 10485760

[agent]
# agent_id = "gatehouse"
corpus = "agents"

[guardian]
# sensitive_prefixes = ["/zones"]
# privileged_tokens = []
"#;

    tokio::fs::write(path, default_config)
        .await
        .with_context(|| format!("Failed to write {config_path}"))?;
    println!("✅ Created configuration file: {config_path}");
    Ok(())
}
