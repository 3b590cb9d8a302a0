// # mailfwdd - Mail Forwarding Reconciler
//
// This is a THIN integration layer ONLY:
// - DO NOT add business logic, DNS logic, or retry logic here
// - All reconciliation logic lives in mailfwd-core
// - Configuration is via environment variables plus the JSON file they name
//
// mailfwdd is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering providers and building them from configuration
// 4. Dispatching one command to the Reconciler and printing its report
//
// ## Commands
//
// - `deploy` (default): full reconciliation, then write the gateway blob
// - `routes`: reconcile routes only
// - `teardown`: remove managed records, routes and routing domains
// - `plan`: full reconciliation in dry-run mode
//
// ## Configuration
//
// - `MAILFWD_CONFIG`: Path to the JSON forwarding configuration (required)
// - `MAILFWD_DNS_PROVIDER`: DNS provider (cloudflare, memory)
// - `MAILFWD_DNS_API_TOKEN`: DNS provider API token
// - `MAILFWD_DNS_ACCOUNT_ID`: Account to create zones in (optional)
// - `MAILFWD_ROUTING_PROVIDER`: Routing service (mailgun, memory)
// - `MAILFWD_MAILGUN_API_KEY`: Mailgun private API key
// - `MAILFWD_MAILGUN_REGION`: Mailgun region (us, eu)
// - `MAILFWD_GATEWAY_CONFIG_PATH`: Where `deploy` writes the gateway blob
// - `MAILFWD_DRY_RUN`: Plan only (true/false)
// - `MAILFWD_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export MAILFWD_CONFIG=/etc/mailfwd/config.json
// export MAILFWD_DNS_PROVIDER=cloudflare
// export MAILFWD_DNS_API_TOKEN=your_token
// export MAILFWD_ROUTING_PROVIDER=mailgun
// export MAILFWD_MAILGUN_API_KEY=your_key
// export MAILFWD_GATEWAY_CONFIG_PATH=/srv/gateway/config.json
//
// mailfwdd deploy
// ```

use anyhow::{Context, Result};
use mailfwd_core::config::{RawConfig, normalize};
use mailfwd_core::{
    DnsProviderConfig, FileFunctionHost, ForwardingConfig, FunctionHost, GatewayConfig,
    ProviderRegistry, Reconciler, RoutingServiceConfig, RunReport,
};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// - 0: Run completed and converged
/// - 1: Configuration or startup error
/// - 2: Run aborted (cycle, fatal setup, provider unreachable, cancelled)
/// - 3: Run completed with skipped or unverified domains
#[derive(Debug, Clone, Copy)]
enum MailfwdExitCode {
    /// Everything converged
    Success = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// The run aborted
    RuntimeError = 2,
    /// The run completed but not everything converged
    PartialFailure = 3,
}

impl From<MailfwdExitCode> for ExitCode {
    fn from(code: MailfwdExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// What to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Deploy,
    Routes,
    Teardown,
    Plan,
}

impl Command {
    fn parse(arg: Option<&str>) -> Result<Self> {
        match arg {
            None | Some("deploy") => Ok(Self::Deploy),
            Some("routes") => Ok(Self::Routes),
            Some("teardown") => Ok(Self::Teardown),
            Some("plan") => Ok(Self::Plan),
            Some(other) => anyhow::bail!(
                "Unknown command '{}'. Valid commands: deploy, routes, teardown, plan",
                other
            ),
        }
    }
}

/// Application configuration
struct Config {
    config_path: String,
    dns_provider: String,
    dns_api_token: Option<String>,
    dns_account_id: Option<String>,
    routing_provider: String,
    mailgun_api_key: Option<String>,
    mailgun_region: Option<String>,
    gateway_config_path: Option<String>,
    dry_run: bool,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            config_path: env::var("MAILFWD_CONFIG").context("MAILFWD_CONFIG is required")?,
            dns_provider: env::var("MAILFWD_DNS_PROVIDER")
                .unwrap_or_else(|_| "cloudflare".to_string()),
            dns_api_token: env::var("MAILFWD_DNS_API_TOKEN").ok(),
            dns_account_id: env::var("MAILFWD_DNS_ACCOUNT_ID").ok(),
            routing_provider: env::var("MAILFWD_ROUTING_PROVIDER")
                .unwrap_or_else(|_| "mailgun".to_string()),
            mailgun_api_key: env::var("MAILFWD_MAILGUN_API_KEY").ok(),
            mailgun_region: env::var("MAILFWD_MAILGUN_REGION").ok(),
            gateway_config_path: env::var("MAILFWD_GATEWAY_CONFIG_PATH").ok(),
            dry_run: env::var("MAILFWD_DRY_RUN")
                .map(|value| parse_bool(&value))
                .unwrap_or(Ok(false))?,
            log_level: env::var("MAILFWD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.config_path.is_empty() {
            anyhow::bail!("MAILFWD_CONFIG cannot be empty");
        }
        if !std::path::Path::new(&self.config_path).is_file() {
            anyhow::bail!("MAILFWD_CONFIG does not name a file: {}", self.config_path);
        }

        match self.dns_provider.as_str() {
            "cloudflare" => {
                if self.dns_api_token.as_ref().is_none_or(|t| t.is_empty()) {
                    anyhow::bail!(
                        "MAILFWD_DNS_API_TOKEN is required when MAILFWD_DNS_PROVIDER=cloudflare. \
                        Set it via: export MAILFWD_DNS_API_TOKEN=your_token"
                    );
                }
            }
            "memory" => {}
            other => anyhow::bail!(
                "MAILFWD_DNS_PROVIDER '{}' is not supported. \
                Supported providers: cloudflare, memory",
                other
            ),
        }

        match self.routing_provider.as_str() {
            "mailgun" => {
                if self.mailgun_api_key.as_ref().is_none_or(|k| k.is_empty()) {
                    anyhow::bail!(
                        "MAILFWD_MAILGUN_API_KEY is required when MAILFWD_ROUTING_PROVIDER=mailgun"
                    );
                }
                if let Some(region) = &self.mailgun_region
                    && !matches!(region.to_lowercase().as_str(), "us" | "eu")
                {
                    anyhow::bail!("MAILFWD_MAILGUN_REGION must be 'us' or 'eu'. Got: {}", region);
                }
            }
            "memory" => {}
            other => anyhow::bail!(
                "MAILFWD_ROUTING_PROVIDER '{}' is not supported. \
                Supported providers: mailgun, memory",
                other
            ),
        }

        if let Some(path) = &self.gateway_config_path
            && let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "MAILFWD_GATEWAY_CONFIG_PATH parent directory does not exist: {}",
                parent.display()
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "MAILFWD_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    fn dns_provider_config(&self) -> DnsProviderConfig {
        match self.dns_provider.as_str() {
            "memory" => DnsProviderConfig::Memory,
            _ => DnsProviderConfig::Cloudflare {
                api_token: self.dns_api_token.clone().unwrap_or_default(),
                account_id: self.dns_account_id.clone(),
                dry_run: self.dry_run,
            },
        }
    }

    fn routing_service_config(&self) -> RoutingServiceConfig {
        match self.routing_provider.as_str() {
            "memory" => RoutingServiceConfig::Memory,
            _ => RoutingServiceConfig::Mailgun {
                api_key: self.mailgun_api_key.clone().unwrap_or_default(),
                region: self.mailgun_region.clone(),
            },
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("MAILFWD_DRY_RUN must be true or false. Got: {}", other),
    }
}

/// Read and normalize the forwarding configuration file
fn load_forwarding_config(config: &Config, command: Command) -> Result<ForwardingConfig> {
    let text = std::fs::read_to_string(&config.config_path)
        .with_context(|| format!("Failed to read {}", config.config_path))?;
    let raw = RawConfig::from_json(&text)
        .with_context(|| format!("Failed to parse {}", config.config_path))?;
    let mut forwarding = normalize(&raw).context("Invalid forwarding configuration")?;

    if config.dry_run || command == Command::Plan {
        forwarding.settings.dry_run = true;
    }
    Ok(forwarding)
}

fn main() -> ExitCode {
    let command = match Command::parse(env::args().nth(1).as_deref()) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", e);
            return MailfwdExitCode::ConfigError.into();
        }
    };

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return MailfwdExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return MailfwdExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return MailfwdExitCode::ConfigError.into();
    }

    let forwarding = match load_forwarding_config(&config, command) {
        Ok(forwarding) => forwarding,
        Err(e) => {
            error!("{:#}", e);
            return MailfwdExitCode::ConfigError.into();
        }
    };

    info!(
        "Starting mailfwdd {:?}: {} domain(s), {} mapping(s)",
        command,
        forwarding.domains.len(),
        forwarding.mappings.len()
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return MailfwdExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run(&config, forwarding, command).await {
            Ok(report) => {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{}", json),
                    Err(e) => warn!("Failed to serialize report: {}", e),
                }
                if report.is_success() {
                    MailfwdExitCode::Success
                } else {
                    warn!(
                        "Run finished with {} skipped and {} unverified domain(s)",
                        report.skipped_domains.len(),
                        report.unverified_domains.len()
                    );
                    MailfwdExitCode::PartialFailure
                }
            }
            Err(e) => {
                error!("Run aborted: {:#}", e);
                MailfwdExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Build the registry with every compiled-in provider
fn build_registry() -> ProviderRegistry {
    let registry = ProviderRegistry::with_builtins();

    #[cfg(feature = "cloudflare")]
    {
        info!("Registering Cloudflare provider");
        mailfwd_provider_cloudflare::register(&registry);
    }

    #[cfg(feature = "mailgun")]
    {
        info!("Registering Mailgun service");
        mailfwd_routing_mailgun::register(&registry);
    }

    registry
}

/// Wire providers, run one command, and return its report
async fn run(config: &Config, forwarding: ForwardingConfig, command: Command) -> Result<RunReport> {
    let registry = build_registry();
    let dns = registry.create_dns_provider(&config.dns_provider_config())?;
    let routing = registry.create_routing_service(&config.routing_service_config())?;

    let cancel = CancellationToken::new();
    let dry_run = forwarding.settings.dry_run;
    let gateway = GatewayConfig::from(&forwarding);

    let (reconciler, mut events) =
        Reconciler::new(Arc::from(dns), Arc::from(routing), forwarding, cancel.clone())?;

    // Events are already logged by the reconciler; drain so senders never block
    let event_drain = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::debug!("Event: {:?}", event);
        }
    });

    let signal_cancel = cancel.clone();
    let signal_task = tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => {
                warn!("Received {}, cancelling run", signal);
                signal_cancel.cancel();
            }
            Err(e) => error!("Signal handling failed: {}", e),
        }
    });

    let result = match command {
        Command::Deploy | Command::Plan => reconciler.run().await,
        Command::Routes => reconciler.reconcile_routes().await,
        Command::Teardown => reconciler.teardown().await,
    };

    signal_task.abort();
    drop(reconciler);
    // The drain ends once the reconciler (the only sender) is gone
    let _ = event_drain.await;

    let report = result?;

    if command == Command::Deploy {
        match &config.gateway_config_path {
            Some(path) if !dry_run => FileFunctionHost::new(path).deploy(&gateway).await?,
            Some(path) => info!("[DRY-RUN] Would write gateway configuration to {}", path),
            None => warn!("MAILFWD_GATEWAY_CONFIG_PATH not set; gateway configuration not written"),
        }
    }

    Ok(report)
}

/// Wait for a shutdown signal (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for a shutdown signal (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
