//! Warden - secret-store bootstrap and identity issuance

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use warden::backend::HttpBackend;
use warden::config::{AuthSettings, Config};
use warden::controller::Controller;
use warden::identity::IdentityService;
use warden::server;

/// Warden - bootstraps the platform secret store and issues identities from it
#[derive(Parser, Debug)]
#[command(name = "warden", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bootstrap controller and status endpoint (default mode)
    ///
    /// Drives the backend to its desired configuration, keeps re-validating
    /// it, and renews the operational token for the life of the process.
    Run(RunArgs),

    /// Issue a certificate through the configured backend
    Issue(IssueArgs),

    /// Print the backend's CA certificate
    Ca(AuthedArgs),

    /// Print the current certificate revocation list
    Crl(AuthedArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct RunArgs {
    /// Base address of the secret-store backend
    #[arg(
        long,
        env = "WARDEN_BACKEND_ADDR",
        default_value = "http://127.0.0.1:8200"
    )]
    backend_addr: String,

    /// Externally reachable backend URL, embedded in issuing/CRL URLs
    /// (defaults to the backend address)
    #[arg(long, env = "WARDEN_EXTERNAL_URL")]
    external_url: Option<String>,

    /// Base DNS domain of the platform
    #[arg(long, env = "WARDEN_BASE_DNS", default_value = "platform.local")]
    base_dns: String,

    /// Organization stamped into issued certificates and generated CA material
    #[arg(long, env = "WARDEN_ORGANIZATION", default_value = "Warden")]
    organization: String,

    /// Root directory for locally persisted secrets
    #[arg(
        long,
        env = "WARDEN_SECRETS_DIR",
        default_value = "/var/lib/warden/secrets"
    )]
    secrets_dir: PathBuf,

    /// Listen port for the status/metrics endpoint
    #[arg(long, env = "WARDEN_STATUS_PORT", default_value_t = warden::DEFAULT_STATUS_PORT)]
    status_port: u16,

    /// Seconds between discovery/reconcile ticks
    #[arg(long, default_value_t = warden::DEFAULT_TICK_SECS)]
    tick_secs: u64,

    /// Operational token period in seconds
    #[arg(long, default_value_t = warden::DEFAULT_TOKEN_PERIOD_SECS)]
    token_period_secs: u64,
}

/// Backend address plus one login method
#[derive(Parser, Debug)]
struct AuthedArgs {
    /// Base address of the secret-store backend
    #[arg(
        long,
        env = "WARDEN_BACKEND_ADDR",
        default_value = "http://127.0.0.1:8200"
    )]
    backend_addr: String,

    /// Pre-shared backend token
    #[arg(long, env = "WARDEN_TOKEN")]
    token: Option<String>,

    /// Platform-identity role to log in as
    #[arg(long, env = "WARDEN_IDENTITY_ROLE")]
    identity_role: Option<String>,

    /// Path to the local service-identity token file
    #[arg(long, env = "WARDEN_IDENTITY_TOKEN_FILE")]
    identity_token_file: Option<PathBuf>,

    /// Application-role id
    #[arg(long, env = "WARDEN_APP_ROLE_ID")]
    app_role_id: Option<String>,

    /// Application-role secret id
    #[arg(long, env = "WARDEN_APP_ROLE_SECRET")]
    app_role_secret: Option<String>,
}

impl AuthedArgs {
    fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            token: self.token.clone(),
            platform_identity_role: self.identity_role.clone(),
            identity_token_file: self.identity_token_file.clone(),
            app_role_id: self.app_role_id.clone(),
            app_role_secret: self.app_role_secret.clone(),
        }
    }

    fn identity_service(&self) -> anyhow::Result<IdentityService> {
        let api = Arc::new(HttpBackend::new(&self.backend_addr)?);
        Ok(IdentityService::new(
            api,
            self.auth_settings(),
            warden::DEFAULT_PKI_MOUNT,
            warden::DEFAULT_SIGNING_ROLE,
        ))
    }
}

/// Issue mode arguments
#[derive(Parser, Debug)]
struct IssueArgs {
    #[command(flatten)]
    auth: AuthedArgs,

    /// Subject name (common name / SAN) of the certificate
    #[arg(long)]
    sans: String,

    /// Validity of the certificate in hours
    #[arg(long, default_value_t = 24)]
    ttl_hours: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Issue(args)) => run_issue(args).await,
        Some(Commands::Ca(args)) => run_ca(args).await,
        Some(Commands::Crl(args)) => run_crl(args).await,
        Some(Commands::Run(args)) => run_controller(args).await,
        // No subcommand: run the controller with defaults and environment
        None => run_controller(RunArgs::parse_from::<_, &str>(["warden"])).await,
    }
}

/// Run the controller until interrupted
async fn run_controller(args: RunArgs) -> anyhow::Result<()> {
    tracing::info!(backend = %args.backend_addr, "warden controller starting");

    let config = Config {
        external_url: args
            .external_url
            .clone()
            .unwrap_or_else(|| args.backend_addr.clone()),
        backend_addr: args.backend_addr,
        base_dns: args.base_dns,
        organization: args.organization,
        secrets_dir: args.secrets_dir,
        tick_interval: Duration::from_secs(args.tick_secs),
        token_period: Duration::from_secs(args.token_period_secs),
        status_port: args.status_port,
        ..Default::default()
    };

    let api = Arc::new(HttpBackend::new(&config.backend_addr)?);
    let (controller, ready) = Controller::new(config.clone(), api).await;
    let status = controller.status_handle();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let controller_task = tokio::spawn(controller.run(shutdown_rx));

    let server_task = tokio::spawn(server::serve(status, config.status_port));

    // Log the bootstrap outcome without blocking shutdown handling
    tokio::spawn(async move {
        match ready.await {
            Ok(_) => tracing::info!("backend ready; operational token issued"),
            Err(_) => tracing::info!("controller stopped before completing bootstrap"),
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received; shutting down");
    let _ = shutdown_tx.send(());
    controller_task.await?;
    server_task.abort();

    Ok(())
}

/// Issue one certificate and print the PEMs
async fn run_issue(args: IssueArgs) -> anyhow::Result<()> {
    let service = args.auth.identity_service()?;
    let (certificate, private_key) = service
        .issue_certificate(&args.sans, args.ttl_hours)
        .await?;
    print!("{}", certificate);
    if !certificate.ends_with('\n') {
        println!();
    }
    print!("{}", private_key);
    if !private_key.ends_with('\n') {
        println!();
    }
    Ok(())
}

/// Print the CA certificate
async fn run_ca(args: AuthedArgs) -> anyhow::Result<()> {
    let service = args.identity_service()?;
    println!("{}", service.ca_certificate().await?.trim_end());
    Ok(())
}

/// Print the current CRL
async fn run_crl(args: AuthedArgs) -> anyhow::Result<()> {
    let service = args.identity_service()?;
    println!("{}", service.crl().await?.trim_end());
    Ok(())
}
