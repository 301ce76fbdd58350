use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use sshgrid_core::SshgridConfig;
use sshgrid_ops::Context;
use tracing::info;

mod commands;

#[derive(Parser)]
#[command(
    name = "sshgrid",
    about = "sshgrid — provision and repair clusters of SSH-reachable machines",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to sshgrid.toml (default: ./sshgrid.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// State store file (default: [store].path from the config)
    #[arg(long, global = true)]
    state: Option<PathBuf>,
    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a resource
    Create {
        #[command(subcommand)]
        resource: CreateResource,
    },
    /// Delete a resource
    Delete {
        #[command(subcommand)]
        resource: DeleteResource,
    },
    /// Show resources
    Get {
        #[command(subcommand)]
        resource: GetResource,
    },
    /// Repair a resource
    Recover {
        #[command(subcommand)]
        resource: RecoverResource,
    },
}

#[derive(Subcommand)]
enum CreateResource {
    /// Create the cluster and its etcd CA secret
    Cluster {
        /// Cluster name (default: [defaults].cluster_name)
        #[arg(long)]
        name: Option<String>,
        /// PEM file with the etcd CA certificate
        #[arg(long)]
        etcd_ca_cert: PathBuf,
        /// PEM file with the etcd CA private key
        #[arg(long)]
        etcd_ca_key: PathBuf,
        /// Floating IP for the API server
        #[arg(long)]
        vip: Option<String>,
        #[arg(long, default_value_t = 6443)]
        api_server_port: u16,
    },
    /// Store the SSH credential used to reach every machine
    Credential {
        /// Remote login user
        #[arg(long)]
        user: String,
        /// Private key file
        #[arg(long)]
        private_key: PathBuf,
    },
    /// Add a machine to the cluster.
    ///
    /// The machine is bootstrapped as a master (etcd + control plane) or a
    /// node (worker joined with a fresh bootstrap token).
    Machine {
        /// Address to reach the machine at; also its name
        #[arg(long)]
        ip: String,
        /// SSH port (default: [defaults].ssh_port)
        #[arg(long)]
        port: Option<u16>,
        /// master or node
        #[arg(long)]
        role: String,
        /// Host public key files, comma-separated. Without them the host
        /// identity is not verified.
        #[arg(long, value_delimiter = ',')]
        public_keys: Vec<PathBuf>,
        /// Interface the floating IP binds to on masters
        #[arg(long, default_value = "eth0")]
        iface: String,
    },
}

#[derive(Subcommand)]
enum DeleteResource {
    /// Drain, reset and remove a machine
    Machine {
        #[arg(long)]
        ip: String,
        /// e.g. 90s, 5m; 0 waits forever (default: [defaults].drain_timeout)
        #[arg(long)]
        drain_timeout: Option<String>,
        /// Seconds each pod gets to terminate; negative uses the pod's own
        #[arg(long, allow_negative_numbers = true)]
        drain_grace_period: Option<i64>,
    },
}

#[derive(Subcommand)]
enum GetResource {
    /// Show one machine or all of them
    Machine {
        #[arg(long)]
        ip: Option<String>,
        /// yaml or json (default: table)
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },
}

#[derive(Subcommand)]
enum RecoverResource {
    /// Rebuild etcd on every master from one snapshot
    Etcd {
        /// Local etcd snapshot file
        #[arg(long)]
        snapshot: PathBuf,
    },
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("sshgrid=info".parse()?);
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
    Ok(())
}

fn context(cli_state: Option<PathBuf>, config: &SshgridConfig) -> anyhow::Result<Context> {
    let state_path = cli_state.unwrap_or_else(|| config.store.path.clone());
    if let Some(dir) = state_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("unable to create state directory {}", dir.display()))?;
    }
    info!(state = %state_path.display(), "opening state store");
    Context::init(config, &state_path)
        .with_context(|| format!("unable to open state store {}", state_path.display()))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = SshgridConfig::load(cli.config.as_deref()).context("unable to load configuration")?;
    let ctx = context(cli.state, &config)?;

    match cli.command {
        Commands::Create { resource } => match resource {
            CreateResource::Cluster {
                name,
                etcd_ca_cert,
                etcd_ca_key,
                vip,
                api_server_port,
            } => commands::cluster::create(
                &ctx,
                commands::cluster::CreateClusterArgs {
                    name,
                    etcd_ca_cert,
                    etcd_ca_key,
                    vip,
                    api_server_port,
                },
            ),
            CreateResource::Credential { user, private_key } => {
                commands::credential::create(&ctx, &user, &private_key)
            }
            CreateResource::Machine {
                ip,
                port,
                role,
                public_keys,
                iface,
            } => commands::machine::create(&ctx, &ip, port, &role, &public_keys, &iface),
        },
        Commands::Delete { resource } => match resource {
            DeleteResource::Machine {
                ip,
                drain_timeout,
                drain_grace_period,
            } => commands::machine::delete(&ctx, &ip, drain_timeout.as_deref(), drain_grace_period),
        },
        Commands::Get { resource } => match resource {
            GetResource::Machine { ip, output } => commands::machine::get(&ctx, ip.as_deref(), output),
        },
        Commands::Recover { resource } => match resource {
            RecoverResource::Etcd { snapshot } => commands::recover::etcd(&ctx, &snapshot),
        },
    }
}

/// Single-line fatal diagnostic: every context layer and source, in order.
fn diagnostic(err: &anyhow::Error) -> String {
    format!("error: {err:#}")
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(cli.log_format) {
        eprintln!("{}", diagnostic(&err));
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", diagnostic(&err));
            ExitCode::FAILURE
        }
    }
}
