//! naming-route - Route Requests Against Fixture Data
//!
//! Loads a JSON fixture (published rules and instance pools) into the in-memory
//! discovery backend and runs one request through the naming layer, printing
//! the resulting nodes as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Filter the callee pool for an unidentified caller
//! naming-route --fixture pools.json route callee
//!
//! # Environment transfer from caller "a" to environments b then c
//! naming-route --fixture pools.json route callee \
//!     --source-service caller --source-env a --env-transfer b,c --all-nodes
//!
//! # One-shot pick through the picker
//! naming-route --fixture pools.json pick callee --lb polaris_hash --hash-key user-7
//!
//! # Verbose logging
//! RUST_LOG=debug naming-route --fixture pools.json route callee
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{debug, info};

use naming_core::discovery::{MemoryBackend, ServiceIdentity};
use naming_core::{load_config_from_path, ConfigOverrides, Naming, NamingConfig, Node, RouteOptions};

/// Route a request through the naming layer using fixture data
#[derive(Parser, Debug)]
#[command(name = "naming-route")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON fixture with `rules` and `pools`
    #[arg(short = 'f', long, env = "NAMING_FIXTURE", value_name = "FILE")]
    fixture: PathBuf,

    /// Configuration file path
    #[arg(short = 'c', long, env = "NAMING_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Disable service routing
    #[arg(long)]
    no_service_router: bool,

    /// Add the canary stage
    #[arg(long)]
    canary: bool,

    /// Client timeouts shorter than this many milliseconds are not failures
    #[arg(long, value_name = "MS")]
    report_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "NAMING_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Filter the called service's pool
    Route {
        #[command(flatten)]
        request: RequestArgs,

        /// Return one node per surviving instance
        #[arg(long)]
        all_nodes: bool,
    },
    /// Pick a single node through the picker
    Pick {
        #[command(flatten)]
        request: RequestArgs,

        /// Framework balancer name (polaris_wr, polaris_hash, ...)
        #[arg(long, value_name = "NAME")]
        lb: Option<String>,

        /// Hash key for hashing balancers
        #[arg(long, value_name = "KEY")]
        hash_key: Option<String>,
    },
}

#[derive(ClapArgs, Debug)]
struct RequestArgs {
    /// Called service
    service: String,

    /// Namespace of the called service
    #[arg(short = 'n', long, default_value = "Production")]
    namespace: String,

    /// Calling service
    #[arg(long, value_name = "NAME")]
    source_service: Option<String>,

    /// Namespace of the calling service, defaults to --namespace
    #[arg(long, value_name = "NAMESPACE")]
    source_namespace: Option<String>,

    /// Environment of the caller
    #[arg(long, value_name = "ENV")]
    source_env: Option<String>,

    /// Required environment of the callee
    #[arg(long, value_name = "ENV")]
    dest_env: Option<String>,

    /// Comma separated environment-transfer list
    #[arg(long, value_name = "LIST")]
    env_transfer: Option<String>,

    /// Environment selector key
    #[arg(long, value_name = "KEY")]
    env_key: Option<String>,

    /// Canary label carried by the request
    #[arg(long, value_name = "LABEL")]
    canary_label: Option<String>,

    /// Caller set name
    #[arg(long, value_name = "SET")]
    source_set: Option<String>,

    /// Callee set name
    #[arg(long, value_name = "SET")]
    dest_set: Option<String>,
}

impl RequestArgs {
    fn options(&self) -> RouteOptions {
        let mut opts = RouteOptions::new(self.namespace.as_str());
        if let Some(service) = &self.source_service {
            let namespace = self.source_namespace.as_deref().unwrap_or(&self.namespace);
            opts = opts.with_source(namespace, service.as_str());
        }
        if let Some(env) = &self.source_env {
            opts = opts.with_source_env(env.as_str());
        }
        if let Some(env) = &self.dest_env {
            opts = opts.with_destination_env(env.as_str());
        }
        if let Some(list) = &self.env_transfer {
            opts = opts.with_env_transfer(list.as_str());
        }
        if let Some(key) = &self.env_key {
            opts = opts.with_env_key(key.as_str());
        }
        if let Some(label) = &self.canary_label {
            let metadata = naming_core::CallMetadata::new().with_canary(label.as_str());
            opts = opts.with_call_metadata(metadata);
        }
        if self.source_set.is_some() || self.dest_set.is_some() {
            opts = opts.with_set_names(
                self.source_set.clone().unwrap_or_default(),
                self.dest_set.clone().unwrap_or_default(),
            );
        }
        opts
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("naming_route={level},naming_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load_backend(path: &Path) -> Result<MemoryBackend> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture: {}", path.display()))?;
    MemoryBackend::from_json(&json)
        .with_context(|| format!("Failed to parse fixture: {}", path.display()))
}

fn resolve_config(args: &Args) -> Result<NamingConfig> {
    let path = args.config.clone().or_else(naming_core::default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if args.no_service_router {
        overrides = overrides.with_service_router(false);
    }
    if args.canary {
        overrides = overrides.with_canary(true);
    }
    if let Some(ms) = args.report_timeout_ms {
        overrides = overrides.with_report_timeout(Duration::from_millis(ms));
    }
    if let Command::Route { all_nodes: true, .. } = &args.command {
        overrides = overrides.with_return_all_nodes(true);
    }
    overrides.apply(&mut config);
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = resolve_config(&args)?;
    debug!(source = %config.source(), "configuration resolved");

    let backend = Arc::new(load_backend(&args.fixture)?);
    let naming = Naming::builder()
        .with_config(config)
        .with_backend(backend.clone())
        .build()?;

    let output = match &args.command {
        Command::Route { request, .. } => {
            let identity =
                ServiceIdentity::new(request.namespace.as_str(), request.service.as_str());
            let pool = backend
                .pool(&identity)
                .with_context(|| format!("Fixture has no pool for {identity}"))?;
            let result = naming
                .route(&request.service, &[Node::from_pool(pool)], &request.options())
                .await?;
            info!(service = %request.service, nodes = result.nodes().len(), "route complete");
            serde_json::to_string_pretty(result.nodes())?
        }
        Command::Pick {
            request,
            lb,
            hash_key,
        } => {
            let mut opts = request.options();
            if let Some(lb) = lb {
                opts = opts.with_load_balance_type(lb.as_str());
            }
            if let Some(key) = hash_key {
                opts = opts.with_hash_key(key.as_str());
            }
            let node = naming.selector().select(&request.service, &opts).await?;
            info!(service = %request.service, address = %node.address, "pick complete");
            serde_json::to_string_pretty(&node)?
        }
    };

    println!("{output}");
    Ok(())
}
