//! capsyncctl - CLI client for capsyncd
//!
//! Queries the daemon's capability catalog.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod client;
mod render;

use clap::{Args, Parser, Subcommand};
use client::{Client, ClientError, DiscoveryQuery};

/// CLI client for the capsyncd capability sync daemon.
#[derive(Parser)]
#[command(name = "capsyncctl")]
#[command(about = "Inspect capabilities discovered by capsyncd")]
#[command(version)]
struct Cli {
    /// Daemon address (default: http://127.0.0.1:7800)
    #[arg(long, global = true, env = "CAPSYNC_ADDR")]
    addr: Option<String>,

    /// Auth token for daemon API
    #[arg(long, global = true, env = "CAPSYNC_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct DiscoveryArgs {
    /// Namespace to discover in (empty: all namespaces)
    #[arg(long)]
    namespace: Option<String>,

    /// Label selector, e.g. `tier=system,env in (dev,qa)`
    #[arg(short = 'l', long)]
    selector: Option<String>,

    /// Print raw JSON instead of a table
    #[arg(long)]
    json: bool,
}

impl DiscoveryArgs {
    fn query(&self) -> DiscoveryQuery<'_> {
        DiscoveryQuery {
            namespace: self.namespace.as_deref(),
            selector: self.selector.as_deref(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// List discovered capabilities
    List {
        #[command(flatten)]
        discovery: DiscoveryArgs,
    },

    /// Show one capability and its parameters
    Show {
        /// Capability name
        name: String,

        #[command(flatten)]
        discovery: DiscoveryArgs,
    },

    /// Check whether the daemon is serving
    Health,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let addr = cli
        .addr
        .unwrap_or_else(|| "http://127.0.0.1:7800".to_string());
    let client = Client::new(&addr, cli.token.as_deref());

    let result = match cli.command {
        Command::Health => run_health(&client).await,
        Command::List { discovery } => {
            ready_or_exit(&client).await;
            run_list(&client, &discovery).await
        }
        Command::Show { name, discovery } => {
            ready_or_exit(&client).await;
            run_show(&client, &name, &discovery).await
        }
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn ready_or_exit(client: &Client) {
    if let Err(e) = client.wait_for_ready().await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run_health(client: &Client) -> Result<(), ClientError> {
    if client.check_health().await? {
        println!("capsyncd is serving at {}", client.addr());
        Ok(())
    } else {
        Err(ClientError::DaemonNotReady {
            addr: client.addr().to_string(),
            timeout_ms: 0,
        })
    }
}

async fn run_list(client: &Client, args: &DiscoveryArgs) -> Result<(), ClientError> {
    let catalog = client.list_capabilities(&args.query()).await?;
    if args.json {
        print_json(&catalog.capabilities)
    } else {
        render::print_capability_list(&catalog.capabilities, &catalog.skipped);
        Ok(())
    }
}

async fn run_show(client: &Client, name: &str, args: &DiscoveryArgs) -> Result<(), ClientError> {
    let capability = client.get_capability(name, &args.query()).await?;
    if args.json {
        print_json(&capability)
    } else {
        render::print_capability_details(&capability);
        Ok(())
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), ClientError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
    println!("{json}");
    Ok(())
}
