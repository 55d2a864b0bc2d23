use anyhow::Context;
use clap::{Parser, Subcommand};
use shardroute::connection::ClientConfig;
use shardroute::transport::{HttpClientCreator, HttpTransport};
use shardroute::web::admin::AdminContext;
use shardroute::web::node::NodeContext;
use shardroute::{Manager, NoopShard, Services};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shardroute", about = "Partition routing and migration daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node-side control server for one shard process.
    Node {
        /// Service this node belongs to.
        #[arg(long)]
        service: String,
        /// Address other nodes reach us at.
        #[arg(long, default_value = "127.0.0.1")]
        address: String,
        #[arg(long, default_value_t = 8010)]
        http_port: u16,
        #[arg(long, default_value_t = 8009)]
        json_port: u16,
        /// Where the installed router table is persisted.
        #[arg(long, default_value = ".")]
        data_dir: PathBuf,
        /// Seed urls to bootstrap the router table from.
        #[arg(long)]
        seed: Vec<String>,
    },
    /// Run the admin/balancer server.
    Admin {
        #[arg(long, default_value_t = 8080)]
        http_port: u16,
        /// Where the authoritative service tables are persisted.
        #[arg(long, default_value = ".")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Command::Node {
            service,
            address,
            http_port,
            json_port,
            data_dir,
            seed,
        } => {
            let my_entry_id = format!("{}:{}", address, json_port);
            let manager = Manager::new(
                Arc::new(NoopShard),
                service,
                &data_dir,
                my_entry_id,
                Arc::new(HttpClientCreator::new(ClientConfig::new())),
            )
            .await?;

            if !seed.is_empty() {
                let transport = HttpTransport::new();
                if let Err(err) = manager.seed(&transport, &seed).await {
                    warn!(error = %err, "seed bootstrap failed, continuing with local table");
                }
            }

            let app = shardroute::web::node::router(NodeContext { manager });
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port))
                .await
                .with_context(|| format!("binding node port {}", http_port))?;
            info!(http_port, "node control server listening");
            axum::serve(listener, app).await?;
        }
        Command::Admin {
            http_port,
            data_dir,
        } => {
            let services = Arc::new(Services::new(&data_dir));
            if let Err(err) = services.load().await {
                warn!(error = %err, "no persisted services loaded, starting empty");
            }

            let app = shardroute::web::admin::router(AdminContext {
                services,
                transport: Arc::new(HttpTransport::new()),
            });
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port))
                .await
                .with_context(|| format!("binding admin port {}", http_port))?;
            info!(http_port, "admin server listening");
            axum::serve(listener, app).await?;
        }
    }
    Ok(())
}
