use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = duna_server::config::Config::parse();

    // JSON logs in production (DUNA_LOG_JSON=true), human-readable otherwise
    let filter = EnvFilter::from_default_env().add_directive("duna_server=info".parse()?);
    if config.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    tracing::info!(
        listen = %config.listen_addr,
        db = %config.db_path,
        rpc = %config.rpc_url,
        "Starting duna-server"
    );
    let server = duna_server::server::Server::new(config);
    server.run().await
}
