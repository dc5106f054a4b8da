use std::sync::Arc;
use std::time::Duration;

use log::LevelFilter;
use rotunda_chord::server::{background_tasks, join_ring};
use rotunda_chord::NodeService;
use rotunda_rpc::{ChordServer, RpcClient};
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

mod cli;
use clap::Parser;
use cli::Cli;

const MAX_JOIN_RETRIES: u32 = 5;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.log_level.into());

    if let Err(message) = run(cli).await {
        log::error!("{}", message);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let listener = ChordServer::<RpcClient>::bind(cli.listen)
        .await
        .map_err(|err| format!("Failed to bind {}: {}", cli.listen, err))?;
    let addr = listener.local_addr().map_err(|err| err.to_string())?;
    println!("Listening on: {}", addr);

    let service = Arc::new(NodeService::<RpcClient>::new(addr));
    log::info!("Node id: {}", service.id().to_hex());
    service.start().map_err(|report| format!("{:?}", report))?;

    let server = ChordServer::new(service.clone());
    let server_task = tokio::spawn(server.serve(listener));

    match cli.ring {
        Some(ring) => join_ring(service.clone(), ring, MAX_JOIN_RETRIES)
            .await
            .map_err(|report| format!("{:?}", report))?,
        None => service.create().map_err(|report| format!("{:?}", report))?,
    }

    background_tasks(service.clone());
    spawn_metrics_logger(
        service.clone(),
        Duration::from_secs(cli.metrics_interval.max(1)),
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| err.to_string())?;
    log::info!("Received shutdown signal, stopping");
    service.stop();
    let _ = server_task.await;

    log::info!("Final stats: {}", service.metrics().snapshot());
    Ok(())
}

fn spawn_metrics_logger(service: Arc<NodeService<RpcClient>>, every: Duration) {
    let mut shutdown = service.subscribe_shutdown();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The zeroth tick fires immediately; skip it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => log::info!("Stats: {}", service.metrics().snapshot()),
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }
    });
}

fn setup_logging(level: LevelFilter) {
    CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )])
    .unwrap();

    log::info!("Logging started");
}
