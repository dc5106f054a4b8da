use std::{net::SocketAddr, sync::Arc, time::Duration};

use error_stack::Result;
use tokio::time::MissedTickBehavior;

use crate::error::ServiceError;
use crate::{Client, Node, NodeService};

pub const STABILIZE_INTERVAL: Duration = Duration::from_secs(1);
pub const FIX_FINGERS_INTERVAL: Duration = Duration::from_secs(1);
pub const CHECK_PREDECESSOR_INTERVAL: Duration = Duration::from_secs(2);

/// Fix-fingers runs shifted half a period against stabilize so the two
/// never mutate the table back to back.
const FIX_FINGERS_OFFSET: Duration = Duration::from_millis(500);

/// Join an existing ring through `ring`, retrying transient failures.
///
/// An unreachable bootstrap after `max_retries` attempts is fatal, as are
/// lifecycle violations and id collisions, which no retry can fix.
pub async fn join_ring<T: Client + Clone + Sync + Send + 'static>(
    node_service: Arc<NodeService<T>>,
    ring: SocketAddr,
    max_retries: u32,
) -> Result<(), ServiceError> {
    // TODO: make this configurable
    const WAIT_BETWEEN_RETRIES: Duration = Duration::from_secs(3);
    let mut attempt = 0;
    loop {
        attempt += 1;
        log::info!("{} attempt to join ring: {:?}", attempt, ring);

        match node_service.join(Node::new(ring)).await {
            Ok(()) => {
                log::info!("Joined ring: {:?}", ring);
                return Ok(());
            }
            Err(report) => {
                let fatal = matches!(
                    report.current_context(),
                    ServiceError::InvalidLifecycle { .. } | ServiceError::IdCollision
                );
                if fatal {
                    return Err(report);
                }
                if attempt >= max_retries {
                    log::error!("Failed to join ring: {:?}", ring);
                    return Err(report.change_context(ServiceError::JoinFailed));
                }
                log::debug!("Join attempt {} failed: {:?}", attempt, report);
            }
        }

        tokio::time::sleep(WAIT_BETWEEN_RETRIES).await;
    }
}

/// Spawn the three maintenance tasks: stabilize, fix-fingers and
/// check-predecessor. They share the node state through its internal lock
/// and all exit at their next wake once the node is stopped.
pub fn background_tasks<T: Client + Clone + Sync + Send + 'static>(
    node_service: Arc<NodeService<T>>,
) {
    let service = node_service.clone();
    let mut shutdown = service.subscribe_shutdown();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STABILIZE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = service.stabilize().await {
                        log::error!("Stabilize error: {:?}", err);
                    }
                }
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
            }
        }
    });

    let service = node_service.clone();
    let mut shutdown = service.subscribe_shutdown();
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + FIX_FINGERS_OFFSET;
        let mut ticker = tokio::time::interval_at(start, FIX_FINGERS_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => service.fix_fingers().await,
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
            }
        }
    });

    let service = node_service;
    let mut shutdown = service.subscribe_shutdown();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CHECK_PREDECESSOR_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = service.check_predecessor().await {
                        log::error!("Check predecessor error: {:?}", err);
                    }
                }
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
            }
        }
    });
}
