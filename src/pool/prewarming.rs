//! Connection pool prewarming
//!
//! Opens a pool's minimum connections concurrently at startup so the first
//! clients do not pay for the dial (and database selection).

use tracing::{debug, info, warn};

use super::provider::UpstreamPool;

/// Check out `min_size` connections at once, then return them all idle
pub(crate) async fn prewarm_pool(pool: &UpstreamPool) -> usize {
    let wanted = pool.min_size();
    if wanted == 0 {
        return 0;
    }

    debug!(pool = %pool.name(), connections = wanted, "Prewarming pool");

    let tasks: Vec<_> = (0..wanted)
        .map(|i| {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.checkout()
                    .await
                    .inspect(|conn| {
                        debug!(pool = %pool.name(), conn_id = conn.id(), "Prewarmed connection {}/{}", i + 1, wanted);
                    })
                    .inspect_err(|e| {
                        warn!(pool = %pool.name(), error = %e, "Failed to prewarm connection");
                    })
                    .ok()
            })
        })
        .collect();

    // Hold every connection until all are open so none is reused twice
    let mut connections = Vec::with_capacity(wanted);
    for task in tasks {
        match task.await {
            Ok(Some(conn)) => connections.push(conn),
            Ok(None) => {}
            Err(e) => warn!(pool = %pool.name(), "Prewarming task panicked: {}", e),
        }
    }

    let created = connections.len();
    drop(connections);

    info!(
        pool = %pool.name(),
        "Pool ready: {}/{} connections prewarmed",
        created, wanted
    );
    created
}
