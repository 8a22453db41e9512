//! Multiplexed Monitor Example
//!
//! Three observers on one node watch the same process on another node.
//! The delegate there holds a single native subscription on their behalf;
//! when the watched process dies, all three observers are notified.
//!
//! Run with:
//!
//! ```sh
//! cargo run --example watchdog --features test-harness
//! ```

use tessen::{testing::Cluster, Config, Delivery, ExitReason, Invoker, Transport, WorkerPool};

#[derive(Clone, Debug)]
struct Heartbeat;

#[tokio::main]
async fn main() -> tessen::Result {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cluster = Cluster::<Heartbeat>::new();
    let here = cluster.add_node("here");
    let there = cluster.add_node("there");
    let pool = WorkerPool::start(&cluster, &there, &Config::default().with_pool_size(4))?;

    let (watched, _watched_inbox) = cluster.spawn(&there);

    let mut observers = Vec::new();
    for _ in 0..3 {
        let (pid, inbox) = cluster.spawn(&here);
        let invoker = Invoker::new(pid, cluster.clone());
        let monitor = invoker.monitor(&watched);
        observers.push((invoker, inbox, monitor));
    }

    // Wait for the delegate to process the subscriptions, then show that
    // three observers cost one native subscription.
    tessen::testing::eventually(|| cluster.native_watcher_count(&watched) == 1).await;
    println!(
        "3 observers, {} native subscription(s) on {watched}",
        cluster.native_watcher_count(&watched)
    );

    cluster.kill(&watched, ExitReason::other("disk gone"));

    for (index, (_, inbox, _)) in observers.iter_mut().enumerate() {
        if let Some(Delivery::Down(notice)) = inbox.recv().await {
            println!(
                "observer {index} saw {} go down: {}",
                notice.watched, notice.reason
            );
        }
    }

    pool.shutdown().await
}
