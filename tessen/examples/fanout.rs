//! Coalesced Fan-Out Example
//!
//! Two nodes, one delegate pool, a handful of queue processes on the remote
//! node. A single `invoke` fans a synchronous message out to all of them,
//! yet the transport spy shows exactly one message crossing to the peer.
//!
//! Run with:
//!
//! ```sh
//! cargo run --example fanout --features test-harness
//! ```

use tessen::{testing::Cluster, Config, Delivery, Invoker, Operation, Transport, WorkerPool};

/// Messages understood by the toy queue processes.
#[derive(Clone, Debug)]
enum QueueMessage {
    Confirm(u64),
    Confirmed { queue: u64, seq: u64 },
}

#[tokio::main]
async fn main() -> tessen::Result {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cluster = Cluster::<QueueMessage>::new();
    let here = cluster.add_node("here");
    let there = cluster.add_node("there");
    let pool = WorkerPool::start(&cluster, &there, &Config::default().with_pool_size(4))?;

    // Five queue processes on the remote node, each confirming calls with
    // its own id.
    let mut queues = Vec::new();
    for queue in 0..5u64 {
        let (pid, mut inbox) = cluster.spawn(&there);
        tokio::spawn(async move {
            while let Some(delivery) = inbox.recv().await {
                if let Delivery::Call(QueueMessage::Confirm(seq), reply) = delivery {
                    let _ = reply.send(QueueMessage::Confirmed { queue, seq });
                }
            }
        });
        queues.push(pid);
    }

    let (caller, _inbox) = cluster.spawn(&here);
    let invoker = Invoker::new(caller, cluster.clone());

    let (confirmed, failed) = invoker
        .invoke(queues, Operation::send_call(QueueMessage::Confirm(42)))
        .await;

    for (pid, reply) in &confirmed {
        println!("{pid} replied {reply:?}");
    }
    println!(
        "{} confirmations, {} failures, {} message(s) on the wire",
        confirmed.len(),
        failed.len(),
        cluster.spy().sent_count()
    );

    pool.shutdown().await
}
