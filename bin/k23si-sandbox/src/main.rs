//! A self-contained demo of the K23SI client facade.
//!
//! There is no real placement oracle or partition server in this
//! workspace's scope (spec.md section 1 treats both as opaque
//! collaborators), so this binary wires the facade to the same in-memory
//! fakes the test suite drives: one oracle answering `GetPartitionMap` /
//! `CreateCollection` / `GetTimestampBatch`, and one partition answering
//! `K23SI_READ` / `K23SI_WRITE` / `K23SI_TXN_HEARTBEAT` / `K23SI_TXN_END`.
//! Matches `turn_server`'s `main.rs` shape: global allocator, `Config::load`,
//! `simple_logger::init_with_level`, then hand off to the library.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod fake_cluster;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use k23si_sdk::config::ClientConfig;
use k23si_sdk::K23siClient;
use k23si_wire::msg::{Key, Priority};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = ClientConfig::load()?;
    simple_logger::init_with_level(config.log.level.as_level())?;

    let cluster = fake_cluster::FakeCluster::spin_up(Duration::from_secs(10));
    config.cpo = cluster.oracle_url().to_string();

    let client = K23siClient::new(config)?;
    client.dispatcher().register_channel(cluster.oracle_channel())?;
    client.dispatcher().register_channel(cluster.partition_channel())?;

    client.create_collection("orders").await?;
    log::info!("collection \"orders\" created");

    let txn = client.begin_transaction(Priority::Medium).await?;
    txn.write("orders", Key::from("order-1"), Bytes::from_static(b"first"), false).await?;
    txn.write("orders", Key::from("order-2"), Bytes::from_static(b"second"), false).await?;
    let value = txn.read("orders", Key::from("order-1")).await?;
    log::info!("read back order-1 = {:?}", value.map(|v| String::from_utf8_lossy(&v).into_owned()));
    txn.end(true).await?;

    let snapshot = client.counters();
    log::info!(
        "counters: total_txns={} successful_txns={} read_ops={} write_ops={} heartbeats={}",
        snapshot.total_txns,
        snapshot.successful_txns,
        snapshot.read_ops,
        snapshot.write_ops,
        snapshot.heartbeats,
    );

    client.shutdown().await;
    Ok(())
}
