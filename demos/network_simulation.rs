//! Network Simulation Example
//!
//! This example demonstrates several nodes sharing one relay, each running
//! its sync loop on a tokio task, and a node joining after the others have
//! already converged.
//!
//! Run with: cargo run --example network_simulation

use elf_sdk::channel::{create_network, STATE_UPLOAD};
use elf_sdk::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn open_votes(elves: &Arc<Elves>) {
    let votes = elves.table("poll-votes", json!({})).expect("table");
    let _draw = votes
        .draw(|e, state| Some(format!("{}: {}", e.id(), state)), Lifecycle::new())
        .expect("draw");
    elves.mount(Element::new("poll-votes"));
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
        .with_target(false)
        .init();

    println!("=== Network Simulation Example ===\n");

    // Create 4 nodes on one relay
    let (relay, channels) = create_network(4);
    let nodes: Vec<Arc<Elves>> = channels
        .into_iter()
        .map(|channel| Elves::new(ElvesConfig::default(), Arc::new(channel)))
        .collect();

    for node in &nodes {
        open_votes(node);
        node.spawn_sync().expect("sync loop");
        info!(node = %node.node_id(), "node ready");
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("Each node votes...");
    let choices = ["rust", "rust", "zig", "rust"];
    for (node, choice) in nodes.iter().zip(choices) {
        let mut ballot = serde_json::Map::new();
        ballot.insert(choice.to_string(), json!(1));
        node.teach_with("poll-votes", ballot.into(), Nuance::named("increment"))
            .expect("vote");
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    for node in &nodes {
        println!("  {} sees {}", node.node_id(), node.learn("poll-votes"));
    }
    println!("\nUploads routed by the relay: {}", relay.emitted(STATE_UPLOAD).len());

    // A late joiner links and receives the relay's cached tally
    println!("\nA fifth node joins late...");
    let channel = relay.channel("late");
    relay.connect("late");
    let late = Elves::new(ElvesConfig::default(), Arc::new(channel));
    open_votes(&late);
    late.pump();
    println!("  late node sees {}", late.learn("poll-votes"));

    println!("\n=== Example Complete ===");
}
