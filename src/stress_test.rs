use async_stream::stream;
use elf_sdk::channel::{create_network, MemoryRelay};
use elf_sdk::prelude::*;
use futures::stream::Stream;
use futures::stream::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Statistics collected during stress testing
#[derive(Clone, Debug)]
pub struct StressTestStats {
    pub num_nodes: usize,
    pub writes_per_node: usize,
    pub total_deliveries: usize,
    pub total_time: Duration,
    pub avg_pump_time: Duration,
    pub writes_per_second: f64,
    pub converged: bool,
}

impl StressTestStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Stress Test Statistics                         ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Number of Nodes:           {:>38} ║", self.num_nodes);
        println!("║  Writes per Node:           {:>38} ║", self.writes_per_node);
        println!("║  Messages Delivered:        {:>38} ║", self.total_deliveries);
        println!("║  Total Time:                {:>39}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Pump Time:         {:>36}µs ║", format!("{:.2}", self.avg_pump_time.as_micros()));
        println!("║  Writes/Second:             {:>38.0} ║", self.writes_per_second);
        println!("║  Converged:                 {:>38} ║", self.converged);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// Yields which node writes next.
fn writer_generator(num_nodes: usize, num_writes: usize) -> impl Stream<Item = usize> {
    stream! {
        let mut rng = StdRng::from_entropy();
        for _ in 0..num_writes {
            yield rng.gen_range(0..num_nodes);
        }
    }
}

/// Build a network where every node draws `table` into one element and has
/// finished the handshake.
fn setup_nodes(num_nodes: usize, table: &str) -> (MemoryRelay, Vec<Arc<Elves>>) {
    let (relay, channels) = create_network(num_nodes);
    let nodes: Vec<Arc<Elves>> = channels
        .into_iter()
        .map(|channel| Elves::new(ElvesConfig::default(), Arc::new(channel)))
        .collect();

    for node in &nodes {
        let drawn = node
            .table(table, json!({}))
            .and_then(|t| t.draw(|_, state| Some(state.to_string()), Lifecycle::new()));
        if let Err(e) = drawn {
            eprintln!("  setup failed on {}: {}", node.node_id(), e);
        }
        node.mount(Element::new(table));
        node.pump();
    }
    (relay, nodes)
}

/// Pump one node, recording how long it took.
fn pump_node(node: &Elves, pump_times: &mut Vec<Duration>, deliveries: &mut usize) {
    let start = Instant::now();
    let handled = node.pump();
    if handled > 0 {
        pump_times.push(start.elapsed());
        *deliveries += handled;
    }
}

/// Pump every node until no messages remain in flight.
fn drain_all(nodes: &[Arc<Elves>], pump_times: &mut Vec<Duration>, deliveries: &mut usize) {
    loop {
        let before = *deliveries;
        for node in nodes {
            pump_node(node, pump_times, deliveries);
        }
        if *deliveries == before {
            break;
        }
    }
}

fn finish(
    num_nodes: usize,
    writes_per_node: usize,
    start: Instant,
    pump_times: &[Duration],
    total_deliveries: usize,
    converged: bool,
) -> StressTestStats {
    let total_time = start.elapsed();
    let avg_pump_time = if !pump_times.is_empty() {
        pump_times.iter().sum::<Duration>() / pump_times.len() as u32
    } else {
        Duration::ZERO
    };
    let writes_per_second = (num_nodes * writes_per_node) as f64 / total_time.as_secs_f64();

    StressTestStats {
        num_nodes,
        writes_per_node,
        total_deliveries,
        total_time,
        avg_pump_time,
        writes_per_second,
        converged,
    }
}

/// Every node increments a shared counter; deliveries interleave randomly.
pub async fn stress_test_counter(num_nodes: usize, writes_per_node: usize) -> StressTestStats {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Counter Stress Test (increment)                     ║");
    println!("║  Nodes: {} | Writes/Node: {} ║", num_nodes, writes_per_node);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let (relay, nodes) = setup_nodes(num_nodes, "stress-counter");
    let total_writes = num_nodes * writes_per_node;

    println!("\n[Phase 1/2] Writing with random delivery...");

    let mut rng = StdRng::from_entropy();
    let mut pump_times = vec![];
    let mut deliveries = 0;
    let mut writers = Box::pin(writer_generator(num_nodes, total_writes));
    let mut written = 0;

    while let Some(writer) = writers.next().await {
        if let Err(e) = nodes[writer].teach_with(
            "stress-counter",
            json!({"hits": 1}),
            Nuance::named("increment"),
        ) {
            eprintln!("  write failed: {}", e);
        }
        written += 1;

        if rng.gen_bool(0.5) {
            let reader = rng.gen_range(0..num_nodes);
            pump_node(&nodes[reader], &mut pump_times, &mut deliveries);
        }
        if written % 100 == 0 {
            tokio::task::yield_now().await;
        }
        if written % 1000 == 0 {
            println!("  Writes completed: {}/{}", written, total_writes);
        }
    }

    println!("[Phase 1/2] ✓ Completed");
    println!("[Phase 2/2] Draining in-flight messages...");

    drain_all(&nodes, &mut pump_times, &mut deliveries);
    let expected = json!({"hits": total_writes});
    let converged = nodes.iter().all(|n| n.learn("stress-counter") == expected)
        && relay.cached("stress-counter") == Some(expected);

    println!("[Phase 2/2] ✓ Completed");
    finish(num_nodes, writes_per_node, start, &pump_times, deliveries, converged)
}

/// Every node overlays its own field and races on a shared maximum.
pub async fn stress_test_mixed(num_nodes: usize, writes_per_node: usize) -> StressTestStats {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Mixed Strategy Stress Test (overlay + max)          ║");
    println!("║  Nodes: {} | Writes/Node: {} ║", num_nodes, writes_per_node);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let (_relay, nodes) = setup_nodes(num_nodes, "stress-board");
    let total_writes = num_nodes * writes_per_node;

    println!("\n[Phase 1/2] Writing with random delivery...");

    let mut rng = StdRng::from_entropy();
    let mut pump_times = vec![];
    let mut deliveries = 0;
    let mut peak = 0u64;
    let mut writes = vec![0u64; num_nodes];
    let mut writers = Box::pin(writer_generator(num_nodes, total_writes));

    while let Some(writer) = writers.next().await {
        writes[writer] += 1;
        let field = format!("node_{}", writer);
        let result = if rng.gen_bool(0.5) {
            let mut own = Map::new();
            own.insert(field, json!(writes[writer]));
            nodes[writer].teach("stress-board", Value::Object(own))
        } else {
            let score: u64 = rng.gen_range(0..1_000_000);
            peak = peak.max(score);
            nodes[writer].teach_with("stress-board", json!({"peak": score}), Nuance::named("max"))
        };
        if let Err(e) = result {
            eprintln!("  write failed: {}", e);
        }

        if rng.gen_bool(0.3) {
            let reader = rng.gen_range(0..num_nodes);
            pump_node(&nodes[reader], &mut pump_times, &mut deliveries);
        }
        if writes.iter().sum::<u64>() % 100 == 0 {
            tokio::task::yield_now().await;
        }
    }

    println!("[Phase 1/2] ✓ Completed");
    println!("[Phase 2/2] Draining in-flight messages...");

    drain_all(&nodes, &mut pump_times, &mut deliveries);
    let reference = nodes[0].learn("stress-board");
    let peak_matches = peak == 0 || reference["peak"] == json!(peak);
    let converged = peak_matches && nodes.iter().all(|n| n.learn("stress-board") == reference);

    println!("[Phase 2/2] ✓ Completed");
    finish(num_nodes, writes_per_node, start, &pump_times, deliveries, converged)
}

/// Counter throughput as the network grows.
pub async fn stress_test_scaling(max_nodes: usize, step_size: usize) {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║      Scaling Analysis - Counter Throughput vs Nodes       ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut current_nodes = step_size;
    while current_nodes <= max_nodes {
        let stats = stress_test_counter(current_nodes, 50).await;
        stats.print();
        current_nodes += step_size;
    }
}
