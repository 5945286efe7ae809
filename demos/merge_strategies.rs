//! Merge Strategies Example
//!
//! This example demonstrates the named merge strategies peers agree on,
//! registering an application strategy, and what happens when a peer names
//! a strategy this node does not know.
//!
//! Run with: cargo run --example merge_strategies

use elf_core::{MergeError, MergeFn, Nuance};
use elf_sdk::channel::create_network;
use elf_sdk::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

/// Keep only the last `n` readings under "readings".
fn window_handler(parameters: &[Value]) -> Result<MergeFn, MergeError> {
    let size = match parameters {
        [Value::Number(n)] => n.as_u64().unwrap_or(1) as usize,
        _ => return Err(MergeError::invalid("window", "expected a window size")),
    };
    Ok(Arc::new(move |state: &Value, knowledge: &Value| {
        let mut readings: Vec<Value> = state["readings"].as_array().cloned().unwrap_or_default();
        readings.push(knowledge.clone());
        let skip = readings.len().saturating_sub(size);
        let mut merged = state.as_object().cloned().unwrap_or_default();
        merged.insert("readings".to_string(), Value::Array(readings[skip..].to_vec()));
        Value::Object(merged)
    }))
}

fn main() {
    println!("=== Merge Strategies Example ===\n");

    let (relay, channels) = create_network(2);
    let nodes: Vec<Arc<Elves>> = channels
        .into_iter()
        .map(|channel| Elves::new(ElvesConfig::default(), Arc::new(channel)))
        .collect();

    // Every node must register the same application strategies
    for node in &nodes {
        node.register_merge("window", window_handler);
        let sensor = node.table("sensor", json!({})).expect("table");
        let _draw = sensor.draw(|_, _| None, Lifecycle::new()).expect("draw");
        node.mount(Element::new("sensor"));
        node.pump();
    }

    let (writer, reader) = (&nodes[0], &nodes[1]);
    let writes = [
        (json!({"unit": "C"}), Nuance::named("overlay")),
        (json!({"calibration": {"offset": 1}}), Nuance::named("deep")),
        (json!({"calibration": {"gain": 2}}), Nuance::named("deep")),
        (json!({"peak": 21}), Nuance::named("max")),
        (json!({"peak": 18}), Nuance::named("max")),
        (json!({"samples": 1}), Nuance::named("increment")),
        (json!({"samples": 1}), Nuance::named("increment")),
        (json!(20.5), Nuance::handler("window", vec![json!(2)])),
        (json!(21.0), Nuance::handler("window", vec![json!(2)])),
        (json!(19.5), Nuance::handler("window", vec![json!(2)])),
    ];

    for (knowledge, nuance) in writes {
        println!("teach {:<32} with {:?}", knowledge.to_string(), nuance);
        writer
            .teach_with("sensor", knowledge, nuance)
            .expect("teach");
    }

    reader.pump();
    println!("\nWriter: {}", writer.learn("sensor"));
    println!("Reader: {}", reader.learn("sensor"));

    // A local-only closure merges here but is never uploaded
    writer
        .teach_with("sensor", json!({"debug": true}), Nuance::local(|s, k| {
            let mut merged = s.clone();
            if let (Some(m), Some(k)) = (merged.as_object_mut(), k.as_object()) {
                m.extend(k.clone());
            }
            merged
        }))
        .expect("teach");
    reader.pump();
    println!("\nAfter a local-only write:");
    println!("  writer has debug: {}", writer.learn("sensor")["debug"]);
    println!("  reader has debug: {}", reader.learn("sensor")["debug"]);

    // Unknown strategies are rejected locally and skipped remotely
    match writer.teach_with("sensor", json!({}), Nuance::named("eval")) {
        Ok(_) => println!("\nunexpected: 'eval' resolved"),
        Err(e) => println!("\nRejected locally: {}", e),
    }

    println!("\nRelay consensus: {:?}", relay.cached("sensor"));
    println!("\n=== Example Complete ===");
}
