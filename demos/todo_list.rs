//! Shared Todo List Example
//!
//! This example demonstrates drawing one table into several elements,
//! listening for events scoped to the table, and replicating writes that
//! use the `append` merge between two nodes.
//!
//! Run with: cargo run --example todo_list

use elf_sdk::channel::MemoryRelay;
use elf_sdk::prelude::*;
use elf_sdk::{MarkupLog, StyleSheets};
use serde_json::{json, Value};
use std::sync::Arc;

fn render_list(_: &Element, state: &Value) -> Option<String> {
    let items = state["items"].as_array()?;
    let rows: Vec<String> = items
        .iter()
        .map(|item| format!("<li>{}</li>", item.as_str().unwrap_or("?")))
        .collect();
    Some(format!("<ul>{}</ul><button class=\"add\">add</button>", rows.join("")))
}

fn main() {
    println!("=== Shared Todo List Example ===\n");

    let relay = MemoryRelay::new();
    let markup = Arc::new(MarkupLog::new());
    let styles = Arc::new(StyleSheets::new());
    let home = Elves::with_collaborators(
        ElvesConfigBuilder::new().node_id("home").build(),
        Arc::new(relay.channel("home")),
        markup.clone(),
        styles.clone(),
    );
    let phone = Elves::new(
        ElvesConfigBuilder::new().node_id("phone").build(),
        Arc::new(relay.channel("phone")),
    );
    relay.connect("home");
    relay.connect("phone");

    // Both nodes open the same table
    let todo = home.table("todo-list", json!({"items": []})).expect("table");
    let remote = phone.table("todo-list", json!({"items": []})).expect("table");

    todo.style("& ul { list-style: none }\n& .add { float: right }");
    let _draw = todo.draw(render_list, Lifecycle::new()).expect("draw");
    let _remote_draw = remote.draw(render_list, Lifecycle::new()).expect("draw");

    // Clicking "add" inside any todo-list appends an item
    let writer = todo.clone();
    let _click = todo
        .when_within("click", ".add", move |event| {
            let text = event.detail.as_str().unwrap_or("untitled").to_string();
            writer
                .teach_with(json!(text), Nuance::handler("append", vec![json!("items")]))
                .expect("append");
        })
        .expect("when");

    let sidebar = home.mount(Element::new("todo-list").with_id("sidebar"));
    let main_view = home.mount(Element::new("todo-list").with_id("main"));
    phone.mount(Element::new("todo-list").with_id("phone-view"));
    home.pump();
    phone.pump();

    println!("Stylesheet injected for todo-list:");
    for block in styles.for_table("todo-list") {
        println!("{}\n", block);
    }

    println!("Home clicks 'add' twice...");
    for text in ["buy milk", "water plants"] {
        let button = Arc::new(Element::new("button").with_class("add").within(main_view.clone()));
        home.dispatch(Event::new("click", button).with_detail(json!(text)));
    }

    println!("\nBoth home views redraw from the same table:");
    for view in [&sidebar, &main_view] {
        println!("  {}: {}", view.id(), markup.markup(view.id()).unwrap_or_default());
    }

    phone.pump();
    println!("\nPhone after delivering uploads:");
    println!("  {}", remote.learn());

    println!("\nInsights on home:");
    for (key, count) in home.insights() {
        println!("  {:<28} {}", key, count);
    }

    println!("\n=== Example Complete ===");
}
