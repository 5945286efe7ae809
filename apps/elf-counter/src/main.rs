//! # Elf Counter
//!
//! A standalone CLI click counter built on the Elves SDK.
//! Every node draws the `click-counter` table into one element and clicks
//! with the `increment` merge, so peers converge by summing each other's
//! clicks while their own echoes are discarded.
//!
//! ## Message flow
//!
//! ```text
//! teach ─▶ store ─▶ redraw
//!   └────▶ stateUpload ─▶ relay ─▶ stateDownload ─▶ every node
//!                                   (own echo dropped, peers merge)
//! ```

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::*;
use elf_sdk::channel::MemoryRelay;
use elf_sdk::prelude::*;
use elf_sdk::{MarkupLog, StyleSheets};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

const TABLE: &str = "click-counter";

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "elf-counter")]
#[command(about = "Replicated click counter over an in-memory relay (Elves SDK)")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Basic demo: two nodes click, pump, and converge
    Demo,
    /// A third node joins late and adopts the relay's cached state
    LateJoin,
    /// An offline element keeps its clicks to itself
    Offline,
    /// Nodes click concurrently on tokio tasks with spawned sync loops
    Live {
        /// Number of nodes
        #[arg(short, long, default_value_t = 4)]
        nodes: usize,
        /// Clicks per node
        #[arg(short, long, default_value_t = 25)]
        clicks: usize,
    },
    /// Interactive REPL for manual experimentation
    Interactive,
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ─── Node: one Elves context attached to the relay ────────────────────────

struct Node {
    name: String,
    elves: Arc<Elves>,
    markup: Arc<MarkupLog>,
    view: Arc<Element>,
}

impl Node {
    /// Connect to the relay, draw the counter and finish the handshake.
    fn join(relay: &MemoryRelay, name: &str, offline: bool) -> elf_sdk::Result<Self> {
        let markup = Arc::new(MarkupLog::new());
        let elves = Elves::with_collaborators(
            ElvesConfigBuilder::new().node_id(name).build(),
            Arc::new(relay.channel(name)),
            markup.clone(),
            Arc::new(StyleSheets::new()),
        );
        relay.connect(name);

        let counter = elves.table(TABLE, json!({"count": 0}))?;
        counter.style("& button { font-weight: bold }");
        let _draw = counter.draw(
            |_, state| Some(format!("<button>clicks: {}</button>", state["count"])),
            Lifecycle::new(),
        )?;

        let element = Element::new(TABLE).with_id(format!("{}-view", name));
        let element = if offline { element.offline() } else { element };
        let view = elves.mount(element);
        elves.pump();

        Ok(Self {
            name: name.to_string(),
            elves,
            markup,
            view,
        })
    }

    fn click(&self, amount: i64) -> elf_sdk::Result<()> {
        self.elves
            .teach_with(TABLE, json!({"count": amount}), Nuance::named("increment"))?;
        Ok(())
    }

    fn pump(&self) -> usize {
        self.elves.pump()
    }

    fn count(&self) -> i64 {
        self.elves.learn(TABLE)["count"].as_i64().unwrap_or(0)
    }

    fn rendered(&self) -> String {
        self.markup
            .markup(self.view.id())
            .unwrap_or_else(|| "(nothing drawn)".to_string())
    }
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn pump_arrow(node: &Node, handled: usize) {
    println!(
        "  {} {} {} {}",
        "relay".bright_magenta(),
        "──pump──▶".bright_cyan(),
        node.name.bright_magenta(),
        format!("{} event(s)", handled).dimmed()
    );
}

fn show_node(node: &Node) {
    let border = "─".repeat(44);
    println!("  ┌{}┐", border);
    println!(
        "  │ {:^42} │",
        format!("Node: {}", node.name).bright_yellow().to_string()
    );
    println!("  ├{}┤", border);
    println!("  │ {:<42} │", format!("state    {}", node.elves.learn(TABLE)));
    println!("  │ {:<42} │", format!("markup   {}", node.rendered()));
    let offline = if node.view.is_offline() { "offline" } else { "online" };
    println!("  │ {:<42} │", format!("element  {} ({})", node.view.id(), offline));
    println!("  └{}┘", border);
}

fn pump_all(nodes: &[&Node]) {
    loop {
        let mut handled = 0;
        for node in nodes {
            let n = node.pump();
            if n > 0 {
                pump_arrow(node, n);
            }
            handled += n;
        }
        if handled == 0 {
            break;
        }
    }
}

fn convergence_check(nodes: &[&Node]) -> bool {
    match nodes.split_first() {
        Some((first, rest)) => rest
            .iter()
            .all(|n| n.elves.learn(TABLE) == first.elves.learn(TABLE)),
        None => true,
    }
}

fn convergence_result(converged: bool) {
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL NODES CONVERGED: tables are identical!"
                .bright_green()
                .bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED: nodes differ!".bright_red().bold()
        );
    }
}

fn show_insights(node: &Node) {
    let insights: BTreeMap<String, u64> = node.elves.insights();
    for (key, count) in insights {
        step(&format!("{:<28} {}", key, count));
    }
}

// ─── Demo ──────────────────────────────────────────────────────────────────

fn run_demo() -> elf_sdk::Result<()> {
    header("DEMO: Replicated Click Counter");

    section("Phase 1: Two nodes join the relay");
    let relay = MemoryRelay::new();
    let alice = Node::join(&relay, "alice", false)?;
    let bob = Node::join(&relay, "bob", false)?;
    step("alice and bob linked click-counter");

    section("Phase 2: Both click before hearing from each other");
    for _ in 0..3 {
        alice.click(1)?;
    }
    step("alice: 3 clicks");
    bob.click(2)?;
    step("bob:   1 click worth 2");
    show_node(&alice);
    show_node(&bob);

    section("Phase 3: Deliver stateDownload events");
    pump_all(&[&alice, &bob]);
    show_node(&alice);
    show_node(&bob);

    convergence_result(convergence_check(&[&alice, &bob]));
    step(&format!(
        "count = {} (alice 3 + bob 2, echoes discarded)",
        alice.count()
    ));

    section("Insights on alice");
    show_insights(&alice);
    Ok(())
}

// ─── Late join ────────────────────────────────────────────────────────────

fn run_late_join() -> elf_sdk::Result<()> {
    header("LATE JOIN: Adopting the Relay's Cached State");

    section("Phase 1: alice and bob click for a while");
    let relay = MemoryRelay::new();
    let alice = Node::join(&relay, "alice", false)?;
    let bob = Node::join(&relay, "bob", false)?;
    for i in 1..=5 {
        alice.click(i)?;
    }
    bob.click(10)?;
    pump_all(&[&alice, &bob]);
    step(&format!("consensus count = {}", alice.count()));
    if let Some(cached) = relay.cached(TABLE) {
        step(&format!("relay cache     = {}", cached));
    }

    section("Phase 2: carol joins and links her fresh table");
    let carol = Node::join(&relay, "carol", false)?;
    show_node(&carol);

    section("Phase 3: carol clicks; everyone converges");
    carol.click(1)?;
    pump_all(&[&alice, &bob, &carol]);
    show_node(&alice);
    show_node(&carol);
    convergence_result(convergence_check(&[&alice, &bob, &carol]));
    Ok(())
}

// ─── Offline ──────────────────────────────────────────────────────────────

fn run_offline() -> elf_sdk::Result<()> {
    header("OFFLINE: An Element that Opts Out of Sync");

    let relay = MemoryRelay::new();
    let alice = Node::join(&relay, "alice", false)?;
    let kiosk = Node::join(&relay, "kiosk", true)?;

    section("Phase 1: kiosk clicks locally");
    kiosk.click(7)?;
    step("kiosk: 7 clicks on an offline=\"true\" element");

    section("Phase 2: alice clicks and uploads");
    alice.click(1)?;
    pump_all(&[&alice, &kiosk]);

    show_node(&alice);
    show_node(&kiosk);
    let isolated = alice.count() == 1 && kiosk.count() == 7;
    if isolated {
        step("kiosk never linked, uploaded, or applied a peer update ✓");
    } else {
        step("kiosk leaked state across the relay ✗");
    }
    Ok(())
}

// ─── Live ─────────────────────────────────────────────────────────────────

async fn run_live(nodes: usize, clicks: usize) -> elf_sdk::Result<()> {
    header("LIVE: Concurrent Clicks with Spawned Sync Loops");

    let relay = MemoryRelay::new();
    let mut members = Vec::with_capacity(nodes);
    for i in 0..nodes {
        members.push(Arc::new(Node::join(&relay, &format!("node-{}", i), false)?));
    }

    let mut loops = Vec::new();
    for node in &members {
        if let Some(handle) = node.elves.spawn_sync() {
            loops.push(handle);
        }
    }
    step(&format!("{} sync loops running", loops.len()));

    let mut clickers = Vec::new();
    for node in &members {
        let node = node.clone();
        clickers.push(tokio::spawn(async move {
            for _ in 0..clicks {
                if let Err(e) = node.click(1) {
                    eprintln!("  {} {}: {}", "!".bright_red(), node.name, e);
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    for clicker in clickers {
        let _ = clicker.await;
    }

    let expected = (nodes * clicks) as i64;
    let converged = tokio::time::timeout(Duration::from_secs(5), async {
        while !members.iter().all(|n| n.count() == expected) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok();

    for node in &members {
        step(&format!("{:<8} count = {}", node.name, node.count()));
    }
    convergence_result(converged);
    step(&format!("expected {} ({} nodes × {} clicks)", expected, nodes, clicks));

    for handle in loops {
        handle.abort();
    }
    Ok(())
}

// ─── Interactive REPL ──────────────────────────────────────────────────────

fn run_interactive() -> elf_sdk::Result<()> {
    header("INTERACTIVE REPL: Elves Click Counter");

    let relay = MemoryRelay::new();
    let mut nodes: BTreeMap<String, Node> = BTreeMap::new();

    println!();
    println!("  {}", "Commands:".bold().underline());
    println!(
        "    {} <name> [offline]           Join a node (optionally offline)",
        "join".bright_cyan()
    );
    println!(
        "    {} <node> [n]                Click n times (default 1)",
        "click".bright_cyan()
    );
    println!(
        "    {} <node> <field> <json>       Overlay one field into the table",
        "set".bright_cyan()
    );
    println!(
        "    {} <node>                     Deliver that node's pending events",
        "pump".bright_cyan()
    );
    println!(
        "    {}                         Deliver everything in flight",
        "pumpall".bright_cyan()
    );
    println!(
        "    {} <node>                     Show a node",
        "show".bright_cyan()
    );
    println!(
        "    {}                            List nodes",
        "list".bright_cyan()
    );
    println!(
        "    {}                           Check convergence",
        "check".bright_cyan()
    );
    println!(
        "    {} <node>                 Operation counters",
        "insights".bright_cyan()
    );
    println!(
        "    {}                            Exit",
        "quit".bright_cyan()
    );
    println!();

    loop {
        print!("{}", "elves> ".bright_cyan().bold());
        if io::stdout().flush().is_err() {
            break;
        }

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() || input.is_empty() {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "join" | "j" => {
                if parts.len() < 2 {
                    println!("  {} Usage: join <name> [offline]", "!".bright_red());
                    continue;
                }
                let name = parts[1];
                if nodes.contains_key(name) {
                    println!("  {} Node '{}' already exists", "!".bright_yellow(), name);
                    continue;
                }
                let offline = parts.get(2) == Some(&"offline");
                let node = Node::join(&relay, name, offline)?;
                step(&format!(
                    "'{}' joined ({}), count = {}",
                    name,
                    if offline { "offline" } else { "online" },
                    node.count()
                ));
                nodes.insert(name.to_string(), node);
            }

            "click" | "c" => {
                if parts.len() < 2 {
                    println!("  {} Usage: click <node> [n]", "!".bright_red());
                    continue;
                }
                let amount: i64 = parts.get(2).and_then(|s| s.parse().ok()).unwrap_or(1);
                match nodes.get(parts[1]) {
                    Some(node) => match node.click(amount) {
                        Ok(()) => step(&format!("{} += {} → {}", parts[1], amount, node.count())),
                        Err(e) => println!("  {} {}", "!".bright_red(), e),
                    },
                    None => println!("  {} Unknown node '{}'", "!".bright_red(), parts[1]),
                }
            }

            "set" => {
                if parts.len() < 4 {
                    println!("  {} Usage: set <node> <field> <json>", "!".bright_red());
                    continue;
                }
                let value: Value = match serde_json::from_str(&parts[3..].join(" ")) {
                    Ok(v) => v,
                    Err(e) => {
                        println!("  {} Bad JSON: {}", "!".bright_red(), e);
                        continue;
                    }
                };
                match nodes.get(parts[1]) {
                    Some(node) => {
                        let mut knowledge = serde_json::Map::new();
                        knowledge.insert(parts[2].to_string(), value);
                        match node.elves.teach(TABLE, Value::Object(knowledge)) {
                            Ok(state) => step(&format!("{} → {}", parts[1], state)),
                            Err(e) => println!("  {} {}", "!".bright_red(), e),
                        }
                    }
                    None => println!("  {} Unknown node '{}'", "!".bright_red(), parts[1]),
                }
            }

            "pump" | "p" => {
                if parts.len() < 2 {
                    println!("  {} Usage: pump <node>", "!".bright_red());
                    continue;
                }
                match nodes.get(parts[1]) {
                    Some(node) => {
                        let handled = node.pump();
                        pump_arrow(node, handled);
                    }
                    None => println!("  {} Unknown node '{}'", "!".bright_red(), parts[1]),
                }
            }

            "pumpall" => {
                let all: Vec<&Node> = nodes.values().collect();
                pump_all(&all);
            }

            "show" | "s" => {
                if parts.len() < 2 {
                    println!("  {} Usage: show <node>", "!".bright_red());
                    continue;
                }
                match nodes.get(parts[1]) {
                    Some(node) => show_node(node),
                    None => println!("  {} Unknown node '{}'", "!".bright_red(), parts[1]),
                }
            }

            "list" | "ls" => {
                if nodes.is_empty() {
                    println!("  {}", "(no nodes)".dimmed());
                }
                for node in nodes.values() {
                    step(&format!("{:<10} count = {}", node.name, node.count()));
                }
            }

            "check" => {
                let all: Vec<&Node> = nodes.values().filter(|n| !n.view.is_offline()).collect();
                convergence_result(convergence_check(&all));
            }

            "insights" | "i" => match parts.get(1).and_then(|name| nodes.get(*name)) {
                Some(node) => show_insights(node),
                None => println!("  {} Usage: insights <node>", "!".bright_red()),
            },

            "quit" | "exit" | "q" => {
                println!("  {}", "Goodbye!".dimmed());
                break;
            }

            "help" | "h" | "?" => {
                println!("  join <name> [offline] | click <n> [k] | set <n> <field> <json>");
                println!("  pump <n> | pumpall | show <n> | list | check | insights <n> | quit");
            }

            other => {
                println!(
                    "  {} Unknown command '{}', type 'help'",
                    "?".bright_yellow(),
                    other
                );
            }
        }
    }
    Ok(())
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let result = match cli.command {
        Commands::Demo => run_demo(),
        Commands::LateJoin => run_late_join(),
        Commands::Offline => run_offline(),
        Commands::Live { nodes, clicks } => run_live(nodes, clicks).await,
        Commands::Interactive => run_interactive(),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}
