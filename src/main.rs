use stress_test::{stress_test_counter, stress_test_mixed, stress_test_scaling};
use tracing_subscriber::EnvFilter;
pub mod stress_test;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };
    let converged = rt.block_on(async_main());
    if !converged {
        std::process::exit(1);
    }
}

async fn async_main() -> bool {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            RELAY SYNC STRESS TESTS                          ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut converged = true;

    // Test 1: counter with small scale
    let stats = stress_test_counter(4, 100).await;
    stats.print();
    converged &= stats.converged;

    // Test 2: mixed strategies with small scale
    let stats = stress_test_mixed(4, 100).await;
    stats.print();
    converged &= stats.converged;

    // Test 3: counter with medium scale
    let stats = stress_test_counter(10, 500).await;
    stats.print();
    converged &= stats.converged;

    // Test 4: mixed strategies with medium scale
    let stats = stress_test_mixed(10, 500).await;
    stats.print();
    converged &= stats.converged;

    // Test 5: Scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS (counter)                        ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(20, 4).await;

    if converged {
        println!("\n✓ All stress tests converged!");
    } else {
        println!("\n✗ Some nodes diverged");
    }
    converged
}
