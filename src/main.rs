//! noc-emu: cycle-level interconnect models

use std::env;

use anyhow::bail;
use noc_emu::config::Config;
use noc_emu::testing::{run_scenario, SCENARIOS};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut names = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "--list" | "-l" => {
                list_scenarios();
                return Ok(());
            }
            "--sample-config" => {
                print!("{}", Config::sample_config());
                return Ok(());
            }
            "--help" | "-h" => {
                print_usage(&args[0]);
                return Ok(());
            }
            other if other.starts_with('-') => {
                print_usage(&args[0]);
                bail!("unknown option '{}'", other);
            }
            other => names.push(other.to_string()),
        }
    }

    if names.is_empty() {
        names = SCENARIOS.iter().map(|(n, _)| n.to_string()).collect();
    }

    let config = Config::get();
    log::info!(
        "channel policy {:?}, AXI preset {}, {} cycle budget",
        config.channel_policy(),
        config.axi_preset(),
        config.max_cycles()
    );

    let mut failed = 0;
    for name in &names {
        let outcome = run_scenario(name, config)?;
        match &outcome.result {
            Ok(()) => println!("PASS  {:<12} {:>5} cycles", outcome.name, outcome.cycles),
            Err(why) => {
                failed += 1;
                println!("FAIL  {:<12} {:>5} cycles  {}", outcome.name, outcome.cycles, why);
            }
        }
    }

    println!();
    println!("{} passed, {} failed", names.len() - failed, failed);
    if failed > 0 {
        bail!("{} scenario(s) failed", failed);
    }
    Ok(())
}

fn list_scenarios() {
    println!("Scenarios:");
    for (name, description) in SCENARIOS {
        println!("  {:<12} {}", name, description);
    }
}

fn print_usage(program: &str) {
    println!("Usage: {} [scenario ...] [--list] [--sample-config]", program);
    println!();
    println!("Runs the named scenarios (default: all) and prints a verdict for each.");
    println!("Settings come from ./noc-emu.toml, ~/.config/noc-emu/config.toml and");
    println!("NOC_EMU_* environment variables; RUST_LOG controls logging.");
    if let Some(path) = Config::user_config_path() {
        println!();
        println!("User config: {}", path.display());
    }
}
