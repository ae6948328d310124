//! # Replication Simulator
//!
//! Replays a sender moving in a circle through simulated network presets
//! and prints how smooth the replicated pose stays.
//!
//! ## Usage
//!
//! ```bash
//! replication_sim --preset poor --duration 30 --seed 7 --config tether.toml
//! ```

use tether_replication::{run_scenario, NetworkConditions, ReplicationConfig, ScenarioConfig, SmoothnessReport};

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         TETHER REPLICATION SIMULATOR                             ║");
    println!("║         REMOTE TRANSFORMS OVER A LOSSY LINK                      ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    // Parse command line arguments (simple parsing, no external deps)
    let args: Vec<String> = std::env::args().collect();
    let mut preset: Option<String> = None;
    let mut duration_secs = 10.0f64;
    let mut seed = 0x7E7E_7E7Eu64;
    let mut config_path: Option<String> = None;
    let mut jitter_buffer_ms: Option<f64> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--preset" | "-p" => {
                if i + 1 < args.len() {
                    preset = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--duration" | "-d" => {
                if i + 1 < args.len() {
                    duration_secs = args[i + 1].parse().unwrap_or(10.0);
                    i += 1;
                }
            }
            "--seed" | "-s" => {
                if i + 1 < args.len() {
                    seed = args[i + 1].parse().unwrap_or(seed);
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--jitter-buffer-ms" | "-j" => {
                if i + 1 < args.len() {
                    jitter_buffer_ms = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Usage: replication_sim [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -p, --preset <NAME>          perfect | good | average | poor (default: all)");
                println!("  -d, --duration <SECS>        Simulated seconds per run (default: 10)");
                println!("  -s, --seed <SEED>            Link RNG seed");
                println!("  -c, --config <FILE>          Replication config (TOML)");
                println!("  -j, --jitter-buffer-ms <MS>  Override the playout delay");
                println!("  -h, --help                   Show this help");
                return;
            }
            _ => {}
        }
        i += 1;
    }

    let mut replication = match config_path {
        Some(path) => match ReplicationConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(2);
            }
        },
        None => ReplicationConfig::default(),
    };
    if let Some(ms) = jitter_buffer_ms {
        replication.jitter_buffer_delay_secs = ms / 1000.0;
    }

    let presets: Vec<(&str, NetworkConditions)> = match preset.as_deref() {
        Some(name) => match NetworkConditions::preset(name) {
            Some(conditions) => vec![(name, conditions)],
            None => {
                eprintln!("error: unknown preset '{name}'");
                std::process::exit(2);
            }
        },
        None => NetworkConditions::presets().to_vec(),
    };

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Duration:           {duration_secs} s");
    println!("│ Seed:               {seed}");
    println!("│ Stall Policy:       {:?}", replication.stall_policy);
    println!("│ Jitter Buffer:      {} ms", replication.jitter_buffer_delay_secs * 1000.0);
    println!("└─────────────────────────────────────────────────────────────────┘");
    println!();

    let mut failed = false;
    for (name, conditions) in presets {
        let scenario = ScenarioConfig {
            conditions,
            seed,
            duration_secs,
            replication: replication.clone(),
            ..ScenarioConfig::default()
        };
        match run_scenario(&scenario) {
            Ok(report) => print_report(name, &conditions, &report),
            Err(e) => {
                eprintln!("error: {name}: {e}");
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}

fn print_report(name: &str, conditions: &NetworkConditions, report: &SmoothnessReport) {
    println!("┌─ {} ", name.to_uppercase());
    println!(
        "│ Link:               {} ms ± {} ms, {}% loss, {}% dup, {}% reorder",
        conditions.one_way_ms,
        conditions.jitter_ms,
        conditions.loss_percent,
        conditions.duplicate_percent,
        conditions.reorder_percent
    );
    println!(
        "│ Packets:            {} sent, {} dropped, {} delivered",
        report.link.sent, report.link.dropped, report.link.delivered
    );
    println!(
        "│ Samples:            {} accepted, {} duplicate, {} stale, {} rejected",
        report.session.accepted, report.session.duplicate, report.session.stale, report.session.rejected
    );
    println!("│ Frames:             {}", report.frames);
    println!("│ Max Frame Jump:     {:.4} m", report.max_frame_jump);
    println!("│ Max Error:          {:.4} m", report.max_position_error);
    println!("│ Mean Error:         {:.4} m", report.mean_position_error);
    if report.non_finite_frames == 0 {
        println!("│ Non-finite Frames:  0 ✓");
    } else {
        println!("│ Non-finite Frames:  {} ✗", report.non_finite_frames);
    }
    println!("└─────────────────────────────────────────────────────────────────┘");
    println!();
}
