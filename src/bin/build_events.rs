//! Compile the YAML event list into the JSON served to the page.
//! Run with: cargo run --bin build_events [events.yaml] [events.json]

use aitimeline::config::Config;
use aitimeline::data::build_events;
use std::env;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
    let cfg = Config::from_env();
    let yaml = env::args().nth(1).unwrap_or(cfg.events_yaml);
    let json = env::args().nth(2).unwrap_or(cfg.events_json);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    match build_events(&PathBuf::from(&yaml), &PathBuf::from(&json), now) {
        Ok(manifest) => println!(
            "Built {} with {} events (sha256 {})",
            manifest.output, manifest.count, manifest.hash_sha256
        ),
        Err(err) => {
            eprintln!("Error building events from {}: {:#}", yaml, err);
            std::process::exit(1);
        }
    }
}
