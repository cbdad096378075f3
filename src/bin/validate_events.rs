//! Check events.yaml for structural errors and consistency warnings.
//! Exit code 1 on any error; warnings alone pass.

use aitimeline::config::Config;
use aitimeline::data::validate_events;
use std::env;
use std::path::PathBuf;

fn main() {
    let path = env::args().nth(1).unwrap_or_else(|| Config::from_env().events_yaml);
    println!("Validating {}...", path);

    let report = match validate_events(&PathBuf::from(&path)) {
        Ok(r) => r,
        Err(err) => {
            eprintln!("YAML Error: {:#}", err);
            std::process::exit(1);
        }
    };

    println!("Found {} events", report.event_count);
    if !report.errors.is_empty() {
        println!();
        println!("{} error(s):", report.errors.len());
        for e in &report.errors {
            println!("  - {}", e);
        }
    }
    if !report.warnings.is_empty() {
        println!();
        println!("{} warning(s):", report.warnings.len());
        for w in &report.warnings {
            println!("  - {}", w);
        }
    }
    if !report.is_ok() {
        std::process::exit(1);
    }
    println!();
    println!("Validation passed");
}
