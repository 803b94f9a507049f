//! Validate a secrets file before building or flashing.
//!
//! Checks every field and reports each problem by field name. Values are
//! never printed.
//!
//! Usage:
//!   cargo run --bin check-secrets              # checks ./secrets.env
//!   cargo run --bin check-secrets -- path.env
//!   cargo run --bin check-secrets -- --env     # checks the environment

// This binary only runs on the host, not on ESP32
#![cfg(not(target_os = "espidf"))]

use sensor_node::credentials::{
    validate_field, ConfigError, CredentialSource, EnvSource, Field, FileSource,
};
use std::process::exit;

fn check(source: &dyn CredentialSource) -> Vec<ConfigError> {
    let mut problems = Vec::new();
    for field in Field::ALL {
        let result = match source.fetch(field) {
            Ok(Some(value)) => validate_field(field, &value),
            Ok(None) => Err(ConfigError::MissingField(field)),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => println!("  {:<14} ok", field.key()),
            Err(e) => {
                println!("  {:<14} {}", field.key(), e);
                problems.push(e);
            }
        }
    }
    problems
}

fn main() {
    let arg = std::env::args().nth(1);

    let source: Box<dyn CredentialSource> = match arg.as_deref() {
        Some("-h") | Some("--help") => {
            println!("Usage: check-secrets [PATH | --env]");
            println!();
            println!("Copy secrets.example.env to secrets.env and replace every placeholder.");
            return;
        }
        Some("--env") => {
            println!("=== Checking environment ===\n");
            Box::new(EnvSource)
        }
        other => {
            let path = other.unwrap_or("secrets.env");
            println!("=== Checking {} ===\n", path);
            match FileSource::open(path) {
                Ok(file) => Box::new(file),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    eprintln!();
                    eprintln!("Create it from the template:");
                    eprintln!("  cp secrets.example.env secrets.env");
                    exit(1);
                }
            }
        }
    };

    let problems = check(source.as_ref());
    println!();
    if problems.is_empty() {
        println!("All credentials present and valid.");
    } else {
        println!("{} problem(s) found; the node will refuse to start.", problems.len());
        exit(1);
    }
}
