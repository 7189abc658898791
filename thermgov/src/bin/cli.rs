//! Command-line interface for thermgovd.
//!
//! This binary provides a CLI for controlling and monitoring the governor
//! daemon via the HTTP API.

use std::env;

use anyhow::Result;
use strum::IntoEnumIterator;

use thermgov::api_client::{self, parse_config_value, types::GovernorPatchRequest};
use thermgov::thermal::ConfigField;

fn usage() -> ! {
    eprintln!("Usage: thermgov-cli <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status                 Show governor status");
    eprintln!("  enable                 Resume thermal management");
    eprintln!("  disable                Stop throttling and restore the ceiling");
    eprintln!("  suspend                Pause polling (e.g. screen off)");
    eprintln!("  resume                 Resume polling");
    eprintln!("  ceiling-changed        Report that another tool set the ceiling");
    eprintln!("  config                 Show every configuration field");
    eprintln!("  config FIELD           Show one field");
    eprintln!("  config FIELD VALUE     Change one field");
    eprintln!();
    eprintln!("Environment:");
    eprintln!(
        "  THERMGOV_API_URL    API base URL (default: {})",
        api_client::DEFAULT_BASE_URL
    );
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        usage();
    }

    let command = &args[1];
    let rest: Vec<&str> = args[2..].iter().map(String::as_str).collect();

    match (command.as_str(), rest.as_slice()) {
        ("status", []) => cmd_status().await?,
        ("enable", []) => cmd_mode(Some(true), None).await?,
        ("disable", []) => cmd_mode(Some(false), None).await?,
        ("suspend", []) => cmd_mode(None, Some(true)).await?,
        ("resume", []) => cmd_mode(None, Some(false)).await?,
        ("ceiling-changed", []) => cmd_ceiling_changed().await?,
        ("config", []) => cmd_config_all().await?,
        ("config", [field]) => cmd_config_get(field).await?,
        ("config", [field, value]) => cmd_config_set(field, value).await?,
        _ => {
            eprintln!("Unknown command: {}", args[1..].join(" "));
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Build an API client, honoring THERMGOV_API_URL if set.
fn make_client() -> api_client::Client {
    match env::var("THERMGOV_API_URL") {
        Ok(url) => api_client::Client::with_base_url(url),
        Err(_) => api_client::Client::new(),
    }
}

/// Print a summary of the governor state.
async fn cmd_status() -> Result<()> {
    let client = make_client();
    let state = client.get_governor().await?;

    println!("Enabled:     {}", state.enabled);
    println!("Suspended:   {}", state.suspended);
    println!("Level:       {}", state.level);
    match state.temperature_c {
        Some(t) => println!("Temperature: {t} °C"),
        None => println!("Temperature: (no reading)"),
    }
    if let Some(khz) = state.pre_throttle_khz {
        println!("Restore to:  {khz} kHz");
    }
    if state.ceiling_changed_externally {
        println!("Ceiling changed by another actor");
    }

    println!("Thresholds (clear/engage °C, ceiling kHz):");
    for (name, band) in [
        ("low", state.profile.low),
        ("mid", state.profile.mid),
        ("max", state.profile.max),
    ] {
        println!(
            "  {name}  {}/{}  {}",
            band.clear_c, band.engage_c, band.ceiling_khz
        );
    }

    println!("Time throttled:");
    println!("  low  {} ms", state.dwell.low_ms);
    println!("  mid  {} ms", state.dwell.mid_ms);
    println!("  max  {} ms", state.dwell.max_ms);

    Ok(())
}

async fn cmd_mode(enabled: Option<bool>, suspended: Option<bool>) -> Result<()> {
    let client = make_client();
    let state = client
        .patch_governor(&GovernorPatchRequest {
            enabled,
            suspended,
            ..Default::default()
        })
        .await?;

    println!(
        "Enabled: {}  Suspended: {}  Level: {}",
        state.enabled, state.suspended, state.level
    );
    Ok(())
}

async fn cmd_ceiling_changed() -> Result<()> {
    let client = make_client();
    let state = client
        .patch_governor(&GovernorPatchRequest {
            ceiling_changed: Some(true),
            ..Default::default()
        })
        .await?;

    println!(
        "Ceiling change recorded (pending: {})",
        state.ceiling_changed_externally
    );
    Ok(())
}

async fn cmd_config_all() -> Result<()> {
    let client = make_client();
    let config = client.get_config().await?;

    for field in ConfigField::iter() {
        println!("{:<22} {}", field.as_ref(), config.get(field));
    }
    Ok(())
}

async fn cmd_config_get(field: &str) -> Result<()> {
    let client = make_client();
    let value = client.get_config_field(field).await?;
    println!("{}", value.value);
    Ok(())
}

async fn cmd_config_set(field: &str, raw: &str) -> Result<()> {
    let client = make_client();
    let value = client
        .put_config_field(field, parse_config_value(raw))
        .await?;
    println!("{} = {}", value.field, value.value);
    Ok(())
}
