// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Realm discovery CLI
//!
//! # Usage
//!
//! ```bash
//! # Discover a domain
//! realm-discover example.com
//!
//! # Several names, JSON output
//! realm-discover --json example.com dc1.example.com 10.0.0.5
//!
//! # Using configuration file
//! realm-discover --config discovery.toml example.com
//!
//! # Write a configuration file with the defaults
//! realm-discover gen-config --output discovery.toml
//! ```

use clap::{Parser, Subcommand};
use realm_disco::{Disco, DiscoveryConfig, DiscoveryService, RequestContext};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Kerberos realm discovery
#[derive(Parser, Debug)]
#[command(name = "realm-discover")]
#[command(about = "Discover Kerberos realms (Active Directory, FreeIPA) from DNS and LDAP")]
#[command(version)]
struct Args {
    /// Domain names, server names or IP addresses to discover
    names: Vec<String>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum concurrent probes per name
    #[arg(long)]
    max_outstanding: Option<usize>,

    /// Skip the FreeIPA certificate check
    #[arg(long)]
    no_ipa: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a configuration file with the defaults
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "discovery.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    if args.names.is_empty() {
        eprintln!("Nothing to discover: pass at least one domain, server or address");
        std::process::exit(2);
    }

    let config = build_config(&args)?;
    let service = DiscoveryService::new(config)?;

    // Ctrl+C cancels whatever is still running.
    let ctx = RequestContext::new().with_operation_id(format!("cli-{}", std::process::id()));
    let cancel = ctx.cancellable.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let tasks: Vec<_> = args
        .names
        .iter()
        .map(|name| (name.clone(), service.discover_domain(name, Some(&ctx))))
        .collect();

    let mut failed = false;
    let mut report = Vec::new();
    for (name, task) in tasks {
        match task.await {
            Ok(Some(disco)) => {
                if !args.json {
                    print_disco(&name, &disco);
                }
                report.push(serde_json::json!({ "input": name, "realm": disco.as_ref() }));
            }
            Ok(None) => {
                if !args.json {
                    println!("{}: no realm found", name);
                }
                report.push(serde_json::json!({ "input": name, "realm": null }));
            }
            Err(e) => {
                failed = true;
                if !args.json {
                    eprintln!("{}: discovery failed: {}", name, e);
                }
                report.push(serde_json::json!({ "input": name, "error": e.to_string() }));
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn build_config(args: &Args) -> Result<DiscoveryConfig, Box<dyn std::error::Error>> {
    let mut config = match args.config {
        Some(ref path) => DiscoveryConfig::from_file(path)?,
        None => DiscoveryConfig::default(),
    }
    .with_env_overrides();

    if let Some(n) = args.max_outstanding {
        config = config.with_max_outstanding(n);
    }
    if args.no_ipa {
        config = config.with_ipa(false);
    }
    config.validate()?;
    Ok(config)
}

fn print_disco(input: &str, disco: &Arc<Disco>) {
    println!("{}", input);
    println!("  domain-name: {}", disco.domain_name);
    println!("  realm-name: {}", disco.kerberos_realm);
    println!("  type: {}", disco.kind());
    if let Some(software) = disco.server_software {
        println!("  server-software: {}", software);
    }
    if let Some(ref server) = disco.explicit_server {
        println!("  server: {}", server);
    }
    if let Some(addr) = disco.server_address {
        println!("  answered-by: {}", addr);
    }
    if let Some(ref workgroup) = disco.workgroup {
        println!("  workgroup: {}", workgroup);
    }
    for kdc in &disco.kdc_targets {
        println!("  kdc: {}", kdc);
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = toml::to_string_pretty(&DiscoveryConfig::default())?;
    let content = format!(
        r#"# Realm discovery configuration
# Generated by realm-discover gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match DiscoveryConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("max_outstanding: {}", config.max_outstanding);
            println!("ldap_port: {}", config.ldap_port);
            println!(
                "timeouts: connect {} ms, io {} ms, cldap {} ms",
                config.connect_timeout_ms, config.io_timeout_ms, config.cldap_timeout_ms
            );
            println!("ipa check: {}", if config.ipa_enabled { "on" } else { "off" });
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
