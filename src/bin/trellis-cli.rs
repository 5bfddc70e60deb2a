use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;

use trellis::config::{validate_settings, AppSettings};
use trellis::extensions::ExtensionLoader;
use trellis::{Environment, EnvironmentResolver, ExtensionRegistry, RouteConfigResolver};

#[derive(Parser)]
#[command(name = "trellis-cli")]
#[command(about = "Inspect trellis configuration", long_about = None)]
struct Cli {
    /// Configuration directory (defaults to TRELLIS_CONFIG_DIR, then ./config).
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Environment to load (defaults to TRELLIS_ENV).
    #[arg(short, long)]
    env: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the merged configuration
    Config {
        /// Show which file each top-level key came from
        #[arg(long)]
        origins: bool,
    },
    /// Validate settings, route overrides and extensions
    Check,
    /// Show the configuration a route would receive
    Routes {
        #[arg(short, long)]
        path: String,

        #[arg(short, long, default_value = "GET")]
        method: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut resolver = EnvironmentResolver::from_process_env();
    if let Some(dir) = cli.config_dir {
        resolver = resolver.config_dir(dir);
    }
    let environment = cli
        .env
        .as_deref()
        .map(Environment::parse)
        .unwrap_or_else(|| resolver.environment());
    let resolved = resolver.resolve_for(environment)?;
    let document = resolved.document;

    match cli.command {
        Commands::Config { origins } => {
            if origins {
                for key in document.keys() {
                    println!("{:<24} {}", key, document.origin(key).unwrap_or("-"));
                }
            } else {
                print!("{}", document.to_yaml_string()?);
            }
        }
        Commands::Check => {
            let settings = AppSettings::from_document(&document)?;
            let mut failed = false;
            if let Err(errors) = validate_settings(&settings) {
                failed = true;
                for error in errors {
                    eprintln!("error: {}", error);
                }
            }
            match RouteConfigResolver::from_document(&document) {
                Ok(routes) => println!("route patterns: {}", routes.len()),
                Err(e) => {
                    failed = true;
                    eprintln!("error: {}", e);
                }
            }
            let registry = ExtensionRegistry::with_builtins();
            match ExtensionLoader::new(&registry).load(&document) {
                Ok(loaded) => println!("extensions: {}", loaded.ids().join(", ")),
                Err(e) => {
                    failed = true;
                    eprintln!("error: {}", e);
                }
            }

            if failed {
                return Err("configuration check failed".into());
            }
            println!(
                "ok: {} ({})",
                resolved.source.display(),
                resolved.environment
            );
        }
        Commands::Routes { path, method } => {
            let method = method.to_ascii_uppercase().parse::<axum::http::Method>()?;
            let config = RouteConfigResolver::from_document(&document)?.resolve(&path, &method);
            let output = json!({
                "path": path,
                "method": method.as_str(),
                "matched_pattern": config.matched_pattern(),
                "config": serde_json::to_value(config.values())?,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
