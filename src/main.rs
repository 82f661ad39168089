use clap::{Parser, Subcommand};
use pppcp::auth::MemorySecretStore;
use pppcp::config::{self, Config};
use pppcp::driver::{self, RunningLink};
use pppcp::telemetry::{init_logging, MetricsRegistry};
use pppcp::{Link, LinkEvent};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pppcp")]
#[command(about = "PPP link and network control protocols")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run two configured links back-to-back until both networks are up
    Loopback {
        /// First link name
        a: String,
        /// Second link name
        b: String,

        /// Path to pppcp.toml
        #[arg(short, long, default_value = "pppcp.toml")]
        config: PathBuf,

        /// Give up after this many seconds
        #[arg(short, long, default_value_t = 30)]
        timeout: u64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Generate pppcp.lock from pppcp.toml
    Generate {
        /// Path to pppcp.toml
        #[arg(short, long, default_value = "pppcp.toml")]
        config: PathBuf,

        /// Output path for pppcp.lock
        #[arg(short, long, default_value = "pppcp.lock")]
        output: PathBuf,
    },
    /// Validate pppcp.toml without generating lock file
    Validate {
        /// Path to pppcp.toml
        #[arg(short, long, default_value = "pppcp.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Config { action } => {
            // RUST_LOG env var takes priority
            init_logging(None);
            match action {
                ConfigAction::Generate { config, output } => cmd_config_generate(&config, &output),
                ConfigAction::Validate { config } => cmd_config_validate(&config),
            }
        }
        Commands::Loopback {
            a,
            b,
            config,
            timeout,
        } => cmd_loopback(&config, &a, &b, Duration::from_secs(timeout)),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn load_valid(config_path: &PathBuf) -> Result<Config, String> {
    let cfg = config::load(config_path).map_err(|e| format!("Failed to load config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();
    if validation.has_errors() {
        return Err("Validation failed with errors".to_string());
    }
    Ok(cfg)
}

fn cmd_config_generate(config_path: &PathBuf, output_path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Loading {}...", config_path.display());
    let cfg = load_valid(config_path)?;

    let lock = config::generate_lock(&cfg);
    let lock_toml =
        config::render_lock(&lock).map_err(|e| format!("Failed to serialize lock: {}", e))?;

    let output = format!(
        "# Generated by pppcp - DO NOT EDIT\n# Source: {}\n\n{}",
        config_path.display(),
        lock_toml
    );
    std::fs::write(output_path, output).map_err(|e| format!("Failed to write lock file: {}", e))?;

    println!("[INFO] Generated {}", output_path.display());
    Ok(())
}

fn cmd_config_validate(config_path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());
    load_valid(config_path)?;
    println!("[INFO] Configuration is valid");
    Ok(())
}

fn cmd_loopback(config_path: &PathBuf, a: &str, b: &str, limit: Duration) -> Result<(), String> {
    let cfg = config::load(config_path).map_err(|e| format!("Failed to load config: {}", e))?;
    init_logging(Some(&cfg.log));

    let validation = config::validate(&cfg);
    validation.print_diagnostics();
    if validation.has_errors() {
        return Err("Validation failed with errors".to_string());
    }

    if a == b {
        return Err("Loopback needs two different links".to_string());
    }
    let link_a = cfg
        .links
        .get(a)
        .ok_or_else(|| pppcp::Error::LinkNotFound { name: a.to_string() }.to_string())?;
    let link_b = cfg
        .links
        .get(b)
        .ok_or_else(|| pppcp::Error::LinkNotFound { name: b.to_string() }.to_string())?;

    let pairing = config::validate_pair(a, link_a, b, link_b);
    pairing.print_diagnostics();
    if pairing.has_errors() {
        return Err("Links cannot authenticate each other".to_string());
    }

    let secrets = Arc::new(MemorySecretStore::new(cfg.secrets.clone()));
    let metrics = Arc::new(MetricsRegistry::new());
    let link_a = Link::new(a, link_a, secrets.clone(), metrics.register_link(a));
    let link_b = Link::new(b, link_b, secrets, metrics.register_link(b));

    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        let (a_tx, a_rx) = mpsc::channel(64);
        let (b_tx, b_rx) = mpsc::channel(64);
        let mut a_run = driver::spawn(link_a, a_tx);
        let mut b_run = driver::spawn(link_b, b_tx);
        tokio::spawn(driver::pipe(a_rx, b_run.handle.clone()));
        tokio::spawn(driver::pipe(b_rx, a_run.handle.clone()));

        for run in [&a_run, &b_run] {
            run.handle.open().await.map_err(|e| e.to_string())?;
            run.handle.lower_up().await.map_err(|e| e.to_string())?;
        }

        let outcome = tokio::time::timeout(limit, wait_network(&mut a_run, &mut b_run)).await;

        for run in [&a_run, &b_run] {
            let _ = run.handle.close().await;
        }
        // Let the Terminate exchange finish
        tokio::time::sleep(Duration::from_millis(200)).await;

        for (name, value) in metrics.export() {
            println!("{} {}", name, value);
        }

        match outcome {
            Ok(result) => result,
            Err(_) => Err(format!("Networks not up after {}s", limit.as_secs())),
        }
    })
}

/// Wait for NetworkUp on both links
async fn wait_network(a: &mut RunningLink, b: &mut RunningLink) -> Result<(), String> {
    let (mut a_up, mut b_up) = (false, false);

    while !(a_up && b_up) {
        let (name, event) = tokio::select! {
            Some(event) = a.events.recv() => (a.handle.name().to_string(), event),
            Some(event) = b.events.recv() => (b.handle.name().to_string(), event),
            else => return Err("Link tasks stopped".to_string()),
        };

        match event {
            LinkEvent::NetworkUp { local, peer, dns } => {
                info!(
                    "{}: network up, local {:?} peer {:?} dns {:?}",
                    name, local, peer, dns
                );
                println!("[INFO] {} up: local {:?} peer {:?}", name, local, peer);
                if name == a.handle.name() {
                    a_up = true;
                } else {
                    b_up = true;
                }
            }
            LinkEvent::AuthFinished { success: false, message } => {
                return Err(format!("{}: authentication failed: {}", name, message));
            }
            LinkEvent::Failed { protocol, reason } => {
                warn!("{}: protocol 0x{:04x} failed: {}", name, protocol, reason);
                return Err(format!("{}: {}", name, reason));
            }
            other => info!("{}: {:?}", name, other),
        }
    }
    Ok(())
}
