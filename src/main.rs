mod activity;
mod auth;
mod backend;
mod cli;
mod config;
mod schedule;
mod session;
mod store;
mod venue;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::cell::RefCell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "kiosk",
    about = "Machine authentication console for VR venue kiosks"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Backend URL (overrides config)")]
    pub url: Option<String>,

    #[arg(long, help = "Backend anon key (overrides config)")]
    pub anon_key: Option<String>,

    #[arg(long, help = "Directory for the cached session and activity log")]
    pub state_dir: Option<PathBuf>,

    #[arg(long, help = "Venue to use when no machine session is present")]
    pub venue: Option<String>,

    #[arg(long, help = "Debug output (print settings)")]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Authenticate this machine against a venue
    Login {
        venue_id: String,
        #[arg(env = "KIOSK_PRODUCT_KEY", hide_env_values = true)]
        product_key: String,
    },
    /// End the machine session
    Logout,
    /// Show the cached machine session
    Status,
    /// List active venues
    Venues,
    /// Show (or override) the venue this console works on
    Venue { id: Option<String> },
    /// Auto-refresh the active venues list
    Watch {
        #[arg(long, value_name = "off|30|60|300")]
        interval: Option<String>,
        #[arg(
            long,
            value_parser = clap::value_parser!(u32).range(1..),
            help = "Stop after this many refreshes (at least 1)"
        )]
        ticks: Option<u32>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_from(config_path)?
    } else {
        config::Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: failed to load config: {}", e);
            config::Config::default()
        })
    };

    // CLI flags take priority over every config layer
    if let Some(url) = &args.url {
        cfg.backend.url = Some(url.clone());
    }
    if let Some(anon_key) = &args.anon_key {
        cfg.backend.anon_key = Some(anon_key.clone());
    }
    if let Some(dir) = &args.state_dir {
        cfg.state.dir = Some(dir.clone());
    }
    if let Some(venue) = &args.venue {
        cfg.machine.venue = Some(venue.clone());
    }

    if let Err(errors) = cfg.validate() {
        for e in &errors {
            eprintln!("Config error {}", e);
        }
        return Err(anyhow::anyhow!(
            "Invalid configuration ({} errors)",
            errors.len()
        ));
    }

    let backend = match (cfg.backend.resolve_url(), cfg.backend.resolve_anon_key()) {
        (Ok(url), Ok(key)) => backend::Backend::Rest(backend::RestClient::new(
            &url,
            &key,
            cfg.backend.timeout_ms(),
        )),
        (Err(e), _) | (_, Err(e)) => backend::Backend::Unconfigured(e.to_string()),
    };

    let state_dir = cfg.state_dir();

    if args.debug {
        match &backend {
            backend::Backend::Rest(client) => eprintln!("[DEBUG] Backend: {}", client.base_url()),
            backend::Backend::Unconfigured(reason) => eprintln!("[DEBUG] Backend: {}", reason),
        }
        eprintln!("[DEBUG] State dir: {}", state_dir.display());
        eprintln!("[DEBUG] Refresh interval: {}", cfg.refresh_interval().as_str());
    }

    let session_store = store::FileStore::in_dir(&state_dir, store::SESSION_KEY);
    if args.debug {
        eprintln!("[DEBUG] Session file: {}", session_store.path().display());
    }
    let mut manager = auth::MachineAuth::new(backend, session_store);
    if let Some(user_agent) = &cfg.machine.user_agent {
        manager = manager.with_user_agent(user_agent);
    }
    if cfg.activity_log_enabled() {
        let run_id = uuid::Uuid::new_v4().to_string();
        match activity::ActivityLog::open(&state_dir.join("activity.jsonl"), &run_id) {
            Ok(log) => {
                if args.debug {
                    eprintln!("[DEBUG] Activity log: {}", log.path.display());
                }
                manager = manager.with_activity_log(log);
            }
            Err(e) => eprintln!("Warning: activity log disabled: {:#}", e),
        }
    }
    manager.restore();
    if args.debug {
        eprintln!("[DEBUG] Authenticated: {}", manager.is_authenticated());
    }

    let ctx = cli::Context {
        venue_store: store::FileStore::in_dir(&state_dir, store::CURRENT_VENUE_KEY),
        state_dir,
        auth: RefCell::new(manager),
        venue_override: RefCell::new(None),
        debug: args.debug,
        config: cfg,
    };

    match &args.command {
        Some(command) => cli::run_command(&ctx, command),
        None => cli::run_repl(ctx),
    }
}
