use crate::{
    auth::{MachineAuth, NoticeKind},
    backend::Backend,
    config::Config,
    schedule::{Clock, RefreshInterval, Scheduler, SystemClock},
    session::VenueInfo,
    store::FileStore,
    venue, Command,
};
use anyhow::{bail, Result};
use chrono::Utc;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::cell::RefCell;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

const WATCH_TASK: &str = "venues";

pub struct Context {
    pub config: Config,
    pub state_dir: PathBuf,
    pub auth: RefCell<MachineAuth<Backend, FileStore>>,
    pub venue_store: FileStore,
    pub venue_override: RefCell<Option<String>>,
    pub debug: bool,
}

/// Run a single subcommand
pub fn run_command(ctx: &Context, command: &Command) -> Result<()> {
    match command {
        Command::Login {
            venue_id,
            product_key,
        } => {
            require_backend(ctx)?;
            if !login(ctx, venue_id, product_key) {
                bail!("authentication failed");
            }
        }
        Command::Logout => logout(ctx),
        Command::Status => print_status(ctx),
        Command::Venues => {
            require_backend(ctx)?;
            print_venues(ctx);
        }
        Command::Venue { id } => detect_venue(ctx, id.as_deref()),
        Command::Watch { interval, ticks } => {
            require_backend(ctx)?;
            let interval = match interval {
                Some(s) => parse_interval(s)?,
                None => ctx.config.refresh_interval(),
            };
            watch(ctx, interval, *ticks);
        }
    }
    Ok(())
}

pub fn run_repl(ctx: Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    println!("kiosk - type /help for commands, /exit to quit");
    if let Some(session) = ctx.auth.borrow().session() {
        println!("Restored session for {}", session.venue.name);
    }

    loop {
        let prompt = match ctx.auth.borrow().session() {
            Some(session) => format!("{}> ", session.venue.name),
            None => "kiosk> ".to_string(),
        };
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                // Keep product keys out of the history
                if !line.starts_with("/login") {
                    rl.add_history_entry(line)?;
                }

                if handle_command(&ctx, line) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    Ok(())
}

fn handle_command(ctx: &Context, cmd: &str) -> bool {
    let parts: Vec<&str> = cmd.split_whitespace().collect();
    let Some(&name) = parts.first() else {
        return false;
    };
    match name {
        "/exit" | "/quit" => return true,
        "/help" => {
            println!("Commands:");
            println!("  /exit                     - quit");
            println!("  /help                     - show commands");
            println!("  /status                   - show machine session");
            println!("  /login <venue> <key>      - authenticate this machine");
            println!("  /logout                   - end the machine session");
            println!("  /venues                   - list active venues");
            println!("  /venue [id]               - show or override the current venue");
            println!("  /watch [off|30|60|300] [n] - auto-refresh active venues");
        }
        "/status" => print_status(ctx),
        "/login" => {
            if parts.len() != 3 {
                println!("Usage: /login <venue> <key>");
            } else if ctx.auth.borrow().is_busy() {
                println!("Authentication already in progress");
            } else {
                login(ctx, parts[1], parts[2]);
            }
        }
        "/logout" => logout(ctx),
        "/venues" => print_venues(ctx),
        "/venue" => detect_venue(ctx, parts.get(1).copied()),
        "/watch" => {
            let interval = match parts.get(1) {
                Some(s) => match parse_interval(s) {
                    Ok(i) => i,
                    Err(e) => {
                        println!("{}", e);
                        return false;
                    }
                },
                None => ctx.config.refresh_interval(),
            };
            // Bounded in the console so it always returns to the prompt
            let ticks = match parts.get(2).map(|s| parse_ticks(s)).transpose() {
                Ok(ticks) => ticks.unwrap_or(3),
                Err(e) => {
                    println!("{}", e);
                    return false;
                }
            };
            watch(ctx, interval, Some(ticks));
        }
        _ => println!("Unknown command: {}", name),
    }
    false
}

fn require_backend(ctx: &Context) -> Result<()> {
    ctx.auth.borrow().backend().ensure_configured()
}

fn parse_ticks(s: &str) -> Result<u32> {
    match s.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => bail!("Invalid refresh count '{}'. Use a number of at least 1", s),
    }
}

fn parse_interval(s: &str) -> Result<RefreshInterval> {
    match RefreshInterval::from_str(s) {
        Some(interval) => Ok(interval),
        None => bail!("Invalid interval '{}'. Use: off, 30, 60, 300", s),
    }
}

fn login(ctx: &Context, venue_id: &str, product_key: &str) -> bool {
    let outcome = ctx.auth.borrow_mut().authenticate(venue_id, product_key);
    let notice = outcome.notice();
    match notice.kind {
        NoticeKind::Success => println!("{}", notice),
        NoticeKind::Error => eprintln!("{}", notice),
    }
    if outcome.is_success() {
        *ctx.venue_override.borrow_mut() = None;
    }
    outcome.is_success()
}

fn logout(ctx: &Context) {
    let notice = ctx.auth.borrow_mut().logout();
    println!("{}", notice);
}

fn print_status(ctx: &Context) {
    let auth = ctx.auth.borrow();
    let Some(session) = auth.session() else {
        println!("Not authenticated");
        if ctx.debug {
            eprintln!("[DEBUG] State dir: {}", ctx.state_dir.display());
        }
        return;
    };

    println!("Authenticated: {}", session.venue.name);
    println!("  Venue ID:     {}", session.venue.id);
    let location = session.venue.location();
    if !location.is_empty() {
        println!("  Location:     {}", location);
    }
    if let Some(model) = &session.venue.machine_model {
        println!("  Model:        {}", model);
    }
    if let Some(serial) = &session.venue.serial_number {
        println!("  Serial:       {}", serial);
    }
    println!("  Product:      {}", session.auth.product_id);
    println!("  Access level: {}", session.auth.access_level);
    match &session.auth.expires_at {
        Some(expires) if session.auth.is_expired_at(Utc::now()) => {
            println!("  Expires:      {} (expired, the server will reject privileged calls)", expires)
        }
        Some(expires) => println!("  Expires:      {}", expires),
        None => println!("  Expires:      never"),
    }
}

fn print_venues(ctx: &Context) {
    let venues = ctx.auth.borrow().list_active_venues();
    print_venue_table(&venues);
}

fn print_venue_table(venues: &[VenueInfo]) {
    if venues.is_empty() {
        println!("No active venues.");
        return;
    }
    println!("Active venues:");
    for v in venues {
        let serial = v.serial_number.as_deref().unwrap_or("-");
        println!("  {}  {} ({}) [{}]", v.id, v.name, v.location(), serial);
    }
}

fn detect_venue(ctx: &Context, override_id: Option<&str>) {
    if let Some(id) = override_id {
        *ctx.venue_override.borrow_mut() = Some(id.to_string());
    }
    let override_id = ctx
        .venue_override
        .borrow()
        .clone()
        .or_else(|| ctx.config.machine.venue.clone());

    let auth = ctx.auth.borrow();
    match venue::detect_venue(auth.session(), override_id.as_deref(), &ctx.venue_store) {
        Some(detected) => println!("Venue: {} (from {})", detected.id, detected.source.as_str()),
        None => println!("No venue detected, all active games are shown"),
    }
}

fn watch(ctx: &Context, interval: RefreshInterval, ticks: Option<u32>) {
    let clock = SystemClock::new();
    let mut stderr = std::io::stderr();
    watch_loop(
        &clock,
        interval,
        ticks,
        std::thread::sleep,
        |n| {
            let _ = write!(stderr, "\rNext refresh in {}s   ", n);
            let _ = stderr.flush();
        },
        || {
            eprint!("\r");
            println!("[{}]", chrono::Local::now().format("%H:%M:%S"));
            print_venues(ctx);
        },
    );
}

/// Refresh once, then again every time the interval elapses.
///
/// Stops after `max_refreshes` refreshes (including the first); runs until
/// interrupted when unbounded. An `Off` interval refreshes once.
/// Returns the number of refreshes performed.
pub fn watch_loop<C: Clock>(
    clock: &C,
    interval: RefreshInterval,
    max_refreshes: Option<u32>,
    mut sleep: impl FnMut(Duration),
    mut countdown: impl FnMut(u64),
    mut refresh: impl FnMut(),
) -> u32 {
    let mut scheduler = Scheduler::new();
    scheduler.add(WATCH_TASK, interval);

    refresh();
    let mut done = 1;
    if max_refreshes.is_some_and(|max| done >= max) || !scheduler.start(WATCH_TASK, clock.now())
    {
        return done;
    }

    while scheduler.is_running(WATCH_TASK) {
        if let Some(n) = scheduler
            .task(WATCH_TASK)
            .and_then(|t| t.countdown(clock.now()))
        {
            countdown(n);
        }
        sleep(Duration::from_secs(1));

        if !scheduler.due(clock.now()).is_empty() {
            refresh();
            done += 1;
            if max_refreshes.is_some_and(|max| done >= max) {
                scheduler.stop(WATCH_TASK);
            }
        }
    }
    scheduler.stop_all();
    done
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ManualClock;

    #[test]
    fn test_watch_loop_refreshes_on_interval() {
        let clock = ManualClock::new();
        let mut slept = 0u64;
        let mut countdowns = Vec::new();
        let mut refreshes = 0;

        let sleeper = clock.clone();
        let done = watch_loop(
            &clock,
            RefreshInterval::Secs30,
            Some(3),
            |d| {
                slept += d.as_secs();
                sleeper.advance(d);
            },
            |n| countdowns.push(n),
            || refreshes += 1,
        );

        assert_eq!(done, 3);
        assert_eq!(refreshes, 3);
        assert_eq!(slept, 60);
        assert_eq!(countdowns.first(), Some(&30));
        assert_eq!(countdowns[29], 1);
        assert_eq!(countdowns[30], 30);
        assert_eq!(countdowns.len(), 60);
    }

    #[test]
    fn test_watch_loop_off_refreshes_once() {
        let clock = ManualClock::new();
        let mut refreshes = 0;
        let done = watch_loop(
            &clock,
            RefreshInterval::Off,
            None,
            |_| panic!("should not sleep"),
            |_| {},
            || refreshes += 1,
        );
        assert_eq!(done, 1);
        assert_eq!(refreshes, 1);
    }

    #[test]
    fn test_watch_loop_single_refresh_limit() {
        let clock = ManualClock::new();
        let done = watch_loop(
            &clock,
            RefreshInterval::Secs60,
            Some(1),
            |_| panic!("should not sleep"),
            |_| {},
            || {},
        );
        assert_eq!(done, 1);
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("300").unwrap(), RefreshInterval::Secs300);
        let err = parse_interval("7").unwrap_err();
        assert!(err.to_string().contains("off, 30, 60, 300"));
    }

    #[test]
    fn test_parse_ticks_rejects_zero() {
        assert_eq!(parse_ticks("5").unwrap(), 5);
        assert!(parse_ticks("0").is_err());
        assert!(parse_ticks("-1").is_err());
    }

    #[test]
    fn test_watch_subcommand_rejects_zero_ticks() {
        use crate::Args;
        use clap::Parser;

        assert!(Args::try_parse_from(["kiosk", "watch", "--ticks", "0"]).is_err());
        let args = Args::try_parse_from(["kiosk", "watch", "--ticks", "2"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Command::Watch { ticks: Some(2), .. })
        ));
    }
}
