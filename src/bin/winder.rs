//! Operator console for the pickup winder
//!
//! Run with: cargo run --bin winder -- --port 3
//! or without hardware: cargo run --bin winder -- --simulate

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::{select, unbounded, Receiver, RecvTimeoutError};
use gethostname::gethostname;
use pickup_winder::config_loader::{self, WinderSettings, DEFAULT_CONFIG_FILE};
use pickup_winder::sim::SimulatedFirmware;
use pickup_winder::{PortSelector, SerialTransport, Speed, Transport, Winder};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

type SharedWinder = Arc<Winder<Box<dyn Transport>>>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Control the hexaphonic pickup winder", long_about = None)]
struct Args {
    /// Serial port index (e.g. 3 for COM3), device path, or "auto"
    #[arg(long)]
    port: Option<String>,
    /// Settings file; missing file means defaults
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Use the built-in firmware simulator instead of a serial port
    #[arg(long, default_value_t = false)]
    simulate: bool,
    /// Seconds to let the motor run before stopping on exit
    #[arg(long)]
    close_wait: Option<f64>,
}

fn open_winder(settings: &WinderSettings, simulate: bool) -> Result<SharedWinder> {
    let transport: Box<dyn Transport> = if simulate {
        println!("Using simulated firmware");
        Box::new(SimulatedFirmware::new())
    } else {
        println!("Connecting to winder on {} at {} baud", settings.port, settings.link.baud_rate);
        Box::new(SerialTransport::open(&settings.port, &settings.link)?)
    };
    Ok(Arc::new(Winder::with_config(transport, settings.winder.clone())))
}

/// Background rev count polling for watch mode
struct Watcher {
    stop: crossbeam_channel::Sender<()>,
    handle: JoinHandle<()>,
}

impl Watcher {
    fn start(winder: SharedWinder, label: Arc<AtomicI64>, interval: Duration) -> Self {
        let (stop, stop_rx) = unbounded::<()>();
        let handle = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => match winder.get_rev_count() {
                    Ok(count) => {
                        label.store(count, Ordering::SeqCst);
                        println!("[{}] revs: {}", chrono::Local::now().format("%H:%M:%S"), count);
                    }
                    Err(e) => {
                        log::warn!("Rev count poll failed: {}", e);
                        if !winder.is_open() {
                            break;
                        }
                    }
                },
                _ => break,
            }
        });
        Self { stop, handle }
    }

    fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            log::error!("Watch thread panicked");
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  e        enable motor");
    println!("  d        disable motor");
    println!("  s <rps>  set speed (0-{})", Speed::MAX_OPERATING);
    println!("  c        read revolution count");
    println!("  r        reset counter");
    println!("  w        toggle rev count watch");
    println!("  q        quit");
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break; };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Speed argument of the `s` command, within the speed slider's range
fn parse_speed(arg: Option<&str>) -> Result<u32> {
    let rps: u32 = arg
        .ok_or_else(|| anyhow!("usage: s <rps>"))?
        .parse()
        .context("speed must be a whole number")?;
    if rps > u32::from(Speed::MAX_OPERATING) {
        return Err(anyhow!("speed must be 0-{}", Speed::MAX_OPERATING));
    }
    Ok(rps)
}

fn handle_line(
    winder: &SharedWinder,
    line: &str,
    label: &Arc<AtomicI64>,
    watcher: &mut Option<Watcher>,
    poll_interval: Duration,
) -> Result<bool> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else { return Ok(true); };
    match cmd {
        "e" => println!("Enable motor ... {}", winder.enable_motor(true)?),
        "d" => println!("Disable motor ... {}", winder.enable_motor(false)?),
        "s" => {
            let rps = parse_speed(parts.next())?;
            println!("Set speed [rps]: {} ... {}", rps, winder.set_speed(rps)?);
        }
        "c" => {
            let count = winder.get_rev_count()?;
            label.store(count, Ordering::SeqCst);
            println!("Counter: {}", count);
        }
        "r" => {
            // Display label only; the firmware clears its own counter
            label.store(0, Ordering::SeqCst);
            println!("Reset counter ... {}", winder.reset_rev_counter()?);
        }
        "w" => match watcher.take() {
            Some(w) => {
                w.stop();
                println!("Watch off (last count {})", label.load(Ordering::SeqCst));
            }
            None => {
                *watcher = Some(Watcher::start(Arc::clone(winder), Arc::clone(label), poll_interval));
                println!("Watch on, every {:?}", poll_interval);
            }
        },
        "q" | "quit" | "exit" => return Ok(false),
        "h" | "help" | "?" => print_help(),
        other => println!("Unknown command '{}', type h for help", other),
    }
    Ok(true)
}

fn run_console(winder: &SharedWinder, poll_interval: Duration) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = unbounded::<()>();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    let lines = spawn_stdin_reader();
    let label = Arc::new(AtomicI64::new(0));
    let mut watcher: Option<Watcher> = None;

    print_help();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let keep_going = select! {
            recv(lines) -> line => match line {
                Ok(line) => match handle_line(winder, &line, &label, &mut watcher, poll_interval) {
                    Ok(keep_going) => keep_going,
                    Err(e) => {
                        println!("Error: {:#}", e);
                        true
                    }
                },
                // stdin closed
                Err(_) => false,
            },
            recv(shutdown_rx) -> _ => {
                println!();
                false
            }
        };
        if !keep_going {
            break;
        }
    }

    if let Some(w) = watcher.take() {
        w.stop();
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let hostname = gethostname().to_string_lossy().to_string();
    let mut settings = config_loader::load_settings(&args.config, &hostname)?;
    if let Some(port) = &args.port {
        settings.port = PortSelector::parse(port);
    }

    let close_wait = match args.close_wait {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .map_err(|e| anyhow!("--close-wait {}: {}", secs, e))?,
        None => settings.close_wait,
    };

    let winder = open_winder(&settings, args.simulate)?;
    let result = run_console(&winder, settings.poll_interval);

    println!("Closing connection ...");
    let closed = winder.close(close_wait).context("Failed to close winder connection");
    finish(result, closed)
}

/// Session error wins; a close error behind it is still logged.
fn finish(result: Result<()>, closed: Result<()>) -> Result<()> {
    match (result, closed) {
        (Err(e), Err(close_err)) => {
            log::error!("{:#}", close_err);
            Err(e)
        }
        (result, closed) => result.and(closed),
    }
}
