use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use deckmon_monitor::{ConnectionMonitor, MonitorConfig, MonitorTiming};
use deckmon_radio::sim::{SimBehavior, SimRadio};
use deckmon_radio::{RadioConfig, RadioDriver, RadioEndpoint};
use deckmon_serial::discover::{discover_serial_endpoints, SerialEndpoint};
use deckmon_serial::link::SystemOpener;
use deckmon_serial::{default_allowlist, doctor as serial_doctor, SerialConfig, DEFAULT_BAUD};

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "deckmon",
    version,
    about = "Connection monitor for a dev board wired to a quad breakout deck"
)]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config without touching any hardware.
    Doctor,
    /// List radio endpoints and serial candidates matching the allow-list.
    Scan,
    /// Connect both links and run the poll loop plus interactive shell.
    Run,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    radio: RadioConfig,
    serial: SerialConfig,
    monitor: Option<MonitorConfig>,
    log: Option<LogConfig>,
}

#[derive(Debug, serde::Deserialize)]
struct LogConfig {
    /// Append-only activity log. Timestamped text lines, no rotation.
    file: Option<String>,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    Ok(toml::from_str(&s).context("parse config toml")?)
}

fn init_logging(log: &Option<LogConfig>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let file = match log.as_ref().and_then(|l| l.file.as_ref()) {
        Some(path) => Some(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open activity log {}", path))?,
        ),
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(stderr_layer);
    match file {
        Some(f) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(f)),
            )
            .init(),
        None => registry.init(),
    }
    Ok(())
}

fn build_radio(cfg: &RadioConfig) -> Result<Box<dyn RadioDriver>> {
    match cfg.driver.as_str() {
        "sim" => Ok(Box::new(SimRadio::new(SimBehavior::default()))),
        other => anyhow::bail!(
            "unknown radio.driver: {} (hardware dongle drivers plug in via the RadioDriver trait)",
            other
        ),
    }
}

fn timing_from(cfg: &Config) -> MonitorTiming {
    let mut t = MonitorTiming::default();
    if let Some(ms) = cfg.radio.connect_timeout_ms {
        t.radio_connect = Duration::from_millis(ms);
    }
    if let Some(ms) = cfg.serial.probe_timeout_ms {
        t.serial_probe = Duration::from_millis(ms);
    }
    if let Some(m) = &cfg.monitor {
        if let Some(ms) = m.poll_period_ms {
            t.poll_period = Duration::from_millis(ms);
        }
        if let Some(ms) = m.power_settle_ms {
            t.power_settle = Duration::from_millis(ms);
        }
    }
    t
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;
    init_logging(&cfg.log)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg),
        Command::Scan => scan(&cfg),
        Command::Run => run(&cfg).await,
    }
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    let allowlist = cfg.serial.allowlist.clone().unwrap_or_else(default_allowlist);
    serial_doctor::check_serial_config(
        cfg.serial.baud,
        &allowlist,
        cfg.serial.probe_timeout_ms.unwrap_or(1000),
    )?;

    anyhow::ensure!(cfg.radio.driver == "sim", "radio.driver unknown: {}", cfg.radio.driver);
    let connect_ms = cfg.radio.connect_timeout_ms.unwrap_or(10_000);
    anyhow::ensure!(
        (1_000..=60_000).contains(&connect_ms),
        "radio.connect_timeout_ms should be 1000..60000"
    );

    if let Some(m) = &cfg.monitor {
        let period = m.poll_period_ms.unwrap_or(2000);
        anyhow::ensure!(
            (250..=60_000).contains(&period),
            "monitor.poll_period_ms should be 250..60000"
        );
    }

    if let Some(path) = cfg.log.as_ref().and_then(|l| l.file.as_ref()) {
        let p = std::path::Path::new(path);
        if let Some(dir) = p.parent() {
            if !dir.as_os_str().is_empty() {
                anyhow::ensure!(dir.is_dir(), "log.file directory missing: {}", dir.display());
            }
        }
    }

    info!("doctor: OK");
    Ok(())
}

fn scan(cfg: &Config) -> Result<()> {
    let mut radio = build_radio(&cfg.radio).context("radio driver init")?;
    let radios = radio.scan().context("radio scan")?;
    if radios.is_empty() {
        println!("radio endpoints: none");
    } else {
        println!("radio endpoints:");
        for ep in &radios {
            println!("  {}", ep.uri);
        }
    }

    let allowlist = cfg.serial.allowlist.clone().unwrap_or_else(default_allowlist);
    let serials = discover_serial_endpoints(&allowlist)?;
    if serials.is_empty() {
        println!("serial candidates: none");
    } else {
        println!("serial candidates:");
        for ep in &serials {
            println!("  {}: {}", ep.port, ep.description);
        }
    }
    Ok(())
}

async fn run(cfg: &Config) -> Result<()> {
    // Driver init is the one fatal startup error; everything after this
    // degrades to log lines and a usable shell.
    let radio = build_radio(&cfg.radio).context("radio driver init (fatal)")?;

    let timing = timing_from(cfg);
    let poll_period = timing.poll_period;
    let mut mon = ConnectionMonitor::new(radio, Box::new(SystemOpener), timing);

    let radio_ep = match &cfg.radio.uri {
        Some(uri) => Some(RadioEndpoint { uri: uri.clone() }),
        None => {
            let found = mon.scan_radio().context("radio scan")?;
            info!("found {} radio endpoint(s)", found.len());
            found.into_iter().next()
        }
    };
    match radio_ep {
        Some(ep) => {
            if !mon.connect_radio(&ep) {
                warn!("radio connect failed; check the dongle and quad power, then rerun");
            }
        }
        None => warn!("no radio endpoints found"),
    }

    let allowlist = cfg.serial.allowlist.clone().unwrap_or_else(default_allowlist);
    let baud = if cfg.serial.baud > 0 { cfg.serial.baud } else { DEFAULT_BAUD };
    let serial_ep = match &cfg.serial.port {
        Some(port) => Some(SerialEndpoint {
            port: port.clone(),
            description: "configured port".into(),
        }),
        None => {
            let found = discover_serial_endpoints(&allowlist)?;
            info!("found {} serial candidate(s)", found.len());
            found.into_iter().next()
        }
    };
    match serial_ep {
        Some(ep) => {
            if !mon.connect_serial(&ep, baud) {
                warn!("serial connect failed; check the USB cable and that the sketch is flashed");
            }
        }
        None => warn!("no serial candidates matched the allow-list"),
    }

    let mon = Arc::new(Mutex::new(mon));
    let status = mon.lock().unwrap().status_handle();
    let running = Arc::new(AtomicBool::new(true));

    let poll_mon = mon.clone();
    let poll_running = running.clone();
    let poll = tokio::task::spawn_blocking(move || {
        while poll_running.load(Ordering::Relaxed) {
            poll_mon.lock().unwrap().poll_once();
            info!("status: {}", status.lock().unwrap().summary());
            std::thread::sleep(poll_period);
        }
    });

    let shell_mon = mon.clone();
    tokio::task::spawn_blocking(move || shell_loop(shell_mon))
        .await
        .context("shell task")?;

    running.store(false, Ordering::Relaxed);
    poll.await.context("poll task")?;
    mon.lock().unwrap().shutdown();
    Ok(())
}

fn shell_loop(mon: Arc<Mutex<ConnectionMonitor>>) {
    println!("commands: help, test, power, send <cmd>, status, quit");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => return, // EOF
            Ok(_) => {}
        }

        let line = line.trim();
        match line {
            "" => {}
            "quit" | "exit" => return,
            "help" => {
                println!("  help        show this help");
                println!("  test        run the power connection test");
                println!("  power       send POWER_TEST to the board");
                println!("  send <cmd>  raw command passthrough");
                println!("  status      print the current link status");
                println!("  quit        exit");
            }
            "test" => {
                let ok = mon.lock().unwrap().test_power_connection();
                println!("power test: {}", if ok { "OK" } else { "FAILED" });
            }
            "power" => {
                let res = mon.lock().unwrap().send_command("POWER_TEST");
                if !res.succeeded {
                    println!("send failed: {:?}", res.error);
                }
            }
            "status" => {
                println!("{}", mon.lock().unwrap().status_snapshot().summary());
            }
            other => {
                if let Some(cmd) = other.strip_prefix("send ") {
                    let res = mon.lock().unwrap().send_command(cmd);
                    if !res.succeeded {
                        println!("send failed: {:?}", res.error);
                    }
                } else {
                    println!("unknown command: {} (try help)", other);
                }
            }
        }
    }
}
