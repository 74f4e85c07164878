//! Run command - start the gateway in the foreground
//!
//! Publishes are written to stdout as JSON lines. Commands are read from
//! stdin, one JSON object per line, and each gets a JSON response line:
//!
//! ```text
//! {"deviceId":"led","valueId":"state","action":"set","payload":true}
//! {"success":true}
//! ```
//!
//! Each device gets its own command worker, so a command that blocks (a
//! camera warm-up, a contended bus) only holds back later commands for the
//! same device. Responses are written as they complete.

use anyhow::{Context, Result};
use colored::*;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use pinode_core::{
    ChannelPublisher, Command, CommandDispatcher, CommandResponse, PinodeError, PublishMessage,
};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const IDLE_POLL: Duration = Duration::from_millis(100);

pub fn execute_run(config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path.as_deref()).context("loading gateway config")?;
    let (publisher, updates) = ChannelPublisher::new();
    let mut gateway = pinode_library::build_gateway(&config, Arc::new(publisher))
        .context("building devices")?;
    gateway.start().context("starting gateway")?;
    eprintln!(
        "{} Gateway running with {} device(s). Press Ctrl+C to stop.",
        "[OK]".green(),
        gateway.device_ids().len()
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("installing Ctrl+C handler")?;

    let printer = {
        let running = running.clone();
        thread::Builder::new()
            .name("publish-printer".to_string())
            .spawn(move || print_updates(updates, &running))?
    };

    let (response_tx, responses) = channel::unbounded();
    thread::Builder::new()
        .name("response-writer".to_string())
        .spawn(move || write_responses(responses))?;

    let router = CommandRouter::new(gateway.dispatcher(), response_tx);
    // Blocks on stdin, so it is never joined; the process exits around it
    thread::Builder::new()
        .name("command-reader".to_string())
        .spawn(move || read_commands(router))?;

    while running.load(Ordering::SeqCst) {
        thread::sleep(IDLE_POLL);
    }

    eprintln!("\n{}", "Shutting down gateway...".yellow());
    let report = gateway.stop();
    if printer.join().is_err() {
        log::error!("Publish printer panicked");
    }
    if report.is_clean() {
        eprintln!("{} Gateway stopped", "[OK]".green());
    } else {
        if !report.drained {
            eprintln!("{} In-flight polls were abandoned", "[WARN]".yellow());
        }
        for id in &report.abandoned {
            eprintln!("{} Device '{}' did not shut down in time", "[WARN]".yellow(), id);
        }
    }
    Ok(())
}

fn print_updates(updates: Receiver<PublishMessage>, running: &AtomicBool) {
    let stdout = io::stdout();
    loop {
        match updates.recv_timeout(IDLE_POLL) {
            Ok(message) => match format_update(&message) {
                Ok(line) => {
                    let mut out = stdout.lock();
                    let _ = writeln!(out, "{}", line);
                    let _ = out.flush();
                }
                Err(e) => log::warn!("Cannot encode update: {}", e),
            },
            Err(RecvTimeoutError::Timeout) if running.load(Ordering::SeqCst) => {}
            Err(_) => break,
        }
    }
}

fn read_commands(mut router: CommandRouter) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::warn!("Reading commands stopped: {}", e);
                break;
            }
        };
        router.submit(&line);
    }
    log::debug!("Command input closed");
}

fn write_responses(responses: Receiver<String>) {
    for response in responses.iter() {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{}", response);
        let _ = out.flush();
    }
}

// ============================================================================
// Command routing
// ============================================================================

/// Hands each parsed command to a worker thread for its device
pub struct CommandRouter {
    dispatcher: CommandDispatcher,
    responses: Sender<String>,
    workers: HashMap<String, Sender<Command>>,
}

impl CommandRouter {
    pub fn new(dispatcher: CommandDispatcher, responses: Sender<String>) -> Self {
        Self {
            dispatcher,
            responses,
            workers: HashMap::new(),
        }
    }

    /// Route one input line. Blank lines are ignored; lines that do not parse
    /// are answered immediately.
    pub fn submit(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let command = match serde_json::from_str::<Command>(line) {
            Ok(command) => command,
            Err(e) => {
                let response = CommandResponse::failed(&PinodeError::from(e));
                send_response(&self.responses, &response);
                return;
            }
        };

        let device_id = command.device_id.clone();
        let command = match self.workers.get(&device_id) {
            Some(worker) => match worker.send(command) {
                Ok(()) => return,
                // Worker is gone, start a fresh one below
                Err(e) => e.into_inner(),
            },
            None => command,
        };
        match self.spawn_worker(&device_id) {
            Ok(worker) => {
                let _ = worker.send(command);
                self.workers.insert(device_id, worker);
            }
            Err(e) => {
                log::error!("No command worker for '{}': {}", device_id, e);
                send_response(&self.responses, &self.dispatcher.handle(&command));
            }
        }
    }

    fn spawn_worker(&self, device_id: &str) -> io::Result<Sender<Command>> {
        let (tx, rx) = channel::unbounded::<Command>();
        let dispatcher = self.dispatcher.clone();
        let responses = self.responses.clone();
        thread::Builder::new()
            .name(format!("commands-{}", device_id))
            .spawn(move || {
                for command in rx.iter() {
                    send_response(&responses, &dispatcher.handle(&command));
                }
            })?;
        Ok(tx)
    }
}

fn send_response(responses: &Sender<String>, response: &CommandResponse) {
    // CommandResponse only holds plain values, encoding cannot fail
    if let Ok(line) = serde_json::to_string(response) {
        let _ = responses.send(line);
    }
}

/// One publish as a JSON line
pub fn format_update(message: &PublishMessage) -> Result<String, PinodeError> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinode_core::{DeviceConfig, GatewayConfig, MemoryPublisher, Value};
    use std::time::Instant;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(2);

    fn gateway(home: &TempDir, warmup_ms: i64) -> pinode_core::Gateway {
        let mut config = GatewayConfig::new();
        config.gateway.gpio.board_mode = pinode_core::BoardMode::Bcm;
        config.gateway.home_dir = home.path().to_path_buf();
        config.add_device("led", DeviceConfig::gpio("gpio_output", 18));
        config.add_device(
            "cam",
            DeviceConfig::new("camera").with_option("warmup_ms", warmup_ms),
        );
        let mut gateway =
            pinode_library::build_gateway(&config, Arc::new(MemoryPublisher::new())).unwrap();
        gateway.start().unwrap();
        gateway
    }

    #[test]
    fn test_submit_answers_every_command() {
        let home = TempDir::new().unwrap();
        let mut gateway = gateway(&home, 0);
        let (tx, responses) = channel::unbounded();
        let mut router = CommandRouter::new(gateway.dispatcher(), tx);

        router.submit(r#"{"deviceId":"led","valueId":"state","action":"set","payload":true}"#);
        assert_eq!(responses.recv_timeout(WAIT).unwrap(), r#"{"success":true}"#);

        router.submit(r#"{"deviceId":"led","valueId":"state","action":"get"}"#);
        assert_eq!(
            responses.recv_timeout(WAIT).unwrap(),
            r#"{"success":true,"result":true}"#
        );

        router.submit(r#"{"deviceId":"lamp","valueId":"state"}"#);
        let response = responses.recv_timeout(WAIT).unwrap();
        assert!(response.contains(r#""success":false"#));
        assert!(response.contains("Unknown device"));

        router.submit("not json");
        assert!(responses
            .recv_timeout(WAIT)
            .unwrap()
            .contains(r#""success":false"#));

        router.submit("   ");
        assert!(responses.recv_timeout(Duration::from_millis(100)).is_err());
        gateway.stop();
    }

    #[test]
    fn test_camera_warmup_does_not_hold_back_other_devices() {
        let home = TempDir::new().unwrap();
        let mut gateway = gateway(&home, 600);
        let (tx, responses) = channel::unbounded();
        let mut router = CommandRouter::new(gateway.dispatcher(), tx);

        let start = Instant::now();
        router.submit(r#"{"deviceId":"cam","valueId":"snapshot","action":"run"}"#);
        router.submit(r#"{"deviceId":"led","valueId":"state","action":"get"}"#);

        let first = responses.recv_timeout(WAIT).unwrap();
        assert_eq!(first, r#"{"success":true,"result":false}"#);
        assert!(start.elapsed() < Duration::from_millis(300));

        let second = responses.recv_timeout(WAIT).unwrap();
        assert!(second.contains(r#""success":true"#), "{}", second);
        assert!(start.elapsed() >= Duration::from_millis(600));
        gateway.stop();
    }

    #[test]
    fn test_commands_for_one_device_keep_their_order() {
        let home = TempDir::new().unwrap();
        let mut gateway = gateway(&home, 0);
        let (tx, responses) = channel::unbounded();
        let mut router = CommandRouter::new(gateway.dispatcher(), tx);

        for payload in ["true", "false", "true"] {
            router.submit(&format!(
                r#"{{"deviceId":"led","valueId":"state","action":"set","payload":{}}}"#,
                payload
            ));
            router.submit(r#"{"deviceId":"led","valueId":"state","action":"get"}"#);
        }
        let answers: Vec<String> = (0..6)
            .map(|_| responses.recv_timeout(WAIT).unwrap())
            .collect();
        assert_eq!(answers[1], r#"{"success":true,"result":true}"#);
        assert_eq!(answers[3], r#"{"success":true,"result":false}"#);
        assert_eq!(answers[5], r#"{"success":true,"result":true}"#);
        gateway.stop();
    }

    #[test]
    fn test_format_update() {
        let message = PublishMessage::now("baro", "pressure", Value::Int(69962));
        let line = format_update(&message).unwrap();
        assert!(line.contains(r#""deviceId":"baro""#));
        assert!(line.contains(r#""valueId":"pressure""#));
        assert!(line.contains(r#""value":69962"#));
        assert!(line.contains(r#""timestamp""#));
    }
}
