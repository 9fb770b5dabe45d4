//! rxchain - receiver service entry point
//!
//! Loads the device configuration, starts always-on devices and accepts line
//! commands on stdin until `quit` or end of input.

use anyhow::Context;
use rxchain::{
    config::{default_config_path, LoggingConfig, ReceiverConfig},
    device::{ClientClass, LoggingClient, SessionClient},
    Receiver,
};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const HELP: &str = "\
commands:
  status                     list devices
  attach <device> [user|background]
  detach <device>
  profile <device> <profile>
  freq <device> <hz>
  enable <device>
  disable <device>
  quit";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Status,
    Attach { device: String, class: ClientClass },
    Detach { device: String },
    Profile { device: String, profile: String },
    Freq { device: String, freq: u64 },
    Enable { device: String },
    Disable { device: String },
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Option<Self>, String> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let device = |i: usize| {
            words
                .get(i)
                .map(|w| w.to_string())
                .ok_or_else(|| "missing device id".to_string())
        };
        let command = match words.first() {
            None => return Ok(None),
            Some(&"status") => Command::Status,
            Some(&"attach") => {
                let class = match words.get(2) {
                    None | Some(&"user") => ClientClass::User,
                    Some(&"background") => ClientClass::Background,
                    Some(other) => return Err(format!("unknown client class '{}'", other)),
                };
                Command::Attach { device: device(1)?, class }
            }
            Some(&"detach") => Command::Detach { device: device(1)? },
            Some(&"profile") => Command::Profile {
                device: device(1)?,
                profile: words.get(2).ok_or("missing profile id")?.to_string(),
            },
            Some(&"freq") => {
                let freq = words.get(2).ok_or("missing frequency")?;
                Command::Freq {
                    device: device(1)?,
                    freq: freq.parse().map_err(|_| format!("invalid frequency '{}'", freq))?,
                }
            }
            Some(&"enable") => Command::Enable { device: device(1)? },
            Some(&"disable") => Command::Disable { device: device(1)? },
            Some(&"help") => Command::Help,
            Some(&"quit") | Some(&"exit") => Command::Quit,
            Some(other) => return Err(format!("unknown command '{}'", other)),
        };
        Ok(Some(command))
    }
}

struct Repl {
    receiver: Receiver,
    attached: HashMap<String, Vec<Arc<dyn SessionClient>>>,
}

impl Repl {
    /// Run one command; returns `false` on quit.
    fn execute(&mut self, command: Command) -> anyhow::Result<bool> {
        match command {
            Command::Status => {
                for status in self.receiver.status() {
                    println!("{}", serde_json::to_string(&status)?);
                }
            }
            Command::Attach { device, class } => {
                let session = self.session(&device)?;
                let label = format!("console-{}-{}", device, self.attached.get(&device).map_or(0, Vec::len));
                let client: Arc<dyn SessionClient> = Arc::new(LoggingClient::new(label, class));
                session.add_client(client.clone());
                self.attached.entry(device).or_default().push(client);
                println!("{}", session.display_state());
            }
            Command::Detach { device } => {
                let session = self.session(&device)?;
                match self.attached.get_mut(&device).and_then(Vec::pop) {
                    Some(client) => {
                        session.remove_client(&client);
                        println!("{}", session.display_state());
                    }
                    None => println!("no console client attached to {}", device),
                }
            }
            Command::Profile { device, profile } => {
                if !self.session(&device)?.activate_profile(&profile) {
                    println!("unknown profile {}", profile);
                }
            }
            Command::Freq { device, freq } => self.session(&device)?.set_center_freq(freq),
            Command::Enable { device } => self.session(&device)?.set_enabled(true),
            Command::Disable { device } => self.session(&device)?.set_enabled(false),
            Command::Help => println!("{}", HELP),
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn session(&self, id: &str) -> anyhow::Result<Arc<rxchain::DeviceSession>> {
        self.receiver
            .session(id)
            .with_context(|| format!("no device '{}'", id))
    }
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(std::path::Path::new("."));
            let name = path
                .file_name()
                .context("log file path has no file name")?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(guard)
}

fn config_path() -> Option<PathBuf> {
    std::env::args_os().nth(1).map(PathBuf::from).or_else(default_config_path)
}

fn main() -> anyhow::Result<()> {
    let path = config_path();
    let config = match &path {
        Some(path) if path.exists() => ReceiverConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        _ => ReceiverConfig::default(),
    };
    let _guard = init_logging(&config.logging)?;

    match &path {
        Some(path) => tracing::info!("Configuration: {}", path.display()),
        None => tracing::info!("No configuration directory, running without devices"),
    }

    let receiver = Receiver::new(config).context("building receiver")?;
    let running = receiver.start();
    tracing::info!("{} always-on devices running", running);

    let mut repl = Repl {
        receiver,
        attached: HashMap::new(),
    };
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        match Command::parse(&line) {
            Ok(Some(command)) => match repl.execute(command) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => println!("error: {:#}", e),
            },
            Ok(None) => {}
            Err(e) => println!("{} (try 'help')", e),
        }
    }

    tracing::info!("Shutting down");
    repl.receiver.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert_eq!(Command::parse("status").unwrap(), Some(Command::Status));
        assert_eq!(
            Command::parse("attach rtl background").unwrap(),
            Some(Command::Attach {
                device: "rtl".into(),
                class: ClientClass::Background
            })
        );
        assert_eq!(
            Command::parse("attach rtl").unwrap(),
            Some(Command::Attach {
                device: "rtl".into(),
                class: ClientClass::User
            })
        );
        assert_eq!(
            Command::parse("freq rtl 145000000").unwrap(),
            Some(Command::Freq {
                device: "rtl".into(),
                freq: 145_000_000
            })
        );
        assert_eq!(Command::parse("quit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse("freq rtl abc").is_err());
        assert!(Command::parse("attach").is_err());
        assert!(Command::parse("attach rtl sometimes").is_err());
        assert!(Command::parse("profile rtl").is_err());
        assert!(Command::parse("launch").is_err());
    }
}
