//! Interactive operator console for a botpit server.
//!
//! Local commands: `connect`, `disconnect`, `set-ip [-s] <ip>`,
//! `set-port [-s] <port>` (`-s` persists the address to the state file).
//! Anything else is sent to the server as a `command` message and its report
//! is printed.

use std::io::Write as _;
use std::path::PathBuf;

use md5::{Digest, Md5};
use pitio::JsonSocket;
use pitproto::{self as proto, Message};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

type Input = Lines<BufReader<Stdin>>;

fn usage_and_exit() -> ! {
    eprintln!(
        "pitctl (botpit operator console)\n\n\
USAGE:\n  pitctl [--state PATH]\n\n\
ENV:\n  PITCTL_STATE  default pitctl.conf\n\n\
CONSOLE COMMANDS:\n  connect | disconnect | set-ip [-s] IP | set-port [-s] PORT | <server command> [args...]\n"
    );
    std::process::exit(2);
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    ip: String,
    port: u16,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: 7121,
        }
    }
}

impl StateFile {
    fn load(path: &PathBuf) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, path: &PathBuf) -> anyhow::Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

struct Console {
    state_path: PathBuf,
    ip: String,
    port: u16,
    conn: Option<JsonSocket>,
}

/// Empty password maps to the all-zero token; anything else to its MD5 hex
/// digest, which is exactly the 32 characters the server expects.
fn password_token(password: &str) -> String {
    if password.is_empty() {
        return "0".repeat(32);
    }
    let digest = Md5::digest(password.as_bytes());
    hex_lower(&digest)
}

fn hex_lower(b: &[u8]) -> String {
    const LUT: &[u8; 16] = b"0123456789abcdef";
    let mut s = String::with_capacity(b.len() * 2);
    for &x in b {
        s.push(LUT[(x >> 4) as usize] as char);
        s.push(LUT[(x & 0x0f) as usize] as char);
    }
    s
}

fn render_args(args: &[Value]) -> String {
    serde_json::to_string(args).unwrap_or_else(|_| "<unprintable>".to_string())
}

impl Console {
    fn new(state_path: PathBuf) -> anyhow::Result<Self> {
        let state = StateFile::load(&state_path)?;
        Ok(Self {
            state_path,
            ip: state.ip,
            port: state.port,
            conn: None,
        })
    }

    async fn handle_line(&mut self, input: &mut Input, line: &str) -> anyhow::Result<()> {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return Ok(());
        };
        let rest: Vec<&str> = words.collect();

        match cmd {
            "connect" => self.connect(input).await,
            "disconnect" => self.disconnect().await,
            "set-ip" => self.set_ip(&rest),
            "set-port" => self.set_port(&rest),
            _ => self.remote_command(cmd, &rest).await,
        }
    }

    async fn connect(&mut self, input: &mut Input) -> anyhow::Result<()> {
        print!("Enter the password: ");
        std::io::stdout().flush()?;
        let password = input.next_line().await?.unwrap_or_default();
        let token = password_token(password.trim());

        let mut conn = JsonSocket::connect((self.ip.as_str(), self.port)).await?;
        conn.send(&Message::new(
            proto::message::NAME_TOKEN,
            vec![Value::String(token)],
        ))
        .await?;
        self.conn = Some(conn);
        self.print_report().await;
        Ok(())
    }

    async fn disconnect(&mut self) -> anyhow::Result<()> {
        match self.conn.take() {
            Some(mut conn) => {
                conn.close().await;
                println!("Successfully disconnected!");
            }
            None => println!("You are not connected yet!"),
        }
        Ok(())
    }

    fn set_ip(&mut self, args: &[&str]) -> anyhow::Result<()> {
        if self.conn.is_some() {
            println!("Cannot change IP or port while connected to the server.");
            return Ok(());
        }
        let (persist, value) = match args {
            ["-s", value] => (true, *value),
            [value] => (false, *value),
            _ => {
                println!("usage: set-ip [-s] IP");
                return Ok(());
            }
        };
        self.ip = value.to_string();
        if persist {
            self.save_state()?;
        }
        println!("IP changed successfully.");
        Ok(())
    }

    fn set_port(&mut self, args: &[&str]) -> anyhow::Result<()> {
        if self.conn.is_some() {
            println!("Cannot change IP or port while connected to the server.");
            return Ok(());
        }
        let (persist, value) = match args {
            ["-s", value] => (true, *value),
            [value] => (false, *value),
            _ => {
                println!("usage: set-port [-s] PORT");
                return Ok(());
            }
        };
        let Ok(port) = value.parse::<u16>() else {
            println!("Bad port: {value}");
            return Ok(());
        };
        self.port = port;
        if persist {
            self.save_state()?;
        }
        println!("Port changed successfully.");
        Ok(())
    }

    async fn remote_command(&mut self, name: &str, args: &[&str]) -> anyhow::Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            println!("Command not found. Connect to the server for more commands.");
            return Ok(());
        };

        let msg = Message::new(
            proto::message::NAME_COMMAND,
            vec![json!(name), json!(args)],
        );
        if let Err(e) = conn.send(&msg).await {
            println!("Send failed ({e}); disconnected.");
            self.conn = None;
            return Ok(());
        }
        if name == "exit" {
            // the server is going down; don't wait for a report
            std::process::exit(0);
        }
        self.print_report().await;
        Ok(())
    }

    async fn print_report(&mut self) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        match conn.recv::<Message>().await {
            Ok(report) => {
                println!("{}: {}", report.name, render_args(&report.args));
                if report.name == proto::message::NAME_WRONG_TOKEN {
                    self.conn = None;
                }
            }
            Err(e) => {
                println!("Receive failed ({e}); disconnected.");
                self.conn = None;
            }
        }
    }

    fn save_state(&self) -> anyhow::Result<()> {
        StateFile {
            ip: self.ip.clone(),
            port: self.port,
        }
        .save(&self.state_path)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut state_path =
        std::env::var("PITCTL_STATE").unwrap_or_else(|_| "pitctl.conf".to_string());

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--state" => state_path = it.next().unwrap_or_else(|| usage_and_exit()),
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    let mut console = Console::new(PathBuf::from(state_path))?;
    println!("pitctl: {}:{} (connect | help via usage)", console.ip, console.port);

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = input.next_line().await? {
        if let Err(e) = console.handle_line(&mut input, &line).await {
            println!("error: {e}");
        }
    }
    Ok(())
}
