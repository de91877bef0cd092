//! Terminal peer - Entry Point
//!
//! Minimal line-based front-end: plain lines are chat, `/msg <user> [text]`
//! sends a private message, `/who` lists members, `/logout` (or end of
//! input) leaves.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use line_relay::prompt::parse_port;
use line_relay::{
    ConnectParams, ErrorCode, HistoryEntry, PeerArgs, PeerConfig, PeerSession, Prompt,
    SessionObserver, Username,
};

/// Prints relay events to stdout
struct TerminalObserver;

impl SessionObserver for TerminalObserver {
    fn history_appended(&self, entry: &HistoryEntry) {
        println!("{}", entry);
    }

    fn members_changed(&self, members: &[Username]) {
        let names: Vec<&str> = members.iter().map(Username::as_str).collect();
        println!("[members: {}]", names.join(", "));
    }

    fn direct_message(&self, from: &Username, text: &str) {
        println!("[message from {}] {}", from, text);
    }

    fn delivery_failed(&self, recipient: &str) {
        println!("[{} is not connected]", recipient);
    }

    fn relay_error(&self, code: ErrorCode, message: &str) {
        println!("[relay error {:?}: {}]", code, message);
    }

    fn disconnected(&self) {
        println!("[disconnected]");
    }
}

/// Prompts on stdin/stdout
struct StdinPrompt;

impl StdinPrompt {
    fn ask(&self, question: &str) -> Option<String> {
        print!("{}", question);
        io::stdout().flush().ok()?;
        let mut answer = String::new();
        match io::stdin().read_line(&mut answer) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(answer.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

impl Prompt for StdinPrompt {
    fn connection_params(&mut self) -> Option<ConnectParams> {
        let username = self.ask("Username: ")?;
        let host = self.ask("Host: ")?;
        let port = parse_port(&self.ask("Port: ")?)?;
        Some(ConnectParams {
            username,
            host,
            port,
        })
    }

    fn direct_message_body(&mut self, recipient: &str) -> Option<String> {
        self.ask(&format!("Message to {}: ", recipient))
    }
}

/// Fill in whatever the command line left out
fn resolve_config(args: &PeerArgs, prompt: &mut StdinPrompt) -> Option<PeerConfig> {
    let params = if args.username.is_none() && args.host.is_none() && args.port.is_none() {
        prompt.connection_params()?
    } else {
        ConnectParams {
            username: match &args.username {
                Some(u) => u.clone(),
                None => prompt.ask("Username: ")?,
            },
            host: match &args.host {
                Some(h) => h.clone(),
                None => prompt.ask("Host: ")?,
            },
            port: match args.port {
                Some(p) => p,
                None => parse_port(&prompt.ask("Port: ")?)?,
            },
        }
    };

    let mut config = PeerConfig::from(params);
    config.handshake_timeout = Duration::from_secs(args.handshake_timeout);
    Some(config)
}

/// Blocking input loop, run on its own thread
fn input_loop(session: Arc<PeerSession>, mut prompt: StdinPrompt) {
    let mut buf = String::new();
    loop {
        buf.clear();
        match io::stdin().read_line(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = buf.trim_end();

        let result = if line == "/logout" || line == "logout" {
            break;
        } else if line == "/who" {
            let names: Vec<String> = session.members().iter().map(|m| m.to_string()).collect();
            println!("[members: {}]", names.join(", "));
            Ok(())
        } else if let Some(rest) = line.strip_prefix("/msg ") {
            let (recipient, text) = match rest.split_once(' ') {
                Some((recipient, text)) => (recipient.to_string(), Some(text.to_string())),
                None => (rest.to_string(), None),
            };
            match text.or_else(|| prompt.direct_message_body(&recipient)) {
                Some(text) => session.post_direct(recipient, text),
                None => Ok(()),
            }
        } else if line.is_empty() {
            Ok(())
        } else {
            session.post_chat(line)
        };

        if result.is_err() {
            break;
        }
    }

    session.request_logout();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they don't mix with the chat
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("line_relay=warn")),
        )
        .init();

    let args = PeerArgs::parse();
    let mut prompt = StdinPrompt;

    let Some(config) = resolve_config(&args, &mut prompt) else {
        return Ok(());
    };

    let session = PeerSession::connect(config.clone(), Arc::new(TerminalObserver))
        .await
        .with_context(|| format!("could not join {} as {}", config.address(), config.username))?;
    let session = Arc::new(session);

    println!("Joined as {}. Type /msg <user> <text>, /who or /logout.", session.username());

    // Plain thread: a blocked stdin read must not hold up runtime shutdown
    let input = Arc::clone(&session);
    std::thread::spawn(move || input_loop(input, prompt));

    session.closed().await;

    Ok(())
}
