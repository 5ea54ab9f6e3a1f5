//! Line-oriented command shell over a [`ConnectionManager`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use secrecy::SecretString;
use serde_json::Value;
use tether_core::{Notification, StreamHandle};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::errors::{ClientError, ShellParseError};

const CLIENT: &str = "Client";
const SERVER: &str = "Server";

/// Delays before the second and third channel notifications.
const CHANNEL_DELAYS: [Duration; 2] = [Duration::from_secs(2), Duration::from_secs(5)];

const HELP: &str = "\
Available commands:
  login <user> <pass>  Login with your username and password
  logout               Logout and close your connection
  requestResponse      Send one request. One response will be printed
  fireAndForget        Send one request. No response will be returned
  stream               Send one request. Many responses (stream) will be printed
  channel              Stream some notifications to the server. Stream of responses will be printed
  s                    Stops streams or channels
  help                 Show this list
  exit                 Logout and quit
";

/// One parsed shell line.
#[derive(Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Connect and authenticate.
    Login {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },
    /// Close the session.
    Logout,
    /// One request, one response.
    RequestResponse,
    /// One request, no response.
    FireAndForget,
    /// Subscribe to the reply stream.
    Stream,
    /// Open the counting channel.
    Channel,
    /// Stop the active stream or channel.
    Stop,
    /// Print the command list.
    Help,
    /// Logout and leave the shell.
    Exit,
}

impl fmt::Debug for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login { username, .. } => f
                .debug_struct("Login")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Logout => f.write_str("Logout"),
            Self::RequestResponse => f.write_str("RequestResponse"),
            Self::FireAndForget => f.write_str("FireAndForget"),
            Self::Stream => f.write_str("Stream"),
            Self::Channel => f.write_str("Channel"),
            Self::Stop => f.write_str("Stop"),
            Self::Help => f.write_str("Help"),
            Self::Exit => f.write_str("Exit"),
        }
    }
}

impl FromStr for ShellCommand {
    type Err = ShellParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err(ShellParseError::Empty);
        };
        let (command, name): (Self, &'static str) = match name {
            "login" => {
                let username = words.next().ok_or(ShellParseError::MissingArgument {
                    command: "login",
                    argument: "user",
                })?;
                let password = words.next().ok_or(ShellParseError::MissingArgument {
                    command: "login",
                    argument: "pass",
                })?;
                (
                    Self::Login {
                        username: username.to_owned(),
                        password: password.to_owned(),
                    },
                    "login",
                )
            }
            "logout" => (Self::Logout, "logout"),
            "requestResponse" | "request-response" => (Self::RequestResponse, "requestResponse"),
            "fireAndForget" | "fire-and-forget" => (Self::FireAndForget, "fireAndForget"),
            "stream" => (Self::Stream, "stream"),
            "channel" => (Self::Channel, "channel"),
            "s" => (Self::Stop, "s"),
            "help" => (Self::Help, "help"),
            "exit" | "quit" => (Self::Exit, "exit"),
            other => return Err(ShellParseError::UnknownCommand(other.to_owned())),
        };
        if words.next().is_some() {
            return Err(ShellParseError::TooManyArguments(name));
        }
        Ok(command)
    }
}

/// Whether the shell keeps reading after a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Read the next line.
    Continue,
    /// Leave the shell.
    Exit,
}

/// Executes shell commands against a connection manager.
pub struct Shell {
    manager: Arc<ConnectionManager>,
    host: String,
    port: u16,
    channel_delays: [Duration; 2],
}

impl Shell {
    /// Shell that logs in to `host:port`.
    pub fn new(manager: Arc<ConnectionManager>, host: impl Into<String>, port: u16) -> Self {
        Self {
            manager,
            host: host.into(),
            port,
            channel_delays: CHANNEL_DELAYS,
        }
    }

    /// Override the delays between channel notifications.
    #[must_use]
    pub fn with_channel_delays(mut self, delays: [Duration; 2]) -> Self {
        self.channel_delays = delays;
        self
    }

    /// The connection manager commands run against.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    fn notification(&self, text: &str) -> Notification {
        Notification::new(CLIENT, SERVER, text, self.manager.client_id().as_str())
    }

    /// Run one command.
    pub async fn execute(&self, command: ShellCommand) -> Result<Flow, ClientError> {
        match command {
            ShellCommand::Login { username, password } => {
                let _ = self
                    .manager
                    .connect(&username, SecretString::from(password), &self.host, self.port)
                    .await?;
            }
            ShellCommand::Logout => self.logout().await,
            ShellCommand::RequestResponse => {
                info!("Sending one request. Waiting for one response...");
                let payload = self
                    .notification("Test the Request-Response interaction model from client")
                    .to_payload();
                let reply = self.manager.invoke("request-response", payload).await?;
                info!("Response was: {}", describe(reply));
            }
            ShellCommand::FireAndForget => {
                info!(
                    "Fire-And-Forget. Sending one request. Expect no response (check server console log)..."
                );
                let payload = self
                    .notification("Test the Fire-And-Forget interaction model")
                    .to_payload();
                self.manager
                    .invoke_fire_and_forget("fire-and-forget", payload)
                    .await?;
            }
            ShellCommand::Stream => {
                info!("Request-Stream: sending one request, logging responses. Type 's' to stop.");
                let payload = self
                    .notification("Test the Request-Stream interaction model")
                    .to_payload();
                let handle = self.manager.invoke_stream("stream", payload).await?;
                spawn_printer(handle, "Response");
            }
            ShellCommand::Channel => {
                info!("Channel (bi-directional streams): asking for a stream of messages. Type 's' to stop.");
                let outbound = self.channel_notifications();
                let handle = self.manager.invoke_channel("channel", outbound).await?;
                spawn_printer(handle, "Received");
            }
            ShellCommand::Stop => {
                if self.manager.session().is_none() {
                    return Err(ClientError::NotConnected);
                }
                if self.manager.has_active() {
                    info!("Stopping the current stream.");
                    let _ = self.manager.cancel_active();
                    info!("Stream stopped.");
                }
            }
            ShellCommand::Help => {}
            ShellCommand::Exit => {
                self.logout().await;
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    async fn logout(&self) {
        if self.manager.dispose().await {
            info!("Logged out.");
        }
    }

    /// The three channel notifications, spaced by the configured delays.
    fn channel_notifications(&self) -> impl Stream<Item = Value> + Send + 'static {
        let first = self.notification("Test the Channel interaction model");
        let second = self.notification("Test the Channel interaction model second");
        let third = self.notification("Test the Channel interaction model third");
        let [second_delay, third_delay] = self.channel_delays;
        async_stream::stream! {
            info!("Send notification for my-channel");
            yield first.to_payload();
            tokio::time::sleep(second_delay).await;
            info!("Send notification for my-channel");
            yield second.to_payload();
            tokio::time::sleep(third_delay).await;
            info!("Send notification for my-channel");
            yield third.to_payload();
        }
    }
}

fn describe(value: Value) -> String {
    match Notification::from_payload(value.clone()) {
        Ok(notification) => notification.to_string(),
        Err(_) => value.to_string(),
    }
}

fn spawn_printer(mut handle: StreamHandle, label: &'static str) {
    drop(tokio::spawn(async move {
        while let Some(item) = handle.next().await {
            match item {
                Ok(value) => info!("{label}: {} (Type 's' to stop.)", describe(value)),
                Err(err) => {
                    warn!(route = handle.route(), error = %err, "subscription ended");
                    break;
                }
            }
        }
    }));
}

/// Read commands from `input` until `exit` or end of input.
///
/// Prompts, help and command errors go to `output`; results are logged.
pub async fn run_shell<R, W>(shell: &Shell, input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        output.write_all(b"tether> ").await?;
        output.flush().await?;
        let Some(line) = lines.next_line().await? else {
            shell.logout().await;
            return Ok(());
        };
        let command = match line.parse::<ShellCommand>() {
            Ok(command) => command,
            Err(ShellParseError::Empty) => continue,
            Err(err) => {
                output.write_all(format!("{err}\n").as_bytes()).await?;
                continue;
            }
        };
        if command == ShellCommand::Help {
            output.write_all(HELP.as_bytes()).await?;
            continue;
        }
        match shell.execute(command).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => return Ok(()),
            Err(err) => output.write_all(format!("Error: {err}\n").as_bytes()).await?,
        }
    }
}
