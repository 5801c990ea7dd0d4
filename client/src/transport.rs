//! Native WebSocket transport.
//!
//! The socket lives on a background thread. Commands go in and events come
//! out over channels, so [`Transport::send`] and [`Transport::poll`] never
//! block the caller.

use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use inkboard_shared::{decode_message, encode_message, ClientMessage, ServerMessage};
use tungstenite::{connect, Message};
use url::Url;

use crate::sync::{Transport, TransportError, TransportEvent};

const READ_TIMEOUT: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

enum Command {
    Send(Vec<u8>),
    Close,
}

pub struct WsTransport {
    commands: Option<Sender<Command>>,
    events: Option<Receiver<TransportEvent>>,
    _thread: Option<JoinHandle<()>>,
}

/// Native builds carry no TLS stack, so only plain `ws://` urls connect.
pub fn validate_url(url: &str) -> Result<Url, TransportError> {
    let parsed = Url::parse(url).map_err(|error| TransportError::InvalidUrl(error.to_string()))?;
    match parsed.scheme() {
        "ws" => Ok(parsed),
        "wss" => Err(TransportError::InvalidUrl(
            "wss is not supported by the native transport".to_string(),
        )),
        scheme => Err(TransportError::InvalidUrl(format!("unsupported scheme {scheme}"))),
    }
}

fn decode_frame(message: Message) -> Option<ServerMessage> {
    match message {
        Message::Binary(bytes) => match decode_message::<ServerMessage>(&bytes) {
            Ok(message) => Some(message),
            Err(error) => {
                log::warn!("bad binary frame: {error}");
                None
            }
        },
        Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
            Ok(message) => Some(message),
            Err(error) => {
                log::warn!("bad text frame: {error}");
                None
            }
        },
        _ => None,
    }
}

fn run_socket(url: String, commands: Receiver<Command>, events: Sender<TransportEvent>) {
    log::info!("connecting to {url}");
    let (mut socket, response) = match connect(url.as_str()) {
        Ok(connected) => connected,
        Err(error) => {
            log::error!("connection to {url} failed: {error}");
            let _ = events.send(TransportEvent::Error(format!("connection failed: {error}")));
            let _ = events.send(TransportEvent::Disconnected);
            return;
        }
    };
    log::info!("connected, status {}", response.status());
    let _ = events.send(TransportEvent::Connected);

    match socket.get_mut() {
        tungstenite::stream::MaybeTlsStream::Plain(tcp) => {
            let _ = tcp.set_read_timeout(Some(READ_TIMEOUT));
            let _ = tcp.set_write_timeout(Some(WRITE_TIMEOUT));
        }
        #[allow(unreachable_patterns)]
        _ => log::debug!("non-plain stream keeps default timeouts"),
    }

    'outer: loop {
        loop {
            match commands.try_recv() {
                Ok(Command::Send(payload)) => {
                    if let Err(error) = socket.send(Message::Binary(payload)) {
                        let _ =
                            events.send(TransportEvent::Error(format!("send failed: {error}")));
                        break 'outer;
                    }
                }
                Ok(Command::Close) | Err(TryRecvError::Disconnected) => {
                    let _ = socket.close(None);
                    break 'outer;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.read() {
            Ok(Message::Ping(data)) => {
                let _ = socket.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                log::info!("server closed the connection");
                break;
            }
            Ok(frame) => {
                if let Some(message) = decode_frame(frame) {
                    if events.send(TransportEvent::Message(message)).is_err() {
                        break;
                    }
                }
            }
            Err(tungstenite::Error::Io(ref error))
                if error.kind() == std::io::ErrorKind::WouldBlock
                    || error.kind() == std::io::ErrorKind::TimedOut => {}
            Err(error) => {
                let _ = events.send(TransportEvent::Error(format!("read failed: {error}")));
                break;
            }
        }
    }

    log::info!("socket thread for {url} exiting");
    let _ = events.send(TransportEvent::Disconnected);
}

impl WsTransport {
    /// Starts connecting in the background. Progress is reported through
    /// [`Transport::poll`].
    pub fn connect(url: &str) -> Result<Self, TransportError> {
        let url = validate_url(url)?.to_string();
        let (command_tx, command_rx) = channel();
        let (event_tx, event_rx) = channel();
        let handle = thread::spawn(move || run_socket(url, command_rx, event_tx));
        Ok(Self {
            commands: Some(command_tx),
            events: Some(event_rx),
            _thread: Some(handle),
        })
    }
}

impl Transport for WsTransport {
    fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        let commands = self.commands.as_ref().ok_or(TransportError::Closed)?;
        let payload =
            encode_message(message).map_err(|error| TransportError::Encode(error.to_string()))?;
        commands
            .send(Command::Send(payload))
            .map_err(|_| TransportError::Closed)
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let Some(events) = self.events.as_ref() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn close(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Close);
        }
        self.events = None;
        self._thread = None;
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}
