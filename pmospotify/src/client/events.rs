//! Écoute du flux d'événements `/events` de go-librespot.
//!
//! Un thread unique porte la connexion WebSocket : il lit les messages,
//! les distribue aux callbacks enregistrés, puis se reconnecte après une
//! pause fixe quand la connexion tombe. La reconnexion étant faite par ce
//! même thread, il n'y a jamais plus d'une tentative en attente.

use std::any::Any;
use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use tungstenite::http::Uri;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Granularité du contrôle de l'arrêt pendant une lecture bloquante.
const READ_TIMEOUT: Duration = Duration::from_millis(250);
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;
pub type CallbackId = u64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Callbacks abonnés aux événements.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    next_id: Arc<AtomicU64>,
    callbacks: Arc<Mutex<Vec<(CallbackId, EventCallback)>>>,
}

impl CallbackRegistry {
    pub fn add(&self, callback: EventCallback) -> CallbackId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.callbacks).push((id, callback));
        id
    }

    pub fn remove(&self, id: CallbackId) -> bool {
        let mut callbacks = lock(&self.callbacks);
        let before = callbacks.len();
        callbacks.retain(|(cid, _)| *cid != id);
        callbacks.len() != before
    }

    pub fn len(&self) -> usize {
        lock(&self.callbacks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appelle chaque callback ; une panique est journalisée et n'empêche
    /// pas les suivants.
    pub fn dispatch(&self, event: &Value) {
        // copie : un callback peut (dés)enregistrer sans interblocage
        let snapshot: Vec<(CallbackId, EventCallback)> = lock(&self.callbacks).clone();
        for (id, callback) in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
                error!(callback = id, "Event callback error: {}", panic_message(&*panic));
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Décode un message texte et le distribue.
pub fn handle_message(text: &str, registry: &CallbackRegistry) {
    match serde_json::from_str::<Value>(text) {
        Ok(event) => {
            let kind = event.get("type").and_then(Value::as_str).unwrap_or("");
            debug!(event = kind, "WebSocket event");
            registry.dispatch(&event);
        }
        Err(_) => warn!("Invalid WebSocket JSON: {}", text),
    }
}

/// Client du flux `/events`, démarré et arrêté à la demande.
pub struct EventListener {
    ws_url: String,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    registry: CallbackRegistry,
    run: Mutex<Option<Run>>,
}

/// État propre à un démarrage : un `stop()` n'agit que sur le sien.
struct Run {
    active: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

impl EventListener {
    /// `api_url` est l'URL HTTP de l'API ; le flux est pris sur
    /// `ws://…/events`.
    pub fn new(api_url: &str) -> Self {
        Self {
            ws_url: events_url(api_url),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            registry: CallbackRegistry::default(),
            run: Mutex::new(None),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Borne la connexion TCP puis, séparément, la poignée de main.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.run)
            .as_ref()
            .is_some_and(|run| run.connected.load(Ordering::SeqCst))
    }

    pub fn is_started(&self) -> bool {
        lock(&self.run)
            .as_ref()
            .is_some_and(|run| !run.thread.is_finished())
    }

    pub fn add_callback(&self, callback: EventCallback) -> CallbackId {
        self.registry.add(callback)
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.registry.remove(id)
    }

    /// Lance le thread d'écoute s'il ne tourne pas déjà.
    pub fn start(&self) {
        let mut slot = lock(&self.run);
        if slot.as_ref().is_some_and(|run| !run.thread.is_finished()) {
            return;
        }

        let active = Arc::new(AtomicBool::new(true));
        let connected = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let worker = Worker {
            ws_url: self.ws_url.clone(),
            reconnect_delay: self.reconnect_delay,
            connect_timeout: self.connect_timeout,
            registry: self.registry.clone(),
            active: Arc::clone(&active),
            connected: Arc::clone(&connected),
            shutdown: shutdown_rx,
        };

        match thread::Builder::new()
            .name("librespot-ws".to_string())
            .spawn(move || worker.run())
        {
            Ok(thread) => {
                *slot = Some(Run {
                    active,
                    connected,
                    shutdown: shutdown_tx,
                    thread,
                })
            }
            Err(e) => warn!("Failed to spawn event listener thread: {}", e),
        }
    }

    /// Annule les reconnexions futures et ferme la connexion active.
    pub fn stop(&self) {
        let Some(run) = lock(&self.run).take() else {
            return;
        };
        run.active.store(false, Ordering::SeqCst);
        drop(run.shutdown);

        let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
        while !run.thread.is_finished() {
            if Instant::now() >= deadline {
                debug!("Event listener still connecting, detaching it");
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
        let _ = run.thread.join();
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.stop();
    }
}

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

struct Worker {
    ws_url: String,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    registry: CallbackRegistry,
    active: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    shutdown: Receiver<()>,
}

impl Worker {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn run(self) {
        while self.is_active() {
            match self.connect() {
                Ok(mut socket) => {
                    info!("WebSocket connected to go-librespot");
                    self.connected.store(true, Ordering::SeqCst);
                    self.read_events(&mut socket);
                    self.connected.store(false, Ordering::SeqCst);
                }
                Err(e) => warn!("WebSocket error: {:#}", e),
            }

            if !self.is_active() {
                break;
            }
            debug!("Reconnecting WebSocket in {:?}", self.reconnect_delay);
            match self.shutdown.recv_timeout(self.reconnect_delay) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }
        }
        debug!("Event listener stopped");
    }

    /// Connexion TCP et poignée de main, chacune bornée par
    /// `connect_timeout`.
    fn connect(&self) -> Result<Socket> {
        let uri: Uri = self
            .ws_url
            .parse()
            .with_context(|| format!("invalid WebSocket URL {}", self.ws_url))?;
        if uri.scheme_str() != Some("ws") {
            bail!("unsupported WebSocket URL {}", self.ws_url);
        }
        let host = uri
            .host()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .with_context(|| format!("no host in {}", self.ws_url))?;
        let port = uri.port_u16().unwrap_or(80);

        let mut last_error = None;
        let mut stream = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        let stream = match (stream, last_error) {
            (Some(stream), _) => stream,
            (None, Some(e)) => return Err(e).with_context(|| format!("cannot reach {host}:{port}")),
            (None, None) => bail!("{host} does not resolve"),
        };

        stream.set_read_timeout(Some(self.connect_timeout))?;
        stream.set_write_timeout(Some(self.connect_timeout))?;
        let (socket, _) = tungstenite::client(self.ws_url.as_str(), MaybeTlsStream::Plain(stream))
            .map_err(|e| anyhow!("handshake with {} failed: {}", self.ws_url, e))?;
        Ok(socket)
    }

    fn read_events(&self, socket: &mut Socket) {
        if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
            if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
                warn!("Cannot set WebSocket read timeout: {}", e);
            }
        }

        loop {
            if !self.is_active() {
                let _ = socket.close(None);
                let _ = socket.flush();
                return;
            }

            match socket.read() {
                Ok(Message::Text(text)) => handle_message(&text, &self.registry),
                Ok(Message::Close(frame)) => {
                    debug!("WebSocket closed: {:?}", frame);
                    let _ = socket.flush();
                    return;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    debug!("WebSocket connection closed");
                    return;
                }
                Err(e) => {
                    warn!("WebSocket error: {}", e);
                    return;
                }
            }
        }
    }
}

/// `http://host:port` vers `ws://host:port/events`.
pub fn events_url(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws}/events")
}
