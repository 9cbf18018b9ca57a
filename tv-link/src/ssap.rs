//! SSAP WebSocket client for webOS TVs.
//!
//! Wraps a `tokio_tungstenite` connection to the TV's SSAP endpoint
//! (`ws://tv:3000` or `wss://tv:3001`), handling the register/prompt
//! pairing dance and correlating request/response pairs by message id.
//! Callers are synchronous; the connection runs on its own thread with a
//! current-thread runtime, and responses arrive through callbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector;
use tracing::{debug, error, info, warn};

use crate::store::TvLinkStore;

pub const SSAP_PORT: u16 = 3000;
pub const SSAP_TLS_PORT: u16 = 3001;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const REGISTER_ID: &str = "register_0";

const SET_SETTINGS_URI: &str = "ssap://com.webos.service.settings/setSystemSettings";
const GET_SETTINGS_URI: &str = "ssap://com.webos.service.settings/getSystemSettings";
const CREATE_ALERT_URI: &str = "ssap://com.webos.service.system.launcher/createAlert";
const CLOSE_ALERT_URI: &str = "ssap://com.webos.service.system.launcher/closeAlert";
const CREATE_TOAST_URI: &str = "ssap://com.webos.service.system.notifications/createToast";

/// Registration payload sent on every connection. The signature blob is the
/// stock webOS developer signature; the TV only checks it structurally.
const REGISTER_MANIFEST: &str = r#"{
    "forcePairing": false,
    "pairingType": "PROMPT",
    "manifest": {
        "manifestVersion": 1,
        "appVersion": "1.1",
        "signed": {
            "created": "20240101",
            "appId": "com.calagent.remote",
            "vendorId": "com.calagent",
            "localizedAppNames": {
                "": "Calibration Agent"
            },
            "localizedVendorNames": {
                "": "cal-agent"
            },
            "permissions": [
                "TEST_SECURE",
                "CONTROL_INPUT_TEXT",
                "CONTROL_MOUSE_AND_KEYBOARD",
                "READ_INSTALLED_APPS",
                "READ_LGE_SDX",
                "READ_NOTIFICATIONS",
                "SEARCH",
                "WRITE_SETTINGS",
                "WRITE_NOTIFICATION_ALERT",
                "CONTROL_POWER",
                "READ_CURRENT_CHANNEL",
                "READ_RUNNING_APPS",
                "READ_UPDATE_INFO",
                "UPDATE_FROM_REMOTE_APP",
                "READ_LGE_TV_INPUT_EVENTS",
                "READ_TV_CURRENT_TIME"
            ],
            "serial": "2f930e2d2cfe083771f68e4fe7bb07"
        },
        "permissions": [
            "LAUNCH",
            "LAUNCH_WEBAPP",
            "APP_TO_APP",
            "CLOSE",
            "TEST_OPEN",
            "TEST_PROTECTED",
            "CONTROL_AUDIO",
            "CONTROL_DISPLAY",
            "CONTROL_INPUT_JOYSTICK",
            "CONTROL_INPUT_MEDIA_RECORDING",
            "CONTROL_INPUT_MEDIA_PLAYBACK",
            "CONTROL_INPUT_TV",
            "CONTROL_POWER",
            "READ_APP_STATUS",
            "READ_CURRENT_CHANNEL",
            "READ_INPUT_DEVICE_LIST",
            "READ_NETWORK_STATE",
            "READ_RUNNING_APPS",
            "READ_TV_CHANNEL_LIST",
            "WRITE_NOTIFICATION_TOAST",
            "READ_POWER_STATE",
            "READ_COUNTRY_INFO",
            "READ_SETTINGS",
            "CONTROL_TV_SCREEN"
        ],
        "signatures": [
            {
                "signatureVersion": 1,
                "signature": "eyJhbGdvcml0aG0iOiJSU0EtU0hBMjU2Iiwia2V5SWQiOiJ0ZXN0LXNpZ25pbmctY2VydCIsInNpZ25hdHVyZVZlcnNpb24iOjF9.hrVRgjCwXVvE2OOSpDZ58hR+59aFNwYDyjQgKk3auukd7pcegmE2CzPCa0bJ0ZsRAcKkCTJrWo5iDzNhMBWRyaMOv5zWSrthlf7G128qvIlpMT0YNY+n/FaOHE73uLrS/g7swl3/qH/BGFG2Hu4RlL48eb3lLKqTt2xKHdCs6Cd4RMfJPYnzgvI4BNrFUKsjkcu+WD4OO2A27Pq1n50cMchmcaXadJhGrOqH5YmHdOCj5NSHzJYrsW0HPlpuAx/ECMeIZYDh6RMqaFM2DXzdKX9NmmyqzJ3o/0lkk/N97gfVRLW5hA29yeAwaCViZNCP8iC9aO0q9fQojoa7NQnAtw=="
            }
        ]
    }
}"#;

/// Error from the SSAP client.
#[derive(Debug, Error)]
pub enum SsapError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("connect: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("tv error: {0}")]
    Tv(String),
}

/// Outcome of one SSAP request.
#[derive(Debug, Clone)]
pub enum SsapResult {
    /// The TV's response payload.
    Response(Value),
    /// Transport or TV-side error text.
    Error(String),
}

pub type ResponseCallback = Arc<dyn Fn(SsapResult) + Send + Sync>;

/// Connection lifecycle events, fired from the connection thread. All
/// methods default to no-ops so implementors pick what they care about.
pub trait SsapObserver: Send + Sync {
    /// Human-readable connection status changes.
    fn status(&self, message: &str) {
        let _ = message;
    }
    /// The TV is showing (or needs to show) its pairing prompt.
    fn pairing_required(&self) {}
    /// The connection dropped, orderly or not.
    fn disconnected(&self) {}
}

/// Observer for callers that only want the log output.
pub struct NullSsapObserver;

impl SsapObserver for NullSsapObserver {}

struct Shared {
    connected: AtomicBool,
    paired: AtomicBool,
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, ResponseCallback>>,
    sender: Mutex<Option<tokio::sync::mpsc::UnboundedSender<Message>>>,
    client_key: Mutex<Option<String>>,
    store: TvLinkStore,
    observer: Arc<dyn SsapObserver>,
}

impl Shared {
    fn status(&self, message: &str) {
        info!("ssap: {message}");
        self.observer.status(message);
    }

    fn send_message(&self, message: Message) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send(message);
        }
    }

    /// Fire a request without touching `SsapClient`, so response handlers
    /// can chain follow-up requests.
    fn request(shared: &Arc<Shared>, uri: &str, payload: Value, callback: ResponseCallback) {
        if shared.sender.lock().unwrap().is_none() {
            callback(SsapResult::Error("not connected".to_string()));
            return;
        }

        let id = format!("msg_{}", shared.next_id.fetch_add(1, Ordering::SeqCst));
        shared
            .pending
            .lock()
            .unwrap()
            .insert(id.clone(), callback);

        let message = json!({
            "type": "request",
            "id": id,
            "uri": uri,
            "payload": payload,
        });
        shared.send_message(Message::Text(message.to_string().into()));
    }
}

/// SSAP connection to one TV.
pub struct SsapClient {
    shared: Arc<Shared>,
}

impl SsapClient {
    /// A client bound to the given pairing store. The stored client key, if
    /// any, is used on the next `connect`.
    pub fn new(store: TvLinkStore, observer: Arc<dyn SsapObserver>) -> Self {
        let client_key = store.client_key();
        Self {
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                paired: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                sender: Mutex::new(None),
                client_key: Mutex::new(client_key),
                store,
                observer,
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_paired(&self) -> bool {
        self.shared.paired.load(Ordering::SeqCst)
    }

    /// Open the connection on a background thread and register with the TV.
    /// Returns as soon as the thread is launched; watch the [`SsapObserver`]
    /// for progress.
    pub fn connect(&self, host: &str, secure: bool) -> Result<(), SsapError> {
        let port = if secure { SSAP_TLS_PORT } else { SSAP_PORT };
        self.connect_to(host, port, secure)
    }

    /// Like [`connect`](Self::connect) but with an explicit port.
    pub fn connect_to(&self, host: &str, port: u16, secure: bool) -> Result<(), SsapError> {
        if self.shared.sender.lock().unwrap().is_some() {
            return Err(SsapError::AlreadyConnected);
        }

        let scheme = if secure { "wss" } else { "ws" };
        let url = format!("{scheme}://{host}:{port}");
        if let Err(e) = self.shared.store.save_tv_ip(host) {
            warn!("could not persist tv address: {e}");
        }

        let shared = Arc::clone(&self.shared);
        std::thread::Builder::new()
            .name("ssap".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        shared.status(&format!("Connection failed: {e}"));
                        return;
                    }
                };
                runtime.block_on(run_connection(shared, url, secure));
            })
            .map_err(|e| SsapError::Connect(e.to_string()))?;

        Ok(())
    }

    /// Ask the TV to close the socket. Pending callbacks complete with an
    /// error once the connection is torn down.
    pub fn disconnect(&self) {
        self.shared.send_message(Message::Close(None));
    }

    /// Fire a request; the callback runs on the connection thread.
    pub fn send_request(&self, uri: &str, payload: Value, callback: ResponseCallback) {
        Shared::request(&self.shared, uri, payload, callback);
    }

    /// Fire a request and block the caller for the response. Not for
    /// latency-sensitive threads; use [`send_request`](Self::send_request)
    /// there instead.
    pub fn send_request_sync(
        &self,
        uri: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, SsapError> {
        let (tx, rx) = mpsc::channel();
        self.send_request(
            uri,
            payload,
            Arc::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        match rx.recv_timeout(timeout.unwrap_or(REQUEST_TIMEOUT)) {
            Ok(SsapResult::Response(payload)) => Ok(payload),
            Ok(SsapResult::Error(message)) => Err(SsapError::Tv(message)),
            Err(_) => Err(SsapError::Timeout),
        }
    }

    /// Write picture settings: `settings` is an object of key/value pairs
    /// for the given settings category.
    pub fn set_system_settings(&self, category: &str, settings: Value, callback: ResponseCallback) {
        self.send_request(
            SET_SETTINGS_URI,
            json!({ "category": category, "settings": settings }),
            callback,
        );
    }

    /// Read back settings keys from a category.
    pub fn get_system_settings(&self, category: &str, keys: &[&str], callback: ResponseCallback) {
        self.send_request(
            GET_SETTINGS_URI,
            json!({ "category": category, "keys": keys }),
            callback,
        );
    }

    /// Run an arbitrary Luna service call through the createAlert side door:
    /// an invisible alert whose only button invokes the target URI, closed
    /// again as soon as the TV acknowledges it.
    pub fn execute_luna_call(&self, luna_uri: &str, params: Value, callback: ResponseCallback) {
        let shared = Arc::clone(&self.shared);
        let inner: ResponseCallback = Arc::new(move |result| {
            if let SsapResult::Response(payload) = &result {
                if let Some(alert_id) = payload.get("alertId").and_then(Value::as_str) {
                    Shared::request(
                        &shared,
                        CLOSE_ALERT_URI,
                        json!({ "alertId": alert_id }),
                        Arc::new(|_| {}),
                    );
                }
            }
            callback(result);
        });

        self.send_request(
            CREATE_ALERT_URI,
            json!({
                "message": " ",
                "buttons": [{
                    "label": " ",
                    "onClick": luna_uri,
                    "params": params,
                }],
            }),
            inner,
        );
    }

    /// Pop a toast notification on the TV.
    pub fn show_toast(&self, message: &str, callback: ResponseCallback) {
        self.send_request(CREATE_TOAST_URI, json!({ "message": message }), callback);
    }
}

async fn run_connection(shared: Arc<Shared>, url: String, secure: bool) {
    let connector = if secure {
        // TVs present self-signed certificates for their own IP.
        match native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
        {
            Ok(tls) => Some(Connector::NativeTls(tls)),
            Err(e) => {
                shared.status(&format!("Connection failed: {e}"));
                return;
            }
        }
    } else {
        None
    };

    let connecting =
        tokio_tungstenite::connect_async_tls_with_config(url.as_str(), None, false, connector);
    let stream = match tokio::time::timeout(CONNECT_TIMEOUT, connecting).await {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => {
            shared.status(&format!("Connection failed: {e}"));
            return;
        }
        Err(_) => {
            shared.status("Connection timed out");
            return;
        }
    };

    let (queue, mut outgoing) = tokio::sync::mpsc::unbounded_channel::<Message>();
    *shared.sender.lock().unwrap() = Some(queue);
    shared.connected.store(true, Ordering::SeqCst);
    shared.status("Connected");

    let (mut write, mut read) = stream.split();
    send_registration(&shared);

    loop {
        tokio::select! {
            queued = outgoing.recv() => match queued {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if write.send(message).await.is_err() || closing {
                        break;
                    }
                }
                None => break,
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_text(&shared, &text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("ssap read: {e}");
                    break;
                }
            },
        }
    }

    handle_disconnect(&shared);
}

fn send_registration(shared: &Arc<Shared>) {
    let mut payload: Value = match serde_json::from_str(REGISTER_MANIFEST) {
        Ok(payload) => payload,
        Err(e) => {
            error!("register manifest: {e}");
            return;
        }
    };
    if let Some(key) = shared.client_key.lock().unwrap().clone() {
        payload["client-key"] = Value::String(key);
    }

    let message = json!({
        "type": "register",
        "id": REGISTER_ID,
        "payload": payload,
    });
    shared.send_message(Message::Text(message.to_string().into()));
}

fn handle_text(shared: &Arc<Shared>, text: &str) {
    let message: Value = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            error!("unparseable ssap frame: {e}");
            return;
        }
    };
    let msg_type = message.get("type").and_then(Value::as_str).unwrap_or("");
    let id = message.get("id").and_then(Value::as_str).unwrap_or("");

    match msg_type {
        "registered" => {
            if let Some(key) = message
                .pointer("/payload/client-key")
                .and_then(Value::as_str)
            {
                *shared.client_key.lock().unwrap() = Some(key.to_string());
                if let Err(e) = shared.store.save_client_key(key) {
                    error!("could not persist client key: {e}");
                }
            }
            shared.paired.store(true, Ordering::SeqCst);
            shared.status("Connected & paired");
        }
        "response" => {
            let callback = shared.pending.lock().unwrap().remove(id);
            match callback {
                Some(callback) => callback(SsapResult::Response(
                    message.get("payload").cloned().unwrap_or(Value::Null),
                )),
                None => debug!("response for unknown id {id}"),
            }
        }
        "error" => {
            let error_text = message
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            if let Some(callback) = shared.pending.lock().unwrap().remove(id) {
                callback(SsapResult::Error(error_text.clone()));
            }
            // A rejected registration means the stored key went stale;
            // forget it and register again from scratch.
            if id == REGISTER_ID {
                shared.client_key.lock().unwrap().take();
                if let Err(e) = shared.store.clear_client_key() {
                    error!("could not clear client key: {e}");
                }
                shared.status("Pairing required - accept on TV");
                shared.observer.pairing_required();
                send_registration(shared);
            } else {
                warn!("ssap error for {id}: {error_text}");
            }
        }
        "prompt" => {
            shared.status("Accept pairing on TV");
            shared.observer.pairing_required();
        }
        other => debug!("unhandled ssap message type {other:?}"),
    }
}

fn handle_disconnect(shared: &Arc<Shared>) {
    if !shared.connected.swap(false, Ordering::SeqCst) {
        return;
    }
    shared.paired.store(false, Ordering::SeqCst);
    shared.sender.lock().unwrap().take();

    let pending: Vec<ResponseCallback> =
        shared.pending.lock().unwrap().drain().map(|(_, cb)| cb).collect();
    for callback in pending {
        callback(SsapResult::Error("disconnected".to_string()));
    }

    shared.status("Disconnected");
    shared.observer.disconnected();
}
