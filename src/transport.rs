// ABOUTME: Transport collaborator traits and the default WebSocket data channel.
// ABOUTME: Carries JSON protocol events over a split sink/stream pump with lifecycle signals.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite;

use voxlink_protocol::ClientEvent;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("credential request failed: {0}")]
    Credential(String),
    #[error("transport establishment failed: {0}")]
    Establish(String),
    #[error("data channel is not open")]
    ChannelClosed,
    #[error("send failed: {0}")]
    Send(String),
}

/// Lifecycle signals emitted by a data channel.
#[derive(Debug, Clone)]
pub enum ChannelSignal {
    Open,
    Closed,
    Error(String),
}

/// Issues the short-lived credential used to establish a transport.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn request_ephemeral_key(&self) -> Result<String, TransportError>;

    /// Cheap reachability check used by the mobile connect preamble.
    async fn check_reachability(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Builds a fresh transport from a credential.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn establish(&self, credential: &str) -> Result<TransportHandle, TransportError>;
}

/// Reliable ordered side-channel carrying JSON protocol events.
pub trait DataChannel: Send + Sync {
    fn is_open(&self) -> bool;
    fn send(&self, event: &ClientEvent) -> Result<(), TransportError>;
    fn signals(&self) -> broadcast::Receiver<ChannelSignal>;
    /// Take the inbound message stream. Can only be taken once; the event
    /// router owns it for the life of the channel.
    fn take_inbound(&self) -> Option<mpsc::Receiver<String>>;
}

/// The microphone track fed to the remote peer while PTT is held.
pub trait LocalTrack: Send + Sync {
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    fn push_pcm(&self, samples: &[i16]);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
}

/// Peer-side view of the transport: remote media track arrivals.
pub trait PeerConnection: Send + Sync {
    /// Take the remote track arrival stream. Can only be taken once.
    fn take_remote_tracks(&self) -> Option<mpsc::Receiver<RemoteTrack>>;
    /// A track that was already live before listeners were attached.
    fn live_remote_track(&self) -> Option<RemoteTrack>;
}

/// Playback collaborator that receives remote audio tracks.
pub trait RemoteAudioSink: Send + Sync {
    fn attach(&self, track: RemoteTrack);
}

pub struct LogRemoteAudio;

impl RemoteAudioSink for LogRemoteAudio {
    fn attach(&self, track: RemoteTrack) {
        tracing::info!("Remote audio track attached: {}", track.id);
    }
}

/// One (re)connect's worth of transport. Replaced wholesale on every
/// reconnect; dropping the previous handle is the only teardown this
/// layer performs.
pub struct TransportHandle {
    pub peer: Arc<dyn PeerConnection>,
    pub channel: Arc<dyn DataChannel>,
    pub local_track: Arc<dyn LocalTrack>,
}

// -- Default HTTP credential provider --

#[derive(serde::Deserialize)]
struct ClientSecret {
    value: String,
}

#[derive(serde::Deserialize)]
struct EphemeralKeyResponse {
    client_secret: ClientSecret,
}

/// Fetches an ephemeral key from the token-issuing service. Tries a
/// minimal request first, then retries once with explicit headers for
/// proxies that reject bare posts.
pub struct HttpCredentialProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCredentialProvider {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }

    async fn fetch_key(&self, explicit_headers: bool) -> Result<String, TransportError> {
        let mut request = self.client.post(&self.endpoint);
        if explicit_headers {
            request = request
                .header("Accept", "application/json")
                .header("Content-Type", "application/json")
                .body("{}");
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Credential(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Credential(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let parsed: EphemeralKeyResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Credential(e.to_string()))?;
        Ok(parsed.client_secret.value)
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn request_ephemeral_key(&self) -> Result<String, TransportError> {
        match self.fetch_key(false).await {
            Ok(key) => Ok(key),
            Err(e) => {
                tracing::warn!("Minimal key request failed ({e}), retrying with explicit headers");
                self.fetch_key(true).await
            }
        }
    }

    async fn check_reachability(&self) -> Result<(), TransportError> {
        self.client
            .get(&self.endpoint)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Credential(e.to_string()))
    }
}

// -- Default WebSocket transport --

/// Establishes a WebSocket data channel against the realtime endpoint.
/// Media flows as base64 PCM append messages on the same channel; over a
/// peer-connection transport it would ride a separate media track.
pub struct WsTransportFactory {
    url: String,
    model: String,
}

impl WsTransportFactory {
    pub fn new(config: &crate::config::ConnectionConfig) -> Self {
        Self {
            url: config.realtime_url.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl TransportFactory for WsTransportFactory {
    async fn establish(&self, credential: &str) -> Result<TransportHandle, TransportError> {
        let url = format!("{}?model={}", self.url, self.model);

        // Extract host from wss://host/... for the Host header
        let host = url
            .split("://")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .unwrap_or("api.openai.com");

        let request = http::Request::builder()
            .uri(&url)
            .header("Authorization", format!("Bearer {credential}"))
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| TransportError::Establish(e.to_string()))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::Establish(e.to_string()))?;
        let (mut ws_sink, mut ws_source) = ws_stream.split();
        tracing::info!("WebSocket transport established");

        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let (in_tx, in_rx) = mpsc::channel::<String>(256);
        let (signal_tx, _) = broadcast::channel(16);
        let open = Arc::new(AtomicBool::new(true));

        let pump_open = open.clone();
        let pump_signals = signal_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = out_rx.recv() => {
                        match outbound {
                            Some(json) => {
                                if let Err(e) = ws_sink.send(tungstenite::Message::Text(json.into())).await {
                                    tracing::error!("WebSocket send failed: {e}");
                                    pump_open.store(false, Ordering::SeqCst);
                                    let _ = pump_signals.send(ChannelSignal::Error(e.to_string()));
                                    let _ = pump_signals.send(ChannelSignal::Closed);
                                    break;
                                }
                            }
                            None => {
                                let _ = ws_sink.close().await;
                                break;
                            }
                        }
                    }
                    inbound = ws_source.next() => {
                        match inbound {
                            Some(Ok(tungstenite::Message::Text(text))) => {
                                let _ = in_tx.send(text.to_string()).await;
                            }
                            Some(Ok(tungstenite::Message::Close(_))) | None => {
                                tracing::info!("WebSocket closed by peer");
                                pump_open.store(false, Ordering::SeqCst);
                                let _ = pump_signals.send(ChannelSignal::Closed);
                                break;
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                tracing::error!("WebSocket error: {e}");
                                pump_open.store(false, Ordering::SeqCst);
                                let _ = pump_signals.send(ChannelSignal::Error(e.to_string()));
                                let _ = pump_signals.send(ChannelSignal::Closed);
                                break;
                            }
                        }
                    }
                }
            }
        });

        let channel = Arc::new(WsDataChannel {
            open,
            outbound: out_tx.clone(),
            signals: signal_tx,
            inbound: Mutex::new(Some(in_rx)),
        });
        let local_track = Arc::new(WsLocalTrack {
            enabled: AtomicBool::new(false),
            outbound: out_tx,
        });
        let peer = Arc::new(WsPeer::new());

        Ok(TransportHandle {
            peer,
            channel,
            local_track,
        })
    }
}

struct WsDataChannel {
    open: Arc<AtomicBool>,
    outbound: mpsc::Sender<String>,
    signals: broadcast::Sender<ChannelSignal>,
    inbound: Mutex<Option<mpsc::Receiver<String>>>,
}

impl DataChannel for WsDataChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    // All sends funnel through one mpsc into one writer task, so wire
    // order matches call order.
    fn send(&self, event: &ClientEvent) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        let json =
            serde_json::to_string(event).map_err(|e| TransportError::Send(e.to_string()))?;
        self.outbound
            .try_send(json)
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn signals(&self) -> broadcast::Receiver<ChannelSignal> {
        self.signals.subscribe()
    }

    fn take_inbound(&self) -> Option<mpsc::Receiver<String>> {
        self.inbound.lock().unwrap().take()
    }
}

struct WsLocalTrack {
    enabled: AtomicBool,
    outbound: mpsc::Sender<String>,
}

impl LocalTrack for WsLocalTrack {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn push_pcm(&self, samples: &[i16]) {
        if !self.is_enabled() {
            return;
        }
        let message = serde_json::json!({
            "type": "input_audio_buffer.append",
            "audio": encode_pcm(samples),
        });
        // Drop chunks if the writer is behind; lossy beats blocking audio
        let _ = self.outbound.try_send(message.to_string());
    }
}

/// Encode i16 PCM samples as little-endian bytes then base64.
fn encode_pcm(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(&bytes)
}

/// Over WebSocket the remote audio stream is live from establishment, so
/// the peer reports one already-live track and never emits arrivals.
struct WsPeer {
    live: RemoteTrack,
    tracks: Mutex<Option<mpsc::Receiver<RemoteTrack>>>,
    _track_tx: mpsc::Sender<RemoteTrack>,
}

impl WsPeer {
    fn new() -> Self {
        let (track_tx, track_rx) = mpsc::channel(4);
        Self {
            live: RemoteTrack {
                id: "remote-audio-0".to_string(),
            },
            tracks: Mutex::new(Some(track_rx)),
            _track_tx: track_tx,
        }
    }
}

impl PeerConnection for WsPeer {
    fn take_remote_tracks(&self) -> Option<mpsc::Receiver<RemoteTrack>> {
        self.tracks.lock().unwrap().take()
    }

    fn live_remote_track(&self) -> Option<RemoteTrack> {
        Some(self.live.clone())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Scripted data channel recording sent events and exposing manual
    /// open/close control.
    pub(crate) struct MockChannel {
        open: AtomicBool,
        pub sent: Mutex<Vec<ClientEvent>>,
        signals: broadcast::Sender<ChannelSignal>,
        inbound: Mutex<Option<mpsc::Receiver<String>>>,
        inbound_tx: mpsc::Sender<String>,
    }

    impl MockChannel {
        pub(crate) fn new(open: bool) -> Arc<Self> {
            let (signals, _) = broadcast::channel(16);
            let (inbound_tx, inbound_rx) = mpsc::channel(64);
            Arc::new(Self {
                open: AtomicBool::new(open),
                sent: Mutex::new(Vec::new()),
                signals,
                inbound: Mutex::new(Some(inbound_rx)),
                inbound_tx,
            })
        }

        pub(crate) fn set_open(&self, open: bool) {
            self.open.store(open, Ordering::SeqCst);
        }

        pub(crate) fn emit(&self, signal: ChannelSignal) {
            if matches!(signal, ChannelSignal::Open) {
                self.open.store(true, Ordering::SeqCst);
            }
            if matches!(signal, ChannelSignal::Closed) {
                self.open.store(false, Ordering::SeqCst);
            }
            let _ = self.signals.send(signal);
        }

        pub(crate) async fn inject(&self, json: &str) {
            let _ = self.inbound_tx.send(json.to_string()).await;
        }

        pub(crate) fn sent_types(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|e| {
                    let value: serde_json::Value =
                        serde_json::from_str(&serde_json::to_string(e).unwrap()).unwrap();
                    value["type"].as_str().unwrap().to_string()
                })
                .collect()
        }
    }

    impl DataChannel for MockChannel {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn send(&self, event: &ClientEvent) -> Result<(), TransportError> {
            if !self.is_open() {
                return Err(TransportError::ChannelClosed);
            }
            self.sent.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn signals(&self) -> broadcast::Receiver<ChannelSignal> {
            self.signals.subscribe()
        }

        fn take_inbound(&self) -> Option<mpsc::Receiver<String>> {
            self.inbound.lock().unwrap().take()
        }
    }

    pub(crate) struct MockTrack {
        pub enabled: AtomicBool,
    }

    impl MockTrack {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                enabled: AtomicBool::new(false),
            })
        }
    }

    impl LocalTrack for MockTrack {
        fn set_enabled(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::SeqCst);
        }

        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        fn push_pcm(&self, _samples: &[i16]) {}
    }

    pub(crate) struct MockPeer {
        pub live: Option<RemoteTrack>,
        tracks: Mutex<Option<mpsc::Receiver<RemoteTrack>>>,
        pub track_tx: mpsc::Sender<RemoteTrack>,
    }

    impl MockPeer {
        pub(crate) fn new(live: Option<RemoteTrack>) -> Arc<Self> {
            let (track_tx, track_rx) = mpsc::channel(4);
            Arc::new(Self {
                live,
                tracks: Mutex::new(Some(track_rx)),
                track_tx,
            })
        }
    }

    impl PeerConnection for MockPeer {
        fn take_remote_tracks(&self) -> Option<mpsc::Receiver<RemoteTrack>> {
            self.tracks.lock().unwrap().take()
        }

        fn live_remote_track(&self) -> Option<RemoteTrack> {
            self.live.clone()
        }
    }

    /// Factory double handing out pre-built channels and counting
    /// establishment calls.
    pub(crate) struct MockFactory {
        pub establishments: AtomicUsize,
        pub fail: AtomicBool,
        pub establish_delay: Mutex<Option<std::time::Duration>>,
        channels: Mutex<Vec<Arc<MockChannel>>>,
        pub tracks: Mutex<Vec<Arc<MockTrack>>>,
    }

    impl MockFactory {
        pub(crate) fn new(channels: Vec<Arc<MockChannel>>) -> Arc<Self> {
            Arc::new(Self {
                establishments: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                establish_delay: Mutex::new(None),
                channels: Mutex::new(channels),
                tracks: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TransportFactory for MockFactory {
        async fn establish(&self, _credential: &str) -> Result<TransportHandle, TransportError> {
            let delay = *self.establish_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Establish("scripted failure".to_string()));
            }
            self.establishments.fetch_add(1, Ordering::SeqCst);
            let channel = {
                let mut channels = self.channels.lock().unwrap();
                if channels.is_empty() {
                    MockChannel::new(true)
                } else {
                    channels.remove(0)
                }
            };
            let track = MockTrack::new();
            self.tracks.lock().unwrap().push(track.clone());
            Ok(TransportHandle {
                peer: MockPeer::new(None),
                channel,
                local_track: track,
            })
        }
    }

    pub(crate) struct MockCredentials {
        pub requests: AtomicUsize,
        pub fail: AtomicBool,
    }

    impl MockCredentials {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                requests: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl CredentialProvider for MockCredentials {
        async fn request_ephemeral_key(&self) -> Result<String, TransportError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Credential("scripted failure".to_string()));
            }
            Ok("ek_test".to_string())
        }
    }

    pub(crate) struct RecordingRemoteAudio {
        pub attached: Mutex<Vec<RemoteTrack>>,
    }

    impl RecordingRemoteAudio {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                attached: Mutex::new(Vec::new()),
            })
        }
    }

    impl RemoteAudioSink for RecordingRemoteAudio {
        fn attach(&self, track: RemoteTrack) {
            self.attached.lock().unwrap().push(track);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_pcm_produces_little_endian_base64() {
        // 256 in LE = [0x00, 0x01], 32767 in LE = [0xFF, 0x7F]
        let encoded = encode_pcm(&[256, 32767]);
        let expected = base64::engine::general_purpose::STANDARD.encode([0x00, 0x01, 0xFF, 0x7F]);
        assert_eq!(encoded, expected);
    }

    #[test]
    fn encode_pcm_handles_negative_values() {
        let encoded = encode_pcm(&[-1, -32768]);
        let expected = base64::engine::general_purpose::STANDARD.encode([0xFF, 0xFF, 0x00, 0x80]);
        assert_eq!(encoded, expected);
    }

    #[tokio::test]
    async fn disabled_local_track_drops_pcm() {
        let (out_tx, mut out_rx) = mpsc::channel::<String>(8);
        let track = WsLocalTrack {
            enabled: AtomicBool::new(false),
            outbound: out_tx,
        };
        track.push_pcm(&[1, 2, 3]);
        assert!(out_rx.try_recv().is_err());

        track.set_enabled(true);
        track.push_pcm(&[1, 2, 3]);
        let message = out_rx.try_recv().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(parsed["type"], "input_audio_buffer.append");
        assert!(parsed["audio"].is_string());
    }

    #[test]
    fn closed_channel_rejects_sends() {
        let (out_tx, _out_rx) = mpsc::channel::<String>(8);
        let (signal_tx, _) = broadcast::channel(4);
        let channel = WsDataChannel {
            open: Arc::new(AtomicBool::new(false)),
            outbound: out_tx,
            signals: signal_tx,
            inbound: Mutex::new(None),
        };
        assert!(matches!(
            channel.send(&ClientEvent::clear()),
            Err(TransportError::ChannelClosed)
        ));
    }

    #[test]
    fn ws_peer_reports_live_remote_track() {
        let peer = WsPeer::new();
        assert_eq!(
            peer.live_remote_track().unwrap().id,
            "remote-audio-0"
        );
        // The arrival stream exists but never produces for WebSocket peers
        assert!(peer.take_remote_tracks().is_some());
        assert!(peer.take_remote_tracks().is_none());
    }
}
