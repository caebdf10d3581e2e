// ABOUTME: Orchestrates connect/reconnect: credentials, transport establishment, channel wiring.
// ABOUTME: A connect gate guarantees one transport establishment under concurrent callers.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;

use voxlink_protocol::{ClientEvent, SessionConfig, TranscriptionConfig};

use crate::capture::AudioCapture;
use crate::config::{ConnectionConfig, ConversationConfig, DeviceClass};
use crate::connection::ConnectionState;
use crate::router::EventRouter;
use crate::session::{SharedSession, Status, StatusSink};
use crate::transport::{
    ChannelSignal, CredentialProvider, DataChannel, LocalTrack, RemoteAudioSink, TransportError,
    TransportFactory, TransportHandle,
};

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("a concurrent connect attempt failed")]
    AttemptFailed,
}

/// Owns the transport handle and drives the connection state machine
/// through the connect/reconnect sequence.
pub struct ConnectionLifecycleService {
    session: SharedSession,
    connection_config: ConnectionConfig,
    conversation: ConversationConfig,
    credentials: Arc<dyn CredentialProvider>,
    factory: Arc<dyn TransportFactory>,
    capture: Arc<dyn AudioCapture>,
    status: Arc<dyn StatusSink>,
    router: Arc<EventRouter>,
    remote_audio: Arc<dyn RemoteAudioSink>,
    handle: Mutex<Option<TransportHandle>>,
    connect_gate: tokio::sync::Mutex<()>,
    attempt_epoch: AtomicU64,
    transport_epoch: Arc<AtomicU64>,
}

impl ConnectionLifecycleService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: SharedSession,
        connection_config: ConnectionConfig,
        conversation: ConversationConfig,
        credentials: Arc<dyn CredentialProvider>,
        factory: Arc<dyn TransportFactory>,
        capture: Arc<dyn AudioCapture>,
        status: Arc<dyn StatusSink>,
        router: Arc<EventRouter>,
        remote_audio: Arc<dyn RemoteAudioSink>,
    ) -> Self {
        Self {
            session,
            connection_config,
            conversation,
            credentials,
            factory,
            capture,
            status,
            router,
            remote_audio,
            handle: Mutex::new(None),
            connect_gate: tokio::sync::Mutex::new(()),
            attempt_epoch: AtomicU64::new(0),
            transport_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Connect or reconnect. A caller arriving while an attempt is in
    /// flight waits for that attempt and reuses its outcome instead of
    /// establishing a parallel transport.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let observed_epoch = self.attempt_epoch.load(Ordering::SeqCst);
        let _gate = self.connect_gate.lock().await;

        if self.attempt_epoch.load(Ordering::SeqCst) != observed_epoch {
            // Another caller's attempt settled while we waited on the gate
            return if self.session.connection().is_connected() {
                Ok(())
            } else {
                Err(ConnectError::AttemptFailed)
            };
        }
        if self.session.connection().is_connected() {
            return Ok(());
        }
        self.attempt_epoch.fetch_add(1, Ordering::SeqCst);

        self.session
            .connection()
            .transition(ConnectionState::Connecting, "connect_requested");
        self.status.status_changed(Status::Connecting);

        if self.connection_config.device_class == DeviceClass::Mobile {
            // Permission probes are flaky on constrained devices; failures
            // here are logged and the connect proceeds regardless.
            if let Err(e) = self.capture.probe() {
                tracing::warn!("Microphone probe failed: {e}");
            }
            if let Err(e) = self.credentials.check_reachability().await {
                tracing::warn!("Reachability check failed: {e}");
            }
        }

        match self.establish_and_wire().await {
            Ok(()) => {
                self.session
                    .connection()
                    .transition(ConnectionState::Connected, "peer_established");
                self.status.status_changed(Status::Ready);
                Ok(())
            }
            Err(e) => {
                self.session
                    .connection()
                    .transition(ConnectionState::Failed, "connect_error");
                self.session.set_last_error(e.to_string());
                self.status.present_error(&e.to_string());
                self.status.status_changed(Status::ConnectionFailed);
                Err(e)
            }
        }
    }

    async fn establish_and_wire(&self) -> Result<(), ConnectError> {
        let credential = self.credentials.request_ephemeral_key().await?;
        let handle = self.factory.establish(&credential).await?;

        let channel = handle.channel.clone();
        let peer = handle.peer.clone();

        // Replace any previous handle wholesale. Teardown of the old
        // transport is a session-cleanup concern, not handled here.
        *self.handle.lock().unwrap() = Some(handle);

        let epoch = self.transport_epoch.fetch_add(1, Ordering::SeqCst) + 1;

        // Channel lifecycle. The watcher ignores signals from a superseded
        // transport so a stale close cannot corrupt a newer connection.
        {
            let session = self.session.clone();
            let status = self.status.clone();
            let conversation = self.conversation.clone();
            let chan = channel.clone();
            let current_epoch = self.transport_epoch.clone();
            let mut signals = channel.signals();
            tokio::spawn(async move {
                loop {
                    match signals.recv().await {
                        Ok(ChannelSignal::Open) => {
                            if current_epoch.load(Ordering::SeqCst) != epoch {
                                break;
                            }
                            if !session.connection().is_connected() {
                                session
                                    .connection()
                                    .transition(ConnectionState::Connected, "data_channel_open");
                            }
                            status.status_changed(Status::Ready);
                            send_session_bootstrap(chan.as_ref(), &conversation);
                        }
                        Ok(ChannelSignal::Closed) => {
                            if current_epoch.load(Ordering::SeqCst) == epoch {
                                session.connection().transition(
                                    ConnectionState::Reconnecting,
                                    "data_channel_close",
                                );
                                status.status_changed(Status::Reconnecting);
                            }
                            break;
                        }
                        Ok(ChannelSignal::Error(e)) => {
                            tracing::warn!("Data channel error: {e}");
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        // Remote track handling, hydrating any track that went live before
        // listeners were attached.
        if let Some(mut tracks) = peer.take_remote_tracks() {
            let sink = self.remote_audio.clone();
            tokio::spawn(async move {
                while let Some(track) = tracks.recv().await {
                    sink.attach(track);
                }
            });
        }
        if let Some(track) = peer.live_remote_track() {
            self.remote_audio.attach(track);
        }

        // Bind the router to this channel's inbound stream
        match channel.take_inbound() {
            Some(inbound) => {
                tokio::spawn(self.router.clone().run(inbound));
            }
            None => tracing::warn!("Inbound stream already taken, router not rebound"),
        }

        if channel.is_open() {
            send_session_bootstrap(channel.as_ref(), &self.conversation);
        }
        Ok(())
    }

    /// Wait for the data channel to open, bounded by `timeout`. Resolves
    /// `false` on timeout or terminal channel failure. First settlement
    /// wins; the signal receiver and timer are dropped exactly once.
    pub async fn wait_for_data_channel_open(&self, timeout: Duration) -> bool {
        let Some(channel) = self.channel() else {
            return false;
        };
        if channel.is_open() {
            return true;
        }
        let mut signals = channel.signals();
        // The channel may have opened between the check and the subscribe
        if channel.is_open() {
            return true;
        }
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return false,
                signal = signals.recv() => match signal {
                    Ok(ChannelSignal::Open) => return true,
                    Ok(ChannelSignal::Closed) | Ok(ChannelSignal::Error(_)) => return false,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return false,
                },
            }
        }
    }

    pub fn channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.handle
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| h.channel.clone())
    }

    pub fn local_track(&self) -> Option<Arc<dyn LocalTrack>> {
        self.handle
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| h.local_track.clone())
    }
}

/// Push the system prompt and session configuration after the channel
/// opens. Send failures are logged; the watcher or a later PTT press will
/// surface a dead channel soon enough.
fn send_session_bootstrap(channel: &dyn DataChannel, conversation: &ConversationConfig) {
    if let Err(e) = channel.send(&ClientEvent::system_prompt(&conversation.system_prompt)) {
        tracing::error!("Failed to send system prompt: {e}");
    }
    let session = SessionConfig {
        instructions: None,
        voice: Some(conversation.voice.clone()),
        input_audio_transcription: Some(TranscriptionConfig {
            model: conversation.transcription_model.clone(),
        }),
        tools: Vec::new(),
    };
    if let Err(e) = channel.send(&ClientEvent::session_update(session)) {
        tracing::error!("Failed to send session configuration: {e}");
    }
}
