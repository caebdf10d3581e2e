// ABOUTME: Local microphone capture behind a collaborator trait, recorded to WAV for enrichment.
// ABOUTME: The cpal implementation tees PCM chunks into the transport's local track while held.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::transport::LocalTrack;

/// Brief tail kept after stop so in-flight audio buffers reach the file.
const STOP_TAIL: Duration = Duration::from_millis(300);

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no default input device available")]
    NoDevice,
    #[error("audio backend error: {0}")]
    Backend(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A finalized local recording awaiting enrichment by a transcription
/// collaborator.
#[derive(Debug, Clone)]
pub struct LocalRecording {
    pub wav_path: PathBuf,
    pub duration_ms: u64,
}

/// An audio artifact attached to a finalized assistant utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub path: Option<PathBuf>,
    pub duration_ms: u64,
}

/// Captures microphone audio while push-to-talk is held.
pub trait AudioCapture: Send + Sync {
    /// Cheap availability check used by the mobile connect preamble.
    fn probe(&self) -> Result<(), CaptureError>;

    /// Start capturing. PCM chunks are teed into `track` while it is
    /// enabled; the full take is written to a WAV file for enrichment.
    fn start(&self, track: Arc<dyn LocalTrack>) -> Result<Box<dyn ActiveRecording>, CaptureError>;
}

/// Handle to an in-progress capture. Dropping it without `stop()` also
/// ends the capture; the recording is then discarded.
#[async_trait]
pub trait ActiveRecording: Send {
    async fn stop(self: Box<Self>) -> Result<LocalRecording, CaptureError>;
}

/// Records the assistant's audio turn; the artifact construction itself is
/// owned by the audio manager collaborator, not this crate.
pub trait AssistantAudioRecorder: Send + Sync {
    fn begin(&self);
    fn finish(&self) -> Option<AudioClip>;
}

/// No-op assistant recorder for deployments without an audio manager wired.
pub struct NoopAssistantAudio;

impl AssistantAudioRecorder for NoopAssistantAudio {
    fn begin(&self) {}

    fn finish(&self) -> Option<AudioClip> {
        None
    }
}

/// Default capture implementation recording from the default cpal input
/// device into a kept temp WAV at 16-bit PCM.
pub struct CpalRecorder {
    sample_rate: u32,
    channels: u16,
}

impl CpalRecorder {
    pub fn new(config: &crate::config::AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
        }
    }
}

impl AudioCapture for CpalRecorder {
    fn probe(&self) -> Result<(), CaptureError> {
        cpal::default_host()
            .default_input_device()
            .map(|_| ())
            .ok_or(CaptureError::NoDevice)
    }

    fn start(&self, track: Arc<dyn LocalTrack>) -> Result<Box<dyn ActiveRecording>, CaptureError> {
        let sample_rate = self.sample_rate;
        let channels = self.channels;

        // cpal streams are not Send, so a dedicated thread owns the stream
        // and the handle talks to it over channels.
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel();

        std::thread::spawn(move || {
            let setup = build_capture(sample_rate, channels, track);
            let (stream, writer, recording, wav_path) = match setup {
                Ok(parts) => parts,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            let started = std::time::Instant::now();

            // Block until stop() fires or the handle is dropped.
            let _ = stop_rx.recv();

            std::thread::sleep(STOP_TAIL);
            recording.store(false, Ordering::Relaxed);
            drop(stream);

            let result = finalize_wav(&writer).map(|()| LocalRecording {
                wav_path,
                duration_ms: started.elapsed().as_millis() as u64,
            });
            let _ = done_tx.send(result);
        });

        ready_rx
            .recv()
            .map_err(|_| CaptureError::Backend("capture thread exited during setup".to_string()))??;
        tracing::info!("Local recording started");

        Ok(Box::new(CpalRecording {
            stop_tx: Some(stop_tx),
            done_rx: Some(done_rx),
        }))
    }
}

type SharedWriter = Arc<Mutex<Option<hound::WavWriter<std::io::BufWriter<std::fs::File>>>>>;

fn build_capture(
    sample_rate: u32,
    channels: u16,
    track: Arc<dyn LocalTrack>,
) -> Result<(cpal::Stream, SharedWriter, Arc<AtomicBool>, PathBuf), CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;
    tracing::info!("Recording from: {}", device.name().unwrap_or_default());

    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    // keep() disables auto-deletion on drop; the enrichment consumer owns cleanup.
    let (_file, wav_path) = tempfile::Builder::new()
        .prefix("voxlink_")
        .suffix(".wav")
        .tempfile()?
        .keep()
        .map_err(|e| CaptureError::Backend(e.to_string()))?;

    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let writer: SharedWriter = Arc::new(Mutex::new(Some(
        hound::WavWriter::create(&wav_path, spec).map_err(|e| CaptureError::Backend(e.to_string()))?,
    )));

    let recording = Arc::new(AtomicBool::new(true));
    let recording_cb = recording.clone();
    let writer_cb = writer.clone();

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if !recording_cb.load(Ordering::Relaxed) {
                    return;
                }
                track.push_pcm(data);
                if let Ok(mut guard) = writer_cb.lock() {
                    if let Some(ref mut w) = *guard {
                        for &sample in data {
                            let _ = w.write_sample(sample);
                        }
                    }
                }
            },
            move |err| {
                tracing::error!("Audio input error: {err}");
            },
            None,
        )
        .map_err(|e| CaptureError::Backend(e.to_string()))?;

    stream.play().map_err(|e| CaptureError::Backend(e.to_string()))?;

    Ok((stream, writer, recording, wav_path))
}

fn finalize_wav(writer: &SharedWriter) -> Result<(), CaptureError> {
    if let Ok(mut guard) = writer.lock() {
        if let Some(w) = guard.take() {
            w.finalize().map_err(|e| CaptureError::Backend(e.to_string()))?;
        }
    }
    Ok(())
}

struct CpalRecording {
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    done_rx: Option<oneshot::Receiver<Result<LocalRecording, CaptureError>>>,
}

#[async_trait]
impl ActiveRecording for CpalRecording {
    async fn stop(self: Box<Self>) -> Result<LocalRecording, CaptureError> {
        let mut this = self;
        if let Some(tx) = this.stop_tx.take() {
            let _ = tx.send(());
        }
        match this.done_rx.take() {
            Some(rx) => rx
                .await
                .map_err(|_| CaptureError::Backend("capture thread dropped".to_string()))?,
            None => Err(CaptureError::Backend("recording already stopped".to_string())),
        }
    }
}
