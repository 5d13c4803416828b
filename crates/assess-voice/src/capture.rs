//! Microphone capture and recording.
//!
//! An [`AudioCapture`] implementation hands out a [`CaptureStream`]: a
//! channel of normalized `f32` frames plus the [`MediaTracks`] that hold the
//! hardware. Releasing the stream (explicitly or by dropping it) stops every
//! track, so the microphone is freed on every exit path.

use crate::error::VoiceError;
use crate::vad::rms;
use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::future::Future;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Sample rate and channel count of a capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g. 16000, 48000).
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
        }
    }
}

/// The hardware side of a capture stream.
pub trait MediaTracks: Send {
    /// Stops every underlying track. Called exactly once per stream.
    fn stop_all(&mut self);
}

/// A live microphone stream.
pub struct CaptureStream {
    format: AudioFormat,
    frames: mpsc::Receiver<Vec<f32>>,
    tracks: Option<Box<dyn MediaTracks>>,
    lease: Option<MicrophoneLease>,
}

impl CaptureStream {
    pub fn new(
        format: AudioFormat,
        frames: mpsc::Receiver<Vec<f32>>,
        tracks: Box<dyn MediaTracks>,
    ) -> Self {
        Self {
            format,
            frames,
            tracks: Some(tracks),
            lease: None,
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Waits for the next frame. `None` once the device stops producing.
    pub async fn next_frame(&mut self) -> Option<Vec<f32>> {
        if self.tracks.is_none() {
            return None;
        }
        self.frames.recv().await
    }

    /// Stops all tracks and closes the frame channel. Idempotent.
    pub fn release(&mut self) {
        if let Some(mut tracks) = self.tracks.take() {
            tracks.stop_all();
            tracing::debug!("capture tracks released");
        }
        self.frames.close();
        self.lease.take();
    }

    pub fn is_released(&self) -> bool {
        self.tracks.is_none()
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CaptureStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureStream")
            .field("format", &self.format)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Source of microphone streams.
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Acquires the microphone.
    ///
    /// Fails with `DeviceUnavailable` when there is no input device or
    /// permission was denied.
    async fn start_capture(&self) -> Result<CaptureStream, VoiceError>;
}

/// Resets the microphone's active flag when dropped.
#[derive(Debug)]
struct MicrophoneLease(Arc<AtomicBool>);

impl Drop for MicrophoneLease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Exclusive access to an [`AudioCapture`]: at most one stream is alive at a
/// time.
#[derive(Clone)]
pub struct Microphone {
    capture: Arc<dyn AudioCapture>,
    active: Arc<AtomicBool>,
}

impl Microphone {
    pub fn new(capture: Arc<dyn AudioCapture>) -> Self {
        Self {
            capture,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Opens a stream, or fails with `CaptureBusy` while another one from
    /// this microphone is still alive.
    pub async fn open(&self) -> Result<CaptureStream, VoiceError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(VoiceError::CaptureBusy);
        }
        let lease = MicrophoneLease(Arc::clone(&self.active));

        let mut stream = self.capture.start_capture().await?;
        stream.lease = Some(lease);
        Ok(stream)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Microphone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Microphone")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Captured audio for one turn.
#[derive(Debug, Clone)]
pub struct Recording {
    pub samples: Vec<f32>,
    pub format: AudioFormat,
}

impl Recording {
    /// Mime type of [`Recording::to_wav`] output.
    pub const MIME_TYPE: &'static str = "audio/wav";

    pub fn duration(&self) -> Duration {
        let per_second = self.format.sample_rate as u64 * self.format.channels.max(1) as u64;
        if per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.samples.len() as u64 * 1000 / per_second)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Encodes the samples as 16-bit PCM WAV.
    pub fn to_wav(&self) -> Result<Vec<u8>, VoiceError> {
        encode_wav(&self.samples, self.format)
    }
}

/// Encodes normalized `f32` samples as 16-bit PCM WAV.
pub fn encode_wav(samples: &[f32], format: AudioFormat) -> Result<Vec<u8>, VoiceError> {
    let spec = WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|e| VoiceError::Encoding(e.to_string()))?;
        for sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(value)
                .map_err(|e| VoiceError::Encoding(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceError::Encoding(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

/// Records frames from `stream` until `stop` resolves or the stream ends.
///
/// The RMS level of every frame is published on `level_tx` for the voice
/// activity detector. Returns the recording together with the stop signal's
/// output, or `None` when the stream ended first.
///
/// # Errors
///
/// `DeviceUnavailable` if the stream ended before producing any audio.
pub async fn record_until<F, T>(
    stream: &mut CaptureStream,
    level_tx: &watch::Sender<f32>,
    stop: F,
) -> Result<(Recording, Option<T>), VoiceError>
where
    F: Future<Output = T>,
{
    tokio::pin!(stop);
    let mut samples = Vec::new();

    let signal = loop {
        tokio::select! {
            biased;
            value = &mut stop => break Some(value),
            frame = stream.next_frame() => match frame {
                Some(frame) => {
                    level_tx.send_replace(rms(&frame));
                    samples.extend_from_slice(&frame);
                }
                None => break None,
            },
        }
    };

    if signal.is_none() && samples.is_empty() {
        return Err(VoiceError::DeviceUnavailable(
            "input stream ended before any audio was captured".to_string(),
        ));
    }

    Ok((
        Recording {
            samples,
            format: stream.format(),
        },
        signal,
    ))
}
