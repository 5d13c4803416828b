//! Real microphone and speaker through cpal.
//!
//! cpal streams are not `Send` on every platform, so each stream lives on a
//! dedicated thread that owns it until told to stop.

use crate::capture::{AudioCapture, AudioFormat, CaptureStream, MediaTracks};
use crate::error::VoiceError;
use crate::narration::AudioOutput;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Samples per frame handed to the recorder (30ms at 16kHz).
const DEFAULT_FRAME_SAMPLES: usize = 480;
/// Frames buffered before new ones are dropped.
const FRAME_QUEUE: usize = 256;
const PLAYBACK_POLL: Duration = Duration::from_millis(20);

/// The default input device.
#[derive(Debug, Clone)]
pub struct DeviceCapture {
    frame_samples: usize,
}

impl Default for DeviceCapture {
    fn default() -> Self {
        Self {
            frame_samples: DEFAULT_FRAME_SAMPLES,
        }
    }
}

impl DeviceCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the available input devices.
    pub fn list_input_devices() -> Result<Vec<String>, VoiceError> {
        let devices = cpal::default_host()
            .input_devices()
            .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

struct DeviceTracks {
    stop: Option<std_mpsc::Sender<()>>,
}

impl MediaTracks for DeviceTracks {
    fn stop_all(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

#[async_trait]
impl AudioCapture for DeviceCapture {
    async fn start_capture(&self) -> Result<CaptureStream, VoiceError> {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let frame_samples = self.frame_samples;

        std::thread::Builder::new()
            .name("assess-capture".to_string())
            .spawn(move || match open_input(frame_tx, frame_samples) {
                Ok((stream, format)) => {
                    let _ = ready_tx.send(Ok(format));
                    // Returns on an explicit stop or when the tracks are dropped.
                    let _ = stop_rx.recv();
                    drop(stream);
                    debug!("input stream closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| VoiceError::DeviceUnavailable(format!("capture thread: {}", e)))?;

        let format = ready_rx.await.map_err(|_| {
            VoiceError::DeviceUnavailable("capture thread exited during start-up".to_string())
        })??;
        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "microphone opened"
        );

        Ok(CaptureStream::new(
            format,
            frame_rx,
            Box::new(DeviceTracks {
                stop: Some(stop_tx),
            }),
        ))
    }
}

fn open_input(
    frame_tx: mpsc::Sender<Vec<f32>>,
    frame_samples: usize,
) -> Result<(cpal::Stream, AudioFormat), VoiceError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::DeviceUnavailable("no input device".to_string()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let format = AudioFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };

    let mut framer = Framer::new(frame_tx, frame_samples);
    let on_error = |e: cpal::StreamError| warn!(error = %e, "input stream error");
    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| framer.push(data.iter().copied()),
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                framer.push(data.iter().map(|s| *s as f32 / i16::MAX as f32))
            },
            on_error,
            None,
        ),
        other => {
            return Err(VoiceError::DeviceUnavailable(format!(
                "unsupported input sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;
    Ok((stream, format))
}

/// Groups callback buffers into fixed-size frames.
struct Framer {
    tx: mpsc::Sender<Vec<f32>>,
    buffer: Vec<f32>,
    frame_samples: usize,
}

impl Framer {
    fn new(tx: mpsc::Sender<Vec<f32>>, frame_samples: usize) -> Self {
        Self {
            tx,
            buffer: Vec::with_capacity(frame_samples),
            frame_samples: frame_samples.max(1),
        }
    }

    fn push(&mut self, samples: impl Iterator<Item = f32>) {
        for sample in samples {
            self.buffer.push(sample);
            if self.buffer.len() >= self.frame_samples {
                let frame = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.frame_samples));
                if self.tx.try_send(frame).is_err() {
                    // Recorder is gone or behind; the frame is dropped.
                    tracing::trace!("dropping input frame");
                }
            }
        }
    }
}

/// The default output device. Plays WAV payloads.
#[derive(Debug, Clone, Default)]
pub struct DeviceOutput;

impl DeviceOutput {
    pub fn new() -> Self {
        Self
    }
}

/// Raises the stop flag when the `play` future is dropped.
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

#[async_trait]
impl AudioOutput for DeviceOutput {
    async fn play(&self, audio: Vec<u8>) -> Result<(), VoiceError> {
        let (samples, format) = decode_wav(&audio)?;
        let stop = Arc::new(AtomicBool::new(false));
        let _guard = StopOnDrop(Arc::clone(&stop));
        let (done_tx, done_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("assess-playback".to_string())
            .spawn(move || {
                let _ = done_tx.send(play_blocking(samples, format, stop));
            })
            .map_err(|e| VoiceError::PlaybackError(format!("playback thread: {}", e)))?;

        done_rx
            .await
            .map_err(|_| VoiceError::PlaybackError("playback thread exited".to_string()))?
    }
}

fn decode_wav(audio: &[u8]) -> Result<(Vec<f32>, AudioFormat), VoiceError> {
    let reader = hound::WavReader::new(Cursor::new(audio))
        .map_err(|e| VoiceError::PlaybackError(format!("undecodable audio: {}", e)))?;
    let spec = reader.spec();
    let samples: Result<Vec<f32>, hound::Error> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect(),
        hound::SampleFormat::Int => reader
            .into_samples::<i16>()
            .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
            .collect(),
    };
    let samples = samples.map_err(|e| VoiceError::PlaybackError(e.to_string()))?;
    Ok((
        samples,
        AudioFormat {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        },
    ))
}

fn play_blocking(
    samples: Vec<f32>,
    format: AudioFormat,
    stop: Arc<AtomicBool>,
) -> Result<(), VoiceError> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| VoiceError::PlaybackError("no output device".to_string()))?;
    let config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let total = samples.len();
    let position = Arc::new(AtomicUsize::new(0));
    let cursor = Arc::clone(&position);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let start = cursor.load(Ordering::Acquire);
                for (i, out) in data.iter_mut().enumerate() {
                    *out = samples.get(start + i).copied().unwrap_or(0.0);
                }
                cursor.store((start + data.len()).min(total), Ordering::Release);
            },
            |e| warn!(error = %e, "output stream error"),
            None,
        )
        .map_err(|e| VoiceError::PlaybackError(e.to_string()))?;
    stream
        .play()
        .map_err(|e| VoiceError::PlaybackError(e.to_string()))?;

    while position.load(Ordering::Acquire) < total {
        if stop.load(Ordering::Acquire) {
            debug!("playback stopped early");
            return Ok(());
        }
        std::thread::sleep(PLAYBACK_POLL);
    }
    // Let the device drain its last buffer.
    std::thread::sleep(PLAYBACK_POLL);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::encode_wav;

    #[test]
    fn framer_emits_fixed_size_frames() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut framer = Framer::new(tx, 4);
        framer.push([0.1f32; 10].into_iter());
        assert_eq!(rx.try_recv().unwrap().len(), 4);
        assert_eq!(rx.try_recv().unwrap().len(), 4);
        assert!(rx.try_recv().is_err(), "partial frame must stay buffered");
    }

    #[test]
    fn decodes_recorded_wav() {
        let wav = encode_wav(&[0.0, 0.5, -0.5], AudioFormat::default()).unwrap();
        let (samples, format) = decode_wav(&wav).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(format, AudioFormat::default());
        assert!((samples[1] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn garbage_is_a_playback_error() {
        assert!(matches!(
            decode_wav(b"not audio"),
            Err(VoiceError::PlaybackError(_))
        ));
    }
}
