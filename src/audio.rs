pub const SAMPLE_RATE_HZ: u32 = 16_000;
pub const CHANNELS: u16 = 1;
pub const WAV_MIME_TYPE: &str = "audio/wav";

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::CaptureError;

#[cfg(feature = "desktop")]
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
#[cfg(feature = "desktop")]
use cpal::{SampleFormat, Stream};
#[cfg(feature = "desktop")]
use std::sync::mpsc::{self, RecvTimeoutError, Sender, SyncSender, TryRecvError};
#[cfg(feature = "desktop")]
use std::thread::{self, JoinHandle};
#[cfg(feature = "desktop")]
use std::time::Duration;

/// One finalized take, ready to be inlined into a model request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AudioPayload {
    pub mime_type: String,
    pub data: String,
}

/// Scoped microphone acquisition for a single take.
pub trait AudioCapture {
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Releases the device and produces the encoded take.
    fn finish(&mut self) -> Result<AudioPayload, CaptureError>;

    /// Releases the device and discards whatever was captured.
    fn cancel(&mut self);
}

pub fn pcm_i16_to_f32(samples: &[i16]) -> Vec<f32> {
    const SCALE: f32 = i16::MAX as f32;
    samples
        .iter()
        .map(|sample| f32::from(*sample) / SCALE)
        .collect()
}

pub fn downsample_to_16k(input: &[f32], source_sample_rate_hz: u32) -> Vec<f32> {
    if source_sample_rate_hz == SAMPLE_RATE_HZ {
        return input.to_vec();
    }

    if source_sample_rate_hz < SAMPLE_RATE_HZ {
        return Vec::new();
    }

    let ratio = source_sample_rate_hz as f32 / SAMPLE_RATE_HZ as f32;
    let output_length = (input.len() as f32 / ratio).floor() as usize;
    let mut output = Vec::with_capacity(output_length);

    let mut position = 0usize;
    for index in 0..output_length {
        let next_position = (((index + 1) as f32 * ratio).floor() as usize).min(input.len());
        let window = &input[position..next_position];
        let average = if window.is_empty() {
            0.0
        } else {
            window.iter().sum::<f32>() / window.len() as f32
        };
        output.push(average);
        position = next_position;
    }

    output
}

/// Mono f32 samples at `sample_rate_hz` to a base64 16-bit WAV payload.
/// Inputs above 16 kHz are downsampled; slower inputs keep their rate.
pub fn encode_payload(samples: &[f32], sample_rate_hz: u32) -> Result<AudioPayload, CaptureError> {
    if sample_rate_hz == 0 {
        return Err(CaptureError::Encoding("sample rate must be positive".to_string()));
    }

    let (mono, rate) = if sample_rate_hz > SAMPLE_RATE_HZ {
        (downsample_to_16k(samples, sample_rate_hz), SAMPLE_RATE_HZ)
    } else {
        (samples.to_vec(), sample_rate_hz)
    };

    if mono.is_empty() {
        return Err(CaptureError::EmptyRecording);
    }

    let wav = encode_wav(&mono, rate)?;
    Ok(AudioPayload {
        mime_type: WAV_MIME_TYPE.to_string(),
        data: STANDARD.encode(wav),
    })
}

fn encode_wav(samples: &[f32], sample_rate_hz: u32) -> Result<Vec<u8>, CaptureError> {
    let spec = hound::WavSpec {
        channels: CHANNELS,
        sample_rate: sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|error| CaptureError::Encoding(format!("failed to start wav: {error}")))?;

        for sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            let converted = (clamped * i16::MAX as f32) as i16;
            writer
                .write_sample(converted)
                .map_err(|error| CaptureError::Encoding(format!("failed to write sample: {error}")))?;
        }

        writer
            .finalize()
            .map_err(|error| CaptureError::Encoding(format!("failed to finalize wav: {error}")))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(feature = "desktop")]
#[derive(Debug, Clone, Serialize)]
pub struct InputMicrophone {
    pub id: String,
    pub label: String,
    pub is_default: bool,
}

#[cfg(feature = "desktop")]
struct LiveInputStream {
    stream: Stream,
    sample_rate_hz: u32,
}

#[cfg(feature = "desktop")]
struct CapturedAudio {
    samples: Vec<f32>,
    sample_rate_hz: u32,
}

#[cfg(feature = "desktop")]
struct CaptureWorker {
    stop_tx: Sender<()>,
    handle: JoinHandle<Result<CapturedAudio, CaptureError>>,
}

#[cfg(feature = "desktop")]
const FRAME_QUEUE_DEPTH: usize = 512;
#[cfg(feature = "desktop")]
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Records from a cpal input device. The stream is owned by a worker thread
/// for the lifetime of one take, so the recorder itself stays `Send`.
#[cfg(feature = "desktop")]
pub struct MicrophoneRecorder {
    microphone_id: Option<String>,
    worker: Option<CaptureWorker>,
}

#[cfg(feature = "desktop")]
impl MicrophoneRecorder {
    pub fn new(microphone_id: Option<String>) -> Self {
        Self {
            microphone_id,
            worker: None,
        }
    }

    pub fn set_microphone(&mut self, microphone_id: Option<String>) {
        self.microphone_id = microphone_id;
    }

    fn stop_worker(&mut self) -> Option<Result<CapturedAudio, CaptureError>> {
        let worker = self.worker.take()?;
        let _ = worker.stop_tx.send(());
        Some(worker.handle.join().unwrap_or_else(|_| {
            Err(CaptureError::StreamFailed(
                "capture thread panicked".to_string(),
            ))
        }))
    }
}

#[cfg(feature = "desktop")]
impl AudioCapture for MicrophoneRecorder {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), CaptureError>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let microphone_id = self.microphone_id.clone();

        let handle = thread::Builder::new()
            .name("microphone-capture".to_string())
            .spawn(move || {
                let (frame_tx, frame_rx) = mpsc::sync_channel::<Vec<f32>>(FRAME_QUEUE_DEPTH);
                let live = match build_input_stream(microphone_id.as_deref(), frame_tx) {
                    Ok(live) => {
                        let _ = ready_tx.send(Ok(()));
                        live
                    }
                    Err(error) => {
                        let _ = ready_tx.send(Err(error.clone()));
                        return Err(error);
                    }
                };

                let mut samples = Vec::new();
                loop {
                    match frame_rx.recv_timeout(POLL_INTERVAL) {
                        Ok(frame) => samples.extend_from_slice(&frame),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                        break;
                    }
                }

                drop(live.stream);
                while let Ok(frame) = frame_rx.try_recv() {
                    samples.extend_from_slice(&frame);
                }

                Ok(CapturedAudio {
                    samples,
                    sample_rate_hz: live.sample_rate_hz,
                })
            })
            .map_err(|error| {
                CaptureError::StreamFailed(format!("failed to spawn capture thread: {error}"))
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(CaptureWorker { stop_tx, handle });
                Ok(())
            }
            Ok(Err(error)) => {
                let _ = handle.join();
                Err(error)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::StreamFailed(
                    "capture thread exited before the stream started".to_string(),
                ))
            }
        }
    }

    fn finish(&mut self) -> Result<AudioPayload, CaptureError> {
        let captured = self.stop_worker().ok_or(CaptureError::EmptyRecording)??;
        log::debug!(
            "captured {} samples at {} Hz",
            captured.samples.len(),
            captured.sample_rate_hz
        );
        encode_payload(&captured.samples, captured.sample_rate_hz)
    }

    fn cancel(&mut self) {
        let _ = self.stop_worker();
    }
}

#[cfg(feature = "desktop")]
impl Drop for MicrophoneRecorder {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(feature = "desktop")]
pub fn list_input_microphones() -> Result<Vec<InputMicrophone>, CaptureError> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|device| device.name().ok());
    let devices = host.input_devices().map_err(|error| {
        CaptureError::DeviceUnavailable(format!("failed to enumerate input devices: {error}"))
    })?;

    let mut microphones = Vec::new();
    for (index, device) in devices.enumerate() {
        let label = device
            .name()
            .unwrap_or_else(|_| format!("Microphone {}", index + 1));
        let is_default = default_name.as_deref() == Some(label.as_str());
        microphones.push(InputMicrophone {
            id: index.to_string(),
            label,
            is_default,
        });
    }

    Ok(microphones)
}

#[cfg(feature = "desktop")]
fn build_input_stream(
    microphone_id: Option<&str>,
    frame_tx: SyncSender<Vec<f32>>,
) -> Result<LiveInputStream, CaptureError> {
    let host = cpal::default_host();
    let device = resolve_input_device(&host, microphone_id)?;
    let supported = device.default_input_config().map_err(|error| {
        CaptureError::DeviceUnavailable(format!("failed to get default input config: {error}"))
    })?;

    let sample_format = supported.sample_format();
    let stream_config = supported.config();
    let sample_rate_hz = stream_config.sample_rate.0;
    let channels = usize::from(stream_config.channels.max(1));

    let error_callback = move |error: cpal::StreamError| {
        log::error!("microphone stream error: {error}");
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _| {
                let _ = frame_tx.try_send(interleaved_f32_to_mono(data, channels));
            },
            error_callback,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _| {
                let _ = frame_tx.try_send(interleaved_i16_to_mono(data, channels));
            },
            error_callback,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _| {
                let _ = frame_tx.try_send(interleaved_u16_to_mono(data, channels));
            },
            error_callback,
            None,
        ),
        _ => {
            return Err(CaptureError::StreamFailed(format!(
                "unsupported input sample format: {:?}",
                sample_format
            )));
        }
    }
    .map_err(|error| CaptureError::StreamFailed(format!("failed to build input stream: {error}")))?;

    stream
        .play()
        .map_err(|error| CaptureError::StreamFailed(format!("failed to start input stream: {error}")))?;

    Ok(LiveInputStream {
        stream,
        sample_rate_hz,
    })
}

#[cfg(feature = "desktop")]
fn resolve_input_device(
    host: &cpal::Host,
    microphone_id: Option<&str>,
) -> Result<cpal::Device, CaptureError> {
    if let Some(raw_id) = microphone_id {
        let trimmed = raw_id.trim();
        if !trimmed.is_empty() {
            let index = trimmed.parse::<usize>().map_err(|_| {
                CaptureError::DeviceUnavailable(format!("invalid microphone id: {trimmed}"))
            })?;
            let device = host
                .input_devices()
                .map_err(|error| {
                    CaptureError::DeviceUnavailable(format!(
                        "failed to enumerate input devices: {error}"
                    ))
                })?
                .nth(index);
            return device.ok_or_else(|| {
                CaptureError::DeviceUnavailable(format!("microphone not found for id {trimmed}"))
            });
        }
    }

    if let Some(default) = host.default_input_device() {
        return Ok(default);
    }

    host.input_devices()
        .map_err(|error| {
            CaptureError::DeviceUnavailable(format!("failed to enumerate input devices: {error}"))
        })?
        .next()
        .ok_or_else(|| CaptureError::DeviceUnavailable("no input microphone is available".to_string()))
}

#[cfg(feature = "desktop")]
fn interleaved_f32_to_mono(input: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return input.to_vec();
    }

    input
        .chunks_exact(channels)
        .map(|frame| frame.iter().copied().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(feature = "desktop")]
fn interleaved_i16_to_mono(input: &[i16], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return pcm_i16_to_f32(input);
    }

    let scale = i16::MAX as f32;
    input
        .chunks_exact(channels)
        .map(|frame| {
            let sum = frame.iter().map(|sample| *sample as f32 / scale).sum::<f32>();
            sum / channels as f32
        })
        .collect()
}

#[cfg(feature = "desktop")]
fn interleaved_u16_to_mono(input: &[u16], channels: usize) -> Vec<f32> {
    let to_f32 = |sample: &u16| (*sample as f32 / u16::MAX as f32) * 2.0 - 1.0;
    if channels <= 1 {
        return input.iter().map(to_f32).collect();
    }

    input
        .chunks_exact(channels)
        .map(|frame| frame.iter().map(to_f32).sum::<f32>() / channels as f32)
        .collect()
}
