use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::realtime::{
    AudioInput, AudioOutput, MicrophoneStream, REALTIME_SAMPLE_RATE, SessionError, SessionResult,
};

/// Bytes per PCM16 mono frame.
const FRAME_BYTES: usize = 2;

fn realtime_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: REALTIME_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Number of bytes covering `interval` of realtime audio, frame aligned.
pub fn chunk_len(interval: Duration) -> usize {
    let bytes_per_sec = REALTIME_SAMPLE_RATE as u128 * FRAME_BYTES as u128;
    let len = (bytes_per_sec * interval.as_millis() / 1000) as usize;
    (len - len % FRAME_BYTES).max(FRAME_BYTES)
}

// =============================================================================
// Input
// =============================================================================

/// Audio input that replays a WAV file as if it were a microphone.
///
/// The file must be 16-bit PCM mono at 24kHz.
#[derive(Debug, Clone)]
pub struct WavFileInput {
    path: PathBuf,
    paced: bool,
}

impl WavFileInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            paced: true,
        }
    }

    /// Deliver chunks as fast as they are requested instead of in real time.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AudioInput for WavFileInput {
    async fn open(&self) -> SessionResult<Box<dyn MicrophoneStream>> {
        let path = self.path.clone();
        let pcm = tokio::task::spawn_blocking(move || read_pcm16(&path))
            .await
            .map_err(|e| SessionError::Permission(format!("Audio input task failed: {e}")))??;

        debug!("Opened WAV input {} ({} bytes)", self.path.display(), pcm.len());
        Ok(Box::new(WavMicrophone::new(pcm, self.paced)))
    }
}

fn read_pcm16(path: &Path) -> SessionResult<Bytes> {
    let reader = WavReader::open(path).map_err(|e| {
        SessionError::Permission(format!("Cannot open {}: {e}", path.display()))
    })?;

    let spec = reader.spec();
    if spec != realtime_spec() {
        return Err(SessionError::InvalidConfiguration(format!(
            "{} must be 16-bit PCM mono at {} Hz, got {} bits, {} channel(s) at {} Hz",
            path.display(),
            REALTIME_SAMPLE_RATE,
            spec.bits_per_sample,
            spec.channels,
            spec.sample_rate
        )));
    }

    let mut pcm = Vec::with_capacity(reader.len() as usize * FRAME_BYTES);
    for sample in reader.into_samples::<i16>() {
        let sample = sample.map_err(|e| {
            SessionError::InvalidConfiguration(format!("Corrupt audio in {}: {e}", path.display()))
        })?;
        pcm.extend_from_slice(&sample.to_le_bytes());
    }

    Ok(Bytes::from(pcm))
}

/// Microphone stream over an in-memory PCM16 buffer.
#[derive(Debug)]
pub struct WavMicrophone {
    pcm: Bytes,
    position: usize,
    paced: bool,
    live: bool,
}

impl WavMicrophone {
    pub fn new(pcm: Bytes, paced: bool) -> Self {
        Self {
            pcm,
            position: 0,
            paced,
            live: true,
        }
    }
}

#[async_trait]
impl MicrophoneStream for WavMicrophone {
    async fn next_chunk(&mut self, interval: Duration) -> Option<Bytes> {
        if !self.live || self.position >= self.pcm.len() {
            return None;
        }

        if self.paced {
            tokio::time::sleep(interval).await;
            // stop() may have run while we slept
            if !self.live {
                return None;
            }
        }

        let end = (self.position + chunk_len(interval)).min(self.pcm.len());
        let chunk = self.pcm.slice(self.position..end);
        self.position = end;
        Some(chunk)
    }

    fn stop(&mut self) {
        self.live = false;
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

// =============================================================================
// Output
// =============================================================================

/// Audio output that records assistant audio to a WAV file.
///
/// The file is finalized on [`AudioOutput::detach`]; chunks played after that
/// are dropped.
pub struct WavFileOutput {
    path: PathBuf,
    writer: Mutex<Option<WavWriter<BufWriter<File>>>>,
}

impl WavFileOutput {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, hound::Error> {
        let path = path.into();
        let writer = WavWriter::create(&path, realtime_spec())?;
        Ok(Self {
            path,
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioOutput for WavFileOutput {
    fn play(&self, chunk: Bytes) {
        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return;
        };

        for frame in chunk.chunks_exact(FRAME_BYTES) {
            let sample = i16::from_le_bytes([frame[0], frame[1]]);
            if let Err(e) = writer.write_sample(sample) {
                warn!("Failed to write audio to {}: {}", self.path.display(), e);
                return;
            }
        }
    }

    fn detach(&self) {
        if let Some(writer) = self.writer.lock().take()
            && let Err(e) = writer.finalize()
        {
            warn!("Failed to finalize {}: {}", self.path.display(), e);
        }
    }
}

impl std::fmt::Debug for WavFileOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavFileOutput")
            .field("path", &self.path)
            .field("open", &self.writer.lock().is_some())
            .finish()
    }
}
