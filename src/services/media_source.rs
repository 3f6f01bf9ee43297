//! Media Sources
//!
//! Turns a catalog entry into a sequence of frames for the streaming worker.
//! MP3 files are demuxed with Symphonia, one packet per frame, so the sink
//! receives whole frames it can forward untouched. Formats without a frame
//! parser are cut into fixed-size chunks.

use crate::error::{AppError, Result};
use crate::models::{MediaKind, MediaRecord};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use tracing::{debug, info, warn};

/// Chunk size for formats streamed without a frame parser
pub const CHUNK_SIZE: usize = 4096;

/// Length of an MPEG audio frame header
const MPEG_HEADER_LEN: usize = 4;

/// Fallback frame length when the container does not tell
const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(26);

/// The smallest unit written to a broadcast sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
    pub duration: Duration,
}

#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Option<Frame>;

    /// Silence with the same length and cadence as `frame`. `None` if the
    /// format has no silent equivalent; the worker then just waits one frame.
    fn silence(&self, frame: &Frame) -> Option<Frame>;

    /// Typical frame length, used to derive the time event interval
    fn frame_duration(&self) -> Duration;
}

#[async_trait]
pub trait MediaOpener: Send + Sync {
    async fn open(&self, media: &MediaRecord) -> Result<Box<dyn FrameSource>>;
}

/// Opens catalog paths relative to the media root directory
pub struct FileOpener {
    root: PathBuf,
    kind: MediaKind,
}

impl FileOpener {
    pub fn new(root: impl Into<PathBuf>, kind: MediaKind) -> Self {
        Self {
            root: root.into(),
            kind,
        }
    }
}

#[async_trait]
impl MediaOpener for FileOpener {
    async fn open(&self, media: &MediaRecord) -> Result<Box<dyn FrameSource>> {
        let path = self.root.join(&media.path);
        let length = Duration::from_secs(u64::from(media.length));
        debug!("Opening {} {} at {}", self.kind, media.id, path.display());

        let source: Box<dyn FrameSource> = match self.kind {
            // Symphonia is sync
            MediaKind::Audio => {
                let source = tokio::task::spawn_blocking(move || Mp3FrameSource::open(&path))
                    .await
                    .map_err(|e| AppError::Media(format!("Demux task panicked: {}", e)))??;
                Box::new(source)
            }
            MediaKind::Video => Box::new(ChunkedFileSource::open(&path, length).await?),
        };
        Ok(source)
    }
}

/// Whole MP3 frames, demuxed up front
pub struct Mp3FrameSource {
    frames: VecDeque<Frame>,
    frame_duration: Duration,
}

impl Mp3FrameSource {
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let source = Self::from_bytes(data)?;
        info!(
            "Demuxed {} frames from {}",
            source.frames.len(),
            path.display()
        );
        Ok(source)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let cursor = std::io::Cursor::new(data);
        let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

        let mut hint = Hint::new();
        hint.with_extension("mp3");

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| AppError::Media(format!("Failed to probe audio: {}", e)))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AppError::Media("No audio track found".to_string()))?;

        let track_id = track.id;
        let time_base = track.codec_params.time_base;
        let sample_rate = track.codec_params.sample_rate;

        let mut frames = VecDeque::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    warn!("Error reading packet: {}", e);
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let duration = match (time_base, sample_rate) {
                (Some(tb), _) => {
                    let time = tb.calc_time(packet.dur);
                    Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac)
                }
                (None, Some(rate)) if rate > 0 => {
                    Duration::from_secs_f64(packet.dur as f64 / f64::from(rate))
                }
                _ => DEFAULT_FRAME_DURATION,
            };

            frames.push_back(Frame {
                data: Bytes::from(packet.data.into_vec()),
                duration,
            });
        }

        if frames.is_empty() {
            return Err(AppError::Media("No frames in audio stream".to_string()));
        }

        let frame_duration = frames
            .front()
            .map(|f| f.duration)
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_FRAME_DURATION);

        Ok(Self {
            frames,
            frame_duration,
        })
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl FrameSource for Mp3FrameSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Keep the header so the stream stays parseable, zero the audio data
    fn silence(&self, frame: &Frame) -> Option<Frame> {
        let header_len = MPEG_HEADER_LEN.min(frame.data.len());
        let mut data = vec![0u8; frame.data.len()];
        data[..header_len].copy_from_slice(&frame.data[..header_len]);
        Some(Frame {
            data: Bytes::from(data),
            duration: frame.duration,
        })
    }

    fn frame_duration(&self) -> Duration {
        self.frame_duration
    }
}

/// Fixed-size chunks read lazily from a file
pub struct ChunkedFileSource {
    reader: Option<BufReader<File>>,
    chunk_duration: Duration,
}

impl ChunkedFileSource {
    /// `length` is the play time of the whole file; each chunk gets an equal share
    pub async fn open(path: &Path, length: Duration) -> Result<Self> {
        let file = File::open(path).await?;
        let size = file.metadata().await?.len() as usize;
        let chunks = size.div_ceil(CHUNK_SIZE).max(1);

        let chunk_duration = if length.is_zero() {
            DEFAULT_FRAME_DURATION
        } else {
            length / chunks as u32
        };
        debug!(
            "Streaming {} in {} chunks of {:?}",
            path.display(),
            chunks,
            chunk_duration
        );

        Ok(Self {
            reader: Some(BufReader::new(file)),
            chunk_duration,
        })
    }
}

#[async_trait]
impl FrameSource for ChunkedFileSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        let reader = self.reader.as_mut()?;
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut filled = 0;

        while filled < CHUNK_SIZE {
            match reader.read(&mut chunk[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Read error, ending stream early: {}", e);
                    break;
                }
            }
        }

        if filled < CHUNK_SIZE {
            self.reader = None;
        }
        if filled == 0 {
            return None;
        }

        chunk.truncate(filled);
        Some(Frame {
            data: Bytes::from(chunk),
            duration: self.chunk_duration,
        })
    }

    fn silence(&self, _frame: &Frame) -> Option<Frame> {
        None
    }

    fn frame_duration(&self) -> Duration {
        self.chunk_duration
    }
}
