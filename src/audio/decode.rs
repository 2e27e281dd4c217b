use std::collections::VecDeque;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::source::AudioSource;
use crate::error::{PitchError, Result};
use crate::pipeline::processors::MonoDownmix;
use crate::pipeline::ChunkProcessor;

/// Averages interleaved frames into one channel.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Streams an audio file as mono chunks, decoding one packet at a time.
///
/// Any container symphonia recognises is accepted, WAV being the usual case.
/// The last chunk is zero-padded to full length.
pub struct WavSource {
    format: Option<Box<dyn FormatReader>>,
    decoder: Option<Box<dyn Decoder>>,
    track_id: u32,
    downmix: MonoDownmix,
    sample_rate: u32,
    chunk_size: usize,
    total_frames: Option<u64>,
    emitted_frames: u64,
    pending: VecDeque<f32>,
}

impl WavSource {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(PitchError::config("chunk size must be positive"));
        }
        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let opened = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format = opened.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PitchError::Decode(format!("no audio track in {}", path.display())))?;

        let track_id = track.id;
        let channels = track.codec_params.channels.map_or(1, |c| c.count());
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| PitchError::Decode("unknown sample rate".into()))?;
        let total_frames = track.codec_params.n_frames;

        let decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        log::info!(
            "Opened {}: {} Hz, {} channel(s){}",
            path.display(),
            sample_rate,
            channels,
            total_frames
                .map(|n| format!(", {:.1}s", n as f64 / sample_rate as f64))
                .unwrap_or_default()
        );

        Ok(Self {
            format: Some(format),
            decoder: Some(decoder),
            track_id,
            downmix: MonoDownmix::new(channels)?,
            sample_rate,
            chunk_size,
            total_frames,
            emitted_frames: 0,
            pending: VecDeque::new(),
        })
    }

    /// Decodes packets into `pending` until one yields audio. Returns false at
    /// end of stream.
    fn decode_packet(&mut self) -> Result<bool> {
        let (Some(format), Some(decoder)) = (self.format.as_mut(), self.decoder.as_mut()) else {
            return Ok(false);
        };

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    log::warn!("Skipping corrupt packet: {}", msg);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            self.pending
                .extend(self.downmix.process(sample_buf.samples())?);
            return Ok(true);
        }
    }
}

impl AudioSource for WavSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        while self.pending.len() < self.chunk_size {
            if !self.decode_packet()? {
                break;
            }
        }
        if self.pending.is_empty() {
            return Ok(None);
        }

        let take = self.chunk_size.min(self.pending.len());
        let mut chunk: Vec<f32> = self.pending.drain(..take).collect();
        chunk.resize(self.chunk_size, 0.0);
        self.emitted_frames += take as u64;
        Ok(Some(chunk))
    }

    fn close(&mut self) -> Result<()> {
        if self.format.take().is_some() {
            log::debug!("Closed input after {} frames", self.emitted_frames);
        }
        self.decoder = None;
        self.pending.clear();
        Ok(())
    }

    fn chunks_remaining(&self) -> Option<usize> {
        let total = self.total_frames?;
        let left = total.saturating_sub(self.emitted_frames) as usize;
        Some(left.div_ceil(self.chunk_size))
    }
}
