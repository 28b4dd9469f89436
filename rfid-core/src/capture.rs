//! Capture-file codec: RIFF/WAVE with an added `META` chunk (§6).
//!
//! `fmt `/`data` handling and PCM8/16/32/float32 sample coding are delegated
//! to `hound`, the same crate the wider stack uses for plain WAV output.
//! `hound` has no notion of a custom chunk, so the `META` chunk (capture
//! epoch + channel-key set) is spliced into the bytes `hound` writes, and
//! extracted back out with a small raw chunk walk on read — the one piece
//! `hound` genuinely cannot do for us.

use std::io::Cursor;
use std::path::Path;

use chrono::{DateTime, Utc};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use num_complex::Complex32;

use crate::errors::CaptureError;
use crate::types::ChannelLayout;

const RIFF_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const META_BODY_LEN: usize = 4 + 8 * 4;

/// The `META` chunk payload: capture epoch and the eight channel-key ids
/// the wider application uses to tag each recorded channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureMeta {
    pub epoch: u32,
    pub channel_keys: [u32; 8],
}

impl Default for CaptureMeta {
    fn default() -> Self {
        Self { epoch: 0, channel_keys: [0; 8] }
    }
}

/// A fully loaded (or about-to-be-written) capture: the decoded sample
/// payload plus enough header/`META` information to reconstruct a
/// [`crate::types::SampleBlock`].
#[derive(Debug, Clone)]
pub struct CaptureFile {
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    pub meta: CaptureMeta,
    pub samples: Vec<Complex32>,
}

fn le32(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

/// Walk the raw RIFF chunk list far enough to find a `META` chunk body,
/// ignoring everything `hound` already understands (`fmt `, `data`, `fact`).
/// Returns `None` if the file predates the `META` chunk.
fn find_meta_chunk(bytes: &[u8]) -> Result<Option<CaptureMeta>, CaptureError> {
    if bytes.len() < RIFF_HEADER_LEN || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(CaptureError::NotRiff);
    }

    let mut offset = RIFF_HEADER_LEN;
    while offset + CHUNK_HEADER_LEN <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().unwrap()) as usize;
        let body_start = offset + CHUNK_HEADER_LEN;
        let body_end = body_start.checked_add(size).ok_or(CaptureError::TruncatedChunk("overflow"))?;
        if body_end > bytes.len() {
            return Err(CaptureError::TruncatedChunk("chunk runs past end of file"));
        }

        if id == b"META" {
            if size < META_BODY_LEN {
                return Err(CaptureError::TruncatedChunk("META"));
            }
            let body = &bytes[body_start..body_end];
            let epoch = u32::from_le_bytes(body[0..4].try_into().unwrap());
            let mut channel_keys = [0u32; 8];
            for (i, key) in channel_keys.iter_mut().enumerate() {
                let start = 4 + i * 4;
                *key = u32::from_le_bytes(body[start..start + 4].try_into().unwrap());
            }
            return Ok(Some(CaptureMeta { epoch, channel_keys }));
        }

        offset = body_end + (size & 1);
    }

    Ok(None)
}

/// Splice a `META` chunk into `wav_bytes` (a complete RIFF/WAVE file as
/// `hound` produced it) immediately before the `data` chunk, and patch the
/// outer `RIFF` size field to account for the inserted bytes.
fn splice_meta_chunk(mut wav_bytes: Vec<u8>, meta: CaptureMeta) -> Vec<u8> {
    let mut data_offset = RIFF_HEADER_LEN;
    while data_offset + CHUNK_HEADER_LEN <= wav_bytes.len() {
        let id = &wav_bytes[data_offset..data_offset + 4];
        let size = u32::from_le_bytes(wav_bytes[data_offset + 4..data_offset + 8].try_into().unwrap()) as usize;
        if id == b"data" {
            break;
        }
        data_offset += CHUNK_HEADER_LEN + size + (size & 1);
    }

    let mut meta_chunk = Vec::with_capacity(CHUNK_HEADER_LEN + META_BODY_LEN);
    meta_chunk.extend_from_slice(b"META");
    meta_chunk.extend_from_slice(&le32(META_BODY_LEN as u32));
    meta_chunk.extend_from_slice(&le32(meta.epoch));
    for key in meta.channel_keys {
        meta_chunk.extend_from_slice(&le32(key));
    }
    debug_assert_eq!(meta_chunk.len() % 2, 0, "META chunk is already even-length, no padding needed");

    wav_bytes.splice(data_offset..data_offset, meta_chunk.iter().copied());

    let riff_size = (wav_bytes.len() - CHUNK_HEADER_LEN) as u32;
    wav_bytes[4..8].copy_from_slice(&le32(riff_size));
    wav_bytes
}

fn interleave_to_complex(samples: &[f32], channels: u16) -> Vec<Complex32> {
    if channels >= 2 {
        samples
            .chunks_exact(2)
            .map(|pair| Complex32::new(pair[0], pair[1]))
            .collect()
    } else {
        samples.iter().map(|&re| Complex32::new(re, 0.0)).collect()
    }
}

/// Read a capture file, decoding its `fmt`/`data` chunks via `hound` and
/// its `META` chunk (if present) via a raw scan. A missing `META` chunk is
/// treated as `CaptureMeta::default()`, not an error — older captures
/// predate it.
pub fn read<P: AsRef<Path>>(path: P) -> Result<CaptureFile, CaptureError> {
    let bytes = std::fs::read(path.as_ref())?;
    let meta = find_meta_chunk(&bytes)?.unwrap_or_default();

    let reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let max_val = (1u32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<_, _>>()?
        }
    };

    let channel_layout = if spec.channels >= 2 { ChannelLayout::IQ } else { ChannelLayout::Real };

    Ok(CaptureFile {
        sample_rate: spec.sample_rate,
        channel_layout,
        meta,
        samples: interleave_to_complex(&samples, spec.channels),
    })
}

/// Write a capture file as 32-bit float PCM (real or I/Q interleaved) with
/// a `META` chunk carrying `meta`. `meta.epoch` is always written exactly
/// as given — regenerating it on every write (rather than preserving
/// whatever a previous capture recorded) is the contract the round-trip
/// testable property in §8 exercises.
pub fn write<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channel_layout: ChannelLayout,
    meta: CaptureMeta,
    samples: &[Complex32],
) -> Result<(), CaptureError> {
    let channels: u16 = match channel_layout {
        ChannelLayout::Real => 1,
        ChannelLayout::IQ => 2,
    };

    let spec = WavSpec { channels, sample_rate, bits_per_sample: 32, sample_format: SampleFormat::Float };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for s in samples {
            writer.write_sample(s.re)?;
            if channels == 2 {
                writer.write_sample(s.im)?;
            }
        }
        writer.finalize()?;
    }

    let wav_bytes = splice_meta_chunk(cursor.into_inner(), meta);
    std::fs::write(path, wav_bytes)?;
    Ok(())
}

/// Compute the epoch (seconds since the Unix epoch) the `META` chunk
/// stores for a given wall-clock time, clamping to `0` for any time
/// before it (captures never predate 1970).
pub fn epoch_seconds(time: DateTime<Utc>) -> u32 {
    time.timestamp().max(0) as u32
}
