//! Fragmented MP4 framing
//!
//! The NVR delivers a continuous fMP4 byte stream in arbitrarily sized
//! chunks. [`FragmentSplitter`] reassembles it at ISO-BMFF box boundaries
//! into the initialization segment (everything up to and including `moov`)
//! and media fragments (everything up to and including each `mdat`), which
//! is what a browser SourceBuffer wants to be fed. [`codec_string`] reads the
//! RFC 6381 codec parameter out of the init segment. No sample data is
//! inspected.

use bytes::{Bytes, BytesMut};

use super::ProtectError;

/// Upper bound for a single box; anything larger is treated as corruption
const MAX_BOX_SIZE: u64 = 64 * 1024 * 1024;

/// A reassembled unit of the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Init(Bytes),
    Media(Bytes),
}

/// Incremental box-boundary splitter
#[derive(Debug, Default)]
pub struct FragmentSplitter {
    buffer: BytesMut,
    pending: BytesMut,
    init_done: bool,
}

impl FragmentSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and collect every fragment they complete
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Fragment>, ProtectError> {
        self.buffer.extend_from_slice(data);
        let mut fragments = Vec::new();

        while let Some((size, kind)) = peek_box(&self.buffer)? {
            if self.buffer.len() < size {
                break;
            }

            let raw = self.buffer.split_to(size);
            self.pending.extend_from_slice(&raw);

            if !self.init_done && &kind == b"moov" {
                self.init_done = true;
                fragments.push(Fragment::Init(self.pending.split().freeze()));
            } else if self.init_done && &kind == b"mdat" {
                fragments.push(Fragment::Media(self.pending.split().freeze()));
            }
        }

        Ok(fragments)
    }

    /// Whether the init segment has been emitted
    pub fn is_initialized(&self) -> bool {
        self.init_done
    }
}

/// Read the size and type of the box at the start of `buf`.
/// Returns `None` until the full header is buffered.
fn peek_box(buf: &[u8]) -> Result<Option<(usize, [u8; 4])>, ProtectError> {
    if buf.len() < 8 {
        return Ok(None);
    }

    let size32 = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64;
    let kind = [buf[4], buf[5], buf[6], buf[7]];

    let size = match size32 {
        // Box extends to end of stream; unusable for live framing
        0 => {
            return Err(ProtectError::Protocol(format!(
                "open-ended '{}' box in live stream",
                fourcc(&kind)
            )))
        }
        1 => {
            if buf.len() < 16 {
                return Ok(None);
            }
            let mut large = [0u8; 8];
            large.copy_from_slice(&buf[8..16]);
            let size = u64::from_be_bytes(large);
            if size < 16 {
                return Err(malformed(&kind, size));
            }
            size
        }
        s if s < 8 => return Err(malformed(&kind, s)),
        s => s,
    };

    if size > MAX_BOX_SIZE {
        return Err(malformed(&kind, size));
    }

    Ok(Some((size as usize, kind)))
}

fn malformed(kind: &[u8; 4], size: u64) -> ProtectError {
    ProtectError::Protocol(format!("invalid '{}' box size {}", fourcc(kind), size))
}

fn fourcc(kind: &[u8; 4]) -> String {
    String::from_utf8_lossy(kind).into_owned()
}

/// Iterate the child boxes of a payload as (type, body)
fn boxes<'a>(mut data: &'a [u8]) -> impl Iterator<Item = ([u8; 4], &'a [u8])> + 'a {
    std::iter::from_fn(move || {
        if data.len() < 8 {
            return None;
        }
        let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let kind = [data[4], data[5], data[6], data[7]];
        let (header, size) = match size {
            0 => (8, data.len()),
            1 => {
                if data.len() < 16 {
                    return None;
                }
                let mut large = [0u8; 8];
                large.copy_from_slice(&data[8..16]);
                (16, u64::from_be_bytes(large) as usize)
            }
            s => (8, s),
        };
        if size < header || size > data.len() {
            return None;
        }
        let body = &data[header..size];
        data = &data[size..];
        Some((kind, body))
    })
}

fn child<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
    boxes(data).find(|(k, _)| k == kind).map(|(_, body)| body)
}

/// Size of the fixed VisualSampleEntry fields after the 8-byte SampleEntry
const VISUAL_SAMPLE_ENTRY_LEN: usize = 8 + 70;
/// Size of the fixed AudioSampleEntry fields after the 8-byte SampleEntry
const AUDIO_SAMPLE_ENTRY_LEN: usize = 8 + 20;

/// Build the `codecs` parameter for a SourceBuffer MIME type from an init
/// segment, e.g. `avc1.4d401f,mp4a.40.2`. Returns `None` if no supported
/// track is found.
pub fn codec_string(init: &[u8]) -> Option<String> {
    let moov = child(init, b"moov")?;
    let mut codecs = Vec::new();

    for (kind, trak) in boxes(moov) {
        if &kind != b"trak" {
            continue;
        }
        let stsd = child(trak, b"mdia")
            .and_then(|mdia| child(mdia, b"minf"))
            .and_then(|minf| child(minf, b"stbl"))
            .and_then(|stbl| child(stbl, b"stsd"));
        let Some(stsd) = stsd else { continue };
        // version/flags + entry_count
        if stsd.len() < 8 {
            continue;
        }
        if let Some(codec) = boxes(&stsd[8..]).find_map(|(kind, entry)| sample_codec(&kind, entry))
        {
            codecs.push(codec);
        }
    }

    if codecs.is_empty() {
        None
    } else {
        Some(codecs.join(","))
    }
}

fn sample_codec(kind: &[u8; 4], entry: &[u8]) -> Option<String> {
    match kind {
        b"avc1" | b"avc3" => {
            let avcc = child(entry.get(VISUAL_SAMPLE_ENTRY_LEN..)?, b"avcC")?;
            if avcc.len() < 4 {
                return None;
            }
            Some(format!(
                "{}.{:02x}{:02x}{:02x}",
                fourcc(kind),
                avcc[1],
                avcc[2],
                avcc[3]
            ))
        }
        b"hvc1" | b"hev1" => {
            let hvcc = child(entry.get(VISUAL_SAMPLE_ENTRY_LEN..)?, b"hvcC")?;
            hevc_codec(&fourcc(kind), hvcc)
        }
        b"mp4a" => {
            entry.get(AUDIO_SAMPLE_ENTRY_LEN..)?;
            Some("mp4a.40.2".to_string())
        }
        _ => None,
    }
}

/// HEVC codec string per ISO/IEC 14496-15 Annex E
fn hevc_codec(prefix: &str, hvcc: &[u8]) -> Option<String> {
    if hvcc.len() < 13 {
        return None;
    }

    let profile_space = match hvcc[1] >> 6 {
        0 => "",
        1 => "A",
        2 => "B",
        _ => "C",
    };
    let tier = if hvcc[1] & 0x20 != 0 { 'H' } else { 'L' };
    let profile_idc = hvcc[1] & 0x1f;
    let compat = u32::from_be_bytes([hvcc[2], hvcc[3], hvcc[4], hvcc[5]]).reverse_bits();
    let level = hvcc[12];

    let mut constraints: Vec<u8> = hvcc[6..12].to_vec();
    while constraints.last() == Some(&0) {
        constraints.pop();
    }

    let mut codec = format!(
        "{}.{}{}.{:x}.{}{}",
        prefix, profile_space, profile_idc, compat, tier, level
    );
    for byte in constraints {
        codec.push_str(&format!(".{:02X}", byte));
    }
    Some(codec)
}
