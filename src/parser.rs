//! Chunk-level parsing: the signature skip, the chunk stream state machine,
//! IHDR validation and the metadata handlers. The output is a [`ParsedPng`]
//! holding everything the scanline pipeline in [`crate::decoder`] needs.

use std::io::{self, Read};

use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, warn};
use thiserror::Error;

use crate::DecodeOptions;

pub type Result<T> = std::result::Result<T, PngError>;

/// The PNG chunk length field is a 31-bit value; anything larger is a
/// corrupt stream, not a large chunk.
const MAX_CHUNK_LENGTH: u32 = 0x7FFF_FFFF;

const INCHES_PER_METER: f64 = 39.370_078_7;

#[derive(Error, Debug)]
pub enum PngError {
    #[error("unexpected end of stream")]
    TruncatedStream,

    #[error("chunk crc mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    CrcMismatch { stored: u32, computed: u32 },

    #[error("color type {0} is not supported")]
    UnsupportedColorType(u8),

    #[error("bit depth {bit_depth} is not valid for color type {color_type}")]
    UnsupportedBitDepth { color_type: u8, bit_depth: u8 },

    #[error("compression method {0} is not supported")]
    UnsupportedCompressionMethod(u8),

    #[error("filter method {0} is not supported")]
    UnsupportedFilterMethod(u8),

    #[error("interlace method {0} is not supported")]
    UnsupportedInterlaceMethod(u8),

    #[error("unknown critical chunk '{0}'")]
    UnsupportedCriticalChunk(String),

    #[error("stream ended before IEND")]
    MissingIend,

    #[error("found data after IEND")]
    TrailingData,

    #[error("color type 3 requires a PLTE chunk before the first IDAT")]
    MissingPlte,

    #[error("unknown scanline filter type {0}")]
    UnknownFilter(u8),

    #[error("image is {width}x{height} but the limit is {max_width}x{max_height}")]
    DimensionsExceedLimit {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    #[error("failed to inflate image data")]
    Inflate(#[source] io::Error),

    #[error("malformed png: {0}")]
    WrongFormat(&'static str),

    #[error("i/o error while reading")]
    Io(#[source] io::Error),
}

// EOF inside an expected field is a truncation, everything else is a
// transport problem.
impl From<io::Error> for PngError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            PngError::TruncatedStream
        } else {
            PngError::Io(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorType {
    Grayscale,
    Truecolor,
    IndexedColor,
    GrayscaleAlpha,
    TruecolorAlpha,
}

impl ColorType {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ColorType::Grayscale),
            2 => Ok(ColorType::Truecolor),
            3 => Ok(ColorType::IndexedColor),
            4 => Ok(ColorType::GrayscaleAlpha),
            6 => Ok(ColorType::TruecolorAlpha),
            other => Err(PngError::UnsupportedColorType(other)),
        }
    }

    pub fn channels(self) -> usize {
        match self {
            ColorType::Grayscale | ColorType::IndexedColor => 1,
            ColorType::GrayscaleAlpha => 2,
            ColorType::Truecolor => 3,
            ColorType::TruecolorAlpha => 4,
        }
    }

    fn allowed_bit_depths(self) -> &'static [u8] {
        match self {
            ColorType::Grayscale => &[1, 2, 4, 8, 16],
            ColorType::IndexedColor => &[1, 2, 4, 8],
            ColorType::Truecolor | ColorType::GrayscaleAlpha | ColorType::TruecolorAlpha => {
                &[8, 16]
            }
        }
    }
}

/// The validated contents of IHDR.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: ColorType,
    pub interlaced: bool,
}

impl Header {
    fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() != 13 {
            return Err(PngError::WrongFormat("IHDR payload must be 13 bytes"));
        }

        let width = u32::from_be_bytes(payload[0..4].try_into().unwrap());
        let height = u32::from_be_bytes(payload[4..8].try_into().unwrap());
        if width == 0 || height == 0 {
            return Err(PngError::WrongFormat(
                "image dimensions must be at least 1x1",
            ));
        }

        let bit_depth = payload[8];
        let color_type = ColorType::from_u8(payload[9])?;
        if !color_type.allowed_bit_depths().contains(&bit_depth) {
            return Err(PngError::UnsupportedBitDepth {
                color_type: payload[9],
                bit_depth,
            });
        }

        if payload[10] != 0 {
            return Err(PngError::UnsupportedCompressionMethod(payload[10]));
        }
        if payload[11] != 0 {
            return Err(PngError::UnsupportedFilterMethod(payload[11]));
        }
        let interlaced = match payload[12] {
            0 => false,
            1 => true,
            other => return Err(PngError::UnsupportedInterlaceMethod(other)),
        };

        Ok(Header {
            width,
            height,
            bit_depth,
            color_type,
            interlaced,
        })
    }

    /// The left-neighbor stride used by the filter algorithms, at least 1.
    pub fn bytes_per_pixel(&self) -> usize {
        (self.color_type.channels() * self.bit_depth as usize + 7) / 8
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bit_depth as usize / 8).max(1)
    }

    /// Filtered scanline length, excluding the filter-type byte, for a row
    /// of `width` pixels. Interlace passes call this with their sub-image
    /// widths.
    pub fn scanline_bytes(&self, width: u32) -> usize {
        (width as usize * self.color_type.channels() * self.bit_depth as usize + 7) / 8
    }

    pub fn bytes_per_scanline(&self) -> usize {
        self.scanline_bytes(self.width)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkKind {
    Ihdr,
    Plte,
    Idat,
    Iend,
    Trns,
    Phys,
    Text,
    Unknown([u8; 4]),
}

impl ChunkKind {
    fn from_name(name: [u8; 4]) -> Self {
        match &name {
            b"IHDR" => ChunkKind::Ihdr,
            b"PLTE" => ChunkKind::Plte,
            b"IDAT" => ChunkKind::Idat,
            b"IEND" => ChunkKind::Iend,
            b"tRNS" => ChunkKind::Trns,
            b"pHYs" => ChunkKind::Phys,
            b"tEXt" => ChunkKind::Text,
            _ => ChunkKind::Unknown(name),
        }
    }
}

struct Chunk {
    kind: ChunkKind,
    data: Vec<u8>,
}

/// Reads `length | type | payload | crc` and verifies the checksum over
/// type and payload. Returns `None` on a clean end of stream.
fn read_chunk<R: Read>(reader: &mut R) -> Result<Option<Chunk>> {
    let length = match read_chunk_length(reader)? {
        Some(length) => length,
        None => return Ok(None),
    };
    if length > MAX_CHUNK_LENGTH {
        return Err(PngError::WrongFormat("chunk length exceeds the PNG limit"));
    }

    let mut name = [0u8; 4];
    reader.read_exact(&mut name)?;

    let mut data = vec![0u8; length as usize];
    reader.read_exact(&mut data)?;

    let stored = reader.read_u32::<BigEndian>()?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&name);
    hasher.update(&data);
    let computed = hasher.finalize();
    if computed != stored {
        return Err(PngError::CrcMismatch { stored, computed });
    }

    Ok(Some(Chunk {
        kind: ChunkKind::from_name(name),
        data,
    }))
}

// A clean EOF at a chunk boundary means the chunk stream is over; an EOF
// partway through the length field is a tear.
fn read_chunk_length<R: Read>(reader: &mut R) -> Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(PngError::TruncatedStream),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PngError::Io(e)),
        }
    }
    Ok(Some(u32::from_be_bytes(buf)))
}

/// Everything the chunk stream contributes to a decode: the validated
/// header, palette and transparency tables, the concatenated IDAT payloads
/// and the ancillary metadata destined for the output image.
pub(crate) struct ParsedPng {
    pub header: Header,
    pub palette: Option<Vec<u8>>,
    pub trns: Option<Vec<u8>>,
    pub idat: Vec<u8>,
    pub horizontal_dpi: Option<f64>,
    pub vertical_dpi: Option<f64>,
    pub properties: Vec<(String, String)>,
    pub palette_entries: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    InMetadata,
    InData,
    AfterEnd,
}

/// Drives the chunk stream from just past the signature to IEND.
pub(crate) fn parse<R: Read>(mut reader: R, options: &DecodeOptions) -> Result<ParsedPng> {
    // The eight signature bytes are skipped, not inspected.
    let mut signature = [0u8; 8];
    reader.read_exact(&mut signature)?;

    let first = read_chunk(&mut reader)?.ok_or(PngError::MissingIend)?;
    if first.kind != ChunkKind::Ihdr {
        return Err(PngError::WrongFormat("IHDR must be the first chunk"));
    }
    let header = Header::parse(&first.data)?;
    if header.width > options.max_width || header.height > options.max_height {
        return Err(PngError::DimensionsExceedLimit {
            width: header.width,
            height: header.height,
            max_width: options.max_width,
            max_height: options.max_height,
        });
    }

    let mut state = ParserState::InMetadata;
    let mut palette: Option<Vec<u8>> = None;
    let mut trns: Option<Vec<u8>> = None;
    let mut idat: Vec<u8> = Vec::new();
    let mut idat_done = false;
    let mut horizontal_dpi = None;
    let mut vertical_dpi = None;
    let mut properties = Vec::new();
    let mut palette_entries = None;

    while state != ParserState::AfterEnd {
        let chunk = read_chunk(&mut reader)?.ok_or(PngError::MissingIend)?;

        // Any non-IDAT chunk ends the IDAT run; only ancillary chunks may
        // follow it before IEND.
        if state == ParserState::InData && chunk.kind != ChunkKind::Idat {
            state = ParserState::InMetadata;
            idat_done = true;
        }

        match chunk.kind {
            ChunkKind::Ihdr => {
                return Err(PngError::WrongFormat("IHDR must appear exactly once"));
            }
            ChunkKind::Plte => {
                if idat_done {
                    return Err(PngError::WrongFormat("PLTE must precede the first IDAT"));
                }
                if palette.is_some() {
                    return Err(PngError::WrongFormat("PLTE must appear at most once"));
                }
                if chunk.data.is_empty() || chunk.data.len() % 3 != 0 {
                    return Err(PngError::WrongFormat(
                        "PLTE length must be a non-zero multiple of 3",
                    ));
                }
                if chunk.data.len() / 3 > 256 {
                    return Err(PngError::WrongFormat("PLTE holds more than 256 entries"));
                }
                palette_entries = Some(chunk.data.len() / 3);
                palette = Some(chunk.data);
            }
            ChunkKind::Trns => {
                if idat_done {
                    return Err(PngError::WrongFormat("tRNS must precede the first IDAT"));
                }
                trns = Some(chunk.data);
            }
            ChunkKind::Phys => {
                if chunk.data.len() != 9 {
                    warn!("skipping pHYs chunk with length {}", chunk.data.len());
                } else if chunk.data[8] == 1 {
                    let x = u32::from_be_bytes(chunk.data[0..4].try_into().unwrap());
                    let y = u32::from_be_bytes(chunk.data[4..8].try_into().unwrap());
                    horizontal_dpi = Some(x as f64 / INCHES_PER_METER);
                    vertical_dpi = Some(y as f64 / INCHES_PER_METER);
                } else {
                    debug!("pHYs unit is not metres; resolution left unset");
                }
            }
            ChunkKind::Text => match chunk.data.iter().position(|&b| b == 0) {
                Some(split) => {
                    let keyword = latin1(&chunk.data[..split]);
                    let value = latin1(&chunk.data[split + 1..]);
                    properties.push((keyword, value));
                }
                None => warn!("skipping tEXt chunk without a keyword separator"),
            },
            ChunkKind::Idat => {
                if idat_done {
                    return Err(PngError::WrongFormat("IDAT chunks must be contiguous"));
                }
                if state == ParserState::InMetadata {
                    if header.color_type == ColorType::IndexedColor && palette.is_none() {
                        return Err(PngError::MissingPlte);
                    }
                    state = ParserState::InData;
                }
                idat.extend_from_slice(&chunk.data);
            }
            ChunkKind::Iend => {
                state = ParserState::AfterEnd;
            }
            ChunkKind::Unknown(name) => {
                // Lowercase first letter marks a chunk we may ignore.
                if name[0] & 0x20 != 0 {
                    debug!("skipping ancillary chunk '{}'", latin1(&name));
                } else {
                    return Err(PngError::UnsupportedCriticalChunk(latin1(&name)));
                }
            }
        }
    }

    // IEND must be the last chunk; a single readable byte after it is
    // already an error.
    let mut trailing = [0u8; 1];
    loop {
        match reader.read(&mut trailing) {
            Ok(0) => break,
            Ok(_) => return Err(PngError::TrailingData),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PngError::Io(e)),
        }
    }

    Ok(ParsedPng {
        header,
        palette,
        trns,
        idat,
        horizontal_dpi,
        vertical_dpi,
        properties,
        palette_entries,
    })
}

// tEXt payloads are Latin-1: every byte maps straight to the code point of
// the same value.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
