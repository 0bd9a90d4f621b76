//! A PNG decoder producing 8-bit-per-channel RGBA rasters.
//!
//! The pipeline walks the chunk stream with CRC verification, inflates the
//! concatenated IDAT payloads, reverses the per-scanline filters, unpacks
//! samples across every color type and bit depth, and reassembles Adam7
//! interlaced images. Resolution (pHYs) and text (tEXt) metadata ride along
//! on the decoded [`Image`].
//!
//! ```no_run
//! use png_rgba::{decode_file, DecodeOptions};
//!
//! let image = decode_file("logo.png", &DecodeOptions::default())?;
//! assert_eq!(image.pixels.len(), (image.width * image.height) as usize);
//! # Ok::<(), png_rgba::PngError>(())
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub mod decoder;
pub mod filter;
pub mod interlace;
pub mod parser;

pub use decoder::{decode, print_image, Image, Rgba};
pub use parser::{ColorType, Header, PngError, Result};

/// Ceilings the caller places on the decoded raster. Decoding fails with
/// [`PngError::DimensionsExceedLimit`] right after the header is read if
/// either dimension is over its limit, before any pixel memory is
/// allocated.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            max_width: u32::MAX,
            max_height: u32::MAX,
        }
    }
}

/// Decodes the PNG file at `path`.
pub fn decode_file<P: AsRef<Path>>(path: P, options: &DecodeOptions) -> Result<Image> {
    let file = File::open(path.as_ref()).map_err(PngError::Io)?;
    decode(BufReader::new(file), options)
}

/// Decodes `path` and renders the result straight to the terminal.
pub fn decode_and_print_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let image = decode_file(path, &DecodeOptions::default())?;
    print_image(&image);
    Ok(())
}
