//! The scanline pipeline: inflate the IDAT stream, reverse the per-row
//! filter, unpack samples into RGBA and, for interlaced images, scatter
//! them through the Adam7 layout. Also the truecolor terminal preview.

use std::io::Read;
use std::mem;

use colored::Colorize;

use crate::filter::{self, FilterType};
use crate::interlace;
use crate::parser::{self, ColorType, ParsedPng, PngError, Result};
use crate::DecodeOptions;

/// One decoded pixel, 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba {
        red: 0,
        green: 0,
        blue: 0,
        alpha: 0,
    };

    fn opaque(red: u8, green: u8, blue: u8) -> Rgba {
        Rgba {
            red,
            green,
            blue,
            alpha: 255,
        }
    }

    fn gray(value: u8, alpha: u8) -> Rgba {
        Rgba {
            red: value,
            green: value,
            blue: value,
            alpha,
        }
    }
}

/// A decoded raster plus the metadata picked up from the chunk stream.
#[derive(Debug)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    /// Row-major, exactly `width * height` samples.
    pub pixels: Vec<Rgba>,
    pub horizontal_dpi: Option<f64>,
    pub vertical_dpi: Option<f64>,
    /// tEXt keyword/value pairs in stream order.
    pub properties: Vec<(String, String)>,
    /// Number of PLTE entries, when the file carried a palette.
    pub palette_entries: Option<usize>,
}

/// Decodes one PNG stream into an RGBA raster.
///
/// The reader is expected to be positioned at the start of the file; the
/// eight signature bytes are skipped without inspection. Any failure is
/// fatal to the decode and no partial image is returned.
pub fn decode<R: Read>(reader: R, options: &DecodeOptions) -> Result<Image> {
    let parsed = parser::parse(reader, options)?;
    let inflated = inflate(&parsed.idat)?;

    let header = parsed.header;
    let mut pixels =
        vec![Rgba::TRANSPARENT; header.width as usize * header.height as usize];

    if header.interlaced {
        decode_interlaced(&parsed, &inflated, &mut pixels)?;
    } else {
        decode_sequential(&parsed, &inflated, &mut pixels)?;
    }

    Ok(Image {
        width: header.width,
        height: header.height,
        pixels,
        horizontal_dpi: parsed.horizontal_dpi,
        vertical_dpi: parsed.vertical_dpi,
        properties: parsed.properties,
        palette_entries: parsed.palette_entries,
    })
}

// IDAT carries a zlib stream, not raw DEFLATE.
fn inflate(idat: &[u8]) -> Result<Vec<u8>> {
    let mut inflated = Vec::new();
    flate2::read::ZlibDecoder::new(idat)
        .read_to_end(&mut inflated)
        .map_err(PngError::Inflate)?;
    Ok(inflated)
}

fn decode_sequential(png: &ParsedPng, inflated: &[u8], pixels: &mut [Rgba]) -> Result<()> {
    let header = &png.header;
    let width = header.width as usize;
    let stride = header.bytes_per_scanline();
    let bpp = header.bytes_per_pixel();

    let mut previous = vec![0u8; stride];
    let mut current = vec![0u8; stride];
    let mut offset = 0;

    for y in 0..header.height as usize {
        if inflated.len() < offset + 1 + stride {
            return Err(PngError::TruncatedStream);
        }
        let filter = FilterType::from_u8(inflated[offset])?;
        current.copy_from_slice(&inflated[offset + 1..offset + 1 + stride]);
        offset += 1 + stride;

        filter::unfilter(filter, bpp, &previous, &mut current);

        let row = &mut pixels[y * width..(y + 1) * width];
        unpack_row(png, &current, width, |x, sample| row[x] = sample)?;

        mem::swap(&mut previous, &mut current);
    }
    Ok(())
}

// Each pass is a self-contained sub-image: its own scanline length, its own
// previous-row state, the same filter and unpack machinery. Samples scatter
// into the full raster through the pass geometry.
fn decode_interlaced(png: &ParsedPng, inflated: &[u8], pixels: &mut [Rgba]) -> Result<()> {
    let header = &png.header;
    let width = header.width as usize;
    let bpp = header.bytes_per_pixel();
    let mut offset = 0;

    for pass in interlace::passes(header.width, header.height) {
        let stride = header.scanline_bytes(pass.width as u32);
        let mut previous = vec![0u8; stride];
        let mut current = vec![0u8; stride];

        for j in 0..pass.height {
            if inflated.len() < offset + 1 + stride {
                return Err(PngError::TruncatedStream);
            }
            let filter = FilterType::from_u8(inflated[offset])?;
            current.copy_from_slice(&inflated[offset + 1..offset + 1 + stride]);
            offset += 1 + stride;

            filter::unfilter(filter, bpp, &previous, &mut current);

            let y = pass.start_row + j * pass.row_step;
            unpack_row(png, &current, pass.width, |k, sample| {
                let x = pass.start_col + k * pass.col_step;
                pixels[y * width + x] = sample;
            })?;

            mem::swap(&mut previous, &mut current);
        }
    }
    Ok(())
}

/// Converts one defiltered scanline of `width` pixels into RGBA samples,
/// handing each to `emit` with its pixel column. Sixteen-bit samples keep
/// only their high byte.
fn unpack_row(
    png: &ParsedPng,
    row: &[u8],
    width: usize,
    mut emit: impl FnMut(usize, Rgba),
) -> Result<()> {
    let header = &png.header;
    let depth = header.bit_depth as usize;

    match header.color_type {
        ColorType::Grayscale => {
            if depth < 8 {
                for (x, value) in unpack_bits(row, depth, width).enumerate() {
                    emit(x, Rgba::gray(value, 255));
                }
            } else {
                let step = header.bytes_per_sample();
                for x in 0..width {
                    emit(x, Rgba::gray(row[x * step], 255));
                }
            }
        }
        ColorType::GrayscaleAlpha => {
            let sample = header.bytes_per_sample();
            let step = 2 * sample;
            for x in 0..width {
                let base = x * step;
                emit(x, Rgba::gray(row[base], row[base + sample]));
            }
        }
        ColorType::Truecolor => {
            let sample = header.bytes_per_sample();
            let step = 3 * sample;
            for x in 0..width {
                let base = x * step;
                emit(
                    x,
                    Rgba::opaque(row[base], row[base + sample], row[base + 2 * sample]),
                );
            }
        }
        ColorType::TruecolorAlpha => {
            let sample = header.bytes_per_sample();
            let step = 4 * sample;
            for x in 0..width {
                let base = x * step;
                emit(
                    x,
                    Rgba {
                        red: row[base],
                        green: row[base + sample],
                        blue: row[base + 2 * sample],
                        alpha: row[base + 3 * sample],
                    },
                );
            }
        }
        ColorType::IndexedColor => {
            let palette = png.palette.as_deref().ok_or(PngError::MissingPlte)?;
            let trns = png.trns.as_deref();
            if depth < 8 {
                for (x, index) in unpack_bits(row, depth, width).enumerate() {
                    emit(x, palette_sample(palette, trns, index as usize)?);
                }
            } else {
                for x in 0..width {
                    emit(x, palette_sample(palette, trns, row[x] as usize)?);
                }
            }
        }
    }
    Ok(())
}

// Transparency entries default to opaque for indices past the end of the
// tRNS table; a fully transparent entry blanks its color channels too.
fn palette_sample(palette: &[u8], trns: Option<&[u8]>, index: usize) -> Result<Rgba> {
    let base = index * 3;
    if base + 3 > palette.len() {
        return Err(PngError::WrongFormat("palette index out of range"));
    }
    let alpha = match trns {
        Some(table) if index < table.len() => table[index],
        _ => 255,
    };
    if alpha == 0 {
        return Ok(Rgba::TRANSPARENT);
    }
    Ok(Rgba {
        red: palette[base],
        green: palette[base + 1],
        blue: palette[base + 2],
        alpha,
    })
}

/// Unpacks `count` sub-byte samples from a scanline, most significant bits
/// first.
fn unpack_bits(row: &[u8], bit_depth: usize, count: usize) -> impl Iterator<Item = u8> + '_ {
    let mask = ((1u16 << bit_depth) - 1) as u8;
    (0..count).map(move |i| {
        let bit = i * bit_depth;
        let shift = 8 - bit_depth - bit % 8;
        (row[bit / 8] >> shift) & mask
    })
}

/// Renders the raster to the terminal, one truecolor cell per pixel.
pub fn print_image(image: &Image) {
    for row in image.pixels.chunks(image.width as usize) {
        for pixel in row {
            print!("{}", " ".on_truecolor(pixel.red, pixel.green, pixel.blue));
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpack_bits_is_msb_first() {
        assert_eq!(
            unpack_bits(&[0b1011_0010], 1, 8).collect::<Vec<_>>(),
            [1, 0, 1, 1, 0, 0, 1, 0]
        );
        assert_eq!(
            unpack_bits(&[0b1110_0100], 2, 4).collect::<Vec<_>>(),
            [3, 2, 1, 0]
        );
        // A trailing partial byte only yields the samples that exist.
        assert_eq!(
            unpack_bits(&[0xAB, 0xC0], 4, 3).collect::<Vec<_>>(),
            [0xA, 0xB, 0xC]
        );
    }

    #[test]
    fn palette_sample_alpha_defaults() {
        let palette = [255, 0, 0, 0, 255, 0];

        let opaque = palette_sample(&palette, None, 1).unwrap();
        assert_eq!(opaque, Rgba::opaque(0, 255, 0));

        // tRNS shorter than the palette leaves later entries opaque.
        let partial = palette_sample(&palette, Some(&[128]), 1).unwrap();
        assert_eq!(partial.alpha, 255);

        let translucent = palette_sample(&palette, Some(&[128]), 0).unwrap();
        assert_eq!(translucent.alpha, 128);

        // Fully transparent entries lose their color as well.
        let cleared = palette_sample(&palette, Some(&[0]), 0).unwrap();
        assert_eq!(cleared, Rgba::TRANSPARENT);

        assert!(palette_sample(&palette, None, 2).is_err());
    }

    fn parsed(header_fields: (u32, u32, u8, ColorType)) -> ParsedPng {
        let (width, height, bit_depth, color_type) = header_fields;
        ParsedPng {
            header: crate::parser::Header {
                width,
                height,
                bit_depth,
                color_type,
                interlaced: false,
            },
            palette: None,
            trns: None,
            idat: Vec::new(),
            horizontal_dpi: None,
            vertical_dpi: None,
            properties: Vec::new(),
            palette_entries: None,
        }
    }

    #[test]
    fn sixteen_bit_samples_keep_the_high_byte() {
        let png = parsed((1, 1, 16, ColorType::Truecolor));
        let row = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];
        let mut out = Vec::new();
        unpack_row(&png, &row, 1, |x, sample| out.push((x, sample))).unwrap();
        assert_eq!(out, [(0, Rgba::opaque(0x12, 0x56, 0x9A))]);
    }

    #[test]
    fn grayscale_alpha_takes_the_second_sample() {
        let png = parsed((2, 1, 8, ColorType::GrayscaleAlpha));
        let row = [0x40, 0x80, 0xFF, 0x00];
        let mut out = Vec::new();
        unpack_row(&png, &row, 2, |_, sample| out.push(sample)).unwrap();
        assert_eq!(out[0], Rgba::gray(0x40, 0x80));
        assert_eq!(out[1], Rgba::gray(0xFF, 0x00));
    }
}
