//! Scanline filter reversal. Each filtered row opens with a filter-type
//! byte; the remaining bytes are reconstructed against the defiltered row
//! above and the byte one pixel to the left.

use crate::parser::{PngError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    None,
    Sub,
    Up,
    Average,
    Paeth,
}

impl FilterType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FilterType::None),
            1 => Ok(FilterType::Sub),
            2 => Ok(FilterType::Up),
            3 => Ok(FilterType::Average),
            4 => Ok(FilterType::Paeth),
            other => Err(PngError::UnknownFilter(other)),
        }
    }
}

/// Reverses `filter` over one scanline in place. `previous` is the already
/// defiltered row above, all zeroes for the first row; both slices are one
/// scanline long. `bpp` is the left-neighbor stride in bytes.
pub fn unfilter(filter: FilterType, bpp: usize, previous: &[u8], current: &mut [u8]) {
    debug_assert_eq!(previous.len(), current.len());

    match filter {
        FilterType::None => {}
        FilterType::Sub => {
            for i in bpp..current.len() {
                current[i] = current[i].wrapping_add(current[i - bpp]);
            }
        }
        FilterType::Up => {
            for (byte, &above) in current.iter_mut().zip(previous) {
                *byte = byte.wrapping_add(above);
            }
        }
        FilterType::Average => {
            for i in 0..current.len() {
                let left = if i >= bpp { current[i - bpp] as u16 } else { 0 };
                let above = previous[i] as u16;
                // The average itself must not wrap; only the final add does.
                current[i] = current[i].wrapping_add(((left + above) / 2) as u8);
            }
        }
        FilterType::Paeth => {
            for i in 0..current.len() {
                let left = if i >= bpp { current[i - bpp] } else { 0 };
                let above = previous[i];
                let upper_left = if i >= bpp { previous[i - bpp] } else { 0 };
                current[i] = current[i].wrapping_add(paeth_predictor(left, above, upper_left));
            }
        }
    }
}

/// Picks whichever of the left, above and upper-left neighbors is closest
/// to `a + b - c`, preferring left, then above, on ties.
pub fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i32 + b as i32 - c as i32;
    let pa = (p - a as i32).abs();
    let pb = (p - b as i32).abs();
    let pc = (p - c as i32).abs();

    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Applies the forward filter so the tests can check that unfilter is
    // its left inverse.
    fn apply(filter: FilterType, bpp: usize, previous: &[u8], row: &[u8]) -> Vec<u8> {
        (0..row.len())
            .map(|i| {
                let a = if i >= bpp { row[i - bpp] } else { 0 };
                let b = previous[i];
                let c = if i >= bpp { previous[i - bpp] } else { 0 };
                match filter {
                    FilterType::None => row[i],
                    FilterType::Sub => row[i].wrapping_sub(a),
                    FilterType::Up => row[i].wrapping_sub(b),
                    FilterType::Average => {
                        row[i].wrapping_sub(((a as u16 + b as u16) / 2) as u8)
                    }
                    FilterType::Paeth => row[i].wrapping_sub(paeth_predictor(a, b, c)),
                }
            })
            .collect()
    }

    #[test]
    fn paeth_tie_breaks() {
        // Exact match on the left neighbor wins outright.
        assert_eq!(paeth_predictor(1, 2, 2), 1);
        // Left and above tie; left wins.
        assert_eq!(paeth_predictor(1, 1, 2), 1);
        // Above and upper-left tie; above wins.
        assert_eq!(paeth_predictor(1, 2, 1), 2);
        // Upper-left only wins when strictly closest.
        assert_eq!(paeth_predictor(0, 255, 128), 128);
    }

    #[test]
    fn sub_accumulates_from_row_start() {
        let previous = [0u8; 6];
        let mut row = [10, 20, 30, 1, 2, 3];
        unfilter(FilterType::Sub, 3, &previous, &mut row);
        assert_eq!(row, [10, 20, 30, 11, 22, 33]);
    }

    #[test]
    fn up_adds_previous_row() {
        let previous = [1, 2, 3, 250];
        let mut row = [10, 20, 30, 10];
        unfilter(FilterType::Up, 1, &previous, &mut row);
        assert_eq!(row, [11, 22, 33, 4]); // last byte wraps
    }

    #[test]
    fn average_does_not_wrap_the_sum() {
        let previous = [200, 200];
        let mut row = [0, 0];
        unfilter(FilterType::Average, 1, &previous, &mut row);
        // First byte: (0 + 200) / 2 = 100. Second: (100 + 200) / 2 = 150.
        assert_eq!(row, [100, 150]);
    }

    #[test]
    fn every_filter_round_trips() {
        let previous = [13, 250, 0, 7, 99, 181, 42, 1];
        let raster: [u8; 8] = [0, 255, 128, 3, 200, 77, 254, 9];

        for filter in [
            FilterType::None,
            FilterType::Sub,
            FilterType::Up,
            FilterType::Average,
            FilterType::Paeth,
        ] {
            for bpp in [1, 3, 4] {
                let mut row: Vec<u8> = apply(filter, bpp, &previous, &raster);
                unfilter(filter, bpp, &previous, &mut row);
                assert_eq!(row[..], raster[..], "{filter:?} bpp {bpp}");
            }
        }
    }

    #[test]
    fn rejects_unknown_filter_byte() {
        assert!(matches!(
            FilterType::from_u8(9),
            Err(PngError::UnknownFilter(9))
        ));
    }
}
