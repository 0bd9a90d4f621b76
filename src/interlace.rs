//! Adam7 pass geometry. Interlaced images store seven sub-images; each
//! pass covers the pixels at `(start_col + k*col_step, start_row + j*row_step)`.

const START_ROW: [usize; 7] = [0, 0, 4, 0, 2, 0, 1];
const START_COL: [usize; 7] = [0, 4, 0, 2, 0, 1, 0];
const ROW_STEP: [usize; 7] = [8, 8, 8, 4, 4, 2, 2];
const COL_STEP: [usize; 7] = [8, 8, 4, 4, 2, 2, 1];

/// One non-empty Adam7 sub-image: its size and where its samples land in
/// the full raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pass {
    pub start_row: usize,
    pub start_col: usize,
    pub row_step: usize,
    pub col_step: usize,
    pub width: usize,
    pub height: usize,
}

/// Yields the passes for an image in stream order, skipping passes that
/// cover no pixels (those contribute no scanlines at all).
pub fn passes(width: u32, height: u32) -> impl Iterator<Item = Pass> {
    let (width, height) = (width as usize, height as usize);
    (0..7).filter_map(move |i| {
        let pass = Pass {
            start_row: START_ROW[i],
            start_col: START_COL[i],
            row_step: ROW_STEP[i],
            col_step: COL_STEP[i],
            width: ceil_div(width.saturating_sub(START_COL[i]), COL_STEP[i]),
            height: ceil_div(height.saturating_sub(START_ROW[i]), ROW_STEP[i]),
        };
        (pass.width > 0 && pass.height > 0).then_some(pass)
    })
}

fn ceil_div(n: usize, d: usize) -> usize {
    (n + d - 1) / d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_by_eight_pass_sizes() {
        let sizes: Vec<(usize, usize)> = passes(8, 8).map(|p| (p.width, p.height)).collect();
        assert_eq!(
            sizes,
            [(1, 1), (1, 1), (2, 1), (2, 2), (4, 2), (4, 4), (8, 4)]
        );
    }

    #[test]
    fn one_by_one_keeps_only_the_first_pass() {
        let all: Vec<Pass> = passes(1, 1).collect();
        assert_eq!(all.len(), 1);
        assert_eq!((all[0].start_row, all[0].start_col), (0, 0));
        assert_eq!((all[0].width, all[0].height), (1, 1));
    }

    #[test]
    fn passes_cover_every_pixel_exactly_once() {
        for (width, height) in [(1, 1), (2, 3), (5, 5), (8, 8), (9, 7), (16, 1), (1, 16)] {
            let mut seen = vec![0u32; width * height];
            for pass in passes(width as u32, height as u32) {
                for j in 0..pass.height {
                    for k in 0..pass.width {
                        let x = pass.start_col + k * pass.col_step;
                        let y = pass.start_row + j * pass.row_step;
                        seen[y * width + x] += 1;
                    }
                }
            }
            assert!(seen.iter().all(|&count| count == 1), "{width}x{height}");
        }
    }
}
