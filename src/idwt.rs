//! Inverse 5/3 wavelet transform, executed per precinct.
//!
//! Mirrors the forward schedules of [`crate::dwt`]: `V0` emits one image row
//! per precinct, `V1` two (delayed by one precinct) and `V2` four (delayed by
//! three rows). The vertical reconstruction consults the previous precinct's
//! high-frequency lines; `recalc` helpers rebuild that state from the
//! previous precincts' coefficient buffers when decoding restarts at a slice
//! boundary.

/// Inverse horizontal line from 16-bit low-pass and high-pass bands.
/// `out.len()` is the reconstructed length; inputs carry `shift` fractional
/// bits less than the working precision.
pub fn idwt_horizontal_line_lf16_hf16(in_lf: &[i16], in_hf: &[i16], out: &mut [i32], shift: u8) {
    let len = out.len();
    debug_assert!(len >= 2, "inverse DWT needs at least 2 samples");
    let s = shift;
    let lf = |k: usize| (in_lf[k] as i32) << s;
    let hf = |k: usize| (in_hf[k] as i32) << s;

    out[0] = lf(0) - ((hf(0) + 1) >> 1);

    let mut i = 1;
    while i + 2 < len {
        let k = (i - 1) / 2;
        out[i + 1] = lf(k + 1) - ((hf(k) + hf(k + 1) + 2) >> 2);
        out[i] = hf(k) + ((out[i - 1] + out[i + 1]) >> 1);
        i += 2;
    }
    let k = (i - 1) / 2;
    if len % 2 == 1 {
        out[i + 1] = lf(k + 1) - ((hf(k) + 1) >> 1);
        out[i] = hf(k) + ((out[i - 1] + out[i + 1]) >> 1);
    } else {
        out[i] = hf(k) + out[i - 1];
    }
}

/// Same as [`idwt_horizontal_line_lf16_hf16`] with an already-widened
/// low-pass input (the cascaded stages feed 32-bit partial results back in).
pub fn idwt_horizontal_line_lf32_hf16(in_lf: &[i32], in_hf: &[i16], out: &mut [i32], shift: u8) {
    let len = out.len();
    debug_assert!(len >= 2, "inverse DWT needs at least 2 samples");
    let s = shift;
    let lf = |k: usize| in_lf[k];
    let hf = |k: usize| (in_hf[k] as i32) << s;

    out[0] = lf(0) - ((hf(0) + 1) >> 1);

    let mut i = 1;
    while i + 2 < len {
        let k = (i - 1) / 2;
        out[i + 1] = lf(k + 1) - ((hf(k) + hf(k + 1) + 2) >> 2);
        out[i] = hf(k) + ((out[i - 1] + out[i + 1]) >> 1);
        i += 2;
    }
    let k = (i - 1) / 2;
    if len % 2 == 1 {
        out[i + 1] = lf(k + 1) - ((hf(k) + 1) >> 1);
        out[i] = hf(k) + ((out[i - 1] + out[i + 1]) >> 1);
    } else {
        out[i] = hf(k) + out[i - 1];
    }
}

/// Read access to the dequantized coefficients of one precinct.
pub struct BandSource<'a> {
    pub arena: &'a [i16],
    pub offsets: &'a [usize],
    pub widths: &'a [u32],
}

impl BandSource<'_> {
    pub fn line(&self, band: usize, line: usize) -> &[i16] {
        let w = self.widths[band] as usize;
        let off = self.offsets[band] + line * w;
        &self.arena[off..off + w]
    }
}

/// Inverse horizontal cascade over bands `0..=levels`; the inverse of the
/// forward `transform_v0`. With `levels == 0` the band line widens directly.
pub fn inv_transform_v0(
    src: &BandSource,
    levels: u32,
    line_in_band: usize,
    out: &mut [i32],
    shift: u8,
) {
    if levels == 0 {
        let line = src.line(0, line_in_band);
        for (o, &v) in out.iter_mut().zip(line) {
            *o = (v as i32) << shift;
        }
        return;
    }

    let out_len = out.len();
    let mut cur_w = src.widths[0] as usize + src.widths[1] as usize;
    let mut bufs = [vec![0i32; out_len], vec![0i32; out_len]];
    let mut cur = 0usize;
    idwt_horizontal_line_lf16_hf16(
        src.line(0, line_in_band),
        src.line(1, line_in_band),
        &mut bufs[0][..cur_w],
        shift,
    );
    for band in 2..=levels as usize {
        let next_w = cur_w + src.widths[band] as usize;
        let (a, b) = bufs.split_at_mut(1);
        let (src_buf, dst_buf): (&[i32], &mut [i32]) = if cur == 0 {
            (&a[0], &mut b[0])
        } else {
            (&b[0], &mut a[0])
        };
        idwt_horizontal_line_lf32_hf16(
            &src_buf[..cur_w],
            src.line(band, line_in_band),
            &mut dst_buf[..next_w],
            shift,
        );
        cur ^= 1;
        cur_w = next_w;
    }
    out.copy_from_slice(&bufs[cur][..out_len]);
}

// Vertical inverse kernels; one output element per column.

fn iv_even_top(lf: &[i32], hf_next: &[i32]) -> Vec<i32> {
    lf.iter()
        .zip(hf_next)
        .map(|(&l, &h)| l - ((h + 1) >> 1))
        .collect()
}

fn iv_even_interior(lf: &[i32], hf_prev: &[i32], hf_next: &[i32]) -> Vec<i32> {
    lf.iter()
        .zip(hf_prev.iter().zip(hf_next))
        .map(|(&l, (&p, &n))| l - ((p + n + 2) >> 2))
        .collect()
}

fn iv_even_bottom(lf: &[i32], hf_prev: &[i32]) -> Vec<i32> {
    lf.iter()
        .zip(hf_prev)
        .map(|(&l, &p)| l - ((p + 1) >> 1))
        .collect()
}

fn iv_odd(hf: &[i32], row_prev: &[i32], row_next: &[i32]) -> Vec<i32> {
    hf.iter()
        .zip(row_prev.iter().zip(row_next))
        .map(|(&h, (&a, &b))| h + ((a + b) >> 1))
        .collect()
}

fn iv_odd_bottom(hf: &[i32], row_prev: &[i32]) -> Vec<i32> {
    hf.iter().zip(row_prev).map(|(&h, &a)| h + a).collect()
}

/// State of the streaming vertical inverse, one level.
#[derive(Debug, Clone)]
pub struct IdwtV1State {
    /// Horizontally-inverted HF line of the previous precinct.
    pub prev_hf: Vec<i32>,
    /// Reconstructed even row of the previous precinct.
    pub prev_even: Vec<i32>,
}

impl IdwtV1State {
    pub fn new(width: usize) -> Self {
        IdwtV1State {
            prev_hf: vec![0; width],
            prev_even: vec![0; width],
        }
    }
}

/// Reconstructs the rows owned by precinct `prec_idx` of a one-level
/// vertical decomposition. Returns `(row, samples)` pairs in row order;
/// the output trails the input by one precinct.
#[allow(clippy::too_many_arguments)]
pub fn inv_transform_v1_precinct(
    state: &mut IdwtV1State,
    src: &BandSource,
    prec_idx: u32,
    prec_num: u32,
    height: u32,
    width: usize,
    levels_h: u32,
    shift: u8,
) -> Vec<(u32, Vec<i32>)> {
    let r = 2 * prec_idx;
    let band_down = levels_h as usize + 1;
    let last = prec_idx + 1 == prec_num;

    let mut lf = vec![0i32; width];
    inv_transform_v0(src, levels_h, 0, &mut lf, shift);

    let hf_cur = (r + 1 < height).then(|| {
        let mut tmp = vec![0i32; src.widths[band_down] as usize];
        for (o, &v) in tmp.iter_mut().zip(src.line(band_down, 0)) {
            *o = (v as i32) << shift;
        }
        let mut hf = vec![0i32; width];
        idwt_horizontal_line_lf32_hf16(&tmp, src.line(band_down + 1, 0), &mut hf, shift);
        hf
    });

    let mut out = Vec::new();
    if prec_idx == 0 {
        let hf1 = hf_cur.as_ref().expect("vertical level needs 2 rows");
        let row0 = iv_even_top(&lf, hf1);
        if height == 2 {
            let row1 = iv_odd_bottom(hf1, &row0);
            state.prev_even = row0.clone();
            out.push((0, row0));
            out.push((1, row1));
        } else {
            state.prev_even = row0.clone();
            out.push((0, row0));
        }
    } else {
        let row_r = match &hf_cur {
            Some(hf1) => iv_even_interior(&lf, &state.prev_hf, hf1),
            None => iv_even_bottom(&lf, &state.prev_hf),
        };
        let row_m1 = iv_odd(&state.prev_hf, &state.prev_even, &row_r);
        out.push((r - 1, row_m1));
        if last && hf_cur.is_some() && height % 2 == 0 {
            let hf1 = hf_cur.as_ref().unwrap();
            let row_p1 = iv_odd_bottom(hf1, &row_r);
            state.prev_even = row_r.clone();
            out.push((r, row_r));
            out.push((r + 1, row_p1));
        } else {
            state.prev_even = row_r.clone();
            out.push((r, row_r));
        }
    }

    if let Some(hf) = hf_cur {
        state.prev_hf = hf;
    }
    out
}

/// Rebuilds the V1 state at a slice boundary from the coefficient buffers of
/// the one or two preceding precincts.
#[allow(clippy::too_many_arguments)]
pub fn inv_transform_v1_recalc(
    state: &mut IdwtV1State,
    src_prev2: Option<&BandSource>,
    src_prev1: &BandSource,
    prec_idx: u32,
    width: usize,
    levels_h: u32,
    shift: u8,
) {
    debug_assert!(prec_idx >= 1);
    let band_down = levels_h as usize + 1;

    let h_inv = |s: &BandSource| -> Vec<i32> {
        let mut tmp = vec![0i32; s.widths[band_down] as usize];
        for (o, &v) in tmp.iter_mut().zip(s.line(band_down, 0)) {
            *o = (v as i32) << shift;
        }
        let mut hf = vec![0i32; width];
        idwt_horizontal_line_lf32_hf16(&tmp, s.line(band_down + 1, 0), &mut hf, shift);
        hf
    };

    let hf_m1 = h_inv(src_prev1);
    let mut lf_m2 = vec![0i32; width];
    inv_transform_v0(src_prev1, levels_h, 0, &mut lf_m2, shift);

    state.prev_even = if prec_idx == 1 {
        iv_even_top(&lf_m2, &hf_m1)
    } else {
        let hf_m3 = h_inv(src_prev2.expect("two precincts precede an interior slice"));
        iv_even_interior(&lf_m2, &hf_m3, &hf_m1)
    };
    state.prev_hf = hf_m1;
}

/// State of the two-level streaming inverse.
#[derive(Debug, Clone)]
pub struct IdwtV2State {
    /// Embedded one-level state over the half-resolution plane.
    pub v1: IdwtV1State,
    /// First-level HF at rows `r-3` and `r-1`, horizontally inverted.
    pub hf1_m3: Vec<i32>,
    pub hf1_m1: Vec<i32>,
    /// Reconstructed row `r-4`.
    pub prev_row: Vec<i32>,
}

impl IdwtV2State {
    pub fn new(width: usize) -> Self {
        IdwtV2State {
            v1: IdwtV1State::new(width / 2 + 1),
            hf1_m3: vec![0; width],
            hf1_m1: vec![0; width],
            prev_row: vec![0; width],
        }
    }
}

fn v2_hf1_line(src: &BandSource, levels_h: u32, line: usize, width: usize, shift: u8) -> Vec<i32> {
    let band_down = levels_h as usize + 3;
    let mut tmp = vec![0i32; src.widths[band_down] as usize];
    for (o, &v) in tmp.iter_mut().zip(src.line(band_down, line)) {
        *o = (v as i32) << shift;
    }
    let mut hf = vec![0i32; width];
    idwt_horizontal_line_lf32_hf16(&tmp, src.line(band_down + 1, line), &mut hf, shift);
    hf
}

fn v2_lf_row(
    half_row: &[i32],
    src: &BandSource,
    levels_h: u32,
    line_in_band: usize,
    width: usize,
    shift: u8,
) -> Vec<i32> {
    let band_up_right = levels_h as usize + 2;
    let mut lf = vec![0i32; width];
    idwt_horizontal_line_lf32_hf16(half_row, src.line(band_up_right, line_in_band), &mut lf, shift);
    lf
}

/// Reconstructs the rows owned by precinct `prec_idx` of a two-level
/// decomposition; the output trails the input by three rows.
#[allow(clippy::too_many_arguments)]
pub fn inv_transform_v2_precinct(
    state: &mut IdwtV2State,
    src_prev: Option<&BandSource>,
    src: &BandSource,
    prec_idx: u32,
    prec_num: u32,
    height: u32,
    width: usize,
    levels_h: u32,
    shift: u8,
) -> Vec<(u32, Vec<i32>)> {
    let r = 4 * prec_idx;
    let h = height;
    let hhalf = height - height / 2;
    let half_w = width - src.widths[levels_h as usize + 2] as usize;
    let last = prec_idx + 1 == prec_num;

    // Second vertical level runs over the half plane.
    let half_rows = inv_transform_v1_precinct(
        &mut state.v1,
        src,
        prec_idx,
        prec_num,
        hhalf,
        half_w,
        levels_h - 1,
        shift,
    );

    // Each reconstructed half row j recombines with the matching line of the
    // up-right band into the first-level LF row 2j.
    let mut lf_rows: Vec<(u32, Vec<i32>)> = Vec::new();
    for (j, half) in half_rows.iter() {
        let owner = j / 2;
        let line_in_band = (j % 2) as usize;
        let owner_src = if owner == prec_idx {
            src
        } else {
            src_prev.expect("half row owned by the previous precinct")
        };
        lf_rows.push((
            2 * j,
            v2_lf_row(half, owner_src, levels_h, line_in_band, width, shift),
        ));
    }
    let lf_at = |row: u32| {
        &lf_rows
            .iter()
            .find(|(j, _)| *j == row)
            .unwrap_or_else(|| panic!("missing LF row {}", row))
            .1
    };

    let hf1_p1 = (r + 1 < h).then(|| v2_hf1_line(src, levels_h, 0, width, shift));
    let hf1_p3 = (r + 3 < h).then(|| v2_hf1_line(src, levels_h, 1, width, shift));

    let mut out: Vec<(u32, Vec<i32>)> = Vec::new();
    if prec_idx == 0 {
        if !last {
            let row0 = iv_even_top(lf_at(0), hf1_p1.as_ref().expect("V2 needs 2 rows"));
            state.prev_row = row0.clone();
            out.push((0, row0));
        } else {
            // Single-precinct plane, 3 or 4 rows.
            let hf1_1 = hf1_p1.as_ref().expect("V2 needs at least 3 rows");
            let row0 = iv_even_top(lf_at(0), hf1_1);
            let row2 = match &hf1_p3 {
                Some(hf1_3) => iv_even_interior(lf_at(2), hf1_1, hf1_3),
                None => iv_even_bottom(lf_at(2), hf1_1),
            };
            let row1 = iv_odd(hf1_1, &row0, &row2);
            out.push((0, row0));
            out.push((1, row1));
            if let Some(hf1_3) = &hf1_p3 {
                let row3 = iv_odd_bottom(hf1_3, &row2);
                out.push((2, row2));
                out.push((3, row3));
            } else {
                out.push((2, row2));
            }
            out.sort_by_key(|(j, _)| *j);
        }
    } else {
        let row_m2 = iv_even_interior(lf_at(r - 2), &state.hf1_m3, &state.hf1_m1);
        let row_m3 = iv_odd(&state.hf1_m3, &state.prev_row, &row_m2);
        let row_0 = match &hf1_p1 {
            Some(hf1_1) => iv_even_interior(lf_at(r), &state.hf1_m1, hf1_1),
            None => iv_even_bottom(lf_at(r), &state.hf1_m1),
        };
        let row_m1 = iv_odd(&state.hf1_m1, &row_m2, &row_0);

        out.push((r - 3, row_m3));
        out.push((r - 2, row_m2));
        out.push((r - 1, row_m1));

        if last {
            // Drain the tail rows of the plane.
            if let Some(hf1_1) = &hf1_p1 {
                let row_p2 = (r + 2 < h).then(|| match &hf1_p3 {
                    Some(hf1_3) => iv_even_interior(lf_at(r + 2), hf1_1, hf1_3),
                    None => iv_even_bottom(lf_at(r + 2), hf1_1),
                });
                match &row_p2 {
                    Some(row_p2) => {
                        let row_p1 = iv_odd(hf1_1, &row_0, row_p2);
                        out.push((r, row_0));
                        out.push((r + 1, row_p1));
                        if let Some(hf1_3) = &hf1_p3 {
                            let row_p3 = iv_odd_bottom(hf1_3, row_p2);
                            out.push((r + 2, row_p2.clone()));
                            out.push((r + 3, row_p3));
                        } else {
                            out.push((r + 2, row_p2.clone()));
                        }
                    }
                    None => {
                        let row_p1 = iv_odd_bottom(hf1_1, &row_0);
                        out.push((r, row_0));
                        out.push((r + 1, row_p1));
                    }
                }
            } else {
                out.push((r, row_0));
            }
        } else {
            state.prev_row = row_0.clone();
            out.push((r, row_0));
        }
    }

    if let Some(hf) = hf1_p1 {
        state.hf1_m3 = hf;
    }
    if let Some(hf) = hf1_p3 {
        state.hf1_m1 = hf;
    }
    out
}

/// Rebuilds the V2 state at a slice boundary from the two preceding
/// precincts' coefficient buffers.
#[allow(clippy::too_many_arguments)]
pub fn inv_transform_v2_recalc(
    state: &mut IdwtV2State,
    src_prev2: Option<&BandSource>,
    src_prev1: &BandSource,
    prec_idx: u32,
    width: usize,
    levels_h: u32,
    shift: u8,
) {
    debug_assert!(prec_idx >= 1);
    let half_w = width - src_prev1.widths[levels_h as usize + 2] as usize;

    inv_transform_v1_recalc(
        &mut state.v1,
        src_prev2,
        src_prev1,
        prec_idx,
        half_w,
        levels_h - 1,
        shift,
    );

    state.hf1_m3 = v2_hf1_line(src_prev1, levels_h, 0, width, shift);
    state.hf1_m1 = v2_hf1_line(src_prev1, levels_h, 1, width, shift);

    // Row r-4 re-derives from the previous precinct's first LF row.
    let lf_m4 = v2_lf_row(&state.v1.prev_even, src_prev1, levels_h, 0, width, shift);
    state.prev_row = if prec_idx == 1 {
        iv_even_top(&lf_m4, &state.hf1_m3)
    } else {
        let hf1_m5 = v2_hf1_line(
            src_prev2.expect("two precincts precede an interior slice"),
            levels_h,
            1,
            width,
            shift,
        );
        iv_even_interior(&lf_m4, &hf1_m5, &state.hf1_m3)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::BITSTREAM_MASK_SIGN;
    use crate::dwt::{self, BandSink, DwtV1History, DwtV2History};

    /// Deterministic pseudo-random generator for test planes.
    struct Lcg(u64);
    impl Lcg {
        fn next_u8(&mut self) -> u8 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (self.0 >> 33) as u8
        }
    }

    const BW: u8 = 20;
    const DEPTH: u8 = 8;
    const FQ: u8 = 8;

    fn scale_plane(samples: &[u8], width: usize) -> Vec<Vec<i32>> {
        samples
            .chunks(width)
            .map(|row| {
                row.iter()
                    .map(|&v| ((v as i32) << (BW - DEPTH)) - (1 << (BW - 1)))
                    .collect()
            })
            .collect()
    }

    fn unscale(v: i32) -> i32 {
        let dzeta = (BW - DEPTH) as i32;
        let m = (1i32 << DEPTH) - 1;
        let v = v + ((1 << BW) >> 1);
        ((v + ((1 << dzeta) >> 1)) >> dzeta).clamp(0, m)
    }

    fn arena_to_signed(arena: &[u16]) -> Vec<i16> {
        arena
            .iter()
            .map(|&v| {
                let m = (v & !BITSTREAM_MASK_SIGN) as i16;
                if v & BITSTREAM_MASK_SIGN != 0 {
                    -m
                } else {
                    m
                }
            })
            .collect()
    }

    /// Band layout of a V1 component: widths per band and arena offsets.
    fn v1_layout(width: u32, height: u32, levels_h: u32) -> (Vec<u32>, Vec<usize>) {
        let bands = (3 + levels_h) as usize;
        let mut widths = vec![0u32; bands];
        let hf_w = width / 2;
        let lf_w = width - hf_w;
        widths[bands - 1] = hf_w;
        widths[bands - 2] = lf_w;
        let mut cur = width;
        for b in (1..=levels_h as usize).rev() {
            let w2 = cur / 2;
            widths[b] = w2;
            cur -= w2;
        }
        widths[0] = cur;
        let _ = height;
        let offsets = layout_offsets(&widths, &vec![1u32; bands]);
        (widths, offsets)
    }

    fn layout_offsets(widths: &[u32], lines: &[u32]) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(widths.len());
        let mut off = 0usize;
        for (w, l) in widths.iter().zip(lines) {
            offsets.push(off);
            off += (*w as usize) * (*l as usize);
        }
        offsets
    }

    fn v2_layout(width: u32, levels_h: u32) -> (Vec<u32>, Vec<usize>, Vec<u32>) {
        let bands = (5 + levels_h) as usize;
        let mut widths = vec![0u32; bands];
        let mut lines = vec![1u32; bands];
        let w2 = width / 2; // down-right, up-right
        let w1 = width - w2;
        widths[bands - 1] = w2;
        widths[bands - 2] = w1;
        widths[bands - 3] = w2; // up-right band, 2 lines
        lines[bands - 1] = 2;
        lines[bands - 2] = 2;
        lines[bands - 3] = 2;
        // The embedded V1 splits the half plane: its down pair and its
        // horizontal cascade both start from the full half-plane width.
        let hf2 = w1 / 2;
        widths[bands - 4] = hf2;
        widths[bands - 5] = w1 - hf2;
        let mut cur = w1;
        for b in (1..levels_h as usize).rev() {
            let w = cur / 2;
            widths[b] = w;
            cur -= w;
        }
        widths[0] = cur;
        let offsets = layout_offsets(&widths, &lines);
        (widths, offsets, lines)
    }

    fn forward_v1_arena(
        plane: &[Vec<i32>],
        width: u32,
        height: u32,
        levels_h: u32,
        widths: &[u32],
        offsets: &[usize],
        slice_precincts: Option<u32>,
    ) -> Vec<Vec<u16>> {
        let prec_num = (height + 1) / 2;
        let mut hist = DwtV1History::new(width as usize);
        dwt::transform_v1_load_first(&mut hist, &plane[0]);
        let mut arenas = Vec::new();
        for p in 0..prec_num {
            let r = (2 * p) as usize;
            if let Some(sp) = slice_precincts {
                if p > 0 && p % sp == 0 {
                    dwt::transform_v1_recalc(&mut hist, &plane[r - 2], &plane[r - 1], &plane[r]);
                }
            }
            let size: usize = widths
                .iter()
                .map(|&w| w as usize)
                .sum();
            let mut arena = vec![0u16; size];
            let mut sink = BandSink {
                arena: &mut arena,
                offsets,
                widths,
                fq: FQ,
            };
            let line1 = plane.get(r + 1).map(|v| v.as_slice());
            let line2 = plane.get(r + 2).map(|v| v.as_slice());
            dwt::transform_v1_precinct(2 * p, height, line1, line2, levels_h, &mut sink, &mut hist);
            arenas.push(arena);
        }
        arenas
    }

    #[test]
    fn test_horizontal_roundtrip_all_lengths() {
        let mut rng = Lcg(7);
        for len in 2..48usize {
            let input: Vec<i32> = (0..len).map(|_| rng.next_u8() as i32 - 128).collect();
            let mut lf = vec![0i32; len - len / 2];
            let mut hf = vec![0i32; len / 2];
            dwt::dwt_horizontal_line(&mut lf, &mut hf, &input);

            let lf16: Vec<i16> = lf.iter().map(|&v| v as i16).collect();
            let hf16: Vec<i16> = hf.iter().map(|&v| v as i16).collect();
            let mut out = vec![0i32; len];
            idwt_horizontal_line_lf16_hf16(&lf16, &hf16, &mut out, 0);
            assert_eq!(out, input, "length {}", len);
        }
    }

    #[test]
    fn test_v1_schedule_roundtrip_exact() {
        let mut rng = Lcg(11);
        for (width, height, levels_h) in [(23u32, 9u32, 2u32), (32, 8, 3), (17, 7, 1), (16, 2, 2)]
        {
            let samples: Vec<u8> = (0..(width * height)).map(|_| rng.next_u8()).collect();
            let plane = scale_plane(&samples, width as usize);
            let (widths, offsets) = v1_layout(width, height, levels_h);
            let arenas =
                forward_v1_arena(&plane, width, height, levels_h, &widths, &offsets, None);

            let prec_num = (height + 1) / 2;
            let mut state = IdwtV1State::new(width as usize);
            let mut rows: Vec<Option<Vec<i32>>> = vec![None; height as usize];
            let signed: Vec<Vec<i16>> = arenas.iter().map(|a| arena_to_signed(a)).collect();
            for p in 0..prec_num {
                let src = BandSource {
                    arena: &signed[p as usize],
                    offsets: &offsets,
                    widths: &widths,
                };
                for (row, data) in inv_transform_v1_precinct(
                    &mut state,
                    &src,
                    p,
                    prec_num,
                    height,
                    width as usize,
                    levels_h,
                    FQ,
                ) {
                    rows[row as usize] = Some(data);
                }
            }
            for (y, row) in rows.iter().enumerate() {
                let row = row.as_ref().expect("every row reconstructed");
                for x in 0..width as usize {
                    let got = unscale(row[x]);
                    let want = samples[y * width as usize + x] as i32;
                    assert_eq!(got, want, "({},{}) {}x{} h{}", x, y, width, height, levels_h);
                }
            }
        }
    }

    #[test]
    fn test_v1_slice_recalc_bit_exact() {
        // Restarting history at a slice boundary must reproduce exactly what
        // continuous streaming produces.
        let mut rng = Lcg(23);
        let (width, height, levels_h) = (31u32, 20u32, 2u32);
        let samples: Vec<u8> = (0..(width * height)).map(|_| rng.next_u8()).collect();
        let plane = scale_plane(&samples, width as usize);
        let (widths, offsets) = v1_layout(width, height, levels_h);

        let continuous =
            forward_v1_arena(&plane, width, height, levels_h, &widths, &offsets, None);
        let sliced =
            forward_v1_arena(&plane, width, height, levels_h, &widths, &offsets, Some(3));
        assert_eq!(continuous, sliced);
    }

    #[test]
    fn test_v2_schedule_roundtrip_exact() {
        let mut rng = Lcg(41);
        for (width, height, levels_h) in [(24u32, 16u32, 2u32), (21, 13, 3), (16, 11, 2), (12, 4, 2)]
        {
            let samples: Vec<u8> = (0..(width * height)).map(|_| rng.next_u8()).collect();
            let plane = scale_plane(&samples, width as usize);
            let (widths, offsets, lines) = v2_layout(width, levels_h);
            let size: usize = widths
                .iter()
                .zip(&lines)
                .map(|(&w, &l)| (w * l) as usize)
                .sum();

            let prec_num = (height + 3) / 4;
            let mut hist = DwtV2History::new(width as usize);
            let mut arenas = Vec::new();
            for p in 0..prec_num {
                let r = (4 * p) as usize;
                let window: Vec<&[i32]> = (r..(r + 7).min(height as usize))
                    .map(|j| plane[j].as_slice())
                    .collect();
                let mut arena = vec![0u16; size];
                let mut sink = BandSink {
                    arena: &mut arena,
                    offsets: &offsets,
                    widths: &widths,
                    fq: FQ,
                };
                dwt::transform_v2_precinct(4 * p, height, &window, levels_h, &mut sink, &mut hist);
                arenas.push(arena);
            }

            let signed: Vec<Vec<i16>> = arenas.iter().map(|a| arena_to_signed(a)).collect();
            let mut state = IdwtV2State::new(width as usize);
            let mut rows: Vec<Option<Vec<i32>>> = vec![None; height as usize];
            for p in 0..prec_num {
                let src = BandSource {
                    arena: &signed[p as usize],
                    offsets: &offsets,
                    widths: &widths,
                };
                let prev = (p > 0).then(|| BandSource {
                    arena: &signed[(p - 1) as usize],
                    offsets: &offsets,
                    widths: &widths,
                });
                for (row, data) in inv_transform_v2_precinct(
                    &mut state,
                    prev.as_ref(),
                    &src,
                    p,
                    prec_num,
                    height,
                    width as usize,
                    levels_h,
                    FQ,
                ) {
                    rows[row as usize] = Some(data);
                }
            }
            for (y, row) in rows.iter().enumerate() {
                let row = row.as_ref().expect("every row reconstructed");
                for x in 0..width as usize {
                    let got = unscale(row[x]);
                    let want = samples[y * width as usize + x] as i32;
                    assert_eq!(got, want, "({},{}) {}x{} h{}", x, y, width, height, levels_h);
                }
            }
        }
    }

    #[test]
    fn test_v2_recalc_matches_streaming() {
        let mut rng = Lcg(53);
        let (width, height, levels_h) = (20u32, 24u32, 2u32);
        let samples: Vec<u8> = (0..(width * height)).map(|_| rng.next_u8()).collect();
        let plane = scale_plane(&samples, width as usize);
        let (widths, offsets, lines) = v2_layout(width, levels_h);
        let size: usize = widths
            .iter()
            .zip(&lines)
            .map(|(&w, &l)| (w * l) as usize)
            .sum();

        let run = |slice_precincts: Option<u32>| -> Vec<Vec<u16>> {
            let prec_num = (height + 3) / 4;
            let mut hist = DwtV2History::new(width as usize);
            let mut arenas = Vec::new();
            for p in 0..prec_num {
                let r = (4 * p) as usize;
                if let Some(sp) = slice_precincts {
                    if p > 0 && p % sp == 0 {
                        let base = r.saturating_sub(6);
                        let window: Vec<&[i32]> = (base..(r + 3).min(height as usize))
                            .map(|j| plane[j].as_slice())
                            .collect();
                        let b4_w = widths[levels_h as usize + 2] as usize;
                        dwt::transform_v2_recalc(&mut hist, 4 * p, height, &window, base, b4_w);
                    }
                }
                let window: Vec<&[i32]> = (r..(r + 7).min(height as usize))
                    .map(|j| plane[j].as_slice())
                    .collect();
                let mut arena = vec![0u16; size];
                let mut sink = BandSink {
                    arena: &mut arena,
                    offsets: &offsets,
                    widths: &widths,
                    fq: FQ,
                };
                dwt::transform_v2_precinct(4 * p, height, &window, levels_h, &mut sink, &mut hist);
                arenas.push(arena);
            }
            arenas
        };

        assert_eq!(run(None), run(Some(2)));
    }
}
