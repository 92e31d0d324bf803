//! Forward 5/3 wavelet transform, executed per precinct.
//!
//! Three vertical schedules exist: `V0` (no vertical decomposition, one image
//! line per precinct), `V1` (one level, two lines) and `V2` (two levels, four
//! lines). Each consumes its precinct strip plus look-ahead lines and carries
//! the partially computed high-frequency line into the next precinct through
//! a small per-component history. Slice starts rebuild that history from the
//! preceding input lines so slices stay bit-exact with continuous streaming.

use crate::constants::BITSTREAM_MASK_SIGN;

/// One-line 5/3 lifting step. `out_lf` holds `ceil(len/2)` low-pass and
/// `out_hf` `floor(len/2)` high-pass coefficients; `len >= 2`.
pub fn dwt_horizontal_line(out_lf: &mut [i32], out_hf: &mut [i32], input: &[i32]) {
    let len = input.len();
    debug_assert!(len >= 2, "horizontal DWT needs at least 2 samples");

    if len == 2 {
        out_hf[0] = input[1] - input[0];
        out_lf[0] = input[0] + ((out_hf[0] + 1) >> 1);
        return;
    }

    out_hf[0] = input[1] - ((input[0] + input[2]) >> 1);
    out_lf[0] = input[0] + ((out_hf[0] + 1) >> 1);

    let count = (len - 1) / 2;
    for id in 1..count {
        out_hf[id] = input[2 * id + 1] - ((input[2 * id] + input[2 * id + 2]) >> 1);
        out_lf[id] = input[2 * id] + ((out_hf[id - 1] + out_hf[id] + 2) >> 2);
    }

    if len % 2 == 0 {
        out_hf[len / 2 - 1] = input[len - 1] - input[len - 2];
        out_lf[len / 2 - 1] = input[len - 2] + ((out_hf[len / 2 - 2] + out_hf[len / 2 - 1] + 2) >> 2);
    } else {
        out_lf[len / 2] = input[len - 1] + ((out_hf[len / 2 - 1] + 1) >> 1);
    }
}

/// Converts 32-bit intermediates into the 16-bit band storage: round the
/// magnitude by `Fq` fractional bits and pack the sign into the high bit.
/// Magnitude zero always stores as `0x0000`, never negative zero.
pub fn image_shift(out: &mut [u16], input: &[i32], fq: u8) {
    let offset = 1i32 << (fq - 1);
    for (o, &v) in out.iter_mut().zip(input) {
        let m = ((v.abs() + offset) >> fq) as u16;
        debug_assert!(m <= !BITSTREAM_MASK_SIGN);
        *o = if m != 0 && v < 0 {
            m | BITSTREAM_MASK_SIGN
        } else {
            m
        };
    }
}

/// Destination of band coefficients: the per-component precinct arena plus
/// the band layout of that component.
pub struct BandSink<'a> {
    pub arena: &'a mut [u16],
    /// Arena offset of each band (line 0).
    pub offsets: &'a [usize],
    /// Width of each band.
    pub widths: &'a [u32],
    pub fq: u8,
}

impl BandSink<'_> {
    fn emit(&mut self, band: usize, line: usize, data: &[i32]) {
        let w = self.widths[band] as usize;
        let off = self.offsets[band] + line * w;
        image_shift(&mut self.arena[off..off + w], &data[..w], self.fq);
    }
}

/// Horizontal cascade: repeatedly split the line into (low, high), store the
/// high band, recurse on the low part. With `levels == 0` the line itself is
/// the single band (components with suppressed decomposition).
pub fn transform_v0(line: &mut [i32], levels: u32, sink: &mut BandSink, line_in_band: usize) {
    let mut cur = line.len();
    for b in (1..=levels as usize).rev() {
        let hf_w = sink.widths[b] as usize;
        let lf_w = cur - hf_w;
        let mut lf_tmp = vec![0i32; lf_w];
        let mut hf_tmp = vec![0i32; hf_w];
        dwt_horizontal_line(&mut lf_tmp, &mut hf_tmp, &line[..cur]);
        sink.emit(b, line_in_band, &hf_tmp);
        line[..lf_w].copy_from_slice(&lf_tmp);
        cur = lf_w;
    }
    let (lf, _) = line.split_at(cur);
    sink.emit(0, line_in_band, lf);
}

// Vertical lifting kernels; one output element per column.

fn v_hf(prev: &[i32], cur: &[i32], next: Option<&[i32]>) -> Vec<i32> {
    match next {
        Some(next) => cur
            .iter()
            .zip(prev.iter().zip(next))
            .map(|(&c, (&p, &n))| c - ((p + n) >> 1))
            .collect(),
        // Bottom row of an even-height plane.
        None => cur.iter().zip(prev).map(|(&c, &p)| c - p).collect(),
    }
}

fn v_lf_top(cur: &[i32], hf_next: &[i32]) -> Vec<i32> {
    cur.iter()
        .zip(hf_next)
        .map(|(&c, &hf)| c + ((hf + 1) >> 1))
        .collect()
}

fn v_lf_interior(cur: &[i32], hf_prev: &[i32], hf_next: &[i32]) -> Vec<i32> {
    cur.iter()
        .zip(hf_prev.iter().zip(hf_next))
        .map(|(&c, (&p, &n))| c + ((p + n + 2) >> 2))
        .collect()
}

fn v_lf_bottom(cur: &[i32], hf_prev: &[i32]) -> Vec<i32> {
    cur.iter()
        .zip(hf_prev)
        .map(|(&c, &p)| c + ((p + 1) >> 1))
        .collect()
}

fn h_split(line: &[i32], lf_w: usize, hf_w: usize) -> (Vec<i32>, Vec<i32>) {
    let mut lf = vec![0i32; lf_w];
    let mut hf = vec![0i32; hf_w];
    dwt_horizontal_line(&mut lf, &mut hf, line);
    (lf, hf)
}

/// History carried between successive precincts of one component.
#[derive(Debug, Clone)]
pub struct DwtV1History {
    /// Scaled input line at the precinct start row.
    pub line0: Vec<i32>,
    /// Vertical high-frequency line of the previous precinct.
    pub hf_prev: Vec<i32>,
}

impl DwtV1History {
    pub fn new(width: usize) -> Self {
        DwtV1History {
            line0: vec![0; width],
            hf_prev: vec![0; width],
        }
    }
}

#[derive(Debug, Clone)]
pub struct DwtV2History {
    /// First-level vertical HF at the row before the precinct.
    pub hf1_prev: Vec<i32>,
    /// Second-level vertical HF at the half-row before the precinct.
    pub hf2_prev: Vec<i32>,
}

impl DwtV2History {
    pub fn new(width: usize) -> Self {
        DwtV2History {
            hf1_prev: vec![0; width],
            hf2_prev: vec![0; width / 2 + 1],
        }
    }
}

/// One vertical level over a strip of two rows, shared between the
/// stand-alone V1 schedule and the upper stage of V2.
///
/// Returns the newly computed HF line so the caller can roll its history.
#[allow(clippy::too_many_arguments)]
fn transform_v1_core(
    line0: &[i32],
    line1: Option<&[i32]>,
    line2: Option<&[i32]>,
    hf_prev: Option<&[i32]>,
    line_idx: u32,
    height: u32,
    levels_h: u32,
    band_down: usize,
    sink: &mut BandSink,
) -> Option<Vec<i32>> {
    let width = line0.len();
    let has_hf = line_idx + 1 < height;

    let (mut lf, hf_next) = if has_hf {
        let l1 = line1.expect("second precinct line");
        let hf = if line_idx + 2 < height {
            v_hf(line0, l1, Some(line2.expect("look-ahead line")))
        } else {
            v_hf(line0, l1, None)
        };
        let lf = if line_idx == 0 {
            v_lf_top(line0, &hf)
        } else {
            v_lf_interior(line0, hf_prev.expect("history of previous precinct"), &hf)
        };

        let hf_w = sink.widths[band_down + 1] as usize;
        let (down_lf, down_hf) = h_split(&hf, width - hf_w, hf_w);
        sink.emit(band_down, 0, &down_lf);
        sink.emit(band_down + 1, 0, &down_hf);
        (lf, Some(hf))
    } else {
        // Single bottom row of an odd-height plane.
        let lf = v_lf_bottom(line0, hf_prev.expect("history of previous precinct"));
        (lf, None)
    };

    transform_v0(&mut lf, levels_h, sink, 0);
    hf_next
}

/// V1 schedule: one precinct of two image lines plus one look-ahead line.
pub fn transform_v1_precinct(
    line_idx: u32,
    height: u32,
    line1: Option<&[i32]>,
    line2: Option<&[i32]>,
    levels_h: u32,
    sink: &mut BandSink,
    hist: &mut DwtV1History,
) {
    let hf_prev = if line_idx > 0 {
        Some(hist.hf_prev.as_slice())
    } else {
        None
    };
    let hf_next = transform_v1_core(
        &hist.line0,
        line1,
        line2,
        hf_prev,
        line_idx,
        height,
        levels_h,
        levels_h as usize + 1,
        sink,
    );
    // The look-ahead line is the first line of the next precinct.
    if let Some(l2) = line2 {
        hist.line0.copy_from_slice(l2);
    }
    if let Some(hf) = hf_next {
        hist.hf_prev.copy_from_slice(&hf);
    }
}

/// Seeds the V1 history at the first precinct of the frame.
pub fn transform_v1_load_first(hist: &mut DwtV1History, line_0: &[i32]) {
    hist.line0.copy_from_slice(line_0);
}

/// Rebuilds the V1 history at a slice start from the two preceding input
/// lines, reproducing exactly what continuous streaming would have carried.
pub fn transform_v1_recalc(
    hist: &mut DwtV1History,
    line_m2: &[i32],
    line_m1: &[i32],
    line_0: &[i32],
) {
    hist.hf_prev = v_hf(line_m2, line_m1, Some(line_0));
    hist.line0.copy_from_slice(line_0);
}

/// V2 schedule: one precinct of four image lines plus three look-ahead
/// lines. `window[k]` is the scaled input row `line_idx + k`, clipped to the
/// plane height.
pub fn transform_v2_precinct(
    line_idx: u32,
    height: u32,
    window: &[&[i32]],
    levels_h: u32,
    sink: &mut BandSink,
    hist: &mut DwtV2History,
) {
    let h = height as usize;
    let r = line_idx as usize;
    let width = window[0].len();
    let get = |j: usize| window[j - r];

    // First vertical level: HF at the odd rows of the strip plus one
    // look-ahead HF for the next LF row.
    let hf1_r1 = (r + 1 < h).then(|| v_hf(get(r), get(r + 1), (r + 2 < h).then(|| get(r + 2))));
    let hf1_r3 =
        (r + 3 < h).then(|| v_hf(get(r + 2), get(r + 3), (r + 4 < h).then(|| get(r + 4))));
    let hf1_r5 =
        (r + 5 < h).then(|| v_hf(get(r + 4), get(r + 5), (r + 6 < h).then(|| get(r + 6))));

    let lf_r = if r == 0 {
        v_lf_top(get(0), hf1_r1.as_ref().expect("V2 needs at least 2 rows"))
    } else if r + 1 < h {
        v_lf_interior(get(r), &hist.hf1_prev, hf1_r1.as_ref().unwrap())
    } else {
        v_lf_bottom(get(r), &hist.hf1_prev)
    };
    let lf_r2 = (r + 2 < h).then(|| {
        if r + 3 < h {
            v_lf_interior(get(r + 2), hf1_r1.as_ref().unwrap(), hf1_r3.as_ref().unwrap())
        } else {
            v_lf_bottom(get(r + 2), hf1_r1.as_ref().unwrap())
        }
    });
    let lf_r4 = (r + 4 < h).then(|| {
        if r + 5 < h {
            v_lf_interior(get(r + 4), hf1_r3.as_ref().unwrap(), hf1_r5.as_ref().unwrap())
        } else {
            v_lf_bottom(get(r + 4), hf1_r3.as_ref().unwrap())
        }
    });

    // Down bands: the two HF rows of the strip, split once horizontally.
    let band_down = levels_h as usize + 3;
    let down_hf_w = sink.widths[band_down + 1] as usize;
    if let Some(hf) = &hf1_r1 {
        let (a, b) = h_split(hf, width - down_hf_w, down_hf_w);
        sink.emit(band_down, 0, &a);
        sink.emit(band_down + 1, 0, &b);
    }
    if let Some(hf) = &hf1_r3 {
        let (a, b) = h_split(hf, width - down_hf_w, down_hf_w);
        sink.emit(band_down, 1, &a);
        sink.emit(band_down + 1, 1, &b);
    }

    // LF rows split once horizontally: the high half is a band of its own,
    // the low half feeds the second vertical level.
    let band_up_right = levels_h as usize + 2;
    let b4_w = sink.widths[band_up_right] as usize;
    let half_w = width - b4_w;
    let (lfh0, b4_line0) = h_split(&lf_r, half_w, b4_w);
    sink.emit(band_up_right, 0, &b4_line0);
    let lfh1 = lf_r2.map(|l| {
        let (a, b) = h_split(&l, half_w, b4_w);
        sink.emit(band_up_right, 1, &b);
        a
    });
    let lfh2 = lf_r4.map(|l| h_split(&l, half_w, b4_w).0);

    let hhalf = height - height / 2;
    let hr = (r / 2) as u32;
    let hf2_next = transform_v1_core(
        &lfh0,
        lfh1.as_deref(),
        lfh2.as_deref(),
        (hr > 0).then_some(hist.hf2_prev.as_slice()),
        hr,
        hhalf,
        levels_h - 1,
        levels_h as usize,
        sink,
    );

    if let Some(hf) = hf1_r3 {
        hist.hf1_prev = hf;
    }
    if let Some(hf) = hf2_next {
        hist.hf2_prev = hf;
    }
}

/// Rebuilds the V2 history at a slice start from up to six preceding input
/// lines. `window[k]` is the scaled row `window_base_row + k`, running
/// through `line_idx + 2`; the base is `line_idx - 6` clipped at row 0.
pub fn transform_v2_recalc(
    hist: &mut DwtV2History,
    line_idx: u32,
    height: u32,
    window: &[&[i32]],
    window_base_row: usize,
    band_up_right_width: usize,
) {
    let h = height as usize;
    let r = line_idx as usize;
    debug_assert!(r >= 4 && r % 4 == 0);
    let get = |j: usize| window[j - window_base_row];
    let width = get(r).len();

    let hf1_m5 = (r >= 6).then(|| v_hf(get(r - 6), get(r - 5), Some(get(r - 4))));
    let hf1_m3 = v_hf(get(r - 4), get(r - 3), Some(get(r - 2)));
    let hf1_m1 = v_hf(get(r - 2), get(r - 1), Some(get(r)));
    let hf1_p1 = (r + 1 < h).then(|| v_hf(get(r), get(r + 1), (r + 2 < h).then(|| get(r + 2))));

    let lf_m4 = if r == 4 {
        v_lf_top(get(0), &hf1_m3)
    } else {
        v_lf_interior(get(r - 4), hf1_m5.as_ref().unwrap(), &hf1_m3)
    };
    let lf_m2 = v_lf_interior(get(r - 2), &hf1_m3, &hf1_m1);
    let lf_0 = if r + 1 < h {
        v_lf_interior(get(r), &hf1_m1, hf1_p1.as_ref().unwrap())
    } else {
        v_lf_bottom(get(r), &hf1_m1)
    };

    let half_w = width - band_up_right_width;
    let lfh_m2 = h_split(&lf_m4, half_w, band_up_right_width).0;
    let lfh_m1 = h_split(&lf_m2, half_w, band_up_right_width).0;
    let lfh_0 = h_split(&lf_0, half_w, band_up_right_width).0;

    // Second-level HF at the half-row right before the precinct.
    hist.hf2_prev = v_hf(&lfh_m2, &lfh_m1, Some(&lfh_0));
    hist.hf1_prev = hf1_m1;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference lifting over a whole signal at once.
    fn lift_53(input: &[i32]) -> (Vec<i32>, Vec<i32>) {
        let len = input.len();
        let mut hf = vec![0i32; len / 2];
        let mut lf = vec![0i32; len - len / 2];
        for i in (1..len).step_by(2) {
            let right = if i + 1 < len { input[i + 1] } else { input[i - 1] };
            hf[i / 2] = input[i] - ((input[i - 1] + right) >> 1);
        }
        for i in (0..len).step_by(2) {
            let left = if i > 0 { hf[(i - 1) / 2] } else { hf[0] };
            let right = if i / 2 < hf.len() { hf[i / 2] } else { hf[hf.len() - 1] };
            if i == 0 {
                lf[0] = input[0] + ((hf[0] + 1) >> 1);
            } else if i / 2 < hf.len() {
                lf[i / 2] = input[i] + ((left + right + 2) >> 2);
            } else {
                lf[i / 2] = input[i] + ((left + 1) >> 1);
            }
        }
        (lf, hf)
    }

    #[test]
    fn test_horizontal_line_matches_reference() {
        for len in 2..40usize {
            let input: Vec<i32> = (0..len as i32).map(|i| (i * 37) % 101 - 50).collect();
            let mut lf = vec![0i32; len - len / 2];
            let mut hf = vec![0i32; len / 2];
            dwt_horizontal_line(&mut lf, &mut hf, &input);
            let (rlf, rhf) = lift_53(&input);
            assert_eq!(lf, rlf, "lf mismatch at len {}", len);
            assert_eq!(hf, rhf, "hf mismatch at len {}", len);
        }
    }

    #[test]
    fn test_horizontal_line_len_2() {
        let input = [7, 10];
        let mut lf = [0i32; 1];
        let mut hf = [0i32; 1];
        dwt_horizontal_line(&mut lf, &mut hf, &input);
        assert_eq!(hf[0], 3);
        assert_eq!(lf[0], 7 + 2);
    }

    #[test]
    fn test_image_shift_no_negative_zero() {
        // A small negative value rounds to magnitude zero; the sign bit must
        // not survive.
        let input = [-1i32, -255, 255, -256, 256, 0];
        let mut out = [0u16; 6];
        image_shift(&mut out, &input, 8);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 1 | BITSTREAM_MASK_SIGN);
        assert_eq!(out[2], 1);
        assert_eq!(out[3], 1 | BITSTREAM_MASK_SIGN);
        assert_eq!(out[4], 1);
        assert_eq!(out[5], 0);
        for &v in out.iter() {
            assert_ne!(v, BITSTREAM_MASK_SIGN, "negative zero is forbidden");
        }
    }

    #[test]
    fn test_transform_v0_constant_line() {
        // A constant (zero) line produces all-zero bands.
        let widths = [2u32, 2, 4];
        let offsets = [0usize, 2, 4];
        let mut arena = vec![0xFFFFu16; 8];
        let mut sink = BandSink {
            arena: &mut arena,
            offsets: &offsets,
            widths: &widths,
            fq: 8,
        };
        let mut line = vec![0i32; 8];
        transform_v0(&mut line, 2, &mut sink, 0);
        assert!(arena.iter().all(|&v| v == 0));
    }
}
