//! Quantization: truncation levels, GCLI extraction and the two inverse
//! quantizer types.
//!
//! Coefficients are stored as 15-bit magnitudes with the sign in the high
//! bit; `0x8000` (negative zero) never appears.

use crate::config::QuantType;
use crate::constants::{msb_index, BITSTREAM_MASK_SIGN, TRUNCATION_MAX};

/// Greatest Trimmed Line Index of a band for a `(quantization, refinement)`
/// pair. Refinement promotes the bands whose priority lies below it by one
/// bitplane.
#[inline]
pub fn compute_truncation(gain: u8, priority: u8, quantization: u8, refinement: u8) -> u8 {
    let pump_up = (priority < refinement) as u8;
    if quantization < gain + pump_up {
        return 0;
    }
    (quantization - gain - pump_up).min(TRUNCATION_MAX)
}

/// Greatest coded line index of one coefficient group:
/// `floor(log2(|max| << 1))`, 0 for an all-zero group.
#[inline]
fn group_gcli(group: &[u16]) -> u8 {
    let mut merge_or: u16 = 0;
    for &c in group {
        merge_or |= c;
    }
    merge_or <<= 1; // Remove sign bit.
    if merge_or != 0 {
        let gcli = msb_index(merge_or as u32) as u8;
        debug_assert!(gcli <= TRUNCATION_MAX);
        gcli
    } else {
        0
    }
}

/// Fills the GCLI array of one band line; one entry per `group_size`
/// coefficients, the tail group may be short.
pub fn gcli_line(gcli_out: &mut [u8], coeffs: &[u16], group_size: usize) {
    let groups = coeffs.len() / group_size;
    for g in 0..groups {
        gcli_out[g] = group_gcli(&coeffs[g * group_size..(g + 1) * group_size]);
    }
    if coeffs.len() % group_size != 0 {
        gcli_out[groups] = group_gcli(&coeffs[groups * group_size..]);
    }
}

/// Fills the significance-max array of one band line: the maximum GCLI of
/// each run of `group_sign_size` entries.
pub fn significance_max_line(sig_out: &mut [u8], gcli: &[u8], group_sign_size: usize) {
    let groups = gcli.len() / group_sign_size;
    for g in 0..groups {
        let run = &gcli[g * group_sign_size..(g + 1) * group_sign_size];
        sig_out[g] = run.iter().copied().max().unwrap_or(0);
    }
    if gcli.len() % group_sign_size != 0 {
        let run = &gcli[groups * group_sign_size..];
        sig_out[groups] = run.iter().copied().max().unwrap_or(0);
    }
}

/// Forward quantization of a magnitude within a group coded to `gcli`.
#[inline]
pub fn quantize_magnitude(m: u16, gcli: u8, gtli: u8, quant_type: QuantType) -> u16 {
    debug_assert!(m < 1 << gcli || gcli == 0);
    match quant_type {
        QuantType::Deadzone => m >> gtli,
        QuantType::Uniform => {
            let zeta = (gcli - gtli + 1) as u32;
            let m = m as u32;
            (((m << zeta) - m + (1 << gcli)) >> (gcli + 1)) as u16
        }
    }
}

/// Inverse quantization; the identity when `gtli == 0` for both types.
#[inline]
pub fn dequantize_magnitude(q: u16, gcli: u8, gtli: u8, quant_type: QuantType) -> u16 {
    if gtli == 0 {
        return q;
    }
    match quant_type {
        QuantType::Deadzone => {
            if q == 0 {
                0
            } else {
                // Midpoint reconstruction of the trimmed bitplanes.
                ((q as u32) << gtli) as u16 | (1u16 << (gtli - 1))
            }
        }
        QuantType::Uniform => {
            let zeta = (gcli - gtli + 1) as u32;
            (((q as u32) << (gcli + 1)) / ((1u32 << zeta) - 1)) as u16
        }
    }
}

/// Number of data-payload bits one coefficient carries.
#[inline]
pub fn coeff_data_bits(gcli: u8, gtli: u8, inline_sign: bool) -> u8 {
    gcli - gtli + inline_sign as u8
}

/// True when the quantized magnitude survives trimming; drives the `Full`
/// sign-handling census.
#[inline]
pub fn quantized_nonzero(coeff: u16, gcli: u8, gtli: u8, quant_type: QuantType) -> bool {
    let m = coeff & !BITSTREAM_MASK_SIGN;
    match quant_type {
        QuantType::Deadzone => (m >> gtli) != 0,
        QuantType::Uniform => quantize_magnitude(m, gcli, gtli, quant_type) != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_range() {
        for gain in 0..=15u8 {
            for priority in 0..=30u8 {
                for q in 0..=31u8 {
                    for r in 0..=30u8 {
                        let gtli = compute_truncation(gain, priority, q, r);
                        assert!(gtli <= TRUNCATION_MAX);
                    }
                }
            }
        }
    }

    #[test]
    fn test_truncation_formula() {
        assert_eq!(compute_truncation(2, 5, 8, 0), 6);
        // Refinement above the priority pumps the band by one plane.
        assert_eq!(compute_truncation(2, 5, 8, 6), 5);
        assert_eq!(compute_truncation(10, 0, 4, 0), 0);
        assert_eq!(compute_truncation(0, 0, 31, 0), TRUNCATION_MAX);
    }

    #[test]
    fn test_gcli_line() {
        let coeffs = [0u16, 0, 0, 0, 1, 0, 0, 0, 0x0400 | 0x8000, 0, 0, 3];
        let mut gcli = [0u8; 3];
        gcli_line(&mut gcli, &coeffs, 4);
        assert_eq!(gcli, [0, 1, 11]);
    }

    #[test]
    fn test_gcli_tail_group() {
        let coeffs = [0u16, 0, 0, 0, 0x0200, 0x01];
        let mut gcli = [0u8; 2];
        gcli_line(&mut gcli, &coeffs, 4);
        assert_eq!(gcli, [0, 10]);
    }

    #[test]
    fn test_significance_max() {
        let gcli = [1u8, 0, 2, 5, 0, 0, 0, 0, 7, 3];
        let mut sig = [0u8; 2];
        significance_max_line(&mut sig, &gcli, 8);
        assert_eq!(sig, [5, 7]);
    }

    #[test]
    fn test_quantize_identity_at_zero_gtli() {
        for qt in [QuantType::Deadzone, QuantType::Uniform] {
            for m in 0u16..512 {
                let gcli = if m == 0 { 0 } else { msb_index(((m as u32) << 1) as u32) as u8 };
                let q = quantize_magnitude(m, gcli, 0, qt);
                assert_eq!(q, m);
                assert_eq!(dequantize_magnitude(q, gcli, 0, qt), m);
            }
        }
    }

    #[test]
    fn test_quantize_deadzone_bounds() {
        let gcli = 7u8;
        for gtli in 0..=gcli {
            for m in 0u16..(1 << gcli) {
                let q = quantize_magnitude(m, gcli, gtli, QuantType::Deadzone);
                assert!(q < (1 << (gcli - gtli + 1)));
                let back = dequantize_magnitude(q, gcli, gtli, QuantType::Deadzone);
                assert!(back < (1 << (gcli + 1)));
                assert!((back as i32 - m as i32).unsigned_abs() < (1u32 << gtli));
            }
        }
    }

    #[test]
    fn test_quantize_uniform_fits_field() {
        let gcli = 9u8;
        for gtli in 1..=gcli {
            for m in 0u16..(1 << gcli) {
                let q = quantize_magnitude(m, gcli, gtli, QuantType::Uniform);
                // Must fit the (gcli - gtli)-bit data field.
                assert!(q < (1 << (gcli - gtli)), "m={} gtli={} q={}", m, gtli, q);
            }
        }
    }
}
