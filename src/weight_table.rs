//! Per-band gain and priority assignment.
//!
//! Built-in tables cover the common decompositions; other 422/444 shapes are
//! derived from the reference 5/2 table by removing horizontal or vertical
//! rows and re-densifying the priorities.

use crate::constants::BAND_NOT_EXIST;
use crate::error::{JxsError, Result};
use crate::image::ColourFormat;
use crate::pi::Pi;

/// Band-not-exist shorthand for the tables below.
const NE: u8 = BAND_NOT_EXIST;

// Default weight tables, sample values from the specification.
/*YUV444*/
#[rustfmt::skip]
const WT_444_0_5_GAIN: [u8; 18] = [3, 2, 2, 2, 1, 1, 2, 1, 1, 1, 0, 0, 1, 0, 0, 1, 0, 0];
#[rustfmt::skip]
const WT_444_1_5_GAIN: [u8; 24] = [4, 2, 2, 3, 2, 2, 2, 1, 1, 2, 1, 1, 1, 0, 0, 1, 0, 0, 1, 0, 0, 1, 0, 0];
#[rustfmt::skip]
const WT_444_2_5_GAIN: [u8; 30] = [4, 3, 3, 3, 2, 2, 3, 2, 2, 2, 1, 1, 2, 1, 1, 2, 1, 1, 1, 0, 0, 1, 0, 0, 1, 0, 0, 1, 0, 0];
#[rustfmt::skip]
const WT_444_0_5_PRIO: [u8; 18] = [ 6,  8,  7,  1,  4,  5, 12, 14, 15,  0,  2,  3,  9, 11, 10, 13, 16, 17];
#[rustfmt::skip]
const WT_444_1_5_PRIO: [u8; 24] = [21,  1,  0, 15, 19, 18,  5,  9,  8, 14, 17, 16,  2,  4,  3,  7, 13, 11,  6, 12, 10, 20, 23, 22];
#[rustfmt::skip]
const WT_444_2_5_PRIO: [u8; 30] = [12, 15, 14,  3, 11, 10, 24, 26, 27,  0,  4,  5, 18, 21, 20, 19, 23, 22, 13, 16, 17,  2,  9,  6,  1,  7,  8, 25, 28, 29];

/*YUV422*/
#[rustfmt::skip]
const WT_422_0_5_GAIN: [u8; 18] = [2, 2, 2, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0];
#[rustfmt::skip]
const WT_422_1_5_GAIN: [u8; 24] = [2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
#[rustfmt::skip]
const WT_422_2_5_GAIN: [u8; 30] = [3, 3, 3, 2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
#[rustfmt::skip]
const WT_422_0_5_PRIO: [u8; 18] = [ 8,  7,  6,  5,  3,  4, 13, 12, 14,  1,  0,  2,  9, 11, 10, 16, 15, 17];
#[rustfmt::skip]
const WT_422_1_5_PRIO: [u8; 24] = [ 0,  1,  2, 18, 19, 20,  6,  7,  8, 15, 16, 17,  3,  4,  5, 10, 12, 14,  9, 11, 13, 21, 22, 23];
#[rustfmt::skip]
const WT_422_2_5_PRIO: [u8; 30] = [14, 13, 12,  9, 11, 10, 25, 24, 26,  0,  1,  2, 19, 20, 18, 23, 22, 21, 17, 15, 16,  4,  8,  5,  3,  6,  7, 28, 27, 29];

/*YUV420*/
#[rustfmt::skip]
const WT_420_1_1_GAIN: [u8; 12] = [1, 1, 1, 1, 0, 0, 1, NE, NE, 0, NE, NE];
#[rustfmt::skip]
const WT_420_1_2_GAIN: [u8; 15] = [1, 1, 1, 1, 0, 0, 1, 0, 0, 1, NE, NE, 0, NE, NE];
#[rustfmt::skip]
const WT_420_1_3_GAIN: [u8; 18] = [2, 1, 1, 1, 1, 1, 1, 0, 0, 1, 0, 0, 1, NE, NE, 0, NE, NE];
#[rustfmt::skip]
const WT_420_1_4_GAIN: [u8; 21] = [2, 2, 2, 2, 1, 1, 1, 1, 1, 1, 0, 0, 1, 0, 0, 1, NE, NE, 0, NE, NE];
#[rustfmt::skip]
const WT_420_1_5_GAIN: [u8; 24] = [3, 3, 3, 2, 2, 2, 2, 1, 1, 1, 1, 1, 1, 0, 0, 1, 0, 0, 1, NE, NE, 0, NE, NE];
#[rustfmt::skip]
const WT_420_2_2_GAIN: [u8; 21] = [2, 1, 1, 1, 1, 1, 1, NE, NE, 0, NE, NE, 1, 1, 1, 1, 1, 1, 0, 0, 0];
#[rustfmt::skip]
const WT_420_2_3_GAIN: [u8; 24] = [2, 2, 2, 2, 1, 1, 1, 1, 1, 1, NE, NE, 0, NE, NE, 1, 1, 1, 1, 1, 1, 0, 0, 0];
#[rustfmt::skip]
const WT_420_2_4_GAIN: [u8; 27] = [3, 2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 1, NE, NE, 0, NE, NE, 1, 1, 1, 1, 1, 1, 0, 0, 0];
#[rustfmt::skip]
const WT_420_2_5_GAIN: [u8; 30] = [3, 3, 3, 3, 2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 1, NE, NE, 0, NE, NE, 1, 1, 1, 1, 1, 1, 0, 0, 0];
#[rustfmt::skip]
const WT_420_1_1_PRIO: [u8; 12] = [ 2,  5,  4,  6,  1,  0,  7, NE, NE,  3, NE, NE];
#[rustfmt::skip]
const WT_420_1_2_PRIO: [u8; 15] = [ 4,  7,  6,  8,  1,  0, 10,  3,  2,  9, NE, NE,  5, NE, NE];
#[rustfmt::skip]
const WT_420_1_3_PRIO: [u8; 18] = [11,  3,  2,  6,  9,  8, 10,  1,  0, 13,  5,  4, 12, NE, NE,  7, NE, NE];
#[rustfmt::skip]
const WT_420_1_4_PRIO: [u8; 21] = [ 7, 12, 11, 14,  3,  2,  6, 10,  9, 13,  1,  0, 16,  5,  4, 15, NE, NE,  8, NE, NE];
#[rustfmt::skip]
const WT_420_1_5_PRIO: [u8; 24] = [ 9, 16, 15,  7, 13, 12, 17,  3,  2,  6, 11, 10, 14,  1,  0, 19,  5,  4, 18, NE, NE,  8, NE, NE];
#[rustfmt::skip]
const WT_420_2_2_PRIO: [u8; 21] = [10,  4,  3,  2,  9,  8,  1, NE, NE,  0, NE, NE, 16, 14, 12, 15, 13, 11,  7,  6,  5];
#[rustfmt::skip]
const WT_420_2_3_PRIO: [u8; 24] = [ 5, 12, 11, 13,  4,  3,  2, 10,  9,  1, NE, NE,  0, NE, NE, 19, 17, 15, 18, 16, 14,  8,  7,  6];
#[rustfmt::skip]
const WT_420_2_4_PRIO: [u8; 27] = [22,  6,  5,  7, 14, 13, 15,  4,  3,  2, 12, 11,  1, NE, NE,  0, NE, NE, 21, 19, 17, 20, 18, 16, 10,  9,  8];
#[rustfmt::skip]
const WT_420_2_5_PRIO: [u8; 30] = [ 0, 13, 12, 25,  7,  6,  8, 17, 16, 18,  5,  4,  3, 15, 14,  2, NE, NE,  1, NE, NE, 24, 22, 20, 23, 21, 19, 11, 10,  9];

fn builtin_table(
    format: ColourFormat,
    decom_h: u32,
    decom_v: u32,
) -> Option<(&'static [u8], &'static [u8])> {
    match format {
        ColourFormat::PlanarYuv444OrRgb | ColourFormat::PackedYuv444OrRgb => {
            match (decom_h, decom_v) {
                (5, 0) => Some((&WT_444_0_5_GAIN, &WT_444_0_5_PRIO)),
                (5, 1) => Some((&WT_444_1_5_GAIN, &WT_444_1_5_PRIO)),
                (5, 2) => Some((&WT_444_2_5_GAIN, &WT_444_2_5_PRIO)),
                _ => None,
            }
        }
        ColourFormat::PlanarYuv422 => match (decom_h, decom_v) {
            (5, 0) => Some((&WT_422_0_5_GAIN, &WT_422_0_5_PRIO)),
            (5, 1) => Some((&WT_422_1_5_GAIN, &WT_422_1_5_PRIO)),
            (5, 2) => Some((&WT_422_2_5_GAIN, &WT_422_2_5_PRIO)),
            _ => None,
        },
        ColourFormat::PlanarYuv420 => match (decom_h, decom_v) {
            (1, 1) => Some((&WT_420_1_1_GAIN, &WT_420_1_1_PRIO)),
            (2, 1) => Some((&WT_420_1_2_GAIN, &WT_420_1_2_PRIO)),
            (3, 1) => Some((&WT_420_1_3_GAIN, &WT_420_1_3_PRIO)),
            (4, 1) => Some((&WT_420_1_4_GAIN, &WT_420_1_4_PRIO)),
            (5, 1) => Some((&WT_420_1_5_GAIN, &WT_420_1_5_PRIO)),
            (2, 2) => Some((&WT_420_2_2_GAIN, &WT_420_2_2_PRIO)),
            (3, 2) => Some((&WT_420_2_3_GAIN, &WT_420_2_3_PRIO)),
            (4, 2) => Some((&WT_420_2_4_GAIN, &WT_420_2_4_PRIO)),
            (5, 2) => Some((&WT_420_2_5_GAIN, &WT_420_2_5_PRIO)),
            _ => None,
        },
        _ => None,
    }
}

struct WeightTable {
    gain: Vec<u8>,
    priority: Vec<u8>,
}

fn derivation_base(format: ColourFormat) -> Result<WeightTable> {
    let (gain, priority) = builtin_table(format, 5, 2).ok_or(JxsError::BadParameter)?;
    Ok(WeightTable {
        gain: gain.to_vec(),
        priority: priority.to_vec(),
    })
}

/// Removes the last horizontal decomposition rows until `dest_h` remains.
fn reduce_h(table: &mut WeightTable, v: u32, mut h: u32, dest_h: u32) -> Result<()> {
    if h < v || dest_h < v {
        return Err(JxsError::BadParameter);
    }
    // Remove 3 bands per step, one from each component.
    while h > dest_h {
        h -= 1;
        if h != 1 {
            table.gain.drain(0..3);
            table.priority.drain(0..3);
        } else {
            let len = table.gain.len() - 3;
            table.gain.truncate(len);
            table.priority.truncate(len);
        }
    }
    Ok(())
}

/// Removes vertical decomposition rows until `dest_v` remains.
fn reduce_v(table: &mut WeightTable, mut v: u32, h: u32, dest_v: u32) -> Result<()> {
    if h < v {
        return Err(JxsError::BadParameter);
    }
    // Remove 6 bands per step: the last entry of the first line and the
    // leading entry, 3 slots each (one per component).
    while v > dest_v {
        let remove = (h - 1) as usize;
        v -= 1;

        table.gain.drain(3 * remove..3 * (remove + 1));
        table.priority.drain(3 * remove..3 * (remove + 1));
        table.gain.drain(0..3);
        table.priority.drain(0..3);
    }
    Ok(())
}

/// Re-densifies priorities so they cover `{0 .. len-1}` without holes.
fn rebuild_priorities(table: &mut WeightTable) {
    let len = table.priority.len();
    for i in 0..len as u8 {
        loop {
            if table.priority.iter().any(|&p| p == i) {
                break;
            }
            if let Some(p) = table.priority.iter_mut().find(|p| **p > i) {
                *p -= 1;
            } else {
                break;
            }
        }
    }
}

fn recalculate_table(pi: &Pi, format: ColourFormat) -> Result<WeightTable> {
    if pi.comps_num != 3 {
        return Err(JxsError::BadParameter);
    }
    if format != ColourFormat::PlanarYuv422
        && format != ColourFormat::PlanarYuv444OrRgb
        && format != ColourFormat::PackedYuv444OrRgb
    {
        return Err(JxsError::BadParameter);
    }
    log::warn!(
        "weight table not defined for H:{} V:{}; using recalculated table",
        pi.decom_h,
        pi.decom_v
    );

    let mut table = derivation_base(format)?;
    reduce_v(&mut table, 2, 5, pi.decom_v)?;
    reduce_h(&mut table, pi.decom_v, 5, pi.decom_h)?;
    rebuild_priorities(&mut table);
    Ok(table)
}

/// Populates `gain` and `priority` on every band of the picture.
pub fn weight_table_calculate(pi: &mut Pi, format: ColourFormat) -> Result<()> {
    if format == ColourFormat::Invalid {
        return Err(JxsError::BadParameter);
    }

    let table = match builtin_table(format, pi.decom_h, pi.decom_v) {
        Some((gain, priority)) if pi.comps_num == 3 => WeightTable {
            gain: gain.to_vec(),
            priority: priority.to_vec(),
        },
        _ => {
            if pi.comps_num == 1 {
                // Single-component streams reuse the luma column of the 444
                // table shape: every third entry.
                let mut t = match builtin_table(ColourFormat::PlanarYuv444OrRgb, 5, 2) {
                    Some((g, p)) => WeightTable {
                        gain: g.to_vec(),
                        priority: p.to_vec(),
                    },
                    None => return Err(JxsError::BadParameter),
                };
                reduce_v(&mut t, 2, 5, pi.decom_v)?;
                reduce_h(&mut t, pi.decom_v, 5, pi.decom_h)?;
                let gain: Vec<u8> = t.gain.iter().step_by(3).copied().collect();
                let priority: Vec<u8> = t.priority.iter().step_by(3).copied().collect();
                let mut t = WeightTable { gain, priority };
                rebuild_priorities(&mut t);
                t
            } else {
                recalculate_table(pi, format)?
            }
        }
    };

    for comp in pi.components.iter_mut() {
        for band in comp.bands.iter_mut() {
            let id = band.band_id as usize;
            if id >= table.gain.len() {
                return Err(JxsError::BadParameter);
            }
            band.gain = table.gain[id];
            band.priority = table.priority[id];
        }
    }

    // Priorities of existing bands must form {0 .. bands_num_exists-1}.
    let mut seen = vec![0u32; pi.bands_num_exists as usize];
    for comp in pi.components.iter() {
        for band in comp.bands.iter() {
            if band.priority as u32 >= pi.bands_num_exists {
                return Err(JxsError::BadParameter);
            }
            seen[band.priority as usize] += 1;
        }
    }
    if seen.iter().any(|&n| n != 1) {
        log::error!("weight table priorities are not consistent");
        return Err(JxsError::BadParameter);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{GROUP_SIZE, SIGNIFICANCE_GROUP_SIZE, TRUNCATION_MAX};

    fn build_pi(
        format: ColourFormat,
        w: u32,
        h: u32,
        dh: u32,
        dv: u32,
        slice_height: u32,
    ) -> Pi {
        let (comps, sx, sy) = crate::pi::format_sampling_factors(format).unwrap();
        Pi::compute(
            true,
            comps,
            GROUP_SIZE as u32,
            SIGNIFICANCE_GROUP_SIZE as u32,
            w,
            h,
            dh,
            dv,
            0,
            &sx,
            &sy,
            0,
            slice_height,
        )
        .unwrap()
    }

    fn check_weights(pi: &Pi) {
        let mut seen = vec![false; pi.bands_num_exists as usize];
        for comp in pi.components.iter() {
            for band in comp.bands.iter() {
                assert!(band.gain <= TRUNCATION_MAX);
                assert!(!seen[band.priority as usize]);
                seen[band.priority as usize] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_builtin_420_v2_h5() {
        let mut pi = build_pi(ColourFormat::PlanarYuv420, 1920, 1080, 5, 2, 16);
        weight_table_calculate(&mut pi, ColourFormat::PlanarYuv420).unwrap();
        check_weights(&pi);
        // Spot-check against the reference table: luma LL has gain 3 and
        // priority 0 in the 420 5/2 layout.
        assert_eq!(pi.components[0].bands[0].gain, 3);
        assert_eq!(pi.components[0].bands[0].priority, 0);
    }

    #[test]
    fn test_builtin_444_v0_h5() {
        let mut pi = build_pi(ColourFormat::PlanarYuv444OrRgb, 512, 512, 5, 0, 512);
        weight_table_calculate(&mut pi, ColourFormat::PlanarYuv444OrRgb).unwrap();
        check_weights(&pi);
    }

    #[test]
    fn test_derived_444_v0_h2() {
        let mut pi = build_pi(ColourFormat::PlanarYuv444OrRgb, 488, 325, 2, 0, 325);
        weight_table_calculate(&mut pi, ColourFormat::PlanarYuv444OrRgb).unwrap();
        check_weights(&pi);
    }

    #[test]
    fn test_derived_422_v1_h4() {
        let mut pi = build_pi(ColourFormat::PlanarYuv422, 640, 480, 4, 1, 16);
        weight_table_calculate(&mut pi, ColourFormat::PlanarYuv422).unwrap();
        check_weights(&pi);
    }

    #[test]
    fn test_gray_derived() {
        let mut pi = build_pi(ColourFormat::Gray, 320, 240, 3, 1, 16);
        weight_table_calculate(&mut pi, ColourFormat::Gray).unwrap();
        check_weights(&pi);
    }
}
