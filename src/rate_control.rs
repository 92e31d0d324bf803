//! Rate control: the per-precinct (or per-slice) search for the
//! quantization and refinement that fit an exact byte budget.
//!
//! Costs are served from prefix-summed lookup tables built once per
//! precinct, and from a small per-band cache ring keyed by gtli so that
//! neighbouring probes of the search reuse each other's work.

use log::trace;

use crate::binary_search::{BinarySearch, BinarySearchResult, BinaryStep};
use crate::config::{EncoderConfig, QuantType, SignHandling};
use crate::constants::*;
use crate::error::{JxsError, Result};
use crate::packer::vpred_vlc_index;
use crate::pi::{Pi, PiEnc, PrecinctShape};
use crate::precinct::{PackMethod, PrecinctEnc, RcLineLut};
use crate::quant::quantized_nonzero;

/// Precinct header plus all packet headers, in bytes.
pub fn headers_bytes(pi: &Pi, shape: PrecinctShape) -> Result<u32> {
    let packets_exist = pi.shapes[shape as usize]
        .packets_exist_num
        .ok_or(JxsError::EncodeFrameError)?;
    let packet_header_bits = if pi.use_short_header {
        PACKET_HEADER_SHORT_SIZE_BYTES * 8
    } else {
        PACKET_HEADER_LONG_SIZE_BYTES * 8
    };
    Ok(bits_to_bytes(PRECINCT_HEADER_SIZE_BYTES * 8 + pi.bands_num_exists * 2)
        + bits_to_bytes(packet_header_bits * packets_exist))
}

/// Builds the per-band-line lookup tables; call once per precinct, after
/// GCLI and significance extraction.
pub fn rate_control_init_precinct(
    pi: &Pi,
    pi_enc: &PiEnc,
    cfg: &EncoderConfig,
    precinct: &mut PrecinctEnc,
) {
    let sig_size = pi.significance_group_size as usize;
    let shape = precinct.shape;
    let PrecinctEnc {
        bands,
        gcli,
        significance,
        ..
    } = precinct;

    for c in 0..pi.comps_num as usize {
        for b in 0..pi.components[c].bands_num as usize {
            let info = pi.band_info(shape, c, b);
            let gcli_width = info.gcli_width as usize;
            let height_lines = info.height as usize;
            for line in 0..height_lines {
                let goff = pi_enc.gcli_offset[c][b] + line * gcli_width;
                let gcli_line = &gcli[c][goff..goff + gcli_width];

                let mut lut = RcLineLut::default();
                let mut counts = [0u16; 16];
                for &g in gcli_line {
                    debug_assert!(g <= TRUNCATION_MAX);
                    counts[g as usize] += 1;
                }

                let mut sum_back = 0u32;
                for g in (0..TRUNCATION_MAX as usize).rev() {
                    sum_back += counts[g + 1] as u32;
                    lut.size_data_no_sign[g] =
                        lut.size_data_no_sign[g + 1] + sum_back + counts[g + 1] as u32;
                    lut.size_data_sign[g] = lut.size_data_sign[g + 1] + sum_back;
                }
                let mut acc = 0u16;
                for (dst, &n) in lut.gc_count.iter_mut().zip(counts.iter()) {
                    acc += n;
                    *dst = acc;
                }

                if cfg.significance {
                    let sig_width = info.significance_width as usize;
                    let soff = pi_enc.sig_offset[c][b] + line * sig_width;
                    let sig_line = &significance[c][soff..soff + sig_width];
                    let full_groups = gcli_width / sig_size;
                    let mut scount = [0u16; 16];
                    for &s in sig_line[..full_groups].iter() {
                        scount[s as usize] += 1;
                    }
                    let mut acc = 0u16;
                    for (dst, &n) in lut.sig_max_count.iter_mut().zip(scount.iter()) {
                        acc += n;
                        *dst = acc;
                    }
                }

                bands[c][b].luts[line] = lut;
            }
        }
    }
}

/// Per-group VLC lengths for vertically predicted GCLI coding, without the
/// one terminator bit per group.
fn vpred_bits(gcli_top: &[u8], gcli_cur: &[u8], gtli: u8, gtli_top: u8) -> Vec<u8> {
    let gtli_max = gtli.max(gtli_top);
    gcli_top
        .iter()
        .zip(gcli_cur)
        .map(|(&top, &cur)| {
            let m_top = top.max(gtli_max);
            let g = cur.max(gtli);
            let delta = g as i32 - m_top as i32;
            vpred_vlc_index(delta, m_top, gtli) as u8
        })
        .collect()
}

/// Bits saved by significance coding on a vertically predicted line: whole
/// groups whose prediction is exact collapse into the flag bit.
#[allow(clippy::too_many_arguments)]
fn vpred_sig_reduction(
    bits: &[u8],
    gcli_top: &[u8],
    gcli_cur: &[u8],
    gtli: u8,
    gtli_top: u8,
    run_mode: bool,
    sig_size: usize,
    significance_width: usize,
) -> u32 {
    let gtli_max = gtli.max(gtli_top);
    let gcli_width = gcli_cur.len();
    let mut reduction = 0u32;
    for s in 0..significance_width {
        let start = s * sig_size;
        let end = ((s + 1) * sig_size).min(gcli_width);
        let predictable = if !run_mode {
            gcli_cur[start..end]
                .iter()
                .zip(&gcli_top[start..end])
                .all(|(&cur, &top)| cur.max(gtli) == top.max(gtli_max))
        } else {
            gcli_cur[start..end].iter().all(|&cur| cur <= gtli)
        };
        if predictable {
            reduction += bits[start..end].iter().map(|&b| b as u32 + 1).sum::<u32>();
        }
    }
    reduction
}

/// Counts coefficients whose quantized magnitude survives; the exact cost of
/// the `Full` sign-handling strategy.
fn sum_nonzero_coeff(
    coeff_line: &[u16],
    gcli_line: &[u8],
    gtli: u8,
    quant_type: QuantType,
    group_size: usize,
) -> u32 {
    let mut sum = 0u32;
    for (g, group) in coeff_line.chunks(group_size).enumerate() {
        let gcli = gcli_line[g];
        if gcli > gtli {
            for &cf in group {
                debug_assert_ne!(cf, BITSTREAM_MASK_SIGN);
                if quantized_nonzero(cf, gcli, gtli, quant_type) {
                    sum += 1;
                }
            }
        }
    }
    sum
}

/// Recomputes (or fetches from the cache ring) the cheapest coding method of
/// every band at its current gtli.
fn calculate_band_best_method(
    pi: &Pi,
    pi_enc: &PiEnc,
    cfg: &EncoderConfig,
    precinct: &mut PrecinctEnc,
    precinct_top: Option<&PrecinctEnc>,
    vpred: bool,
    sign_handling: SignHandling,
) {
    let group_size = pi.coeff_group_size as usize;
    let sig_size = pi.significance_group_size as usize;
    let shape = precinct.shape;

    let PrecinctEnc {
        bands,
        gcli,
        coeff,
        significance,
        need_recalculate_next_precinct,
        ..
    } = precinct;

    for c in 0..pi.comps_num as usize {
        for b in 0..pi.components[c].bands_num as usize {
            let info = pi.band_info(shape, c, b);
            let height_lines = info.height as usize;
            // Bands can lose all their lines in the last precinct.
            if height_lines == 0 {
                continue;
            }
            let gcli_width = info.gcli_width as usize;
            let significance_width = info.significance_width as usize;
            let band_width = pi.components[c].bands[b].width as usize;
            let gtli = bands[c][b].gtli;

            if bands[c][b].cache[bands[c][b].cache_index].gtli == gtli {
                continue;
            }
            // Any gtli change here invalidates the vertical prediction of
            // the precinct below.
            *need_recalculate_next_precinct = true;

            let mut hit = false;
            for i in 1..RC_BAND_CACHE_SIZE {
                let idx = (bands[c][b].cache_index + i) % RC_BAND_CACHE_SIZE;
                if bands[c][b].cache[idx].gtli == gtli {
                    bands[c][b].cache_index = idx;
                    hit = true;
                    break;
                }
            }
            if hit {
                continue;
            }

            let mut data_bits = vec![0u32; height_lines];
            let mut signs_bits = vec![0u32; height_lines];
            let mut gcli_nosig = vec![0u32; height_lines];
            for line in 0..height_lines {
                let lut = &bands[c][b].luts[line];
                let zero_groups = lut.gc_count[gtli as usize] as u32;
                let no_sign = lut.size_data_no_sign[gtli as usize];
                let with_sign = lut.size_data_sign[gtli as usize];
                let (sum_data, sum_signs_max) = if sign_handling != SignHandling::Off {
                    (with_sign, no_sign - with_sign)
                } else {
                    (no_sign, 0)
                };
                data_bits[line] = sum_data * group_size as u32;
                signs_bits[line] = match sign_handling {
                    SignHandling::Off => 0,
                    SignHandling::Fast => sum_signs_max * group_size as u32,
                    SignHandling::Full => {
                        let coff = pi_enc.coeff_offset[c][b] + line * band_width;
                        let goff = pi_enc.gcli_offset[c][b] + line * gcli_width;
                        sum_nonzero_coeff(
                            &coeff[c][coff..coff + band_width],
                            &gcli[c][goff..goff + gcli_width],
                            gtli,
                            cfg.quant_type,
                            group_size,
                        )
                    }
                };
                gcli_nosig[line] = no_sign + zero_groups;
            }

            // Method 0: plain VLC, no significance.
            let mut best_method = PackMethod::ZeroSignificanceDisable;
            let mut best_budget: u32 = gcli_nosig.iter().sum();
            let mut line_sig = vec![0u32; height_lines];
            let mut line_gcli = gcli_nosig.clone();

            if cfg.significance {
                let mut budget = (significance_width * height_lines) as u32;
                let mut sig_gcli = vec![0u32; height_lines];
                for line in 0..height_lines {
                    let lut = &bands[c][b].luts[line];
                    let full_groups = gcli_width / sig_size;
                    let mut zeroed = lut.sig_max_count[gtli as usize] as u32 * sig_size as u32;
                    if full_groups < significance_width {
                        let soff = pi_enc.sig_offset[c][b] + line * significance_width;
                        if significance[c][soff + full_groups] <= gtli {
                            zeroed += (gcli_width - full_groups * sig_size) as u32;
                        }
                    }
                    sig_gcli[line] = gcli_nosig[line] - zeroed;
                    budget += sig_gcli[line];
                }
                if best_budget > budget {
                    best_budget = budget;
                    best_method = PackMethod::ZeroSignificanceEnable;
                    for line in 0..height_lines {
                        line_sig[line] = significance_width as u32;
                        line_gcli[line] = sig_gcli[line];
                    }
                }
            }

            if vpred {
                if let Some(top) = precinct_top {
                    let top_lines = pi.band_info(top.shape, c, b).height as usize;
                    let mut vpred_nosig = vec![0u32; height_lines];
                    let mut vpred_sig = vec![0u32; height_lines];
                    let mut budget_nosig = 0u32;
                    let mut budget_sig = 0u32;
                    for line in 0..height_lines {
                        let goff = pi_enc.gcli_offset[c][b] + line * gcli_width;
                        let cur_line = &gcli[c][goff..goff + gcli_width];
                        let (top_line, gtli_top): (&[u8], u8) = if line == 0 {
                            (
                                top.gcli_line(pi, pi_enc, c, b, top_lines - 1),
                                top.bands[c][b].gtli,
                            )
                        } else {
                            let poff = pi_enc.gcli_offset[c][b] + (line - 1) * gcli_width;
                            (&gcli[c][poff..poff + gcli_width], gtli)
                        };

                        let bits = vpred_bits(top_line, cur_line, gtli, gtli_top);
                        let sum: u32 = bits.iter().map(|&v| v as u32).sum();
                        // One terminator bit closes every group's codeword.
                        vpred_nosig[line] = sum + gcli_width as u32;
                        budget_nosig += vpred_nosig[line];
                        if cfg.significance {
                            let reduction = vpred_sig_reduction(
                                &bits,
                                top_line,
                                cur_line,
                                gtli,
                                gtli_top,
                                cfg.run_mode,
                                sig_size,
                                significance_width,
                            );
                            vpred_sig[line] = vpred_nosig[line] - reduction;
                            budget_sig += vpred_sig[line] + significance_width as u32;
                        }
                    }

                    if best_budget > budget_nosig {
                        best_budget = budget_nosig;
                        best_method = PackMethod::VpredSignificanceDisable;
                        for line in 0..height_lines {
                            line_sig[line] = 0;
                            line_gcli[line] = vpred_nosig[line];
                        }
                    }
                    if cfg.significance && best_budget > budget_sig {
                        best_method = PackMethod::VpredSignificanceEnable;
                        for line in 0..height_lines {
                            line_sig[line] = significance_width as u32;
                            line_gcli[line] = vpred_sig[line];
                        }
                    }
                }
            }

            let band = &mut bands[c][b];
            band.cache_index = (band.cache_index + 1) % RC_BAND_CACHE_SIZE;
            let entry = &mut band.cache[band.cache_index];
            entry.gtli = gtli;
            entry.pack_method = best_method;
            for line in 0..height_lines {
                entry.lines[line].data_bits = data_bits[line];
                entry.lines[line].signs_bits = signs_bits[line];
                entry.lines[line].gcli_bits = line_gcli[line];
                entry.lines[line].significance_bits = line_sig[line];
            }
        }
    }
}

/// Total packed bytes of the precinct at the current truncation levels,
/// with the per-packet RAW-vs-VLC choice applied and the per-packet sizes
/// recorded for the packer.
fn precinct_cost_bytes(
    pi: &Pi,
    pi_enc: &PiEnc,
    cfg: &EncoderConfig,
    precinct: &mut PrecinctEnc,
    precinct_top: Option<&PrecinctEnc>,
    vpred: bool,
    sign_handling: SignHandling,
) -> u32 {
    calculate_band_best_method(pi, pi_enc, cfg, precinct, precinct_top, vpred, sign_handling);

    let shape = precinct.shape;
    let mut total = 0u32;
    for (pkt_idx, packet) in pi.packets.iter().enumerate() {
        let mut data_bits = 0u32;
        let mut signs_bits = 0u32;
        let mut gcli_bits = 0u32;
        let mut sig_bits = 0u32;

        for band_idx in packet.band_start..packet.band_stop {
            let slot = pi.global_bands[band_idx as usize];
            let (c, b) = (slot.comp_id as usize, slot.band_id as usize);
            let line = packet.line_idx as usize;
            if (line as u32) < pi.band_info(shape, c, b).height {
                let band = &precinct.bands[c][b];
                let entry = &band.cache[band.cache_index];
                debug_assert_eq!(entry.gtli, band.gtli);
                let cl = &entry.lines[line];
                gcli_bits += cl.gcli_bits;
                sig_bits += cl.significance_bits;
                data_bits += cl.data_bits;
                signs_bits += cl.signs_bits;
            }
        }

        let data_bytes = bits_to_bytes(data_bits);
        let signs_bytes = bits_to_bytes(signs_bits);
        precinct.packet_size_data_bytes[pkt_idx] = data_bytes;
        precinct.packet_size_signs_bytes[pkt_idx] = signs_bytes;
        total += data_bytes + signs_bytes;

        let sig_bytes = bits_to_bytes(sig_bits);
        let gcli_bytes = bits_to_bytes(gcli_bits);
        let raw_bytes = pi.shapes[shape as usize].packet_size_gcli_raw_bytes[pkt_idx];
        if sig_bytes + gcli_bytes > raw_bytes {
            precinct.packet_raw[pkt_idx] = true;
            precinct.packet_size_significance_bytes[pkt_idx] = 0;
            precinct.packet_size_gcli_bytes[pkt_idx] = raw_bytes;
            total += raw_bytes;
        } else {
            precinct.packet_raw[pkt_idx] = false;
            precinct.packet_size_significance_bytes[pkt_idx] = sig_bytes;
            precinct.packet_size_gcli_bytes[pkt_idx] = gcli_bytes;
            total += sig_bytes + gcli_bytes;
        }
    }
    total
}

/// Finds the minimum quantization whose total fits the budget, binary
/// searching with the simplified cost first and refining locally when the
/// expensive features are on.
#[allow(clippy::too_many_arguments)]
fn find_best_quantization(
    pi: &Pi,
    pi_enc: &PiEnc,
    cfg: &EncoderConfig,
    precinct: &mut PrecinctEnc,
    precinct_top: Option<&PrecinctEnc>,
    budget_bytes: u32,
    vpred: bool,
    sign_handling: SignHandling,
) -> Result<u8> {
    let max_q = pi_enc.max_quantization as u32;
    let initial_step = if 6 > max_q { 0 } else { 6 };
    let sign_simple = if sign_handling == SignHandling::Full {
        SignHandling::Fast
    } else {
        sign_handling
    };

    let mut search = BinarySearch::new(0, max_q, false, initial_step);
    let mut verdict = BinaryStep::Begin;
    let q_simple = loop {
        match search.next_step(verdict) {
            BinarySearchResult::Continue(q) => {
                if precinct.compute_truncation(pi, q as u8, 0) {
                    verdict = BinaryStep::OutOfRange;
                    continue;
                }
                let total =
                    precinct_cost_bytes(pi, pi_enc, cfg, precinct, precinct_top, false, sign_simple);
                verdict = if total > budget_bytes {
                    BinaryStep::TooSmall
                } else {
                    BinaryStep::TooBig
                };
            }
            BinarySearchResult::FindClose(q) => break q,
            BinarySearchResult::Error => return Err(JxsError::EncodeFrameError),
        }
    };

    if !vpred && sign_handling == sign_simple {
        return Ok(q_simple as u8);
    }

    // Vertical prediction and full sign coding only ever shrink the cost,
    // with small exceptions; probe a few neighbouring quantizations with the
    // full model, keeping the cache warm for the refinement search.
    precinct.reset_cache();

    let mut best: i32 = -1;
    let mut q_test = q_simple as i32 - 1;
    while q_test >= 0 {
        let empty = precinct.compute_truncation(pi, q_test as u8, 0);
        let fits = !empty
            && precinct_cost_bytes(pi, pi_enc, cfg, precinct, precinct_top, vpred, sign_handling)
                <= budget_bytes;
        if fits {
            best = q_test;
        } else {
            break;
        }
        q_test -= 1;
    }
    if best < 0 {
        let mut q_test = q_simple;
        while q_test <= max_q {
            let empty = precinct.compute_truncation(pi, q_test as u8, 0);
            let fits = !empty
                && precinct_cost_bytes(pi, pi_enc, cfg, precinct, precinct_top, vpred, sign_handling)
                    <= budget_bytes;
            if fits {
                best = q_test as i32;
                break;
            }
            q_test += 1;
        }
    }
    if best < 0 {
        return Err(JxsError::EncodeFrameError);
    }
    Ok(best as u8)
}

/// Finds the maximum refinement still inside the budget for a fixed
/// quantization; leaves the precinct recomputed for the winning pair and
/// returns the packed data size.
#[allow(clippy::too_many_arguments)]
fn find_best_refinement(
    pi: &Pi,
    pi_enc: &PiEnc,
    cfg: &EncoderConfig,
    precinct: &mut PrecinctEnc,
    precinct_top: Option<&PrecinctEnc>,
    budget_bytes: u32,
    quantization: u8,
    vpred: bool,
    sign_handling: SignHandling,
) -> Result<(u8, u32)> {
    let max_r = pi_enc.max_refinement as u32;
    let initial_step = if 6 >= max_r { 0 } else { 6 };

    let mut search = BinarySearch::new(0, max_r, true, initial_step);
    let mut verdict = BinaryStep::Begin;
    let mut last_tested: i64 = -1;
    let mut last_total = 0u32;
    let refinement = loop {
        match search.next_step(verdict) {
            BinarySearchResult::Continue(r) => {
                last_tested = -1;
                if precinct.compute_truncation(pi, quantization, r as u8) {
                    verdict = BinaryStep::OutOfRange;
                    continue;
                }
                let total =
                    precinct_cost_bytes(pi, pi_enc, cfg, precinct, precinct_top, vpred, sign_handling);
                last_tested = r as i64;
                last_total = total;
                // Looking for the maximum, so an exact budget hit keeps going.
                verdict = if total <= budget_bytes {
                    BinaryStep::TooSmall
                } else {
                    BinaryStep::TooBig
                };
            }
            BinarySearchResult::FindClose(r) => break r,
            BinarySearchResult::Error => return Err(JxsError::EncodeFrameError),
        }
    };

    let data_bytes = if refinement as i64 == last_tested {
        last_total
    } else {
        // Recompute the structures for the winning refinement.
        precinct.compute_truncation(pi, quantization, refinement as u8);
        precinct_cost_bytes(pi, pi_enc, cfg, precinct, precinct_top, vpred, sign_handling)
    };
    debug_assert!(data_bytes <= budget_bytes);
    Ok((refinement as u8, data_bytes))
}

/// Chooses `(Q, R)` and the per-packet methods of one precinct so that the
/// packed size fits `budget_bytes` exactly (padding covers the remainder).
pub fn rate_control_precinct(
    pi: &Pi,
    pi_enc: &PiEnc,
    cfg: &EncoderConfig,
    precinct: &mut PrecinctEnc,
    mut precinct_top: Option<&mut PrecinctEnc>,
    budget_bytes: u32,
) -> Result<()> {
    if budget_bytes > PRECINCT_MAX_BYTES_SIZE {
        log::error!("precinct budget too big, use a smaller bpp value");
        return Err(JxsError::EncodeFrameError);
    }
    let headers = headers_bytes(pi, precinct.shape)?;
    if budget_bytes <= headers {
        log::error!("headers alone exceed the precinct budget, use a bigger bpp value");
        return Err(JxsError::Undefined);
    }
    let budget_data = budget_bytes - headers;

    let vpred = cfg.vertical_prediction && precinct_top.is_some();
    if vpred {
        if let Some(top) = precinct_top.as_deref_mut() {
            if top.need_recalculate_next_precinct {
                // The previous precinct's gtli changed under us.
                precinct.reset_cache();
                top.need_recalculate_next_precinct = false;
            }
        }
    }
    let top = precinct_top.as_deref();

    let quantization = find_best_quantization(
        pi,
        pi_enc,
        cfg,
        precinct,
        top,
        budget_data,
        vpred,
        cfg.sign_handling,
    )?;
    let (refinement, data_bytes) = find_best_refinement(
        pi,
        pi_enc,
        cfg,
        precinct,
        top,
        budget_data,
        quantization,
        vpred,
        cfg.sign_handling,
    )?;

    trace!(
        "precinct {}: Q {} R {} data {}B of {}B",
        precinct.prec_idx,
        quantization,
        refinement,
        data_bytes,
        budget_bytes
    );
    precinct.pack_quantization = quantization;
    precinct.pack_refinement = refinement;
    precinct.pack_padding_bytes = budget_data - data_bytes;
    precinct.pack_total_bytes = budget_bytes;
    Ok(())
}

/// Slice fast path: one `(Q, R)` pair for all precincts of the slice against
/// the pooled byte budget. Requires vertical prediction and full sign coding
/// to be off, so no cross-precinct dependency exists.
pub fn rate_control_slice(
    pi: &Pi,
    pi_enc: &PiEnc,
    cfg: &EncoderConfig,
    precincts: &mut [PrecinctEnc],
    budget_slice_bytes: u32,
) -> Result<()> {
    let prec_num = precincts.len() as u32;
    let sign_handling = if cfg.sign_handling == SignHandling::Full {
        SignHandling::Fast
    } else {
        cfg.sign_handling
    };

    if div_round_up(budget_slice_bytes, prec_num) > PRECINCT_MAX_BYTES_SIZE {
        log::error!("precinct budget too big, use a smaller bpp value");
        return Err(JxsError::EncodeFrameError);
    }
    let mut headers = 0u32;
    for precinct in precincts.iter_mut() {
        precinct.pack_total_bytes = headers_bytes(pi, precinct.shape)?;
        headers += precinct.pack_total_bytes;
    }
    if budget_slice_bytes <= headers {
        log::error!("headers alone exceed the slice budget, use a bigger bpp value");
        return Err(JxsError::Undefined);
    }
    let budget_data = budget_slice_bytes - headers;

    let probe = |precincts: &mut [PrecinctEnc], q: u8, r: u8| -> Option<u32> {
        let mut total = 0u32;
        for precinct in precincts.iter_mut() {
            if precinct.compute_truncation(pi, q, r) {
                return None;
            }
            total += precinct_cost_bytes(pi, pi_enc, cfg, precinct, None, false, sign_handling);
        }
        Some(total)
    };

    let max_q = pi_enc.max_quantization as u32;
    let mut search = BinarySearch::new(0, max_q, false, if 6 > max_q { 0 } else { 6 });
    let mut verdict = BinaryStep::Begin;
    let quantization = loop {
        match search.next_step(verdict) {
            BinarySearchResult::Continue(q) => {
                verdict = match probe(precincts, q as u8, 0) {
                    None => BinaryStep::OutOfRange,
                    Some(total) if total > budget_data => BinaryStep::TooSmall,
                    Some(_) => BinaryStep::TooBig,
                };
            }
            BinarySearchResult::FindClose(q) => break q as u8,
            BinarySearchResult::Error => return Err(JxsError::EncodeFrameError),
        }
    };

    let max_r = pi_enc.max_refinement as u32;
    let mut search = BinarySearch::new(0, max_r, true, if 6 >= max_r { 0 } else { 6 });
    let mut verdict = BinaryStep::Begin;
    let refinement = loop {
        match search.next_step(verdict) {
            BinarySearchResult::Continue(r) => {
                verdict = match probe(precincts, quantization, r as u8) {
                    None => BinaryStep::OutOfRange,
                    Some(total) if total <= budget_data => BinaryStep::TooSmall,
                    Some(_) => BinaryStep::TooBig,
                };
            }
            BinarySearchResult::FindClose(r) => break r as u8,
            BinarySearchResult::Error => return Err(JxsError::EncodeFrameError),
        }
    };

    // Final pass: recompute every precinct for the winning pair and push the
    // slack into the last precinct's padding.
    let mut remaining = budget_data;
    let last = precincts.len() - 1;
    for (i, precinct) in precincts.iter_mut().enumerate() {
        precinct.pack_quantization = quantization;
        precinct.pack_refinement = refinement;
        if precinct.compute_truncation(pi, quantization, refinement) {
            log::error!("invalid truncation after the slice search");
            return Err(JxsError::EncodeFrameError);
        }
        let total = precinct_cost_bytes(pi, pi_enc, cfg, precinct, None, false, sign_handling);
        debug_assert!(total <= remaining);
        remaining -= total;
        precinct.pack_padding_bytes = if i == last { remaining } else { 0 };
        precinct.pack_total_bytes += total + precinct.pack_padding_bytes;
    }
    Ok(())
}
