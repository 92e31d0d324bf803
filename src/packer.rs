//! Bit-exact precinct and packet packing.
//!
//! Layout per precinct: a fixed header (`Lprc` 24 bits, `Q` 8, `R` 8) and two
//! method bits per existing band, byte aligned; then per existing packet a
//! short or long header followed by the significance, GCLI, data and sign
//! payloads, each byte aligned; finally the padding bytes that bring the
//! precinct to its exact byte budget.

use crate::bitio::BitWriter;
use crate::config::{EncoderConfig, SignHandling};
use crate::constants::*;
use crate::error::{JxsError, Result};
use crate::pi::{Pi, PiEnc};
use crate::precinct::{PackMethod, PrecinctEnc};
use crate::quant::quantize_magnitude;

/// Index of the bounded alternating unary code for a predicted GCLI delta.
/// The alphabet is `[gtli - m_top, 15 - m_top]`; indexes alternate between
/// the positive and negative side until the shorter side runs out.
pub fn vpred_vlc_index(delta: i32, m_top: u8, gtli: u8) -> u32 {
    let n_neg = (m_top - gtli) as i32;
    let n_pos = (TRUNCATION_MAX - m_top) as i32;
    debug_assert!(delta >= -n_neg && delta <= n_pos);
    let theta = n_neg.min(n_pos);
    if delta == 0 {
        0
    } else if delta > 0 {
        if delta <= theta {
            (2 * delta - 1) as u32
        } else {
            (theta + delta) as u32
        }
    } else {
        let a = -delta;
        if a <= theta {
            (2 * a) as u32
        } else {
            (theta + a) as u32
        }
    }
}

/// Inverse of [`vpred_vlc_index`].
pub fn vpred_vlc_delta(index: u32, m_top: u8, gtli: u8) -> i32 {
    let n_neg = (m_top - gtli) as i32;
    let n_pos = (TRUNCATION_MAX - m_top) as i32;
    let theta = n_neg.min(n_pos);
    let u = index as i32;
    if u == 0 {
        0
    } else if u <= 2 * theta {
        if u % 2 == 1 {
            (u + 1) / 2
        } else {
            -(u / 2)
        }
    } else if n_pos > n_neg {
        u - theta
    } else {
        -(u - theta)
    }
}

/// True when the whole significance group predicts exactly from the line
/// above (or is fully trimmed, in run mode).
pub fn vpred_group_predictable(
    gcli_cur: &[u8],
    gcli_top: &[u8],
    gtli: u8,
    gtli_top: u8,
    run_mode: bool,
) -> bool {
    let gtli_max = gtli.max(gtli_top);
    if run_mode {
        gcli_cur.iter().all(|&cur| cur <= gtli)
    } else {
        gcli_cur
            .iter()
            .zip(gcli_top)
            .all(|(&cur, &top)| cur.max(gtli) == top.max(gtli_max))
    }
}

struct PacketBand {
    c: usize,
    b: usize,
    line: usize,
}

/// Bands of a packet whose line exists in this precinct shape.
fn packet_bands(pi: &Pi, shape: crate::pi::PrecinctShape, pkt_idx: usize) -> Vec<PacketBand> {
    let packet = &pi.packets[pkt_idx];
    let mut bands = Vec::new();
    for band_idx in packet.band_start..packet.band_stop {
        let slot = pi.global_bands[band_idx as usize];
        debug_assert!(slot.band_id != BAND_NOT_EXIST);
        let (c, b) = (slot.comp_id as usize, slot.band_id as usize);
        if packet.line_idx < pi.band_info(shape, c, b).height {
            bands.push(PacketBand {
                c,
                b,
                line: packet.line_idx as usize,
            });
        }
    }
    bands
}

fn write_packet_header(
    bw: &mut BitWriter,
    short: bool,
    raw: bool,
    data_bytes: u32,
    gcli_bytes: u32,
    sign_bytes: u32,
) {
    bw.write_bit(raw as u8);
    if short {
        bw.write_bits(data_bytes, 15);
        bw.write_bits(gcli_bytes, 13);
        bw.write_bits(sign_bytes, 11);
    } else {
        bw.write_bits(data_bytes, 24);
        bw.write_bits(gcli_bytes, 20);
        bw.write_bits(sign_bytes, 15);
        bw.write_bits(0, 4);
    }
}

/// Unary codeword: `zeros` zero bits and a closing one.
fn write_unary(bw: &mut BitWriter, zeros: u32) {
    for _ in 0..zeros {
        bw.write_bit(0);
    }
    bw.write_bit(1);
}

/// Packs one precinct into `out`. `precinct_top` supplies the top GCLI line
/// for vertically predicted bands.
pub fn pack_precinct(
    out: &mut Vec<u8>,
    pi: &Pi,
    pi_enc: &PiEnc,
    cfg: &EncoderConfig,
    precinct: &PrecinctEnc,
    precinct_top: Option<&PrecinctEnc>,
) -> Result<()> {
    let mut bw = BitWriter::new();
    let sig_size = pi.significance_group_size as usize;
    let inline_sign = cfg.sign_handling == SignHandling::Off;

    // Precinct header.
    bw.write_bits(precinct.pack_total_bytes, 24);
    bw.write_u8(precinct.pack_quantization);
    bw.write_u8(precinct.pack_refinement);
    for slot in pi.global_bands[..pi.bands_num_all as usize].iter() {
        if slot.band_id == BAND_NOT_EXIST {
            continue;
        }
        let band = &precinct.bands[slot.comp_id as usize][slot.band_id as usize];
        let method = band.cache[band.cache_index].pack_method;
        bw.write_bits(method as u32, 2);
    }
    bw.align_to_byte();

    for pkt_idx in 0..pi.packets_num as usize {
        let bands = packet_bands(pi, precinct.shape, pkt_idx);
        if bands.is_empty() {
            continue;
        }
        let raw = precinct.packet_raw[pkt_idx];
        write_packet_header(
            &mut bw,
            pi.use_short_header,
            raw,
            precinct.packet_size_data_bytes[pkt_idx],
            precinct.packet_size_gcli_bytes[pkt_idx],
            precinct.packet_size_signs_bytes[pkt_idx],
        );
        bw.align_to_byte();

        // Significance payload.
        if !raw {
            let before = bw.len_bytes();
            for pb in bands.iter() {
                let band = &precinct.bands[pb.c][pb.b];
                let method = band.cache[band.cache_index].pack_method;
                if !method.uses_significance() {
                    continue;
                }
                let gtli = band.gtli;
                let info = pi.band_info(precinct.shape, pb.c, pb.b);
                match method {
                    PackMethod::ZeroSignificanceEnable => {
                        let sig = precinct.significance_line(pi, pi_enc, pb.c, pb.b, pb.line);
                        for &max in sig.iter() {
                            bw.write_bit((max > gtli) as u8);
                        }
                    }
                    PackMethod::VpredSignificanceEnable => {
                        let gcli = precinct.gcli_line(pi, pi_enc, pb.c, pb.b, pb.line);
                        let (top, gtli_top) = top_gcli_line(
                            pi, pi_enc, precinct, precinct_top, pb.c, pb.b, pb.line,
                        );
                        for s in 0..info.significance_width as usize {
                            let start = s * sig_size;
                            let end = ((s + 1) * sig_size).min(gcli.len());
                            let predictable = vpred_group_predictable(
                                &gcli[start..end],
                                &top[start..end],
                                gtli,
                                gtli_top,
                                cfg.run_mode,
                            );
                            bw.write_bit((!predictable) as u8);
                        }
                    }
                    _ => unreachable!(),
                }
            }
            bw.align_to_byte();
            debug_assert_eq!(
                (bw.len_bytes() - before) as u32,
                precinct.packet_size_significance_bytes[pkt_idx]
            );
        }

        // GCLI payload.
        {
            let before = bw.len_bytes();
            for pb in bands.iter() {
                let band = &precinct.bands[pb.c][pb.b];
                let method = band.cache[band.cache_index].pack_method;
                let gtli = band.gtli;
                let gcli = precinct.gcli_line(pi, pi_enc, pb.c, pb.b, pb.line);
                if raw {
                    for &g in gcli.iter() {
                        bw.write_bits(g as u32, 4);
                    }
                    continue;
                }
                match method {
                    PackMethod::ZeroSignificanceDisable => {
                        for &g in gcli.iter() {
                            write_unary(&mut bw, g.max(gtli) as u32 - gtli as u32);
                        }
                    }
                    PackMethod::ZeroSignificanceEnable => {
                        let sig = precinct.significance_line(pi, pi_enc, pb.c, pb.b, pb.line);
                        for (i, &g) in gcli.iter().enumerate() {
                            if sig[i / sig_size] > gtli {
                                write_unary(&mut bw, g.max(gtli) as u32 - gtli as u32);
                            }
                        }
                    }
                    PackMethod::VpredSignificanceDisable | PackMethod::VpredSignificanceEnable => {
                        let (top, gtli_top) = top_gcli_line(
                            pi, pi_enc, precinct, precinct_top, pb.c, pb.b, pb.line,
                        );
                        let gtli_max = gtli.max(gtli_top);
                        let with_sig = method == PackMethod::VpredSignificanceEnable;
                        for (i, (&g, &t)) in gcli.iter().zip(top.iter()).enumerate() {
                            if with_sig {
                                let start = (i / sig_size) * sig_size;
                                let end = (start + sig_size).min(gcli.len());
                                if vpred_group_predictable(
                                    &gcli[start..end],
                                    &top[start..end],
                                    gtli,
                                    gtli_top,
                                    cfg.run_mode,
                                ) {
                                    continue;
                                }
                            }
                            let m_top = t.max(gtli_max);
                            let delta = g.max(gtli) as i32 - m_top as i32;
                            write_unary(&mut bw, vpred_vlc_index(delta, m_top, gtli));
                        }
                    }
                }
            }
            bw.align_to_byte();
            debug_assert_eq!(
                (bw.len_bytes() - before) as u32,
                precinct.packet_size_gcli_bytes[pkt_idx]
            );
        }

        // Data payload: bitplanes `gcli-1 .. gtli` of every non-empty group,
        // with the signs inline as the top plane when sign handling is off.
        {
            let before = bw.len_bytes();
            for pb in bands.iter() {
                let band = &precinct.bands[pb.c][pb.b];
                let gtli = band.gtli;
                let gcli = precinct.gcli_line(pi, pi_enc, pb.c, pb.b, pb.line);
                let coeff = precinct.coeff_line(pi, pi_enc, pb.c, pb.b, pb.line);
                let group_size = pi.coeff_group_size as usize;
                for (g, group) in coeff.chunks(group_size).enumerate() {
                    let gc = gcli[g];
                    if gc <= gtli {
                        continue;
                    }
                    // Tail groups pad up to the full group size so sizes stay
                    // exactly what the rate control counted.
                    if inline_sign {
                        for i in 0..group_size {
                            bw.write_bit(group.get(i).map_or(0, |&cf| (cf >> 15) as u8));
                        }
                    }
                    let planes = gc - gtli;
                    let quantized: Vec<u16> = (0..group_size)
                        .map(|i| {
                            group.get(i).map_or(0, |&cf| {
                                quantize_magnitude(
                                    cf & !BITSTREAM_MASK_SIGN,
                                    gc,
                                    gtli,
                                    cfg.quant_type,
                                )
                            })
                        })
                        .collect();
                    for p in (0..planes).rev() {
                        for &q in quantized.iter() {
                            bw.write_bit(((q >> p) & 1) as u8);
                        }
                    }
                }
            }
            bw.align_to_byte();
            debug_assert_eq!(
                (bw.len_bytes() - before) as u32,
                precinct.packet_size_data_bytes[pkt_idx]
            );
        }

        // Sign payload.
        if cfg.sign_handling != SignHandling::Off {
            let before = bw.len_bytes();
            for pb in bands.iter() {
                let band = &precinct.bands[pb.c][pb.b];
                let gtli = band.gtli;
                let gcli = precinct.gcli_line(pi, pi_enc, pb.c, pb.b, pb.line);
                let coeff = precinct.coeff_line(pi, pi_enc, pb.c, pb.b, pb.line);
                let group_size = pi.coeff_group_size as usize;
                for (g, group) in coeff.chunks(group_size).enumerate() {
                    let gc = gcli[g];
                    if gc <= gtli {
                        continue;
                    }
                    match cfg.sign_handling {
                        SignHandling::Fast => {
                            for i in 0..group_size {
                                bw.write_bit(group.get(i).map_or(0, |&cf| (cf >> 15) as u8));
                            }
                        }
                        SignHandling::Full => {
                            for &cf in group {
                                if crate::quant::quantized_nonzero(cf, gc, gtli, cfg.quant_type) {
                                    bw.write_bit((cf >> 15) as u8);
                                }
                            }
                        }
                        SignHandling::Off => unreachable!(),
                    }
                }
            }
            bw.align_to_byte();
            debug_assert_eq!(
                (bw.len_bytes() - before) as u32,
                precinct.packet_size_signs_bytes[pkt_idx]
            );
        }
    }

    // Padding up to the exact precinct budget.
    for _ in 0..precinct.pack_padding_bytes {
        bw.write_u8(0);
    }

    let bytes = bw.finish();
    if bytes.len() != precinct.pack_total_bytes as usize {
        log::error!(
            "packed precinct size {} != budget {}",
            bytes.len(),
            precinct.pack_total_bytes
        );
        return Err(JxsError::EncodeFrameError);
    }
    out.extend_from_slice(&bytes);
    Ok(())
}

/// Top GCLI line for vertical prediction: the last line of the same band in
/// the precinct above, or the previous line of this band.
fn top_gcli_line<'a>(
    pi: &Pi,
    pi_enc: &PiEnc,
    precinct: &'a PrecinctEnc,
    precinct_top: Option<&'a PrecinctEnc>,
    c: usize,
    b: usize,
    line: usize,
) -> (&'a [u8], u8) {
    if line == 0 {
        let top = precinct_top.expect("vertical prediction needs a previous precinct");
        let top_lines = pi.band_info(top.shape, c, b).height as usize;
        (
            top.gcli_line(pi, pi_enc, c, b, top_lines - 1),
            top.bands[c][b].gtli,
        )
    } else {
        (
            precinct.gcli_line(pi, pi_enc, c, b, line - 1),
            precinct.bands[c][b].gtli,
        )
    }
}
