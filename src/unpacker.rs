//! Bit-exact precinct and packet parsing, the mirror of [`crate::packer`].
//!
//! The decoder re-derives every `gtli` from the precinct header's `(Q, R)`
//! and the band weights, reconstructs GCLI values from the selected coding
//! method, and expands quantized magnitudes back into signed coefficients.

use crate::bitio::BitReader;
use crate::config::{QuantType, SignHandling};
use crate::constants::*;
use crate::error::{JxsError, Result};
use crate::packer::{vpred_group_predictable, vpred_vlc_delta};
use crate::pi::{Pi, PiEnc, PrecinctShape};
use crate::precinct::{PackMethod, PrecinctDec};
use crate::quant::{compute_truncation, dequantize_magnitude};

/// Decode-side coding parameters lifted from the picture header.
#[derive(Debug, Clone, Copy)]
pub struct UnpackParams {
    pub quant_type: QuantType,
    pub sign_handling: SignHandling,
    pub run_mode: bool,
}

struct PacketBand {
    c: usize,
    b: usize,
    line: usize,
}

fn packet_bands(pi: &Pi, shape: PrecinctShape, pkt_idx: usize) -> Vec<PacketBand> {
    let packet = &pi.packets[pkt_idx];
    let mut bands = Vec::new();
    for band_idx in packet.band_start..packet.band_stop {
        let slot = pi.global_bands[band_idx as usize];
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

fn read_unary(br: &mut BitReader) -> Result<u32> {
    let mut zeros = 0u32;
    while br.read_bit()? == 0 {
        zeros += 1;
        if zeros > 64 {
            return Err(JxsError::DecoderInvalidBitstream);
        }
    }
    Ok(zeros)
}

/// Unpacks one precinct into `precinct`. `prev` supplies the top GCLI line
/// for vertically predicted bands. Packets past `packets_to_decode` are
/// skipped over their recorded sizes (proxy resolutions).
#[allow(clippy::too_many_arguments)]
pub fn unpack_precinct(
    br: &mut BitReader,
    pi: &Pi,
    pi_enc: &PiEnc,
    params: &UnpackParams,
    shape: PrecinctShape,
    precinct: &mut PrecinctDec,
    prev: Option<&PrecinctDec>,
    packets_to_decode: u32,
) -> Result<()> {
    let sig_size = pi.significance_group_size as usize;
    let group_size = pi.coeff_group_size as usize;
    let inline_sign = params.sign_handling == SignHandling::Off;
    let start_pos = br.position_bytes();

    precinct.clear();

    // Precinct header.
    let lprc = br.read_bits(24)? as usize;
    let quantization = br.read_u8()?;
    let refinement = br.read_u8()?;

    let mut methods =
        vec![vec![PackMethod::ZeroSignificanceDisable; MAX_BANDS_PER_COMPONENT_NUM]; pi.comps_num as usize];
    for slot in pi.global_bands[..pi.bands_num_all as usize].iter() {
        if slot.band_id == BAND_NOT_EXIST {
            continue;
        }
        let raw = br.read_bits(2)? as u8;
        methods[slot.comp_id as usize][slot.band_id as usize] =
            PackMethod::try_from(raw).map_err(|_| JxsError::DecoderInvalidBitstream)?;
    }
    br.align_to_byte();

    for (c, comp) in pi.components.iter().enumerate() {
        for (b, band) in comp.bands.iter().enumerate() {
            precinct.band_gtli[c][b] =
                compute_truncation(band.gain, band.priority, quantization, refinement);
        }
    }

    for pkt_idx in 0..pi.packets_num as usize {
        let bands = packet_bands(pi, shape, pkt_idx);
        if bands.is_empty() {
            continue;
        }

        let raw = br.read_bit()? != 0;
        let (data_bytes, gcli_bytes, sign_bytes) = if pi.use_short_header {
            (
                br.read_bits(15)? as usize,
                br.read_bits(13)? as usize,
                br.read_bits(11)? as usize,
            )
        } else {
            let d = br.read_bits(24)? as usize;
            let g = br.read_bits(20)? as usize;
            let s = br.read_bits(15)? as usize;
            br.read_bits(4)?;
            (d, g, s)
        };
        br.align_to_byte();

        // Significance payload size is implied by the band methods.
        let sig_bits: u32 = if raw {
            0
        } else {
            bands
                .iter()
                .filter(|pb| methods[pb.c][pb.b].uses_significance())
                .map(|pb| pi.band_info(shape, pb.c, pb.b).significance_width)
                .sum()
        };
        let sig_bytes = bits_to_bytes(sig_bits) as usize;

        if pkt_idx as u32 >= packets_to_decode {
            let skip = sig_bytes + gcli_bytes + data_bytes + sign_bytes;
            br.seek_bytes(br.position_bytes() + skip)?;
            continue;
        }

        // Significance payload.
        let mut sig_flags: Vec<Vec<bool>> = Vec::with_capacity(bands.len());
        if !raw {
            let section = br.position_bytes();
            for pb in bands.iter() {
                let method = methods[pb.c][pb.b];
                if method.uses_significance() {
                    let width = pi.band_info(shape, pb.c, pb.b).significance_width as usize;
                    let mut flags = Vec::with_capacity(width);
                    for _ in 0..width {
                        flags.push(br.read_bit()? != 0);
                    }
                    sig_flags.push(flags);
                } else {
                    sig_flags.push(Vec::new());
                }
            }
            br.align_to_byte();
            if br.position_bytes() - section != sig_bytes {
                return Err(JxsError::DecoderInvalidBitstream);
            }
        } else {
            sig_flags.resize_with(bands.len(), Vec::new);
        }

        // GCLI payload.
        {
            let section = br.position_bytes();
            for (band_pos, pb) in bands.iter().enumerate() {
                let method = methods[pb.c][pb.b];
                let gtli = precinct.band_gtli[pb.c][pb.b];
                let gcli_width = pi.band_info(shape, pb.c, pb.b).gcli_width as usize;
                let goff = pi_enc.gcli_offset[pb.c][pb.b] + pb.line * gcli_width;

                if raw {
                    for i in 0..gcli_width {
                        let v = br.read_bits(4)? as u8;
                        precinct.gcli[pb.c][goff + i] = v;
                    }
                    continue;
                }
                match method {
                    PackMethod::ZeroSignificanceDisable => {
                        for i in 0..gcli_width {
                            let v = read_unary(br)?;
                            let g = gtli as u32 + v;
                            if g > TRUNCATION_MAX as u32 {
                                return Err(JxsError::DecoderInvalidBitstream);
                            }
                            precinct.gcli[pb.c][goff + i] = g as u8;
                        }
                    }
                    PackMethod::ZeroSignificanceEnable => {
                        let flags = &sig_flags[band_pos];
                        for i in 0..gcli_width {
                            let g = if flags[i / sig_size] {
                                let v = read_unary(br)?;
                                let g = gtli as u32 + v;
                                if g > TRUNCATION_MAX as u32 {
                                    return Err(JxsError::DecoderInvalidBitstream);
                                }
                                g as u8
                            } else {
                                gtli
                            };
                            precinct.gcli[pb.c][goff + i] = g;
                        }
                    }
                    PackMethod::VpredSignificanceDisable | PackMethod::VpredSignificanceEnable => {
                        let (top_vec, gtli_top) =
                            top_gcli_line(pi, pi_enc, precinct, prev, shape, pb.c, pb.b, pb.line)?;
                        let gtli_max = gtli.max(gtli_top);
                        let with_sig = method == PackMethod::VpredSignificanceEnable;
                        let flags = &sig_flags[band_pos];
                        for i in 0..gcli_width {
                            let m_top = top_vec[i].max(gtli_max);
                            let g = if with_sig && !flags[i / sig_size] {
                                // Fully predicted group.
                                if params.run_mode {
                                    gtli
                                } else {
                                    m_top
                                }
                            } else {
                                let u = read_unary(br)?;
                                let delta = vpred_vlc_delta(u, m_top, gtli);
                                let g = m_top as i32 + delta;
                                if !(0..=TRUNCATION_MAX as i32).contains(&g) {
                                    return Err(JxsError::DecoderInvalidBitstream);
                                }
                                g as u8
                            };
                            precinct.gcli[pb.c][goff + i] = g;
                        }
                    }
                }
            }
            br.align_to_byte();
            let consumed = br.position_bytes() - section;
            if consumed > gcli_bytes {
                return Err(JxsError::DecoderInvalidBitstream);
            }
            br.seek_bytes(section + gcli_bytes)?;
        }

        // Data payload.
        {
            let section = br.position_bytes();
            for pb in bands.iter() {
                let gtli = precinct.band_gtli[pb.c][pb.b];
                let width = pi.components[pb.c].bands[pb.b].width as usize;
                let gcli_width = pi.band_info(shape, pb.c, pb.b).gcli_width as usize;
                let goff = pi_enc.gcli_offset[pb.c][pb.b] + pb.line * gcli_width;
                let coff = pi_enc.coeff_offset[pb.c][pb.b] + pb.line * width;

                for g in 0..gcli_width {
                    let gc = precinct.gcli[pb.c][goff + g];
                    if gc <= gtli {
                        continue;
                    }
                    let start = g * group_size;
                    let end = (start + group_size).min(width);
                    let n = end - start;

                    // Groups are coded padded to the full group size; the pad
                    // bits carry zeros.
                    let mut signs = vec![false; group_size];
                    if inline_sign {
                        for sign in signs.iter_mut() {
                            *sign = br.read_bit()? != 0;
                        }
                    }
                    let planes = gc - gtli;
                    let mut quantized = vec![0u16; group_size];
                    for p in (0..planes).rev() {
                        for q in quantized.iter_mut() {
                            *q |= (br.read_bit()? as u16) << p;
                        }
                    }
                    for i in 0..n {
                        let m = dequantize_magnitude(quantized[i], gc, gtli, params.quant_type);
                        let v = if signs[i] && m != 0 {
                            -(m as i32)
                        } else {
                            m as i32
                        };
                        precinct.coeff[pb.c][coff + start + i] = v as i16;
                    }
                }
            }
            br.align_to_byte();
            let consumed = br.position_bytes() - section;
            if consumed > data_bytes {
                return Err(JxsError::DecoderInvalidBitstream);
            }
            br.seek_bytes(section + data_bytes)?;
        }

        // Sign payload.
        if params.sign_handling != SignHandling::Off {
            let section = br.position_bytes();
            for pb in bands.iter() {
                let gtli = precinct.band_gtli[pb.c][pb.b];
                let width = pi.components[pb.c].bands[pb.b].width as usize;
                let gcli_width = pi.band_info(shape, pb.c, pb.b).gcli_width as usize;
                let goff = pi_enc.gcli_offset[pb.c][pb.b] + pb.line * gcli_width;
                let coff = pi_enc.coeff_offset[pb.c][pb.b] + pb.line * width;

                for g in 0..gcli_width {
                    let gc = precinct.gcli[pb.c][goff + g];
                    if gc <= gtli {
                        continue;
                    }
                    let start = g * group_size;
                    let end = (start + group_size).min(width);
                    match params.sign_handling {
                        SignHandling::Fast => {
                            // Tail groups are padded to the full group size.
                            for i in 0..group_size {
                                let sign = br.read_bit()? != 0;
                                if sign && start + i < end {
                                    let v = precinct.coeff[pb.c][coff + start + i];
                                    if v != 0 {
                                        precinct.coeff[pb.c][coff + start + i] = -v;
                                    }
                                }
                            }
                        }
                        SignHandling::Full => {
                            for i in start..end {
                                let v = precinct.coeff[pb.c][coff + i];
                                if v != 0 && br.read_bit()? != 0 {
                                    precinct.coeff[pb.c][coff + i] = -v;
                                }
                            }
                        }
                        SignHandling::Off => unreachable!(),
                    }
                }
            }
            br.align_to_byte();
            let consumed = br.position_bytes() - section;
            if consumed > sign_bytes {
                return Err(JxsError::DecoderInvalidBitstream);
            }
            br.seek_bytes(section + sign_bytes)?;
        } else if sign_bytes != 0 {
            return Err(JxsError::DecoderInvalidBitstream);
        }
    }

    // Padding up to Lprc.
    let consumed = br.position_bytes() - start_pos;
    if consumed > lprc {
        return Err(JxsError::DecoderInvalidBitstream);
    }
    br.seek_bytes(start_pos + lprc)?;
    Ok(())
}

/// Top GCLI line for vertical prediction on the decode side.
fn top_gcli_line(
    pi: &Pi,
    pi_enc: &PiEnc,
    precinct: &PrecinctDec,
    prev: Option<&PrecinctDec>,
    shape: PrecinctShape,
    c: usize,
    b: usize,
    line: usize,
) -> Result<(Vec<u8>, u8)> {
    let gcli_width = pi.band_info(shape, c, b).gcli_width as usize;
    if line == 0 {
        let prev = prev.ok_or(JxsError::DecoderInvalidBitstream)?;
        // The precinct above always has the normal shape on this path.
        let top_lines = pi.band_info(PrecinctShape::Normal, c, b).height as usize;
        let goff = pi_enc.gcli_offset[c][b] + (top_lines - 1) * gcli_width;
        Ok((
            prev.gcli[c][goff..goff + gcli_width].to_vec(),
            prev.band_gtli[c][b],
        ))
    } else {
        let goff = pi_enc.gcli_offset[c][b] + (line - 1) * gcli_width;
        Ok((
            precinct.gcli[c][goff..goff + gcli_width].to_vec(),
            precinct.band_gtli[c][b],
        ))
    }
}
