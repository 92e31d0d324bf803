//! Picture information: the geometric decomposition model.
//!
//! A frame is split per component into wavelet bands, bands into precincts,
//! precincts into packets. The structure is computed once at open time and
//! shared read-only by every later stage.

use log::debug;

use crate::constants::*;
use crate::error::{JxsError, Result};
use crate::image::ColourFormat;

/// Precinct shapes; the last line and the last column of a frame may be
/// shorter than the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecinctShape {
    Normal = 0,
    NormalLast = 1,
    LastNormal = 2,
    Last = 3,
}

pub const PRECINCT_SHAPES_NUM: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrecinctBandInfo {
    pub width: u32,
    /// Lines of this band inside the precinct.
    pub height: u32,
    pub gcli_width: u32,
    pub significance_width: u32,
}

/// Packet indexing `[band_start .. band_stop)` into the global band order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketInclusion {
    pub band_start: u32,
    pub band_stop: u32,
    pub line_idx: u32,
}

/// Per-shape geometry, precomputed for every `(component, band)` pair.
#[derive(Debug, Clone, Default)]
pub struct PrecinctShapeInfo {
    /// Encoder only: number of packets that exist in this shape.
    /// `None` when not computed (decoder) or not supported (`Last`).
    pub packets_exist_num: Option<u32>,
    /// Indexed `[component][band]`.
    pub band_info: Vec<Vec<PrecinctBandInfo>>,
    /// Encoder only: fixed RAW GCLI packet size in bytes, per packet.
    pub packet_size_gcli_raw_bytes: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalBandSlot {
    pub comp_id: u8,
    /// Index of the band inside `comp_id`; `BAND_NOT_EXIST` for gaps.
    pub band_id: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PiBand {
    /// Band id in the global picture ordering.
    pub band_id: u32,
    pub width: u32,
    pub height: u32,
    /// Lines of this band per precinct.
    pub height_lines_num: u32,
    pub x: u32,
    pub y: u32,
    pub gain: u8,
    pub priority: u8,
}

#[derive(Debug, Clone, Default)]
pub struct PiComponent {
    pub sx: u32,
    pub sy: u32,
    pub width: u32,
    pub height: u32,
    pub decom_h: u32,
    pub decom_v: u32,
    /// Height of a precinct in lines, for this component.
    pub precinct_height: u32,
    pub bands_num: u32,
    pub bands: Vec<PiBand>,
}

#[derive(Debug, Clone, Default)]
pub struct Pi {
    pub comps_num: u32,
    pub width: u32,
    pub height: u32,
    pub decom_h: u32,
    pub decom_v: u32,
    pub bands_num_all: u32,
    pub bands_num_exists: u32,
    pub precinct_height: u32,
    pub coeff_group_size: u32,
    pub significance_group_size: u32,
    pub sd: u32,
    pub slice_height: u32,
    pub precincts_per_slice: u32,
    pub precincts_col_num: u32,
    pub precincts_line_num: u32,
    pub slice_num: u32,
    pub use_short_header: bool,
    pub components: Vec<PiComponent>,
    /// Global band order, `bands_num_all` slots with `BAND_NOT_EXIST` gaps.
    pub global_bands: Vec<GlobalBandSlot>,
    pub packets_num: u32,
    pub packets: Vec<PacketInclusion>,
    pub shapes: [PrecinctShapeInfo; PRECINCT_SHAPES_NUM],
}

impl Pi {
    /// Builds the full descriptor. Rejects any parameter combination the
    /// rest of the pipeline cannot carry.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        init_for_encoder: bool,
        comps_num: u32,
        group_size: u32,
        sig_group_size: u32,
        width: u32,
        height: u32,
        decom_h: u32,
        decom_v: u32,
        sd: u32,
        sx: &[u32],
        sy: &[u32],
        precinct_width: u32,
        slice_height: u32,
    ) -> Result<Pi> {
        if sd > comps_num
            || decom_v > decom_h
            || decom_h > MAX_DECOMP_H_NUM
            || decom_v > MAX_DECOMP_V_NUM
            || comps_num as usize > MAX_COMPONENTS_NUM
            || comps_num == 0
            || slice_height == 0
            || group_size == 0
            || sig_group_size == 0
        {
            return Err(JxsError::BadParameter);
        }
        if sx.len() < comps_num as usize || sy.len() < comps_num as usize {
            return Err(JxsError::BadParameter);
        }

        let mut pi = Pi {
            comps_num,
            coeff_group_size: group_size,
            significance_group_size: sig_group_size,
            width,
            height,
            decom_h,
            decom_v,
            sd,
            ..Pi::default()
        };

        let comp_with_decomp = comps_num - sd;

        pi.precinct_height = 1 << decom_v;
        if slice_height < height && slice_height % pi.precinct_height != 0 {
            // With more than one slice per frame, the slice height has to
            // divide into whole precincts.
            return Err(JxsError::BadParameter);
        }
        pi.slice_height = slice_height;
        pi.precincts_per_slice = div_round_up(pi.slice_height, pi.precinct_height);
        pi.slice_num = div_round_up(pi.height, pi.slice_height);

        pi.bands_num_exists = 0;
        for c in 0..comps_num as usize {
            let mut comp = PiComponent {
                sx: sx[c],
                sy: sy[c],
                ..PiComponent::default()
            };
            if comp.sx < 1 || comp.sy < 1 {
                return Err(JxsError::BadParameter);
            }
            comp.width = width / comp.sx;
            comp.height = height / comp.sy;
            comp.precinct_height = pi.precinct_height / comp.sy;
            if comp.precinct_height == 0 {
                return Err(JxsError::BadParameter);
            }

            if (c as u32) < comp_with_decomp {
                comp.decom_h = decom_h;
                // Chroma subsampling reduces the vertical decomposition.
                if decom_v < comp.sy / 2 {
                    return Err(JxsError::BadParameter);
                }
                comp.decom_v = decom_v - comp.sy / 2;
            } else {
                comp.decom_h = 0;
                comp.decom_v = 0;
            }

            comp.bands_num = 2 * comp.decom_v + comp.decom_h + 1;
            if comp.bands_num as usize > MAX_BANDS_PER_COMPONENT_NUM || comp.bands_num < 1 {
                return Err(JxsError::BadParameter);
            }
            comp.bands = vec![PiBand::default(); comp.bands_num as usize];
            pi.bands_num_exists += comp.bands_num;
            pi.components.push(comp);
        }

        pi.bands_num_all = pi.components[0].bands_num * comp_with_decomp + sd;

        // Band topology: interleave bands of all decomposed components,
        // leaving gaps where chroma subsampling removed bands.
        let bands_num_global = 2 * decom_v + decom_h + 1;
        pi.global_bands = vec![
            GlobalBandSlot {
                comp_id: BAND_NOT_EXIST,
                band_id: BAND_NOT_EXIST,
            };
            MAX_BANDS_NUM
        ];

        for c in 0..comp_with_decomp as usize {
            let bands_num = pi.components[c].bands_num;
            debug_assert!(bands_num_global >= bands_num);
            let bands_to_ignore = bands_num_global - bands_num;
            // The last 3 bands of the first vertical level always follow the
            // gap of missing indexes.
            let bands_at_the_end = 3 * pi.components[c].decom_v;
            let mut band_id = c as u32;

            for i in 0..bands_num {
                pi.components[c].bands[i as usize].band_id = band_id;
                pi.global_bands[band_id as usize] = GlobalBandSlot {
                    comp_id: c as u8,
                    band_id: i as u8,
                };
                band_id += comp_with_decomp;
                if bands_to_ignore > 0
                    && i as i64 == bands_num as i64 - bands_at_the_end as i64 + 1
                        - bands_to_ignore as i64
                {
                    band_id += comp_with_decomp * bands_to_ignore;
                }
            }
        }

        for c in comp_with_decomp..comps_num {
            if pi.components[c as usize].bands_num != 1 {
                return Err(JxsError::BadParameter);
            }
            let band_id = comp_with_decomp * pi.components[0].bands_num + c - comp_with_decomp;
            pi.components[c as usize].bands[0].band_id = band_id;
            pi.global_bands[band_id as usize] = GlobalBandSlot {
                comp_id: c as u8,
                band_id: 0,
            };
        }

        // Split each component rectangle into bands by successive halving.
        for c in 0..comps_num as usize {
            let comp = &mut pi.components[c];
            let mut level = (comp.bands_num - 1) as usize;

            comp.bands[level].width = comp.width;
            comp.bands[level].height = comp.height;
            comp.bands[level].x = 0;
            comp.bands[level].y = 0;

            for _ in 0..comp.decom_v {
                if level < 3 {
                    return Err(JxsError::BadParameter);
                }
                // Vertical split up/down, horizontal split left/right:
                // four quadrants per level.
                let tmp = comp.bands[level];
                let width2 = tmp.width / 2;
                let width1 = tmp.width - width2;
                let height2 = tmp.height / 2;
                let height1 = tmp.height - height2;

                comp.bands[level].width = width2;
                comp.bands[level].height = height2;
                comp.bands[level].x = width1;
                comp.bands[level].y = height1;
                comp.bands[level - 1].width = width1;
                comp.bands[level - 1].height = height2;
                comp.bands[level - 1].x = 0;
                comp.bands[level - 1].y = height1;
                comp.bands[level - 2].width = width2;
                comp.bands[level - 2].height = height1;
                comp.bands[level - 2].x = width1;
                comp.bands[level - 2].y = 0;
                comp.bands[level - 3].width = width1;
                comp.bands[level - 3].height = height1;
                comp.bands[level - 3].x = 0;
                comp.bands[level - 3].y = 0;
                level -= 3;
            }
            for _ in comp.decom_v..comp.decom_h {
                if level < 1 {
                    return Err(JxsError::BadParameter);
                }
                let tmp = comp.bands[level];
                let width2 = tmp.width / 2;
                let width1 = tmp.width - width2;

                comp.bands[level].width = width2;
                comp.bands[level].height = tmp.height;
                comp.bands[level].x = width1;
                comp.bands[level].y = 0;
                comp.bands[level - 1].width = width1;
                comp.bands[level - 1].height = tmp.height;
                comp.bands[level - 1].x = 0;
                comp.bands[level - 1].y = 0;
                level -= 1;
            }

            for band in comp.bands.iter() {
                if band.width == 0 || band.height == 0 {
                    return Err(JxsError::BadParameter);
                }
            }

            let bands_2_lines = if comp.decom_v == 2 { 3 } else { 0 };
            let split = (comp.bands_num - bands_2_lines) as usize;
            for band in comp.bands[..split].iter_mut() {
                band.height_lines_num = 1;
            }
            for band in comp.bands[split..].iter_mut() {
                band.height_lines_num = 2;
            }
        }

        for c in comp_with_decomp..comps_num {
            let comp = &mut pi.components[c as usize];
            // Components without decomposition keep one band whose lines per
            // precinct equal the (subsampled) precinct height.
            comp.bands[0].height_lines_num = ((1u32 << decom_v) >> (comp.sy - 1)).min(comp.height);
        }

        pi.calc_packet_inclusion();
        pi.use_short_header = pi.width * pi.comps_num < SHORT_HEADER_THRESHOLD;
        pi.calc_precinct_dimension(init_for_encoder, precinct_width)?;
        Ok(pi)
    }

    fn calc_packet_inclusion(&mut self) {
        let comp_with_decomp = self.comps_num - self.sd;
        self.packets.clear();
        let band_stop = self.decom_h.max(self.decom_v) - self.decom_h.min(self.decom_v) + 1;

        self.packets.push(PacketInclusion {
            band_start: 0,
            band_stop: band_stop * comp_with_decomp,
            line_idx: 0,
        });

        for band_start in band_stop..self.components[0].bands_num {
            let start = band_start * comp_with_decomp;
            let mut stop = start;
            for i in start..(band_start + 1) * comp_with_decomp {
                if self.global_bands[i as usize].band_id != BAND_NOT_EXIST {
                    stop += 1;
                }
            }
            self.packets.push(PacketInclusion {
                band_start: start,
                band_stop: stop,
                line_idx: 0,
            });
        }

        for band_start in band_stop..self.components[0].bands_num {
            if self.components[0].bands[band_start as usize].height_lines_num == 1 {
                continue;
            }
            let start = band_start * comp_with_decomp;
            let mut stop = start;
            for i in start..(band_start + 1) * comp_with_decomp {
                let slot = self.global_bands[i as usize];
                if slot.band_id != BAND_NOT_EXIST
                    && self.components[slot.comp_id as usize].bands[slot.band_id as usize]
                        .height_lines_num
                        > 1
                {
                    stop += 1;
                }
            }
            self.packets.push(PacketInclusion {
                band_start: start,
                band_stop: stop,
                line_idx: 1,
            });
        }

        let mut n_bands = comp_with_decomp * self.components[0].bands_num;
        for c in comp_with_decomp..self.comps_num {
            for line in 0..self.components[c as usize].bands[0].height_lines_num {
                self.packets.push(PacketInclusion {
                    band_start: n_bands,
                    band_stop: n_bands + 1,
                    line_idx: line,
                });
            }
            n_bands += 1;
        }

        debug_assert!(self.packets.len() < MAX_PACKETS_NUM);
        self.packets_num = self.packets.len() as u32;
    }

    fn calc_precinct_dimension(&mut self, init_for_encoder: bool, precinct_width: u32) -> Result<()> {
        self.precincts_line_num = div_round_up(self.height, 1 << self.decom_v);

        if precinct_width != 0 {
            // Multi-column precincts are an extension point; the common path
            // runs one precinct column per frame.
            return Err(JxsError::BadParameter);
        }
        self.precincts_col_num = 1;

        for shape in self.shapes.iter_mut() {
            shape.band_info = vec![
                vec![PrecinctBandInfo::default(); MAX_BANDS_PER_COMPONENT_NUM];
                self.comps_num as usize
            ];
            shape.packets_exist_num = None;
            shape.packet_size_gcli_raw_bytes = vec![0; self.packets_num as usize];
        }

        let group_size = self.coeff_group_size;
        let sig_group_size = self.significance_group_size;
        let set = |info: &mut PrecinctBandInfo, width: u32, height: u32| {
            info.width = width;
            info.height = height;
            info.gcli_width = div_round_up(width, group_size);
            info.significance_width = div_round_up(info.gcli_width, sig_group_size);
        };

        for c in 0..self.comps_num as usize {
            for b in 0..self.components[c].bands_num as usize {
                let band = self.components[c].bands[b];
                let height_norm = band.height_lines_num;
                let height_last = band.height - (self.precincts_line_num - 1) * height_norm;

                set(
                    &mut self.shapes[PrecinctShape::Normal as usize].band_info[c][b],
                    band.width,
                    height_norm,
                );
                set(
                    &mut self.shapes[PrecinctShape::NormalLast as usize].band_info[c][b],
                    band.width,
                    height_norm,
                );
                set(
                    &mut self.shapes[PrecinctShape::LastNormal as usize].band_info[c][b],
                    band.width,
                    height_last,
                );
                set(
                    &mut self.shapes[PrecinctShape::Last as usize].band_info[c][b],
                    band.width,
                    height_last,
                );
            }
        }

        if init_for_encoder {
            self.shapes[PrecinctShape::Normal as usize].packets_exist_num = Some(self.packets_num);
            self.shapes[PrecinctShape::NormalLast as usize].packets_exist_num =
                Some(self.packets_num);

            let mut packets_num = 0u32;
            for packet in self.packets.iter() {
                let mut skip_packet = true;
                for band_idx in packet.band_start..packet.band_stop {
                    let slot = self.global_bands[band_idx as usize];
                    debug_assert!(slot.band_id != BAND_NOT_EXIST);
                    let info = &self.shapes[PrecinctShape::LastNormal as usize].band_info
                        [slot.comp_id as usize][slot.band_id as usize];
                    if packet.line_idx < info.height {
                        skip_packet = false;
                        break;
                    }
                }
                if !skip_packet {
                    packets_num += 1;
                }
            }
            self.shapes[PrecinctShape::LastNormal as usize].packets_exist_num = Some(packets_num);
            // A precinct short in both dimensions is rejected at open time;
            // it cannot occur on the single-column path.
            self.shapes[PrecinctShape::Last as usize].packets_exist_num = None;

            for shape_idx in 0..PRECINCT_SHAPES_NUM {
                for (packet_idx, packet) in self.packets.iter().enumerate() {
                    let mut raw_bits = 0u32;
                    for band_idx in packet.band_start..packet.band_stop {
                        let slot = self.global_bands[band_idx as usize];
                        let info = &self.shapes[shape_idx].band_info[slot.comp_id as usize]
                            [slot.band_id as usize];
                        if packet.line_idx < info.height {
                            raw_bits += info.gcli_width * 4;
                        }
                    }
                    self.shapes[shape_idx].packet_size_gcli_raw_bytes[packet_idx] =
                        bits_to_bytes(raw_bits);
                }
            }
        }
        Ok(())
    }

    /// Shape of precinct `prec_idx` on the single-column path.
    pub fn shape_for(&self, prec_idx: u32) -> PrecinctShape {
        if prec_idx + 1 == self.precincts_line_num {
            PrecinctShape::LastNormal
        } else {
            PrecinctShape::Normal
        }
    }

    pub fn band_info(&self, shape: PrecinctShape, c: usize, b: usize) -> &PrecinctBandInfo {
        &self.shapes[shape as usize].band_info[c][b]
    }

    /// Re-targets the structure for half or quarter resolution decoding.
    pub fn update_proxy_mode(&mut self, proxy_mode: crate::config::ProxyMode) -> Result<()> {
        use crate::config::ProxyMode;
        let proxy_subsampling: u32 = match proxy_mode {
            ProxyMode::Full => return Ok(()),
            ProxyMode::Half => {
                self.packets_num = if self.decom_v == 1 { 1 } else { 4 };
                1
            }
            ProxyMode::Quarter => {
                self.packets_num = 1;
                2
            }
        };

        if proxy_subsampling > self.decom_v || proxy_subsampling > self.decom_h {
            debug!(
                "cannot use proxy-mode={:?} for stream with decomp_v={} decomp_h={}",
                proxy_mode, self.decom_v, self.decom_h
            );
            return Err(JxsError::BadParameter);
        }

        self.decom_v -= proxy_subsampling;
        self.decom_h -= proxy_subsampling;
        self.width = div_round_up(self.width, 1 << proxy_subsampling);
        self.height = div_round_up(self.height, 1 << proxy_subsampling);

        for comp in self.components.iter_mut() {
            if proxy_subsampling > comp.decom_v || proxy_subsampling > comp.decom_h {
                return Err(JxsError::BadParameter);
            }
            comp.width = div_round_up(comp.width, 1 << proxy_subsampling);
            comp.height = div_round_up(comp.height, 1 << proxy_subsampling);
            comp.precinct_height >>= proxy_subsampling;
            comp.decom_v -= proxy_subsampling;
            comp.decom_h -= proxy_subsampling;
            comp.bands_num = 2 * comp.decom_v + comp.decom_h + 1;
        }
        Ok(())
    }

    /// Logs the band topology; the decomposition is hard to eyeball from the
    /// raw struct.
    pub fn dump_bands(&self) {
        debug!("bands: {} total, {} exist", self.bands_num_all, self.bands_num_exists);
        for (c, comp) in self.components.iter().enumerate() {
            debug!(
                "component[{}]: {}x{} dv:{} dh:{} bands:{}",
                c, comp.width, comp.height, comp.decom_v, comp.decom_h, comp.bands_num
            );
            for (i, band) in comp.bands.iter().enumerate() {
                debug!(
                    "  {:2} [{:2}] pos: {:4},{:4} [{:4}x{:4}] lines: {} gain: {} prio: {}",
                    i,
                    band.band_id,
                    band.x,
                    band.y,
                    band.width,
                    band.height,
                    band.height_lines_num,
                    band.gain,
                    band.priority
                );
            }
        }
    }
}

/// Component count and sampling factors implied by a colour format.
pub fn format_sampling_factors(
    format: ColourFormat,
) -> Result<(u32, [u32; MAX_COMPONENTS_NUM], [u32; MAX_COMPONENTS_NUM])> {
    let mut sx = [1u32; MAX_COMPONENTS_NUM];
    let mut sy = [1u32; MAX_COMPONENTS_NUM];
    let comps = match format {
        ColourFormat::PlanarYuv422 => {
            sx[1] = 2;
            sx[2] = 2;
            3
        }
        ColourFormat::PlanarYuv420 => {
            sx[1] = 2;
            sx[2] = 2;
            sy[1] = 2;
            sy[2] = 2;
            3
        }
        ColourFormat::PlanarYuv444OrRgb | ColourFormat::PackedYuv444OrRgb => 3,
        ColourFormat::Planar4Components => 4,
        ColourFormat::Gray | ColourFormat::PlanarYuv400 => 1,
        ColourFormat::Invalid => return Err(JxsError::BadParameter),
    };
    Ok((comps, sx, sy))
}

/// Encoder-side extension of the picture information: arena offsets for the
/// pooled per-precinct buffers plus the search bounds of the rate control.
#[derive(Debug, Clone, Default)]
pub struct PiEnc {
    pub max_quantization: u8,
    pub max_refinement: u8,
    /// `[component][band]` offset into the component coefficient arena.
    pub coeff_offset: Vec<Vec<usize>>,
    pub coeff_size: Vec<usize>,
    pub gcli_offset: Vec<Vec<usize>>,
    pub gcli_size: Vec<usize>,
    pub sig_offset: Vec<Vec<usize>>,
    pub sig_size: Vec<usize>,
    /// `[component][band]` width, a convenience copy for the kernels.
    pub band_widths: Vec<Vec<u32>>,
}

impl PiEnc {
    pub fn compute(pi: &Pi) -> PiEnc {
        let mut enc = PiEnc::default();

        // Refinement range [0, Nl - 1]; from the weight table it is possible
        // to bound the values that can still change any truncation.
        let mut max_refinement = 0u8;
        for comp in pi.components.iter() {
            for band in comp.bands.iter() {
                max_refinement = max_refinement.max(band.priority);
            }
        }
        if max_refinement < 255 {
            max_refinement += 1;
        }
        enc.max_refinement = max_refinement.min((pi.bands_num_all - 1) as u8);

        enc.max_quantization = 31;
        while enc.max_quantization > 0 {
            let mut any_alive = false;
            for comp in pi.components.iter() {
                for band in comp.bands.iter() {
                    let gtli = crate::quant::compute_truncation(
                        band.gain,
                        band.priority,
                        enc.max_quantization,
                        enc.max_refinement,
                    );
                    if gtli != TRUNCATION_MAX {
                        any_alive = true;
                    }
                }
            }
            if any_alive {
                break;
            }
            enc.max_quantization -= 1;
        }

        for c in 0..pi.comps_num as usize {
            let comp = &pi.components[c];
            let normal = &pi.shapes[PrecinctShape::Normal as usize].band_info[c];

            let mut coeff_off = Vec::with_capacity(comp.bands_num as usize);
            let mut gcli_off = Vec::with_capacity(comp.bands_num as usize);
            let mut sig_off = Vec::with_capacity(comp.bands_num as usize);
            let (mut co, mut go, mut so) = (0usize, 0usize, 0usize);
            for b in 0..comp.bands_num as usize {
                let lines = comp.bands[b].height_lines_num as usize;
                coeff_off.push(co);
                gcli_off.push(go);
                sig_off.push(so);
                co += comp.bands[b].width as usize * lines;
                go += normal[b].gcli_width as usize * lines;
                so += normal[b].significance_width as usize * lines;
            }
            enc.coeff_offset.push(coeff_off);
            enc.coeff_size.push(co);
            enc.gcli_offset.push(gcli_off);
            enc.gcli_size.push(go);
            enc.sig_offset.push(sig_off);
            enc.sig_size.push(so);
            enc.band_widths
                .push(comp.bands.iter().map(|b| b.width).collect());
        }
        enc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pi_420_v2_h5(w: u32, h: u32) -> Pi {
        Pi::compute(
            true,
            3,
            GROUP_SIZE as u32,
            SIGNIFICANCE_GROUP_SIZE as u32,
            w,
            h,
            5,
            2,
            0,
            &[1, 2, 2],
            &[1, 2, 2],
            0,
            16,
        )
        .unwrap()
    }

    #[test]
    fn test_band_dimensions_sum_to_component() {
        let pi = pi_420_v2_h5(1920, 1080);
        for comp in pi.components.iter() {
            // Bands on y == 0 tile the component width, bands on x == 0 the
            // component height.
            let w: u32 = comp.bands.iter().filter(|b| b.y == 0).map(|b| b.width).sum();
            let h: u32 = comp
                .bands
                .iter()
                .filter(|b| b.x == 0)
                .map(|b| b.height)
                .sum();
            assert_eq!(w, comp.width);
            assert_eq!(h, comp.height);
        }
    }

    #[test]
    fn test_yuv420_v2_h5_topology() {
        let pi = pi_420_v2_h5(1920, 1080);
        assert_eq!(pi.components[0].bands_num, 10);
        assert_eq!(pi.components[1].bands_num, 8);
        assert_eq!(pi.components[2].bands_num, 8);
        assert_eq!(pi.bands_num_exists, 26);
        assert_eq!(pi.bands_num_all, 30);
        assert_eq!(pi.precinct_height, 4);
        assert_eq!(pi.precincts_line_num, 270);
        assert_eq!(pi.precincts_per_slice, 4);
        assert_eq!(pi.slice_num, 68);
        // Luma: two gap slots per chroma component after in-component
        // band 6 (the 420 reduction removes one vertical level).
        assert_eq!(pi.global_bands[18].comp_id, 0);
        assert_eq!(pi.global_bands[19].band_id, BAND_NOT_EXIST);
        assert_eq!(pi.global_bands[20].band_id, BAND_NOT_EXIST);
    }

    #[test]
    fn test_packet_count_within_limit() {
        let pi = pi_420_v2_h5(1920, 1080);
        assert!(pi.packets_num <= MAX_PACKETS_NUM as u32);
        // First packet spans the interleaved LL chain of all components.
        assert_eq!(pi.packets[0].band_start, 0);
        assert_eq!(pi.packets[0].band_stop, 4 * 3);
        assert_eq!(pi.packets[0].line_idx, 0);
    }

    #[test]
    fn test_pi_idempotent() {
        let a = pi_420_v2_h5(1920, 1080);
        let b = pi_420_v2_h5(1920, 1080);
        assert_eq!(format!("{:?}", a), format!("{:?}", b));
    }

    #[test]
    fn test_rejects_bad_parameters() {
        // decom_v > decom_h
        assert!(Pi::compute(true, 1, 4, 8, 64, 64, 1, 2, 0, &[1], &[1], 0, 4).is_err());
        // 420 with decom_v == 0 is not expressible.
        assert!(
            Pi::compute(true, 3, 4, 8, 64, 64, 3, 0, 0, &[1, 2, 2], &[1, 2, 2], 0, 64).is_err()
        );
        // Slice height not a multiple of the precinct height.
        assert!(Pi::compute(true, 1, 4, 8, 64, 64, 2, 1, 0, &[1], &[1], 0, 3).is_err());
    }

    #[test]
    fn test_proxy_half_resolution() {
        let mut pi = pi_420_v2_h5(1920, 1080);
        pi.update_proxy_mode(crate::config::ProxyMode::Half).unwrap();
        assert_eq!(pi.width, 960);
        assert_eq!(pi.height, 540);
        assert_eq!(pi.decom_v, 1);
        assert_eq!(pi.decom_h, 4);
        assert_eq!(pi.packets_num, 4);
        assert_eq!(pi.components[0].bands_num, 7);
    }

    #[test]
    fn test_max_quantization_bounds() {
        let mut pi = pi_420_v2_h5(1920, 1080);
        crate::weight_table::weight_table_calculate(&mut pi, ColourFormat::PlanarYuv420).unwrap();
        let enc = PiEnc::compute(&pi);
        assert!(enc.max_quantization >= 15);
        assert!((enc.max_refinement as u32) <= pi.bands_num_all - 1);
    }
}
