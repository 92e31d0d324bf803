//! JPEG XS encoder: public API and the per-precinct frame orchestrator.
//!
//! Encode pipeline per precinct: input window scaling (NLT forward, with the
//! packed-RGB adapter and the optional forward colour transform), the DWT
//! schedule of the component, GCLI and significance extraction, rate control
//! against the precinct (or slice) byte budget, packing.

use log::debug;

use crate::config::{CpuFlags, CpuProfile, EncoderConfig, NltType, RateMode};
use crate::constants::*;
use crate::dwt::{self, BandSink, DwtV1History, DwtV2History};
use crate::error::{JxsError, Result};
use crate::headers::{
    self, PictureHeaderConst, PictureHeaderDynamic, EOC_LEN, SLICE_HEADER_LEN,
};
use crate::image::{Frame, ImageBuffer, SampleBuffer};
use crate::nlt;
use crate::packer::pack_precinct;
use crate::pi::{format_sampling_factors, Pi, PiEnc};
use crate::pipeline::FrameQueue;
use crate::precinct::PrecinctEnc;
use crate::quant;
use crate::rate_control::{rate_control_init_precinct, rate_control_precinct, rate_control_slice};

/// Scalar kernel set resolved once at open from the allowed CPU flags.
/// Vectorized builds may swap entries; every entry must stay bit-identical
/// to the scalar contract.
pub struct KernelTable {
    pub gcli_line: fn(&mut [u8], &[u16], usize),
    pub significance_max_line: fn(&mut [u8], &[u8], usize),
}

impl KernelTable {
    pub fn new(_cpu_flags: CpuFlags) -> Self {
        KernelTable {
            gcli_line: quant::gcli_line,
            significance_max_line: quant::significance_max_line,
        }
    }
}

/// Per-component DWT history across precincts.
enum DwtState {
    V0,
    V1(DwtV1History),
    V2(DwtV2History),
}

pub struct JxsEncoder {
    cfg: EncoderConfig,
    pi: Pi,
    pi_enc: PiEnc,
    hdr_const: PictureHeaderConst,
    hdr_dyn: PictureHeaderDynamic,
    kernels: KernelTable,
    /// Exact codestream size in bytes (CBR).
    frame_bytes: usize,
    /// Byte budget of every precinct of the frame.
    precinct_budget: Vec<u32>,
    precinct_pool: Vec<PrecinctEnc>,
    input_queue: FrameQueue<Frame>,
}

impl JxsEncoder {
    /// Validates the configuration, builds the picture information and the
    /// weight tables, sizes the pools and the byte budgets.
    pub fn open(cfg: EncoderConfig) -> Result<JxsEncoder> {
        cfg.validate()?;
        let (comps_num, sx, sy) = format_sampling_factors(cfg.format)?;
        if cfg.suppressed_decomp > comps_num {
            return Err(JxsError::BadParameter);
        }

        let mut pi = Pi::compute(
            true,
            comps_num,
            GROUP_SIZE as u32,
            SIGNIFICANCE_GROUP_SIZE as u32,
            cfg.width,
            cfg.height,
            cfg.decomp_h,
            cfg.decomp_v,
            cfg.suppressed_decomp,
            &sx,
            &sy,
            0,
            cfg.slice_height,
        )?;
        crate::weight_table::weight_table_calculate(&mut pi, cfg.format)?;
        pi.dump_bands();
        let pi_enc = PiEnc::compute(&pi);

        let mut gains = Vec::new();
        let mut priorities = Vec::new();
        for slot in pi.global_bands[..pi.bands_num_all as usize].iter() {
            if slot.band_id == BAND_NOT_EXIST {
                continue;
            }
            let band = &pi.components[slot.comp_id as usize].bands[slot.band_id as usize];
            gains.push(band.gain);
            priorities.push(band.priority);
        }

        let mut bit_depth = [0u8; MAX_COMPONENTS_NUM];
        for d in bit_depth.iter_mut().take(comps_num as usize) {
            *d = cfg.bit_depth;
        }
        let mut sx_arr = [1u32; MAX_COMPONENTS_NUM];
        let mut sy_arr = [1u32; MAX_COMPONENTS_NUM];
        sx_arr[..comps_num as usize].copy_from_slice(&sx[..comps_num as usize]);
        sy_arr[..comps_num as usize].copy_from_slice(&sy[..comps_num as usize]);

        let hdr_const = PictureHeaderConst {
            profile: 0,
            level: 0,
            width: cfg.width,
            height: cfg.height,
            precinct_width: 0,
            slice_height: cfg.slice_height as u16,
            comps_num: comps_num as u8,
            decom_h: cfg.decomp_h as u8,
            decom_v: cfg.decomp_v as u8,
            sd: cfg.suppressed_decomp as u8,
            cpih: cfg.colour_transform,
            coeff_group_size: GROUP_SIZE as u8,
            significance_group_size: SIGNIFICANCE_GROUP_SIZE as u8,
            sx: sx_arr,
            sy: sy_arr,
            bit_depth,
            gains,
            priorities,
        };

        // RGGB registration by default when coding CFA data.
        let (xcrg, ycrg) = if cfg.colour_transform == 3 {
            ([0, 32768, 0, 32768], [0, 0, 32768, 32768])
        } else {
            ([0; 4], [0; 4])
        };
        let mut hdr_dyn = PictureHeaderDynamic {
            lcod: 0,
            bw: cfg.coeff_bits,
            fq: cfg.fraction_bits,
            br: 4,
            fslc: 0,
            ppoc: 0,
            lh: (!pi.use_short_header) as u8,
            rl: 1,
            qpih: cfg.quant_type,
            fs: cfg.sign_handling,
            rm: cfg.run_mode as u8,
            tnlt: NltType::Linear,
            tnlt_sigma: 0,
            tnlt_alpha: 0,
            tnlt_t1: 0,
            tnlt_t2: 0,
            tnlt_e: 0,
            cf: 0,
            cf_e1: 0,
            cf_e2: 0,
            xcrg,
            ycrg,
        };

        let frame_bytes =
            ((cfg.width as f64) * (cfg.height as f64) * cfg.bpp / 8.0).ceil() as usize;
        let overhead = headers::frame_header_len(&hdr_const, &hdr_dyn)
            + pi.slice_num as usize * SLICE_HEADER_LEN
            + EOC_LEN;
        if frame_bytes <= overhead {
            return Err(JxsError::BadParameter);
        }
        hdr_dyn.lcod = frame_bytes as u32;

        let data_total = (frame_bytes - overhead) as u64;
        let n = pi.precincts_line_num as u64;
        let base = (data_total / n) as u32;
        let rem = (data_total % n) as u32;
        let precinct_budget: Vec<u32> = (0..pi.precincts_line_num)
            .map(|i| base + (i < rem) as u32)
            .collect();

        let precinct_pool: Vec<PrecinctEnc> = (0..pi.precincts_per_slice)
            .map(|_| PrecinctEnc::new(&pi, &pi_enc))
            .collect();

        debug!(
            "encoder open: {}x{} {:?} {} precincts, {} slices, {} bytes/frame",
            cfg.width, cfg.height, cfg.format, pi.precincts_line_num, pi.slice_num, frame_bytes
        );

        let input_queue = FrameQueue::new(cfg.input_queue_size);
        Ok(JxsEncoder {
            cfg,
            pi,
            pi_enc,
            hdr_const,
            hdr_dyn,
            kernels: KernelTable::new(0),
            frame_bytes,
            precinct_budget,
            precinct_pool,
            input_queue,
        })
    }

    /// Exact codestream size every frame will produce.
    pub fn frame_size(&self) -> usize {
        self.frame_bytes
    }

    /// Enqueues an input image with its (empty) bitstream buffer.
    pub fn send_frame(&self, frame: Frame, blocking: bool) -> Result<()> {
        self.input_queue.send(frame, blocking)
    }

    /// Dequeues the next frame and encodes it; a per-frame failure rides on
    /// the frame's `error` field rather than poisoning the pipeline.
    pub fn get_frame(&mut self, blocking: bool) -> Result<Frame> {
        let mut frame = self.input_queue.recv(blocking)?;
        match self.encode_frame(&frame.image) {
            Ok(bytes) => {
                frame.bitstream.used_size = bytes.len();
                frame.bitstream.buffer = bytes;
                frame.bitstream.last_packet_in_frame = true;
            }
            Err(e) => frame.error = Some(e),
        }
        frame.image.ready_to_release = true;
        frame.bitstream.ready_to_release = true;
        Ok(frame)
    }

    /// Drains the input queue; frames still inside are released unencoded.
    pub fn close(&mut self) {
        self.input_queue.shutdown();
        while let Ok(mut frame) = self.input_queue.recv(false) {
            frame.image.ready_to_release = true;
            frame.bitstream.ready_to_release = true;
        }
    }

    /// Synchronous single-frame encode.
    pub fn encode_frame(&mut self, image: &ImageBuffer) -> Result<Vec<u8>> {
        let mut scaled = self.scale_input(image)?;

        match self.cfg.colour_transform {
            1 => {
                let w = self.pi.components[0].width as usize;
                let h = self.pi.components[0].height as usize;
                crate::mct::forward_rct(&mut scaled, w, h);
            }
            3 => {
                let w = self.pi.components[0].width as i32;
                let h = self.pi.components[0].height as i32;
                let ct = crate::mct::cfa_pattern(&self.hdr_dyn.xcrg, &self.hdr_dyn.ycrg)
                    .map_err(|_| JxsError::BadParameter)?;
                crate::mct::forward_star_tetrix(
                    &mut scaled,
                    self.hdr_dyn.cf as i32,
                    ct,
                    self.hdr_dyn.cf_e1 as i32,
                    self.hdr_dyn.cf_e2 as i32,
                    w,
                    h,
                );
            }
            _ => {}
        }

        let mut out = Vec::with_capacity(self.frame_bytes);
        headers::write_frame_header(&mut out, &self.hdr_const, &self.hdr_dyn);

        let mut states: Vec<DwtState> = self
            .pi
            .components
            .iter()
            .map(|comp| match comp.decom_v {
                0 => DwtState::V0,
                1 => DwtState::V1(DwtV1History::new(comp.width as usize)),
                _ => DwtState::V2(DwtV2History::new(comp.width as usize)),
            })
            .collect();

        for slice_idx in 0..self.pi.slice_num {
            headers::write_slice_header(&mut out, slice_idx as u16);

            let p_start = slice_idx * self.pi.precincts_per_slice;
            let p_end = (p_start + self.pi.precincts_per_slice).min(self.pi.precincts_line_num);
            let n = (p_end - p_start) as usize;

            for (i, p) in (p_start..p_end).enumerate() {
                let precinct = &mut self.precinct_pool[i];
                precinct.reset_for(p, self.pi.shape_for(p));

                let pi = &self.pi;
                let pi_enc = &self.pi_enc;
                let fq = self.cfg.fraction_bits;
                let first_of_slice = i == 0;
                match self.cfg.cpu_profile {
                    CpuProfile::LowLatency => {
                        for (c, (arena, state)) in precinct
                            .coeff
                            .iter_mut()
                            .zip(states.iter_mut())
                            .enumerate()
                        {
                            component_dwt(
                                pi,
                                pi_enc,
                                fq,
                                c,
                                p,
                                first_of_slice,
                                &scaled[c],
                                arena,
                                state,
                            );
                        }
                    }
                    CpuProfile::CpuThroughput => {
                        std::thread::scope(|s| {
                            for (c, (arena, state)) in precinct
                                .coeff
                                .iter_mut()
                                .zip(states.iter_mut())
                                .enumerate()
                            {
                                let plane = &scaled[c];
                                s.spawn(move || {
                                    component_dwt(
                                        pi,
                                        pi_enc,
                                        fq,
                                        c,
                                        p,
                                        first_of_slice,
                                        plane,
                                        arena,
                                        state,
                                    );
                                });
                            }
                        });
                    }
                }

                self.extract_gcli(i);
                let precinct = &mut self.precinct_pool[i];
                rate_control_init_precinct(&self.pi, &self.pi_enc, &self.cfg, precinct);
            }

            match self.cfg.rate_mode {
                RateMode::Slice => {
                    let budget: u32 = (p_start..p_end)
                        .map(|p| self.precinct_budget[p as usize])
                        .sum();
                    rate_control_slice(
                        &self.pi,
                        &self.pi_enc,
                        &self.cfg,
                        &mut self.precinct_pool[..n],
                        budget,
                    )?;
                }
                RateMode::Precinct => {
                    for i in 0..n {
                        let (done, rest) = self.precinct_pool.split_at_mut(i);
                        let top = if i > 0 { Some(&mut done[i - 1]) } else { None };
                        rate_control_precinct(
                            &self.pi,
                            &self.pi_enc,
                            &self.cfg,
                            &mut rest[0],
                            top,
                            self.precinct_budget[(p_start + i as u32) as usize],
                        )?;
                    }
                }
            }

            for i in 0..n {
                let top = if i > 0 {
                    Some(&self.precinct_pool[i - 1])
                } else {
                    None
                };
                pack_precinct(
                    &mut out,
                    &self.pi,
                    &self.pi_enc,
                    &self.cfg,
                    &self.precinct_pool[i],
                    top,
                )?;
            }
        }

        headers::write_eoc(&mut out);
        if out.len() != self.frame_bytes {
            log::error!("codestream size {} != {}", out.len(), self.frame_bytes);
            return Err(JxsError::EncodeFrameError);
        }
        Ok(out)
    }

    /// NLT-scales the input into per-component planes, de-interleaving packed
    /// RGB on the way.
    fn scale_input(&self, image: &ImageBuffer) -> Result<Vec<Vec<i32>>> {
        let comps = self.pi.comps_num as usize;
        let bw = self.cfg.coeff_bits;
        let depth = self.cfg.bit_depth;
        let mut scaled = Vec::with_capacity(comps);

        if self.cfg.format.is_packed() {
            let plane = image.planes.first().ok_or(JxsError::InvalidComponent)?;
            let w = self.pi.components[0].width as usize;
            let h = self.pi.components[0].height as usize;
            if plane.data.len() < (h - 1) * plane.stride + w * comps {
                return Err(JxsError::InvalidComponent);
            }
            let offset = 1i32 << (bw - 1);
            let shift = bw - depth;
            for c in 0..comps {
                let mut out = vec![0i32; w * h];
                for y in 0..h {
                    let base = y * plane.stride;
                    match &plane.data {
                        SampleBuffer::U8(data) => {
                            for x in 0..w {
                                let v = data[base + x * comps + c] as i32;
                                out[y * w + x] = (v << shift) - offset;
                            }
                        }
                        SampleBuffer::U16(data) => {
                            for x in 0..w {
                                let v = data[base + x * comps + c] as i32;
                                out[y * w + x] = (v << shift) - offset;
                            }
                        }
                    }
                }
                scaled.push(out);
            }
            return Ok(scaled);
        }

        if image.planes.len() < comps {
            return Err(JxsError::InvalidComponent);
        }
        for c in 0..comps {
            let comp = &self.pi.components[c];
            let plane = &image.planes[c];
            let (w, h) = (comp.width as usize, comp.height as usize);
            if plane.stride < w || plane.data.len() < (h - 1) * plane.stride + w {
                return Err(JxsError::InvalidComponent);
            }
            let mut out = vec![0i32; w * h];
            for y in 0..h {
                nlt::input_scaling_line(
                    &plane.data,
                    y * plane.stride,
                    w,
                    &mut out[y * w..(y + 1) * w],
                    bw,
                    depth,
                );
            }
            scaled.push(out);
        }
        Ok(scaled)
    }

    /// GCLI and significance-max extraction for every band line of the
    /// pooled precinct `i`.
    fn extract_gcli(&mut self, i: usize) {
        let pi = &self.pi;
        let pi_enc = &self.pi_enc;
        let precinct = &mut self.precinct_pool[i];
        let shape = precinct.shape;
        let PrecinctEnc {
            coeff,
            gcli,
            significance,
            ..
        } = precinct;

        for c in 0..pi.comps_num as usize {
            for b in 0..pi.components[c].bands_num as usize {
                let info = pi.band_info(shape, c, b);
                let w = pi.components[c].bands[b].width as usize;
                let gcli_w = info.gcli_width as usize;
                let sig_w = info.significance_width as usize;
                for line in 0..info.height as usize {
                    let coff = pi_enc.coeff_offset[c][b] + line * w;
                    let goff = pi_enc.gcli_offset[c][b] + line * gcli_w;
                    (self.kernels.gcli_line)(
                        &mut gcli[c][goff..goff + gcli_w],
                        &coeff[c][coff..coff + w],
                        pi.coeff_group_size as usize,
                    );
                    if self.cfg.significance {
                        let soff = pi_enc.sig_offset[c][b] + line * sig_w;
                        (self.kernels.significance_max_line)(
                            &mut significance[c][soff..soff + sig_w],
                            &gcli[c][goff..goff + gcli_w],
                            pi.significance_group_size as usize,
                        );
                    }
                }
            }
        }
    }
}

/// Runs one component's DWT schedule for one precinct, including the
/// slice-start history rebuild.
#[allow(clippy::too_many_arguments)]
fn component_dwt(
    pi: &Pi,
    pi_enc: &PiEnc,
    fq: u8,
    c: usize,
    prec_idx: u32,
    first_of_slice: bool,
    plane: &[i32],
    arena: &mut [u16],
    state: &mut DwtState,
) {
    let comp = &pi.components[c];
    let wc = comp.width as usize;
    let hc = comp.height;
    let line_idx = prec_idx * comp.precinct_height;
    if line_idx >= hc {
        return;
    }
    let row = |j: u32| &plane[j as usize * wc..(j as usize + 1) * wc];
    let mut sink = BandSink {
        arena,
        offsets: &pi_enc.coeff_offset[c],
        widths: &pi_enc.band_widths[c],
        fq,
    };

    match state {
        DwtState::V0 => {
            let shape = pi.shape_for(prec_idx);
            let lines = pi.band_info(shape, c, 0).height;
            for l in 0..lines {
                let mut buf = row(line_idx + l).to_vec();
                dwt::transform_v0(&mut buf, comp.decom_h, &mut sink, l as usize);
            }
        }
        DwtState::V1(hist) => {
            if line_idx == 0 {
                dwt::transform_v1_load_first(hist, row(0));
            } else if first_of_slice {
                dwt::transform_v1_recalc(hist, row(line_idx - 2), row(line_idx - 1), row(line_idx));
            }
            let line1 = (line_idx + 1 < hc).then(|| row(line_idx + 1));
            let line2 = (line_idx + 2 < hc).then(|| row(line_idx + 2));
            dwt::transform_v1_precinct(line_idx, hc, line1, line2, comp.decom_h, &mut sink, hist);
        }
        DwtState::V2(hist) => {
            if first_of_slice && line_idx > 0 {
                let base = line_idx.saturating_sub(6);
                let window: Vec<&[i32]> = (base..(line_idx + 3).min(hc)).map(row).collect();
                dwt::transform_v2_recalc(
                    hist,
                    line_idx,
                    hc,
                    &window,
                    base as usize,
                    pi.components[c].bands[comp.decom_h as usize + 2].width as usize,
                );
            }
            let window: Vec<&[i32]> = (line_idx..(line_idx + 7).min(hc)).map(row).collect();
            dwt::transform_v2_precinct(line_idx, hc, &window, comp.decom_h, &mut sink, hist);
        }
    }
}
