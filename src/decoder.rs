//! JPEG XS decoder: probe, per-precinct unpack → dequantization → inverse
//! wavelet, then the inverse colour and range transforms.
//!
//! The probe parses just enough of the bitstream to report the image
//! geometry; half and quarter proxy modes re-target the picture information
//! and skip the packets of the dropped decomposition levels.

use log::debug;

use crate::bitio::BitReader;
use crate::config::DecoderConfig;
use crate::constants::*;
use crate::error::{JxsError, Result};
use crate::headers::{parse_frame_header, ParsedHeaders, PictureHeaderConst};
use crate::idwt::{self, BandSource, IdwtV1State, IdwtV2State};
use crate::image::{
    ColourFormat, ComponentConfig, Frame, ImageBuffer, ImageConfig, Plane, SampleBuffer,
};
use crate::markers::MarkerCode;
use crate::nlt::{self, NltParams};
use crate::pi::{Pi, PiEnc};
use crate::pipeline::FrameQueue;
use crate::precinct::PrecinctDec;
use crate::unpacker::{unpack_precinct, UnpackParams};

/// Per-component inverse DWT state.
enum IdwtState {
    V0,
    V1(IdwtV1State),
    V2(IdwtV2State),
}

#[derive(Debug)]
pub struct JxsDecoder {
    hdr_const: PictureHeaderConst,
    nlt_params: NltParams,
    unpack_params: UnpackParams,
    cpih: u8,
    fq: u8,
    cf: u8,
    cf_e1: u8,
    cf_e2: u8,
    xcrg: [u16; MAX_COMPONENTS_NUM],
    ycrg: [u16; MAX_COMPONENTS_NUM],
    /// Full-resolution structure; drives the bitstream parsing.
    pi_full: Pi,
    pi_enc_full: PiEnc,
    /// Proxy-reduced structure; drives reconstruction and output.
    pi: Pi,
    pi_enc: PiEnc,
    image_config: ImageConfig,
    ring: Vec<PrecinctDec>,
    input_queue: FrameQueue<Frame>,
}

fn detect_format(comps: u32, sx: &[u32], sy: &[u32]) -> ColourFormat {
    match comps {
        1 => ColourFormat::Gray,
        4 => ColourFormat::Planar4Components,
        3 => {
            if sx[1] == 2 && sy[1] == 2 {
                ColourFormat::PlanarYuv420
            } else if sx[1] == 2 {
                ColourFormat::PlanarYuv422
            } else {
                ColourFormat::PlanarYuv444OrRgb
            }
        }
        _ => ColourFormat::Invalid,
    }
}

fn build_pi(headers: &ParsedHeaders) -> Result<Pi> {
    let c = &headers.hdr_const;
    let mut pi = Pi::compute(
        true,
        c.comps_num as u32,
        c.coeff_group_size as u32,
        c.significance_group_size as u32,
        c.width,
        c.height,
        c.decom_h as u32,
        c.decom_v as u32,
        c.sd as u32,
        &c.sx,
        &c.sy,
        c.precinct_width as u32,
        c.slice_height as u32,
    )
    .map_err(|_| JxsError::DecoderInvalidBitstream)?;

    // Band weights come from the WGT marker, not from built-in tables.
    let mut idx = 0usize;
    for slot_idx in 0..pi.bands_num_all as usize {
        let slot = pi.global_bands[slot_idx];
        if slot.band_id == BAND_NOT_EXIST {
            continue;
        }
        if idx >= c.gains.len() {
            return Err(JxsError::DecoderInvalidBitstream);
        }
        let band =
            &mut pi.components[slot.comp_id as usize].bands[slot.band_id as usize];
        band.gain = c.gains[idx];
        band.priority = c.priorities[idx];
        idx += 1;
    }
    if idx != c.gains.len() {
        return Err(JxsError::DecoderInvalidBitstream);
    }
    Ok(pi)
}

impl JxsDecoder {
    /// Parses enough of `probe` to size the output images; the returned
    /// configuration reflects the requested proxy resolution.
    pub fn init(
        api_ver_major: u32,
        _api_ver_minor: u32,
        cfg: &DecoderConfig,
        probe: &[u8],
    ) -> Result<(JxsDecoder, ImageConfig)> {
        if api_ver_major != API_VER_MAJOR {
            return Err(JxsError::InvalidApiVersion);
        }
        let headers = parse_frame_header(probe)?;
        let pi_full = build_pi(&headers)?;
        let pi_enc_full = PiEnc::compute(&pi_full);

        let mut pi = pi_full.clone();
        pi.update_proxy_mode(cfg.proxy_mode)
            .map_err(|_| JxsError::BadParameter)?;
        let pi_enc = PiEnc::compute(&pi);

        let c = &headers.hdr_const;
        let format = detect_format(pi.comps_num, &c.sx, &c.sy);
        let bit_depth = c.bit_depth[0];
        let mut components = [ComponentConfig::default(); MAX_COMPONENTS_NUM];
        for (i, comp) in pi.components.iter().enumerate() {
            components[i] = ComponentConfig {
                width: comp.width,
                height: comp.height,
                byte_size: comp.width * comp.height * if bit_depth > 8 { 2 } else { 1 },
            };
        }
        let image_config = ImageConfig {
            width: pi.width,
            height: pi.height,
            bit_depth,
            format,
            components_num: pi.comps_num as u8,
            components,
        };

        let ring: Vec<PrecinctDec> = (0..3)
            .map(|_| PrecinctDec::new(&pi_full, &pi_enc_full))
            .collect();

        debug!(
            "decoder init: {}x{} {:?} proxy {:?}",
            pi.width, pi.height, format, cfg.proxy_mode
        );

        let d = &headers.hdr_dyn;
        let decoder = JxsDecoder {
            nlt_params: d.nlt_params(),
            unpack_params: UnpackParams {
                quant_type: d.qpih,
                sign_handling: d.fs,
                run_mode: d.rm != 0,
            },
            cpih: c.cpih,
            fq: d.fq,
            cf: d.cf,
            cf_e1: d.cf_e1,
            cf_e2: d.cf_e2,
            xcrg: d.xcrg,
            ycrg: d.ycrg,
            hdr_const: headers.hdr_const,
            pi_full,
            pi_enc_full,
            pi,
            pi_enc,
            image_config,
            ring,
            input_queue: FrameQueue::new(8),
        };
        let config = decoder.image_config;
        Ok((decoder, config))
    }

    pub fn image_config(&self) -> &ImageConfig {
        &self.image_config
    }

    /// Enqueues a bitstream with its (empty) output image buffer.
    pub fn send_frame(&self, frame: Frame, blocking: bool) -> Result<()> {
        self.input_queue.send(frame, blocking)
    }

    /// Dequeues and decodes the next frame; per-frame failures ride on the
    /// frame's `error` field.
    pub fn get_frame(&mut self, blocking: bool) -> Result<Frame> {
        let mut frame = self.input_queue.recv(blocking)?;
        let data = std::mem::take(&mut frame.bitstream.buffer);
        match self.decode_frame(&data) {
            Ok(image) => frame.image = image,
            Err(e) => frame.error = Some(e),
        }
        frame.bitstream.buffer = data;
        frame.bitstream.ready_to_release = true;
        frame.image.ready_to_release = true;
        Ok(frame)
    }

    pub fn close(&mut self) {
        self.input_queue.shutdown();
        while self.input_queue.recv(false).is_ok() {}
    }

    /// Synchronous single-frame decode.
    pub fn decode_frame(&mut self, data: &[u8]) -> Result<ImageBuffer> {
        let headers = parse_frame_header(data)?;
        if headers.hdr_const != self.hdr_const {
            return Err(JxsError::DecoderConfigChange);
        }

        let comps = self.pi.comps_num as usize;
        let mut comps_out: Vec<Vec<i32>> = self
            .pi
            .components
            .iter()
            .map(|c| vec![0i32; (c.width * c.height) as usize])
            .collect();

        let mut states: Vec<IdwtState> = self
            .pi
            .components
            .iter()
            .map(|comp| match comp.decom_v {
                0 => IdwtState::V0,
                1 => IdwtState::V1(IdwtV1State::new(comp.width as usize)),
                _ => IdwtState::V2(IdwtV2State::new(comp.width as usize)),
            })
            .collect();

        let mut br = BitReader::new(data);
        br.seek_bytes(headers.first_slice_offset)?;

        for slice_idx in 0..self.pi_full.slice_num {
            if br.read_bits(16)? as u16 != MarkerCode::SliceHeader as u16 {
                return Err(JxsError::DecoderInvalidBitstream);
            }
            let len = br.read_u16()?;
            let idx = br.read_u16()?;
            if len != 4 || idx as u32 != slice_idx {
                return Err(JxsError::DecoderInvalidBitstream);
            }

            let p_start = slice_idx * self.pi_full.precincts_per_slice;
            let p_end =
                (p_start + self.pi_full.precincts_per_slice).min(self.pi_full.precincts_line_num);
            for p in p_start..p_end {
                let shape = self.pi_full.shape_for(p);
                let cur_idx = (p % 3) as usize;
                let prev_idx = (p > 0).then(|| ((p + 2) % 3) as usize);
                let (cur, prev) = ring_cur_prev(&mut self.ring, cur_idx, prev_idx);
                unpack_precinct(
                    &mut br,
                    &self.pi_full,
                    &self.pi_enc_full,
                    &self.unpack_params,
                    shape,
                    cur,
                    prev,
                    self.pi.packets_num,
                )?;

                let first_of_slice = p == p_start;
                for c in 0..comps {
                    self.component_idwt(
                        c,
                        p,
                        first_of_slice,
                        &mut states[c],
                        &mut comps_out[c],
                    );
                }
            }
        }

        if br.read_bits(16)? as u16 != MarkerCode::EndOfCodestream as u16 {
            return Err(JxsError::DecoderInvalidBitstream);
        }

        match self.cpih {
            0 => {}
            1 => {
                let w = self.pi.components[0].width as usize;
                let h = self.pi.components[0].height as usize;
                crate::mct::inverse_rct(&mut comps_out, w, h);
            }
            3 => {
                let ct = crate::mct::cfa_pattern(&self.xcrg, &self.ycrg)?;
                let w = self.pi.components[0].width as i32;
                let h = self.pi.components[0].height as i32;
                crate::mct::inverse_star_tetrix(
                    &mut comps_out,
                    self.cf as i32,
                    ct,
                    self.cf_e1 as i32,
                    self.cf_e2 as i32,
                    w,
                    h,
                );
            }
            _ => return Err(JxsError::DecoderInvalidBitstream),
        }

        let depth = self.image_config.bit_depth;
        let mut planes = Vec::with_capacity(comps);
        for (c, comp) in self.pi.components.iter().enumerate() {
            let (w, h) = (comp.width as usize, comp.height as usize);
            let mut plane = if depth <= 8 {
                Plane::new_u8(w, h)
            } else {
                Plane::new_u16(w, h)
            };
            for y in 0..h {
                let row = &comps_out[c][y * w..(y + 1) * w];
                match &mut plane.data {
                    SampleBuffer::U8(out) => nlt::inverse_transform_line_u8(
                        row,
                        depth,
                        &self.nlt_params,
                        &mut out[y * w..(y + 1) * w],
                    ),
                    SampleBuffer::U16(out) => nlt::inverse_transform_line_u16(
                        row,
                        depth,
                        &self.nlt_params,
                        &mut out[y * w..(y + 1) * w],
                    ),
                }
            }
            planes.push(plane);
        }
        Ok(ImageBuffer {
            planes,
            ready_to_release: false,
        })
    }

    /// Runs one component's inverse DWT schedule for precinct `p` and writes
    /// the emitted rows into the output plane.
    fn component_idwt(
        &self,
        c: usize,
        p: u32,
        first_of_slice: bool,
        state: &mut IdwtState,
        plane_out: &mut [i32],
    ) {
        let comp = &self.pi.components[c];
        let wc = comp.width as usize;
        let hc = comp.height;
        let fq = self.fq;
        let comp_prec_num = div_round_up(hc, comp.precinct_height.max(1));
        if p >= comp_prec_num {
            return;
        }
        let levels = comp.decom_h;

        let src = BandSource {
            arena: &self.ring[(p % 3) as usize].coeff[c],
            offsets: &self.pi_enc.coeff_offset[c],
            widths: &self.pi_enc.band_widths[c],
        };
        let prev = (p > 0).then(|| BandSource {
            arena: &self.ring[((p + 2) % 3) as usize].coeff[c],
            offsets: &self.pi_enc.coeff_offset[c],
            widths: &self.pi_enc.band_widths[c],
        });
        let prev2 = (p > 1).then(|| BandSource {
            arena: &self.ring[((p + 1) % 3) as usize].coeff[c],
            offsets: &self.pi_enc.coeff_offset[c],
            widths: &self.pi_enc.band_widths[c],
        });

        let mut store = |row: u32, data: &[i32]| {
            let y = row as usize;
            plane_out[y * wc..(y + 1) * wc].copy_from_slice(&data[..wc]);
        };

        match state {
            IdwtState::V0 => {
                let shape = self.pi.shape_for(p);
                let lines = self.pi.band_info(shape, c, 0).height;
                let line_idx = p * comp.precinct_height;
                for l in 0..lines {
                    if line_idx + l >= hc {
                        break;
                    }
                    let mut row = vec![0i32; wc];
                    idwt::inv_transform_v0(&src, levels, l as usize, &mut row, fq);
                    store(line_idx + l, &row);
                }
            }
            IdwtState::V1(v1) => {
                if first_of_slice && p > 0 {
                    idwt::inv_transform_v1_recalc(
                        v1,
                        prev2.as_ref(),
                        prev.as_ref().expect("previous precinct in ring"),
                        p,
                        wc,
                        levels,
                        fq,
                    );
                }
                for (row, data) in
                    idwt::inv_transform_v1_precinct(v1, &src, p, comp_prec_num, hc, wc, levels, fq)
                {
                    store(row, &data);
                }
            }
            IdwtState::V2(v2) => {
                if first_of_slice && p > 0 {
                    idwt::inv_transform_v2_recalc(
                        v2,
                        prev2.as_ref(),
                        prev.as_ref().expect("previous precinct in ring"),
                        p,
                        wc,
                        levels,
                        fq,
                    );
                }
                for (row, data) in idwt::inv_transform_v2_precinct(
                    v2,
                    prev.as_ref(),
                    &src,
                    p,
                    comp_prec_num,
                    hc,
                    wc,
                    levels,
                    fq,
                ) {
                    store(row, &data);
                }
            }
        }
    }

}

fn ring_cur_prev(
    ring: &mut [PrecinctDec],
    cur: usize,
    prev: Option<usize>,
) -> (&mut PrecinctDec, Option<&PrecinctDec>) {
    match prev {
        None => (&mut ring[cur], None),
        Some(p) if p < cur => {
            let (a, b) = ring.split_at_mut(cur);
            (&mut b[0], Some(&a[p]))
        }
        Some(p) => {
            let (a, b) = ring.split_at_mut(p);
            (&mut a[cur], Some(&b[0]))
        }
    }
}
