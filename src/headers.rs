//! Codestream frame and slice headers.
//!
//! Frame layout: SOC, CAP, PIH, CDT, WGT, optional NLT / CTS / CRG, then one
//! SLH per slice with its precincts, closed by EOC. The picture header splits
//! into a static part (a change forces decoder reinitialization) and a
//! dynamic part (coding switches that may vary between streams).

use crate::config::{NltType, QuantType, SignHandling};
use crate::constants::*;
use crate::error::{JxsError, Result};
use crate::markers::MarkerCode;
use crate::nlt::NltParams;

/// Static picture header; decoders must be reinitialized when any of these
/// fields change between codestreams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureHeaderConst {
    pub profile: u16,
    pub level: u16,
    pub width: u32,
    pub height: u32,
    /// Precinct width selector; 0 selects full-width precincts.
    pub precinct_width: u16,
    pub slice_height: u16,
    pub comps_num: u8,
    pub decom_h: u8,
    pub decom_v: u8,
    pub sd: u8,
    pub cpih: u8,
    pub coeff_group_size: u8,
    pub significance_group_size: u8,
    pub sx: [u32; MAX_COMPONENTS_NUM],
    pub sy: [u32; MAX_COMPONENTS_NUM],
    pub bit_depth: [u8; MAX_COMPONENTS_NUM],
    /// Gain and priority per existing band, in global band order.
    pub gains: Vec<u8>,
    pub priorities: Vec<u8>,
}

/// Dynamic picture header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureHeaderDynamic {
    /// Size of the entire codestream in bytes, SOC through EOC.
    pub lcod: u32,
    pub bw: u8,
    pub fq: u8,
    pub br: u8,
    pub fslc: u8,
    pub ppoc: u8,
    /// Long header enforcement flag.
    pub lh: u8,
    /// Raw-mode selection per packet flag.
    pub rl: u8,
    pub qpih: QuantType,
    pub fs: SignHandling,
    pub rm: u8,
    pub tnlt: NltType,
    pub tnlt_sigma: u8,
    pub tnlt_alpha: u16,
    pub tnlt_t1: u32,
    pub tnlt_t2: u32,
    pub tnlt_e: u8,
    pub cf: u8,
    pub cf_e1: u8,
    pub cf_e2: u8,
    pub xcrg: [u16; MAX_COMPONENTS_NUM],
    pub ycrg: [u16; MAX_COMPONENTS_NUM],
}

impl PictureHeaderDynamic {
    pub fn nlt_params(&self) -> NltParams {
        NltParams {
            tnlt: self.tnlt,
            bw: self.bw,
            sigma: self.tnlt_sigma,
            alpha: self.tnlt_alpha,
            t1: self.tnlt_t1,
            t2: self.tnlt_t2,
            e: self.tnlt_e,
        }
    }
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn push_marker(out: &mut Vec<u8>, marker: MarkerCode) {
    push_u16(out, marker as u16);
}

/// Writes SOC through the last pre-slice marker.
pub fn write_frame_header(out: &mut Vec<u8>, c: &PictureHeaderConst, d: &PictureHeaderDynamic) {
    push_marker(out, MarkerCode::StartOfCodestream);

    push_marker(out, MarkerCode::Capabilities);
    push_u16(out, 4);
    push_u16(out, 0);

    push_marker(out, MarkerCode::PictureHeader);
    push_u16(out, 31);
    push_u32(out, d.lcod);
    push_u16(out, c.profile);
    push_u16(out, c.level);
    push_u32(out, c.width);
    push_u32(out, c.height);
    push_u16(out, c.precinct_width);
    push_u16(out, c.slice_height);
    out.push(c.comps_num);
    out.push(c.coeff_group_size);
    out.push(c.significance_group_size);
    out.push(d.bw);
    out.push((d.fq << 4) | (d.br & 0x0F));
    out.push((d.fslc << 7) | ((d.ppoc & 0x07) << 4) | (c.cpih & 0x0F));
    out.push((c.decom_h << 4) | (c.decom_v & 0x0F));
    out.push(
        (d.lh << 7)
            | ((d.rl & 1) << 6)
            | ((d.qpih as u8 & 0x03) << 4)
            | ((d.fs as u8 & 0x03) << 2)
            | ((d.rm & 1) << 1),
    );
    out.push((c.sd << 4) | (d.tnlt as u8 & 0x0F));

    push_marker(out, MarkerCode::ComponentTable);
    push_u16(out, 2 + 2 * c.comps_num as u16);
    for i in 0..c.comps_num as usize {
        out.push(c.bit_depth[i]);
        out.push(((c.sx[i] as u8) << 4) | (c.sy[i] as u8 & 0x0F));
    }

    push_marker(out, MarkerCode::WeightsTable);
    push_u16(out, 2 + 2 * c.gains.len() as u16);
    for (gain, priority) in c.gains.iter().zip(c.priorities.iter()) {
        out.push(*gain);
        out.push(*priority);
    }

    if d.tnlt != NltType::Linear {
        push_marker(out, MarkerCode::NonLinearity);
        match d.tnlt {
            NltType::Quadratic => {
                push_u16(out, 6);
                out.push(d.tnlt as u8);
                out.push(d.tnlt_sigma);
                push_u16(out, d.tnlt_alpha);
            }
            NltType::Extended => {
                push_u16(out, 12);
                out.push(d.tnlt as u8);
                push_u32(out, d.tnlt_t1);
                push_u32(out, d.tnlt_t2);
                out.push(d.tnlt_e);
            }
            NltType::Linear => unreachable!(),
        }
    }

    if c.cpih == 3 {
        push_marker(out, MarkerCode::ColourTransformSpec);
        push_u16(out, 4);
        out.push(d.cf);
        out.push((d.cf_e1 << 4) | (d.cf_e2 & 0x0F));

        push_marker(out, MarkerCode::ComponentRegistration);
        push_u16(out, 2 + 4 * c.comps_num as u16);
        for i in 0..c.comps_num as usize {
            push_u16(out, d.xcrg[i]);
            push_u16(out, d.ycrg[i]);
        }
    }
}

pub fn write_slice_header(out: &mut Vec<u8>, slice_idx: u16) {
    push_marker(out, MarkerCode::SliceHeader);
    push_u16(out, 4);
    push_u16(out, slice_idx);
}

pub fn write_eoc(out: &mut Vec<u8>) {
    push_marker(out, MarkerCode::EndOfCodestream);
}

/// Size in bytes of the frame header this configuration will produce.
pub fn frame_header_len(c: &PictureHeaderConst, d: &PictureHeaderDynamic) -> usize {
    let mut len = 2 /* SOC */ + 2 + 4 /* CAP */ + 2 + 31 /* PIH */;
    len += 2 + 2 + 2 * c.comps_num as usize; // CDT
    len += 2 + 2 + 2 * c.gains.len(); // WGT
    match d.tnlt {
        NltType::Linear => {}
        NltType::Quadratic => len += 2 + 6,
        NltType::Extended => len += 2 + 12,
    }
    if c.cpih == 3 {
        len += 2 + 4; // CTS
        len += 2 + 2 + 4 * c.comps_num as usize; // CRG
    }
    len
}

pub const SLICE_HEADER_LEN: usize = 6;
pub const EOC_LEN: usize = 2;

/// Byte-level cursor over a codestream with big-endian helpers.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteReader { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        if self.pos >= self.data.len() {
            return Err(JxsError::DecoderBitstreamTooShort);
        }
        let b = self.data[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(((self.read_u8()? as u16) << 8) | self.read_u8()? as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(((self.read_u16()? as u32) << 16) | self.read_u16()? as u32)
    }

    pub fn peek_marker(&self) -> Result<MarkerCode> {
        if self.pos + 1 >= self.data.len() {
            return Err(JxsError::DecoderBitstreamTooShort);
        }
        let raw = ((self.data[self.pos] as u16) << 8) | self.data[self.pos + 1] as u16;
        MarkerCode::try_from(raw).map_err(|_| JxsError::DecoderInvalidBitstream)
    }

    pub fn read_marker(&mut self) -> Result<MarkerCode> {
        let raw = self.read_u16()?;
        MarkerCode::try_from(raw).map_err(|_| JxsError::DecoderInvalidBitstream)
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        if self.pos + count > self.data.len() {
            return Err(JxsError::DecoderBitstreamTooShort);
        }
        self.pos += count;
        Ok(())
    }
}

/// Everything the decoder learns before the first slice.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedHeaders {
    pub hdr_const: PictureHeaderConst,
    pub hdr_dyn: PictureHeaderDynamic,
    /// Byte offset of the first SLH marker.
    pub first_slice_offset: usize,
}

/// Parses SOC through the last pre-slice marker.
pub fn parse_frame_header(data: &[u8]) -> Result<ParsedHeaders> {
    let mut r = ByteReader::new(data);
    if r.read_marker()? != MarkerCode::StartOfCodestream {
        return Err(JxsError::DecoderInvalidBitstream);
    }

    let mut hdr_const: Option<PictureHeaderConst> = None;
    let mut hdr_dyn: Option<PictureHeaderDynamic> = None;

    loop {
        let marker = r.peek_marker()?;
        if marker == MarkerCode::SliceHeader {
            break;
        }
        r.read_marker()?;
        match marker {
            MarkerCode::Capabilities => {
                let len = r.read_u16()?;
                r.skip(len as usize - 2)?;
            }
            MarkerCode::PictureHeader => {
                let len = r.read_u16()?;
                if len != 31 {
                    return Err(JxsError::DecoderInvalidBitstream);
                }
                let lcod = r.read_u32()?;
                let profile = r.read_u16()?;
                let level = r.read_u16()?;
                let width = r.read_u32()?;
                let height = r.read_u32()?;
                let precinct_width = r.read_u16()?;
                let slice_height = r.read_u16()?;
                let comps_num = r.read_u8()?;
                let coeff_group_size = r.read_u8()?;
                let significance_group_size = r.read_u8()?;
                let bw = r.read_u8()?;
                let fq_br = r.read_u8()?;
                let fslc_ppoc_cpih = r.read_u8()?;
                let dh_dv = r.read_u8()?;
                let flags = r.read_u8()?;
                let sd_tnlt = r.read_u8()?;

                if comps_num == 0 || comps_num as usize > MAX_COMPONENTS_NUM {
                    return Err(JxsError::DecoderInvalidBitstream);
                }
                hdr_const = Some(PictureHeaderConst {
                    profile,
                    level,
                    width,
                    height,
                    precinct_width,
                    slice_height,
                    comps_num,
                    decom_h: dh_dv >> 4,
                    decom_v: dh_dv & 0x0F,
                    sd: sd_tnlt >> 4,
                    cpih: fslc_ppoc_cpih & 0x0F,
                    coeff_group_size,
                    significance_group_size,
                    sx: [1; MAX_COMPONENTS_NUM],
                    sy: [1; MAX_COMPONENTS_NUM],
                    bit_depth: [0; MAX_COMPONENTS_NUM],
                    gains: Vec::new(),
                    priorities: Vec::new(),
                });
                hdr_dyn = Some(PictureHeaderDynamic {
                    lcod,
                    bw,
                    fq: fq_br >> 4,
                    br: fq_br & 0x0F,
                    fslc: fslc_ppoc_cpih >> 7,
                    ppoc: (fslc_ppoc_cpih >> 4) & 0x07,
                    lh: flags >> 7,
                    rl: (flags >> 6) & 1,
                    qpih: QuantType::try_from((flags >> 4) & 0x03)
                        .map_err(|_| JxsError::DecoderInvalidBitstream)?,
                    fs: SignHandling::try_from((flags >> 2) & 0x03)
                        .map_err(|_| JxsError::DecoderInvalidBitstream)?,
                    rm: (flags >> 1) & 1,
                    tnlt: NltType::try_from(sd_tnlt & 0x0F)
                        .map_err(|_| JxsError::DecoderInvalidBitstream)?,
                    tnlt_sigma: 0,
                    tnlt_alpha: 0,
                    tnlt_t1: 0,
                    tnlt_t2: 0,
                    tnlt_e: 0,
                    cf: 0,
                    cf_e1: 0,
                    cf_e2: 0,
                    xcrg: [0; MAX_COMPONENTS_NUM],
                    ycrg: [0; MAX_COMPONENTS_NUM],
                });
            }
            MarkerCode::ComponentTable => {
                let len = r.read_u16()?;
                let c = hdr_const.as_mut().ok_or(JxsError::DecoderInvalidBitstream)?;
                if len != 2 + 2 * c.comps_num as u16 {
                    return Err(JxsError::DecoderInvalidBitstream);
                }
                for i in 0..c.comps_num as usize {
                    c.bit_depth[i] = r.read_u8()?;
                    let sxy = r.read_u8()?;
                    c.sx[i] = (sxy >> 4) as u32;
                    c.sy[i] = (sxy & 0x0F) as u32;
                    if c.sx[i] == 0 || c.sy[i] == 0 || c.bit_depth[i] < 8 || c.bit_depth[i] > 16 {
                        return Err(JxsError::DecoderInvalidBitstream);
                    }
                }
            }
            MarkerCode::WeightsTable => {
                let len = r.read_u16()?;
                let c = hdr_const.as_mut().ok_or(JxsError::DecoderInvalidBitstream)?;
                let entries = (len as usize - 2) / 2;
                for _ in 0..entries {
                    c.gains.push(r.read_u8()?);
                    c.priorities.push(r.read_u8()?);
                }
            }
            MarkerCode::NonLinearity => {
                let _len = r.read_u16()?;
                let d = hdr_dyn.as_mut().ok_or(JxsError::DecoderInvalidBitstream)?;
                let tnlt = NltType::try_from(r.read_u8()?)
                    .map_err(|_| JxsError::DecoderInvalidBitstream)?;
                if tnlt != d.tnlt {
                    return Err(JxsError::DecoderInvalidBitstream);
                }
                match tnlt {
                    NltType::Quadratic => {
                        d.tnlt_sigma = r.read_u8()?;
                        d.tnlt_alpha = r.read_u16()?;
                    }
                    NltType::Extended => {
                        d.tnlt_t1 = r.read_u32()?;
                        d.tnlt_t2 = r.read_u32()?;
                        d.tnlt_e = r.read_u8()?;
                    }
                    NltType::Linear => return Err(JxsError::DecoderInvalidBitstream),
                }
            }
            MarkerCode::ColourTransformSpec => {
                let _len = r.read_u16()?;
                let d = hdr_dyn.as_mut().ok_or(JxsError::DecoderInvalidBitstream)?;
                d.cf = r.read_u8()?;
                let e = r.read_u8()?;
                d.cf_e1 = e >> 4;
                d.cf_e2 = e & 0x0F;
            }
            MarkerCode::ComponentRegistration => {
                let _len = r.read_u16()?;
                let count = {
                    let c = hdr_const.as_ref().ok_or(JxsError::DecoderInvalidBitstream)?;
                    c.comps_num as usize
                };
                let d = hdr_dyn.as_mut().ok_or(JxsError::DecoderInvalidBitstream)?;
                for i in 0..count {
                    d.xcrg[i] = r.read_u16()?;
                    d.ycrg[i] = r.read_u16()?;
                }
            }
            MarkerCode::Extension | MarkerCode::ComponentWavelet => {
                let len = r.read_u16()?;
                r.skip(len as usize - 2)?;
            }
            MarkerCode::EndOfCodestream => return Err(JxsError::DecoderInvalidBitstream),
            MarkerCode::StartOfCodestream | MarkerCode::SliceHeader => {
                return Err(JxsError::DecoderInvalidBitstream)
            }
        }
    }

    let hdr_const = hdr_const.ok_or(JxsError::DecoderInvalidBitstream)?;
    let hdr_dyn = hdr_dyn.ok_or(JxsError::DecoderInvalidBitstream)?;
    // CDT and WGT are mandatory before the first slice.
    if hdr_const.bit_depth[0] == 0 || hdr_const.gains.is_empty() {
        return Err(JxsError::DecoderInvalidBitstream);
    }
    Ok(ParsedHeaders {
        hdr_const,
        hdr_dyn,
        first_slice_offset: r.position(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_headers() -> (PictureHeaderConst, PictureHeaderDynamic) {
        let c = PictureHeaderConst {
            profile: 0,
            level: 0,
            width: 640,
            height: 480,
            precinct_width: 0,
            slice_height: 16,
            comps_num: 3,
            decom_h: 5,
            decom_v: 2,
            sd: 0,
            cpih: 0,
            coeff_group_size: 4,
            significance_group_size: 8,
            sx: [1, 2, 2, 1],
            sy: [1, 2, 2, 1],
            bit_depth: [8, 8, 8, 0],
            gains: vec![3, 2, 2, 1],
            priorities: vec![0, 1, 2, 3],
        };
        let d = PictureHeaderDynamic {
            lcod: 123_456,
            bw: 20,
            fq: 8,
            br: 4,
            fslc: 0,
            ppoc: 0,
            lh: 0,
            rl: 1,
            qpih: QuantType::Deadzone,
            fs: SignHandling::Off,
            rm: 0,
            tnlt: NltType::Linear,
            tnlt_sigma: 0,
            tnlt_alpha: 0,
            tnlt_t1: 0,
            tnlt_t2: 0,
            tnlt_e: 0,
            cf: 0,
            cf_e1: 0,
            cf_e2: 0,
            xcrg: [0; 4],
            ycrg: [0; 4],
        };
        (c, d)
    }

    #[test]
    fn test_frame_header_roundtrip() {
        let (c, d) = sample_headers();
        let mut out = Vec::new();
        write_frame_header(&mut out, &c, &d);
        assert_eq!(out.len(), frame_header_len(&c, &d));
        write_slice_header(&mut out, 0);

        let parsed = parse_frame_header(&out).unwrap();
        assert_eq!(parsed.hdr_const, c);
        assert_eq!(parsed.hdr_dyn, d);
        assert_eq!(parsed.first_slice_offset, frame_header_len(&c, &d));
    }

    #[test]
    fn test_truncated_header_reports_short() {
        let (c, d) = sample_headers();
        let mut out = Vec::new();
        write_frame_header(&mut out, &c, &d);
        // Without a following SLH the peek walks off the end.
        let result = parse_frame_header(&out[..out.len() - 3]);
        assert_eq!(result, Err(JxsError::DecoderBitstreamTooShort));
    }

    #[test]
    fn test_missing_soc_is_invalid() {
        let data = [0u8; 16];
        assert_eq!(
            parse_frame_header(&data),
            Err(JxsError::DecoderInvalidBitstream)
        );
    }
}
