//! Pooled per-precinct storage.
//!
//! Coefficients, GCLI and significance buffers live in per-component arenas
//! indexed through the offsets of [`crate::pi::PiEnc`]; the structures are
//! allocated once at open and recycled across precincts and frames.

use num_enum::TryFromPrimitive;

use crate::constants::{RC_BAND_CACHE_SIZE, TRUNCATION_MAX};
use crate::pi::{Pi, PiEnc, PrecinctShape};

/// Per-band coding method, 2 bits in the precinct header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum PackMethod {
    #[default]
    ZeroSignificanceDisable = 0,
    ZeroSignificanceEnable = 1,
    VpredSignificanceDisable = 2,
    VpredSignificanceEnable = 3,
}

impl PackMethod {
    pub fn uses_significance(self) -> bool {
        matches!(
            self,
            PackMethod::ZeroSignificanceEnable | PackMethod::VpredSignificanceEnable
        )
    }

    pub fn uses_vpred(self) -> bool {
        matches!(
            self,
            PackMethod::VpredSignificanceDisable | PackMethod::VpredSignificanceEnable
        )
    }
}

/// Prefix-summed lookup tables of one band line, rebuilt per precinct.
/// Any "sum for gtli >= g" query is O(1) against these.
#[derive(Debug, Clone, Default)]
pub struct RcLineLut {
    /// `gc_count[i]` = number of GCLI groups with value <= i.
    pub gc_count: [u16; 16],
    /// Data bits at a given gtli with the sign bitplane inline.
    pub size_data_no_sign: [u32; 16],
    /// Data bits at a given gtli with signs carried separately.
    pub size_data_sign: [u32; 16],
    /// `sig_max_count[i]` = number of full significance groups whose max
    /// GCLI is <= i.
    pub sig_max_count: [u16; 16],
}

/// Costs cached for one probed gtli of a band.
#[derive(Debug, Clone)]
pub struct BandCacheLine {
    pub data_bits: u32,
    pub gcli_bits: u32,
    pub significance_bits: u32,
    pub signs_bits: u32,
}

#[derive(Debug, Clone)]
pub struct BandCache {
    /// gtli this entry was computed for; `0xFF` marks an empty slot.
    pub gtli: u8,
    pub pack_method: PackMethod,
    pub lines: Vec<BandCacheLine>,
}

impl BandCache {
    fn new(max_lines: usize) -> Self {
        BandCache {
            gtli: u8::MAX,
            pack_method: PackMethod::default(),
            lines: vec![
                BandCacheLine {
                    data_bits: 0,
                    gcli_bits: 0,
                    significance_bits: 0,
                    signs_bits: 0,
                };
                max_lines
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct BandEnc {
    pub gtli: u8,
    pub cache_index: usize,
    pub cache: Vec<BandCache>,
    /// One LUT block per band line in the precinct.
    pub luts: Vec<RcLineLut>,
}

/// Encoder-side precinct: coefficient/GCLI/significance arenas plus the
/// rate-control state of every band.
#[derive(Debug, Clone)]
pub struct PrecinctEnc {
    pub prec_idx: u32,
    pub shape: PrecinctShape,
    /// Per-component coefficient arena, sign-magnitude 16-bit.
    pub coeff: Vec<Vec<u16>>,
    pub gcli: Vec<Vec<u8>>,
    pub significance: Vec<Vec<u8>>,
    pub bands: Vec<Vec<BandEnc>>,

    // Filled by the rate control for the chosen (Q, R).
    pub packet_raw: Vec<bool>,
    pub packet_size_data_bytes: Vec<u32>,
    pub packet_size_signs_bytes: Vec<u32>,
    pub packet_size_gcli_bytes: Vec<u32>,
    pub packet_size_significance_bytes: Vec<u32>,
    pub pack_quantization: u8,
    pub pack_refinement: u8,
    pub pack_padding_bytes: u32,
    pub pack_total_bytes: u32,
    /// The next precinct depends on this one through vertical prediction;
    /// a gtli change here forces its cache to reset.
    pub need_recalculate_next_precinct: bool,
}

impl PrecinctEnc {
    pub fn new(pi: &Pi, pi_enc: &PiEnc) -> Self {
        let comps = pi.comps_num as usize;
        let mut bands = Vec::with_capacity(comps);
        for c in 0..comps {
            let mut comp_bands = Vec::new();
            for b in 0..pi.components[c].bands_num as usize {
                let lines = pi.components[c].bands[b].height_lines_num as usize;
                comp_bands.push(BandEnc {
                    gtli: 0,
                    cache_index: 0,
                    cache: (0..RC_BAND_CACHE_SIZE).map(|_| BandCache::new(lines)).collect(),
                    luts: vec![RcLineLut::default(); lines],
                });
            }
            bands.push(comp_bands);
        }

        let packets = pi.packets_num as usize;
        PrecinctEnc {
            prec_idx: 0,
            shape: PrecinctShape::Normal,
            coeff: (0..comps).map(|c| vec![0u16; pi_enc.coeff_size[c]]).collect(),
            gcli: (0..comps).map(|c| vec![0u8; pi_enc.gcli_size[c]]).collect(),
            significance: (0..comps).map(|c| vec![0u8; pi_enc.sig_size[c]]).collect(),
            bands,
            packet_raw: vec![false; packets],
            packet_size_data_bytes: vec![0; packets],
            packet_size_signs_bytes: vec![0; packets],
            packet_size_gcli_bytes: vec![0; packets],
            packet_size_significance_bytes: vec![0; packets],
            pack_quantization: 0,
            pack_refinement: 0,
            pack_padding_bytes: 0,
            pack_total_bytes: 0,
            need_recalculate_next_precinct: false,
        }
    }

    /// Reuses the pooled buffers for another precinct.
    pub fn reset_for(&mut self, prec_idx: u32, shape: PrecinctShape) {
        self.prec_idx = prec_idx;
        self.shape = shape;
        self.need_recalculate_next_precinct = false;
        for comp in self.bands.iter_mut() {
            for band in comp.iter_mut() {
                band.gtli = 0;
                band.cache_index = 0;
                for entry in band.cache.iter_mut() {
                    entry.gtli = u8::MAX;
                }
            }
        }
    }

    /// Invalidates every cached cost record; required when the previous
    /// precinct's gtli changed or the feature set differs from the probe.
    pub fn reset_cache(&mut self) {
        for comp in self.bands.iter_mut() {
            for band in comp.iter_mut() {
                band.cache_index = 0;
                for entry in band.cache.iter_mut() {
                    entry.gtli = u8::MAX;
                }
            }
        }
    }

    pub fn coeff_line<'a>(&'a self, pi: &Pi, pi_enc: &PiEnc, c: usize, b: usize, line: usize) -> &'a [u16] {
        let w = pi.components[c].bands[b].width as usize;
        let off = pi_enc.coeff_offset[c][b] + line * w;
        &self.coeff[c][off..off + w]
    }

    pub fn gcli_line<'a>(&'a self, pi: &Pi, pi_enc: &PiEnc, c: usize, b: usize, line: usize) -> &'a [u8] {
        let w = pi.band_info(PrecinctShape::Normal, c, b).gcli_width as usize;
        let off = pi_enc.gcli_offset[c][b] + line * w;
        &self.gcli[c][off..off + w]
    }

    pub fn significance_line<'a>(
        &'a self,
        pi: &Pi,
        pi_enc: &PiEnc,
        c: usize,
        b: usize,
        line: usize,
    ) -> &'a [u8] {
        let w = pi.band_info(PrecinctShape::Normal, c, b).significance_width as usize;
        let off = pi_enc.sig_offset[c][b] + line * w;
        &self.significance[c][off..off + w]
    }

    /// Applies `compute_truncation` to every band; true when every band got
    /// completely zeroed (the probed quantization is out of range).
    pub fn compute_truncation(&mut self, pi: &Pi, quantization: u8, refinement: u8) -> bool {
        let mut empty = true;
        for (c, comp) in pi.components.iter().enumerate() {
            for (b, band) in comp.bands.iter().enumerate() {
                let gtli =
                    crate::quant::compute_truncation(band.gain, band.priority, quantization, refinement);
                self.bands[c][b].gtli = gtli;
                if gtli != TRUNCATION_MAX {
                    empty = false;
                }
            }
        }
        empty
    }
}

/// Decoder-side precinct: dequantized signed coefficients plus the decoded
/// GCLI values and truncation levels.
#[derive(Debug, Clone)]
pub struct PrecinctDec {
    pub coeff: Vec<Vec<i16>>,
    pub gcli: Vec<Vec<u8>>,
    pub band_gtli: Vec<Vec<u8>>,
}

impl PrecinctDec {
    pub fn new(pi: &Pi, pi_enc: &PiEnc) -> Self {
        let comps = pi.comps_num as usize;
        PrecinctDec {
            coeff: (0..comps).map(|c| vec![0i16; pi_enc.coeff_size[c]]).collect(),
            gcli: (0..comps).map(|c| vec![0u8; pi_enc.gcli_size[c]]).collect(),
            band_gtli: (0..comps)
                .map(|c| vec![0u8; pi.components[c].bands_num as usize])
                .collect(),
        }
    }

    pub fn clear(&mut self) {
        for arena in self.coeff.iter_mut() {
            arena.fill(0);
        }
        for arena in self.gcli.iter_mut() {
            arena.fill(0);
        }
    }
}
