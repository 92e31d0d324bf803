//! Encoder and decoder configuration.

use num_enum::TryFromPrimitive;

use crate::constants::{MAX_DECOMP_H_NUM, MAX_DECOMP_V_NUM};
use crate::error::{JxsError, Result};
use crate::image::ColourFormat;

/// CPU capability bitmask; implementations always ship the scalar level.
pub type CpuFlags = u64;

pub const CPU_FLAGS_C: CpuFlags = 0;
pub const CPU_FLAGS_MMX: CpuFlags = 1 << 0;
pub const CPU_FLAGS_SSE: CpuFlags = 1 << 1;
pub const CPU_FLAGS_SSE2: CpuFlags = 1 << 2;
pub const CPU_FLAGS_SSE3: CpuFlags = 1 << 3;
pub const CPU_FLAGS_SSSE3: CpuFlags = 1 << 4;
pub const CPU_FLAGS_SSE4_1: CpuFlags = 1 << 5;
pub const CPU_FLAGS_SSE4_2: CpuFlags = 1 << 6;
pub const CPU_FLAGS_AVX: CpuFlags = 1 << 7;
pub const CPU_FLAGS_AVX2: CpuFlags = 1 << 8;
pub const CPU_FLAGS_AVX512F: CpuFlags = 1 << 9;
pub const CPU_FLAGS_ALL: CpuFlags = (CPU_FLAGS_AVX512F << 1) - 1;

/// Orchestration mode of the encoder pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuProfile {
    /// A single thread walks precincts; DWT runs inline.
    #[default]
    LowLatency,
    /// DWT is offloaded per component to worker threads; the orchestrator
    /// joins them before GCLI / rate control / packing.
    CpuThroughput,
}

/// Inverse quantizer type (`Qpih`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum QuantType {
    #[default]
    Deadzone = 0,
    Uniform = 1,
}

/// Sign handling strategy (`Fs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum SignHandling {
    /// Signs ride inline in the data payload, one bitplane per group.
    #[default]
    Off = 0,
    /// One sign bit per coefficient of every non-zero group, in a separate
    /// payload.
    Fast = 1,
    /// One sign bit per coefficient whose quantized magnitude is non-zero.
    Full = 2,
}

/// Non-linearity type (`Tnlt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum NltType {
    #[default]
    Linear = 0,
    Quadratic = 1,
    Extended = 2,
}

/// Rate-control granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateMode {
    /// One `(Q, R)` search per precinct; required for vertical prediction
    /// and full sign handling.
    Precinct,
    /// One `(Q, R)` pair per slice against the pooled byte budget.
    #[default]
    Slice,
}

/// Resolution requested from the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum ProxyMode {
    #[default]
    Full = 0,
    Half = 1,
    Quarter = 2,
}

#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub format: ColourFormat,
    /// Horizontal decomposition levels (1..=5).
    pub decomp_h: u32,
    /// Vertical decomposition levels (0..=2).
    pub decomp_v: u32,
    /// Number of trailing components with suppressed decomposition (Sd).
    pub suppressed_decomp: u32,
    pub slice_height: u32,
    /// Target bits per pixel of the reference frame grid.
    pub bpp: f64,
    pub quant_type: QuantType,
    pub sign_handling: SignHandling,
    pub vertical_prediction: bool,
    pub significance: bool,
    /// Run mode flag (`Rm`): significance prediction compares against the
    /// trimmed zero level instead of the top line.
    pub run_mode: bool,
    pub rate_mode: RateMode,
    pub cpu_profile: CpuProfile,
    pub cpu_flags: CpuFlags,
    /// Nominal wavelet coefficient precision (Bw).
    pub coeff_bits: u8,
    /// Fractional bits of the wavelet coefficients (Fq).
    pub fraction_bits: u8,
    pub colour_transform: u8,
    pub input_queue_size: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            width: 0,
            height: 0,
            bit_depth: 8,
            format: ColourFormat::Invalid,
            decomp_h: 5,
            decomp_v: 2,
            suppressed_decomp: 0,
            slice_height: 16,
            bpp: 3.0,
            quant_type: QuantType::Deadzone,
            sign_handling: SignHandling::Off,
            vertical_prediction: false,
            significance: true,
            run_mode: false,
            rate_mode: RateMode::Slice,
            cpu_profile: CpuProfile::LowLatency,
            cpu_flags: CPU_FLAGS_ALL,
            coeff_bits: 20,
            fraction_bits: 8,
            colour_transform: 0,
            input_queue_size: 8,
        }
    }
}

impl EncoderConfig {
    /// Parameter validation performed at `open`; nothing is allocated when
    /// this fails.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(JxsError::BadParameter);
        }
        if self.bit_depth < 8 || self.bit_depth > 16 {
            return Err(JxsError::BadParameter);
        }
        if self.decomp_h < 1 || self.decomp_h > MAX_DECOMP_H_NUM {
            return Err(JxsError::BadParameter);
        }
        if self.decomp_v > MAX_DECOMP_V_NUM || self.decomp_v > self.decomp_h {
            return Err(JxsError::BadParameter);
        }
        if self.slice_height == 0 {
            return Err(JxsError::BadParameter);
        }
        if self.bpp <= 0.0 {
            return Err(JxsError::BadParameter);
        }
        if self.coeff_bits < self.bit_depth || self.coeff_bits > 24 {
            return Err(JxsError::BadParameter);
        }
        if self.fraction_bits == 0 || self.fraction_bits > 8 {
            return Err(JxsError::BadParameter);
        }
        if self.rate_mode == RateMode::Slice
            && (self.vertical_prediction || self.sign_handling == SignHandling::Full)
        {
            // The pooled slice search skips both features.
            return Err(JxsError::BadParameter);
        }
        if self.colour_transform != 0 && self.colour_transform != 1 && self.colour_transform != 3 {
            return Err(JxsError::BadParameter);
        }
        if self.colour_transform == 1 && self.format != ColourFormat::PlanarYuv444OrRgb {
            return Err(JxsError::BadParameter);
        }
        if self.colour_transform == 3 && self.format != ColourFormat::Planar4Components {
            return Err(JxsError::BadParameter);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecoderConfig {
    pub proxy_mode: ProxyMode,
    pub cpu_flags: CpuFlags,
}
