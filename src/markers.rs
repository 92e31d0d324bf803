//! JPEG XS codestream marker codes (ISO/IEC 21122-1).
//!
//! Markers are two-byte big-endian values; unlike classic JPEG there is no
//! byte stuffing, so they are only recognised at parser-defined positions.

use num_enum::TryFromPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum MarkerCode {
    /// SOC: start of codestream.
    StartOfCodestream = 0xFF10,
    /// EOC: end of codestream.
    EndOfCodestream = 0xFF11,
    /// PIH: picture header.
    PictureHeader = 0xFF12,
    /// CDT: component table (bit depth and sampling per component).
    ComponentTable = 0xFF13,
    /// WGT: weights table (gain and priority per band).
    WeightsTable = 0xFF14,
    /// COM: extension marker.
    Extension = 0xFF15,
    /// NLT: non-linearity marker.
    NonLinearity = 0xFF16,
    /// CWD: component-dependent wavelet decomposition.
    ComponentWavelet = 0xFF17,
    /// CTS: colour transformation specification.
    ColourTransformSpec = 0xFF18,
    /// CRG: component registration.
    ComponentRegistration = 0xFF19,
    /// SLH: slice header.
    SliceHeader = 0xFF20,
    /// CAP: capabilities.
    Capabilities = 0xFF50,
}
