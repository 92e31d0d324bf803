/*!
# jpegxs-rs

`jpegxs-rs` is a pure Rust implementation of the JPEG XS (ISO/IEC 21122)
low-latency intra-frame codec core: the image-to-codestream encoder and the
symmetric codestream-to-image decoder.

## Features

- **Picture information**: the geometric decomposition model relating
  components, wavelet bands, precincts and packets.
- **Wavelet transform**: the reversible 5/3 lifting transform in streaming
  per-precinct schedules (0, 1 or 2 vertical decompositions, 1-5 horizontal),
  with slice-restart helpers that keep slices bit-exact.
- **Rate control**: per-precinct or per-slice search for the quantization and
  refinement that fit an exact byte budget, with cached coding-method costs.
- **Entropy layer**: bit-exact packet framing with RAW / VLC GCLI coding,
  significance flags, vertical prediction and three sign-handling strategies.
- **Colour**: reversible RCT for RGB and the Star-Tetrix transform for Bayer
  CFA data; linear, quadratic and extended non-linear transfer functions.
- **Proxy decoding**: half and quarter resolution output straight from the
  codestream.

## Safety

This library is written in pure Rust with no `unsafe` code.
*/

pub mod binary_search;
pub mod bitio;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod dwt;
pub mod encoder;
pub mod error;
pub mod headers;
pub mod idwt;
pub mod image;
pub mod markers;
pub mod mct;
pub mod nlt;
pub mod packer;
pub mod pi;
pub mod pipeline;
pub mod precinct;
pub mod quant;
pub mod rate_control;
pub mod unpacker;
pub mod weight_table;

pub use config::{DecoderConfig, EncoderConfig, ProxyMode};
pub use decoder::JxsDecoder;
pub use encoder::JxsEncoder;
pub use error::{JxsError, Result};
pub use image::{BitstreamBuffer, ColourFormat, Frame, ImageBuffer, ImageConfig, Plane, SampleBuffer};
