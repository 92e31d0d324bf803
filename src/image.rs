//! Image and bitstream buffer structures exchanged with the library user.

use num_enum::TryFromPrimitive;

use crate::constants::MAX_COMPONENTS_NUM;
use crate::error::{JxsError, Result};

/// Chroma / component layout of the input image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ColourFormat {
    Invalid = 0,
    PlanarYuv400 = 1,
    /// planar: yuv420p, yuv420p10le etc.
    PlanarYuv420 = 2,
    /// planar: yuv422p, yuv422p10le etc.
    PlanarYuv422 = 3,
    /// planar: yuv444p, rgbp, gbrp, yuv444p10le, gbrp10le etc.
    PlanarYuv444OrRgb = 4,
    /// planar 4 components
    Planar4Components = 5,
    Gray = 6,
    /// packed rgb/bgr, 8:8:8, 24bpp, RGBRGB... / BGRBGR...
    PackedYuv444OrRgb = 21,
}

impl ColourFormat {
    pub fn is_packed(self) -> bool {
        matches!(self, ColourFormat::PackedYuv444OrRgb)
    }
}

/// One plane of samples; 8-bit depths use the `U8` variant, deeper ones `U16`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl SampleBuffer {
    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::U8(v) => v.len(),
            SampleBuffer::U16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_size(&self) -> usize {
        match self {
            SampleBuffer::U8(v) => v.len(),
            SampleBuffer::U16(v) => v.len() * 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Plane {
    pub data: SampleBuffer,
    /// Samples per image row; greater than or equal to the plane width.
    pub stride: usize,
}

impl Plane {
    pub fn new_u8(width: usize, height: usize) -> Self {
        Plane {
            data: SampleBuffer::U8(vec![0; width * height]),
            stride: width,
        }
    }

    pub fn new_u16(width: usize, height: usize) -> Self {
        Plane {
            data: SampleBuffer::U16(vec![0; width * height]),
            stride: width,
        }
    }
}

/// Image owned by the user, borrowed by the pipeline between submit and
/// `ready_to_release`.
#[derive(Debug, Clone, Default)]
pub struct ImageBuffer {
    pub planes: Vec<Plane>,
    /// Set by the pipeline once the buffer may be reclaimed by the user.
    pub ready_to_release: bool,
}

impl Default for Plane {
    fn default() -> Self {
        Plane {
            data: SampleBuffer::U8(Vec::new()),
            stride: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BitstreamBuffer {
    pub buffer: Vec<u8>,
    pub used_size: usize,
    pub ready_to_release: bool,
    /// Set by the encoder: this fragment ends the frame.
    pub last_packet_in_frame: bool,
}

/// Input and output container for both directions.
///
/// Encoder: `image` is the input and `bitstream` the output.
/// Decoder: `bitstream` is the input and `image` the output.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub image: ImageBuffer,
    pub bitstream: BitstreamBuffer,
    /// Opaque user context, round-tripped untouched.
    pub user_ctx: u64,
    /// Per-frame error; the frame still flows through the pipeline.
    pub error: Option<JxsError>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComponentConfig {
    pub width: u32,
    pub height: u32,
    pub byte_size: u32,
}

/// Geometry reported by the decoder probe, enough for the user to allocate
/// output images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageConfig {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub format: ColourFormat,
    pub components_num: u8,
    pub components: [ComponentConfig; MAX_COMPONENTS_NUM],
}

impl Default for ImageConfig {
    fn default() -> Self {
        ImageConfig {
            width: 0,
            height: 0,
            bit_depth: 0,
            format: ColourFormat::Invalid,
            components_num: 0,
            components: [ComponentConfig::default(); MAX_COMPONENTS_NUM],
        }
    }
}

impl ImageConfig {
    /// Allocates a planar image matching this configuration.
    pub fn alloc_image(&self) -> Result<ImageBuffer> {
        if self.components_num == 0 || self.components_num as usize > MAX_COMPONENTS_NUM {
            return Err(JxsError::InvalidComponent);
        }
        let mut planes = Vec::with_capacity(self.components_num as usize);
        for c in 0..self.components_num as usize {
            let comp = &self.components[c];
            let plane = if self.bit_depth <= 8 {
                Plane::new_u8(comp.width as usize, comp.height as usize)
            } else {
                Plane::new_u16(comp.width as usize, comp.height as usize)
            };
            planes.push(plane);
        }
        Ok(ImageBuffer {
            planes,
            ready_to_release: false,
        })
    }
}
