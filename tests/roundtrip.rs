//! End-to-end encode/decode scenarios.

use jpegxs_rs::config::{EncoderConfig, QuantType, RateMode, SignHandling};
use jpegxs_rs::image::{ImageBuffer, Plane, SampleBuffer};
use jpegxs_rs::{ColourFormat, DecoderConfig, JxsDecoder, JxsEncoder};

/// Deterministic pseudo-random generator so tests need no RNG dependency.
struct Lcg(u64);

impl Lcg {
    fn next_u16(&mut self) -> u16 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u16
    }
}

fn planar_image_u8(
    format: ColourFormat,
    width: usize,
    height: usize,
    mut fill: impl FnMut(usize, usize) -> u8,
) -> ImageBuffer {
    let dims: Vec<(usize, usize)> = match format {
        ColourFormat::PlanarYuv420 => {
            vec![(width, height), (width / 2, height / 2), (width / 2, height / 2)]
        }
        ColourFormat::PlanarYuv422 => {
            vec![(width, height), (width / 2, height), (width / 2, height)]
        }
        ColourFormat::PlanarYuv444OrRgb => vec![(width, height); 3],
        ColourFormat::Gray => vec![(width, height)],
        _ => panic!("unsupported test format"),
    };
    let planes = dims
        .iter()
        .enumerate()
        .map(|(c, &(w, h))| Plane {
            data: SampleBuffer::U8((0..w * h).map(|i| fill(c, i)).collect()),
            stride: w,
        })
        .collect();
    ImageBuffer {
        planes,
        ready_to_release: false,
    }
}

fn planar_image_u16(
    format: ColourFormat,
    width: usize,
    height: usize,
    mut fill: impl FnMut(usize, usize) -> u16,
) -> ImageBuffer {
    let dims: Vec<(usize, usize)> = match format {
        ColourFormat::PlanarYuv422 => {
            vec![(width, height), (width / 2, height), (width / 2, height)]
        }
        ColourFormat::Gray => vec![(width, height)],
        _ => panic!("unsupported test format"),
    };
    let planes = dims
        .iter()
        .enumerate()
        .map(|(c, &(w, h))| Plane {
            data: SampleBuffer::U16((0..w * h).map(|i| fill(c, i)).collect()),
            stride: w,
        })
        .collect();
    ImageBuffer {
        planes,
        ready_to_release: false,
    }
}

fn psnr(a: &ImageBuffer, b: &ImageBuffer, max_value: f64) -> f64 {
    let mut sum_sq = 0.0f64;
    let mut count = 0usize;
    for (pa, pb) in a.planes.iter().zip(b.planes.iter()) {
        match (&pa.data, &pb.data) {
            (SampleBuffer::U8(da), SampleBuffer::U8(db)) => {
                for (&x, &y) in da.iter().zip(db.iter()) {
                    let d = x as f64 - y as f64;
                    sum_sq += d * d;
                }
                count += da.len();
            }
            (SampleBuffer::U16(da), SampleBuffer::U16(db)) => {
                for (&x, &y) in da.iter().zip(db.iter()) {
                    let d = x as f64 - y as f64;
                    sum_sq += d * d;
                }
                count += da.len();
            }
            _ => panic!("depth mismatch"),
        }
    }
    let mse = sum_sq / count as f64;
    if mse == 0.0 {
        return f64::INFINITY;
    }
    10.0 * (max_value * max_value / mse).log10()
}

#[test]
fn test_yuv420_1080p_grey_cbr_and_exact() {
    // Solid mid-grey 1920x1080 YUV420 at 4.0 bpp: the codestream size is
    // exactly ceil(W*H*bpp/8) and every sample survives untouched.
    let cfg = EncoderConfig {
        width: 1920,
        height: 1080,
        bit_depth: 8,
        format: ColourFormat::PlanarYuv420,
        decomp_h: 5,
        decomp_v: 2,
        slice_height: 16,
        bpp: 4.0,
        ..EncoderConfig::default()
    };
    let mut encoder = JxsEncoder::open(cfg).unwrap();
    let image = planar_image_u8(ColourFormat::PlanarYuv420, 1920, 1080, |_, _| 128);
    let bytes = encoder.encode_frame(&image).unwrap();
    assert_eq!(bytes.len(), 1920 * 1080 * 4 / 8);

    let (mut decoder, config) =
        JxsDecoder::init(0, 9, &DecoderConfig::default(), &bytes).unwrap();
    assert_eq!(config.width, 1920);
    assert_eq!(config.height, 1080);
    assert_eq!(config.components_num, 3);

    let decoded = decoder.decode_frame(&bytes).unwrap();
    for plane in decoded.planes.iter() {
        match &plane.data {
            SampleBuffer::U8(data) => assert!(data.iter().all(|&v| v == 128)),
            _ => panic!("expected 8-bit output"),
        }
    }
}

#[test]
fn test_yuv422_10bit_random_psnr() {
    let cfg = EncoderConfig {
        width: 200,
        height: 200,
        bit_depth: 10,
        format: ColourFormat::PlanarYuv422,
        decomp_h: 5,
        decomp_v: 1,
        slice_height: 200,
        bpp: 12.0,
        ..EncoderConfig::default()
    };
    let mut encoder = JxsEncoder::open(cfg).unwrap();
    // Random-walk content: random but with the spectral shape of natural
    // video, so the PSNR target is meaningful at this rate.
    let mut rng = Lcg(0xBEEF);
    let mut walk = [512i32; 3];
    let image = planar_image_u16(ColourFormat::PlanarYuv422, 200, 200, |c, _| {
        walk[c] = (walk[c] + (rng.next_u16() % 33) as i32 - 16).clamp(0, 1023);
        walk[c] as u16
    });
    let bytes = encoder.encode_frame(&image).unwrap();

    let (mut decoder, _) = JxsDecoder::init(0, 9, &DecoderConfig::default(), &bytes).unwrap();
    let decoded = decoder.decode_frame(&bytes).unwrap();
    let quality = psnr(&image, &decoded, 1023.0);
    assert!(quality >= 40.0, "psnr {:.2} dB below target", quality);
}

#[test]
fn test_yuv444_odd_dimensions_deterministic() {
    // 488x325 with no vertical decomposition: encoding the same frame twice
    // produces bit-identical codestreams, and decode matches itself.
    let cfg = EncoderConfig {
        width: 488,
        height: 325,
        bit_depth: 8,
        format: ColourFormat::PlanarYuv444OrRgb,
        decomp_h: 2,
        decomp_v: 0,
        slice_height: 325,
        bpp: 4.0,
        ..EncoderConfig::default()
    };
    let mut encoder = JxsEncoder::open(cfg).unwrap();
    let mut rng = Lcg(7);
    let image =
        planar_image_u8(ColourFormat::PlanarYuv444OrRgb, 488, 325, |_, _| rng.next_u16() as u8);
    let first = encoder.encode_frame(&image).unwrap();
    let second = encoder.encode_frame(&image).unwrap();
    assert_eq!(first, second);

    let (mut decoder, _) = JxsDecoder::init(0, 9, &DecoderConfig::default(), &first).unwrap();
    let decoded_a = decoder.decode_frame(&first).unwrap();
    let decoded_b = decoder.decode_frame(&second).unwrap();
    for (pa, pb) in decoded_a.planes.iter().zip(decoded_b.planes.iter()) {
        assert_eq!(pa.data, pb.data);
    }
}

#[test]
fn test_gray_high_rate_lossless() {
    // With the budget high enough that every band keeps gtli == 0, the
    // 5/3 pipeline reproduces the input exactly.
    let cfg = EncoderConfig {
        width: 48,
        height: 32,
        bit_depth: 8,
        format: ColourFormat::Gray,
        decomp_h: 2,
        decomp_v: 1,
        slice_height: 8,
        bpp: 24.0,
        ..EncoderConfig::default()
    };
    let mut encoder = JxsEncoder::open(cfg).unwrap();
    let mut rng = Lcg(99);
    let image = planar_image_u8(ColourFormat::Gray, 48, 32, |_, _| rng.next_u16() as u8);
    let bytes = encoder.encode_frame(&image).unwrap();

    let (mut decoder, _) = JxsDecoder::init(0, 9, &DecoderConfig::default(), &bytes).unwrap();
    let decoded = decoder.decode_frame(&bytes).unwrap();
    assert_eq!(image.planes[0].data, decoded.planes[0].data);
}

#[test]
fn test_precinct_rc_with_vpred_and_full_signs() {
    let cfg = EncoderConfig {
        width: 64,
        height: 64,
        bit_depth: 8,
        format: ColourFormat::Gray,
        decomp_h: 3,
        decomp_v: 1,
        slice_height: 16,
        bpp: 12.0,
        rate_mode: RateMode::Precinct,
        vertical_prediction: true,
        sign_handling: SignHandling::Full,
        ..EncoderConfig::default()
    };
    let mut encoder = JxsEncoder::open(cfg).unwrap();
    let mut rng = Lcg(1234);
    let image = planar_image_u8(ColourFormat::Gray, 64, 64, |_, _| rng.next_u16() as u8);
    let bytes = encoder.encode_frame(&image).unwrap();
    assert_eq!(bytes.len(), 64 * 64 * 12 / 8);

    let (mut decoder, _) = JxsDecoder::init(0, 9, &DecoderConfig::default(), &bytes).unwrap();
    let decoded = decoder.decode_frame(&bytes).unwrap();
    let quality = psnr(&image, &decoded, 255.0);
    assert!(quality >= 25.0, "psnr {:.2} dB below target", quality);
}

#[test]
fn test_fast_signs_and_uniform_quantizer() {
    let cfg = EncoderConfig {
        width: 96,
        height: 48,
        bit_depth: 8,
        format: ColourFormat::PlanarYuv444OrRgb,
        decomp_h: 4,
        decomp_v: 2,
        slice_height: 16,
        bpp: 16.0,
        sign_handling: SignHandling::Fast,
        quant_type: QuantType::Uniform,
        rate_mode: RateMode::Precinct,
        ..EncoderConfig::default()
    };
    let mut encoder = JxsEncoder::open(cfg).unwrap();
    let mut rng = Lcg(4321);
    let image =
        planar_image_u8(ColourFormat::PlanarYuv444OrRgb, 96, 48, |_, _| rng.next_u16() as u8);
    let bytes = encoder.encode_frame(&image).unwrap();

    let (mut decoder, _) = JxsDecoder::init(0, 9, &DecoderConfig::default(), &bytes).unwrap();
    let decoded = decoder.decode_frame(&bytes).unwrap();
    let quality = psnr(&image, &decoded, 255.0);
    assert!(quality >= 20.0, "psnr {:.2} dB below target", quality);
}

#[test]
fn test_rct_roundtrip_smooth_content() {
    let cfg = EncoderConfig {
        width: 64,
        height: 64,
        bit_depth: 8,
        format: ColourFormat::PlanarYuv444OrRgb,
        decomp_h: 3,
        decomp_v: 1,
        slice_height: 16,
        bpp: 32.0,
        colour_transform: 1,
        ..EncoderConfig::default()
    };
    let mut encoder = JxsEncoder::open(cfg).unwrap();
    // Smooth gradient content; with a generous budget the reversible colour
    // transform path reproduces it exactly.
    let image = planar_image_u8(ColourFormat::PlanarYuv444OrRgb, 64, 64, |c, i| {
        ((i / 64 + i % 64) / 2 + c * 10) as u8
    });
    let bytes = encoder.encode_frame(&image).unwrap();

    let (mut decoder, _) = JxsDecoder::init(0, 9, &DecoderConfig::default(), &bytes).unwrap();
    let decoded = decoder.decode_frame(&bytes).unwrap();
    for (pa, pb) in image.planes.iter().zip(decoded.planes.iter()) {
        assert_eq!(pa.data, pb.data);
    }
}

#[test]
fn test_packed_rgb_input() {
    let w = 80usize;
    let h = 40usize;
    let cfg = EncoderConfig {
        width: w as u32,
        height: h as u32,
        bit_depth: 8,
        format: ColourFormat::PackedYuv444OrRgb,
        decomp_h: 3,
        decomp_v: 1,
        slice_height: 8,
        bpp: 8.0,
        ..EncoderConfig::default()
    };
    let mut encoder = JxsEncoder::open(cfg).unwrap();
    // Constant channels keep every high band zero, so the adapter mapping is
    // observable sample for sample.
    let mut interleaved = Vec::with_capacity(w * h * 3);
    for _ in 0..w * h {
        interleaved.push(10u8);
        interleaved.push(200u8);
        interleaved.push(77u8);
    }
    let image = ImageBuffer {
        planes: vec![Plane {
            data: SampleBuffer::U8(interleaved.clone()),
            stride: w * 3,
        }],
        ready_to_release: false,
    };
    let bytes = encoder.encode_frame(&image).unwrap();

    let (mut decoder, _) = JxsDecoder::init(0, 9, &DecoderConfig::default(), &bytes).unwrap();
    let decoded = decoder.decode_frame(&bytes).unwrap();
    // Planar output matches the de-interleaved input exactly at this rate.
    for c in 0..3 {
        match &decoded.planes[c].data {
            SampleBuffer::U8(data) => {
                for i in 0..w * h {
                    assert_eq!(data[i], interleaved[i * 3 + c], "comp {} sample {}", c, i);
                }
            }
            _ => panic!("expected 8-bit output"),
        }
    }
}

#[test]
fn test_frame_queue_api() {
    let cfg = EncoderConfig {
        width: 32,
        height: 16,
        bit_depth: 8,
        format: ColourFormat::Gray,
        decomp_h: 2,
        decomp_v: 1,
        slice_height: 8,
        bpp: 8.0,
        ..EncoderConfig::default()
    };
    let mut encoder = JxsEncoder::open(cfg).unwrap();
    let image = planar_image_u8(ColourFormat::Gray, 32, 16, |_, i| (i % 256) as u8);
    let frame = jpegxs_rs::Frame {
        image,
        user_ctx: 42,
        ..Default::default()
    };
    encoder.send_frame(frame, true).unwrap();
    let done = encoder.get_frame(true).unwrap();
    assert_eq!(done.user_ctx, 42);
    assert!(done.error.is_none());
    assert!(done.bitstream.ready_to_release);
    assert_eq!(done.bitstream.used_size, 32 * 16);
    encoder.close();
}
