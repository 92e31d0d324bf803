//! Decoder probe, proxy and failure-path scenarios.

use jpegxs_rs::config::ProxyMode;
use jpegxs_rs::image::{ImageBuffer, Plane, SampleBuffer};
use jpegxs_rs::{ColourFormat, DecoderConfig, EncoderConfig, JxsDecoder, JxsEncoder, JxsError};

fn encode_grey_1080p() -> Vec<u8> {
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
    let planes = vec![
        Plane {
            data: SampleBuffer::U8(vec![128; 1920 * 1080]),
            stride: 1920,
        },
        Plane {
            data: SampleBuffer::U8(vec![128; 960 * 540]),
            stride: 960,
        },
        Plane {
            data: SampleBuffer::U8(vec![128; 960 * 540]),
            stride: 960,
        },
    ];
    let image = ImageBuffer {
        planes,
        ready_to_release: false,
    };
    encoder.encode_frame(&image).unwrap()
}

fn encode_small(width: u32) -> Vec<u8> {
    let cfg = EncoderConfig {
        width,
        height: 64,
        bit_depth: 8,
        format: ColourFormat::Gray,
        decomp_h: 3,
        decomp_v: 1,
        slice_height: 16,
        bpp: 6.0,
        ..EncoderConfig::default()
    };
    let mut encoder = JxsEncoder::open(cfg).unwrap();
    let image = ImageBuffer {
        planes: vec![Plane {
            data: SampleBuffer::U8(vec![100; (width * 64) as usize]),
            stride: width as usize,
        }],
        ready_to_release: false,
    };
    encoder.encode_frame(&image).unwrap()
}

#[test]
fn test_proxy_half_reports_reduced_config() {
    let bytes = encode_grey_1080p();
    let cfg = DecoderConfig {
        proxy_mode: ProxyMode::Half,
        ..DecoderConfig::default()
    };
    let (_, config) = JxsDecoder::init(0, 9, &cfg, &bytes).unwrap();
    assert_eq!(config.width, 960);
    assert_eq!(config.height, 540);
    assert_eq!(config.components_num, 3);
    assert_eq!(config.components[0].width, 960);
    assert_eq!(config.components[0].height, 540);
    assert_eq!(config.components[1].width, 480);
}

#[test]
fn test_proxy_half_decodes_grey() {
    let bytes = encode_grey_1080p();
    let cfg = DecoderConfig {
        proxy_mode: ProxyMode::Half,
        ..DecoderConfig::default()
    };
    let (mut decoder, _) = JxsDecoder::init(0, 9, &cfg, &bytes).unwrap();
    let decoded = decoder.decode_frame(&bytes).unwrap();
    assert_eq!(decoded.planes.len(), 3);
    match &decoded.planes[0].data {
        SampleBuffer::U8(data) => {
            assert_eq!(data.len(), 960 * 540);
            assert!(data.iter().all(|&v| v == 128));
        }
        _ => panic!("expected 8-bit output"),
    }
}

#[test]
fn test_proxy_quarter_config() {
    let bytes = encode_grey_1080p();
    let cfg = DecoderConfig {
        proxy_mode: ProxyMode::Quarter,
        ..DecoderConfig::default()
    };
    let (_, config) = JxsDecoder::init(0, 9, &cfg, &bytes).unwrap();
    assert_eq!(config.width, 480);
    assert_eq!(config.height, 270);
}

#[test]
fn test_truncated_bitstream_reports_too_short() {
    let bytes = encode_small(64);
    let (mut decoder, _) = JxsDecoder::init(0, 9, &DecoderConfig::default(), &bytes).unwrap();
    let result = decoder.decode_frame(&bytes[..bytes.len() - 1]);
    assert_eq!(result.unwrap_err(), JxsError::DecoderBitstreamTooShort);
    // The decoder survives the failure and decodes the full stream after.
    let decoded = decoder.decode_frame(&bytes).unwrap();
    assert_eq!(decoded.planes.len(), 1);
}

#[test]
fn test_config_change_between_streams() {
    let first = encode_small(64);
    let second = encode_small(80);
    let (mut decoder, _) = JxsDecoder::init(0, 9, &DecoderConfig::default(), &first).unwrap();
    decoder.decode_frame(&first).unwrap();
    assert_eq!(
        decoder.decode_frame(&second).unwrap_err(),
        JxsError::DecoderConfigChange
    );
}

#[test]
fn test_invalid_api_version() {
    let bytes = encode_small(64);
    assert_eq!(
        JxsDecoder::init(1, 0, &DecoderConfig::default(), &bytes).unwrap_err(),
        JxsError::InvalidApiVersion
    );
}

#[test]
fn test_garbage_is_invalid_bitstream() {
    let garbage = vec![0xAB; 256];
    assert_eq!(
        JxsDecoder::init(0, 9, &DecoderConfig::default(), &garbage).unwrap_err(),
        JxsError::DecoderInvalidBitstream
    );
}

#[test]
fn test_decoder_frame_queue_reports_error_on_frame() {
    let bytes = encode_small(64);
    let (mut decoder, _) = JxsDecoder::init(0, 9, &DecoderConfig::default(), &bytes).unwrap();
    let frame = jpegxs_rs::Frame {
        bitstream: jpegxs_rs::BitstreamBuffer {
            buffer: bytes[..bytes.len() / 2].to_vec(),
            used_size: bytes.len() / 2,
            ..Default::default()
        },
        ..Default::default()
    };
    decoder.send_frame(frame, true).unwrap();
    let out = decoder.get_frame(true).unwrap();
    assert_eq!(out.error, Some(JxsError::DecoderBitstreamTooShort));
    assert!(out.bitstream.ready_to_release);
    decoder.close();
}
