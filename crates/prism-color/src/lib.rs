//! Color-space conversion matrices for YCbCr↔RGB framebuffer content.
//!
//! Matrices operate on *raw code values*: the YCbCr side of a transform is
//! expressed in the format's own sample codes (e.g. 16..235 luma for 8-bit
//! limited range, shifted into the top bits for the 16-bit container
//! formats), and the RGB side in the destination's code range (0..255 for
//! XRGB8888, 0.0..1.0 for the f32 conversion pivot). This lets the pixel
//! converters feed samples straight through [`Mat4::transform`] without a
//! separate normalization pass.

mod matrix;

pub use matrix::{Mat4, Vec4};

use prism_fourcc::Format;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ColorError {
    #[error("format {0} has no defined YCbCr sample geometry")]
    NotYcbcr(Format),
    #[error("format {0} is not a supported RGB matrix endpoint")]
    NotRgb(Format),
}

/// The YCbCr encoding standards exposed through the KMS COLOR_ENCODING
/// plane property.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorEncoding {
    #[default]
    Bt601,
    Bt709,
    Bt2020,
}

impl ColorEncoding {
    /// Luma coefficients (kr, kb); kg is `1 - kr - kb`.
    pub fn kr_kb(self) -> (f32, f32) {
        match self {
            ColorEncoding::Bt601 => (0.299, 0.114),
            ColorEncoding::Bt709 => (0.2126, 0.0722),
            ColorEncoding::Bt2020 => (0.2627, 0.0593),
        }
    }

    /// The kernel's enum value string for the COLOR_ENCODING property.
    pub fn prop_value_name(self) -> &'static str {
        match self {
            ColorEncoding::Bt601 => "ITU-R BT.601 YCbCr",
            ColorEncoding::Bt709 => "ITU-R BT.709 YCbCr",
            ColorEncoding::Bt2020 => "ITU-R BT.2020 YCbCr",
        }
    }
}

/// Quantization range, as exposed through the COLOR_RANGE plane property.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorRange {
    #[default]
    Limited,
    Full,
}

impl ColorRange {
    pub fn prop_value_name(self) -> &'static str {
        match self {
            ColorRange::Limited => "YCbCr limited range",
            ColorRange::Full => "YCbCr full range",
        }
    }
}

/// Code-value geometry of one format's samples.
struct SampleGeometry {
    /// Largest representable code ("white" for full-range luma).
    max: f32,
    /// Black luma code in limited range.
    y_offset: f32,
    /// Luma code span in limited range (white - black).
    y_range: f32,
    /// Zero-chroma code (mid-tread).
    c_offset: f32,
    /// Full chroma excursion code span in limited range.
    c_range: f32,
}

/// Sample geometry by bit depth. The 16-bit container formats (P01x, Y21x,
/// Y41x, XV36/XV48) store narrower samples in the top bits of a 16-bit
/// word, which is exactly a depth-16 code space.
fn ycbcr_geometry(format: Format) -> Result<SampleGeometry, ColorError> {
    let bits: u32 = match format {
        Format::XYUV8888
        | Format::YUYV
        | Format::YVYU
        | Format::UYVY
        | Format::VYUY
        | Format::NV12
        | Format::NV21
        | Format::NV16
        | Format::NV61
        | Format::YUV420
        | Format::YVU420
        | Format::YUV422
        | Format::YVU422 => 8,
        Format::Y410 | Format::XVYU2101010 => 10,
        Format::Y210
        | Format::Y212
        | Format::Y216
        | Format::Y412
        | Format::Y416
        | Format::XVYU12_16161616
        | Format::XVYU16161616
        | Format::P010
        | Format::P012
        | Format::P016 => 16,
        _ => return Err(ColorError::NotYcbcr(format)),
    };

    let unit = (1u32 << (bits - 8)) as f32;
    Ok(SampleGeometry {
        max: ((1u64 << bits) - 1) as f32,
        y_offset: 16.0 * unit,
        y_range: 219.0 * unit,
        c_offset: 128.0 * unit,
        c_range: 224.0 * unit,
    })
}

/// Code scale of the RGB end of a transform. RGB content is always
/// full-range here.
fn rgb_scale(format: Format) -> Result<f32, ColorError> {
    match format {
        Format::XRGB8888 | Format::ARGB8888 | Format::XBGR8888 | Format::ABGR8888 => Ok(255.0),
        Format::F32X4 => Ok(1.0),
        other => Err(ColorError::NotRgb(other)),
    }
}

/// Y'CbCr decode matrix: transforms `(Y, Cb, Cr, 1)` raw codes of
/// `src_yuv` into `(R, G, B, _)` codes of `dst_rgb`.
pub fn ycbcr_to_rgb_matrix(
    src_yuv: Format,
    dst_rgb: Format,
    encoding: ColorEncoding,
    range: ColorRange,
) -> Result<Mat4, ColorError> {
    let geom = ycbcr_geometry(src_yuv)?;
    let out_scale = rgb_scale(dst_rgb)?;
    let (kr, kb) = encoding.kr_kb();
    let kg = 1.0 - kr - kb;

    let (y_offset, y_range, c_range) = match range {
        ColorRange::Limited => (geom.y_offset, geom.y_range, geom.c_range),
        ColorRange::Full => (0.0, geom.max, geom.max),
    };

    // Normalize codes: y' in [0,1], cb'/cr' in [-0.5, 0.5].
    let center = Mat4::translate(-y_offset, -geom.c_offset, -geom.c_offset);
    let normalize = Mat4::scale(1.0 / y_range, 1.0 / c_range, 1.0 / c_range);

    let decode = Mat4::from_rows([
        [1.0, 0.0, 2.0 * (1.0 - kr), 0.0],
        [
            1.0,
            -2.0 * kb * (1.0 - kb) / kg,
            -2.0 * kr * (1.0 - kr) / kg,
            0.0,
        ],
        [1.0, 2.0 * (1.0 - kb), 0.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    let out = Mat4::scale(out_scale, out_scale, out_scale);

    Ok(out.multiply(&decode).multiply(&normalize).multiply(&center))
}

/// Y'CbCr encode matrix: transforms `(R, G, B, 1)` codes of `src_rgb` into
/// `(Y, Cb, Cr, _)` raw codes of `dst_yuv`.
pub fn rgb_to_ycbcr_matrix(
    src_rgb: Format,
    dst_yuv: Format,
    encoding: ColorEncoding,
    range: ColorRange,
) -> Result<Mat4, ColorError> {
    let geom = ycbcr_geometry(dst_yuv)?;
    let in_scale = rgb_scale(src_rgb)?;
    let (kr, kb) = encoding.kr_kb();
    let kg = 1.0 - kr - kb;

    let (y_offset, y_range, c_range) = match range {
        ColorRange::Limited => (geom.y_offset, geom.y_range, geom.c_range),
        ColorRange::Full => (0.0, geom.max, geom.max),
    };

    let normalize = Mat4::scale(1.0 / in_scale, 1.0 / in_scale, 1.0 / in_scale);

    let encode = Mat4::from_rows([
        [kr, kg, kb, 0.0],
        [
            -kr / (2.0 * (1.0 - kb)),
            -kg / (2.0 * (1.0 - kb)),
            0.5,
            0.0,
        ],
        [
            0.5,
            -kg / (2.0 * (1.0 - kr)),
            -kb / (2.0 * (1.0 - kr)),
            0.0,
        ],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    let denormalize = Mat4::scale(y_range, c_range, c_range);
    let recenter = Mat4::translate(y_offset, geom.c_offset, geom.c_offset);

    Ok(recenter
        .multiply(&denormalize)
        .multiply(&encode)
        .multiply(&normalize))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_of(m: &Mat4, y: f32, cb: f32, cr: f32) -> [f32; 3] {
        let v = m.transform(&Vec4::new(y, cb, cr, 1.0));
        [v.d[0], v.d[1], v.d[2]]
    }

    fn assert_near(got: [f32; 3], want: [f32; 3], tol: f32) {
        for i in 0..3 {
            assert!(
                (got[i] - want[i]).abs() <= tol,
                "channel {i}: got {got:?}, want {want:?}"
            );
        }
    }

    #[test]
    fn bt601_limited_8bit_reference_points() {
        let m = ycbcr_to_rgb_matrix(
            Format::NV12,
            Format::XRGB8888,
            ColorEncoding::Bt601,
            ColorRange::Limited,
        )
        .unwrap();

        assert_near(rgb_of(&m, 16.0, 128.0, 128.0), [0.0, 0.0, 0.0], 1e-3);
        assert_near(rgb_of(&m, 235.0, 128.0, 128.0), [255.0, 255.0, 255.0], 1e-3);
        // 50% gray sits mid-scale.
        assert_near(
            rgb_of(&m, 16.0 + 219.0 / 2.0, 128.0, 128.0),
            [127.5, 127.5, 127.5],
            1e-3,
        );
        // Saturated red: Y=81.4, Cb=90.2, Cr=240.
        assert_near(rgb_of(&m, 81.4, 90.2, 240.0), [255.0, 0.0, 0.0], 1.0);
    }

    #[test]
    fn bt601_full_8bit_uses_whole_code_space() {
        let m = ycbcr_to_rgb_matrix(
            Format::NV12,
            Format::XRGB8888,
            ColorEncoding::Bt601,
            ColorRange::Full,
        )
        .unwrap();

        assert_near(rgb_of(&m, 0.0, 128.0, 128.0), [0.0, 0.0, 0.0], 1e-3);
        assert_near(rgb_of(&m, 255.0, 128.0, 128.0), [255.0, 255.0, 255.0], 1e-3);
    }

    #[test]
    fn sixteen_bit_container_black_and_white() {
        // P010 stores 10-bit samples in the top bits: limited-range black is
        // 64 << 6 = 4096, white (940 << 6) = 60160.
        let m = ycbcr_to_rgb_matrix(
            Format::P010,
            Format::XRGB8888,
            ColorEncoding::Bt709,
            ColorRange::Limited,
        )
        .unwrap();

        assert_near(rgb_of(&m, 4096.0, 32768.0, 32768.0), [0.0, 0.0, 0.0], 1e-2);
        assert_near(
            rgb_of(&m, 60160.0, 32768.0, 32768.0),
            [255.0, 255.0, 255.0],
            1e-2,
        );
    }

    #[test]
    fn ten_bit_packed_geometry() {
        let m = ycbcr_to_rgb_matrix(
            Format::Y410,
            Format::F32X4,
            ColorEncoding::Bt2020,
            ColorRange::Limited,
        )
        .unwrap();

        assert_near(rgb_of(&m, 64.0, 512.0, 512.0), [0.0, 0.0, 0.0], 1e-4);
        assert_near(rgb_of(&m, 940.0, 512.0, 512.0), [1.0, 1.0, 1.0], 1e-4);
    }

    #[test]
    fn encode_decode_compose_to_identity() {
        for encoding in [
            ColorEncoding::Bt601,
            ColorEncoding::Bt709,
            ColorEncoding::Bt2020,
        ] {
            for range in [ColorRange::Limited, ColorRange::Full] {
                let enc =
                    rgb_to_ycbcr_matrix(Format::XRGB8888, Format::NV12, encoding, range).unwrap();
                let dec =
                    ycbcr_to_rgb_matrix(Format::NV12, Format::XRGB8888, encoding, range).unwrap();
                let id = dec.multiply(&enc);

                for (r, g, b) in [(255.0, 0.0, 0.0), (12.0, 200.0, 99.0), (255.0, 255.0, 255.0)] {
                    let v = id.transform(&Vec4::new(r, g, b, 1.0));
                    assert_near([v.d[0], v.d[1], v.d[2]], [r, g, b], 1e-2);
                }
            }
        }
    }

    #[test]
    fn encode_reference_points() {
        let m = rgb_to_ycbcr_matrix(
            Format::XRGB8888,
            Format::NV12,
            ColorEncoding::Bt601,
            ColorRange::Limited,
        )
        .unwrap();

        let v = m.transform(&Vec4::new(255.0, 255.0, 255.0, 1.0));
        assert_near([v.d[0], v.d[1], v.d[2]], [235.0, 128.0, 128.0], 1e-3);

        let v = m.transform(&Vec4::new(0.0, 0.0, 0.0, 1.0));
        assert_near([v.d[0], v.d[1], v.d[2]], [16.0, 128.0, 128.0], 1e-3);
    }

    #[test]
    fn rejects_non_ycbcr_and_non_rgb_endpoints() {
        assert_eq!(
            ycbcr_to_rgb_matrix(
                Format::XRGB8888,
                Format::XRGB8888,
                ColorEncoding::Bt601,
                ColorRange::Limited
            ),
            Err(ColorError::NotYcbcr(Format::XRGB8888))
        );
        assert_eq!(
            ycbcr_to_rgb_matrix(
                Format::NV12,
                Format::RGB565,
                ColorEncoding::Bt601,
                ColorRange::Limited
            ),
            Err(ColorError::NotRgb(Format::RGB565))
        );
    }

    #[test]
    fn property_strings_match_kernel_enums() {
        assert_eq!(ColorEncoding::Bt601.prop_value_name(), "ITU-R BT.601 YCbCr");
        assert_eq!(ColorRange::Full.prop_value_name(), "YCbCr full range");
        assert_eq!(ColorEncoding::default(), ColorEncoding::Bt601);
        assert_eq!(ColorRange::default(), ColorRange::Limited);
    }
}
