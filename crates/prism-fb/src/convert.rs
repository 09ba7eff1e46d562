//! Software pixel-format conversion.
//!
//! Every conversion runs through a pivot image: tightly packed RGBA with
//! one f32 per channel, full-range, alpha-opaque for X formats. Reading
//! decodes any supported format into the pivot; writing encodes the pivot
//! into any supported format. YCbCr traffic goes through the matrices in
//! `prism-color`, operating on raw code values.
//!
//! Chroma subsampling follows the MPEG2 siting convention: the chroma
//! sample for a block is the average of the two diagonal corner pixels
//! (clamped at odd edges), mirroring what scanout hardware assumes when it
//! upsamples.

use half::f16;
use prism_color::{rgb_to_ycbcr_matrix, ycbcr_to_rgb_matrix, ColorEncoding, ColorRange, Mat4, Vec4};
use prism_fourcc::Format;

use crate::tiling::FbLayout;
use crate::FbError;

/// RGBA pixel of the conversion pivot.
pub type PivotPixel = [f32; 4];

/// Sample placement of a YCbCr format: which plane each component lives
/// in, its byte offset inside one sample group, and the group's byte
/// advance per step.
struct YuvSampling {
    y_plane: usize,
    y_offset: usize,
    /// Bytes per horizontal luma step.
    y_step: usize,
    c_plane: usize,
    u_offset: usize,
    v_offset: usize,
    /// Bytes per horizontal chroma step.
    c_step: usize,
    /// Alpha location, for the formats that carry one.
    a_offset: Option<usize>,
    /// Bytes per sample word (1 for byte formats, 2 for 16-bit).
    word: usize,
}

fn yuv_sampling(format: Format) -> Option<YuvSampling> {
    let s = match format {
        Format::NV12 | Format::NV16 => YuvSampling {
            y_plane: 0,
            y_offset: 0,
            y_step: 1,
            c_plane: 1,
            u_offset: 0,
            v_offset: 1,
            c_step: 2,
            a_offset: None,
            word: 1,
        },
        Format::NV21 | Format::NV61 => YuvSampling {
            y_plane: 0,
            y_offset: 0,
            y_step: 1,
            c_plane: 1,
            u_offset: 1,
            v_offset: 0,
            c_step: 2,
            a_offset: None,
            word: 1,
        },
        Format::YUV420 | Format::YUV422 => YuvSampling {
            y_plane: 0,
            y_offset: 0,
            y_step: 1,
            c_plane: 1, // u in plane 1, v in plane 2; v_plane handled below
            u_offset: 0,
            v_offset: 0,
            c_step: 1,
            a_offset: None,
            word: 1,
        },
        Format::YVU420 | Format::YVU422 => YuvSampling {
            y_plane: 0,
            y_offset: 0,
            y_step: 1,
            c_plane: 1,
            u_offset: 0,
            v_offset: 0,
            c_step: 1,
            a_offset: None,
            word: 1,
        },
        Format::YUYV => YuvSampling {
            y_plane: 0,
            y_offset: 0,
            y_step: 2,
            c_plane: 0,
            u_offset: 1,
            v_offset: 3,
            c_step: 4,
            a_offset: None,
            word: 1,
        },
        Format::YVYU => YuvSampling {
            y_plane: 0,
            y_offset: 0,
            y_step: 2,
            c_plane: 0,
            u_offset: 3,
            v_offset: 1,
            c_step: 4,
            a_offset: None,
            word: 1,
        },
        Format::UYVY => YuvSampling {
            y_plane: 0,
            y_offset: 1,
            y_step: 2,
            c_plane: 0,
            u_offset: 0,
            v_offset: 2,
            c_step: 4,
            a_offset: None,
            word: 1,
        },
        Format::VYUY => YuvSampling {
            y_plane: 0,
            y_offset: 1,
            y_step: 2,
            c_plane: 0,
            u_offset: 2,
            v_offset: 0,
            c_step: 4,
            a_offset: None,
            word: 1,
        },
        Format::XYUV8888 => YuvSampling {
            y_plane: 0,
            y_offset: 1,
            y_step: 4,
            c_plane: 0,
            u_offset: 2,
            v_offset: 3,
            c_step: 4,
            a_offset: None,
            word: 1,
        },
        Format::P010 | Format::P012 | Format::P016 => YuvSampling {
            y_plane: 0,
            y_offset: 0,
            y_step: 2,
            c_plane: 1,
            u_offset: 0,
            v_offset: 2,
            c_step: 4,
            a_offset: None,
            word: 2,
        },
        Format::Y210 | Format::Y212 | Format::Y216 => YuvSampling {
            y_plane: 0,
            y_offset: 0,
            y_step: 4,
            c_plane: 0,
            u_offset: 2,
            v_offset: 6,
            c_step: 8,
            a_offset: None,
            word: 2,
        },
        Format::Y412 | Format::Y416 => YuvSampling {
            y_plane: 0,
            y_offset: 2,
            y_step: 8,
            c_plane: 0,
            u_offset: 0,
            v_offset: 4,
            c_step: 8,
            a_offset: Some(6),
            word: 2,
        },
        Format::XVYU12_16161616 | Format::XVYU16161616 => YuvSampling {
            y_plane: 0,
            y_offset: 2,
            y_step: 8,
            c_plane: 0,
            u_offset: 0,
            v_offset: 4,
            c_step: 8,
            a_offset: None,
            word: 2,
        },
        _ => return None,
    };
    Some(s)
}

/// The three-plane formats put V in its own plane; returns (u_plane,
/// v_plane) with the swap the YVU orderings want.
fn chroma_planes(format: Format) -> (usize, usize) {
    match format {
        Format::YUV420 | Format::YUV422 => (1, 2),
        Format::YVU420 | Format::YVU422 => (2, 1),
        _ => (1, 1),
    }
}

fn read_word(data: &[u8], offset: usize, word: usize) -> f32 {
    match word {
        1 => data[offset] as f32,
        _ => u16::from_le_bytes([data[offset], data[offset + 1]]) as f32,
    }
}

fn write_word(data: &mut [u8], offset: usize, word: usize, value: f32, max: f32) {
    let code = value.clamp(0.0, max) + 0.5;
    match word {
        1 => data[offset] = code as u8,
        _ => data[offset..offset + 2].copy_from_slice(&(code as u16).to_le_bytes()),
    }
}

fn yuv_max_code(format: Format) -> f32 {
    match format {
        Format::Y410 | Format::XVYU2101010 => 1023.0,
        f if f.info().map(|i| i.plane_bpp[0] >= 16 && f.is_yuv()).unwrap_or(false) => {
            match yuv_sampling(f).map(|s| s.word) {
                Some(2) => 65535.0,
                _ => 255.0,
            }
        }
        _ => 255.0,
    }
}

/// Integer RGB channel packing: (shift, bit width) per channel, 0-width
/// meaning absent.
struct RgbPacking {
    bytes: usize,
    r: (u32, u32),
    g: (u32, u32),
    b: (u32, u32),
    a: (u32, u32),
}

fn rgb_packing(format: Format) -> Option<RgbPacking> {
    let p = match format {
        Format::XRGB8888 => RgbPacking { bytes: 4, r: (16, 8), g: (8, 8), b: (0, 8), a: (0, 0) },
        Format::ARGB8888 => RgbPacking { bytes: 4, r: (16, 8), g: (8, 8), b: (0, 8), a: (24, 8) },
        Format::XBGR8888 => RgbPacking { bytes: 4, r: (0, 8), g: (8, 8), b: (16, 8), a: (0, 0) },
        Format::ABGR8888 => RgbPacking { bytes: 4, r: (0, 8), g: (8, 8), b: (16, 8), a: (24, 8) },
        Format::XRGB2101010 => {
            RgbPacking { bytes: 4, r: (20, 10), g: (10, 10), b: (0, 10), a: (0, 0) }
        }
        Format::RGB565 => RgbPacking { bytes: 2, r: (11, 5), g: (5, 6), b: (0, 5), a: (0, 0) },
        Format::BGR565 => RgbPacking { bytes: 2, r: (0, 5), g: (5, 6), b: (11, 5), a: (0, 0) },
        Format::XRGB1555 => RgbPacking { bytes: 2, r: (10, 5), g: (5, 5), b: (0, 5), a: (0, 0) },
        Format::ARGB1555 => RgbPacking { bytes: 2, r: (10, 5), g: (5, 5), b: (0, 5), a: (15, 1) },
        Format::RGB888 => RgbPacking { bytes: 3, r: (16, 8), g: (8, 8), b: (0, 8), a: (0, 0) },
        Format::BGR888 => RgbPacking { bytes: 3, r: (0, 8), g: (8, 8), b: (16, 8), a: (0, 0) },
        _ => return None,
    };
    Some(p)
}

/// fp16 channel order in memory: indices into (R, G, B, A) per memory slot.
fn fp16_swizzle(format: Format) -> [usize; 4] {
    match format {
        // [B, G, R, X] in memory.
        Format::XRGB16161616F | Format::ARGB16161616F => [2, 1, 0, 3],
        // [R, G, B, X] in memory.
        _ => [0, 1, 2, 3],
    }
}

fn check_pivot_len(layout: &FbLayout, pixels: &[PivotPixel]) -> Result<(), FbError> {
    let want = layout.width as usize * layout.height as usize;
    if pixels.len() != want {
        return Err(FbError::PivotSizeMismatch {
            want,
            got: pixels.len(),
        });
    }
    Ok(())
}

/// Decodes a framebuffer's bytes into the RGBA f32 pivot.
pub fn read_to_pivot(
    layout: &FbLayout,
    data: &[u8],
    encoding: ColorEncoding,
    range: ColorRange,
) -> Result<Vec<PivotPixel>, FbError> {
    if (data.len() as u64) < layout.size {
        return Err(FbError::BufferTooSmall {
            want: layout.size,
            got: data.len() as u64,
        });
    }
    let w = layout.width as usize;
    let h = layout.height as usize;
    let mut out = vec![[0.0f32; 4]; w * h];
    let format = layout.format;

    if format == Format::F32X4 {
        for y in 0..h {
            for x in 0..w {
                let off = layout.sample_offset(0, (x * 16) as u32, y as u32)?;
                for (c, slot) in out[y * w + x].iter_mut().enumerate() {
                    *slot = f32::from_le_bytes(
                        data[off + c * 4..off + c * 4 + 4].try_into().unwrap(),
                    );
                }
            }
        }
        return Ok(out);
    }

    if format.is_fp16() {
        let swz = fp16_swizzle(format);
        let has_alpha = format.has_alpha();
        for y in 0..h {
            for x in 0..w {
                let off = layout.sample_offset(0, (x * 8) as u32, y as u32)?;
                let mut mem = [0.0f32; 4];
                for (c, slot) in mem.iter_mut().enumerate() {
                    let bits = u16::from_le_bytes([data[off + c * 2], data[off + c * 2 + 1]]);
                    *slot = f16::from_bits(bits).to_f32();
                }
                let px = &mut out[y * w + x];
                px[0] = mem[swz[0]];
                px[1] = mem[swz[1]];
                px[2] = mem[swz[2]];
                px[3] = if has_alpha { mem[swz[3]] } else { 1.0 };
            }
        }
        return Ok(out);
    }

    if let Some(p) = rgb_packing(format) {
        let expand = |raw: u32, (shift, width): (u32, u32)| -> f32 {
            if width == 0 {
                return 1.0;
            }
            let max = (1u32 << width) - 1;
            ((raw >> shift) & max) as f32 / max as f32
        };
        for y in 0..h {
            for x in 0..w {
                let off = layout.sample_offset(0, (x * p.bytes) as u32, y as u32)?;
                let mut raw = 0u32;
                for b in 0..p.bytes {
                    raw |= (data[off + b] as u32) << (8 * b);
                }
                out[y * w + x] = [
                    expand(raw, p.r),
                    expand(raw, p.g),
                    expand(raw, p.b),
                    expand(raw, p.a),
                ];
            }
        }
        return Ok(out);
    }

    if format == Format::Y410 || format == Format::XVYU2101010 {
        let m = ycbcr_to_rgb_matrix(format, Format::F32X4, encoding, range)?;
        for y in 0..h {
            for x in 0..w {
                let off = layout.sample_offset(0, (x * 4) as u32, y as u32)?;
                let raw = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
                let yuv = Vec4::new(
                    ((raw >> 10) & 0x3ff) as f32,
                    (raw & 0x3ff) as f32,
                    ((raw >> 20) & 0x3ff) as f32,
                    1.0,
                );
                let rgb = m.transform(&yuv);
                let alpha = if format == Format::Y410 {
                    (raw >> 30) as f32 / 3.0
                } else {
                    1.0
                };
                out[y * w + x] = [rgb.d[0], rgb.d[1], rgb.d[2], alpha];
            }
        }
        return Ok(out);
    }

    if let Some(s) = yuv_sampling(format) {
        let info = format.info().ok_or(FbError::UnknownFormat(format))?;
        let (hsub, vsub) = (info.hsub as usize, info.vsub as usize);
        let (u_plane, v_plane) = if info.num_planes() == 3 {
            chroma_planes(format)
        } else {
            (s.c_plane, s.c_plane)
        };
        let m = ycbcr_to_rgb_matrix(format, Format::F32X4, encoding, range)?;

        for y in 0..h {
            let cy = (y / vsub) as u32;
            for x in 0..w {
                let cx = x / hsub;
                let y_off = layout
                    .sample_offset(s.y_plane, (x * s.y_step + s.y_offset) as u32, y as u32)?;
                let u_off =
                    layout.sample_offset(u_plane, (cx * s.c_step + s.u_offset) as u32, cy)?;
                let v_off =
                    layout.sample_offset(v_plane, (cx * s.c_step + s.v_offset) as u32, cy)?;

                let yuv = Vec4::new(
                    read_word(data, y_off, s.word),
                    read_word(data, u_off, s.word),
                    read_word(data, v_off, s.word),
                    1.0,
                );
                let rgb = m.transform(&yuv);
                let alpha = match s.a_offset {
                    Some(a) => {
                        let a_off = layout
                            .sample_offset(s.y_plane, (x * s.y_step + a) as u32, y as u32)?;
                        read_word(data, a_off, s.word) / 65535.0
                    }
                    None => 1.0,
                };
                out[y * w + x] = [rgb.d[0], rgb.d[1], rgb.d[2], alpha];
            }
        }
        return Ok(out);
    }

    Err(FbError::UnsupportedConversion(format))
}

/// Encodes the RGBA f32 pivot into a framebuffer's bytes.
pub fn write_from_pivot(
    layout: &FbLayout,
    data: &mut [u8],
    pixels: &[PivotPixel],
    encoding: ColorEncoding,
    range: ColorRange,
) -> Result<(), FbError> {
    check_pivot_len(layout, pixels)?;
    if (data.len() as u64) < layout.size {
        return Err(FbError::BufferTooSmall {
            want: layout.size,
            got: data.len() as u64,
        });
    }
    let w = layout.width as usize;
    let h = layout.height as usize;
    let format = layout.format;

    if format == Format::F32X4 {
        for y in 0..h {
            for x in 0..w {
                let off = layout.sample_offset(0, (x * 16) as u32, y as u32)?;
                for (c, v) in pixels[y * w + x].iter().enumerate() {
                    data[off + c * 4..off + c * 4 + 4].copy_from_slice(&v.to_le_bytes());
                }
            }
        }
        return Ok(());
    }

    if format.is_fp16() {
        let swz = fp16_swizzle(format);
        for y in 0..h {
            for x in 0..w {
                let off = layout.sample_offset(0, (x * 8) as u32, y as u32)?;
                let px = pixels[y * w + x];
                for c in 0..4 {
                    let bits = f16::from_f32(px[swz[c]]).to_bits();
                    data[off + c * 2..off + c * 2 + 2].copy_from_slice(&bits.to_le_bytes());
                }
            }
        }
        return Ok(());
    }

    if let Some(p) = rgb_packing(format) {
        let pack = |v: f32, (shift, width): (u32, u32)| -> u32 {
            if width == 0 {
                return 0;
            }
            let max = (1u32 << width) - 1;
            ((v.clamp(0.0, 1.0) * max as f32 + 0.5) as u32) << shift
        };
        for y in 0..h {
            for x in 0..w {
                let off = layout.sample_offset(0, (x * p.bytes) as u32, y as u32)?;
                let px = pixels[y * w + x];
                let raw = pack(px[0], p.r) | pack(px[1], p.g) | pack(px[2], p.b) | pack(px[3], p.a);
                for b in 0..p.bytes {
                    data[off + b] = (raw >> (8 * b)) as u8;
                }
            }
        }
        return Ok(());
    }

    if format == Format::Y410 || format == Format::XVYU2101010 {
        let m = rgb_to_ycbcr_matrix(Format::F32X4, format, encoding, range)?;
        for y in 0..h {
            for x in 0..w {
                let off = layout.sample_offset(0, (x * 4) as u32, y as u32)?;
                let px = pixels[y * w + x];
                let yuv = m.transform(&Vec4::new(px[0], px[1], px[2], 1.0));
                let clamp10 = |v: f32| (v.clamp(0.0, 1023.0) + 0.5) as u32;
                let alpha = if format == Format::Y410 {
                    (px[3].clamp(0.0, 1.0) * 3.0 + 0.5) as u32
                } else {
                    0
                };
                let raw = clamp10(yuv.d[1])
                    | (clamp10(yuv.d[0]) << 10)
                    | (clamp10(yuv.d[2]) << 20)
                    | (alpha << 30);
                data[off..off + 4].copy_from_slice(&raw.to_le_bytes());
            }
        }
        return Ok(());
    }

    if let Some(s) = yuv_sampling(format) {
        let info = format.info().ok_or(FbError::UnknownFormat(format))?;
        let (hsub, vsub) = (info.hsub as usize, info.vsub as usize);
        let (u_plane, v_plane) = if info.num_planes() == 3 {
            chroma_planes(format)
        } else {
            (s.c_plane, s.c_plane)
        };
        let m = rgb_to_ycbcr_matrix(Format::F32X4, format, encoding, range)?;
        let max = yuv_max_code(format);

        let transform = |px: PivotPixel, m: &Mat4| -> Vec4 {
            m.transform(&Vec4::new(px[0], px[1], px[2], 1.0))
        };

        for y in 0..h {
            for x in 0..w {
                let px = pixels[y * w + x];
                let yuv = transform(px, &m);

                let y_off = layout
                    .sample_offset(s.y_plane, (x * s.y_step + s.y_offset) as u32, y as u32)?;
                write_word(data, y_off, s.word, yuv.d[0], max);

                if let Some(a) = s.a_offset {
                    let a_off = layout
                        .sample_offset(s.y_plane, (x * s.y_step + a) as u32, y as u32)?;
                    write_word(data, a_off, s.word, px[3].clamp(0.0, 1.0) * 65535.0, 65535.0);
                }

                if x % hsub != 0 || y % vsub != 0 {
                    continue;
                }

                // MPEG2 chroma siting: average this pixel with the far
                // corner of its subsampling block, clamped at the edges.
                let pair_x = (x + hsub - 1).min(w - 1);
                let pair_y = (y + vsub - 1).min(h - 1);
                let pair = transform(pixels[pair_y * w + pair_x], &m);

                let cx = (x / hsub) as u32;
                let cy = (y / vsub) as u32;
                let u_off =
                    layout.sample_offset(u_plane, (cx as usize * s.c_step + s.u_offset) as u32, cy)?;
                let v_off =
                    layout.sample_offset(v_plane, (cx as usize * s.c_step + s.v_offset) as u32, cy)?;
                write_word(data, u_off, s.word, (yuv.d[1] + pair.d[1]) / 2.0, max);
                write_word(data, v_off, s.word, (yuv.d[2] + pair.d[2]) / 2.0, max);
            }
        }
        return Ok(());
    }

    Err(FbError::UnsupportedConversion(format))
}

/// Converts between two equally-sized buffers through the pivot.
#[allow(clippy::too_many_arguments)]
pub fn convert_buffers(
    src_layout: &FbLayout,
    src_data: &[u8],
    src_encoding: ColorEncoding,
    src_range: ColorRange,
    dst_layout: &FbLayout,
    dst_data: &mut [u8],
    dst_encoding: ColorEncoding,
    dst_range: ColorRange,
) -> Result<(), FbError> {
    if (src_layout.width, src_layout.height) != (dst_layout.width, dst_layout.height) {
        return Err(FbError::SizeMismatch);
    }
    let pivot = read_to_pivot(src_layout, src_data, src_encoding, src_range)?;
    write_from_pivot(dst_layout, dst_data, &pivot, dst_encoding, dst_range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::DeviceClass;
    use prism_fourcc::Modifier;

    fn linear(format: Format, w: u32, h: u32) -> FbLayout {
        FbLayout::new(DeviceClass::Other, w, h, format, Modifier::LINEAR).unwrap()
    }

    fn buf(layout: &FbLayout) -> Vec<u8> {
        vec![0u8; layout.size as usize]
    }

    const LIMITED: (ColorEncoding, ColorRange) = (ColorEncoding::Bt601, ColorRange::Limited);

    #[test]
    fn xrgb8888_round_trip_is_exact() {
        let layout = linear(Format::XRGB8888, 3, 2);
        let mut data = buf(&layout);
        // Distinct byte patterns per pixel, X byte left zero.
        for (i, chunk) in data.chunks_exact_mut(4).enumerate() {
            chunk[0] = 10 * i as u8 + 1; // B
            chunk[1] = 10 * i as u8 + 2; // G
            chunk[2] = 10 * i as u8 + 3; // R
        }
        let original = data.clone();

        let pivot = read_to_pivot(&layout, &data, LIMITED.0, LIMITED.1).unwrap();
        assert_eq!(pivot[0][0], 3.0 / 255.0); // R of pixel 0
        assert_eq!(pivot[0][3], 1.0);

        let mut back = buf(&layout);
        write_from_pivot(&layout, &mut back, &pivot, LIMITED.0, LIMITED.1).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn rgb565_expansion_replicates_extremes() {
        let layout = linear(Format::RGB565, 1, 1);
        let mut data = buf(&layout);
        data.copy_from_slice(&0xffffu16.to_le_bytes());
        let pivot = read_to_pivot(&layout, &data, LIMITED.0, LIMITED.1).unwrap();
        assert_eq!(pivot[0], [1.0, 1.0, 1.0, 1.0]);

        let mut back = buf(&layout);
        write_from_pivot(&layout, &mut back, &pivot, LIMITED.0, LIMITED.1).unwrap();
        assert_eq!(back, 0xffffu16.to_le_bytes());
    }

    #[test]
    fn yuyv_solid_red_encodes_bt601_codes() {
        let layout = linear(Format::YUYV, 2, 1);
        let mut data = buf(&layout);
        let red = [[1.0, 0.0, 0.0, 1.0]; 2];
        write_from_pivot(&layout, &mut data, &red, LIMITED.0, LIMITED.1).unwrap();
        // Y=81, Cb=90, Cr=240 for saturated red in 8-bit limited BT.601.
        assert_eq!(data, [81, 90, 81, 240]);
    }

    #[test]
    fn yuyv_chroma_is_sited_between_pixels() {
        let layout = linear(Format::YUYV, 2, 1);
        let mut data = buf(&layout);
        let red_blue = [[1.0, 0.0, 0.0, 1.0], [0.0, 0.0, 1.0, 1.0]];
        write_from_pivot(&layout, &mut data, &red_blue, LIMITED.0, LIMITED.1).unwrap();
        // Luma per pixel, chroma averaged over the pair.
        assert_eq!(data[0], 81); // Y red
        assert_eq!(data[2], 41); // Y blue
        assert_eq!(data[1], 165); // (90.2 + 240) / 2
        assert_eq!(data[3], 175); // (240 + 109.8) / 2
    }

    #[test]
    fn nv12_black_fill_writes_limited_range_codes() {
        let layout = linear(Format::NV12, 4, 4);
        let mut data = buf(&layout);
        let black = vec![[0.0f32, 0.0, 0.0, 1.0]; 16];
        write_from_pivot(&layout, &mut data, &black, LIMITED.0, LIMITED.1).unwrap();
        assert!(data[..16].iter().all(|&b| b == 16), "luma {:?}", &data[..16]);
        assert!(data[16..].iter().all(|&b| b == 128), "chroma {:?}", &data[16..]);
    }

    #[test]
    fn nv12_full_range_black_is_zero_luma() {
        let layout = linear(Format::NV12, 2, 2);
        let mut data = buf(&layout);
        let black = vec![[0.0f32, 0.0, 0.0, 1.0]; 4];
        write_from_pivot(&layout, &mut data, &black, ColorEncoding::Bt601, ColorRange::Full)
            .unwrap();
        assert!(data[..4].iter().all(|&b| b == 0));
        assert!(data[4..].iter().all(|&b| b == 128));
    }

    #[test]
    fn nv12_round_trips_through_pivot() {
        let layout = linear(Format::NV12, 4, 4);
        let mut data = buf(&layout);
        let grad: Vec<PivotPixel> = (0..16)
            .map(|i| [i as f32 / 15.0, 0.5, 1.0 - i as f32 / 15.0, 1.0])
            .collect();
        write_from_pivot(&layout, &mut data, &grad, LIMITED.0, LIMITED.1).unwrap();
        let pivot = read_to_pivot(&layout, &data, LIMITED.0, LIMITED.1).unwrap();
        // Luma is per-pixel so the green channel (dominated by luma)
        // should come back close; chroma is subsampled so allow slack.
        for (a, b) in grad.iter().zip(pivot.iter()) {
            assert!((a[1] - b[1]).abs() < 0.2, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn p010_white_uses_high_bits() {
        let layout = linear(Format::P010, 2, 2);
        let mut data = buf(&layout);
        let white = vec![[1.0f32, 1.0, 1.0, 1.0]; 4];
        write_from_pivot(&layout, &mut data, &white, LIMITED.0, LIMITED.1).unwrap();
        // 16-bit limited-range white luma: 235 << 8 = 60160.
        let y0 = u16::from_le_bytes([data[0], data[1]]);
        assert_eq!(y0, 60160);
        // Chroma stays centered.
        let off = layout.offsets[1] as usize;
        let u0 = u16::from_le_bytes([data[off], data[off + 1]]);
        assert_eq!(u0, 32768);
    }

    #[test]
    fn y410_packs_ten_bit_components() {
        let layout = linear(Format::Y410, 1, 1);
        let mut data = buf(&layout);
        let white = [[1.0f32, 1.0, 1.0, 1.0]];
        write_from_pivot(&layout, &mut data, &white, LIMITED.0, LIMITED.1).unwrap();
        let raw = u32::from_le_bytes(data[..4].try_into().unwrap());
        assert_eq!(raw & 0x3ff, 512); // Cb
        assert_eq!((raw >> 10) & 0x3ff, 940); // Y white, 10-bit limited
        assert_eq!((raw >> 20) & 0x3ff, 512); // Cr
        assert_eq!(raw >> 30, 3); // opaque alpha

        let pivot = read_to_pivot(&layout, &data, LIMITED.0, LIMITED.1).unwrap();
        for c in 0..3 {
            assert!((pivot[0][c] - 1.0).abs() < 5e-3, "{:?}", pivot[0]);
        }
        assert_eq!(pivot[0][3], 1.0);
    }

    #[test]
    fn fp16_round_trip_with_bgr_swizzle() {
        for format in [Format::XRGB16161616F, Format::ABGR16161616F] {
            let layout = linear(format, 2, 1);
            let mut data = buf(&layout);
            let px = [[0.25f32, 0.5, 0.75, 1.0], [1.0, 0.0, 0.5, 1.0]];
            write_from_pivot(&layout, &mut data, &px, LIMITED.0, LIMITED.1).unwrap();
            let pivot = read_to_pivot(&layout, &data, LIMITED.0, LIMITED.1).unwrap();
            for (a, b) in px.iter().zip(pivot.iter()) {
                for c in 0..4 {
                    assert!((a[c] - b[c]).abs() < 1e-3, "{format}: {a:?} vs {b:?}");
                }
            }
        }
    }

    #[test]
    fn fp16_memory_order_is_bgra_for_xrgb() {
        let layout = linear(Format::XRGB16161616F, 1, 1);
        let mut data = buf(&layout);
        write_from_pivot(&layout, &mut data, &[[1.0, 0.0, 0.0, 1.0]], LIMITED.0, LIMITED.1)
            .unwrap();
        let half_at = |i: usize| {
            f16::from_bits(u16::from_le_bytes([data[i * 2], data[i * 2 + 1]])).to_f32()
        };
        assert_eq!(half_at(0), 0.0); // B first in memory
        assert_eq!(half_at(2), 1.0); // R third
    }

    #[test]
    fn three_plane_yvu_swaps_chroma_planes() {
        let yu12 = linear(Format::YUV420, 2, 2);
        let yv12 = linear(Format::YVU420, 2, 2);
        let mut a = buf(&yu12);
        let mut b = buf(&yv12);
        let px = vec![[1.0f32, 0.0, 0.0, 1.0]; 4];
        write_from_pivot(&yu12, &mut a, &px, LIMITED.0, LIMITED.1).unwrap();
        write_from_pivot(&yv12, &mut b, &px, LIMITED.0, LIMITED.1).unwrap();
        // Same bytes, planes 1 and 2 swapped.
        assert_eq!(a[..4], b[..4]);
        assert_eq!(a[4], b[5]); // u <-> v
        assert_eq!(a[5], b[4]);
    }

    #[test]
    fn sand_nv12_addresses_through_columns() {
        let modifier = Modifier::sand32_col_height(8);
        let layout =
            FbLayout::new(DeviceClass::Vc4, 64, 4, Format::NV12, modifier).unwrap();
        let mut data = vec![0u8; layout.size as usize];
        let px = vec![[0.0f32, 0.0, 0.0, 1.0]; 64 * 4];
        write_from_pivot(&layout, &mut data, &px, LIMITED.0, LIMITED.1).unwrap();

        // Luma 16 lands at the column-swizzled address of (x=40, y=1):
        // column 1, so 32*8 + 1*32 + 8.
        assert_eq!(data[32 * 8 + 32 + 8], 16);

        let pivot = read_to_pivot(&layout, &data, LIMITED.0, LIMITED.1).unwrap();
        assert!(pivot.iter().all(|p| p[0].abs() < 2.0 / 255.0));
    }

    #[test]
    fn tiled_intel_buffers_are_not_cpu_convertible() {
        let layout = FbLayout::new(
            DeviceClass::Intel { gen: 9 },
            64,
            64,
            Format::XRGB8888,
            Modifier::I915_X_TILED,
        )
        .unwrap();
        let data = vec![0u8; layout.size as usize];
        assert!(matches!(
            read_to_pivot(&layout, &data, LIMITED.0, LIMITED.1),
            Err(FbError::CpuAccessToTiled { .. })
        ));
    }

    #[test]
    fn pivot_size_must_match() {
        let layout = linear(Format::XRGB8888, 4, 4);
        let mut data = buf(&layout);
        let too_few = vec![[0.0f32; 4]; 3];
        assert!(matches!(
            write_from_pivot(&layout, &mut data, &too_few, LIMITED.0, LIMITED.1),
            Err(FbError::PivotSizeMismatch { .. })
        ));
    }

    #[test]
    fn palette_formats_are_not_convertible() {
        let layout = linear(Format::C8, 4, 4);
        let data = buf(&layout);
        assert!(matches!(
            read_to_pivot(&layout, &data, LIMITED.0, LIMITED.1),
            Err(FbError::UnsupportedConversion(_))
        ));
    }
}
