//! DRM pixel-format (fourcc) and framebuffer-modifier definitions.
//!
//! This crate is the vocabulary shared by the framebuffer and KMS layers:
//! - [`Format`]: the kernel's little-endian fourcc codes, plus a per-format
//!   geometry table ([`FormatInfo`]) describing plane count, per-plane bits
//!   per pixel and chroma subsampling.
//! - [`Modifier`]: the 64-bit vendor-namespaced tiling/layout codes,
//!   including the Broadcom SAND family which embeds a column-height
//!   parameter in the modifier value itself.
//!
//! Values match the kernel's `drm_fourcc.h` exactly; they are ABI, not an
//! internal enumeration.

mod info;
mod modifier;

pub use info::{FormatInfo, FORMATS};
pub use modifier::Modifier;

use std::fmt;

/// Builds a fourcc code the way `drm_fourcc.h` does: first character in the
/// least significant byte.
pub const fn fourcc_code(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | (b as u32) << 8 | (c as u32) << 16 | (d as u32) << 24
}

/// A DRM pixel format code.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Format(pub u32);

impl Format {
    /* 8 bpp indexed */
    pub const C8: Format = Format(fourcc_code(b'C', b'8', b' ', b' '));

    /* 16 bpp RGB */
    pub const ARGB1555: Format = Format(fourcc_code(b'A', b'R', b'1', b'5'));
    pub const XRGB1555: Format = Format(fourcc_code(b'X', b'R', b'1', b'5'));
    pub const RGB565: Format = Format(fourcc_code(b'R', b'G', b'1', b'6'));
    pub const BGR565: Format = Format(fourcc_code(b'B', b'G', b'1', b'6'));

    /* 24 bpp RGB */
    pub const RGB888: Format = Format(fourcc_code(b'R', b'G', b'2', b'4'));
    pub const BGR888: Format = Format(fourcc_code(b'B', b'G', b'2', b'4'));

    /* 32 bpp RGB */
    pub const XRGB8888: Format = Format(fourcc_code(b'X', b'R', b'2', b'4'));
    pub const XBGR8888: Format = Format(fourcc_code(b'X', b'B', b'2', b'4'));
    pub const ARGB8888: Format = Format(fourcc_code(b'A', b'R', b'2', b'4'));
    pub const ABGR8888: Format = Format(fourcc_code(b'A', b'B', b'2', b'4'));
    pub const XRGB2101010: Format = Format(fourcc_code(b'X', b'R', b'3', b'0'));

    /* 64 bpp half-float RGB */
    pub const XRGB16161616F: Format = Format(fourcc_code(b'X', b'R', b'4', b'H'));
    pub const XBGR16161616F: Format = Format(fourcc_code(b'X', b'B', b'4', b'H'));
    pub const ARGB16161616F: Format = Format(fourcc_code(b'A', b'R', b'4', b'H'));
    pub const ABGR16161616F: Format = Format(fourcc_code(b'A', b'B', b'4', b'H'));

    /* packed YCbCr */
    pub const XYUV8888: Format = Format(fourcc_code(b'X', b'Y', b'U', b'V'));
    pub const YUYV: Format = Format(fourcc_code(b'Y', b'U', b'Y', b'V'));
    pub const YVYU: Format = Format(fourcc_code(b'Y', b'V', b'Y', b'U'));
    pub const UYVY: Format = Format(fourcc_code(b'U', b'Y', b'V', b'Y'));
    pub const VYUY: Format = Format(fourcc_code(b'V', b'Y', b'U', b'Y'));

    /* 10/12/16 bit packed YCbCr, CrCbY ordering */
    pub const Y410: Format = Format(fourcc_code(b'Y', b'4', b'1', b'0'));
    pub const Y412: Format = Format(fourcc_code(b'Y', b'4', b'1', b'2'));
    pub const Y416: Format = Format(fourcc_code(b'Y', b'4', b'1', b'6'));
    pub const XVYU2101010: Format = Format(fourcc_code(b'X', b'V', b'3', b'0'));
    pub const XVYU12_16161616: Format = Format(fourcc_code(b'X', b'V', b'3', b'6'));
    pub const XVYU16161616: Format = Format(fourcc_code(b'X', b'V', b'4', b'8'));

    /* 10/12/16 bit packed YCbCr 4:2:2, like YUYV with wide samples */
    pub const Y210: Format = Format(fourcc_code(b'Y', b'2', b'1', b'0'));
    pub const Y212: Format = Format(fourcc_code(b'Y', b'2', b'1', b'2'));
    pub const Y216: Format = Format(fourcc_code(b'Y', b'2', b'1', b'6'));

    /* 2-plane YCbCr */
    pub const NV12: Format = Format(fourcc_code(b'N', b'V', b'1', b'2'));
    pub const NV21: Format = Format(fourcc_code(b'N', b'V', b'2', b'1'));
    pub const NV16: Format = Format(fourcc_code(b'N', b'V', b'1', b'6'));
    pub const NV61: Format = Format(fourcc_code(b'N', b'V', b'6', b'1'));
    pub const P010: Format = Format(fourcc_code(b'P', b'0', b'1', b'0'));
    pub const P012: Format = Format(fourcc_code(b'P', b'0', b'1', b'2'));
    pub const P016: Format = Format(fourcc_code(b'P', b'0', b'1', b'6'));

    /* 3-plane YCbCr */
    pub const YUV420: Format = Format(fourcc_code(b'Y', b'U', b'1', b'2'));
    pub const YVU420: Format = Format(fourcc_code(b'Y', b'V', b'1', b'2'));
    pub const YUV422: Format = Format(fourcc_code(b'Y', b'U', b'1', b'6'));
    pub const YVU422: Format = Format(fourcc_code(b'Y', b'V', b'1', b'6'));

    /// Library-internal conversion pivot: one f32 per channel, RGBX order.
    /// Not a kernel format; never passed to a device.
    pub const F32X4: Format = Format(fourcc_code(b'f', b'3', b'2', b'x'));

    /// Looks up the geometry description for this format.
    pub fn info(self) -> Option<&'static FormatInfo> {
        FORMATS.iter().find(|f| f.format == self)
    }

    /// Kernel-style short name ("XR24"), or the raw characters for unknown
    /// codes.
    pub fn name(self) -> &'static str {
        self.info().map(|f| f.name).unwrap_or("????")
    }

    pub fn is_yuv(self) -> bool {
        matches!(
            self,
            Format::XYUV8888
                | Format::YUYV
                | Format::YVYU
                | Format::UYVY
                | Format::VYUY
                | Format::Y410
                | Format::Y412
                | Format::Y416
                | Format::XVYU2101010
                | Format::XVYU12_16161616
                | Format::XVYU16161616
                | Format::Y210
                | Format::Y212
                | Format::Y216
                | Format::NV12
                | Format::NV21
                | Format::NV16
                | Format::NV61
                | Format::P010
                | Format::P012
                | Format::P016
                | Format::YUV420
                | Format::YVU420
                | Format::YUV422
                | Format::YVU422
        )
    }

    /// Single-plane YCbCr with interleaved luma/chroma samples.
    pub fn is_packed_yuv(self) -> bool {
        self.is_yuv() && self.info().map(|f| f.plane_bpp.len() == 1).unwrap_or(false)
    }

    pub fn is_fp16(self) -> bool {
        matches!(
            self,
            Format::XRGB16161616F
                | Format::XBGR16161616F
                | Format::ARGB16161616F
                | Format::ABGR16161616F
        )
    }

    pub fn has_alpha(self) -> bool {
        matches!(
            self,
            Format::ARGB1555
                | Format::ARGB8888
                | Format::ABGR8888
                | Format::ARGB16161616F
                | Format::ABGR16161616F
                | Format::Y412
                | Format::Y416
        )
    }
}

impl fmt::Debug for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.info() {
            Some(info) => write!(f, "Format({})", info.name),
            None => {
                let b = self.0.to_le_bytes();
                if b.iter().all(|c| c.is_ascii_graphic() || *c == b' ') {
                    write!(
                        f,
                        "Format({}{}{}{})",
                        b[0] as char, b[1] as char, b[2] as char, b[3] as char
                    )
                } else {
                    write!(f, "Format({:#010x})", self.0)
                }
            }
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
