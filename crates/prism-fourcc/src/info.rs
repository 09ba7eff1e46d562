use crate::Format;

/// Static geometry description of one pixel format.
///
/// `plane_bpp` is indexed by memory plane; its length is the plane count.
/// `hsub`/`vsub` give the chroma subsampling factors applied to every plane
/// past the first (and to chroma sample addressing within packed formats).
#[derive(Debug)]
pub struct FormatInfo {
    pub format: Format,
    /// Kernel-style short name, e.g. "XR24".
    pub name: &'static str,
    /// Legacy ADDFB color depth, for the handful of formats that have one.
    pub depth: Option<u8>,
    pub plane_bpp: &'static [u32],
    pub hsub: u8,
    pub vsub: u8,
}

impl FormatInfo {
    pub fn num_planes(&self) -> usize {
        self.plane_bpp.len()
    }

    /// Width of `plane` in samples for a buffer `width` pixels wide.
    pub fn plane_width(&self, width: u32, plane: usize) -> u32 {
        if plane == 0 {
            width
        } else {
            width.div_ceil(self.hsub as u32)
        }
    }

    /// Height of `plane` in rows for a buffer `height` pixels tall.
    pub fn plane_height(&self, height: u32, plane: usize) -> u32 {
        if plane == 0 {
            height
        } else {
            height.div_ceil(self.vsub as u32)
        }
    }
}

macro_rules! fmt {
    ($format:ident, $name:literal, $depth:expr, [$($bpp:literal),+], $hsub:literal, $vsub:literal) => {
        FormatInfo {
            format: Format::$format,
            name: $name,
            depth: $depth,
            plane_bpp: &[$($bpp),+],
            hsub: $hsub,
            vsub: $vsub,
        }
    };
}

/// Every format the framebuffer layer understands, mirroring the kernel's
/// format database for the subset of formats test content is generated in.
pub static FORMATS: &[FormatInfo] = &[
    fmt!(C8, "C8", None, [8], 1, 1),
    fmt!(ARGB1555, "AR15", None, [16], 1, 1),
    fmt!(XRGB1555, "XR15", None, [16], 1, 1),
    fmt!(RGB565, "RG16", Some(16), [16], 1, 1),
    fmt!(BGR565, "BG16", None, [16], 1, 1),
    fmt!(RGB888, "RG24", None, [24], 1, 1),
    fmt!(BGR888, "BG24", None, [24], 1, 1),
    fmt!(XRGB8888, "XR24", Some(24), [32], 1, 1),
    fmt!(XBGR8888, "XB24", None, [32], 1, 1),
    fmt!(ARGB8888, "AR24", Some(32), [32], 1, 1),
    fmt!(ABGR8888, "AB24", None, [32], 1, 1),
    fmt!(XRGB2101010, "XR30", Some(30), [32], 1, 1),
    fmt!(XRGB16161616F, "XR4H", None, [64], 1, 1),
    fmt!(XBGR16161616F, "XB4H", None, [64], 1, 1),
    fmt!(ARGB16161616F, "AR4H", None, [64], 1, 1),
    fmt!(ABGR16161616F, "AB4H", None, [64], 1, 1),
    fmt!(XYUV8888, "XYUV", None, [32], 1, 1),
    fmt!(YUYV, "YUYV", None, [16], 2, 1),
    fmt!(YVYU, "YVYU", None, [16], 2, 1),
    fmt!(UYVY, "UYVY", None, [16], 2, 1),
    fmt!(VYUY, "VYUY", None, [16], 2, 1),
    fmt!(Y410, "Y410", None, [32], 1, 1),
    fmt!(Y412, "Y412", None, [64], 1, 1),
    fmt!(Y416, "Y416", None, [64], 1, 1),
    fmt!(XVYU2101010, "XV30", None, [32], 1, 1),
    fmt!(XVYU12_16161616, "XV36", None, [64], 1, 1),
    fmt!(XVYU16161616, "XV48", None, [64], 1, 1),
    fmt!(Y210, "Y210", None, [32], 2, 1),
    fmt!(Y212, "Y212", None, [32], 2, 1),
    fmt!(Y216, "Y216", None, [32], 2, 1),
    fmt!(NV12, "NV12", None, [8, 16], 2, 2),
    fmt!(NV21, "NV21", None, [8, 16], 2, 2),
    fmt!(NV16, "NV16", None, [8, 16], 2, 1),
    fmt!(NV61, "NV61", None, [8, 16], 2, 1),
    fmt!(P010, "P010", None, [16, 32], 2, 2),
    fmt!(P012, "P012", None, [16, 32], 2, 2),
    fmt!(P016, "P016", None, [16, 32], 2, 2),
    fmt!(YUV420, "YU12", None, [8, 8, 8], 2, 2),
    fmt!(YVU420, "YV12", None, [8, 8, 8], 2, 2),
    fmt!(YUV422, "YU16", None, [8, 8, 8], 2, 1),
    fmt!(YVU422, "YV16", None, [8, 8, 8], 2, 1),
    fmt!(F32X4, "f32x", None, [128], 1, 1),
];
