//! Tile geometry and per-plane stride/size/offset computation.
//!
//! Strides and sizes depend on three things: the pixel format's per-plane
//! geometry, the tiling layout named by the modifier, and which driver
//! family the buffer is for (tiling quanta are hardware-generation
//! specific). The formulas are closed-form transcriptions of the layouts
//! the scanout hardware expects.

use prism_fourcc::{Format, Modifier};

use crate::FbError;

/// Driver family a framebuffer is allocated for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    Intel { gen: u32 },
    Vc4,
    Amdgpu,
    Other,
}

impl DeviceClass {
    fn is_intel(self) -> bool {
        matches!(self, DeviceClass::Intel { .. })
    }

    fn intel_gen(self) -> u32 {
        match self {
            DeviceClass::Intel { gen } => gen,
            _ => 0,
        }
    }
}

/// Width in bytes and height in lines of one tile of the given layout.
///
/// For SAND modifiers the returned "height" is the column height carried in
/// the modifier parameter, which acts as a height-based stride rather than
/// a rounding quantum.
pub fn tile_size(device: DeviceClass, modifier: Modifier, bpp: u32) -> Result<(u32, u32), FbError> {
    let unsupported = || FbError::UnsupportedModifier { modifier, device };

    match modifier.base() {
        Modifier::LINEAR => {
            // Intel display engines want 64-byte stride alignment even on
            // linear buffers.
            Ok((if device.is_intel() { 64 } else { 1 }, 1))
        }
        Modifier::I915_X_TILED => {
            if !device.is_intel() {
                return Err(unsupported());
            }
            if device.intel_gen() == 2 {
                Ok((128, 16))
            } else {
                Ok((512, 8))
            }
        }
        Modifier::I915_Y_TILED | Modifier::I915_Y_TILED_CCS => {
            if !device.is_intel() {
                return Err(unsupported());
            }
            match device.intel_gen() {
                2 => Ok((128, 16)),
                3 => Ok((512, 8)),
                _ => Ok((128, 32)),
            }
        }
        Modifier::I915_YF_TILED | Modifier::I915_YF_TILED_CCS => {
            if !device.is_intel() {
                return Err(unsupported());
            }
            match bpp {
                8 => Ok((64, 64)),
                16 | 32 => Ok((128, 32)),
                64 | 128 => Ok((256, 16)),
                _ => Err(FbError::BadBppForModifier { bpp, modifier }),
            }
        }
        Modifier::BROADCOM_VC4_T_TILED => {
            if device != DeviceClass::Vc4 {
                return Err(unsupported());
            }
            Ok((128, 32))
        }
        Modifier::BROADCOM_SAND32
        | Modifier::BROADCOM_SAND64
        | Modifier::BROADCOM_SAND128
        | Modifier::BROADCOM_SAND256 => {
            if device != DeviceClass::Vc4 {
                return Err(unsupported());
            }
            let column_height = modifier.broadcom_param() as u32;
            if column_height == 0 {
                return Err(FbError::SandWithoutColumnHeight);
            }
            let width = match modifier.base() {
                Modifier::BROADCOM_SAND32 => 32,
                Modifier::BROADCOM_SAND64 => 64,
                Modifier::BROADCOM_SAND128 => 128,
                _ => 256,
            };
            Ok((width, column_height))
        }
        _ => Err(unsupported()),
    }
}

fn align(value: u32, to: u32) -> u32 {
    value.div_ceil(to) * to
}

/// Complete memory geometry of one framebuffer: per-plane dimensions,
/// strides, offsets and the total allocation size.
#[derive(Clone, Debug, PartialEq)]
pub struct FbLayout {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub modifier: Modifier,
    pub device: DeviceClass,
    pub num_planes: usize,
    pub plane_bpp: [u32; 4],
    pub plane_width: [u32; 4],
    pub plane_height: [u32; 4],
    pub strides: [u32; 4],
    pub offsets: [u32; 4],
    pub size: u64,
}

impl FbLayout {
    /// Computes the layout with library-chosen strides.
    pub fn new(
        device: DeviceClass,
        width: u32,
        height: u32,
        format: Format,
        modifier: Modifier,
    ) -> Result<FbLayout, FbError> {
        Self::with_strides(device, width, height, format, modifier, [0; 4])
    }

    /// Computes the layout honoring caller-provided strides; a zero stride
    /// means "choose for me". A nonzero stride below the minimum is
    /// rejected.
    pub fn with_strides(
        device: DeviceClass,
        width: u32,
        height: u32,
        format: Format,
        modifier: Modifier,
        strides: [u32; 4],
    ) -> Result<FbLayout, FbError> {
        if width == 0 || height == 0 {
            return Err(FbError::ZeroSize);
        }
        let info = format.info().ok_or(FbError::UnknownFormat(format))?;

        let ccs = modifier.is_intel_ccs();
        let num_planes = if ccs { 2 } else { info.num_planes() };

        let mut layout = FbLayout {
            width,
            height,
            format,
            modifier,
            device,
            num_planes,
            plane_bpp: [0; 4],
            plane_width: [0; 4],
            plane_height: [0; 4],
            strides: [0; 4],
            offsets: [0; 4],
            size: 0,
        };

        for plane in 0..num_planes {
            if ccs && plane == 1 {
                // The CCS plane carries one byte per 16x8 cacheline group,
                // padded to 128x32 units.
                layout.plane_bpp[1] = 8;
                layout.plane_width[1] = width.div_ceil(1024) * 128;
                layout.plane_height[1] = height.div_ceil(512) * 32;
            } else {
                layout.plane_bpp[plane] = info.plane_bpp[plane];
                layout.plane_width[plane] = info.plane_width(width, plane);
                layout.plane_height[plane] = info.plane_height(height, plane);
            }
        }

        let mut size: u64 = 0;
        for plane in 0..num_planes {
            let min_stride = layout.plane_width[plane] * (layout.plane_bpp[plane] / 8).max(1);
            let stride = if strides[plane] != 0 {
                if strides[plane] < min_stride {
                    return Err(FbError::StrideTooSmall {
                        stride: strides[plane],
                        min: min_stride,
                    });
                }
                strides[plane]
            } else {
                layout.calc_plane_stride(plane, min_stride)?
            };
            layout.strides[plane] = stride;

            layout.offsets[plane] = u32::try_from(size).map_err(|_| FbError::TooLarge)?;
            size += layout.calc_plane_size(plane)?;
        }

        layout.size = size;
        Ok(layout)
    }

    fn calc_plane_stride(&self, plane: usize, min_stride: u32) -> Result<u32, FbError> {
        if self.modifier != Modifier::LINEAR
            && self.device.is_intel()
            && self.device.intel_gen() <= 3
        {
            // Fenced tiling on the early generations wants power-of-two
            // strides of at least 512 bytes.
            Ok(min_stride.max(512).next_power_of_two())
        } else if self.format.is_yuv() && self.device == DeviceClass::Amdgpu {
            // Chroma addresses must land on 256-byte boundaries, which is
            // easiest to guarantee by aligning every stride to 256.
            Ok(align(min_stride, 256))
        } else {
            let (tile_width, _) = tile_size(self.device, self.modifier, self.plane_bpp[plane])?;
            Ok(align(min_stride, tile_width))
        }
    }

    fn calc_plane_size(&self, plane: usize) -> Result<u64, FbError> {
        if self.modifier != Modifier::LINEAR
            && self.device.is_intel()
            && self.device.intel_gen() <= 3
        {
            let min_size = self.strides[plane] as u64 * self.plane_height[plane] as u64;
            // Pad to the next power-of-two fence region, at least 1MiB.
            Ok(min_size.max(1024 * 1024).next_power_of_two())
        } else {
            let (_, tile_height) = tile_size(self.device, self.modifier, self.plane_bpp[plane])?;

            if tile_height > self.plane_height[plane] {
                // Height-based stride (SAND): every column is allocated at
                // full column height.
                Ok(self.strides[plane] as u64 * tile_height as u64)
            } else {
                Ok(self.strides[plane] as u64
                    * align(self.plane_height[plane], tile_height) as u64)
            }
        }
    }

    /// Grows the allocation to at least `size` bytes, for callers that
    /// reuse one buffer across differently-sized contents.
    pub fn with_min_size(mut self, size: u64) -> FbLayout {
        if size > self.size {
            self.size = size;
        }
        self
    }

    /// Byte offset of the sample at (`x_bytes`, `y`) within `plane`,
    /// resolving the modifier's addressing. Only linear and SAND layouts
    /// are CPU-addressable; tiled layouts are detiled by hardware on
    /// access paths this library does not model.
    pub fn sample_offset(&self, plane: usize, x_bytes: u32, y: u32) -> Result<usize, FbError> {
        let base = self.offsets[plane] as usize;
        let stride = self.strides[plane] as usize;
        match self.modifier.base() {
            Modifier::LINEAR => Ok(base + y as usize * stride + x_bytes as usize),
            Modifier::BROADCOM_SAND32
            | Modifier::BROADCOM_SAND64
            | Modifier::BROADCOM_SAND128
            | Modifier::BROADCOM_SAND256 => {
                let (col_width, col_height) =
                    tile_size(self.device, self.modifier, self.plane_bpp[plane])?;
                let col = x_bytes / col_width;
                let within = x_bytes % col_width;
                Ok(base
                    + (col * col_width * col_height) as usize
                    + y as usize * col_width as usize
                    + within as usize)
            }
            _ => Err(FbError::CpuAccessToTiled {
                modifier: self.modifier,
            }),
        }
    }
}
