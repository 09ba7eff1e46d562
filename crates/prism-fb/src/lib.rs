//! Framebuffer management: geometry, allocation, painting and software
//! pixel-format conversion.
//!
//! [`FbLayout`] computes strides, per-plane offsets and allocation sizes
//! for every supported format/modifier/device combination. [`Framebuffer`]
//! drives the allocation through a [`prism_kms::ModeDevice`] (dumb buffer
//! plus AddFB2) and pairs the layout with color metadata. The [`convert`]
//! module moves pixels between formats through an f32 RGBA pivot, and
//! [`paint`] draws test patterns on that pivot.

pub mod convert;
pub mod paint;
mod tiling;

pub use paint::Canvas;
pub use tiling::{tile_size, DeviceClass, FbLayout};

use prism_color::{ColorEncoding, ColorRange};
use prism_fourcc::{Format, Modifier};
use prism_kms::{BoundFb, KmsError, ModeDevice};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FbError {
    #[error("unknown pixel format {0:?}")]
    UnknownFormat(Format),

    #[error("framebuffer dimensions must be nonzero")]
    ZeroSize,

    #[error("{modifier:?} is not valid on {device:?}")]
    UnsupportedModifier {
        modifier: Modifier,
        device: DeviceClass,
    },

    #[error("{bpp}bpp has no tile geometry under {modifier:?}")]
    BadBppForModifier { bpp: u32, modifier: Modifier },

    #[error("SAND modifiers need a nonzero column height")]
    SandWithoutColumnHeight,

    #[error("stride {stride} below minimum {min}")]
    StrideTooSmall { stride: u32, min: u32 },

    #[error("framebuffer exceeds addressable size")]
    TooLarge,

    #[error("{modifier:?} buffers are not CPU-addressable")]
    CpuAccessToTiled { modifier: Modifier },

    #[error("no software conversion for {0}")]
    UnsupportedConversion(Format),

    #[error("buffer of {got} bytes smaller than layout size {want}")]
    BufferTooSmall { want: u64, got: u64 },

    #[error("pivot image has {got} pixels, layout wants {want}")]
    PivotSizeMismatch { want: usize, got: usize },

    #[error("source and destination dimensions differ")]
    SizeMismatch,

    #[error(transparent)]
    Color(#[from] prism_color::ColorError),

    #[error(transparent)]
    Kms(#[from] KmsError),
}

/// A device-resident framebuffer: computed layout, the dumb buffer backing
/// it, and its registered fb id.
#[derive(Debug)]
pub struct Framebuffer {
    pub layout: FbLayout,
    pub fb_id: u32,
    pub bo_handle: u32,
    pub color_encoding: ColorEncoding,
    pub color_range: ColorRange,
}

impl Framebuffer {
    /// Allocates a dumb buffer for the layout, registers the framebuffer,
    /// and clears YCbCr content to black (zeroed buffers decode as green).
    pub fn create<D: ModeDevice>(
        dev: &mut D,
        device_class: DeviceClass,
        width: u32,
        height: u32,
        format: Format,
        modifier: Modifier,
    ) -> Result<Framebuffer, FbError> {
        Self::create_with_encoding(
            dev,
            device_class,
            width,
            height,
            format,
            modifier,
            ColorEncoding::default(),
            ColorRange::default(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_with_encoding<D: ModeDevice>(
        dev: &mut D,
        device_class: DeviceClass,
        width: u32,
        height: u32,
        format: Format,
        modifier: Modifier,
        color_encoding: ColorEncoding,
        color_range: ColorRange,
    ) -> Result<Framebuffer, FbError> {
        let layout = FbLayout::new(device_class, width, height, format, modifier)?;

        // One linear allocation covers every plane; expressed to the dumb
        // interface as a byte row.
        let size = u32::try_from(layout.size).map_err(|_| FbError::TooLarge)?;
        let bo = dev.create_dumb(size, 1, 8)?;

        let mut handles = [0u32; 4];
        let mut pitches = [0u32; 4];
        let mut offsets = [0u32; 4];
        for plane in 0..layout.num_planes {
            handles[plane] = bo.handle;
            pitches[plane] = layout.strides[plane];
            offsets[plane] = layout.offsets[plane];
        }

        let modifier_arg = (modifier != Modifier::LINEAR).then_some(modifier);
        let fb_id = match dev.add_framebuffer(
            width, height, format, modifier_arg, handles, pitches, offsets,
        ) {
            Ok(id) => id,
            Err(err) => {
                let _ = dev.destroy_dumb(bo.handle);
                return Err(err.into());
            }
        };

        debug!(fb_id, %format, width, height, size = layout.size, "created fb");

        let fb = Framebuffer {
            layout,
            fb_id,
            bo_handle: bo.handle,
            color_encoding,
            color_range,
        };

        let cpu_addressable =
            fb.layout.modifier.base() == Modifier::LINEAR || fb.layout.modifier.is_sand();
        if format.is_yuv() && cpu_addressable {
            let mut canvas = Canvas::new(width, height);
            canvas.fill([0.0, 0.0, 0.0, 1.0]);
            fb.write_canvas(dev, &canvas)?;
        }

        Ok(fb)
    }

    /// The slice of state a plane binding needs.
    pub fn bound(&self) -> BoundFb {
        BoundFb {
            fb_id: self.fb_id,
            width: self.layout.width,
            height: self.layout.height,
            color_encoding: self.color_encoding,
            color_range: self.color_range,
            bo_handle: self.bo_handle,
        }
    }

    /// CPU view of the backing store.
    pub fn map<'a, D: ModeDevice>(&self, dev: &'a mut D) -> Result<&'a mut [u8], FbError> {
        Ok(dev.map_dumb(self.bo_handle)?)
    }

    /// Decodes the framebuffer contents into a canvas.
    pub fn read_canvas<D: ModeDevice>(&self, dev: &mut D) -> Result<Canvas, FbError> {
        let (width, height) = (self.layout.width, self.layout.height);
        let (encoding, range) = (self.color_encoding, self.color_range);
        let layout = self.layout.clone();
        let data = dev.map_dumb(self.bo_handle)?;
        let pixels = convert::read_to_pivot(&layout, data, encoding, range)?;
        Canvas::from_pixels(width, height, pixels).ok_or(FbError::SizeMismatch)
    }

    /// Encodes a canvas into the framebuffer.
    pub fn write_canvas<D: ModeDevice>(&self, dev: &mut D, canvas: &Canvas) -> Result<(), FbError> {
        if (canvas.width(), canvas.height()) != (self.layout.width, self.layout.height) {
            return Err(FbError::SizeMismatch);
        }
        let (encoding, range) = (self.color_encoding, self.color_range);
        let layout = self.layout.clone();
        let data = dev.map_dumb(self.bo_handle)?;
        convert::write_from_pivot(&layout, data, canvas.pixels(), encoding, range)?;
        Ok(())
    }

    /// Paints via a closure over a fresh black canvas and writes the
    /// result.
    pub fn paint<D: ModeDevice>(
        &self,
        dev: &mut D,
        f: impl FnOnce(&mut Canvas),
    ) -> Result<(), FbError> {
        let mut canvas = Canvas::new(self.layout.width, self.layout.height);
        f(&mut canvas);
        self.write_canvas(dev, &canvas)
    }

    /// Unregisters the framebuffer and frees its buffer.
    pub fn remove<D: ModeDevice>(self, dev: &mut D) -> Result<(), FbError> {
        dev.remove_framebuffer(self.fb_id)?;
        dev.destroy_dumb(self.bo_handle)?;
        Ok(())
    }
}
