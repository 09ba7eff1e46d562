//! prism: a userspace toolkit for driving and validating KMS display
//! pipelines.
//!
//! This facade re-exports the workspace crates under one roof:
//! - [`fourcc`]: pixel formats and framebuffer modifiers (kernel ABI
//!   values).
//! - [`color`]: YCbCr↔RGB conversion matrices and 4x4 matrix math.
//! - [`fb`]: framebuffer geometry, allocation, painting and software
//!   pixel conversion.
//! - [`kms`]: the display/pipe/plane/output property model and the
//!   legacy/universal/atomic commit machinery.
//! - [`vkms`]: an in-memory device model with kernel-shaped validation,
//!   for tests.
//! - [`edid`]: EDID base-block synthesis for virtual connectors.
//!
//! The Linux ioctl backend lives in the separate `prism-uapi` crate so
//! non-Linux consumers of the model don't pull in the uapi surface.

pub use prism_color as color;
pub use prism_edid as edid;
pub use prism_fb as fb;
pub use prism_fourcc as fourcc;
pub use prism_kms as kms;
pub use prism_vkms as vkms;
