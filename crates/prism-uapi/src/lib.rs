//! Linux DRM ioctl backend for the display model.
//!
//! [`DrmDevice`] implements [`prism_kms::ModeDevice`] over an open
//! `/dev/dri/cardN` node: `repr(C)` mirrors of the kernel mode structs,
//! nix-generated ioctl wrappers, the kernel's two-call array-fetch
//! protocol, and mmap-backed dumb-buffer access.
//!
//! The crate is empty off Linux; gate uses behind
//! `cfg(target_os = "linux")`.

#[cfg(target_os = "linux")]
mod device;
#[cfg(target_os = "linux")]
pub mod sys;

#[cfg(target_os = "linux")]
pub use device::DrmDevice;
