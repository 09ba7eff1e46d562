//! KMS display state management for driver test harnesses.
//!
//! This crate models a display device the way the kernel's modesetting
//! interface exposes it: pipes (CRTCs), planes and outputs (connectors),
//! each a table of properties. Staged changes are pushed into the device
//! through one of three commit styles (legacy, universal-plane, atomic).
//! Property writes are dirty-tracked so a commit only touches what
//! changed, and so partially-capable commit styles leave the rest staged.
//!
//! The device itself sits behind the [`ModeDevice`] trait: production code
//! binds the real DRM ioctl backend, tests bind an in-memory virtual
//! device with kernel-like validation.
//!
//! ```no_run
//! # fn demo<D: prism_kms::ModeDevice>(dev: D) -> Result<(), prism_kms::KmsError> {
//! use prism_kms::CommitStyle;
//!
//! let mut display = prism_kms::Display::open(dev)?;
//! display.output_handle(0).set_pipe(Some(0))?;
//! // ... bind framebuffers to planes ...
//! display.commit(CommitStyle::Atomic)?;
//! # Ok(()) }
//! ```

mod commit;
mod device;
mod display;
mod mode;
mod objects;
mod props;

pub use commit::CommitStyle;
pub use device::{
    AtomicRequest, BoundFb, CardResources, ClientCap, CommitFlags, ConnectorInfo, ConnectorStatus,
    ConnectorType, DumbBuffer, EncoderInfo, KmsError, ModeDevice, ObjectType, PlaneInfo,
    PropertyInfo, PropertyKind, RawId, Result,
};
pub use display::{
    encode_in_formats, Display, OutputHandle, PipeHandle, PlaneHandle,
};
pub use mode::{DisplayMode, ModeFlags, ModeType, MODE_BLOB_SIZE};
pub use objects::{pipe_name, Output, Pipe, Plane};
pub use props::{ConnectorProp, CrtcProp, DirtyMask, PlaneProp, PlaneType, Rotation};
