//! The modesetting device boundary.
//!
//! [`ModeDevice`] mirrors the kernel's KMS ioctl surface one method per
//! ioctl family. The display model in this crate only ever talks to a
//! device through this trait, so the same commit machinery runs against the
//! real `/dev/dri` backend and against the in-memory virtual device used by
//! tests.

use prism_fourcc::{Format, Modifier};
use thiserror::Error;

use crate::mode::DisplayMode;

/// Raw object/property/blob identifier, as used by the kernel.
pub type RawId = u32;

pub type Result<T> = std::result::Result<T, KmsError>;

/// Errors surfaced by devices and by the display model itself.
///
/// Device implementations map their native failures (errnos) onto these
/// variants so tests can match on the cause instead of a numeric code.
#[derive(Debug, Error)]
pub enum KmsError {
    #[error("no such object {0}")]
    NoSuchObject(RawId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not supported: {0}")]
    NotSupported(&'static str),

    #[error("permission denied")]
    PermissionDenied,

    #[error("device busy")]
    Busy,

    #[error("{object} has no \"{name}\" property")]
    MissingProperty { object: String, name: &'static str },

    #[error("outputs {a} and {b} both want pipe {pipe}")]
    PipeConflict { pipe: char, a: String, b: String },

    #[error("io error: {0}")]
    Io(String),
}

/// KMS object namespaces, with the kernel's magic type values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Crtc,
    Connector,
    Plane,
}

impl ObjectType {
    pub fn kernel_value(self) -> u32 {
        match self {
            ObjectType::Crtc => 0xcccc_cccc,
            ObjectType::Connector => 0xc0c0_c0c0,
            ObjectType::Plane => 0xeeee_eeee,
        }
    }
}

/// Client capabilities negotiated before using the modern interfaces.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClientCap {
    UniversalPlanes,
    Atomic,
}

impl ClientCap {
    pub fn kernel_value(self) -> u64 {
        match self {
            ClientCap::UniversalPlanes => 2,
            ClientCap::Atomic => 3,
        }
    }
}

bitflags::bitflags! {
    /// Flags accepted by [`ModeDevice::atomic_commit`], matching the
    /// kernel's `DRM_MODE_*` commit flag values.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct CommitFlags: u32 {
        const PAGE_FLIP_EVENT = 0x0001;
        const TEST_ONLY = 0x0100;
        const NONBLOCK = 0x0200;
        const ALLOW_MODESET = 0x0400;
    }
}

/// Mode-object inventory of a card.
#[derive(Clone, Debug, Default)]
pub struct CardResources {
    pub crtcs: Vec<RawId>,
    pub connectors: Vec<RawId>,
    pub encoders: Vec<RawId>,
    pub min_size: (u32, u32),
    pub max_size: (u32, u32),
}

#[derive(Clone, Debug)]
pub struct PlaneInfo {
    pub plane_id: RawId,
    /// Bitmask over CRTC indices this plane can be bound to.
    pub possible_crtcs: u32,
    /// Formats from the plane's base format list (no modifier info; the
    /// IN_FORMATS blob supersedes this when present).
    pub formats: Vec<Format>,
}

#[derive(Clone, Debug)]
pub struct EncoderInfo {
    pub encoder_id: RawId,
    pub possible_crtcs: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectorStatus {
    Connected,
    Disconnected,
    Unknown,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConnectorType {
    Vga,
    DviI,
    DviD,
    DviA,
    Composite,
    SVideo,
    Lvds,
    Component,
    NinePinDin,
    DisplayPort,
    HdmiA,
    HdmiB,
    Tv,
    Edp,
    Virtual,
    Dsi,
    Dpi,
    Writeback,
    Unknown(u32),
}

impl ConnectorType {
    /// The kernel's connector type name, as used in "DP-1"-style labels.
    pub fn short_name(self) -> &'static str {
        match self {
            ConnectorType::Vga => "VGA",
            ConnectorType::DviI => "DVI-I",
            ConnectorType::DviD => "DVI-D",
            ConnectorType::DviA => "DVI-A",
            ConnectorType::Composite => "composite",
            ConnectorType::SVideo => "s-video",
            ConnectorType::Lvds => "LVDS",
            ConnectorType::Component => "component",
            ConnectorType::NinePinDin => "9-pin DIN",
            ConnectorType::DisplayPort => "DP",
            ConnectorType::HdmiA => "HDMI-A",
            ConnectorType::HdmiB => "HDMI-B",
            ConnectorType::Tv => "TV",
            ConnectorType::Edp => "eDP",
            ConnectorType::Virtual => "Virtual",
            ConnectorType::Dsi => "DSI",
            ConnectorType::Dpi => "DPI",
            ConnectorType::Writeback => "Writeback",
            ConnectorType::Unknown(_) => "unknown",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConnectorInfo {
    pub connector_id: RawId,
    pub connector_type: ConnectorType,
    /// Per-type instance number (the "1" in "DP-1").
    pub connector_type_id: u32,
    pub connection: ConnectorStatus,
    pub mm_width: u32,
    pub mm_height: u32,
    pub modes: Vec<DisplayMode>,
    pub encoders: Vec<RawId>,
}

impl ConnectorInfo {
    pub fn name(&self) -> String {
        format!("{}-{}", self.connector_type.short_name(), self.connector_type_id)
    }
}

/// Metadata of one property definition.
#[derive(Clone, Debug)]
pub struct PropertyInfo {
    pub prop_id: RawId,
    pub name: String,
    pub kind: PropertyKind,
}

#[derive(Clone, Debug)]
pub enum PropertyKind {
    Range { min: u64, max: u64 },
    SignedRange { min: i64, max: i64 },
    Enum { values: Vec<(u64, String)> },
    Bitmask { values: Vec<(u64, String)> },
    Blob,
    Object,
}

/// One staged atomic property set: `(object, property, value)` triples in
/// submission order.
#[derive(Clone, Debug, Default)]
pub struct AtomicRequest {
    props: Vec<(RawId, RawId, u64)>,
}

impl AtomicRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, object: RawId, prop: RawId, value: u64) {
        self.props.push((object, prop, value));
    }

    pub fn props(&self) -> &[(RawId, RawId, u64)] {
        &self.props
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

/// Result of a dumb-buffer allocation.
#[derive(Copy, Clone, Debug)]
pub struct DumbBuffer {
    pub handle: u32,
    pub pitch: u32,
    pub size: u64,
}

/// The kernel modesetting surface, one method per ioctl family.
///
/// Methods take `&mut self` even for queries: the real backend keeps fd
/// state (mappings, cached blobs) and the virtual device records traffic.
pub trait ModeDevice {
    fn resources(&mut self) -> Result<CardResources>;

    fn plane_ids(&mut self) -> Result<Vec<RawId>>;
    fn plane(&mut self, plane_id: RawId) -> Result<PlaneInfo>;
    fn encoder(&mut self, encoder_id: RawId) -> Result<EncoderInfo>;

    /// Fetch connector state. `probe` forces a full detection cycle (the
    /// expensive `GetConnector` path) instead of returning cached state.
    fn connector(&mut self, connector_id: RawId, probe: bool) -> Result<ConnectorInfo>;

    fn object_properties(&mut self, object: RawId, ty: ObjectType) -> Result<Vec<(RawId, u64)>>;
    fn property_info(&mut self, prop_id: RawId) -> Result<PropertyInfo>;

    fn create_blob(&mut self, data: &[u8]) -> Result<RawId>;
    fn destroy_blob(&mut self, blob_id: RawId) -> Result<()>;
    fn blob_data(&mut self, blob_id: RawId) -> Result<Vec<u8>>;

    fn set_client_cap(&mut self, cap: ClientCap, value: u64) -> Result<()>;

    /// Legacy full-CRTC programming (mode set + primary fb + connector
    /// routing in one call).
    #[allow(clippy::too_many_arguments)]
    fn set_crtc(
        &mut self,
        crtc_id: RawId,
        fb_id: u32,
        x: u32,
        y: u32,
        connectors: &[RawId],
        mode: Option<&DisplayMode>,
    ) -> Result<()>;

    /// Universal-plane programming. `src_*` are 16.16 fixed point.
    #[allow(clippy::too_many_arguments)]
    fn set_plane(
        &mut self,
        plane_id: RawId,
        crtc_id: RawId,
        fb_id: u32,
        crtc_x: i32,
        crtc_y: i32,
        crtc_w: u32,
        crtc_h: u32,
        src_x: u32,
        src_y: u32,
        src_w: u32,
        src_h: u32,
    ) -> Result<()>;

    fn set_cursor(&mut self, crtc_id: RawId, bo_handle: u32, w: u32, h: u32) -> Result<()>;
    fn move_cursor(&mut self, crtc_id: RawId, x: i32, y: i32) -> Result<()>;

    fn set_object_property(
        &mut self,
        object: RawId,
        ty: ObjectType,
        prop_id: RawId,
        value: u64,
    ) -> Result<()>;

    /// The pre-object-properties connector property ioctl; kept distinct
    /// because the legacy commit style goes through it.
    fn set_connector_property(
        &mut self,
        connector_id: RawId,
        prop_id: RawId,
        value: u64,
    ) -> Result<()>;

    fn atomic_commit(&mut self, req: &AtomicRequest, flags: CommitFlags) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    fn add_framebuffer(
        &mut self,
        width: u32,
        height: u32,
        format: Format,
        modifier: Option<Modifier>,
        handles: [u32; 4],
        pitches: [u32; 4],
        offsets: [u32; 4],
    ) -> Result<u32>;
    fn remove_framebuffer(&mut self, fb_id: u32) -> Result<()>;

    fn create_dumb(&mut self, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer>;
    fn destroy_dumb(&mut self, handle: u32) -> Result<()>;
    /// CPU view of a dumb buffer's backing store.
    fn map_dumb(&mut self, handle: u32) -> Result<&mut [u8]>;

    /// Block until `count` vblanks have passed on the given CRTC index and
    /// return the new sequence number.
    fn wait_vblank(&mut self, pipe_index: u32, count: u32) -> Result<u64>;
}

/// The slice of framebuffer state a plane binding needs: enough to program
/// FB_ID, default the src/dst rectangles and propagate color metadata.
#[derive(Copy, Clone, Debug)]
pub struct BoundFb {
    pub fb_id: u32,
    pub width: u32,
    pub height: u32,
    pub color_encoding: prism_color::ColorEncoding,
    pub color_range: prism_color::ColorRange,
    /// Buffer-object handle, used by the legacy cursor path.
    pub bo_handle: u32,
}
