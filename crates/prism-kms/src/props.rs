//! Property vocabularies for the three KMS object types.
//!
//! Each enum indexes a fixed-size value/id table on its object; the
//! `kernel_name` strings are what the property discovery pass matches
//! against, so they must be byte-exact with the kernel's.

/// Plane properties, in value-table order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum PlaneProp {
    SrcX = 0,
    SrcY,
    SrcW,
    SrcH,
    CrtcX,
    CrtcY,
    CrtcW,
    CrtcH,
    FbId,
    CrtcId,
    InFenceFd,
    Type,
    Rotation,
    InFormats,
    ColorEncoding,
    ColorRange,
    PixelBlendMode,
    Alpha,
    Zpos,
}

impl PlaneProp {
    pub const COUNT: usize = 19;

    pub const ALL: [PlaneProp; Self::COUNT] = [
        PlaneProp::SrcX,
        PlaneProp::SrcY,
        PlaneProp::SrcW,
        PlaneProp::SrcH,
        PlaneProp::CrtcX,
        PlaneProp::CrtcY,
        PlaneProp::CrtcW,
        PlaneProp::CrtcH,
        PlaneProp::FbId,
        PlaneProp::CrtcId,
        PlaneProp::InFenceFd,
        PlaneProp::Type,
        PlaneProp::Rotation,
        PlaneProp::InFormats,
        PlaneProp::ColorEncoding,
        PlaneProp::ColorRange,
        PlaneProp::PixelBlendMode,
        PlaneProp::Alpha,
        PlaneProp::Zpos,
    ];

    pub fn kernel_name(self) -> &'static str {
        match self {
            PlaneProp::SrcX => "SRC_X",
            PlaneProp::SrcY => "SRC_Y",
            PlaneProp::SrcW => "SRC_W",
            PlaneProp::SrcH => "SRC_H",
            PlaneProp::CrtcX => "CRTC_X",
            PlaneProp::CrtcY => "CRTC_Y",
            PlaneProp::CrtcW => "CRTC_W",
            PlaneProp::CrtcH => "CRTC_H",
            PlaneProp::FbId => "FB_ID",
            PlaneProp::CrtcId => "CRTC_ID",
            PlaneProp::InFenceFd => "IN_FENCE_FD",
            PlaneProp::Type => "type",
            PlaneProp::Rotation => "rotation",
            PlaneProp::InFormats => "IN_FORMATS",
            PlaneProp::ColorEncoding => "COLOR_ENCODING",
            PlaneProp::ColorRange => "COLOR_RANGE",
            PlaneProp::PixelBlendMode => "pixel blend mode",
            PlaneProp::Alpha => "alpha",
            PlaneProp::Zpos => "zpos",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Bits covering the SRC_*/CRTC_* rectangle properties, which the
    /// legacy SetPlane call programs as one unit.
    pub const COORD_MASK: u64 = (1 << 8) - 1;
}

/// CRTC properties, in value-table order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum CrtcProp {
    Background = 0,
    Ctm,
    GammaLut,
    GammaLutSize,
    DegammaLut,
    DegammaLutSize,
    ModeId,
    Active,
    OutFencePtr,
    VrrEnabled,
}

impl CrtcProp {
    pub const COUNT: usize = 10;

    pub const ALL: [CrtcProp; Self::COUNT] = [
        CrtcProp::Background,
        CrtcProp::Ctm,
        CrtcProp::GammaLut,
        CrtcProp::GammaLutSize,
        CrtcProp::DegammaLut,
        CrtcProp::DegammaLutSize,
        CrtcProp::ModeId,
        CrtcProp::Active,
        CrtcProp::OutFencePtr,
        CrtcProp::VrrEnabled,
    ];

    pub fn kernel_name(self) -> &'static str {
        match self {
            CrtcProp::Background => "background_color",
            CrtcProp::Ctm => "CTM",
            CrtcProp::GammaLut => "GAMMA_LUT",
            CrtcProp::GammaLutSize => "GAMMA_LUT_SIZE",
            CrtcProp::DegammaLut => "DEGAMMA_LUT",
            CrtcProp::DegammaLutSize => "DEGAMMA_LUT_SIZE",
            CrtcProp::ModeId => "MODE_ID",
            CrtcProp::Active => "ACTIVE",
            CrtcProp::OutFencePtr => "OUT_FENCE_PTR",
            CrtcProp::VrrEnabled => "VRR_ENABLED",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Properties that only exist under the atomic interface; legacy and
    /// universal commits must not try to program them via SetProperty.
    pub fn is_atomic_only(self) -> bool {
        matches!(
            self,
            CrtcProp::ModeId | CrtcProp::Active | CrtcProp::OutFencePtr
        )
    }
}

/// Connector properties, in value-table order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum ConnectorProp {
    ScalingMode = 0,
    CrtcId,
    Dpms,
    BroadcastRgb,
    ContentProtection,
    VrrCapable,
    HdcpContentType,
    LinkStatus,
}

impl ConnectorProp {
    pub const COUNT: usize = 8;

    pub const ALL: [ConnectorProp; Self::COUNT] = [
        ConnectorProp::ScalingMode,
        ConnectorProp::CrtcId,
        ConnectorProp::Dpms,
        ConnectorProp::BroadcastRgb,
        ConnectorProp::ContentProtection,
        ConnectorProp::VrrCapable,
        ConnectorProp::HdcpContentType,
        ConnectorProp::LinkStatus,
    ];

    pub fn kernel_name(self) -> &'static str {
        match self {
            ConnectorProp::ScalingMode => "scaling mode",
            ConnectorProp::CrtcId => "CRTC_ID",
            ConnectorProp::Dpms => "DPMS",
            ConnectorProp::BroadcastRgb => "Broadcast RGB",
            ConnectorProp::ContentProtection => "Content Protection",
            ConnectorProp::VrrCapable => "vrr_capable",
            ConnectorProp::HdcpContentType => "HDCP Content Type",
            ConnectorProp::LinkStatus => "link-status",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Plane hardware roles, kernel `DRM_PLANE_TYPE_*` values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PlaneType {
    Overlay,
    Primary,
    Cursor,
}

impl PlaneType {
    pub fn from_kernel_value(v: u64) -> Option<PlaneType> {
        match v {
            0 => Some(PlaneType::Overlay),
            1 => Some(PlaneType::Primary),
            2 => Some(PlaneType::Cursor),
            _ => None,
        }
    }

    pub fn kernel_value(self) -> u64 {
        match self {
            PlaneType::Overlay => 0,
            PlaneType::Primary => 1,
            PlaneType::Cursor => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PlaneType::Overlay => "overlay",
            PlaneType::Primary => "primary",
            PlaneType::Cursor => "cursor",
        }
    }
}

bitflags::bitflags! {
    /// Plane rotation/reflection, matching the kernel's rotation property
    /// bitmask.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Rotation: u64 {
        const ROT_0 = 1 << 0;
        const ROT_90 = 1 << 1;
        const ROT_180 = 1 << 2;
        const ROT_270 = 1 << 3;
        const REFLECT_X = 1 << 4;
        const REFLECT_Y = 1 << 5;
    }
}

impl Default for Rotation {
    fn default() -> Self {
        Rotation::ROT_0
    }
}

/// Per-object dirty bitmask over a property table.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DirtyMask(u64);

impl DirtyMask {
    pub fn set(&mut self, index: usize) {
        self.0 |= 1 << index;
    }

    pub fn clear(&mut self, index: usize) {
        self.0 &= !(1 << index);
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0 & (1 << index) != 0
    }

    pub fn any(&self) -> bool {
        self.0 != 0
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn clear_all(&mut self) {
        self.0 = 0;
    }

    /// Keeps only the bits present in `mask`.
    pub fn retain(&mut self, mask: u64) {
        self.0 &= mask;
    }

    /// Drops every bit present in `mask`.
    pub fn remove(&mut self, mask: u64) {
        self.0 &= !mask;
    }

    pub fn intersects(&self, mask: u64) -> bool {
        self.0 & mask != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_order_matches_indices() {
        for (i, p) in PlaneProp::ALL.iter().enumerate() {
            assert_eq!(p.index(), i);
        }
        for (i, p) in CrtcProp::ALL.iter().enumerate() {
            assert_eq!(p.index(), i);
        }
        for (i, p) in ConnectorProp::ALL.iter().enumerate() {
            assert_eq!(p.index(), i);
        }
    }

    #[test]
    fn coord_mask_covers_the_rectangles_only() {
        for p in [
            PlaneProp::SrcX,
            PlaneProp::SrcH,
            PlaneProp::CrtcX,
            PlaneProp::CrtcH,
        ] {
            assert!(PlaneProp::COORD_MASK & (1 << p.index()) != 0);
        }
        assert_eq!(PlaneProp::COORD_MASK & (1 << PlaneProp::FbId.index()), 0);
        assert_eq!(PlaneProp::COORD_MASK & (1 << PlaneProp::Rotation.index()), 0);
    }

    #[test]
    fn atomic_only_crtc_props() {
        assert!(CrtcProp::ModeId.is_atomic_only());
        assert!(CrtcProp::Active.is_atomic_only());
        assert!(CrtcProp::OutFencePtr.is_atomic_only());
        assert!(!CrtcProp::Ctm.is_atomic_only());
    }

    #[test]
    fn dirty_mask_ops() {
        let mut m = DirtyMask::default();
        assert!(!m.any());
        m.set(3);
        m.set(9);
        assert!(m.contains(3) && m.contains(9));
        m.remove(1 << 3);
        assert!(!m.contains(3) && m.contains(9));
        m.retain(0);
        assert!(!m.any());
    }
}
