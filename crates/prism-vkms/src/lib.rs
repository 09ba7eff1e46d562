//! An in-memory KMS device model.
//!
//! [`VirtualDevice`] implements [`prism_kms::ModeDevice`] entirely in
//! memory with kernel-shaped validation: unknown objects and properties
//! are rejected, enum and range values are checked against the property
//! definition, framebuffer formats are checked against the target plane,
//! and atomic requests validate completely before applying anything
//! (TEST_ONLY applies nothing).
//!
//! Tests build a device, run display code against it, then inspect what
//! was actually committed: per-plane scanout state, per-CRTC mode/active
//! state, connector routing, and the ordered call log.

use std::collections::HashMap;

use prism_fourcc::{Format, Modifier};
use prism_kms::{
    encode_in_formats, AtomicRequest, CardResources, ClientCap, CommitFlags, ConnectorInfo,
    ConnectorStatus, ConnectorType, DisplayMode, DumbBuffer, EncoderInfo, KmsError, ModeDevice,
    ModeFlags, ModeType, ObjectType, PlaneInfo, PlaneType, PropertyInfo, PropertyKind, RawId,
    Result,
};
use tracing::trace;

/// One plane in a topology description.
#[derive(Clone, Debug)]
pub struct PlaneSpec {
    pub ty: PlaneType,
    /// Bitmask over CRTC indices.
    pub possible_crtcs: u32,
    pub formats: Vec<(Format, Modifier)>,
    /// Expose the format list through an IN_FORMATS blob (modern kernels)
    /// instead of the bare format array.
    pub with_in_formats: bool,
}

impl PlaneSpec {
    pub fn new(ty: PlaneType, possible_crtcs: u32) -> Self {
        PlaneSpec {
            ty,
            possible_crtcs,
            formats: vec![
                (Format::XRGB8888, Modifier::LINEAR),
                (Format::ARGB8888, Modifier::LINEAR),
            ],
            with_in_formats: true,
        }
    }

    pub fn with_formats(mut self, formats: Vec<(Format, Modifier)>) -> Self {
        self.formats = formats;
        self
    }
}

/// One connector in a topology description.
#[derive(Clone, Debug)]
pub struct ConnectorSpec {
    pub connector_type: ConnectorType,
    pub status: ConnectorStatus,
    pub modes: Vec<DisplayMode>,
    /// Bitmask over CRTC indices reachable through this connector's
    /// encoder.
    pub possible_crtcs: u32,
}

impl ConnectorSpec {
    pub fn connected(connector_type: ConnectorType, possible_crtcs: u32) -> Self {
        ConnectorSpec {
            connector_type,
            status: ConnectorStatus::Connected,
            modes: standard_modes(),
            possible_crtcs,
        }
    }

    pub fn disconnected(connector_type: ConnectorType, possible_crtcs: u32) -> Self {
        ConnectorSpec {
            connector_type,
            status: ConnectorStatus::Disconnected,
            modes: Vec::new(),
            possible_crtcs,
        }
    }
}

/// 1024x768@60 (preferred) plus 800x600@60.
pub fn standard_modes() -> Vec<DisplayMode> {
    let mut preferred = DisplayMode::std_1024_mode();
    preferred.mode_type |= ModeType::PREFERRED;
    let svga = DisplayMode {
        clock_khz: 40000,
        hdisplay: 800,
        hsync_start: 840,
        hsync_end: 968,
        htotal: 1056,
        hskew: 0,
        vdisplay: 600,
        vsync_start: 601,
        vsync_end: 605,
        vtotal: 628,
        vscan: 0,
        vrefresh: 60,
        flags: ModeFlags::PHSYNC | ModeFlags::PVSYNC,
        mode_type: ModeType::DRIVER,
        name: "800x600".into(),
    };
    vec![preferred, svga]
}

/// Topology description consumed by [`VirtualDevice::with_topology`].
#[derive(Clone, Debug)]
pub struct Topology {
    pub crtcs: usize,
    pub planes: Vec<PlaneSpec>,
    pub connectors: Vec<ConnectorSpec>,
    /// Whether the device accepts the ATOMIC client cap.
    pub atomic: bool,
}

impl Topology {
    /// Two pipes, primary/cursor per pipe plus one shared overlay, one
    /// connected DP output and one disconnected HDMI output.
    pub fn standard() -> Topology {
        Topology {
            crtcs: 2,
            planes: vec![
                PlaneSpec::new(PlaneType::Primary, 0b01).with_formats(vec![
                    (Format::XRGB8888, Modifier::LINEAR),
                    (Format::ARGB8888, Modifier::LINEAR),
                    (Format::XRGB8888, Modifier::I915_X_TILED),
                    (Format::NV12, Modifier::LINEAR),
                ]),
                PlaneSpec::new(PlaneType::Primary, 0b10),
                PlaneSpec::new(PlaneType::Overlay, 0b11).with_formats(vec![
                    (Format::XRGB8888, Modifier::LINEAR),
                    (Format::YUYV, Modifier::LINEAR),
                ]),
                PlaneSpec::new(PlaneType::Cursor, 0b01),
                PlaneSpec::new(PlaneType::Cursor, 0b10),
            ],
            connectors: vec![
                ConnectorSpec::connected(ConnectorType::DisplayPort, 0b11),
                ConnectorSpec::disconnected(ConnectorType::HdmiA, 0b11),
            ],
            atomic: true,
        }
    }

    /// [`Topology::standard`] with the atomic cap refused, for exercising
    /// the legacy-only paths.
    pub fn legacy_only() -> Topology {
        Topology {
            atomic: false,
            ..Topology::standard()
        }
    }
}

/// Everything the device remembers about one committed plane.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaneScanout {
    pub crtc_id: u32,
    pub fb_id: u32,
    /// 16.16 fixed point, as programmed.
    pub src: (u32, u32, u32, u32),
    pub dst: (i32, i32, u32, u32),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CrtcScanout {
    pub active: bool,
    pub mode: Option<DisplayMode>,
    /// Framebuffer from legacy SetCrtc (atomic commits program the primary
    /// plane instead).
    pub fb_id: u32,
    pub cursor_bo: u32,
    pub cursor_size: (u32, u32),
    pub cursor_pos: (i32, i32),
}

/// Ordered record of the modesetting calls a test provoked.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    SetCrtc {
        crtc: u32,
        fb: u32,
        connectors: Vec<u32>,
        mode: Option<String>,
    },
    SetPlane {
        plane: u32,
        crtc: u32,
        fb: u32,
    },
    SetCursor {
        crtc: u32,
        bo: u32,
    },
    MoveCursor {
        crtc: u32,
        x: i32,
        y: i32,
    },
    SetProperty {
        object: u32,
        prop: String,
        value: u64,
    },
    ConnectorProperty {
        connector: u32,
        prop: String,
        value: u64,
    },
    AtomicCommit {
        props: usize,
        test_only: bool,
    },
}

struct PropDef {
    info: PropertyInfo,
    immutable: bool,
}

struct ConnectorState {
    spec: ConnectorSpec,
    encoder_id: RawId,
    probe_count: u32,
}

struct DumbEntry {
    data: Vec<u8>,
    pitch: u32,
}

#[derive(Clone, Debug)]
struct FbEntry {
    width: u32,
    height: u32,
    format: Format,
    modifier: Modifier,
    handles: [u32; 4],
}

/// The device model. See the crate docs.
pub struct VirtualDevice {
    next_id: RawId,
    crtc_ids: Vec<RawId>,
    plane_ids: Vec<RawId>,
    connector_ids: Vec<RawId>,
    encoder_ids: Vec<RawId>,

    planes: HashMap<RawId, PlaneSpec>,
    connectors: HashMap<RawId, ConnectorState>,
    encoders: HashMap<RawId, EncoderInfo>,

    prop_defs: HashMap<RawId, PropDef>,
    /// Current property values per object, in discovery order.
    obj_props: HashMap<RawId, Vec<(RawId, u64)>>,

    blobs: HashMap<RawId, Vec<u8>>,
    fbs: HashMap<u32, FbEntry>,
    dumbs: HashMap<u32, DumbEntry>,

    atomic_supported: bool,
    atomic_enabled: bool,
    universal_planes: bool,

    plane_scanout: HashMap<RawId, PlaneScanout>,
    crtc_scanout: HashMap<RawId, CrtcScanout>,
    connector_crtc: HashMap<RawId, u32>,

    vblank: u64,
    ops: Vec<Op>,
}

impl VirtualDevice {
    pub fn standard() -> VirtualDevice {
        Self::with_topology(Topology::standard())
    }

    pub fn with_topology(topology: Topology) -> VirtualDevice {
        let mut dev = VirtualDevice {
            next_id: 1,
            crtc_ids: Vec::new(),
            plane_ids: Vec::new(),
            connector_ids: Vec::new(),
            encoder_ids: Vec::new(),
            planes: HashMap::new(),
            connectors: HashMap::new(),
            encoders: HashMap::new(),
            prop_defs: HashMap::new(),
            obj_props: HashMap::new(),
            blobs: HashMap::new(),
            fbs: HashMap::new(),
            dumbs: HashMap::new(),
            atomic_supported: topology.atomic,
            atomic_enabled: false,
            universal_planes: false,
            plane_scanout: HashMap::new(),
            crtc_scanout: HashMap::new(),
            connector_crtc: HashMap::new(),
            vblank: 0,
            ops: Vec::new(),
        };
        dev.build(topology);
        dev
    }

    fn alloc_id(&mut self) -> RawId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn define_prop(&mut self, name: &str, kind: PropertyKind, immutable: bool) -> RawId {
        // Reuse one definition per name, like the kernel does.
        if let Some((&id, _)) = self
            .prop_defs
            .iter()
            .find(|(_, d)| d.info.name == name)
        {
            return id;
        }
        let id = self.alloc_id();
        self.prop_defs.insert(
            id,
            PropDef {
                info: PropertyInfo {
                    prop_id: id,
                    name: name.to_owned(),
                    kind,
                },
                immutable,
            },
        );
        id
    }

    fn enum_kind(values: &[(u64, &str)]) -> PropertyKind {
        PropertyKind::Enum {
            values: values.iter().map(|&(v, n)| (v, n.to_owned())).collect(),
        }
    }

    fn build(&mut self, topology: Topology) {
        for _ in 0..topology.crtcs {
            let id = self.alloc_id();
            self.crtc_ids.push(id);
            self.crtc_scanout.insert(id, CrtcScanout::default());
        }

        for crtc in self.crtc_ids.clone() {
            let props = vec![
                (self.define_prop("MODE_ID", PropertyKind::Blob, false), 0),
                (
                    self.define_prop("ACTIVE", PropertyKind::Range { min: 0, max: 1 }, false),
                    0,
                ),
                (
                    self.define_prop(
                        "OUT_FENCE_PTR",
                        PropertyKind::Range {
                            min: 0,
                            max: u64::MAX,
                        },
                        false,
                    ),
                    0,
                ),
                (self.define_prop("CTM", PropertyKind::Blob, false), 0),
                (self.define_prop("GAMMA_LUT", PropertyKind::Blob, false), 0),
                (
                    self.define_prop(
                        "GAMMA_LUT_SIZE",
                        PropertyKind::Range { min: 0, max: 4096 },
                        true,
                    ),
                    256,
                ),
                (self.define_prop("DEGAMMA_LUT", PropertyKind::Blob, false), 0),
                (
                    self.define_prop(
                        "DEGAMMA_LUT_SIZE",
                        PropertyKind::Range { min: 0, max: 4096 },
                        true,
                    ),
                    256,
                ),
                (
                    self.define_prop("VRR_ENABLED", PropertyKind::Range { min: 0, max: 1 }, false),
                    0,
                ),
            ];
            self.obj_props.insert(crtc, props);
        }

        let n_planes = topology.planes.len() as u64;
        for spec in topology.planes {
            let id = self.alloc_id();
            self.plane_ids.push(id);
            self.plane_scanout.insert(id, PlaneScanout::default());

            let type_prop = self.define_prop(
                "type",
                Self::enum_kind(&[(0, "Overlay"), (1, "Primary"), (2, "Cursor")]),
                true,
            );
            let coord_range = PropertyKind::Range {
                min: 0,
                max: u32::MAX as u64,
            };
            let signed_coord = PropertyKind::SignedRange {
                min: i32::MIN as i64,
                max: i32::MAX as i64,
            };

            let mut props = vec![
                (type_prop, spec.ty.kernel_value()),
                (self.define_prop("SRC_X", coord_range.clone(), false), 0),
                (self.define_prop("SRC_Y", coord_range.clone(), false), 0),
                (self.define_prop("SRC_W", coord_range.clone(), false), 0),
                (self.define_prop("SRC_H", coord_range.clone(), false), 0),
                (self.define_prop("CRTC_X", signed_coord.clone(), false), 0),
                (self.define_prop("CRTC_Y", signed_coord.clone(), false), 0),
                (self.define_prop("CRTC_W", coord_range.clone(), false), 0),
                (self.define_prop("CRTC_H", coord_range.clone(), false), 0),
                (self.define_prop("FB_ID", PropertyKind::Object, false), 0),
                (self.define_prop("CRTC_ID", PropertyKind::Object, false), 0),
                (
                    self.define_prop(
                        "IN_FENCE_FD",
                        PropertyKind::SignedRange {
                            min: -1,
                            max: i32::MAX as i64,
                        },
                        false,
                    ),
                    u64::MAX,
                ),
                (
                    self.define_prop(
                        "rotation",
                        PropertyKind::Bitmask {
                            values: vec![
                                (0, "rotate-0".into()),
                                (1, "rotate-90".into()),
                                (2, "rotate-180".into()),
                                (3, "rotate-270".into()),
                                (4, "reflect-x".into()),
                                (5, "reflect-y".into()),
                            ],
                        },
                        false,
                    ),
                    1,
                ),
                (
                    self.define_prop(
                        "COLOR_ENCODING",
                        Self::enum_kind(&[
                            (0, "ITU-R BT.601 YCbCr"),
                            (1, "ITU-R BT.709 YCbCr"),
                            (2, "ITU-R BT.2020 YCbCr"),
                        ]),
                        false,
                    ),
                    0,
                ),
                (
                    self.define_prop(
                        "COLOR_RANGE",
                        Self::enum_kind(&[(0, "YCbCr limited range"), (1, "YCbCr full range")]),
                        false,
                    ),
                    0,
                ),
                (
                    self.define_prop(
                        "pixel blend mode",
                        Self::enum_kind(&[(0, "Pre-multiplied"), (1, "Coverage"), (2, "None")]),
                        false,
                    ),
                    0,
                ),
                (
                    self.define_prop("alpha", PropertyKind::Range { min: 0, max: 0xffff }, false),
                    0xffff,
                ),
                (
                    self.define_prop(
                        "zpos",
                        PropertyKind::Range {
                            min: 0,
                            max: n_planes - 1,
                        },
                        false,
                    ),
                    0,
                ),
            ];

            if spec.with_in_formats {
                let blob = encode_in_formats(&spec.formats);
                let blob_id = self.alloc_id();
                self.blobs.insert(blob_id, blob);
                let prop = self.define_prop("IN_FORMATS", PropertyKind::Blob, true);
                props.push((prop, blob_id as u64));
            }

            self.obj_props.insert(id, props);
            self.planes.insert(id, spec);
        }

        for spec in topology.connectors {
            let encoder_id = self.alloc_id();
            self.encoder_ids.push(encoder_id);
            self.encoders.insert(
                encoder_id,
                EncoderInfo {
                    encoder_id,
                    possible_crtcs: spec.possible_crtcs,
                },
            );

            let id = self.alloc_id();
            self.connector_ids.push(id);
            self.connector_crtc.insert(id, 0);

            let props = vec![
                (self.define_prop("CRTC_ID", PropertyKind::Object, false), 0),
                (
                    self.define_prop(
                        "DPMS",
                        Self::enum_kind(&[
                            (0, "On"),
                            (1, "Standby"),
                            (2, "Suspend"),
                            (3, "Off"),
                        ]),
                        false,
                    ),
                    0,
                ),
                (
                    self.define_prop(
                        "link-status",
                        Self::enum_kind(&[(0, "Good"), (1, "Bad")]),
                        false,
                    ),
                    0,
                ),
                (
                    self.define_prop(
                        "Broadcast RGB",
                        Self::enum_kind(&[(0, "Automatic"), (1, "Full"), (2, "Limited 16:235")]),
                        false,
                    ),
                    0,
                ),
                (
                    self.define_prop(
                        "Content Protection",
                        Self::enum_kind(&[(0, "Undesired"), (1, "Desired"), (2, "Enabled")]),
                        false,
                    ),
                    0,
                ),
                (
                    self.define_prop(
                        "HDCP Content Type",
                        Self::enum_kind(&[(0, "HDCP Type0"), (1, "HDCP Type1")]),
                        false,
                    ),
                    0,
                ),
                (
                    self.define_prop(
                        "scaling mode",
                        Self::enum_kind(&[(0, "None"), (1, "Full"), (2, "Center"), (3, "Full aspect")]),
                        false,
                    ),
                    0,
                ),
                (
                    self.define_prop("vrr_capable", PropertyKind::Range { min: 0, max: 1 }, true),
                    0,
                ),
            ];
            self.obj_props.insert(id, props);
            self.connectors.insert(
                id,
                ConnectorState {
                    spec,
                    encoder_id,
                    probe_count: 0,
                },
            );
        }
    }

    // ------------------------------------------------------------------
    // Test-side inspection and stimulus
    // ------------------------------------------------------------------

    pub fn crtc_ids(&self) -> &[RawId] {
        &self.crtc_ids
    }

    pub fn plane_id_at(&self, index: usize) -> RawId {
        self.plane_ids[index]
    }

    pub fn connector_id_at(&self, index: usize) -> RawId {
        self.connector_ids[index]
    }

    pub fn plane_scanout(&self, plane_id: RawId) -> &PlaneScanout {
        &self.plane_scanout[&plane_id]
    }

    pub fn crtc_scanout(&self, crtc_id: RawId) -> &CrtcScanout {
        &self.crtc_scanout[&crtc_id]
    }

    pub fn connector_routing(&self, connector_id: RawId) -> u32 {
        self.connector_crtc[&connector_id]
    }

    /// Current value of a property by kernel name, as the device holds it.
    pub fn property_value(&self, object: RawId, name: &str) -> Option<u64> {
        let props = self.obj_props.get(&object)?;
        props
            .iter()
            .find(|(id, _)| {
                self.prop_defs
                    .get(id)
                    .map(|d| d.info.name == name)
                    .unwrap_or(false)
            })
            .map(|&(_, v)| v)
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<Op> {
        std::mem::take(&mut self.ops)
    }

    pub fn blob_exists(&self, blob_id: RawId) -> bool {
        self.blobs.contains_key(&blob_id)
    }

    pub fn fb_count(&self) -> usize {
        self.fbs.len()
    }

    pub fn probe_count(&self, connector_id: RawId) -> u32 {
        self.connectors[&connector_id].probe_count
    }

    /// Simulates a hotplug: swaps the connector's status and mode list.
    pub fn set_connector_state(
        &mut self,
        connector_id: RawId,
        status: ConnectorStatus,
        modes: Vec<DisplayMode>,
    ) {
        if let Some(c) = self.connectors.get_mut(&connector_id) {
            c.spec.status = status;
            c.spec.modes = modes;
        }
    }

    // ------------------------------------------------------------------
    // Validation helpers
    // ------------------------------------------------------------------

    fn prop_def(&self, prop_id: RawId) -> Result<&PropDef> {
        self.prop_defs
            .get(&prop_id)
            .ok_or(KmsError::NoSuchObject(prop_id))
    }

    fn object_has_prop(&self, object: RawId, prop_id: RawId) -> Result<()> {
        let props = self
            .obj_props
            .get(&object)
            .ok_or(KmsError::NoSuchObject(object))?;
        if props.iter().any(|&(id, _)| id == prop_id) {
            Ok(())
        } else {
            Err(KmsError::NoSuchObject(prop_id))
        }
    }

    fn validate_value(&self, object: RawId, prop_id: RawId, value: u64) -> Result<()> {
        let def = self.prop_def(prop_id)?;
        if def.immutable {
            return Err(KmsError::InvalidArgument(format!(
                "property \"{}\" is immutable",
                def.info.name
            )));
        }
        let bad = |msg: String| Err(KmsError::InvalidArgument(msg));
        match &def.info.kind {
            PropertyKind::Range { min, max } => {
                if value < *min || value > *max {
                    return bad(format!(
                        "value {value} outside range {min}..={max} for \"{}\"",
                        def.info.name
                    ));
                }
            }
            PropertyKind::SignedRange { min, max } => {
                let v = value as i64;
                if v < *min || v > *max {
                    return bad(format!(
                        "value {v} outside range {min}..={max} for \"{}\"",
                        def.info.name
                    ));
                }
            }
            PropertyKind::Enum { values } => {
                if !values.iter().any(|&(v, _)| v == value) {
                    return bad(format!(
                        "value {value} not a \"{}\" enum value",
                        def.info.name
                    ));
                }
            }
            PropertyKind::Bitmask { values } => {
                let allowed: u64 = values.iter().map(|&(bit, _)| 1u64 << bit).sum();
                if value & !allowed != 0 {
                    return bad(format!(
                        "value {value:#x} has bits outside \"{}\"",
                        def.info.name
                    ));
                }
                if def.info.name == "rotation" && (value & 0xf).count_ones() != 1 {
                    return bad("rotation needs exactly one angle bit".into());
                }
            }
            PropertyKind::Blob => {
                if value != 0 && !self.blobs.contains_key(&(value as RawId)) {
                    return bad(format!("blob {value} does not exist"));
                }
            }
            PropertyKind::Object => match def.info.name.as_str() {
                "FB_ID" => {
                    if value != 0 && !self.fbs.contains_key(&(value as u32)) {
                        return bad(format!("fb {value} does not exist"));
                    }
                }
                "CRTC_ID" => {
                    if value != 0 && !self.crtc_ids.contains(&(value as RawId)) {
                        return bad(format!("crtc {value} does not exist"));
                    }
                }
                _ => {}
            },
        }
        let _ = object;
        Ok(())
    }

    fn store_value(&mut self, object: RawId, prop_id: RawId, value: u64) {
        if let Some(props) = self.obj_props.get_mut(&object) {
            if let Some(slot) = props.iter_mut().find(|(id, _)| *id == prop_id) {
                slot.1 = value;
            }
        }
    }

    fn prop_name(&self, prop_id: RawId) -> String {
        self.prop_defs
            .get(&prop_id)
            .map(|d| d.info.name.clone())
            .unwrap_or_else(|| format!("#{prop_id}"))
    }

    fn fb_format_ok_for_plane(&self, plane_id: RawId, fb_id: u32) -> Result<()> {
        let Some(fb) = self.fbs.get(&fb_id) else {
            return Err(KmsError::InvalidArgument(format!("fb {fb_id} does not exist")));
        };
        let spec = &self.planes[&plane_id];
        if !spec
            .formats
            .iter()
            .any(|&(f, m)| f == fb.format && m == fb.modifier)
        {
            return Err(KmsError::InvalidArgument(format!(
                "plane {plane_id} does not support {} with {:?}",
                fb.format, fb.modifier
            )));
        }
        Ok(())
    }

    /// Interprets a validated property write into scanout state.
    fn apply_semantic(&mut self, object: RawId, prop_name: &str, value: u64) -> Result<()> {
        if self.plane_ids.contains(&object) {
            let Some(state) = self.plane_scanout.get_mut(&object) else {
                return Err(KmsError::NoSuchObject(object));
            };
            match prop_name {
                "FB_ID" => state.fb_id = value as u32,
                "CRTC_ID" => state.crtc_id = value as u32,
                "SRC_X" => state.src.0 = value as u32,
                "SRC_Y" => state.src.1 = value as u32,
                "SRC_W" => state.src.2 = value as u32,
                "SRC_H" => state.src.3 = value as u32,
                "CRTC_X" => state.dst.0 = value as i32,
                "CRTC_Y" => state.dst.1 = value as i32,
                "CRTC_W" => state.dst.2 = value as u32,
                "CRTC_H" => state.dst.3 = value as u32,
                _ => {}
            }
        } else if self.crtc_ids.contains(&object) {
            let Some(state) = self.crtc_scanout.get_mut(&object) else {
                return Err(KmsError::NoSuchObject(object));
            };
            match prop_name {
                "ACTIVE" => state.active = value != 0,
                "MODE_ID" => {
                    state.mode = if value == 0 {
                        None
                    } else {
                        let data = self
                            .blobs
                            .get(&(value as RawId))
                            .ok_or(KmsError::NoSuchObject(value as RawId))?;
                        Some(DisplayMode::from_blob_bytes(data).ok_or_else(|| {
                            KmsError::InvalidArgument("malformed mode blob".into())
                        })?)
                    }
                }
                _ => {}
            }
        } else if self.connector_ids.contains(&object) {
            if prop_name == "CRTC_ID" {
                self.connector_crtc.insert(object, value as u32);
            }
        }
        Ok(())
    }
}

impl ModeDevice for VirtualDevice {
    fn resources(&mut self) -> Result<CardResources> {
        Ok(CardResources {
            crtcs: self.crtc_ids.clone(),
            connectors: self.connector_ids.clone(),
            encoders: self.encoder_ids.clone(),
            min_size: (0, 0),
            max_size: (16384, 16384),
        })
    }

    fn plane_ids(&mut self) -> Result<Vec<RawId>> {
        // The full plane list is only visible with the universal-planes
        // cap; without it the kernel hides primaries and cursors. Display
        // setup always negotiates the cap, so model the strict behavior.
        if !self.universal_planes {
            return Err(KmsError::NotSupported("universal planes cap not enabled"));
        }
        Ok(self.plane_ids.clone())
    }

    fn plane(&mut self, plane_id: RawId) -> Result<PlaneInfo> {
        let spec = self
            .planes
            .get(&plane_id)
            .ok_or(KmsError::NoSuchObject(plane_id))?;
        let mut formats: Vec<Format> = Vec::new();
        for &(f, _) in &spec.formats {
            if !formats.contains(&f) {
                formats.push(f);
            }
        }
        Ok(PlaneInfo {
            plane_id,
            possible_crtcs: spec.possible_crtcs,
            formats,
        })
    }

    fn encoder(&mut self, encoder_id: RawId) -> Result<EncoderInfo> {
        self.encoders
            .get(&encoder_id)
            .cloned()
            .ok_or(KmsError::NoSuchObject(encoder_id))
    }

    fn connector(&mut self, connector_id: RawId, probe: bool) -> Result<ConnectorInfo> {
        let ctype = self
            .connectors
            .get(&connector_id)
            .ok_or(KmsError::NoSuchObject(connector_id))?
            .spec
            .connector_type;
        let type_id = self
            .connector_ids
            .iter()
            .filter(|&&id| id <= connector_id && self.connectors[&id].spec.connector_type == ctype)
            .count() as u32;
        let state = self
            .connectors
            .get_mut(&connector_id)
            .ok_or(KmsError::NoSuchObject(connector_id))?;
        if probe {
            state.probe_count += 1;
        }
        Ok(ConnectorInfo {
            connector_id,
            connector_type: state.spec.connector_type,
            connector_type_id: type_id,
            connection: state.spec.status,
            mm_width: 310,
            mm_height: 170,
            modes: state.spec.modes.clone(),
            encoders: vec![state.encoder_id],
        })
    }

    fn object_properties(&mut self, object: RawId, _ty: ObjectType) -> Result<Vec<(RawId, u64)>> {
        self.obj_props
            .get(&object)
            .cloned()
            .ok_or(KmsError::NoSuchObject(object))
    }

    fn property_info(&mut self, prop_id: RawId) -> Result<PropertyInfo> {
        Ok(self.prop_def(prop_id)?.info.clone())
    }

    fn create_blob(&mut self, data: &[u8]) -> Result<RawId> {
        if data.is_empty() {
            return Err(KmsError::InvalidArgument("empty blob".into()));
        }
        let id = self.alloc_id();
        self.blobs.insert(id, data.to_vec());
        Ok(id)
    }

    fn destroy_blob(&mut self, blob_id: RawId) -> Result<()> {
        self.blobs
            .remove(&blob_id)
            .map(|_| ())
            .ok_or(KmsError::NoSuchObject(blob_id))
    }

    fn blob_data(&mut self, blob_id: RawId) -> Result<Vec<u8>> {
        self.blobs
            .get(&blob_id)
            .cloned()
            .ok_or(KmsError::NoSuchObject(blob_id))
    }

    fn set_client_cap(&mut self, cap: ClientCap, value: u64) -> Result<()> {
        match cap {
            ClientCap::UniversalPlanes => {
                self.universal_planes = value != 0;
                Ok(())
            }
            ClientCap::Atomic => {
                if !self.atomic_supported {
                    return Err(KmsError::NotSupported("atomic"));
                }
                self.atomic_enabled = value != 0;
                Ok(())
            }
        }
    }

    fn set_crtc(
        &mut self,
        crtc_id: RawId,
        fb_id: u32,
        x: u32,
        y: u32,
        connectors: &[RawId],
        mode: Option<&DisplayMode>,
    ) -> Result<()> {
        if !self.crtc_ids.contains(&crtc_id) {
            return Err(KmsError::NoSuchObject(crtc_id));
        }
        for c in connectors {
            if !self.connector_ids.contains(c) {
                return Err(KmsError::NoSuchObject(*c));
            }
        }
        if fb_id != 0 {
            if !self.fbs.contains_key(&fb_id) {
                return Err(KmsError::InvalidArgument(format!("fb {fb_id} does not exist")));
            }
            if mode.is_none() || connectors.is_empty() {
                return Err(KmsError::InvalidArgument(
                    "enabling a crtc needs a mode and at least one connector".into(),
                ));
            }
        }

        trace!(crtc_id, fb_id, x, y, "SetCrtc");
        self.ops.push(Op::SetCrtc {
            crtc: crtc_id,
            fb: fb_id,
            connectors: connectors.to_vec(),
            mode: mode.map(|m| m.name.clone()),
        });

        let Some(state) = self.crtc_scanout.get_mut(&crtc_id) else {
            return Err(KmsError::NoSuchObject(crtc_id));
        };
        state.fb_id = fb_id;
        state.active = fb_id != 0;
        state.mode = mode.cloned();

        // Routing follows SetCrtc on the legacy path.
        for (&conn, slot) in self.connector_crtc.iter_mut() {
            if connectors.contains(&conn) {
                *slot = crtc_id;
            } else if *slot == crtc_id {
                *slot = 0;
            }
        }
        Ok(())
    }

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
    ) -> Result<()> {
        if !self.planes.contains_key(&plane_id) {
            return Err(KmsError::NoSuchObject(plane_id));
        }
        if fb_id != 0 {
            if !self.crtc_ids.contains(&crtc_id) {
                return Err(KmsError::NoSuchObject(crtc_id));
            }
            self.fb_format_ok_for_plane(plane_id, fb_id)?;
            let fb = &self.fbs[&fb_id];
            // Source rectangle must stay inside the fb (16.16 coordinates).
            let fits = |pos: u32, extent: u32, bound: u32| {
                (pos as u64 + extent as u64) <= (bound as u64) << 16
            };
            if !fits(src_x, src_w, fb.width) || !fits(src_y, src_h, fb.height) {
                return Err(KmsError::InvalidArgument(format!(
                    "source rect out of fb bounds ({}x{})",
                    fb.width, fb.height
                )));
            }
        }

        trace!(plane_id, crtc_id, fb_id, "SetPlane");
        self.ops.push(Op::SetPlane {
            plane: plane_id,
            crtc: crtc_id,
            fb: fb_id,
        });

        let Some(state) = self.plane_scanout.get_mut(&plane_id) else {
            return Err(KmsError::NoSuchObject(plane_id));
        };
        if fb_id == 0 {
            *state = PlaneScanout::default();
        } else {
            *state = PlaneScanout {
                crtc_id,
                fb_id,
                src: (src_x, src_y, src_w, src_h),
                dst: (crtc_x, crtc_y, crtc_w, crtc_h),
            };
        }
        Ok(())
    }

    fn set_cursor(&mut self, crtc_id: RawId, bo_handle: u32, w: u32, h: u32) -> Result<()> {
        if !self.crtc_ids.contains(&crtc_id) {
            return Err(KmsError::NoSuchObject(crtc_id));
        }
        if bo_handle != 0 && !self.dumbs.contains_key(&bo_handle) {
            return Err(KmsError::InvalidArgument(format!(
                "cursor bo {bo_handle} does not exist"
            )));
        }
        self.ops.push(Op::SetCursor {
            crtc: crtc_id,
            bo: bo_handle,
        });
        let Some(state) = self.crtc_scanout.get_mut(&crtc_id) else {
            return Err(KmsError::NoSuchObject(crtc_id));
        };
        state.cursor_bo = bo_handle;
        state.cursor_size = (w, h);
        Ok(())
    }

    fn move_cursor(&mut self, crtc_id: RawId, x: i32, y: i32) -> Result<()> {
        if !self.crtc_ids.contains(&crtc_id) {
            return Err(KmsError::NoSuchObject(crtc_id));
        }
        self.ops.push(Op::MoveCursor {
            crtc: crtc_id,
            x,
            y,
        });
        let Some(state) = self.crtc_scanout.get_mut(&crtc_id) else {
            return Err(KmsError::NoSuchObject(crtc_id));
        };
        state.cursor_pos = (x, y);
        Ok(())
    }

    fn set_object_property(
        &mut self,
        object: RawId,
        _ty: ObjectType,
        prop_id: RawId,
        value: u64,
    ) -> Result<()> {
        self.object_has_prop(object, prop_id)?;
        self.validate_value(object, prop_id, value)?;
        let name = self.prop_name(prop_id);
        self.ops.push(Op::SetProperty {
            object,
            prop: name.clone(),
            value,
        });
        self.store_value(object, prop_id, value);
        self.apply_semantic(object, &name, value)
    }

    fn set_connector_property(
        &mut self,
        connector_id: RawId,
        prop_id: RawId,
        value: u64,
    ) -> Result<()> {
        if !self.connector_ids.contains(&connector_id) {
            return Err(KmsError::NoSuchObject(connector_id));
        }
        self.object_has_prop(connector_id, prop_id)?;
        self.validate_value(connector_id, prop_id, value)?;
        let name = self.prop_name(prop_id);
        self.ops.push(Op::ConnectorProperty {
            connector: connector_id,
            prop: name.clone(),
            value,
        });
        self.store_value(connector_id, prop_id, value);
        self.apply_semantic(connector_id, &name, value)
    }

    fn atomic_commit(&mut self, req: &AtomicRequest, flags: CommitFlags) -> Result<()> {
        if !self.atomic_enabled {
            return Err(KmsError::NotSupported("atomic cap not enabled"));
        }

        // Validate the whole request before touching any state.
        for &(object, prop_id, value) in req.props() {
            self.object_has_prop(object, prop_id)?;
            self.validate_value(object, prop_id, value)?;
            if self.plane_ids.contains(&object) {
                let name = self.prop_name(prop_id);
                if name == "FB_ID" && value != 0 {
                    self.fb_format_ok_for_plane(object, value as u32)?;
                }
            }
        }

        // A plane that ends up with an fb must also have a crtc.
        let mut staged_fb: HashMap<RawId, u64> = HashMap::new();
        let mut staged_crtc: HashMap<RawId, u64> = HashMap::new();
        for &(object, prop_id, value) in req.props() {
            if !self.plane_ids.contains(&object) {
                continue;
            }
            match self.prop_name(prop_id).as_str() {
                "FB_ID" => {
                    staged_fb.insert(object, value);
                }
                "CRTC_ID" => {
                    staged_crtc.insert(object, value);
                }
                _ => {}
            }
        }
        for (&plane, &fb) in &staged_fb {
            let crtc = staged_crtc
                .get(&plane)
                .copied()
                .unwrap_or_else(|| self.plane_scanout[&plane].crtc_id as u64);
            if fb != 0 && crtc == 0 {
                return Err(KmsError::InvalidArgument(format!(
                    "plane {plane} has an fb but no crtc"
                )));
            }
        }

        let test_only = flags.contains(CommitFlags::TEST_ONLY);
        self.ops.push(Op::AtomicCommit {
            props: req.props().len(),
            test_only,
        });
        if test_only {
            return Ok(());
        }

        for &(object, prop_id, value) in req.props() {
            let name = self.prop_name(prop_id);
            self.store_value(object, prop_id, value);
            self.apply_semantic(object, &name, value)?;
        }
        self.vblank += 1;
        Ok(())
    }

    fn add_framebuffer(
        &mut self,
        width: u32,
        height: u32,
        format: Format,
        modifier: Option<Modifier>,
        handles: [u32; 4],
        pitches: [u32; 4],
        offsets: [u32; 4],
    ) -> Result<u32> {
        let info = format
            .info()
            .ok_or_else(|| KmsError::InvalidArgument(format!("unknown format {format:?}")))?;
        if width == 0 || height == 0 {
            return Err(KmsError::InvalidArgument("zero-sized framebuffer".into()));
        }
        for plane in 0..info.num_planes() {
            if handles[plane] == 0 {
                return Err(KmsError::InvalidArgument(format!(
                    "missing handle for plane {plane}"
                )));
            }
            if !self.dumbs.contains_key(&handles[plane]) {
                return Err(KmsError::InvalidArgument(format!(
                    "unknown buffer handle {}",
                    handles[plane]
                )));
            }
            let min_pitch =
                info.plane_width(width, plane) as u64 * info.plane_bpp[plane] as u64 / 8;
            if (pitches[plane] as u64) < min_pitch {
                return Err(KmsError::InvalidArgument(format!(
                    "pitch {} below minimum {min_pitch} for plane {plane}",
                    pitches[plane]
                )));
            }
        }
        let _ = offsets;

        let fb_id = self.alloc_id();
        self.fbs.insert(
            fb_id,
            FbEntry {
                width,
                height,
                format,
                modifier: modifier.unwrap_or(Modifier::LINEAR),
                handles,
            },
        );
        Ok(fb_id)
    }

    fn remove_framebuffer(&mut self, fb_id: u32) -> Result<()> {
        self.fbs
            .remove(&fb_id)
            .map(|_| ())
            .ok_or(KmsError::NoSuchObject(fb_id))
    }

    fn create_dumb(&mut self, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer> {
        if width == 0 || height == 0 || bpp == 0 || bpp % 8 != 0 {
            return Err(KmsError::InvalidArgument(format!(
                "bad dumb buffer geometry {width}x{height}@{bpp}"
            )));
        }
        let pitch = width
            .checked_mul(bpp / 8)
            .ok_or_else(|| KmsError::InvalidArgument("dumb pitch overflow".into()))?;
        let size = pitch as u64 * height as u64;
        if size > 1 << 30 {
            return Err(KmsError::InvalidArgument("dumb buffer too large".into()));
        }

        let handle = self.alloc_id();
        self.dumbs.insert(
            handle,
            DumbEntry {
                data: vec![0; size as usize],
                pitch,
            },
        );
        Ok(DumbBuffer {
            handle,
            pitch,
            size,
        })
    }

    fn destroy_dumb(&mut self, handle: u32) -> Result<()> {
        self.dumbs
            .remove(&handle)
            .map(|_| ())
            .ok_or(KmsError::NoSuchObject(handle))
    }

    fn map_dumb(&mut self, handle: u32) -> Result<&mut [u8]> {
        self.dumbs
            .get_mut(&handle)
            .map(|d| d.data.as_mut_slice())
            .ok_or(KmsError::NoSuchObject(handle))
    }

    fn wait_vblank(&mut self, pipe_index: u32, count: u32) -> Result<u64> {
        if pipe_index as usize >= self.crtc_ids.len() {
            return Err(KmsError::InvalidArgument(format!(
                "no pipe {pipe_index}"
            )));
        }
        self.vblank += count as u64;
        Ok(self.vblank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_listing_requires_universal_cap() {
        let mut dev = VirtualDevice::standard();
        assert!(dev.plane_ids().is_err());
        dev.set_client_cap(ClientCap::UniversalPlanes, 1).unwrap();
        assert_eq!(dev.plane_ids().unwrap().len(), 5);
    }

    #[test]
    fn atomic_cap_refused_on_legacy_topology() {
        let mut dev = VirtualDevice::with_topology(Topology::legacy_only());
        assert!(matches!(
            dev.set_client_cap(ClientCap::Atomic, 1),
            Err(KmsError::NotSupported(_))
        ));
    }

    #[test]
    fn set_object_property_validates() {
        let mut dev = VirtualDevice::standard();
        dev.set_client_cap(ClientCap::UniversalPlanes, 1).unwrap();
        let plane = dev.plane_id_at(0);
        let props = dev.object_properties(plane, ObjectType::Plane).unwrap();

        let alpha = props
            .iter()
            .map(|&(id, _)| id)
            .find(|&id| dev.property_info(id).unwrap().name == "alpha")
            .unwrap();
        dev.set_object_property(plane, ObjectType::Plane, alpha, 0x8000)
            .unwrap();
        assert!(dev
            .set_object_property(plane, ObjectType::Plane, alpha, 0x10000)
            .is_err());

        let type_prop = props
            .iter()
            .map(|&(id, _)| id)
            .find(|&id| dev.property_info(id).unwrap().name == "type")
            .unwrap();
        assert!(dev
            .set_object_property(plane, ObjectType::Plane, type_prop, 0)
            .is_err());
    }

    #[test]
    fn rotation_bitmask_needs_exactly_one_angle() {
        let mut dev = VirtualDevice::standard();
        dev.set_client_cap(ClientCap::UniversalPlanes, 1).unwrap();
        let plane = dev.plane_id_at(0);
        let rotation = dev
            .object_properties(plane, ObjectType::Plane)
            .unwrap()
            .iter()
            .map(|&(id, _)| id)
            .find(|&id| dev.property_info(id).unwrap().name == "rotation")
            .unwrap();

        dev.set_object_property(plane, ObjectType::Plane, rotation, 0b10)
            .unwrap();
        // rotate-0 | rotate-180 at once is invalid.
        assert!(dev
            .set_object_property(plane, ObjectType::Plane, rotation, 0b101)
            .is_err());
        // reflect-x alone (no angle) is invalid.
        assert!(dev
            .set_object_property(plane, ObjectType::Plane, rotation, 1 << 4)
            .is_err());
    }

    #[test]
    fn atomic_commit_is_all_or_nothing() {
        let mut dev = VirtualDevice::standard();
        dev.set_client_cap(ClientCap::UniversalPlanes, 1).unwrap();
        dev.set_client_cap(ClientCap::Atomic, 1).unwrap();
        let plane = dev.plane_id_at(0);
        let props = dev.object_properties(plane, ObjectType::Plane).unwrap();
        let find = |dev: &mut VirtualDevice, name: &str| {
            props
                .iter()
                .map(|&(id, _)| id)
                .find(|&id| dev.property_info(id).unwrap().name == name)
                .unwrap()
        };
        let alpha = find(&mut dev, "alpha");
        let zpos = find(&mut dev, "zpos");

        let mut req = AtomicRequest::new();
        req.add(plane, alpha, 0x1234);
        req.add(plane, zpos, 99); // out of range
        assert!(dev.atomic_commit(&req, CommitFlags::empty()).is_err());
        // The valid half must not have been applied.
        assert_eq!(dev.property_value(plane, "alpha"), Some(0xffff));
    }

    #[test]
    fn test_only_applies_nothing() {
        let mut dev = VirtualDevice::standard();
        dev.set_client_cap(ClientCap::UniversalPlanes, 1).unwrap();
        dev.set_client_cap(ClientCap::Atomic, 1).unwrap();
        let plane = dev.plane_id_at(0);
        let alpha = dev
            .object_properties(plane, ObjectType::Plane)
            .unwrap()
            .iter()
            .map(|&(id, _)| id)
            .find(|&id| dev.property_info(id).unwrap().name == "alpha")
            .unwrap();

        let mut req = AtomicRequest::new();
        req.add(plane, alpha, 42);
        dev.atomic_commit(&req, CommitFlags::TEST_ONLY).unwrap();
        assert_eq!(dev.property_value(plane, "alpha"), Some(0xffff));
        assert_eq!(
            dev.ops().last(),
            Some(&Op::AtomicCommit {
                props: 1,
                test_only: true
            })
        );
    }

    #[test]
    fn add_framebuffer_validates_pitch_and_handles() {
        let mut dev = VirtualDevice::standard();
        let bo = dev.create_dumb(64, 64, 32).unwrap();

        // Pitch below width * 4 is rejected.
        assert!(dev
            .add_framebuffer(
                64,
                64,
                Format::XRGB8888,
                None,
                [bo.handle, 0, 0, 0],
                [100, 0, 0, 0],
                [0; 4]
            )
            .is_err());

        let fb = dev
            .add_framebuffer(
                64,
                64,
                Format::XRGB8888,
                None,
                [bo.handle, 0, 0, 0],
                [256, 0, 0, 0],
                [0; 4],
            )
            .unwrap();
        assert!(dev.fbs.contains_key(&fb));

        assert!(dev
            .add_framebuffer(64, 64, Format::XRGB8888, None, [9999, 0, 0, 0], [256; 4], [0; 4])
            .is_err());
    }

    #[test]
    fn set_plane_checks_format_support_and_src_bounds() {
        let mut dev = VirtualDevice::standard();
        dev.set_client_cap(ClientCap::UniversalPlanes, 1).unwrap();
        let crtc = dev.crtc_ids()[0];
        let overlay = dev.plane_id_at(2);

        let bo = dev.create_dumb(64, 64, 32).unwrap();
        let fb = dev
            .add_framebuffer(
                64,
                64,
                Format::XRGB8888,
                None,
                [bo.handle, 0, 0, 0],
                [256, 0, 0, 0],
                [0; 4],
            )
            .unwrap();

        // Src rect larger than the fb is rejected.
        assert!(dev
            .set_plane(overlay, crtc, fb, 0, 0, 64, 64, 0, 0, 128 << 16, 64 << 16)
            .is_err());

        dev.set_plane(overlay, crtc, fb, 0, 0, 64, 64, 0, 0, 64 << 16, 64 << 16)
            .unwrap();
        assert_eq!(dev.plane_scanout(overlay).fb_id, fb);

        // NV12 is not in the overlay's format list.
        let bo2 = dev.create_dumb(64, 96, 8).unwrap();
        let fb2 = dev
            .add_framebuffer(
                64,
                64,
                Format::NV12,
                None,
                [bo2.handle, bo2.handle, 0, 0],
                [64, 64, 0, 0],
                [0, 64 * 64, 0, 0],
            )
            .unwrap();
        assert!(dev
            .set_plane(overlay, crtc, fb2, 0, 0, 64, 64, 0, 0, 64 << 16, 64 << 16)
            .is_err());
    }
}
