//! Per-object display state: planes, pipes (CRTCs) and outputs
//! (connectors).
//!
//! Each object carries three parallel tables indexed by its property enum:
//! the discovered kernel property ids, the staged 64-bit values, and a
//! dirty bitmask. Mutations go through `set_value`, which stages the value
//! and marks it dirty; the commit machinery decides which dirty bits each
//! commit style can actually program and clears them on success.

use std::collections::HashMap;

use prism_fourcc::{Format, Modifier};

use crate::device::{ConnectorInfo, KmsError, RawId, Result};
use crate::mode::DisplayMode;
use crate::props::{ConnectorProp, CrtcProp, DirtyMask, PlaneProp, PlaneType};

/// One physical (kernel) plane. Several pipes may expose per-pipe state for
/// the same physical plane; only the owning pipe commits it.
#[derive(Debug)]
pub(crate) struct PhysPlane {
    pub(crate) plane_id: RawId,
    pub(crate) ty: PlaneType,
    pub(crate) possible_crtcs: u32,
    /// (pipe index, local plane index) of the state that currently speaks
    /// for this plane. Updated by `set_fb`; the claim follows the fb.
    pub(crate) owner: Option<(usize, usize)>,
}

/// Per-pipe view of one plane.
#[derive(Debug)]
pub struct Plane {
    pub(crate) index: usize,
    pub(crate) phys_index: usize,
    pub(crate) plane_id: RawId,
    /// CRTC id of the owning pipe, cached for FB binding.
    pub(crate) crtc_id: RawId,
    pub(crate) ty: PlaneType,
    pub(crate) prop_ids: [Option<RawId>; PlaneProp::COUNT],
    pub(crate) values: [u64; PlaneProp::COUNT],
    pub(crate) changed: DirtyMask,
    /// (format, modifier) pairs from the IN_FORMATS blob, or the base
    /// format list with a linear modifier when the blob is absent.
    pub(crate) formats: Vec<(Format, Modifier)>,
    /// Enum/bitmask value tables per property index, captured at discovery
    /// time so name-based sets don't need device round trips.
    pub(crate) enum_values: HashMap<usize, Vec<(u64, String)>>,
    /// Upper bound of the "alpha" range property (0xffff when absent).
    pub(crate) alpha_max: u64,
    /// Buffer-object handle of the bound fb, for the legacy cursor path.
    pub(crate) bo_handle: u32,
}

impl Plane {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn plane_id(&self) -> RawId {
        self.plane_id
    }

    pub fn plane_type(&self) -> PlaneType {
        self.ty
    }

    pub fn has_prop(&self, prop: PlaneProp) -> bool {
        self.prop_ids[prop.index()].is_some()
    }

    pub fn prop_value(&self, prop: PlaneProp) -> u64 {
        self.values[prop.index()]
    }

    pub fn is_prop_changed(&self, prop: PlaneProp) -> bool {
        self.changed.contains(prop.index())
    }

    pub fn formats(&self) -> &[(Format, Modifier)] {
        &self.formats
    }

    pub fn supports_format_mod(&self, format: Format, modifier: Modifier) -> bool {
        self.formats.iter().any(|&(f, m)| f == format && m == modifier)
    }

    pub(crate) fn set_value(&mut self, prop: PlaneProp, value: u64) {
        self.values[prop.index()] = value;
        self.changed.set(prop.index());
    }

    pub(crate) fn clear_changed(&mut self, prop: PlaneProp) {
        self.changed.clear(prop.index());
    }

    /// Resolves an enum property value string against the discovered value
    /// table.
    pub(crate) fn lookup_enum(&self, prop: PlaneProp, name: &str) -> Result<u64> {
        let table = self
            .enum_values
            .get(&prop.index())
            .ok_or_else(|| KmsError::MissingProperty {
                object: format!("plane {}", self.plane_id),
                name: prop.kernel_name(),
            })?;
        table
            .iter()
            .find(|(_, n)| n == name)
            .map(|&(v, _)| v)
            .ok_or_else(|| {
                KmsError::InvalidArgument(format!(
                    "plane {}: no enum value \"{name}\" for {}",
                    self.plane_id,
                    prop.kernel_name()
                ))
            })
    }

    pub(crate) fn set_enum_by_name(&mut self, prop: PlaneProp, name: &str) -> Result<()> {
        let value = self.lookup_enum(prop, name)?;
        self.set_value(prop, value);
        Ok(())
    }

    /// Like `set_enum_by_name` but reports whether the value exists
    /// instead of erroring, for probing optional enum support.
    pub(crate) fn try_enum_by_name(&mut self, prop: PlaneProp, name: &str) -> bool {
        match self.lookup_enum(prop, name) {
            Ok(value) => {
                self.set_value(prop, value);
                true
            }
            Err(_) => false,
        }
    }
}

/// One CRTC and the planes that can scan out through it.
#[derive(Debug)]
pub struct Pipe {
    pub(crate) index: usize,
    pub(crate) crtc_id: RawId,
    pub(crate) prop_ids: [Option<RawId>; CrtcProp::COUNT],
    pub(crate) values: [u64; CrtcProp::COUNT],
    pub(crate) changed: DirtyMask,
    pub(crate) planes: Vec<Plane>,
    /// Local index of the cursor plane, when the pipe has one. The primary
    /// plane is always local index 0.
    pub(crate) plane_cursor: Option<usize>,
}

/// Pipes are named A, B, C... in diagnostics, like the hardware manuals.
pub fn pipe_name(index: usize) -> char {
    (b'A' + index as u8) as char
}

impl Pipe {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn crtc_id(&self) -> RawId {
        self.crtc_id
    }

    pub fn name(&self) -> char {
        pipe_name(self.index)
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn n_planes(&self) -> usize {
        self.planes.len()
    }

    /// Local index of the first plane of `ty`, honoring the primary-first /
    /// cursor-last layout.
    pub fn plane_index_of_type(&self, ty: PlaneType) -> Option<usize> {
        match ty {
            PlaneType::Primary => Some(0),
            PlaneType::Cursor => self.plane_cursor,
            PlaneType::Overlay => self
                .planes
                .iter()
                .position(|p| p.ty == PlaneType::Overlay),
        }
    }

    /// Local index of the `index`-th plane of `ty`.
    pub fn plane_index_of_type_index(&self, ty: PlaneType, index: usize) -> Option<usize> {
        self.planes
            .iter()
            .filter(|p| p.ty == ty)
            .nth(index)
            .map(|p| p.index)
    }

    pub fn count_plane_type(&self, ty: PlaneType) -> usize {
        self.planes.iter().filter(|p| p.ty == ty).count()
    }

    pub fn has_prop(&self, prop: CrtcProp) -> bool {
        self.prop_ids[prop.index()].is_some()
    }

    pub fn prop_value(&self, prop: CrtcProp) -> u64 {
        self.values[prop.index()]
    }

    pub fn is_prop_changed(&self, prop: CrtcProp) -> bool {
        self.changed.contains(prop.index())
    }

    pub(crate) fn set_value(&mut self, prop: CrtcProp, value: u64) {
        self.values[prop.index()] = value;
        self.changed.set(prop.index());
    }

    pub(crate) fn clear_changed(&mut self, prop: CrtcProp) {
        self.changed.clear(prop.index());
    }
}

/// One connector and its staged routing.
#[derive(Debug)]
pub struct Output {
    pub(crate) index: usize,
    pub(crate) connector_id: RawId,
    pub(crate) name: String,
    pub(crate) info: ConnectorInfo,
    pub(crate) prop_ids: [Option<RawId>; ConnectorProp::COUNT],
    pub(crate) values: [u64; ConnectorProp::COUNT],
    pub(crate) changed: DirtyMask,
    pub(crate) enum_values: HashMap<usize, Vec<(u64, String)>>,
    /// Union of possible_crtcs over the connector's encoders.
    pub(crate) possible_crtcs: u32,
    pub(crate) pending_pipe: Option<usize>,
    pub(crate) override_mode: Option<DisplayMode>,
    pub(crate) force_reprobe: bool,
}

impl Output {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn connector_id(&self) -> RawId {
        self.connector_id
    }

    /// Connector name, e.g. "DP-1".
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> &ConnectorInfo {
        &self.info
    }

    pub fn pending_pipe(&self) -> Option<usize> {
        self.pending_pipe
    }

    pub fn possible_crtcs(&self) -> u32 {
        self.possible_crtcs
    }

    pub fn override_mode(&self) -> Option<&DisplayMode> {
        self.override_mode.as_ref()
    }

    /// The mode a commit would program: the override when set, otherwise
    /// the connector's default.
    pub fn mode(&self) -> DisplayMode {
        self.override_mode
            .clone()
            .unwrap_or_else(|| self.default_mode())
    }

    /// Preferred mode if flagged, else the first reported mode, else the
    /// 1024x768 standard fallback.
    pub fn default_mode(&self) -> DisplayMode {
        self.info
            .modes
            .iter()
            .find(|m| m.is_preferred())
            .or_else(|| self.info.modes.first())
            .cloned()
            .unwrap_or_else(DisplayMode::std_1024_mode)
    }

    pub fn has_prop(&self, prop: ConnectorProp) -> bool {
        self.prop_ids[prop.index()].is_some()
    }

    pub fn prop_value(&self, prop: ConnectorProp) -> u64 {
        self.values[prop.index()]
    }

    pub fn is_prop_changed(&self, prop: ConnectorProp) -> bool {
        self.changed.contains(prop.index())
    }

    pub(crate) fn set_value(&mut self, prop: ConnectorProp, value: u64) {
        self.values[prop.index()] = value;
        self.changed.set(prop.index());
    }

    pub(crate) fn lookup_enum(&self, prop: ConnectorProp, name: &str) -> Result<u64> {
        let table = self
            .enum_values
            .get(&prop.index())
            .ok_or_else(|| KmsError::MissingProperty {
                object: format!("connector {}", self.name),
                name: prop.kernel_name(),
            })?;
        table
            .iter()
            .find(|(_, n)| n == name)
            .map(|&(v, _)| v)
            .ok_or_else(|| {
                KmsError::InvalidArgument(format!(
                    "{}: no enum value \"{name}\" for {}",
                    self.name,
                    prop.kernel_name()
                ))
            })
    }

    pub(crate) fn set_enum_by_name(&mut self, prop: ConnectorProp, name: &str) -> Result<()> {
        let value = self.lookup_enum(prop, name)?;
        self.set_value(prop, value);
        Ok(())
    }
}
