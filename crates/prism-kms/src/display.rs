//! The display: discovery, defaults and staged-state mutation.

use std::collections::HashMap;

use prism_fourcc::{Format, Modifier};
use tracing::debug;

use crate::device::{
    BoundFb, ClientCap, KmsError, ModeDevice, ObjectType, PropertyInfo, PropertyKind, RawId,
    Result,
};
use crate::mode::DisplayMode;
use crate::objects::{pipe_name, Output, PhysPlane, Pipe, Plane};
use crate::props::{ConnectorProp, CrtcProp, PlaneProp, PlaneType, Rotation};

/// Broadcast RGB property values (i915 convention).
const BROADCAST_RGB_FULL: u64 = 1;

/// The full modesetting state of one device: pipes, their planes, and
/// outputs, plus the staged property values a commit will program.
pub struct Display<D: ModeDevice> {
    pub(crate) dev: D,
    pub(crate) pipes: Vec<Pipe>,
    pub(crate) outputs: Vec<Output>,
    pub(crate) phys: Vec<PhysPlane>,
    pub(crate) is_atomic: bool,
    pub(crate) first_commit: bool,
    pub(crate) has_cursor_plane: bool,
    pub(crate) display_formats: Vec<(Format, Modifier)>,
}

impl<D: ModeDevice> Display<D> {
    /// Discovers the device's resources and builds the display model with
    /// every object reset to default state.
    ///
    /// Fails with [`KmsError::NotSupported`] when the device exposes no
    /// pipes or connectors (no KMS driver).
    pub fn open(mut dev: D) -> Result<Display<D>> {
        let res = dev.resources()?;
        if res.crtcs.is_empty() || res.connectors.is_empty() {
            return Err(KmsError::NotSupported("no KMS pipes or connectors"));
        }

        // Universal planes unconditionally; atomic only if the device takes
        // the cap.
        let _ = dev.set_client_cap(ClientCap::UniversalPlanes, 1);
        let is_atomic = dev.set_client_cap(ClientCap::Atomic, 1).is_ok();

        // Probe every physical plane once.
        struct Probe {
            formats: Vec<Format>,
            props: Vec<(PropertyInfo, u64)>,
        }

        let mut phys = Vec::new();
        let mut probes = Vec::new();
        for plane_id in dev.plane_ids()? {
            let info = dev.plane(plane_id)?;
            let mut props = Vec::new();
            for (prop_id, value) in dev.object_properties(plane_id, ObjectType::Plane)? {
                props.push((dev.property_info(prop_id)?, value));
            }
            let ty = props
                .iter()
                .find(|(p, _)| p.name == "type")
                .and_then(|&(_, v)| PlaneType::from_kernel_value(v))
                .unwrap_or(PlaneType::Overlay);
            phys.push(PhysPlane {
                plane_id,
                ty,
                possible_crtcs: info.possible_crtcs,
                owner: None,
            });
            probes.push(Probe {
                formats: info.formats,
                props,
            });
        }

        let mut has_cursor_plane = false;
        let mut pipes = Vec::with_capacity(res.crtcs.len());
        for (pipe_index, &crtc_id) in res.crtcs.iter().enumerate() {
            let mut prop_ids = [None; CrtcProp::COUNT];
            for (prop_id, _) in dev.object_properties(crtc_id, ObjectType::Crtc)? {
                let info = dev.property_info(prop_id)?;
                if let Some(p) = CrtcProp::ALL.iter().find(|p| p.kernel_name() == info.name) {
                    prop_ids[p.index()] = Some(prop_id);
                }
            }

            let members: Vec<usize> = (0..phys.len())
                .filter(|&i| phys[i].possible_crtcs & (1 << pipe_index) != 0)
                .collect();
            if members.is_empty() {
                return Err(KmsError::NotSupported("pipe without any usable plane"));
            }

            // Primary lands at local index 0, cursor at the last index,
            // everything else in between in discovery order.
            let n_planes = members.len();
            let mut slots: Vec<Option<usize>> = vec![None; n_planes];
            let mut plane_cursor = None;
            let mut next_overlay = 1;
            for &phys_index in &members {
                let local = match phys[phys_index].ty {
                    PlaneType::Primary if slots[0].is_none() => 0,
                    PlaneType::Cursor if plane_cursor.is_none() => {
                        plane_cursor = Some(n_planes - 1);
                        has_cursor_plane = true;
                        n_planes - 1
                    }
                    _ => {
                        let local = next_overlay;
                        next_overlay += 1;
                        local
                    }
                };
                if local >= n_planes || slots[local].is_some() {
                    return Err(KmsError::NotSupported("pipe without a primary plane"));
                }
                slots[local] = Some(phys_index);
            }
            if slots[0].map(|i| phys[i].ty) != Some(PlaneType::Primary) {
                return Err(KmsError::NotSupported("pipe without a primary plane"));
            }

            let mut planes = Vec::with_capacity(n_planes);
            for (local, phys_index) in slots.iter().enumerate() {
                let phys_index = phys_index
                    .ok_or_else(|| KmsError::InvalidArgument("plane slot left unfilled".into()))?;
                let plane = Self::build_plane(
                    &mut dev,
                    &probes[phys_index].props,
                    &probes[phys_index].formats,
                    local,
                    phys_index,
                    phys[phys_index].plane_id,
                    crtc_id,
                    phys[phys_index].ty,
                )?;
                if phys[phys_index].owner.is_none() {
                    phys[phys_index].owner = Some((pipe_index, local));
                }
                planes.push(plane);
            }

            pipes.push(Pipe {
                index: pipe_index,
                crtc_id,
                prop_ids,
                values: [0; CrtcProp::COUNT],
                changed: Default::default(),
                planes,
                plane_cursor,
            });
        }

        let mut display_formats: Vec<(Format, Modifier)> = Vec::new();
        for pipe in &pipes {
            for plane in &pipe.planes {
                for &pair in &plane.formats {
                    if !display_formats.contains(&pair) {
                        display_formats.push(pair);
                    }
                }
            }
        }

        let mut outputs = Vec::with_capacity(res.connectors.len());
        for (index, &connector_id) in res.connectors.iter().enumerate() {
            let info = dev.connector(connector_id, false)?;

            let mut prop_ids = [None; ConnectorProp::COUNT];
            let mut enum_values = HashMap::new();
            for (prop_id, _) in dev.object_properties(connector_id, ObjectType::Connector)? {
                let pinfo = dev.property_info(prop_id)?;
                if let Some(p) = ConnectorProp::ALL
                    .iter()
                    .find(|p| p.kernel_name() == pinfo.name)
                {
                    prop_ids[p.index()] = Some(prop_id);
                    if let PropertyKind::Enum { values } | PropertyKind::Bitmask { values } =
                        pinfo.kind
                    {
                        enum_values.insert(p.index(), values);
                    }
                }
            }

            let mut output = Output {
                index,
                connector_id,
                name: info.name(),
                info,
                prop_ids,
                values: [0; ConnectorProp::COUNT],
                changed: Default::default(),
                enum_values,
                possible_crtcs: 0,
                pending_pipe: None,
                override_mode: None,
                force_reprobe: false,
            };
            Self::refresh_possible_crtcs(&mut dev, &res.crtcs, &mut output)?;

            // A connector with no modes, or undetermined connection, gets
            // one forced probe up front.
            if output.info.modes.is_empty()
                || output.info.connection == crate::device::ConnectorStatus::Unknown
            {
                output.force_reprobe = true;
                Self::refresh_output(&mut dev, &res.crtcs, &mut output)?;
            }

            outputs.push(output);
        }

        let mut display = Display {
            dev,
            pipes,
            outputs,
            phys,
            is_atomic,
            first_commit: true,
            has_cursor_plane,
            display_formats,
        };
        display.reset()?;
        Ok(display)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_plane(
        dev: &mut D,
        props: &[(PropertyInfo, u64)],
        base_formats: &[Format],
        local: usize,
        phys_index: usize,
        plane_id: RawId,
        crtc_id: RawId,
        ty: PlaneType,
    ) -> Result<Plane> {
        let mut prop_ids = [None; PlaneProp::COUNT];
        let mut enum_values = HashMap::new();
        let mut alpha_max = 0xffff;
        let mut in_formats_blob = None;

        for (info, value) in props {
            let Some(p) = PlaneProp::ALL.iter().find(|p| p.kernel_name() == info.name) else {
                continue;
            };
            prop_ids[p.index()] = Some(info.prop_id);
            match (&info.kind, *p) {
                (PropertyKind::Enum { values } | PropertyKind::Bitmask { values }, _) => {
                    enum_values.insert(p.index(), values.clone());
                }
                (PropertyKind::Range { max, .. }, PlaneProp::Alpha) => alpha_max = *max,
                (PropertyKind::Blob, PlaneProp::InFormats) if *value != 0 => {
                    in_formats_blob = Some(*value as RawId);
                }
                _ => {}
            }
        }

        let formats = match in_formats_blob {
            Some(blob_id) => parse_in_formats(&dev.blob_data(blob_id)?)?,
            None => base_formats
                .iter()
                .map(|&f| (f, Modifier::LINEAR))
                .collect(),
        };

        Ok(Plane {
            index: local,
            phys_index,
            plane_id,
            crtc_id,
            ty,
            prop_ids,
            values: [0; PlaneProp::COUNT],
            changed: Default::default(),
            formats,
            enum_values,
            alpha_max,
            bo_handle: 0,
        })
    }

    fn refresh_possible_crtcs(dev: &mut D, crtcs: &[RawId], output: &mut Output) -> Result<()> {
        let mut mask = 0;
        for &enc in &output.info.encoders {
            mask |= dev.encoder(enc)?.possible_crtcs;
        }
        // Clamp to real pipes.
        let all_pipes = if crtcs.len() >= 32 {
            u32::MAX
        } else {
            (1u32 << crtcs.len()) - 1
        };
        output.possible_crtcs = mask & all_pipes;
        Ok(())
    }

    fn refresh_output(dev: &mut D, crtcs: &[RawId], output: &mut Output) -> Result<()> {
        let info = dev.connector(output.connector_id, output.force_reprobe)?;
        output.name = info.name();
        output.info = info;
        output.force_reprobe = false;
        Self::refresh_possible_crtcs(dev, crtcs, output)
    }

    /// Re-probes outputs flagged for it and validates that no two outputs
    /// claim the same pipe. Runs at the head of every commit.
    pub(crate) fn refresh(&mut self) -> Result<()> {
        let crtc_ids: Vec<RawId> = self.pipes.iter().map(|p| p.crtc_id).collect();
        let mut pipes_in_use = 0u64;
        for i in 0..self.outputs.len() {
            if let Some(pipe) = self.outputs[i].pending_pipe {
                if pipes_in_use & (1 << pipe) != 0 {
                    let other = self
                        .outputs
                        .iter()
                        .take(i)
                        .find(|o| o.pending_pipe == Some(pipe))
                        .map(|o| o.name.clone())
                        .unwrap_or_default();
                    return Err(KmsError::PipeConflict {
                        pipe: pipe_name(pipe),
                        a: other,
                        b: self.outputs[i].name.clone(),
                    });
                }
                pipes_in_use |= 1 << pipe;
            }
            if self.outputs[i].force_reprobe {
                Self::refresh_output(&mut self.dev, &crtc_ids, &mut self.outputs[i])?;
            }
        }
        Ok(())
    }

    /// Puts every pipe, plane and output back to its default state and
    /// marks the touched properties dirty, so the next commit programs a
    /// known configuration.
    pub fn reset(&mut self) -> Result<()> {
        // Also re-allows rotation resets that legacy commits normally
        // reject on primary/cursor planes.
        self.first_commit = true;

        for pipe in &mut self.pipes {
            for plane in &mut pipe.planes {
                Self::plane_reset(plane)?;
            }
            Self::pipe_reset(pipe);
        }
        for output in &mut self.outputs {
            Self::output_reset(output)?;
        }
        Ok(())
    }

    fn plane_reset(plane: &mut Plane) -> Result<()> {
        for prop in [
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
        ] {
            plane.set_value(prop, 0);
        }

        if plane.has_prop(PlaneProp::ColorEncoding) {
            plane.set_enum_by_name(
                PlaneProp::ColorEncoding,
                prism_color::ColorEncoding::Bt601.prop_value_name(),
            )?;
        }
        if plane.has_prop(PlaneProp::ColorRange) {
            plane.set_enum_by_name(
                PlaneProp::ColorRange,
                prism_color::ColorRange::Limited.prop_value_name(),
            )?;
        }
        if plane.has_prop(PlaneProp::Rotation) {
            plane.set_value(PlaneProp::Rotation, Rotation::ROT_0.bits());
        }
        if plane.has_prop(PlaneProp::PixelBlendMode) {
            plane.set_enum_by_name(PlaneProp::PixelBlendMode, "Pre-multiplied")?;
        }
        if plane.has_prop(PlaneProp::Alpha) {
            let max = plane.alpha_max;
            plane.set_value(PlaneProp::Alpha, max);
        }

        plane.values[PlaneProp::InFenceFd.index()] = u64::MAX; // -1
        plane.clear_changed(PlaneProp::InFenceFd);
        plane.bo_handle = 0;
        Ok(())
    }

    fn pipe_reset(pipe: &mut Pipe) {
        pipe.set_value(CrtcProp::ModeId, 0);
        pipe.set_value(CrtcProp::Active, 0);
        pipe.clear_changed(CrtcProp::OutFencePtr);
        for prop in [CrtcProp::Ctm, CrtcProp::GammaLut, CrtcProp::DegammaLut] {
            if pipe.has_prop(prop) {
                pipe.set_value(prop, 0);
            }
        }
    }

    fn output_reset(output: &mut Output) -> Result<()> {
        output.pending_pipe = None;
        output.override_mode = None;
        output.set_value(ConnectorProp::CrtcId, 0);
        if output.has_prop(ConnectorProp::BroadcastRgb) {
            output.set_value(ConnectorProp::BroadcastRgb, BROADCAST_RGB_FULL);
        }
        if output.has_prop(ConnectorProp::ContentProtection) {
            output.set_enum_by_name(ConnectorProp::ContentProtection, "Undesired")?;
        }
        Ok(())
    }

    pub fn is_atomic(&self) -> bool {
        self.is_atomic
    }

    pub fn n_pipes(&self) -> usize {
        self.pipes.len()
    }

    pub fn has_cursor_plane(&self) -> bool {
        self.has_cursor_plane
    }

    pub fn pipes(&self) -> &[Pipe] {
        &self.pipes
    }

    pub fn pipe(&self, index: usize) -> &Pipe {
        &self.pipes[index]
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn output(&self, index: usize) -> &Output {
        &self.outputs[index]
    }

    pub fn output_for_connector(&self, connector_id: RawId) -> Option<&Output> {
        self.outputs.iter().find(|o| o.connector_id == connector_id)
    }

    /// Picks an output for `pipe`: one already routed there, else the
    /// first connected, unrouted output whose encoders can reach the pipe.
    pub fn single_output_for_pipe(&self, pipe: usize) -> Option<&Output> {
        self.outputs
            .iter()
            .find(|o| o.pending_pipe == Some(pipe))
            .or_else(|| {
                self.outputs.iter().find(|o| {
                    o.pending_pipe.is_none()
                        && o.info.connection == crate::device::ConnectorStatus::Connected
                        && o.possible_crtcs & (1 << pipe) != 0
                })
            })
    }

    pub fn supports_format_mod(&self, format: Format, modifier: Modifier) -> bool {
        self.display_formats
            .iter()
            .any(|&(f, m)| f == format && m == modifier)
    }

    pub fn device(&self) -> &D {
        &self.dev
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }

    /// Consumes the display, handing the device back.
    pub fn into_device(self) -> D {
        self.dev
    }

    pub fn plane(&mut self, pipe: usize, plane: usize) -> PlaneHandle<'_, D> {
        assert!(plane < self.pipes[pipe].planes.len());
        PlaneHandle {
            display: self,
            pipe,
            plane,
        }
    }

    /// Handle for the first plane of `ty` on `pipe`.
    pub fn plane_of_type(&mut self, pipe: usize, ty: PlaneType) -> Result<PlaneHandle<'_, D>> {
        let plane = self.pipes[pipe].plane_index_of_type(ty).ok_or_else(|| {
            KmsError::InvalidArgument(format!("pipe {} has no {} plane", pipe_name(pipe), ty.name()))
        })?;
        Ok(PlaneHandle {
            display: self,
            pipe,
            plane,
        })
    }

    pub fn output_handle(&mut self, index: usize) -> OutputHandle<'_, D> {
        assert!(index < self.outputs.len());
        OutputHandle {
            display: self,
            index,
        }
    }

    pub fn pipe_handle(&mut self, index: usize) -> PipeHandle<'_, D> {
        assert!(index < self.pipes.len());
        PipeHandle {
            display: self,
            index,
        }
    }

    /// Waits for `count` vblanks on `pipe`.
    pub fn wait_for_vblank_count(&mut self, pipe: usize, count: u32) -> Result<u64> {
        self.dev.wait_vblank(pipe as u32, count)
    }

    pub fn wait_for_vblank(&mut self, pipe: usize) -> Result<u64> {
        self.wait_for_vblank_count(pipe, 1)
    }

    /// Replaces the blob referenced by a CRTC blob property (MODE_ID,
    /// GAMMA_LUT, ...): destroys the old blob, creates one from `data` (or
    /// clears the property for `None`) and marks the property dirty.
    pub(crate) fn pipe_replace_prop_blob(
        dev: &mut D,
        pipe: &mut Pipe,
        prop: CrtcProp,
        data: Option<&[u8]>,
    ) -> Result<()> {
        let current = pipe.values[prop.index()];
        if current != 0 {
            dev.destroy_blob(current as RawId)?;
        }
        let new = match data {
            Some(bytes) => dev.create_blob(bytes)?,
            None => 0,
        };
        pipe.set_value(prop, new as u64);
        Ok(())
    }
}

/// Mutable access to one plane's staged state.
///
/// The handle borrows the whole display because some plane operations have
/// display-wide effects: binding a framebuffer claims the physical plane
/// for this pipe.
pub struct PlaneHandle<'a, D: ModeDevice> {
    display: &'a mut Display<D>,
    pipe: usize,
    plane: usize,
}

impl<'a, D: ModeDevice> PlaneHandle<'a, D> {
    pub fn state(&self) -> &Plane {
        &self.display.pipes[self.pipe].planes[self.plane]
    }

    fn state_mut(&mut self) -> &mut Plane {
        &mut self.display.pipes[self.pipe].planes[self.plane]
    }

    pub fn set_prop_value(&mut self, prop: PlaneProp, value: u64) {
        self.state_mut().set_value(prop, value);
    }

    pub fn set_prop_enum(&mut self, prop: PlaneProp, name: &str) -> Result<()> {
        self.state_mut().set_enum_by_name(prop, name)
    }

    /// Stages an enum value if the plane supports it; reports support.
    pub fn try_prop_enum(&mut self, prop: PlaneProp, name: &str) -> bool {
        self.state_mut().try_enum_by_name(prop, name)
    }

    /// Current value of `prop` as the device reports it (not the staged
    /// value).
    pub fn get_prop(&mut self, prop: PlaneProp) -> Result<u64> {
        let plane_id = self.state().plane_id;
        let prop_id =
            self.state().prop_ids[prop.index()].ok_or_else(|| KmsError::MissingProperty {
                object: format!("plane {plane_id}"),
                name: prop.kernel_name(),
            })?;
        let props = self
            .display
            .dev
            .object_properties(plane_id, ObjectType::Plane)?;
        props
            .iter()
            .find(|&&(id, _)| id == prop_id)
            .map(|&(_, v)| v)
            .ok_or(KmsError::NoSuchObject(prop_id))
    }

    /// Replaces a plane blob property (e.g. a degamma LUT) with fresh blob
    /// data.
    pub fn replace_prop_blob(&mut self, prop: PlaneProp, data: Option<&[u8]>) -> Result<()> {
        let current = self.state().values[prop.index()];
        if current != 0 {
            self.display.dev.destroy_blob(current as RawId)?;
        }
        let new = match data {
            Some(bytes) => self.display.dev.create_blob(bytes)?,
            None => 0,
        };
        self.state_mut().set_value(prop, new as u64);
        Ok(())
    }

    /// Binds a framebuffer (or unbinds with `None`): programs FB_ID and
    /// CRTC_ID, defaults the src/dst rectangles to the fb size, carries the
    /// fb's color encoding onto the plane, and claims the physical plane
    /// for this pipe.
    pub fn set_fb(&mut self, fb: Option<&BoundFb>) -> Result<()> {
        let crtc_id = self.state().crtc_id;
        debug!(
            pipe = %pipe_name(self.pipe),
            plane = self.plane,
            fb = fb.map(|f| f.fb_id).unwrap_or(0),
            "set_fb"
        );

        {
            let is_cursor = self.state().ty == PlaneType::Cursor;
            let plane = self.state_mut();
            plane.set_value(PlaneProp::CrtcId, fb.map(|_| crtc_id as u64).unwrap_or(0));
            plane.set_value(PlaneProp::FbId, fb.map(|f| f.fb_id as u64).unwrap_or(0));
            plane.bo_handle = match fb {
                Some(f) if is_cursor => f.bo_handle,
                _ => 0,
            };
        }

        match fb {
            Some(fb) => {
                self.set_size(fb.width, fb.height);
                self.set_src_position(0, 0);
                self.set_src_size(fb.width, fb.height);

                if self.state().has_prop(PlaneProp::ColorEncoding) {
                    self.set_prop_enum(
                        PlaneProp::ColorEncoding,
                        fb.color_encoding.prop_value_name(),
                    )?;
                }
                if self.state().has_prop(PlaneProp::ColorRange) {
                    self.set_prop_enum(PlaneProp::ColorRange, fb.color_range.prop_value_name())?;
                }

                // The pipe that last bound an fb owns the physical plane.
                let phys = self.state().phys_index;
                self.display.phys[phys].owner = Some((self.pipe, self.plane));
            }
            None => {
                self.set_size(0, 0);
                self.set_src_position(0, 0);
                self.set_src_size(0, 0);
            }
        }
        Ok(())
    }

    /// On-screen position of the plane.
    pub fn set_position(&mut self, x: i32, y: i32) {
        let plane = self.state_mut();
        plane.set_value(PlaneProp::CrtcX, x as i64 as u64);
        plane.set_value(PlaneProp::CrtcY, y as i64 as u64);
    }

    /// On-screen size of the plane.
    pub fn set_size(&mut self, w: u32, h: u32) {
        let plane = self.state_mut();
        plane.set_value(PlaneProp::CrtcW, w as u64);
        plane.set_value(PlaneProp::CrtcH, h as u64);
    }

    /// Source rectangle origin within the fb, in whole pixels (stored as
    /// 16.16 fixed point, as the kernel expects).
    pub fn set_src_position(&mut self, x: u32, y: u32) {
        let plane = self.state_mut();
        plane.set_value(PlaneProp::SrcX, (x as u64) << 16);
        plane.set_value(PlaneProp::SrcY, (y as u64) << 16);
    }

    /// Source rectangle size within the fb, in whole pixels.
    pub fn set_src_size(&mut self, w: u32, h: u32) {
        let plane = self.state_mut();
        plane.set_value(PlaneProp::SrcW, (w as u64) << 16);
        plane.set_value(PlaneProp::SrcH, (h as u64) << 16);
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        debug!(
            pipe = %pipe_name(self.pipe),
            plane = self.plane,
            ?rotation,
            "set_rotation"
        );
        self.state_mut()
            .set_value(PlaneProp::Rotation, rotation.bits());
    }

    /// Stages an in-fence fd for the next atomic commit. The caller keeps
    /// ownership of the fd; pass -1 to clear.
    pub fn set_fence_fd(&mut self, fence_fd: i64) {
        self.state_mut()
            .set_value(PlaneProp::InFenceFd, fence_fd as u64);
    }
}

/// Mutable access to one pipe's staged CRTC state.
pub struct PipeHandle<'a, D: ModeDevice> {
    display: &'a mut Display<D>,
    index: usize,
}

impl<'a, D: ModeDevice> PipeHandle<'a, D> {
    pub fn state(&self) -> &Pipe {
        &self.display.pipes[self.index]
    }

    pub fn set_prop_value(&mut self, prop: CrtcProp, value: u64) {
        self.display.pipes[self.index].set_value(prop, value);
    }

    /// Replaces a CRTC blob property (CTM, GAMMA_LUT, DEGAMMA_LUT, ...).
    pub fn replace_prop_blob(&mut self, prop: CrtcProp, data: Option<&[u8]>) -> Result<()> {
        Display::pipe_replace_prop_blob(
            &mut self.display.dev,
            &mut self.display.pipes[self.index],
            prop,
            data,
        )
    }

    /// Asks the next atomic commit to return an out-fence for this CRTC.
    pub fn request_out_fence(&mut self) {
        self.display.pipes[self.index].set_value(CrtcProp::OutFencePtr, 1);
    }

    /// Forces the pipe's mode into the next commit, re-creating the mode
    /// blob when `force` says the old one is stale.
    pub fn refresh(&mut self, force: bool) -> Result<()> {
        if force && self.display.is_atomic {
            let output_mode = self
                .display
                .outputs
                .iter()
                .find(|o| o.pending_pipe == Some(self.index))
                .map(|o| o.mode());
            self.display.pipes[self.index].values[CrtcProp::ModeId.index()] = 0;
            if let Some(mode) = output_mode {
                Display::pipe_replace_prop_blob(
                    &mut self.display.dev,
                    &mut self.display.pipes[self.index],
                    CrtcProp::ModeId,
                    Some(&mode.to_blob_bytes()),
                )?;
            }
        } else {
            let pipe = &mut self.display.pipes[self.index];
            pipe.changed.set(CrtcProp::ModeId.index());
        }
        Ok(())
    }
}

/// Mutable access to one output's staged connector state and routing.
pub struct OutputHandle<'a, D: ModeDevice> {
    display: &'a mut Display<D>,
    index: usize,
}

impl<'a, D: ModeDevice> OutputHandle<'a, D> {
    pub fn state(&self) -> &Output {
        &self.display.outputs[self.index]
    }

    pub fn set_prop_value(&mut self, prop: ConnectorProp, value: u64) {
        self.display.outputs[self.index].set_value(prop, value);
    }

    pub fn set_prop_enum(&mut self, prop: ConnectorProp, name: &str) -> Result<()> {
        self.display.outputs[self.index].set_enum_by_name(prop, name)
    }

    pub fn try_prop_enum(&mut self, prop: ConnectorProp, name: &str) -> bool {
        let output = &mut self.display.outputs[self.index];
        match output.lookup_enum(prop, name) {
            Ok(v) => {
                output.set_value(prop, v);
                true
            }
            Err(_) => false,
        }
    }

    pub fn get_prop(&mut self, prop: ConnectorProp) -> Result<u64> {
        let output = &self.display.outputs[self.index];
        let connector_id = output.connector_id;
        let prop_id =
            output.prop_ids[prop.index()].ok_or_else(|| KmsError::MissingProperty {
                object: output.name.clone(),
                name: prop.kernel_name(),
            })?;
        let props = self
            .display
            .dev
            .object_properties(connector_id, ObjectType::Connector)?;
        props
            .iter()
            .find(|&&(id, _)| id == prop_id)
            .map(|&(_, v)| v)
            .ok_or(KmsError::NoSuchObject(prop_id))
    }

    /// Routes the connector to a pipe (or unroutes it with `None`).
    ///
    /// Stages CRTC_ID on the connector, ACTIVE and (for atomic displays)
    /// the MODE_ID blob on the new pipe, and deactivates the old pipe if
    /// this was the last output driving it.
    pub fn set_pipe(&mut self, pipe: Option<usize>) -> Result<()> {
        let d = &mut *self.display;
        let name = d.outputs[self.index].name.clone();
        debug!(
            output = %name,
            pipe = %pipe.map(|p| pipe_name(p).to_string()).unwrap_or_else(|| "none".into()),
            "set_pipe"
        );

        let old_pipe = d.outputs[self.index].pending_pipe;
        d.outputs[self.index].pending_pipe = pipe;

        if let Some(old) = old_pipe {
            let still_driven = d.outputs.iter().any(|o| o.pending_pipe == Some(old));
            if !still_driven {
                if d.is_atomic {
                    Display::pipe_replace_prop_blob(
                        &mut d.dev,
                        &mut d.pipes[old],
                        CrtcProp::ModeId,
                        None,
                    )?;
                } else {
                    d.pipes[old].changed.set(CrtcProp::ModeId.index());
                }
                d.pipes[old].set_value(CrtcProp::Active, 0);
            }
        }

        let crtc_id = pipe.map(|p| d.pipes[p].crtc_id as u64).unwrap_or(0);
        d.outputs[self.index].set_value(ConnectorProp::CrtcId, crtc_id);

        if d.outputs[self.index].force_reprobe {
            let crtc_ids: Vec<RawId> = d.pipes.iter().map(|p| p.crtc_id).collect();
            Display::refresh_output(&mut d.dev, &crtc_ids, &mut d.outputs[self.index])?;
        }

        if let Some(new) = pipe {
            if d.is_atomic {
                let mode = d.outputs[self.index].mode();
                Display::pipe_replace_prop_blob(
                    &mut d.dev,
                    &mut d.pipes[new],
                    CrtcProp::ModeId,
                    Some(&mode.to_blob_bytes()),
                )?;
            } else {
                d.pipes[new].changed.set(CrtcProp::ModeId.index());
            }
            d.pipes[new].set_value(CrtcProp::Active, 1);
        }
        Ok(())
    }

    /// Overrides the mode the next commit will program (or reverts to the
    /// connector's default with `None`).
    pub fn override_mode(&mut self, mode: Option<DisplayMode>) -> Result<()> {
        let d = &mut *self.display;
        d.outputs[self.index].override_mode = mode;

        if let Some(pipe) = d.outputs[self.index].pending_pipe {
            if d.is_atomic {
                let mode = d.outputs[self.index].mode();
                Display::pipe_replace_prop_blob(
                    &mut d.dev,
                    &mut d.pipes[pipe],
                    CrtcProp::ModeId,
                    Some(&mode.to_blob_bytes()),
                )?;
            } else {
                d.pipes[pipe].changed.set(CrtcProp::ModeId.index());
            }
        }
        Ok(())
    }
}

/// Parses an IN_FORMATS property blob (`struct drm_format_modifier_blob`)
/// into explicit (format, modifier) pairs.
pub(crate) fn parse_in_formats(data: &[u8]) -> Result<Vec<(Format, Modifier)>> {
    let too_short = || KmsError::InvalidArgument("IN_FORMATS blob too short".into());
    if data.len() < 24 {
        return Err(too_short());
    }
    let u32_at = |o: usize| u32::from_le_bytes(data[o..o + 4].try_into().unwrap());

    let version = u32_at(0);
    if version != 1 {
        return Err(KmsError::InvalidArgument(format!(
            "unknown IN_FORMATS blob version {version}"
        )));
    }
    let count_formats = u32_at(8) as usize;
    let formats_offset = u32_at(12) as usize;
    let count_modifiers = u32_at(16) as usize;
    let modifiers_offset = u32_at(20) as usize;

    if data.len() < formats_offset + count_formats * 4
        || data.len() < modifiers_offset + count_modifiers * 24
    {
        return Err(too_short());
    }

    let format_at =
        |i: usize| Format(u32_at(formats_offset + i * 4));

    let mut pairs = Vec::new();
    if count_modifiers == 0 {
        for i in 0..count_formats {
            pairs.push((format_at(i), Modifier::LINEAR));
        }
        return Ok(pairs);
    }

    for m in 0..count_modifiers {
        let base = modifiers_offset + m * 24;
        let bitmask = u64::from_le_bytes(data[base..base + 8].try_into().unwrap());
        let offset = u32_at(base + 8) as usize;
        let modifier =
            Modifier(u64::from_le_bytes(data[base + 16..base + 24].try_into().unwrap()));
        for bit in 0..64 {
            if bitmask & (1 << bit) == 0 {
                continue;
            }
            let index = offset + bit;
            if index >= count_formats {
                return Err(KmsError::InvalidArgument(
                    "IN_FORMATS modifier references format out of range".into(),
                ));
            }
            pairs.push((format_at(index), modifier));
        }
    }
    Ok(pairs)
}

/// Builds an IN_FORMATS blob from explicit pairs; the inverse of
/// [`parse_in_formats`], used by virtual devices and tests.
pub fn encode_in_formats(pairs: &[(Format, Modifier)]) -> Vec<u8> {
    let mut formats: Vec<Format> = Vec::new();
    let mut modifiers: Vec<Modifier> = Vec::new();
    for &(f, m) in pairs {
        if !formats.contains(&f) {
            formats.push(f);
        }
        if !modifiers.contains(&m) {
            modifiers.push(m);
        }
    }

    let header_len = 24usize;
    let formats_offset = header_len;
    let modifiers_offset = formats_offset + formats.len() * 4;

    let mut out = Vec::new();
    out.extend_from_slice(&1u32.to_le_bytes()); // version
    out.extend_from_slice(&0u32.to_le_bytes()); // flags
    out.extend_from_slice(&(formats.len() as u32).to_le_bytes());
    out.extend_from_slice(&(formats_offset as u32).to_le_bytes());
    out.extend_from_slice(&(modifiers.len() as u32).to_le_bytes());
    out.extend_from_slice(&(modifiers_offset as u32).to_le_bytes());
    for f in &formats {
        out.extend_from_slice(&f.0.to_le_bytes());
    }
    for m in &modifiers {
        let mut bitmask = 0u64;
        for (i, f) in formats.iter().enumerate() {
            if pairs.contains(&(*f, *m)) {
                bitmask |= 1 << i;
            }
        }
        out.extend_from_slice(&bitmask.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // offset
        out.extend_from_slice(&0u32.to_le_bytes()); // pad
        out.extend_from_slice(&m.0.to_le_bytes());
    }
    out
}
