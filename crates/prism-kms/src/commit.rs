//! Commit machinery: pushing staged state into the device.
//!
//! Three commit styles exercise three driver entry-point families:
//! - `Legacy`: SetCrtc/SetCursor for primary and cursor planes, SetPlane
//!   for overlays, SetProperty for everything else.
//! - `Universal`: SetPlane for every plane type, SetProperty for the rest.
//! - `Atomic`: one atomic request carrying every dirtied property.
//!
//! Which dirty bits a successful commit clears depends on the style: a
//! style that cannot program a property leaves its bit set so a later,
//! more capable commit picks it up.

use tracing::debug;

use crate::device::{CommitFlags, KmsError, ModeDevice, ObjectType, RawId, Result};
use crate::display::Display;
use crate::objects::{Output, PhysPlane, Pipe, Plane};
use crate::props::{ConnectorProp, CrtcProp, PlaneProp, PlaneType};

/// Which driver interface a commit goes through.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommitStyle {
    Legacy,
    Universal,
    Atomic,
}

/// Plane properties a non-atomic commit may program via SetProperty: not
/// the rectangles (SetPlane owns those), not FB_ID/CRTC_ID (SetPlane or
/// SetCrtc own those), and not IN_FENCE_FD (atomic-only).
const LEGACY_PLANE_COMMIT_MASK: u64 = (((1u64 << PlaneProp::COUNT) - 1)
    & !PlaneProp::COORD_MASK)
    & !(1 << PlaneProp::FbId as usize)
    & !(1 << PlaneProp::CrtcId as usize)
    & !(1 << PlaneProp::InFenceFd as usize);

fn missing_plane_prop(plane: &Plane, prop: PlaneProp) -> KmsError {
    KmsError::MissingProperty {
        object: format!("plane {}", plane.plane_id),
        name: prop.kernel_name(),
    }
}

impl<D: ModeDevice> Display<D> {
    /// Commits all staged changes using the given style. Atomic style uses
    /// the ALLOW_MODESET flag; use [`Display::commit_atomic`] for control
    /// over flags.
    pub fn commit(&mut self, style: CommitStyle) -> Result<()> {
        if style == CommitStyle::Atomic {
            return self.commit_atomic(CommitFlags::ALLOW_MODESET);
        }

        self.refresh()?;
        debug!(?style, "commit");

        {
            let Display {
                ref mut dev,
                ref pipes,
                ref outputs,
                ref phys,
                first_commit,
                ..
            } = *self;

            for pipe in pipes {
                pipe_commit(dev, pipe, outputs, phys, first_commit, style)?;
            }
            for output in outputs {
                output_commit(dev, output, style)?;
            }
        }

        self.commit_changed(style);
        Ok(())
    }

    /// Commits all staged changes atomically with explicit flags.
    ///
    /// TEST_ONLY commits validate without applying and leave all dirty
    /// state staged.
    pub fn commit_atomic(&mut self, flags: CommitFlags) -> Result<()> {
        if !self.is_atomic {
            return Err(KmsError::NotSupported("device rejected the atomic cap"));
        }
        self.refresh()?;
        if self.first_commit
            && flags.intersects(CommitFlags::PAGE_FLIP_EVENT | CommitFlags::NONBLOCK)
        {
            return Err(KmsError::InvalidArgument(
                "first commit after reset must be able to flush stale state".into(),
            ));
        }

        let req = self.build_atomic_request()?;
        debug!(props = req.props().len(), ?flags, "atomic commit");
        self.dev.atomic_commit(&req, flags)?;

        if flags.contains(CommitFlags::TEST_ONLY) {
            return Ok(());
        }
        self.commit_changed(CommitStyle::Atomic);
        Ok(())
    }

    fn build_atomic_request(&self) -> Result<crate::device::AtomicRequest> {
        let mut req = crate::device::AtomicRequest::new();

        for pipe in &self.pipes {
            if pipe.changed.any() {
                for prop in CrtcProp::ALL {
                    if !pipe.is_prop_changed(prop) {
                        continue;
                    }
                    let id = pipe.prop_ids[prop.index()].ok_or_else(|| {
                        KmsError::MissingProperty {
                            object: format!("pipe {}", pipe.name()),
                            name: prop.kernel_name(),
                        }
                    })?;
                    debug!(
                        pipe = %pipe.name(),
                        prop = prop.kernel_name(),
                        value = format_args!("{:#x}", pipe.prop_value(prop)),
                        "atomic crtc prop"
                    );
                    req.add(pipe.crtc_id, id, pipe.prop_value(prop));
                }
            }

            for plane in &pipe.planes {
                if self.phys[plane.phys_index].owner != Some((pipe.index, plane.index)) {
                    continue;
                }
                if !plane.changed.any() {
                    continue;
                }
                for prop in PlaneProp::ALL {
                    if !plane.is_prop_changed(prop) {
                        continue;
                    }
                    let id = plane.prop_ids[prop.index()]
                        .ok_or_else(|| missing_plane_prop(plane, prop))?;
                    debug!(
                        pipe = %pipe.name(),
                        plane = plane.index,
                        prop = prop.kernel_name(),
                        value = format_args!("{:#x}", plane.prop_value(prop)),
                        "atomic plane prop"
                    );
                    req.add(plane.plane_id, id, plane.prop_value(prop));
                }
            }
        }

        for output in &self.outputs {
            if !output.changed.any() {
                continue;
            }
            for prop in ConnectorProp::ALL {
                if !output.is_prop_changed(prop) {
                    continue;
                }
                let id = output.prop_ids[prop.index()].ok_or_else(|| {
                    KmsError::MissingProperty {
                        object: output.name().to_owned(),
                        name: prop.kernel_name(),
                    }
                })?;
                debug!(
                    output = output.name(),
                    prop = prop.kernel_name(),
                    value = format_args!("{:#x}", output.prop_value(prop)),
                    "atomic connector prop"
                );
                req.add(output.connector_id(), id, output.prop_value(prop));
            }
        }

        Ok(req)
    }

    /// Clears the dirty bits a successful commit of `style` has programmed.
    fn commit_changed(&mut self, style: CommitStyle) {
        let first_commit = self.first_commit;

        for pipe in &mut self.pipes {
            if style == CommitStyle::Atomic {
                pipe.values[CrtcProp::OutFencePtr.index()] = 0;
                pipe.changed.clear_all();
            } else {
                for prop in CrtcProp::ALL {
                    if !prop.is_atomic_only() {
                        pipe.changed.clear(prop.index());
                    }
                }
                if style != CommitStyle::Universal {
                    pipe.changed.clear(CrtcProp::ModeId.index());
                    pipe.changed.clear(CrtcProp::Active.index());
                }
            }

            for plane in &mut pipe.planes {
                if style == CommitStyle::Atomic {
                    plane.changed.clear_all();
                    // Fences are one-shot; never carry one into the next
                    // commit.
                    plane.values[PlaneProp::InFenceFd.index()] = u64::MAX;
                } else {
                    plane.changed.remove(PlaneProp::COORD_MASK);
                    plane.changed.clear(PlaneProp::CrtcId.index());
                    plane.changed.clear(PlaneProp::FbId.index());

                    let legacy_special = plane.ty == PlaneType::Primary
                        || plane.ty == PlaneType::Cursor;
                    if style != CommitStyle::Legacy || !legacy_special {
                        plane.changed.remove(LEGACY_PLANE_COMMIT_MASK);
                    }
                    if first_commit {
                        plane.changed.clear(PlaneProp::Rotation.index());
                    }
                }
            }
        }

        for output in &mut self.outputs {
            if style != CommitStyle::Universal {
                output.changed.clear_all();
            } else {
                // No modeset in a universal commit; routing stays staged.
                output
                    .changed
                    .retain(1 << ConnectorProp::CrtcId.index());
            }
        }

        self.first_commit = false;
    }
}

fn pipe_commit<D: ModeDevice>(
    dev: &mut D,
    pipe: &Pipe,
    outputs: &[Output],
    phys: &[PhysPlane],
    first_commit: bool,
    style: CommitStyle,
) -> Result<()> {
    for prop in CrtcProp::ALL {
        if !pipe.is_prop_changed(prop) || prop.is_atomic_only() {
            continue;
        }
        let id = pipe.prop_ids[prop.index()].ok_or_else(|| KmsError::MissingProperty {
            object: format!("pipe {}", pipe.name()),
            name: prop.kernel_name(),
        })?;
        dev.set_object_property(pipe.crtc_id, ObjectType::Crtc, id, pipe.prop_value(prop))?;
    }

    for plane in &pipe.planes {
        // A physical plane shared with another pipe is committed by its
        // owner only.
        if phys[plane.phys_index].owner != Some((pipe.index, plane.index)) {
            continue;
        }
        plane_commit(dev, pipe, plane, outputs, first_commit, style)?;
    }
    Ok(())
}

fn plane_commit<D: ModeDevice>(
    dev: &mut D,
    pipe: &Pipe,
    plane: &Plane,
    outputs: &[Output],
    first_commit: bool,
    style: CommitStyle,
) -> Result<()> {
    if first_commit
        || (style == CommitStyle::Universal && plane.is_prop_changed(PlaneProp::Rotation))
    {
        fixup_rotation(dev, pipe, plane)?;
    }

    match (plane.ty, style) {
        (PlaneType::Cursor, CommitStyle::Legacy) => cursor_commit_legacy(dev, pipe, plane),
        (PlaneType::Primary, CommitStyle::Legacy) => {
            primary_commit_legacy(dev, pipe, plane, outputs, first_commit)
        }
        _ => drm_plane_commit(dev, pipe, plane),
    }
}

/// Programs the initial rotation value. Some drivers refuse a rotation
/// change on an enabled plane, so fall back to disabling the plane (or the
/// whole CRTC for a primary) first.
fn fixup_rotation<D: ModeDevice>(dev: &mut D, pipe: &Pipe, plane: &Plane) -> Result<()> {
    let Some(prop_id) = plane.prop_ids[PlaneProp::Rotation.index()] else {
        return Ok(());
    };
    debug!(pipe = %pipe.name(), plane = plane.index, "fixup initial rotation");

    let value = plane.prop_value(PlaneProp::Rotation);
    if dev
        .set_object_property(plane.plane_id, ObjectType::Plane, prop_id, value)
        .is_ok()
    {
        return Ok(());
    }

    let disable = dev.set_plane(plane.plane_id, pipe.crtc_id, 0, 0, 0, 0, 0, 0, 0, 0, 0);
    if let Err(err) = disable {
        if plane.ty != PlaneType::Primary {
            return Err(err);
        }
        dev.set_crtc(pipe.crtc_id, 0, 0, 0, &[], None)?;
    }

    dev.set_object_property(plane.plane_id, ObjectType::Plane, prop_id, value)
}

fn drm_plane_commit<D: ModeDevice>(dev: &mut D, pipe: &Pipe, plane: &Plane) -> Result<()> {
    let fb_id = plane.prop_value(PlaneProp::FbId) as u32;
    let setplane = plane.is_prop_changed(PlaneProp::FbId)
        || plane.changed.intersects(PlaneProp::COORD_MASK);

    if setplane && fb_id == 0 {
        debug!(pipe = %pipe.name(), plane = plane.index, "SetPlane disable");
        dev.set_plane(plane.plane_id, pipe.crtc_id, 0, 0, 0, 0, 0, 0, 0, 0, 0)?;
    } else if setplane {
        let src_x = plane.prop_value(PlaneProp::SrcX) as u32;
        let src_y = plane.prop_value(PlaneProp::SrcY) as u32;
        let src_w = plane.prop_value(PlaneProp::SrcW) as u32;
        let src_h = plane.prop_value(PlaneProp::SrcH) as u32;
        let crtc_x = plane.prop_value(PlaneProp::CrtcX) as i32;
        let crtc_y = plane.prop_value(PlaneProp::CrtcY) as i32;
        let crtc_w = plane.prop_value(PlaneProp::CrtcW) as u32;
        let crtc_h = plane.prop_value(PlaneProp::CrtcH) as u32;

        debug!(
            pipe = %pipe.name(),
            plane = plane.index,
            fb = fb_id,
            src = format_args!("({},{}) {}x{}", src_x >> 16, src_y >> 16, src_w >> 16, src_h >> 16),
            dst = format_args!("({crtc_x},{crtc_y}) {crtc_w}x{crtc_h}"),
            "SetPlane"
        );
        dev.set_plane(
            plane.plane_id,
            pipe.crtc_id,
            fb_id,
            crtc_x,
            crtc_y,
            crtc_w,
            crtc_h,
            src_x,
            src_y,
            src_w,
            src_h,
        )?;
    }

    let changed_mask = plane.changed.bits() & LEGACY_PLANE_COMMIT_MASK;
    for prop in PlaneProp::ALL {
        if changed_mask & (1 << prop.index()) == 0 {
            continue;
        }
        let id = plane.prop_ids[prop.index()].ok_or_else(|| missing_plane_prop(plane, prop))?;
        debug!(
            pipe = %pipe.name(),
            plane = plane.index,
            prop = prop.kernel_name(),
            value = format_args!("{:#x}", plane.prop_value(prop)),
            "SetProp plane"
        );
        dev.set_object_property(plane.plane_id, ObjectType::Plane, id, plane.prop_value(prop))?;
    }

    Ok(())
}

/// Cursor planes go through the dedicated cursor ioctls in legacy style;
/// other plane properties are not programmable on this path.
fn cursor_commit_legacy<D: ModeDevice>(dev: &mut D, pipe: &Pipe, plane: &Plane) -> Result<()> {
    if plane.is_prop_changed(PlaneProp::FbId)
        || plane.is_prop_changed(PlaneProp::CrtcW)
        || plane.is_prop_changed(PlaneProp::CrtcH)
    {
        let w = plane.prop_value(PlaneProp::CrtcW) as u32;
        let h = plane.prop_value(PlaneProp::CrtcH) as u32;
        if plane.bo_handle != 0 {
            debug!(pipe = %pipe.name(), bo = plane.bo_handle, w, h, "SetCursor");
        } else {
            debug!(pipe = %pipe.name(), "SetCursor disable");
        }
        dev.set_cursor(pipe.crtc_id, plane.bo_handle, w, h)?;
    }

    if plane.is_prop_changed(PlaneProp::CrtcX) || plane.is_prop_changed(PlaneProp::CrtcY) {
        let x = plane.prop_value(PlaneProp::CrtcX) as i32;
        let y = plane.prop_value(PlaneProp::CrtcY) as i32;
        debug!(pipe = %pipe.name(), x, y, "MoveCursor");
        dev.move_cursor(pipe.crtc_id, x, y)?;
    }

    Ok(())
}

/// Primary planes in legacy style program the whole CRTC: mode, fb and
/// connector routing in one SetCrtc call.
fn primary_commit_legacy<D: ModeDevice>(
    dev: &mut D,
    pipe: &Pipe,
    plane: &Plane,
    outputs: &[Output],
    first_commit: bool,
) -> Result<()> {
    if plane.prop_value(PlaneProp::CrtcX) != 0 || plane.prop_value(PlaneProp::CrtcY) != 0 {
        return Err(KmsError::InvalidArgument(
            "legacy commit cannot window the primary plane".into(),
        ));
    }
    if !first_commit && plane.is_prop_changed(PlaneProp::Rotation) {
        return Err(KmsError::InvalidArgument(
            "legacy commit cannot rotate the primary plane".into(),
        ));
    }

    if !plane.is_prop_changed(PlaneProp::FbId)
        && !plane.changed.intersects(PlaneProp::COORD_MASK)
        && !pipe.is_prop_changed(CrtcProp::ModeId)
    {
        return Ok(());
    }

    let output = outputs.iter().find(|o| o.pending_pipe() == Some(pipe.index));
    let fb_id = match output {
        Some(_) => plane.prop_value(PlaneProp::FbId) as u32,
        None => 0,
    };

    if let (Some(output), true) = (output, fb_id != 0) {
        let mode = output.mode();
        let src_x = (plane.prop_value(PlaneProp::SrcX) >> 16) as u32;
        let src_y = (plane.prop_value(PlaneProp::SrcY) >> 16) as u32;

        debug!(
            output = output.name(),
            pipe = %pipe.name(),
            fb = fb_id,
            src = format_args!("({src_x},{src_y})"),
            mode = %mode,
            "SetCrtc"
        );
        dev.set_crtc(
            pipe.crtc_id,
            fb_id,
            src_x,
            src_y,
            &[output.connector_id()],
            Some(&mode),
        )
    } else {
        debug!(pipe = %pipe.name(), "SetCrtc disable");
        dev.set_crtc(pipe.crtc_id, 0, 0, 0, &[], None)
    }
}

fn output_commit<D: ModeDevice>(dev: &mut D, output: &Output, style: CommitStyle) -> Result<()> {
    for prop in ConnectorProp::ALL {
        if !output.is_prop_changed(prop) {
            continue;
        }
        // Routing is programmed by SetCrtc on the legacy path, and only
        // there.
        if prop == ConnectorProp::CrtcId {
            continue;
        }
        let id: RawId =
            output.prop_ids[prop.index()].ok_or_else(|| KmsError::MissingProperty {
                object: output.name().to_owned(),
                name: prop.kernel_name(),
            })?;

        if style == CommitStyle::Legacy {
            dev.set_connector_property(output.connector_id(), id, output.prop_value(prop))?;
        } else {
            dev.set_object_property(
                output.connector_id(),
                ObjectType::Connector,
                id,
                output.prop_value(prop),
            )?;
        }
    }
    Ok(())
}
