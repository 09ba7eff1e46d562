//! The three commit styles against the virtual device: which calls they
//! issue, what state they clear, and how failures surface.

use prism_fourcc::Format;
use prism_kms::{
    CommitFlags, CommitStyle, ConnectorProp, CrtcProp, Display, KmsError, ModeDevice, PlaneProp,
    PlaneType, Rotation,
};
use prism_vkms::{Op, Topology, VirtualDevice};

/// Creates a bare XRGB8888 fb directly on the device and returns what a
/// plane binding needs.
fn make_fb(display: &mut Display<VirtualDevice>, w: u32, h: u32) -> prism_kms::BoundFb {
    let dev = display.device_mut();
    let bo = dev.create_dumb(w * 4, h, 8).unwrap();
    let fb_id = dev
        .add_framebuffer(
            w,
            h,
            Format::XRGB8888,
            None,
            [bo.handle, 0, 0, 0],
            [w * 4, 0, 0, 0],
            [0; 4],
        )
        .unwrap();
    prism_kms::BoundFb {
        fb_id,
        width: w,
        height: h,
        color_encoding: Default::default(),
        color_range: Default::default(),
        bo_handle: bo.handle,
    }
}

fn routed_display(topology: Topology) -> Display<VirtualDevice> {
    let mut display = Display::open(VirtualDevice::with_topology(topology)).unwrap();
    display.output_handle(0).set_pipe(Some(0)).unwrap();
    display
}

#[test]
fn atomic_commit_programs_the_whole_pipe() {
    let mut display = routed_display(Topology::standard());
    let fb = make_fb(&mut display, 1024, 768);
    display
        .plane_of_type(0, PlaneType::Primary)
        .unwrap()
        .set_fb(Some(&fb))
        .unwrap();

    display.commit(CommitStyle::Atomic).unwrap();

    let crtc = display.pipe(0).crtc_id();
    let plane_id = display.pipe(0).planes()[0].plane_id();
    let connector = display.output(0).connector_id();
    let dev = display.device();

    let crtc_state = dev.crtc_scanout(crtc);
    assert!(crtc_state.active);
    assert_eq!(crtc_state.mode.as_ref().unwrap().hdisplay, 1024);

    let plane_state = dev.plane_scanout(plane_id);
    assert_eq!(plane_state.fb_id, fb.fb_id);
    assert_eq!(plane_state.crtc_id, crtc);
    assert_eq!(plane_state.src, (0, 0, 1024 << 16, 768 << 16));
    assert_eq!(plane_state.dst, (0, 0, 1024, 768));

    assert_eq!(dev.connector_routing(connector), crtc);

    // Everything programmed is clean now.
    assert!(!display.pipe(0).is_prop_changed(CrtcProp::Active));
    assert!(!display.pipe(0).planes()[0].is_prop_changed(PlaneProp::FbId));
    assert!(!display.output(0).is_prop_changed(ConnectorProp::CrtcId));
}

#[test]
fn test_only_commit_leaves_state_staged() {
    let mut display = routed_display(Topology::standard());
    let fb = make_fb(&mut display, 1024, 768);
    display
        .plane_of_type(0, PlaneType::Primary)
        .unwrap()
        .set_fb(Some(&fb))
        .unwrap();

    display
        .commit_atomic(CommitFlags::ALLOW_MODESET | CommitFlags::TEST_ONLY)
        .unwrap();

    // Nothing applied...
    let plane_id = display.pipe(0).planes()[0].plane_id();
    assert_eq!(display.device().plane_scanout(plane_id).fb_id, 0);
    // ...and everything still staged for the real commit.
    assert!(display.pipe(0).planes()[0].is_prop_changed(PlaneProp::FbId));

    display.commit(CommitStyle::Atomic).unwrap();
    assert_eq!(display.device().plane_scanout(plane_id).fb_id, fb.fb_id);
}

#[test]
fn atomic_failure_keeps_state_dirty_for_retry() {
    let mut display = routed_display(Topology::standard());

    // Stage a framebuffer id that does not exist.
    display
        .plane_of_type(0, PlaneType::Primary)
        .unwrap()
        .set_prop_value(PlaneProp::FbId, 9999);
    assert!(matches!(
        display.commit(CommitStyle::Atomic),
        Err(KmsError::InvalidArgument(_))
    ));
    assert!(display.pipe(0).planes()[0].is_prop_changed(PlaneProp::FbId));

    // Fix it up and retry.
    let fb = make_fb(&mut display, 1024, 768);
    display
        .plane_of_type(0, PlaneType::Primary)
        .unwrap()
        .set_fb(Some(&fb))
        .unwrap();
    display.commit(CommitStyle::Atomic).unwrap();
}

#[test]
fn first_atomic_commit_rejects_nonblocking_flags() {
    let mut display = routed_display(Topology::standard());
    assert!(matches!(
        display.commit_atomic(CommitFlags::ALLOW_MODESET | CommitFlags::NONBLOCK),
        Err(KmsError::InvalidArgument(_))
    ));
    display.commit(CommitStyle::Atomic).unwrap();
    // After the first commit the flag is fine.
    display
        .commit_atomic(CommitFlags::NONBLOCK)
        .unwrap();
}

#[test]
fn legacy_commit_uses_setcrtc_and_cursor_ioctls() {
    let mut display = routed_display(Topology::legacy_only());
    assert!(!display.is_atomic());

    let fb = make_fb(&mut display, 1024, 768);
    display
        .plane_of_type(0, PlaneType::Primary)
        .unwrap()
        .set_fb(Some(&fb))
        .unwrap();

    let cursor_fb = make_fb(&mut display, 64, 64);
    let mut cursor = display.plane_of_type(0, PlaneType::Cursor).unwrap();
    cursor.set_fb(Some(&cursor_fb)).unwrap();
    cursor.set_position(100, 200);

    display.device_mut().take_ops();
    display.commit(CommitStyle::Legacy).unwrap();

    let ops = display.device_mut().take_ops();
    assert!(
        ops.iter().any(|op| matches!(
            op,
            Op::SetCrtc { fb, mode: Some(name), .. }
            if *fb == fb_id_of(&ops) && name == "1024x768"
        )),
        "no SetCrtc in {ops:?}"
    );
    assert!(ops
        .iter()
        .any(|op| matches!(op, Op::SetCursor { bo, .. } if *bo == cursor_fb.bo_handle)));
    assert!(ops
        .iter()
        .any(|op| matches!(op, Op::MoveCursor { x: 100, y: 200, .. })));

    let crtc = display.pipe(0).crtc_id();
    let state = display.device().crtc_scanout(crtc);
    assert!(state.active);
    assert_eq!(state.cursor_pos, (100, 200));
    assert_eq!(state.cursor_size, (64, 64));

    // Helper: the fb the SetCrtc op programmed.
    fn fb_id_of(ops: &[Op]) -> u32 {
        ops.iter()
            .find_map(|op| match op {
                Op::SetCrtc { fb, .. } if *fb != 0 => Some(*fb),
                _ => None,
            })
            .unwrap_or(0)
    }
}

#[test]
fn legacy_commit_rejects_windowed_primary() {
    let mut display = routed_display(Topology::legacy_only());
    let fb = make_fb(&mut display, 1024, 768);
    let mut primary = display.plane_of_type(0, PlaneType::Primary).unwrap();
    primary.set_fb(Some(&fb)).unwrap();
    primary.set_position(10, 10);

    assert!(matches!(
        display.commit(CommitStyle::Legacy),
        Err(KmsError::InvalidArgument(_))
    ));
}

#[test]
fn legacy_commit_rejects_primary_rotation_after_first_commit() {
    let mut display = routed_display(Topology::legacy_only());
    let fb = make_fb(&mut display, 1024, 768);
    display
        .plane_of_type(0, PlaneType::Primary)
        .unwrap()
        .set_fb(Some(&fb))
        .unwrap();
    display.commit(CommitStyle::Legacy).unwrap();

    display
        .plane_of_type(0, PlaneType::Primary)
        .unwrap()
        .set_rotation(Rotation::ROT_180);
    assert!(matches!(
        display.commit(CommitStyle::Legacy),
        Err(KmsError::InvalidArgument(_))
    ));
}

#[test]
fn universal_commit_keeps_modeset_state_staged() {
    let mut display = routed_display(Topology::legacy_only());
    let fb = make_fb(&mut display, 1024, 768);
    display
        .plane_of_type(0, PlaneType::Primary)
        .unwrap()
        .set_fb(Some(&fb))
        .unwrap();

    display.commit(CommitStyle::Universal).unwrap();

    // The plane went through SetPlane...
    let plane_id = display.pipe(0).planes()[0].plane_id();
    assert_eq!(display.device().plane_scanout(plane_id).fb_id, fb.fb_id);
    // ...but mode/active and connector routing stay staged for a
    // full-modeset commit.
    assert!(display.pipe(0).is_prop_changed(CrtcProp::ModeId));
    assert!(display.pipe(0).is_prop_changed(CrtcProp::Active));
    assert!(display.output(0).is_prop_changed(ConnectorProp::CrtcId));

    display.commit(CommitStyle::Legacy).unwrap();
    assert!(!display.pipe(0).is_prop_changed(CrtcProp::ModeId));
}

#[test]
fn overlay_disable_goes_through_setplane_zero() {
    let mut display = routed_display(Topology::standard());
    let fb = make_fb(&mut display, 1024, 768);
    display
        .plane_of_type(0, PlaneType::Primary)
        .unwrap()
        .set_fb(Some(&fb))
        .unwrap();
    let overlay_fb = make_fb(&mut display, 256, 256);
    display
        .plane_of_type(0, PlaneType::Overlay)
        .unwrap()
        .set_fb(Some(&overlay_fb))
        .unwrap();
    display.commit(CommitStyle::Atomic).unwrap();

    let overlay_id;
    {
        let pipe = display.pipe(0);
        let idx = pipe.plane_index_of_type(PlaneType::Overlay).unwrap();
        overlay_id = pipe.planes()[idx].plane_id();
    }
    assert_eq!(display.device().plane_scanout(overlay_id).fb_id, overlay_fb.fb_id);

    display
        .plane_of_type(0, PlaneType::Overlay)
        .unwrap()
        .set_fb(None)
        .unwrap();
    display.commit(CommitStyle::Atomic).unwrap();
    assert_eq!(display.device().plane_scanout(overlay_id).fb_id, 0);
}

#[test]
fn shared_overlay_follows_the_last_binding_pipe() {
    let mut display = routed_display(Topology::standard());
    // Route the second output to pipe B so both pipes are active.
    display.output_handle(1).set_pipe(Some(1)).unwrap();

    let fb_a = make_fb(&mut display, 1024, 768);
    let fb_b = make_fb(&mut display, 1024, 768);
    display
        .plane_of_type(0, PlaneType::Primary)
        .unwrap()
        .set_fb(Some(&fb_a))
        .unwrap();
    display
        .plane_of_type(1, PlaneType::Primary)
        .unwrap()
        .set_fb(Some(&fb_b))
        .unwrap();

    // The overlay is reachable from both pipes; bind it on pipe B.
    let overlay_fb = make_fb(&mut display, 128, 128);
    display
        .plane_of_type(1, PlaneType::Overlay)
        .unwrap()
        .set_fb(Some(&overlay_fb))
        .unwrap();
    display.commit(CommitStyle::Atomic).unwrap();

    let overlay_id;
    {
        let pipe = display.pipe(1);
        let idx = pipe.plane_index_of_type(PlaneType::Overlay).unwrap();
        overlay_id = pipe.planes()[idx].plane_id();
    }
    let crtc_b = display.pipe(1).crtc_id();
    assert_eq!(display.device().plane_scanout(overlay_id).crtc_id, crtc_b);

    // Rebinding from pipe A moves ownership.
    let overlay_fb2 = make_fb(&mut display, 128, 128);
    display
        .plane_of_type(0, PlaneType::Overlay)
        .unwrap()
        .set_fb(Some(&overlay_fb2))
        .unwrap();
    display.commit(CommitStyle::Atomic).unwrap();

    let crtc_a = display.pipe(0).crtc_id();
    assert_eq!(display.device().plane_scanout(overlay_id).crtc_id, crtc_a);
    assert_eq!(display.device().plane_scanout(overlay_id).fb_id, overlay_fb2.fb_id);
}

#[test]
fn first_commit_fixes_up_rotation() {
    let mut display = routed_display(Topology::legacy_only());
    let fb = make_fb(&mut display, 1024, 768);
    let mut primary = display.plane_of_type(0, PlaneType::Primary).unwrap();
    primary.set_fb(Some(&fb)).unwrap();
    primary.set_rotation(Rotation::ROT_180);

    display.device_mut().take_ops();
    display.commit(CommitStyle::Legacy).unwrap();

    // The rotation was programmed through SetProperty during fixup, before
    // the SetCrtc.
    let ops = display.device_mut().take_ops();
    let rot_at = ops
        .iter()
        .position(|op| matches!(op, Op::SetProperty { prop, value, .. } if prop == "rotation" && *value == Rotation::ROT_180.bits()))
        .expect("rotation fixup missing");
    let crtc_at = ops
        .iter()
        .position(|op| matches!(op, Op::SetCrtc { fb, .. } if *fb != 0))
        .expect("SetCrtc missing");
    assert!(rot_at < crtc_at, "{ops:?}");
}

#[test]
fn empty_commit_after_clean_state_is_a_noop_request() {
    let mut display = routed_display(Topology::standard());
    let fb = make_fb(&mut display, 1024, 768);
    display
        .plane_of_type(0, PlaneType::Primary)
        .unwrap()
        .set_fb(Some(&fb))
        .unwrap();
    display.commit(CommitStyle::Atomic).unwrap();

    display.device_mut().take_ops();
    display.commit(CommitStyle::Atomic).unwrap();
    let ops = display.device_mut().take_ops();
    assert_eq!(
        ops,
        vec![Op::AtomicCommit {
            props: 0,
            test_only: false
        }]
    );
}
