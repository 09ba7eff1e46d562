//! Display discovery and staged-state behavior against the virtual device.

use prism_fourcc::{Format, Modifier};
use prism_kms::{
    ConnectorProp, ConnectorStatus, CrtcProp, Display, KmsError, PlaneProp, PlaneType, Rotation,
};
use prism_vkms::{standard_modes, Topology, VirtualDevice};

#[test]
fn open_discovers_standard_topology() {
    let display = Display::open(VirtualDevice::standard()).unwrap();

    assert_eq!(display.n_pipes(), 2);
    assert!(display.is_atomic());
    assert!(display.has_cursor_plane());

    // Pipe A: primary, overlay, cursor. Primary first, cursor last.
    let pipe = display.pipe(0);
    assert_eq!(pipe.n_planes(), 3);
    assert_eq!(pipe.planes()[0].plane_type(), PlaneType::Primary);
    assert_eq!(pipe.planes()[2].plane_type(), PlaneType::Cursor);
    assert_eq!(pipe.plane_index_of_type(PlaneType::Cursor), Some(2));
    assert_eq!(pipe.count_plane_type(PlaneType::Overlay), 1);

    assert_eq!(display.outputs().len(), 2);
    assert_eq!(display.output(0).name(), "DP-1");
    assert_eq!(display.output(1).name(), "HDMI-A-1");
    assert_eq!(display.output(1).info().connection, ConnectorStatus::Disconnected);
}

#[test]
fn plane_formats_come_from_in_formats_blob() {
    let mut display = Display::open(VirtualDevice::standard()).unwrap();

    let primary = display.plane_of_type(0, PlaneType::Primary).unwrap();
    assert!(primary
        .state()
        .supports_format_mod(Format::XRGB8888, Modifier::I915_X_TILED));
    assert!(primary
        .state()
        .supports_format_mod(Format::NV12, Modifier::LINEAR));
    assert!(!primary
        .state()
        .supports_format_mod(Format::NV12, Modifier::I915_X_TILED));

    assert!(display.supports_format_mod(Format::YUYV, Modifier::LINEAR));
    assert!(!display.supports_format_mod(Format::P010, Modifier::LINEAR));
}

#[test]
fn reset_stages_kernel_default_state() {
    let mut display = Display::open(VirtualDevice::standard()).unwrap();

    let primary = display.plane_of_type(0, PlaneType::Primary).unwrap();
    let state = primary.state();
    // Everything zeroed and dirty, ready for the first commit.
    for prop in [
        PlaneProp::SrcW,
        PlaneProp::CrtcH,
        PlaneProp::FbId,
        PlaneProp::CrtcId,
    ] {
        assert_eq!(state.prop_value(prop), 0);
        assert!(state.is_prop_changed(prop));
    }
    assert_eq!(state.prop_value(PlaneProp::Rotation), Rotation::ROT_0.bits());
    assert_eq!(state.prop_value(PlaneProp::Alpha), 0xffff);
    // BT.601 limited range is the reset default.
    assert_eq!(state.prop_value(PlaneProp::ColorEncoding), 0);
    assert_eq!(state.prop_value(PlaneProp::ColorRange), 0);
    // Fences are cleared, not staged.
    assert_eq!(state.prop_value(PlaneProp::InFenceFd), u64::MAX);
    assert!(!state.is_prop_changed(PlaneProp::InFenceFd));

    let pipe = display.pipe(0);
    assert_eq!(pipe.prop_value(CrtcProp::Active), 0);
    assert!(pipe.is_prop_changed(CrtcProp::ModeId));
    assert!(!pipe.is_prop_changed(CrtcProp::OutFencePtr));

    let output = display.output(0);
    assert!(output.is_prop_changed(ConnectorProp::CrtcId));
    assert_eq!(output.prop_value(ConnectorProp::BroadcastRgb), 1); // Full
}

#[test]
fn output_modes_prefer_the_flagged_mode() {
    let display = Display::open(VirtualDevice::standard()).unwrap();
    let output = display.output(0);
    assert_eq!(output.default_mode().hdisplay, 1024);
    assert!(output.default_mode().is_preferred());

    // Disconnected output falls back to the standard mode.
    let fallback = display.output(1).default_mode();
    assert_eq!((fallback.hdisplay, fallback.vdisplay), (1024, 768));
}

#[test]
fn override_mode_wins_until_cleared() {
    let mut display = Display::open(VirtualDevice::standard()).unwrap();
    let mut output = display.output_handle(0);
    output.set_pipe(Some(0)).unwrap();

    let svga = standard_modes()[1].clone();
    let mut output = display.output_handle(0);
    output.override_mode(Some(svga.clone())).unwrap();
    assert_eq!(display.output(0).mode(), svga);

    let mut output = display.output_handle(0);
    output.override_mode(None).unwrap();
    assert_eq!(display.output(0).mode().hdisplay, 1024);
}

#[test]
fn set_pipe_activates_and_deactivates() {
    let mut display = Display::open(VirtualDevice::standard()).unwrap();

    display.output_handle(0).set_pipe(Some(1)).unwrap();
    assert_eq!(display.pipe(1).prop_value(CrtcProp::Active), 1);
    assert_ne!(display.pipe(1).prop_value(CrtcProp::ModeId), 0);
    let crtc_b = display.pipe(1).crtc_id() as u64;
    assert_eq!(
        display.output(0).prop_value(ConnectorProp::CrtcId),
        crtc_b
    );

    // Moving to pipe A releases pipe B.
    display.output_handle(0).set_pipe(Some(0)).unwrap();
    assert_eq!(display.pipe(1).prop_value(CrtcProp::Active), 0);
    assert_eq!(display.pipe(1).prop_value(CrtcProp::ModeId), 0);
    assert_eq!(display.pipe(0).prop_value(CrtcProp::Active), 1);

    display.output_handle(0).set_pipe(None).unwrap();
    assert_eq!(display.pipe(0).prop_value(CrtcProp::Active), 0);
    assert_eq!(display.output(0).prop_value(ConnectorProp::CrtcId), 0);
}

#[test]
fn two_outputs_cannot_claim_one_pipe() {
    let mut display = Display::open(VirtualDevice::standard()).unwrap();
    display.output_handle(0).set_pipe(Some(0)).unwrap();
    display.output_handle(1).set_pipe(Some(0)).unwrap();

    match display.commit(prism_kms::CommitStyle::Atomic) {
        Err(KmsError::PipeConflict { pipe, .. }) => assert_eq!(pipe, 'A'),
        other => panic!("expected PipeConflict, got {other:?}"),
    }
}

#[test]
fn enum_props_resolve_by_kernel_name() {
    let mut display = Display::open(VirtualDevice::standard()).unwrap();

    let mut plane = display.plane_of_type(0, PlaneType::Primary).unwrap();
    plane
        .set_prop_enum(PlaneProp::ColorEncoding, "ITU-R BT.709 YCbCr")
        .unwrap();
    assert_eq!(plane.state().prop_value(PlaneProp::ColorEncoding), 1);

    assert!(!plane.try_prop_enum(PlaneProp::ColorEncoding, "no such encoding"));
    assert!(plane.try_prop_enum(PlaneProp::PixelBlendMode, "Coverage"));

    let mut output = display.output_handle(0);
    output
        .set_prop_enum(ConnectorProp::ContentProtection, "Desired")
        .unwrap();
    assert_eq!(
        output.state().prop_value(ConnectorProp::ContentProtection),
        1
    );
}

#[test]
fn missing_properties_are_reported_by_name() {
    let mut display = Display::open(VirtualDevice::standard()).unwrap();

    // The virtual device exposes no background_color.
    display
        .pipe_handle(0)
        .set_prop_value(CrtcProp::Background, 0xff00ff);
    match display.commit(prism_kms::CommitStyle::Atomic) {
        Err(KmsError::MissingProperty { name, .. }) => {
            assert_eq!(name, "background_color");
        }
        other => panic!("expected MissingProperty, got {other:?}"),
    }
}

#[test]
fn unknown_connector_forces_a_reprobe() {
    let mut dev = VirtualDevice::with_topology({
        let mut t = Topology::standard();
        t.connectors[1].status = ConnectorStatus::Unknown;
        t
    });
    let hdmi_id = dev.connector_id_at(1);
    dev.set_connector_state(hdmi_id, ConnectorStatus::Unknown, Vec::new());

    let display = Display::open(dev).unwrap();
    assert!(display.device().probe_count(hdmi_id) >= 1);
}

#[test]
fn vblank_waits_go_to_the_device() {
    let mut display = Display::open(VirtualDevice::standard()).unwrap();
    let a = display.wait_for_vblank(0).unwrap();
    let b = display.wait_for_vblank_count(0, 5).unwrap();
    assert_eq!(b, a + 5);
    assert!(display.wait_for_vblank(9).is_err());
}

#[test]
fn single_output_for_pipe_prefers_routed_output() {
    let mut display = Display::open(VirtualDevice::standard()).unwrap();
    // Nothing routed: pick the connected DP output.
    let chosen = display.single_output_for_pipe(0).unwrap().index();
    assert_eq!(chosen, 0);

    display.output_handle(0).set_pipe(Some(1)).unwrap();
    assert_eq!(display.single_output_for_pipe(1).unwrap().index(), 0);
}
