//! End-to-end: framebuffers painted, planes routed, commits issued, and
//! the committed device state inspected.

use prism::fb::{DeviceClass, Framebuffer};
use prism::fourcc::{Format, Modifier};
use prism::kms::{CommitStyle, ConnectorProp, CrtcProp, Display, PlaneType};
use prism::vkms::{Topology, VirtualDevice};

fn open_routed(topology: Topology) -> Display<VirtualDevice> {
    let mut display = Display::open(VirtualDevice::with_topology(topology)).unwrap();
    display.output_handle(0).set_pipe(Some(0)).unwrap();
    display
}

#[test]
fn atomic_modeset_with_painted_framebuffers() {
    let mut display = open_routed(Topology::standard());
    let mode = display.output(0).mode();
    let (w, h) = (mode.hdisplay as u32, mode.vdisplay as u32);

    // Primary: color bars. Overlay: YUYV. Cursor: ARGB.
    let primary_fb = Framebuffer::create(
        display.device_mut(),
        DeviceClass::Other,
        w,
        h,
        Format::XRGB8888,
        Modifier::LINEAR,
    )
    .unwrap();
    primary_fb
        .paint(display.device_mut(), |c| c.color_bars())
        .unwrap();

    let overlay_fb = Framebuffer::create(
        display.device_mut(),
        DeviceClass::Other,
        256,
        128,
        Format::YUYV,
        Modifier::LINEAR,
    )
    .unwrap();
    overlay_fb
        .paint(display.device_mut(), |c| c.fill([0.0, 1.0, 0.0, 1.0]))
        .unwrap();

    let cursor_fb = Framebuffer::create(
        display.device_mut(),
        DeviceClass::Other,
        64,
        64,
        Format::ARGB8888,
        Modifier::LINEAR,
    )
    .unwrap();

    display
        .plane_of_type(0, PlaneType::Primary)
        .unwrap()
        .set_fb(Some(&primary_fb.bound()))
        .unwrap();

    let mut overlay = display.plane_of_type(0, PlaneType::Overlay).unwrap();
    overlay.set_fb(Some(&overlay_fb.bound())).unwrap();
    overlay.set_position(100, 50);

    let mut cursor = display.plane_of_type(0, PlaneType::Cursor).unwrap();
    cursor.set_fb(Some(&cursor_fb.bound())).unwrap();
    cursor.set_position(500, 300);

    display.commit(CommitStyle::Atomic).unwrap();

    let crtc = display.pipe(0).crtc_id();
    let primary_id = display.pipe(0).planes()[0].plane_id();
    let overlay_idx = display.pipe(0).plane_index_of_type(PlaneType::Overlay).unwrap();
    let overlay_id = display.pipe(0).planes()[overlay_idx].plane_id();

    let dev = display.device();
    assert!(dev.crtc_scanout(crtc).active);
    assert_eq!(
        dev.crtc_scanout(crtc).mode.as_ref().unwrap().hdisplay as u32,
        w
    );
    assert_eq!(dev.plane_scanout(primary_id).fb_id, primary_fb.fb_id);
    let overlay_state = dev.plane_scanout(overlay_id);
    assert_eq!(overlay_state.fb_id, overlay_fb.fb_id);
    assert_eq!(overlay_state.dst, (100, 50, 256, 128));
    assert_eq!(overlay_state.src, (0, 0, 256 << 16, 128 << 16));

    // What we painted is what the buffer decodes back to.
    let canvas = primary_fb.read_canvas(display.device_mut()).unwrap();
    assert_eq!(canvas.pixel(0, 0), [1.0, 1.0, 1.0, 1.0]); // white bar
    let last = canvas.pixel(w - 1, h - 1);
    assert_eq!(last, [0.0, 0.0, 1.0, 1.0]); // blue bar

    // The YUYV overlay decodes to green within chroma rounding error.
    let overlay_canvas = overlay_fb.read_canvas(display.device_mut()).unwrap();
    let px = overlay_canvas.pixel(17, 90);
    assert!(px[1] > 0.98 && px[0] < 0.02 && px[2] < 0.02, "{px:?}");
}

#[test]
fn legacy_modeset_reaches_the_same_scanout_state() {
    let mut display = open_routed(Topology::legacy_only());
    let mode = display.output(0).mode();
    let (w, h) = (mode.hdisplay as u32, mode.vdisplay as u32);

    let fb = Framebuffer::create(
        display.device_mut(),
        DeviceClass::Other,
        w,
        h,
        Format::XRGB8888,
        Modifier::LINEAR,
    )
    .unwrap();
    display
        .plane_of_type(0, PlaneType::Primary)
        .unwrap()
        .set_fb(Some(&fb.bound()))
        .unwrap();
    display.commit(CommitStyle::Legacy).unwrap();

    let crtc = display.pipe(0).crtc_id();
    let connector = display.output(0).connector_id();
    let dev = display.device();
    let state = dev.crtc_scanout(crtc);
    assert!(state.active);
    assert_eq!(state.fb_id, fb.fb_id);
    assert_eq!(state.mode.as_ref().unwrap().hdisplay as u32, w);
    assert_eq!(dev.connector_routing(connector), crtc);
}

#[test]
fn pageflip_changes_only_the_framebuffer() {
    let mut display = open_routed(Topology::standard());
    let mode = display.output(0).mode();
    let (w, h) = (mode.hdisplay as u32, mode.vdisplay as u32);

    let front = Framebuffer::create(
        display.device_mut(),
        DeviceClass::Other,
        w,
        h,
        Format::XRGB8888,
        Modifier::LINEAR,
    )
    .unwrap();
    let back = Framebuffer::create(
        display.device_mut(),
        DeviceClass::Other,
        w,
        h,
        Format::XRGB8888,
        Modifier::LINEAR,
    )
    .unwrap();

    display
        .plane_of_type(0, PlaneType::Primary)
        .unwrap()
        .set_fb(Some(&front.bound()))
        .unwrap();
    display.commit(CommitStyle::Atomic).unwrap();

    // Flip: only FB_ID and the default rectangles get restaged.
    display
        .plane_of_type(0, PlaneType::Primary)
        .unwrap()
        .set_fb(Some(&back.bound()))
        .unwrap();
    display.device_mut().take_ops();
    display.commit(CommitStyle::Atomic).unwrap();

    let primary_id = display.pipe(0).planes()[0].plane_id();
    assert_eq!(display.device().plane_scanout(primary_id).fb_id, back.fb_id);
    // The mode was untouched by the flip.
    assert!(!display.pipe(0).is_prop_changed(CrtcProp::ModeId));
    assert!(!display.output(0).is_prop_changed(ConnectorProp::CrtcId));
}

#[test]
fn format_conversion_between_live_framebuffers() {
    let mut display = open_routed(Topology::standard());

    let rgb_fb = Framebuffer::create(
        display.device_mut(),
        DeviceClass::Other,
        64,
        64,
        Format::XRGB8888,
        Modifier::LINEAR,
    )
    .unwrap();
    rgb_fb
        .paint(display.device_mut(), |c| {
            c.h_gradient([0.0, 0.0, 0.0, 1.0], [1.0, 1.0, 1.0, 1.0])
        })
        .unwrap();

    let nv12_fb = Framebuffer::create(
        display.device_mut(),
        DeviceClass::Other,
        64,
        64,
        Format::NV12,
        Modifier::LINEAR,
    )
    .unwrap();

    // Convert the painted gradient into the NV12 buffer, then decode both
    // and compare: gray content has no chroma, so only luma quantization
    // separates them.
    let canvas = rgb_fb.read_canvas(display.device_mut()).unwrap();
    nv12_fb.write_canvas(display.device_mut(), &canvas).unwrap();
    let decoded = nv12_fb.read_canvas(display.device_mut()).unwrap();

    for x in [0u32, 13, 31, 63] {
        let a = canvas.pixel(x, 10);
        let b = decoded.pixel(x, 10);
        for c in 0..3 {
            assert!((a[c] - b[c]).abs() < 0.02, "x={x}: {a:?} vs {b:?}");
        }
    }
}

#[test]
fn vblank_sequences_advance_per_commit_and_wait() {
    let mut display = open_routed(Topology::standard());
    let before = display.wait_for_vblank(0).unwrap();
    let after = display.wait_for_vblank_count(0, 3).unwrap();
    assert_eq!(after, before + 3);
}
