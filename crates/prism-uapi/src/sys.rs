//! Raw DRM uapi: `repr(C)` mirrors of the kernel mode structs and the
//! ioctl definitions that take them.
//!
//! Struct layouts are ABI; the size assertions at the bottom pin them
//! against the kernel's `drm_mode.h`/`drm.h` values for 64-bit targets.

#![allow(non_camel_case_types)]

pub const DRM_IOCTL_MAGIC: u8 = b'd';

// Client caps.
pub const DRM_CLIENT_CAP_UNIVERSAL_PLANES: u64 = 2;
pub const DRM_CLIENT_CAP_ATOMIC: u64 = 3;

// drm_mode_cursor flags.
pub const DRM_MODE_CURSOR_BO: u32 = 1;
pub const DRM_MODE_CURSOR_MOVE: u32 = 2;

// Property flags (drm_mode_get_property::flags).
pub const DRM_MODE_PROP_PENDING: u32 = 1 << 0;
pub const DRM_MODE_PROP_RANGE: u32 = 1 << 1;
pub const DRM_MODE_PROP_IMMUTABLE: u32 = 1 << 2;
pub const DRM_MODE_PROP_ENUM: u32 = 1 << 3;
pub const DRM_MODE_PROP_BLOB: u32 = 1 << 4;
pub const DRM_MODE_PROP_BITMASK: u32 = 1 << 5;
pub const DRM_MODE_PROP_EXTENDED_TYPE: u32 = 0x0000_ffc0;
pub const DRM_MODE_PROP_OBJECT: u32 = 1 << 6;
pub const DRM_MODE_PROP_SIGNED_RANGE: u32 = 2 << 6;

// drm_wait_vblank request types/flags.
pub const DRM_VBLANK_RELATIVE: u32 = 0x1;
pub const DRM_VBLANK_SECONDARY: u32 = 0x2000_0000;
pub const DRM_VBLANK_HIGH_CRTC_SHIFT: u32 = 1;
pub const DRM_VBLANK_HIGH_CRTC_MASK: u32 = 0x0000_003e;

pub const DRM_MODE_FB_MODIFIERS: u32 = 1 << 1;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_set_client_cap {
    pub capability: u64,
    pub value: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_card_res {
    pub fb_id_ptr: u64,
    pub crtc_id_ptr: u64,
    pub connector_id_ptr: u64,
    pub encoder_id_ptr: u64,
    pub count_fbs: u32,
    pub count_crtcs: u32,
    pub count_connectors: u32,
    pub count_encoders: u32,
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct drm_mode_modeinfo {
    pub clock: u32,
    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub hskew: u16,
    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vscan: u16,
    pub vrefresh: u32,
    pub flags: u32,
    pub type_: u32,
    pub name: [u8; 32],
}

impl Default for drm_mode_modeinfo {
    fn default() -> Self {
        // Zeroed; all fields are plain integers/bytes.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct drm_mode_crtc {
    pub set_connectors_ptr: u64,
    pub count_connectors: u32,
    pub crtc_id: u32,
    pub fb_id: u32,
    pub x: u32,
    pub y: u32,
    pub gamma_size: u32,
    pub mode_valid: u32,
    pub mode: drm_mode_modeinfo,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_get_encoder {
    pub encoder_id: u32,
    pub encoder_type: u32,
    pub crtc_id: u32,
    pub possible_crtcs: u32,
    pub possible_clones: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_get_connector {
    pub encoders_ptr: u64,
    pub modes_ptr: u64,
    pub props_ptr: u64,
    pub prop_values_ptr: u64,
    pub count_modes: u32,
    pub count_props: u32,
    pub count_encoders: u32,
    pub encoder_id: u32,
    pub connector_id: u32,
    pub connector_type: u32,
    pub connector_type_id: u32,
    pub connection: u32,
    pub mm_width: u32,
    pub mm_height: u32,
    pub subpixel: u32,
    pub pad: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_get_plane_res {
    pub plane_id_ptr: u64,
    pub count_planes: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_get_plane {
    pub plane_id: u32,
    pub crtc_id: u32,
    pub fb_id: u32,
    pub possible_crtcs: u32,
    pub gamma_size: u32,
    pub count_format_types: u32,
    pub format_type_ptr: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_set_plane {
    pub plane_id: u32,
    pub crtc_id: u32,
    pub fb_id: u32,
    pub flags: u32,
    pub crtc_x: i32,
    pub crtc_y: i32,
    pub crtc_w: u32,
    pub crtc_h: u32,
    // Note the kernel's h-before-w order for the source rectangle.
    pub src_x: u32,
    pub src_y: u32,
    pub src_h: u32,
    pub src_w: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct drm_mode_get_property {
    pub values_ptr: u64,
    pub enum_blob_ptr: u64,
    pub prop_id: u32,
    pub flags: u32,
    pub name: [u8; 32],
    pub count_values: u32,
    pub count_enum_blobs: u32,
}

impl Default for drm_mode_get_property {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct drm_mode_property_enum {
    pub value: u64,
    pub name: [u8; 32],
}

impl Default for drm_mode_property_enum {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_connector_set_property {
    pub value: u64,
    pub prop_id: u32,
    pub connector_id: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_obj_get_properties {
    pub props_ptr: u64,
    pub prop_values_ptr: u64,
    pub count_props: u32,
    pub obj_id: u32,
    pub obj_type: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_obj_set_property {
    pub value: u64,
    pub prop_id: u32,
    pub obj_id: u32,
    pub obj_type: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_get_blob {
    pub blob_id: u32,
    pub length: u32,
    pub data: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_create_blob {
    pub data: u64,
    pub length: u32,
    pub blob_id: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_destroy_blob {
    pub blob_id: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_fb_cmd2 {
    pub fb_id: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_format: u32,
    pub flags: u32,
    pub handles: [u32; 4],
    pub pitches: [u32; 4],
    pub offsets: [u32; 4],
    pub modifier: [u64; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_atomic {
    pub flags: u32,
    pub count_objs: u32,
    pub objs_ptr: u64,
    pub count_props_ptr: u64,
    pub props_ptr: u64,
    pub prop_values_ptr: u64,
    pub reserved: u64,
    pub user_data: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_create_dumb {
    pub height: u32,
    pub width: u32,
    pub bpp: u32,
    pub flags: u32,
    pub handle: u32,
    pub pitch: u32,
    pub size: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_map_dumb {
    pub handle: u32,
    pub pad: u32,
    pub offset: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_destroy_dumb {
    pub handle: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_mode_cursor {
    pub flags: u32,
    pub crtc_id: u32,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub handle: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_wait_vblank_request {
    pub type_: u32,
    pub sequence: u32,
    pub signal: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct drm_wait_vblank_reply {
    pub type_: u32,
    pub sequence: u32,
    pub tval_sec: i64,
    pub tval_usec: i64,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union drm_wait_vblank {
    pub request: drm_wait_vblank_request,
    pub reply: drm_wait_vblank_reply,
}

nix::ioctl_write_ptr!(set_client_cap, DRM_IOCTL_MAGIC, 0x0d, drm_set_client_cap);
nix::ioctl_readwrite!(wait_vblank, DRM_IOCTL_MAGIC, 0x3a, drm_wait_vblank);

nix::ioctl_readwrite!(mode_getresources, DRM_IOCTL_MAGIC, 0xa0, drm_mode_card_res);
nix::ioctl_readwrite!(mode_setcrtc, DRM_IOCTL_MAGIC, 0xa2, drm_mode_crtc);
nix::ioctl_readwrite!(mode_cursor, DRM_IOCTL_MAGIC, 0xa3, drm_mode_cursor);
nix::ioctl_readwrite!(mode_getencoder, DRM_IOCTL_MAGIC, 0xa6, drm_mode_get_encoder);
nix::ioctl_readwrite!(mode_getconnector, DRM_IOCTL_MAGIC, 0xa7, drm_mode_get_connector);
nix::ioctl_readwrite!(mode_getproperty, DRM_IOCTL_MAGIC, 0xaa, drm_mode_get_property);
nix::ioctl_readwrite!(
    mode_setproperty,
    DRM_IOCTL_MAGIC,
    0xab,
    drm_mode_connector_set_property
);
nix::ioctl_readwrite!(mode_getpropblob, DRM_IOCTL_MAGIC, 0xac, drm_mode_get_blob);
nix::ioctl_readwrite!(mode_rmfb, DRM_IOCTL_MAGIC, 0xaf, libc::c_uint);
nix::ioctl_readwrite!(mode_create_dumb, DRM_IOCTL_MAGIC, 0xb2, drm_mode_create_dumb);
nix::ioctl_readwrite!(mode_map_dumb, DRM_IOCTL_MAGIC, 0xb3, drm_mode_map_dumb);
nix::ioctl_readwrite!(
    mode_destroy_dumb,
    DRM_IOCTL_MAGIC,
    0xb4,
    drm_mode_destroy_dumb
);
nix::ioctl_readwrite!(
    mode_getplaneresources,
    DRM_IOCTL_MAGIC,
    0xb5,
    drm_mode_get_plane_res
);
nix::ioctl_readwrite!(mode_getplane, DRM_IOCTL_MAGIC, 0xb6, drm_mode_get_plane);
nix::ioctl_readwrite!(mode_setplane, DRM_IOCTL_MAGIC, 0xb7, drm_mode_set_plane);
nix::ioctl_readwrite!(mode_addfb2, DRM_IOCTL_MAGIC, 0xb8, drm_mode_fb_cmd2);
nix::ioctl_readwrite!(
    mode_obj_getproperties,
    DRM_IOCTL_MAGIC,
    0xb9,
    drm_mode_obj_get_properties
);
nix::ioctl_readwrite!(
    mode_obj_setproperty,
    DRM_IOCTL_MAGIC,
    0xba,
    drm_mode_obj_set_property
);
nix::ioctl_readwrite!(mode_atomic, DRM_IOCTL_MAGIC, 0xbc, drm_mode_atomic);
nix::ioctl_readwrite!(
    mode_createpropblob,
    DRM_IOCTL_MAGIC,
    0xbd,
    drm_mode_create_blob
);
nix::ioctl_readwrite!(
    mode_destroypropblob,
    DRM_IOCTL_MAGIC,
    0xbe,
    drm_mode_destroy_blob
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    // Layouts are kernel ABI; sizes from drm_mode.h on 64-bit.
    #[test]
    fn struct_sizes_match_the_kernel_abi() {
        assert_eq!(size_of::<drm_mode_modeinfo>(), 68);
        assert_eq!(size_of::<drm_mode_card_res>(), 64);
        assert_eq!(size_of::<drm_mode_crtc>(), 104);
        assert_eq!(size_of::<drm_mode_get_connector>(), 80);
        assert_eq!(size_of::<drm_mode_get_encoder>(), 20);
        assert_eq!(size_of::<drm_mode_get_plane_res>(), 16);
        assert_eq!(size_of::<drm_mode_get_plane>(), 32);
        assert_eq!(size_of::<drm_mode_set_plane>(), 48);
        assert_eq!(size_of::<drm_mode_get_property>(), 64);
        assert_eq!(size_of::<drm_mode_property_enum>(), 40);
        assert_eq!(size_of::<drm_mode_obj_get_properties>(), 32);
        assert_eq!(size_of::<drm_mode_obj_set_property>(), 24);
        assert_eq!(size_of::<drm_mode_fb_cmd2>(), 104);
        assert_eq!(size_of::<drm_mode_atomic>(), 56);
        assert_eq!(size_of::<drm_mode_create_dumb>(), 32);
        assert_eq!(size_of::<drm_mode_map_dumb>(), 16);
        assert_eq!(size_of::<drm_mode_cursor>(), 28);
        assert_eq!(size_of::<drm_set_client_cap>(), 16);
        assert_eq!(size_of::<drm_wait_vblank>(), 24);
    }

    #[test]
    fn modeinfo_layout_matches_the_blob_codec() {
        // The MODE_ID blob wire format and this struct are the same bytes.
        assert_eq!(
            size_of::<drm_mode_modeinfo>(),
            prism_kms::MODE_BLOB_SIZE
        );
    }
}
