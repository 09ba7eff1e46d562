//! `ModeDevice` over a real DRM card node.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use prism_fourcc::{Format, Modifier};
use prism_kms::{
    AtomicRequest, CardResources, ClientCap, CommitFlags, ConnectorInfo, ConnectorStatus,
    ConnectorType, DisplayMode, DumbBuffer, EncoderInfo, KmsError, ModeDevice, ObjectType,
    PlaneInfo, PropertyInfo, PropertyKind, RawId, Result, MODE_BLOB_SIZE,
};
use tracing::{debug, trace};

use crate::sys;

struct Mapping {
    ptr: *mut libc::c_void,
    len: usize,
}

/// A DRM device backed by an open `/dev/dri/cardN` file descriptor.
///
/// Dumb-buffer mappings are cached per handle and unmapped when the buffer
/// is destroyed or the device is dropped.
pub struct DrmDevice {
    file: File,
    path: PathBuf,
    mappings: HashMap<u32, Mapping>,
    /// Dumb buffer sizes by handle; the kernel has no size query, so the
    /// creation-time size is what mappings use.
    sizes: HashMap<u32, usize>,
}

// The mappings are plain anonymous-file memory; nothing thread-bound.
unsafe impl Send for DrmDevice {}

fn ioctl_err(errno: Errno, object: RawId) -> KmsError {
    match errno {
        Errno::ENOENT => KmsError::NoSuchObject(object),
        Errno::EINVAL => KmsError::InvalidArgument(format!("EINVAL (object {object})")),
        Errno::EPERM | Errno::EACCES => KmsError::PermissionDenied,
        Errno::EBUSY => KmsError::Busy,
        Errno::EOPNOTSUPP => KmsError::NotSupported("ioctl not supported by driver"),
        other => KmsError::Io(other.to_string()),
    }
}

fn cstr_name(raw: &[u8; 32]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn mode_to_sys(mode: &DisplayMode) -> sys::drm_mode_modeinfo {
    // Same 68-byte wire layout as the MODE_ID blob.
    unsafe { std::mem::transmute::<[u8; MODE_BLOB_SIZE], sys::drm_mode_modeinfo>(mode.to_blob_bytes()) }
}

fn mode_from_sys(mode: &sys::drm_mode_modeinfo) -> Result<DisplayMode> {
    let bytes = unsafe { std::mem::transmute::<sys::drm_mode_modeinfo, [u8; MODE_BLOB_SIZE]>(*mode) };
    DisplayMode::from_blob_bytes(&bytes)
        .ok_or_else(|| KmsError::Io("malformed mode from kernel".into()))
}

fn connector_type_from_kernel(raw: u32) -> ConnectorType {
    match raw {
        1 => ConnectorType::Vga,
        2 => ConnectorType::DviI,
        3 => ConnectorType::DviD,
        4 => ConnectorType::DviA,
        5 => ConnectorType::Composite,
        6 => ConnectorType::SVideo,
        7 => ConnectorType::Lvds,
        8 => ConnectorType::Component,
        9 => ConnectorType::NinePinDin,
        10 => ConnectorType::DisplayPort,
        11 => ConnectorType::HdmiA,
        12 => ConnectorType::HdmiB,
        13 => ConnectorType::Tv,
        14 => ConnectorType::Edp,
        15 => ConnectorType::Virtual,
        16 => ConnectorType::Dsi,
        17 => ConnectorType::Dpi,
        18 => ConnectorType::Writeback,
        other => ConnectorType::Unknown(other),
    }
}

impl DrmDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<DrmDevice> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| KmsError::Io(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "opened DRM device");
        Ok(DrmDevice {
            file,
            path,
            mappings: HashMap::new(),
            sizes: HashMap::new(),
        })
    }

    /// Opens the first card node that answers the resources ioctl.
    pub fn open_first_card() -> Result<DrmDevice> {
        for index in 0..16 {
            let path = format!("/dev/dri/card{index}");
            let Ok(mut dev) = DrmDevice::open(&path) else {
                continue;
            };
            if dev.resources().is_ok() {
                return Ok(dev);
            }
        }
        Err(KmsError::NotSupported("no usable DRM card node"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> i32 {
        self.file.as_raw_fd()
    }

    fn unmap(mapping: &Mapping) {
        unsafe {
            libc::munmap(mapping.ptr, mapping.len);
        }
    }
}

impl Drop for DrmDevice {
    fn drop(&mut self) {
        for mapping in self.mappings.values() {
            Self::unmap(mapping);
        }
    }
}

impl ModeDevice for DrmDevice {
    fn resources(&mut self) -> Result<CardResources> {
        // Two-call pattern: sizes first, then the arrays. Retry if a
        // hotplug grew the counts in between.
        loop {
            let mut res = sys::drm_mode_card_res::default();
            unsafe { sys::mode_getresources(self.fd(), &mut res) }
                .map_err(|e| ioctl_err(e, 0))?;

            let mut crtcs = vec![0u32; res.count_crtcs as usize];
            let mut connectors = vec![0u32; res.count_connectors as usize];
            let mut encoders = vec![0u32; res.count_encoders as usize];
            let mut fbs = vec![0u32; res.count_fbs as usize];

            let mut fetch = sys::drm_mode_card_res {
                crtc_id_ptr: crtcs.as_mut_ptr() as u64,
                connector_id_ptr: connectors.as_mut_ptr() as u64,
                encoder_id_ptr: encoders.as_mut_ptr() as u64,
                fb_id_ptr: fbs.as_mut_ptr() as u64,
                count_crtcs: res.count_crtcs,
                count_connectors: res.count_connectors,
                count_encoders: res.count_encoders,
                count_fbs: res.count_fbs,
                ..Default::default()
            };
            unsafe { sys::mode_getresources(self.fd(), &mut fetch) }
                .map_err(|e| ioctl_err(e, 0))?;

            if fetch.count_crtcs as usize > crtcs.len()
                || fetch.count_connectors as usize > connectors.len()
                || fetch.count_encoders as usize > encoders.len()
            {
                continue;
            }

            crtcs.truncate(fetch.count_crtcs as usize);
            connectors.truncate(fetch.count_connectors as usize);
            encoders.truncate(fetch.count_encoders as usize);
            return Ok(CardResources {
                crtcs,
                connectors,
                encoders,
                min_size: (fetch.min_width, fetch.min_height),
                max_size: (fetch.max_width, fetch.max_height),
            });
        }
    }

    fn plane_ids(&mut self) -> Result<Vec<RawId>> {
        loop {
            let mut res = sys::drm_mode_get_plane_res::default();
            unsafe { sys::mode_getplaneresources(self.fd(), &mut res) }
                .map_err(|e| ioctl_err(e, 0))?;

            let mut planes = vec![0u32; res.count_planes as usize];
            let mut fetch = sys::drm_mode_get_plane_res {
                plane_id_ptr: planes.as_mut_ptr() as u64,
                count_planes: res.count_planes,
            };
            unsafe { sys::mode_getplaneresources(self.fd(), &mut fetch) }
                .map_err(|e| ioctl_err(e, 0))?;

            if fetch.count_planes as usize > planes.len() {
                continue;
            }
            planes.truncate(fetch.count_planes as usize);
            return Ok(planes);
        }
    }

    fn plane(&mut self, plane_id: RawId) -> Result<PlaneInfo> {
        let mut probe = sys::drm_mode_get_plane {
            plane_id,
            ..Default::default()
        };
        unsafe { sys::mode_getplane(self.fd(), &mut probe) }
            .map_err(|e| ioctl_err(e, plane_id))?;

        let mut formats = vec![0u32; probe.count_format_types as usize];
        let mut fetch = sys::drm_mode_get_plane {
            plane_id,
            count_format_types: probe.count_format_types,
            format_type_ptr: formats.as_mut_ptr() as u64,
            ..Default::default()
        };
        unsafe { sys::mode_getplane(self.fd(), &mut fetch) }
            .map_err(|e| ioctl_err(e, plane_id))?;
        formats.truncate(fetch.count_format_types as usize);

        Ok(PlaneInfo {
            plane_id,
            possible_crtcs: fetch.possible_crtcs,
            formats: formats.into_iter().map(Format).collect(),
        })
    }

    fn encoder(&mut self, encoder_id: RawId) -> Result<EncoderInfo> {
        let mut enc = sys::drm_mode_get_encoder {
            encoder_id,
            ..Default::default()
        };
        unsafe { sys::mode_getencoder(self.fd(), &mut enc) }
            .map_err(|e| ioctl_err(e, encoder_id))?;
        Ok(EncoderInfo {
            encoder_id,
            possible_crtcs: enc.possible_crtcs,
        })
    }

    fn connector(&mut self, connector_id: RawId, probe: bool) -> Result<ConnectorInfo> {
        // The counting call with zero counts is what makes the kernel run
        // a fresh detection cycle; `probe = false` callers accept that the
        // array fetch may still reflect it.
        let _ = probe;
        loop {
            let mut count = sys::drm_mode_get_connector {
                connector_id,
                ..Default::default()
            };
            unsafe { sys::mode_getconnector(self.fd(), &mut count) }
                .map_err(|e| ioctl_err(e, connector_id))?;

            let mut modes =
                vec![sys::drm_mode_modeinfo::default(); count.count_modes.max(1) as usize];
            let mut props = vec![0u32; count.count_props as usize];
            let mut prop_values = vec![0u64; count.count_props as usize];
            let mut encoders = vec![0u32; count.count_encoders as usize];

            let mut fetch = sys::drm_mode_get_connector {
                connector_id,
                modes_ptr: modes.as_mut_ptr() as u64,
                props_ptr: props.as_mut_ptr() as u64,
                prop_values_ptr: prop_values.as_mut_ptr() as u64,
                encoders_ptr: encoders.as_mut_ptr() as u64,
                count_modes: count.count_modes,
                count_props: count.count_props,
                count_encoders: count.count_encoders,
                ..Default::default()
            };
            unsafe { sys::mode_getconnector(self.fd(), &mut fetch) }
                .map_err(|e| ioctl_err(e, connector_id))?;

            if fetch.count_modes as usize > modes.len()
                || fetch.count_props as usize > props.len()
                || fetch.count_encoders as usize > encoders.len()
            {
                continue;
            }

            modes.truncate(fetch.count_modes as usize);
            encoders.truncate(fetch.count_encoders as usize);

            let modes = modes
                .iter()
                .map(mode_from_sys)
                .collect::<Result<Vec<_>>>()?;

            trace!(connector_id, modes = modes.len(), "probed connector");
            return Ok(ConnectorInfo {
                connector_id,
                connector_type: connector_type_from_kernel(fetch.connector_type),
                connector_type_id: fetch.connector_type_id,
                connection: match fetch.connection {
                    1 => ConnectorStatus::Connected,
                    2 => ConnectorStatus::Disconnected,
                    _ => ConnectorStatus::Unknown,
                },
                mm_width: fetch.mm_width,
                mm_height: fetch.mm_height,
                modes,
                encoders,
            });
        }
    }

    fn object_properties(&mut self, object: RawId, ty: ObjectType) -> Result<Vec<(RawId, u64)>> {
        loop {
            let mut count = sys::drm_mode_obj_get_properties {
                obj_id: object,
                obj_type: ty.kernel_value(),
                ..Default::default()
            };
            unsafe { sys::mode_obj_getproperties(self.fd(), &mut count) }
                .map_err(|e| ioctl_err(e, object))?;

            let mut props = vec![0u32; count.count_props as usize];
            let mut values = vec![0u64; count.count_props as usize];
            let mut fetch = sys::drm_mode_obj_get_properties {
                obj_id: object,
                obj_type: ty.kernel_value(),
                props_ptr: props.as_mut_ptr() as u64,
                prop_values_ptr: values.as_mut_ptr() as u64,
                count_props: count.count_props,
            };
            unsafe { sys::mode_obj_getproperties(self.fd(), &mut fetch) }
                .map_err(|e| ioctl_err(e, object))?;

            if fetch.count_props as usize > props.len() {
                continue;
            }
            props.truncate(fetch.count_props as usize);
            values.truncate(fetch.count_props as usize);
            return Ok(props.into_iter().zip(values).map(|(p, v)| (p, v)).collect());
        }
    }

    fn property_info(&mut self, prop_id: RawId) -> Result<PropertyInfo> {
        let mut count = sys::drm_mode_get_property {
            prop_id,
            ..Default::default()
        };
        unsafe { sys::mode_getproperty(self.fd(), &mut count) }
            .map_err(|e| ioctl_err(e, prop_id))?;

        let mut values = vec![0u64; count.count_values as usize];
        let mut enums =
            vec![sys::drm_mode_property_enum::default(); count.count_enum_blobs as usize];
        let mut fetch = sys::drm_mode_get_property {
            prop_id,
            values_ptr: values.as_mut_ptr() as u64,
            enum_blob_ptr: enums.as_mut_ptr() as u64,
            count_values: count.count_values,
            count_enum_blobs: count.count_enum_blobs,
            ..Default::default()
        };
        unsafe { sys::mode_getproperty(self.fd(), &mut fetch) }
            .map_err(|e| ioctl_err(e, prop_id))?;

        let name = cstr_name(&fetch.name);
        let flags = fetch.flags;
        let enum_values = || {
            enums
                .iter()
                .take(fetch.count_enum_blobs as usize)
                .map(|e| (e.value, cstr_name(&e.name)))
                .collect::<Vec<_>>()
        };

        let kind = if flags & sys::DRM_MODE_PROP_RANGE != 0 {
            PropertyKind::Range {
                min: values.first().copied().unwrap_or(0),
                max: values.get(1).copied().unwrap_or(u64::MAX),
            }
        } else if flags & sys::DRM_MODE_PROP_ENUM != 0 {
            PropertyKind::Enum {
                values: enum_values(),
            }
        } else if flags & sys::DRM_MODE_PROP_BITMASK != 0 {
            PropertyKind::Bitmask {
                values: enum_values(),
            }
        } else if flags & sys::DRM_MODE_PROP_BLOB != 0 {
            PropertyKind::Blob
        } else {
            match flags & sys::DRM_MODE_PROP_EXTENDED_TYPE {
                sys::DRM_MODE_PROP_OBJECT => PropertyKind::Object,
                sys::DRM_MODE_PROP_SIGNED_RANGE => PropertyKind::SignedRange {
                    min: values.first().copied().unwrap_or(0) as i64,
                    max: values.get(1).copied().unwrap_or(0) as i64,
                },
                _ => PropertyKind::Range {
                    min: 0,
                    max: u64::MAX,
                },
            }
        };

        Ok(PropertyInfo {
            prop_id,
            name,
            kind,
        })
    }

    fn create_blob(&mut self, data: &[u8]) -> Result<RawId> {
        let mut blob = sys::drm_mode_create_blob {
            data: data.as_ptr() as u64,
            length: data.len() as u32,
            blob_id: 0,
        };
        unsafe { sys::mode_createpropblob(self.fd(), &mut blob) }
            .map_err(|e| ioctl_err(e, 0))?;
        Ok(blob.blob_id)
    }

    fn destroy_blob(&mut self, blob_id: RawId) -> Result<()> {
        let mut blob = sys::drm_mode_destroy_blob { blob_id };
        unsafe { sys::mode_destroypropblob(self.fd(), &mut blob) }
            .map_err(|e| ioctl_err(e, blob_id))?;
        Ok(())
    }

    fn blob_data(&mut self, blob_id: RawId) -> Result<Vec<u8>> {
        let mut count = sys::drm_mode_get_blob {
            blob_id,
            ..Default::default()
        };
        unsafe { sys::mode_getpropblob(self.fd(), &mut count) }
            .map_err(|e| ioctl_err(e, blob_id))?;

        let mut data = vec![0u8; count.length as usize];
        let mut fetch = sys::drm_mode_get_blob {
            blob_id,
            length: count.length,
            data: data.as_mut_ptr() as u64,
        };
        unsafe { sys::mode_getpropblob(self.fd(), &mut fetch) }
            .map_err(|e| ioctl_err(e, blob_id))?;
        data.truncate(fetch.length as usize);
        Ok(data)
    }

    fn set_client_cap(&mut self, cap: ClientCap, value: u64) -> Result<()> {
        let cap = sys::drm_set_client_cap {
            capability: cap.kernel_value(),
            value,
        };
        unsafe { sys::set_client_cap(self.fd(), &cap) }.map_err(|e| ioctl_err(e, 0))?;
        Ok(())
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
        let mut crtc = sys::drm_mode_crtc {
            set_connectors_ptr: connectors.as_ptr() as u64,
            count_connectors: connectors.len() as u32,
            crtc_id,
            fb_id,
            x,
            y,
            mode_valid: mode.is_some() as u32,
            mode: mode.map(mode_to_sys).unwrap_or_default(),
            ..Default::default()
        };
        unsafe { sys::mode_setcrtc(self.fd(), &mut crtc) }
            .map_err(|e| ioctl_err(e, crtc_id))?;
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
        let mut req = sys::drm_mode_set_plane {
            plane_id,
            crtc_id,
            fb_id,
            flags: 0,
            crtc_x,
            crtc_y,
            crtc_w,
            crtc_h,
            src_x,
            src_y,
            src_h,
            src_w,
        };
        unsafe { sys::mode_setplane(self.fd(), &mut req) }
            .map_err(|e| ioctl_err(e, plane_id))?;
        Ok(())
    }

    fn set_cursor(&mut self, crtc_id: RawId, bo_handle: u32, w: u32, h: u32) -> Result<()> {
        let mut req = sys::drm_mode_cursor {
            flags: sys::DRM_MODE_CURSOR_BO,
            crtc_id,
            x: 0,
            y: 0,
            width: w,
            height: h,
            handle: bo_handle,
        };
        unsafe { sys::mode_cursor(self.fd(), &mut req) }
            .map_err(|e| ioctl_err(e, crtc_id))?;
        Ok(())
    }

    fn move_cursor(&mut self, crtc_id: RawId, x: i32, y: i32) -> Result<()> {
        let mut req = sys::drm_mode_cursor {
            flags: sys::DRM_MODE_CURSOR_MOVE,
            crtc_id,
            x,
            y,
            ..Default::default()
        };
        unsafe { sys::mode_cursor(self.fd(), &mut req) }
            .map_err(|e| ioctl_err(e, crtc_id))?;
        Ok(())
    }

    fn set_object_property(
        &mut self,
        object: RawId,
        ty: ObjectType,
        prop_id: RawId,
        value: u64,
    ) -> Result<()> {
        let mut req = sys::drm_mode_obj_set_property {
            value,
            prop_id,
            obj_id: object,
            obj_type: ty.kernel_value(),
        };
        unsafe { sys::mode_obj_setproperty(self.fd(), &mut req) }
            .map_err(|e| ioctl_err(e, object))?;
        Ok(())
    }

    fn set_connector_property(
        &mut self,
        connector_id: RawId,
        prop_id: RawId,
        value: u64,
    ) -> Result<()> {
        let mut req = sys::drm_mode_connector_set_property {
            value,
            prop_id,
            connector_id,
        };
        unsafe { sys::mode_setproperty(self.fd(), &mut req) }
            .map_err(|e| ioctl_err(e, connector_id))?;
        Ok(())
    }

    fn atomic_commit(&mut self, req: &AtomicRequest, flags: CommitFlags) -> Result<()> {
        // The wire format wants properties grouped by object: object ids,
        // a per-object property count, then flat prop/value arrays.
        let mut objs: Vec<u32> = Vec::new();
        let mut count_props: Vec<u32> = Vec::new();
        let mut prop_ids: Vec<u32> = Vec::new();
        let mut prop_values: Vec<u64> = Vec::new();

        for &(object, prop, value) in req.props() {
            match objs.iter().position(|&o| o == object) {
                Some(i) if i + 1 == objs.len() => count_props[i] += 1,
                Some(_) => {
                    return Err(KmsError::InvalidArgument(
                        "atomic request interleaves objects".into(),
                    ))
                }
                None => {
                    objs.push(object);
                    count_props.push(1);
                }
            }
            prop_ids.push(prop);
            prop_values.push(value);
        }

        let mut atomic = sys::drm_mode_atomic {
            flags: flags.bits(),
            count_objs: objs.len() as u32,
            objs_ptr: objs.as_ptr() as u64,
            count_props_ptr: count_props.as_ptr() as u64,
            props_ptr: prop_ids.as_ptr() as u64,
            prop_values_ptr: prop_values.as_ptr() as u64,
            reserved: 0,
            user_data: 0,
        };
        unsafe { sys::mode_atomic(self.fd(), &mut atomic) }.map_err(|e| ioctl_err(e, 0))?;
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
        let mut modifiers = [0u64; 4];
        if let Some(m) = modifier {
            for (slot, &handle) in modifiers.iter_mut().zip(handles.iter()) {
                if handle != 0 {
                    *slot = m.0;
                }
            }
        }
        let mut cmd = sys::drm_mode_fb_cmd2 {
            fb_id: 0,
            width,
            height,
            pixel_format: format.0,
            flags: if modifier.is_some() {
                sys::DRM_MODE_FB_MODIFIERS
            } else {
                0
            },
            handles,
            pitches,
            offsets,
            modifier: modifiers,
        };
        unsafe { sys::mode_addfb2(self.fd(), &mut cmd) }.map_err(|e| ioctl_err(e, 0))?;
        Ok(cmd.fb_id)
    }

    fn remove_framebuffer(&mut self, fb_id: u32) -> Result<()> {
        let mut id: libc::c_uint = fb_id;
        unsafe { sys::mode_rmfb(self.fd(), &mut id) }.map_err(|e| ioctl_err(e, fb_id))?;
        Ok(())
    }

    fn create_dumb(&mut self, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer> {
        let mut req = sys::drm_mode_create_dumb {
            width,
            height,
            bpp,
            ..Default::default()
        };
        unsafe { sys::mode_create_dumb(self.fd(), &mut req) }.map_err(|e| ioctl_err(e, 0))?;
        self.sizes.insert(req.handle, req.size as usize);
        Ok(DumbBuffer {
            handle: req.handle,
            pitch: req.pitch,
            size: req.size,
        })
    }

    fn destroy_dumb(&mut self, handle: u32) -> Result<()> {
        if let Some(mapping) = self.mappings.remove(&handle) {
            Self::unmap(&mapping);
        }
        self.sizes.remove(&handle);
        let mut req = sys::drm_mode_destroy_dumb { handle };
        unsafe { sys::mode_destroy_dumb(self.fd(), &mut req) }
            .map_err(|e| ioctl_err(e, handle))?;
        Ok(())
    }

    fn map_dumb(&mut self, handle: u32) -> Result<&mut [u8]> {
        if !self.mappings.contains_key(&handle) {
            let mut req = sys::drm_mode_map_dumb {
                handle,
                ..Default::default()
            };
            unsafe { sys::mode_map_dumb(self.fd(), &mut req) }
                .map_err(|e| ioctl_err(e, handle))?;

            // The mapping length comes from the buffer's size; the kernel
            // tracks it per handle, so re-query through a create-sized
            // mmap is not possible. Use the page-rounded offset mapping.
            let len = self.dumb_size(handle)?;
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    self.fd(),
                    req.offset as libc::off_t,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(KmsError::Io(format!(
                    "mmap of dumb buffer {handle} failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
            self.mappings.insert(handle, Mapping { ptr, len });
        }

        let mapping = &self.mappings[&handle];
        Ok(unsafe { std::slice::from_raw_parts_mut(mapping.ptr as *mut u8, mapping.len) })
    }

    fn wait_vblank(&mut self, pipe_index: u32, count: u32) -> Result<u64> {
        let pipe_flag = match pipe_index {
            0 => 0,
            1 => sys::DRM_VBLANK_SECONDARY,
            n => (n << sys::DRM_VBLANK_HIGH_CRTC_SHIFT) & sys::DRM_VBLANK_HIGH_CRTC_MASK,
        };
        let mut vbl = sys::drm_wait_vblank {
            request: sys::drm_wait_vblank_request {
                type_: sys::DRM_VBLANK_RELATIVE | pipe_flag,
                sequence: count,
                signal: 0,
            },
        };
        unsafe { sys::wait_vblank(self.fd(), &mut vbl) }.map_err(|e| ioctl_err(e, pipe_index))?;
        Ok(unsafe { vbl.reply.sequence } as u64)
    }
}

impl DrmDevice {
    fn dumb_size(&self, handle: u32) -> Result<usize> {
        self.sizes
            .get(&handle)
            .copied()
            .ok_or(KmsError::NoSuchObject(handle))
    }
}
