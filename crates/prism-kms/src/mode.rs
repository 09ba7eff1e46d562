//! Display timing modes, mirroring the kernel's `drm_mode_modeinfo`.

bitflags::bitflags! {
    /// Sync/scan flags, kernel `DRM_MODE_FLAG_*` values.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ModeFlags: u32 {
        const PHSYNC = 1 << 0;
        const NHSYNC = 1 << 1;
        const PVSYNC = 1 << 2;
        const NVSYNC = 1 << 3;
        const INTERLACE = 1 << 4;
        const DBLSCAN = 1 << 5;
        const CSYNC = 1 << 6;
        const PCSYNC = 1 << 7;
        const NCSYNC = 1 << 8;
        const HSKEW = 1 << 9;
        const DBLCLK = 1 << 12;
        const CLKDIV2 = 1 << 13;
    }
}

bitflags::bitflags! {
    /// Mode origin/selection flags, kernel `DRM_MODE_TYPE_*` values.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ModeType: u32 {
        const PREFERRED = 1 << 3;
        const USERDEF = 1 << 5;
        const DRIVER = 1 << 6;
    }
}

/// Byte size of the kernel's wire struct, and therefore of every MODE_ID
/// property blob.
pub const MODE_BLOB_SIZE: usize = 68;
const MODE_NAME_LEN: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayMode {
    pub clock_khz: u32,
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
    /// Nominal refresh as reported by the driver; may be zero, in which
    /// case [`DisplayMode::calculated_vrefresh`] is the value to trust.
    pub vrefresh: u32,
    pub flags: ModeFlags,
    pub mode_type: ModeType,
    pub name: String,
}

impl DisplayMode {
    /// Refresh rate derived from the pixel clock and totals, in Hz.
    pub fn calculated_vrefresh(&self) -> f64 {
        let denom = self.htotal as f64 * self.vtotal as f64;
        if denom == 0.0 {
            return 0.0;
        }
        let mut refresh = self.clock_khz as f64 * 1000.0 / denom;
        if self.flags.contains(ModeFlags::INTERLACE) {
            refresh *= 2.0;
        }
        if self.flags.contains(ModeFlags::DBLSCAN) {
            refresh /= 2.0;
        }
        if self.vscan > 1 {
            refresh /= self.vscan as f64;
        }
        refresh
    }

    pub fn is_preferred(&self) -> bool {
        self.mode_type.contains(ModeType::PREFERRED)
    }

    /// The VESA 1024x768@60 fallback mode used when a connector offers no
    /// mode of its own.
    pub fn std_1024_mode() -> DisplayMode {
        DisplayMode {
            clock_khz: 65000,
            hdisplay: 1024,
            hsync_start: 1048,
            hsync_end: 1184,
            htotal: 1344,
            hskew: 0,
            vdisplay: 768,
            vsync_start: 771,
            vsync_end: 777,
            vtotal: 806,
            vscan: 0,
            vrefresh: 60,
            flags: ModeFlags::NHSYNC | ModeFlags::NVSYNC,
            mode_type: ModeType::DRIVER,
            name: "1024x768".into(),
        }
    }

    /// Serializes into the kernel wire layout, for MODE_ID property blobs.
    pub fn to_blob_bytes(&self) -> [u8; MODE_BLOB_SIZE] {
        let mut out = [0u8; MODE_BLOB_SIZE];
        out[0..4].copy_from_slice(&self.clock_khz.to_le_bytes());
        let shorts = [
            self.hdisplay,
            self.hsync_start,
            self.hsync_end,
            self.htotal,
            self.hskew,
            self.vdisplay,
            self.vsync_start,
            self.vsync_end,
            self.vtotal,
            self.vscan,
        ];
        for (i, s) in shorts.iter().enumerate() {
            out[4 + i * 2..6 + i * 2].copy_from_slice(&s.to_le_bytes());
        }
        out[24..28].copy_from_slice(&self.vrefresh.to_le_bytes());
        out[28..32].copy_from_slice(&self.flags.bits().to_le_bytes());
        out[32..36].copy_from_slice(&self.mode_type.bits().to_le_bytes());
        let name = self.name.as_bytes();
        let n = name.len().min(MODE_NAME_LEN - 1);
        out[36..36 + n].copy_from_slice(&name[..n]);
        out
    }

    /// Parses the kernel wire layout. Fails on short buffers; unknown flag
    /// bits are dropped.
    pub fn from_blob_bytes(data: &[u8]) -> Option<DisplayMode> {
        if data.len() < MODE_BLOB_SIZE {
            return None;
        }
        let u32_at = |o: usize| u32::from_le_bytes(data[o..o + 4].try_into().unwrap());
        let u16_at = |o: usize| u16::from_le_bytes(data[o..o + 2].try_into().unwrap());
        let name_end = data[36..MODE_BLOB_SIZE]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MODE_NAME_LEN);
        Some(DisplayMode {
            clock_khz: u32_at(0),
            hdisplay: u16_at(4),
            hsync_start: u16_at(6),
            hsync_end: u16_at(8),
            htotal: u16_at(10),
            hskew: u16_at(12),
            vdisplay: u16_at(14),
            vsync_start: u16_at(16),
            vsync_end: u16_at(18),
            vtotal: u16_at(20),
            vscan: u16_at(22),
            vrefresh: u32_at(24),
            flags: ModeFlags::from_bits_truncate(u32_at(28)),
            mode_type: ModeType::from_bits_truncate(u32_at(32)),
            name: String::from_utf8_lossy(&data[36..36 + name_end]).into_owned(),
        })
    }
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}@{:.2}Hz ({} kHz)",
            self.hdisplay,
            self.vdisplay,
            self.calculated_vrefresh(),
            self.clock_khz
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_mode_timings_are_xga() {
        let m = DisplayMode::std_1024_mode();
        assert_eq!((m.hdisplay, m.vdisplay), (1024, 768));
        assert_eq!(m.htotal, 1344);
        assert_eq!(m.vtotal, 806);
        let refresh = m.calculated_vrefresh();
        assert!((refresh - 60.0).abs() < 0.1, "got {refresh}");
    }

    #[test]
    fn blob_round_trip() {
        let m = DisplayMode::std_1024_mode();
        let bytes = m.to_blob_bytes();
        assert_eq!(bytes.len(), MODE_BLOB_SIZE);
        let back = DisplayMode::from_blob_bytes(&bytes).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn blob_rejects_short_input() {
        assert!(DisplayMode::from_blob_bytes(&[0u8; 10]).is_none());
    }

    #[test]
    fn long_names_are_truncated_not_rejected() {
        let mut m = DisplayMode::std_1024_mode();
        m.name = "x".repeat(64);
        let back = DisplayMode::from_blob_bytes(&m.to_blob_bytes()).unwrap();
        assert_eq!(back.name.len(), MODE_NAME_LEN - 1);
    }

    #[test]
    fn interlace_doubles_refresh() {
        let mut m = DisplayMode::std_1024_mode();
        m.flags |= ModeFlags::INTERLACE;
        assert!((m.calculated_vrefresh() - 120.0).abs() < 0.2);
    }
}
