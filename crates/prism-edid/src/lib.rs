//! EDID base-block synthesis for virtual connectors.
//!
//! Test topologies need plausible display identification data: a valid
//! header, a detailed timing descriptor matching the mode the connector
//! reports, a monitor name, and a correct checksum. Two canned blocks are
//! provided ([`base_edid`] and [`alt_edid`], distinguishable by product
//! code and name) plus a builder for arbitrary modes.

use prism_kms::{DisplayMode, ModeFlags};

pub const EDID_BLOCK_SIZE: usize = 128;

const HEADER: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];

/// Packs a three-letter PNP manufacturer id.
fn manufacturer_id(letters: [u8; 3]) -> [u8; 2] {
    let code = |c: u8| ((c - b'A' + 1) as u16) & 0x1f;
    let packed = (code(letters[0]) << 10) | (code(letters[1]) << 5) | code(letters[2]);
    packed.to_be_bytes()
}

/// Encodes one 18-byte detailed timing descriptor.
pub fn detailed_timing(mode: &DisplayMode, h_size_mm: u16, v_size_mm: u16) -> [u8; 18] {
    let mut d = [0u8; 18];

    let clock = mode.clock_khz / 10;
    d[0..2].copy_from_slice(&(clock as u16).to_le_bytes());

    let hactive = mode.hdisplay as u32;
    let hblank = (mode.htotal - mode.hdisplay) as u32;
    d[2] = hactive as u8;
    d[3] = hblank as u8;
    d[4] = (((hactive >> 8) as u8) << 4) | ((hblank >> 8) as u8);

    let vactive = mode.vdisplay as u32;
    let vblank = (mode.vtotal - mode.vdisplay) as u32;
    d[5] = vactive as u8;
    d[6] = vblank as u8;
    d[7] = (((vactive >> 8) as u8) << 4) | ((vblank >> 8) as u8);

    let hso = (mode.hsync_start - mode.hdisplay) as u32;
    let hsw = (mode.hsync_end - mode.hsync_start) as u32;
    let vso = (mode.vsync_start - mode.vdisplay) as u32;
    let vsw = (mode.vsync_end - mode.vsync_start) as u32;
    d[8] = hso as u8;
    d[9] = hsw as u8;
    d[10] = (((vso & 0xf) as u8) << 4) | (vsw & 0xf) as u8;
    d[11] = (((hso >> 8) as u8) << 6)
        | (((hsw >> 8) as u8) << 4)
        | (((vso >> 4) as u8) << 2)
        | ((vsw >> 4) as u8);

    d[12] = h_size_mm as u8;
    d[13] = v_size_mm as u8;
    d[14] = (((h_size_mm >> 8) as u8) << 4) | ((v_size_mm >> 8) as u8);

    // Digital separate sync plus the polarity bits.
    let mut flags = 0x18u8;
    if mode.flags.contains(ModeFlags::PHSYNC) {
        flags |= 1 << 1;
    }
    if mode.flags.contains(ModeFlags::PVSYNC) {
        flags |= 1 << 2;
    }
    d[17] = flags;

    d
}

fn name_descriptor(name: &str) -> [u8; 18] {
    let mut d = [0u8; 18];
    d[3] = 0xFC; // monitor name tag
    let bytes = name.as_bytes();
    let n = bytes.len().min(13);
    d[5..5 + n].copy_from_slice(&bytes[..n]);
    if n < 13 {
        d[5 + n] = 0x0A;
        for slot in d.iter_mut().skip(5 + n + 1) {
            *slot = 0x20;
        }
    }
    d
}

fn dummy_descriptor() -> [u8; 18] {
    let mut d = [0u8; 18];
    d[3] = 0x10;
    d
}

/// Builds a complete, checksummed base block advertising `mode` as the
/// preferred timing.
pub fn build_edid(mode: &DisplayMode, product_code: u16, serial: u32, name: &str) -> [u8; EDID_BLOCK_SIZE] {
    let mut e = [0u8; EDID_BLOCK_SIZE];
    e[0..8].copy_from_slice(&HEADER);
    e[8..10].copy_from_slice(&manufacturer_id(*b"PRS"));
    e[10..12].copy_from_slice(&product_code.to_le_bytes());
    e[12..16].copy_from_slice(&serial.to_le_bytes());
    e[16] = 1; // week
    e[17] = 30; // 2020
    e[18] = 1; // EDID 1.4
    e[19] = 4;
    e[20] = 0x80; // digital input
    e[21] = 34; // image size, cm
    e[22] = 27;
    e[23] = 120; // gamma 2.2
    e[24] = 0x0A; // features: preferred timing is native, RGB
    // Canned sRGB-ish chromaticity coordinates.
    e[25..35].copy_from_slice(&[0x78, 0xEA, 0xA1, 0x54, 0x4C, 0x99, 0x26, 0x0F, 0x50, 0x54]);
    // Established timings: 640x480@60 and 800x600@60.
    e[35] = 0x21;
    e[36] = 0x08;
    // Standard timings unused.
    for slot in e[38..54].iter_mut() {
        *slot = 0x01;
    }

    e[54..72].copy_from_slice(&detailed_timing(mode, 340, 270));
    e[72..90].copy_from_slice(&name_descriptor(name));
    e[90..108].copy_from_slice(&dummy_descriptor());
    e[108..126].copy_from_slice(&dummy_descriptor());
    e[126] = 0; // no extension blocks

    let sum: u8 = e[..127].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    e[127] = sum.wrapping_neg();
    e
}

/// The default virtual-monitor EDID: 1024x768@60 preferred.
pub fn base_edid() -> [u8; EDID_BLOCK_SIZE] {
    build_edid(&DisplayMode::std_1024_mode(), 0x0101, 1, "PRISM A")
}

/// A second monitor identity, distinguishable from [`base_edid`] by
/// product code, serial and name.
pub fn alt_edid() -> [u8; EDID_BLOCK_SIZE] {
    build_edid(&DisplayMode::std_1024_mode(), 0x0202, 2, "PRISM B")
}

/// Block accessor shaped like a sink's DDC read: block 0 is the base
/// block; the generated EDIDs advertise no extensions, so every other
/// index is absent.
pub fn read_edid(block: usize) -> Option<[u8; EDID_BLOCK_SIZE]> {
    match block {
        0 => Some(base_edid()),
        _ => None,
    }
}
