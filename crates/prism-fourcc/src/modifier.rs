use std::fmt;

/// A DRM framebuffer modifier: an opaque 64-bit layout/tiling code with the
/// vendor id in the top byte.
///
/// Broadcom SAND modifiers additionally carry a column-height parameter in
/// bits 8..56; [`Modifier::base`] strips it so SAND modifiers of different
/// heights compare equal at the layout level.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Modifier(pub u64);

const VENDOR_SHIFT: u32 = 56;
const BROADCOM_PARAM_SHIFT: u32 = 8;
const BROADCOM_PARAM_BITS: u32 = 48;
const BROADCOM_PARAM_MASK: u64 = ((1u64 << BROADCOM_PARAM_BITS) - 1) << BROADCOM_PARAM_SHIFT;

const fn mod_code(vendor: u64, val: u64) -> u64 {
    (vendor << VENDOR_SHIFT) | (val & ((1u64 << VENDOR_SHIFT) - 1))
}

impl Modifier {
    pub const VENDOR_NONE: u64 = 0;
    pub const VENDOR_INTEL: u64 = 0x01;
    pub const VENDOR_BROADCOM: u64 = 0x07;

    pub const LINEAR: Modifier = Modifier(0);

    pub const I915_X_TILED: Modifier = Modifier(mod_code(Self::VENDOR_INTEL, 1));
    pub const I915_Y_TILED: Modifier = Modifier(mod_code(Self::VENDOR_INTEL, 2));
    pub const I915_YF_TILED: Modifier = Modifier(mod_code(Self::VENDOR_INTEL, 3));
    pub const I915_Y_TILED_CCS: Modifier = Modifier(mod_code(Self::VENDOR_INTEL, 4));
    pub const I915_YF_TILED_CCS: Modifier = Modifier(mod_code(Self::VENDOR_INTEL, 5));

    pub const BROADCOM_VC4_T_TILED: Modifier = Modifier(mod_code(Self::VENDOR_BROADCOM, 1));
    /// SAND base codes with a zero column height; the parameterized
    /// constructors below are what real framebuffers use.
    pub const BROADCOM_SAND32: Modifier = Modifier(mod_code(Self::VENDOR_BROADCOM, 2));
    pub const BROADCOM_SAND64: Modifier = Modifier(mod_code(Self::VENDOR_BROADCOM, 3));
    pub const BROADCOM_SAND128: Modifier = Modifier(mod_code(Self::VENDOR_BROADCOM, 4));
    pub const BROADCOM_SAND256: Modifier = Modifier(mod_code(Self::VENDOR_BROADCOM, 5));

    const fn broadcom_sand(val: u64, column_height: u64) -> Modifier {
        // column_height must fit the 48-bit parameter field.
        Modifier(mod_code(
            Self::VENDOR_BROADCOM,
            (column_height << BROADCOM_PARAM_SHIFT) | val,
        ))
    }

    pub const fn sand32_col_height(column_height: u64) -> Modifier {
        Self::broadcom_sand(2, column_height)
    }

    pub const fn sand64_col_height(column_height: u64) -> Modifier {
        Self::broadcom_sand(3, column_height)
    }

    pub const fn sand128_col_height(column_height: u64) -> Modifier {
        Self::broadcom_sand(4, column_height)
    }

    pub const fn sand256_col_height(column_height: u64) -> Modifier {
        Self::broadcom_sand(5, column_height)
    }

    pub const fn vendor(self) -> u64 {
        self.0 >> VENDOR_SHIFT
    }

    /// The modifier with any Broadcom parameter field cleared.
    pub const fn base(self) -> Modifier {
        if self.vendor() == Self::VENDOR_BROADCOM {
            Modifier(self.0 & !BROADCOM_PARAM_MASK)
        } else {
            self
        }
    }

    /// The Broadcom parameter field (SAND column height), zero elsewhere.
    pub const fn broadcom_param(self) -> u64 {
        if self.vendor() == Self::VENDOR_BROADCOM {
            (self.0 & BROADCOM_PARAM_MASK) >> BROADCOM_PARAM_SHIFT
        } else {
            0
        }
    }

    pub fn is_sand(self) -> bool {
        matches!(
            self.base(),
            Modifier::BROADCOM_SAND32
                | Modifier::BROADCOM_SAND64
                | Modifier::BROADCOM_SAND128
                | Modifier::BROADCOM_SAND256
        )
    }

    pub fn is_intel_ccs(self) -> bool {
        self == Modifier::I915_Y_TILED_CCS || self == Modifier::I915_YF_TILED_CCS
    }
}

impl fmt::Debug for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.base() {
            Modifier::LINEAR => "LINEAR",
            Modifier::I915_X_TILED => "I915_X_TILED",
            Modifier::I915_Y_TILED => "I915_Y_TILED",
            Modifier::I915_YF_TILED => "I915_YF_TILED",
            Modifier::I915_Y_TILED_CCS => "I915_Y_TILED_CCS",
            Modifier::I915_YF_TILED_CCS => "I915_YF_TILED_CCS",
            Modifier::BROADCOM_VC4_T_TILED => "BROADCOM_VC4_T_TILED",
            Modifier::BROADCOM_SAND32 => "BROADCOM_SAND32",
            Modifier::BROADCOM_SAND64 => "BROADCOM_SAND64",
            Modifier::BROADCOM_SAND128 => "BROADCOM_SAND128",
            Modifier::BROADCOM_SAND256 => "BROADCOM_SAND256",
            _ => return write!(f, "Modifier({:#018x})", self.0),
        };
        if self.broadcom_param() != 0 {
            write!(f, "Modifier({name}, col_height={})", self.broadcom_param())
        } else {
            write!(f, "Modifier({name})")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_namespacing() {
        assert_eq!(Modifier::LINEAR.vendor(), Modifier::VENDOR_NONE);
        assert_eq!(Modifier::I915_X_TILED.0, 0x0100_0000_0000_0001);
        assert_eq!(Modifier::BROADCOM_VC4_T_TILED.vendor(), Modifier::VENDOR_BROADCOM);
    }

    #[test]
    fn sand_parameter_round_trips() {
        let m = Modifier::sand128_col_height(48);
        assert_eq!(m.base(), Modifier::BROADCOM_SAND128);
        assert_eq!(m.broadcom_param(), 48);
        assert!(m.is_sand());
        assert_ne!(m, Modifier::BROADCOM_SAND128);
    }

    #[test]
    fn non_broadcom_modifiers_have_no_param() {
        assert_eq!(Modifier::I915_Y_TILED.broadcom_param(), 0);
        assert_eq!(Modifier::I915_Y_TILED.base(), Modifier::I915_Y_TILED);
        assert!(!Modifier::I915_Y_TILED.is_sand());
        assert!(Modifier::I915_YF_TILED_CCS.is_intel_ccs());
    }
}
