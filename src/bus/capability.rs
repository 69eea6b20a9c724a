//! Host capability mask.

use bitflags::bitflags;

/// Environment variable the host sets before launching the client.
pub const CAPABILITIES_ENV: &str = "VOXBRIDGE_HOST_CAPS";

bitflags! {
    /// Which privileged host, if any, runs this process.
    ///
    /// Written once by the host before startup; treat as immutable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u32 {
        const MACOS   = 1 << 2;
        const WINDOWS = 1 << 3;
        const MOBILE  = 1 << 4;
    }
}

impl Capabilities {
    /// Interpret a raw mask. Bits outside the defined flags are ignored.
    pub fn from_mask(mask: u32) -> Self {
        Self::from_bits_truncate(mask)
    }

    /// Read the mask from `VOXBRIDGE_HOST_CAPS`. Missing or unparsable
    /// values mean "no host".
    pub fn from_env() -> Self {
        match std::env::var(CAPABILITIES_ENV) {
            Ok(raw) => match parse_mask(&raw) {
                Some(mask) => Self::from_mask(mask),
                None => {
                    log::warn!("Ignoring invalid {}={:?}", CAPABILITIES_ENV, raw);
                    Self::empty()
                }
            },
            Err(_) => Self::empty(),
        }
    }

    pub fn is_host(&self) -> bool {
        self.intersects(Self::MACOS | Self::WINDOWS | Self::MOBILE)
    }

    pub fn is_host_macos(&self) -> bool {
        self.contains(Self::MACOS)
    }

    pub fn is_host_windows(&self) -> bool {
        self.contains(Self::WINDOWS)
    }

    pub fn is_host_mobile(&self) -> bool {
        self.contains(Self::MOBILE)
    }
}

/// Parse a decimal, `0x` hex or `0b` binary mask.
pub fn parse_mask(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    if let Some(bin) = raw.strip_prefix("0b").or_else(|| raw.strip_prefix("0B")) {
        return u32::from_str_radix(bin, 2).ok();
    }
    raw.parse().ok()
}
