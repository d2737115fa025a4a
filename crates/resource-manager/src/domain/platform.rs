//! DSP platform identification and operating-point selection.

use std::fmt;

/// Supported OMAP variants, identified from the DSP maximum frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Omap3420,
    Omap3430,
    Omap3440,
    Omap3630,
}

impl Platform {
    pub fn from_max_frequency(mhz: u32) -> Option<Self> {
        match mhz {
            360 => Some(Self::Omap3420),
            430 => Some(Self::Omap3430),
            520 => Some(Self::Omap3440),
            800 => Some(Self::Omap3630),
            _ => None,
        }
    }

    /// DSP frequency in MHz of each operating point, OPP1 first.
    pub fn opp_table(self) -> &'static [u32] {
        match self {
            Self::Omap3420 => &[90, 180, 360, 360, 360],
            Self::Omap3430 => &[90, 180, 360, 430, 430],
            Self::Omap3440 => &[90, 180, 360, 430, 430, 520],
            Self::Omap3630 => &[260, 520, 660, 800],
        }
    }

    /// Lowest operating point multimedia loads may run at, 0-based.
    ///
    /// Only the OMAP3630 runs the DSP fast enough at OPP1.
    fn lowest_usable_point(self) -> usize {
        match self {
            Self::Omap3630 => 0,
            Self::Omap3420 | Self::Omap3430 | Self::Omap3440 => 1,
        }
    }

    /// 1-based operating point able to sustain `total_mhz`.
    ///
    /// Zero clears the constraint (OPP1). Any other load selects the lowest
    /// usable point covering it, saturating at the highest point.
    pub fn operating_point_for(self, total_mhz: u32) -> u8 {
        if total_mhz == 0 {
            return 1;
        }
        let table = self.opp_table();
        let index = table
            .iter()
            .enumerate()
            .skip(self.lowest_usable_point())
            .find(|(_, &mhz)| mhz >= total_mhz)
            .map_or(table.len() - 1, |(index, _)| index);
        (index + 1) as u8
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Omap3420 => "OMAP3420",
            Self::Omap3430 => "OMAP3430",
            Self::Omap3440 => "OMAP3440",
            Self::Omap3630 => "OMAP3630",
        };
        f.write_str(name)
    }
}

/// Receives the committed cycle total whenever it changes.
pub trait ConstraintSink: Send + Sync {
    fn apply(&self, total_mhz: u32);
}

/// Sink used when no platform constraint can be applied.
#[derive(Debug, Default)]
pub struct NoConstraint;

impl ConstraintSink for NoConstraint {
    fn apply(&self, total_mhz: u32) {
        tracing::trace!(total_mhz, "no performance constraint on this platform");
    }
}
