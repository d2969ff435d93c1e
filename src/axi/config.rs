//! AXI4 interface configuration.
//!
//! An [`AxiConfig`] decides which optional signals exist and how wide each
//! field is. Disabled signals have width 0 and vanish from the wire.
//!
//! | preset         | data | id | burst | last | wstrb | B channel |
//! |----------------|------|----|-------|------|-------|-----------|
//! | `standard`     | 64   | 4  | 256   | yes  | yes   | yes       |
//! | `no_wresp`     | 64   | 4  | 256   | yes  | yes   | no        |
//! | `no_wstrb`     | 64   | 4  | 256   | yes  | no    | yes       |
//! | `lite`         | 32   | 0  | 1     | no   | yes   | yes       |
//! | `lite_nowstrb` | 32   | 0  | 1     | no   | no    | yes       |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bits::log2_ceil;

/// Invalid AXI configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AxiConfigError {
    #[error("data width must be non-zero")]
    ZeroDataWidth,

    #[error("data width {0} exceeds 64 bits")]
    DataTooWide(u32),

    #[error("data width {0} is not a whole number of bytes (write strobes enabled)")]
    DataNotBytes(u32),

    #[error("address width {0} must be between 1 and 64")]
    BadAddrWidth(u32),

    #[error("id width {0} exceeds 16 bits")]
    IdTooWide(u32),

    #[error("max burst size {0} must be between 1 and 256")]
    BadBurstSize(u32),

    #[error("unknown AXI preset '{0}'")]
    UnknownPreset(String),
}

/// Signal set and field widths of an AXI4 interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxiConfig {
    pub data_width: u32,
    pub addr_width: u32,
    pub id_width: u32,
    pub use_variable_beat_size: bool,
    pub use_misaligned_addresses: bool,
    pub use_last: bool,
    pub use_write_strobes: bool,
    pub use_burst: bool,
    pub use_fixed_burst: bool,
    pub use_wrap_burst: bool,
    /// Maximum beats per burst.
    pub max_burst_size: u32,
    pub use_qos: bool,
    pub use_lock: bool,
    pub use_prot: bool,
    pub use_cache: bool,
    pub use_region: bool,
    pub use_write_responses: bool,
    pub a_user_width: u32,
    pub w_user_width: u32,
    pub b_user_width: u32,
    pub r_user_width: u32,
}

impl Default for AxiConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl AxiConfig {
    pub const PRESETS: [&'static str; 5] = ["standard", "no_wresp", "no_wstrb", "lite", "lite_nowstrb"];

    /// Full AXI4 with bursts, strobes and write responses.
    pub fn standard() -> Self {
        Self {
            data_width: 64,
            addr_width: 32,
            id_width: 4,
            use_variable_beat_size: false,
            use_misaligned_addresses: false,
            use_last: true,
            use_write_strobes: true,
            use_burst: true,
            use_fixed_burst: false,
            use_wrap_burst: false,
            max_burst_size: 256,
            use_qos: false,
            use_lock: false,
            use_prot: false,
            use_cache: false,
            use_region: false,
            use_write_responses: true,
            a_user_width: 0,
            w_user_width: 0,
            b_user_width: 0,
            r_user_width: 0,
        }
    }

    pub fn no_wresp() -> Self {
        Self {
            use_write_responses: false,
            ..Self::standard()
        }
    }

    pub fn no_wstrb() -> Self {
        Self {
            use_write_strobes: false,
            ..Self::standard()
        }
    }

    /// AXI4-Lite: single beats, no ids, no last.
    pub fn lite() -> Self {
        Self {
            data_width: 32,
            id_width: 0,
            use_last: false,
            use_burst: false,
            max_burst_size: 1,
            ..Self::standard()
        }
    }

    pub fn lite_nowstrb() -> Self {
        Self {
            use_write_strobes: false,
            ..Self::lite()
        }
    }

    /// Look a preset up by name.
    pub fn preset(name: &str) -> Result<Self, AxiConfigError> {
        match name {
            "standard" => Ok(Self::standard()),
            "no_wresp" => Ok(Self::no_wresp()),
            "no_wstrb" => Ok(Self::no_wstrb()),
            "lite" => Ok(Self::lite()),
            "lite_nowstrb" => Ok(Self::lite_nowstrb()),
            other => Err(AxiConfigError::UnknownPreset(other.to_string())),
        }
    }

    pub fn validate(&self) -> Result<(), AxiConfigError> {
        if self.data_width == 0 {
            return Err(AxiConfigError::ZeroDataWidth);
        }
        if self.data_width > 64 {
            return Err(AxiConfigError::DataTooWide(self.data_width));
        }
        if self.use_write_strobes && self.data_width % 8 != 0 {
            return Err(AxiConfigError::DataNotBytes(self.data_width));
        }
        if self.addr_width == 0 || self.addr_width > 64 {
            return Err(AxiConfigError::BadAddrWidth(self.addr_width));
        }
        if self.id_width > 16 {
            return Err(AxiConfigError::IdTooWide(self.id_width));
        }
        if self.max_burst_size == 0 || self.max_burst_size > 256 {
            return Err(AxiConfigError::BadBurstSize(self.max_burst_size));
        }
        Ok(())
    }

    pub fn bid_width(&self) -> u32 {
        if self.use_write_responses {
            self.id_width
        } else {
            0
        }
    }

    pub fn alen_width(&self) -> u32 {
        if self.use_burst {
            log2_ceil(self.max_burst_size as usize)
        } else {
            0
        }
    }

    pub fn asize_width(&self) -> u32 {
        if self.use_variable_beat_size {
            3
        } else {
            0
        }
    }

    pub fn last_width(&self) -> u32 {
        self.use_last as u32
    }

    pub fn cache_width(&self) -> u32 {
        if self.use_cache {
            4
        } else {
            0
        }
    }

    pub fn burst_width(&self) -> u32 {
        if self.use_burst && (self.use_fixed_burst || self.use_wrap_burst) {
            2
        } else {
            0
        }
    }

    pub fn wstrb_width(&self) -> u32 {
        if self.use_write_strobes {
            self.data_width / 8
        } else {
            0
        }
    }

    pub fn resp_width(&self) -> u32 {
        2
    }

    pub fn buser_width(&self) -> u32 {
        if self.use_write_responses {
            self.b_user_width
        } else {
            0
        }
    }

    /// Bytes per data beat.
    pub fn bytes_per_beat(&self) -> u64 {
        (self.data_width as u64).div_ceil(8)
    }

    /// Distinct transaction ids.
    pub fn num_ids(&self) -> usize {
        1usize << self.id_width
    }

    /// Largest encodable `len` (beats minus one).
    pub fn max_len(&self) -> u32 {
        if self.use_burst {
            self.max_burst_size - 1
        } else {
            0
        }
    }

    /// Strobe with every byte lane enabled.
    pub fn full_strobe(&self) -> u64 {
        let w = self.wstrb_width();
        if w >= 64 {
            u64::MAX
        } else {
            (1u64 << w) - 1
        }
    }
}
