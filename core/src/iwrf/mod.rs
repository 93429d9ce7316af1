pub mod codec;
pub mod header;
pub mod pulse;
pub mod sequence;
pub mod sigmet;

pub use codec::CodecContext;
pub use header::PulseHeader;
pub use pulse::{Pulse, SharedPulse};
pub use sequence::{GapEvent, SequenceStatus, SequenceTracker};
pub use sigmet::SigmetVariant;

use serde::{Deserialize, Serialize};

/// Maximum number of receiver channels in a pulse.
pub const MAX_CHAN: usize = 4;

/// Maximum number of trips tracked for burst-phase bookkeeping.
pub const MAX_TRIPS: usize = 4;

/// Missing value for floating point metadata and out-of-range IQ lookups.
pub const MISSING_FLOAT: f32 = -9999.0;
pub const MISSING_DOUBLE: f64 = -9999.0;

pub const SYNC_ID: i32 = 0x7777_0001;
pub const PULSE_HEADER_ID: i32 = 0x7777_000c;
pub const RVP8_PULSE_HEADER_ID: i32 = 0x7777_0071;
pub const PLATFORM_GEOREF_ID: i32 = 0x7777_0111;

/// All valid packet ids lie in `[SYNC_ID, SYNC_ID + PACKET_ID_SPAN)`.
pub const PACKET_ID_SPAN: i32 = 1000;

/// Length of the common packet prefix (id + len_bytes).
pub const PACKET_PREFIX_LEN: usize = 8;

/// Length of the packet info block shared by all packet types.
pub const PACKET_INFO_LEN: usize = 56;

pub fn is_valid_packet_id(id: i32) -> bool {
    (SYNC_ID..SYNC_ID + PACKET_ID_SPAN).contains(&id)
}

/// Returns `Some(swapped)` if the raw id word is a valid packet id in
/// either byte order, `None` otherwise.
pub fn packet_id_order(raw: [u8; 4]) -> Option<bool> {
    if is_valid_packet_id(i32::from_le_bytes(raw)) {
        Some(false)
    } else if is_valid_packet_id(i32::from_be_bytes(raw)) {
        Some(true)
    } else {
        None
    }
}

/// How the IQ payload following a pulse header is packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IqEncoding {
    Fl32,
    ScaledSi16,
    DbmPhaseSi16,
    SigmetFl16,
    ScaledSi32,
}

impl IqEncoding {
    pub fn from_wire(code: i32) -> Option<Self> {
        match code {
            1 => Some(IqEncoding::Fl32),
            2 => Some(IqEncoding::ScaledSi16),
            3 => Some(IqEncoding::DbmPhaseSi16),
            4 => Some(IqEncoding::SigmetFl16),
            5 => Some(IqEncoding::ScaledSi32),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            IqEncoding::Fl32 => 1,
            IqEncoding::ScaledSi16 => 2,
            IqEncoding::DbmPhaseSi16 => 3,
            IqEncoding::SigmetFl16 => 4,
            IqEncoding::ScaledSi32 => 5,
        }
    }

    /// Bytes used by one I or Q value on the wire.
    pub fn bytes_per_value(self) -> usize {
        match self {
            IqEncoding::Fl32 | IqEncoding::ScaledSi32 => 4,
            IqEncoding::ScaledSi16 | IqEncoding::DbmPhaseSi16 | IqEncoding::SigmetFl16 => 2,
        }
    }

    /// True for the 16-bit encodings that can be held in packed form.
    pub fn is_packed16(self) -> bool {
        self.bytes_per_value() == 2
    }
}

/// Antenna scan mode codes carried in the pulse header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    NotSet,
    Sector,
    Coplane,
    Rhi,
    VerticalPointing,
    Idle,
    AzSur360,
    ElSur360,
    Sunscan,
    Pointing,
    FollowVehicle,
    ElSurv,
    ManPpi,
    ManRhi,
    SunscanRhi,
    Other(i32),
}

impl ScanMode {
    pub fn from_wire(code: i32) -> Self {
        match code {
            0 => ScanMode::NotSet,
            1 => ScanMode::Sector,
            2 => ScanMode::Coplane,
            3 => ScanMode::Rhi,
            4 => ScanMode::VerticalPointing,
            7 => ScanMode::Idle,
            8 => ScanMode::AzSur360,
            9 => ScanMode::ElSur360,
            11 => ScanMode::Sunscan,
            12 => ScanMode::Pointing,
            13 => ScanMode::FollowVehicle,
            14 => ScanMode::ElSurv,
            15 => ScanMode::ManPpi,
            16 => ScanMode::ManRhi,
            17 => ScanMode::SunscanRhi,
            other => ScanMode::Other(other),
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            ScanMode::NotSet => 0,
            ScanMode::Sector => 1,
            ScanMode::Coplane => 2,
            ScanMode::Rhi => 3,
            ScanMode::VerticalPointing => 4,
            ScanMode::Idle => 7,
            ScanMode::AzSur360 => 8,
            ScanMode::ElSur360 => 9,
            ScanMode::Sunscan => 11,
            ScanMode::Pointing => 12,
            ScanMode::FollowVehicle => 13,
            ScanMode::ElSurv => 14,
            ScanMode::ManPpi => 15,
            ScanMode::ManRhi => 16,
            ScanMode::SunscanRhi => 17,
            ScanMode::Other(code) => code,
        }
    }

    /// Scans whose fixed angle is an azimuth rather than an elevation.
    pub fn fixes_azimuth(self) -> bool {
        matches!(self, ScanMode::Rhi | ScanMode::ElSur360 | ScanMode::ManRhi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_id_order_detects_swapped_ids() {
        let le = PULSE_HEADER_ID.to_le_bytes();
        let be = PULSE_HEADER_ID.to_be_bytes();
        assert_eq!(packet_id_order(le), Some(false));
        assert_eq!(packet_id_order(be), Some(true));
        assert_eq!(packet_id_order([0, 0, 0, 0]), None);
    }

    #[test]
    fn encoding_codes_match_wire_values() {
        for code in 1..=5 {
            let encoding = IqEncoding::from_wire(code).unwrap();
            assert_eq!(encoding.to_wire(), code);
        }
        assert!(IqEncoding::from_wire(0).is_none());
        assert!(IqEncoding::from_wire(6).is_none());
        assert_eq!(IqEncoding::SigmetFl16.bytes_per_value(), 2);
        assert_eq!(IqEncoding::Fl32.bytes_per_value(), 4);
    }

    #[test]
    fn scan_mode_keeps_unknown_codes() {
        assert_eq!(ScanMode::from_wire(3), ScanMode::Rhi);
        assert_eq!(ScanMode::from_wire(42).to_wire(), 42);
        assert!(ScanMode::Rhi.fixes_azimuth());
        assert!(!ScanMode::Sector.fixes_azimuth());
    }
}
