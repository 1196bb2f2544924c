//! Palma Data Model
//!
//! Identifiers, enumerations and fixed-layout records exchanged with the guest.
//! Every record that crosses the guest boundary has a bit-exact little-endian
//! encoding; the `SIZE` constants are checked against the Rust layout at
//! compile time.

use crate::domain::error::ResultCode;
use serde::{Deserialize, Serialize};

/// Size of the opaque payload carried by every operation record
pub const PALMA_OPERATION_DATA_SIZE: usize = 0x140;

/// Opaque operation payload
pub type PalmaOperationData = [u8; PALMA_OPERATION_DATA_SIZE];

/// Logical input slot a peripheral can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NpadId {
    Player1,
    Player2,
    Player3,
    Player4,
    Player5,
    Player6,
    Player7,
    Player8,
    Other,
    Handheld,
}

impl NpadId {
    pub const ALL_PLAYERS: [NpadId; 8] = [
        Self::Player1,
        Self::Player2,
        Self::Player3,
        Self::Player4,
        Self::Player5,
        Self::Player6,
        Self::Player7,
        Self::Player8,
    ];

    /// Raw identifier as seen by the guest
    pub fn raw(self) -> u32 {
        match self {
            Self::Player1 => 0,
            Self::Player2 => 1,
            Self::Player3 => 2,
            Self::Player4 => 3,
            Self::Player5 => 4,
            Self::Player6 => 5,
            Self::Player7 => 6,
            Self::Player8 => 7,
            Self::Other => 0x10,
            Self::Handheld => 0x20,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Player1),
            1 => Some(Self::Player2),
            2 => Some(Self::Player3),
            3 => Some(Self::Player4),
            4 => Some(Self::Player5),
            5 => Some(Self::Player6),
            6 => Some(Self::Player7),
            7 => Some(Self::Player8),
            0x10 => Some(Self::Other),
            0x20 => Some(Self::Handheld),
            _ => None,
        }
    }
}

/// Kind of the last deferred operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum PalmaOperationType {
    #[default]
    PlayActivity = 0,
    SetFrModeType = 1,
    ReadStep = 2,
    EnableStep = 3,
    ResetStep = 4,
    ReadApplicationSection = 5,
    WriteApplicationSection = 6,
    ReadUniqueCode = 7,
    SetUniqueCodeInvalid = 8,
    WriteActivityEntry = 9,
    WriteRgbLedPatternEntry = 10,
    WriteWaveEntry = 11,
    ReadDataBaseIdentificationVersion = 12,
    WriteDataBaseIdentificationVersion = 13,
    SuspendFeature = 14,
    ReadPlayLog = 15,
    ResetPlayLog = 16,
}

impl PalmaOperationType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::PlayActivity,
            1 => Self::SetFrModeType,
            2 => Self::ReadStep,
            3 => Self::EnableStep,
            4 => Self::ResetStep,
            5 => Self::ReadApplicationSection,
            6 => Self::WriteApplicationSection,
            7 => Self::ReadUniqueCode,
            8 => Self::SetUniqueCodeInvalid,
            9 => Self::WriteActivityEntry,
            10 => Self::WriteRgbLedPatternEntry,
            11 => Self::WriteWaveEntry,
            12 => Self::ReadDataBaseIdentificationVersion,
            13 => Self::WriteDataBaseIdentificationVersion,
            14 => Self::SuspendFeature,
            15 => Self::ReadPlayLog,
            16 => Self::ResetPlayLog,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[repr(u64)]
pub enum PalmaWaveSet {
    #[default]
    Small = 0,
    Medium = 1,
    Large = 2,
}

impl PalmaWaveSet {
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(Self::Small),
            1 => Some(Self::Medium),
            2 => Some(Self::Large),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u64)]
pub enum PalmaFrModeType {
    #[default]
    Off = 0,
    B01 = 1,
    B02 = 2,
    B03 = 3,
    Downloaded = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u64)]
pub enum PalmaFeature {
    FrMode = 0,
    RumbleFeedback = 1,
    Step = 2,
    MuteSwitch = 3,
}

/// Set of [`PalmaFeature`] values, one bit per feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PalmaFeatureSet(u64);

impl PalmaFeatureSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn insert(&mut self, feature: PalmaFeature) {
        self.0 |= 1u64 << (feature as u64);
    }

    pub fn contains(self, feature: PalmaFeature) -> bool {
        self.0 & (1u64 << (feature as u64)) != 0
    }
}

impl FromIterator<PalmaFeature> for PalmaFeatureSet {
    fn from_iter<I: IntoIterator<Item = PalmaFeature>>(iter: I) -> Self {
        let mut set = Self::empty();
        for feature in iter {
            set.insert(feature);
        }
        set
    }
}

/// Connection lifecycle of the tracked peripheral slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Unattached,
    Acquired,
    Initialized,
    Paired,
}

/// Guest-visible connection handle
///
/// ```text
/// [0-3] : npad id (u32 little-endian)
/// [4-7] : generation (u32 little-endian)
/// ```
///
/// The generation changes on every fresh acquire so a handle that outlived a
/// release never matches again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(C)]
pub struct ConnectionHandle {
    pub npad_id: u32,
    pub generation: u32,
}

const _: () = assert!(std::mem::size_of::<ConnectionHandle>() == ConnectionHandle::SIZE);

impl ConnectionHandle {
    pub const SIZE: usize = 0x8;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.npad_id.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.generation.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            npad_id: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            generation: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

/// Last deferred operation as polled by the guest
///
/// ```text
/// [0-3]   : operation type (u32 little-endian)
/// [4-7]   : result code (u32 little-endian)
/// [8-327] : opaque payload
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct PalmaOperationInfo {
    pub operation: PalmaOperationType,
    pub result: ResultCode,
    pub data: PalmaOperationData,
}

const _: () = assert!(std::mem::size_of::<PalmaOperationInfo>() == PalmaOperationInfo::SIZE);

impl Default for PalmaOperationInfo {
    fn default() -> Self {
        Self {
            operation: PalmaOperationType::default(),
            result: ResultCode::PALMA_SUCCESS,
            data: [0u8; PALMA_OPERATION_DATA_SIZE],
        }
    }
}

impl PalmaOperationInfo {
    pub const SIZE: usize = 0x148;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&(self.operation as u32).to_le_bytes());
        bytes[4..8].copy_from_slice(&self.result.raw().to_le_bytes());
        bytes[8..].copy_from_slice(&self.data);
        bytes
    }

    /// Decode a record; `None` when the operation field is out of range
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Option<Self> {
        let operation =
            PalmaOperationType::from_raw(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))?;
        let result = ResultCode::from_raw(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]));
        let mut data = [0u8; PALMA_OPERATION_DATA_SIZE];
        data.copy_from_slice(&bytes[8..]);
        Some(Self {
            operation,
            result,
            data,
        })
    }
}

/// Activity entry written by the guest and stored verbatim
///
/// ```text
/// [0-3]   : RGB LED pattern index (u32 little-endian)
/// [4-7]   : padding
/// [8-15]  : wave set (u64 little-endian)
/// [16-19] : wave index (u32 little-endian)
/// [20-31] : padding
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(C)]
pub struct PalmaActivityEntry {
    pub rgb_led_pattern_index: u32,
    #[serde(skip)]
    _padding0: [u8; 2],
    pub wave_set: PalmaWaveSet,
    pub wave_index: u32,
    #[serde(skip)]
    _padding1: [u8; 12],
}

const _: () = assert!(std::mem::size_of::<PalmaActivityEntry>() == PalmaActivityEntry::SIZE);

impl PalmaActivityEntry {
    pub const SIZE: usize = 0x20;

    pub fn new(rgb_led_pattern_index: u32, wave_set: PalmaWaveSet, wave_index: u32) -> Self {
        Self {
            rgb_led_pattern_index,
            _padding0: [0; 2],
            wave_set,
            wave_index,
            _padding1: [0; 12],
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.rgb_led_pattern_index.to_le_bytes());
        bytes[8..16].copy_from_slice(&(self.wave_set as u64).to_le_bytes());
        bytes[16..20].copy_from_slice(&self.wave_index.to_le_bytes());
        bytes
    }

    /// Decode an entry; `None` when the wave set tag is unknown
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Option<Self> {
        let mut wave_set = [0u8; 8];
        wave_set.copy_from_slice(&bytes[8..16]);
        Some(Self::new(
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            PalmaWaveSet::from_raw(u64::from_le_bytes(wave_set))?,
            u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_npad_raw_ids() {
        assert_eq!(NpadId::Handheld.raw(), 0x20);
        assert_eq!(NpadId::from_raw(0x10), Some(NpadId::Other));
        assert_eq!(NpadId::from_raw(8), None);
        assert_eq!(NpadId::from_raw(0xFFFF_FFFF), None);
    }

    #[test]
    fn test_operation_info_layout() {
        let mut info = PalmaOperationInfo {
            operation: PalmaOperationType::ReadStep,
            ..Default::default()
        };
        info.data[0] = 0xAA;
        info.data[PALMA_OPERATION_DATA_SIZE - 1] = 0x55;

        let bytes = info.to_bytes();
        assert_eq!(bytes.len(), 328);
        assert_eq!(&bytes[0..4], &[2, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &ResultCode::PALMA_SUCCESS.raw().to_le_bytes());
        assert_eq!(bytes[8], 0xAA);
        assert_eq!(bytes[327], 0x55);
    }

    #[test]
    fn test_operation_info_rejects_unknown_kind() {
        let mut bytes = [0u8; PalmaOperationInfo::SIZE];
        bytes[0] = 17;
        assert!(PalmaOperationInfo::from_bytes(&bytes).is_none());
    }

    #[test]
    fn test_activity_entry_layout() {
        let entry = PalmaActivityEntry::new(0x0102_0304, PalmaWaveSet::Large, 7);
        let bytes = entry.to_bytes();

        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..8], &[0; 4]);
        assert_eq!(&bytes[8..16], &[2, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&bytes[16..20], &[7, 0, 0, 0]);
        assert_eq!(&bytes[20..32], &[0; 12]);
        assert_eq!(PalmaActivityEntry::from_bytes(&bytes), Some(entry));
    }

    #[test]
    fn test_connection_handle_layout() {
        let handle = ConnectionHandle {
            npad_id: 0x20,
            generation: 3,
        };
        assert_eq!(handle.to_bytes(), [0x20, 0, 0, 0, 3, 0, 0, 0]);
    }

    #[test]
    fn test_feature_set() {
        let set: PalmaFeatureSet = [PalmaFeature::Step, PalmaFeature::MuteSwitch]
            .into_iter()
            .collect();
        assert!(set.contains(PalmaFeature::Step));
        assert!(!set.contains(PalmaFeature::FrMode));
        assert_eq!(set.bits(), 0b1100);
    }

    #[test]
    fn test_connection_state_ordering() {
        assert!(ConnectionState::Paired > ConnectionState::Initialized);
        assert!(ConnectionState::Acquired < ConnectionState::Initialized);
    }
}
