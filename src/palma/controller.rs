//! Palma Controller
//!
//! Host-side stub for the palma peripheral. Every command runs to completion on
//! the calling thread: deferred commands overwrite the operation record and
//! signal the completion event before returning, and the guest polls the result
//! afterwards with [`PalmaController::get_palma_operation_info`].
//!
//! ## Command flow
//!
//! ```text
//! guest command ──► HandleValidator ──► effect ──► OperationRecord ──► KernelEvent::signal
//!                        │ error
//!                        └──────────► returned as-is, record and event untouched
//! ```
//!
//! The stub does no locking. Callers serialize access, which
//! [`crate::service::PalmaService`] does by owning the controller on one thread.

use crate::domain::error::{PalmaError, PalmaResult, ResultCode};
use crate::domain::models::{
    ConnectionHandle, ConnectionState, PalmaActivityEntry, PalmaFeatureSet, PalmaFrModeType,
    PalmaOperationData, PalmaOperationInfo, PalmaOperationType, PalmaWaveSet,
};
use crate::infrastructure::event::{KernelEvent, ReadableEvent};
use crate::infrastructure::host::PeripheralHost;
use crate::palma::handle::HandleValidator;
use crate::palma::operation::OperationRecord;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Bytes of application section storage on the peripheral
pub const APPLICATION_SECTION_SIZE: usize = 0x1000;

/// Largest single application section transfer
pub const APPLICATION_SECTION_ACCESS_SIZE: usize = 0x100;

/// Lifecycle hooks shared by HID controllers
pub trait HidController {
    /// Called when the controller is initialized
    fn on_init(&mut self);

    /// Called when the controller is released
    fn on_release(&mut self);

    /// Called by the scheduler every tick; `current_time_ns` is opaque to the controller
    fn on_update(&mut self, current_time_ns: u64);
}

/// Guest memory range handed over for a wave entry write
#[derive(Debug, Clone, Copy)]
pub struct TransferMemory<'a> {
    pub address: u64,
    pub bytes: &'a [u8],
}

/// Configuration and data stored on behalf of the peripheral
#[derive(Debug, Clone)]
struct PalmaState {
    fr_mode: PalmaFrModeType,
    database_id_version: i32,
    step_enabled: bool,
    step_count: u32,
    unique_code_valid: bool,
    last_activity: Option<u64>,
    rgb_led_pattern: Option<u64>,
    activity_entries: BTreeMap<u16, PalmaActivityEntry>,
    wave_entries: BTreeMap<(PalmaWaveSet, u16), Vec<u8>>,
    application_section: Vec<u8>,
    suspended_features: PalmaFeatureSet,
    is_paired_connectable: bool,
    boost_mode: bool,
    disallowed_addresses: Vec<[u8; 6]>,
}

impl Default for PalmaState {
    fn default() -> Self {
        Self {
            fr_mode: PalmaFrModeType::default(),
            database_id_version: 0,
            step_enabled: false,
            step_count: 0,
            unique_code_valid: true,
            last_activity: None,
            rgb_led_pattern: None,
            activity_entries: BTreeMap::new(),
            wave_entries: BTreeMap::new(),
            application_section: vec![0; APPLICATION_SECTION_SIZE],
            suspended_features: PalmaFeatureSet::empty(),
            is_paired_connectable: false,
            boost_mode: false,
            disallowed_addresses: Vec::new(),
        }
    }
}

impl PalmaState {
    /// Forget everything tied to the peripheral; host-wide flags carry over
    fn end_connection(&mut self) {
        *self = PalmaState {
            is_paired_connectable: self.is_paired_connectable,
            boost_mode: self.boost_mode,
            disallowed_addresses: std::mem::take(&mut self.disallowed_addresses),
            ..PalmaState::default()
        };
    }
}

pub struct PalmaController {
    host: Arc<dyn PeripheralHost>,
    operation_complete_event: Arc<KernelEvent>,
    handles: HandleValidator,
    operation: OperationRecord,
    state: PalmaState,
    initial_connectable: bool,
    bluetooth_address: [u8; 6],
    activated: bool,
}

impl PalmaController {
    pub fn new(
        host: Arc<dyn PeripheralHost>,
        operation_complete_event: Arc<KernelEvent>,
        bluetooth_address: [u8; 6],
    ) -> Self {
        let initial_connectable = host.is_connectable();
        Self {
            host,
            operation_complete_event,
            handles: HandleValidator::new(),
            operation: OperationRecord::new(),
            state: PalmaState::default(),
            initial_connectable,
            bluetooth_address,
            activated: false,
        }
    }

    fn reset(&mut self) {
        self.handles.reset();
        self.operation.reset();
        self.state = PalmaState::default();
        self.host.set_connectable(self.initial_connectable);
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.handles.state()
    }

    pub fn active_handle(&self) -> Option<ConnectionHandle> {
        self.handles.active_handle()
    }

    pub fn fr_mode(&self) -> PalmaFrModeType {
        self.state.fr_mode
    }

    pub fn is_boost_mode(&self) -> bool {
        self.state.boost_mode
    }

    pub fn is_paired_connectable(&self) -> bool {
        self.state.is_paired_connectable
    }

    pub fn is_connectable(&self) -> bool {
        self.host.is_connectable()
    }

    pub fn activity_entry(&self, index: u16) -> Option<&PalmaActivityEntry> {
        self.state.activity_entries.get(&index)
    }

    pub fn wave_entry(&self, wave_set: PalmaWaveSet, index: u16) -> Option<&[u8]> {
        self.state
            .wave_entries
            .get(&(wave_set, index))
            .map(Vec::as_slice)
    }

    pub fn last_activity(&self) -> Option<u64> {
        self.state.last_activity
    }

    pub fn rgb_led_pattern(&self) -> Option<u64> {
        self.state.rgb_led_pattern
    }

    pub fn is_unique_code_valid(&self) -> bool {
        self.state.unique_code_valid
    }

    pub fn suspended_features(&self) -> PalmaFeatureSet {
        self.state.suspended_features
    }

    pub fn disallowed_addresses(&self) -> &[[u8; 6]] {
        &self.state.disallowed_addresses
    }

    /// Record a successful deferred operation and signal completion
    fn complete(
        &mut self,
        operation: PalmaOperationType,
        fill: impl FnOnce(&mut PalmaOperationData),
    ) {
        self.operation
            .complete(operation, ResultCode::PALMA_SUCCESS, fill);
        self.operation_complete_event.signal();
    }

    // Connection lifecycle

    /// A handle for a different peripheral starts from a clean record and state
    pub fn get_palma_connection_handle(&mut self, npad_id: u32) -> PalmaResult<ConnectionHandle> {
        let previous = self.handles.active_handle();
        let handle = self.handles.acquire(npad_id)?;
        if previous != Some(handle) {
            self.end_connection();
        }
        Ok(handle)
    }

    pub fn initialize_palma(&mut self, handle: &ConnectionHandle) -> PalmaResult<()> {
        self.handles.initialize(handle, self.host.as_ref())?;
        self.activated = true;
        Ok(())
    }

    /// Pairing has no operation kind of its own; it moves the connection to
    /// `Paired` and signals without touching the record.
    pub fn pair_palma(&mut self, handle: &ConnectionHandle) -> PalmaResult<()> {
        self.handles.pair(handle)?;
        self.operation_complete_event.signal();
        Ok(())
    }

    pub fn release_palma(&mut self, handle: &ConnectionHandle) -> PalmaResult<()> {
        self.handles.release(handle)?;
        self.end_connection();
        Ok(())
    }

    fn end_connection(&mut self) {
        self.operation.reset();
        self.state.end_connection();
    }

    /// Only handed out for the active handle. The returned side is not revoked
    /// on release; ownership of the event primitive stays with the caller.
    pub fn acquire_palma_operation_complete_event(
        &self,
        handle: &ConnectionHandle,
    ) -> PalmaResult<ReadableEvent> {
        self.handles.validate(handle)?;
        Ok(ReadableEvent::new(&self.operation_complete_event))
    }

    /// Last recorded operation, whatever command produced it
    pub fn get_palma_operation_info(
        &self,
        handle: &ConnectionHandle,
    ) -> PalmaResult<PalmaOperationInfo> {
        self.handles.validate(handle)?;
        Ok(self.operation.info().clone())
    }

    pub fn get_palma_operation_result(&self, handle: &ConnectionHandle) -> PalmaResult<ResultCode> {
        self.handles.validate(handle)?;
        Ok(self.operation.result())
    }

    // Deferred operations

    pub fn play_palma_activity(
        &mut self,
        handle: &ConnectionHandle,
        palma_activity: u64,
    ) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        debug!("Playing palma activity {:#X}", palma_activity);
        self.state.last_activity = Some(palma_activity);
        self.complete(PalmaOperationType::PlayActivity, |_| {});
        Ok(())
    }

    pub fn set_palma_fr_mode_type(
        &mut self,
        handle: &ConnectionHandle,
        fr_mode: PalmaFrModeType,
    ) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        debug!("Setting palma FR mode to {:?}", fr_mode);
        self.state.fr_mode = fr_mode;
        self.complete(PalmaOperationType::SetFrModeType, |_| {});
        Ok(())
    }

    /// Payload: step count (u32 LE) followed by the enabled flag byte
    pub fn read_palma_step(&mut self, handle: &ConnectionHandle) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        let step_count = self.state.step_count;
        let enabled = self.state.step_enabled;
        self.complete(PalmaOperationType::ReadStep, |data| {
            data[0..4].copy_from_slice(&step_count.to_le_bytes());
            data[4] = u8::from(enabled);
        });
        Ok(())
    }

    pub fn enable_palma_step(
        &mut self,
        handle: &ConnectionHandle,
        is_enabled: bool,
    ) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        self.state.step_enabled = is_enabled;
        self.complete(PalmaOperationType::EnableStep, |_| {});
        Ok(())
    }

    pub fn reset_palma_step(&mut self, handle: &ConnectionHandle) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        self.state.step_count = 0;
        self.complete(PalmaOperationType::ResetStep, |_| {});
        Ok(())
    }

    fn check_application_section(offset: u64, size: u64) -> PalmaResult<std::ops::Range<usize>> {
        let start = usize::try_from(offset).map_err(|_| PalmaError::InvalidParameters)?;
        let len = usize::try_from(size).map_err(|_| PalmaError::InvalidParameters)?;
        let end = start.checked_add(len).ok_or(PalmaError::InvalidParameters)?;
        if len > APPLICATION_SECTION_ACCESS_SIZE || end > APPLICATION_SECTION_SIZE {
            warn!(
                "Application section access out of bounds: offset {:#X} size {:#X}",
                offset, size
            );
            return Err(PalmaError::InvalidParameters);
        }
        Ok(start..end)
    }

    /// Payload: the requested bytes of the application section
    pub fn read_palma_application_section(
        &mut self,
        handle: &ConnectionHandle,
        offset: u64,
        size: u64,
    ) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        let range = Self::check_application_section(offset, size)?;
        let section = self.state.application_section[range].to_vec();
        self.complete(PalmaOperationType::ReadApplicationSection, |data| {
            data[..section.len()].copy_from_slice(&section);
        });
        Ok(())
    }

    pub fn write_palma_application_section(
        &mut self,
        handle: &ConnectionHandle,
        offset: u64,
        size: u64,
        buffer: &[u8],
    ) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        let range = Self::check_application_section(offset, size)?;
        if range.len() > buffer.len() {
            warn!(
                "Application section write of {:#X} bytes from a {:#X} byte buffer",
                size,
                buffer.len()
            );
            return Err(PalmaError::InvalidParameters);
        }
        let len = range.len();
        self.state.application_section[range].copy_from_slice(&buffer[..len]);
        self.complete(PalmaOperationType::WriteApplicationSection, |_| {});
        Ok(())
    }

    /// Payload: validity flag byte; the code itself is not modeled
    pub fn read_palma_unique_code(&mut self, handle: &ConnectionHandle) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        let valid = self.state.unique_code_valid;
        self.complete(PalmaOperationType::ReadUniqueCode, |data| {
            data[0] = u8::from(valid);
        });
        Ok(())
    }

    pub fn set_palma_unique_code_invalid(&mut self, handle: &ConnectionHandle) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        self.state.unique_code_valid = false;
        self.complete(PalmaOperationType::SetUniqueCodeInvalid, |_| {});
        Ok(())
    }

    pub fn write_palma_activity_entry(
        &mut self,
        handle: &ConnectionHandle,
        index: u16,
        entry: PalmaActivityEntry,
    ) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        debug!("Writing palma activity entry {}: {:?}", index, entry);
        self.state.activity_entries.insert(index, entry);
        self.complete(PalmaOperationType::WriteActivityEntry, |_| {});
        Ok(())
    }

    pub fn write_palma_rgb_led_pattern_entry(
        &mut self,
        handle: &ConnectionHandle,
        pattern: u64,
    ) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        self.state.rgb_led_pattern = Some(pattern);
        self.complete(PalmaOperationType::WriteRgbLedPatternEntry, |_| {});
        Ok(())
    }

    /// Copy `size` bytes of wave data out of `memory`
    pub fn write_palma_wave_entry(
        &mut self,
        handle: &ConnectionHandle,
        wave_set: PalmaWaveSet,
        index: u16,
        memory: TransferMemory<'_>,
        size: u64,
    ) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        let len = usize::try_from(size).map_err(|_| PalmaError::InvalidParameters)?;
        if len == 0 || len > memory.bytes.len() {
            warn!(
                "Wave entry size {:#X} does not fit transfer memory at {:#X} ({:#X} bytes)",
                size,
                memory.address,
                memory.bytes.len()
            );
            return Err(PalmaError::InvalidParameters);
        }
        debug!(
            "Writing {:?} wave entry {} ({:#X} bytes from {:#X})",
            wave_set, index, size, memory.address
        );
        self.state
            .wave_entries
            .insert((wave_set, index), memory.bytes[..len].to_vec());
        self.complete(PalmaOperationType::WriteWaveEntry, |_| {});
        Ok(())
    }

    /// Accepted for a valid handle; there is never a write in flight to cancel
    pub fn cancel_write_palma_wave_entry(&mut self, handle: &ConnectionHandle) -> PalmaResult<()> {
        self.handles.validate(handle)?;
        Ok(())
    }

    pub fn set_palma_data_base_identification_version(
        &mut self,
        handle: &ConnectionHandle,
        database_id_version: i32,
    ) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        self.state.database_id_version = database_id_version;
        self.complete(PalmaOperationType::WriteDataBaseIdentificationVersion, |_| {});
        Ok(())
    }

    /// Payload: the stored version (i32 LE)
    pub fn get_palma_data_base_identification_version(
        &mut self,
        handle: &ConnectionHandle,
    ) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        let version = self.state.database_id_version;
        self.complete(PalmaOperationType::ReadDataBaseIdentificationVersion, |data| {
            data[0..4].copy_from_slice(&version.to_le_bytes());
        });
        Ok(())
    }

    pub fn suspend_palma_feature(
        &mut self,
        handle: &ConnectionHandle,
        features: PalmaFeatureSet,
    ) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        self.state.suspended_features = features;
        self.complete(PalmaOperationType::SuspendFeature, |_| {});
        Ok(())
    }

    /// Payload: the requested field index (u16 LE); log contents are not modeled
    pub fn read_palma_play_log(
        &mut self,
        handle: &ConnectionHandle,
        field_index: u16,
    ) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        self.complete(PalmaOperationType::ReadPlayLog, |data| {
            data[0..2].copy_from_slice(&field_index.to_le_bytes());
        });
        Ok(())
    }

    pub fn reset_palma_play_log(
        &mut self,
        handle: &ConnectionHandle,
        field_index: u16,
    ) -> PalmaResult<()> {
        self.handles.validate_initialized(handle)?;
        debug!("Resetting palma play log field {}", field_index);
        self.complete(PalmaOperationType::ResetPlayLog, |_| {});
        Ok(())
    }

    // Synchronous queries and flag setters

    pub fn get_palma_bluetooth_address(&self, handle: &ConnectionHandle) -> PalmaResult<[u8; 6]> {
        self.handles.validate(handle)?;
        Ok(self.bluetooth_address)
    }

    /// When set, palma peripherals are allowed to pair
    pub fn set_is_palma_all_connectable(&mut self, is_all_connectable: bool) {
        info!("Palma all-connectable set to {}", is_all_connectable);
        self.host.set_connectable(is_all_connectable);
    }

    pub fn set_is_palma_paired_connectable(&mut self, is_paired_connectable: bool) {
        self.state.is_paired_connectable = is_paired_connectable;
    }

    pub fn set_palma_boost_mode(&mut self, boost_mode: bool) {
        debug!("Palma boost mode set to {}", boost_mode);
        self.state.boost_mode = boost_mode;
    }

    pub fn enable_palma_boost_mode(&mut self, is_enabled: bool) {
        self.set_palma_boost_mode(is_enabled);
    }

    pub fn set_disallowed_palma_connection(&mut self, addresses: Vec<[u8; 6]>) {
        debug!("{} palma addresses disallowed", addresses.len());
        self.state.disallowed_addresses = addresses;
    }
}

impl HidController for PalmaController {
    fn on_init(&mut self) {
        self.reset();
        self.activated = false;
        info!("Palma controller initialized");
    }

    fn on_release(&mut self) {
        self.reset();
        self.activated = false;
        info!("Palma controller released");
    }

    fn on_update(&mut self, current_time_ns: u64) {
        // No peripheral hardware to poll; shared memory stays untouched
        trace!("Palma update tick at {}ns", current_time_ns);
    }
}
