//! Connection handle tracking
//!
//! Exactly one peripheral connection is tracked at a time. The active slot is an
//! `Option` so "no connection" and "one connection" are the only shapes it can take.

use crate::domain::error::{PalmaError, PalmaResult};
use crate::domain::models::{ConnectionHandle, ConnectionState, NpadId};
use crate::infrastructure::host::PeripheralHost;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
struct ActiveConnection {
    handle: ConnectionHandle,
    npad: NpadId,
    state: ConnectionState,
}

#[derive(Debug)]
pub struct HandleValidator {
    active: Option<ActiveConnection>,
    next_generation: u32,
}

impl Default for HandleValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleValidator {
    pub fn new() -> Self {
        Self {
            active: None,
            next_generation: 1,
        }
    }

    /// Drop the active connection. Generations keep counting so old handles stay invalid.
    pub fn reset(&mut self) {
        if let Some(active) = self.active.take() {
            debug!("Dropping connection for {:?}", active.npad);
        }
    }

    fn bump_generation(&mut self) -> u32 {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);
        generation
    }

    /// Hand out the handle for `npad_id`, replacing any other active connection
    pub fn acquire(&mut self, npad_id: u32) -> PalmaResult<ConnectionHandle> {
        let npad = NpadId::from_raw(npad_id).ok_or_else(|| {
            warn!("Rejecting palma handle for unknown npad id {:#X}", npad_id);
            PalmaError::InvalidHandle
        })?;

        if let Some(active) = self.active {
            if active.npad == npad {
                return Ok(active.handle);
            }
            warn!(
                "Replacing palma connection on {:?} with {:?}",
                active.npad, npad
            );
        }

        let handle = ConnectionHandle {
            npad_id,
            generation: self.bump_generation(),
        };
        self.active = Some(ActiveConnection {
            handle,
            npad,
            state: ConnectionState::Acquired,
        });
        info!("Acquired palma handle {:?}", handle);
        Ok(handle)
    }

    fn active_mut(&mut self, handle: &ConnectionHandle) -> PalmaResult<&mut ActiveConnection> {
        match self.active.as_mut() {
            Some(active) if active.handle == *handle => Ok(active),
            _ => Err(PalmaError::InvalidHandle),
        }
    }

    /// Current state of `handle`, or `InvalidHandle` if it is not the active one
    pub fn validate(&self, handle: &ConnectionHandle) -> PalmaResult<ConnectionState> {
        match self.active {
            Some(active) if active.handle == *handle => Ok(active.state),
            _ => {
                warn!("Palma handle {:?} does not match the active connection", handle);
                Err(PalmaError::InvalidHandle)
            }
        }
    }

    /// Validate and require at least `Initialized`
    pub fn validate_initialized(&self, handle: &ConnectionHandle) -> PalmaResult<ConnectionState> {
        let state = self.validate(handle)?;
        if state < ConnectionState::Initialized {
            warn!("Palma handle {:?} used before initialization", handle);
            return Err(PalmaError::NotInitialized);
        }
        Ok(state)
    }

    pub fn initialize(
        &mut self,
        handle: &ConnectionHandle,
        host: &dyn PeripheralHost,
    ) -> PalmaResult<()> {
        self.validate(handle)?;
        let active = self.active_mut(handle)?;
        if active.state >= ConnectionState::Initialized {
            return Ok(());
        }
        if !host.is_palma_capable(active.npad) {
            warn!("{:?} cannot accept a palma peripheral", active.npad);
            return Err(PalmaError::NotPaired);
        }
        active.state = ConnectionState::Initialized;
        info!("Initialized palma on {:?}", active.npad);
        Ok(())
    }

    pub fn pair(&mut self, handle: &ConnectionHandle) -> PalmaResult<()> {
        self.validate_initialized(handle)?;
        let active = self.active_mut(handle)?;
        if active.state != ConnectionState::Paired {
            active.state = ConnectionState::Paired;
            info!("Paired palma on {:?}", active.npad);
        }
        Ok(())
    }

    pub fn release(&mut self, handle: &ConnectionHandle) -> PalmaResult<()> {
        self.validate(handle)?;
        if let Some(active) = self.active.take() {
            info!("Released palma on {:?}", active.npad);
        }
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.active
            .map(|active| active.state)
            .unwrap_or(ConnectionState::Unattached)
    }

    pub fn active_handle(&self) -> Option<ConnectionHandle> {
        self.active.map(|active| active.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::host::EmulatedHost;

    fn host() -> EmulatedHost {
        EmulatedHost::new([NpadId::Player1, NpadId::Player2])
    }

    #[test]
    fn test_state_machine() {
        let mut validator = HandleValidator::new();
        assert_eq!(validator.state(), ConnectionState::Unattached);

        let handle = validator.acquire(0).unwrap();
        assert_eq!(validator.state(), ConnectionState::Acquired);

        validator.initialize(&handle, &host()).unwrap();
        assert_eq!(validator.state(), ConnectionState::Initialized);

        validator.pair(&handle).unwrap();
        assert_eq!(validator.state(), ConnectionState::Paired);

        // Re-initializing a paired connection keeps it paired
        validator.initialize(&handle, &host()).unwrap();
        assert_eq!(validator.state(), ConnectionState::Paired);

        validator.release(&handle).unwrap();
        assert_eq!(validator.state(), ConnectionState::Unattached);
    }

    #[test]
    fn test_unknown_npad_is_invalid_handle() {
        let mut validator = HandleValidator::new();
        assert_eq!(validator.acquire(0x42), Err(PalmaError::InvalidHandle));
        assert!(validator.active_handle().is_none());
    }

    #[test]
    fn test_initialize_on_incapable_slot() {
        let mut validator = HandleValidator::new();
        let handle = validator.acquire(NpadId::Handheld.raw()).unwrap();
        assert_eq!(
            validator.initialize(&handle, &host()),
            Err(PalmaError::NotPaired)
        );
        assert_eq!(validator.state(), ConnectionState::Acquired);
    }

    #[test]
    fn test_pair_requires_initialize() {
        let mut validator = HandleValidator::new();
        let handle = validator.acquire(0).unwrap();
        assert_eq!(validator.pair(&handle), Err(PalmaError::NotInitialized));
    }

    #[test]
    fn test_reacquire_same_npad_keeps_handle() {
        let mut validator = HandleValidator::new();
        let first = validator.acquire(1).unwrap();
        validator.initialize(&first, &host()).unwrap();

        let second = validator.acquire(1).unwrap();
        assert_eq!(first, second);
        assert_eq!(validator.state(), ConnectionState::Initialized);
    }

    #[test]
    fn test_acquire_other_npad_invalidates_previous() {
        let mut validator = HandleValidator::new();
        let first = validator.acquire(0).unwrap();
        let second = validator.acquire(1).unwrap();

        assert_eq!(validator.validate(&first), Err(PalmaError::InvalidHandle));
        assert_eq!(validator.validate(&second), Ok(ConnectionState::Acquired));
    }

    #[test]
    fn test_released_handle_stays_invalid_after_reacquire() {
        let mut validator = HandleValidator::new();
        let old = validator.acquire(0).unwrap();
        validator.release(&old).unwrap();

        let new = validator.acquire(0).unwrap();
        assert_ne!(old, new);
        assert_eq!(new.npad_id, old.npad_id);
        assert_eq!(validator.validate(&old), Err(PalmaError::InvalidHandle));
        assert_eq!(validator.release(&old), Err(PalmaError::InvalidHandle));
    }

    #[test]
    fn test_forged_handle_is_rejected() {
        let mut validator = HandleValidator::new();
        validator.acquire(0).unwrap();
        let forged = ConnectionHandle {
            npad_id: 0,
            generation: 0,
        };
        assert_eq!(validator.validate(&forged), Err(PalmaError::InvalidHandle));
    }
}
