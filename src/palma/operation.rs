//! Operation record
//!
//! Holds the most recent deferred operation. Kind, result and payload are always
//! replaced together by a single [`OperationRecord::complete`] call.

use crate::domain::error::ResultCode;
use crate::domain::models::{
    PalmaOperationData, PalmaOperationInfo, PalmaOperationType, PALMA_OPERATION_DATA_SIZE,
};
use tracing::debug;

#[derive(Debug, Default)]
pub struct OperationRecord {
    info: PalmaOperationInfo,
}

impl OperationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.info = PalmaOperationInfo::default();
    }

    /// Replace the record. `fill` writes into a zeroed payload.
    pub fn complete(
        &mut self,
        operation: PalmaOperationType,
        result: ResultCode,
        fill: impl FnOnce(&mut PalmaOperationData),
    ) {
        let mut data = [0u8; PALMA_OPERATION_DATA_SIZE];
        fill(&mut data);
        self.info = PalmaOperationInfo {
            operation,
            result,
            data,
        };
        debug!("Operation {:?} completed with {}", operation, result);
    }

    pub fn complete_success(&mut self, operation: PalmaOperationType) {
        self.complete(operation, ResultCode::PALMA_SUCCESS, |_| {});
    }

    pub fn info(&self) -> &PalmaOperationInfo {
        &self.info
    }

    pub fn operation(&self) -> PalmaOperationType {
        self.info.operation
    }

    pub fn result(&self) -> ResultCode {
        self.info.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_replaces_everything() {
        let mut record = OperationRecord::new();
        record.complete(
            PalmaOperationType::ReadUniqueCode,
            ResultCode::PALMA_SUCCESS,
            |data| data[..3].copy_from_slice(&[1, 2, 3]),
        );
        assert_eq!(record.operation(), PalmaOperationType::ReadUniqueCode);
        assert_eq!(&record.info().data[..4], &[1, 2, 3, 0]);

        record.complete_success(PalmaOperationType::ResetStep);
        assert_eq!(record.operation(), PalmaOperationType::ResetStep);
        assert!(record.info().data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reset() {
        let mut record = OperationRecord::new();
        record.complete(PalmaOperationType::ReadPlayLog, ResultCode::from_raw(0x1234), |_| {});
        record.reset();
        assert_eq!(*record.info(), PalmaOperationInfo::default());
    }
}
