//! Palma Service
//!
//! Request-handling thread for the palma controller. The controller is owned by
//! a single worker running a current-thread tokio runtime, so requests are
//! executed strictly in arrival order and the update tick never overlaps a
//! command.

use crate::domain::error::{PalmaError, PalmaResult, ResultCode};
use crate::domain::models::{
    ConnectionHandle, PalmaActivityEntry, PalmaFeature, PalmaFeatureSet, PalmaFrModeType,
    PalmaOperationType, PalmaWaveSet,
};
use crate::domain::settings::PalmaSettings;
use crate::infrastructure::event::{KernelEvent, ReadableEvent};
use crate::infrastructure::host::{EmulatedHost, PeripheralHost};
use crate::palma::{HidController, PalmaController, TransferMemory};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Commands accepted by the service, one per controller operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PalmaRequest {
    GetConnectionHandle {
        npad_id: u32,
    },
    Initialize {
        handle: ConnectionHandle,
    },
    Pair {
        handle: ConnectionHandle,
    },
    Release {
        handle: ConnectionHandle,
    },
    GetOperationInfo {
        handle: ConnectionHandle,
    },
    GetOperationResult {
        handle: ConnectionHandle,
    },
    PlayActivity {
        handle: ConnectionHandle,
        activity: u64,
    },
    SetFrModeType {
        handle: ConnectionHandle,
        fr_mode: PalmaFrModeType,
    },
    ReadStep {
        handle: ConnectionHandle,
    },
    EnableStep {
        handle: ConnectionHandle,
        enabled: bool,
    },
    ResetStep {
        handle: ConnectionHandle,
    },
    ReadApplicationSection {
        handle: ConnectionHandle,
        offset: u64,
        size: u64,
    },
    WriteApplicationSection {
        handle: ConnectionHandle,
        offset: u64,
        size: u64,
        data: Vec<u8>,
    },
    ReadUniqueCode {
        handle: ConnectionHandle,
    },
    SetUniqueCodeInvalid {
        handle: ConnectionHandle,
    },
    WriteActivityEntry {
        handle: ConnectionHandle,
        index: u16,
        entry: PalmaActivityEntry,
    },
    WriteRgbLedPatternEntry {
        handle: ConnectionHandle,
        pattern: u64,
    },
    WriteWaveEntry {
        handle: ConnectionHandle,
        wave_set: PalmaWaveSet,
        index: u16,
        #[serde(default)]
        address: u64,
        data: Vec<u8>,
        size: u64,
    },
    CancelWriteWaveEntry {
        handle: ConnectionHandle,
    },
    SetDataBaseIdentificationVersion {
        handle: ConnectionHandle,
        version: i32,
    },
    GetDataBaseIdentificationVersion {
        handle: ConnectionHandle,
    },
    SuspendFeature {
        handle: ConnectionHandle,
        features: Vec<PalmaFeature>,
    },
    ReadPlayLog {
        handle: ConnectionHandle,
        field_index: u16,
    },
    ResetPlayLog {
        handle: ConnectionHandle,
        field_index: u16,
    },
    GetBluetoothAddress {
        handle: ConnectionHandle,
    },
    SetIsAllConnectable {
        enabled: bool,
    },
    SetIsPairedConnectable {
        enabled: bool,
    },
    SetBoostMode {
        enabled: bool,
    },
    EnableBoostMode {
        enabled: bool,
    },
    SetDisallowedConnection {
        addresses: Vec<[u8; 6]>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PalmaResponse {
    Ok,
    Handle {
        handle: ConnectionHandle,
    },
    /// Payload with trailing zero bytes trimmed
    OperationInfo {
        operation: PalmaOperationType,
        result: ResultCode,
        data: Vec<u8>,
    },
    OperationResult {
        result: ResultCode,
    },
    BluetoothAddress {
        address: [u8; 6],
    },
    Error {
        error: PalmaError,
        result: ResultCode,
    },
}

impl From<PalmaError> for PalmaResponse {
    fn from(error: PalmaError) -> Self {
        Self::Error {
            error,
            result: error.result_code(),
        }
    }
}

fn unit(result: PalmaResult<()>) -> PalmaResponse {
    match result {
        Ok(()) => PalmaResponse::Ok,
        Err(e) => e.into(),
    }
}

fn respond<T>(result: PalmaResult<T>, f: impl FnOnce(T) -> PalmaResponse) -> PalmaResponse {
    match result {
        Ok(value) => f(value),
        Err(e) => e.into(),
    }
}

/// Execute one request against the controller
pub fn dispatch(controller: &mut PalmaController, request: PalmaRequest) -> PalmaResponse {
    debug!("Dispatching {:?}", request);
    match request {
        PalmaRequest::GetConnectionHandle { npad_id } => respond(
            controller.get_palma_connection_handle(npad_id),
            |handle| PalmaResponse::Handle { handle },
        ),
        PalmaRequest::Initialize { handle } => unit(controller.initialize_palma(&handle)),
        PalmaRequest::Pair { handle } => unit(controller.pair_palma(&handle)),
        PalmaRequest::Release { handle } => unit(controller.release_palma(&handle)),
        PalmaRequest::GetOperationInfo { handle } => {
            respond(controller.get_palma_operation_info(&handle), |info| {
                let used = info
                    .data
                    .iter()
                    .rposition(|&b| b != 0)
                    .map_or(0, |last| last + 1);
                PalmaResponse::OperationInfo {
                    operation: info.operation,
                    result: info.result,
                    data: info.data[..used].to_vec(),
                }
            })
        }
        PalmaRequest::GetOperationResult { handle } => respond(
            controller.get_palma_operation_result(&handle),
            |result| PalmaResponse::OperationResult { result },
        ),
        PalmaRequest::PlayActivity { handle, activity } => {
            unit(controller.play_palma_activity(&handle, activity))
        }
        PalmaRequest::SetFrModeType { handle, fr_mode } => {
            unit(controller.set_palma_fr_mode_type(&handle, fr_mode))
        }
        PalmaRequest::ReadStep { handle } => unit(controller.read_palma_step(&handle)),
        PalmaRequest::EnableStep { handle, enabled } => {
            unit(controller.enable_palma_step(&handle, enabled))
        }
        PalmaRequest::ResetStep { handle } => unit(controller.reset_palma_step(&handle)),
        PalmaRequest::ReadApplicationSection {
            handle,
            offset,
            size,
        } => unit(controller.read_palma_application_section(&handle, offset, size)),
        PalmaRequest::WriteApplicationSection {
            handle,
            offset,
            size,
            data,
        } => unit(controller.write_palma_application_section(&handle, offset, size, &data)),
        PalmaRequest::ReadUniqueCode { handle } => {
            unit(controller.read_palma_unique_code(&handle))
        }
        PalmaRequest::SetUniqueCodeInvalid { handle } => {
            unit(controller.set_palma_unique_code_invalid(&handle))
        }
        PalmaRequest::WriteActivityEntry {
            handle,
            index,
            entry,
        } => unit(controller.write_palma_activity_entry(&handle, index, entry)),
        PalmaRequest::WriteRgbLedPatternEntry { handle, pattern } => {
            unit(controller.write_palma_rgb_led_pattern_entry(&handle, pattern))
        }
        PalmaRequest::WriteWaveEntry {
            handle,
            wave_set,
            index,
            address,
            data,
            size,
        } => unit(controller.write_palma_wave_entry(
            &handle,
            wave_set,
            index,
            TransferMemory {
                address,
                bytes: &data,
            },
            size,
        )),
        PalmaRequest::CancelWriteWaveEntry { handle } => {
            unit(controller.cancel_write_palma_wave_entry(&handle))
        }
        PalmaRequest::SetDataBaseIdentificationVersion { handle, version } => {
            unit(controller.set_palma_data_base_identification_version(&handle, version))
        }
        PalmaRequest::GetDataBaseIdentificationVersion { handle } => {
            unit(controller.get_palma_data_base_identification_version(&handle))
        }
        PalmaRequest::SuspendFeature { handle, features } => unit(
            controller.suspend_palma_feature(&handle, features.into_iter().collect::<PalmaFeatureSet>()),
        ),
        PalmaRequest::ReadPlayLog {
            handle,
            field_index,
        } => unit(controller.read_palma_play_log(&handle, field_index)),
        PalmaRequest::ResetPlayLog {
            handle,
            field_index,
        } => unit(controller.reset_palma_play_log(&handle, field_index)),
        PalmaRequest::GetBluetoothAddress { handle } => respond(
            controller.get_palma_bluetooth_address(&handle),
            |address| PalmaResponse::BluetoothAddress { address },
        ),
        PalmaRequest::SetIsAllConnectable { enabled } => {
            controller.set_is_palma_all_connectable(enabled);
            PalmaResponse::Ok
        }
        PalmaRequest::SetIsPairedConnectable { enabled } => {
            controller.set_is_palma_paired_connectable(enabled);
            PalmaResponse::Ok
        }
        PalmaRequest::SetBoostMode { enabled } => {
            controller.set_palma_boost_mode(enabled);
            PalmaResponse::Ok
        }
        PalmaRequest::EnableBoostMode { enabled } => {
            controller.enable_palma_boost_mode(enabled);
            PalmaResponse::Ok
        }
        PalmaRequest::SetDisallowedConnection { addresses } => {
            controller.set_disallowed_palma_connection(addresses);
            PalmaResponse::Ok
        }
    }
}

enum ServiceMessage {
    Request {
        request: PalmaRequest,
        reply: oneshot::Sender<PalmaResponse>,
    },
    AcquireEvent {
        handle: ConnectionHandle,
        reply: oneshot::Sender<PalmaResult<ReadableEvent>>,
    },
    Shutdown,
}

/// Client side of a running [`PalmaService`]
pub struct PalmaServiceHandle {
    tx: mpsc::UnboundedSender<ServiceMessage>,
    worker: Option<JoinHandle<()>>,
}

pub struct PalmaService;

impl PalmaService {
    /// Start the worker thread with an emulated host built from `settings`
    pub fn spawn(settings: &PalmaSettings) -> Result<PalmaServiceHandle> {
        let host: Arc<dyn PeripheralHost> = Arc::new(EmulatedHost::from_settings(settings));
        Self::spawn_with_host(settings, host)
    }

    pub fn spawn_with_host(
        settings: &PalmaSettings,
        host: Arc<dyn PeripheralHost>,
    ) -> Result<PalmaServiceHandle> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let interval = Duration::from_millis(settings.update_interval_ms.max(1));
        let bluetooth_address = settings.bluetooth_address;

        let worker = std::thread::Builder::new()
            .name("palma-service".to_string())
            .spawn(move || {
                rt.block_on(async move {
                    let event = KernelEvent::new("palma:operation_complete");
                    let controller = PalmaController::new(host, event, bluetooth_address);
                    Self::run(controller, rx, interval).await;
                });
            })?;

        Ok(PalmaServiceHandle {
            tx,
            worker: Some(worker),
        })
    }

    async fn run(
        mut controller: PalmaController,
        mut rx: mpsc::UnboundedReceiver<ServiceMessage>,
        interval: Duration,
    ) {
        controller.on_init();
        info!("Palma service started (tick every {:?})", interval);

        let started = Instant::now();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                message = rx.recv() => match message {
                    Some(ServiceMessage::Request { request, reply }) => {
                        let response = dispatch(&mut controller, request);
                        if reply.send(response).is_err() {
                            debug!("Requester went away before the response");
                        }
                    }
                    Some(ServiceMessage::AcquireEvent { handle, reply }) => {
                        let event = controller.acquire_palma_operation_complete_event(&handle);
                        if reply.send(event).is_err() {
                            debug!("Requester went away before the completion event");
                        }
                    }
                    Some(ServiceMessage::Shutdown) | None => break,
                },
                _ = ticker.tick() => {
                    let now = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
                    controller.on_update(now);
                }
            }
        }

        controller.on_release();
        info!("Palma service stopped");
    }
}

impl PalmaServiceHandle {
    pub async fn request(&self, request: PalmaRequest) -> Result<PalmaResponse> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(ServiceMessage::Request { request, reply })
            .map_err(|_| anyhow::anyhow!("Palma service is not running"))?;
        Ok(response.await?)
    }

    pub async fn acquire_operation_complete_event(
        &self,
        handle: ConnectionHandle,
    ) -> Result<PalmaResult<ReadableEvent>> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(ServiceMessage::AcquireEvent { handle, reply })
            .map_err(|_| anyhow::anyhow!("Palma service is not running"))?;
        Ok(response.await?)
    }

    /// Stop the worker after the requests already queued
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.tx.send(ServiceMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            tokio::task::spawn_blocking(move || worker.join())
                .await?
                .map_err(|_| anyhow::anyhow!("Palma service thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for PalmaServiceHandle {
    fn drop(&mut self) {
        if self.worker.is_some() && self.tx.send(ServiceMessage::Shutdown).is_err() {
            debug!("Palma service already stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::NpadId;

    fn settings() -> PalmaSettings {
        PalmaSettings {
            bluetooth_address: [1, 2, 3, 4, 5, 6],
            update_interval_ms: 1,
            ..Default::default()
        }
    }

    async fn connect(service: &PalmaServiceHandle) -> ConnectionHandle {
        let handle = match service
            .request(PalmaRequest::GetConnectionHandle { npad_id: 0 })
            .await
            .unwrap()
        {
            PalmaResponse::Handle { handle } => handle,
            other => panic!("unexpected response {:?}", other),
        };
        assert_eq!(
            service
                .request(PalmaRequest::Initialize { handle })
                .await
                .unwrap(),
            PalmaResponse::Ok
        );
        handle
    }

    #[tokio::test]
    async fn test_request_scenario() {
        let service = PalmaService::spawn(&settings()).unwrap();
        let handle = connect(&service).await;

        let event = service
            .acquire_operation_complete_event(handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!event.is_signaled());

        service
            .request(PalmaRequest::SetFrModeType {
                handle,
                fr_mode: PalmaFrModeType::B02,
            })
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), event.wait())
            .await
            .unwrap();

        assert_eq!(
            service
                .request(PalmaRequest::GetOperationInfo { handle })
                .await
                .unwrap(),
            PalmaResponse::OperationInfo {
                operation: PalmaOperationType::SetFrModeType,
                result: ResultCode::PALMA_SUCCESS,
                data: Vec::new(),
            }
        );

        service
            .request(PalmaRequest::Release { handle })
            .await
            .unwrap();
        assert_eq!(
            service
                .request(PalmaRequest::GetOperationInfo { handle })
                .await
                .unwrap(),
            PalmaResponse::from(PalmaError::InvalidHandle)
        );
        assert!(service
            .acquire_operation_complete_event(handle)
            .await
            .unwrap()
            .is_err());

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_wave_entry_request_bounds() {
        let service = PalmaService::spawn(&settings()).unwrap();
        let handle = connect(&service).await;

        let response = service
            .request(PalmaRequest::WriteWaveEntry {
                handle,
                wave_set: PalmaWaveSet::Small,
                index: 0,
                address: 0x4000,
                data: vec![0; 4],
                size: 8,
            })
            .await
            .unwrap();
        assert_eq!(response, PalmaResponse::from(PalmaError::InvalidParameters));

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_database_version_payload() {
        let service = PalmaService::spawn(&settings()).unwrap();
        let handle = connect(&service).await;

        service
            .request(PalmaRequest::SetDataBaseIdentificationVersion { handle, version: 7 })
            .await
            .unwrap();
        service
            .request(PalmaRequest::GetDataBaseIdentificationVersion { handle })
            .await
            .unwrap();
        let response = service
            .request(PalmaRequest::GetOperationInfo { handle })
            .await
            .unwrap();
        assert_eq!(
            response,
            PalmaResponse::OperationInfo {
                operation: PalmaOperationType::ReadDataBaseIdentificationVersion,
                result: ResultCode::PALMA_SUCCESS,
                data: vec![7],
            }
        );

        assert_eq!(
            service
                .request(PalmaRequest::GetBluetoothAddress { handle })
                .await
                .unwrap(),
            PalmaResponse::BluetoothAddress {
                address: [1, 2, 3, 4, 5, 6]
            }
        );

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_incapable_npad_reports_not_paired() {
        let host: Arc<dyn PeripheralHost> = Arc::new(EmulatedHost::new([NpadId::Player2]));
        let service = PalmaService::spawn_with_host(&settings(), host).unwrap();

        let handle = ConnectionHandle {
            npad_id: 0,
            generation: 1,
        };
        assert_eq!(
            service
                .request(PalmaRequest::GetConnectionHandle { npad_id: 0 })
                .await
                .unwrap(),
            PalmaResponse::Handle { handle }
        );
        assert_eq!(
            service
                .request(PalmaRequest::Initialize { handle })
                .await
                .unwrap(),
            PalmaResponse::from(PalmaError::NotPaired)
        );

        service.shutdown().await.unwrap();
    }

    #[test]
    fn test_request_json_shape() {
        let request: PalmaRequest = serde_json::from_str(
            r#"{ "command": "set_fr_mode_type", "handle": { "npad_id": 0, "generation": 1 }, "fr_mode": "B02" }"#,
        )
        .unwrap();
        assert!(matches!(
            request,
            PalmaRequest::SetFrModeType {
                fr_mode: PalmaFrModeType::B02,
                ..
            }
        ));

        let json = serde_json::to_value(PalmaResponse::from(PalmaError::InvalidHandle)).unwrap();
        assert_eq!(json["kind"], "error");
        assert_eq!(json["error"], "InvalidHandle");
    }
}
