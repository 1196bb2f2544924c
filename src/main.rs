use anyhow::Context;
use palma_controller::domain::models::{
    ConnectionHandle, NpadId, PalmaFrModeType, PalmaWaveSet,
};
use palma_controller::domain::settings::SettingsService;
use palma_controller::infrastructure::logging;
use palma_controller::{PalmaRequest, PalmaResponse, PalmaService};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

const USAGE: &str = "usage: palma_controller [--settings <settings.json>] [script.json]";

#[derive(Serialize)]
struct Step<'a> {
    step: usize,
    request: &'a PalmaRequest,
    response: PalmaResponse,
    event_signaled: bool,
}

struct Args {
    settings: Option<PathBuf>,
    script: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        settings: None,
        script: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--settings" => {
                let path = iter.next().context(USAGE)?;
                args.settings = Some(PathBuf::from(path));
            }
            "-h" | "--help" => anyhow::bail!(USAGE),
            _ if args.script.is_none() => args.script = Some(PathBuf::from(arg)),
            _ => anyhow::bail!(USAGE),
        }
    }
    Ok(args)
}

/// Acquire, configure, poll, then show that a released handle stays dead
fn demo_script() -> Vec<PalmaRequest> {
    let npad_id = NpadId::Player1.raw();
    let handle = ConnectionHandle {
        npad_id,
        generation: 1,
    };
    vec![
        PalmaRequest::GetConnectionHandle { npad_id },
        PalmaRequest::Initialize { handle },
        PalmaRequest::SetFrModeType {
            handle,
            fr_mode: PalmaFrModeType::B02,
        },
        PalmaRequest::GetOperationInfo { handle },
        PalmaRequest::WriteRgbLedPatternEntry {
            handle,
            pattern: 0xAB,
        },
        PalmaRequest::ReadStep { handle },
        PalmaRequest::GetOperationInfo { handle },
        PalmaRequest::WriteWaveEntry {
            handle,
            wave_set: PalmaWaveSet::Small,
            index: 0,
            address: 0x8000_0000,
            data: vec![0x11; 8],
            size: 16,
        },
        PalmaRequest::GetOperationResult { handle },
        PalmaRequest::Pair { handle },
        PalmaRequest::SetIsAllConnectable { enabled: true },
        PalmaRequest::Release { handle },
        PalmaRequest::GetOperationInfo { handle },
    ]
}

fn load_script(path: &PathBuf) -> anyhow::Result<Vec<PalmaRequest>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse script {}", path.display()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;

    let settings_service = match args.settings {
        Some(path) => SettingsService::load_from(path),
        None => SettingsService::new()?,
    };
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting Palma controller stub");
    info!("Settings loaded from {}", settings_service.path().display());

    let requests = match &args.script {
        Some(path) => load_script(path)?,
        None => demo_script(),
    };

    let service = PalmaService::spawn(&settings.palma)?;
    let mut event = None;

    for (step, request) in requests.iter().enumerate() {
        let response = service.request(request.clone()).await?;

        if let PalmaResponse::Handle { handle } = &response {
            match service.acquire_operation_complete_event(*handle).await? {
                Ok(readable) => event = Some(readable),
                Err(e) => warn!("Could not acquire completion event: {}", e),
            }
        }

        // The guest consumes the signal when it observes it
        let event_signaled = event.as_ref().is_some_and(|e| {
            let signaled = e.is_signaled();
            e.clear();
            signaled
        });

        let line = serde_json::to_string(&Step {
            step,
            request,
            response,
            event_signaled,
        })?;
        println!("{}", line);
    }

    service.shutdown().await?;
    info!("Palma controller stub finished");
    Ok(())
}
