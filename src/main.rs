use serde_json::json;
use std::process::ExitCode;
use std::sync::Arc;
use swiss_bracket_engine::{
    init_tracing, load_config, BracketError, BracketService, BroadcastNotifier, EngineConfig, Simulator,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

fn run_demo(service: &BracketService, config: &EngineConfig) -> Result<serde_json::Value, BracketError> {
    let event_id = config.demo_event_id;
    service.generate_bracket(event_id, &config.demo_entrants, Some(config.format))?;
    let report = Simulator::new(&config.demo_entrants, config.shuffle_seed).run(service, event_id)?;
    Ok(json!({
        "report": report,
        "bracket": service.get_bracket(event_id)?,
        "progression": service.get_progression(event_id)?,
    }))
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let _guard = init_tracing(&config);
    info!("Bracket engine starting");

    let notifier = Arc::new(BroadcastNotifier::new(config.notification_buffer));
    let mut rx = notifier.subscribe();
    let listener = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => debug!(?event, "bracket notification"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notification listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let service = BracketService::from_config(&config, notifier.clone());
    let result = run_demo(&service, &config);
    drop(service);
    drop(notifier);
    listener.await.ok();

    match result.and_then(|payload| {
        serde_json::to_string_pretty(&payload).map_err(|e| BracketError::Persistence(e.to_string()))
    }) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("demo failed: {e}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
