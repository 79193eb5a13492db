//! main.rs — Vigil simulator entry point
//!
//! Runs the process-wide simulation service plus a control server for
//! dashboards:
//!   1. GET /health: liveness
//!   2. GET /state:  latest snapshot (null before the first run)
//!   3. GET /ws:     relays `simulation:updated` / `simulation:stopped` live and
//!                    accepts start/stop/state commands
//!
//! Every bus message is forwarded into a broadcast channel by one bus
//! subscriber; each WebSocket client drains its own receiver.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use vigil_sim::{config, scenarios, SimulationMessage, SimulationService, TOPIC_STOPPED, TOPIC_UPDATED};
use vigil_types::{SimulationConfig, SimulationState};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vigil-sim", about = "CCTV/network operational health simulator")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
    /// Control server port (overrides [server] ctrlPort)
    #[arg(long)]
    ctrl_port: Option<u16>,
    /// Add a built-in scenario preset to the config (repeatable)
    #[arg(long)]
    preset: Vec<String>,
    /// Start a run immediately instead of waiting for a `start` command
    #[arg(long)]
    autostart: bool,
}

// ── Shared state ──────────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    service: &'static SimulationService,
    /// Config used by `start` commands that do not bring their own
    base: SimulationConfig,
    relay: broadcast::Sender<String>,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil_sim=info".into()),
        )
        .init();

    let args = Args::parse();

    let file = config::load_file(&args.config)?;
    let mut base = file.simulation;
    for name in &args.preset {
        let scenario = scenarios::preset(name).ok_or_else(|| {
            anyhow!("unknown preset '{name}' (known: {})", scenarios::preset_names().join(", "))
        })?;
        base.scenarios.push(scenario);
    }
    config::validate(&base)?;

    info!(
        "🎥 Vigil simulator starting: {}s runs, {} scenarios, network {:?}",
        base.duration,
        base.scenarios.len(),
        base.network_condition
    );

    let service = SimulationService::global();
    let (relay, _) = broadcast::channel::<String>(64);
    bridge_bus(service, relay.clone());

    if args.autostart {
        service.start_simulation(base.clone())?;
    }

    let ctrl_port = args.ctrl_port.unwrap_or(file.server.ctrl_port);
    let ctrl_addr = format!("0.0.0.0:{ctrl_port}");
    info!("🖥  Control panel WebSocket at ws://{ctrl_addr}/ws");

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/state", get(state_handler))
        .route("/health", get(|| async { "vigil-sim ok" }))
        .with_state(AppState { service, base, relay })
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let listener = tokio::net::TcpListener::bind(&ctrl_addr)
        .await
        .with_context(|| format!("binding {ctrl_addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Bus → WebSocket relay ─────────────────────────────────────────────────────

fn bridge_bus(service: &SimulationService, relay: broadcast::Sender<String>) {
    for topic in [TOPIC_UPDATED, TOPIC_STOPPED] {
        let relay = relay.clone();
        service.on(topic, move |msg| {
            // No connected clients is not an error
            let _ = relay.send(message_json(msg).to_string());
            Ok(())
        });
    }
}

fn message_json(msg: &SimulationMessage) -> Value {
    match msg {
        SimulationMessage::Updated(state) => json!({ "type": "updated", "data": &**state }),
        SimulationMessage::Stopped(notice) => json!({ "type": "stopped", "data": notice }),
    }
}

fn state_json(service: &SimulationService) -> String {
    let state = service.get_state();
    json!({ "type": "state", "data": state.as_deref() }).to_string()
}

fn error_json(message: impl std::fmt::Display) -> String {
    json!({ "type": "error", "message": message.to_string() }).to_string()
}

// ── HTTP handlers ─────────────────────────────────────────────────────────────

async fn state_handler(State(app): State<AppState>) -> Json<Option<SimulationState>> {
    Json(app.service.get_state().map(|s| (*s).clone()))
}

async fn ws_handler(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, app))
}

async fn handle_ws(mut socket: WebSocket, app: AppState) {
    let mut updates = app.relay.subscribe();

    // Current state immediately on connect
    if socket.send(Message::Text(state_json(app.service))).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = updates.recv() => match msg {
                Ok(text) => {
                    if socket.send(Message::Text(text)).await.is_err() { break; }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("WebSocket client lagging, skipped {n} messages");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(cmd))) => {
                    let reply = handle_command(&app, &cmd);
                    if socket.send(Message::Text(reply)).await.is_err() { break; }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Handle commands from a dashboard.
/// Commands are JSON: { "cmd": "...", "args": {...} }
fn handle_command(app: &AppState, raw: &str) -> String {
    let v: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return error_json(format!("malformed command: {e}")),
    };
    let cmd = v["cmd"].as_str().unwrap_or("");
    match cmd {
        "start" => {
            let mut config = match v["args"].get("config") {
                Some(raw_cfg) => match serde_json::from_value::<SimulationConfig>(raw_cfg.clone()) {
                    Ok(c) => c,
                    Err(e) => return error_json(format!("invalid config: {e}")),
                },
                None => app.base.clone(),
            };
            if let Some(name) = v["args"]["preset"].as_str() {
                match scenarios::preset(name) {
                    Some(s) => config.scenarios.push(s),
                    None => return error_json(format!("unknown preset '{name}'")),
                }
            }
            match app.service.start_simulation(config) {
                Ok(run_id) => json!({ "type": "started", "runId": run_id }).to_string(),
                Err(e) => error_json(e),
            }
        }
        "stop" => match app.service.stop_simulation() {
            Ok(()) => json!({ "type": "ack", "cmd": "stop" }).to_string(),
            Err(e) => error_json(e),
        },
        "state" => state_json(app.service),
        "presets" => json!({ "type": "presets", "data": scenarios::preset_names() }).to_string(),
        _ => {
            warn!("Unknown control command: {cmd}");
            error_json(format!("unknown command '{cmd}'"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use vigil_sim::Seeded;

    fn app() -> AppState {
        let service: &'static SimulationService =
            Box::leak(Box::new(SimulationService::with_entropy(Arc::new(Seeded(3)))));
        let (relay, _) = broadcast::channel(16);
        let base = SimulationConfig { duration: 100.0, event_frequency: 0.0, ..Default::default() };
        AppState { service, base, relay }
    }

    fn reply(app: &AppState, raw: &str) -> Value {
        serde_json::from_str(&handle_command(app, raw)).unwrap()
    }

    #[test]
    fn malformed_and_unknown_commands_get_error_replies() {
        let app = app();
        assert_eq!(reply(&app, "{not json")["type"], "error");
        let unknown = reply(&app, r#"{"cmd":"rewind"}"#);
        assert_eq!(unknown["type"], "error");
        assert!(unknown["message"].as_str().unwrap().contains("rewind"));
    }

    #[test]
    fn state_and_presets_need_no_run() {
        let app = app();
        let state = reply(&app, r#"{"cmd":"state"}"#);
        assert_eq!(state["type"], "state");
        assert!(state["data"].is_null());

        let presets = reply(&app, r#"{"cmd":"presets"}"#);
        assert_eq!(presets["type"], "presets");
        assert_eq!(presets["data"].as_array().unwrap().len(), scenarios::preset_names().len());
    }

    #[tokio::test(start_paused = true)]
    async fn start_stop_round_trip() {
        let app = app();
        let started = reply(&app, r#"{"cmd":"start","args":{"preset":"storm"}}"#);
        assert_eq!(started["type"], "started");
        let run_id = app.service.current_run().unwrap();
        assert_eq!(started["runId"], run_id.to_string());

        let again = reply(&app, r#"{"cmd":"start"}"#);
        assert_eq!(again["type"], "error");
        assert_eq!(app.service.current_run(), Some(run_id));

        let state = reply(&app, r#"{"cmd":"state"}"#);
        assert_eq!(state["data"]["isRunning"], true);
        assert_eq!(state["data"]["runId"], run_id.to_string());

        assert_eq!(reply(&app, r#"{"cmd":"stop"}"#)["type"], "ack");
        assert_eq!(reply(&app, r#"{"cmd":"stop"}"#)["type"], "error");
        assert_eq!(reply(&app, r#"{"cmd":"state"}"#)["data"]["isRunning"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_start_arguments_never_start_a_run() {
        let app = app();
        let unknown = reply(&app, r#"{"cmd":"start","args":{"preset":"meteor"}}"#);
        assert_eq!(unknown["type"], "error");

        let shape = reply(&app, r#"{"cmd":"start","args":{"config":{"duration":"long"}}}"#);
        assert_eq!(shape["type"], "error");

        let zero = reply(&app, r#"{"cmd":"start","args":{"config":{"duration":0}}}"#);
        assert_eq!(zero["type"], "error");
        assert!(app.service.current_run().is_none());

        let ok = reply(&app, r#"{"cmd":"start","args":{"config":{"duration":5,"eventFrequency":0}}}"#);
        assert_eq!(ok["type"], "started");
        app.service.stop_simulation().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn bus_messages_reach_the_relay_as_json() {
        let app = app();
        let mut rx = app.relay.subscribe();
        bridge_bus(app.service, app.relay.clone());

        app.service
            .start_simulation(SimulationConfig { duration: 2.0, event_frequency: 0.0, ..Default::default() })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        let first: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(first["type"], "updated");
        assert_eq!(first["data"]["elapsed"], 1.0);
        let second: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(second["data"]["elapsed"], 2.0);
        let stopped: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(stopped["type"], "stopped");
        assert_eq!(stopped["data"]["reason"], "durationReached");
    }
}
