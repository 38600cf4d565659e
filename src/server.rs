use std::{net::SocketAddr, sync::Arc};

use axum::{http::StatusCode, response::IntoResponse, routing::get, Extension, Router};
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    config::Config,
    control_center::{ControlCenterHandle, Inform},
    error::Error,
    machine::MachineStatus,
    prober::Prober,
    scheduler::Scheduler,
    serial::ports::PortLister,
    session::SessionSettings,
    transport::Transport,
    version, websocket,
};

fn prober(config: &Config) -> Prober {
    let prober = Prober::new(
        config.serial.probe_timeout,
        config.serial.baud,
        &config.controller.device_type,
    );

    if config.controller.strict_allowlist {
        prober.with_allowlist(config.controller.allowlist.clone())
    } else {
        prober
    }
}

fn log_startup(config: &Config) {
    info!(
        baud = config.serial.baud,
        scan_every = ?config.serial.scan_interval,
        probe_timeout = ?config.serial.probe_timeout,
        "Serial scan config"
    );
    info!(
        routing = ?config.engines.routing,
        slots = ?config.engines.slots,
        "Engine slots"
    );

    if config.controller.strict_allowlist {
        info!(allowlist = ?config.controller.allowlist, "Expected controller device ids");
    } else {
        info!("Expected controller device ids: any");
    }
}

async fn refresh_machine_status(cc_handle: ControlCenterHandle, config: Config) {
    let mut interval = tokio::time::interval(config.status.machine_status_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        match tokio::task::spawn_blocking(MachineStatus::current).await {
            Ok(status) => cc_handle.inform(Inform::MachineStatus(status)),
            Err(e) => warn!(?e, "Could not build machine status"),
        }
    }
}

async fn run<T: Transport>(
    config: Config,
    transport: T,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) -> Result<(), Error> {
    config.validate()?;
    log_startup(&config);

    let cc_handle = ControlCenterHandle::new(&config);

    let scheduler = Scheduler::new(
        Arc::new(transport),
        PortLister::new(config.serial.exclude.clone()),
        prober(&config),
        cc_handle.clone(),
        config.engines.routing,
        SessionSettings {
            baud: config.serial.baud,
            log: config.serial.log,
            digest_window: config.serial.digest_window,
            digest_max_keys: config.serial.digest_max_keys,
            active_slots: config.engines.slots.clone(),
        },
        config.serial.scan_interval,
    )
    .with_pinned(config.engines.slot_table.keys().cloned().collect());
    let scheduler = tokio::spawn(scheduler.run().instrument(info_span!("Discovery")));

    let machine = tokio::spawn(
        refresh_machine_status(cc_handle.clone(), config.clone())
            .instrument(info_span!("Machine")),
    );

    let app = Router::new()
        .route("/ws", get(websocket::ws_handler))
        .route("/config", get(show_config))
        .route("/version", get(show_version))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Each websocket needs to be able to reach the control center
                .layer(Extension(cc_handle))
                .layer(Extension(Arc::new(config.clone()))),
        );

    let addr = SocketAddr::new(config.websocket.host, port.unwrap_or(0));
    let server = axum::Server::try_bind(&addr)
        .map_err(|e| Error::Bind {
            address: addr.to_string(),
            problem: e.to_string(),
        })?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            debug!("Nobody wanted to know the allocated port");
        }
    }

    info!("listening on ws://{addr}/ws");

    let served = server.await;

    scheduler.abort();
    machine.abort();

    served.map_err(|e| Error::InternalIssue(format!("Server stopped: {e}")))
}

/// Start the server on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port<T: Transport>(
    config: Config,
    transport: T,
    allocated_port: oneshot::Sender<u16>,
) -> Result<(), Error> {
    run(config, transport, None, Some(allocated_port)).await
}

/// Start the server on the given port.
pub async fn run_on_port<T: Transport>(
    config: Config,
    transport: T,
    port: u16,
) -> Result<(), Error> {
    run(config, transport, Some(port), None).await
}

async fn show_config(Extension(config): Extension<Arc<Config>>) -> impl IntoResponse {
    config
        .serialize_pretty()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn show_version() -> impl IntoResponse {
    format!("{}\n", version::server_version())
}
