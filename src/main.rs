use clap::Parser;
use color_eyre::Result;
use controller_bridge::{cli, config::Config, logging, serial::serial_port::SerialTransport, server};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let mut cli = cli::Cli::parse();

    if let Some(command) = cli.command.take() {
        cli::handle_command(command)?;

        return Ok(());
    }

    let file_logging = cli
        .log_dir
        .clone()
        .map(|log_dir| (cli.file_log_level, log_dir));
    logging::init(cli.log_level, file_logging).await;

    let config = if let Some(config_path) = &cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };
    let config = cli.apply(config);

    let transport = SerialTransport::new(config.serial.flow_control);
    let port = config.websocket.port;

    #[cfg(unix)]
    let mut hangup = signal(SignalKind::hangup())?;

    #[cfg(unix)]
    let hung_up = hangup.recv();

    #[cfg(not(unix))]
    let hung_up = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hung_up => {
            info!("Told to hang up, quitting")
        }
        result = server::run_on_port(config, transport, port) => {
            error!("Server returned");
            result?;
            return Err(color_eyre::eyre::eyre!("Server stopped unexpectedly"));
        }
    }

    Ok(())
}
