use std::{process::exit, sync::Arc};

use common::{
    config::Config,
    ipc::{IpcServer, ServerEvent},
    protocol::{CAPTURE_PIPE, CaptureCommand},
};
use log::{error, info, warn};
use simplelog::{ColorChoice, CombinedLogger, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

use crate::{
    controller::{RecordingController, signal_channel},
    events::{AnvilCommands, ForgeEvents},
    graph::standalone::StandaloneGraph,
    log_pipe::pipe_logger,
};

mod controller;
mod display;
mod encoders;
mod events;
mod forge;
mod graph;
mod log_pipe;
mod screenshot;
mod sources;
mod thread_tools;

const CONFIG_PATH: &str = "./capture_host.json";

enum RunMode {
    Standalone,
    Attached { forge_pid: u32, start_event: u64 },
}

fn parse_args(args: &[String]) -> Result<RunMode, (&'static str, i32)> {
    if args.len() <= 1 {
        return Err(("Started without arguments, exiting", -1));
    }

    if args[1] == "-standalone" {
        return Ok(RunMode::Standalone);
    }

    if args.len() <= 2 {
        return Err(("Not enough arguments for non-standalone", -4));
    }

    let forge_pid = args[1]
        .parse()
        .map_err(|_| ("Couldn't read PID from argv", -2))?;
    let start_event = args[2]
        .parse()
        .map_err(|_| ("Couldn't read event id from argv", -3))?;

    Ok(RunMode::Attached {
        forge_pid,
        start_event,
    })
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mode = match parse_args(&args) {
        Ok(mode) => mode,
        Err((message, code)) => {
            eprintln!("ERROR: {message}");
            exit(code);
        }
    };

    run(mode);
}

fn read_config() -> Config {
    match std::fs::read_to_string(CONFIG_PATH) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("invalid config at {CONFIG_PATH}: {err}, using defaults");
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

#[tokio::main]
async fn run(mode: RunMode) {
    let config = read_config();

    let (pipe, log_pipe) = pipe_logger(config.log.level_filter);

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(
            config.log.level_filter,
            simplelog::Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        pipe,
    ];

    if let Some(file_path) = &config.log.file_path {
        match std::fs::File::create(file_path) {
            Ok(file) => loggers.push(WriteLogger::new(
                config.log.level_filter,
                simplelog::Config::default(),
                file,
            )),
            Err(err) => eprintln!("failed to open log file '{file_path}': {err}"),
        }
    }

    if let Err(err) = CombinedLogger::init(loggers) {
        eprintln!("failed to init logger: {err}");
    }

    if let Err(err) = start(mode, config, log_pipe).await {
        error!("{err:?}");
    }
}

async fn start(
    mode: RunMode,
    config: Config,
    log_pipe: log_pipe::LogPipe,
) -> Result<(), anyhow::Error> {
    if matches!(mode, RunMode::Standalone) {
        info!("Running standalone");
    }

    let events = Arc::new(ForgeEvents::new());
    let anvil = Arc::new(AnvilCommands::new());

    let (signals_tx, signals_rx) = signal_channel();
    let graph = StandaloneGraph::new(signals_tx);

    let controller = RecordingController::new(
        graph,
        &config,
        events.clone(),
        anvil.clone(),
        log_pipe,
        signals_rx,
    );

    let (command_tx, command_rx) = unbounded_channel();
    tokio::spawn(controller.run(command_rx));

    start_command_server(command_tx)?;

    if let RunMode::Attached {
        forge_pid,
        start_event,
    } = mode
    {
        forge::signal_start_event(start_event);

        forge::wait_for_process_exit(forge_pid).await;
        info!("Forge exited, exiting");
        exit(0);
    }

    // Standalone: run until interrupted.
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }

    Ok(())
}

/// The `ForgeCrucible` command pipe, recreated after every disconnect.
fn start_command_server(commands: UnboundedSender<CaptureCommand>) -> Result<(), anyhow::Error> {
    let (restart_tx, mut restart_rx) = unbounded_channel::<()>();

    let create = move || {
        let commands = commands.clone();
        let restart_tx = restart_tx.clone();

        IpcServer::start(CAPTURE_PIPE, None, move |event| match event {
            ServerEvent::Message(data) => match CaptureCommand::parse(&data) {
                Ok(command) => {
                    let _ = commands.send(command);
                }
                Err(err) => warn!("command channel: {err}"),
            },
            ServerEvent::Disconnected => {
                info!("forge command connection closed");
                let _ = restart_tx.send(());
            }
        })
    };

    let mut server = Some(create()?);

    tokio::spawn(async move {
        while restart_rx.recv().await.is_some() {
            drop(server.take());

            match create() {
                Ok(new_server) => {
                    server = Some(new_server);
                    info!("{CAPTURE_PIPE} connection restarted");
                }
                Err(err) => error!("couldn't reopen {CAPTURE_PIPE}: {err}"),
            }
        }
    });

    Ok(())
}
