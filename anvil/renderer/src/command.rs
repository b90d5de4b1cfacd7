use std::sync::{Arc, Mutex};

use common::{
    ipc::{IpcError, IpcServer, ServerEvent},
    protocol::{IndicatorKind, RendererCommand, renderer_pipe_name},
};
use log::{info, warn};
use tokio::sync::Notify;

use crate::{input::hooks::CursorHandle, overlay::OverlayInner};

/// Command pipe plus the worker that reopens it after a disconnect.
pub(crate) struct CommandConnection {
    server: Mutex<Option<IpcServer>>,
    restart: Arc<Notify>,
}

impl CommandConnection {
    pub(crate) fn new() -> Self {
        Self {
            server: Mutex::new(None),
            restart: Arc::new(Notify::new()),
        }
    }
}

/// Opens the command pipe and spawns the restart worker.
pub(crate) fn start(inner: &Arc<OverlayInner>) -> Result<(), IpcError> {
    start_server(inner)?;

    let restart = inner.command.restart.clone();
    let weak = Arc::downgrade(inner);

    inner.runtime().spawn(async move {
        loop {
            restart.notified().await;

            let Some(inner) = weak.upgrade() else {
                return;
            };

            match start_server(&inner) {
                Ok(()) => info!("[Command]: command connection restarted"),
                Err(err) => warn!("[Command]: restart failed: {err}"),
            }
        }
    });

    Ok(())
}

fn start_server(inner: &Arc<OverlayInner>) -> Result<(), IpcError> {
    let weak = Arc::downgrade(inner);

    let server = IpcServer::start(
        &renderer_pipe_name(inner.pid()),
        None,
        move |event| match event {
            ServerEvent::Message(data) => {
                if let Some(inner) = weak.upgrade() {
                    handle_command(&inner, &data);
                }
            }
            ServerEvent::Disconnected => {
                warn!("[Command]: command connection died");
                if let Some(inner) = weak.upgrade() {
                    handle_disconnect(&inner);
                }
            }
        },
    )?;

    *lock_server(inner) = Some(server);
    info!("[Command]: listening on {}", renderer_pipe_name(inner.pid()));
    Ok(())
}

/// Resets every piece of command-driven state, then asks the worker to
/// reopen the pipe. Safe to run more than once.
fn handle_disconnect(inner: &Arc<OverlayInner>) {
    inner.reset_for_restart();
    *lock_server(inner) = None;
    inner.command.restart.notify_one();
}

fn handle_command(inner: &Arc<OverlayInner>, data: &[u8]) {
    let command = match RendererCommand::parse(data) {
        Ok(command) => command,
        Err(err) => {
            warn!("[Command]: unable to process command: {err}");
            return;
        }
    };

    match command {
        RendererCommand::Indicator { indicator } => {
            let Some(kind) = IndicatorKind::from_command_name(&indicator) else {
                warn!("[Command]: got invalid indicator '{indicator}'");
                return;
            };

            if kind == IndicatorKind::Tutorial {
                lock(&inner.input).set_tutorial_lock(true);
            }

            lock(&inner.display).set(kind);
        }
        RendererCommand::DisableNativeIndicators { disable } => {
            inner.indicators.disable_indicators(disable);
        }
        RendererCommand::ForgeInfo { anvil_event } => {
            if anvil_event.is_empty() {
                warn!("[Command]: got empty anvil_event name via forge_info");
                return;
            }

            inner.events.connect(&anvil_event);
            inner.start_framebuffer_servers();
        }
        RendererCommand::UpdateSettings(settings) => {
            let input = lock(&inner.input);
            input.table.update(&settings);
            inner.indicators.set_hotkey_help(input.table.describe());
        }
        RendererCommand::SetCursor { cursor } => {
            let handle = if cursor == 0 {
                crate::input::hooks::DEFAULT_ARROW
            } else {
                CursorHandle(cursor as u64)
            };

            *lock(&inner.overlay_cursor) = handle;
        }
        RendererCommand::DismissOverlay { name } => {
            inner.dismiss_named_overlay(&name);
        }
        RendererCommand::StreamStatus => {}
        RendererCommand::UpdateForwardBufferIndicator { text } => {
            inner
                .indicators
                .update_forward_buffer_text(text.unwrap_or_default());
        }
    }
}

fn lock_server(inner: &OverlayInner) -> std::sync::MutexGuard<'_, Option<IpcServer>> {
    match inner.command.server.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
