use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use bytes::Bytes;
use common::{
    OverlayChannel,
    ipc::{IpcServer, ServerEvent},
    protocol::{FramebufferInfo, FramebufferReceiver, framebuffer_server_name},
};
use log::{info, warn};

// Names get a fresh sequence number on every restart so a stale browser
// can never write into a new server instance.
static RESTARTS: AtomicU32 = AtomicU32::new(0);

struct SharedFrame {
    died: AtomicBool,
    new_data: AtomicBool,
    slot: Mutex<Option<(FramebufferInfo, Bytes)>>,
}

/// One pixel stream from Forge's browser renderer. The IPC reader and the
/// render thread exchange at most one pending frame; an unconsumed frame is
/// silently replaced when a newer one lands.
pub struct FramebufferServer {
    channel: OverlayChannel,
    shared: Arc<SharedFrame>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    server: Option<IpcServer>,
    name: String,
}

impl FramebufferServer {
    pub fn new(channel: OverlayChannel) -> Self {
        Self {
            channel,
            shared: Arc::new(SharedFrame {
                died: AtomicBool::new(true),
                new_data: AtomicBool::new(false),
                slot: Mutex::new(None),
            }),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn channel(&self) -> OverlayChannel {
        self.channel
    }

    pub fn died(&self) -> bool {
        self.shared.died.load(Ordering::Acquire)
    }

    pub fn name(&self) -> String {
        lock(&self.inner).name.clone()
    }

    /// (Re)opens the pipe under a fresh sequence number. `buffer_hint` is
    /// the expected frame size when the back buffer dimensions are known.
    pub fn start(&self, pid: u32, buffer_hint: Option<usize>) -> bool {
        let mut inner = lock(&self.inner);

        let name = framebuffer_server_name(pid, RESTARTS.fetch_add(1, Ordering::AcqRel));

        let shared = self.shared.clone();
        let channel = self.channel;
        let mut receiver = FramebufferReceiver::new();

        let server = IpcServer::start(&name, buffer_hint, move |event| match event {
            ServerEvent::Message(data) => {
                if let Some(frame) = receiver.push(data) {
                    *lock(&shared.slot) = Some(frame);
                    shared.new_data.store(true, Ordering::Release);
                }
            }
            ServerEvent::Disconnected => {
                shared.died.store(true, Ordering::Release);
                warn!("[Framebuffer]: '{}' server died", channel.name());
            }
        });

        match server {
            Ok(server) => {
                self.shared.died.store(false, Ordering::Release);
                inner.name = name.clone();
                inner.server = Some(server);
                info!("[Framebuffer]: '{}' listening on {name}", channel.name());
                true
            }
            Err(err) => {
                warn!(
                    "[Framebuffer]: failed to start '{}' server: {err}",
                    channel.name()
                );
                self.shared.died.store(true, Ordering::Release);
                false
            }
        }
    }

    pub fn stop(&self) {
        let mut inner = lock(&self.inner);
        inner.server = None;
        self.shared.died.store(true, Ordering::Release);
        self.shared.new_data.store(false, Ordering::Release);
        *lock(&self.shared.slot) = None;
    }

    /// Hands the newest unconsumed frame to the render thread.
    pub fn take_frame(&self) -> Option<(FramebufferInfo, Bytes)> {
        if !self.shared.new_data.swap(false, Ordering::AcqRel) {
            return None;
        }

        lock(&self.shared.slot).take()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
