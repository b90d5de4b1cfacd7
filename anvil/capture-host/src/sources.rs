use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Instant,
};

use bytes::Bytes;
use common::{
    ipc::{IpcServer, ServerEvent},
    protocol::{AudioPacketHeader, FramebufferInfo, FramebufferReceiver},
};
use log::{info, warn};

static FRAMEBUFFER_RESTARTS: AtomicU32 = AtomicU32::new(0);

fn capture_framebuffer_name(seq: u32) -> String {
    format!("CrucibleFramebufferServer{}-{seq}", std::process::id())
}

fn monotonic_timestamp_ns() -> u64 {
    use std::sync::OnceLock;
    static EPOCH: OnceLock<Instant> = OnceLock::new();

    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Bgra,
}

/// Frame as handed to the video mix: always BGRA, full range, stamped at
/// receipt.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub info: FramebufferInfo,
    pub data: Bytes,
    pub format: PixelFormat,
    pub full_range: bool,
    pub timestamp_ns: u64,
}

pub trait VideoFrameSink: Send + Sync {
    fn output_video(&self, frame: VideoFrame);
}

struct FramebufferShared {
    died: AtomicBool,
}

/// Async-video source fed over its own pipe: header/payload pairs become
/// frames. The server restarts lazily whenever its name is queried while
/// dead.
pub struct FramebufferSource {
    sink: Arc<dyn VideoFrameSink>,
    shared: Arc<FramebufferShared>,
    inner: Mutex<FramebufferInner>,
}

#[derive(Default)]
struct FramebufferInner {
    server: Option<IpcServer>,
    name: String,
}

impl FramebufferSource {
    pub fn new(sink: Arc<dyn VideoFrameSink>) -> Self {
        let source = Self {
            sink,
            shared: Arc::new(FramebufferShared {
                died: AtomicBool::new(true),
            }),
            inner: Mutex::new(FramebufferInner::default()),
        };

        source.start_server();
        source
    }

    /// `get_server_name` query handler.
    pub fn server_name(&self) -> String {
        if self.shared.died.load(Ordering::Acquire) {
            self.start_server();
        }

        lock(&self.inner).name.clone()
    }

    fn start_server(&self) {
        let mut inner = lock(&self.inner);

        let name = capture_framebuffer_name(FRAMEBUFFER_RESTARTS.fetch_add(1, Ordering::AcqRel));

        let shared = self.shared.clone();
        let sink = self.sink.clone();
        let mut receiver = FramebufferReceiver::new();

        let server = IpcServer::start(&name, None, move |event| match event {
            ServerEvent::Message(data) => {
                if let Some((info, payload)) = receiver.push(data) {
                    sink.output_video(VideoFrame {
                        info,
                        data: payload,
                        format: PixelFormat::Bgra,
                        full_range: true,
                        timestamp_ns: monotonic_timestamp_ns(),
                    });
                }
            }
            ServerEvent::Disconnected => {
                shared.died.store(true, Ordering::Release);
                warn!("CrucibleFramebufferServer: died");
            }
        });

        match server {
            Ok(server) => {
                self.shared.died.store(false, Ordering::Release);
                inner.name = name;
                inner.server = Some(server);
            }
            Err(err) => warn!("CrucibleFramebufferServer: failed to start: {err}"),
        }
    }
}

/// A stream of PCM within the multiplexed pipe, identified by the u64
/// carried in every packet header.
pub trait AudioStreamSink: Send + Sync {
    /// Allocates a handle for a newly sighted stream id.
    fn add_stream(&self) -> u64;
    fn output_audio(&self, stream: u64, header: &AudioPacketHeader, pcm: &[u8], timestamp_ns: u64);
}

/// Demuxes audio packets by stream id onto per-stream handles.
pub struct AudioBufferSource {
    _server: Option<IpcServer>,
    name: String,
}

impl AudioBufferSource {
    /// `pipe_name` comes from the source settings; an empty name leaves
    /// the server unstarted.
    pub fn new(pipe_name: &str, sink: Arc<dyn AudioStreamSink>) -> Self {
        if pipe_name.is_empty() {
            return Self {
                _server: None,
                name: String::new(),
            };
        }

        let mut streams: HashMap<u64, u64> = HashMap::new();
        let name = pipe_name.to_owned();
        let server_name = name.clone();

        let server = IpcServer::start(pipe_name, None, move |event| {
            let ServerEvent::Message(data) = event else {
                warn!("CrucibleAudioBufferServer: died");
                return;
            };

            let Some((header, pcm)) = AudioPacketHeader::parse(&data) else {
                warn!("CrucibleAudioBufferServer: short packet on '{server_name}'");
                return;
            };

            let handle = *streams.entry(header.stream_id).or_insert_with(|| {
                let handle = sink.add_stream();
                info!(
                    "[AudioBufferSource '{server_name}']: adding new stream {} ({handle})",
                    header.stream_id
                );
                handle
            });

            sink.output_audio(handle, &header, pcm, monotonic_timestamp_ns());
        });

        Self {
            _server: server
                .inspect_err(|err| warn!("CrucibleAudioBufferServer: failed to start: {err}"))
                .ok(),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
