use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
    task::JoinHandle,
};

// Frames are a u32 little-endian length followed by the payload. Control
// payloads are UTF-8 JSON with a terminating NUL; framebuffer and audio
// payloads are raw bytes. Message boundaries are always preserved.

const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("failed to create pipe \"{name}\": {source}")]
    Bind {
        name: String,
        source: std::io::Error,
    },
    #[error("failed to open pipe \"{name}\": {source}")]
    Open {
        name: String,
        source: std::io::Error,
    },
    #[error("no async runtime available for the pipe worker")]
    NoRuntime,
}

/// Payload notifications delivered to an [`IpcServer`] handler. A single
/// `Disconnected` is delivered when the peer goes away; the server is dead
/// afterwards and has to be recreated by whoever owns it.
#[derive(Debug)]
pub enum ServerEvent {
    Message(Bytes),
    Disconnected,
}

pub struct IpcServer {
    name: String,
    task: JoinHandle<()>,
}

impl IpcServer {
    /// Starts a pipe server accepting a single client. `buffer_hint`
    /// pre-allocates the receive buffer when the expected message size is
    /// known up front.
    pub fn start<F>(name: &str, buffer_hint: Option<usize>, on_message: F) -> Result<Self, IpcError>
    where
        F: FnMut(ServerEvent) + Send + 'static,
    {
        let listener = platform::bind(name).map_err(|source| IpcError::Bind {
            name: name.to_owned(),
            source,
        })?;

        let handle = tokio::runtime::Handle::try_current().map_err(|_| IpcError::NoRuntime)?;
        let task = handle.spawn(serve(listener, buffer_hint, on_message));

        Ok(Self {
            name: name.to_owned(),
            task,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve<F>(mut listener: platform::Listener, buffer_hint: Option<usize>, mut on_message: F)
where
    F: FnMut(ServerEvent) + Send + 'static,
{
    let mut stream = match listener.accept().await {
        Ok(stream) => stream,
        Err(err) => {
            warn!("[Ipc]: accept failed: {err:?}");
            on_message(ServerEvent::Disconnected);
            return;
        }
    };

    // One client per server lifetime: release the listen endpoint now so a
    // restarted instance can bind the same name without racing this one.
    drop(listener);

    let mut buffer = BytesMut::with_capacity(buffer_hint.unwrap_or(4096));

    loop {
        match read_frame(&mut stream, &mut buffer).await {
            Ok(Some(message)) => on_message(ServerEvent::Message(message)),
            Ok(None) => {
                debug!("[Ipc]: peer closed the pipe");
                on_message(ServerEvent::Disconnected);
                return;
            }
            Err(err) => {
                warn!("[Ipc]: read failed: {err:?}");
                on_message(ServerEvent::Disconnected);
                return;
            }
        }
    }
}

/// Best-effort pipe client. `write` reports false instead of raising so
/// callers can decide between dropping (renderer events) and queueing
/// (capture host events).
pub struct IpcClient {
    stream: Mutex<Option<platform::ClientStream>>,
}

impl IpcClient {
    pub fn disconnected() -> Self {
        Self {
            stream: Mutex::new(None),
        }
    }

    pub async fn open(name: &str) -> Result<Self, IpcError> {
        let stream = platform::connect(name)
            .await
            .map_err(|source| IpcError::Open {
                name: name.to_owned(),
                source,
            })?;

        Ok(Self {
            stream: Mutex::new(Some(stream)),
        })
    }

    /// Reconnects this handle in place, dropping any previous connection.
    pub async fn reopen(&self, name: &str) -> bool {
        let stream = match platform::connect(name).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("[Ipc]: failed to open pipe \"{name}\": {err:?}");
                return false;
            }
        };

        let mut guard = self.stream.lock().await;
        *guard = Some(stream);
        true
    }

    pub async fn is_open(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    pub async fn write(&self, data: &[u8]) -> bool {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return false;
        };

        if let Err(err) = write_frame(stream, data).await {
            warn!("[Ipc]: write failed: {err:?}");
            *guard = None;
            return false;
        }

        true
    }

    pub async fn close(&self) {
        let mut guard = self.stream.lock().await;
        *guard = None;
    }
}

async fn read_frame<S>(stream: &mut S, buffer: &mut BytesMut) -> std::io::Result<Option<Bytes>>
where
    S: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    match stream.read_exact(&mut len).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("message of {len} bytes exceeds the frame limit"),
        ));
    }

    buffer.resize(len, 0);
    stream.read_exact(&mut buffer[..]).await?;

    Ok(Some(buffer.split().freeze()))
}

async fn write_frame<S>(stream: &mut S, data: &[u8]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&(data.len() as u32).to_le_bytes()).await?;
    stream.write_all(data).await?;
    stream.flush().await
}

#[cfg(unix)]
mod platform {
    use std::path::PathBuf;

    use tokio::net::{UnixListener, UnixStream};

    pub type ServerStream = UnixStream;
    pub type ClientStream = UnixStream;

    pub struct Listener {
        inner: UnixListener,
        path: PathBuf,
    }

    fn pipe_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{name}.pipe"))
    }

    pub fn bind(name: &str) -> std::io::Result<Listener> {
        let path = pipe_path(name);
        // A previous instance under the same name may have left its socket
        // file behind.
        let _ = std::fs::remove_file(&path);

        Ok(Listener {
            inner: UnixListener::bind(&path)?,
            path,
        })
    }

    impl Listener {
        pub async fn accept(&mut self) -> std::io::Result<ServerStream> {
            let (stream, _) = self.inner.accept().await?;
            Ok(stream)
        }
    }

    impl Drop for Listener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    pub async fn connect(name: &str) -> std::io::Result<ClientStream> {
        UnixStream::connect(pipe_path(name)).await
    }
}

#[cfg(windows)]
mod platform {
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    pub type ServerStream = NamedPipeServer;
    pub type ClientStream = NamedPipeClient;

    pub struct Listener {
        instance: Option<NamedPipeServer>,
    }

    fn pipe_path(name: &str) -> String {
        format!(r"\\.\pipe\{name}")
    }

    pub fn bind(name: &str) -> std::io::Result<Listener> {
        let instance = ServerOptions::new()
            .first_pipe_instance(true)
            .create(pipe_path(name))?;

        Ok(Listener {
            instance: Some(instance),
        })
    }

    impl Listener {
        pub async fn accept(&mut self) -> std::io::Result<ServerStream> {
            let instance = self.instance.take().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "pipe already accepted")
            })?;
            instance.connect().await?;
            Ok(instance)
        }
    }

    pub async fn connect(name: &str) -> std::io::Result<ClientStream> {
        ClientOptions::new().open(pipe_path(name))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };

    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("IpcTest-{tag}-{}", std::process::id())
    }

    #[tokio::test]
    async fn preserves_message_boundaries_and_order() {
        let name = unique_name("order");
        let received = Arc::new(Mutex::new(Vec::new()));

        let _server = {
            let received = received.clone();
            IpcServer::start(&name, None, move |event| {
                if let ServerEvent::Message(message) = event {
                    received.lock().unwrap().push(message.to_vec());
                }
            })
            .unwrap()
        };

        let client = IpcClient::open(&name).await.unwrap();
        assert!(client.write(b"first").await);
        assert!(client.write(b"").await);
        assert!(client.write(b"third").await);

        tokio::time::sleep(Duration::from_millis(100)).await;

        let received = received.lock().unwrap();
        assert_eq!(
            *received,
            vec![b"first".to_vec(), Vec::new(), b"third".to_vec()]
        );
    }

    #[tokio::test]
    async fn reports_disconnect_once() {
        let name = unique_name("disconnect");
        let disconnected = Arc::new(AtomicBool::new(false));

        let _server = {
            let disconnected = disconnected.clone();
            IpcServer::start(&name, Some(1024), move |event| {
                if let ServerEvent::Disconnected = event {
                    disconnected.store(true, Ordering::Release);
                }
            })
            .unwrap()
        };

        let client = IpcClient::open(&name).await.unwrap();
        assert!(client.write(b"ping").await);
        client.close().await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(disconnected.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn write_fails_when_not_connected() {
        let client = IpcClient::disconnected();
        assert!(!client.write(b"dropped").await);
    }
}
