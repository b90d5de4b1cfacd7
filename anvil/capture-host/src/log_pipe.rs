use log::{LevelFilter, Log, Metadata, Record};
use simplelog::{Config, SharedLogger};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

use common::ipc::IpcClient;

// Log lines produced before Forge tells us its log pipe name are held here,
// then replayed once on connect. Bounded so a Forge that never connects
// cannot grow the buffer forever.
const STARTUP_BUFFER_CAP: usize = 1024;

enum LogMessage {
    Line(String),
    Connect(String),
}

/// Handle used by the command layer to attach the log pipe.
#[derive(Clone)]
pub struct LogPipe {
    tx: UnboundedSender<LogMessage>,
}

impl LogPipe {
    pub fn connect(&self, pipe_name: &str) {
        let _ = self.tx.send(LogMessage::Connect(pipe_name.to_owned()));
    }
}

/// `simplelog`-compatible logger that ships every line to the Forge log
/// pipe. Must be constructed inside the async runtime.
pub struct PipeLogger {
    level: LevelFilter,
    config: Config,
    tx: UnboundedSender<LogMessage>,
}

pub fn pipe_logger(level: LevelFilter) -> (Box<PipeLogger>, LogPipe) {
    let (tx, mut rx) = unbounded_channel();

    tokio::spawn(async move {
        let client = IpcClient::disconnected();
        let mut startup_buffer: Option<Vec<String>> = Some(Vec::new());

        while let Some(message) = rx.recv().await {
            match message {
                LogMessage::Line(line) => {
                    let mut line_bytes = line.clone().into_bytes();
                    line_bytes.push(0);

                    if client.write(&line_bytes).await {
                        continue;
                    }

                    if let Some(buffer) = &mut startup_buffer
                        && buffer.len() < STARTUP_BUFFER_CAP
                    {
                        buffer.push(line);
                    }
                }
                LogMessage::Connect(name) => {
                    if !client.reopen(&name).await {
                        continue;
                    }

                    if let Some(buffer) = startup_buffer.take() {
                        for line in buffer {
                            let mut line_bytes = line.into_bytes();
                            line_bytes.push(0);
                            let _ = client.write(&line_bytes).await;
                        }
                    }
                }
            }
        }
    });

    (
        Box::new(PipeLogger {
            level,
            config: Config::default(),
            tx: tx.clone(),
        }),
        LogPipe { tx },
    )
}

impl Log for PipeLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let _ = self.tx.send(LogMessage::Line(format!(
            "[{}] {}",
            record.level(),
            record.args()
        )));
    }

    fn flush(&self) {}
}

impl SharedLogger for PipeLogger {
    fn level(&self) -> LevelFilter {
        self.level
    }

    fn config(&self) -> Option<&Config> {
        Some(&self.config)
    }

    fn as_log(self: Box<Self>) -> Box<dyn Log> {
        self
    }
}
