use std::{
    collections::VecDeque,
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use common::protocol::FramebufferInfo;
use log::info;

use crate::thread_tools::JoiningThread;

const STAGE_COUNT: usize = 3;

/// Wherever the mapped pixels go: an IPC pipe to the remote viewer in
/// production, a collector in tests.
pub trait FrameConsumer: Send + 'static {
    fn send_frame(&mut self, info: &FramebufferInfo, data: &[u8]) -> bool;
}

struct Stage {
    info: FramebufferInfo,
    data: Vec<u8>,
}

#[derive(Default)]
struct Queues {
    idle: Vec<Stage>,
    ready: VecDeque<Stage>,
}

struct DisplayShared {
    queues: Mutex<Queues>,
    wake: Condvar,
    stop: AtomicBool,
}

/// Live view of one named channel for a remote consumer. The render side
/// stages up to three frames back to back; a background thread owns the
/// send loop. Failed sends return their stage to the idle queue, nothing
/// leaks.
pub struct RemoteDisplay {
    name: String,
    shared: Arc<DisplayShared>,
    send_thread: JoiningThread,
}

impl RemoteDisplay {
    pub fn new(name: &str, mut consumer: impl FrameConsumer) -> Self {
        let shared = Arc::new(DisplayShared {
            queues: Mutex::new(Queues {
                idle: (0..STAGE_COUNT)
                    .map(|_| Stage {
                        info: FramebufferInfo {
                            width: 0,
                            height: 0,
                            line_size: 0,
                        },
                        data: Vec::new(),
                    })
                    .collect(),
                ready: VecDeque::new(),
            }),
            wake: Condvar::new(),
            stop: AtomicBool::new(false),
        });

        let mut send_thread = JoiningThread::new();
        {
            let shared = shared.clone();
            let gate = {
                let shared = shared.clone();
                move || {
                    shared.stop.store(true, Ordering::Release);
                    shared.wake.notify_all();
                }
            };

            send_thread.run_with_gate(gate, move || {
                loop {
                    let stage = {
                        let mut queues = lock(&shared.queues);
                        loop {
                            if shared.stop.load(Ordering::Acquire) {
                                return;
                            }
                            if let Some(stage) = queues.ready.pop_front() {
                                break stage;
                            }
                            queues = match shared.wake.wait(queues) {
                                Ok(queues) => queues,
                                Err(poisoned) => poisoned.into_inner(),
                            };
                        }
                    };

                    let sent = consumer.send_frame(&stage.info, &stage.data);
                    if !sent {
                        info!("[RemoteDisplay]: send failed, frame dropped");
                    }

                    lock(&shared.queues).idle.push(stage);
                }
            });
        }

        Self {
            name: name.to_owned(),
            shared,
            send_thread,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Called on the render thread after mapping the staging surface.
    /// Dropping the frame when all stages are busy keeps the render thread
    /// from ever blocking on the consumer.
    pub fn submit_frame(&self, info: FramebufferInfo, data: &[u8]) -> bool {
        let mut queues = lock(&self.shared.queues);

        let Some(mut stage) = queues.idle.pop() else {
            return false;
        };

        stage.info = info;
        stage.data.clear();
        stage.data.extend_from_slice(data);
        queues.ready.push_back(stage);

        drop(queues);
        self.shared.wake.notify_one();
        true
    }
}

impl Drop for RemoteDisplay {
    fn drop(&mut self) {
        self.send_thread.join();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[derive(Clone)]
    struct Collector {
        frames: Arc<Mutex<Vec<(FramebufferInfo, Vec<u8>)>>>,
        fail: Arc<AtomicBool>,
    }

    impl FrameConsumer for Collector {
        fn send_frame(&mut self, info: &FramebufferInfo, data: &[u8]) -> bool {
            if self.fail.load(Ordering::Acquire) {
                return false;
            }

            self.frames.lock().unwrap().push((*info, data.to_vec()));
            true
        }
    }

    fn info(width: u32) -> FramebufferInfo {
        FramebufferInfo {
            width,
            height: 1,
            line_size: width * 4,
        }
    }

    #[test]
    fn frames_reach_the_consumer() {
        let collector = Collector {
            frames: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(AtomicBool::new(false)),
        };
        let frames = collector.frames.clone();

        let display = RemoteDisplay::new("notifications", collector);

        for index in 0..10u32 {
            while !display.submit_frame(info(index + 1), &[index as u8; 4]) {
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        for _ in 0..100 {
            if frames.lock().unwrap().len() == 10 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(frames.lock().unwrap().len(), 10);
    }

    #[test]
    fn failed_sends_recycle_their_stage() {
        let collector = Collector {
            frames: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(AtomicBool::new(true)),
        };
        let fail = collector.fail.clone();
        let frames = collector.frames.clone();

        let display = RemoteDisplay::new("streaming", collector);

        // Every send fails, but stages keep coming back so submits keep
        // finding room.
        for _ in 0..20 {
            while !display.submit_frame(info(2), &[0u8; 8]) {
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        fail.store(false, Ordering::Release);
        while !display.submit_frame(info(3), &[1u8; 12]) {
            std::thread::sleep(Duration::from_millis(5));
        }

        for _ in 0..100 {
            if !frames.lock().unwrap().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(frames.lock().unwrap().len(), 1);
    }

    #[test]
    fn drop_joins_the_send_thread() {
        let collector = Collector {
            frames: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(AtomicBool::new(false)),
        };

        let display = RemoteDisplay::new("highlighter", collector);
        display.submit_frame(info(1), &[0u8; 4]);
        drop(display);
    }
}
