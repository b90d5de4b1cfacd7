use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{info, warn};

use crate::thread_tools::JoiningThread;

/// render → copy → stage, collapsed behind the graphics context that owns
/// the textures.
pub trait ScreenshotGraphics: Send + 'static {
    fn capture(&mut self, source: &str, cx: u32, cy: u32) -> Option<Vec<u8>>;
}

pub type ScreenshotCallback = Box<dyn FnOnce(bool, String) + Send>;

pub struct ScreenshotRequest {
    pub source: String,
    pub cx: u32,
    pub cy: u32,
    pub filename: String,
    pub callback: ScreenshotCallback,
}

struct ProviderShared<G: ScreenshotGraphics> {
    graphics: Mutex<G>,
    queue: Mutex<VecDeque<ScreenshotRequest>>,
    in_flight: AtomicBool,
}

/// Single-shot screenshot requests: one in flight, the rest queued FIFO.
/// The file write and the completion callback run on a worker thread.
pub struct ScreenshotProvider<G: ScreenshotGraphics> {
    shared: Arc<ProviderShared<G>>,
    worker: Mutex<JoiningThread>,
}

impl<G: ScreenshotGraphics> ScreenshotProvider<G> {
    pub fn new(graphics: G) -> Self {
        Self {
            shared: Arc::new(ProviderShared {
                graphics: Mutex::new(graphics),
                queue: Mutex::new(VecDeque::new()),
                in_flight: AtomicBool::new(false),
            }),
            worker: Mutex::new(JoiningThread::new()),
        }
    }

    pub fn request(&self, request: ScreenshotRequest) {
        lock(&self.shared.queue).push_back(request);

        if self.shared.in_flight.swap(true, Ordering::AcqRel) {
            // A worker is already draining the queue.
            return;
        }

        let shared = self.shared.clone();
        let mut worker = lock(&self.worker);
        worker.run(move || {
            loop {
                let Some(request) = lock(&shared.queue).pop_front() else {
                    shared.in_flight.store(false, Ordering::Release);

                    // A request may have slipped in between the empty pop
                    // and the flag clearing; reclaim it instead of
                    // stranding the queue.
                    if !lock(&shared.queue).is_empty()
                        && !shared.in_flight.swap(true, Ordering::AcqRel)
                    {
                        continue;
                    }
                    return;
                };

                let pixels = lock(&shared.graphics).capture(
                    &request.source,
                    request.cx,
                    request.cy,
                );

                let success = match pixels {
                    Some(pixels) => match std::fs::write(&request.filename, &pixels) {
                        Ok(()) => {
                            info!("[Screenshot]: saved '{}'", request.filename);
                            true
                        }
                        Err(err) => {
                            warn!(
                                "[Screenshot]: failed to write '{}': {err}",
                                request.filename
                            );
                            false
                        }
                    },
                    None => {
                        warn!("[Screenshot]: capture failed for '{}'", request.source);
                        false
                    }
                };

                (request.callback)(success, request.filename);
            }
        });
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

    struct FixedGraphics;

    impl ScreenshotGraphics for FixedGraphics {
        fn capture(&mut self, source: &str, _cx: u32, _cy: u32) -> Option<Vec<u8>> {
            if source == "missing" {
                return None;
            }
            Some(vec![0xAB; 16])
        }
    }

    fn temp_file(tag: &str) -> String {
        std::env::temp_dir()
            .join(format!("screenshot-test-{tag}-{}", std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    fn request(
        source: &str,
        filename: &str,
        results: &Arc<Mutex<Vec<(bool, String)>>>,
    ) -> ScreenshotRequest {
        let results = results.clone();
        ScreenshotRequest {
            source: source.to_owned(),
            cx: 1280,
            cy: 720,
            filename: filename.to_owned(),
            callback: Box::new(move |success, filename| {
                results.lock().unwrap().push((success, filename));
            }),
        }
    }

    fn wait_for<T>(results: &Arc<Mutex<Vec<T>>>, count: usize) {
        for _ in 0..200 {
            if results.lock().unwrap().len() >= count {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out waiting for {count} results");
    }

    #[test]
    fn requests_complete_in_fifo_order() {
        let provider = ScreenshotProvider::new(FixedGraphics);
        let results = Arc::new(Mutex::new(Vec::new()));

        let first = temp_file("first");
        let second = temp_file("second");
        let third = temp_file("third");

        provider.request(request("game", &first, &results));
        provider.request(request("game", &second, &results));
        provider.request(request("game", &third, &results));

        wait_for(&results, 3);

        let results = results.lock().unwrap();
        assert_eq!(results[0].1, first);
        assert_eq!(results[1].1, second);
        assert_eq!(results[2].1, third);
        assert!(results.iter().all(|(success, _)| *success));

        assert_eq!(std::fs::read(&first).unwrap(), vec![0xAB; 16]);

        for file in [&first, &second, &third] {
            let _ = std::fs::remove_file(file);
        }
    }

    #[test]
    fn capture_failure_reports_to_the_callback() {
        let provider = ScreenshotProvider::new(FixedGraphics);
        let results = Arc::new(Mutex::new(Vec::new()));

        provider.request(request("missing", &temp_file("fail"), &results));

        wait_for(&results, 1);
        assert!(!results.lock().unwrap()[0].0);
    }
}
