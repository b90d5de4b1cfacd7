use std::thread::JoinHandle;

/// Thread wrapper that is always joined on drop. `make_joinable` is the
/// wake-up hook for whatever gate the thread blocks on; it must be safe to
/// call from another thread. Detached threads are not permitted anywhere in
/// the capture host.
#[derive(Default)]
pub struct JoiningThread {
    handle: Option<JoinHandle<()>>,
    pub make_joinable: Option<Box<dyn FnOnce() + Send>>,
}

impl JoiningThread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&mut self, func: impl FnOnce() + Send + 'static) {
        self.join();
        self.handle = Some(std::thread::spawn(func));
    }

    pub fn run_with_gate(
        &mut self,
        make_joinable: impl FnOnce() + Send + 'static,
        func: impl FnOnce() + Send + 'static,
    ) {
        self.run(func);
        self.make_joinable = Some(Box::new(make_joinable));
    }

    pub fn join(&mut self) {
        if let Some(make_joinable) = self.make_joinable.take() {
            make_joinable();
        }

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Joins only when the thread already finished.
    pub fn try_join(&mut self) -> bool {
        let finished = self
            .handle
            .as_ref()
            .is_some_and(|handle| handle.is_finished());

        if !finished {
            return false;
        }

        self.make_joinable = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }

        true
    }
}

impl Drop for JoiningThread {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    };

    use super::*;

    #[test]
    fn joins_on_drop_after_waking_the_gate() {
        let (tx, rx) = mpsc::channel::<()>();
        let finished = Arc::new(AtomicBool::new(false));

        {
            let mut thread = JoiningThread::new();
            let finished = finished.clone();
            thread.run_with_gate(
                move || {
                    let _ = tx.send(());
                },
                move || {
                    let _ = rx.recv();
                    finished.store(true, Ordering::Release);
                },
            );
        }

        assert!(finished.load(Ordering::Acquire));
    }

    #[test]
    fn try_join_only_reaps_finished_threads() {
        let (tx, rx) = mpsc::channel::<()>();

        let mut thread = JoiningThread::new();
        thread.run(move || {
            let _ = rx.recv();
        });

        assert!(!thread.try_join());
        tx.send(()).unwrap();

        // The thread needs a moment to wind down.
        for _ in 0..100 {
            if thread.try_join() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        panic!("thread never became joinable");
    }
}
