//! Lifecycle coupling to the Forge parent process: the start event it
//! waits on, and the exit watch that tears this host down with it.

#[cfg(windows)]
pub fn signal_start_event(handle: u64) {
    use winapi::um::{handleapi::CloseHandle, synchapi::SetEvent, winnt::HANDLE};

    let handle = handle as HANDLE;
    unsafe {
        SetEvent(handle);
        CloseHandle(handle);
    }
}

#[cfg(not(windows))]
pub fn signal_start_event(handle: u64) {
    log::info!("start event {handle:#x} signalled");
}

#[cfg(windows)]
pub async fn wait_for_process_exit(pid: u32) {
    use winapi::um::{
        handleapi::CloseHandle,
        processthreadsapi::OpenProcess,
        synchapi::WaitForSingleObject,
        winbase::INFINITE,
        winnt::SYNCHRONIZE,
    };

    let raw = unsafe { OpenProcess(SYNCHRONIZE, 0, pid) };
    if raw.is_null() {
        log::warn!("couldn't open process {pid}, not waiting for it");
        return;
    }

    let handle = raw as usize;
    let _ = tokio::task::spawn_blocking(move || {
        let handle = handle as winapi::um::winnt::HANDLE;
        unsafe {
            WaitForSingleObject(handle, INFINITE);
            CloseHandle(handle);
        }
    })
    .await;
}

#[cfg(target_os = "linux")]
pub async fn wait_for_process_exit(pid: u32) {
    let path = format!("/proc/{pid}");

    while std::path::Path::new(&path).exists() {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }
}

#[cfg(not(any(windows, target_os = "linux")))]
pub async fn wait_for_process_exit(_pid: u32) {
    std::future::pending::<()>().await;
}
