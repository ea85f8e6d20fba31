// Parent process liveness monitor

use std::thread;
use std::time::Duration;

/// Poll the parent PID and terminate the whole process once it changes
/// (the parent died and we were reparented).
///
/// The thread never touches session state; exiting is its only action.
#[cfg(unix)]
pub fn spawn_parent_watchdog(interval: Duration) -> std::io::Result<thread::JoinHandle<()>> {
    // SAFETY: getppid has no preconditions and cannot fail
    let original = unsafe { libc::getppid() };

    thread::Builder::new()
        .name("parent-watchdog".to_string())
        .spawn(move || {
            loop {
                thread::sleep(interval);
                // SAFETY: as above
                let current = unsafe { libc::getppid() };
                if parent_gone(original, current) {
                    tracing::error!(original, current, "parent process exited, terminating");
                    std::process::exit(2);
                }
            }
        })
}

#[cfg(not(unix))]
pub fn spawn_parent_watchdog(_interval: Duration) -> std::io::Result<thread::JoinHandle<()>> {
    tracing::warn!("parent watchdog is only supported on unix");
    thread::Builder::new()
        .name("parent-watchdog".to_string())
        .spawn(|| {})
}

#[cfg_attr(not(unix), allow(dead_code))]
fn parent_gone(original: i32, current: i32) -> bool {
    current != original
}
