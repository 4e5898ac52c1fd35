use std::ffi::c_int;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;

use crate::cancel::CancelToken;
use crate::error::{GateError, Result};

static TARGET: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn on_interrupt(_signum: c_int) {
    if let Some(flag) = TARGET.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Routes SIGINT and SIGTERM to `token`. Only the first installed token is
/// used; later calls just refresh the handlers.
pub fn install(token: &CancelToken) -> Result<()> {
    let _ = TARGET.set(token.flag());
    // No SA_RESTART: blocking calls see EINTR and re-check the token.
    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        unsafe { signal::sigaction(sig, &action) }.map_err(GateError::os("sigaction"))?;
    }
    Ok(())
}

/// A single positive process id; 0 and negative values address groups.
fn single_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|raw| *raw > 0).map(Pid::from_raw)
}

/// True while the process exists, including when we may not signal it.
pub fn process_alive(pid: u32) -> bool {
    let Some(target) = single_pid(pid) else {
        return false;
    };
    match signal::kill(target, None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(_) => true,
    }
}

/// Best-effort termination request to another process.
pub fn terminate(pid: u32) {
    let Some(target) = single_pid(pid) else {
        log::warn!("refusing to signal pid {pid}");
        return;
    };
    if let Err(err) = signal::kill(target, Signal::SIGTERM) {
        log::debug!("SIGTERM to {pid} failed: {err}");
    }
}
