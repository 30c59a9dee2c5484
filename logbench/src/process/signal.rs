use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

impl Signal {
    fn as_libc(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Delivers signals to processes by pid.
pub trait SignalSender: Send + Sync {
    /// Returns `Ok(false)` when no such process exists.
    fn send(&self, pid: u32, signal: Signal) -> io::Result<bool>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnixSignals;

impl SignalSender for UnixSignals {
    fn send(&self, pid: u32, signal: Signal) -> io::Result<bool> {
        // pid 0 and negative values address process groups
        let pid = match libc::pid_t::try_from(pid) {
            Ok(pid) if pid > 0 => pid,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("refusing to signal pid {pid}"),
                ))
            }
        };

        if unsafe { libc::kill(pid, signal.as_libc()) } == 0 {
            return Ok(true);
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(false)
        } else {
            Err(err)
        }
    }
}
