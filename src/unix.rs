use anyhow::Result;
use std::io;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread;
use std::time::Duration;

#[cfg(unix)]
use signal_hook::{consts::SIGINT, consts::SIGTERM, iterator::Signals};

#[cfg(windows)]
use signal_hook::{consts::SIGINT, iterator::Signals};

/// Standard Unix exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    InvalidUsage = 2,
    SignalInt = 130,  // 128 + SIGINT (2)
    SignalPipe = 141, // 128 + SIGPIPE (13)
    SignalTerm = 143, // 128 + SIGTERM (15)
}

impl ExitCode {
    pub fn exit(self) -> ! {
        process::exit(self as i32)
    }
}

/// Global termination flag for graceful shutdown
pub static SHOULD_TERMINATE: AtomicBool = AtomicBool::new(false);

/// Signal that set [`SHOULD_TERMINATE`], 0 if none
static RECEIVED_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// How long sources and the writer get to drain before the process is forced down
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Signal handler for graceful shutdown
pub struct SignalHandler {
    _handle: thread::JoinHandle<()>,
}

impl SignalHandler {
    pub fn new() -> Result<Self> {
        #[cfg(unix)]
        let signals_to_handle = vec![SIGINT, SIGTERM];

        #[cfg(windows)]
        let signals_to_handle = vec![SIGINT];

        let mut signals = Signals::new(&signals_to_handle)?;

        let handle = thread::spawn(move || {
            for sig in signals.forever() {
                let code = match sig {
                    SIGINT => ExitCode::SignalInt,
                    #[cfg(unix)]
                    SIGTERM => ExitCode::SignalTerm,
                    _ => {
                        log::warn!("Received unexpected signal: {}", sig);
                        continue;
                    }
                };

                if SHOULD_TERMINATE.swap(true, Ordering::SeqCst) {
                    // Second signal: stop waiting for the drain
                    code.exit();
                }
                RECEIVED_SIGNAL.store(sig, Ordering::SeqCst);
                log::info!("Received signal {}, shutting down", sig);

                thread::spawn(move || {
                    thread::sleep(SHUTDOWN_GRACE);
                    log::warn!("Shutdown grace period expired");
                    code.exit();
                });
            }
        });

        Ok(SignalHandler { _handle: handle })
    }
}

/// Exit code for the signal that stopped the run, if one did
pub fn signal_exit_code() -> Option<ExitCode> {
    match RECEIVED_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        SIGINT => Some(ExitCode::SignalInt),
        #[cfg(unix)]
        SIGTERM => Some(ExitCode::SignalTerm),
        _ => Some(ExitCode::GeneralError),
    }
}

/// Cross-platform broken pipe detection
pub fn is_broken_pipe(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.kind() == io::ErrorKind::BrokenPipe
    }
    #[cfg(windows)]
    {
        e.kind() == io::ErrorKind::BrokenPipe
            || e.raw_os_error() == Some(232) // ERROR_NO_DATA
            || e.raw_os_error() == Some(109) // ERROR_BROKEN_PIPE
    }
}
