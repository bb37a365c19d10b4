//! Terminators for controlling and interrupting long-running solves.
//!
//! This module provides several implementations of the [`Terminator`] trait,
//! including:
//! - [`InterruptTerminator`]: Responds to Ctrl-C (SIGINT) or programmatic
//!   interrupts.
//! - [`TimeOutTerminator`]: Terminates after a specified time limit.
//! - [`MultipleTerminators`]: Combines multiple terminators.
//!
//! The engine consults the terminator at the top of every ADMM iteration; on
//! trigger the solve stops with the returned status and the current iterate
//! intact.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::Status;

pub trait Terminator {
    fn initialize(&mut self) {}

    fn terminate(&mut self) -> Option<Status>;
}

/// The process-wide interrupt flag. The signal handler is installed on first
/// use and shared by every terminator instance afterwards, so construction is
/// idempotent.
fn interrupt_flag() -> &'static Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    FLAG.get_or_init(|| {
        let interrupted = Arc::new(AtomicBool::new(false));
        let handler_flag = interrupted.clone();
        // Installation can fail when the host already owns the signal; the
        // terminator then only reacts to programmatic interrupts.
        let _ = ctrlc::set_handler(move || {
            handler_flag.store(true, Ordering::SeqCst);
        });
        interrupted
    })
}

/// Terminator that responds to Ctrl-C (SIGINT) or programmatic interrupts.
pub struct InterruptTerminator {
    interrupted: Arc<AtomicBool>,
}

impl InterruptTerminator {
    pub fn new() -> Self {
        Self {
            interrupted: interrupt_flag().clone(),
        }
    }

    pub fn interrupt(&mut self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
}

impl Default for InterruptTerminator {
    fn default() -> Self {
        Self::new()
    }
}

impl Terminator for InterruptTerminator {
    fn initialize(&mut self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }

    fn terminate(&mut self) -> Option<Status> {
        if self.interrupted.load(Ordering::SeqCst) {
            Some(Status::Interrupted)
        } else {
            None
        }
    }
}

/// Terminator that triggers once the given wall-clock budget is spent.
pub struct TimeOutTerminator {
    max_time: Duration,
    start_time: Instant,
}

impl TimeOutTerminator {
    pub fn new(max_time: Duration) -> Self {
        Self {
            max_time,
            start_time: Instant::now(),
        }
    }
}

impl Terminator for TimeOutTerminator {
    fn initialize(&mut self) {
        self.start_time = Instant::now();
    }

    fn terminate(&mut self) -> Option<Status> {
        if self.start_time.elapsed() >= self.max_time {
            Some(Status::TimeLimit)
        } else {
            None
        }
    }
}

/// Terminator that combines multiple terminators and triggers if any of them
/// do.
pub struct MultipleTerminators {
    terminators: Vec<Box<dyn Terminator>>,
}

impl MultipleTerminators {
    pub fn new(terminators: Vec<Box<dyn Terminator>>) -> Self {
        Self { terminators }
    }
}

impl Terminator for MultipleTerminators {
    fn initialize(&mut self) {
        for terminator in &mut self.terminators {
            terminator.initialize();
        }
    }

    fn terminate(&mut self) -> Option<Status> {
        for terminator in &mut self.terminators {
            if let Some(status) = terminator.as_mut().terminate() {
                return Some(status);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_triggers_after_budget() {
        let mut terminator = TimeOutTerminator::new(Duration::from_millis(1));
        terminator.initialize();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(terminator.terminate(), Some(Status::TimeLimit));
    }

    // The interrupt flag is process-wide, so both interrupt paths live in a
    // single test to keep them from racing each other.
    #[test]
    fn interrupt_via_flag_and_signal() {
        let mut terminator = InterruptTerminator::new();
        terminator.initialize();
        assert_eq!(terminator.terminate(), None);
        terminator.interrupt();
        assert_eq!(terminator.terminate(), Some(Status::Interrupted));

        // A second instance shares the process-wide flag.
        let mut other = InterruptTerminator::new();
        assert_eq!(other.terminate(), Some(Status::Interrupted));
        other.initialize();
        assert_eq!(other.terminate(), None);

        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = std::process::id() as i32;
            signal::kill(Pid::from_raw(pid), Signal::SIGINT).expect("Failed to send SIGINT");

            let deadline = Instant::now() + Duration::from_secs(2);
            loop {
                if let Some(status) = other.terminate() {
                    assert_eq!(status, Status::Interrupted);
                    break;
                }
                assert!(Instant::now() < deadline, "interrupt never observed");
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
}
