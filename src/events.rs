//! Event definitions for the main event loop.
//!
//! The router, the ad-hoc command tracker and the shutdown coordinator all run
//! on one task driven by these events; supervisors run as their own tasks and
//! are reached through their handles instead.

/// Signal that triggered a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub fn label(self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        }
    }
}

/// Represents an event in the application's main event loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// A command line to route. `origin` is the default target instance.
    Line { text: String, origin: usize },
    /// Interactive input reached end of file.
    InputClosed,
    /// A tracked ad-hoc command exited.
    CommandExited {
        key: String,
        token: u64,
        tag: Option<usize>,
        code: Option<i32>,
    },
    /// An interrupt or termination signal was received.
    Shutdown { signal: ShutdownSignal },
}
