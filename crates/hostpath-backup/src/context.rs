//! Context for the current run
//!

use core::fmt;

use tracing::{debug, info};

/// Holds the context for the current run. Used for prefixing logs and for verbose output.
#[derive(Default, Debug, Clone)]
pub struct Context {
    /// The release being worked on, `(namespace, release)`.
    pub release: Option<(String, String)>,

    /// The current stage of the run.
    pub current_context: &'static str,

    /// Log details of each step.
    pub verbose: bool,
}

impl Context {
    /// Create a context for a release.
    pub fn new(namespace: &str, release: &str, verbose: bool) -> Self {
        Self {
            release: Some((namespace.to_string(), release.to_string())),
            current_context: "Start",
            verbose,
        }
    }

    /// Log a step detail, only shown at the default level when verbose.
    pub fn detail(&self, message: impl fmt::Display) {
        if self.verbose {
            info!("{self}{message}");
        } else {
            debug!("{self}{message}");
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((namespace, release)) = &self.release {
            write!(f, "[{namespace}/{release}] ")?;
        }

        write!(f, "[{}] ", self.current_context)?;

        Ok(())
    }
}
