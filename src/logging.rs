//! Logging and tracing setup.
//!
//! The reconciler emits `tracing` events at every step of an apply: the
//! initial fetch, the canonicalized desired state, the plan, each operation
//! and any conflict retries. These helpers install a subscriber that writes
//! them to **stderr**.
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_reconciler::{init_logging, privateca, Reconciler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Initialize logging (reads RUST_LOG env var)
//!     init_logging();
//!
//!     let reconciler = Reconciler::new(privateca::ca_pool(), MyStore::new());
//!     reconciler.apply(&desired).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls log levels (e.g., `info`, `debug`, `hemmer_reconciler=debug`)
//!
//! # Examples
//!
//! ```bash
//! # Show plans and operations (default)
//! RUST_LOG=info ./my-tool
//!
//! # Also show fetched and canonicalized state
//! RUST_LOG=hemmer_reconciler=debug ./my-tool
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Initialize the default logging subscriber.
///
/// This sets up a `tracing` subscriber that:
/// - Writes to **stderr**
/// - Respects the `RUST_LOG` environment variable for filtering
/// - Defaults to `info` level if `RUST_LOG` is not set
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize logging with a custom default level.
///
/// Like [`init_logging`], but `default_level` is used when `RUST_LOG` is not set.
///
/// # Example
///
/// ```ignore
/// use hemmer_reconciler::init_logging_with_default;
///
/// fn main() {
///     // Show every reconcile step unless RUST_LOG says otherwise
///     init_logging_with_default("hemmer_reconciler=debug");
/// }
/// ```
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(layer())
        .init();
}

/// Try to initialize logging, returning false if already initialized.
///
/// Unlike [`init_logging`], this does not panic when a subscriber is
/// already set, which makes it safe to call from tests.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(filter("info"))
        .with(layer())
        .try_init()
        .is_ok()
}
