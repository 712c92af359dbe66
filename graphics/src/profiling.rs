//! Profiling support via Tracy.
//!
//! Instrumentation is enabled with the `profiling` Cargo feature:
//!
//! ```bash
//! cargo run --features profiling
//! ```
//!
//! ```ignore
//! use inflight_graphics::{profile_function, profile_scope, frame_mark};
//!
//! fn flush_writers() {
//!     profile_function!();
//!     {
//!         profile_scope!("descriptor_updates");
//!         // ...
//!     }
//! }
//! ```
//!
//! When profiling is disabled (the default), all macros compile to no-ops.

#[cfg(feature = "profiling")]
pub use tracy_client;

/// Profile the enclosing scope under `name`.
#[macro_export]
macro_rules! profile_scope {
    ($name:expr) => {
        #[cfg(feature = "profiling")]
        let _profile_span = $crate::profiling::tracy_client::span!($name);
    };
}

/// Profile the enclosing function.
#[macro_export]
macro_rules! profile_function {
    () => {
        #[cfg(feature = "profiling")]
        let _profile_span = $crate::profiling::tracy_client::span!();
    };
}

/// Mark the end of a frame.
#[macro_export]
macro_rules! frame_mark {
    () => {
        #[cfg(feature = "profiling")]
        $crate::profiling::tracy_client::frame_mark();
    };
}

/// Start the Tracy client. A no-op without the `profiling` feature.
pub fn init() {
    #[cfg(feature = "profiling")]
    {
        tracy_client::Client::start();
        log::info!("Tracy profiling client started");
    }
}
