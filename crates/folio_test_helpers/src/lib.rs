//! Shared test utilities for Folio test suites
//!
//! # Modules
//!
//! - [`mock`]: scripted transport and counting fake backend API
//! - [`frames`]: builders for wire-format envelope frames
//! - [`logging`]: test logging configuration
//! - [`assertions`]: polling helpers and callback collectors
//!
//! # Example
//!
//! ```rust,no_run
//! use folio_test_helpers::prelude::*;
//! use folio_common::DocumentKey;
//!
//! # async fn example() {
//! let transport = scripted_transport();
//! let feeder = transport.manual();
//! feeder.frame(status_frame(&DocumentKey::new("X", "1"), "processing"));
//! # }
//! ```

pub mod assertions;
pub mod frames;
pub mod logging;
pub mod mock;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::assertions::{wait_until, ErrorLog, UpdateLog};
    pub use crate::frames::{data_frame, error_frame, sample_metadata, status_frame, status_frame_with};
    pub use crate::logging::init_test_logging;
    pub use crate::mock::{counting_api, scripted_transport, ConnectScript, CountingApi, FrameFeeder, ScriptedTransport};
}
