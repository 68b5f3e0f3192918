//! Utility functions for common operations.
//!
//! - **URL validation**: scheme/host checks for configured feed URLs
//! - **Text processing**: single-line sanitizing and byte-bounded truncation
//!   for text that ends up on the IRC wire
//! - **Shutdown**: waiting for OS termination signals

mod shutdown;
mod text;
mod url_validator;

pub use shutdown::wait_for_shutdown_signal;
pub use text::{single_line, truncate_bytes};
pub use url_validator::{validate_url, UrlValidationError};
