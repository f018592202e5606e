//! Utility functions shared by the parser, the normalizer and the CLI.
//!
//! - **Text**: title sanitization, control-character stripping and
//!   Unicode-aware width helpers for terminal output
//! - **URL validation**: SSRF checks for feed sources and scheme checks for
//!   links handed to the system opener
//!
//! ```
//! use canopy::util::{sanitize_title, validate_url};
//!
//! assert_eq!(sanitize_title("  Weekly\u{A0}digest "), "Weekly digest");
//! assert!(validate_url("https://example.com/feed.xml").is_ok());
//! ```

mod text;
mod url_validator;

pub use text::{
    display_width, sanitize_title, strip_control_chars, truncate_to_width, NO_TITLE,
};
pub use url_validator::{validate_url, validate_url_for_open, UrlValidationError};
