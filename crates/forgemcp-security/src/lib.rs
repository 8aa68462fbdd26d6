//! Security helpers for forgemcp.
//!
//! Two small, self-contained utilities used around the core server:
//! HMAC-based channel authentication for JSON-RPC messages exchanged over
//! untrusted local channels, and Content-Security-Policy helpers applied to
//! HTML resource content.

pub mod csp;
pub mod signer;

pub use csp::{csp_meta_tag, inject_csp, is_html_mime};
pub use signer::{bytes_to_hex, hex_to_bytes, MessageSigner, SignerError};
