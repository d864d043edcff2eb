//! Secret handling utilities.
//!
//! Re-exports secrecy types and redacts credentials embedded in broker URIs
//! so connection targets can be logged.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Render a URI with any `user:password@` section replaced by `***@`.
pub fn redact_uri(uri: &SecretString) -> String {
    let raw = uri.expose_secret();
    let Some((scheme, rest)) = raw.split_once("://") else {
        return "***".to_string();
    };
    match rest.rsplit_once('@') {
        Some((_, host)) => format!("{scheme}://***@{host}"),
        None => format!("{scheme}://{rest}"),
    }
}
