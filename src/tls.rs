//! TLS listener setup.
//!
//! Built on `openssl` rather than a pure-Rust TLS stack: disabling SSLv2/
//! SSLv3 explicitly, a configurable OpenSSL cipher-list string, and the
//! moving-write-buffer/partial-write accept modes all need the OpenSSL API
//! surface directly.

#![cfg(feature = "tls")]

use openssl::ssl::{SslAcceptor, SslFiletype, SslMethod, SslMode, SslOptions};

use crate::config::CoreConfig;
use crate::error::{Error, Result};

/// Build the server-side acceptor from a single combined cert+key PEM file.
///
/// No library-wide locking callback is installed: the `openssl` crate links
/// an OpenSSL that is internally thread-safe, so the one-time `openssl::init()`
/// call below is all the setup locking needs.
pub fn build_acceptor(config: &CoreConfig) -> Result<SslAcceptor> {
    openssl::init();

    let cert_file = config.cert_file.as_ref().ok_or_else(|| Error::config("tls enabled but cert_file is unset"))?;

    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())
        .map_err(|e| Error::config(format!("failed to create TLS acceptor: {e}")))?;

    builder
        .set_certificate_chain_file(cert_file)
        .map_err(|e| Error::config(format!("failed to load certificate {cert_file:?}: {e}")))?;
    builder
        .set_private_key_file(cert_file, SslFiletype::PEM)
        .map_err(|e| Error::config(format!("failed to load private key {cert_file:?}: {e}")))?;
    builder.check_private_key().map_err(|e| Error::config(format!("certificate/key mismatch: {e}")))?;

    builder.set_cipher_list(&config.cipher_list).map_err(|e| Error::config(format!("invalid cipher list: {e}")))?;

    builder.set_options(SslOptions::NO_SSLV2 | SslOptions::NO_SSLV3 | SslOptions::NO_COMPRESSION);
    builder.set_mode(SslMode::ACCEPT_MOVING_WRITE_BUFFER | SslMode::ENABLE_PARTIAL_WRITE);

    Ok(builder.build())
}
