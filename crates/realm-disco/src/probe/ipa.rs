// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FreeIPA certificate heuristic.
//!
//! An IPA server publishes its CA at `/ipa/config/ca.crt`. If the
//! certificate served there anchors the certificate the same server
//! presents for HTTPS, the server is taken to be IPA. This is a
//! classification check, not a security validation.

use rustls::client::danger::ServerCertVerifier;
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::RootCertStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use super::tls::{self, TlsClient};
use crate::config::DiscoveryConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::resolver::Candidate;

/// Path of the CA certificate on an IPA server.
pub const CA_PATH: &str = "/ipa/config/ca.crt";

/// Check whether `candidate` is an IPA server.
///
/// Network-level failures (refused, unreachable, timeout) yield
/// `Ok(false)`. Anything else is reported as a diagnostic and returned.
pub async fn discover(
    candidate: &Candidate,
    config: &DiscoveryConfig,
    diag: &Diagnostics,
) -> Result<bool> {
    let host = candidate.hostname.as_str();
    diag.info(format!("Trying to retrieve IPA certificate from {}", host));

    let addr = SocketAddr::new(candidate.address.ip(), config.ipa_https_port);
    let connected = match tls::accept_any_config() {
        Ok(tls_config) => {
            TlsClient::connect(
                addr,
                host,
                tls_config,
                config.connect_timeout(),
                config.io_timeout(),
            )
            .await
        }
        Err(e) => Err(e),
    };
    let mut client = match connected {
        Ok(client) => client,
        Err(e) if e.is_absence() => {
            debug!("[IPA] Couldn't connect to check for IPA domain: {}", e);
            return Ok(false);
        }
        Err(e) => return Err(report(diag, "Couldn't connect to check for IPA domain", e)),
    };

    let request = format!("GET {} HTTP/1.0\r\nHost: {}\r\n\r\n", CA_PATH, host);
    if let Err(e) = client.write_all(request.as_bytes()).await {
        return Err(report(diag, "Couldn't send HTTP request for certificate", e));
    }
    let response = match client.read_to_end(config.ipa_max_response).await {
        Ok(response) => response,
        Err(e) => return Err(report(diag, "Couldn't read certificate via HTTP", e)),
    };

    let Some(chain) = client.peer_certificates().filter(|c| !c.is_empty()) else {
        debug!("[IPA] no peer certificate received from {}", host);
        return Ok(false);
    };

    if let Some(status) = http_status(&response) {
        if status != 200 {
            debug!("[IPA] {}{} returned HTTP {}", host, CA_PATH, status);
            return Ok(false);
        }
    }

    let ca = match parse_certificate(strip_http_header(&response)) {
        Ok(ca) => ca,
        Err(e) => return Err(report(diag, "Couldn't read certificate via HTTP", e)),
    };

    if verify_peer(chain, host, ca)? {
        diag.info("Retrieved IPA CA certificate verifies the HTTPS connection");
        Ok(true)
    } else {
        diag.info("Retrieved IPA CA certificate does not verify the HTTPS connection");
        Ok(false)
    }
}

fn report(diag: &Diagnostics, message: &str, err: Error) -> Error {
    diag.error(&err, message);
    err
}

/// Body of an HTTP response: everything after the first blank line.
///
/// Returns an empty body if no header terminator is present.
pub fn strip_http_header(response: &[u8]) -> &[u8] {
    if let Some(pos) = find(response, b"\r\n\r\n") {
        return &response[pos + 4..];
    }
    if let Some(pos) = find(response, b"\n\n") {
        return &response[pos + 2..];
    }
    &[]
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Status code from an `HTTP/1.x NNN ...` status line.
fn http_status(response: &[u8]) -> Option<u16> {
    let line_end = find(response, b"\n").unwrap_or(response.len());
    let line = std::str::from_utf8(&response[..line_end]).ok()?;
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Parse a PEM certificate and sanity-check its DER structure.
pub fn parse_certificate(pem: &[u8]) -> Result<CertificateDer<'static>> {
    let der = CertificateDer::from_pem_slice(pem)
        .map_err(|e| Error::Certificate(format!("no PEM certificate in response: {:?}", e)))?;
    let (_, parsed) = x509_parser::parse_x509_certificate(der.as_ref())
        .map_err(|e| Error::Certificate(format!("malformed certificate: {}", e)))?;
    debug!("[IPA] retrieved CA certificate for {}", parsed.subject());
    Ok(der)
}

/// Verify the peer chain for `host` using `ca` as the only trust anchor.
pub fn verify_peer(
    chain: &[CertificateDer<'static>],
    host: &str,
    ca: CertificateDer<'static>,
) -> Result<bool> {
    let Some((end_entity, intermediates)) = chain.split_first() else {
        return Ok(false);
    };

    let mut roots = RootCertStore::empty();
    if let Err(e) = roots.add(ca) {
        debug!("[IPA] retrieved certificate is not a usable trust anchor: {}", e);
        return Ok(false);
    }
    let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), tls::provider())
        .build()
        .map_err(|e| Error::Certificate(e.to_string()))?;
    let name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::Certificate(format!("invalid peer identity '{}': {}", host, e)))?;

    match verifier.verify_server_cert(end_entity, intermediates, &name, &[], UnixTime::now()) {
        Ok(_) => Ok(true),
        Err(e) => {
            debug!("[IPA] peer certificate for {} does not verify: {}", host, e);
            Ok(false)
        }
    }
}
