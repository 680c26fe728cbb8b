use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::utils::split_escaped;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Configuration for building the HTTP client shared by all VUs.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub custom_headers: Option<String>,
    pub request_timeout: Option<Duration>,
}

/// Result of building the client, includes parsed headers for logging.
pub struct ClientBuildResult {
    pub client: reqwest::Client,
    pub parsed_headers: HeaderMap,
}

/// Builds a reqwest HTTP client with the specified configuration.
pub fn build_client(config: &ClientConfig) -> Result<ClientBuildResult, BoxError> {
    let mut client_builder = reqwest::Client::builder();

    if let Some(timeout) = config.request_timeout {
        client_builder = client_builder.timeout(timeout);
    }

    if let Some(ref resolve_str) = config.resolve_target_addr {
        if resolve_str.is_empty() {
            warn!("RESOLVE_TARGET_ADDR is set but empty, no DNS override will be applied");
        } else {
            let (hostname, socket_addr) = parse_dns_override(resolve_str)?;
            client_builder = client_builder.resolve(&hostname, socket_addr);
            info!(hostname = %hostname, addr = %socket_addr, "Configured DNS override");
        }
    }

    client_builder = configure_mtls(
        client_builder,
        config.client_cert_path.as_deref(),
        config.client_key_path.as_deref(),
    )?;

    let parsed_headers = parse_custom_headers(config.custom_headers.as_deref())?;
    if !parsed_headers.is_empty() {
        client_builder = client_builder.default_headers(parsed_headers.clone());
        info!(count = parsed_headers.len(), "Configured custom default headers");
    }

    let client = if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?
    } else {
        client_builder.build()?
    };

    Ok(ClientBuildResult {
        client,
        parsed_headers,
    })
}

/// Parses a `hostname:ip:port` DNS override.
pub fn parse_dns_override(resolve_str: &str) -> Result<(String, SocketAddr), BoxError> {
    let parts: Vec<&str> = resolve_str.split(':').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!(
            "RESOLVE_TARGET_ADDR ('{}') is not in the expected format 'hostname:ip:port'",
            resolve_str
        )
        .into());
    }

    let (hostname, ip, port) = (parts[0], parts[1], parts[2]);
    if hostname.is_empty() || ip.is_empty() || port.is_empty() {
        return Err(format!(
            "RESOLVE_TARGET_ADDR ('{}'): hostname, IP and port must all be non-empty",
            resolve_str
        )
        .into());
    }

    let port: u16 = port
        .parse()
        .map_err(|e| format!("Failed to parse port '{}' in RESOLVE_TARGET_ADDR: {}", port, e))?;
    let socket_addr: SocketAddr = format!("{}:{}", ip, port).parse().map_err(|e| {
        format!(
            "Failed to parse IP '{}' in RESOLVE_TARGET_ADDR: {}",
            ip, e
        )
    })?;

    Ok((hostname.to_string(), socket_addr))
}

fn configure_mtls(
    client_builder: reqwest::ClientBuilder,
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<reqwest::ClientBuilder, BoxError> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (Some(cert), Some(key)) => (cert, key),
        (Some(_), None) => {
            return Err("CLIENT_CERT_PATH is set, but CLIENT_KEY_PATH is missing for mTLS.".into())
        }
        (None, Some(_)) => {
            return Err("CLIENT_KEY_PATH is set, but CLIENT_CERT_PATH is missing for mTLS.".into())
        }
        (None, None) => return Ok(client_builder),
    };

    let cert_pem = std::fs::read(cert_path).map_err(|e| {
        format!(
            "Failed to read client certificate file '{}': {}",
            cert_path, e
        )
    })?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| format!("Failed to read client key file '{}': {}", key_path, e))?;

    let certs: Vec<_> = rustls_pemfile::certs(&mut cert_pem.as_slice()).collect();
    if certs.is_empty() {
        return Err(format!("No PEM certificates found in {}", cert_path).into());
    }
    if let Some(Err(e)) = certs.into_iter().find(|c| c.is_err()) {
        return Err(format!("Failed to parse PEM certificates from '{}': {}", cert_path, e).into());
    }

    let keys: Vec<_> = rustls_pemfile::pkcs8_private_keys(&mut key_pem.as_slice()).collect();
    if keys.is_empty() {
        return Err(format!(
            "No PKCS#8 private keys found in '{}'. Ensure the file contains a PEM-encoded PKCS#8 key.",
            key_path
        )
        .into());
    }
    if let Some(Err(e)) = keys.into_iter().find(|k| k.is_err()) {
        return Err(format!("Failed to parse private key from '{}': {}", key_path, e).into());
    }

    let mut combined = cert_pem.clone();
    if !combined.ends_with(b"\n") {
        combined.push(b'\n');
    }
    combined.extend_from_slice(&key_pem);

    let identity = reqwest::Identity::from_pem(&combined)
        .map_err(|e| format!("Failed to build client identity from PEM (cert+key): {}", e))?;

    info!(cert = cert_path, key = key_path, "Configured mTLS client identity");
    Ok(client_builder.identity(identity))
}

/// Parses `Name:Value` pairs separated by commas (`\,` escapes a comma).
pub fn parse_custom_headers(custom_headers_str: Option<&str>) -> Result<HeaderMap, BoxError> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match custom_headers_str {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for pair in &split_escaped(headers_str, ',') {
        let (name, value) = pair.split_once(':').ok_or_else(|| {
            format!(
                "Invalid header format in CUSTOM_HEADERS: '{}'. Expected 'Name:Value'.",
                pair
            )
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("Header name cannot be empty in '{}'.", pair).into());
        }

        let header_name = HeaderName::from_str(name)
            .map_err(|e| format!("Invalid header name '{}': {}", name, e))?;
        let header_value = HeaderValue::from_str(value.trim())
            .map_err(|e| format!("Invalid header value for '{}': {}", name, e))?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}
