//! TLS identity for the RPC listener.
//!
//! The certificate and key live at caller-chosen paths. Both present: load
//! them. Neither present: generate a self-signed pair. Exactly one present:
//! refuse to start, since overwriting the survivor could orphan whatever
//! clients pinned it.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    axum_server::tls_rustls::RustlsConfig,
    rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P384_SHA384},
    time::{Duration, OffsetDateTime},
    tracing::info,
};

/// Organisation written into generated certificates.
const CERT_ORG: &str = "rpcgate autogenerated cert";

/// Lifetime of a generated certificate.
const CERT_VALIDITY_DAYS: i64 = 10 * 365;

const CERT_MODE: u32 = 0o644;
const KEY_MODE: u32 = 0o600;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("missing cert pair file: {present} exists but {missing} does not")]
    MissingPairFile { present: PathBuf, missing: PathBuf },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}: {reason}")]
    Pem { path: PathBuf, reason: &'static str },
    #[error("certificate generation: {0}")]
    Generate(#[from] rcgen::Error),
    #[error("tls config: {0}")]
    Rustls(#[from] rustls::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> TlsError + '_ {
    move |source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reports whether anything exists at `path`. Unreadable entries count as
/// present so they are never overwritten.
fn file_exists(path: &Path) -> bool {
    !matches!(fs::metadata(path), Err(e) if e.kind() == io::ErrorKind::NotFound)
}

/// Make sure a key/cert pair exists at the given paths, generating a
/// self-signed one covering `hosts` when neither file exists.
pub fn ensure_identity(cert_path: &Path, key_path: &Path, hosts: &[String]) -> Result<(), TlsError> {
    match (file_exists(cert_path), file_exists(key_path)) {
        (true, true) => Ok(()),
        (false, false) => generate_cert_pair(cert_path, key_path, hosts),
        (true, false) => Err(TlsError::MissingPairFile {
            present: cert_path.to_path_buf(),
            missing: key_path.to_path_buf(),
        }),
        (false, true) => Err(TlsError::MissingPairFile {
            present: key_path.to_path_buf(),
            missing: cert_path.to_path_buf(),
        }),
    }
}

/// Generate a P-384 key and a ten-year self-signed certificate and write
/// them out. IP literals in `hosts` become IP SANs, everything else DNS SANs.
///
/// P-384 is the largest curve the ring provider behind the listener can sign
/// with; a P-521 key would generate but never complete a handshake.
pub fn generate_cert_pair(
    cert_path: &Path,
    key_path: &Path,
    hosts: &[String],
) -> Result<(), TlsError> {
    info!(hosts = ?hosts, "generating TLS certificates");

    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384)?;
    let mut params = CertificateParams::new(hosts.to_vec())?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, CERT_ORG);
    if let Some(host) = hosts.first() {
        dn.push(DnType::CommonName, host.as_str());
    }
    params.distinguished_name = dn;
    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::hours(1);
    params.not_after = now + Duration::days(CERT_VALIDITY_DAYS);

    let cert = params.self_signed(&key_pair)?;

    write_new_file(cert_path, cert.pem().as_bytes(), CERT_MODE)?;
    if let Err(e) = write_new_file(key_path, key_pair.serialize_pem().as_bytes(), KEY_MODE) {
        let _ = fs::remove_file(cert_path);
        return Err(e);
    }

    info!(cert = %cert_path.display(), key = %key_path.display(), "done generating TLS certificates");
    Ok(())
}

fn write_new_file(path: &Path, contents: &[u8], mode: u32) -> Result<(), TlsError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let mut opts = OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(mode);
    }
    let mut file = opts.open(path).map_err(io_err(path))?;
    file.write_all(contents).map_err(io_err(path))?;
    file.sync_all().map_err(io_err(path))?;

    // The umask may have narrowed the creation mode.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_err(path))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

/// Build the listener's rustls configuration from a PEM cert/key pair.
///
/// TLS 1.2 is the floor. Only `http/1.1` is offered over ALPN because the
/// WebSocket upgrade needs HTTP/1.1.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, TlsError> {
    let mut cert_reader = BufReader::new(File::open(cert_path).map_err(io_err(cert_path))?);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err(cert_path))?;
    if certs.is_empty() {
        return Err(TlsError::Pem {
            path: cert_path.to_path_buf(),
            reason: "no certificates found",
        });
    }

    let mut key_reader = BufReader::new(File::open(key_path).map_err(io_err(key_path))?);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(io_err(key_path))?
        .ok_or_else(|| TlsError::Pem {
            path: key_path.to_path_buf(),
            reason: "no private key found",
        })?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(RustlsConfig::from_config(Arc::new(config)))
}

/// Hosts covered by a generated certificate when the caller names none:
/// loopback names plus this machine's hostname.
pub fn default_cert_hosts() -> Vec<String> {
    let mut hosts = vec!["localhost".to_string(), "127.0.0.1".into(), "::1".into()];
    if let Some(name) = hostname::get().ok().and_then(|h| h.into_string().ok())
        && !hosts.contains(&name)
    {
        hosts.push(name);
    }
    hosts
}
