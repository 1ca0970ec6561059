/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::stream::ClientStream;
use crate::dirs::CitadelDirs;
use arc_swap::ArcSwap;
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};
use tokio_rustls::TlsAcceptor;
use trc::EventExt;

/// Certificate validity when we self-sign at bootstrap, roughly three
/// years.
const SELF_SIGNED_DAYS: i64 = 1106;

struct TlsState {
    config: Arc<ServerConfig>,
    key_mtime: SystemTime,
    cert_mtime: SystemTime,
}

/// Process-wide TLS material. One instance serves every listener; a
/// changed key or certificate on disk is picked up before the next
/// handshake and swapped in atomically, leaving established sessions on
/// the old material.
pub struct TlsManager {
    key_path: PathBuf,
    cert_path: PathBuf,
    state: ArcSwap<Option<Arc<TlsState>>>,
}

impl TlsManager {
    /// Ensure key and certificate exist, generating a fresh key pair and a
    /// self-signed certificate with CN=`*` when missing, then load them.
    pub fn bootstrap(dirs: &CitadelDirs) -> trc::Result<Self> {
        std::fs::create_dir_all(&dirs.keys).map_err(|err| {
            trc::TlsEvent::CertificateReadError
                .caused_by(trc::location!())
                .reason(err)
        })?;

        let key_path = dirs.tls_key();
        let cert_path = dirs.tls_cer();

        if !key_path.exists() || !cert_path.exists() {
            generate_self_signed(&key_path, &cert_path)?;
            trc::event!(
                Tls(trc::TlsEvent::CertificateGenerated),
                Path = cert_path.to_string_lossy().into_owned(),
            );
        }

        let manager = TlsManager {
            key_path,
            cert_path,
            state: ArcSwap::from_pointee(None),
        };
        manager.reload()?;
        Ok(manager)
    }

    fn reload(&self) -> trc::Result<()> {
        let key_mtime = mtime(&self.key_path);
        let cert_mtime = mtime(&self.cert_path);
        let config = build_server_config(&self.key_path, &self.cert_path)?;
        self.state.store(Arc::new(Some(Arc::new(TlsState {
            config: Arc::new(config),
            key_mtime,
            cert_mtime,
        }))));
        Ok(())
    }

    /// Pick up replaced key/cert files. Runs at the start of every
    /// STARTTLS; a stat pair is cheap enough for that.
    fn refresh_if_changed(&self) {
        let current = self.state.load_full();
        if let Some(state) = current.as_ref() {
            if state.key_mtime != mtime(&self.key_path)
                || state.cert_mtime != mtime(&self.cert_path)
            {
                match self.reload() {
                    Ok(()) => {
                        trc::event!(
                            Tls(trc::TlsEvent::CertificateReloaded),
                            Path = self.cert_path.to_string_lossy().into_owned(),
                        );
                    }
                    Err(err) => {
                        trc::error!(err.details("keeping previous TLS material"));
                    }
                }
            }
        }
    }

    pub async fn accept(&self, stream: ClientStream) -> io::Result<ClientStream> {
        self.refresh_if_changed();
        let state = self.state.load_full();
        let Some(state) = state.as_ref() else {
            return Err(io::Error::other("TLS not configured"));
        };
        let acceptor = TlsAcceptor::from(state.config.clone());
        match acceptor.accept(stream).await {
            Ok(tls_stream) => Ok(ClientStream::Tls(Box::new(tls_stream))),
            Err(err) => {
                trc::event!(
                    Tls(trc::TlsEvent::HandshakeError),
                    Reason = err.to_string(),
                );
                Err(err)
            }
        }
    }
}

fn mtime(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn generate_self_signed(key_path: &Path, cert_path: &Path) -> trc::Result<()> {
    let map_err = |err: rcgen::Error| {
        trc::TlsEvent::CertificateReadError
            .caused_by(trc::location!())
            .reason(err)
    };

    // Reuse an existing key when only the certificate is missing, so a
    // CA-signed replacement can be dropped in later without a key change.
    let key_pair = if key_path.exists() {
        let pem = std::fs::read_to_string(key_path).map_err(|err| {
            trc::TlsEvent::CertificateReadError
                .caused_by(trc::location!())
                .reason(err)
        })?;
        rcgen::KeyPair::from_pem(&pem).map_err(map_err)?
    } else {
        let key_pair = rcgen::KeyPair::generate().map_err(map_err)?;
        write_private(key_path, key_pair.serialize_pem().as_bytes())?;
        key_pair
    };

    let mut params =
        rcgen::CertificateParams::new(vec!["*".to_string()]).map_err(map_err)?;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "*");
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(SELF_SIGNED_DAYS);

    let cert = params.self_signed(&key_pair).map_err(map_err)?;
    write_private(cert_path, cert.pem().as_bytes())
}

fn write_private(path: &Path, contents: &[u8]) -> trc::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, contents)
        .and_then(|_| std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)))
        .map_err(|err| {
            trc::TlsEvent::CertificateReadError
                .caused_by(trc::location!())
                .reason(err)
        })
}

fn build_server_config(key_path: &Path, cert_path: &Path) -> trc::Result<ServerConfig> {
    let map_io = |err: io::Error| {
        trc::TlsEvent::CertificateReadError
            .caused_by(trc::location!())
            .reason(err)
    };

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut io::BufReader::new(
        std::fs::File::open(cert_path).map_err(map_io)?,
    ))
    .collect::<Result<_, _>>()
    .map_err(map_io)?;

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut io::BufReader::new(
        std::fs::File::open(key_path).map_err(map_io)?,
    ))
    .map_err(map_io)?
    .ok_or_else(|| {
        trc::TlsEvent::CertificateReadError.details("no private key found in key file")
    })?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| {
            trc::TlsEvent::CertificateReadError
                .caused_by(trc::location!())
                .reason(err)
        })
}
