//! TLS material handed to the transport.
use std::fmt;

/// Certificates and key for a TLS connection, PEM encoded.
///
/// Material whose fields are all absent means a plaintext connection.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    pub ca_certificate: Option<Vec<u8>>,
    pub client_certificate: Option<Vec<u8>>,
    pub client_private_key: Option<Vec<u8>>,
}

impl TlsMaterial {
    /// TLS without client authentication.
    pub fn without_client_auth(ca_certificate: Vec<u8>) -> Self {
        Self {
            ca_certificate: Some(ca_certificate),
            client_certificate: None,
            client_private_key: None,
        }
    }

    /// TLS with client authentication.
    pub fn with_client_auth(
        ca_certificate: Vec<u8>,
        client_certificate: Vec<u8>,
        client_private_key: Vec<u8>,
    ) -> Self {
        Self {
            ca_certificate: Some(ca_certificate),
            client_certificate: Some(client_certificate),
            client_private_key: Some(client_private_key),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ca_certificate.is_none()
            && self.client_certificate.is_none()
            && self.client_private_key.is_none()
    }

    pub fn has_client_auth(&self) -> bool {
        self.client_certificate.is_some() && self.client_private_key.is_some()
    }

    /// Load material from PEM files, checking each file holds what it should.
    ///
    /// # Errors
    ///
    /// Return errors if any I/O failure or a file holds no matching PEM item.
    #[cfg(feature = "tls")]
    pub fn from_pem_files(
        ca_certificate: &std::path::Path,
        client_auth: Option<(&std::path::Path, &std::path::Path)>,
    ) -> std::io::Result<Self> {
        let ca_certificate = read_pem(ca_certificate, PemKind::Certificate)?;
        let (client_certificate, client_private_key) = match client_auth {
            Some((cert, key)) => (
                Some(read_pem(cert, PemKind::Certificate)?),
                Some(read_pem(key, PemKind::PrivateKey)?),
            ),
            None => (None, None),
        };
        Ok(Self {
            ca_certificate: Some(ca_certificate),
            client_certificate,
            client_private_key,
        })
    }
}

#[cfg(feature = "tls")]
#[derive(Debug, Clone, Copy)]
enum PemKind {
    Certificate,
    PrivateKey,
}

#[cfg(feature = "tls")]
fn read_pem(path: &std::path::Path, kind: PemKind) -> std::io::Result<Vec<u8>> {
    use std::io::{self, BufReader, Cursor};

    let raw = std::fs::read(path)?;
    let mut reader = BufReader::new(Cursor::new(&raw));
    let found = match kind {
        PemKind::Certificate => !rustls_pemfile::certs(&mut reader)?.is_empty(),
        PemKind::PrivateKey => {
            let mut found = false;
            while let Some(item) = rustls_pemfile::read_one(&mut reader)? {
                if matches!(
                    item,
                    rustls_pemfile::Item::PKCS8Key(_)
                        | rustls_pemfile::Item::RSAKey(_)
                        | rustls_pemfile::Item::ECKey(_)
                ) {
                    found = true;
                    break;
                }
            }
            found
        }
    };
    if !found {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no {:?} found in '{}'", kind, path.display()),
        ));
    }
    Ok(raw)
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_certificate", &self.ca_certificate.as_ref().map(Vec::len))
            .field(
                "client_certificate",
                &self.client_certificate.as_ref().map(Vec::len),
            )
            .field(
                "client_private_key",
                &self.client_private_key.as_ref().map(|_| "<hidden>"),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::TlsMaterial;

    #[test]
    fn test_empty_material_is_plaintext() {
        assert!(TlsMaterial::default().is_empty());
        let material = TlsMaterial::without_client_auth(b"ca".to_vec());
        assert!(!material.is_empty());
        assert!(!material.has_client_auth());
    }

    #[test]
    fn test_private_key_hidden_in_debug() {
        let material =
            TlsMaterial::with_client_auth(b"ca".to_vec(), b"cert".to_vec(), b"KEY".to_vec());
        assert!(material.has_client_auth());
        let debug = format!("{:?}", material);
        assert!(debug.contains("<hidden>"));
        assert!(!debug.contains("75, 69, 89"));
    }

    #[cfg(feature = "tls")]
    fn fixture(name: &str) -> std::path::PathBuf {
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures/tls")
            .join(name)
    }

    #[cfg(feature = "tls")]
    #[test]
    fn test_load_pem_files() {
        let ca = fixture("ca_certificate.pem");
        let cert = fixture("client_certificate.pem");
        let key = fixture("client_private_key.pem");

        let material = TlsMaterial::from_pem_files(&ca, Some((&cert, &key))).unwrap();
        assert!(material.has_client_auth());
        assert_eq!(
            Some(std::fs::read(&ca).unwrap()),
            material.ca_certificate
        );

        let material = TlsMaterial::from_pem_files(&ca, None).unwrap();
        assert!(!material.is_empty());
        assert!(!material.has_client_auth());
    }

    #[cfg(feature = "tls")]
    #[test]
    fn test_reject_mismatched_pem_files() {
        use std::io::ErrorKind;

        let ca = fixture("ca_certificate.pem");
        let cert = fixture("client_certificate.pem");

        let err = TlsMaterial::from_pem_files(&fixture("not_pem.txt"), None).unwrap_err();
        assert_eq!(ErrorKind::InvalidData, err.kind());

        // a certificate is not a private key
        let err = TlsMaterial::from_pem_files(&ca, Some((&cert, &cert))).unwrap_err();
        assert_eq!(ErrorKind::InvalidData, err.kind());

        // nor the other way round
        let key = fixture("client_private_key.pem");
        let err = TlsMaterial::from_pem_files(&ca, Some((&key, &key))).unwrap_err();
        assert_eq!(ErrorKind::InvalidData, err.kind());

        let err = TlsMaterial::from_pem_files(&fixture("missing.pem"), None).unwrap_err();
        assert_eq!(ErrorKind::NotFound, err.kind());
    }
}
