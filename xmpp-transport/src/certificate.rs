//! Decoded view of a peer certificate.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha384, Sha512};
use x509_parser::der_parser::oid::Oid;
use x509_parser::extensions::GeneralName;
use x509_parser::objects::{oid2sn, oid_registry};
use x509_parser::parse_x509_certificate;

/// OID of the `id-on-xmppAddr` otherName (RFC 6120, section 13.7.1.4).
pub const ID_ON_XMPPADDR: &str = "1.3.6.1.5.5.7.8.5";

/// The decoded fields of a certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CertElement {
    /// X.509 version, e.g. `3`.
    Version,
    /// Serial number, colon-separated hex.
    SerialNumber,
    /// Subject distinguished name.
    Subject,
    /// Issuer distinguished name.
    Issuer,
    /// Start of the validity period.
    NotBefore,
    /// End of the validity period.
    NotAfter,
    /// Public key algorithm.
    KeyAlgorithm,
    /// Signature algorithm.
    SignatureAlgorithm,
    /// SHA-1 fingerprint of the DER encoding, lowercase hex.
    FingerprintSha1,
    /// SHA-256 fingerprint of the DER encoding, lowercase hex.
    FingerprintSha256,
}

impl CertElement {
    /// Number of elements.
    pub const COUNT: usize = 10;

    /// All elements, in table order.
    pub const ALL: [CertElement; CertElement::COUNT] = [
        CertElement::Version,
        CertElement::SerialNumber,
        CertElement::Subject,
        CertElement::Issuer,
        CertElement::NotBefore,
        CertElement::NotAfter,
        CertElement::KeyAlgorithm,
        CertElement::SignatureAlgorithm,
        CertElement::FingerprintSha1,
        CertElement::FingerprintSha256,
    ];

    /// Human-readable name of the element.
    pub fn description(self) -> &'static str {
        match self {
            CertElement::Version => "X.509 Version",
            CertElement::SerialNumber => "SerialNumber",
            CertElement::Subject => "Subject",
            CertElement::Issuer => "Issuer",
            CertElement::NotBefore => "Issued On",
            CertElement::NotAfter => "Expires On",
            CertElement::KeyAlgorithm => "Public Key Algorithm",
            CertElement::SignatureAlgorithm => "Certificate Signature Algorithm",
            CertElement::FingerprintSha1 => "Fingerprint SHA-1",
            CertElement::FingerprintSha256 => "Fingerprint SHA-256",
        }
    }
}

/// Why a certificate could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    /// Not a valid X.509 certificate.
    Parse(String),
    /// No certificate in the PEM input.
    NoCertificate,
}

impl fmt::Display for CertificateError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CertificateError::Parse(e) => write!(fmt, "invalid certificate: {}", e),
            CertificateError::NoCertificate => write!(fmt, "no certificate found"),
        }
    }
}

impl std::error::Error for CertificateError {}

/// A peer certificate with its decoded elements and subject alternative names.
///
/// Built in one go from the DER encoding: either every element is filled in or no
/// `Certificate` exists.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    pem: String,
    elements: [String; CertElement::COUNT],
    signature_oid: String,
    dns_names: Vec<String>,
    xmpp_addrs: Vec<String>,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.element(CertElement::Subject))
            .field("issuer", &self.element(CertElement::Issuer))
            .field("dns_names", &self.dns_names)
            .field("xmpp_addrs", &self.xmpp_addrs)
            .finish()
    }
}

impl Certificate {
    /// Decodes a DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Certificate, CertificateError> {
        let (_, cert) =
            parse_x509_certificate(der).map_err(|e| CertificateError::Parse(e.to_string()))?;

        let mut dns_names = Vec::new();
        let mut xmpp_addrs = Vec::new();
        let san = cert
            .subject_alternative_name()
            .map_err(|e| CertificateError::Parse(e.to_string()))?;
        if let Some(san) = san {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                    GeneralName::OtherName(oid, value)
                        if oid.to_id_string() == ID_ON_XMPPADDR =>
                    {
                        let addr = xmpp_addr_value(value).ok_or_else(|| {
                            CertificateError::Parse(String::from("malformed id-on-xmppAddr"))
                        })?;
                        xmpp_addrs.push(addr.to_owned());
                    }
                    _ => {}
                }
            }
        }

        let signature_oid = cert.signature_algorithm.algorithm.to_id_string();
        let elements = [
            (cert.version().0 + 1).to_string(),
            cert.raw_serial_as_string(),
            cert.subject().to_string(),
            cert.issuer().to_string(),
            cert.validity().not_before.to_string(),
            cert.validity().not_after.to_string(),
            algorithm_name(&cert.public_key().algorithm.algorithm),
            algorithm_name(&cert.signature_algorithm.algorithm),
            hex::encode(Sha1::digest(der)),
            hex::encode(Sha256::digest(der)),
        ];

        Ok(Certificate {
            der: der.to_vec(),
            pem: to_pem(der),
            elements,
            signature_oid,
            dns_names,
            xmpp_addrs,
        })
    }

    /// Decodes the first certificate of a PEM document.
    pub fn from_pem(pem: &str) -> Result<Certificate, CertificateError> {
        let der = rustls_pemfile::certs(&mut pem.as_bytes())
            .next()
            .ok_or(CertificateError::NoCertificate)?
            .map_err(|e| CertificateError::Parse(e.to_string()))?;
        Certificate::from_der(der.as_ref())
    }

    /// The DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// The PEM encoding.
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// One decoded element.
    pub fn element(&self, element: CertElement) -> &str {
        &self.elements[element as usize]
    }

    /// All subject alternative DNS names, in certificate order.
    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    /// The `n`th subject alternative DNS name.
    pub fn dns_name(&self, n: usize) -> Option<&str> {
        self.dns_names.get(n).map(String::as_str)
    }

    /// The `n`th `id-on-xmppAddr` identity.
    pub fn xmpp_addr(&self, n: usize) -> Option<&str> {
        self.xmpp_addrs.get(n).map(String::as_str)
    }

    /// How many `id-on-xmppAddr` identities the certificate carries.
    pub fn xmpp_addr_count(&self) -> usize {
        self.xmpp_addrs.len()
    }

    /// The `tls-server-end-point` channel binding data (RFC 5929): the certificate hashed
    /// with its signature hash, SHA-256 for anything weaker than SHA-384.
    pub fn end_point_hash(&self) -> Vec<u8> {
        match self.signature_oid.as_str() {
            // sha384WithRSAEncryption, ecdsa-with-SHA384
            "1.2.840.113549.1.1.12" | "1.2.840.10045.4.3.3" => Sha384::digest(&self.der).to_vec(),
            // sha512WithRSAEncryption, ecdsa-with-SHA512
            "1.2.840.113549.1.1.13" | "1.2.840.10045.4.3.4" => Sha512::digest(&self.der).to_vec(),
            _ => Sha256::digest(&self.der).to_vec(),
        }
    }
}

fn algorithm_name(oid: &Oid) -> String {
    oid2sn(oid, oid_registry())
        .map(str::to_owned)
        .unwrap_or_else(|_| oid.to_id_string())
}

fn to_pem(der: &[u8]) -> String {
    let encoded = Base64.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in encoded.as_bytes().chunks(64) {
        pem.extend(line.iter().map(|b| *b as char));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

/// Splits one DER TLV with the expected tag, returning its value and the remaining input.
fn der_value(data: &[u8], tag: u8) -> Option<(&[u8], &[u8])> {
    let (&found, rest) = data.split_first()?;
    if found != tag {
        return None;
    }
    let (&first, rest) = rest.split_first()?;
    let (len, rest) = if first & 0x80 == 0 {
        (first as usize, rest)
    } else {
        let n = (first & 0x7f) as usize;
        if n == 0 || n > 4 || rest.len() < n {
            return None;
        }
        let len = rest[..n]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        (len, &rest[n..])
    };
    if rest.len() < len {
        return None;
    }
    Some(rest.split_at(len))
}

/// The UTF8String inside an otherName value, with or without its `[0] EXPLICIT` wrapper.
fn xmpp_addr_value(value: &[u8]) -> Option<&str> {
    let inner = der_value(value, 0xa0).map_or(value, |(inner, _)| inner);
    let (utf8, _) = der_value(inner, 0x0c)?;
    std::str::from_utf8(utf8).ok()
}
