//! Banner signature table and matching

use crate::top_ports::{service_for_port, PORT_HINT_CONFIDENCE};
use once_cell::sync::Lazy;
use regex::Regex;

pub const EXACT_CONFIDENCE: f64 = 1.0;
pub const EXPECTED_PORT_CONFIDENCE: f64 = 0.8;
pub const OTHER_PORT_CONFIDENCE: f64 = 0.6;

/// A service signature: a name pattern plus an optional version pattern
/// whose first capture group is the version.
#[derive(Debug)]
pub struct ServiceSignature {
    pub service: &'static str,
    pub pattern: Regex,
    pub version: Option<Regex>,
    pub ports: &'static [u16],
}

impl ServiceSignature {
    fn new(service: &'static str, pattern: &str, version: Option<&str>, ports: &'static [u16]) -> Option<Self> {
        let pattern = Regex::new(pattern).ok()?;
        let version = match version {
            Some(v) => Some(Regex::new(v).ok()?),
            None => None,
        };
        Some(Self {
            service,
            pattern,
            version,
            ports,
        })
    }

    fn capture_version(&self, banner: &str) -> Option<String> {
        self.version
            .as_ref()?
            .captures(banner)?
            .get(1)
            .map(|m| m.as_str().to_string())
    }
}

type SignatureRow = (&'static str, &'static str, Option<&'static str>, &'static [u16]);

const SIGNATURE_TABLE: &[SignatureRow] = &[
    ("ssh", r"(?i)^SSH-\d", Some(r"SSH-[\d.]+-(?:OpenSSH_)?([\w.\-]+)"), &[22, 2222]),
    ("ftp", r"(?i)^220[ -].*ftp", Some(r"(?i)(?:vsftpd|ProFTPD|FileZilla Server|Pure-FTPd) ?\(?([\d.]+\w*)"), &[21]),
    ("smtp", r"(?i)^220[ -].*(?:smtp|esmtp|postfix|exim|sendmail)", Some(r"(?i)(?:Postfix|Exim|Sendmail)[ /]([\d.]+\w*)"), &[25, 465, 587, 2525]),
    ("pop3", r"^\+OK", Some(r"(?i)Dovecot ([\d.]+)"), &[110, 995]),
    ("imap", r"(?i)^\* OK.*IMAP|\* CAPABILITY IMAP", Some(r"(?i)Dovecot ([\d.]+)"), &[143, 993]),
    ("http", r"(?i)^HTTP/\d", Some(r"(?im)^Server: *(?:[\w\-]+)/([\d.]+\w*)"), &[80, 443, 8000, 8008, 8080, 8443]),
    ("mysql", r"(?i)mysql|mariadb|^.\x00\x00\x00\x0a[\d.]+", Some(r"([\d]+\.[\d]+\.[\d]+)(?:-MariaDB|-log|-\d|\x00)"), &[3306]),
    ("postgresql", r"(?i)postgres", Some(r"(?i)PostgreSQL ([\d.]+)"), &[5432]),
    ("redis", r"(?i)^\+PONG|^-NOAUTH|redis_version", Some(r"redis_version:([\d.]+)"), &[6379]),
    ("mongodb", r"(?i)mongodb|ismaster", Some(r"(?i)MongoDB ([\d.]+)"), &[27017]),
    ("vnc", r"^RFB \d{3}\.\d{3}", Some(r"^RFB (\d{3}\.\d{3})"), &[5900, 5901]),
    ("telnet", r"(?i)(?:^|\s)(?:login|username):\s*$", None, &[23]),
    ("rdp", r"^\x03\x00", None, &[3389]),
    ("memcached", r"^VERSION \d", Some(r"^VERSION ([\d.]+)"), &[11211]),
];

static SIGNATURES: Lazy<Vec<ServiceSignature>> = Lazy::new(|| {
    SIGNATURE_TABLE
        .iter()
        .filter_map(|&(service, pattern, version, ports)| {
            let signature = ServiceSignature::new(service, pattern, version, ports);
            if signature.is_none() {
                log::warn!("skipping invalid signature for {}", service);
            }
            signature
        })
        .collect()
});

/// Result of matching one banner
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureMatch {
    pub service: Option<String>,
    pub version: Option<String>,
    pub confidence: f64,
}

impl SignatureMatch {
    fn none() -> Self {
        Self {
            service: None,
            version: None,
            confidence: 0.0,
        }
    }
}

/// Identify the service behind `banner` on `port`.
///
/// Exact match (pattern and version) scores 1.0, pattern only scores 0.8 on
/// the signature's expected port and 0.6 elsewhere, a registered port name
/// alone scores 0.3.
pub fn match_banner(port: u16, banner: Option<&str>) -> SignatureMatch {
    if let Some(banner) = banner.filter(|b| !b.is_empty()) {
        let mut best: Option<SignatureMatch> = None;
        for signature in SIGNATURES.iter().filter(|s| s.pattern.is_match(banner)) {
            let version = signature.capture_version(banner);
            let confidence = if version.is_some() {
                EXACT_CONFIDENCE
            } else if signature.ports.contains(&port) {
                EXPECTED_PORT_CONFIDENCE
            } else {
                OTHER_PORT_CONFIDENCE
            };
            if best.as_ref().map_or(true, |b| confidence > b.confidence) {
                best = Some(SignatureMatch {
                    service: Some(signature.service.to_string()),
                    version,
                    confidence,
                });
            }
        }
        if let Some(best) = best {
            return best;
        }
    }

    match service_for_port(port) {
        Some(name) => SignatureMatch {
            service: Some(name.to_string()),
            version: None,
            confidence: PORT_HINT_CONFIDENCE,
        },
        None => SignatureMatch::none(),
    }
}
