//! Leaf certificate content providers.
//!
//! A provider tells the leaf rotator what to put in the next leaf and may
//! expose a recheck signal that schedules an extra tick when that answer
//! changes.

use parking_lot::RwLock;
use rotor_pki::{CertificateRequest, KeyUsage, SubjectAltName};
use tokio::sync::watch;
use tracing::info;

/// What a leaf certificate should contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafContent {
    /// Subject common name.
    pub subject: String,
    /// Subject alternative names, sorted and deduplicated.
    pub san: Vec<SubjectAltName>,
    /// Extended key usages.
    pub key_usage: Vec<KeyUsage>,
}

impl LeafContent {
    /// Comma-joined SAN list as recorded in the hostnames annotation.
    #[must_use]
    pub fn hostnames(&self) -> String {
        self.san
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Converts the content into an issuance request.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the subject or key usages are empty.
    pub fn to_request(&self) -> rotor_pki::Result<CertificateRequest> {
        let builder = self
            .san
            .iter()
            .cloned()
            .fold(CertificateRequest::builder(&self.subject), |b, san| b.san(san));
        self.key_usage
            .iter()
            .fold(builder, |b, usage| b.key_usage(*usage))
            .build()
    }
}

/// Supplies leaf content and an optional recheck signal.
pub trait CertContentProvider: Send + Sync {
    /// Content for the next leaf.
    fn content(&self) -> LeafContent;

    /// A channel whose value changes whenever [`Self::content`] would return
    /// something new.
    fn recheck_signal(&self) -> Option<watch::Receiver<u64>> {
        None
    }
}

/// Serving certificate for a set of hostnames and IP addresses.
///
/// The subject is the first hostname in sorted order. Hostnames can be changed
/// at runtime; every effective change bumps the recheck signal.
#[derive(Debug)]
pub struct ServingCertContent {
    hostnames: RwLock<Vec<SubjectAltName>>,
    recheck: watch::Sender<u64>,
}

impl ServingCertContent {
    /// Creates a provider serving `hostnames`.
    pub fn new<I, S>(hostnames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (recheck, _) = watch::channel(0);
        Self {
            hostnames: RwLock::new(normalize(hostnames)),
            recheck,
        }
    }

    /// Current hostnames in sorted order.
    #[must_use]
    pub fn hostnames(&self) -> Vec<String> {
        self.hostnames.read().iter().map(ToString::to_string).collect()
    }

    /// Replaces the hostname list, signalling a recheck if it changed.
    pub fn set_hostnames<I, S>(&self, hostnames: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let next = normalize(hostnames);
        {
            let mut current = self.hostnames.write();
            if *current == next {
                return false;
            }
            *current = next;
        }
        info!(hostnames = ?self.hostnames(), "serving hostnames changed");
        self.recheck.send_modify(|generation| *generation += 1);
        true
    }
}

impl CertContentProvider for ServingCertContent {
    fn content(&self) -> LeafContent {
        let san = self.hostnames.read().clone();
        LeafContent {
            subject: san.first().map(ToString::to_string).unwrap_or_default(),
            san,
            key_usage: vec![KeyUsage::ServerAuth],
        }
    }

    fn recheck_signal(&self) -> Option<watch::Receiver<u64>> {
        Some(self.recheck.subscribe())
    }
}

/// Client certificate for a fixed user name.
#[derive(Debug, Clone)]
pub struct ClientCertContent {
    user: String,
}

impl ClientCertContent {
    /// Creates a provider for `user`.
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }
}

impl CertContentProvider for ClientCertContent {
    fn content(&self) -> LeafContent {
        LeafContent {
            subject: self.user.clone(),
            san: Vec::new(),
            key_usage: vec![KeyUsage::ClientAuth],
        }
    }
}

fn normalize<I, S>(hostnames: I) -> Vec<SubjectAltName>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut names: Vec<_> = hostnames
        .into_iter()
        .map(|h| h.as_ref().trim().to_string())
        .filter(|h| !h.is_empty())
        .collect();
    names.sort();
    names.dedup();
    names.iter().map(|h| SubjectAltName::from_hostname(h)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serving_content_is_sorted_and_deduplicated() {
        let provider =
            ServingCertContent::new(["svc.internal", "10.0.0.1", "api.internal", "svc.internal"]);
        let content = provider.content();

        assert_eq!(content.subject, "10.0.0.1");
        assert_eq!(content.hostnames(), "10.0.0.1,api.internal,svc.internal");
        assert_eq!(content.key_usage, vec![KeyUsage::ServerAuth]);
        assert!(matches!(content.san[0], SubjectAltName::Ip(_)));

        let request = content.to_request().unwrap();
        assert_eq!(request.san.len(), 3);
    }

    #[test]
    fn hostname_updates_bump_the_recheck_signal() {
        let provider = ServingCertContent::new(["a.internal"]);
        let signal = provider.recheck_signal().unwrap();
        assert_eq!(*signal.borrow(), 0);

        assert!(!provider.set_hostnames(["a.internal", " "]));
        assert_eq!(*signal.borrow(), 0);

        assert!(provider.set_hostnames(["b.internal", "a.internal"]));
        assert_eq!(*signal.borrow(), 1);
        assert!(signal.has_changed().unwrap());
        assert_eq!(provider.hostnames(), vec!["a.internal", "b.internal"]);
    }

    #[test]
    fn empty_serving_content_fails_request_validation() {
        let provider = ServingCertContent::new(Vec::<String>::new());
        assert!(provider.content().to_request().is_err());
    }

    #[test]
    fn client_content_has_no_signal() {
        let provider = ClientCertContent::new("system:rotor");
        let content = provider.content();
        assert_eq!(content.subject, "system:rotor");
        assert_eq!(content.hostnames(), "");
        assert_eq!(content.key_usage, vec![KeyUsage::ClientAuth]);
        assert!(provider.recheck_signal().is_none());
    }
}
