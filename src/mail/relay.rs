//! Relay domain filtering

/// Domains the server accepts mail for.
///
/// Matching is a plain, case-sensitive `ends_with` on the whole recipient
/// address: `"user@badexample.com"` matches a configured `"example.com"`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayDomains {
    domains: Option<Vec<String>>,
}

impl RelayDomains {
    /// Accept every recipient
    pub fn any() -> Self {
        Self { domains: None }
    }

    /// Accept only recipients ending with one of `domains`.
    ///
    /// Entries are trimmed and blank ones are ignored.
    pub fn only<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|d| d.as_ref().trim().to_owned())
            .filter(|d| !d.is_empty())
            .collect();
        Self {
            domains: Some(domains),
        }
    }

    /// `None` accepts everything, `Some` restricts to the listed domains
    pub fn from_option(domains: Option<Vec<String>>) -> Self {
        match domains {
            Some(domains) => Self::only(domains),
            None => Self::any(),
        }
    }

    pub fn domains(&self) -> Option<&[String]> {
        self.domains.as_deref()
    }

    /// Whether a single recipient address is relayed
    pub fn accepts(&self, recipient: &str) -> bool {
        match &self.domains {
            None => true,
            Some(domains) => domains.iter().any(|d| recipient.ends_with(d.as_str())),
        }
    }

    /// Whether every recipient is relayed
    pub fn accepts_all<S: AsRef<str>>(&self, recipients: &[S]) -> bool {
        recipients.iter().all(|r| self.accepts(r.as_ref()))
    }
}
