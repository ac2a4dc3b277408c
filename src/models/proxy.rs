use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ReelError};

/// Proxy scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    #[default]
    Http,
    Https,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(ProxyScheme::Http),
            "https" => Some(ProxyScheme::Https),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An egress proxy endpoint, canonically `scheme://host:port`
///
/// Two proxies are equal when their canonical strings are equal; the derived
/// `Eq`/`Hash` on the normalised fields gives exactly that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proxy {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
}

impl Proxy {
    pub fn new(scheme: ProxyScheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into().to_lowercase(),
            port,
        }
    }

    /// Parse `host:port` (defaults to http) or `scheme://host:port`
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ReelError::InvalidProxyAddress("empty proxy entry".into()));
        }

        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{}", raw)
        };

        let url = Url::parse(&with_scheme)?;

        let scheme = ProxyScheme::from_str(url.scheme())
            .ok_or_else(|| ReelError::UnsupportedProtocol(url.scheme().to_string()))?;

        if url.fragment().is_some() || url.query().is_some() {
            return Err(ReelError::InvalidProxyAddress(format!(
                "{} must not include query/fragment",
                raw
            )));
        }
        if !(url.path().is_empty() || url.path() == "/") {
            return Err(ReelError::InvalidProxyAddress(format!(
                "{} must not include a path",
                raw
            )));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(ReelError::InvalidProxyAddress(format!(
                "{} must not include credentials",
                raw
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| ReelError::InvalidProxyAddress(format!("{} has no host", raw)))?;

        // Url drops the port when it equals the scheme default, so an explicit
        // port is checked on the raw text instead of relying on `url.port()`.
        let port = match url.port() {
            Some(p) => p,
            None if has_explicit_port(raw) => url.port_or_known_default().ok_or_else(|| {
                ReelError::InvalidProxyAddress(format!("{} has no port", raw))
            })?,
            None => {
                return Err(ReelError::InvalidProxyAddress(format!(
                    "{} has no port",
                    raw
                )))
            }
        };

        Ok(Self::new(scheme, host, port))
    }

    /// Canonical `scheme://host:port` form
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// The `host:port` key shared by every logical proxy on the same egress
    pub fn host_port(&self) -> HostPort {
        HostPort(format!("{}:{}", self.host, self.port))
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl FromStr for Proxy {
    type Err = ReelError;

    fn from_str(s: &str) -> Result<Self> {
        Proxy::parse(s)
    }
}

fn has_explicit_port(raw: &str) -> bool {
    let authority = raw.split("://").last().unwrap_or(raw);
    let authority = authority.trim_end_matches('/');
    match authority.rsplit_once(':') {
        Some((_, port)) => !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Download-slot key (`host:port`) for one physical egress
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostPort(String);

impl HostPort {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a list of raw entries, skipping blanks and comments and collapsing
/// duplicates while keeping first-seen order. Unparseable entries are returned
/// separately so callers can log them.
pub fn parse_proxy_list<'a, I>(lines: I) -> (Vec<Proxy>, Vec<String>)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut proxies = Vec::new();
    let mut rejected = Vec::new();

    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Proxy::parse(line) {
            Ok(proxy) => {
                if seen.insert(proxy.clone()) {
                    proxies.push(proxy);
                }
            }
            Err(_) => rejected.push(line.to_string()),
        }
    }

    (proxies, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_scheme_parsing() {
        assert_eq!(ProxyScheme::from_str("HTTP"), Some(ProxyScheme::Http));
        assert_eq!(ProxyScheme::from_str("https"), Some(ProxyScheme::Https));
        assert_eq!(ProxyScheme::from_str("socks5"), None);
        assert_eq!(ProxyScheme::Https.to_string(), "https");
    }

    #[test]
    fn test_parse_bare_host_port_defaults_to_http() {
        let proxy = Proxy::parse("1.2.3.4:8080").unwrap();
        assert_eq!(proxy.scheme, ProxyScheme::Http);
        assert_eq!(proxy.host, "1.2.3.4");
        assert_eq!(proxy.port, 8080);
        assert_eq!(proxy.url(), "http://1.2.3.4:8080");
    }

    #[test]
    fn test_parse_qualified_and_default_port() {
        let proxy = Proxy::parse("https://Proxy.Example:443").unwrap();
        assert_eq!(proxy.scheme, ProxyScheme::Https);
        assert_eq!(proxy.to_string(), "https://proxy.example:443");

        let proxy = Proxy::parse("http://10.0.0.1:80/").unwrap();
        assert_eq!(proxy.port, 80);
    }

    #[test]
    fn test_parse_rejects_invalid_entries() {
        assert!(matches!(
            Proxy::parse("socks5://1.2.3.4:1080"),
            Err(ReelError::UnsupportedProtocol(_))
        ));
        assert!(matches!(
            Proxy::parse("1.2.3.4"),
            Err(ReelError::InvalidProxyAddress(_))
        ));
        assert!(Proxy::parse("http://1.2.3.4:8080/path").is_err());
        assert!(Proxy::parse("http://user:pw@1.2.3.4:8080").is_err());
        assert!(Proxy::parse("   ").is_err());
    }

    #[test]
    fn test_equality_is_by_canonical_form() {
        let a: Proxy = "1.2.3.4:8080".parse().unwrap();
        let b: Proxy = "http://1.2.3.4:8080".parse().unwrap();
        let c: Proxy = "https://1.2.3.4:8080".parse().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.host_port(), c.host_port());
        assert_eq!(a.host_port().as_str(), "1.2.3.4:8080");
    }

    #[test]
    fn test_parse_proxy_list_collapses_duplicates() {
        let text = "1.1.1.1:80\n\n# comment\nhttp://1.1.1.1:80\nhttps://2.2.2.2:443\nnot-a-proxy\n";
        let (proxies, rejected) = parse_proxy_list(text.lines());
        assert_eq!(
            proxies.iter().map(Proxy::url).collect::<Vec<_>>(),
            vec!["http://1.1.1.1:80", "https://2.2.2.2:443"]
        );
        assert_eq!(rejected, vec!["not-a-proxy".to_string()]);
    }
}
