//! In-process proxy discovery and checking
//!
//! A broker pushes results onto an `mpsc` queue and terminates the stream
//! with a `None` sentinel. [`FeedBroker`] pulls plain-text `host:port` feeds
//! and keeps the candidates that answer a judge request through the proxy
//! and are not listed on any configured DNSBL zone.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::http;
use crate::config::DiscoveryConfig;
use crate::error::{Result, ReelError};
use crate::models::{Proxy, ProxyScheme};

/// Anonymity level a proxy must provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Anonymity {
    Transparent,
    Anonymous,
    High,
}

impl Anonymity {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "transparent" => Some(Self::Transparent),
            "anonymous" | "anm" => Some(Self::Anonymous),
            "high" | "elite" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transparent => "Transparent",
            Self::Anonymous => "Anonymous",
            Self::High => "High",
        }
    }

    /// Name used by common proxy list feeds
    fn feed_name(&self) -> &'static str {
        match self {
            Self::Transparent => "transparent",
            Self::Anonymous => "anonymous",
            Self::High => "elite",
        }
    }
}

/// A wanted proxy type: scheme plus accepted anonymity levels
/// (empty levels accept any)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryType {
    pub scheme: ProxyScheme,
    pub anonymity: Vec<Anonymity>,
}

impl DiscoveryType {
    /// Parse `HTTP`, `HTTPS:High` or `HTTP:Anonymous,High`
    pub fn parse(raw: &str) -> Result<Self> {
        let (scheme_raw, levels_raw) = match raw.split_once(':') {
            Some((s, l)) => (s, l),
            None => (raw, ""),
        };

        let scheme = ProxyScheme::from_str(scheme_raw.trim()).ok_or_else(|| {
            ReelError::InvalidConfig(format!("unsupported discovery type: {}", scheme_raw))
        })?;

        let anonymity = levels_raw
            .split(',')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| {
                Anonymity::from_str(l).ok_or_else(|| {
                    ReelError::InvalidConfig(format!("unknown anonymity level: {}", l))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { scheme, anonymity })
    }

    fn accepts(&self, level: Anonymity) -> bool {
        self.anonymity.is_empty() || self.anonymity.contains(&level)
    }
}

impl Serialize for DiscoveryType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let levels: Vec<&str> = self.anonymity.iter().map(|a| a.as_str()).collect();
        (self.scheme.as_str().to_uppercase(), levels).serialize(serializer)
    }
}

/// Parameters of one discovery or check run
#[derive(Debug, Clone)]
pub struct DiscoveryQuery {
    /// Maximum proxies to return (0 = unbounded)
    pub limit: usize,
    pub countries: Vec<String>,
    pub types: Vec<DiscoveryType>,
    pub dnsbl_hosts: Vec<String>,
    pub judge_url: String,
    pub check_timeout: Duration,
    pub check_concurrency: usize,
}

impl DiscoveryQuery {
    pub fn from_config(config: &DiscoveryConfig, limit: usize) -> Self {
        Self {
            limit,
            countries: config.countries.clone(),
            types: config.types.clone(),
            dnsbl_hosts: config.dnsbl_hosts.clone(),
            judge_url: config.judge_url.clone(),
            check_timeout: Duration::from_secs(config.check_timeout_secs.max(1)),
            check_concurrency: config.check_concurrency.max(1),
        }
    }

    /// Settings handed to the external discovery helper
    pub fn settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            dnsbl: non_empty(&self.dnsbl_hosts),
            types: self.types.clone(),
            countries: non_empty(&self.countries),
        }
    }

    /// Scheme assigned to bare `host:port` feed entries
    fn default_scheme(&self) -> ProxyScheme {
        let only_https = !self.types.is_empty()
            && self.types.iter().all(|t| t.scheme == ProxyScheme::Https);
        if only_https {
            ProxyScheme::Https
        } else {
            ProxyScheme::Http
        }
    }

    fn accepts(&self, proxy: &Proxy, level: Anonymity) -> bool {
        self.types.is_empty()
            || self
                .types
                .iter()
                .any(|t| t.scheme == proxy.scheme && t.accepts(level))
    }

    fn wanted_anonymity(&self) -> Vec<Anonymity> {
        let mut levels: Vec<Anonymity> = Vec::new();
        for t in &self.types {
            for level in &t.anonymity {
                if !levels.contains(level) {
                    levels.push(*level);
                }
            }
        }
        levels
    }
}

/// Structured discovery settings, serialised as JSON for the helper process
#[derive(Debug, Clone, Serialize)]
pub struct DiscoverySettings {
    pub dnsbl: Option<Vec<String>>,
    pub types: Vec<DiscoveryType>,
    pub countries: Option<Vec<String>>,
}

fn non_empty(list: &[String]) -> Option<Vec<String>> {
    if list.is_empty() {
        None
    } else {
        Some(list.to_vec())
    }
}

/// Asynchronous discovery backend
///
/// Both methods push results onto `tx` and must finish the stream with
/// `None`. Dropping `tx` without a sentinel also ends the stream.
#[async_trait]
pub trait ProxyBroker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Discover up to `query.limit` working proxies
    async fn find(&self, query: &DiscoveryQuery, tx: mpsc::Sender<Option<Proxy>>) -> Result<()>;

    /// Forward the reachable subset of `candidates`
    async fn check(
        &self,
        candidates: Vec<Proxy>,
        query: &DiscoveryQuery,
        tx: mpsc::Sender<Option<Proxy>>,
    ) -> Result<()>;
}

/// Broker backed by public plain-text proxy feeds
pub struct FeedBroker {
    feeds: Vec<Url>,
    fetch_timeout: Duration,
}

impl FeedBroker {
    pub fn new(feeds: Vec<Url>) -> Self {
        Self {
            feeds,
            fetch_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Result<Self> {
        let feeds = config
            .feed_urls
            .iter()
            .map(|raw| {
                Url::parse(raw).map_err(|e| {
                    ReelError::InvalidConfig(format!("invalid feed url {}: {}", raw, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(feeds))
    }

    /// Feed URL with country / anonymity filters applied to the query
    /// parameters the feed already exposes
    fn feed_url(feed: &Url, query: &DiscoveryQuery) -> Url {
        let countries = query.countries.join(",").to_lowercase();
        let anonymity: Vec<&str> = query
            .wanted_anonymity()
            .iter()
            .map(|a| a.feed_name())
            .collect();

        let pairs: Vec<(String, String)> = feed
            .query_pairs()
            .map(|(k, v)| {
                let value = match k.as_ref() {
                    "country" if !countries.is_empty() => countries.clone(),
                    "anonymity" if !anonymity.is_empty() => anonymity.join(","),
                    _ => v.into_owned(),
                };
                (k.into_owned(), value)
            })
            .collect();

        let mut url = feed.clone();
        if !pairs.is_empty() {
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
        url
    }

    async fn fetch_candidates(&self, query: &DiscoveryQuery) -> Vec<Proxy> {
        let scheme = query.default_scheme();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for feed in &self.feeds {
            let url = Self::feed_url(feed, query);
            match http::get(&url, None, self.fetch_timeout).await {
                Ok(resp) if resp.status.is_success() => {
                    let text = resp.text();
                    let before = candidates.len();
                    for line in text.lines() {
                        if let Some(proxy) = parse_feed_line(line, scheme) {
                            if seen.insert(proxy.clone()) {
                                candidates.push(proxy);
                            }
                        }
                    }
                    info!(
                        feed = %feed.host_str().unwrap_or_default(),
                        found = candidates.len() - before,
                        "Fetched proxy feed"
                    );
                }
                Ok(resp) => warn!(feed = %feed, status = %resp.status, "Proxy feed returned an error"),
                Err(e) => warn!(feed = %feed, error = %e, "Cannot load proxy feed"),
            }
        }

        candidates
    }

    /// Check candidates concurrently, forwarding hits until the limit
    async fn check_and_forward(
        &self,
        candidates: Vec<Proxy>,
        query: &DiscoveryQuery,
        tx: &mpsc::Sender<Option<Proxy>>,
    ) -> Result<usize> {
        let checked = candidates.len();
        let mut results = futures::stream::iter(candidates)
            .map(|proxy| async move {
                let ok = check_proxy(&proxy, query).await;
                (proxy, ok)
            })
            .buffer_unordered(query.check_concurrency);

        let mut forwarded = 0usize;
        while let Some((proxy, ok)) = results.next().await {
            if !ok {
                continue;
            }
            if tx.send(Some(proxy)).await.is_err() {
                return Err(ReelError::Broker("result queue closed".into()));
            }
            forwarded += 1;
            if query.limit > 0 && forwarded >= query.limit {
                break;
            }
        }

        debug!(checked, forwarded, "Broker check pass finished");
        Ok(forwarded)
    }
}

#[async_trait]
impl ProxyBroker for FeedBroker {
    fn name(&self) -> &'static str {
        "feed"
    }

    #[instrument(skip(self, query, tx), fields(limit = query.limit))]
    async fn find(&self, query: &DiscoveryQuery, tx: mpsc::Sender<Option<Proxy>>) -> Result<()> {
        let mut candidates = self.fetch_candidates(query).await;
        if candidates.is_empty() {
            let _ = tx.send(None).await;
            return Err(ReelError::Broker("no feed returned candidates".into()));
        }

        {
            let mut rng = rand::thread_rng();
            candidates.shuffle(&mut rng);
        }

        let result = self.check_and_forward(candidates, query, &tx).await;
        let _ = tx.send(None).await;
        result.map(|_| ())
    }

    #[instrument(skip(self, candidates, query, tx), fields(candidates = candidates.len()))]
    async fn check(
        &self,
        candidates: Vec<Proxy>,
        query: &DiscoveryQuery,
        tx: mpsc::Sender<Option<Proxy>>,
    ) -> Result<()> {
        let unbounded = DiscoveryQuery {
            limit: 0,
            ..query.clone()
        };
        let result = self.check_and_forward(candidates, &unbounded, &tx).await;
        let _ = tx.send(None).await;
        result.map(|_| ())
    }
}

fn parse_feed_line(line: &str, scheme: ProxyScheme) -> Option<Proxy> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    if line.contains("://") {
        return Proxy::parse(line).ok();
    }
    let (host, port) = line.rsplit_once(':')?;
    let port = port.trim().parse().ok()?;
    Some(Proxy::new(scheme, host.trim(), port))
}

/// Judge and DNSBL check for one candidate
async fn check_proxy(proxy: &Proxy, query: &DiscoveryQuery) -> bool {
    if !query.dnsbl_hosts.is_empty() {
        if let Some(ip) = resolve_ipv4(&proxy.host).await {
            if let Some(zone) = dnsbl_listing(ip, &query.dnsbl_hosts).await {
                debug!(proxy = %proxy, zone = %zone, "Proxy listed on DNSBL");
                return false;
            }
        }
    }

    let judge = match Url::parse(&query.judge_url) {
        Ok(url) => url,
        Err(e) => {
            warn!(judge = %query.judge_url, error = %e, "Invalid judge url");
            return false;
        }
    };

    match http::get(&judge, Some(proxy), query.check_timeout).await {
        Ok(resp) if resp.status.is_success() => {
            let level = anonymity_of(&resp.text());
            let accepted = query.accepts(proxy, level);
            if !accepted {
                debug!(proxy = %proxy, level = level.as_str(), "Proxy anonymity not accepted");
            }
            accepted
        }
        Ok(resp) => {
            debug!(proxy = %proxy, status = %resp.status, "Judge rejected proxy");
            false
        }
        Err(e) => {
            debug!(proxy = %proxy, error = %e, "Proxy check failed");
            false
        }
    }
}

/// Judges echo the caller address as `origin`; more than one address means
/// the proxy forwarded ours
fn anonymity_of(body: &str) -> Anonymity {
    #[derive(Deserialize)]
    struct Judge {
        origin: String,
    }

    match serde_json::from_str::<Judge>(body) {
        Ok(judge) if judge.origin.contains(',') => Anonymity::Transparent,
        Ok(_) => Anonymity::High,
        Err(_) => Anonymity::Anonymous,
    }
}

async fn resolve_ipv4(host: &str) -> Option<Ipv4Addr> {
    if let Ok(IpAddr::V4(ip)) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    let addrs = tokio::net::lookup_host((host, 0)).await.ok()?;
    addrs.into_iter().find_map(|addr| match addr.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(_) => None,
    })
}

/// First DNSBL zone that lists `ip`; a resolvable query name means listed
async fn dnsbl_listing(ip: Ipv4Addr, zones: &[String]) -> Option<String> {
    for zone in zones {
        let name = dnsbl_query_name(ip, zone);
        let listed = match tokio::net::lookup_host((name.as_str(), 0)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(_) => false,
        };
        if listed {
            return Some(zone.clone());
        }
    }
    None
}

fn dnsbl_query_name(ip: Ipv4Addr, zone: &str) -> String {
    let [a, b, c, d] = ip.octets();
    format!("{}.{}.{}.{}.{}", d, c, b, a, zone.trim_end_matches('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::http::test_server;

    fn query() -> DiscoveryQuery {
        DiscoveryQuery {
            limit: 10,
            countries: Vec::new(),
            types: Vec::new(),
            dnsbl_hosts: Vec::new(),
            judge_url: "http://judge.example/ip".to_string(),
            check_timeout: Duration::from_secs(5),
            check_concurrency: 4,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<Option<Proxy>>) -> (Vec<Proxy>, bool) {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            match item {
                Some(p) => out.push(p),
                None => return (out, true),
            }
        }
        (out, false)
    }

    #[test]
    fn test_discovery_type_parse() {
        let t = DiscoveryType::parse("HTTP:Anonymous,High").unwrap();
        assert_eq!(t.scheme, ProxyScheme::Http);
        assert_eq!(t.anonymity, vec![Anonymity::Anonymous, Anonymity::High]);

        let t = DiscoveryType::parse("https").unwrap();
        assert!(t.anonymity.is_empty());
        assert!(t.accepts(Anonymity::Transparent));

        assert!(DiscoveryType::parse("SOCKS5:High").is_err());
        assert!(DiscoveryType::parse("HTTP:Sneaky").is_err());
    }

    #[test]
    fn test_settings_serialization() {
        let mut q = query();
        q.types = vec![DiscoveryType::parse("HTTP:Anonymous,High").unwrap()];
        q.dnsbl_hosts = vec!["bl.spamcop.net".to_string()];

        let json = serde_json::to_value(q.settings()).unwrap();
        assert_eq!(json["types"][0][0], "HTTP");
        assert_eq!(json["types"][0][1][1], "High");
        assert_eq!(json["dnsbl"][0], "bl.spamcop.net");
        assert!(json["countries"].is_null());
    }

    #[test]
    fn test_feed_url_applies_filters() {
        let feed = Url::parse("http://feed.example/v2/?request=getproxies&country=all&anonymity=all").unwrap();
        let mut q = query();
        q.countries = vec!["DE".to_string(), "FR".to_string()];
        q.types = vec![DiscoveryType::parse("HTTP:Anonymous,High").unwrap()];

        let url = FeedBroker::feed_url(&feed, &q);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("country".to_string(), "de,fr".to_string())));
        assert!(pairs.contains(&("anonymity".to_string(), "anonymous,elite".to_string())));
        assert!(pairs.contains(&("request".to_string(), "getproxies".to_string())));
    }

    #[test]
    fn test_parse_feed_line() {
        assert_eq!(
            parse_feed_line(" 1.2.3.4:8080 ", ProxyScheme::Https),
            Some(Proxy::new(ProxyScheme::Https, "1.2.3.4", 8080))
        );
        assert_eq!(
            parse_feed_line("http://5.6.7.8:80", ProxyScheme::Https),
            Some(Proxy::new(ProxyScheme::Http, "5.6.7.8", 80))
        );
        assert_eq!(parse_feed_line("garbage", ProxyScheme::Http), None);
        assert_eq!(parse_feed_line("1.2.3.4:notaport", ProxyScheme::Http), None);
    }

    #[test]
    fn test_anonymity_detection() {
        assert_eq!(anonymity_of("{\"origin\": \"1.2.3.4\"}"), Anonymity::High);
        assert_eq!(
            anonymity_of("{\"origin\": \"10.0.0.1, 1.2.3.4\"}"),
            Anonymity::Transparent
        );
        assert_eq!(anonymity_of("ok"), Anonymity::Anonymous);
    }

    #[test]
    fn test_dnsbl_query_name() {
        let name = dnsbl_query_name(Ipv4Addr::new(1, 2, 3, 4), "bl.spamcop.net.");
        assert_eq!(name, "4.3.2.1.bl.spamcop.net");
    }

    #[tokio::test]
    async fn test_dnsbl_unresolvable_zone_is_not_a_listing() {
        let ip = Ipv4Addr::new(1, 2, 3, 4);
        assert_eq!(dnsbl_listing(ip, &[]).await, None);

        // Reserved TLD, never resolves; a slow resolver just times out
        let zones = vec!["dnsbl.invalid".to_string()];
        let listed = tokio::time::timeout(Duration::from_secs(10), dnsbl_listing(ip, &zones)).await;
        assert!(!matches!(listed, Ok(Some(_))));
    }

    #[tokio::test]
    async fn test_check_forwards_reachable_subset() {
        let good = test_server::spawn(200, "{\"origin\": \"9.9.9.9\"}").await;
        let bad = test_server::spawn(403, "denied").await;
        let closed = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };

        let candidates = vec![
            Proxy::parse(&good.addr.to_string()).unwrap(),
            Proxy::parse(&bad.addr.to_string()).unwrap(),
            Proxy::parse(&closed.to_string()).unwrap(),
        ];

        let broker = FeedBroker::new(Vec::new());
        let (tx, rx) = mpsc::channel(16);
        let q = query();
        let (result, (found, terminated)) =
            tokio::join!(broker.check(candidates, &q, tx), drain(rx));

        assert!(result.is_ok());
        assert!(terminated);
        assert_eq!(found, vec![Proxy::parse(&good.addr.to_string()).unwrap()]);
    }

    #[tokio::test]
    async fn test_check_rejects_unwanted_anonymity() {
        let transparent = test_server::spawn(200, "{\"origin\": \"10.0.0.1, 9.9.9.9\"}").await;
        let mut q = query();
        q.types = vec![DiscoveryType::parse("HTTP:Anonymous,High").unwrap()];

        let broker = FeedBroker::new(Vec::new());
        let (tx, rx) = mpsc::channel(16);
        let candidates = vec![Proxy::parse(&transparent.addr.to_string()).unwrap()];
        let (_, (found, terminated)) = tokio::join!(broker.check(candidates, &q, tx), drain(rx));

        assert!(terminated);
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_find_fetches_feed_and_respects_limit() {
        let proxy_a = test_server::spawn(200, "{\"origin\": \"9.9.9.9\"}").await;
        let proxy_b = test_server::spawn(200, "{\"origin\": \"8.8.8.8\"}").await;
        let feed_body: &'static str = Box::leak(
            format!("{}\n{}\n{}\n", proxy_a.addr, proxy_b.addr, proxy_a.addr).into_boxed_str(),
        );
        let feed = test_server::spawn(200, feed_body).await;

        let broker = FeedBroker::new(vec![Url::parse(&format!("http://{}/list", feed.addr)).unwrap()]);
        let mut q = query();
        q.limit = 1;

        let (tx, rx) = mpsc::channel(16);
        let (result, (found, terminated)) = tokio::join!(broker.find(&q, tx), drain(rx));

        assert!(result.is_ok());
        assert!(terminated);
        assert_eq!(found.len(), 1);
        assert_eq!(feed.hits(), 1);
    }

    #[tokio::test]
    async fn test_find_with_dead_feed_sends_sentinel_and_errors() {
        let closed = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let broker = FeedBroker::new(vec![Url::parse(&format!("http://{}/", closed)).unwrap()]);

        let (tx, rx) = mpsc::channel(4);
        let q = query();
        let (result, (found, terminated)) = tokio::join!(broker.find(&q, tx), drain(rx));

        assert!(matches!(result, Err(ReelError::Broker(_))));
        assert!(terminated);
        assert!(found.is_empty());
    }
}
