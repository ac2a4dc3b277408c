//! User-agent assignment
//!
//! Draws user-agent strings from a weighted per-category table, optionally
//! pinning one string to each proxy for as long as it stays in the pool.

use dashmap::DashMap;
use rand::distributions::{Distribution, WeightedIndex};
use tracing::debug;

use crate::models::Proxy;

/// Family of browsers user-agents are drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UaCategory {
    #[default]
    Any,
    Chrome,
    Firefox,
    Safari,
    Edge,
    Mobile,
}

impl UaCategory {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "any" | "random" => Some(Self::Any),
            "chrome" | "google" => Some(Self::Chrome),
            "firefox" | "ff" => Some(Self::Firefox),
            "safari" => Some(Self::Safari),
            "edge" => Some(Self::Edge),
            "mobile" => Some(Self::Mobile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Chrome => "chrome",
            Self::Firefox => "firefox",
            Self::Safari => "safari",
            Self::Edge => "edge",
            Self::Mobile => "mobile",
        }
    }
}

/// (user-agent, category, is_mobile, weight)
type UaEntry = (&'static str, UaCategory, bool, u32);

static USER_AGENTS: &[UaEntry] = &[
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        UaCategory::Chrome,
        false,
        30,
    ),
    (
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        UaCategory::Chrome,
        false,
        12,
    ),
    (
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        UaCategory::Chrome,
        false,
        5,
    ),
    (
        "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
        UaCategory::Chrome,
        true,
        14,
    ),
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
        UaCategory::Firefox,
        false,
        8,
    ),
    (
        "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
        UaCategory::Firefox,
        false,
        3,
    ),
    (
        "Mozilla/5.0 (Android 14; Mobile; rv:125.0) Gecko/125.0 Firefox/125.0",
        UaCategory::Firefox,
        true,
        1,
    ),
    (
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        UaCategory::Safari,
        false,
        8,
    ),
    (
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
        UaCategory::Safari,
        true,
        16,
    ),
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
        UaCategory::Edge,
        false,
        9,
    ),
];

fn entries_for(category: UaCategory) -> Vec<&'static UaEntry> {
    USER_AGENTS
        .iter()
        .filter(|(_, cat, mobile, _)| match category {
            UaCategory::Any => true,
            UaCategory::Mobile => *mobile,
            other => *cat == other,
        })
        .collect()
}

/// Maps proxies (or individual requests) to user-agent strings
pub struct UserAgentAssigner {
    category: UaCategory,
    fallback: Option<String>,
    sticky: DashMap<Proxy, String>,
}

impl UserAgentAssigner {
    pub fn new(category: UaCategory, fallback: Option<String>) -> Self {
        Self {
            category,
            fallback,
            sticky: DashMap::new(),
        }
    }

    pub fn category(&self) -> UaCategory {
        self.category
    }

    /// User-agent for a request going out through `proxy`
    ///
    /// With `sticky` and a proxy, the first string drawn for that proxy is
    /// reused until [`forget`](Self::forget) or [`reset`](Self::reset).
    pub fn assign(&self, proxy: Option<&Proxy>, sticky: bool) -> String {
        match proxy {
            Some(proxy) if sticky => self
                .sticky
                .entry(proxy.clone())
                .or_insert_with(|| {
                    let ua = self.draw();
                    debug!(proxy = %proxy, user_agent = %ua, "Assigned user-agent to proxy");
                    ua
                })
                .clone(),
            _ => self.draw(),
        }
    }

    /// Drop the pinned user-agent of a proxy that left the pool
    pub fn forget(&self, proxy: &Proxy) {
        self.sticky.remove(proxy);
    }

    /// Drop every pinned user-agent
    pub fn reset(&self) {
        self.sticky.clear();
    }

    pub fn pinned(&self, proxy: &Proxy) -> Option<String> {
        self.sticky.get(proxy).map(|v| v.clone())
    }

    fn draw(&self) -> String {
        let entries = entries_for(self.category);
        let weights = entries.iter().map(|(_, _, _, w)| *w);

        match WeightedIndex::new(weights) {
            Ok(dist) => {
                let mut rng = rand::thread_rng();
                entries[dist.sample(&mut rng)].0.to_string()
            }
            Err(_) => self
                .fallback
                .clone()
                .unwrap_or_else(|| USER_AGENTS[0].0.to_string()),
        }
    }
}

impl Default for UserAgentAssigner {
    fn default() -> Self {
        Self::new(UaCategory::Any, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(raw: &str) -> Proxy {
        Proxy::parse(raw).unwrap()
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!(UaCategory::from_str("random"), Some(UaCategory::Any));
        assert_eq!(UaCategory::from_str("FireFox"), Some(UaCategory::Firefox));
        assert_eq!(UaCategory::from_str("mobile"), Some(UaCategory::Mobile));
        assert_eq!(UaCategory::from_str("netscape"), None);
        assert_eq!(UaCategory::Edge.as_str(), "edge");
    }

    #[test]
    fn test_every_category_has_entries() {
        for category in [
            UaCategory::Any,
            UaCategory::Chrome,
            UaCategory::Firefox,
            UaCategory::Safari,
            UaCategory::Edge,
            UaCategory::Mobile,
        ] {
            assert!(!entries_for(category).is_empty(), "{:?}", category);
        }
    }

    #[test]
    fn test_draw_respects_category() {
        let firefox = UserAgentAssigner::new(UaCategory::Firefox, None);
        for _ in 0..50 {
            assert!(firefox.assign(None, false).contains("Firefox"));
        }

        let mobile = UserAgentAssigner::new(UaCategory::Mobile, None);
        for _ in 0..50 {
            let ua = mobile.assign(None, false);
            assert!(ua.contains("Mobile") || ua.contains("iPhone"), "{}", ua);
        }
    }

    #[test]
    fn test_sticky_assignment_is_stable_per_proxy() {
        let assigner = UserAgentAssigner::default();
        let p = proxy("1.2.3.4:8080");

        let first = assigner.assign(Some(&p), true);
        for _ in 0..20 {
            assert_eq!(assigner.assign(Some(&p), true), first);
        }
        assert_eq!(assigner.pinned(&p), Some(first));
    }

    #[test]
    fn test_non_sticky_does_not_pin() {
        let assigner = UserAgentAssigner::default();
        let p = proxy("1.2.3.4:8080");
        assigner.assign(Some(&p), false);
        assert!(assigner.pinned(&p).is_none());
    }

    #[test]
    fn test_forget_and_reset_drop_pins() {
        let assigner = UserAgentAssigner::default();
        let a = proxy("1.1.1.1:80");
        let b = proxy("2.2.2.2:80");
        assigner.assign(Some(&a), true);
        assigner.assign(Some(&b), true);

        assigner.forget(&a);
        assert!(assigner.pinned(&a).is_none());
        assert!(assigner.pinned(&b).is_some());

        assigner.reset();
        assert!(assigner.pinned(&b).is_none());
    }
}
