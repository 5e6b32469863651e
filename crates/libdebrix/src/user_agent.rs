use rand::Rng;

// Plain desktop browser strings. Some indexers and debrid endpoints reject
// anything that does not look like a browser.
const DESKTOP_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
];

/// A randomly picked desktop User-Agent, chosen per request.
pub(crate) fn random_desktop() -> &'static str {
    let idx = rand::rng().random_range(0..DESKTOP_USER_AGENTS.len());
    DESKTOP_USER_AGENTS[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_look_like_desktop_browsers() {
        for ua in DESKTOP_USER_AGENTS {
            assert!(ua.starts_with("Mozilla/5.0 ("));
        }
        assert!(random_desktop().starts_with("Mozilla/5.0"));
    }
}
