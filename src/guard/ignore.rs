//! URLs exempt from all guard evaluation.
//!
//! Infrastructure traffic (bundler assets, hot reload, static files) and
//! endpoints that are legitimately polled at high frequency are forwarded
//! without being recorded, counted, or blocked.

/// Default substring patterns for the ignore-list.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    // Build tool internals and dev servers
    "/__nextjs_original-stack-frame",
    "/_next/static/",
    "/_next/image",
    "/_next/webpack-hmr",
    "/_vercel/insights",
    "/__webpack_hmr",
    "/debug-",
    "/test-",
    // API routes that are polled on purpose
    "/api/cache/",
    "/api/users/by-role",
    "/api/roles",
    "/api/admin/",
    "/api/users/stats",
    "/api/institutions",
    "/api/users?",
    "/api/tv-shows",
    "/api/auth/validate",
    "/api/auth/me",
    // Health checks and well-known files
    "/api/health",
    "/favicon.ico",
    "/robots.txt",
    "/sitemap.xml",
    // Static assets
    "/static/",
    ".css",
    ".js",
    ".png",
    ".jpg",
    ".svg",
    ".ico",
    ".map",
    ".woff",
    ".woff2",
    ".ttf",
    ".eot",
];

/// Substring-based allow-list of URLs the guard never touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreList {
    patterns: Vec<String>,
}

impl IgnoreList {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    /// An ignore-list that matches nothing.
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Check whether a URL contains any ignored pattern.
    pub fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| url.contains(p.as_str()))
    }

    /// Append additional patterns, skipping duplicates.
    pub fn extend<I, S>(&mut self, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for pattern in patterns {
            let pattern = pattern.into();
            if !pattern.is_empty() && !self.patterns.contains(&pattern) {
                self.patterns.push(pattern);
            }
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for IgnoreList {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORE_PATTERNS.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_list_matches_infrastructure() {
        let list = IgnoreList::default();
        assert!(list.matches("http://localhost:3000/_next/static/chunks/main.js"));
        assert!(list.matches("http://localhost:3000/_next/webpack-hmr?page=/"));
        assert!(list.matches("https://portal.example/api/health"));
        assert!(list.matches("https://portal.example/api/auth/validate"));
        assert!(list.matches("https://portal.example/favicon.ico"));
        assert!(list.matches("https://portal.example/fonts/inter.woff2"));
        assert!(list.matches("https://portal.example/api/users?role=teacher"));
    }

    #[test]
    fn test_default_list_leaves_application_endpoints() {
        let list = IgnoreList::default();
        assert!(!list.matches("https://portal.example/api/widgets"));
        assert!(!list.matches("https://portal.example/api/auth/login"));
        assert!(!list.matches("https://portal.example/api/courses/42"));
    }

    #[test]
    fn test_extend_skips_duplicates_and_empty() {
        let mut list = IgnoreList::new(["/api/health"]);
        list.extend(["/api/health", "", "/api/ping"]);
        assert_eq!(list.patterns(), &["/api/health", "/api/ping"]);
        assert!(list.matches("https://x/api/ping"));
    }

    #[test]
    fn test_empty_matches_nothing() {
        assert!(!IgnoreList::empty().matches("https://x/app.js"));
    }
}
