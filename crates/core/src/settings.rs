//! Global redirect settings persisted alongside the rule table.

use serde::{Deserialize, Serialize};

/// Mutable settings shared by every site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectSettings {
    /// Persist the remote IP of the last hit. When off, the IP is cleared on
    /// every write.
    pub track_remote_ip: bool,
    /// Newline-separated URL patterns the dispatcher never logs as 404s.
    pub excluded_url_patterns: String,
}

impl RedirectSettings {
    /// Append one URL as a new line of the excluded patterns. A URL that is
    /// already listed is not repeated; returns whether it was added.
    pub fn append_excluded_url(&mut self, url: &str) -> bool {
        if self.excluded_patterns().any(|p| p == url.trim()) {
            return false;
        }
        if !self.excluded_url_patterns.is_empty() && !self.excluded_url_patterns.ends_with('\n') {
            self.excluded_url_patterns.push('\n');
        }
        self.excluded_url_patterns.push_str(url);
        true
    }

    /// Non-blank excluded patterns, one per line.
    pub fn excluded_patterns(&self) -> impl Iterator<Item = &str> {
        self.excluded_url_patterns
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_to_empty_has_no_leading_newline() {
        let mut s = RedirectSettings::default();
        s.append_excluded_url("/a");
        s.append_excluded_url("/b");
        assert_eq!(s.excluded_url_patterns, "/a\n/b");
    }

    #[test]
    fn append_respects_existing_trailing_newline() {
        let mut s = RedirectSettings {
            track_remote_ip: false,
            excluded_url_patterns: "/x\n".to_string(),
        };
        s.append_excluded_url("/y");
        assert_eq!(s.excluded_url_patterns, "/x\n/y");
    }

    #[test]
    fn append_skips_listed_url() {
        let mut s = RedirectSettings {
            track_remote_ip: false,
            excluded_url_patterns: "/a\n /b \n".to_string(),
        };
        assert!(!s.append_excluded_url("/b"));
        assert!(s.append_excluded_url("/c"));
        assert_eq!(s.excluded_url_patterns, "/a\n /b \n/c");
    }

    #[test]
    fn excluded_patterns_skip_blank_lines() {
        let s = RedirectSettings {
            track_remote_ip: true,
            excluded_url_patterns: "/a\r\n\n  \n/b ".to_string(),
        };
        assert_eq!(s.excluded_patterns().collect::<Vec<_>>(), vec!["/a", "/b"]);
    }
}
