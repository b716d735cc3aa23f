//! Structural text checks on an issue's title and body.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::FilterConfig;
use crate::platform::types::Issue;

static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    // markdown image, HTML <img>, direct link to an image file
    Regex::new(
        r"(?i)!\[[^\]]*\]\([^)]*\)|<img\s[^>]*>|https?://\S+\.(?:png|jpe?g|gif|svg|webp|bmp|ico)\b",
    )
    .expect("Invalid regex pattern for image references")
});

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:https?://|www\.)\S+|\[[^\]]+\]\([^)]+\)")
        .expect("Invalid regex pattern for hyperlinks")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurityVerdict {
    Pass,
    Reject(String),
}

#[derive(Debug, Clone)]
pub struct PurityFilter {
    require_pure_text: bool,
    reject_screenshot_mentions: bool,
    min_body_length: usize,
}

impl PurityFilter {
    pub fn from_config(config: &FilterConfig) -> Self {
        Self {
            require_pure_text: config.require_pure_text,
            reject_screenshot_mentions: config.reject_screenshot_mentions,
            min_body_length: config.min_body_length,
        }
    }

    pub fn classify(&self, issue: &Issue) -> PurityVerdict {
        self.classify_text(&issue.title, &issue.body)
    }

    /// Checks run in a fixed order and stop at the first failure.
    pub fn classify_text(&self, title: &str, body: &str) -> PurityVerdict {
        let text = format!("{title}\n{body}");

        if self.require_pure_text {
            if IMAGE_RE.is_match(&text) {
                return PurityVerdict::Reject("contains image reference".to_string());
            }
            if LINK_RE.is_match(&text) {
                return PurityVerdict::Reject("contains hyperlink".to_string());
            }
        }

        if self.reject_screenshot_mentions && text.to_lowercase().contains("screenshot") {
            return PurityVerdict::Reject("mentions screenshot".to_string());
        }

        let length = body.trim().chars().count();
        if length < self.min_body_length {
            return PurityVerdict::Reject(format!(
                "body too short: {length} < {}",
                self.min_body_length
            ));
        }

        PurityVerdict::Pass
    }
}
