//! Accept/reject policy for search-result candidates.

use std::fmt;

use serde::{Deserialize, Serialize};
use sift_core::Candidate;
use tracing::debug;
use url::Url;

/// Immutable block/allow lists handed to [`ResultFilter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPolicy {
    /// Matched as case-insensitive substrings of the url host.
    pub blocked_domains: Vec<String>,
    /// Matched against lowercased `title snippet`.
    pub negative_keywords: Vec<String>,
    /// At least one must appear verbatim in the title or the snippet.
    pub highlight_keywords: Vec<String>,
    pub menu_separators: Vec<String>,
    pub menu_separator_threshold: usize,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            blocked_domains: strings(&[
                "tiktok.com",
                "youtube.com",
                "instagram.com",
                "x.com",
                "led.go.th",
                "bidding.pea.co.th",
            ]),
            negative_keywords: strings(&[
                "ผู้ชนะ",
                "ยกเลิก",
                "รปภ",
                "มือสอง",
                "ทุบตึก",
                "ตัวแทน",
                "เช่าซื้อ",
                "อาคารพาณิชย์",
                "ขายอาคาร",
                "บังคับคดี",
                "รอขาย",
                "ธนาคารยึด",
                "ที่ดิน",
                "ธนาคาร",
                "อย่างไร",
                "ไหม",
                "หรือไม่",
            ]),
            highlight_keywords: strings(&[
                "ขายทอดตลาด",
                "จำหน่าย",
                "ประกาศขาย",
                "ครุภัณฑ์",
                "พัสดุ",
                "วัสดุ",
                "รถยนต์",
                "อาคาร",
                "รื้อถอน",
                "เสื่อมสภาพ",
                "ชำรุด",
            ]),
            menu_separators: strings(&[" · ", " | ", " > ", " - "]),
            menu_separator_threshold: 3,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    BlockedDomain(String),
    NegativeKeyword(String),
    MenuPattern { separators: usize },
    NoHighlightKeyword,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::BlockedDomain(domain) => write!(f, "blocked domain `{domain}`"),
            Rejection::NegativeKeyword(word) => write!(f, "negative keyword `{word}`"),
            Rejection::MenuPattern { separators } => {
                write!(f, "looks like a menu page ({separators} separators)")
            }
            Rejection::NoHighlightKeyword => f.write_str("no highlight keyword"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultFilter {
    policy: FilterPolicy,
    blocked_domains: Vec<String>,
    negative_keywords: Vec<String>,
}

impl Default for ResultFilter {
    fn default() -> Self {
        Self::new(FilterPolicy::default())
    }
}

impl ResultFilter {
    pub fn new(policy: FilterPolicy) -> Self {
        let lower = |items: &[String]| {
            items
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase())
                .collect::<Vec<_>>()
        };
        Self {
            blocked_domains: lower(&policy.blocked_domains),
            negative_keywords: lower(&policy.negative_keywords),
            policy,
        }
    }

    pub fn policy(&self) -> &FilterPolicy {
        &self.policy
    }

    pub fn is_acceptable(&self, candidate: &Candidate) -> bool {
        match self.evaluate(candidate) {
            Ok(()) => true,
            Err(reason) => {
                debug!(url = %candidate.url, %reason, "candidate rejected");
                false
            }
        }
    }

    /// The first rule that rejects `candidate`, checked in a fixed order.
    pub fn evaluate(&self, candidate: &Candidate) -> Result<(), Rejection> {
        let host = host_of(&candidate.url);
        if let Some(domain) = self.blocked_domains.iter().find(|d| host.contains(d.as_str())) {
            return Err(Rejection::BlockedDomain(domain.clone()));
        }

        let combined = format!("{} {}", candidate.title, candidate.snippet).to_lowercase();
        if let Some(word) = self
            .negative_keywords
            .iter()
            .find(|w| combined.contains(w.as_str()))
        {
            return Err(Rejection::NegativeKeyword(word.clone()));
        }

        let separators = self
            .policy
            .menu_separators
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| combined.matches(s.as_str()).count())
            .sum::<usize>();
        if separators >= self.policy.menu_separator_threshold {
            return Err(Rejection::MenuPattern { separators });
        }

        let highlighted = self.policy.highlight_keywords.iter().any(|word| {
            !word.is_empty()
                && (candidate.title.contains(word.as_str()) || candidate.snippet.contains(word.as_str()))
        });
        if !highlighted {
            return Err(Rejection::NoHighlightKeyword);
        }
        Ok(())
    }
}

/// Lowercased host of `url`, or the whole lowercased url when it does not parse.
fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| url.to_lowercase())
}
