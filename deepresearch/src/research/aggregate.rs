//! Findings aggregation (credibility filter, identity dedup, ranking) and the
//! compact digest handed to the gap analyzer.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use super::model::Finding;

/// Findings below this credibility are dropped.
pub const MIN_CREDIBILITY: f64 = 0.5;

const DIGEST_PER_TOPIC: usize = 3;
const DIGEST_MAX: usize = 50;
const DIGEST_CLAIM_CHARS: usize = 200;
const DIGEST_SOURCE_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IdentityKey {
    Doi(String),
    Url(String),
    TitleAuthor(String, String),
}

fn identity_keys(finding: &Finding) -> Vec<IdentityKey> {
    let citation = &finding.citation;
    let mut keys = Vec::with_capacity(3);
    if let Some(doi) = citation.doi.as_deref().filter(|d| !d.is_empty()) {
        keys.push(IdentityKey::Doi(doi.to_string()));
    }
    if let Some(url) = citation.url.as_deref().filter(|u| !u.is_empty()) {
        keys.push(IdentityKey::Url(url.to_string()));
    }
    if let (Some(title), Some(author)) = (
        citation.title.as_deref().filter(|t| !t.is_empty()),
        citation.authors.first(),
    ) {
        keys.push(IdentityKey::TitleAuthor(title.to_string(), author.clone()));
    }
    keys
}

/// Derived view of the accumulated findings, used for reporting.
///
/// 1. drops findings with credibility below [`MIN_CREDIBILITY`];
/// 2. findings sharing a DOI, else a URL, else (title, first author) are one source;
///    the highest-credibility member is kept, ties keep the first encountered;
/// 3. sorts by credibility descending, stable.
///
/// A finding that matches several earlier sources merges them all into the earliest
/// one, rather than joining only the first key that matches, so that aggregation stays
/// idempotent: aggregating an aggregated list returns it unchanged.
pub fn aggregate(findings: &[Finding]) -> Vec<Finding> {
    let mut slots: Vec<Option<Finding>> = Vec::new();
    let mut index: HashMap<IdentityKey, usize> = HashMap::new();

    for finding in findings
        .iter()
        .filter(|f| f.credibility_score >= MIN_CREDIBILITY)
    {
        let keys = identity_keys(finding);
        let mut matched: Vec<usize> = keys.iter().filter_map(|k| index.get(k).copied()).collect();
        matched.sort_unstable();
        matched.dedup();

        let Some(&target) = matched.first() else {
            let slot = slots.len();
            slots.push(Some(finding.clone()));
            for key in keys {
                index.insert(key, slot);
            }
            continue;
        };

        // A finding can bridge two earlier sources (same DOI as one, same URL as
        // another); they collapse into the earliest slot.
        let mut best = slots[target].take();
        for &other in &matched[1..] {
            let candidate = slots[other].take();
            if better(&candidate, &best) {
                best = candidate;
            }
        }
        let incoming = Some(finding.clone());
        if better(&incoming, &best) {
            best = incoming;
        }
        slots[target] = best;
        for slot in index.values_mut() {
            if matched[1..].contains(slot) {
                *slot = target;
            }
        }
        for key in keys {
            index.insert(key, target);
        }
    }

    let mut kept: Vec<Finding> = slots.into_iter().flatten().collect();
    kept.sort_by(|a, b| {
        b.credibility_score
            .partial_cmp(&a.credibility_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    kept
}

fn better(candidate: &Option<Finding>, current: &Option<Finding>) -> bool {
    match (candidate, current) {
        (Some(c), Some(cur)) => c.credibility_score > cur.credibility_score,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut cut: String = s.chars().take(max).collect();
    cut.push_str("...");
    cut
}

/// Compact text view of the findings for the gap analyzer: grouped by topic, the
/// three most credible per topic, at most 50 lines.
pub fn findings_digest(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "No findings yet.".to_string();
    }

    let mut by_topic: BTreeMap<&str, Vec<&Finding>> = BTreeMap::new();
    for finding in findings {
        by_topic.entry(finding.topic.as_str()).or_default().push(finding);
    }

    let mut lines = Vec::new();
    let mut shown = 0;
    'topics: for (topic, group) in by_topic.iter_mut() {
        group.sort_by(|a, b| {
            b.credibility_score
                .partial_cmp(&a.credibility_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        lines.push(format!("\n## {} ({} findings)", topic, group.len()));
        for finding in group.iter().take(DIGEST_PER_TOPIC) {
            if shown >= DIGEST_MAX {
                break 'topics;
            }
            shown += 1;
            lines.push(format!(
                "- [{:.2}] {} (source: {})",
                finding.credibility_score,
                truncate(&finding.claim, DIGEST_CLAIM_CHARS),
                truncate(&finding.citation.source, DIGEST_SOURCE_CHARS),
            ));
        }
    }

    let mut out = String::new();
    let _ = write!(
        out,
        "=== FINDINGS SUMMARY ({} total, showing {}) ===",
        findings.len(),
        shown
    );
    for line in lines {
        out.push('\n');
        out.push_str(&line);
    }
    out
}
