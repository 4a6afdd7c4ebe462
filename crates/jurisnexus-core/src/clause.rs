//! Clause detection for plain-text contracts.
//!
//! Recognises three heading families, tried in order; the first family that
//! matches anything wins so that numbered sub-items inside a `第N條` article
//! are not counted as clauses of their own:
//!
//! - `第一條`, `第12条` (Chinese article headings)
//! - `Article 3`, `Clause 4A`, `Section 10` (English headings)
//! - `1.` / `1)` at the start of a line

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static HEADING_FAMILIES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(?m)^[ \t]*(第[一二三四五六七八九十百千萬万零〇\d]+[條条])[：:\s]*").unwrap(),
        Regex::new(r"(?mi)^[ \t]*((?:article|clause|section)\s+\d+[a-z]?)[.:)\s]*").unwrap(),
        Regex::new(r"(?m)^[ \t]*(\d{1,3})[.)][ \t]+").unwrap(),
    ]
});

/// A single contract clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
    pub id: String,
    pub text: String,
}

/// Split contract text into clauses in document order.
///
/// Text before the first heading (title, recitals) is not a clause.
pub fn split_into_clauses(text: &str) -> Vec<Clause> {
    for family in HEADING_FAMILIES.iter() {
        let headings: Vec<_> = family.captures_iter(text).collect();
        if headings.is_empty() {
            continue;
        }

        let mut clauses = Vec::with_capacity(headings.len());
        for (i, caps) in headings.iter().enumerate() {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let id = normalise_id(&caps[1]);
            let end = headings
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(text.len());
            clauses.push(Clause {
                id,
                text: text[whole.end()..end].trim().to_string(),
            });
        }
        return clauses;
    }
    Vec::new()
}

fn normalise_id(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Render clauses as `id: text` paragraphs for prompt assembly.
pub fn format_clauses(clauses: &[Clause]) -> String {
    clauses
        .iter()
        .map(|c| format!("{}: {}", c.id, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
