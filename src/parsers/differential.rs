use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::RankedDiagnosis;
use crate::parsers::json::extract_json;

/// `+1. Name: reasoning`, `1) Name`, `2- Name: ...`
static RANKED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?\s*(\d+)[\.\)\-]?\s*([^:]+)(?::\s*(.*))?$")
        .expect("RANKED_LINE is a compile-time constant")
});

static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n{3,}").expect("EXCESS_NEWLINES is a compile-time constant")
});

/// Unescapes literal `\n` sequences and collapses runs of blank lines.
pub fn normalize(text: &str) -> String {
    let unescaped = text.replace("\\n", "\n");
    EXCESS_NEWLINES.replace_all(&unescaped, "\n\n").into_owned()
}

/// Splits a free-text differential into ranked diagnoses.
///
/// Lines that do not start a new entry are appended to the reasoning of the
/// entry above them. When no line is numbered, the whole text becomes a
/// single rank-1 diagnosis named after the first line (up to its first
/// colon). Empty input gives an empty list.
pub fn parse_differential(raw: &str) -> Vec<RankedDiagnosis> {
    if raw.trim().is_empty() {
        tracing::debug!("Empty diagnosis text received");
        return Vec::new();
    }

    let text = normalize(raw);
    let lines: Vec<&str> = text
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let mut diagnoses = Vec::new();
    let mut current: Option<(Option<u32>, String, Vec<&str>)> = None;

    for line in &lines {
        if let Some(caps) = RANKED_LINE.captures(line) {
            if let Some(entry) = current.take() {
                diagnoses.push(finish(entry));
            }

            let rank = caps[1].parse().ok();
            let name = caps[2].trim().to_string();
            let mut reasoning = Vec::new();
            if let Some(initial) = caps.get(3).map(|m| m.as_str().trim()) {
                if !initial.is_empty() {
                    reasoning.push(initial);
                }
            }
            current = Some((rank, name, reasoning));
        } else if let Some((_, _, reasoning)) = current.as_mut() {
            reasoning.push(line);
        }
    }

    if let Some(entry) = current.take() {
        diagnoses.push(finish(entry));
    }

    if diagnoses.is_empty() {
        if let Some(fallback) = single_diagnosis(&lines) {
            tracing::debug!("No numbered diagnoses found, treating input as a single diagnosis");
            diagnoses.push(fallback);
        }
    }

    diagnoses
}

fn finish((rank, name, reasoning): (Option<u32>, String, Vec<&str>)) -> RankedDiagnosis {
    let reasoning = reasoning.join("\n").trim().to_string();
    RankedDiagnosis {
        rank,
        name: Some(name).filter(|n| !n.is_empty()),
        reasoning: Some(reasoning).filter(|r| !r.is_empty()),
    }
}

fn single_diagnosis(lines: &[&str]) -> Option<RankedDiagnosis> {
    let (first, rest) = lines.split_first()?;

    let (name, mut reasoning) = match first.split_once(':') {
        Some((name, reasoning)) => (name.trim(), vec![reasoning.trim()]),
        None => (*first, Vec::new()),
    };
    reasoning.extend(rest.iter().copied());

    Some(finish((Some(1), name.to_string(), reasoning)))
}

/// Returns the inner text of the first `<tag>...</tag>` block among `tags`,
/// trying them in order.
pub fn extract_tagged_block<'a>(text: &'a str, tags: &[&str]) -> Option<&'a str> {
    for tag in tags {
        let open = format!("<{}>", tag);
        let close = format!("</{}>", tag);
        if let Some(start) = text.find(&open) {
            let start = start + open.len();
            if let Some(end) = text[start..].find(&close) {
                return Some(text[start..start + end].trim());
            }
        }
        tracing::debug!("No <{}> block found", tag);
    }
    None
}

#[derive(Deserialize)]
struct JsonDiagnosis {
    diagnosis: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Parses a JSON array of `{diagnosis, description}` objects, ranked by
/// position.
pub fn parse_json_differential(raw: &str) -> Result<Vec<RankedDiagnosis>> {
    let json = extract_json(raw)?;
    let entries: Vec<JsonDiagnosis> = serde_json::from_str(json)
        .map_err(|e| Error::ParseError(format!("Invalid diagnosis list: {}", e)))?;

    Ok(entries
        .into_iter()
        .enumerate()
        .filter(|(_, entry)| entry.diagnosis.as_deref().is_some_and(|d| !d.trim().is_empty()))
        .map(|(i, entry)| RankedDiagnosis {
            rank: Some(i as u32 + 1),
            name: entry.diagnosis.map(|d| d.trim().to_string()),
            reasoning: entry.description,
        })
        .collect())
}
