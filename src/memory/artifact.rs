//! Frontmatter + markdown memory document.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_yaml::{Mapping, Value};

use super::MemoryError;

pub const LAST_RUN: &str = "lastRun";
pub const TOTAL_RUNS: &str = "totalRuns";
pub const TOTAL_TOKENS: &str = "totalTokens";
pub const TOTAL_COST: &str = "totalCost";
pub const LAST_TOPICS: &str = "lastTopics";

/// Maximum number of topics kept in `lastTopics`.
pub const MAX_TOPICS: usize = 5;

/// Metadata and header text exactly as they were read from disk.
#[derive(Debug, Clone)]
struct Origin {
    metadata: Mapping,
    header: String,
}

/// A task's persistent memory: ordered metadata plus a free-form body.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifact {
    pub metadata: Mapping,
    pub body: String,
    origin: Option<Origin>,
}

impl PartialEq for MemoryArtifact {
    fn eq(&self, other: &Self) -> bool {
        self.metadata == other.metadata && self.body == other.body
    }
}

impl MemoryArtifact {
    pub fn new(metadata: Mapping, body: impl Into<String>) -> Self {
        Self {
            metadata,
            body: body.into(),
            origin: None,
        }
    }

    /// Parse a memory document.
    ///
    /// A document that does not open with `---` is all body. The body is kept
    /// verbatim, including leading blank lines.
    pub fn parse(text: &str) -> Result<Self, MemoryError> {
        let Some(rest) = text.strip_prefix("---\n") else {
            return Ok(Self::new(Mapping::new(), text));
        };

        let (yaml, header_len) = if rest == "---" {
            ("", text.len())
        } else if rest.starts_with("---\n") {
            ("", "---\n---\n".len())
        } else if let Some(pos) = rest.find("\n---\n") {
            (&rest[..pos + 1], 4 + pos + 5)
        } else if let Some(yaml) = rest.strip_suffix("\n---") {
            (yaml, text.len())
        } else {
            return Err(MemoryError::Parse(
                "frontmatter block is not terminated by '---'".to_string(),
            ));
        };

        let metadata = match serde_yaml::from_str::<Value>(yaml) {
            _ if yaml.trim().is_empty() => Mapping::new(),
            Ok(Value::Mapping(map)) => map,
            Ok(Value::Null) => Mapping::new(),
            Ok(_) => {
                return Err(MemoryError::Parse(
                    "frontmatter must be a mapping".to_string(),
                ))
            }
            Err(e) => return Err(MemoryError::Parse(format!("invalid frontmatter: {}", e))),
        };

        let header = text[..header_len].to_string();
        Ok(Self {
            origin: Some(Origin {
                metadata: metadata.clone(),
                header,
            }),
            metadata,
            body: text[header_len..].to_string(),
        })
    }

    /// Serialize back to the on-disk format.
    ///
    /// Unchanged metadata keeps its original text, so an untouched document
    /// round-trips byte for byte.
    pub fn render(&self) -> Result<String, MemoryError> {
        if let Some(origin) = &self.origin {
            if origin.metadata == self.metadata {
                return Ok(format!("{}{}", origin.header, self.body));
            }
        }
        if self.metadata.is_empty() {
            return Ok(self.body.clone());
        }

        let yaml = serde_yaml::to_string(&self.metadata)
            .map_err(|e| MemoryError::Parse(format!("failed to serialize metadata: {}", e)))?;
        Ok(format!("---\n{}---\n{}", yaml, self.body))
    }

    /// Merge overrides into the metadata key by key.
    pub fn merge_metadata(&mut self, overrides: &Mapping) {
        for (key, value) in overrides {
            self.metadata.insert(key.clone(), value.clone());
        }
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get(LAST_RUN)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn total_runs(&self) -> u64 {
        self.metadata.get(TOTAL_RUNS).and_then(|v| v.as_u64()).unwrap_or(0)
    }

    pub fn total_tokens(&self) -> u64 {
        self.metadata.get(TOTAL_TOKENS).and_then(|v| v.as_u64()).unwrap_or(0)
    }

    pub fn total_cost(&self) -> f64 {
        self.metadata.get(TOTAL_COST).and_then(|v| v.as_f64()).unwrap_or(0.0)
    }

    pub fn last_topics(&self) -> Vec<String> {
        self.metadata
            .get(LAST_TOPICS)
            .and_then(|v| v.as_sequence())
            .map(|seq| {
                seq.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Book-keep one completed run.
    pub fn record_run(&mut self, now: DateTime<Utc>, tokens: u64, cost: f64, topics: Vec<String>) {
        let total_runs = self.total_runs() + 1;
        let total_tokens = self.total_tokens().saturating_add(tokens);
        let total_cost = round_cost(self.total_cost() + cost.max(0.0));
        let set = |metadata: &mut Mapping, key: &str, value: Value| {
            metadata.insert(Value::String(key.to_string()), value);
        };

        set(
            &mut self.metadata,
            LAST_RUN,
            Value::String(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        set(&mut self.metadata, TOTAL_RUNS, Value::from(total_runs));
        set(&mut self.metadata, TOTAL_TOKENS, Value::from(total_tokens));
        set(&mut self.metadata, TOTAL_COST, Value::from(total_cost));
        if !topics.is_empty() {
            let topics = topics.into_iter().take(MAX_TOPICS).map(Value::String).collect();
            set(&mut self.metadata, LAST_TOPICS, Value::Sequence(topics));
        }
    }
}

fn round_cost(cost: f64) -> f64 {
    (cost * 1_000_000.0).round() / 1_000_000.0
}

/// Check the well-known metadata keys; other keys are free-form.
pub fn validate_metadata(metadata: &Mapping) -> Result<(), MemoryError> {
    let invalid = |msg: String| Err(MemoryError::Validation(msg));

    for key in [TOTAL_RUNS, TOTAL_TOKENS] {
        if let Some(value) = metadata.get(key) {
            if value.as_u64().is_none() {
                return invalid(format!("{} must be a non-negative integer, got {:?}", key, value));
            }
        }
    }

    if let Some(value) = metadata.get(TOTAL_COST) {
        match value.as_f64() {
            Some(cost) if cost.is_finite() && cost >= 0.0 => {}
            _ => return invalid(format!("{} must be a non-negative number, got {:?}", TOTAL_COST, value)),
        }
    }

    if let Some(value) = metadata.get(LAST_RUN) {
        let parsed = value.as_str().map(DateTime::parse_from_rfc3339);
        if !matches!(parsed, Some(Ok(_))) {
            return invalid(format!("{} must be an RFC 3339 timestamp, got {:?}", LAST_RUN, value));
        }
    }

    if let Some(value) = metadata.get(LAST_TOPICS) {
        let all_strings = value
            .as_sequence()
            .is_some_and(|seq| seq.iter().all(|t| t.is_string()));
        if !all_strings {
            return invalid(format!("{} must be a list of strings", LAST_TOPICS));
        }
    }

    Ok(())
}

/// Headings of a markdown document, in order, without duplicates.
pub fn topics_from_markdown(text: &str) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        let hashes = trimmed.chars().take_while(|c| *c == '#').count();
        if hashes == 0 || hashes > 6 {
            continue;
        }
        let Some(title) = trimmed[hashes..].strip_prefix(' ') else {
            continue;
        };
        let title = title.trim().trim_end_matches('#').trim();
        if title.is_empty() || topics.iter().any(|t| t == title) {
            continue;
        }
        topics.push(title.to_string());
        if topics.len() == MAX_TOPICS {
            break;
        }
    }
    topics
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = "---\nlastRun: 2024-05-01T09:00:00Z\ntotalRuns: 3\ntotalTokens: 1200\ntotalCost: 0.0042\nlastTopics:\n  - Rust\n  - Tokio\ncustom: keep me\n---\n\n# Notes\n\nSomething learned.\n";

    #[test]
    fn test_parse_sample() {
        let artifact = MemoryArtifact::parse(SAMPLE).unwrap();
        assert_eq!(artifact.total_runs(), 3);
        assert_eq!(artifact.total_tokens(), 1200);
        assert!((artifact.total_cost() - 0.0042).abs() < 1e-12);
        assert_eq!(artifact.last_topics(), vec!["Rust", "Tokio"]);
        assert_eq!(
            artifact.last_run(),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap())
        );
        assert_eq!(artifact.body, "\n# Notes\n\nSomething learned.\n");
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let odd_spacing = "---\ntotalRuns:   7   # comment\nz: 1\na: 2\n---\nbody";
        for text in [SAMPLE, odd_spacing, "---\n---\nonly body", "plain body\n", "---\nk: v\n---", ""] {
            let artifact = MemoryArtifact::parse(text).unwrap();
            assert_eq!(artifact.render().unwrap(), text);
        }
    }

    #[test]
    fn test_changed_metadata_is_reserialized_in_order() {
        let mut artifact = MemoryArtifact::parse("---\nzeta: 1\nalpha: 2\n---\nbody").unwrap();
        let mut overrides = Mapping::new();
        overrides.insert(Value::from("alpha"), Value::from(3));
        artifact.merge_metadata(&overrides);

        assert_eq!(artifact.render().unwrap(), "---\nzeta: 1\nalpha: 3\n---\nbody");
    }

    #[test]
    fn test_unterminated_frontmatter_is_an_error() {
        assert!(matches!(
            MemoryArtifact::parse("---\ntotalRuns: 1\nno end"),
            Err(MemoryError::Parse(_))
        ));
    }

    #[test]
    fn test_non_mapping_frontmatter_is_an_error() {
        assert!(MemoryArtifact::parse("---\n- a\n- b\n---\nbody").is_err());
    }

    #[test]
    fn test_validate_metadata() {
        let ok = MemoryArtifact::parse(SAMPLE).unwrap();
        assert!(validate_metadata(&ok.metadata).is_ok());

        let bad = [
            "totalRuns: -1",
            "totalRuns: 1.5",
            "totalTokens: lots",
            "totalCost: -0.1",
            "lastRun: yesterday",
            "lastTopics: not-a-list",
            "lastTopics: [1, 2]",
        ];
        for yaml in bad {
            let artifact = MemoryArtifact::parse(&format!("---\n{}\n---\n", yaml)).unwrap();
            assert!(
                matches!(validate_metadata(&artifact.metadata), Err(MemoryError::Validation(_))),
                "accepted {yaml}"
            );
        }
    }

    #[test]
    fn test_record_run_accumulates() {
        let mut artifact = MemoryArtifact::parse(SAMPLE).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();
        artifact.record_run(now, 300, 0.001, vec!["Async".to_string()]);

        assert_eq!(artifact.total_runs(), 4);
        assert_eq!(artifact.total_tokens(), 1500);
        assert!((artifact.total_cost() - 0.0052).abs() < 1e-9);
        assert_eq!(artifact.last_run(), Some(now));
        assert_eq!(artifact.last_topics(), vec!["Async"]);
        assert_eq!(artifact.metadata.get("custom").and_then(|v| v.as_str()), Some("keep me"));
        assert!(validate_metadata(&artifact.metadata).is_ok());
    }

    #[test]
    fn test_record_run_on_empty_artifact() {
        let mut artifact = MemoryArtifact::default();
        artifact.record_run(Utc::now(), 10, 0.0, Vec::new());
        assert_eq!(artifact.total_runs(), 1);
        assert!(artifact.metadata.get(LAST_TOPICS).is_none());

        let reparsed = MemoryArtifact::parse(&artifact.render().unwrap()).unwrap();
        assert_eq!(reparsed, artifact);
    }

    #[test]
    fn test_topics_from_markdown() {
        let text = "# Daily digest\n\nintro\n## Rust 1.80 ##\n### Daily digest\n#hashtag\n####### too deep\n## A\n## B\n## C\n## D\n";
        assert_eq!(
            topics_from_markdown(text),
            vec!["Daily digest", "Rust 1.80", "A", "B", "C"]
        );
        assert!(topics_from_markdown("no headings").is_empty());
    }
}
