//! Automatic labels for newly merged changesets.
//!
//! A label pattern is plain text with variables:
//!
//! - `${AUTO_INCREMENT_NUMBER}` becomes the next free number, found by
//!   looking at the most recent label that matches the rest of the pattern.
//! - `${BUILD_DATE_FORMATTED, yyyy-MM-dd}` becomes the current date in the
//!   given format (`:` is also accepted as separator).
//!
//! `Rel_${AUTO_INCREMENT_NUMBER}` produces `Rel_0`, then `Rel_1`, and so on.

use chrono::{DateTime, Months, Utc};
use mergeit_core::{Label, RepositoryOps};
use regex::{Captures, Regex};
use std::sync::Arc;
use tracing::{debug, warn};

const START_VARIABLE: &str = "${";
const END_VARIABLE: &str = "}";
const ANY_WILDCARD: &str = "%";
const AUTO_INCREMENT_TAG: &str = "AUTO_INCREMENT_NUMBER";
const DATE_FORMATTED_TAG: &str = "BUILD_DATE_FORMATTED";
const EXISTING_SUFFIX: &str = "_%";

const NO_PATTERN_SPECIFIED: &str =
    "No automatic label pattern was specified. Hence, no label will be created.";
const MALFORMED_PATTERN: &str = "The specified automatic label pattern is not valid. \
    Please review the specified pattern and its variable declarations. \
    E.g. 'Rel_1${AUTO_INCREMENT_NUMBER}'";

/// Result of one labeling attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelResult {
    pub succeeded: bool,
    /// Name of the label created, or attempted. Empty when no name could be
    /// computed.
    pub name: String,
    pub error: String,
}

impl LabelResult {
    fn ok(name: String) -> Self {
        Self {
            succeeded: true,
            name,
            error: String::new(),
        }
    }

    fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            name: name.into(),
            error: error.into(),
        }
    }
}

pub struct LabelStage {
    repo: Arc<dyn RepositoryOps>,
}

impl LabelStage {
    pub fn new(repo: Arc<dyn RepositoryOps>) -> Self {
        Self { repo }
    }

    /// Compute the next label name for `pattern` and create it on
    /// `changeset_id`.
    ///
    /// Naming problems and a rejected creation come back as a failed
    /// [`LabelResult`]; only lookup errors are returned as `Err`.
    pub async fn create(
        &self,
        repository: &str,
        changeset_id: i64,
        pattern: &str,
        now: DateTime<Utc>,
    ) -> mergeit_core::Result<LabelResult> {
        if pattern.is_empty() {
            return Ok(LabelResult::failed("", NO_PATTERN_SPECIFIED));
        }

        let Some(find_pattern) = to_find_pattern(pattern, now) else {
            return Ok(LabelResult::failed("", MALFORMED_PATTERN));
        };

        let since = now.checked_sub_months(Months::new(24));
        let last = self
            .repo
            .find_most_recent_label(repository, &find_pattern, since)
            .await?;

        let Some(candidate) = next_label_name(&find_pattern, last.as_ref()) else {
            return Ok(LabelResult::failed(
                "",
                format!(
                    "An unexpected error occurred while calculating the new auto-incremented label name with pattern [{}].",
                    find_pattern
                ),
            ));
        };

        let name = match self.pick_free_name(repository, &candidate).await? {
            Ok(name) => name,
            Err(suffixed) => {
                return Ok(LabelResult::failed(
                    "",
                    format!(
                        "Despite the calculated label [{}] already exists, mergebot failed to calculate a new auto-generated label name with pattern [{}].",
                        candidate, suffixed
                    ),
                ));
            }
        };

        debug!(label = %name, changeset = changeset_id, "Creating label");
        match self
            .repo
            .create_label(repository, &name, changeset_id, "")
            .await
        {
            Ok(()) => Ok(LabelResult::ok(name)),
            Err(e) => {
                warn!(label = %name, error = %e, "Label creation failed");
                Ok(LabelResult::failed(name, e.to_string()))
            }
        }
    }

    /// `candidate` itself when unused, otherwise the next `<candidate>_N`.
    /// The inner `Err` carries the suffixed pattern that could not be
    /// resolved.
    async fn pick_free_name(
        &self,
        repository: &str,
        candidate: &str,
    ) -> mergeit_core::Result<Result<String, String>> {
        let existing = self
            .repo
            .find_most_recent_label(repository, candidate, None)
            .await?;
        if existing.is_none() {
            return Ok(Ok(candidate.to_string()));
        }

        let suffixed = format!("{}{}", candidate, EXISTING_SUFFIX);
        let last = self
            .repo
            .find_most_recent_label(repository, &suffixed, None)
            .await?;

        Ok(next_label_name(&suffixed, last.as_ref()).ok_or(suffixed))
    }
}

/// Expand the pattern variables into a find pattern where `%` stands for the
/// auto-increment number. `None` when a variable is unterminated, nested,
/// empty or unknown.
pub fn to_find_pattern(pattern: &str, now: DateTime<Utc>) -> Option<String> {
    let mut result = String::with_capacity(pattern.len());
    let mut rest = pattern;

    while let Some(start) = rest.find(START_VARIABLE) {
        result.push_str(&rest[..start]);

        let body_start = start + START_VARIABLE.len();
        let end = rest[body_start..].find(END_VARIABLE)? + body_start;
        let body = &rest[body_start..end];
        if body.contains(START_VARIABLE) {
            return None;
        }

        result.push_str(&expand_variable(body, now)?);
        rest = &rest[end + END_VARIABLE.len()..];
    }

    result.push_str(rest);
    Some(result)
}

fn expand_variable(body: &str, now: DateTime<Utc>) -> Option<String> {
    let body = body.trim();

    if body.starts_with(AUTO_INCREMENT_TAG) {
        return Some(ANY_WILDCARD.to_string());
    }

    let format = body
        .strip_prefix(DATE_FORMATTED_TAG)?
        .trim_start()
        .trim_start_matches([',', ':'])
        .trim();
    if format.is_empty() {
        return None;
    }

    Some(now.format(&to_strftime(format)).to_string())
}

/// Translate a .NET style date format (`yyyy-MM-dd HH:mm`) into strftime
/// syntax. Unknown letters are kept literally.
pub fn to_strftime(format: &str) -> String {
    let chars: Vec<char> = format.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' || c == '"' {
            i += 1;
            while i < chars.len() && chars[i] != c {
                push_literal(&mut out, chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }

        if c == '\\' {
            if let Some(next) = chars.get(i + 1) {
                push_literal(&mut out, *next);
            }
            i += 2;
            continue;
        }

        let run = chars[i..].iter().take_while(|x| **x == c).count();
        let spec = match (c, run) {
            ('y', 1) => "%-y",
            ('y', 2) => "%y",
            ('y', _) => "%Y",
            ('M', 1) => "%-m",
            ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', 1) => "%-d",
            ('d', 2) => "%d",
            ('d', 3) => "%a",
            ('d', _) => "%A",
            ('H', 1) => "%-H",
            ('H', _) => "%H",
            ('h', 1) => "%-I",
            ('h', _) => "%I",
            ('m', 1) => "%-M",
            ('m', _) => "%M",
            ('s', 1) => "%-S",
            ('s', _) => "%S",
            ('f', 1..=3) => "%3f",
            ('f', 4..=6) => "%6f",
            ('f', _) => "%9f",
            ('t', _) => "%p",
            _ => {
                for _ in 0..run {
                    push_literal(&mut out, c);
                }
                i += run;
                continue;
            }
        };
        out.push_str(spec);
        i += run;
    }

    out
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

/// Next name for `find_pattern` given the most recent matching label.
///
/// Without wildcards the pattern is the name. Without a previous label every
/// wildcard becomes `0`. Otherwise every occurrence of the pattern inside the
/// previous label gets its wildcard numbers incremented, right to left. The
/// match is not anchored, so `Rel_8_0` under `Rel_%` yields `Rel_9_0`.
pub fn next_label_name(find_pattern: &str, last: Option<&Label>) -> Option<String> {
    if !find_pattern.contains(ANY_WILDCARD) {
        return Some(find_pattern.to_string());
    }

    let Some(last) = last else {
        return Some(find_pattern.replace(ANY_WILDCARD, "0"));
    };

    let regex = find_pattern
        .split(ANY_WILDCARD)
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"(\d+)");
    let regex = Regex::new(&regex).ok()?;
    if !regex.is_match(&last.name) {
        return None;
    }

    Some(
        regex
            .replace_all(&last.name, |captures: &Captures| increment_numbers(captures))
            .into_owned(),
    )
}

fn increment_numbers(captures: &Captures) -> String {
    let Some(whole) = captures.get(0) else {
        return String::new();
    };
    let groups: Vec<_> = captures.iter().skip(1).flatten().collect();

    let mut text = whole.as_str().to_string();
    for group in groups.into_iter().rev() {
        let Some(next) = group
            .as_str()
            .parse::<u64>()
            .ok()
            .and_then(|number| number.checked_add(1))
        else {
            continue;
        };
        let range = group.start() - whole.start()..group.end() - whole.start();
        text.replace_range(range, &next.to_string());
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRepo;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap()
    }

    fn label(name: &str) -> Label {
        Label {
            name: name.to_string(),
            date: now(),
            changeset_id: 1,
        }
    }

    #[test]
    fn test_find_pattern_expansion() {
        assert_eq!(
            to_find_pattern("Rel_${AUTO_INCREMENT_NUMBER}", now()).as_deref(),
            Some("Rel_%")
        );
        assert_eq!(
            to_find_pattern("Rel_${BUILD_DATE_FORMATTED, yyyy.MM.dd}_${AUTO_INCREMENT_NUMBER}", now())
                .as_deref(),
            Some("Rel_2024.03.07_%")
        );
        assert_eq!(
            to_find_pattern("v${BUILD_DATE_FORMATTED:yyMMdd-HHmm}", now()).as_deref(),
            Some("v240307-1405")
        );
        assert_eq!(to_find_pattern("plain", now()).as_deref(), Some("plain"));
    }

    #[test]
    fn test_malformed_patterns() {
        assert!(to_find_pattern("Rel_${AUTO_INCREMENT_NUMBER", now()).is_none());
        assert!(to_find_pattern("Rel_${AUTO_${AUTO_INCREMENT_NUMBER}}", now()).is_none());
        assert!(to_find_pattern("Rel_${}", now()).is_none());
        assert!(to_find_pattern("Rel_${BUILD_DATE_FORMATTED}", now()).is_none());
        assert!(to_find_pattern("Rel_${UNKNOWN}", now()).is_none());
    }

    #[test]
    fn test_date_format_translation() {
        assert_eq!(to_strftime("yyyy-MM-dd"), "%Y-%m-%d");
        assert_eq!(to_strftime("d/M/yy h:mm tt"), "%-d/%-m/%y %-I:%M %p");
        assert_eq!(to_strftime("'build'_HH"), "build_%H");
        assert_eq!(to_strftime("100%"), "100%%");
    }

    #[test]
    fn test_next_name_increments_right_to_left() {
        assert_eq!(next_label_name("Rel_%", None).as_deref(), Some("Rel_0"));
        assert_eq!(
            next_label_name("Rel_%", Some(&label("Rel_7"))).as_deref(),
            Some("Rel_8")
        );
        assert_eq!(
            next_label_name("Rel_%", Some(&label("Rel_99"))).as_deref(),
            Some("Rel_100")
        );
        assert_eq!(
            next_label_name("v%.%", Some(&label("v1.9"))).as_deref(),
            Some("v2.10")
        );
        assert_eq!(
            next_label_name("Rel_%", Some(&label("Rel_8_0"))).as_deref(),
            Some("Rel_9_0")
        );
        assert_eq!(next_label_name("Rel_%", Some(&label("Other_1"))), None);
        assert_eq!(next_label_name("Rel_1", None).as_deref(), Some("Rel_1"));
    }

    #[tokio::test]
    async fn test_first_label_is_zero() {
        let repo = Arc::new(FakeRepo::default());
        let result = LabelStage::new(repo.clone())
            .create("codice", 456, "Rel_${AUTO_INCREMENT_NUMBER}", now())
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.name, "Rel_0");
        assert_eq!(repo.created_labels(), vec![("Rel_0".to_string(), 456)]);
    }

    #[tokio::test]
    async fn test_increments_most_recent_label() {
        let repo = Arc::new(FakeRepo::default());
        repo.add_label("Rel_6", now() - chrono::Duration::days(3));
        repo.add_label("Rel_7", now() - chrono::Duration::days(1));

        let result = LabelStage::new(repo.clone())
            .create("codice", 456, "Rel_${AUTO_INCREMENT_NUMBER}", now())
            .await
            .unwrap();

        assert_eq!(result.name, "Rel_8");
    }

    #[tokio::test]
    async fn test_existing_candidate_gets_suffix() {
        let repo = Arc::new(FakeRepo::default());
        repo.add_label("Rel_8", now() - chrono::Duration::days(1000));
        repo.add_label("Rel_7", now() - chrono::Duration::days(1));

        let result = LabelStage::new(repo.clone())
            .create("codice", 456, "Rel_${AUTO_INCREMENT_NUMBER}", now())
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.name, "Rel_8_0");
    }

    #[test]
    fn test_overflowing_number_is_left_alone() {
        let max = format!("Rel_{}", u64::MAX);
        assert_eq!(
            next_label_name("Rel_%", Some(&label(&max))).as_deref(),
            Some(max.as_str())
        );
    }

    #[tokio::test]
    async fn test_labeling_continues_after_suffix_fallback() {
        let repo = Arc::new(FakeRepo::default());
        repo.add_label("Rel_8", now() - chrono::Duration::days(1000));
        repo.add_label("Rel_7", now() - chrono::Duration::days(1));
        let stage = LabelStage::new(repo.clone());

        let first = stage
            .create("codice", 456, "Rel_${AUTO_INCREMENT_NUMBER}", now())
            .await
            .unwrap();
        assert_eq!(first.name, "Rel_8_0");

        let second = stage
            .create("codice", 457, "Rel_${AUTO_INCREMENT_NUMBER}", now())
            .await
            .unwrap();
        assert!(second.succeeded, "{}", second.error);
        assert_eq!(second.name, "Rel_9_0");
        assert_eq!(
            repo.created_labels(),
            vec![("Rel_8_0".to_string(), 456), ("Rel_9_0".to_string(), 457)]
        );
    }

    #[tokio::test]
    async fn test_creation_error_is_a_failed_result() {
        let repo = Arc::new(FakeRepo::default());
        repo.fail_label_creation();

        let result = LabelStage::new(repo)
            .create("codice", 456, "Rel_${AUTO_INCREMENT_NUMBER}", now())
            .await
            .unwrap();

        assert!(!result.succeeded);
        assert_eq!(result.name, "Rel_0");
        assert!(!result.error.is_empty());
    }

    #[tokio::test]
    async fn test_empty_and_malformed_patterns_fail() {
        let repo = Arc::new(FakeRepo::default());
        let stage = LabelStage::new(repo.clone());

        let empty = stage.create("codice", 1, "", now()).await.unwrap();
        assert_eq!(empty.error, NO_PATTERN_SPECIFIED);

        let malformed = stage.create("codice", 1, "Rel_${", now()).await.unwrap();
        assert_eq!(malformed.error, MALFORMED_PATTERN);
        assert!(repo.created_labels().is_empty());
    }
}
