//! Input loading and validation.
//!
//! Reads the review table, resolves column aliases, normalizes text and assigns
//! review keys. Missing required columns abort the load; bad rows are counted
//! and skipped.

use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LoadError;
use crate::review::{group_by_project, KeyOrigin, ProjectGroup, Review};
use crate::uid::{UidAssigner, UidFields};

/// Logical columns and the header spellings accepted for each.
///
/// Headers are compared after lowercasing and removing `_`, `-` and spaces.
const COLUMN_ALIASES: &[(Column, &[&str])] = &[
    (Column::ProjectId, &["project_id"]),
    (Column::ProjectName, &["project_name"]),
    (
        Column::Text,
        &["text", "description", "review_text", "review", "body"],
    ),
    (Column::Rating, &["rating"]),
    (Column::UserId, &["user_id"]),
    (Column::CreatedOn, &["created_on", "created_at"]),
    (Column::ReviewerName, &["reviewer_name"]),
    (Column::Source, &["source"]),
    (Column::ReviewId, &["review_id", "review_uid"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    ProjectId,
    ProjectName,
    Text,
    Rating,
    UserId,
    CreatedOn,
    ReviewerName,
    Source,
    ReviewId,
}

impl Column {
    fn name(self) -> &'static str {
        match self {
            Self::ProjectId => "project_id",
            Self::ProjectName => "project_name",
            Self::Text => "text",
            Self::Rating => "rating",
            Self::UserId => "user_id",
            Self::CreatedOn => "created_on",
            Self::ReviewerName => "reviewer_name",
            Self::Source => "source",
            Self::ReviewId => "review_id",
        }
    }
}

const REQUIRED: [Column; 3] = [Column::ProjectId, Column::ProjectName, Column::Text];

fn normalize_header(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Resolved header positions.
#[derive(Debug, Default)]
struct HeaderIndex {
    positions: Vec<(Column, usize)>,
}

impl HeaderIndex {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, LoadError> {
        let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
        let mut positions = Vec::new();

        for (column, aliases) in COLUMN_ALIASES {
            let wanted: Vec<String> = aliases.iter().map(|a| normalize_header(a)).collect();
            if let Some(pos) = normalized.iter().position(|h| wanted.contains(h)) {
                positions.push((*column, pos));
            }
        }

        let missing: Vec<&'static str> = REQUIRED
            .iter()
            .filter(|c| !positions.iter().any(|(p, _)| p == *c))
            .map(|c| c.name())
            .collect();
        if !missing.is_empty() {
            return Err(LoadError::MissingColumns {
                missing,
                found: headers.iter().map(str::to_string).collect(),
            });
        }

        Ok(Self { positions })
    }

    fn position(&self, column: Column) -> Option<usize> {
        self.positions
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, p)| *p)
    }

    /// Trimmed field value; `None` when the column is absent, the record is
    /// short, or the value is blank.
    fn field<'r>(&self, record: &'r csv::StringRecord, column: Column) -> Option<&'r str> {
        let value = record.get(self.position(column)?)?.trim();
        (!value.is_empty()).then_some(value)
    }

    /// Whether the record is long enough to hold every required column.
    fn covers_required(&self, record: &csv::StringRecord) -> bool {
        REQUIRED
            .iter()
            .filter_map(|c| self.position(*c))
            .all(|pos| pos < record.len())
    }
}

/// Collapse runs of whitespace to single spaces and trim the ends.
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a rating cell, treating anything non-numeric as absent.
pub fn parse_rating(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|r| r.is_finite())
}

/// Counters reported at the end of a load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Data rows seen, including skipped ones.
    pub rows_read: usize,
    pub rows_accepted: usize,
    pub skipped_empty_text: usize,
    pub skipped_malformed: usize,
    /// Rows whose natural `review_id` repeated an earlier one and fell back to a derived key.
    pub duplicate_natural_keys: usize,
}

impl LoadReport {
    pub fn rows_skipped(&self) -> usize {
        self.skipped_empty_text + self.skipped_malformed
    }
}

/// The accepted reviews of one input file.
#[derive(Debug)]
pub struct LoadedTable {
    reviews: Vec<Review>,
    report: LoadReport,
    groups: OnceLock<Vec<ProjectGroup>>,
}

impl LoadedTable {
    pub fn from_reviews(reviews: Vec<Review>, report: LoadReport) -> Self {
        Self {
            reviews,
            report,
            groups: OnceLock::new(),
        }
    }

    pub fn reviews(&self) -> &[Review] {
        &self.reviews
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    /// Project groups in first-appearance order, built on first use.
    pub fn projects(&self) -> &[ProjectGroup] {
        self.groups.get_or_init(|| group_by_project(&self.reviews))
    }

    pub fn project(&self, project_id: &str) -> Option<&ProjectGroup> {
        self.projects().iter().find(|g| g.project_id == project_id)
    }

    pub fn members<'a>(&'a self, group: &'a ProjectGroup) -> impl Iterator<Item = &'a Review> + 'a {
        group.members.iter().map(move |&i| &self.reviews[i])
    }
}

/// Load and validate a review table from a CSV file.
pub fn load_reviews(path: &Path) -> Result<LoadedTable, LoadError> {
    let file = std::fs::File::open(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let table = read_reviews(file, path)?;
    let report = table.report();
    info!(
        path = %path.display(),
        rows_read = report.rows_read,
        accepted = report.rows_accepted,
        skipped_empty = report.skipped_empty_text,
        skipped_malformed = report.skipped_malformed,
        "Loaded review table"
    );
    Ok(table)
}

/// Load from any reader. `origin` is only used in error messages.
pub fn read_reviews<R: std::io::Read>(reader: R, origin: &Path) -> Result<LoadedTable, LoadError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|source| LoadError::Header {
            path: origin.to_path_buf(),
            source,
        })?
        .clone();
    let index = HeaderIndex::resolve(&headers)?;

    let mut report = LoadReport::default();
    let mut reviews = Vec::new();
    let mut assigner = UidAssigner::new();
    let mut natural_keys: HashSet<String> = HashSet::new();

    for (row, result) in csv_reader.records().enumerate() {
        report.rows_read += 1;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(row, error = %e, "Skipping unparseable row");
                report.skipped_malformed += 1;
                continue;
            }
        };

        if !index.covers_required(&record) {
            debug!(row, fields = record.len(), "Skipping short row");
            report.skipped_malformed += 1;
            continue;
        }
        let Some(project_id) = index.field(&record, Column::ProjectId) else {
            debug!(row, "Skipping row without project_id");
            report.skipped_malformed += 1;
            continue;
        };

        let text = normalize_text(index.field(&record, Column::Text).unwrap_or(""));
        if text.is_empty() {
            report.skipped_empty_text += 1;
            continue;
        }

        let user_id = index.field(&record, Column::UserId).map(str::to_string);
        let created_on = index.field(&record, Column::CreatedOn).map(str::to_string);

        let natural = index
            .field(&record, Column::ReviewId)
            .map(str::to_string)
            .filter(|key| {
                let fresh = natural_keys.insert(key.clone());
                if !fresh {
                    warn!(row, review_id = %key, "Duplicate review_id; deriving a key instead");
                    report.duplicate_natural_keys += 1;
                }
                fresh
            });
        let (review_id, key_origin) = match natural {
            Some(key) => (key, KeyOrigin::Natural),
            None => (
                assigner.assign(&UidFields {
                    project_id,
                    user_id: user_id.as_deref(),
                    created_on: created_on.as_deref(),
                    text: &text,
                }),
                KeyOrigin::Derived,
            ),
        };

        reviews.push(Review {
            review_id,
            key_origin,
            project_id: project_id.to_string(),
            project_name: index
                .field(&record, Column::ProjectName)
                .map(normalize_text)
                .unwrap_or_default(),
            text,
            rating: index.field(&record, Column::Rating).and_then(parse_rating),
            user_id,
            created_on,
            reviewer_name: index.field(&record, Column::ReviewerName).map(str::to_string),
            source: index.field(&record, Column::Source).map(str::to_string),
            row,
        });
    }

    report.rows_accepted = reviews.len();
    Ok(LoadedTable::from_reviews(reviews, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn load_str(csv: &str) -> Result<LoadedTable, LoadError> {
        read_reviews(csv.as_bytes(), &PathBuf::from("inline.csv"))
    }

    #[test]
    fn test_missing_required_columns_is_fatal() {
        let err = load_str("project_id,rating\np1,5\n").unwrap_err();
        match err {
            LoadError::MissingColumns { missing, found } => {
                assert_eq!(missing, vec!["project_name", "text"]);
                assert_eq!(found, vec!["project_id", "rating"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pascal_case_headers_resolve() {
        let table = load_str(
            "ProjectId,ProjectName,Description,Rating,CreatedOn,UserId\n\
             p1,Harbor View,\"Lovely   views\n  and staff\",4,2024-02-01,u7\n",
        )
        .unwrap();
        assert_eq!(table.reviews().len(), 1);
        let review = &table.reviews()[0];
        assert_eq!(review.project_id, "p1");
        assert_eq!(review.text, "Lovely views and staff");
        assert_eq!(review.rating, Some(4.0));
        assert_eq!(review.user_id.as_deref(), Some("u7"));
        assert_eq!(review.key_origin, KeyOrigin::Derived);
    }

    #[test]
    fn test_empty_and_malformed_rows_are_counted() {
        let table = load_str(
            "project_id,project_name,text\n\
             p1,Alpha,good\n\
             p1,Alpha,   \n\
             ,Alpha,no project\n\
             p2\n\
             p2,Beta,fine\n",
        )
        .unwrap();
        let report = table.report();
        assert_eq!(report.rows_read, 5);
        assert_eq!(report.rows_accepted, 2);
        assert_eq!(report.skipped_empty_text, 1);
        assert_eq!(report.skipped_malformed, 2);
        assert_eq!(report.rows_skipped(), 3);
    }

    #[test]
    fn test_unparseable_rating_becomes_none() {
        let table = load_str("project_id,project_name,text,rating\np1,A,ok,five\n").unwrap();
        assert_eq!(table.reviews()[0].rating, None);
    }

    #[test]
    fn test_natural_review_id_wins_and_duplicates_fall_back() {
        let table = load_str(
            "review_id,project_id,project_name,text\n\
             r-1,p1,A,first\n\
             r-1,p1,A,second\n",
        )
        .unwrap();
        let reviews = table.reviews();
        assert_eq!(reviews[0].review_id, "r-1");
        assert_eq!(reviews[0].key_origin, KeyOrigin::Natural);
        assert_eq!(reviews[1].key_origin, KeyOrigin::Derived);
        assert_ne!(reviews[1].review_id, "r-1");
        assert_eq!(table.report().duplicate_natural_keys, 1);
    }

    #[test]
    fn test_identical_rows_get_distinct_keys() {
        let table = load_str(
            "project_id,project_name,text\n\
             p1,A,same words\n\
             p1,A,same words\n",
        )
        .unwrap();
        let reviews = table.reviews();
        assert_ne!(reviews[0].review_id, reviews[1].review_id);
    }

    #[test]
    fn test_keys_stable_across_loads() {
        let csv = "project_id,project_name,text\np1,A,alpha\np2,B,beta\n";
        let a = load_str(csv).unwrap();
        let b = load_str(csv).unwrap();
        let keys_a: Vec<_> = a.reviews().iter().map(|r| r.review_id.clone()).collect();
        let keys_b: Vec<_> = b.reviews().iter().map(|r| r.review_id.clone()).collect();
        assert_eq!(keys_a, keys_b);
    }

    #[test]
    fn test_projects_group_lazily_in_order() {
        let table = load_str(
            "project_id,project_name,text\n\
             p2,B,one\n\
             p1,A,two\n\
             p2,B,three\n",
        )
        .unwrap();
        let groups = table.projects();
        assert_eq!(groups[0].project_id, "p2");
        let texts: Vec<_> = table.members(&groups[0]).map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "three"]);
        assert!(table.project("p1").is_some());
        assert!(table.project("p3").is_none());
    }
}
