//! Review rows and per-project grouping.

use serde::{Deserialize, Serialize};

/// Where a review's key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrigin {
    /// Taken from a `review_id` column in the input.
    Natural,
    /// Derived by [`crate::uid::UidAssigner`] from content fields.
    Derived,
}

/// One accepted input row. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub review_id: String,
    pub key_origin: KeyOrigin,
    pub project_id: String,
    pub project_name: String,
    /// Whitespace-normalized review body, never empty.
    pub text: String,
    pub rating: Option<f64>,
    pub user_id: Option<String>,
    pub created_on: Option<String>,
    pub reviewer_name: Option<String>,
    pub source: Option<String>,
    /// Zero-based position among the data rows of the input file.
    pub row: usize,
}

impl Review {
    /// Rating rendered the way prompts and snippets show it (`4` rather than `4.0`).
    pub fn rating_label(&self) -> Option<String> {
        self.rating.map(|r| {
            if r.fract() == 0.0 {
                format!("{}", r as i64)
            } else {
                format!("{r}")
            }
        })
    }
}

/// All reviews sharing a `project_id`, in input order.
///
/// Holds indices into the owning [`crate::LoadedTable`] rather than copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectGroup {
    pub project_id: String,
    /// Name from the first row of the project.
    pub project_name: String,
    pub members: Vec<usize>,
}

impl ProjectGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Group reviews by `project_id`, ordering groups by first appearance.
pub fn group_by_project(reviews: &[Review]) -> Vec<ProjectGroup> {
    let mut groups: Vec<ProjectGroup> = Vec::new();
    let mut positions: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();

    for (idx, review) in reviews.iter().enumerate() {
        match positions.get(review.project_id.as_str()) {
            Some(&g) => groups[g].members.push(idx),
            None => {
                positions.insert(review.project_id.as_str(), groups.len());
                groups.push(ProjectGroup {
                    project_id: review.project_id.clone(),
                    project_name: review.project_name.clone(),
                    members: vec![idx],
                });
            }
        }
    }

    groups
}

#[cfg(test)]
pub(crate) fn sample_review(project_id: &str, text: &str, row: usize) -> Review {
    Review {
        review_id: format!("r{row}"),
        key_origin: KeyOrigin::Derived,
        project_id: project_id.to_string(),
        project_name: format!("Project {project_id}"),
        text: text.to_string(),
        rating: None,
        user_id: None,
        created_on: None,
        reviewer_name: None,
        source: None,
        row,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_by_project_preserves_first_appearance_order() {
        let reviews = vec![
            sample_review("b", "one", 0),
            sample_review("a", "two", 1),
            sample_review("b", "three", 2),
        ];
        let groups = group_by_project(&reviews);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].project_id, "b");
        assert_eq!(groups[0].members, vec![0, 2]);
        assert_eq!(groups[1].members, vec![1]);
    }

    #[test]
    fn test_rating_label_drops_integral_fraction() {
        let mut review = sample_review("p", "ok", 0);
        review.rating = Some(4.0);
        assert_eq!(review.rating_label().as_deref(), Some("4"));
        review.rating = Some(3.5);
        assert_eq!(review.rating_label().as_deref(), Some("3.5"));
    }
}
