use serde::Serialize;

use crate::error::MatchError;
use crate::gallery::{GallerySnapshot, GallerySummary};
use crate::matcher::{FaceMatches, MatchReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Match,
    NoMatch,
}

/// Outcome of matching one query image against the gallery.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub outcome: Outcome,
    /// Matched identities across all faces, deduplicated, in first-matched order.
    pub identities: Vec<String>,
    pub faces: Vec<FaceMatches>,
    pub comparisons: usize,
    pub gallery: GallerySummary,
}

impl QueryResult {
    pub fn is_match(&self) -> bool {
        self.outcome == Outcome::Match
    }

    /// One-line human summary of the result.
    pub fn message(&self) -> String {
        match self.outcome {
            Outcome::Match => format!(
                "Match found in the following images: {}",
                self.identities.join(", ")
            ),
            Outcome::NoMatch => "No match found in the database".to_string(),
        }
    }
}

/// Fold per-face decisions into one result.
///
/// A report with no faces is [`MatchError::NoFacesDetected`], never a
/// "no match". One matching face is enough for an overall match.
pub fn aggregate(report: MatchReport, gallery: &GallerySnapshot) -> Result<QueryResult, MatchError> {
    if report.faces.is_empty() {
        return Err(MatchError::NoFacesDetected);
    }

    let mut identities: Vec<String> = Vec::new();
    for hit in report.faces.iter().flat_map(|f| f.matches.iter()) {
        if !identities.contains(&hit.id) {
            identities.push(hit.id.clone());
        }
    }

    let outcome = if identities.is_empty() {
        Outcome::NoMatch
    } else {
        Outcome::Match
    };

    Ok(QueryResult {
        outcome,
        identities,
        faces: report.faces,
        comparisons: report.comparisons,
        gallery: gallery.summary(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::GalleryEntry;
    use crate::matcher::IdentityMatch;
    use crate::types::{BoundingBox, Embedding};

    fn gallery() -> GallerySnapshot {
        GallerySnapshot::from_entries(vec![GalleryEntry::new(
            "alice.jpg",
            vec![Embedding::new(vec![0.0])],
        )])
    }

    fn face(index: usize, ids: &[&str]) -> FaceMatches {
        FaceMatches {
            face_index: index,
            region: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            matches: ids
                .iter()
                .map(|id| IdentityMatch {
                    id: id.to_string(),
                    distance: 0.1,
                })
                .collect(),
        }
    }

    #[test]
    fn test_no_faces_is_not_no_match() {
        let report = MatchReport {
            faces: vec![],
            comparisons: 0,
        };
        assert!(matches!(
            aggregate(report, &gallery()),
            Err(MatchError::NoFacesDetected)
        ));
    }

    #[test]
    fn test_no_match() {
        let report = MatchReport {
            faces: vec![face(0, &[]), face(1, &[])],
            comparisons: 2,
        };
        let result = aggregate(report, &gallery()).unwrap();
        assert_eq!(result.outcome, Outcome::NoMatch);
        assert!(result.identities.is_empty());
        assert_eq!(result.message(), "No match found in the database");
    }

    #[test]
    fn test_dedup_keeps_first_matched_order() {
        let report = MatchReport {
            faces: vec![face(0, &["bob.jpg", "alice.jpg"]), face(1, &["carol.jpg", "bob.jpg"])],
            comparisons: 6,
        };
        let result = aggregate(report, &gallery()).unwrap();
        assert!(result.is_match());
        assert_eq!(result.identities, vec!["bob.jpg", "alice.jpg", "carol.jpg"]);
        assert_eq!(
            result.message(),
            "Match found in the following images: bob.jpg, alice.jpg, carol.jpg"
        );
        assert_eq!(result.gallery.entries, 1);
    }

    #[test]
    fn test_partial_match_is_a_match() {
        let report = MatchReport {
            faces: vec![face(0, &[]), face(1, &["alice.jpg"])],
            comparisons: 2,
        };
        let result = aggregate(report, &gallery()).unwrap();
        assert_eq!(result.outcome, Outcome::Match);
        assert_eq!(result.identities, vec!["alice.jpg"]);
        assert_eq!(result.faces.len(), 2);
    }
}
