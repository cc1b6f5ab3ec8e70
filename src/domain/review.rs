//! # Review records and page units
//!
//! `Review` keeps the fields the harvester relies on as typed columns and
//! carries everything else the API returned through `extra`, so an artifact
//! line is a lossless copy of the source record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use super::company::CompanyId;

/// One paginated fetch unit. Offsets are zero-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageRequest {
    pub company_id: CompanyId,
    pub offset: u32,
    pub page_size: u32,
}

impl PageRequest {
    #[must_use]
    pub const fn new(company_id: CompanyId, offset: u32, page_size: u32) -> Self {
        Self { company_id, offset, page_size }
    }

    /// The review service numbers pages from 1
    #[must_use]
    pub const fn page_number(&self) -> u32 {
        self.offset + 1
    }
}

/// Parsed result of one successful page fetch
#[derive(Debug, Clone, Default)]
pub struct ReviewPage {
    pub reviews: Vec<Review>,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub review_id: String,
    pub company_id: CompanyId,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub likes: Option<String>,
    #[serde(default)]
    pub dislikes: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const ID_KEYS: &[&str] = &["id", "reviewId", "review_id"];
const RATING_KEYS: &[&str] = &["overallRating", "rating", "overall_rating"];
const TITLE_KEYS: &[&str] = &["title", "reviewTitle"];
const LIKES_KEYS: &[&str] = &["likes", "liked"];
const DISLIKES_KEYS: &[&str] = &["dislikes", "disliked"];
const LOCATION_KEYS: &[&str] = &["location", "jobLocation", "city"];
const JOB_TITLE_KEYS: &[&str] = &["jobProfile", "designation", "jobTitle"];
const CREATED_KEYS: &[&str] = &["created", "createdOn", "createdAt", "reviewDate"];
const UPDATED_KEYS: &[&str] = &["modified", "modifiedOn", "updatedAt"];

// Serialized names of the typed columns. A leftover source key with one of
// these names is kept as `raw_<name>` so an artifact line has unique keys.
const TYPED_FIELDS: &[&str] = &[
    "review_id",
    "company_id",
    "rating",
    "title",
    "likes",
    "dislikes",
    "location",
    "job_title",
    "created_at",
    "updated_at",
];

impl Review {
    /// Minimal record, mostly useful for fakes and tests
    #[must_use]
    pub fn new(company_id: CompanyId, review_id: impl Into<String>) -> Self {
        Self {
            review_id: review_id.into(),
            company_id,
            rating: None,
            title: None,
            likes: None,
            dislikes: None,
            location: None,
            job_title: None,
            created_at: None,
            updated_at: None,
            extra: Map::new(),
        }
    }

    /// Builds a review from one raw API object. Returns `None` when the
    /// object carries no usable identifier.
    #[must_use]
    pub fn from_api_value(company_id: &CompanyId, value: &Value) -> Option<Self> {
        let mut fields = value.as_object()?.clone();

        let review_id = take_first(&mut fields, ID_KEYS).and_then(|v| scalar_to_string(&v))?;
        let rating = take_first(&mut fields, RATING_KEYS).and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });

        Some(Self {
            review_id,
            company_id: company_id.clone(),
            rating,
            title: take_text(&mut fields, TITLE_KEYS),
            likes: take_text(&mut fields, LIKES_KEYS),
            dislikes: take_text(&mut fields, DISLIKES_KEYS),
            location: take_location(&mut fields),
            job_title: take_text(&mut fields, JOB_TITLE_KEYS),
            created_at: take_text(&mut fields, CREATED_KEYS),
            updated_at: take_text(&mut fields, UPDATED_KEYS),
            extra: rename_colliding(fields),
        })
    }
}

// Removes every candidate key and returns the first non-null value.
fn take_first(fields: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .filter_map(|key| fields.remove(*key))
        .fold(None, |found, v| found.or_else(|| (!v.is_null()).then_some(v)))
}

fn rename_colliding(fields: Map<String, Value>) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(key, value)| {
            if TYPED_FIELDS.contains(&key.as_str()) {
                (format!("raw_{key}"), value)
            } else {
                (key, value)
            }
        })
        .collect()
}

fn take_text(fields: &mut Map<String, Value>, keys: &[&str]) -> Option<String> {
    take_first(fields, keys).and_then(|v| scalar_to_string(&v))
}

// Location may arrive as a plain string or as `{ "name": ... }`.
fn take_location(fields: &mut Map<String, Value>) -> Option<String> {
    match take_first(fields, LOCATION_KEYS)? {
        Value::Object(obj) => obj.get("name").and_then(scalar_to_string),
        other => scalar_to_string(&other),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Drops repeated (company id, review id) pairs, keeping the first
/// occurrence and the original order.
#[must_use]
pub fn dedupe_reviews(reviews: Vec<Review>) -> Vec<Review> {
    let mut seen: HashSet<(CompanyId, String)> = HashSet::with_capacity(reviews.len());
    reviews
        .into_iter()
        .filter(|r| seen.insert((r.company_id.clone(), r.review_id.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn parses_api_object_and_keeps_unknown_fields() {
        let company = CompanyId::new("acme");
        let raw = json!({
            "id": 98765,
            "overallRating": 4.5,
            "likes": "Good culture",
            "dislikes": "Long hours",
            "location": { "name": "Pune" },
            "jobProfile": "Engineer",
            "created": "2024-01-02T10:00:00Z",
            "isCurrentEmployee": true
        });

        let review = Review::from_api_value(&company, &raw).unwrap();
        assert_eq!(review.review_id, "98765");
        assert_eq!(review.rating, Some(4.5));
        assert_eq!(review.location.as_deref(), Some("Pune"));
        assert_eq!(review.job_title.as_deref(), Some("Engineer"));
        assert_eq!(review.extra.get("isCurrentEmployee"), Some(&json!(true)));
        assert!(!review.extra.contains_key("id"));
    }

    #[test]
    fn object_without_id_is_rejected() {
        let raw = json!({ "overallRating": 3 });
        assert!(Review::from_api_value(&CompanyId::new("acme"), &raw).is_none());
    }

    #[test]
    fn serialized_line_is_flat() {
        let mut review = Review::new(CompanyId::new("acme"), "1");
        review.extra.insert("helpful".into(), json!(3));
        let line = serde_json::to_value(&review).unwrap();
        assert_eq!(line["company_id"], "acme");
        assert_eq!(line["helpful"], 3);
    }

    #[test]
    fn every_candidate_key_is_consumed() {
        let company = CompanyId::new("acme");
        let raw = json!({
            "id": 1,
            "overallRating": 4.5,
            "rating": 2,
            "title": "Great place",
            "reviewTitle": "Old title",
            "company_id": "upstream-7",
            "helpful": 3
        });

        let review = Review::from_api_value(&company, &raw).unwrap();
        assert_eq!(review.rating, Some(4.5));
        assert_eq!(review.title.as_deref(), Some("Great place"));
        assert!(!review.extra.contains_key("rating"));
        assert!(!review.extra.contains_key("reviewTitle"));
        assert_eq!(review.extra.get("raw_company_id"), Some(&json!("upstream-7")));

        let line = serde_json::to_string(&review).unwrap();
        assert_eq!(line.matches("\"rating\"").count(), 1);
        let reread: Review = serde_json::from_str(&line).unwrap();
        assert_eq!(reread, review);
    }

    #[test]
    fn null_candidate_falls_through_to_next_key() {
        let raw = json!({ "id": null, "reviewId": "r-9", "overallRating": null, "rating": "3.5" });
        let review = Review::from_api_value(&CompanyId::new("acme"), &raw).unwrap();
        assert_eq!(review.review_id, "r-9");
        assert_eq!(review.rating, Some(3.5));
        assert!(review.extra.is_empty());
    }

    proptest! {
        #[test]
        fn dedupe_keeps_first_occurrence_in_order(ids in proptest::collection::vec(0u8..20, 0..60)) {
            let company = CompanyId::new("acme");
            let reviews: Vec<Review> = ids.iter().map(|id| Review::new(company.clone(), id.to_string())).collect();
            let deduped = dedupe_reviews(reviews);

            let mut expected: Vec<String> = Vec::new();
            for id in &ids {
                let id = id.to_string();
                if !expected.contains(&id) {
                    expected.push(id);
                }
            }
            let got: Vec<String> = deduped.into_iter().map(|r| r.review_id).collect();
            prop_assert_eq!(got, expected);
        }
    }
}
