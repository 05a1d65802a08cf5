use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Relevant,
    Irrelevant,
    Important,
    Misclassified,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::Relevant => "relevant",
            FeedbackType::Irrelevant => "irrelevant",
            FeedbackType::Important => "important",
            FeedbackType::Misclassified => "misclassified",
        }
    }

    pub fn parse(s: &str) -> Option<FeedbackType> {
        match s {
            "relevant" => Some(FeedbackType::Relevant),
            "irrelevant" => Some(FeedbackType::Irrelevant),
            "important" => Some(FeedbackType::Important),
            "misclassified" => Some(FeedbackType::Misclassified),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFeedback {
    pub id: String,
    pub event_id: String,
    pub user_id: String,
    pub org_id: String,
    pub feedback_type: FeedbackType,
    pub accuracy_rating: Option<i64>,
    pub relevance_rating: Option<i64>,
    pub is_false_positive: bool,
    pub suggested_category: Option<String>,
    pub comment: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitFeedbackRequest {
    pub feedback_type: FeedbackType,
    /// 1-5 when present.
    pub accuracy_rating: Option<i64>,
    /// 1-5 when present.
    pub relevance_rating: Option<i64>,
    #[serde(default)]
    pub is_false_positive: bool,
    pub suggested_category: Option<String>,
    #[serde(default)]
    pub comment: String,
}

/// Per-org aggregate over feedback rows.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackStats {
    pub total: i64,
    pub by_type: HashMap<String, i64>,
    pub false_positive_rate: f64,
    pub avg_accuracy_rating: Option<f64>,
    pub avg_relevance_rating: Option<f64>,
}
