use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-org settings, one row per org. `GET` auto-creates the defaults,
/// `PUT` is a partial merge over the provided fields, `RESET` deletes the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgSettings {
    pub org_id: String,
    pub default_category_filters: Vec<String>,
    pub default_sentiment_filters: Vec<String>,
    pub default_min_relevance: f64,
    pub high_priority_threshold: f64,
    pub alert_categories: Vec<String>,
    pub alert_sentiment_types: Vec<String>,
    pub email_alerts: bool,
    pub clustering: bool,
    pub feedback: bool,
    pub audit_logging: bool,
    pub map_zoom: i64,
    pub map_center_lat: f64,
    pub map_center_lon: f64,
    pub events_per_page: i64,
    pub event_retention_days: Option<i64>,
    pub audit_retention_days: i64,
    pub focus_regions: Vec<String>,
    pub exclude_regions: Vec<String>,
    pub custom_config: HashMap<String, serde_json::Value>,
    pub updated_at: String,
}

impl OrgSettings {
    pub fn defaults(org_id: &str) -> Self {
        Self {
            org_id: org_id.to_string(),
            default_category_filters: Vec::new(),
            default_sentiment_filters: Vec::new(),
            default_min_relevance: 0.0,
            high_priority_threshold: 0.7,
            alert_categories: Vec::new(),
            alert_sentiment_types: Vec::new(),
            email_alerts: false,
            clustering: true,
            feedback: true,
            audit_logging: true,
            map_zoom: 5,
            map_center_lat: 50.85,
            map_center_lon: 4.35,
            events_per_page: 50,
            event_retention_days: None,
            audit_retention_days: 90,
            focus_regions: Vec::new(),
            exclude_regions: Vec::new(),
            custom_config: HashMap::new(),
            updated_at: String::new(),
        }
    }

    /// Merge a patch over the current values. Only provided fields change.
    /// `audit_retention_days` is floored at 30.
    pub fn apply(&mut self, patch: OrgSettingsPatch) {
        if let Some(v) = patch.default_category_filters {
            self.default_category_filters = v;
        }
        if let Some(v) = patch.default_sentiment_filters {
            self.default_sentiment_filters = v;
        }
        if let Some(v) = patch.default_min_relevance {
            self.default_min_relevance = v.clamp(0.0, 1.0);
        }
        if let Some(v) = patch.high_priority_threshold {
            self.high_priority_threshold = v.clamp(0.0, 1.0);
        }
        if let Some(v) = patch.alert_categories {
            self.alert_categories = v;
        }
        if let Some(v) = patch.alert_sentiment_types {
            self.alert_sentiment_types = v;
        }
        if let Some(v) = patch.email_alerts {
            self.email_alerts = v;
        }
        if let Some(v) = patch.clustering {
            self.clustering = v;
        }
        if let Some(v) = patch.feedback {
            self.feedback = v;
        }
        if let Some(v) = patch.audit_logging {
            self.audit_logging = v;
        }
        if let Some(v) = patch.map_zoom {
            self.map_zoom = v;
        }
        if let Some(v) = patch.map_center_lat {
            self.map_center_lat = v;
        }
        if let Some(v) = patch.map_center_lon {
            self.map_center_lon = v;
        }
        if let Some(v) = patch.events_per_page {
            self.events_per_page = v.clamp(1, 1000);
        }
        if let Some(v) = patch.event_retention_days {
            self.event_retention_days = v;
        }
        if let Some(v) = patch.audit_retention_days {
            self.audit_retention_days = v.max(30);
        }
        if let Some(v) = patch.focus_regions {
            self.focus_regions = v;
        }
        if let Some(v) = patch.exclude_regions {
            self.exclude_regions = v;
        }
        if let Some(v) = patch.custom_config {
            self.custom_config = v;
        }
    }
}

/// Partial update body for org settings. Double-Option on
/// `event_retention_days` distinguishes "leave alone" from "set to null".
#[derive(Debug, Default, Deserialize)]
pub struct OrgSettingsPatch {
    pub default_category_filters: Option<Vec<String>>,
    pub default_sentiment_filters: Option<Vec<String>>,
    pub default_min_relevance: Option<f64>,
    pub high_priority_threshold: Option<f64>,
    pub alert_categories: Option<Vec<String>>,
    pub alert_sentiment_types: Option<Vec<String>>,
    pub email_alerts: Option<bool>,
    pub clustering: Option<bool>,
    pub feedback: Option<bool>,
    pub audit_logging: Option<bool>,
    pub map_zoom: Option<i64>,
    pub map_center_lat: Option<f64>,
    pub map_center_lon: Option<f64>,
    pub events_per_page: Option<i64>,
    #[serde(default, with = "double_option")]
    pub event_retention_days: Option<Option<i64>>,
    pub audit_retention_days: Option<i64>,
    pub focus_regions: Option<Vec<String>>,
    pub exclude_regions: Option<Vec<String>>,
    pub custom_config: Option<HashMap<String, serde_json::Value>>,
}

/// Serde helper: absent field -> None, `null` -> Some(None), value -> Some(Some(v)).
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(de: D) -> Result<Option<Option<i64>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<i64>::deserialize(de).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_merges_only_provided_fields() {
        let mut s = OrgSettings::defaults("org-1");
        s.apply(OrgSettingsPatch {
            high_priority_threshold: Some(0.9),
            alert_categories: Some(vec!["crime".into()]),
            ..Default::default()
        });
        assert_eq!(s.high_priority_threshold, 0.9);
        assert_eq!(s.alert_categories, vec!["crime"]);
        // untouched fields keep their defaults
        assert!(s.clustering);
        assert_eq!(s.audit_retention_days, 90);
    }

    #[test]
    fn audit_retention_floor() {
        let mut s = OrgSettings::defaults("org-1");
        s.apply(OrgSettingsPatch {
            audit_retention_days: Some(7),
            ..Default::default()
        });
        assert_eq!(s.audit_retention_days, 30);
    }

    #[test]
    fn retention_can_be_cleared() {
        let mut s = OrgSettings::defaults("org-1");
        s.apply(OrgSettingsPatch {
            event_retention_days: Some(Some(30)),
            ..Default::default()
        });
        assert_eq!(s.event_retention_days, Some(30));
        s.apply(OrgSettingsPatch {
            event_retention_days: Some(None),
            ..Default::default()
        });
        assert_eq!(s.event_retention_days, None);
    }
}
