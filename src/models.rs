use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub brand_id: Option<i64>,
    #[serde(default)]
    pub model_id: Option<i64>,
    #[serde(default)]
    pub bike_type: Option<String>,
    #[serde(default)]
    pub frame_size: Option<String>,
    #[serde(default)]
    pub wheel_size: Option<String>,
    #[serde(default)]
    pub components: Option<Vec<String>>,
    pub condition: String,
    pub price: f64,
    pub location: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub user_id: Uuid,
}

/// Row sent to `listings` on publish. Absent fields are omitted so that the
/// bike-only columns stay NULL for other categories.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewListing {
    pub user_id: Uuid,
    pub title: String,
    pub category_id: i64,
    pub condition: Condition,
    pub price: i64,
    pub location: String,
    pub images: Vec<String>,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub brand_id: Option<i64>,
    pub model_id: Option<i64>,
    pub bike_type: Option<String>,
    pub frame_size: Option<String>,
    pub wheel_size: Option<String>,
    pub components: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Brand {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Model {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub brand_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelWithBrand {
    #[serde(default)]
    pub brand_id: Option<i64>,
    #[serde(default)]
    pub brand_name: Option<String>,
    #[serde(default)]
    pub model_id: Option<i64>,
    #[serde(default)]
    pub model_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Nuevo,
    #[default]
    Usado,
    Restaurado,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Nuevo => "nuevo",
            Condition::Usado => "usado",
            Condition::Restaurado => "restaurado",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown condition {0:?}")]
pub struct UnknownCondition(String);

impl FromStr for Condition {
    type Err = UnknownCondition;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "nuevo" | "new" => Ok(Condition::Nuevo),
            "usado" | "used" => Ok(Condition::Usado),
            "restaurado" | "restored" => Ok(Condition::Restaurado),
            _ => Err(UnknownCondition(input.to_string())),
        }
    }
}

pub const BIKE_TYPES: [&str; 5] = ["urbana", "carretera", "mtb", "gravel", "electrica"];

/// Listing as returned by the detail endpoint, with browser-ready image URLs.
#[derive(Debug, Clone, Serialize)]
pub struct ListingView {
    #[serde(flatten)]
    pub listing: Listing,
    pub image_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: serde_json::Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_accepts_spanish_and_english() {
        assert_eq!(" Nuevo ".parse::<Condition>(), Ok(Condition::Nuevo));
        assert_eq!("used".parse::<Condition>(), Ok(Condition::Usado));
        assert_eq!(
            "roto".parse::<Condition>(),
            Err(UnknownCondition("roto".into()))
        );
    }

    #[test]
    fn new_listing_omits_absent_columns() {
        let row = NewListing {
            user_id: Uuid::nil(),
            title: "Casco".into(),
            category_id: 3,
            condition: Condition::Usado,
            price: 40,
            location: "Sevilla".into(),
            images: vec![],
            description: None,
            brand: None,
            model: None,
            brand_id: None,
            model_id: None,
            bike_type: None,
            frame_size: None,
            wheel_size: None,
            components: None,
        };
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["condition"], "usado");
        assert!(value.get("bike_type").is_none());
        assert!(value.get("brand_id").is_none());
    }
}
