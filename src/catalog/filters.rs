//! Browse-page filter state and the listing query it produces.

use super::category::is_bike_category;
use crate::models::Condition;
use crate::supabase::query::{Filter, SelectQuery, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use urlencoding::{decode, encode};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    pub category_id: Option<i64>,
    pub bike_type: Option<String>,
    pub condition: Option<Condition>,
    pub brands: BTreeSet<String>,
    pub models: BTreeSet<String>,
    pub frame_size: Option<String>,
    pub wheel_size: Option<String>,
    pub price_min: Option<u32>,
    pub price_max: Option<u32>,
}

impl FilterSet {
    /// Switching to a non-bicycle category drops the bicycle-only filters in
    /// the same update.
    pub fn set_category(&mut self, category_id: Option<i64>) {
        self.category_id = category_id;
        if category_id.is_some() && !is_bike_category(category_id) {
            self.bike_type = None;
            self.frame_size = None;
            self.wheel_size = None;
        }
    }

    pub fn to_query(&self, limit: usize) -> SelectQuery {
        let mut query = SelectQuery::new(Table::Listings);
        if let Some(id) = self.category_id {
            query = query.filter(Filter::eq("category_id", id));
        }
        for (column, value) in [
            ("bike_type", &self.bike_type),
            ("frame_size", &self.frame_size),
            ("wheel_size", &self.wheel_size),
        ] {
            if let Some(value) = value {
                query = query.filter(Filter::eq(column, value));
            }
        }
        if let Some(condition) = self.condition {
            query = query.filter(Filter::eq("condition", condition.as_str()));
        }
        if let Some(min) = self.price_min {
            query = query.filter(Filter::Gte {
                column: "price",
                value: min.to_string(),
            });
        }
        if let Some(max) = self.price_max {
            query = query.filter(Filter::Lte {
                column: "price",
                value: max.to_string(),
            });
        }

        // Brand and model are free text on the listing, so selected names are
        // matched as a set across both columns instead of by foreign key.
        let mut names = Vec::new();
        if !self.brands.is_empty() {
            names.push(Filter::one_of("brand", self.brands.iter().cloned()));
        }
        if !self.models.is_empty() {
            names.push(Filter::one_of("model", self.models.iter().cloned()));
        }
        if !names.is_empty() {
            query = query.filter(Filter::Or(names));
        }

        query.newest_first("created_at").limit(limit)
    }

    /// Shareable form, e.g. `category=1&brands=Trek,Giant&price_min=500`.
    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();
        let mut push = |key: &str, value: String| {
            if !value.is_empty() {
                parts.push(format!("{key}={value}"));
            }
        };
        push("category", self.category_id.map(|v| v.to_string()).unwrap_or_default());
        push("type", encode_opt(&self.bike_type));
        push(
            "condition",
            self.condition.map(|c| c.as_str().to_string()).unwrap_or_default(),
        );
        push("brands", encode_set(&self.brands));
        push("models", encode_set(&self.models));
        push("frame_size", encode_opt(&self.frame_size));
        push("wheel_size", encode_opt(&self.wheel_size));
        push("price_min", self.price_min.map(|v| v.to_string()).unwrap_or_default());
        push("price_max", self.price_max.map(|v| v.to_string()).unwrap_or_default());
        parts.join("&")
    }

    /// Lenient inverse of [`FilterSet::to_query_string`]: unknown keys and
    /// unparsable values are ignored.
    pub fn from_query_string(raw: &str) -> Self {
        let mut filters = FilterSet::default();
        let mut category = None;
        for pair in raw.trim_start_matches('?').split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key {
                "category" => category = value.trim().parse::<i64>().ok(),
                "type" => filters.bike_type = decode_opt(value),
                "condition" => filters.condition = value.parse::<Condition>().ok(),
                "brands" => filters.brands = decode_set(value),
                "models" => filters.models = decode_set(value),
                "frame_size" => filters.frame_size = decode_opt(value),
                "wheel_size" => filters.wheel_size = decode_opt(value),
                "price_min" => filters.price_min = value.trim().parse().ok(),
                "price_max" => filters.price_max = value.trim().parse().ok(),
                _ => {}
            }
        }
        filters.set_category(category);
        filters
    }
}

fn encode_opt(value: &Option<String>) -> String {
    value
        .as_deref()
        .map(|v| encode(v).into_owned())
        .unwrap_or_default()
}

fn encode_set(values: &BTreeSet<String>) -> String {
    values
        .iter()
        .map(|v| encode(v).into_owned())
        .collect::<Vec<_>>()
        .join(",")
}

fn decode_value(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    let decoded = decode(&spaced).ok()?;
    let trimmed = decoded.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn decode_opt(raw: &str) -> Option<String> {
    decode_value(raw)
}

fn decode_set(raw: &str) -> BTreeSet<String> {
    raw.split(',').filter_map(decode_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trek_scenario() -> FilterSet {
        FilterSet {
            category_id: Some(1),
            brands: BTreeSet::from(["Trek".to_string()]),
            condition: Some(Condition::Nuevo),
            price_min: Some(500),
            price_max: Some(2000),
            ..Default::default()
        }
    }

    #[test]
    fn trek_scenario_query() {
        let query = trek_scenario().to_query(100);
        assert_eq!(query.table, Table::Listings);
        assert_eq!(
            query.filters,
            vec![
                Filter::eq("category_id", 1),
                Filter::eq("condition", "nuevo"),
                Filter::Gte {
                    column: "price",
                    value: "500".into()
                },
                Filter::Lte {
                    column: "price",
                    value: "2000".into()
                },
                Filter::Or(vec![Filter::one_of("brand", ["Trek"])]),
            ]
        );
        let order = query.order.as_ref().expect("order");
        assert_eq!(order.column, "created_at");
        assert!(!order.ascending);
        assert_eq!(query.limit, Some(100));
    }

    #[test]
    fn building_twice_is_structurally_equal() {
        let filters = FilterSet {
            models: BTreeSet::from(["Talon".to_string(), "Domane".to_string()]),
            frame_size: Some("54".into()),
            ..trek_scenario()
        };
        assert_eq!(filters.to_query(100), filters.clone().to_query(100));
        assert_eq!(filters.to_query(100).to_pairs(), filters.to_query(100).to_pairs());
    }

    #[test]
    fn empty_filters_only_order_and_cap() {
        let query = FilterSet::default().to_query(100);
        assert!(query.filters.is_empty());
        assert_eq!(query.limit, Some(100));
    }

    #[test]
    fn leaving_bike_category_clears_bike_filters() {
        let mut filters = FilterSet {
            category_id: Some(1),
            bike_type: Some("mtb".into()),
            frame_size: Some("54".into()),
            wheel_size: Some("29".into()),
            price_max: Some(900),
            ..Default::default()
        };
        filters.set_category(Some(3));
        assert_eq!(filters.category_id, Some(3));
        assert!(filters.bike_type.is_none());
        assert!(filters.frame_size.is_none());
        assert!(filters.wheel_size.is_none());
        assert_eq!(filters.price_max, Some(900));
    }

    #[test]
    fn staying_on_bikes_keeps_bike_filters() {
        let mut filters = FilterSet {
            category_id: Some(1),
            bike_type: Some("gravel".into()),
            ..Default::default()
        };
        filters.set_category(Some(1));
        assert_eq!(filters.bike_type.as_deref(), Some("gravel"));
    }

    #[test]
    fn query_string_round_trips_names_with_spaces() {
        let filters = FilterSet {
            brands: BTreeSet::from(["Santa Cruz".to_string(), "Trek".to_string()]),
            wheel_size: Some("27.5".into()),
            ..trek_scenario()
        };
        let raw = filters.to_query_string();
        assert!(raw.contains("brands=Santa%20Cruz,Trek"));
        assert_eq!(FilterSet::from_query_string(&raw), filters);
    }

    #[test]
    fn query_string_ignores_garbage() {
        let parsed =
            FilterSet::from_query_string("?price_min=abc&foo=bar&condition=usado&brands=,,Giant");
        assert_eq!(parsed.price_min, None);
        assert_eq!(parsed.condition, Some(Condition::Usado));
        assert_eq!(parsed.brands, BTreeSet::from(["Giant".to_string()]));
    }

    #[test]
    fn query_string_for_other_category_drops_bike_fields() {
        let parsed = FilterSet::from_query_string("category=4&type=mtb&frame_size=54");
        assert_eq!(parsed.category_id, Some(4));
        assert!(parsed.bike_type.is_none());
        assert!(parsed.frame_size.is_none());
    }
}
