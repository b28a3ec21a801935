//! PostgREST request model.
//!
//! Queries are plain values: building one never touches the network, and two
//! queries built from the same inputs compare equal. [`SelectQuery::to_pairs`]
//! renders the PostgREST query-string grammar (`col=op.value`, `or=(...)`).

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Listings,
    Brands,
    Models,
    ModelsWithBrands,
    Categories,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Listings => "listings",
            Table::Brands => "brands",
            Table::Models => "models",
            Table::ModelsWithBrands => "models_with_brands",
            Table::Categories => "categories",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq {
        column: &'static str,
        value: String,
    },
    /// Case-insensitive substring match.
    Contains {
        column: &'static str,
        fragment: String,
    },
    /// Case-insensitive whole-value match.
    EqIgnoreCase {
        column: &'static str,
        value: String,
    },
    In {
        column: &'static str,
        values: Vec<String>,
    },
    Gte {
        column: &'static str,
        value: String,
    },
    Lte {
        column: &'static str,
        value: String,
    },
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &'static str, value: impl ToString) -> Self {
        Filter::Eq {
            column,
            value: value.to_string(),
        }
    }

    pub fn contains(column: &'static str, fragment: impl Into<String>) -> Self {
        Filter::Contains {
            column,
            fragment: fragment.into(),
        }
    }

    pub fn eq_ignore_case(column: &'static str, value: impl Into<String>) -> Self {
        Filter::EqIgnoreCase {
            column,
            value: value.into(),
        }
    }

    pub fn one_of<I, S>(column: &'static str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::In {
            column,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn column(&self) -> &'static str {
        match self {
            Filter::Eq { column, .. }
            | Filter::Contains { column, .. }
            | Filter::EqIgnoreCase { column, .. }
            | Filter::In { column, .. }
            | Filter::Gte { column, .. }
            | Filter::Lte { column, .. } => column,
            Filter::Or(_) => "or",
        }
    }

    /// `op.value` part of a top-level parameter.
    fn operand(&self) -> String {
        match self {
            Filter::Eq { value, .. } => format!("eq.{value}"),
            Filter::Contains { fragment, .. } => format!("ilike.{}", like_pattern(fragment)),
            Filter::EqIgnoreCase { value, .. } => format!("ilike.{}", escape_like(value)),
            Filter::In { values, .. } => {
                let quoted = values.iter().map(|v| quote(v)).collect::<Vec<_>>();
                format!("in.({})", quoted.join(","))
            }
            Filter::Gte { value, .. } => format!("gte.{value}"),
            Filter::Lte { value, .. } => format!("lte.{value}"),
            Filter::Or(members) => format!("({})", render_members(members)),
        }
    }

    /// `col.op.value` form used inside logical groups.
    fn nested(&self) -> String {
        match self {
            Filter::Eq { column, value } => format!("{column}.eq.{}", quote(value)),
            Filter::Contains { column, fragment } => {
                format!("{column}.ilike.{}", quote(&like_pattern(fragment)))
            }
            Filter::EqIgnoreCase { column, value } => {
                format!("{column}.ilike.{}", quote(&escape_like(value)))
            }
            Filter::Or(members) => format!("or({})", render_members(members)),
            other => format!("{}.{}", other.column(), other.operand()),
        }
    }
}

fn render_members(members: &[Filter]) -> String {
    members
        .iter()
        .map(Filter::nested)
        .collect::<Vec<_>>()
        .join(",")
}

fn like_pattern(fragment: &str) -> String {
    format!("*{}*", escape_like(fragment))
}

/// Makes user text match literally under `ilike`. `*` is PostgREST's alias
/// for `%` and cannot be escaped, so it is dropped.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '*' => {}
            '%' | '_' | '\\' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn quote(value: &str) -> String {
    let reserved = value
        .chars()
        .any(|ch| matches!(ch, ',' | '.' | ':' | '(' | ')' | '"' | '\\' | ' '));
    if !reserved {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: &'static str,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    pub table: Table,
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn columns(mut self, columns: &str) -> Self {
        self.columns = columns.to_string();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn newest_first(mut self, column: &'static str) -> Self {
        self.order = Some(Order {
            column,
            ascending: false,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_string(), self.columns.clone())];
        for filter in &self.filters {
            pairs.push((filter.column().to_string(), filter.operand()));
        }
        if let Some(order) = &self.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            pairs.push(("order".to_string(), format!("{}.{direction}", order.column)));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }
}
