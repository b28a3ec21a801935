//! Brand/model option resolution for the autocomplete controls.
//!
//! A request names the entity being searched, the text typed so far and the
//! values already selected. The result is a deduplicated, label-sorted option
//! list that always carries every selected value, plus the resolved selection
//! for single- or multi-select controls. Values typed by the user that have no
//! catalog row survive as [`OptionItem::Freeform`].

use crate::backend::{Backend, fetch_rows};
use crate::models::{Brand, Model, ModelWithBrand};
use crate::supabase::SupabaseError;
use crate::supabase::query::{Filter, SelectQuery, Table};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::warn;

pub const OTHER_VALUE: &str = "Otro";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySelector {
    Brands,
    Models,
    /// Flattened "Brand - Model" pairs.
    ModelsWithBrands,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionItem {
    Known {
        value: String,
        label: String,
        brand_id: Option<i64>,
    },
    Freeform {
        text: String,
    },
}

impl OptionItem {
    pub fn known(name: impl Into<String>, brand_id: Option<i64>) -> Self {
        let name = name.into();
        OptionItem::Known {
            value: name.clone(),
            label: name,
            brand_id,
        }
    }

    pub fn freeform(text: impl Into<String>) -> Self {
        OptionItem::Freeform { text: text.into() }
    }

    pub fn other() -> Self {
        OptionItem::freeform(OTHER_VALUE)
    }

    pub fn value(&self) -> &str {
        match self {
            OptionItem::Known { value, .. } => value,
            OptionItem::Freeform { text } => text,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            OptionItem::Known { label, .. } => label,
            OptionItem::Freeform { text } => text,
        }
    }

    pub fn brand_id(&self) -> Option<i64> {
        match self {
            OptionItem::Known { brand_id, .. } => *brand_id,
            OptionItem::Freeform { .. } => None,
        }
    }
}

/// Wire shape of an option: `{value, label, brand_id?, freeform}`.
impl Serialize for OptionItem {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            value: &'a str,
            label: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            brand_id: Option<i64>,
            freeform: bool,
        }
        Wire {
            value: self.value(),
            label: self.label(),
            brand_id: self.brand_id(),
            freeform: matches!(self, OptionItem::Freeform { .. }),
        }
        .serialize(serializer)
    }
}

/// `Otro`/`Other` means "the user will type a custom value".
pub fn is_other(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case(OTHER_VALUE) || value.eq_ignore_ascii_case("other")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExtraFilters {
    #[serde(default)]
    pub brand_name: Vec<String>,
    #[serde(default)]
    pub model_name: Vec<String>,
    #[serde(default)]
    pub brand_id: Option<i64>,
}

impl ExtraFilters {
    fn view_filters(&self) -> Vec<Filter> {
        let mut filters = Vec::new();
        for (column, values) in [("brand_name", &self.brand_name), ("model_name", &self.model_name)] {
            match values.as_slice() {
                [] => {}
                [single] => filters.push(Filter::eq(column, single)),
                many => filters.push(Filter::one_of(column, many.iter().cloned())),
            }
        }
        if let Some(id) = self.brand_id {
            filters.push(Filter::eq("brand_id", id));
        }
        filters
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AutocompleteRequest {
    #[serde(default)]
    pub entity: Option<EntitySelector>,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub selected: Vec<String>,
    #[serde(default)]
    pub filters: ExtraFilters,
    #[serde(default)]
    pub single: bool,
    #[serde(default)]
    pub allow_other: bool,
    /// Restricts models to one brand row.
    #[serde(default)]
    pub brand_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Selection {
    Single(Option<OptionItem>),
    Multi(Vec<OptionItem>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub options: Vec<OptionItem>,
    pub selection: Selection,
    /// Set when the backend query failed and only the selection is shown.
    pub degraded: bool,
}

/// How rows of the target collection turn into options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Brands,
    ModelsOfBrandNames,
    ModelsOfBrand(i64),
    AllModels,
    Pairs,
}

fn source_for(entity: EntitySelector, request: &AutocompleteRequest) -> Source {
    match entity {
        EntitySelector::Brands => Source::Brands,
        EntitySelector::ModelsWithBrands => Source::Pairs,
        EntitySelector::Models if !request.filters.brand_name.is_empty() => {
            Source::ModelsOfBrandNames
        }
        EntitySelector::Models => match request.brand_id {
            Some(id) => Source::ModelsOfBrand(id),
            None => Source::AllModels,
        },
    }
}

/// Backend query for a request; `None` when there is nothing to search.
pub fn build_query(request: &AutocompleteRequest, limit: usize) -> Option<SelectQuery> {
    let entity = request.entity?;
    let fragment = request.query.trim();
    let query = match source_for(entity, request) {
        Source::Brands => {
            let query = SelectQuery::new(Table::Brands).columns("id,name");
            with_fragment(query, "name", fragment)
        }
        Source::ModelsOfBrandNames => {
            let query = SelectQuery::new(Table::ModelsWithBrands)
                .columns("model_name,brand_name,brand_id")
                .filter(Filter::one_of(
                    "brand_name",
                    request.filters.brand_name.iter().cloned(),
                ));
            with_fragment(query, "model_name", fragment)
        }
        Source::ModelsOfBrand(id) => {
            let query = SelectQuery::new(Table::Models)
                .columns("id,name,brand_id")
                .filter(Filter::eq("brand_id", id));
            with_fragment(query, "name", fragment)
        }
        Source::AllModels => {
            let query = SelectQuery::new(Table::Models).columns("id,name,brand_id");
            with_fragment(query, "name", fragment)
        }
        Source::Pairs => {
            let mut query = SelectQuery::new(Table::ModelsWithBrands);
            for filter in request.filters.view_filters() {
                query = query.filter(filter);
            }
            if !fragment.is_empty() {
                query = query.filter(Filter::Or(vec![
                    Filter::contains("model_name", fragment),
                    Filter::contains("brand_name", fragment),
                ]));
            }
            query
        }
    };
    Some(query.limit(limit))
}

fn with_fragment(query: SelectQuery, column: &'static str, fragment: &str) -> SelectQuery {
    if fragment.is_empty() {
        query
    } else {
        query.filter(Filter::contains(column, fragment))
    }
}

async fn fetch_catalog_options(
    backend: &dyn Backend,
    request: &AutocompleteRequest,
    query: &SelectQuery,
) -> Result<Vec<OptionItem>, SupabaseError> {
    let Some(entity) = request.entity else {
        return Ok(Vec::new());
    };
    let options = match source_for(entity, request) {
        Source::Brands => fetch_rows::<Brand>(backend, query)
            .await?
            .into_iter()
            .map(|brand| OptionItem::known(brand.name, None))
            .collect(),
        Source::ModelsOfBrand(id) => fetch_rows::<Model>(backend, query)
            .await?
            .into_iter()
            .map(|model| OptionItem::known(model.name, Some(id)))
            .collect(),
        Source::AllModels => fetch_rows::<Model>(backend, query)
            .await?
            .into_iter()
            .map(|model| OptionItem::known(model.name, model.brand_id))
            .collect(),
        Source::ModelsOfBrandNames => fetch_rows::<ModelWithBrand>(backend, query)
            .await?
            .into_iter()
            .filter_map(|row| {
                let name = row.model_name.filter(|name| !name.trim().is_empty())?;
                Some(OptionItem::known(name, row.brand_id))
            })
            .collect(),
        Source::Pairs => fetch_rows::<ModelWithBrand>(backend, query)
            .await?
            .into_iter()
            .filter_map(|row| {
                let pair = format!("{} - {}", row.brand_name?, row.model_name?);
                Some(OptionItem::known(pair, row.brand_id))
            })
            .collect(),
    };
    Ok(options)
}

/// Runs the request against the backend. Errors never escape: the option
/// list falls back to the current selection and `degraded` is set.
pub async fn resolve(
    backend: &dyn Backend,
    request: &AutocompleteRequest,
    limit: usize,
) -> Resolution {
    let Some(query) = build_query(request, limit) else {
        return Resolution {
            options: Vec::new(),
            selection: select(&[], request),
            degraded: false,
        };
    };

    match fetch_catalog_options(backend, request, &query).await {
        Ok(fetched) => {
            let mut options = merge_selected(fetched, &request.selected);
            if request.allow_other {
                inject_other(&mut options);
            }
            let selection = select(&options, request);
            Resolution {
                options,
                selection,
                degraded: false,
            }
        }
        Err(err) => {
            warn!(
                target = "bicimarket.autocomplete",
                table = query.table.as_str(),
                error = %err,
                "option lookup failed; showing selection only"
            );
            let options = selected_only(&request.selected);
            let selection = select(&options, request);
            Resolution {
                options,
                selection,
                degraded: true,
            }
        }
    }
}

/// Catalog matches plus a freeform entry for each selected value the query
/// window no longer contains, deduplicated and sorted.
pub fn merge_selected(fetched: Vec<OptionItem>, selected: &[String]) -> Vec<OptionItem> {
    let missing = selected
        .iter()
        .filter(|value| !value.trim().is_empty())
        .filter(|value| !fetched.iter().any(|opt| opt.value() == value.as_str()))
        .map(|value| OptionItem::freeform(value.clone()))
        .collect::<Vec<_>>();
    let mut options = dedupe(fetched.into_iter().chain(missing).collect());
    options.sort_by(compare_labels);
    options
}

pub fn selected_only(selected: &[String]) -> Vec<OptionItem> {
    merge_selected(Vec::new(), selected)
}

/// Keeps the first option for each value.
pub fn dedupe(options: Vec<OptionItem>) -> Vec<OptionItem> {
    let mut seen = HashSet::new();
    options
        .into_iter()
        .filter(|option| seen.insert(option.value().to_string()))
        .collect()
}

/// Ordering key for labels: case-folded first, exact text as tie-breaker.
pub fn compare_labels(a: &OptionItem, b: &OptionItem) -> Ordering {
    label_key(a.label()).cmp(&label_key(b.label()))
}

fn label_key(label: &str) -> (String, &str) {
    (label.to_lowercase(), label)
}

/// Adds the `Otro` sentinel at its sorted position unless an option with an
/// equivalent label is already present.
pub fn inject_other(options: &mut Vec<OptionItem>) {
    if options.iter().any(|option| is_other(option.label())) {
        return;
    }
    let other = OptionItem::other();
    let at = options
        .iter()
        .position(|option| compare_labels(option, &other) == Ordering::Greater)
        .unwrap_or(options.len());
    options.insert(at, other);
}

pub fn select(options: &[OptionItem], request: &AutocompleteRequest) -> Selection {
    if request.single {
        Selection::Single(select_single(options, &request.selected))
    } else {
        Selection::Multi(select_multi(options, &request.selected))
    }
}

pub fn select_single(options: &[OptionItem], selected: &[String]) -> Option<OptionItem> {
    options
        .iter()
        .find(|option| selected.iter().any(|value| value == option.value()))
        .cloned()
        .or_else(|| {
            selected
                .first()
                .filter(|value| !value.trim().is_empty())
                .map(|value| OptionItem::freeform(value.clone()))
        })
}

pub fn select_multi(options: &[OptionItem], selected: &[String]) -> Vec<OptionItem> {
    let matched = options
        .iter()
        .filter(|option| selected.iter().any(|value| value == option.value()))
        .cloned();
    let unmatched = selected
        .iter()
        .filter(|value| !value.trim().is_empty())
        .filter(|value| !options.iter().any(|option| option.value() == value.as_str()))
        .map(|value| OptionItem::freeform(value.clone()));
    dedupe(matched.chain(unmatched).collect())
}

/// Applies a value the user typed and confirmed as a new option.
pub fn create_option(selected: &[String], text: &str, single: bool) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return selected.to_vec();
    }
    if single {
        return vec![text.to_string()];
    }
    let mut next = selected.to_vec();
    if !next.iter().any(|value| value == text) {
        next.push(text.to_string());
    }
    next
}

pub fn placeholder(entity: Option<EntitySelector>, loading: bool) -> &'static str {
    if loading {
        return "Cargando...";
    }
    match entity {
        Some(EntitySelector::Brands) => "Busca o selecciona marca(s)...",
        Some(EntitySelector::Models) => "Busca o selecciona modelo(s)...",
        _ => "Busca o selecciona...",
    }
}
