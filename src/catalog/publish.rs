//! Listing submission: validate, resolve catalog ids, upload photos, insert.
//!
//! Nothing reaches the backend until the form validates. Photos are uploaded
//! concurrently and all of them must land before the row is inserted; when an
//! upload or the insert fails, the objects stored so far are removed again so
//! no listing ever references a partial photo set.

use super::autocomplete::is_other;
use super::category::{accepts_bike_fields, accepts_components};
use super::listings::categories as fetch_categories;
use super::sanitize::{
    LONG_MAX, SHORT_MAX, sanitize_input, sanitize_number, sanitize_short, sanitize_text,
};
use crate::backend::{Backend, fetch_rows};
use crate::models::{BIKE_TYPES, Category, Condition, NewListing, StageReport};
use crate::supabase::query::{Filter, SelectQuery, Table};
use crate::supabase::storage::object_path;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const TITLE_MAX: usize = 100;
pub const SIZE_MAX: usize = 20;
pub const PRICE_MIN: f64 = 1.0;
pub const PRICE_MAX: f64 = 999_999.0;

/// Raw publish form as the user filled it in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishForm {
    pub title: String,
    pub category_id: Option<i64>,
    pub brand: String,
    pub brand_id: Option<i64>,
    pub model: String,
    pub model_id: Option<i64>,
    pub bike_type: String,
    pub frame_size: String,
    pub wheel_size: String,
    pub components: Vec<String>,
    pub condition: Condition,
    pub price: String,
    pub location: String,
    pub description: String,
}

impl PublishForm {
    /// A new category invalidates everything that depends on it.
    pub fn set_category(&mut self, category_id: Option<i64>) {
        if self.category_id == category_id {
            return;
        }
        self.category_id = category_id;
        self.brand.clear();
        self.brand_id = None;
        self.model.clear();
        self.model_id = None;
        self.bike_type.clear();
        self.frame_size.clear();
        self.wheel_size.clear();
        self.components.clear();
    }

    pub fn set_brand(&mut self, brand: &str, brand_id: Option<i64>) {
        self.brand = brand.to_string();
        self.brand_id = if is_other(brand) { None } else { brand_id };
        self.model.clear();
        self.model_id = None;
    }

    pub fn set_model(&mut self, model: &str, model_id: Option<i64>) {
        self.model = model.to_string();
        self.model_id = if is_other(model) { None } else { model_id };
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Form values after local validation and sanitising.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedForm {
    pub title: String,
    pub category_id: i64,
    pub price: i64,
    pub location: String,
    pub condition: Condition,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub bike_type: Option<String>,
    pub frame_size: Option<String>,
    pub wheel_size: Option<String>,
    pub components: Vec<String>,
}

pub fn validate(form: &PublishForm) -> Result<ValidatedForm, PublishError> {
    let title = sanitize_input(&form.title, TITLE_MAX);
    if title.is_empty() {
        return Err(PublishError::invalid_input("title is required"));
    }
    let category_id = form
        .category_id
        .ok_or_else(|| PublishError::invalid_input("category is required"))?;
    let location = sanitize_text(&form.location, SHORT_MAX);
    if location.is_empty() {
        return Err(PublishError::invalid_input("location is required"));
    }
    let price = sanitize_number(&form.price, f64::MIN, f64::MAX)
        .ok_or_else(|| PublishError::invalid_input("price must be a number"))?;
    if !(PRICE_MIN..=PRICE_MAX).contains(&price) {
        return Err(PublishError::invalid_input(format!(
            "price must be between {PRICE_MIN} and {PRICE_MAX}"
        )));
    }
    let bike_type = non_empty(sanitize_short(&form.bike_type)).map(|kind| kind.to_lowercase());
    if let Some(kind) = bike_type.as_deref().filter(|kind| !BIKE_TYPES.contains(kind)) {
        return Err(PublishError::invalid_input(format!("unknown bike type {kind}")));
    }

    Ok(ValidatedForm {
        title,
        category_id,
        price: price.round() as i64,
        location,
        condition: form.condition,
        description: non_empty(sanitize_input(&form.description, LONG_MAX)),
        brand: non_empty(sanitize_short(&form.brand)),
        model: non_empty(sanitize_short(&form.model)),
        bike_type,
        frame_size: non_empty(sanitize_text(&form.frame_size, SIZE_MAX)),
        wheel_size: non_empty(sanitize_text(&form.wheel_size, SIZE_MAX)),
        components: form
            .components
            .iter()
            .map(|component| sanitize_short(component))
            .filter(|component| !component.is_empty())
            .collect(),
    })
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogIds {
    pub brand_id: Option<i64>,
    pub model_id: Option<i64>,
}

/// Builds the row to insert. Bike attributes and components are dropped for
/// categories they do not apply to.
pub fn listing_row(
    form: ValidatedForm,
    ids: CatalogIds,
    categories: &[Category],
    user_id: Uuid,
    images: Vec<String>,
) -> NewListing {
    let category = Some(form.category_id);
    let bike = accepts_bike_fields(category, categories);
    let components = (accepts_components(category, categories) && !form.components.is_empty())
        .then_some(form.components);
    NewListing {
        user_id,
        title: form.title,
        category_id: form.category_id,
        condition: form.condition,
        price: form.price,
        location: form.location,
        images,
        description: form.description,
        brand: form.brand,
        model: form.model,
        brand_id: ids.brand_id,
        model_id: ids.model_id,
        bike_type: form.bike_type.filter(|_| bike),
        frame_size: form.frame_size.filter(|_| bike),
        wheel_size: form.wheel_size.filter(|_| bike),
        components,
    }
}

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    fn content_type(&self) -> String {
        if let Some(declared) = self.content_type.as_deref().filter(|c| c.starts_with("image/")) {
            return declared.to_string();
        }
        let extension = self
            .file_name
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match extension.as_str() {
            "png" => "image/png",
            "webp" => "image/webp",
            "gif" => "image/gif",
            _ => "image/jpeg",
        }
        .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub listing_id: Option<Uuid>,
    pub listing: Value,
    pub images: Vec<String>,
    pub stages: Vec<StageReport>,
}

#[derive(Clone)]
pub struct Publisher {
    backend: Arc<dyn Backend>,
    max_images: usize,
}

impl Publisher {
    pub fn new(backend: Arc<dyn Backend>, max_images: usize) -> Self {
        Self {
            backend,
            max_images,
        }
    }

    /// Runs the whole submission. The form is reset only on success.
    pub async fn publish(
        &self,
        form: &mut PublishForm,
        images: Vec<ImageUpload>,
        user_id: Uuid,
        access_token: &str,
    ) -> Result<PublishReceipt, PublishError> {
        let mut stages = Vec::new();

        let started = Instant::now();
        let validated = validate(form)?;
        if images.len() > self.max_images {
            return Err(PublishError::invalid_input(format!(
                "at most {} images per listing",
                self.max_images
            )));
        }
        record(&mut stages, "validate", started, json!({ "images": images.len() }));

        let started = Instant::now();
        let categories = match fetch_categories(self.backend.as_ref()).await {
            Ok(categories) => categories,
            Err(err) => {
                warn!(target = "bicimarket.publish", error = %err, "category lookup failed");
                Vec::new()
            }
        };
        let ids = self.resolve_ids(&validated, form).await;
        record(
            &mut stages,
            "resolve_catalog",
            started,
            json!({ "brand_id": ids.brand_id, "model_id": ids.model_id }),
        );

        let started = Instant::now();
        let paths = self.upload_all(images, access_token).await?;
        record(&mut stages, "upload_images", started, json!({ "paths": paths }));

        let started = Instant::now();
        let row = listing_row(validated, ids, &categories, user_id, paths.clone());
        let stored = match self.insert(row, access_token).await {
            Ok(stored) => stored,
            Err(err) => {
                self.discard(&paths, access_token).await;
                return Err(err);
            }
        };
        let listing_id = stored
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| Uuid::parse_str(id).ok());
        record(&mut stages, "insert_listing", started, json!({ "listing_id": listing_id }));

        info!(
            target = "bicimarket.publish",
            user_id = %user_id,
            listing_id = ?listing_id,
            images = paths.len(),
            "listing_published"
        );
        form.reset();
        Ok(PublishReceipt {
            listing_id,
            listing: stored,
            images: paths,
            stages,
        })
    }

    async fn resolve_ids(&self, validated: &ValidatedForm, form: &PublishForm) -> CatalogIds {
        let brand_id = match validated.brand.as_deref() {
            Some(brand) if !is_other(brand) => match form.brand_id {
                Some(id) => Some(id),
                None => self.lookup_id(Table::Brands, brand, None).await,
            },
            _ => None,
        };
        let model_id = match validated.model.as_deref() {
            Some(model) if !is_other(model) => match form.model_id {
                Some(id) => Some(id),
                None => self.lookup_id(Table::Models, model, brand_id).await,
            },
            _ => None,
        };
        CatalogIds { brand_id, model_id }
    }

    /// Id of the catalog row whose name equals `name`, ignoring case.
    async fn lookup_id(&self, table: Table, name: &str, brand_id: Option<i64>) -> Option<i64> {
        #[derive(Deserialize)]
        struct IdRow {
            id: i64,
        }

        let mut query = SelectQuery::new(table)
            .columns("id")
            .filter(Filter::eq_ignore_case("name", name.trim()))
            .limit(1);
        if let Some(brand_id) = brand_id {
            query = query.filter(Filter::eq("brand_id", brand_id));
        }
        match fetch_rows::<IdRow>(self.backend.as_ref(), &query).await {
            Ok(rows) => rows.into_iter().next().map(|row| row.id),
            Err(err) => {
                warn!(
                    target = "bicimarket.publish",
                    table = table.as_str(),
                    error = %err,
                    "catalog id lookup failed; keeping free text"
                );
                None
            }
        }
    }

    async fn upload_all(
        &self,
        images: Vec<ImageUpload>,
        access_token: &str,
    ) -> Result<Vec<String>, PublishError> {
        let backend = self.backend.as_ref();
        let uploads = images.into_iter().map(|image| async move {
            let path = object_path(&image.file_name);
            let content_type = image.content_type();
            backend
                .upload(&path, image.bytes, &content_type, access_token)
                .await
                .map_err(|err| (image.file_name, err))
        });

        let mut stored = Vec::new();
        let mut failure = None;
        for result in join_all(uploads).await {
            match result {
                Ok(path) => stored.push(path),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        if let Some((file_name, err)) = failure {
            self.discard(&stored, access_token).await;
            return Err(PublishError::upload(format!("{file_name}: {err}")));
        }
        Ok(stored)
    }

    async fn insert(&self, row: NewListing, access_token: &str) -> Result<Value, PublishError> {
        let row = serde_json::to_value(&row)
            .map_err(|err| PublishError::persistence(err.to_string()))?;
        self.backend
            .insert(Table::Listings, row, access_token)
            .await
            .map_err(|err| PublishError::persistence(err.to_string()))
    }

    async fn discard(&self, paths: &[String], access_token: &str) {
        if paths.is_empty() {
            return;
        }
        if let Err(err) = self.backend.remove(paths, access_token).await {
            warn!(
                target = "bicimarket.publish",
                error = %err,
                count = paths.len(),
                "orphaned uploads not removed"
            );
        }
    }
}

fn record(stages: &mut Vec<StageReport>, name: &'static str, started: Instant, output: Value) {
    let elapsed_ms = started.elapsed().as_millis();
    crate::metrics::publish_stage_elapsed(name, elapsed_ms);
    stages.push(StageReport::new(name, elapsed_ms, output));
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PublishError {
    stage: &'static str,
    message: String,
    kind: PublishErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishErrorKind {
    InvalidInput,
    Upload,
    Persistence,
}

impl PublishError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            stage: "validate",
            message: message.into(),
            kind: PublishErrorKind::InvalidInput,
        }
    }

    pub fn upload(message: impl Into<String>) -> Self {
        Self {
            stage: "upload_images",
            message: message.into(),
            kind: PublishErrorKind::Upload,
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self {
            stage: "insert_listing",
            message: message.into(),
            kind: PublishErrorKind::Persistence,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PublishErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}
