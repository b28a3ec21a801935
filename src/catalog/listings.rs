use super::filters::FilterSet;
use crate::backend::{Backend, fetch_rows};
use crate::models::{Category, Listing, ListingView};
use crate::supabase::SupabaseError;
use crate::supabase::query::{Filter, SelectQuery, Table};
use serde::Serialize;
use uuid::Uuid;

/// Browse-grid entry: the listing plus its cover photo URL.
#[derive(Debug, Clone, Serialize)]
pub struct ListingCard {
    #[serde(flatten)]
    pub listing: Listing,
    pub cover_url: Option<String>,
}

pub fn cover_url(backend: &dyn Backend, listing: &Listing) -> Option<String> {
    listing
        .images
        .first()
        .and_then(|path| backend.public_url(path))
}

fn cards(backend: &dyn Backend, listings: Vec<Listing>) -> Vec<ListingCard> {
    listings
        .into_iter()
        .map(|listing| ListingCard {
            cover_url: cover_url(backend, &listing),
            listing,
        })
        .collect()
}

pub async fn browse(
    backend: &dyn Backend,
    filters: &FilterSet,
    limit: usize,
) -> Result<Vec<ListingCard>, SupabaseError> {
    let listings = fetch_rows::<Listing>(backend, &filters.to_query(limit)).await?;
    Ok(cards(backend, listings))
}

pub async fn recent(backend: &dyn Backend, limit: usize) -> Result<Vec<ListingCard>, SupabaseError> {
    let query = SelectQuery::new(Table::Listings)
        .newest_first("created_at")
        .limit(limit);
    let listings = fetch_rows::<Listing>(backend, &query).await?;
    Ok(cards(backend, listings))
}

pub async fn for_user(
    backend: &dyn Backend,
    user_id: Uuid,
) -> Result<Vec<ListingCard>, SupabaseError> {
    let query = SelectQuery::new(Table::Listings)
        .filter(Filter::eq("user_id", user_id))
        .newest_first("created_at");
    let listings = fetch_rows::<Listing>(backend, &query).await?;
    Ok(cards(backend, listings))
}

pub async fn categories(backend: &dyn Backend) -> Result<Vec<Category>, SupabaseError> {
    let query = SelectQuery::new(Table::Categories).columns("id,name");
    let mut categories = fetch_rows::<Category>(backend, &query).await?;
    categories.sort_by_key(|category| category.id);
    Ok(categories)
}

/// Detail view with every photo resolved. A failed category lookup only
/// loses the category name.
pub async fn detail(backend: &dyn Backend, id: Uuid) -> Result<Option<ListingView>, SupabaseError> {
    let query = SelectQuery::new(Table::Listings)
        .filter(Filter::eq("id", id))
        .limit(1);
    let Some(listing) = fetch_rows::<Listing>(backend, &query).await?.pop() else {
        return Ok(None);
    };
    let category_name = match categories(backend).await {
        Ok(all) => super::category::category_name(listing.category_id, &all).map(str::to_string),
        Err(err) => {
            tracing::warn!(target = "bicimarket.listings", error = %err, "category lookup failed");
            None
        }
    };
    let image_urls = listing
        .images
        .iter()
        .filter_map(|path| backend.public_url(path))
        .collect();
    Ok(Some(ListingView {
        listing,
        image_urls,
        category_name,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MemoryBackend;
    use crate::models::Condition;
    use serde_json::{Value, json};
    use std::collections::BTreeSet;

    const SELLER: &str = "6f1c1f5e-8a4e-4a57-9a57-2d1ce7f4b6a1";

    fn listing(id: u128, brand: &str, model: &str, price: u32, category: i64, created: &str) -> Value {
        json!({
            "id": Uuid::from_u128(id),
            "title": format!("{brand} {model}"),
            "category_id": category,
            "brand": brand,
            "model": model,
            "condition": "nuevo",
            "price": price,
            "location": "Madrid",
            "images": [format!("bici-{id}.jpg")],
            "created_at": created,
            "user_id": SELLER,
        })
    }

    fn backend() -> MemoryBackend {
        MemoryBackend::new()
            .with_rows(
                Table::Listings,
                vec![
                    listing(1, "Trek", "Marlin 5", 650, 1, "2025-03-01T10:00:00Z"),
                    listing(2, "Trek", "Domane", 2500, 1, "2025-03-02T10:00:00Z"),
                    listing(3, "Giant", "Talon", 700, 1, "2025-03-03T10:00:00Z"),
                    listing(4, "Trek", "Bontrager", 900, 2, "2025-03-04T10:00:00Z"),
                    listing(5, "Trek", "FX 3", 1200, 1, "2025-03-05T10:00:00Z"),
                ],
            )
            .with_rows(
                Table::Categories,
                vec![json!({"id": 2, "name": "Componente"}), json!({"id": 1, "name": "Bicicleta"})],
            )
    }

    #[tokio::test]
    async fn browse_trek_scenario_newest_first() {
        let backend = backend();
        let filters = FilterSet {
            category_id: Some(1),
            brands: BTreeSet::from(["Trek".to_string()]),
            condition: Some(Condition::Nuevo),
            price_min: Some(500),
            price_max: Some(2000),
            ..Default::default()
        };
        let found = browse(&backend, &filters, 100).await.expect("browse");
        let ids: Vec<Uuid> = found.iter().map(|c| c.listing.id).collect();
        assert_eq!(ids, vec![Uuid::from_u128(5), Uuid::from_u128(1)]);
        assert!(found[0].cover_url.as_deref().unwrap().ends_with("/bici-5.jpg"));
    }

    #[tokio::test]
    async fn brand_or_model_names_match_either_column() {
        let backend = backend();
        let filters = FilterSet {
            brands: BTreeSet::from(["Giant".to_string()]),
            models: BTreeSet::from(["Domane".to_string()]),
            ..Default::default()
        };
        let found = browse(&backend, &filters, 100).await.expect("browse");
        let ids: Vec<Uuid> = found.iter().map(|c| c.listing.id).collect();
        assert_eq!(ids, vec![Uuid::from_u128(3), Uuid::from_u128(2)]);
    }

    #[tokio::test]
    async fn recent_is_capped() {
        let found = recent(&backend(), 2).await.expect("recent");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].listing.id, Uuid::from_u128(5));
    }

    #[tokio::test]
    async fn detail_resolves_photos_and_category() {
        let view = detail(&backend(), Uuid::from_u128(4))
            .await
            .expect("detail")
            .expect("listing");
        assert_eq!(view.category_name.as_deref(), Some("Componente"));
        assert_eq!(view.image_urls.len(), 1);
        assert!(detail(&backend(), Uuid::from_u128(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listings_for_seller() {
        let seller = Uuid::parse_str(SELLER).unwrap();
        assert_eq!(for_user(&backend(), seller).await.unwrap().len(), 5);
        assert!(for_user(&backend(), Uuid::nil()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn categories_sorted_by_id() {
        let all = categories(&backend()).await.unwrap();
        assert_eq!(all[0].name, "Bicicleta");
    }
}
