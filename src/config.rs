use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

pub static STORAGE_BUCKET: Lazy<String> =
    Lazy::new(|| env::var("STORAGE_BUCKET").unwrap_or_else(|_| "bike-images".to_string()));

pub static BIKE_CATEGORY_ID: Lazy<i64> = Lazy::new(|| env_number("BIKE_CATEGORY_ID", 1));

pub const BIKE_CATEGORY_NAME: &str = "Bicicleta";
pub const COMPONENT_CATEGORY_NAME: &str = "Componente";

/// Tunables shared by the resolver, the browse query and the publish flow.
#[derive(Debug, Clone, Copy)]
pub struct MarketConfig {
    pub debounce: Duration,
    pub autocomplete_limit: usize,
    pub listings_limit: usize,
    pub recent_limit: usize,
    pub max_images: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            autocomplete_limit: 50,
            listings_limit: 100,
            recent_limit: 5,
            max_images: 10,
        }
    }
}

impl MarketConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            debounce: Duration::from_millis(env_number(
                "AUTOCOMPLETE_DEBOUNCE_MS",
                defaults.debounce.as_millis() as u64,
            )),
            autocomplete_limit: env_number("AUTOCOMPLETE_LIMIT", defaults.autocomplete_limit),
            listings_limit: env_number("LISTINGS_LIMIT", defaults.listings_limit),
            recent_limit: defaults.recent_limit,
            max_images: env_number("MAX_IMAGES", defaults.max_images),
        }
    }
}

fn env_number<T: std::str::FromStr + PartialOrd + Default>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
        .unwrap_or(fallback)
}
