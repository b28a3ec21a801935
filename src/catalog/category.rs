use crate::config::{BIKE_CATEGORY_ID, BIKE_CATEGORY_NAME, COMPONENT_CATEGORY_NAME};
use crate::models::Category;

pub fn is_bike_category(category_id: Option<i64>) -> bool {
    category_id == Some(*BIKE_CATEGORY_ID)
}

/// Bike type, frame size and wheel size only apply to bicycles.
pub fn accepts_bike_fields(category_id: Option<i64>, categories: &[Category]) -> bool {
    is_bike_category(category_id) || category_name(category_id, categories) == Some(BIKE_CATEGORY_NAME)
}

/// Component lists apply to whole bikes and to loose components.
pub fn accepts_components(category_id: Option<i64>, categories: &[Category]) -> bool {
    accepts_bike_fields(category_id, categories)
        || category_name(category_id, categories) == Some(COMPONENT_CATEGORY_NAME)
}

pub fn category_name(category_id: Option<i64>, categories: &[Category]) -> Option<&str> {
    let id = category_id?;
    categories
        .iter()
        .find(|category| category.id == id)
        .map(|category| category.name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories() -> Vec<Category> {
        vec![
            Category {
                id: 1,
                name: "Bicicleta".into(),
            },
            Category {
                id: 2,
                name: "Componente".into(),
            },
            Category {
                id: 3,
                name: "Accesorio".into(),
            },
        ]
    }

    #[test]
    fn bike_category_is_id_one() {
        assert!(is_bike_category(Some(1)));
        assert!(!is_bike_category(Some(2)));
        assert!(!is_bike_category(None));
    }

    #[test]
    fn components_allowed_for_bikes_and_components() {
        let cats = categories();
        assert!(accepts_components(Some(1), &cats));
        assert!(accepts_components(Some(2), &cats));
        assert!(!accepts_components(Some(3), &cats));
        assert!(!accepts_components(None, &cats));
    }

    #[test]
    fn bike_fields_only_for_bikes() {
        let cats = categories();
        assert!(accepts_bike_fields(Some(1), &cats));
        assert!(!accepts_bike_fields(Some(2), &cats));
    }
}
