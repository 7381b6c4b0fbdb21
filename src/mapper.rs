//! Maps local product records onto the marketplace submission schema.
//!
//! Category, brand and attribute lookups are cached inside a `ProductMapper`,
//! which the orchestrator creates once per cycle, so marketplace-side catalog
//! changes are picked up on the next cycle.

use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::gateway::{with_timeout, GatewayError, MarketplaceGateway};
use crate::model::{
    Brand, Category, CategoryAttribute, PayloadAttribute, PayloadImage, ProductAttribute,
    ProductRecord, SubmissionPayload,
};

/// Why a record could not be turned into a submission. The record stays
/// `pending` so a later enrichment pass can fix it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MappingError {
    #[error("unresolved category {0}")]
    UnresolvedCategory(String),
    #[error("unresolved brand {0}")]
    UnresolvedBrand(String),
    #[error("missing mandatory attributes {}", join_ids(.0))]
    MissingAttribute(Vec<i64>),
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("catalog lookup failed: {0}")]
    Lookup(String),
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct ProductMapper<'a> {
    gateway: &'a dyn MarketplaceGateway,
    timeout: Duration,
    categories: Option<Result<Vec<Category>, GatewayError>>,
    brands: Option<Result<Vec<Brand>, GatewayError>>,
    attributes: HashMap<i64, Result<Vec<CategoryAttribute>, GatewayError>>,
}

impl<'a> ProductMapper<'a> {
    pub fn new(gateway: &'a dyn MarketplaceGateway, timeout: Duration) -> Self {
        Self {
            gateway,
            timeout,
            categories: None,
            brands: None,
            attributes: HashMap::new(),
        }
    }

    pub async fn map(&mut self, record: &ProductRecord) -> Result<SubmissionPayload, MappingError> {
        validate_fields(record)?;

        let category_id = resolve_category(self.categories().await?, record)?;
        let brand_id = resolve_brand(self.brands().await?, record)?;

        let missing = missing_required(self.category_attributes(category_id).await?, &record.attributes);
        if !missing.is_empty() {
            return Err(MappingError::MissingAttribute(missing));
        }

        debug!(barcode = %record.barcode, category_id, brand_id, "mapped product");
        Ok(build_payload(record, category_id, brand_id))
    }

    async fn categories(&mut self) -> Result<&[Category], MappingError> {
        let loaded = match self.categories.take() {
            Some(loaded) => loaded,
            None => {
                let fetched = with_timeout(self.timeout, self.gateway.list_categories()).await;
                if let Err(err) = &fetched {
                    warn!(error = %err, "failed to load marketplace categories");
                }
                fetched
            }
        };
        match self.categories.insert(loaded) {
            Ok(categories) => Ok(categories.as_slice()),
            Err(err) => Err(MappingError::Lookup(format!("categories: {err}"))),
        }
    }

    async fn brands(&mut self) -> Result<&[Brand], MappingError> {
        let loaded = match self.brands.take() {
            Some(loaded) => loaded,
            None => {
                let fetched = with_timeout(self.timeout, self.gateway.list_brands()).await;
                if let Err(err) = &fetched {
                    warn!(error = %err, "failed to load marketplace brands");
                }
                fetched
            }
        };
        match self.brands.insert(loaded) {
            Ok(brands) => Ok(brands.as_slice()),
            Err(err) => Err(MappingError::Lookup(format!("brands: {err}"))),
        }
    }

    async fn category_attributes(
        &mut self,
        category_id: i64,
    ) -> Result<&[CategoryAttribute], MappingError> {
        let loaded = match self.attributes.remove(&category_id) {
            Some(loaded) => loaded,
            None => {
                let fetched = with_timeout(
                    self.timeout,
                    self.gateway.get_category_attributes(category_id),
                )
                .await;
                if let Err(err) = &fetched {
                    warn!(category_id, error = %err, "failed to load category attributes");
                }
                fetched
            }
        };
        match self.attributes.entry(category_id).or_insert(loaded) {
            Ok(attributes) => Ok(attributes.as_slice()),
            Err(err) => Err(MappingError::Lookup(format!(
                "attributes of category {category_id}: {err}"
            ))),
        }
    }
}

/// Lowercased, whitespace-folded name used for catalog matching.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn describe(id: Option<i64>, name: &str) -> String {
    match (id, name.trim()) {
        (_, n) if !n.is_empty() => format!("'{n}'"),
        (Some(id), _) => format!("#{id}"),
        (None, _) => "<none>".to_string(),
    }
}

/// A known pre-set id wins; otherwise match by name, leaf categories first.
pub fn resolve_category(categories: &[Category], record: &ProductRecord) -> Result<i64, MappingError> {
    if let Some(id) = record.category_id {
        if categories.iter().any(|c| c.id == id) {
            return Ok(id);
        }
    }

    let wanted = normalize_name(&record.category_name);
    if !wanted.is_empty() {
        let mut matches = categories
            .iter()
            .filter(|c| normalize_name(&c.name) == wanted);
        let best = matches.clone().find(|c| c.is_leaf).or_else(|| matches.next());
        if let Some(category) = best {
            return Ok(category.id);
        }
    }

    Err(MappingError::UnresolvedCategory(describe(
        record.category_id,
        &record.category_name,
    )))
}

pub fn resolve_brand(brands: &[Brand], record: &ProductRecord) -> Result<i64, MappingError> {
    if let Some(id) = record.brand_id {
        if brands.iter().any(|b| b.id == id) {
            return Ok(id);
        }
    }

    let wanted = normalize_name(&record.brand_name);
    if !wanted.is_empty() {
        if let Some(brand) = brands.iter().find(|b| normalize_name(&b.name) == wanted) {
            return Ok(brand.id);
        }
    }

    Err(MappingError::UnresolvedBrand(describe(
        record.brand_id,
        &record.brand_name,
    )))
}

/// Ids of mandatory category attributes the record has no value for.
pub fn missing_required(attributes: &[CategoryAttribute], given: &[ProductAttribute]) -> Vec<i64> {
    attributes
        .iter()
        .filter(|a| a.required)
        .filter(|a| {
            !given
                .iter()
                .any(|g| g.attribute_id == a.id && g.has_value())
        })
        .map(|a| a.id)
        .collect()
}

fn validate_fields(record: &ProductRecord) -> Result<(), MappingError> {
    if record.barcode.trim().is_empty() {
        return Err(MappingError::InvalidField {
            field: "barcode",
            reason: "empty".into(),
        });
    }
    if !record.price.is_finite() || record.price <= 0.0 {
        return Err(MappingError::InvalidField {
            field: "price",
            reason: format!("{} is not a positive amount", record.price),
        });
    }
    if record.stock < 0 {
        return Err(MappingError::InvalidField {
            field: "stock",
            reason: format!("{} is negative", record.stock),
        });
    }
    if record.image_urls.iter().all(|u| u.trim().is_empty()) {
        return Err(MappingError::InvalidField {
            field: "images",
            reason: "at least one image url is required".into(),
        });
    }
    Ok(())
}

/// Deterministic for identical input: attributes keep their stored order and
/// the first value per attribute id wins.
pub fn build_payload(record: &ProductRecord, category_id: i64, brand_id: i64) -> SubmissionPayload {
    let mut seen = HashSet::new();
    let attributes = record
        .attributes
        .iter()
        .filter(|a| a.has_value() && seen.insert(a.attribute_id))
        .map(|a| PayloadAttribute {
            attribute_id: a.attribute_id,
            attribute_value_id: a.value_id,
            custom_attribute_value: match a.value_id {
                Some(_) => None,
                None => a.custom_value.clone(),
            },
        })
        .collect();

    let images = record
        .image_urls
        .iter()
        .filter(|u| !u.trim().is_empty())
        .map(|u| PayloadImage { url: u.clone() })
        .collect();

    let list_price = record
        .list_price
        .filter(|lp| *lp >= record.price)
        .unwrap_or(record.price);

    SubmissionPayload {
        barcode: record.barcode.clone(),
        title: record.title.clone(),
        product_main_id: record.product_main_id.clone(),
        brand_id,
        category_id,
        quantity: record.stock,
        stock_code: record.stock_code.clone(),
        description: record.description.clone(),
        currency_type: record.currency.clone(),
        list_price,
        sale_price: record.price,
        vat_rate: record.vat_rate,
        images,
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BatchReport, BatchStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record() -> ProductRecord {
        ProductRecord {
            id: 1,
            barcode: "LCW-1".into(),
            title: "Basic Tee".into(),
            description: "Cotton".into(),
            product_main_id: "M-1".into(),
            stock_code: "S-1".into(),
            category_name: "  t-shirt ".into(),
            brand_name: "LCW".into(),
            category_id: None,
            brand_id: None,
            attributes: vec![
                ProductAttribute {
                    attribute_id: 47,
                    value_id: Some(1001),
                    custom_value: None,
                },
                ProductAttribute {
                    attribute_id: 47,
                    value_id: Some(9999),
                    custom_value: None,
                },
                ProductAttribute {
                    attribute_id: 338,
                    value_id: None,
                    custom_value: Some("M".into()),
                },
            ],
            image_urls: vec!["https://cdn/1.jpg".into(), " ".into(), "https://cdn/2.jpg".into()],
            price: 149.9,
            list_price: Some(199.9),
            stock: 10,
            vat_rate: 18,
            currency: "TRY".into(),
            batch_status: BatchStatus::Pending,
            batch_handle: None,
            status_message: None,
            last_synced_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn categories() -> Vec<Category> {
        vec![
            Category {
                id: 10,
                name: "T-Shirt".into(),
                parent_id: None,
                is_leaf: false,
            },
            Category {
                id: 11,
                name: "T-shirt".into(),
                parent_id: Some(10),
                is_leaf: true,
            },
            Category {
                id: 20,
                name: "Dress".into(),
                parent_id: None,
                is_leaf: true,
            },
        ]
    }

    fn required(id: i64) -> CategoryAttribute {
        CategoryAttribute {
            id,
            name: format!("attr-{id}"),
            required: true,
            allow_custom: true,
            values: vec![],
        }
    }

    #[test]
    fn category_prefers_known_id_then_leaf_name_match() {
        let mut rec = record();
        assert_eq!(resolve_category(&categories(), &rec).unwrap(), 11);

        rec.category_id = Some(20);
        assert_eq!(resolve_category(&categories(), &rec).unwrap(), 20);

        rec.category_id = Some(404);
        rec.category_name = "Socks".into();
        assert_eq!(
            resolve_category(&categories(), &rec).unwrap_err(),
            MappingError::UnresolvedCategory("'Socks'".into())
        );
    }

    #[test]
    fn brand_matches_case_insensitively() {
        let brands = vec![Brand {
            id: 7651,
            name: "lcw".into(),
        }];
        assert_eq!(resolve_brand(&brands, &record()).unwrap(), 7651);

        let mut rec = record();
        rec.brand_name = "".into();
        assert_eq!(
            resolve_brand(&brands, &rec).unwrap_err(),
            MappingError::UnresolvedBrand("<none>".into())
        );
    }

    #[test]
    fn missing_required_lists_every_gap() {
        let attrs = vec![required(47), required(338), required(500), {
            let mut optional = required(600);
            optional.required = false;
            optional
        }];
        assert_eq!(missing_required(&attrs, &record().attributes), vec![500]);
    }

    #[test]
    fn payload_is_deterministic_and_deduplicated() {
        let rec = record();
        let a = build_payload(&rec, 11, 7651);
        let b = build_payload(&rec, 11, 7651);
        assert_eq!(a, b);
        assert_eq!(a.attributes.len(), 2);
        assert_eq!(a.attributes[0].attribute_value_id, Some(1001));
        assert_eq!(a.attributes[1].custom_attribute_value.as_deref(), Some("M"));
        assert_eq!(a.images.len(), 2);
        assert_eq!(a.list_price, 199.9);
        assert_eq!(a.sale_price, 149.9);

        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["productMainId"], "M-1");
        assert_eq!(json["attributes"][0]["attributeValueId"], 1001);
        assert!(json["attributes"][0].get("customAttributeValue").is_none());
    }

    #[test]
    fn list_price_below_sale_price_is_ignored() {
        let mut rec = record();
        rec.list_price = Some(10.0);
        assert_eq!(build_payload(&rec, 11, 7651).list_price, 149.9);
    }

    #[test]
    fn invalid_fields_are_rejected() {
        let mut rec = record();
        rec.price = 0.0;
        assert!(matches!(
            validate_fields(&rec),
            Err(MappingError::InvalidField { field: "price", .. })
        ));

        let mut rec = record();
        rec.image_urls = vec![];
        assert!(matches!(
            validate_fields(&rec),
            Err(MappingError::InvalidField { field: "images", .. })
        ));
    }

    #[test]
    fn missing_attribute_message_names_ids() {
        let err = MappingError::MissingAttribute(vec![47, 338]);
        assert_eq!(err.to_string(), "missing mandatory attributes 47, 338");
    }

    #[derive(Default)]
    struct CountingCatalog {
        category_calls: AtomicUsize,
        attribute_calls: AtomicUsize,
        fail_brands: bool,
    }

    #[async_trait]
    impl MarketplaceGateway for CountingCatalog {
        async fn create_or_update_products(
            &self,
            _items: &[SubmissionPayload],
        ) -> Result<String, GatewayError> {
            unreachable!("mapper never submits")
        }

        async fn get_batch_status(&self, _handle: &str) -> Result<BatchReport, GatewayError> {
            unreachable!("mapper never polls")
        }

        async fn list_categories(&self) -> Result<Vec<Category>, GatewayError> {
            self.category_calls.fetch_add(1, Ordering::SeqCst);
            Ok(categories())
        }

        async fn list_brands(&self) -> Result<Vec<Brand>, GatewayError> {
            if self.fail_brands {
                return Err(GatewayError::Timeout("brands".into()));
            }
            Ok(vec![Brand {
                id: 7651,
                name: "LCW".into(),
            }])
        }

        async fn get_category_attributes(
            &self,
            _category_id: i64,
        ) -> Result<Vec<CategoryAttribute>, GatewayError> {
            self.attribute_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![required(47)])
        }
    }

    #[tokio::test]
    async fn lookups_are_cached_per_mapper() {
        let gw = CountingCatalog::default();
        let mut mapper = ProductMapper::new(&gw, Duration::from_secs(1));
        let first = mapper.map(&record()).await.unwrap();
        let second = mapper.map(&record()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.category_id, 11);
        assert_eq!(gw.category_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gw.attribute_calls.load(Ordering::SeqCst), 1);

        let mut next_cycle = ProductMapper::new(&gw, Duration::from_secs(1));
        next_cycle.map(&record()).await.unwrap();
        assert_eq!(gw.category_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn lookup_failure_is_a_mapping_error() {
        let gw = CountingCatalog {
            fail_brands: true,
            ..Default::default()
        };
        let mut mapper = ProductMapper::new(&gw, Duration::from_secs(1));
        let err = mapper.map(&record()).await.unwrap_err();
        assert!(matches!(err, MappingError::Lookup(_)), "{err:?}");
    }
}
