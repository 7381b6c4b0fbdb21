use serde::Deserialize;
use serde_json::Value;

use crate::model::{
    BatchReport, BatchState, Brand, Category, CategoryAttribute, ItemResult, ItemStatus,
};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductsResp {
    pub batch_request_id: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusResp {
    pub status: Option<String>,
    #[serde(default)]
    pub items: Vec<BatchItemResp>,
    #[serde(default)]
    pub failure_reasons: Vec<Value>,
    pub message: Option<String>,
    pub item_count: Option<i64>,
    pub success_item_count: Option<i64>,
    pub failed_item_count: Option<i64>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResp {
    pub status: Option<String>,
    #[serde(default)]
    pub failure_reasons: Vec<Value>,
    pub error_message: Option<String>,
    pub request_item: Option<RequestItem>,
}

#[derive(Deserialize, Debug)]
pub struct RequestItem {
    pub barcode: Option<String>,
    pub product: Option<RequestProduct>,
}

#[derive(Deserialize, Debug)]
pub struct RequestProduct {
    pub barcode: Option<String>,
}

impl BatchItemResp {
    fn barcode(&self) -> Option<&str> {
        let item = self.request_item.as_ref()?;
        item.product
            .as_ref()
            .and_then(|p| p.barcode.as_deref())
            .or(item.barcode.as_deref())
            .filter(|b| !b.trim().is_empty())
    }

    fn reasons(&self) -> Vec<String> {
        if !self.failure_reasons.is_empty() {
            return self.failure_reasons.iter().map(reason_text).collect();
        }
        self.error_message
            .iter()
            .filter(|m| !m.trim().is_empty())
            .cloned()
            .collect()
    }
}

/// Failure reasons arrive either as plain strings or as objects carrying a
/// `message` field.
fn reason_text(reason: &Value) -> String {
    match reason {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(s)) => s.clone(),
            _ => reason.to_string(),
        },
        other => other.to_string(),
    }
}

impl BatchStatusResp {
    /// Collapse the loosely shaped status response into a `BatchReport`.
    /// Items without a barcode cannot be matched and are dropped; a response
    /// with no usable item falls back to the aggregate state.
    pub fn into_report(self) -> BatchReport {
        let state = match self.status.as_deref() {
            Some(raw) => BatchState::from_marketplace(raw),
            None => self.state_from_counts(),
        };

        let entries: Vec<ItemResult> = self
            .items
            .iter()
            .filter_map(|item| {
                let barcode = item.barcode()?.to_string();
                let status = item
                    .status
                    .as_deref()
                    .map(ItemStatus::from_marketplace)
                    .unwrap_or_else(|| ItemStatus::Pending(String::new()));
                Some(ItemResult {
                    barcode,
                    status,
                    failure_reasons: item.reasons(),
                })
            })
            .collect();

        if !entries.is_empty() {
            return BatchReport::PerItem { state, entries };
        }

        let message = if self.failure_reasons.is_empty() {
            self.message.filter(|m| !m.trim().is_empty())
        } else {
            Some(
                self.failure_reasons
                    .iter()
                    .map(reason_text)
                    .collect::<Vec<_>>()
                    .join(" | "),
            )
        };
        BatchReport::Aggregate { state, message }
    }

    /// Some responses carry only item counters instead of a status string.
    fn state_from_counts(&self) -> BatchState {
        let Some(total) = self.item_count.filter(|n| *n > 0) else {
            return BatchState::Unknown(String::new());
        };
        let succeeded = self.success_item_count.unwrap_or(0);
        let failed = self.failed_item_count.unwrap_or(0);
        if succeeded == total {
            BatchState::Done
        } else if failed == total {
            BatchState::Failed
        } else {
            BatchState::InProgress
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct CategoriesResp {
    #[serde(default)]
    pub categories: Vec<CategoryNode>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CategoryNode {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub sub_categories: Vec<CategoryNode>,
}

/// Depth-first flattening of the category tree.
pub fn flatten_categories(nodes: &[CategoryNode], parent_id: Option<i64>, out: &mut Vec<Category>) {
    for node in nodes {
        out.push(Category {
            id: node.id,
            name: node.name.clone(),
            parent_id,
            is_leaf: node.sub_categories.is_empty(),
        });
        flatten_categories(&node.sub_categories, Some(node.id), out);
    }
}

#[derive(Deserialize, Debug)]
pub struct BrandsResp {
    #[serde(default)]
    pub brands: Vec<BrandResp>,
}

#[derive(Deserialize, Debug)]
pub struct BrandResp {
    pub id: i64,
    pub name: String,
}

impl From<BrandResp> for Brand {
    fn from(b: BrandResp) -> Self {
        Brand {
            id: b.id,
            name: b.name,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAttributesResp {
    #[serde(default)]
    pub category_attributes: Vec<CategoryAttributeResp>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAttributeResp {
    pub attribute: AttributeRef,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub allow_custom: bool,
    #[serde(default)]
    pub attribute_values: Vec<AttributeRef>,
}

#[derive(Deserialize, Debug)]
pub struct AttributeRef {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

impl From<CategoryAttributeResp> for CategoryAttribute {
    fn from(a: CategoryAttributeResp) -> Self {
        CategoryAttribute {
            id: a.attribute.id,
            name: a.attribute.name,
            required: a.required,
            allow_custom: a.allow_custom,
            values: a
                .attribute_values
                .into_iter()
                .map(|v| (v.id, v.name))
                .collect(),
        }
    }
}
