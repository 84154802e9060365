use serde::{Deserialize, Serialize};

/// Catalog product as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(deserialize_with = "crate::models::wire_id::deserialize")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Price in whole currency units.
    pub price: i64,
    #[serde(default)]
    pub base_fee: Option<i64>,
    pub stock: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub image_url: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Product {
    pub fn is_purchasable(&self) -> bool {
        self.is_active && self.is_available && self.stock > 0
    }

    /// Stock left after one unit is sold. Never negative.
    pub fn stock_after_sale(&self) -> i64 {
        (self.stock - 1).max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u64>,
}

/// Wire shape of `GET /products`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPageData {
    pub products: Vec<Product>,
    pub pagination: Pagination,
}

/// One page of products plus the derived paging figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPage {
    pub products: Vec<Product>,
    pub page: u32,
    pub limit: u32,
    pub offset: u64,
    pub total: u64,
    pub total_pages: u32,
    pub has_more: bool,
}
