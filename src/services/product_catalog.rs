use std::sync::Arc;
use tracing::{info, instrument};

use crate::backend::{BackendApi, BackendError};
use crate::config::PaginationConfig;
use crate::models::product::{Product, ProductPage};
use crate::state::total_pages;

/// Paged, availability-filtered product listing.
#[derive(Clone)]
pub struct ProductCatalog {
    backend: Arc<dyn BackendApi>,
    pagination: PaginationConfig,
}

impl std::fmt::Debug for ProductCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductCatalog")
            .field("pagination", &self.pagination)
            .finish_non_exhaustive()
    }
}

impl ProductCatalog {
    pub fn new(backend: Arc<dyn BackendApi>, pagination: PaginationConfig) -> Self {
        Self {
            backend,
            pagination,
        }
    }

    pub fn default_page_size(&self) -> u32 {
        self.pagination.default_page_size
    }

    /// Page size clamped to `1..=max_page_size`. `None` uses the default.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.pagination.default_page_size)
            .clamp(1, self.pagination.max_page_size.max(1))
    }

    /// Fetches a 1-based page of purchasable products.
    #[instrument(skip(self))]
    pub async fn fetch_page(
        &self,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<ProductPage, BackendError> {
        let page = page.max(1);
        let limit = self.page_size(page_size);
        let offset = u64::from(page - 1) * u64::from(limit);

        let data = self.backend.list_products(limit, offset, true).await?;
        let total = data.pagination.total;

        info!(page, limit, offset, total, count = data.products.len(), "Product page loaded");
        Ok(ProductPage {
            products: data.products,
            page,
            limit,
            offset,
            total,
            total_pages: total_pages(total, limit),
            has_more: data.pagination.has_more,
        })
    }

    pub async fn get_product(&self, product_id: &str) -> Result<Product, BackendError> {
        self.backend.get_product(product_id).await
    }
}
