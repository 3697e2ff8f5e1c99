//! Pagination utilities for list endpoints

use serde::{Deserialize, Serialize};

/// Page size used when the client does not ask for one
pub const DEFAULT_PAGE_SIZE: i64 = 25;

/// Largest page size a client may request
pub const MAX_PAGE_SIZE: i64 = 100;

/// Raw `page` / `page_size` query parameters
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// Pagination metadata calculated from total results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: i64,
    pub page_size: i64,
    /// Total number of pages
    pub total_pages: i64,
    pub total: i64,
    /// Offset for SQL LIMIT/OFFSET query
    #[serde(skip)]
    pub offset: i64,
}

/// Clamp the requested page size into `1..=MAX_PAGE_SIZE`
pub fn effective_page_size(requested: Option<i64>) -> i64 {
    requested.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Calculate pagination metadata from total results and requested page
///
/// Ensures page is within valid bounds [1, total_pages]
///
/// # Examples
/// ```
/// use csops_server::pagination::{calculate_pagination, PageParams};
///
/// // 60 results at 25 per page = 3 pages
/// let p = calculate_pagination(60, PageParams { page: Some(2), page_size: None });
/// assert_eq!(p.page, 2);
/// assert_eq!(p.total_pages, 3);
/// assert_eq!(p.offset, 25);
///
/// // Requesting out-of-bounds page gets clamped
/// let p = calculate_pagination(60, PageParams { page: Some(99), page_size: None });
/// assert_eq!(p.page, 3);
/// assert_eq!(p.offset, 50);
/// ```
pub fn calculate_pagination(total_results: i64, params: PageParams) -> Pagination {
    let page_size = effective_page_size(params.page_size);
    let total_pages = (total_results + page_size - 1) / page_size;
    let page = params.page.unwrap_or(1).max(1).min(total_pages.max(1));
    let offset = (page - 1) * page_size;

    Pagination {
        page,
        page_size,
        total_pages,
        total: total_results,
        offset,
    }
}
