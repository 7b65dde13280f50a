// src/utils/pagination.rs

use serde::Serialize;

use crate::config::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Normalized `page` / `limit` query values. Pages start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);
        Self { page, limit }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    pub fn wrap<T: Serialize>(self, data: Vec<T>, total: i64) -> Paginated<T> {
        Paginated {
            data,
            pagination: PageInfo {
                page: self.page,
                limit: self.limit,
                total,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PageInfo {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}

/// List response body: `{ "data": [...], "pagination": {page, limit, total} }`.
#[derive(Debug, Serialize)]
pub struct Paginated<T: Serialize> {
    pub data: Vec<T>,
    pub pagination: PageInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_offset() {
        let page = Page::new(None, None);
        assert_eq!(page, Page { page: 1, limit: 10 });
        assert_eq!(page.offset(), 0);
        assert_eq!(Page::new(Some(3), Some(20)).offset(), 40);
    }

    #[test]
    fn out_of_range_values_are_normalized() {
        assert_eq!(Page::new(Some(0), Some(-4)), Page { page: 1, limit: 10 });
        assert_eq!(Page::new(Some(2), Some(10_000)).limit, 100);
    }

    #[test]
    fn wrap_serializes_envelope() {
        let body = serde_json::to_value(Page::new(Some(2), Some(5)).wrap(vec![1, 2], 7)).unwrap();
        assert_eq!(body["data"], serde_json::json!([1, 2]));
        assert_eq!(body["pagination"]["page"], 2);
        assert_eq!(body["pagination"]["total"], 7);
    }
}
