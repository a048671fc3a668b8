// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Page arithmetic for list endpoints.
//!
//! Pages are zero-based. Negative pages count from the end: `-1` is the last
//! page, `-2` the one before it, and so on (wrapping around).

use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::Settings;
use crate::error::ApiError;

/// A resolved page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Requested page, possibly negative.
    pub page: i64,
    /// Entries per page, bounded by the configured maximum.
    pub per_page: u32,
}

impl PageRequest {
    /// Read `page` and `per_page` from query arguments.
    pub fn from_args(args: &BTreeMap<String, String>, settings: &Settings) -> Result<Self, ApiError> {
        let page = match args.get("page") {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| ApiError::bad_request(format!("Invalid page {:?}", raw)))?,
            None => 0,
        };

        let per_page = match args.get("per_page") {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| ApiError::bad_request(format!("Invalid per_page {:?}", raw)))?,
            None => i64::from(settings.page_size_default),
        };
        if per_page < 1 {
            return Err(ApiError::bad_request("per_page must be a positive number"));
        }
        let per_page = per_page.min(i64::from(settings.page_size_max)) as u32;

        Ok(Self { page, per_page })
    }
}

/// Pagination metadata of a listed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    /// Requested page.
    pub page: i64,
    /// Entries per page.
    pub per_page: u32,
    /// Number of pages.
    pub page_count: u64,
    /// Number of entries across all pages.
    pub entries_count: u64,
    /// URL of the next page.
    pub next: Option<String>,
    /// URL of the previous page.
    pub prev: Option<String>,
}

impl Pagination {
    /// Compute metadata for `request` over `entries_count` entries listed at `path`.
    pub fn new(
        request: PageRequest,
        entries_count: u64,
        path: &str,
        args: &BTreeMap<String, String>,
    ) -> Self {
        let page_count = page_count(entries_count, request.per_page);
        let (prev, next) = prev_next_pages(request.page, page_count, path, args);
        Self {
            page: request.page,
            per_page: request.per_page,
            page_count,
            entries_count,
            next,
            prev,
        }
    }

    /// Offset of the first entry of the page.
    pub fn offset(&self) -> u64 {
        compute_offset(self.page, self.page_count, self.per_page)
    }

    /// Response headers carrying the same metadata.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("page", self.page.to_string()),
            ("per_page", self.per_page.to_string()),
            ("page_count", self.page_count.to_string()),
            ("entries_count", self.entries_count.to_string()),
        ];

        let links: Vec<String> = [(&self.next, "next"), (&self.prev, "prev")]
            .into_iter()
            .filter_map(|(url, rel)| url.as_ref().map(|url| format!("<{}>; rel=\"{}\"", url, rel)))
            .collect();
        if !links.is_empty() {
            headers.push(("link", links.join(", ")));
        }
        headers
    }
}

/// Number of pages needed for `entries` entries.
pub fn page_count(entries: u64, per_page: u32) -> u64 {
    entries.div_ceil(u64::from(per_page.max(1)))
}

/// Offset of `page`, resolving negative pages from the end.
pub fn compute_offset(page: i64, page_count: u64, per_page: u32) -> u64 {
    if page_count == 0 {
        return 0;
    }

    let per_page = u64::from(per_page);
    if page < 0 {
        let from_end = (page.unsigned_abs() - 1) % page_count;
        (page_count - from_end - 1).saturating_mul(per_page)
    } else {
        page.unsigned_abs().saturating_mul(per_page)
    }
}

/// URLs of the previous and next pages, preserving the other query arguments.
pub fn prev_next_pages(
    page: i64,
    page_count: u64,
    path: &str,
    args: &BTreeMap<String, String>,
) -> (Option<String>, Option<String>) {
    let last = i64::try_from(page_count).unwrap_or(i64::MAX) - 1;

    let prev = (page != 0).then(|| page_url(path, args, page.saturating_sub(1).min(last)));
    let next = (page < last).then(|| page_url(path, args, page.saturating_add(1).min(last)));
    (prev, next)
}

fn page_url(path: &str, args: &BTreeMap<String, String>, page: i64) -> String {
    let mut args = args.clone();
    args.insert("page".to_string(), page.to_string());

    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(args.iter())
        .finish();
    format!("{}?{}", path, query)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(page_count(0, 10), 0);
        assert_eq!(page_count(10, 10), 1);
        assert_eq!(page_count(11, 10), 2);
    }

    #[test]
    fn negative_pages_count_from_the_end() {
        assert_eq!(compute_offset(0, 3, 10), 0);
        assert_eq!(compute_offset(2, 3, 10), 20);
        assert_eq!(compute_offset(-1, 3, 10), 20);
        assert_eq!(compute_offset(-3, 3, 10), 0);
        assert_eq!(compute_offset(-4, 3, 10), 20);
        assert_eq!(compute_offset(-1, 0, 10), 0);
    }

    #[test]
    fn extreme_pages_do_not_overflow() {
        assert_eq!(compute_offset(i64::MAX, 3, 10), u64::MAX);
        assert_eq!(compute_offset(i64::MIN, 3, 10), 10);
        assert_eq!(compute_offset(i64::MIN, 0, 10), 0);

        let (prev, next) = prev_next_pages(i64::MIN, 3, "/x", &args(&[]));
        assert_eq!(prev, Some(format!("/x?page={}", i64::MIN)));
        assert_eq!(next, Some(format!("/x?page={}", i64::MIN + 1)));

        let (prev, next) = prev_next_pages(i64::MAX, 3, "/x", &args(&[]));
        assert_eq!(prev.as_deref(), Some("/x?page=2"));
        assert_eq!(next, None);
    }

    #[test]
    fn prev_and_next_preserve_arguments() {
        let (prev, next) = prev_next_pages(1, 3, "/api/v1/analyze", &args(&[("per_page", "5"), ("page", "1")]));
        assert_eq!(prev.as_deref(), Some("/api/v1/analyze?page=0&per_page=5"));
        assert_eq!(next.as_deref(), Some("/api/v1/analyze?page=2&per_page=5"));

        let (prev, next) = prev_next_pages(0, 1, "/x", &args(&[]));
        assert_eq!((prev, next), (None, None));

        let (prev, next) = prev_next_pages(7, 3, "/x", &args(&[]));
        assert_eq!(prev.as_deref(), Some("/x?page=2"));
        assert_eq!(next, None);
    }

    #[test]
    fn per_page_is_bounded() {
        let settings = Settings {
            page_size_max: 20,
            page_size_default: 5,
            ..Settings::default()
        };

        let request = PageRequest::from_args(&args(&[]), &settings).unwrap();
        assert_eq!(request, PageRequest { page: 0, per_page: 5 });

        let request = PageRequest::from_args(&args(&[("per_page", "500"), ("page", "-1")]), &settings).unwrap();
        assert_eq!(request, PageRequest { page: -1, per_page: 20 });

        assert!(PageRequest::from_args(&args(&[("per_page", "0")]), &settings).is_err());
        assert!(PageRequest::from_args(&args(&[("page", "first")]), &settings).is_err());
    }

    #[test]
    fn headers_include_links() {
        let pagination = Pagination::new(
            PageRequest { page: 0, per_page: 2 },
            5,
            "/api/v1/advise/python",
            &args(&[]),
        );
        assert_eq!(pagination.page_count, 3);
        assert_eq!(pagination.offset(), 0);

        let headers = pagination.headers();
        assert!(headers.contains(&("entries_count", "5".to_string())));
        assert!(headers.contains(&(
            "link",
            "</api/v1/advise/python?page=1>; rel=\"next\"".to_string()
        )));
    }
}
