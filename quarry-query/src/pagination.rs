//! Offset pagination results.
//!
//! ```rust
//! use quarry_query::Paginator;
//!
//! let page = Paginator::new((11..=20).collect::<Vec<u32>>(), 25, 10, 2);
//! assert_eq!(page.last_page, 3);
//! assert_eq!(page.from, Some(11));
//! assert_eq!(page.to, Some(20));
//! assert!(page.has_more_pages());
//! ```

use serde::Serialize;

/// Offset/limit window for a 1-indexed page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Rows to skip.
    pub offset: u64,
    /// Rows to take.
    pub limit: u64,
}

impl Pagination {
    /// Window for `page` (1-indexed) of `per_page` rows.
    pub fn page(page: u64, per_page: u64) -> Self {
        let page = page.max(1);
        let per_page = per_page.max(1);
        Self {
            offset: (page - 1).saturating_mul(per_page),
            limit: per_page,
        }
    }
}

/// A page of results together with the total count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paginator<T> {
    /// Items on this page.
    pub data: Vec<T>,
    /// Total number of matching items.
    pub total: u64,
    /// Page size.
    pub per_page: u64,
    /// Current page (1-indexed).
    pub current_page: u64,
    /// Last page; at least 1.
    pub last_page: u64,
    /// 1-based position of the first item, `None` for an empty page.
    pub from: Option<u64>,
    /// 1-based position of the last item, `None` for an empty page.
    pub to: Option<u64>,
}

impl<T> Paginator<T> {
    /// Build a page from its items and the total count.
    pub fn new(data: Vec<T>, total: u64, per_page: u64, current_page: u64) -> Self {
        let per_page = per_page.max(1);
        let current_page = current_page.max(1);
        let last_page = total.div_ceil(per_page).max(1);
        let (from, to) = window(data.len(), per_page, current_page);
        Self {
            data,
            total,
            per_page,
            current_page,
            last_page,
            from,
            to,
        }
    }

    /// Whether pages follow this one.
    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page
    }

    /// Whether this is the first page.
    pub fn on_first_page(&self) -> bool {
        self.current_page <= 1
    }

    /// Number of items on this page.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for an empty page.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Transform the items, keeping the page metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginator<U> {
        Paginator {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
            per_page: self.per_page,
            current_page: self.current_page,
            last_page: self.last_page,
            from: self.from,
            to: self.to,
        }
    }

    /// Fallible [`Paginator::map`].
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Paginator<U>, E> {
        Ok(Paginator {
            data: self.data.into_iter().map(f).collect::<Result<_, _>>()?,
            total: self.total,
            per_page: self.per_page,
            current_page: self.current_page,
            last_page: self.last_page,
            from: self.from,
            to: self.to,
        })
    }
}

/// A page of results without a total count.
///
/// One extra row is fetched to learn whether another page exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimplePaginator<T> {
    /// Items on this page.
    pub data: Vec<T>,
    /// Page size.
    pub per_page: u64,
    /// Current page (1-indexed).
    pub current_page: u64,
    /// Whether another page exists.
    pub has_more: bool,
    /// 1-based position of the first item.
    pub from: Option<u64>,
    /// 1-based position of the last item.
    pub to: Option<u64>,
}

impl<T> SimplePaginator<T> {
    /// Build a page from up to `per_page + 1` fetched items.
    pub fn new(mut data: Vec<T>, per_page: u64, current_page: u64) -> Self {
        let per_page = per_page.max(1);
        let current_page = current_page.max(1);
        let has_more = data.len() as u64 > per_page;
        data.truncate(per_page as usize);
        let (from, to) = window(data.len(), per_page, current_page);
        Self {
            data,
            per_page,
            current_page,
            has_more,
            from,
            to,
        }
    }

    /// Whether pages follow this one.
    pub fn has_more_pages(&self) -> bool {
        self.has_more
    }

    /// Transform the items, keeping the page metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> SimplePaginator<U> {
        SimplePaginator {
            data: self.data.into_iter().map(f).collect(),
            per_page: self.per_page,
            current_page: self.current_page,
            has_more: self.has_more,
            from: self.from,
            to: self.to,
        }
    }

    /// Fallible [`SimplePaginator::map`].
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<SimplePaginator<U>, E> {
        Ok(SimplePaginator {
            data: self.data.into_iter().map(f).collect::<Result<_, _>>()?,
            per_page: self.per_page,
            current_page: self.current_page,
            has_more: self.has_more,
            from: self.from,
            to: self.to,
        })
    }
}

fn window(len: usize, per_page: u64, current_page: u64) -> (Option<u64>, Option<u64>) {
    if len == 0 {
        return (None, None);
    }
    let from = (current_page - 1).saturating_mul(per_page).saturating_add(1);
    (Some(from), Some(from.saturating_add(len as u64 - 1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_page_window() {
        assert_eq!(Pagination::page(3, 25), Pagination { offset: 50, limit: 25 });
        assert_eq!(Pagination::page(0, 0), Pagination { offset: 0, limit: 1 });
    }

    #[test]
    fn test_huge_page_saturates() {
        assert_eq!(Pagination::page(u64::MAX, 50), Pagination { offset: u64::MAX, limit: 50 });

        let page = Paginator::new(vec![1], 3, 50, u64::MAX);
        assert_eq!(page.from, Some(u64::MAX));
        assert_eq!(page.to, Some(u64::MAX));
    }

    #[test]
    fn test_last_page_of_twenty_five() {
        let page = Paginator::new(vec![0; 5], 25, 10, 3);
        assert_eq!(page.last_page, 3);
        assert!(!page.has_more_pages());
        assert_eq!(page.from, Some(21));
        assert_eq!(page.to, Some(25));
    }

    #[test]
    fn test_empty_result_has_one_page() {
        let page: Paginator<u8> = Paginator::new(vec![], 0, 15, 1);
        assert_eq!(page.last_page, 1);
        assert_eq!(page.from, None);
        assert!(page.on_first_page());
    }

    #[test]
    fn test_simple_paginator_trims_lookahead_row() {
        let page = SimplePaginator::new(vec![1, 2, 3, 4], 3, 1);
        assert_eq!(page.data, vec![1, 2, 3]);
        assert!(page.has_more_pages());

        let last = SimplePaginator::new(vec![1], 3, 2);
        assert!(!last.has_more_pages());
        assert_eq!(last.from, Some(4));
    }

    #[test]
    fn test_map_keeps_metadata() {
        let page = Paginator::new(vec![1, 2], 12, 2, 4).map(|n| n * 10);
        assert_eq!(page.data, vec![10, 20]);
        assert_eq!(page.current_page, 4);
        assert_eq!(page.last_page, 6);
    }
}
