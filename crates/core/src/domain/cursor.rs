// Cursor Pagination - opaque (sort_value, id) keyset cursors and page assembly

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Position after the last row of a page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor {
    pub sort_value: i64,
    pub id: String,
}

impl Cursor {
    pub fn new(sort_value: i64, id: impl Into<String>) -> Self {
        Self {
            sort_value,
            id: id.into(),
        }
    }

    /// Opaque token: lowercase hex of `"<sort_value>:<id>"`
    pub fn encode(&self) -> String {
        let raw = format!("{}:{}", self.sort_value, self.id);
        raw.bytes().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn decode(token: &str) -> Result<Self> {
        let invalid = || DomainError::InvalidCursor(token.to_string());

        if token.len() % 2 != 0 || !token.is_ascii() {
            return Err(invalid());
        }
        let bytes = (0..token.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&token[i..i + 2], 16))
            .collect::<std::result::Result<Vec<u8>, _>>()
            .map_err(|_| invalid())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid())?;

        let (sort_value, id) = raw.split_once(':').ok_or_else(invalid)?;
        let sort_value = sort_value.parse::<i64>().map_err(|_| invalid())?;

        Ok(Self::new(sort_value, id))
    }

    /// Composite comparison of a row key against this cursor
    pub fn compare(&self, sort_value: i64, id: &str) -> Ordering {
        sort_value
            .cmp(&self.sort_value)
            .then_with(|| id.cmp(self.id.as_str()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl SortKey {
    pub fn column(&self) -> &'static str {
        match self {
            SortKey::CreatedAt => "created_at",
            SortKey::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    /// Comparison operator selecting rows strictly after the cursor
    pub fn after_operator(&self) -> &'static str {
        match self {
            SortOrder::Asc => ">",
            SortOrder::Desc => "<",
        }
    }
}

/// `{cursor?, page_size, sort_by, sort_order}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub cursor: Option<String>,
    /// Zero or absent falls back to the configured default
    pub page_size: Option<u32>,
    pub sort_by: SortKey,
    pub sort_order: SortOrder,
}

impl ListQuery {
    pub fn first(page_size: u32) -> Self {
        Self {
            page_size: Some(page_size),
            ..Self::default()
        }
    }

    pub fn after(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn decoded_cursor(&self) -> Result<Option<Cursor>> {
        self.cursor.as_deref().map(Cursor::decode).transpose()
    }

    /// Page size clamped to `1..=max`
    pub fn effective_page_size(&self, default: u32, max: u32) -> u32 {
        match self.page_size {
            Some(0) | None => default.clamp(1, max.max(1)),
            Some(n) => n.clamp(1, max.max(1)),
        }
    }

    /// Decode the cursor and settle the page size
    pub fn resolve(&self, default_page_size: u32, max_page_size: u32) -> Result<PageRequest> {
        Ok(PageRequest {
            cursor: self.decoded_cursor()?,
            page_size: self.effective_page_size(default_page_size, max_page_size),
            sort_by: self.sort_by,
            sort_order: self.sort_order,
        })
    }
}

/// A validated list query, as handed to repositories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: Option<Cursor>,
    pub page_size: u32,
    pub sort_by: SortKey,
    pub sort_order: SortOrder,
}

impl PageRequest {
    pub fn first(page_size: u32) -> Self {
        Self {
            cursor: None,
            page_size,
            sort_by: SortKey::default(),
            sort_order: SortOrder::default(),
        }
    }

    /// Rows to fetch: one extra to detect `has_more`
    pub fn fetch_limit(&self) -> i64 {
        self.page_size as i64 + 1
    }
}

/// `{data, has_more, next_cursor}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// Entities that can be paged by keyset
pub trait Keyed {
    fn key_id(&self) -> &str;
    fn sort_value(&self, key: SortKey) -> i64;
}

impl<T: Keyed> Page<T> {
    /// Build a page from `page_size + 1` fetched rows
    pub fn from_rows(mut rows: Vec<T>, page_size: u32, sort_by: SortKey) -> Self {
        let page_size = page_size as usize;
        let has_more = rows.len() > page_size;
        rows.truncate(page_size);

        let next_cursor = if has_more {
            rows.last()
                .map(|last| Cursor::new(last.sort_value(sort_by), last.key_id()).encode())
        } else {
            None
        };

        Self {
            data: rows,
            has_more,
            next_cursor,
        }
    }
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            has_more: self.has_more,
            next_cursor: self.next_cursor,
        }
    }
}

/// Keyset pagination over an in-memory slice (same semantics as the SQL path)
pub fn paginate<T: Keyed + Clone>(items: &[T], request: &PageRequest) -> Page<T> {
    let (sort_by, order) = (request.sort_by, request.sort_order);

    let mut sorted: Vec<&T> = items
        .iter()
        .filter(|item| match &request.cursor {
            None => true,
            Some(c) => {
                let ord = c.compare(item.sort_value(sort_by), item.key_id());
                match order {
                    SortOrder::Asc => ord == Ordering::Greater,
                    SortOrder::Desc => ord == Ordering::Less,
                }
            }
        })
        .collect();

    sorted.sort_by(|a, b| {
        let ord = a
            .sort_value(sort_by)
            .cmp(&b.sort_value(sort_by))
            .then_with(|| a.key_id().cmp(b.key_id()));
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });

    let rows = sorted
        .into_iter()
        .take(request.fetch_limit() as usize)
        .cloned()
        .collect();
    Page::from_rows(rows, request.page_size, sort_by)
}

impl Keyed for crate::domain::Job {
    fn key_id(&self) -> &str {
        &self.id
    }
    fn sort_value(&self, key: SortKey) -> i64 {
        match key {
            SortKey::CreatedAt => self.created_at,
            SortKey::UpdatedAt => self.updated_at,
        }
    }
}

impl Keyed for crate::domain::JobDocument {
    fn key_id(&self) -> &str {
        &self.id
    }
    fn sort_value(&self, key: SortKey) -> i64 {
        match key {
            SortKey::CreatedAt => self.created_at,
            SortKey::UpdatedAt => self.updated_at,
        }
    }
}

impl Keyed for crate::domain::ReviewQueueItem {
    fn key_id(&self) -> &str {
        &self.id
    }
    fn sort_value(&self, key: SortKey) -> i64 {
        match key {
            SortKey::CreatedAt => self.created_at,
            SortKey::UpdatedAt => self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: String,
        at: i64,
    }

    impl Keyed for Row {
        fn key_id(&self) -> &str {
            &self.id
        }
        fn sort_value(&self, _key: SortKey) -> i64 {
            self.at
        }
    }

    fn rows(n: usize) -> Vec<Row> {
        // Heavy timestamp collisions: only three distinct values
        (0..n)
            .map(|i| Row {
                id: format!("r{:03}", i),
                at: (i % 3) as i64,
            })
            .collect()
    }

    fn request(cursor: Option<Cursor>, page_size: u32, order: SortOrder) -> PageRequest {
        PageRequest {
            cursor,
            page_size,
            sort_by: SortKey::CreatedAt,
            sort_order: order,
        }
    }

    fn walk(items: &[Row], page_size: u32, order: SortOrder) -> (Vec<String>, usize) {
        let mut seen = Vec::new();
        let mut pages = 0;
        let mut cursor: Option<Cursor> = None;
        loop {
            let page = paginate(items, &request(cursor.take(), page_size, order));
            pages += 1;
            seen.extend(page.data.iter().map(|r| r.id.clone()));
            match page.next_cursor {
                Some(token) => cursor = Some(Cursor::decode(&token).unwrap()),
                None => break,
            }
        }
        (seen, pages)
    }

    #[test]
    fn test_cursor_round_trip() {
        for cursor in [
            Cursor::new(0, "a"),
            Cursor::new(-17, "id:with:colons"),
            Cursor::new(i64::MAX, ""),
            Cursor::new(1_700_000_000_000, "ünïcode"),
        ] {
            assert_eq!(Cursor::decode(&cursor.encode()).unwrap(), cursor);
        }
    }

    #[test]
    fn test_malformed_cursor_rejected() {
        for token in ["zz", "abc", "3a61", "", "é1"] {
            assert!(
                matches!(Cursor::decode(token), Err(DomainError::InvalidCursor(_))),
                "token {:?} should be rejected",
                token
            );
        }
    }

    #[test]
    fn test_forward_walk_visits_each_item_once_desc() {
        let items = rows(23);
        let (seen, pages) = walk(&items, 5, SortOrder::Desc);

        assert_eq!(pages, 5);
        assert_eq!(seen.len(), 23);

        let mut expected = items.clone();
        expected.sort_by(|a, b| b.at.cmp(&a.at).then_with(|| b.id.cmp(&a.id)));
        let expected: Vec<String> = expected.into_iter().map(|r| r.id).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_forward_walk_asc_exact_multiple() {
        let items = rows(20);
        let (seen, pages) = walk(&items, 5, SortOrder::Asc);
        assert_eq!(pages, 4, "last full page reports has_more = false");
        let mut dedup = seen.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), 20);
    }

    #[test]
    fn test_has_more_flag() {
        let items = rows(3);
        let page = paginate(&items, &request(None, 3, SortOrder::Asc));
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());

        let page = paginate(&items, &request(None, 2, SortOrder::Asc));
        assert!(page.has_more);
        assert_eq!(page.data.len(), 2);
    }

    #[test]
    fn test_effective_page_size() {
        assert_eq!(ListQuery::default().effective_page_size(50, 200), 50);
        assert_eq!(ListQuery::first(0).effective_page_size(50, 200), 50);
        assert_eq!(ListQuery::first(1_000).effective_page_size(50, 200), 200);
        assert_eq!(ListQuery::first(7).effective_page_size(50, 200), 7);
    }

    #[test]
    fn test_resolve_rejects_bad_cursor() {
        let query = ListQuery::first(10).after(Some("not-a-cursor".to_string()));
        assert!(query.resolve(50, 200).is_err());

        let token = Cursor::new(5, "x").encode();
        let request = ListQuery::first(10).after(Some(token)).resolve(50, 200).unwrap();
        assert_eq!(request.cursor, Some(Cursor::new(5, "x")));
        assert_eq!(request.fetch_limit(), 11);
    }
}
