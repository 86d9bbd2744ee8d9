//! Common types and utilities shared across models.

use serde::{Deserialize, Serialize};

/// Current UTC time in the RFC 3339 form stored in every timestamp column
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Helper to parse a JSON string array column, tolerating bad data
pub fn parse_string_list(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

/// Serialize a list of strings for storage, trimming and dropping blanks
pub fn encode_string_list(items: &[String]) -> String {
    let cleaned: Vec<&str> = items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    serde_json::to_string(&cleaned).unwrap_or_else(|_| "[]".to_string())
}

/// Page/per_page query parameters shared by list endpoints
#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct Pagination {
    /// Page number (1-indexed, defaults to 1)
    pub page: Option<i64>,
    /// Items per page (defaults to 20, max 100)
    pub per_page: Option<i64>,
}

impl Pagination {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(20).clamp(1, 100)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.per_page()
    }
}

/// A page of results with totals
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: &Pagination) -> Self {
        let per_page = pagination.per_page();
        Self {
            items,
            total,
            page: pagination.page(),
            per_page,
            total_pages: (total + per_page - 1) / per_page,
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            total_pages: self.total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_list_roundtrip_drops_blanks() {
        let encoded = encode_string_list(&[
            " anxiety ".to_string(),
            "".to_string(),
            "couples".to_string(),
        ]);
        assert_eq!(encoded, r#"["anxiety","couples"]"#);
        assert_eq!(parse_string_list("not json"), Vec::<String>::new());
    }

    #[test]
    fn test_pagination_bounds() {
        let p = Pagination {
            page: Some(0),
            per_page: Some(500),
        };
        assert_eq!(p.page(), 1);
        assert_eq!(p.per_page(), 100);
        assert_eq!(p.offset(), 0);

        let p = Pagination {
            page: Some(3),
            per_page: Some(10),
        };
        assert_eq!(p.offset(), 20);
        let page = Paginated::new(vec![1, 2], 21, &p);
        assert_eq!(page.total_pages, 3);
    }
}
