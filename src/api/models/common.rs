use serde::{Deserialize, Serialize};

/// Plain acknowledgement body
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 500;

/// `?offset=&limit=` paging parameters
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl PageQuery {
    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    /// Requested limit, clamped to `1..=MAX_PAGE_LIMIT`
    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }
}

/// One page of a larger listing
#[derive(Debug, Serialize)]
pub struct PagedResponse<T: Serialize> {
    pub total: i64,
    pub offset: usize,
    pub limit: usize,
    pub items: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_query_defaults_and_clamping() {
        let query = PageQuery::default();
        assert_eq!(query.offset(), 0);
        assert_eq!(query.limit(), DEFAULT_PAGE_LIMIT);

        let query = PageQuery {
            offset: Some(20),
            limit: Some(10_000),
        };
        assert_eq!(query.offset(), 20);
        assert_eq!(query.limit(), MAX_PAGE_LIMIT);

        let query = PageQuery {
            offset: None,
            limit: Some(0),
        };
        assert_eq!(query.limit(), 1);
    }
}
