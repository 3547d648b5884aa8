use std::str::FromStr;

use super::{ApiError, PageQuery};

pub const MAX_PAGE_SIZE: u64 = 100;

pub fn validate_page(query: &PageQuery) -> Result<(u64, u64), ApiError> {
    if query.page < 1 {
        return Err(ApiError::validation(format!(
            "Invalid page: {}. Page must be 1 or greater",
            query.page
        )));
    }

    if !(1..=MAX_PAGE_SIZE).contains(&query.page_size) {
        return Err(ApiError::validation(format!(
            "Invalid page size: {}. Page size must be between 1 and {}",
            query.page_size, MAX_PAGE_SIZE
        )));
    }

    Ok((query.page, query.page_size))
}

/// Parses a path identifier such as a conversation or message id.
pub fn parse_id<T: FromStr>(value: &str, what: &str) -> Result<T, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::validation(format!("Invalid {what} ID: {value}")))
}

pub fn validate_search_query(query: &str) -> Result<&str, ApiError> {
    let trimmed = query.trim();

    if trimmed.is_empty() {
        return Err(ApiError::validation("Search query cannot be empty"));
    }

    if trimmed.len() > 200 {
        return Err(ApiError::validation(
            "Search query must be 200 characters or less",
        ));
    }

    Ok(trimmed)
}
