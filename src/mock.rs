//! Mock results that bypass database execution entirely.
//!
//! Every [`crate::connection::ConnectionManager`] operation checks
//! `mock_results[query.name]` before opening a connection (spec.md §4.2).
//! The empty-string key is reserved for batch-level mocking of
//! [`crate::batch::Batch::run`].

use std::any::Any;
use std::collections::HashMap;

use crate::error::Error;

/// A read-only table of pre-supplied results, keyed by `Query::name`.
///
/// Built once and shared; nothing mutates it after construction (spec.md
/// §5: "Mock Result Table is read-only after first population").
#[derive(Default)]
pub struct MockResultTable {
    entries: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl MockResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mock result for `query_name`. Use `""` for the
    /// batch-level key.
    pub fn with(mut self, query_name: impl Into<String>, value: impl Any + Send + Sync) -> Self {
        self.entries.insert(query_name.into(), Box::new(value));
        self
    }

    /// Look up a mock result and type-check it against the caller's
    /// declared return type `T`. Returns `Ok(None)` if no mock is
    /// registered for `query_name`, `Err(MockTypeMismatch)` if one is
    /// registered but its runtime type doesn't match `T`.
    pub fn get<T: Any + Clone>(&self, query_name: &str) -> Result<Option<T>, Error> {
        match self.entries.get(query_name) {
            None => Ok(None),
            Some(boxed) => match boxed.downcast_ref::<T>() {
                Some(value) => Ok(Some(value.clone())),
                None => Err(Error::MockTypeMismatch {
                    query: query_name.to_string(),
                    expected: std::any::type_name::<T>(),
                }),
            },
        }
    }

    pub fn contains(&self, query_name: &str) -> bool {
        self.entries.contains_key(query_name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct User {
        id: i64,
    }

    #[test]
    fn test_mock_bypass_s7() {
        let mocks = MockResultTable::new().with("GetUser", User { id: 7 });
        let found: Option<User> = mocks.get("GetUser").unwrap();
        assert_eq!(found, Some(User { id: 7 }));
    }

    #[test]
    fn test_missing_key_returns_none() {
        let mocks = MockResultTable::new();
        let found: Option<String> = mocks.get("GetUser").unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let mocks = MockResultTable::new().with("GetUser", 42i64);
        let result: Result<Option<String>, Error> = mocks.get("GetUser");
        assert!(matches!(result, Err(Error::MockTypeMismatch { .. })));
    }

    #[test]
    fn test_empty_key_reserved_for_batch() {
        let mocks = MockResultTable::new().with("", 99i64);
        assert!(mocks.contains(""));
    }
}
