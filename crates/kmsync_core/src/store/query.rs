//! Registry list query model: filter, sort and pagination.
//!
//! # Invariants
//! - Filters are conjunctions; an empty filter matches everything.
//! - Sorting is total: ties fall back to `id ASC`.
//! - Page numbers are zero-based.

use crate::model::record::{EntityKind, EntityRecord};
use serde_json::Value;
use std::cmp::Ordering;

/// One predicate of a registry list filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterPredicate {
    /// Field value equals `value` exactly. Missing fields equal `null`.
    Equals { field: String, value: Value },
    /// Case-insensitive substring match on string fields, or exact member
    /// match on array fields (reference lists).
    Contains { field: String, needle: String },
}

impl FilterPredicate {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            needle: needle.into(),
        }
    }

    pub fn matches(&self, record: &EntityRecord) -> bool {
        match self {
            Self::Equals { field, value } => record.field(field).unwrap_or(Value::Null) == *value,
            Self::Contains { field, needle } => match record.field(field) {
                Some(Value::String(text)) => text
                    .to_lowercase()
                    .contains(needle.to_lowercase().as_str()),
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|item| item.as_str() == Some(needle.as_str())),
                _ => false,
            },
        }
    }
}

/// Conjunction of predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub predicates: Vec<FilterPredicate>,
}

impl RecordFilter {
    /// Filter that matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn and(mut self, predicate: FilterPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn matches(&self, record: &EntityRecord) -> bool {
        self.predicates
            .iter()
            .all(|predicate| predicate.matches(record))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort key and direction. Defaults to `updated_at DESC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub key: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(key: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            key: key.into(),
            direction,
        }
    }

    /// Orders two records by this sort, falling back to `id ASC`.
    pub fn compare(&self, left: &EntityRecord, right: &EntityRecord) -> Ordering {
        let left_value = left.field(&self.key).unwrap_or(Value::Null);
        let right_value = right.field(&self.key).unwrap_or(Value::Null);
        let primary = compare_values(&left_value, &right_value);
        let primary = match self.direction {
            SortDirection::Asc => primary,
            SortDirection::Desc => primary.reverse(),
        };
        primary.then_with(|| left.id.cmp(&right.id))
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::new("updated_at", SortDirection::Desc)
    }
}

/// One paginated registry list request.
#[derive(Debug, Clone, PartialEq)]
pub struct ListRequest {
    pub kind: EntityKind,
    /// Zero-based page index.
    pub page: u32,
    /// Rows per page. `0` selects the configured default.
    pub page_size: u32,
    pub filter: RecordFilter,
    pub sort: SortSpec,
}

impl ListRequest {
    /// First page of `kind` with default size, no filter and default sort.
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            page: 0,
            page_size: 0,
            filter: RecordFilter::all(),
            sort: SortSpec::default(),
        }
    }

    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn filter(mut self, filter: RecordFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }
}

/// One page of registry results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub items: Vec<EntityRecord>,
    /// Total matching rows across all pages.
    pub total: u64,
}

impl ListPage {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Default and maximum page sizes applied by the registry client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl PageLimits {
    /// Maps `0` to the default and clamps to the maximum.
    pub fn normalize(self, page_size: u32) -> u32 {
        if page_size == 0 {
            self.default_page_size.min(self.max_page_size)
        } else {
            page_size.min(self.max_page_size)
        }
    }
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_page_size: 25,
            max_page_size: 100,
        }
    }
}

/// Filters, sorts and slices an in-memory candidate set.
///
/// `page_size == 0` returns every matching row.
pub fn paginate(candidates: Vec<EntityRecord>, request: &ListRequest) -> ListPage {
    let mut matching: Vec<EntityRecord> = candidates
        .into_iter()
        .filter(|record| record.kind == request.kind && request.filter.matches(record))
        .collect();
    matching.sort_by(|left, right| request.sort.compare(left, right));

    let total = matching.len() as u64;
    if request.page_size == 0 {
        return ListPage {
            items: matching,
            total,
        };
    }

    let start = (request.page as usize).saturating_mul(request.page_size as usize);
    let items = matching
        .into_iter()
        .skip(start)
        .take(request.page_size as usize)
        .collect();
    ListPage { items, total }
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
        (Value::Number(l), Value::Number(r)) => {
            let l = l.as_f64().unwrap_or(0.0);
            let r = r.as_f64().unwrap_or(0.0);
            l.partial_cmp(&r).unwrap_or(Ordering::Equal)
        }
        (Value::String(l), Value::String(r)) => l.to_lowercase().cmp(&r.to_lowercase()),
        _ => type_rank(left).cmp(&type_rank(right)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
