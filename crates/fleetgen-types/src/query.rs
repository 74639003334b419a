//! Listing query types: filters, pagination, and sorting.
//!
//! The gateway sends typed filter inputs per aggregate
//! ([`GeneratorFilterInput`], [`VehicleFilterInput`]); handlers lower them
//! into a store-agnostic [`Filter`] of per-field predicates. Field names may
//! be dotted paths into nested documents (e.g. `metadata.updatedAt`).

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Default page size when the caller does not specify one.
pub const DEFAULT_PAGE_COUNT: u32 = 10;

/// How a single field is matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Matcher {
    /// The field equals this JSON value.
    Exact(serde_json::Value),
    /// The field is a string containing this text, case-insensitively.
    Contains(String),
}

/// A predicate on one (possibly nested) document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPredicate {
    /// Dotted field path.
    pub field: String,
    /// How the field is matched.
    pub matcher: Matcher,
}

/// A conjunction of field predicates. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// All predicates must hold.
    pub predicates: Vec<FieldPredicate>,
}

impl Filter {
    /// A filter matching every document.
    pub const fn all() -> Self {
        Self {
            predicates: Vec::new(),
        }
    }

    /// Add an exact-match predicate.
    #[must_use]
    pub fn exact(mut self, field: &str, value: serde_json::Value) -> Self {
        self.predicates.push(FieldPredicate {
            field: field.to_owned(),
            matcher: Matcher::Exact(value),
        });
        self
    }

    /// Add a case-insensitive substring predicate.
    #[must_use]
    pub fn contains(mut self, field: &str, needle: &str) -> Self {
        self.predicates.push(FieldPredicate {
            field: field.to_owned(),
            matcher: Matcher::Contains(needle.to_owned()),
        });
        self
    }

    /// Whether the filter has no predicates.
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

/// Page selection for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Pagination {
    /// Zero-based page index.
    #[serde(default)]
    pub page: u32,
    /// Page size.
    #[serde(default = "default_count")]
    pub count: u32,
    /// Whether to also compute the total number of matching documents.
    #[serde(default)]
    pub query_total_result_count: bool,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 0,
            count: DEFAULT_PAGE_COUNT,
            query_total_result_count: false,
        }
    }
}

impl Pagination {
    /// Number of documents to skip.
    pub const fn offset(&self) -> u64 {
        (self.page as u64).saturating_mul(self.count as u64)
    }
}

/// Sort order for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Sort {
    /// Dotted field path to sort by.
    pub field: String,
    /// Ascending when `true`, descending otherwise.
    #[serde(default, alias = "asc")]
    pub ascending: bool,
}

impl Sort {
    /// Descending order on `field`.
    pub fn descending(field: &str) -> Self {
        Self {
            field: field.to_owned(),
            ascending: false,
        }
    }
}

/// A fully resolved listing query.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    /// Which documents match.
    pub filter: Filter,
    /// Which page to return.
    pub pagination: Pagination,
    /// In which order.
    pub sort: Sort,
}

/// Arguments of a listing operation as sent by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingArgs<F> {
    /// Aggregate-specific filter input.
    #[serde(default)]
    pub filter_input: Option<F>,
    /// Page selection; defaults apply when absent.
    #[serde(default)]
    pub pagination_input: Option<Pagination>,
    /// Sort order; the aggregate's recency field descending when absent.
    #[serde(default)]
    pub sort_input: Option<Sort>,
}

impl<F> Default for ListingArgs<F> {
    fn default() -> Self {
        Self {
            filter_input: None,
            pagination_input: None,
            sort_input: None,
        }
    }
}

/// Result of a listing operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing<T> {
    /// The requested page.
    pub listing: Vec<T>,
    /// Total matching documents, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_total_result_count: Option<u64>,
}

/// Filter input for the generator listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct GeneratorFilterInput {
    /// Case-insensitive substring of the name.
    #[serde(default)]
    pub name: Option<String>,
    /// Exact owning organization.
    #[serde(default)]
    pub organization_id: Option<String>,
    /// Exact active flag.
    #[serde(default)]
    pub active: Option<bool>,
}

impl GeneratorFilterInput {
    /// Lower into a store filter.
    pub fn to_filter(&self) -> Filter {
        let mut filter = Filter::all();
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            filter = filter.contains("name", name);
        }
        if let Some(org) = &self.organization_id {
            filter = filter.exact("organizationId", serde_json::Value::from(org.as_str()));
        }
        if let Some(active) = self.active {
            filter = filter.exact("active", serde_json::Value::Bool(active));
        }
        filter
    }
}

/// Filter input for the vehicle listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct VehicleFilterInput {
    /// Case-insensitive substring of the body type.
    #[serde(default, rename = "type")]
    pub vehicle_type: Option<String>,
    /// Exact power source.
    #[serde(default)]
    pub power_source: Option<String>,
    /// Exact model year.
    #[serde(default)]
    pub year: Option<u32>,
}

impl VehicleFilterInput {
    /// Lower into a store filter.
    pub fn to_filter(&self) -> Filter {
        let mut filter = Filter::all();
        if let Some(vehicle_type) = self.vehicle_type.as_deref().filter(|t| !t.is_empty()) {
            filter = filter.contains("type", vehicle_type);
        }
        if let Some(power_source) = self.power_source.as_deref().filter(|p| !p.is_empty()) {
            filter = filter.exact("powerSource", serde_json::Value::from(power_source));
        }
        if let Some(year) = self.year {
            filter = filter.exact("year", serde_json::Value::from(year));
        }
        filter
    }
}

const fn default_count() -> u32 {
    DEFAULT_PAGE_COUNT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults() {
        let p: Pagination = serde_json::from_str("{}").unwrap_or_default();
        assert_eq!(p.page, 0);
        assert_eq!(p.count, DEFAULT_PAGE_COUNT);
        assert!(!p.query_total_result_count);
    }

    #[test]
    fn pagination_offset() {
        let p = Pagination {
            page: 3,
            count: 25,
            query_total_result_count: false,
        };
        assert_eq!(p.offset(), 75);
    }

    #[test]
    fn sort_accepts_asc_alias() {
        let sort: Option<Sort> = serde_json::from_str(r#"{"field":"hp","asc":true}"#).ok();
        assert_eq!(
            sort,
            Some(Sort {
                field: String::from("hp"),
                ascending: true
            })
        );
    }

    #[test]
    fn vehicle_filter_lowering() {
        let input = VehicleFilterInput {
            vehicle_type: Some(String::from("su")),
            power_source: Some(String::from("Diesel")),
            year: None,
        };
        let filter = input.to_filter();
        assert_eq!(filter.predicates.len(), 2);
        assert_eq!(
            filter.predicates.first().map(|p| p.matcher.clone()),
            Some(Matcher::Contains(String::from("su")))
        );
    }

    #[test]
    fn listing_args_from_gateway_json() {
        let args: Option<ListingArgs<GeneratorFilterInput>> = serde_json::from_value(
            serde_json::json!({
                "filterInput": { "name": "gen", "active": true },
                "paginationInput": { "page": 1, "count": 5, "queryTotalResultCount": true }
            }),
        )
        .ok();
        let args = args.unwrap_or_default();
        assert_eq!(args.pagination_input.map(|p| p.count), Some(5));
        assert_eq!(args.filter_input.map(|f| f.to_filter().predicates.len()), Some(2));
        assert!(args.sort_input.is_none());
    }
}
