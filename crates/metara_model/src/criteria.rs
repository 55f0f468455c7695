//! Query criteria and fields-wanted projections.
//!
//! Builders that produce the filter/order/limit/offset wire map and the
//! projection tree a fetch sends alongside it. Column names are not
//! validated locally; an invalid column only surfaces as a remote error.

use metara_wire::{Value, KEY_LIMIT, KEY_OFFSET, KEY_ORDER};

/// One filter expression for a column.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// Simple equality against a value.
    Eq(Value),
    /// An explicit operator, e.g. `"IN"` (value must then be a list) or
    /// `">="`.
    Op {
        /// The operator token, passed through verbatim.
        operator: String,
        /// The comparison value.
        value: Value,
    },
}

/// Filter + order + limit + offset specification for a query.
///
/// Also carries the fields-wanted projection, since a fetch always sends
/// the two together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    filters: Vec<(String, FilterExpr)>,
    order: Vec<String>,
    limit: Option<u32>,
    offset: Option<u32>,
    fields: FieldsSpec,
}

impl Criteria {
    /// Creates empty criteria (match everything, project nothing).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality filter on `column`.
    pub fn add_filter(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters
            .push((column.to_string(), FilterExpr::Eq(value.into())));
        self
    }

    /// Adds an operator filter on `column`, e.g. `("id", "IN", list)`.
    pub fn add_filter_op(mut self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        self.filters.push((
            column.to_string(),
            FilterExpr::Op {
                operator: operator.to_string(),
                value: value.into(),
            },
        ));
        self
    }

    /// Appends `column` to the order-by list.
    pub fn add_order_by(mut self, column: &str) -> Self {
        self.order.push(column.to_string());
        self
    }

    /// Caps the number of results.
    pub fn set_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the first `offset` results.
    pub fn set_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Requests `field` on the root entity.
    pub fn add_wanted(mut self, field: &str) -> Self {
        self.fields = self.fields.add_wanted(field);
        self
    }

    /// Requests `field` on the named has-many relation.
    pub fn add_wanted_in(mut self, relation: &str, field: &str) -> Self {
        self.fields = self.fields.add_wanted_in(relation, field);
        self
    }

    /// The fields-wanted projection.
    pub fn fields(&self) -> &FieldsSpec {
        &self.fields
    }

    /// The full criteria wire map: literal filter keys plus the reserved
    /// `__order`/`__limit`/`__offset` keys.
    pub fn to_wire(&self) -> Value {
        let mut pairs = self.filter_pairs();
        if !self.order.is_empty() {
            pairs.push((
                KEY_ORDER.to_string(),
                Value::List(self.order.iter().map(|c| Value::Text(c.clone())).collect()),
            ));
        }
        if let Some(limit) = self.limit {
            pairs.push((KEY_LIMIT.to_string(), Value::Int(i64::from(limit))));
        }
        if let Some(offset) = self.offset {
            pairs.push((KEY_OFFSET.to_string(), Value::Int(i64::from(offset))));
        }
        Value::Map(pairs)
    }

    /// The filters-only wire map, as consumed by count operations that
    /// ignore ordering, paging, and projection.
    pub fn to_filter_wire(&self) -> Value {
        Value::Map(self.filter_pairs())
    }

    fn filter_pairs(&self) -> Vec<(String, Value)> {
        self.filters
            .iter()
            .map(|(column, expr)| {
                let value = match expr {
                    FilterExpr::Eq(v) => v.clone(),
                    // An operator filter travels as a two-element list.
                    FilterExpr::Op { operator, value } => {
                        Value::List(vec![Value::Text(operator.clone()), value.clone()])
                    }
                };
                (column.clone(), value)
            })
            .collect()
    }
}

/// The set of fields a caller asks the server to populate.
///
/// Keyed by `"."` for the root entity or by a has-many relation name;
/// everything not listed comes back absent, not null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldsSpec {
    wanted: Vec<(String, Vec<String>)>,
}

impl FieldsSpec {
    /// Root key for fields of the queried entity itself.
    pub const ROOT: &'static str = ".";

    /// Creates an empty projection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests `field` on the root entity.
    pub fn add_wanted(self, field: &str) -> Self {
        self.add_wanted_in(Self::ROOT, field)
    }

    /// Requests `field` on the named relation.
    pub fn add_wanted_in(mut self, relation: &str, field: &str) -> Self {
        match self.wanted.iter_mut().find(|(r, _)| r == relation) {
            Some((_, fields)) => {
                if !fields.iter().any(|f| f == field) {
                    fields.push(field.to_string());
                }
            }
            None => self
                .wanted
                .push((relation.to_string(), vec![field.to_string()])),
        }
        self
    }

    /// Whether nothing has been requested.
    pub fn is_empty(&self) -> bool {
        self.wanted.is_empty()
    }

    /// The projection tree as a wire map of field-name lists.
    pub fn to_wire(&self) -> Value {
        Value::Map(
            self.wanted
                .iter()
                .map(|(relation, fields)| {
                    (
                        relation.clone(),
                        Value::List(fields.iter().map(|f| Value::Text(f.clone())).collect()),
                    )
                })
                .collect(),
        )
    }
}
