//! Search query model and its encoding into the CRM's `where[...]` URL parameters.

/// Nested where-clause. Leaves are case-insensitive "contains" tests.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Contains { field: &'static str, value: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn contains(field: &'static str, value: impl Into<String>) -> Self {
        Filter::Contains {
            field,
            value: value.into(),
        }
    }

    fn push_params(&self, prefix: &str, out: &mut Vec<(String, String)>) {
        match self {
            Filter::Contains { field, value } => {
                out.push((format!("{prefix}[field]"), field.to_string()));
                out.push((format!("{prefix}[type]"), "contains".to_string()));
                out.push((format!("{prefix}[value]"), value.clone()));
            }
            Filter::And(items) | Filter::Or(items) => {
                let op = if matches!(self, Filter::And(_)) { "and" } else { "or" };
                out.push((format!("{prefix}[type]"), op.to_string()));
                for (i, item) in items.iter().enumerate() {
                    item.push_params(&format!("{prefix}[value][{i}]"), out);
                }
            }
        }
    }
}

/// A list request against one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub filter: Filter,
    pub select: &'static [&'static str],
    pub max_size: u32,
    pub order_by: &'static str,
}

impl SearchQuery {
    pub fn new(filter: Filter, select: &'static [&'static str]) -> Self {
        Self {
            filter,
            select,
            max_size: 20,
            order_by: "name",
        }
    }

    /// Query-string pairs in the order the CRM documents them.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("select".to_string(), self.select.join(",")),
            ("maxSize".to_string(), self.max_size.to_string()),
            ("orderBy".to_string(), self.order_by.to_string()),
        ];
        self.filter.push_params("where[0]", &mut params);
        params
    }
}
