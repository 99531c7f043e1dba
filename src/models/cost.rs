//! Cost query request and the tabular pages the billing API answers with.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::format_timestamp;

/// Name of the summed cost column.
pub const COST_COLUMN: &str = "PreTaxCost";
/// Name of the currency column.
pub const CURRENCY_COLUMN: &str = "Currency";
/// Name of the resource-group grouping dimension.
pub const GROUP_COLUMN: &str = "ResourceGroup";

/// Closed time range covered by a cost query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Period {
    /// The `days`-long window ending at `now`.
    pub fn trailing_days(now: DateTime<Utc>, days: u32) -> Self {
        Self {
            from: now - Duration::days(i64::from(days)),
            to: now,
        }
    }
}

/// Body of a Cost Management query request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostQuery {
    #[serde(rename = "type")]
    pub kind: String,
    pub timeframe: String,
    pub time_period: TimePeriod,
    pub dataset: Dataset,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimePeriod {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub granularity: String,
    pub aggregation: std::collections::BTreeMap<String, Aggregation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub grouping: Vec<Grouping>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregation {
    pub name: String,
    pub function: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grouping {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

impl CostQuery {
    /// Daily summed pre-tax usage cost over `period`, grouped by resource group.
    pub fn daily_cost_by_resource_group(period: Period) -> Self {
        let mut aggregation = std::collections::BTreeMap::new();
        aggregation.insert(
            "totalCost".to_string(),
            Aggregation {
                name: COST_COLUMN.to_string(),
                function: "Sum".to_string(),
            },
        );

        Self {
            kind: "Usage".to_string(),
            timeframe: "Custom".to_string(),
            time_period: TimePeriod {
                from: format_timestamp(period.from),
                to: format_timestamp(period.to),
            },
            dataset: Dataset {
                granularity: "Daily".to_string(),
                aggregation,
                grouping: vec![Grouping {
                    kind: "Dimension".to_string(),
                    name: GROUP_COLUMN.to_string(),
                }],
            },
        }
    }
}

/// Column descriptor of a cost page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CostColumn {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// One page of cost rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostPage {
    pub columns: Vec<CostColumn>,
    pub rows: Vec<Vec<Value>>,
    /// Continuation reference for the next page, if any.
    pub next_link: Option<String>,
}

/// A page whose schema lacks a column the aggregator needs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("cost page has no '{0}' column")]
    MissingColumn(&'static str),
}

/// Positions of the cost, currency and group columns within one page.
///
/// Located by name on every page; schemas are not guaranteed to keep the same
/// column order between pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub cost: usize,
    pub currency: usize,
    pub group: usize,
}

impl ColumnLayout {
    pub fn locate(columns: &[CostColumn]) -> Result<Self, SchemaError> {
        let find = |name: &'static str| {
            columns
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(name))
                .ok_or(SchemaError::MissingColumn(name))
        };

        Ok(Self {
            cost: find(COST_COLUMN)?,
            currency: find(CURRENCY_COLUMN)?,
            group: find(GROUP_COLUMN)?,
        })
    }

    /// Extract the typed row at this layout. Rows that are too short or carry
    /// an unreadable amount yield `None`.
    pub fn read<'a>(&self, row: &'a [Value]) -> Option<CostRow<'a>> {
        let amount = parse_amount(row.get(self.cost)?)?;
        let currency = row.get(self.currency)?.as_str()?;
        let resource_group = row.get(self.group)?.as_str()?;
        Some(CostRow {
            amount,
            currency,
            resource_group,
        })
    }
}

/// A cost row borrowed from a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostRow<'a> {
    pub amount: Decimal,
    pub currency: &'a str,
    pub resource_group: &'a str,
}

/// Parse a JSON cell into an exact decimal amount.
///
/// The billing API sends numbers, occasionally in exponent notation, and some
/// exports send them as strings.
pub fn parse_amount(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal::dec;
    use serde_json::json;

    use super::*;

    fn columns(names: &[&str]) -> Vec<CostColumn> {
        names
            .iter()
            .map(|n| CostColumn {
                name: n.to_string(),
                kind: None,
            })
            .collect()
    }

    #[test]
    fn test_query_body_shape() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        let query = CostQuery::daily_cost_by_resource_group(Period::trailing_days(now, 30));
        let body = serde_json::to_value(&query).unwrap();

        assert_eq!(
            body,
            json!({
                "type": "Usage",
                "timeframe": "Custom",
                "timePeriod": {
                    "from": "2024-03-01T12:00:00.000Z",
                    "to": "2024-03-31T12:00:00.000Z"
                },
                "dataset": {
                    "granularity": "Daily",
                    "aggregation": {
                        "totalCost": {"name": "PreTaxCost", "function": "Sum"}
                    },
                    "grouping": [{"type": "Dimension", "name": "ResourceGroup"}]
                }
            })
        );
    }

    #[test]
    fn test_locate_columns_in_any_order() {
        let layout =
            ColumnLayout::locate(&columns(&["ResourceGroup", "Currency", "UsageDate", "PreTaxCost"]))
                .unwrap();
        assert_eq!(
            layout,
            ColumnLayout {
                cost: 3,
                currency: 1,
                group: 0
            }
        );
    }

    #[test]
    fn test_locate_reports_missing_column() {
        let err = ColumnLayout::locate(&columns(&["UsageDate", "ResourceGroup", "Currency"]))
            .unwrap_err();
        assert_eq!(err, SchemaError::MissingColumn(COST_COLUMN));
    }

    #[test]
    fn test_read_row() {
        let layout = ColumnLayout {
            cost: 0,
            currency: 2,
            group: 1,
        };
        let row = vec![json!(12.5), json!("rg-a"), json!("USD")];
        let parsed = layout.read(&row).unwrap();
        assert_eq!(parsed.amount, dec!(12.5));
        assert_eq!(parsed.currency, "USD");
        assert_eq!(parsed.resource_group, "rg-a");

        assert!(layout.read(&[json!(1.0), json!("rg-a")]).is_none());
        assert!(layout.read(&[json!(null), json!("rg-a"), json!("USD")]).is_none());
    }

    #[test]
    fn test_parse_amount_forms() {
        assert_eq!(parse_amount(&json!(7.25)), Some(dec!(7.25)));
        assert_eq!(parse_amount(&json!(3)), Some(dec!(3)));
        assert_eq!(parse_amount(&json!("2.00")), Some(dec!(2.00)));
        assert_eq!(parse_amount(&json!(1.5e-3)), Some(dec!(0.0015)));
        assert_eq!(parse_amount(&json!(true)), None);
    }
}
