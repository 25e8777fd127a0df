//! Translate engine filter/projection/order/limit structures into
//! parameterized, collation-safe T-SQL, and run the result against a pooled
//! connection.
//!
//! Parameter binding happens at the RPC layer: [`mssql_client::Client::query`]
//! already turns a parameterized `@p1`-style statement plus a `SqlValue` list
//! into an `sp_executesql` RPC call (see `RpcRequest::execute_sql`), so the
//! planner emits plain parameterized SQL text rather than assembling the
//! `EXEC sp_executesql` wrapper itself.

use std::collections::HashMap;

use mssql_client::Row;
use mssql_driver_pool::Pool;
use mssql_types::{SqlValue, ToSql};

use crate::error::Result;
use crate::settings::DEFAULT_MAX_IN_LIST;

/// A single predicate node the engine may ask the planner to push down.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// `column OP literal`.
    Compare {
        /// Target column name.
        column: String,
        /// Comparison operator.
        op: CompareOp,
        /// Bound value.
        value: SqlValue,
    },
    /// `column IS [NOT] NULL`.
    IsNull {
        /// Target column name.
        column: String,
        /// `true` for `IS NOT NULL`.
        negated: bool,
    },
    /// `column BETWEEN low AND high`.
    Between {
        /// Target column name.
        column: String,
        /// Inclusive lower bound.
        low: SqlValue,
        /// Inclusive upper bound.
        high: SqlValue,
    },
    /// `column IN (values...)`.
    In {
        /// Target column name.
        column: String,
        /// Candidate values; if this exceeds the configured limit the whole
        /// subtree containing it is evaluated locally instead.
        values: Vec<SqlValue>,
    },
    /// `column [NOT] LIKE pattern`, pushed as `LIKE ... ESCAPE '\'`.
    /// `case_insensitive` selects whether this came from an `ILIKE`; it is
    /// only pushed when the target column's collation is itself
    /// case-insensitive (checked by the caller via `ci_collation`).
    Like {
        /// Target column name.
        column: String,
        /// Pattern, with `\` already used as the literal escape character.
        pattern: String,
        /// Whether this predicate originated as a case-insensitive `ILIKE`.
        case_insensitive: bool,
    },
    /// Boolean combination of child predicates.
    And(Vec<Predicate>),
    /// Boolean combination of child predicates.
    Or(Vec<Predicate>),
    /// Negation of a child predicate.
    Not(Box<Predicate>),
}

/// Supported comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Sort direction for an ORDER BY column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// `ASC`
    Asc,
    /// `DESC`
    Desc,
}

/// A scan plan the engine hands the planner: projection, predicate tree,
/// ordering, and an optional row limit.
#[derive(Debug, Clone, Default)]
pub struct ScanPlan {
    /// Schema-qualified table name, already validated by the caller.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Columns to project; empty means `SELECT *` is not emitted — the
    /// caller must always supply at least one column.
    pub projection: Vec<String>,
    /// The predicate to push down, if any.
    pub predicate: Option<Predicate>,
    /// Column name, collation-case-insensitive flag, and sort direction,
    /// in ORDER BY precedence order.
    pub order_by: Vec<(String, SortDirection)>,
    /// `TOP (n)` row limit, only emitted when paired with a full ordering.
    pub limit: Option<u64>,
    /// Column name -> explicit collation name (e.g. `Latin1_General_CI_AS`),
    /// from [`crate::catalog::column_collations`]. Only columns whose
    /// collation differs from the database default appear here; absence
    /// means "use the database default" for both `ILIKE` pushdown and
    /// parameter-collation wrapping.
    pub column_collations: HashMap<String, String>,
}

/// The result of planning: the pushed-down SQL plus whatever predicate
/// subtree could not be pushed (the engine must still apply this locally).
#[derive(Debug, Clone)]
pub struct PlannedQuery {
    /// Plain parameterized SQL (`@p1`, `@p2`, ...); no `EXEC sp_executesql`
    /// wrapper. Intended to be passed straight to
    /// [`mssql_client::Client::query`] together with `params`.
    pub sql: String,
    /// Parameter values, in the order referenced by `sql`.
    pub params: Vec<SqlValue>,
    /// The predicate subtree that could not be pushed down and must be
    /// evaluated locally by the engine over the rows returned.
    pub residual_predicate: Option<Predicate>,
}

/// Quote an identifier with `[...]`, escaping `]` as `]]`.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Translate `plan` into collation-safe, parameterized T-SQL. Unsupported
/// predicate nodes split off into `residual_predicate` rather than failing
/// the whole plan.
#[must_use]
pub fn plan_scan(plan: &ScanPlan) -> PlannedQuery {
    let mut params = Vec::new();
    let mut builder = PredicateBuilder {
        column_collations: &plan.column_collations,
        params: &mut params,
        residual: Vec::new(),
    };

    let where_clause = plan
        .predicate
        .as_ref()
        .and_then(|p| builder.build(p));

    let residual_predicate = match builder.residual.len() {
        0 => None,
        1 => builder.residual.pop(),
        _ => Some(Predicate::And(builder.residual)),
    };

    let projection = plan
        .projection
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let table = format!("{}.{}", quote_ident(&plan.schema), quote_ident(&plan.table));

    let order_by = if plan.order_by.is_empty() {
        String::new()
    } else {
        let cols = plan
            .order_by
            .iter()
            .map(|(c, dir)| {
                format!(
                    "{} {}",
                    quote_ident(c),
                    match dir {
                        SortDirection::Asc => "ASC",
                        SortDirection::Desc => "DESC",
                    }
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(" ORDER BY {cols}")
    };

    let top = match (plan.limit, plan.order_by.is_empty()) {
        (Some(n), false) => format!("TOP ({n}) "),
        _ => String::new(),
    };

    let mut sql = format!("SELECT {top}{projection} FROM {table}");
    if let Some(clause) = &where_clause {
        sql.push_str(" WHERE ");
        sql.push_str(clause);
    }
    sql.push_str(&order_by);
    sql.push(';');

    PlannedQuery {
        sql,
        params,
        residual_predicate,
    }
}

/// Run `plan` against a connection from `pool`, returning the rows the
/// server produced alongside whatever predicate subtree the planner could
/// not push down — the caller must still apply that locally over the
/// returned rows.
pub async fn execute_scan(pool: &Pool, plan: &ScanPlan) -> Result<(Vec<Row>, Option<Predicate>)> {
    let planned = plan_scan(plan);
    let params: Vec<&(dyn ToSql + Sync)> = planned
        .params
        .iter()
        .map(|v| v as &(dyn ToSql + Sync))
        .collect();
    let mut conn = pool.get().await?;
    let rows = conn.query(&planned.sql, &params).await?.collect_all().await?;
    Ok((rows, planned.residual_predicate))
}

struct PredicateBuilder<'a> {
    column_collations: &'a HashMap<String, String>,
    params: &'a mut Vec<SqlValue>,
    residual: Vec<Predicate>,
}

impl<'a> PredicateBuilder<'a> {
    fn bind(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        format!("@p{}", self.params.len())
    }

    /// Try to push `predicate`; returns `None` (and records it under
    /// `residual`) when it can't be expressed server-side.
    fn build(&mut self, predicate: &Predicate) -> Option<String> {
        match predicate {
            Predicate::Compare { column, op, value } => {
                let param = self.bind(value.clone());
                Some(format!(
                    "{} {} {}",
                    quote_ident(column),
                    op.as_sql(),
                    self.collation_wrap(column, &param)
                ))
            }
            Predicate::IsNull { column, negated } => Some(format!(
                "{} IS {}NULL",
                quote_ident(column),
                if *negated { "NOT " } else { "" }
            )),
            Predicate::Between { column, low, high } => {
                let lo = self.bind(low.clone());
                let hi = self.bind(high.clone());
                Some(format!(
                    "{} BETWEEN {} AND {}",
                    quote_ident(column),
                    self.collation_wrap(column, &lo),
                    self.collation_wrap(column, &hi)
                ))
            }
            Predicate::In { column, values } => {
                if values.len() > DEFAULT_MAX_IN_LIST {
                    self.residual.push(predicate.clone());
                    return None;
                }
                let bound = values
                    .iter()
                    .map(|v| self.bind(v.clone()))
                    .collect::<Vec<_>>()
                    .join(", ");
                Some(format!("{} IN ({bound})", quote_ident(column)))
            }
            Predicate::Like {
                column,
                pattern,
                case_insensitive,
            } => {
                let pushable = !*case_insensitive
                    || self
                        .column_collations
                        .get(column)
                        .is_some_and(|c| crate::catalog::is_case_insensitive_collation(c));
                if !pushable {
                    self.residual.push(predicate.clone());
                    return None;
                }
                let param = self.bind(SqlValue::String(pattern.clone()));
                Some(format!(
                    "{} LIKE {} ESCAPE '\\'",
                    quote_ident(column),
                    self.collation_wrap(column, &param)
                ))
            }
            Predicate::And(children) => self.build_conjunction(children, "AND"),
            Predicate::Or(children) => self.build_conjunction(children, "OR"),
            Predicate::Not(inner) => {
                let child = self.build(inner)?;
                Some(format!("NOT ({child})"))
            }
        }
    }

    fn build_conjunction(&mut self, children: &[Predicate], joiner: &str) -> Option<String> {
        let mut pushed = Vec::new();
        for child in children {
            if let Some(sql) = self.build(child) {
                pushed.push(sql);
            }
        }
        if pushed.is_empty() {
            None
        } else {
            Some(format!("({})", pushed.join(&format!(" {joiner} "))))
        }
    }

    /// Wrap a bound parameter in `CONVERT(varchar(max), @pN) COLLATE <col>`
    /// when comparing against a column with an explicit (non-default)
    /// collation, so the parameter — not the column — is converted and
    /// index sargability on the column is preserved.
    fn collation_wrap(&self, column: &str, param: &str) -> String {
        match self.column_collations.get(column) {
            Some(collation) => format!("CONVERT(varchar(max), {param}) COLLATE {collation}"),
            None => param.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_simple_projection() {
        let plan = ScanPlan {
            schema: "dbo".to_string(),
            table: "Orders".to_string(),
            projection: vec!["Id".to_string(), "Total".to_string()],
            ..Default::default()
        };
        let planned = plan_scan(&plan);
        assert!(planned.sql.contains("[dbo].[Orders]"));
        assert!(planned.sql.contains("[Id], [Total]"));
        assert!(planned.params.is_empty());
    }

    #[test]
    fn pushes_comparison_predicate() {
        let plan = ScanPlan {
            schema: "dbo".to_string(),
            table: "Orders".to_string(),
            projection: vec!["Id".to_string()],
            predicate: Some(Predicate::Compare {
                column: "Total".to_string(),
                op: CompareOp::Gt,
                value: SqlValue::Int(100),
            }),
            ..Default::default()
        };
        let planned = plan_scan(&plan);
        assert!(planned.sql.contains("[Total] > @p1"));
        assert_eq!(planned.params.len(), 1);
        assert!(planned.residual_predicate.is_none());
    }

    #[test]
    fn splits_oversized_in_list_to_residual() {
        let values: Vec<SqlValue> = (0..(DEFAULT_MAX_IN_LIST as i32 + 1))
            .map(SqlValue::Int)
            .collect();
        let plan = ScanPlan {
            schema: "dbo".to_string(),
            table: "Orders".to_string(),
            projection: vec!["Id".to_string()],
            predicate: Some(Predicate::In {
                column: "Id".to_string(),
                values,
            }),
            ..Default::default()
        };
        let planned = plan_scan(&plan);
        assert!(planned.params.is_empty());
        assert!(planned.residual_predicate.is_some());
        assert!(!planned.sql.contains("WHERE"));
    }

    #[test]
    fn ilike_on_case_sensitive_column_stays_local() {
        let plan = ScanPlan {
            schema: "dbo".to_string(),
            table: "Customers".to_string(),
            projection: vec!["Name".to_string()],
            predicate: Some(Predicate::Like {
                column: "Name".to_string(),
                pattern: "A%".to_string(),
                case_insensitive: true,
            }),
            column_collations: HashMap::new(),
            ..Default::default()
        };
        let planned = plan_scan(&plan);
        assert!(planned.residual_predicate.is_some());
        assert!(!planned.sql.contains("WHERE"));
    }

    #[test]
    fn ilike_on_case_insensitive_column_pushes_down() {
        let plan = ScanPlan {
            schema: "dbo".to_string(),
            table: "Customers".to_string(),
            projection: vec!["Name".to_string()],
            predicate: Some(Predicate::Like {
                column: "Name".to_string(),
                pattern: "A%".to_string(),
                case_insensitive: true,
            }),
            column_collations: HashMap::from([(
                "Name".to_string(),
                "Latin1_General_CI_AS".to_string(),
            )]),
            ..Default::default()
        };
        let planned = plan_scan(&plan);
        assert!(planned.residual_predicate.is_none());
        assert!(planned.sql.contains("LIKE CONVERT(varchar(max), @p1) COLLATE Latin1_General_CI_AS"));
    }

    #[test]
    fn quotes_bracket_in_identifier() {
        assert_eq!(quote_ident("weird]name"), "[weird]]name]");
    }

    #[test]
    fn emits_top_only_with_full_ordering() {
        let plan = ScanPlan {
            schema: "dbo".to_string(),
            table: "Orders".to_string(),
            projection: vec!["Id".to_string()],
            order_by: vec![("Id".to_string(), SortDirection::Asc)],
            limit: Some(10),
            ..Default::default()
        };
        let planned = plan_scan(&plan);
        assert!(planned.sql.contains("TOP (10)"));
        assert!(planned.sql.contains("ORDER BY [Id] ASC"));
    }
}
