use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SelectItem, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

/// Parsed command from SQL input. Dates, times, statuses and service types
/// stay textual here; the engine boundary gives them meaning.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertGarage {
        id: Ulid,
        name: String,
        open: Option<String>,
        close: Option<String>,
        bay_count: Option<u32>,
    },
    UpdateGarage {
        id: Ulid,
        name: Option<String>,
        open: Option<String>,
        close: Option<String>,
    },
    DeleteGarage {
        id: Ulid,
    },
    SelectGarages {
        id: Option<Ulid>,
    },
    InsertService {
        id: Ulid,
        garage_id: Ulid,
        service_type: String,
        average_cost: u64,
        estimated_minutes: u32,
    },
    DeleteService {
        id: Ulid,
    },
    SelectServices {
        garage_id: Ulid,
    },
    InsertBay {
        id: Ulid,
        garage_id: Ulid,
        number: u32,
        name: String,
        open: String,
        close: String,
        active: bool,
    },
    ToggleBay {
        id: Ulid,
    },
    UpdateBay {
        id: Ulid,
        number: Option<u32>,
        name: Option<String>,
        open: Option<String>,
        close: Option<String>,
        active: Option<bool>,
    },
    DeleteBay {
        id: Ulid,
    },
    SelectBays {
        garage_id: Option<Ulid>,
        id: Option<Ulid>,
    },
    CountBays {
        garage_id: Ulid,
    },
    SelectAvailableBays {
        garage_id: Ulid,
        date: String,
        start: String,
        end: String,
    },
    InsertReservation {
        id: Ulid,
        garage_id: Ulid,
        date: String,
        start: String,
        end: String,
        services: Vec<String>,
        comment: Option<String>,
    },
    UpdateReservationStatus {
        id: Ulid,
        status: String,
    },
    UpdateReservation {
        id: Ulid,
        start: Option<String>,
        end: Option<String>,
        services: Option<Vec<String>>,
        comment: Option<Option<String>>,
        status: Option<String>,
    },
    /// Soft cancel.
    DeleteReservation {
        id: Ulid,
    },
    SelectReservation {
        id: Ulid,
    },
    SelectReservations {
        user_id: Option<Ulid>,
        garage_id: Option<Ulid>,
        status: Option<String>,
        page: Option<u32>,
        per_page: Option<u32>,
    },
}

impl Command {
    /// Whether the statement changes garages, bays or the service catalog.
    pub fn is_directory_write(&self) -> bool {
        matches!(
            self,
            Command::InsertGarage { .. }
                | Command::UpdateGarage { .. }
                | Command::DeleteGarage { .. }
                | Command::InsertService { .. }
                | Command::DeleteService { .. }
                | Command::InsertBay { .. }
                | Command::ToggleBay { .. }
                | Command::UpdateBay { .. }
                | Command::DeleteBay { .. }
        )
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Row layout a statement produces, known before its `$n` parameters are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Garages,
    Services,
    Bays,
    BayCount,
    Reservations,
    Cancellation,
    Empty,
}

pub fn result_shape(sql: &str) -> ResultShape {
    let Ok(stmts) = Parser::parse_sql(&PostgreSqlDialect {}, sql) else {
        return ResultShape::Empty;
    };
    match stmts.first() {
        Some(Statement::Delete(delete)) => match delete_table_name(delete).as_deref() {
            Ok("reservations") => ResultShape::Cancellation,
            _ => ResultShape::Empty,
        },
        Some(Statement::Query(query)) => {
            let SetExpr::Select(select) = query.body.as_ref() else {
                return ResultShape::Empty;
            };
            let Some(from) = select.from.first() else {
                return ResultShape::Empty;
            };
            match table_factor_name(&from.relation).as_deref() {
                Ok("garages") => ResultShape::Garages,
                Ok("services") => ResultShape::Services,
                Ok("repair_bays") if is_count_star(&select.projection) => ResultShape::BayCount,
                Ok("repair_bays") | Ok("available_bays") => ResultShape::Bays,
                Ok("reservations") => ResultShape::Reservations,
                _ => ResultShape::Empty,
            }
        }
        _ => ResultShape::Empty,
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let opt = |i: usize| values.get(i).filter(|e| !is_null(e));

    match table.as_str() {
        "garages" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("garages", 2, values.len()));
            }
            Ok(Command::InsertGarage {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                open: opt(2).map(parse_string).transpose()?,
                close: opt(3).map(parse_string).transpose()?,
                bay_count: opt(4).map(parse_u32).transpose()?,
            })
        }
        "services" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("services", 5, values.len()));
            }
            Ok(Command::InsertService {
                id: parse_ulid(&values[0])?,
                garage_id: parse_ulid(&values[1])?,
                service_type: parse_string(&values[2])?,
                average_cost: parse_u64(&values[3])?,
                estimated_minutes: parse_u32(&values[4])?,
            })
        }
        "repair_bays" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("repair_bays", 6, values.len()));
            }
            Ok(Command::InsertBay {
                id: parse_ulid(&values[0])?,
                garage_id: parse_ulid(&values[1])?,
                number: parse_u32(&values[2])?,
                name: parse_string(&values[3])?,
                open: parse_string(&values[4])?,
                close: parse_string(&values[5])?,
                active: opt(6).map(parse_bool).transpose()?.unwrap_or(true),
            })
        }
        "reservations" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("reservations", 5, values.len()));
            }
            Ok(Command::InsertReservation {
                id: parse_ulid(&values[0])?,
                garage_id: parse_ulid(&values[1])?,
                date: parse_string(&values[2])?,
                start: parse_string(&values[3])?,
                end: parse_string(&values[4])?,
                services: opt(5).map(parse_string_list).transpose()?.unwrap_or_default(),
                comment: opt(6).map(parse_string).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;
    let mut set = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((col, &a.value));
    }
    if set.is_empty() {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    }
    let find = |col: &str| set.iter().find(|(c, _)| c == col).map(|(_, v)| *v);

    match table.as_str() {
        "garages" => {
            reject_unknown_columns(&set, &["name", "open_time", "close_time"])?;
            Ok(Command::UpdateGarage {
                id,
                name: find("name").map(parse_string).transpose()?,
                open: find("open_time").map(parse_string).transpose()?,
                close: find("close_time").map(parse_string).transpose()?,
            })
        }
        "repair_bays" => {
            reject_unknown_columns(&set, &["bay_number", "name", "open_time", "close_time", "active"])?;
            if let [(col, value)] = set.as_slice()
                && col == "active"
                && is_negated_column(value, "active")
            {
                return Ok(Command::ToggleBay { id });
            }
            Ok(Command::UpdateBay {
                id,
                number: find("bay_number").map(parse_u32).transpose()?,
                name: find("name").map(parse_string).transpose()?,
                open: find("open_time").map(parse_string).transpose()?,
                close: find("close_time").map(parse_string).transpose()?,
                active: find("active").map(parse_bool).transpose()?,
            })
        }
        "reservations" => {
            reject_unknown_columns(&set, &["start_time", "end_time", "services", "comment", "status"])?;
            let status = find("status").map(parse_string).transpose()?;
            if let (Some(status), 1) = (&status, set.len()) {
                return Ok(Command::UpdateReservationStatus {
                    id,
                    status: status.clone(),
                });
            }
            Ok(Command::UpdateReservation {
                id,
                start: find("start_time").map(parse_string).transpose()?,
                end: find("end_time").map(parse_string).transpose()?,
                services: find("services").map(parse_string_list).transpose()?,
                comment: find("comment").map(parse_string_or_null).transpose()?,
                status,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn reject_unknown_columns(set: &[(String, &Expr)], allowed: &[&str]) -> Result<(), SqlError> {
    match set.iter().find(|(c, _)| !allowed.contains(&c.as_str())) {
        Some((c, _)) => Err(SqlError::UnknownColumn(c.clone())),
        None => Ok(()),
    }
}

fn is_negated_column(expr: &Expr, column: &str) -> bool {
    matches!(
        expr,
        Expr::UnaryOp { op: ast::UnaryOperator::Not, expr } if expr_column_name(expr).as_deref() == Some(column)
    )
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "garages" => Ok(Command::DeleteGarage { id }),
        "services" => Ok(Command::DeleteService { id }),
        "repair_bays" => Ok(Command::DeleteBay { id }),
        "reservations" => Ok(Command::DeleteReservation { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let find = |col: &str| filters.iter().find(|(c, _)| c == col).map(|(_, v)| v);
    let ulid_filter = |col: &str| find(col).map(parse_ulid).transpose();

    match table.as_str() {
        "garages" => Ok(Command::SelectGarages { id: ulid_filter("id")? }),
        "services" => Ok(Command::SelectServices {
            garage_id: ulid_filter("garage_id")?.ok_or(SqlError::MissingFilter("garage_id"))?,
        }),
        "repair_bays" => {
            let garage_id = ulid_filter("garage_id")?;
            let id = ulid_filter("id")?;
            if is_count_star(&select.projection) {
                return Ok(Command::CountBays {
                    garage_id: garage_id.ok_or(SqlError::MissingFilter("garage_id"))?,
                });
            }
            if garage_id.is_none() && id.is_none() {
                return Err(SqlError::MissingFilter("garage_id"));
            }
            Ok(Command::SelectBays { garage_id, id })
        }
        "available_bays" => {
            let text = |col: &'static str| {
                find(col).map(parse_string).transpose()?.ok_or(SqlError::MissingFilter(col))
            };
            Ok(Command::SelectAvailableBays {
                garage_id: ulid_filter("garage_id")?.ok_or(SqlError::MissingFilter("garage_id"))?,
                date: text("date")?,
                start: text("start_time")?,
                end: text("end_time")?,
            })
        }
        "reservations" => {
            if let Some(id) = ulid_filter("id")? {
                return Ok(Command::SelectReservation { id });
            }
            Ok(Command::SelectReservations {
                user_id: ulid_filter("user_id")?,
                garage_id: ulid_filter("garage_id")?,
                status: find("status").map(parse_string).transpose()?,
                page: find("page").map(parse_u32).transpose()?,
                per_page: find("per_page").map(parse_u32).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = 1 AND b = 2 AND ...` into (column, value) pairs.
fn collect_eq_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, right.as_ref().clone()));
            }
            _ => return Err(SqlError::Unsupported(format!("operator {op}"))),
        },
        Expr::Nested(inner) => collect_eq_filters(inner, out)?,
        other => return Err(SqlError::Unsupported(format!("filter {other}"))),
    }
    Ok(())
}

fn is_count_star(projection: &[SelectItem]) -> bool {
    match projection {
        [SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. }] => {
            matches!(expr, Expr::Function(_)) && expr.to_string().to_lowercase().starts_with("count(")
        }
        _ => false,
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) { Ok(None) } else { parse_string(expr).map(Some) }
}

/// `ARRAY['a', 'b']`, a Postgres array literal `'{a,b}'`, or NULL for none.
fn parse_string_list(expr: &Expr) -> Result<Vec<String>, SqlError> {
    if is_null(expr) {
        return Ok(Vec::new());
    }
    if let Expr::Array(array) = expr {
        return array.elem.iter().map(parse_string).collect();
    }
    let text = parse_string(expr)?;
    let inner = text
        .trim()
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or_else(|| SqlError::Parse(format!("expected array, got {text:?}")))?;
    Ok(inner
        .split(',')
        .map(|s| s.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => {
            s.trim().parse().map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u64(expr: &Expr) -> Result<u64, SqlError> {
    let v = parse_i64(expr)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{v} must not be negative")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("{0}: expected at least {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const GID: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    fn gid() -> Ulid {
        Ulid::from_string(GID).unwrap()
    }

    #[test]
    fn parse_insert_garage() {
        let sql = format!(
            "INSERT INTO garages (id, name, open_time, close_time, bay_count) VALUES ('{ID}', 'Central', '08:00', '18:00', 3)"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertGarage {
                id: id(),
                name: "Central".into(),
                open: Some("08:00".into()),
                close: Some("18:00".into()),
                bay_count: Some(3),
            }
        );
    }

    #[test]
    fn parse_insert_garage_without_hours() {
        let sql = format!("INSERT INTO garages (id, name, open_time, close_time) VALUES ('{ID}', 'Night', NULL, NULL)");
        match parse_sql(&sql).unwrap() {
            Command::InsertGarage { open, close, bay_count, .. } => {
                assert_eq!(open, None);
                assert_eq!(close, None);
                assert_eq!(bay_count, None);
            }
            other => panic!("expected InsertGarage, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_service() {
        let sql = format!(
            "INSERT INTO services (id, garage_id, type, average_cost, estimated_minutes) VALUES ('{ID}', '{GID}', 'oil_change', 4500, 45)"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertService {
                id: id(),
                garage_id: gid(),
                service_type: "oil_change".into(),
                average_cost: 4500,
                estimated_minutes: 45,
            }
        );
    }

    #[test]
    fn negative_cost_rejected() {
        let sql = format!("INSERT INTO services VALUES ('{ID}', '{GID}', 'paint', -1, 45)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_bay_defaults_active() {
        let sql = format!(
            "INSERT INTO repair_bays (id, garage_id, bay_number, name, open_time, close_time) VALUES ('{ID}', '{GID}', 4, 'Lift', '07:00', '19:00')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBay { number, name, active, .. } => {
                assert_eq!(number, 4);
                assert_eq!(name, "Lift");
                assert!(active);
            }
            other => panic!("expected InsertBay, got {other:?}"),
        }
    }

    #[test]
    fn parse_toggle_bay() {
        let sql = format!("UPDATE repair_bays SET active = NOT active WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::ToggleBay { id: id() });
    }

    #[test]
    fn parse_update_bay_fields() {
        let sql = format!("UPDATE repair_bays SET name = 'Pit', bay_number = 7, active = false WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateBay {
                id: id(),
                number: Some(7),
                name: Some("Pit".into()),
                open: None,
                close: None,
                active: Some(false),
            }
        );
    }

    #[test]
    fn update_unknown_column_rejected() {
        let sql = format!("UPDATE repair_bays SET colour = 'red' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(c)) if c == "colour"));
    }

    #[test]
    fn update_requires_id() {
        assert!(matches!(
            parse_sql("UPDATE reservations SET status = 'CONFIRMED'"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_insert_reservation_with_array() {
        let sql = format!(
            "INSERT INTO reservations (id, garage_id, date, start_time, end_time, services, comment) VALUES ('{ID}', '{GID}', '2030-04-01', '09:00', '10:00', ARRAY['oil_change', 'brakes'], 'squeaky')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertReservation {
                id: id(),
                garage_id: gid(),
                date: "2030-04-01".into(),
                start: "09:00".into(),
                end: "10:00".into(),
                services: vec!["oil_change".into(), "brakes".into()],
                comment: Some("squeaky".into()),
            }
        );
    }

    #[test]
    fn parse_reservation_services_as_array_literal() {
        let sql = format!(
            "INSERT INTO reservations VALUES ('{ID}', '{GID}', '2030-04-01', '09:00', '10:00', '{{oil_change,brakes}}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { services, comment, .. } => {
                assert_eq!(services, vec!["oil_change".to_string(), "brakes".to_string()]);
                assert_eq!(comment, None);
            }
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn status_only_update_is_status_command() {
        let sql = format!("UPDATE reservations SET status = 'CONFIRMED' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateReservationStatus {
                id: id(),
                status: "CONFIRMED".into(),
            }
        );
    }

    #[test]
    fn mixed_update_keeps_status_in_patch() {
        let sql = format!(
            "UPDATE reservations SET start_time = '11:00', end_time = '12:00', comment = NULL, status = 'CONFIRMED' WHERE id = '{ID}'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateReservation {
                id: id(),
                start: Some("11:00".into()),
                end: Some("12:00".into()),
                services: None,
                comment: Some(None),
                status: Some("CONFIRMED".into()),
            }
        );
    }

    #[test]
    fn parse_deletes() {
        for (table, expected) in [
            ("garages", Command::DeleteGarage { id: id() }),
            ("services", Command::DeleteService { id: id() }),
            ("repair_bays", Command::DeleteBay { id: id() }),
            ("reservations", Command::DeleteReservation { id: id() }),
        ] {
            let sql = format!("DELETE FROM {table} WHERE id = '{ID}'");
            assert_eq!(parse_sql(&sql).unwrap(), expected);
        }
    }

    #[test]
    fn parse_select_available_bays() {
        let sql = format!(
            "SELECT * FROM available_bays WHERE garage_id = '{GID}' AND date = '2030-04-01' AND start_time = '09:00' AND end_time = '10:00'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailableBays {
                garage_id: gid(),
                date: "2030-04-01".into(),
                start: "09:00".into(),
                end: "10:00".into(),
            }
        );
    }

    #[test]
    fn available_bays_requires_window() {
        let sql = format!("SELECT * FROM available_bays WHERE garage_id = '{GID}' AND date = '2030-04-01'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("start_time"))));
    }

    #[test]
    fn parse_count_bays() {
        let sql = format!("SELECT COUNT(*) FROM repair_bays WHERE garage_id = '{GID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::CountBays { garage_id: gid() });
    }

    #[test]
    fn parse_select_bays_by_garage_or_id() {
        let sql = format!("SELECT * FROM repair_bays WHERE garage_id = '{GID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBays {
                garage_id: Some(gid()),
                id: None
            }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM repair_bays"),
            Err(SqlError::MissingFilter("garage_id"))
        ));
    }

    #[test]
    fn parse_list_reservations_with_paging() {
        let sql = format!(
            "SELECT * FROM reservations WHERE garage_id = '{GID}' AND status = 'PENDING' AND page = 2 AND per_page = 5"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectReservations {
                user_id: None,
                garage_id: Some(gid()),
                status: Some("PENDING".into()),
                page: Some(2),
                per_page: Some(5),
            }
        );
    }

    #[test]
    fn parse_get_reservation() {
        let sql = format!("SELECT * FROM reservations WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectReservation { id: id() });
    }

    #[test]
    fn range_filters_unsupported() {
        let sql = format!("SELECT * FROM reservations WHERE garage_id = '{GID}' AND page > 1");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn bad_ulid_is_parse_error() {
        assert!(matches!(
            parse_sql("DELETE FROM garages WHERE id = 'nope'"),
            Err(SqlError::Parse(_))
        ));
    }

    #[test]
    fn directory_writes_flagged() {
        assert!(parse_sql(&format!("DELETE FROM garages WHERE id = '{ID}'")).unwrap().is_directory_write());
        assert!(!parse_sql(&format!("DELETE FROM reservations WHERE id = '{ID}'")).unwrap().is_directory_write());
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO bookings (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn shapes_with_placeholders() {
        assert_eq!(result_shape("SELECT * FROM reservations WHERE id = $1"), ResultShape::Reservations);
        assert_eq!(result_shape("DELETE FROM reservations WHERE id = $1"), ResultShape::Cancellation);
        assert_eq!(result_shape("DELETE FROM repair_bays WHERE id = $1"), ResultShape::Empty);
        assert_eq!(
            result_shape("SELECT COUNT(*) FROM repair_bays WHERE garage_id = $1"),
            ResultShape::BayCount
        );
        assert_eq!(
            result_shape("SELECT * FROM available_bays WHERE garage_id = $1 AND date = $2"),
            ResultShape::Bays
        );
        assert_eq!(result_shape("INSERT INTO garages VALUES ($1, $2)"), ResultShape::Empty);
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
