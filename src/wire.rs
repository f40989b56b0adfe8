use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::{parse_principal, BayplanAuthSource};
use crate::engine::{can_modify, CancelOutcome, Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, ResultShape};

pub struct BayplanHandler {
    engine: Arc<Engine>,
    query_parser: Arc<BayplanQueryParser>,
}

impl BayplanHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(BayplanQueryParser),
        }
    }

    fn resolve_principal<C: ClientInfo>(&self, client: &C) -> PgWireResult<Principal> {
        parse_principal(client.metadata().get("user").map(String::as_str)).map_err(|e| {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            user_error("28000", e.to_string())
        })
    }

    /// Parse, authorize and run one statement, recording query metrics.
    async fn run(&self, principal: &Principal, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(principal, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!("{label} failed for {}: {e:?}", principal.user_id);
        }
        result
    }

    async fn execute_command(&self, principal: &Principal, cmd: Command) -> PgWireResult<Response> {
        if cmd.is_directory_write() && !principal.is_operator() {
            return Err(engine_err(EngineError::Forbidden(
                "only garage operators can change garages, bays and services",
            )));
        }
        let engine = &self.engine;

        match cmd {
            // ── Garages ──────────────────────────────────────
            Command::InsertGarage {
                id,
                name,
                open,
                close,
                bay_count,
            } => {
                let hours = match (open, close) {
                    (Some(open), Some(close)) => Some(OpeningHours {
                        open: clock(&open)?,
                        close: clock(&close)?,
                    }),
                    (None, None) => None,
                    _ => return Err(engine_err(bad_request("open_time and close_time must be set together"))),
                };
                engine
                    .create_garage(id, name, hours, bay_count.unwrap_or(1))
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateGarage { id, name, open, close } => {
                let hours = if open.is_some() || close.is_some() {
                    let current = engine.get_garage(id).await.map_err(engine_err)?.hours;
                    let open = match open {
                        Some(s) => clock(&s)?,
                        None => current.map(|h| h.open).ok_or_else(|| engine_err(bad_request("open_time is required")))?,
                    };
                    let close = match close {
                        Some(s) => clock(&s)?,
                        None => current.map(|h| h.close).ok_or_else(|| engine_err(bad_request("close_time is required")))?,
                    };
                    Some(OpeningHours { open, close })
                } else {
                    None
                };
                engine
                    .update_garage(id, GaragePatch { name, hours })
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteGarage { id } => {
                engine.delete_garage(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectGarages { id } => {
                let garages = match id {
                    Some(id) => vec![engine.get_garage(id).await.map_err(engine_err)?],
                    None => engine.list_garages().await,
                };
                rows_response(garage_schema(), &garages, encode_garage)
            }

            // ── Service catalog ──────────────────────────────
            Command::InsertService {
                id,
                garage_id,
                service_type,
                average_cost,
                estimated_minutes,
            } => {
                let service_type = service_type.parse::<ServiceType>().map_err(model_err)?;
                engine
                    .add_service(id, garage_id, service_type, average_cost, estimated_minutes)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteService { id } => {
                engine.remove_service(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectServices { garage_id } => {
                let services = engine.list_services(garage_id).await.map_err(engine_err)?;
                rows_response(service_schema(), &services, encode_service)
            }

            // ── Repair bays ──────────────────────────────────
            Command::InsertBay {
                id,
                garage_id,
                number,
                name,
                open,
                close,
                active,
            } => {
                engine
                    .create_bay(id, garage_id, number, name, clock(&open)?, clock(&close)?, active)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::ToggleBay { id } => {
                engine.toggle_bay(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::UpdateBay {
                id,
                number,
                name,
                open,
                close,
                active,
            } => {
                let patch = BayPatch {
                    number,
                    name,
                    open: open.as_deref().map(clock).transpose()?,
                    close: close.as_deref().map(clock).transpose()?,
                    active,
                };
                engine.update_bay(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteBay { id } => {
                engine.delete_bay(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectBays { garage_id, id } => {
                let bays = match id {
                    Some(id) => {
                        let bay = engine.get_bay(id).await.map_err(engine_err)?;
                        if garage_id.is_some_and(|g| g != bay.garage_id) {
                            Vec::new()
                        } else {
                            vec![bay]
                        }
                    }
                    None => match garage_id {
                        Some(gid) => engine.list_bays(gid).await.map_err(engine_err)?,
                        None => Vec::new(),
                    },
                };
                rows_response(bay_schema(), &bays, encode_bay)
            }
            Command::CountBays { garage_id } => {
                let count = engine.count_bays(garage_id).await.map_err(engine_err)?;
                let schema = Arc::new(count_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&(count as i64))?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectAvailableBays {
                garage_id,
                date,
                start,
                end,
            } => {
                let date = parse_date(&date).map_err(model_err)?;
                let window = TimeWindow::new(clock(&start)?, clock(&end)?);
                let bays = engine
                    .available_bays(garage_id, date, window)
                    .await
                    .map_err(engine_err)?;
                rows_response(bay_schema(), &bays, encode_bay)
            }

            // ── Reservations ─────────────────────────────────
            Command::InsertReservation {
                id,
                garage_id,
                date,
                start,
                end,
                services,
                comment,
            } => {
                let req = NewReservation {
                    id,
                    garage_id,
                    date: parse_date(&date).map_err(model_err)?,
                    window: TimeWindow::new(clock(&start)?, clock(&end)?),
                    services: service_types(&services)?,
                    comment,
                };
                engine
                    .create_reservation(req, principal)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateReservationStatus { id, status } => {
                let status = status.parse::<ReservationStatus>().map_err(model_err)?;
                engine
                    .update_reservation_status(id, status, principal)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::UpdateReservation {
                id,
                start,
                end,
                services,
                comment,
                status,
            } => {
                let patch = ReservationPatch {
                    start: start.as_deref().map(clock).transpose()?,
                    end: end.as_deref().map(clock).transpose()?,
                    services: services.as_deref().map(service_types).transpose()?,
                    comment,
                    status: status
                        .map(|s| s.parse::<ReservationStatus>())
                        .transpose()
                        .map_err(model_err)?,
                };
                engine
                    .update_reservation(id, patch, principal)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteReservation { id } => {
                let outcome = engine.cancel_reservation(id, principal).await.map_err(engine_err)?;
                let schema = Arc::new(cancellation_schema());
                let row = encode_cancellation(&schema, &outcome);
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(vec![row]))))
            }
            Command::SelectReservation { id } => {
                let view = engine.get_reservation(id, principal).await.map_err(engine_err)?;
                let page = Page {
                    items: vec![view],
                    total: 1,
                    page: 1,
                    limit: 1,
                    total_pages: 1,
                };
                Ok(reservation_page_response(page))
            }
            Command::SelectReservations {
                user_id,
                garage_id,
                status,
                page,
                per_page,
            } => {
                let filter = ReservationFilter {
                    user_id,
                    garage_id,
                    status: status
                        .map(|s| s.parse::<ReservationStatus>())
                        .transpose()
                        .map_err(model_err)?,
                };
                let page = engine
                    .list_reservations(filter, page, per_page, principal)
                    .await
                    .map_err(engine_err)?;
                Ok(reservation_page_response(page))
            }
        }
    }
}

fn bad_request(msg: &str) -> EngineError {
    EngineError::BadRequest(msg.to_string())
}

fn clock(s: &str) -> PgWireResult<ClockTime> {
    s.parse::<ClockTime>().map_err(model_err)
}

fn service_types(labels: &[String]) -> PgWireResult<Vec<ServiceType>> {
    labels
        .iter()
        .map(|s| s.parse::<ServiceType>().map_err(model_err))
        .collect()
}

// ── Row layouts ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn bool_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn garage_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("open_time"),
        text_field("close_time"),
        int_field("bay_count"),
    ]
}

fn service_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("garage_id"),
        text_field("type"),
        int_field("average_cost"),
        int_field("estimated_minutes"),
    ]
}

fn bay_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("garage_id"),
        int_field("bay_number"),
        text_field("name"),
        text_field("open_time"),
        text_field("close_time"),
        bool_field("active"),
    ]
}

fn count_schema() -> Vec<FieldInfo> {
    vec![int_field("count")]
}

fn reservation_fields() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("user_id"),
        text_field("garage_id"),
        text_field("garage_name"),
        text_field("bay_id"),
        int_field("bay_number"),
        text_field("bay_name"),
        text_field("date"),
        text_field("start_time"),
        text_field("end_time"),
        text_field("services"),
        text_field("status"),
        text_field("comment"),
        bool_field("is_paid"),
        int_field("total_amount"),
        text_field("updated_by"),
        bool_field("can_modify"),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    let mut fields = reservation_fields();
    fields.extend([
        int_field("total"),
        int_field("page"),
        int_field("per_page"),
        int_field("total_pages"),
    ]);
    fields
}

fn cancellation_schema() -> Vec<FieldInfo> {
    let mut fields = vec![text_field("message")];
    fields.extend(reservation_fields());
    fields
}

fn shape_schema(shape: ResultShape) -> Vec<FieldInfo> {
    match shape {
        ResultShape::Garages => garage_schema(),
        ResultShape::Services => service_schema(),
        ResultShape::Bays => bay_schema(),
        ResultShape::BayCount => count_schema(),
        ResultShape::Reservations => reservation_schema(),
        ResultShape::Cancellation => cancellation_schema(),
        ResultShape::Empty => vec![],
    }
}

fn rows_response<T>(
    fields: Vec<FieldInfo>,
    items: &[T],
    encode: fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(fields);
    let rows: Vec<PgWireResult<DataRow>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn encode_garage(encoder: &mut DataRowEncoder, g: &Garage) -> PgWireResult<()> {
    encoder.encode_field(&g.id.to_string())?;
    encoder.encode_field(&g.name)?;
    encoder.encode_field(&g.hours.map(|h| h.open.to_string()))?;
    encoder.encode_field(&g.hours.map(|h| h.close.to_string()))?;
    encoder.encode_field(&(g.bay_count as i64))?;
    Ok(())
}

fn encode_service(encoder: &mut DataRowEncoder, s: &ServiceOffering) -> PgWireResult<()> {
    encoder.encode_field(&s.id.to_string())?;
    encoder.encode_field(&s.garage_id.to_string())?;
    encoder.encode_field(&s.service_type.to_string())?;
    encoder.encode_field(&(s.average_cost as i64))?;
    encoder.encode_field(&(s.estimated_minutes as i64))?;
    Ok(())
}

fn encode_bay(encoder: &mut DataRowEncoder, b: &RepairBay) -> PgWireResult<()> {
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.garage_id.to_string())?;
    encoder.encode_field(&(b.number as i64))?;
    encoder.encode_field(&b.name)?;
    encoder.encode_field(&b.open.to_string())?;
    encoder.encode_field(&b.close.to_string())?;
    encoder.encode_field(&b.active)?;
    Ok(())
}

fn encode_reservation(encoder: &mut DataRowEncoder, view: &ReservationView) -> PgWireResult<()> {
    let r = &view.reservation;
    let services: Vec<&str> = r.services.iter().map(|s| s.as_str()).collect();
    let services = serde_json::to_string(&services).map_err(|e| PgWireError::ApiError(Box::new(e)))?;

    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.user_id.to_string())?;
    encoder.encode_field(&r.garage_id.to_string())?;
    encoder.encode_field(&view.garage_name)?;
    encoder.encode_field(&r.bay_id.to_string())?;
    encoder.encode_field(&view.bay.as_ref().map(|b| b.number as i64))?;
    encoder.encode_field(&view.bay.as_ref().map(|b| b.name.clone()))?;
    encoder.encode_field(&r.date.format("%Y-%m-%d").to_string())?;
    encoder.encode_field(&r.window.start.to_string())?;
    encoder.encode_field(&r.window.end.to_string())?;
    encoder.encode_field(&services)?;
    encoder.encode_field(&r.status.to_string())?;
    encoder.encode_field(&r.comment)?;
    encoder.encode_field(&r.is_paid)?;
    encoder.encode_field(&(r.total_amount as i64))?;
    encoder.encode_field(&r.updated_by.map(|u| u.to_string()))?;
    encoder.encode_field(&can_modify(r.date, Utc::now()))?;
    Ok(())
}

fn reservation_page_response(page: Page<ReservationView>) -> Response {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<DataRow>> = page
        .items
        .iter()
        .map(|view| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode_reservation(&mut encoder, view)?;
            encoder.encode_field(&(page.total as i64))?;
            encoder.encode_field(&(page.page as i64))?;
            encoder.encode_field(&(page.limit as i64))?;
            encoder.encode_field(&(page.total_pages as i64))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_cancellation(schema: &Arc<Vec<FieldInfo>>, outcome: &CancelOutcome) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&outcome.message)?;
    encode_reservation(&mut encoder, &outcome.reservation)?;
    Ok(encoder.take_row())
}

#[async_trait]
impl SimpleQueryHandler for BayplanHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let principal = self.resolve_principal(client)?;
        Ok(vec![self.run(&principal, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BayplanQueryParser;

#[async_trait]
impl QueryParser for BayplanQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(shape_schema(sql::result_shape(stmt)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BayplanHandler {
    type Statement = String;
    type QueryParser = BayplanQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let principal = self.resolve_principal(client)?;
        let sql = substitute_params(portal);
        self.run(&principal, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        let fields = shape_schema(sql::result_shape(&target.statement));
        Ok(DescribeStatementResponse::new(param_types, fields))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(shape_schema(sql::result_shape(
            &target.statement.statement,
        ))))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// One left-to-right pass: each `$n` outside a quoted literal becomes its
/// quoted value. Inserted values are never rescanned.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut chars = sql.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
        }
        if c != '$' || in_literal {
            out.push(c);
            continue;
        }
        let mut end = i + 1;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = j + 1;
            chars.next();
        }
        let bound = sql[i + 1..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|k| params.get(k));
        match bound {
            Some(Some(bytes)) => {
                out.push('\'');
                out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&sql[i..end]),
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BayplanFactory {
    handler: Arc<BayplanHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<BayplanAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl BayplanFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = BayplanAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BayplanHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BayplanFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = BayplanFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::BadRequest(_) | EngineError::InvalidTransition { .. } => "22023",
        EngineError::InvalidStatus(_) => "22P02",
        EngineError::Forbidden(_) => "42501",
        EngineError::BayNumberTaken { .. } | EngineError::ServiceExists { .. } => "23505",
        EngineError::ConfirmationConflict(_) => "23P01",
        EngineError::NoAvailability { .. } => "BP001",
        EngineError::InvalidService(_) => "BP002",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn model_err(e: ModelError) -> PgWireError {
    engine_err(e.into())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
