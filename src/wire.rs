use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::MatineeAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

pub struct MatineeHandler {
    engine: Arc<Engine>,
    query_parser: Arc<MatineeQueryParser>,
}

impl MatineeHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(MatineeQueryParser),
        }
    }

    /// The authenticated login name is the caller's identity.
    fn requesting_user<C: ClientInfo>(&self, client: &C) -> PgWireResult<UserId> {
        client
            .metadata()
            .get("user")
            .filter(|u| !u.is_empty())
            .map(|u| UserId::new(u.as_str()))
            .ok_or_else(|| {
                PgWireError::UserError(Box::new(ErrorInfo::new(
                    "ERROR".into(),
                    "28000".into(),
                    "no user on this connection".into(),
                )))
            })
    }

    async fn run(&self, user: &UserId, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(user, cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, user: &UserId, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertReservation {
                movie_id,
                movie_title,
                start_time,
            } => {
                let reservation = self
                    .engine
                    .create_reservation(user, movie_id, &movie_title, &start_time)
                    .await
                    .map_err(engine_err)?;
                reservation_rows(vec![reservation])
            }
            Command::SelectReservations { id: None } => {
                reservation_rows(self.engine.list_reservations(user).await)
            }
            Command::SelectReservations { id: Some(id) } => {
                let reservation = self
                    .engine
                    .get_reservation(id, user)
                    .await
                    .map_err(engine_err)?;
                reservation_rows(vec![reservation])
            }
            Command::DeleteReservation { id } => {
                self.engine
                    .cancel_reservation(id, user)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectAvailableSlots { day } => {
                let slots = self
                    .engine
                    .available_slots(user, &day)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(slot_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.start)?;
                        encoder.encode_field(&slot.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

fn reservation_rows(reservations: Vec<Reservation>) -> PgWireResult<Response> {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = reservations
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.user_id.as_str())?;
            encoder.encode_field(&r.movie_id)?;
            encoder.encode_field(&r.movie_title)?;
            encoder.encode_field(&r.span.start)?;
            encoder.encode_field(&r.span.end)?;
            encoder.encode_field(&r.created_at)?;
            encoder.encode_field(&r.updated_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("user_id", Type::VARCHAR),
        field("movie_id", Type::INT8),
        field("movie_title", Type::VARCHAR),
        field("start_time", Type::INT8),
        field("end_time", Type::INT8),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
    ]
}

fn slot_schema() -> Vec<FieldInfo> {
    vec![field("start_time", Type::INT8), field("end_time", Type::INT8)]
}

/// Row shape a statement produces, judged from its text since `$n`
/// placeholders are still unbound at describe time.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if upper.contains("AVAILABLE_SLOTS") {
        slot_schema()
    } else if upper.starts_with("SELECT") || upper.starts_with("INSERT") {
        reservation_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for MatineeHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let user = self.requesting_user(client)?;
        Ok(vec![self.run(&user, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct MatineeQueryParser;

#[async_trait]
impl QueryParser for MatineeQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for MatineeHandler {
    type Statement = String;
    type QueryParser = MatineeQueryParser;

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
        let user = self.requesting_user(client)?;
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&user, &sql).await
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
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

enum Chunk<'a> {
    Text(&'a str),
    Param(usize),
}

/// Split SQL into literal text and `$N` placeholders in one left-to-right
/// pass. A `$` inside a single-quoted literal is text, not a placeholder.
fn placeholder_chunks(sql: &str) -> Vec<Chunk<'_>> {
    let bytes = sql.as_bytes();
    let mut chunks = Vec::new();
    let mut text_start = 0;
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            // `''` inside a literal toggles twice and stays quoted.
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let digits = bytes[i + 1..]
                    .iter()
                    .take_while(|b| b.is_ascii_digit())
                    .count();
                let end = i + 1 + digits;
                if let Ok(n @ 1..) = sql[i + 1..end].parse::<usize>() {
                    chunks.push(Chunk::Text(&sql[text_start..i]));
                    chunks.push(Chunk::Param(n));
                    text_start = end;
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    chunks.push(Chunk::Text(&sql[text_start..]));
    chunks
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholder_chunks(sql)
        .iter()
        .filter_map(|chunk| match chunk {
            Chunk::Param(n) => Some(*n),
            Chunk::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Substitute $1, $2, ... with bound parameter values as quoted text literals.
/// Bound text is never rescanned, so a value containing `$1` stays as typed.
fn substitute_params(sql: &str, params: &[Option<bytes::Bytes>]) -> String {
    let mut result = String::with_capacity(sql.len());
    for chunk in placeholder_chunks(sql) {
        match chunk {
            Chunk::Text(text) => result.push_str(text),
            Chunk::Param(n) => match params.get(n - 1) {
                Some(Some(bytes)) => {
                    let text = String::from_utf8_lossy(bytes);
                    result.push('\'');
                    result.push_str(&text.replace('\'', "''"));
                    result.push('\'');
                }
                Some(None) => result.push_str("NULL"),
                // Unbound: leave it for the parser to reject.
                None => {
                    result.push('$');
                    result.push_str(&n.to_string());
                }
            },
        }
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct MatineeFactory {
    handler: Arc<MatineeHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<MatineeAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl MatineeFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = MatineeAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(MatineeHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for MatineeFactory {
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
) -> std::io::Result<()> {
    let factory = MatineeFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidMovie(_) => "23503",
        EngineError::InvalidTime(_) => "22007",
        EngineError::PastBooking { .. } => "22008",
        EngineError::SlotConflict(_) => "23P01",
        EngineError::NotFound(_) => "02000",
        EngineError::Forbidden(_) => "42501",
        EngineError::AlreadyStarted(_) => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    // Storage failures stay generic on the wire; the detail goes to the log.
    let message = match &e {
        EngineError::WalError(detail) => {
            tracing::error!("storage failure: {detail}");
            "internal storage error".to_string()
        }
        other => other.to_string(),
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        message,
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
