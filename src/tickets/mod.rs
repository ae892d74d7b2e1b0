pub mod uploads;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::{require_role, CurrentUser, Role, User};
use crate::notify::TicketEvent;
use crate::shared::error::{AppError, AppResult};
use crate::shared::schema::{ticket_comments, tickets, users};
use crate::shared::state::AppState;
use crate::tickets::uploads::{AttachmentMeta, MAX_ATTACHMENTS, MAX_ATTACHMENT_BYTES};

/// Canonical four-state lifecycle, merging the two sets observed upstream
/// ("Resolved" and "Closed" both kept as terminal states).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
pub enum TicketStatus {
    Open,
    #[serde(rename = "In Progress")]
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InProgress => "In Progress",
            Self::Resolved => "Resolved",
            Self::Closed => "Closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Some(Self::Open),
            "in progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl ToSql<Text, Pg> for TicketStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for TicketStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let s = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
        Self::parse(&s).ok_or_else(|| format!("unrecognized ticket status: {s}").into())
    }
}

#[derive(Debug, Clone, Serialize, Queryable, Insertable)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: Uuid,
    /// Human-readable code shown to users, distinct from the storage key.
    pub ticket_code: String,
    pub title: String,
    pub description: String,
    pub attachments: serde_json::Value,
    pub created_by: Uuid,
    pub assigned_to: Option<Uuid>,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Queryable, Insertable)]
#[diesel(table_name = ticket_comments)]
pub struct TicketComment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AssignTicketRequest {
    #[serde(rename = "assignedTo")]
    pub assigned_to: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct TicketWithComments {
    pub ticket: Ticket,
    pub comments: Vec<TicketComment>,
}

#[derive(Debug, Serialize)]
pub struct AgentProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

fn generate_ticket_code() -> String {
    format!("TKT-{}", Utc::now().timestamp_millis())
}

/// Tickets are addressed by either the storage id or the human-readable
/// code; both arrive through the same path parameter.
fn find_ticket(conn: &mut PgConnection, key: &str) -> AppResult<Ticket> {
    if let Ok(id) = Uuid::parse_str(key) {
        if let Some(ticket) = tickets::table
            .filter(tickets::id.eq(id))
            .first::<Ticket>(conn)
            .optional()?
        {
            return Ok(ticket);
        }
    }
    tickets::table
        .filter(tickets::ticket_code.eq(key))
        .first::<Ticket>(conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("Ticket not found".to_string()))
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let mut title: Option<String> = None;
    let mut description: Option<String> = None;
    // Validated but not yet written; nothing touches disk until the whole
    // form is accepted.
    let mut pending = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("title") => {
                title = Some(field.text().await.map_err(|e| {
                    AppError::Validation(format!("Invalid title field: {e}"))
                })?);
            }
            Some("description") => {
                description = Some(field.text().await.map_err(|e| {
                    AppError::Validation(format!("Invalid description field: {e}"))
                })?);
            }
            Some("attachments") => {
                if pending.len() >= MAX_ATTACHMENTS {
                    return Err(AppError::Validation(format!(
                        "At most {MAX_ATTACHMENTS} attachments are allowed"
                    )));
                }
                let filename = field
                    .file_name()
                    .unwrap_or("unnamed_file")
                    .to_string();
                let content_type = field.content_type().unwrap_or("").to_string();
                let data = field.bytes().await.map_err(|e| {
                    AppError::Validation(format!("Failed to read attachment '{filename}': {e}"))
                })?;

                uploads::validate_attachment(&filename, &content_type, data.len())?;
                pending.push((filename, content_type, data));
            }
            _ => {}
        }
    }

    let title = title.map(|t| t.trim().to_string()).unwrap_or_default();
    let description = description.map(|d| d.trim().to_string()).unwrap_or_default();
    if title.is_empty() || description.is_empty() {
        return Err(AppError::Validation(
            "Title and description are required".to_string(),
        ));
    }

    let mut attachments: Vec<AttachmentMeta> = Vec::with_capacity(pending.len());
    for (filename, content_type, data) in &pending {
        attachments
            .push(uploads::store_attachment(&state.config.uploads_dir, filename, content_type, data).await?);
    }

    let now = Utc::now();
    let ticket = Ticket {
        id: Uuid::new_v4(),
        ticket_code: generate_ticket_code(),
        title,
        description,
        attachments: serde_json::to_value(&attachments)
            .map_err(|e| AppError::Internal(e.into()))?,
        created_by: caller.id,
        assigned_to: None,
        status: TicketStatus::Open,
        created_at: now,
        updated_at: now,
    };

    let mut conn = state.conn.get()?;
    diesel::insert_into(tickets::table)
        .values(&ticket)
        .execute(&mut conn)?;

    info!(ticket_code = %ticket.ticket_code, user_id = %caller.id, "ticket created");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Ticket created successfully!",
            "ticketId": ticket.ticket_code,
            "ticket": ticket,
        })),
    ))
}

pub async fn list_all_tickets(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
) -> AppResult<Json<Vec<Ticket>>> {
    require_role(&caller, &[Role::Admin, Role::SupportAgent])?;

    let mut conn = state.conn.get()?;
    let all = tickets::table
        .order(tickets::created_at.desc())
        .load::<Ticket>(&mut conn)?;
    Ok(Json(all))
}

pub async fn list_unassigned_tickets(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
) -> AppResult<Json<Vec<Ticket>>> {
    require_role(&caller, &[Role::Admin])?;

    let mut conn = state.conn.get()?;
    let unassigned = tickets::table
        .filter(tickets::assigned_to.is_null())
        .order(tickets::created_at.desc())
        .load::<Ticket>(&mut conn)?;
    Ok(Json(unassigned))
}

pub async fn my_tickets(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
) -> AppResult<Json<Vec<Ticket>>> {
    let mut conn = state.conn.get()?;
    let mine = tickets::table
        .filter(tickets::created_by.eq(caller.id))
        .order(tickets::created_at.desc())
        .load::<Ticket>(&mut conn)?;
    Ok(Json(mine))
}

pub async fn agent_tickets(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
) -> AppResult<Json<Vec<Ticket>>> {
    require_role(&caller, &[Role::SupportAgent])?;

    let mut conn = state.conn.get()?;
    let assigned = tickets::table
        .filter(tickets::assigned_to.eq(caller.id))
        .order(tickets::created_at.desc())
        .load::<Ticket>(&mut conn)?;
    Ok(Json(assigned))
}

pub async fn list_agents(
    State(state): State<Arc<AppState>>,
    CurrentUser(_caller): CurrentUser,
) -> AppResult<Json<Vec<AgentProfile>>> {
    let mut conn = state.conn.get()?;
    let agents = users::table
        .filter(users::role.eq(Role::SupportAgent))
        .order(users::username.asc())
        .load::<User>(&mut conn)?
        .into_iter()
        .map(|u| AgentProfile {
            id: u.id,
            username: u.username,
            email: u.email,
        })
        .collect();
    Ok(Json(agents))
}

/// Assignment advances the ticket to In Progress in the same write, so the
/// two changes land atomically and signal that work has begun.
pub async fn assign_ticket(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    Path(ticket_key): Path<String>,
    Json(req): Json<AssignTicketRequest>,
) -> AppResult<Json<serde_json::Value>> {
    require_role(&caller, &[Role::Admin])?;

    let mut conn = state.conn.get()?;
    let ticket = find_ticket(&mut conn, &ticket_key)?;

    let agent = users::table
        .filter(users::id.eq(req.assigned_to))
        .first::<User>(&mut conn)
        .optional()?;
    match agent {
        Some(ref user) if user.role == Role::SupportAgent => {}
        _ => {
            return Err(AppError::Validation("Invalid support agent".to_string()));
        }
    }

    diesel::update(tickets::table.filter(tickets::id.eq(ticket.id)))
        .set((
            tickets::assigned_to.eq(Some(req.assigned_to)),
            tickets::status.eq(TicketStatus::InProgress),
            tickets::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

    let updated = tickets::table
        .filter(tickets::id.eq(ticket.id))
        .first::<Ticket>(&mut conn)?;

    state.events.publish(TicketEvent::Assigned {
        ticket_id: updated.id,
        assigned_to: req.assigned_to,
    });

    info!(ticket_code = %updated.ticket_code, agent_id = %req.assigned_to, "ticket assigned");
    Ok(Json(serde_json::json!({
        "message": "Ticket assigned successfully",
        "ticket": updated,
    })))
}

/// Any authenticated participant may set any enumerated status; transition
/// legality is deliberately not checked (Closed -> Open is allowed).
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    CurrentUser(_caller): CurrentUser,
    Path(ticket_key): Path<String>,
    Json(req): Json<ChangeStatusRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let status = TicketStatus::parse(&req.status)
        .ok_or_else(|| AppError::Validation(format!("Invalid status: {}", req.status)))?;

    let mut conn = state.conn.get()?;
    let ticket = find_ticket(&mut conn, &ticket_key)?;

    diesel::update(tickets::table.filter(tickets::id.eq(ticket.id)))
        .set((
            tickets::status.eq(status),
            tickets::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

    let updated = tickets::table
        .filter(tickets::id.eq(ticket.id))
        .first::<Ticket>(&mut conn)?;

    state.events.publish(TicketEvent::StatusUpdated {
        ticket_id: updated.id,
        status,
    });

    Ok(Json(serde_json::json!({
        "message": "Ticket status updated successfully",
        "ticket": updated,
    })))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    CurrentUser(_caller): CurrentUser,
    Path(ticket_key): Path<String>,
) -> AppResult<Json<TicketWithComments>> {
    let mut conn = state.conn.get()?;
    let ticket = find_ticket(&mut conn, &ticket_key)?;

    let comments = ticket_comments::table
        .filter(ticket_comments::ticket_id.eq(ticket.id))
        .order(ticket_comments::created_at.asc())
        .load::<TicketComment>(&mut conn)?;

    Ok(Json(TicketWithComments { ticket, comments }))
}

pub async fn add_comment(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    Path(ticket_key): Path<String>,
    Json(req): Json<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let body = req.text.trim().to_string();
    if body.is_empty() {
        return Err(AppError::Validation("Comment text is required".to_string()));
    }

    let mut conn = state.conn.get()?;
    let ticket = find_ticket(&mut conn, &ticket_key)?;

    let comment = TicketComment {
        id: Uuid::new_v4(),
        ticket_id: ticket.id,
        author_id: caller.id,
        body,
        created_at: Utc::now(),
    };
    diesel::insert_into(ticket_comments::table)
        .values(&comment)
        .execute(&mut conn)?;

    diesel::update(tickets::table.filter(tickets::id.eq(ticket.id)))
        .set(tickets::updated_at.eq(Utc::now()))
        .execute(&mut conn)?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Comment added successfully",
            "comment": comment,
        })),
    ))
}

pub fn configure_ticket_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/tickets/create",
            post(create_ticket)
                .layer(DefaultBodyLimit::max((MAX_ATTACHMENTS + 1) * MAX_ATTACHMENT_BYTES)),
        )
        .route("/api/tickets/all", get(list_all_tickets))
        .route("/api/tickets/unassigned", get(list_unassigned_tickets))
        .route("/api/tickets/agents", get(list_agents))
        .route("/api/tickets/my-tickets", get(my_tickets))
        .route("/api/tickets/agent/tickets", get(agent_tickets))
        .route("/api/tickets/assign/:ticket_id", put(assign_ticket))
        .route("/api/tickets/status/:ticket_id", put(update_status))
        .route("/api/tickets/:ticket_id", get(get_ticket))
        .route("/api/tickets/:ticket_id/comments", post(add_comment))
}
