// Handler-level tests against a real Postgres. They run the actual request
// handlers with constructed extractor values, so the full validation and
// persistence path is exercised without standing up an HTTP listener.

#[cfg(test)]
mod ticket_flow_integration_tests {
    use axum::body::Body;
    use axum::extract::{FromRequest, Multipart, Path, State};
    use axum::http::{header, Request, StatusCode};
    use axum::Json;
    use chrono::{Duration, Utc};
    use diesel::prelude::*;
    use std::sync::Arc;
    use uuid::Uuid;

    use helpdesk_server::auth::{
        password, register, reset_password, CurrentUser, RegisterRequest, ResetPasswordRequest,
        Role, User,
    };
    use helpdesk_server::config::AppConfig;
    use helpdesk_server::email::Mailer;
    use helpdesk_server::notify::EventBroadcaster;
    use helpdesk_server::shared::error::AppError;
    use helpdesk_server::shared::schema::{tickets, users};
    use helpdesk_server::shared::state::AppState;
    use helpdesk_server::shared::utils::{create_conn, run_migrations};
    use helpdesk_server::tickets::{
        assign_ticket, create_ticket, update_status, AssignTicketRequest, ChangeStatusRequest,
        Ticket, TicketStatus,
    };

    fn build_state(config: AppConfig) -> Option<Arc<AppState>> {
        // Tests only run against an explicitly provided database.
        std::env::var("DATABASE_URL").ok()?;
        let pool = create_conn(&config).ok()?;
        run_migrations(&pool).ok()?;
        Some(Arc::new(AppState {
            conn: pool,
            events: EventBroadcaster::new(16),
            mailer: Mailer::new(None),
            config,
        }))
    }

    fn test_state() -> Option<Arc<AppState>> {
        build_state(AppConfig::from_env())
    }

    fn insert_user(state: &Arc<AppState>, role: Role) -> User {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let user = User {
            id,
            username: format!("user-{}", id.simple()),
            email: format!("{}@example.com", id.simple()),
            password_hash: "unused".to_string(),
            role,
            reset_token_hash: None,
            reset_token_expires: None,
            created_at: now,
            updated_at: now,
        };
        let mut conn = state.conn.get().expect("pool connection");
        diesel::insert_into(users::table)
            .values(&user)
            .execute(&mut conn)
            .expect("insert user");
        user
    }

    fn insert_ticket(state: &Arc<AppState>, created_by: Uuid) -> Ticket {
        let now = Utc::now();
        let ticket = Ticket {
            id: Uuid::new_v4(),
            ticket_code: format!("TKT-{}", Uuid::new_v4().simple()),
            title: "Printer jam".to_string(),
            description: "Tray 2 keeps jamming".to_string(),
            attachments: serde_json::json!([]),
            created_by,
            assigned_to: None,
            status: TicketStatus::Open,
            created_at: now,
            updated_at: now,
        };
        let mut conn = state.conn.get().expect("pool connection");
        diesel::insert_into(tickets::table)
            .values(&ticket)
            .execute(&mut conn)
            .expect("insert ticket");
        ticket
    }

    fn reload_ticket(state: &Arc<AppState>, id: Uuid) -> Ticket {
        let mut conn = state.conn.get().expect("pool connection");
        tickets::table
            .filter(tickets::id.eq(id))
            .first::<Ticket>(&mut conn)
            .expect("reload ticket")
    }

    async fn multipart_form(parts: &str, boundary: &str) -> Multipart {
        let request = Request::builder()
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(parts.to_string()))
            .expect("request");
        Multipart::from_request(request, &())
            .await
            .expect("multipart extractor")
    }

    #[tokio::test]
    async fn test_duplicate_email_registration_conflicts_without_new_row() {
        let Some(state) = test_state() else {
            println!("Skipping test - Postgres not available");
            return;
        };
        let admin = insert_user(&state, Role::Admin);
        let existing = insert_user(&state, Role::User);

        // Same address, different case: normalization must still collide.
        let request = RegisterRequest {
            username: Some("duplicate".to_string()),
            email: Some(existing.email.to_uppercase()),
            password: Some("An0ther!pass".to_string()),
            role: Some("User".to_string()),
        };
        let result = register(State(state.clone()), CurrentUser(admin), Json(request)).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let mut conn = state.conn.get().expect("pool connection");
        let count: i64 = users::table
            .filter(users::email.eq(&existing.email))
            .count()
            .get_result(&mut conn)
            .expect("count rows");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_assign_to_non_agent_rejected_and_ticket_unchanged() {
        let Some(state) = test_state() else {
            println!("Skipping test - Postgres not available");
            return;
        };
        let admin = insert_user(&state, Role::Admin);
        let requester = insert_user(&state, Role::User);
        let ticket = insert_ticket(&state, requester.id);

        let result = assign_ticket(
            State(state.clone()),
            CurrentUser(admin.clone()),
            Path(ticket.id.to_string()),
            Json(AssignTicketRequest {
                assigned_to: requester.id,
            }),
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let unchanged = reload_ticket(&state, ticket.id);
        assert_eq!(unchanged.assigned_to, None);
        assert_eq!(unchanged.status, TicketStatus::Open);

        // A real agent is accepted, and assignment advances the status.
        let agent = insert_user(&state, Role::SupportAgent);
        assign_ticket(
            State(state.clone()),
            CurrentUser(admin),
            Path(ticket.id.to_string()),
            Json(AssignTicketRequest {
                assigned_to: agent.id,
            }),
        )
        .await
        .expect("assign to agent");

        let assigned = reload_ticket(&state, ticket.id);
        assert_eq!(assigned.assigned_to, Some(agent.id));
        assert_eq!(assigned.status, TicketStatus::InProgress);
    }

    #[tokio::test]
    async fn test_reset_token_is_single_use() {
        let Some(state) = test_state() else {
            println!("Skipping test - Postgres not available");
            return;
        };
        let user = insert_user(&state, Role::User);

        let token = password::generate_reset_token();
        {
            let mut conn = state.conn.get().expect("pool connection");
            diesel::update(users::table.filter(users::id.eq(user.id)))
                .set((
                    users::reset_token_hash.eq(Some(password::reset_token_digest(&token))),
                    users::reset_token_expires.eq(Some(Utc::now() + Duration::minutes(30))),
                ))
                .execute(&mut conn)
                .expect("seed reset token");
        }

        let first = reset_password(
            State(state.clone()),
            Path(token.clone()),
            Json(ResetPasswordRequest {
                new_password: Some("Fresh!pass1".to_string()),
            }),
        )
        .await;
        assert!(first.is_ok());

        {
            let mut conn = state.conn.get().expect("pool connection");
            let reloaded = users::table
                .filter(users::id.eq(user.id))
                .first::<User>(&mut conn)
                .expect("reload user");
            assert!(reloaded.reset_token_hash.is_none());
            assert!(reloaded.reset_token_expires.is_none());
            assert!(password::verify_password("Fresh!pass1", &reloaded.password_hash)
                .expect("verify"));
        }

        let second = reset_password(
            State(state.clone()),
            Path(token),
            Json(ResetPasswordRequest {
                new_password: Some("Again!pass2".to_string()),
            }),
        )
        .await;
        assert!(matches!(second, Err(AppError::Auth(_))));
    }

    #[tokio::test]
    async fn test_repeated_status_update_is_idempotent() {
        let Some(state) = test_state() else {
            println!("Skipping test - Postgres not available");
            return;
        };
        let user = insert_user(&state, Role::User);
        let ticket = insert_ticket(&state, user.id);

        update_status(
            State(state.clone()),
            CurrentUser(user.clone()),
            Path(ticket.id.to_string()),
            Json(ChangeStatusRequest {
                status: "Resolved".to_string(),
            }),
        )
        .await
        .expect("first status update");
        let after_first = reload_ticket(&state, ticket.id);
        assert_eq!(after_first.status, TicketStatus::Resolved);

        update_status(
            State(state.clone()),
            CurrentUser(user),
            Path(ticket.id.to_string()),
            Json(ChangeStatusRequest {
                status: "Resolved".to_string(),
            }),
        )
        .await
        .expect("second status update");
        let after_second = reload_ticket(&state, ticket.id);
        assert_eq!(after_second.status, TicketStatus::Resolved);
        assert_eq!(after_second.created_at, after_first.created_at);
        assert!(after_second.updated_at >= after_first.updated_at);
    }

    #[tokio::test]
    async fn test_rejected_ticket_form_leaves_no_files_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::from_env();
        config.uploads_dir = dir.path().to_str().expect("utf8 path").to_string();
        let Some(state) = build_state(config) else {
            println!("Skipping test - Postgres not available");
            return;
        };
        let user = insert_user(&state, Role::User);

        // Blank title fails validation even though the attachment is valid.
        let boundary = "ticket-form-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             \x20\x20\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"description\"\r\n\r\n\
             Tray 2 keeps jamming\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"attachments\"; filename=\"jam.png\"\r\n\
             Content-Type: image/png\r\n\r\n\
             fakepng\r\n\
             --{boundary}--\r\n"
        );
        let multipart = multipart_form(&body, boundary).await;

        let result = create_ticket(State(state.clone()), CurrentUser(user.clone()), multipart).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let mut conn = state.conn.get().expect("pool connection");
        let count: i64 = tickets::table
            .filter(tickets::created_by.eq(user.id))
            .count()
            .get_result(&mut conn)
            .expect("count rows");
        assert_eq!(count, 0);

        let mut leftovers = std::fs::read_dir(dir.path()).expect("read uploads dir");
        assert!(leftovers.next().is_none());
    }

    #[tokio::test]
    async fn test_accepted_ticket_form_stores_attachment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::from_env();
        config.uploads_dir = dir.path().to_str().expect("utf8 path").to_string();
        let Some(state) = build_state(config) else {
            println!("Skipping test - Postgres not available");
            return;
        };
        let user = insert_user(&state, Role::User);

        let boundary = "ticket-form-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             Printer jam\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"description\"\r\n\r\n\
             Tray 2 keeps jamming\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"attachments\"; filename=\"jam.png\"\r\n\
             Content-Type: image/png\r\n\r\n\
             fakepng\r\n\
             --{boundary}--\r\n"
        );
        let multipart = multipart_form(&body, boundary).await;

        let (status, _) = create_ticket(State(state.clone()), CurrentUser(user.clone()), multipart)
            .await
            .expect("create ticket");
        assert_eq!(status, StatusCode::CREATED);

        let mut conn = state.conn.get().expect("pool connection");
        let created = tickets::table
            .filter(tickets::created_by.eq(user.id))
            .first::<Ticket>(&mut conn)
            .expect("created ticket");
        assert!(created.ticket_code.starts_with("TKT-"));
        assert_eq!(created.status, TicketStatus::Open);
        let stored = created.attachments.as_array().expect("attachments array");
        assert_eq!(stored.len(), 1);

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read uploads dir")
            .collect();
        assert_eq!(files.len(), 1);
    }
}
