use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use serde_json::Value;
use tower_governor::{
    governor::GovernorConfigBuilder,
    key_extractor::GlobalKeyExtractor,
    GovernorLayer,
};
use tracing::{debug, error, info, warn};

use crate::auth::{Role, ADMIN_ONLY, STAFF};
use crate::enrollment::{self, PaymentSubmission};
use crate::payments::amount_in_cents;
use crate::records::{
    str_field, ClassListMode, Collection, DeleteOutcome, Document, FinalizeOutcome,
    InsertOutcome, InstructorLookup, UpdateOutcome, DATE_FIELD, EMAIL_FIELD, ENROLLED_FIELD,
    FEEDBACK_FIELD, INSTRUCTOR_EMAIL_FIELD, ROLE_FIELD, STATUS_FIELD,
};
use crate::store::{Filter, FindQuery, SortOrder, Update};

use super::auth::{authenticate, ensure_owner, require_role};
use super::error::ApiError;
use super::responses::{
    object_body, ClassQuery, EmailQuery, HealthResponse, IntentRequest, IntentResponse,
    RoleUpdate, StatusUpdate, TokenRequest, TokenResponse,
};
use super::state::AppState;

const PENDING_STATUS: &str = "pending";

pub fn router(state: AppState) -> Router {
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(20)
        .burst_size(50)
        .key_extractor(GlobalKeyExtractor)
        .finish()
        .map(Arc::new);

    let mut app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/banner", get(list_banners))
        .route("/classes", get(list_classes).post(create_class))
        .route("/classes/{id}", put(upsert_class))
        .route("/classes/{id}/status", patch(update_class_status))
        .route(
            "/users",
            get(list_users).post(create_user).put(upsert_user),
        )
        .route(
            "/users/{key}",
            get(get_user).patch(update_user_role).delete(delete_user),
        )
        .route(
            "/instructors",
            get(list_instructors).post(create_instructor),
        )
        .route(
            "/instructors/{email}",
            patch(update_instructor).delete(delete_instructor),
        )
        .route("/enrolled", get(list_enrollments).put(enroll_class))
        .route("/enrolled/{id}", delete(remove_enrollment))
        .route("/payment", post(record_payment))
        .route("/payment/{email}", get(list_payments))
        .route("/create-payment-intent", post(create_payment_intent))
        .route("/jwt", post(issue_token));

    match governor_conf {
        Some(conf) => app = app.layer(GovernorLayer::new(conf)),
        None => warn!("rate limiter configuration rejected; serving without it"),
    }

    app.layer(
        tower_http::request_id::SetRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
            tower_http::request_id::MakeRequestUuid::default(),
        ),
    )
    .layer(tower_http::request_id::PropagateRequestIdLayer::new(
        axum::http::header::HeaderName::from_static("x-request-id"),
    ))
    .layer(tower_http::trace::TraceLayer::new_for_http())
    .layer(tower_http::cors::CorsLayer::permissive())
    .with_state(state)
}

async fn root() -> &'static str {
    "Summer-Camp is running..."
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = match state.store.ping().await {
        Ok(()) => "ok",
        Err(err) => {
            warn!(error = %err, "store ping failed");
            "degraded"
        }
    };
    Json(HealthResponse {
        status,
        store: state.store.backend_tag(),
    })
}

async fn list_banners(State(state): State<AppState>) -> Result<Json<Vec<Document>>, ApiError> {
    let banners = state
        .store
        .find(Collection::Banners, FindQuery::new(Filter::all()))
        .await?;
    debug!(banners = banners.len(), "banners requested");
    Ok(Json(banners))
}

async fn list_classes(
    State(state): State<AppState>,
    Query(query): Query<ClassQuery>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let limit = query
        .limit
        .map(|raw| raw.trim().parse::<usize>())
        .transpose()
        .map_err(|_| ApiError::InvalidLimit)?;
    let mode = ClassListMode::resolve(query.email, limit).map_err(|_| ApiError::InvalidLimit)?;
    let find = match &mode {
        ClassListMode::ByInstructor(email) => {
            FindQuery::new(Filter::eq(INSTRUCTOR_EMAIL_FIELD, email.as_str()))
        }
        ClassListMode::Popular(limit) => FindQuery::new(Filter::all())
            .sorted(ENROLLED_FIELD, SortOrder::Descending)
            .limit(*limit),
        ClassListMode::All => FindQuery::new(Filter::all()),
    };

    let classes = state.store.find(Collection::Classes, find).await?;
    debug!(mode = ?mode, classes = classes.len(), "classes requested");
    Ok(Json(classes))
}

async fn create_class(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<InsertOutcome>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let role = require_role(&state, &claims, STAFF).await?;
    let Json(body) = body?;

    let mut class = object_body(body)?;
    if role == Role::Instructor {
        // Instructors submit classes for review; only admins set the outcome.
        class.insert(String::from(STATUS_FIELD), Value::from(PENDING_STATUS));
        class.remove(FEEDBACK_FIELD);
        class
            .entry(INSTRUCTOR_EMAIL_FIELD)
            .or_insert_with(|| Value::from(claims.email.as_str()));
    }
    class
        .entry(STATUS_FIELD)
        .or_insert_with(|| Value::from(PENDING_STATUS));
    class.entry(ENROLLED_FIELD).or_insert_with(|| Value::from(0));

    let outcome = state.store.insert_one(Collection::Classes, class).await?;
    info!(class_id = %outcome.inserted_id, by = %claims.email, "class created");
    Ok(Json(outcome))
}

async fn upsert_class(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<UpdateOutcome>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let role = require_role(&state, &claims, STAFF).await?;
    let Json(body) = body?;

    let mut fields = object_body(body)?;
    let mut owner = None;
    if role == Role::Instructor {
        let existing = state
            .store
            .find_one(Collection::Classes, Filter::by_id(&id))
            .await?;
        if let Some(class) = &existing {
            let instructor = str_field(class, INSTRUCTOR_EMAIL_FIELD).unwrap_or_default();
            ensure_owner(&claims, instructor)?;
        }
        fields.remove(STATUS_FIELD);
        fields.remove(FEEDBACK_FIELD);
        fields.remove(INSTRUCTOR_EMAIL_FIELD);
        owner = Some(claims.email.as_str());
    }

    let mut update = Update::set(fields);
    if update.is_empty() {
        return Err(ApiError::EmptyUpdate);
    }
    update = update
        .default_on_insert(STATUS_FIELD, PENDING_STATUS)
        .default_on_insert(ENROLLED_FIELD, 0);
    if let Some(email) = owner {
        update = update.default_on_insert(INSTRUCTOR_EMAIL_FIELD, email);
    }

    let outcome = state
        .store
        .update_one(Collection::Classes, Filter::by_id(&id), update, true)
        .await?;
    info!(
        class_id = %id,
        by = %claims.email,
        matched = outcome.matched_count,
        upserted = outcome.upserted_id.is_some(),
        "class updated"
    );
    Ok(Json(outcome))
}

async fn update_class_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<UpdateOutcome>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    require_role(&state, &claims, ADMIN_ONLY).await?;
    let Json(body) = body?;

    let mut update = Update::default().set_field(STATUS_FIELD, body.status.as_str());
    if let Some(feedback) = body.feedback {
        update = update.set_field(FEEDBACK_FIELD, feedback);
    }

    let outcome = state
        .store
        .update_one(Collection::Classes, Filter::by_id(&id), update, false)
        .await?;
    if outcome.matched_count == 0 {
        return Err(ApiError::ClassNotFound);
    }
    info!(class_id = %id, status = %body.status, "class status changed");
    Ok(Json(outcome))
}

async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Document>>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    require_role(&state, &claims, ADMIN_ONLY).await?;

    let users = state
        .store
        .find(
            Collection::Users,
            FindQuery::new(Filter::all()).sorted(EMAIL_FIELD, SortOrder::Ascending),
        )
        .await?;
    debug!(users = users.len(), "users requested");
    Ok(Json(users))
}

/// Roles are granted only through `PATCH /users/{id}`.
fn user_profile(body: Value) -> Result<(String, Document), ApiError> {
    let mut user = object_body(body)?;
    user.remove(ROLE_FIELD);
    let email = str_field(&user, EMAIL_FIELD)
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(String::from)
        .ok_or(ApiError::MissingEmail)?;
    Ok((email, user))
}

async fn create_user(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<InsertOutcome>, ApiError> {
    let Json(body) = body?;
    let (email, user) = user_profile(body)?;

    let existing = state
        .store
        .find_one(Collection::Users, Filter::eq(EMAIL_FIELD, email.as_str()))
        .await?;
    if existing.is_some() {
        debug!(email = %email, "user already exists");
        return Err(ApiError::UserExists);
    }

    let outcome = state.store.insert_one(Collection::Users, user).await?;
    info!(email = %email, "user created");
    Ok(Json(outcome))
}

async fn upsert_user(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<UpdateOutcome>, ApiError> {
    let Json(body) = body?;
    let (email, user) = user_profile(body)?;

    let outcome = state
        .store
        .update_one(
            Collection::Users,
            Filter::eq(EMAIL_FIELD, email.as_str()),
            Update::set(user),
            true,
        )
        .await?;
    debug!(email = %email, upserted = outcome.upserted_id.is_some(), "user saved");
    Ok(Json(outcome))
}

async fn get_user(
    State(state): State<AppState>,
    Path(email): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Document>, ApiError> {
    authenticate(&state, &headers)?;

    let user = state
        .store
        .find_one(Collection::Users, Filter::eq(EMAIL_FIELD, email.as_str()))
        .await?
        .ok_or(ApiError::UserNotFound)?;
    Ok(Json(user))
}

async fn update_user_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<RoleUpdate>, JsonRejection>,
) -> Result<Json<UpdateOutcome>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    require_role(&state, &claims, ADMIN_ONLY).await?;
    let Json(body) = body?;

    let outcome = state
        .store
        .update_one(
            Collection::Users,
            Filter::by_id(&id),
            Update::default().set_field(ROLE_FIELD, body.role.as_str()),
            false,
        )
        .await?;
    if outcome.matched_count == 0 {
        return Err(ApiError::UserNotFound);
    }
    info!(user_id = %id, role = body.role.as_str(), by = %claims.email, "user role changed");
    Ok(Json(outcome))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DeleteOutcome>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    require_role(&state, &claims, ADMIN_ONLY).await?;

    let outcome = state
        .store
        .delete_one(Collection::Users, Filter::by_id(&id))
        .await?;
    info!(user_id = %id, deleted = outcome.deleted_count, "user deleted");
    Ok(Json(outcome))
}

async fn list_instructors(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<Value>, ApiError> {
    match InstructorLookup::resolve(query.email) {
        InstructorLookup::One(email) => {
            let instructor = state
                .store
                .find_one(Collection::Instructors, Filter::eq(EMAIL_FIELD, email.as_str()))
                .await?
                .ok_or(ApiError::InstructorNotFound)?;
            Ok(Json(Value::Object(instructor)))
        }
        InstructorLookup::All => {
            let instructors = state
                .store
                .find(Collection::Instructors, FindQuery::new(Filter::all()))
                .await?;
            debug!(instructors = instructors.len(), "instructors requested");
            Ok(Json(Value::Array(
                instructors.into_iter().map(Value::Object).collect(),
            )))
        }
    }
}

async fn create_instructor(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<InsertOutcome>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    require_role(&state, &claims, STAFF).await?;
    let Json(body) = body?;

    let instructor = object_body(body)?;
    let outcome = state
        .store
        .insert_one(Collection::Instructors, instructor)
        .await?;
    info!(instructor_id = %outcome.inserted_id, by = %claims.email, "instructor created");
    Ok(Json(outcome))
}

async fn update_instructor(
    State(state): State<AppState>,
    Path(email): Path<String>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<UpdateOutcome>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let role = require_role(&state, &claims, STAFF).await?;
    if role == Role::Instructor {
        ensure_owner(&claims, &email)?;
    }
    let Json(body) = body?;

    let update = Update::set(object_body(body)?);
    if update.is_empty() {
        return Err(ApiError::EmptyUpdate);
    }

    let outcome = state
        .store
        .update_one(
            Collection::Instructors,
            Filter::eq(EMAIL_FIELD, email.as_str()),
            update,
            false,
        )
        .await?;
    debug!(email = %email, matched = outcome.matched_count, "instructor updated");
    Ok(Json(outcome))
}

async fn delete_instructor(
    State(state): State<AppState>,
    Path(email): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DeleteOutcome>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    require_role(&state, &claims, ADMIN_ONLY).await?;

    let outcome = state
        .store
        .delete_one(Collection::Instructors, Filter::eq(EMAIL_FIELD, email.as_str()))
        .await?;
    info!(email = %email, deleted = outcome.deleted_count, "instructor deleted");
    Ok(Json(outcome))
}

async fn list_enrollments(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<Document>>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let email = query
        .email
        .filter(|email| !email.trim().is_empty())
        .unwrap_or_else(|| claims.email.clone());
    ensure_owner(&claims, &email)?;

    let enrollments = state
        .store
        .find(
            Collection::Enrollments,
            FindQuery::new(Filter::eq(EMAIL_FIELD, email.as_str())),
        )
        .await?;
    debug!(email = %email, enrollments = enrollments.len(), "enrollments requested");
    Ok(Json(enrollments))
}

async fn enroll_class(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<UpdateOutcome>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let Json(body) = body?;

    let mut pending = object_body(body)?;
    match str_field(&pending, EMAIL_FIELD) {
        Some(email) => ensure_owner(&claims, email)?,
        None => {
            pending.insert(String::from(EMAIL_FIELD), Value::from(claims.email.as_str()));
        }
    }

    let outcome = enrollment::enroll(state.store.as_ref(), pending).await?;
    Ok(Json(outcome))
}

async fn remove_enrollment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DeleteOutcome>, ApiError> {
    let claims = authenticate(&state, &headers)?;

    let outcome = state
        .store
        .delete_one(
            Collection::Enrollments,
            Filter::by_id(&id).and(EMAIL_FIELD, claims.email.as_str()),
        )
        .await?;
    debug!(enrollment_id = %id, deleted = outcome.deleted_count, "enrollment removed");
    Ok(Json(outcome))
}

async fn list_payments(
    State(state): State<AppState>,
    Path(email): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<Document>>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    ensure_owner(&claims, &email)?;

    let payments = state
        .store
        .find(
            Collection::Payments,
            FindQuery::new(Filter::eq(EMAIL_FIELD, email.as_str()))
                .sorted(DATE_FIELD, SortOrder::Descending),
        )
        .await?;
    debug!(email = %email, payments = payments.len(), "payment history requested");
    Ok(Json(payments))
}

async fn create_payment_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<IntentRequest>, JsonRejection>,
) -> Result<Json<IntentResponse>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let Json(body) = body?;
    let amount = amount_in_cents(body.price).ok_or(ApiError::InvalidPrice)?;
    let gateway = state.payments.as_ref().ok_or(ApiError::PaymentsDisabled)?;

    let intent = gateway.create_intent(amount).await.map_err(|err| {
        error!(error = %err, email = %claims.email, "payment intent failed");
        ApiError::Gateway
    })?;
    debug!(email = %claims.email, amount_cents = amount, "payment intent issued");
    Ok(Json(IntentResponse {
        client_secret: intent.client_secret,
    }))
}

async fn record_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    submission: Result<Json<PaymentSubmission>, JsonRejection>,
) -> Result<Json<FinalizeOutcome>, ApiError> {
    let claims = authenticate(&state, &headers)?;
    let Json(submission) = submission?;
    ensure_owner(&claims, &submission.email)?;

    let outcome = enrollment::finalize(state.store.as_ref(), submission).await?;
    Ok(Json(outcome))
}

/// Signs a token for the posted email; identity is verified upstream by the auth provider.
async fn issue_token(
    State(state): State<AppState>,
    body: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(body) = body?;
    let email = body.email.trim();
    if email.is_empty() {
        return Err(ApiError::MissingEmail);
    }

    let token = state.tokens.issue(email).map_err(|err| {
        error!(error = %err, "token signing failed");
        ApiError::Internal
    })?;
    debug!(email = %email, "token issued");
    Ok(Json(TokenResponse {
        token,
        expires_in: state.tokens.ttl().as_secs(),
    }))
}
