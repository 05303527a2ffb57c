#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::module_inception)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{json, Value};

    use crate::auth::TokenKeys;
    use crate::payments::{GatewayError, PaymentGateway, PaymentIntent};
    use crate::records::{Collection, Document};
    use crate::store::MemoryStore;

    use crate::http::{router, AppState};

    const ADMIN: &str = "admin@camp.io";
    const INSTRUCTOR: &str = "coach@camp.io";
    const STUDENT: &str = "kid@camp.io";

    struct FakeGateway;

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_intent(&self, amount_cents: u64) -> Result<PaymentIntent, GatewayError> {
            Ok(PaymentIntent {
                id: format!("pi_{amount_cents}"),
                client_secret: format!("pi_{amount_cents}_secret"),
            })
        }
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    async fn seeded_store() -> MemoryStore {
        MemoryStore::new()
            .with_documents(
                Collection::Users,
                vec![
                    doc(json!({ "_id": "u-admin", "email": ADMIN, "role": "admin" })),
                    doc(json!({ "_id": "u-coach", "email": INSTRUCTOR, "role": "instructor" })),
                    doc(json!({ "_id": "u-kid", "email": STUDENT, "role": "user" })),
                ],
            )
            .await
            .with_documents(
                Collection::Classes,
                vec![
                    doc(json!({
                        "_id": "class-art",
                        "name": "Art",
                        "instructorEmail": INSTRUCTOR,
                        "availableSeats": 2,
                        "enrolled": 3,
                        "status": "approved"
                    })),
                    doc(json!({
                        "_id": "class-swim",
                        "name": "Swimming",
                        "instructorEmail": "other@camp.io",
                        "availableSeats": 0,
                        "enrolled": 9,
                        "status": "approved"
                    })),
                    doc(json!({
                        "_id": "class-chess",
                        "name": "Chess",
                        "instructorEmail": INSTRUCTOR,
                        "availableSeats": 5,
                        "enrolled": 1,
                        "status": "approved"
                    })),
                ],
            )
            .await
            .with_documents(
                Collection::Banners,
                vec![doc(json!({ "_id": "banner-1", "title": "Summer sign-ups open" }))],
            )
            .await
    }

    fn test_app_state(store: MemoryStore, payments: bool) -> AppState {
        AppState {
            store: Arc::new(store),
            tokens: Arc::new(TokenKeys::new("test-secret", Duration::from_secs(3600))),
            payments: payments.then(|| Arc::new(FakeGateway) as Arc<dyn PaymentGateway>),
        }
    }

    async fn test_server(payments: bool) -> Result<(TestServer, AppState)> {
        let state = test_app_state(seeded_store().await, payments);
        let server = TestServer::new(router(state.clone()))?;
        Ok((server, state))
    }

    fn bearer(state: &AppState, email: &str) -> String {
        format!("Bearer {}", state.tokens.issue(email).unwrap())
    }

    fn class_by_id<'a>(classes: &'a [Value], id: &str) -> &'a Value {
        classes
            .iter()
            .find(|class| class["_id"] == id)
            .unwrap_or_else(|| panic!("class {id} missing"))
    }

    #[tokio::test]
    async fn root_and_health_respond() -> Result<()> {
        let (server, _) = test_server(false).await?;

        let root = server.get("/").await;
        assert_eq!(root.status_code(), StatusCode::OK);
        assert_eq!(root.text(), "Summer-Camp is running...");

        let health = server.get("/health").await;
        assert_eq!(health.status_code(), StatusCode::OK);
        let body: Value = health.json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"], "memory");
        Ok(())
    }

    #[tokio::test]
    async fn jwt_issues_verifiable_token() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let response = server.post("/jwt").json(&json!({ "email": STUDENT })).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["expiresIn"], 3600);
        let token = body["token"].as_str().unwrap();
        assert_eq!(state.tokens.verify(token)?.email, STUDENT);

        let blank = server.post("/jwt").json(&json!({ "email": "  " })).await;
        assert_eq!(blank.status_code(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn guarded_routes_reject_missing_and_bad_tokens() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let missing = server.get("/users").await;
        assert_eq!(missing.status_code(), StatusCode::UNAUTHORIZED);
        let body: Value = missing.json();
        assert_eq!(body["error"], "unauthorized access");
        assert!(missing
            .header("www-authenticate")
            .to_str()?
            .starts_with("Bearer"));

        let malformed = server
            .get("/users")
            .add_header("Authorization", "Bearer not-a-token")
            .await;
        assert_eq!(malformed.status_code(), StatusCode::UNAUTHORIZED);

        let issued_at = chrono::Utc::now().timestamp() - 7200;
        let expired = state.tokens.issue_at(ADMIN, issued_at)?;
        let expired = server
            .get("/users")
            .add_header("Authorization", format!("Bearer {expired}"))
            .await;
        assert_eq!(expired.status_code(), StatusCode::UNAUTHORIZED);

        let foreign = TokenKeys::new("other-secret", Duration::from_secs(3600)).issue(ADMIN)?;
        let foreign = server
            .get("/users")
            .add_header("Authorization", format!("Bearer {foreign}"))
            .await;
        assert_eq!(foreign.status_code(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn body_routes_check_token_before_body() -> Result<()> {
        let (server, state) = test_server(true).await?;

        let no_body = server.post("/payment").await;
        assert_eq!(no_body.status_code(), StatusCode::UNAUTHORIZED);
        let body: Value = no_body.json();
        assert_eq!(body["error"], "unauthorized access");

        let empty = server.post("/payment").json(&json!({})).await;
        assert_eq!(empty.status_code(), StatusCode::UNAUTHORIZED);

        let class = server.post("/classes").await;
        assert_eq!(class.status_code(), StatusCode::UNAUTHORIZED);

        let intent = server
            .post("/create-payment-intent")
            .json(&json!({ "price": "x" }))
            .await;
        assert_eq!(intent.status_code(), StatusCode::UNAUTHORIZED);

        let malformed = server
            .post("/create-payment-intent")
            .add_header("Authorization", bearer(&state, STUDENT))
            .json(&json!({ "price": "x" }))
            .await;
        assert_eq!(malformed.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = malformed.json();
        assert!(body["error"].is_string());
        Ok(())
    }

    #[tokio::test]
    async fn admin_routes_forbid_other_roles() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let student = server
            .get("/users")
            .add_header("Authorization", bearer(&state, STUDENT))
            .await;
        assert_eq!(student.status_code(), StatusCode::FORBIDDEN);
        let body: Value = student.json();
        assert_eq!(body["error"], "forbidden access");

        let instructor = server
            .patch("/classes/class-art/status")
            .add_header("Authorization", bearer(&state, INSTRUCTOR))
            .json(&json!({ "status": "denied" }))
            .await;
        assert_eq!(instructor.status_code(), StatusCode::FORBIDDEN);

        let admin = server
            .get("/users")
            .add_header("Authorization", bearer(&state, ADMIN))
            .await;
        assert_eq!(admin.status_code(), StatusCode::OK);
        let users: Vec<Value> = admin.json();
        assert_eq!(users.len(), 3);
        assert_eq!(users[0]["email"], ADMIN);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_caller_is_treated_as_plain_user() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let response = server
            .post("/classes")
            .add_header("Authorization", bearer(&state, "stranger@camp.io"))
            .json(&json!({ "name": "Archery" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn instructor_class_is_forced_pending() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let created = server
            .post("/classes")
            .add_header("Authorization", bearer(&state, INSTRUCTOR))
            .json(&json!({
                "name": "Pottery",
                "availableSeats": 8,
                "status": "approved",
                "feedback": "self-approved"
            }))
            .await;
        assert_eq!(created.status_code(), StatusCode::OK);
        let outcome: Value = created.json();
        let id = outcome["insertedId"].as_str().unwrap().to_string();

        let classes: Vec<Value> = server
            .get("/classes")
            .add_query_param("email", INSTRUCTOR)
            .await
            .json();
        let pottery = class_by_id(&classes, &id);
        assert_eq!(pottery["status"], "pending");
        assert_eq!(pottery["enrolled"], 0);
        assert_eq!(pottery["instructorEmail"], INSTRUCTOR);
        assert!(pottery.get("feedback").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn instructor_upsert_creates_pending_class() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let response = server
            .put("/classes/brand-new")
            .add_header("Authorization", bearer(&state, INSTRUCTOR))
            .json(&json!({
                "name": "Kayaking",
                "availableSeats": 5,
                "status": "approved",
                "feedback": "self-approved",
                "instructorEmail": "other@camp.io"
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let outcome: Value = response.json();
        assert_eq!(outcome["upsertedId"], "brand-new");

        let classes: Vec<Value> = server.get("/classes").await.json();
        let kayaking = class_by_id(&classes, "brand-new");
        assert_eq!(kayaking["status"], "pending");
        assert_eq!(kayaking["enrolled"], 0);
        assert_eq!(kayaking["instructorEmail"], INSTRUCTOR);
        assert!(kayaking.get("feedback").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn admin_upsert_keeps_explicit_status() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let response = server
            .put("/classes/admin-made")
            .add_header("Authorization", bearer(&state, ADMIN))
            .json(&json!({ "name": "Archery", "status": "approved" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let classes: Vec<Value> = server.get("/classes").await.json();
        let archery = class_by_id(&classes, "admin-made");
        assert_eq!(archery["status"], "approved");
        assert_eq!(archery["enrolled"], 0);
        Ok(())
    }

    #[tokio::test]
    async fn instructor_edits_own_class_without_review_fields() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let response = server
            .put("/classes/class-art")
            .add_header("Authorization", bearer(&state, INSTRUCTOR))
            .json(&json!({ "availableSeats": 4, "status": "denied", "feedback": "nope" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let classes: Vec<Value> = server.get("/classes").await.json();
        let art = class_by_id(&classes, "class-art");
        assert_eq!(art["availableSeats"], 4);
        assert_eq!(art["status"], "approved");
        assert!(art.get("feedback").is_none());

        let status_only = server
            .put("/classes/class-art")
            .add_header("Authorization", bearer(&state, INSTRUCTOR))
            .json(&json!({ "status": "approved" }))
            .await;
        assert_eq!(status_only.status_code(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn instructor_cannot_edit_another_instructors_class() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let response = server
            .put("/classes/class-swim")
            .add_header("Authorization", bearer(&state, INSTRUCTOR))
            .json(&json!({ "price": 0, "availableSeats": 999 }))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

        let classes: Vec<Value> = server.get("/classes").await.json();
        let swim = class_by_id(&classes, "class-swim");
        assert_eq!(swim["availableSeats"], 0);
        assert!(swim.get("price").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn banners_are_public() -> Result<()> {
        let (server, _) = test_server(false).await?;

        let response = server.get("/banner").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let banners: Vec<Value> = response.json();
        assert_eq!(banners.len(), 1);
        assert_eq!(banners[0]["title"], "Summer sign-ups open");
        Ok(())
    }

    #[tokio::test]
    async fn admin_sets_class_status_and_feedback() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let response = server
            .patch("/classes/class-chess/status")
            .add_header("Authorization", bearer(&state, ADMIN))
            .json(&json!({ "status": "denied", "feedback": "needs a syllabus" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let outcome: Value = response.json();
        assert_eq!(outcome["matchedCount"], 1);
        assert_eq!(outcome["modifiedCount"], 1);

        let classes: Vec<Value> = server.get("/classes").await.json();
        let chess = class_by_id(&classes, "class-chess");
        assert_eq!(chess["status"], "denied");
        assert_eq!(chess["feedback"], "needs a syllabus");

        let missing = server
            .patch("/classes/class-none/status")
            .add_header("Authorization", bearer(&state, ADMIN))
            .json(&json!({ "status": "approved" }))
            .await;
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn class_limit_returns_most_enrolled_first() -> Result<()> {
        let (server, _) = test_server(false).await?;

        let response = server.get("/classes").add_query_param("limit", 2).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let classes: Vec<Value> = response.json();
        let names: Vec<&str> = classes
            .iter()
            .map(|class| class["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Swimming", "Art"]);

        let zero = server.get("/classes").add_query_param("limit", 0).await;
        assert_eq!(zero.status_code(), StatusCode::BAD_REQUEST);

        let garbage = server.get("/classes").add_query_param("limit", "abc").await;
        assert_eq!(garbage.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = garbage.json();
        assert_eq!(body["error"], "limit must be a positive integer");
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_user_is_rejected() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let created = server
            .post("/users")
            .json(&json!({ "email": "new@camp.io", "name": "New", "role": "admin" }))
            .await;
        assert_eq!(created.status_code(), StatusCode::OK);

        let duplicate = server
            .post("/users")
            .json(&json!({ "email": "new@camp.io", "name": "Again" }))
            .await;
        assert_eq!(duplicate.status_code(), StatusCode::CONFLICT);
        let body: Value = duplicate.json();
        assert_eq!(body["error"], "user already exists");

        let users: Vec<Value> = server
            .get("/users")
            .add_header("Authorization", bearer(&state, ADMIN))
            .await
            .json();
        let matching: Vec<&Value> = users
            .iter()
            .filter(|user| user["email"] == "new@camp.io")
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0]["name"], "New");
        assert!(matching[0].get("role").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn user_lookup_requires_token_and_reports_missing() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let anonymous = server.get(&format!("/users/{STUDENT}")).await;
        assert_eq!(anonymous.status_code(), StatusCode::UNAUTHORIZED);

        let found = server
            .get(&format!("/users/{STUDENT}"))
            .add_header("Authorization", bearer(&state, STUDENT))
            .await;
        assert_eq!(found.status_code(), StatusCode::OK);
        let user: Value = found.json();
        assert_eq!(user["role"], "user");

        let missing = server
            .get("/users/ghost@camp.io")
            .add_header("Authorization", bearer(&state, STUDENT))
            .await;
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn admin_promotes_user_to_instructor() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let response = server
            .patch("/users/u-kid")
            .add_header("Authorization", bearer(&state, ADMIN))
            .json(&json!({ "role": "instructor" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let user: Value = server
            .get(&format!("/users/{STUDENT}"))
            .add_header("Authorization", bearer(&state, STUDENT))
            .await
            .json();
        assert_eq!(user["role"], "instructor");
        Ok(())
    }

    #[tokio::test]
    async fn instructor_lookup_by_email() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let created = server
            .post("/instructors")
            .add_header("Authorization", bearer(&state, ADMIN))
            .json(&json!({ "email": INSTRUCTOR, "name": "Coach" }))
            .await;
        assert_eq!(created.status_code(), StatusCode::OK);

        let one = server
            .get("/instructors")
            .add_query_param("email", INSTRUCTOR)
            .await;
        assert_eq!(one.status_code(), StatusCode::OK);
        let instructor: Value = one.json();
        assert_eq!(instructor["name"], "Coach");

        let all: Vec<Value> = server.get("/instructors").await.json();
        assert_eq!(all.len(), 1);

        let missing = server
            .get("/instructors")
            .add_query_param("email", "ghost@camp.io")
            .await;
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn instructor_patches_only_own_profile() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let foreign = server
            .patch("/instructors/other@camp.io")
            .add_header("Authorization", bearer(&state, INSTRUCTOR))
            .json(&json!({ "bio": "hijacked" }))
            .await;
        assert_eq!(foreign.status_code(), StatusCode::FORBIDDEN);

        server
            .post("/instructors")
            .add_header("Authorization", bearer(&state, ADMIN))
            .json(&json!({ "email": INSTRUCTOR, "name": "Coach" }))
            .await;
        let own = server
            .patch(&format!("/instructors/{INSTRUCTOR}"))
            .add_header("Authorization", bearer(&state, INSTRUCTOR))
            .json(&json!({ "bio": "Swims a lot" }))
            .await;
        assert_eq!(own.status_code(), StatusCode::OK);
        let outcome: Value = own.json();
        assert_eq!(outcome["matchedCount"], 1);

        let empty = server
            .patch(&format!("/instructors/{INSTRUCTOR}"))
            .add_header("Authorization", bearer(&state, INSTRUCTOR))
            .json(&json!({}))
            .await;
        assert_eq!(empty.status_code(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn payment_history_is_owner_only() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let response = server
            .get(&format!("/payment/{STUDENT}"))
            .add_header("Authorization", bearer(&state, ADMIN))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

        let enrolled = server
            .get("/enrolled")
            .add_query_param("email", STUDENT)
            .add_header("Authorization", bearer(&state, INSTRUCTOR))
            .await;
        assert_eq!(enrolled.status_code(), StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn enrolling_twice_conflicts() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let first = server
            .put("/enrolled")
            .add_header("Authorization", bearer(&state, STUDENT))
            .json(&json!({ "classId": "class-art", "name": "Art" }))
            .await;
        assert_eq!(first.status_code(), StatusCode::OK);
        let outcome: Value = first.json();
        assert!(outcome["upsertedId"].is_string());

        let second = server
            .put("/enrolled")
            .add_header("Authorization", bearer(&state, STUDENT))
            .json(&json!({ "classId": "class-art", "name": "Art" }))
            .await;
        assert_eq!(second.status_code(), StatusCode::CONFLICT);

        let pending: Vec<Value> = server
            .get("/enrolled")
            .add_header("Authorization", bearer(&state, STUDENT))
            .await
            .json();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0]["email"], STUDENT);
        Ok(())
    }

    #[tokio::test]
    async fn pending_enrollment_is_removed_only_by_owner() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let outcome: Value = server
            .put("/enrolled")
            .add_header("Authorization", bearer(&state, STUDENT))
            .json(&json!({ "classId": "class-chess" }))
            .await
            .json();
        let id = outcome["upsertedId"].as_str().unwrap().to_string();

        let other: Value = server
            .delete(&format!("/enrolled/{id}"))
            .add_header("Authorization", bearer(&state, ADMIN))
            .await
            .json();
        assert_eq!(other["deletedCount"], 0);

        let owner: Value = server
            .delete(&format!("/enrolled/{id}"))
            .add_header("Authorization", bearer(&state, STUDENT))
            .await
            .json();
        assert_eq!(owner["deletedCount"], 1);
        Ok(())
    }

    #[tokio::test]
    async fn payment_moves_exactly_one_seat() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let enrolled = server
            .put("/enrolled")
            .add_header("Authorization", bearer(&state, STUDENT))
            .json(&json!({ "classId": "class-art" }))
            .await;
        assert_eq!(enrolled.status_code(), StatusCode::OK);

        let paid = server
            .post("/payment")
            .add_header("Authorization", bearer(&state, STUDENT))
            .json(&json!({
                "email": STUDENT,
                "classId": "class-art",
                "price": 49.5,
                "transactionId": "pi_4950",
                "className": "Art"
            }))
            .await;
        assert_eq!(paid.status_code(), StatusCode::OK);
        let outcome: Value = paid.json();
        assert!(outcome["insertResult"]["insertedId"].is_string());
        assert_eq!(outcome["updateResult"]["modifiedCount"], 1);
        assert_eq!(outcome["deleteResult"]["deletedCount"], 1);

        let classes: Vec<Value> = server.get("/classes").await.json();
        let art = class_by_id(&classes, "class-art");
        assert_eq!(art["availableSeats"], 1);
        assert_eq!(art["enrolled"], 4);

        let pending: Vec<Value> = server
            .get("/enrolled")
            .add_header("Authorization", bearer(&state, STUDENT))
            .await
            .json();
        assert!(pending.is_empty());

        let history: Vec<Value> = server
            .get(&format!("/payment/{STUDENT}"))
            .add_header("Authorization", bearer(&state, STUDENT))
            .await
            .json();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["transactionId"], "pi_4950");
        assert_eq!(history[0]["className"], "Art");
        assert!(history[0]["date"].is_string());

        let replay = server
            .post("/payment")
            .add_header("Authorization", bearer(&state, STUDENT))
            .json(&json!({ "email": STUDENT, "classId": "class-art", "price": 49.5 }))
            .await;
        assert_eq!(replay.status_code(), StatusCode::NOT_FOUND);

        let classes: Vec<Value> = server.get("/classes").await.json();
        assert_eq!(class_by_id(&classes, "class-art")["availableSeats"], 1);
        Ok(())
    }

    #[tokio::test]
    async fn sold_out_payment_changes_nothing() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let enrolled = server
            .put("/enrolled")
            .add_header("Authorization", bearer(&state, STUDENT))
            .json(&json!({ "classId": "class-swim" }))
            .await;
        assert_eq!(enrolled.status_code(), StatusCode::OK);

        let paid = server
            .post("/payment")
            .add_header("Authorization", bearer(&state, STUDENT))
            .json(&json!({ "email": STUDENT, "classId": "class-swim", "price": 30 }))
            .await;
        assert_eq!(paid.status_code(), StatusCode::CONFLICT);
        let body: Value = paid.json();
        assert_eq!(body["error"], "no seats available");

        let classes: Vec<Value> = server.get("/classes").await.json();
        let swim = class_by_id(&classes, "class-swim");
        assert_eq!(swim["availableSeats"], 0);
        assert_eq!(swim["enrolled"], 9);

        let pending: Vec<Value> = server
            .get("/enrolled")
            .add_header("Authorization", bearer(&state, STUDENT))
            .await
            .json();
        assert_eq!(pending.len(), 1);

        let history: Vec<Value> = server
            .get(&format!("/payment/{STUDENT}"))
            .add_header("Authorization", bearer(&state, STUDENT))
            .await
            .json();
        assert!(history.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn payment_for_someone_else_is_forbidden() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let response = server
            .post("/payment")
            .add_header("Authorization", bearer(&state, ADMIN))
            .json(&json!({ "email": STUDENT, "classId": "class-art", "price": 10 }))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn payment_intent_uses_gateway() -> Result<()> {
        let (server, state) = test_server(true).await?;

        let response = server
            .post("/create-payment-intent")
            .add_header("Authorization", bearer(&state, STUDENT))
            .json(&json!({ "price": 12.34 }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["clientSecret"], "pi_1234_secret");

        let zero = server
            .post("/create-payment-intent")
            .add_header("Authorization", bearer(&state, STUDENT))
            .json(&json!({ "price": 0 }))
            .await;
        assert_eq!(zero.status_code(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn payment_intent_without_gateway_is_unavailable() -> Result<()> {
        let (server, state) = test_server(false).await?;

        let response = server
            .post("/create-payment-intent")
            .add_header("Authorization", bearer(&state, STUDENT))
            .json(&json!({ "price": 12.34 }))
            .await;
        assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        Ok(())
    }
}
