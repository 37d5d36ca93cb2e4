mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, ConcurrentProfile, TestApp};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn admins_cannot_delete_themselves() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (admin_id, admin) = app.account_token("admin@example.com", "Admin").await?;

    let response = app
        .delete(&format!("/api/admin/users/{admin_id}"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await?;
    assert_eq!(body["error"], "Cannot delete your own account");
    assert_eq!(body["code"], "SELF_DELETION");

    assert_eq!(app.profile_count("admin@example.com").await?, 1);
    assert!(app.identity().contains(admin_id).await);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn user_management_is_admin_only() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, archivist) = app.account_token("arch@example.com", "Archivist").await?;
    let (user_id, user) = app.account_token("user@example.com", "User").await?;

    for token in [&archivist, &user] {
        let listed = app.get("/api/admin/users", Some(token)).await?;
        assert_eq!(listed.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(listed).await?["code"], "INSUFFICIENT_ROLE");
    }

    let promote = app
        .put_json(
            &format!("/api/admin/users/{user_id}/role"),
            &json!({ "role": "Admin" }),
            Some(&user),
        )
        .await?;
    assert_eq!(promote.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn listing_tolerates_failed_confirmation_lookups() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, admin) = app.account_token("admin@example.com", "Admin").await?;
    let (flaky_id, _) = app.account_token("flaky@example.com", "User").await?;
    app.identity().fail_lookup_for(flaky_id).await;

    let response = app.get("/api/admin/users", Some(&admin)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    let users = body.as_array().expect("array");
    assert_eq!(users.len(), 2);

    for summary in users {
        if summary["id"] == flaky_id.to_string() {
            assert!(summary["email_confirmed"].is_null());
        } else {
            assert_eq!(summary["email_confirmed"], true);
        }
    }

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn created_users_can_sign_in_with_their_role() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, admin) = app.account_token("admin@example.com", "Admin").await?;

    let created = app
        .post_json(
            "/api/admin/users",
            &json!({
                "email": " Field.Worker@Example.com ",
                "password": "trowel-and-brush",
                "role": "Archivist"
            }),
            Some(&admin),
        )
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = body_json(created).await?;
    assert_eq!(body["email"], "field.worker@example.com");
    assert_eq!(body["role"], "Archivist");
    assert_eq!(body["email_confirmed"], true);

    let token = app
        .login_token("field.worker@example.com", "trowel-and-brush")
        .await?;
    let me = app.get("/api/auth/me", Some(&token)).await?;
    assert_eq!(body_json(me).await?["role"], "Archivist");

    let duplicate = app
        .post_json(
            "/api/admin/users",
            &json!({
                "email": "field.worker@example.com",
                "password": "trowel-and-brush",
                "role": "User"
            }),
            Some(&admin),
        )
        .await?;
    assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(duplicate).await?["code"], "USER_ALREADY_EXISTS");
    assert_eq!(app.profile_count("field.worker@example.com").await?, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn created_identity_is_removed_when_its_profile_cannot_be_stored() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, admin) = app.account_token("admin@example.com", "Admin").await?;
    app.identity()
        .insert_profile_concurrently(app.state.pool.clone(), ConcurrentProfile::OtherIdentity)
        .await;

    let response = app
        .post_json(
            "/api/admin/users",
            &json!({
                "email": "crew@example.com",
                "password": "trowel-and-brush",
                "role": "Archivist"
            }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await?["code"], "USER_ALREADY_EXISTS");
    assert_eq!(app.profile_count("crew@example.com").await?, 1);
    assert_eq!(app.identity().identity_count("crew@example.com").await, 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn role_changes_apply_on_the_next_request() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, admin) = app.account_token("admin@example.com", "Admin").await?;
    let (user_id, user) = app.account_token("user@example.com", "User").await?;

    let before = app.get("/api/admin/users", Some(&user)).await?;
    assert_eq!(before.status(), StatusCode::FORBIDDEN);

    let changed = app
        .put_json(
            &format!("/api/admin/users/{user_id}/role"),
            &json!({ "role": "Admin" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(changed.status(), StatusCode::OK);
    assert_eq!(body_json(changed).await?["role"], "Admin");

    let after = app.get("/api/admin/users", Some(&user)).await?;
    assert_eq!(after.status(), StatusCode::OK);

    let unknown = app
        .put_json(
            &format!("/api/admin/users/{}/role", Uuid::new_v4()),
            &json!({ "role": "User" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let invalid = app
        .put_json(
            &format!("/api/admin/users/{user_id}/role"),
            &json!({ "role": "Curator" }),
            Some(&admin),
        )
        .await?;
    assert!(invalid.status().is_client_error());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn identity_left_behind_by_deletion_can_be_reconciled() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, admin) = app.account_token("admin@example.com", "Admin").await?;
    let (user_id, _) = app.account_token("user@example.com", "User").await?;

    app.identity().fail_deletes(true);
    let deleted = app
        .delete(&format!("/api/admin/users/{user_id}"), Some(&admin))
        .await?;
    assert_eq!(deleted.status(), StatusCode::OK);
    let body = body_json(deleted).await?;
    assert_eq!(body["identity_deleted"], false);
    assert_eq!(app.profile_count("user@example.com").await?, 0);
    assert!(app.identity().contains(user_id).await);

    app.identity().fail_deletes(false);
    let reconciled = app
        .delete(&format!("/api/admin/orphans/{user_id}"), Some(&admin))
        .await?;
    assert_eq!(reconciled.status(), StatusCode::OK);
    assert_eq!(body_json(reconciled).await?["outcome"], "deleted");
    assert!(!app.identity().contains(user_id).await);

    let repeated = app
        .delete(&format!("/api/admin/orphans/{user_id}"), Some(&admin))
        .await?;
    assert_eq!(body_json(repeated).await?["outcome"], "already_gone");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn reconciliation_refuses_identities_with_profiles() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, admin) = app.account_token("admin@example.com", "Admin").await?;
    let (user_id, _) = app.account_token("user@example.com", "User").await?;

    let response = app
        .delete(&format!("/api/admin/orphans/{user_id}"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await?["code"], "PROFILE_EXISTS");
    assert!(app.identity().contains(user_id).await);

    app.cleanup().await?;
    Ok(())
}
