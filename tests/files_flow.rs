mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, expect_error, expect_json, FakeStorage, RecordingNotifier, TestApp};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct FileInfo {
    id: Uuid,
    file_name: String,
    version: i32,
    parent_file_id: Option<Uuid>,
    is_deliverable: bool,
    can_client_access: bool,
    delivered_at: Option<String>,
}

#[derive(Deserialize)]
struct FileResponse {
    file: FileInfo,
}

#[derive(Deserialize)]
struct FileVersionsResponse {
    versions: Vec<FileInfo>,
}

#[derive(Deserialize)]
struct FileDownload {
    url: String,
    expires_in: u64,
    file_name: String,
    version: i32,
}

struct Scenario {
    app: TestApp,
    client: Uuid,
    lawyer: Uuid,
    client_token: String,
    lawyer_token: String,
    consultation: Uuid,
}

/// A consultation already in progress with one assigned lawyer.
async fn in_progress() -> Result<Scenario> {
    let app = TestApp::new().await?;
    let client = app.insert_user("Clara Client", "client", true).await?;
    let admin = app.insert_user("Ada Admin", "admin", false).await?;
    let lawyer = app.insert_user("Lena Lawyer", "lawyer", false).await?;
    let client_token = app.token(client, "client")?;
    let admin_token = app.token(admin, "admin")?;
    let lawyer_token = app.token(lawyer, "lawyer")?;

    let consultation = app
        .create_consultation(&client_token, &[("description", "Franchise agreement")])
        .await?;
    let response = app
        .post_json(
            &format!("/api/consultations/{consultation}/lawyers"),
            &json!({ "lawyer_ids": [lawyer] }),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    Ok(Scenario {
        app,
        client,
        lawyer,
        client_token,
        lawyer_token,
        consultation,
    })
}

async fn upload(
    app: &TestApp,
    consultation: Uuid,
    file_name: &str,
    bytes: &[u8],
    fields: &[(&str, &str)],
    token: &str,
) -> Result<FileInfo> {
    let response = app
        .post_multipart(
            &format!("/api/consultations/{consultation}/files"),
            fields,
            &[("file", file_name, bytes)],
            token,
        )
        .await?;
    let body: FileResponse = expect_json(response, StatusCode::CREATED).await?;
    Ok(body.file)
}

#[tokio::test]
async fn re_uploads_extend_the_version_chain() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let s = in_progress().await?;
    let app = &s.app;
    let cid = s.consultation;

    let v1 = upload(app, cid, "brief.pdf", b"first", &[], &s.client_token).await?;
    let v2 = upload(
        app,
        cid,
        "brief.pdf",
        b"second",
        &[("version_notes", "fixed typos")],
        &s.client_token,
    )
    .await?;
    let v3 = upload(app, cid, "brief.pdf", b"third", &[], &s.lawyer_token).await?;
    let other = upload(app, cid, "evidence.png", b"png", &[], &s.client_token).await?;

    assert_eq!((v1.version, v2.version, v3.version), (1, 2, 3));
    assert_eq!(v1.parent_file_id, None);
    assert_eq!(v2.parent_file_id, Some(v1.id));
    assert_eq!(v3.parent_file_id, Some(v1.id));
    assert_eq!(other.version, 1);
    assert_eq!(app.storage().object_count().await, 4);

    let stored = app
        .storage()
        .get(&format!("consultations/{cid}/{}", v2.id))
        .await;
    assert_eq!(stored.map(|object| object.bytes), Some(b"second".to_vec()));

    for id in [v1.id, v2.id, v3.id] {
        let response = app
            .get(
                &format!("/api/consultations/{cid}/files/{id}/latest"),
                Some(&s.client_token),
            )
            .await?;
        let latest: FileResponse = expect_json(response, StatusCode::OK).await?;
        assert_eq!(latest.file.id, v3.id);
        assert_eq!(latest.file.version, 3);
    }

    let response = app
        .get(
            &format!("/api/consultations/{cid}/files/{}/versions", v3.id),
            Some(&s.client_token),
        )
        .await?;
    let chain: FileVersionsResponse = expect_json(response, StatusCode::OK).await?;
    let versions: Vec<i32> = chain.versions.iter().map(|file| file.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    assert!(chain.versions.iter().all(|file| file.file_name == "brief.pdf"));

    Ok(())
}

#[tokio::test]
async fn deleting_a_root_promotes_the_next_version() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let s = in_progress().await?;
    let app = &s.app;
    let cid = s.consultation;

    let v1 = upload(app, cid, "memo.docx", b"one", &[], &s.client_token).await?;
    let v2 = upload(app, cid, "memo.docx", b"two", &[], &s.lawyer_token).await?;
    let v3 = upload(app, cid, "memo.docx", b"three", &[], &s.client_token).await?;

    let response = app
        .delete(
            &format!("/api/consultations/{cid}/files/{}", v3.id),
            Some(&s.lawyer_token),
        )
        .await?;
    assert_eq!(expect_error(response, StatusCode::FORBIDDEN).await?, "permission");

    let response = app
        .delete(
            &format!("/api/consultations/{cid}/files/{}", v1.id),
            Some(&s.client_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.storage().object_count().await, 2);

    let response = app
        .get(
            &format!("/api/consultations/{cid}/files/{}/versions", v3.id),
            Some(&s.client_token),
        )
        .await?;
    let chain: FileVersionsResponse = expect_json(response, StatusCode::OK).await?;
    assert_eq!(chain.versions.len(), 2);
    assert_eq!(chain.versions[0].id, v2.id);
    assert_eq!(chain.versions[0].parent_file_id, None);
    assert_eq!(chain.versions[1].parent_file_id, Some(v2.id));

    let v4 = upload(app, cid, "memo.docx", b"four", &[], &s.client_token).await?;
    assert_eq!(v4.version, 4);
    assert_eq!(v4.parent_file_id, Some(v2.id));

    let response = app
        .get(
            &format!("/api/consultations/{cid}/files/{}/latest", v1.id),
            Some(&s.client_token),
        )
        .await?;
    assert_eq!(expect_error(response, StatusCode::NOT_FOUND).await?, "not_found");

    Ok(())
}

#[tokio::test]
async fn deliverables_stay_locked_until_delivered() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let s = in_progress().await?;
    let app = &s.app;
    let cid = s.consultation;

    let attachment = upload(app, cid, "facts.pdf", b"facts", &[], &s.client_token).await?;
    assert!(!attachment.is_deliverable);
    assert!(attachment.can_client_access);

    let response = app
        .post_multipart(
            &format!("/api/consultations/{cid}/files"),
            &[("category", "deliverable")],
            &[("file", "opinion.pdf", b"client cannot".as_slice())],
            &s.client_token,
        )
        .await?;
    assert_eq!(expect_error(response, StatusCode::FORBIDDEN).await?, "permission");

    let opinion = upload(
        app,
        cid,
        "opinion.pdf",
        b"legal opinion",
        &[("category", "deliverable")],
        &s.lawyer_token,
    )
    .await?;
    assert!(opinion.is_deliverable);
    assert!(!opinion.can_client_access);
    assert!(opinion.delivered_at.is_none());

    let download_path = format!("/api/consultations/{cid}/files/{}/download", opinion.id);
    let response = app.get(&download_path, Some(&s.client_token)).await?;
    assert_eq!(expect_error(response, StatusCode::FORBIDDEN).await?, "permission");

    let response = app
        .get(
            &format!("/api/consultations/{cid}/files/{}/versions", opinion.id),
            Some(&s.client_token),
        )
        .await?;
    let hidden: FileVersionsResponse = expect_json(response, StatusCode::OK).await?;
    assert!(hidden.versions.is_empty());

    let latest_path = format!("/api/consultations/{cid}/files/{}/latest", opinion.id);
    let response = app.get(&latest_path, Some(&s.client_token)).await?;
    assert_eq!(expect_error(response, StatusCode::NOT_FOUND).await?, "not_found");

    let response = app.get(&latest_path, Some(&s.lawyer_token)).await?;
    let staff_latest: FileResponse = expect_json(response, StatusCode::OK).await?;
    assert_eq!(staff_latest.file.id, opinion.id);

    let response = app.get(&download_path, Some(&s.lawyer_token)).await?;
    let staff_link: FileDownload = expect_json(response, StatusCode::OK).await?;
    assert!(staff_link.url.contains(&opinion.id.to_string()));

    let response = app
        .get(
            &format!("/api/consultations/{cid}/files/{}/download", attachment.id),
            Some(&s.client_token),
        )
        .await?;
    let client_link: FileDownload = expect_json(response, StatusCode::OK).await?;
    assert_eq!(client_link.expires_in, 600);
    assert_eq!(client_link.file_name, "facts.pdf");
    assert_eq!(client_link.version, 1);

    Ok(())
}

#[tokio::test]
async fn delivery_unlocks_and_notifies_the_client() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let s = in_progress().await?;
    let app = &s.app;
    let cid = s.consultation;

    let attachment = upload(app, cid, "facts.pdf", b"facts", &[], &s.client_token).await?;
    let opinion = upload(
        app,
        cid,
        "opinion.pdf",
        b"legal opinion",
        &[("category", "deliverable")],
        &s.lawyer_token,
    )
    .await?;

    let response = app
        .post_json(
            &format!("/api/consultations/{cid}/confirm-delivery"),
            &json!({}),
            Some(&s.client_token),
        )
        .await?;
    assert_eq!(expect_error(response, StatusCode::CONFLICT).await?, "state_conflict");

    let response = app
        .post_json(
            &format!("/api/consultations/{cid}/files/{}/deliver", opinion.id),
            &json!({}),
            Some(&s.client_token),
        )
        .await?;
    assert_eq!(expect_error(response, StatusCode::FORBIDDEN).await?, "permission");

    let response = app
        .post_json(
            &format!("/api/consultations/{cid}/files/{}/deliver", attachment.id),
            &json!({}),
            Some(&s.lawyer_token),
        )
        .await?;
    assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await?, "validation");

    let deliver_path = format!("/api/consultations/{cid}/files/{}/deliver", opinion.id);
    let response = app
        .post_json(&deliver_path, &json!({}), Some(&s.lawyer_token))
        .await?;
    let delivered: FileResponse = expect_json(response, StatusCode::OK).await?;
    assert!(delivered.file.can_client_access);
    assert!(delivered.file.delivered_at.is_some());

    let response = app
        .post_json(&deliver_path, &json!({}), Some(&s.lawyer_token))
        .await?;
    assert_eq!(expect_error(response, StatusCode::CONFLICT).await?, "state_conflict");

    let response = app
        .get(
            &format!("/api/consultations/{cid}/files/{}/download", opinion.id),
            Some(&s.client_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let pushes = app
        .notifier()
        .sent_to(s.client, "consultation_delivery")
        .await;
    assert_eq!(pushes.len(), 1);
    assert_eq!(
        pushes[0].data.get("file_id").map(String::as_str),
        Some(opinion.id.to_string().as_str())
    );
    assert!(app
        .notifier()
        .sent_to(s.lawyer, "consultation_delivery")
        .await
        .is_empty());

    let response = app
        .post_json(
            &format!("/api/consultations/{cid}/confirm-delivery"),
            &json!({}),
            Some(&s.client_token),
        )
        .await?;
    let detail: Value = expect_json(response, StatusCode::OK).await?;
    assert!(!detail["consultation"]["client_confirmed_at"].is_null());
    assert!(!detail["consultation"]["lawyer_delivered_at"].is_null());
    assert_eq!(detail["status_logs"][0]["reason"], "Client confirmed delivery");
    assert_eq!(detail["status_logs"][1]["reason"], "Delivered file: opinion.pdf");

    let response = app
        .post_json(
            &format!("/api/consultations/{cid}/confirm-delivery"),
            &json!({}),
            Some(&s.client_token),
        )
        .await?;
    assert_eq!(expect_error(response, StatusCode::CONFLICT).await?, "state_conflict");

    let revision = upload(
        app,
        cid,
        "opinion.pdf",
        b"revised opinion",
        &[("category", "deliverable")],
        &s.lawyer_token,
    )
    .await?;
    assert_eq!(revision.version, 2);

    let latest_path = format!("/api/consultations/{cid}/files/{}/latest", revision.id);
    let response = app.get(&latest_path, Some(&s.client_token)).await?;
    let client_latest: FileResponse = expect_json(response, StatusCode::OK).await?;
    assert_eq!(client_latest.file.id, opinion.id);

    let response = app.get(&latest_path, Some(&s.lawyer_token)).await?;
    let staff_latest: FileResponse = expect_json(response, StatusCode::OK).await?;
    assert_eq!(staff_latest.file.id, revision.id);

    Ok(())
}

#[tokio::test]
async fn closed_consultations_reject_uploads() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let client = app.insert_user("Clara Client", "client", true).await?;
    let token = app.token(client, "client")?;
    let cid = app
        .create_consultation(&token, &[("description", "Quick question")])
        .await?;

    let response = app
        .post_multipart(
            &format!("/api/consultations/{cid}/files"),
            &[],
            &[("file", "notes.txt", b"plain text".as_slice())],
            &token,
        )
        .await?;
    assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await?, "validation");

    let response = app
        .post_multipart(
            &format!("/api/consultations/{cid}/files"),
            &[],
            &[("file", "empty.pdf", b"".as_slice())],
            &token,
        )
        .await?;
    assert_eq!(expect_error(response, StatusCode::BAD_REQUEST).await?, "validation");

    let response = app
        .post_json(
            &format!("/api/consultations/{cid}/withdraw"),
            &json!({ "reason": "No longer needed" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_multipart(
            &format!("/api/consultations/{cid}/files"),
            &[],
            &[("file", "late.pdf", b"too late".as_slice())],
            &token,
        )
        .await?;
    assert_eq!(expect_error(response, StatusCode::CONFLICT).await?, "state_conflict");
    assert_eq!(app.storage().object_count().await, 0);

    Ok(())
}

#[tokio::test]
async fn failed_blob_writes_leave_the_ledger_untouched() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app =
        TestApp::with_doubles(FakeStorage::failing_from_put(1), RecordingNotifier::default())
            .await?;
    let client = app.insert_user("Clara Client", "client", true).await?;
    let token = app.token(client, "client")?;
    let cid = app
        .create_consultation(&token, &[("description", "Tenancy deposit")])
        .await?;

    let response = app
        .post_multipart(
            &format!("/api/consultations/{cid}/files"),
            &[],
            &[("file", "lease.pdf", b"lease".as_slice())],
            &token,
        )
        .await?;
    assert_eq!(expect_error(response, StatusCode::BAD_GATEWAY).await?, "dependency");
    assert_eq!(app.storage().object_count().await, 0);

    let detail: Value = expect_json(
        app.get(&format!("/api/consultations/{cid}"), Some(&token))
            .await?,
        StatusCode::OK,
    )
    .await?;
    assert_eq!(detail["files"].as_array().map(Vec::len), Some(0));

    Ok(())
}
