use serde_json::json;

use crate::common::{BUCKET, TestApp, routes};

#[tokio::test]
async fn simple_upload_without_processor_is_active_immediately() {
    let app = TestApp::spawn().await;

    let res = app
        .simple_upload("doc", "a.json", b"{\"k\":1}", "d1", "v1.0.0")
        .await;
    assert_eq!(res.body["state"], "ACTIVE");
    let resource_id = res.body["resource_id"].as_str().unwrap();

    let got = app.get(&routes::resource(resource_id)).await;
    assert_eq!(got.status, 200, "{}", got.text);
    assert_eq!(got.body["name"], "d1");
    assert_eq!(got.body["latest_version"]["state"], "ACTIVE");
    assert_eq!(got.body["latest_version"]["version_num"], 1);
    assert_eq!(got.body["latest_version"]["semver"], "v1.0.0");
    // The stat size is authoritative.
    assert_eq!(got.body["latest_version"]["file_size"], 7);
    assert_eq!(
        got.body["latest_version"]["id"],
        res.body["version_id"],
        "latest pointer should target the new version"
    );
}

#[tokio::test]
async fn processor_success_activates_and_merges_metadata() {
    let app = TestApp::spawn().await;

    let res = app
        .simple_upload("model_glb", "box.glb", b"glb-bytes", "box", "v1.0.0")
        .await;
    assert_eq!(res.body["state"], "PENDING");
    let resource_id = res.body["resource_id"].as_str().unwrap();

    let body = app.wait_for_version_state(resource_id, "ACTIVE").await;
    let meta = &body["latest_version"]["meta_data"];
    assert_eq!(meta["poly"], 42);
    assert_eq!(meta["processed_by"], "simhub-worker");
    assert!(meta["processed_at"].is_string());
    assert!(meta["processor_duration_ms"].is_number());
}

#[tokio::test]
async fn processor_failure_marks_version_error_without_sidecar() {
    let app = TestApp::spawn().await;

    let (res, ticket_id) = app
        .upload_and_confirm(
            "crash",
            "sim.bin",
            b"payload",
            "failing",
            "v1.0.0",
            &[],
            json!([]),
            "tester",
            None,
        )
        .await;
    assert_eq!(res.status, 200, "{}", res.text);
    assert_eq!(res.body["state"], "PENDING");
    let resource_id = res.body["resource_id"].as_str().unwrap();

    let body = app.wait_for_version_state(resource_id, "ERROR").await;
    let message = body["latest_version"]["meta_data"]["message"]
        .as_str()
        .unwrap();
    assert!(!message.is_empty());
    assert!(message.contains("exit status"), "message: {message}");

    // No activation, no sidecar refresh.
    let object_key = &ticket_id[38..];
    assert!(
        !app.object_path(&format!("{object_key}.meta.json")).exists(),
        "ERROR version must not get a sidecar"
    );
}

#[tokio::test]
async fn active_version_cannot_be_overwritten() {
    let app = TestApp::spawn().await;

    app.simple_upload("doc", "a.json", b"one", "locked", "v1.0.0")
        .await;

    // A second upload of the same (name, semver) uses a fresh ticket but
    // lands on the same version row.
    let (res, _) = app
        .upload_and_confirm(
            "doc",
            "a.json",
            b"two",
            "locked",
            "v1.0.0",
            &[],
            json!([]),
            "tester",
            None,
        )
        .await;
    assert_eq!(res.status, 409, "{}", res.text);
    assert_eq!(res.body["code"], "CONFLICT");
}

#[tokio::test]
async fn error_version_overwrite_preserves_id_and_number() {
    let app = TestApp::spawn().await;

    let res = app
        .simple_upload("crash", "sim.bin", b"first", "retry-me", "v1.0.0")
        .await;
    let resource_id = res.body["resource_id"].as_str().unwrap().to_string();
    let first_version_id = res.body["version_id"].as_str().unwrap().to_string();

    app.wait_for_version_state(&resource_id, "ERROR").await;

    let (res, _) = app
        .upload_and_confirm(
            "crash",
            "sim.bin",
            b"second",
            "retry-me",
            "v1.0.0",
            &[],
            json!([]),
            "tester",
            None,
        )
        .await;
    assert_eq!(res.status, 200, "{}", res.text);
    assert_eq!(res.body["version_id"], first_version_id.as_str());
    assert_eq!(res.body["version_num"], 1);
    assert_eq!(res.body["state"], "PENDING");
}

#[tokio::test]
async fn double_confirm_of_pending_version_succeeds() {
    let app = TestApp::spawn().await;

    // slowsim's processor never finishes, so the version stays PENDING and
    // the second confirm is an in-place overwrite.
    let (ticket_id, object_key) = app.request_ticket("slowsim", "sim.bin").await;
    app.put_object(&object_key, b"payload").await;

    let req = json!({
        "ticket_id": ticket_id,
        "type_key": "slowsim",
        "name": "twice",
        "owner_id": "tester",
        "semver": "v1.0.0",
        "tags": [],
        "dependencies": [],
    });

    let first = app.post(routes::UPLOAD_CONFIRM, &req).await;
    assert_eq!(first.status, 200, "{}", first.text);

    let second = app.post(routes::UPLOAD_CONFIRM, &req).await;
    assert_eq!(second.status, 200, "{}", second.text);
    assert_eq!(second.body["version_id"], first.body["version_id"]);
    assert_eq!(second.body["version_num"], 1);
}

#[tokio::test]
async fn version_numbers_are_gap_free_per_resource() {
    let app = TestApp::spawn().await;

    for (n, semver) in ["v1.0.0", "v1.1.0", "v2.0.0"].iter().enumerate() {
        let res = app
            .simple_upload("doc", "a.json", b"x", "numbered", semver)
            .await;
        assert_eq!(res.body["version_num"], n as i64 + 1);
    }

    // Numbering is per resource, not global.
    let other = app
        .simple_upload("doc", "a.json", b"x", "other", "v9.0.0")
        .await;
    assert_eq!(other.body["version_num"], 1);
}

#[tokio::test]
async fn confirm_with_malformed_ticket_is_rejected() {
    let app = TestApp::spawn().await;

    let res = app
        .post(
            routes::UPLOAD_CONFIRM,
            &json!({
                "ticket_id": "garbage",
                "type_key": "doc",
                "name": "x",
                "semver": "v1.0.0",
            }),
        )
        .await;
    assert_eq!(res.status, 400, "{}", res.text);
    assert_eq!(res.body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn confirm_without_uploaded_object_is_not_found() {
    let app = TestApp::spawn().await;

    let (ticket_id, _) = app.request_ticket("doc", "a.json").await;
    // No PUT happened.
    let res = app
        .post(
            routes::UPLOAD_CONFIRM,
            &json!({
                "ticket_id": ticket_id,
                "type_key": "doc",
                "name": "ghost",
                "semver": "v1.0.0",
            }),
        )
        .await;
    assert_eq!(res.status, 404, "{}", res.text);
}

#[tokio::test]
async fn ticket_encodes_uuid_and_object_key() {
    let app = TestApp::spawn().await;

    let (ticket_id, object_key) = app.request_ticket("doc", "a.json").await;
    assert_eq!(&ticket_id[36..38], "::");
    assert!(object_key.starts_with("resources/doc/"));
    assert!(object_key.ends_with("/a.json"));
    // The folder token is the ticket uuid.
    assert_eq!(object_key.split('/').nth(2).unwrap(), &ticket_id[..36]);
}

#[tokio::test]
async fn ticket_with_bad_filename_is_rejected() {
    let app = TestApp::spawn().await;

    for bad in [
        "../../etc/passwd",
        "a/b.json",
        ".hidden",
        "",
        // Reserved for sidecars.
        "box.glb.meta.json",
        // The ticket delimiter stays out of object keys.
        "a::b.glb",
    ] {
        let res = app
            .post(
                routes::UPLOAD_TICKET,
                &json!({ "resource_type": "doc", "filename": bad }),
            )
            .await;
        assert_eq!(res.status, 400, "filename {bad:?}: {}", res.text);
    }
}

#[tokio::test]
async fn sts_mode_without_provider_is_rejected() {
    let app = TestApp::spawn().await;

    let res = app
        .post(
            routes::UPLOAD_TICKET,
            &json!({ "resource_type": "doc", "filename": "a.json", "mode": "sts" }),
        )
        .await;
    assert_eq!(res.status, 400, "{}", res.text);
}

#[tokio::test]
async fn upload_apis_fail_fast_without_storage() {
    let app = TestApp::spawn_without_storage().await;

    let res = app
        .post(
            routes::UPLOAD_TICKET,
            &json!({ "resource_type": "doc", "filename": "a.json" }),
        )
        .await;
    assert_eq!(res.status, 503, "{}", res.text);
    assert_eq!(res.body["code"], "STORAGE_UNAVAILABLE");
}

#[tokio::test]
async fn multipart_upload_assembles_and_registers() {
    let app = TestApp::spawn().await;

    let init = app
        .post(
            routes::MULTIPART_INIT,
            &json!({ "resource_type": "doc", "filename": "big.json" }),
        )
        .await;
    assert_eq!(init.status, 200, "{}", init.text);
    let ticket_id = init.body["ticket_id"].as_str().unwrap().to_string();
    let upload_id = init.body["upload_id"].as_str().unwrap().to_string();
    assert_eq!(init.body["bucket"], BUCKET);

    let part_url = app
        .post(
            routes::MULTIPART_PART_URL,
            &json!({ "ticket_id": ticket_id, "upload_id": upload_id, "part_number": 1 }),
        )
        .await;
    assert_eq!(part_url.status, 200, "{}", part_url.text);
    assert!(part_url.body["url"].as_str().unwrap().contains("partNumber=1"));

    // The filesystem backend stages parts on disk; local clients write them
    // directly instead of PUTting to the part URLs.
    let store = app.store.as_ref().unwrap();
    std::fs::write(store.part_path(&upload_id, 1), b"{\"a\":").unwrap();
    std::fs::write(store.part_path(&upload_id, 2), b"1}").unwrap();

    let complete = app
        .post(
            routes::MULTIPART_COMPLETE,
            &json!({
                "ticket_id": ticket_id,
                "upload_id": upload_id,
                "parts": [
                    { "part_number": 1, "etag": "p1" },
                    { "part_number": 2, "etag": "p2" },
                ],
                "type_key": "doc",
                "name": "assembled",
                "owner_id": "tester",
                "semver": "v1.0.0",
            }),
        )
        .await;
    assert_eq!(complete.status, 200, "{}", complete.text);
    assert_eq!(complete.body["state"], "ACTIVE");

    let resource_id = complete.body["resource_id"].as_str().unwrap();
    let got = app.get(&routes::resource(resource_id)).await;
    assert_eq!(got.body["latest_version"]["file_size"], 7);
}
