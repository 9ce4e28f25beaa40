use serde_json::{Value, json};

use crate::common::{TestApp, routes};

async fn seed_scoped_resources(app: &TestApp) -> (String, String, String) {
    // alice: one private, one public; bob: one private.
    let (res, _) = app
        .upload_and_confirm(
            "doc", "a.json", b"1", "alice-private", "v1.0.0", &[], json!([]), "alice", None,
        )
        .await;
    assert_eq!(res.status, 200, "{}", res.text);
    let alice_private = res.body["resource_id"].as_str().unwrap().to_string();

    let (res, _) = app
        .upload_and_confirm(
            "doc",
            "a.json",
            b"2",
            "alice-public",
            "v1.0.0",
            &[],
            json!([]),
            "alice",
            Some("PUBLIC"),
        )
        .await;
    assert_eq!(res.status, 200, "{}", res.text);
    let alice_public = res.body["resource_id"].as_str().unwrap().to_string();

    let (res, _) = app
        .upload_and_confirm(
            "doc", "a.json", b"3", "bob-private", "v1.0.0", &[], json!([]), "bob", None,
        )
        .await;
    assert_eq!(res.status, 200, "{}", res.text);
    let bob_private = res.body["resource_id"].as_str().unwrap().to_string();

    (alice_private, alice_public, bob_private)
}

fn item_ids(body: &Value) -> Vec<String> {
    body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn private_scope_returns_only_the_owners_resources() {
    let app = TestApp::spawn().await;
    let (alice_private, alice_public, bob_private) = seed_scoped_resources(&app).await;

    let res = app
        .get(&format!(
            "{}?scope=PRIVATE&owner_id=alice",
            routes::RESOURCES
        ))
        .await;
    let ids = item_ids(&res.body);
    assert!(ids.contains(&alice_private));
    assert!(!ids.contains(&alice_public));
    assert!(!ids.contains(&bob_private));
}

#[tokio::test]
async fn public_scope_returns_public_resources_only() {
    let app = TestApp::spawn().await;
    let (alice_private, alice_public, bob_private) = seed_scoped_resources(&app).await;

    let res = app
        .get(&format!("{}?scope=PUBLIC", routes::RESOURCES))
        .await;
    let ids = item_ids(&res.body);
    assert!(ids.contains(&alice_public));
    assert!(!ids.contains(&alice_private));
    assert!(!ids.contains(&bob_private));
}

#[tokio::test]
async fn ownerless_scope_shows_everything_visible_to_the_owner() {
    let app = TestApp::spawn().await;
    let (alice_private, alice_public, bob_private) = seed_scoped_resources(&app).await;

    let res = app
        .get(&format!("{}?owner_id=alice", routes::RESOURCES))
        .await;
    let ids = item_ids(&res.body);
    assert!(ids.contains(&alice_private));
    assert!(ids.contains(&alice_public));
    assert!(!ids.contains(&bob_private));
}

#[tokio::test]
async fn keyword_matches_name_and_tags() {
    let app = TestApp::spawn().await;

    let (res, _) = app
        .upload_and_confirm(
            "doc",
            "a.json",
            b"1",
            "radar-site",
            "v1.0.0",
            &[],
            json!([]),
            "tester",
            None,
        )
        .await;
    let by_name = res.body["resource_id"].as_str().unwrap().to_string();

    let (res, _) = app
        .upload_and_confirm(
            "doc",
            "a.json",
            b"2",
            "plain-name",
            "v1.0.0",
            &["radar", "sensor"],
            json!([]),
            "tester",
            None,
        )
        .await;
    let by_tag = res.body["resource_id"].as_str().unwrap().to_string();

    app.simple_upload("doc", "a.json", b"3", "unrelated", "v1.0.0")
        .await;

    let res = app
        .get(&format!(
            "{}?owner_id=tester&query=radar",
            routes::RESOURCES
        ))
        .await;
    let ids = item_ids(&res.body);
    assert!(ids.contains(&by_name), "name match missing: {}", res.text);
    assert!(ids.contains(&by_tag), "tag match missing: {}", res.text);
    assert_eq!(res.body["total"], 2);
}

#[tokio::test]
async fn pagination_reports_total_before_slicing() {
    let app = TestApp::spawn().await;

    for i in 0..5 {
        app.simple_upload("doc", "a.json", b"x", &format!("page-{i}"), "v1.0.0")
            .await;
    }

    let res = app
        .get(&format!(
            "{}?owner_id=tester&page=2&size=2",
            routes::RESOURCES
        ))
        .await;
    assert_eq!(res.body["total"], 5);
    assert_eq!(res.body["page"], 2);
    assert_eq!(res.body["size"], 2);
    assert_eq!(res.body["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn deleted_resources_never_appear_in_listings() {
    let app = TestApp::spawn().await;
    let (alice_private, _, _) = seed_scoped_resources(&app).await;

    let res = app.delete(&routes::resource(&alice_private)).await;
    assert_eq!(res.status, 200, "{}", res.text);

    for query in [
        format!("{}?owner_id=alice", routes::RESOURCES),
        format!("{}?scope=PRIVATE&owner_id=alice", routes::RESOURCES),
        format!("{}?type=doc&owner_id=alice", routes::RESOURCES),
    ] {
        let res = app.get(&query).await;
        assert!(
            !item_ids(&res.body).contains(&alice_private),
            "deleted resource leaked into {query}"
        );
    }
}

#[tokio::test]
async fn clear_requires_type_and_soft_deletes_everything() {
    let app = TestApp::spawn().await;
    seed_scoped_resources(&app).await;

    let res = app.post("/api/v1/resources/clear", &json!({})).await;
    assert_eq!(res.status, 400, "{}", res.text);

    let res = app.post("/api/v1/resources/clear?type=doc", &json!({})).await;
    assert_eq!(res.status, 200, "{}", res.text);
    assert_eq!(res.body["cleared"], 3);

    let res = app
        .get(&format!("{}?owner_id=alice", routes::RESOURCES))
        .await;
    assert_eq!(res.body["total"], 0);
}

#[tokio::test]
async fn updating_tags_refreshes_the_sidecar() {
    let app = TestApp::spawn().await;

    let (res, ticket_id) = app
        .upload_and_confirm(
            "model_glb",
            "box.glb",
            b"glb",
            "tagged",
            "v1.0.0",
            &["t1"],
            json!([]),
            "tester",
            None,
        )
        .await;
    assert_eq!(res.status, 200, "{}", res.text);
    let resource_id = res.body["resource_id"].as_str().unwrap().to_string();
    let object_key = ticket_id[38..].to_string();
    let sidecar_key = format!("{object_key}.meta.json");

    app.wait_for_version_state(&resource_id, "ACTIVE").await;
    app.wait_for_file(&sidecar_key).await;

    let res = app
        .patch(
            &routes::resource_tags(&resource_id),
            &json!({ "tags": ["t1", "t2"] }),
        )
        .await;
    assert_eq!(res.status, 200, "{}", res.text);

    // The refresh is asynchronous; poll until the sidecar reflects the
    // new tag set.
    let path = app.object_path(&sidecar_key);
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        if content.contains("t2") {
            let sidecar: Value = serde_json::from_str(&content).unwrap();
            assert_eq!(sidecar["resource_name"], "tagged");
            assert_eq!(sidecar["tags"], json!(["t1", "t2"]));
            assert_eq!(sidecar["type_key"], "model_glb");
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("sidecar never picked up the new tags: {content}");
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn scope_update_flips_visibility() {
    let app = TestApp::spawn().await;
    let (alice_private, _, _) = seed_scoped_resources(&app).await;

    let res = app
        .patch(
            &routes::resource_scope(&alice_private),
            &json!({ "scope": "PUBLIC" }),
        )
        .await;
    assert_eq!(res.status, 200, "{}", res.text);

    let res = app
        .get(&format!("{}?scope=PUBLIC", routes::RESOURCES))
        .await;
    assert!(item_ids(&res.body).contains(&alice_private));
}

#[tokio::test]
async fn rename_and_recategorize_resource() {
    let app = TestApp::spawn().await;

    let created = app
        .post(
            routes::CATEGORIES,
            &json!({ "type_key": "doc", "name": "scenarios" }),
        )
        .await;
    assert_eq!(created.status, 201, "{}", created.text);
    let category_id = created.body["id"].as_str().unwrap().to_string();

    let res = app
        .simple_upload("doc", "a.json", b"x", "old-name", "v1.0.0")
        .await;
    let resource_id = res.body["resource_id"].as_str().unwrap().to_string();

    let res = app
        .patch(
            &routes::resource(&resource_id),
            &json!({ "name": "new-name", "category_id": category_id }),
        )
        .await;
    assert_eq!(res.status, 200, "{}", res.text);

    let got = app.get(&routes::resource(&resource_id)).await;
    assert_eq!(got.body["name"], "new-name");
    assert_eq!(got.body["category_id"], category_id.as_str());
}

#[tokio::test]
async fn set_latest_version_retargets_the_pointer() {
    let app = TestApp::spawn().await;

    let first = app
        .simple_upload("doc", "a.json", b"1", "versioned", "v1.0.0")
        .await;
    let resource_id = first.body["resource_id"].as_str().unwrap().to_string();
    let first_version = first.body["version_id"].as_str().unwrap().to_string();

    let second = app
        .simple_upload("doc", "a.json", b"22", "versioned", "v2.0.0")
        .await;
    let second_version = second.body["version_id"].as_str().unwrap().to_string();

    // The pointer stays on the first version until retargeted explicitly.
    let got = app.get(&routes::resource(&resource_id)).await;
    assert_eq!(got.body["latest_version"]["id"], first_version.as_str());

    let res = app
        .post(
            &format!("/api/v1/resources/{resource_id}/latest"),
            &json!({ "version_id": second_version }),
        )
        .await;
    assert_eq!(res.status, 200, "{}", res.text);

    let got = app.get(&routes::resource(&resource_id)).await;
    assert_eq!(got.body["latest_version"]["id"], second_version.as_str());

    // A version of another resource is rejected.
    let other = app
        .simple_upload("doc", "a.json", b"3", "someone-else", "v1.0.0")
        .await;
    let foreign_version = other.body["version_id"].as_str().unwrap();
    let res = app
        .post(
            &format!("/api/v1/resources/{resource_id}/latest"),
            &json!({ "version_id": foreign_version }),
        )
        .await;
    assert_eq!(res.status, 404, "{}", res.text);
}

#[tokio::test]
async fn process_result_callback_merges_metadata() {
    let app = TestApp::spawn().await;

    let res = app
        .simple_upload("doc", "a.json", b"x", "callback", "v1.0.0")
        .await;
    let resource_id = res.body["resource_id"].as_str().unwrap().to_string();
    let version_id = res.body["version_id"].as_str().unwrap().to_string();

    let res = app
        .patch(
            &routes::process_result(&version_id),
            &json!({ "state": "ACTIVE", "meta_data": { "frames": 120 } }),
        )
        .await;
    assert_eq!(res.status, 200, "{}", res.text);

    let got = app.get(&routes::resource(&resource_id)).await;
    assert_eq!(got.body["latest_version"]["meta_data"]["frames"], 120);

    let res = app
        .patch(
            &routes::process_result("no-such-version"),
            &json!({ "state": "ACTIVE", "meta_data": {} }),
        )
        .await;
    assert_eq!(res.status, 404, "{}", res.text);
}

#[tokio::test]
async fn version_metadata_merge_is_shallow_per_key() {
    let app = TestApp::spawn().await;

    let res = app
        .simple_upload("doc", "a.json", b"x", "meta", "v1.0.0")
        .await;
    let resource_id = res.body["resource_id"].as_str().unwrap().to_string();
    let version_id = res.body["version_id"].as_str().unwrap().to_string();

    let path = format!("/api/v1/resources/versions/{version_id}/metadata");
    app.patch(&path, &json!({ "meta_data": { "a": { "x": 1 }, "b": 1 } }))
        .await;
    app.patch(&path, &json!({ "meta_data": { "a": { "y": 2 } } }))
        .await;

    let got = app.get(&routes::resource(&resource_id)).await;
    let meta = &got.body["latest_version"]["meta_data"];
    // Nested maps are replaced, not deep-merged.
    assert_eq!(meta["a"], json!({ "y": 2 }));
    assert_eq!(meta["b"], 1);
}

#[tokio::test]
async fn resource_types_are_listed_in_config_order() {
    let app = TestApp::spawn().await;

    let res = app.get(routes::RESOURCE_TYPES).await;
    assert_eq!(res.status, 200, "{}", res.text);
    let keys: Vec<&str> = res.body
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["type_key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["doc", "model_glb", "crash", "slowsim"]);

    let doc = &res.body[0];
    assert_eq!(doc["has_processor"], false);
    assert_eq!(res.body[1]["has_processor"], true);
}

#[tokio::test]
async fn category_crud_round_trip() {
    let app = TestApp::spawn().await;

    let created = app
        .post(
            routes::CATEGORIES,
            &json!({ "type_key": "model_glb", "name": "vehicles" }),
        )
        .await;
    assert_eq!(created.status, 201, "{}", created.text);
    let id = created.body["id"].as_str().unwrap().to_string();
    assert_eq!(created.body["parent_id"], "");

    let child = app
        .post(
            routes::CATEGORIES,
            &json!({ "type_key": "model_glb", "name": "tanks", "parent_id": id }),
        )
        .await;
    assert_eq!(child.status, 201);

    let listed = app
        .get(&format!("{}?type=model_glb", routes::CATEGORIES))
        .await;
    assert_eq!(listed.body.as_array().unwrap().len(), 2);

    let res = app
        .patch(&routes::category(&id), &json!({ "name": "ground-vehicles" }))
        .await;
    assert_eq!(res.status, 200, "{}", res.text);

    let res = app.delete(&routes::category(&id)).await;
    assert_eq!(res.status, 200, "{}", res.text);

    let listed = app
        .get(&format!("{}?type=model_glb", routes::CATEGORIES))
        .await;
    assert_eq!(listed.body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn mutations_require_gateway_granted_permissions() {
    let app = TestApp::spawn().await;
    seed_scoped_resources(&app).await;

    // A gateway-identified principal whose grant lacks resource:delete
    // cannot clear a repository.
    let res = app
        .post_as(
            "/api/v1/resources/clear?type=doc",
            &json!({}),
            "bob",
            "resource:read,resource:update",
        )
        .await;
    assert_eq!(res.status, 403, "{}", res.text);
    assert_eq!(res.body["code"], "PERMISSION_DENIED");

    // Uploads are gated on resource:create.
    let res = app
        .post_as(
            routes::UPLOAD_TICKET,
            &json!({ "resource_type": "doc", "filename": "a.json" }),
            "bob",
            "resource:read",
        )
        .await;
    assert_eq!(res.status, 403, "{}", res.text);

    // The right grant goes through.
    let res = app
        .post_as(
            "/api/v1/resources/clear?type=doc",
            &json!({}),
            "bob",
            "resource:delete",
        )
        .await;
    assert_eq!(res.status, 200, "{}", res.text);
    assert_eq!(res.body["cleared"], 3);

    // Requests without gateway headers are trusted local invocations and
    // keep working (the rest of this suite relies on that).
    let res = app.post(routes::RESOURCES_SYNC, &json!({})).await;
    assert_eq!(res.status, 200, "{}", res.text);
}

#[tokio::test]
async fn missing_resource_is_not_found() {
    let app = TestApp::spawn().await;
    let res = app.get(&routes::resource("no-such-id")).await;
    assert_eq!(res.status, 404);
    assert_eq!(res.body["code"], "NOT_FOUND");
}
