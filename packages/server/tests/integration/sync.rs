use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;

use server::entity::{resource, resource_version};

use crate::common::{TestApp, routes};

/// Sidecar-based rehydration: wipe the catalog, rescan storage, and the
/// resource comes back with the name and tags the sidecar preserved.
#[tokio::test]
async fn sync_rehydrates_catalog_from_sidecars() {
    let app = TestApp::spawn().await;

    let (res, ticket_id) = app
        .upload_and_confirm(
            "model_glb",
            "box.glb",
            b"glb-bytes",
            "orig",
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
    let folder_uuid = ticket_id[..36].to_string();

    // Activation writes the sidecar.
    app.wait_for_version_state(&resource_id, "ACTIVE").await;
    app.wait_for_file(&format!("{object_key}.meta.json")).await;

    // Simulate catalog loss.
    resource_version::Entity::delete_many()
        .filter(resource_version::Column::ResourceId.eq(resource_id.clone()))
        .exec(&app.db)
        .await
        .unwrap();
    resource::Entity::delete_by_id(resource_id.as_str())
        .exec(&app.db)
        .await
        .unwrap();

    let res = app.post(routes::RESOURCES_SYNC, &json!({})).await;
    assert_eq!(res.status, 200, "{}", res.text);
    assert!(res.body["count"].as_u64().unwrap() >= 1, "{}", res.text);

    // The rehydrated resource uses the uploader-minted folder uuid as id.
    let got = app.get(&routes::resource(&folder_uuid)).await;
    assert_eq!(got.status, 200, "{}", got.text);
    assert_eq!(got.body["name"], "orig");
    assert_eq!(got.body["tags"], json!(["t1"]));
    assert_eq!(got.body["owner_id"], "system-sync");

    let version = &got.body["latest_version"];
    assert_eq!(version["state"], "ACTIVE");
    assert_eq!(version["version_num"], 1);
    assert_eq!(version["semver"], "v1.0.0");
    assert_eq!(version["meta_data"]["imported"], true);
    // Sidecar metadata (processor output) survives the round trip.
    assert_eq!(version["meta_data"]["poly"], 42);
}

#[tokio::test]
async fn sync_is_idempotent_for_known_objects() {
    let app = TestApp::spawn().await;

    let res = app
        .simple_upload("doc", "a.json", b"{}", "known", "v1.0.0")
        .await;
    assert_eq!(res.body["state"], "ACTIVE");

    // Everything in storage is already cataloged.
    let res = app.post(routes::RESOURCES_SYNC, &json!({})).await;
    assert_eq!(res.status, 200, "{}", res.text);
    assert_eq!(res.body["count"], 0);
}

#[tokio::test]
async fn sync_registers_objects_uploaded_behind_the_catalogs_back() {
    let app = TestApp::spawn().await;

    // A plain `.json` object is a primary artifact, not a sidecar.
    app.put_object("resources/doc/manual-folder/notes.json", b"{\"note\":1}")
        .await;

    let res = app.post(routes::RESOURCES_SYNC, &json!({})).await;
    assert_eq!(res.status, 200, "{}", res.text);
    assert_eq!(res.body["count"], 1);

    let listed = app
        .get(&format!("{}?type=doc&scope=PRIVATE&owner_id=system-sync", routes::RESOURCES))
        .await;
    assert_eq!(listed.body["total"], 1, "{}", listed.text);
    let item = &listed.body["items"][0];
    // Folder token is not a UUID, so a fresh id was generated and the
    // filename became the resource name.
    assert_eq!(item["name"], "notes.json");
    assert_eq!(item["latest_version"]["semver"], "v1.0.0");
    assert_eq!(item["latest_version"]["state"], "ACTIVE");
}

#[tokio::test]
async fn sync_without_storage_fails_fast() {
    let app = TestApp::spawn_without_storage().await;
    let res = app.post(routes::RESOURCES_SYNC, &json!({})).await;
    assert_eq!(res.status, 503, "{}", res.text);
}

#[tokio::test]
async fn sync_ignores_objects_outside_the_resources_layout() {
    let app = TestApp::spawn().await;

    app.put_object("resources/too-shallow.bin", b"x").await;
    app.put_object("elsewhere/a/b/c.bin", b"x").await;

    let res = app.post(routes::RESOURCES_SYNC, &json!({})).await;
    assert_eq!(res.status, 200, "{}", res.text);
    assert_eq!(res.body["count"], 0);
}
