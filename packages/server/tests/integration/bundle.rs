use std::io::Read;

use serde_json::{Value, json};

use crate::common::{TestApp, routes};

struct Uploaded {
    resource_id: String,
    version_id: String,
}

async fn upload_doc(app: &TestApp, name: &str, payload: &[u8]) -> Uploaded {
    let res = app
        .simple_upload("doc", "payload.bin", payload, name, "v1.0.0")
        .await;
    Uploaded {
        resource_id: res.body["resource_id"].as_str().unwrap().to_string(),
        version_id: res.body["version_id"].as_str().unwrap().to_string(),
    }
}

async fn link(app: &TestApp, source_version: &str, target_resource: &str) {
    let res = app
        .patch(
            &routes::dependencies(source_version),
            &json!([{ "target_resource_id": target_resource, "constraint": "latest" }]),
        )
        .await;
    assert_eq!(res.status, 200, "{}", res.text);
}

#[tokio::test]
async fn dependency_tree_terminates_on_cycles() {
    let app = TestApp::spawn().await;

    let a = upload_doc(&app, "A", b"a").await;
    let b = upload_doc(&app, "B", b"b").await;
    let c = upload_doc(&app, "C", b"c").await;

    // A -> B -> C -> A
    link(&app, &a.version_id, &b.resource_id).await;
    link(&app, &b.version_id, &c.resource_id).await;
    link(&app, &c.version_id, &a.resource_id).await;

    let res = app.get(&routes::dependency_tree(&a.version_id)).await;
    assert_eq!(res.status, 200, "{}", res.text);

    // Finite, and B and C each expanded exactly once.
    let text = res.text;
    let count = |needle: &str| text.matches(needle).count();
    assert_eq!(count(&format!("\"version_id\":\"{}\"", b.version_id)), 1);
    assert_eq!(count(&format!("\"version_id\":\"{}\"", c.version_id)), 1);

    let tree = res.body.as_array().unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0]["resource_name"], "B");
    assert_eq!(tree[0]["dependencies"][0]["resource_name"], "C");
}

#[tokio::test]
async fn dependency_tree_of_unknown_version_is_not_found() {
    let app = TestApp::spawn().await;
    let res = app.get(&routes::dependency_tree("missing")).await;
    assert_eq!(res.status, 404);
}

#[tokio::test]
async fn direct_dependencies_are_listed() {
    let app = TestApp::spawn().await;

    let root = upload_doc(&app, "root", b"r").await;
    let dep = upload_doc(&app, "dep", b"d").await;
    link(&app, &root.version_id, &dep.resource_id).await;

    let res = app.get(&routes::dependencies(&root.version_id)).await;
    assert_eq!(res.status, 200, "{}", res.text);
    let deps = res.body.as_array().unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0]["target_resource_id"], dep.resource_id.as_str());
    assert_eq!(deps[0]["constraint"], "latest");
}

#[tokio::test]
async fn updating_dependencies_on_missing_version_is_rejected() {
    let app = TestApp::spawn().await;
    let res = app
        .patch(
            &routes::dependencies("no-such-version"),
            &json!([{ "target_resource_id": "x", "constraint": "latest" }]),
        )
        .await;
    assert_eq!(res.status, 409, "{}", res.text);
}

#[tokio::test]
async fn bundle_enumerates_transitive_closure_once() {
    let app = TestApp::spawn().await;

    let r = upload_doc(&app, "R", b"r").await;
    let m = upload_doc(&app, "M", b"m").await;
    let t = upload_doc(&app, "T", b"t").await;
    link(&app, &r.version_id, &m.resource_id).await;
    link(&app, &m.version_id, &t.resource_id).await;

    let res = app.get(&routes::bundle(&r.version_id)).await;
    assert_eq!(res.status, 200, "{}", res.text);
    let items = res.body.as_object().unwrap();
    assert_eq!(items.len(), 3);
    for version_id in [&r.version_id, &m.version_id, &t.version_id] {
        let item = &items[version_id.as_str()];
        assert!(item["download_url"].as_str().unwrap().contains("X-SimHub-Expires="));
        assert_eq!(item["size"], 1);
    }
}

#[tokio::test]
async fn bundle_zip_contains_manifest_and_all_payloads() {
    let app = TestApp::spawn().await;

    let r = upload_doc(&app, "R", b"r").await;
    let m = upload_doc(&app, "M", b"m").await;
    let t = upload_doc(&app, "T", b"t").await;
    link(&app, &r.version_id, &m.resource_id).await;
    link(&app, &m.version_id, &t.resource_id).await;

    let res = app
        .client
        .get(format!(
            "http://{}{}",
            app.addr,
            routes::download_pack(&r.version_id)
        ))
        .send()
        .await
        .expect("Failed to download bundle");
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(
        res.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/zip")
    );
    let bytes = res.bytes().await.unwrap();

    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mut archive = zip::ZipArchive::new(cursor).expect("not a valid zip");
    assert_eq!(archive.len(), 4, "manifest plus three payloads");

    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert!(names.contains(&"manifest.json".to_string()));
    for name in ["R", "M", "T"] {
        assert!(
            names
                .iter()
                .any(|n| n.starts_with(&format!("resources/doc/{name}-v1.0.0/"))),
            "entry for {name} missing in {names:?}"
        );
    }

    let mut manifest_raw = String::new();
    archive
        .by_name("manifest.json")
        .unwrap()
        .read_to_string(&mut manifest_raw)
        .unwrap();
    let manifest: Value = serde_json::from_str(&manifest_raw).unwrap();
    assert_eq!(manifest["root_version_id"], r.version_id.as_str());
    assert!(manifest["generated_at"].is_string());
    assert_eq!(manifest["items"].as_array().unwrap().len(), 3);

    // Payload bytes survive the round trip.
    let entry_name = names
        .iter()
        .find(|n| n.starts_with("resources/doc/T-"))
        .unwrap();
    let mut payload = Vec::new();
    archive
        .by_name(entry_name)
        .unwrap()
        .read_to_end(&mut payload)
        .unwrap();
    assert_eq!(payload, b"t");
}

#[tokio::test]
async fn bundle_zip_skips_entries_with_missing_blobs() {
    let app = TestApp::spawn().await;

    let r = upload_doc(&app, "R", b"r").await;
    let m = upload_doc(&app, "M", b"m").await;
    link(&app, &r.version_id, &m.resource_id).await;

    // Remove M's blob behind the catalog's back.
    let bundle = app.get(&routes::bundle(&m.version_id)).await;
    let file_path = bundle.body[&m.version_id]["file_path"].as_str().unwrap();
    std::fs::remove_file(app.object_path(file_path)).unwrap();

    let res = app
        .client
        .get(format!(
            "http://{}{}",
            app.addr,
            routes::download_pack(&r.version_id)
        ))
        .send()
        .await
        .unwrap();
    let bytes = res.bytes().await.unwrap();

    let cursor = std::io::Cursor::new(bytes.to_vec());
    let archive = zip::ZipArchive::new(cursor).expect("archive should still complete");
    // Manifest plus R's payload; M's entry is skipped.
    assert_eq!(archive.len(), 2);
}

#[tokio::test]
async fn download_pack_of_unknown_version_is_not_found() {
    let app = TestApp::spawn().await;
    let res = app.get(&routes::download_pack("missing")).await;
    assert_eq!(res.status, 404);
}
