use hamly::template_assets;

// registered before main
template_assets!("tests/resources/**/*.haml");

#[test]
fn test_embedded_assets_resolve() {
    let renderer = hamly::get_renderer("tests/resources/page.haml")
        .expect("embedded template was not registered");
    assert_eq!(renderer.required(), &["title".to_string(), "user".to_string()]);

    let out = renderer
        .render(&serde_json::json!({ "title": "Docs", "user": null }))
        .unwrap();
    assert!(out.contains("<title>\nDocs\n</title>\n"));
    assert!(out.contains("Welcome, guest"));
}

#[test]
fn test_nested_asset_path() {
    let renderer = hamly::get_renderer("tests/resources/partials/list.haml").unwrap();
    assert_eq!(renderer.required(), &["items".to_string()]);
    let out = renderer
        .render(&serde_json::json!({ "items": [{ "kind": "new", "name": "a&b" }] }))
        .unwrap();
    assert_eq!(out, "<ul>\n<li class='new'>\n- a&amp;b\n</li>\n</ul>\n");
}

#[test]
fn test_embedded_page_with_user() {
    let renderer = hamly::get_renderer("tests/resources/page.haml").unwrap();
    let out = renderer
        .render(&serde_json::json!({ "title": "Docs", "user": { "name": "Ann" } }))
        .unwrap();
    assert!(out.contains("<h1 class='title' id='top'>\nDocs\n</h1>\n"));
    assert!(out.contains("Hello,\nAnn\n"));
    assert!(out.contains("<a href='/about'>\nAbout\n</a>\n"));
}
