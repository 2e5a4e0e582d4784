use depspider::config::SpiderConfig;
use depspider::error::ErrorCode;
use depspider::model::ImportType;
use depspider::spider::Spider;
use depspider::worker::{ToolRequest, dispatch};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn copy_dir(src: &Path, dst: &Path) {
    std::fs::create_dir_all(dst).unwrap();
    for entry in std::fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        let target = dst.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&path, &target);
        } else {
            std::fs::copy(&path, &target).unwrap();
        }
    }
}

/// Copies a fixture into a fresh temp dir; returns the dir and its
/// canonical root.
fn setup_repo(fixture: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    copy_dir(&fixture_path(fixture), dir.path());
    let root = dir.path().canonicalize().unwrap();
    (dir, root)
}

fn spider_for(root: &Path) -> Spider {
    Spider::with_default_parsers(SpiderConfig::new(root)).unwrap()
}

fn call(spider: &mut Spider, tool: &str, params: Value) -> Value {
    let request = ToolRequest::parse(tool, params).unwrap();
    dispatch(spider, request).unwrap()
}

fn key(root: &Path, rel: &str) -> String {
    root.join(rel).to_string_lossy().to_string()
}

#[test]
fn crawl_reports_the_import_cycle() {
    let (_dir, root) = setup_repo("ts-cycle");
    let mut spider = spider_for(&root);
    let graph = call(
        &mut spider,
        "crawl_dependency_graph",
        json!({"entryFile": "src/main.ts", "maxDepth": 10}),
    );
    assert_eq!(graph["entry"], key(&root, "src/main.ts"));
    assert_eq!(graph["nodes"].as_array().unwrap().len(), 3);
    assert_eq!(graph["edges"].as_array().unwrap().len(), 3);
    let cycles = graph["circularDependencies"].as_array().unwrap();
    assert_eq!(cycles.len(), 1);
    let mut members: Vec<&str> = cycles[0]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    members.sort();
    let mut expected = vec![
        key(&root, "src/a.ts"),
        key(&root, "src/b.ts"),
        key(&root, "src/main.ts"),
    ];
    expected.sort();
    assert_eq!(members, expected);
}

#[test]
fn tsconfig_alias_and_type_only_imports() {
    let (_dir, root) = setup_repo("ts-alias");
    let mut spider = spider_for(&root);
    let node = spider.analyze(&root.join("src/app.ts")).unwrap();

    let service = node
        .dependencies
        .iter()
        .find(|d| d.module_specifier == "@/services/user")
        .expect("alias import resolves");
    assert_eq!(service.target_path, key(&root, "src/services/user.ts"));
    let types = node
        .dependencies
        .iter()
        .find(|d| d.module_specifier == "./types")
        .unwrap();
    assert_eq!(types.import_type, ImportType::TypeOnly);
    assert_eq!(node.unresolved.len(), 1);
    assert_eq!(node.unresolved[0].module_specifier, "lodash");

    let refs = call(
        &mut spider,
        "find_referencing_files",
        json!({"filePath": "src/types.ts"}),
    );
    // Only files analyzed so far are known; app.ts is cached, user.ts not yet.
    assert_eq!(refs["count"], 1);
    call(
        &mut spider,
        "analyze_dependencies",
        json!({"filePath": "src/services/user.ts"}),
    );
    let refs = call(
        &mut spider,
        "find_referencing_files",
        json!({"filePath": "src/types.ts"}),
    );
    assert_eq!(refs["count"], 2);
}

#[test]
fn python_package_imports_resolve() {
    let (_dir, root) = setup_repo("python-project");
    let mut spider = spider_for(&root);
    let graph = call(
        &mut spider,
        "crawl_dependency_graph",
        json!({"entryFile": "app.py", "maxDepth": 5}),
    );
    let mut nodes: Vec<String> = graph["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["path"].as_str().unwrap().to_string())
        .collect();
    nodes.sort();
    let mut expected = vec![
        key(&root, "app.py"),
        key(&root, "services/processor.py"),
        key(&root, "utils/database.py"),
        key(&root, "utils/helpers.py"),
    ];
    expected.sort();
    assert_eq!(nodes, expected);
    let external: Vec<&str> = graph["unresolved"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["moduleSpecifier"].as_str().unwrap())
        .collect();
    assert!(external.contains(&"json"));
    assert!(graph["circularDependencies"].as_array().unwrap().is_empty());
}

#[test]
fn rust_usage_flags_unused_bindings() {
    let (_dir, root) = setup_repo("rust-project");
    let mut spider = spider_for(&root);
    let report = spider
        .verify_dependency_usage(&root.join("main.rs"), None)
        .unwrap();
    let helper = report
        .dependencies
        .iter()
        .find(|d| d.module_specifier == "self::helper")
        .unwrap();
    assert!(helper.used);
    let database = report
        .dependencies
        .iter()
        .find(|d| d.module_specifier == "utils::database")
        .unwrap();
    assert_eq!(database.target_path, key(&root, "utils/database.rs"));
    assert!(database.used);
    assert_eq!(database.unused_bindings, vec!["disconnect_db".to_string()]);
}

#[test]
fn unresolvable_specifier_reports_reason() {
    let (_dir, root) = setup_repo("ts-cycle");
    let mut spider = spider_for(&root);
    let resolution = call(
        &mut spider,
        "resolve_module_path",
        json!({"fromFile": "src/main.ts", "moduleSpecifier": "./missing"}),
    );
    assert_eq!(resolution["resolved"], false);
    assert_eq!(resolution["resolvedPath"], Value::Null);
    assert!(resolution["failureReason"].as_str().unwrap().contains("./missing"));

    let resolution = call(
        &mut spider,
        "resolve_module_path",
        json!({"fromFile": "src/main.ts", "moduleSpecifier": "./a"}),
    );
    assert_eq!(resolution["resolvedPath"], key(&root, "src/a.ts"));
}

#[test]
fn impact_of_a_symbol_with_three_runtime_callers() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    std::fs::write(
        root.join("api.ts"),
        "export function fetchUser(id: string) {\n  return { id };\n}\n",
    )
    .unwrap();
    for name in ["profile", "settings", "admin"] {
        std::fs::write(
            root.join(format!("{name}.ts")),
            format!(
                "import {{ fetchUser }} from './api';\n\nexport function {name}View() {{\n  return fetchUser('{name}');\n}}\n"
            ),
        )
        .unwrap();
    }
    let mut spider = spider_for(&root);
    spider.build_full_index(|_| {}).unwrap();

    let impact = call(
        &mut spider,
        "get_impact_analysis",
        json!({"filePath": "api.ts", "symbolName": "fetchUser"}),
    );
    assert_eq!(impact["impactLevel"], "medium");
    assert_eq!(impact["directImpactCount"], 3);
    assert_eq!(impact["transitiveImpactCount"], 0);
    assert_eq!(impact["affectedFiles"].as_array().unwrap().len(), 3);
}

#[test]
fn breaking_change_detection_through_the_tool() {
    let (_dir, root) = setup_repo("ts-alias");
    let mut spider = spider_for(&root);
    let report = call(
        &mut spider,
        "analyze_breaking_changes",
        json!({
            "filePath": "src/services/user.ts",
            "oldContent": "export async function fetchUser(id: string) { return id; }\n",
            "newContent": "export async function fetchUser(id: string, tenant: string) { return id; }\n",
        }),
    );
    let changes = report["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["symbol"], "fetchUser");
    assert_eq!(changes[0]["change"], "required_parameter_added");
    assert_eq!(changes[0]["severity"], "error");
    assert_eq!(report["hasBreakingChanges"], true);
}

#[test]
fn requests_are_validated_before_dispatch() {
    let (_dir, root) = setup_repo("ts-cycle");
    let mut spider = spider_for(&root);

    let err = ToolRequest::parse(
        "crawl_dependency_graph",
        json!({"entryFile": "src/main.ts", "maxDepth": 99}),
    )
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationError);
    let err = ToolRequest::parse("analyze_dependencies", json!({"path": "src/main.ts"})).unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationError);

    let request =
        ToolRequest::parse("analyze_dependencies", json!({"filePath": "../outside.ts"})).unwrap();
    let err = dispatch(&mut spider, request).unwrap_err();
    assert_eq!(err.code, ErrorCode::SecurityError);

    let request =
        ToolRequest::parse("analyze_dependencies", json!({"filePath": "src/nope.ts"})).unwrap();
    let err = dispatch(&mut spider, request).unwrap_err();
    assert_eq!(err.code, ErrorCode::FileNotFound);
}

#[test]
fn callers_using_a_class_as_type_and_value_count_as_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    std::fs::write(root.join("w.ts"), "export class Widget {\n  size = 1;\n}\n").unwrap();
    for name in ["a", "b", "c"] {
        std::fs::write(
            root.join(format!("{name}.ts")),
            format!(
                "import {{ Widget }} from './w';\n\nexport function make_{name}(): Widget {{\n  return new Widget();\n}}\n"
            ),
        )
        .unwrap();
    }
    let mut spider = spider_for(&root);
    spider.build_full_index(|_| {}).unwrap();

    let dependents = call(
        &mut spider,
        "get_symbol_dependents",
        json!({"filePath": "w.ts", "symbolName": "Widget"}),
    );
    assert_eq!(dependents["dependents"].as_array().unwrap().len(), 3);
    assert_eq!(dependents["runtimeCount"], 3);
    assert_eq!(dependents["typeOnlyCount"], 0);

    let impact = call(
        &mut spider,
        "get_impact_analysis",
        json!({"filePath": "w.ts", "symbolName": "Widget"}),
    );
    assert_eq!(impact["impactLevel"], "medium");
    assert_eq!(impact["directImpactCount"], 3);
    assert_eq!(impact["runtimeDependents"], 3);
    assert_eq!(impact["typeOnlyDependents"], 0);
}

#[test]
fn rejected_invalidation_leaves_the_cache_alone() {
    let (_dir, root) = setup_repo("ts-cycle");
    let mut spider = spider_for(&root);
    spider.analyze(&root.join("src/a.ts")).unwrap();
    let cached = spider.cache().len();

    let request = ToolRequest::parse(
        "invalidate_files",
        json!({"filePaths": ["src/a.ts", "../escape.ts"]}),
    )
    .unwrap();
    let err = dispatch(&mut spider, request).unwrap_err();
    assert_eq!(err.code, ErrorCode::SecurityError);
    assert_eq!(spider.cache().len(), cached);

    let result = call(
        &mut spider,
        "invalidate_files",
        json!({"filePaths": ["src/a.ts"]}),
    );
    assert_eq!(result["invalidated"], json!([key(&root, "src/a.ts")]));
}
