//! CLI integration tests running the real `tsr` binary.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use serde::Deserialize;

#[allow(deprecated)]
fn tsr() -> Command {
    let mut cmd = Command::cargo_bin("tsr").unwrap();
    let _ = cmd.env_remove("TESSERA_OUTPUT").env_remove("TESSERA_PACKAGE");
    cmd
}

fn testdata(rel: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../testdata")
        .join(rel)
        .display()
        .to_string()
}

fn yaml_documents(out: &[u8]) -> Vec<serde_json::Value> {
    let text = String::from_utf8(out.to_vec()).expect("stdout should be utf-8");
    serde_yaml::Deserializer::from_str(&text)
        .map(|doc| serde_json::Value::deserialize(doc).expect("should parse document"))
        .collect()
}

// ── tsr build ────────────────────────────────────────────────────────

#[test]
fn build_with_default_values() {
    let output = tsr()
        .args(["build", "-n", "my-namespace", "my-instance"])
        .arg(testdata("cs"))
        .args(["-p", "main", "-o", "yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tcp://example.internal"))
        .get_output()
        .stdout
        .clone();

    let objects = yaml_documents(&output);
    assert_eq!(objects.len(), 2);
    for object in &objects {
        assert_eq!(object["kind"], "ConfigMap");
        assert!(
            object["metadata"]["name"]
                .as_str()
                .is_some_and(|n| n.contains("my-instance"))
        );
        assert!(
            object["metadata"]["namespace"]
                .as_str()
                .is_some_and(|n| n.contains("my-namespace"))
        );
    }
}

#[test]
fn build_outputs_json_list() {
    let output = tsr()
        .args(["build", "-n", "my-namespace", "my-instance"])
        .arg(testdata("cs"))
        .args(["-p", "main", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"List\""))
        .get_output()
        .stdout
        .clone();

    let list: serde_json::Value = serde_json::from_slice(&output).expect("should parse json");
    assert_eq!(list["items"].as_array().map(Vec::len), Some(2));
}

#[test]
fn build_reads_output_format_from_env() {
    let _ = tsr()
        .env("TESSERA_OUTPUT", "json")
        .args(["build", "my-instance"])
        .arg(testdata("cs"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"List\""));
}

#[test]
fn build_with_custom_values() {
    let output = tsr()
        .args(["build", "-n", "my-namespace", "my-instance"])
        .arg(testdata("cs"))
        .arg("-f")
        .arg(testdata("cs-values/example.com.cue"))
        .args(["-p", "main", "-o", "yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tcp://example.com"))
        .get_output()
        .stdout
        .clone();

    let objects = yaml_documents(&output);
    assert_eq!(objects.len(), 2);
    for object in &objects {
        assert_eq!(object["metadata"]["annotations"]["scope"], "external");
    }
}

#[test]
fn build_with_merged_values() {
    let output = tsr()
        .args(["build", "-n", "my-namespace", "my-instance"])
        .arg(testdata("cs"))
        .arg("-f")
        .arg(testdata("cs-values/example.com.cue"))
        .arg("-f")
        .arg(testdata("cs-values/example.io.cue"))
        .arg("-f")
        .arg(testdata("cs-values/client-only.cue"))
        .args(["-p", "main", "-o", "yaml"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let objects = yaml_documents(&output);
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0]["metadata"]["name"], "my-instance-client");
    assert_eq!(objects[0]["metadata"]["annotations"]["scope"], "external");
    assert_eq!(objects[0]["data"]["server"], "tcp://example.io:9090");
}

#[test]
fn build_fails_with_invalid_values() {
    let _ = tsr()
        .args(["build", "-n", "my-namespace", "my-instance"])
        .arg(testdata("cs"))
        .arg("-f")
        .arg(testdata("cs-values/invalid.cue"))
        .args(["-p", "main", "-o", "yaml"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("client.enabled"))
        .stderr(predicate::str::contains("Caused by").not());
}

#[test]
fn build_fails_with_undefined_package() {
    let _ = tsr()
        .args(["build", "-n", "my-namespace", "my-instance"])
        .arg(testdata("cs"))
        .args(["-p", "test", "-o", "yaml"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("cannot find package"));
}

#[test]
fn build_rejects_unknown_output_format() {
    let _ = tsr()
        .args(["build", "my-instance"])
        .arg(testdata("cs"))
        .args(["-o", "toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported output format"));
}

// ── tsr bundle ───────────────────────────────────────────────────────

const BUNDLE: &str = r#"
bundle: {
    apiVersion: "v1alpha1"
    name: "apps"
    instances: {
        frontend: {
            module: url: "oci://ghcr.io/org/frontend"
            namespace: "web"
            values: image: tag: string
        }
        backend: {
            module: {url: "oci://ghcr.io/org/backend", version: "1.2.0"}
            values: replicas: 2
        }
    }
}
"#;

const TAG: &str = r#"bundle: instances: frontend: values: image: tag: "6.5.0""#;

fn bundle_files() -> (tempfile::TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().expect("should create dir");
    let bundle = dir.path().join("bundle.cue");
    let tag = dir.path().join("tag.cue");
    std::fs::write(&bundle, BUNDLE).expect("should write bundle");
    std::fs::write(&tag, TAG).expect("should write overlay");
    (dir, bundle, tag)
}

#[test]
fn bundle_vet_prints_instance_names() {
    let (_dir, bundle, tag) = bundle_files();
    let _ = tsr()
        .args(["bundle", "vet", "-f"])
        .arg(&bundle)
        .arg("-f")
        .arg(&tag)
        .assert()
        .success()
        .stdout("frontend\nbackend\n");
}

#[test]
fn bundle_build_prints_resolved_instances() {
    let (_dir, bundle, tag) = bundle_files();
    let output = tsr()
        .args(["bundle", "build", "-o", "json", "-f"])
        .arg(&bundle)
        .arg("-f")
        .arg(&tag)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let instances: serde_json::Value = serde_json::from_slice(&output).expect("should parse json");
    assert_eq!(instances[0]["name"], "frontend");
    assert_eq!(instances[0]["namespace"], "web");
    assert_eq!(instances[0]["values"]["image"]["tag"], "6.5.0");
    assert_eq!(instances[1]["module"]["repository"], "oci://ghcr.io/org/backend");
    assert_eq!(instances[1]["module"]["version"], "1.2.0");
    assert_eq!(instances[1]["bundle"], "apps");
}

#[test]
fn bundle_build_requires_concrete_values() {
    let (_dir, bundle, _tag) = bundle_files();
    let _ = tsr()
        .args(["bundle", "build", "-f"])
        .arg(&bundle)
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains(
            "bundle.instances.frontend.values.image.tag",
        ));
}

#[test]
fn bundle_rejects_deeply_nested_source() {
    let dir = tempfile::tempdir().expect("should create dir");
    let depth = 2000;
    let text = format!(
        "bundle: instances: app: values: {}1{}\n",
        "{x: ".repeat(depth),
        "}".repeat(depth)
    );
    let bundle = dir.path().join("deep.cue");
    std::fs::write(&bundle, text).expect("should write bundle");

    let _ = tsr()
        .args(["bundle", "vet", "-f"])
        .arg(&bundle)
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("nesting deeper than"));
}

#[test]
fn bundle_requires_files() {
    let _ = tsr().args(["bundle", "vet"]).assert().failure();
}
