use assert_cmd::Command;
use assert_cmd::cargo;
use flate2::Compression;
use flate2::write::GzEncoder;
use mockito::{Mock, Server, ServerGuard};
use predicates::prelude::*;
use sha2::{Digest, Sha256};
use std::path::Path;
use tar::Builder;
use tempfile::{TempDir, tempdir};

fn create_module_tar_gz(name: &str, version: &str, deps: &[(&str, &str)]) -> Vec<u8> {
    let dependencies: Vec<String> = deps
        .iter()
        .map(|(dep, spec)| format!(r#"{{"name":"{}","version":"{}"}}"#, dep, spec))
        .collect();
    let manifest = format!(
        r#"{{"name":"{}","version":"{}","kind":{{"type":"subsystem"}},
            "dependencies":[{}],"public_include_folder":"Include",
            "schema_files":["Config/{}.fbs"]}}"#,
        name,
        version,
        dependencies.join(","),
        name
    );
    let top = format!("{}-{}", name, version);
    let files = [
        (format!("{}/module.json", top), manifest),
        (format!("{}/Include/{}.h", top, name), "#pragma once\n".to_string()),
        (format!("{}/Config/{}.fbs", top, name), "table Config {}\n".to_string()),
    ];

    let mut tar_builder = Builder::new(Vec::new());
    for (path, content) in &files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_path(path).unwrap();
        header.set_mode(0o644);
        header.set_cksum();
        tar_builder.append(&header, content.as_bytes()).unwrap();
    }
    let tar = tar_builder.into_inner().unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    std::io::Write::write_all(&mut encoder, &tar).unwrap();
    encoder.finish().unwrap()
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Serves a two-level catalog plus one archive per release.
struct Registry {
    server: ServerGuard,
    modules: Vec<(String, String, Vec<(String, String)>, Option<String>)>,
    mocks: Vec<Mock>,
}

impl Registry {
    fn new() -> Self {
        Self {
            server: Server::new(),
            modules: Vec::new(),
            mocks: Vec::new(),
        }
    }

    fn module(mut self, name: &str, version: &str, deps: &[(&str, &str)]) -> Self {
        let deps = deps
            .iter()
            .map(|(d, s)| (d.to_string(), s.to_string()))
            .collect();
        self.modules
            .push((name.to_string(), version.to_string(), deps, None));
        self
    }

    /// Publishes a release whose advertised checksum does not match its archive.
    fn corrupted_module(mut self, name: &str, version: &str) -> Self {
        self.modules.push((
            name.to_string(),
            version.to_string(),
            Vec::new(),
            Some("00".repeat(32)),
        ));
        self
    }

    fn catalog_url(&self) -> String {
        format!("{}/catalog/index.json", self.server.url())
    }

    fn serve(mut self) -> Self {
        let url = self.server.url();
        let mut names: Vec<&str> = self.modules.iter().map(|m| m.0.as_str()).collect();
        names.sort();
        names.dedup();

        let entries: Vec<String> = names
            .iter()
            .map(|name| format!(r#"{{"name":"{}","url":"{}/releases.json"}}"#, name, name))
            .collect();
        let mut mocks = vec![
            self.server
                .mock("GET", "/catalog/index.json")
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(format!("[{}]", entries.join(",")))
                .create(),
        ];

        for name in names {
            let mut releases = Vec::new();
            for (_, version, deps, bad_checksum) in self.modules.iter().filter(|m| m.0 == name) {
                let pairs: Vec<(&str, &str)> =
                    deps.iter().map(|(d, s)| (d.as_str(), s.as_str())).collect();
                let archive = create_module_tar_gz(name, version, &pairs);
                let sha256 = bad_checksum.clone().unwrap_or_else(|| sha256_hex(&archive));
                let path = format!("/artifacts/{}-{}.tar.gz", name, version);
                mocks.push(
                    self.server
                        .mock("GET", path.as_str())
                        .with_status(200)
                        .with_body(archive)
                        .create(),
                );
                let deps_json: Vec<String> = deps
                    .iter()
                    .map(|(d, s)| format!(r#"{{"name":"{}","version":"{}"}}"#, d, s))
                    .collect();
                releases.push(format!(
                    r#"{{"version":"{}","url":"{}{}","sha256":"{}",
                        "kind":{{"type":"subsystem"}},"dependencies":[{}]}}"#,
                    version,
                    url,
                    path,
                    sha256,
                    deps_json.join(",")
                ));
            }
            mocks.push(
                self.server
                    .mock("GET", format!("/catalog/{}/releases.json", name).as_str())
                    .with_status(200)
                    .with_header("content-type", "application/json")
                    .with_body(format!(
                        r#"{{"name":"{}","releases":[{}]}}"#,
                        name,
                        releases.join(",")
                    ))
                    .create(),
            );
        }
        self.mocks = mocks;
        self
    }
}

fn modman(workspace: &Path, config_home: &TempDir) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("modman"));
    cmd.arg("--workspace")
        .arg(workspace)
        .env("XDG_CONFIG_HOME", config_home.path())
        .env("HOME", config_home.path())
        .env_remove("MODMAN_WORKSPACE")
        .env_remove("MODMAN_CATALOG_URL")
        .env_remove("MODMAN_JOBS")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_end_to_end_install_and_query() {
    let registry = Registry::new()
        .module("nos.core", "2.1.0", &[])
        .module("nos.core", "2.1.3", &[])
        .module("nos.sys.vulkan", "5.3.0", &[("nos.core", "2.1")])
        .serve();
    let ws = tempdir().unwrap();
    let home = tempdir().unwrap();

    modman(ws.path(), &home)
        .args(["init", "--catalog-url", &registry.catalog_url()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized empty workspace"));

    modman(ws.path(), &home)
        .args(["install", "nos.sys.vulkan", "5.3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("installed nos.core-2.1.3"))
        .stdout(predicate::str::contains("installed nos.sys.vulkan-5.3.0"));

    let module_dir = ws.path().join("Module").join("nos.sys.vulkan-5.3.0");
    assert!(module_dir.join("module.json").is_file());
    assert!(module_dir.join("Include").join("nos.sys.vulkan.h").is_file());
    assert!(ws.path().join("Module").join("nos.core-2.1.3").is_dir());
    assert!(!ws.path().join("Module").join("nos.core-2.1.0").exists());

    modman(ws.path(), &home)
        .args(["info", "nos.sys.vulkan", "5.3", "version"])
        .assert()
        .success()
        .stdout("5.3.0\n");

    modman(ws.path(), &home)
        .args(["info", "nos.sys.vulkan", "5.3", "include_folder"])
        .assert()
        .success()
        .stdout(predicate::str::ends_with("Include\n"));

    modman(ws.path(), &home)
        .args(["info", "nos.sys.vulkan", "5.3.0", "dependencies"])
        .assert()
        .success()
        .stdout("[{\"name\":\"nos.core\",\"version\":\"2.1\"}]\n");

    modman(ws.path(), &home)
        .args(["info", "nos.core", "2.1", "--record"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"version\": \"2.1.3\""));

    modman(ws.path(), &home)
        .args(["list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nos.core-2.1.3"))
        .stdout(predicate::str::contains("nos.sys.vulkan-5.3.0"));

    // A second install finds everything in place.
    modman(ws.path(), &home)
        .args(["install", "nos.sys.vulkan", "5.3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("installed").not());
}

#[test]
fn test_rescan_and_remove() {
    let registry = Registry::new()
        .module("nos.core", "1.4.2", &[])
        .module("nos.net", "1.0.0", &[("nos.core", "1.4")])
        .serve();
    let ws = tempdir().unwrap();
    let home = tempdir().unwrap();

    modman(ws.path(), &home)
        .args(["init", "--catalog-url", &registry.catalog_url()])
        .assert()
        .success();
    modman(ws.path(), &home)
        .args(["install", "nos.net", "1.0"])
        .assert()
        .success();

    std::fs::remove_dir_all(ws.path().join("Module").join("nos.core-1.4.2")).unwrap();
    modman(ws.path(), &home)
        .args(["rescan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dropped nos.core-1.4.2"))
        .stdout(predicate::str::contains("Indexed 1 module(s)"));

    modman(ws.path(), &home)
        .args(["info", "nos.core", "1.4", "install_path"])
        .assert()
        .code(5);

    modman(ws.path(), &home)
        .args(["remove", "nos.net", "1.0.0"])
        .assert()
        .success();
    assert!(!ws.path().join("Module").join("nos.net-1.0.0").exists());

    modman(ws.path(), &home)
        .args(["list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No modules installed."));

    modman(ws.path(), &home)
        .args(["remove", "nos.net", "1.0.0"])
        .assert()
        .code(5);
}

#[test]
fn test_checksum_mismatch_leaves_no_trace() {
    let registry = Registry::new().corrupted_module("bad", "1.0.0").serve();
    let ws = tempdir().unwrap();
    let home = tempdir().unwrap();

    modman(ws.path(), &home)
        .args(["init", "--catalog-url", &registry.catalog_url()])
        .assert()
        .success();

    modman(ws.path(), &home)
        .args(["install", "bad", "1.0.0"])
        .assert()
        .code(9)
        .stderr(predicate::str::contains("Checksum mismatch"));

    assert!(!ws.path().join("Module").join("bad-1.0.0").exists());
    modman(ws.path(), &home)
        .args(["list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No modules installed."));
}

#[test]
fn test_workspace_lifecycle_errors() {
    let ws = tempdir().unwrap();
    let home = tempdir().unwrap();

    modman(ws.path(), &home)
        .args(["info", "foo", "1.0"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("modman init"));

    modman(ws.path(), &home).arg("init").assert().success();
    modman(ws.path(), &home).arg("init").assert().code(4);

    let nested = ws.path().join("sub");
    std::fs::create_dir_all(&nested).unwrap();
    modman(&nested, &home).arg("init").assert().code(4);

    modman(ws.path(), &home)
        .args(["install", "foo", "1"])
        .assert()
        .code(2);

    modman(ws.path(), &home).arg("deinit").assert().success();
    assert!(!ws.path().join(".modman").exists());
    modman(ws.path(), &home).arg("list").assert().code(3);
}

#[test]
fn test_unknown_module_is_not_found() {
    let registry = Registry::new().module("nos.core", "1.0.0", &[]).serve();
    let ws = tempdir().unwrap();
    let home = tempdir().unwrap();

    modman(ws.path(), &home)
        .args(["init", "--catalog-url", &registry.catalog_url()])
        .assert()
        .success();

    modman(ws.path(), &home)
        .args(["install", "nos.core", "3.0"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("available major versions: 1"));

    modman(ws.path(), &home)
        .args(["install", "nos.core", "3.0", "--allow-major-fallback"])
        .assert()
        .success();
    assert!(ws.path().join("Module").join("nos.core-1.0.0").is_dir());
}

#[test]
fn test_remotes_combine_catalogs() {
    let main = Registry::new().module("nos.core", "1.0.0", &[]).serve();
    let mirror = Registry::new()
        .module("nos.extra", "1.0.0", &[("nos.core", "1.0")])
        .serve();
    let ws = tempdir().unwrap();
    let home = tempdir().unwrap();

    modman(ws.path(), &home).arg("init").assert().success();
    modman(ws.path(), &home)
        .args(["remote", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No remotes configured"));

    modman(ws.path(), &home)
        .args(["remote", "add", &main.catalog_url(), "--name", "main"])
        .assert()
        .success();
    modman(ws.path(), &home)
        .args(["remote", "add", &mirror.catalog_url(), "--name", "mirror"])
        .assert()
        .success();
    modman(ws.path(), &home)
        .args(["remote", "add", &mirror.catalog_url()])
        .assert()
        .code(2);
    modman(ws.path(), &home)
        .args(["remote", "list"])
        .assert()
        .success()
        .stdout(predicate::str::is_match("main .*\n.*mirror ").unwrap());

    modman(ws.path(), &home)
        .args(["install", "nos.extra", "1.0"])
        .assert()
        .success();
    assert!(ws.path().join("Module").join("nos.core-1.0.0").is_dir());
    assert!(ws.path().join("Module").join("nos.extra-1.0.0").is_dir());

    modman(ws.path(), &home)
        .args(["remote", "remove", "main"])
        .assert()
        .success();
    modman(ws.path(), &home)
        .args(["remote", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("main ").not());
}
