//! Integration tests for depot

mod engine_tests {
    use depot::config::Config;
    use depot::loader::image::encode_pack;
    use depot::loader::{FileLoader, Priority};
    use depot::manifest::PackManifest;
    use depot::registry::Registry;
    use depot::telemetry::NullObserver;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::runtime::Runtime;

    fn write_pack(dir: &Path, name: &str, items: &[(&str, &[u8])]) -> Vec<u8> {
        let entries: Vec<(String, Vec<u8>)> = items
            .iter()
            .map(|(n, d)| (n.to_string(), d.to_vec()))
            .collect();
        let encoded = encode_pack(&entries);
        fs::write(dir.join(name), &encoded).unwrap();
        encoded
    }

    fn registry_for(dir: &TempDir, manifest_json: &str, runtime: &Runtime) -> Registry {
        let manifest =
            PackManifest::parse(manifest_json, &dir.path().join("manifest.json")).unwrap();
        let mut config = Config::default();
        config.source.root = dir.path().to_path_buf();
        Registry::new(
            manifest,
            Arc::new(FileLoader::new()),
            Arc::new(NullObserver),
            config,
            runtime.handle().clone(),
        )
    }

    #[test]
    fn loads_pack_and_item_from_disk() {
        let dir = TempDir::new().unwrap();
        let raw = write_pack(dir.path(), "ui.pack", &[("button.png", b"pixels")]);
        let runtime = Runtime::new().unwrap();
        let mut registry = registry_for(
            &dir,
            r#"{"packs": {"ui": {"path": "ui.pack", "items": ["button.png"]}}}"#,
            &runtime,
        );

        assert!(registry.load_pack_sync("ui", Priority::Normal).unwrap());
        assert_eq!(&registry.pack_handle("ui").unwrap()[..], &raw[..]);

        let payload = registry
            .load_item_sync("ui", "button.png", Priority::Normal)
            .unwrap();
        assert_eq!(&payload[..], b"pixels");
        registry.shutdown();
    }

    #[test]
    fn dependency_chain_loads_from_disk() {
        let dir = TempDir::new().unwrap();
        write_pack(dir.path(), "base.pack", &[("shared.bin", b"shared")]);
        write_pack(dir.path(), "level.pack", &[("map.bin", b"map")]);
        let runtime = Runtime::new().unwrap();
        let mut registry = registry_for(
            &dir,
            r#"{"packs": {
                "level": {"path": "level.pack", "items": ["map.bin"], "dependencies": ["base"]},
                "base": {"path": "base.pack", "items": ["shared.bin"]}
            }}"#,
            &runtime,
        );

        assert!(registry.load_pack_sync("level", Priority::High).unwrap());
        // the dependency came up with it and is held by it
        assert_eq!(registry.pack_refcount("base"), Some(1));

        registry.release_pack("level");
        assert_eq!(registry.pack_refcount("base"), Some(0));
        registry.shutdown();
    }

    #[test]
    fn missing_pack_file_fails_load() {
        let dir = TempDir::new().unwrap();
        let runtime = Runtime::new().unwrap();
        let mut registry = registry_for(
            &dir,
            r#"{"packs": {"ghost": {"path": "ghost.pack"}}}"#,
            &runtime,
        );

        assert!(!registry.load_pack_sync("ghost", Priority::Normal).unwrap());
        registry.shutdown();
    }

    #[test]
    fn checksum_mismatch_fails_load() {
        let dir = TempDir::new().unwrap();
        write_pack(dir.path(), "ui.pack", &[("a", b"data")]);
        let runtime = Runtime::new().unwrap();
        let mut registry = registry_for(
            &dir,
            r#"{"packs": {"ui": {"path": "ui.pack", "sha256": "deadbeef"}}}"#,
            &runtime,
        );

        assert!(!registry.load_pack_sync("ui", Priority::Normal).unwrap());
        registry.shutdown();
    }
}

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use depot::loader::image::encode_pack;
    use predicates::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    fn depot() -> Command {
        cargo_bin_cmd!("depot")
    }

    /// Temp source root with a manifest, one pack, and a config file
    /// pointing at it.
    fn fixture() -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let image = encode_pack(&[("a.bin".to_string(), b"alpha".to_vec())]);
        fs::write(dir.path().join("p.pack"), image).unwrap();
        fs::write(
            dir.path().join("manifest.json"),
            r#"{"packs": {"p": {"path": "p.pack", "items": ["a.bin"]}}}"#,
        )
        .unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(
            &config_path,
            format!("[source]\nroot = \"{}\"\n", dir.path().display()),
        )
        .unwrap();
        (dir, config_path)
    }

    #[test]
    fn help_displays() {
        depot()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Dependency-aware resource pack cache"));
    }

    #[test]
    fn version_displays() {
        depot()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("depot"));
    }

    #[test]
    fn config_path_honors_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("depot.toml");
        depot()
            .args(["config", "path"])
            .arg("--config")
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("depot.toml"));
    }

    #[test]
    fn config_show_prints_defaults() {
        let dir = TempDir::new().unwrap();
        depot()
            .args(["config", "show"])
            .arg("--config")
            .arg(dir.path().join("none.toml"))
            .assert()
            .success()
            .stdout(predicate::str::contains("[retain]"));
    }

    #[test]
    fn manifest_validates() {
        let (dir, _config) = fixture();
        depot()
            .arg("manifest")
            .arg(dir.path().join("manifest.json"))
            .assert()
            .success()
            .stdout(predicate::str::contains("1 packs"));
    }

    #[test]
    fn manifest_rejects_cycle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        fs::write(
            &path,
            r#"{"packs": {
                "a": {"path": "a.pack", "dependencies": ["b"]},
                "b": {"path": "b.pack", "dependencies": ["a"]}
            }}"#,
        )
        .unwrap();
        depot()
            .arg("manifest")
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid manifest"));
    }

    #[test]
    fn load_writes_item_payload() {
        let (dir, config) = fixture();
        let out = dir.path().join("out.bin");
        depot()
            .args(["load", "p", "--item", "a.bin", "--sync"])
            .arg("--out")
            .arg(&out)
            .arg("--config")
            .arg(&config)
            .assert()
            .success()
            .stdout(predicate::str::contains("5 bytes"));
        assert_eq!(fs::read(&out).unwrap(), b"alpha");
    }

    #[test]
    fn load_pack_through_pump_loop() {
        let (_dir, config) = fixture();
        depot()
            .args(["load", "p"])
            .arg("--config")
            .arg(&config)
            .assert()
            .success()
            .stdout(predicate::str::contains("Loaded"));
    }

    #[test]
    fn load_unknown_pack_fails() {
        let (_dir, config) = fixture();
        depot()
            .args(["load", "nope", "--sync"])
            .arg("--config")
            .arg(&config)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown pack"));
    }
}
