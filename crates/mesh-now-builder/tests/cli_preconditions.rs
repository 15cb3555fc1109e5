use std::process::Command;

fn meshnow(dir: &std::path::Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_meshnow"))
        .args(args)
        .current_dir(dir)
        .env_remove("IDF_PATH")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn build_without_toolchain_env_exits_before_doing_anything() {
    let tmp = tempfile::tempdir().unwrap();
    let out = meshnow(tmp.path(), &["--ci", "build", "--target", "esp32"]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("IDF_PATH"), "{stderr}");
    assert!(!tmp.path().join("build").exists());
    assert!(!tmp.path().join("builds").exists());
}

#[test]
fn check_and_flash_need_the_toolchain_too() {
    let tmp = tempfile::tempdir().unwrap();
    assert_eq!(meshnow(tmp.path(), &["--ci", "check"]).status.code(), Some(2));
    assert_eq!(
        meshnow(tmp.path(), &["--ci", "flash", "esp32", "/dev/null"])
            .status
            .code(),
        Some(2)
    );
}

#[test]
fn targets_listing_works_without_toolchain() {
    let tmp = tempfile::tempdir().unwrap();
    let out = meshnow(tmp.path(), &["--ci", "targets"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    for id in ["esp32", "esp32s2", "esp32s3", "esp32c3", "esp32c6"] {
        assert!(stdout.contains(id), "{stdout}");
    }
}

#[test]
fn unknown_target_is_rejected_by_the_parser() {
    let tmp = tempfile::tempdir().unwrap();
    let out = meshnow(tmp.path(), &["--ci", "flash", "esp8266"]);
    assert!(!out.status.success());
}

#[test]
fn embed_with_empty_dist_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let out = meshnow(tmp.path(), &["--ci", "embed"]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn embed_with_bundle_needs_the_toolchain() {
    let tmp = tempfile::tempdir().unwrap();
    let out = meshnow(tmp.path(), &["--ci", "embed", "--bundle"]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("IDF_PATH"), "{stderr}");
}
