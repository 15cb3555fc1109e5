mod common;

use std::fs;
use std::path::Path;

use common::{RecordingRunner, channel_sink};
use mesh_now_builder::config::FlashConfig;
use mesh_now_builder::error::ErrorKind;
use mesh_now_builder::executor::BuildEvent;
use mesh_now_builder::flash::FlashDriver;
use mesh_now_builder::targets::TargetId;

fn artifact_set(dir: &Path, names: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    for n in names {
        fs::write(dir.join(n), b"img").unwrap();
    }
}

#[test]
fn flashes_with_fixed_offsets_from_artifact_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("builds/esp32c3");
    artifact_set(&dir, &["bootloader.bin", "partition-table.bin", "firmware.bin"]);

    let cfg = FlashConfig::default();
    let runner = RecordingRunner::default();
    let (sink, rx) = channel_sink();
    FlashDriver::new(&cfg, &runner)
        .with_env("IDF_PATH", "/opt/esp-idf")
        .flash(&dir, TargetId::Esp32c3, "/dev/ttyACM0", &sink)
        .unwrap();
    drop(sink);

    let invs = runner.invocations();
    assert_eq!(invs.len(), 1);
    let inv = &invs[0];
    assert_eq!(inv.program, "esptool.py");
    assert_eq!(
        inv.args,
        vec![
            "--chip",
            "esp32c3",
            "--port",
            "/dev/ttyACM0",
            "--baud",
            "460800",
            "--before",
            "default_reset",
            "--after",
            "hard_reset",
            "write_flash",
            "--flash_mode",
            "dio",
            "--flash_freq",
            "40m",
            "--flash_size",
            "detect",
            "0x0",
            "bootloader.bin",
            "0x8000",
            "partition-table.bin",
            "0x10000",
            "firmware.bin",
        ]
    );
    assert_eq!(inv.cwd.as_deref(), Some(dir.as_path()));
    assert_eq!(inv.env.len(), 1);

    let events: Vec<BuildEvent> = rx.iter().collect();
    assert!(matches!(events.first(), Some(BuildEvent::FlashStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(BuildEvent::FlashFinished { ok: true, .. })
    ));
}

#[test]
fn missing_artifacts_fail_before_the_tool_runs() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("builds/esp32");
    artifact_set(&dir, &["firmware.bin"]);

    let cfg = FlashConfig::default();
    let runner = RecordingRunner::default();
    let (sink, _rx) = channel_sink();
    let err = FlashDriver::new(&cfg, &runner)
        .flash(&dir, TargetId::Esp32, "/dev/ttyUSB0", &sink)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ArtifactMissing);
    let msg = err.to_string();
    assert!(msg.contains("bootloader.bin"), "{msg}");
    assert!(msg.contains("partition-table.bin"), "{msg}");
    assert!(!msg.contains("firmware.bin"), "{msg}");
    assert!(runner.invocations().is_empty());
}

#[test]
fn a_failed_flash_is_not_retried() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("builds/esp32s3");
    artifact_set(&dir, &["bootloader.bin", "partition-table.bin", "firmware.bin"]);

    let cfg = FlashConfig::default();
    let runner = RecordingRunner {
        fail: true,
        ..Default::default()
    };
    let (sink, rx) = channel_sink();
    let err = FlashDriver::new(&cfg, &runner)
        .flash(&dir, TargetId::Esp32s3, "COM3", &sink)
        .unwrap_err();
    drop(sink);

    assert_eq!(err.kind(), ErrorKind::ExternalProcess);
    assert_eq!(runner.invocations().len(), 1);
    assert!(rx.iter().any(|e| matches!(
        e,
        BuildEvent::FlashFinished { ok: false, error: Some(_), .. }
    )));
}
