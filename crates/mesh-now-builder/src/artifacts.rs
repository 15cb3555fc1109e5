use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Firmware,
    Bootloader,
    PartitionTable,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Firmware,
        ArtifactKind::Bootloader,
        ArtifactKind::PartitionTable,
    ];

    /// Normalized name inside `builds/<target>/`.
    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::Firmware => "firmware.bin",
            ArtifactKind::Bootloader => "bootloader.bin",
            ArtifactKind::PartitionTable => "partition-table.bin",
        }
    }

    /// Location inside the toolchain build tree. Only the firmware image is
    /// named after the project.
    pub fn source_rel(self, firmware_name: &str) -> PathBuf {
        match self {
            ArtifactKind::Firmware => PathBuf::from(firmware_name),
            ArtifactKind::Bootloader => PathBuf::from("bootloader").join("bootloader.bin"),
            ArtifactKind::PartitionTable => {
                PathBuf::from("partition_table").join("partition-table.bin")
            }
        }
    }

    /// Placement in device flash. Fixed by the boot ROM and partition layout.
    pub fn flash_offset(self) -> u32 {
        match self {
            ArtifactKind::Bootloader => 0x0,
            ArtifactKind::PartitionTable => 0x8000,
            ArtifactKind::Firmware => 0x10000,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArtifactKind::Firmware => "firmware image",
            ArtifactKind::Bootloader => "bootloader image",
            ArtifactKind::PartitionTable => "partition table",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub source: PathBuf,
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Collection {
    pub dest_dir: PathBuf,
    pub artifacts: Vec<Artifact>,
    pub missing: Vec<ArtifactKind>,
}

impl Collection {
    pub fn get(&self, kind: ArtifactKind) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }

    pub fn firmware_bytes(&self) -> Option<u64> {
        self.get(ArtifactKind::Firmware).map(|a| a.bytes)
    }
}

/// Copy the canonical artifacts from `source_root` (the toolchain build tree)
/// into `dest_dir`. Sources that do not exist are listed as missing rather
/// than failing the collection.
pub fn collect(source_root: &Path, dest_dir: &Path, firmware_name: &str) -> Result<Collection> {
    fs::create_dir_all(dest_dir)
        .map_err(|e| Error::io(format!("failed to create {}: {e}", dest_dir.display())))?;

    let mut artifacts = Vec::new();
    let mut missing = Vec::new();
    for kind in ArtifactKind::ALL {
        let src = source_root.join(kind.source_rel(firmware_name));
        let dst = dest_dir.join(kind.file_name());
        // Never leave a previous run's file next to a fresh set.
        if dst.is_file() {
            fs::remove_file(&dst)
                .map_err(|e| Error::io(format!("failed to remove stale {}: {e}", dst.display())))?;
        }
        if !src.is_file() {
            tracing::debug!(artifact = %kind, src = %src.display(), "artifact not produced");
            missing.push(kind);
            continue;
        }
        copy_preserving_mtime(&src, &dst)?;
        artifacts.push(Artifact {
            kind,
            bytes: file_len(&dst)?,
            sha256: sha256_file_hex(&dst)?,
            source: src,
            path: dst,
        });
    }

    let collection = Collection {
        dest_dir: dest_dir.to_path_buf(),
        artifacts,
        missing,
    };
    write_manifest(&collection)?;
    Ok(collection)
}

fn copy_preserving_mtime(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst).map_err(|e| {
        Error::io(format!(
            "failed to copy {} -> {}: {e}",
            src.display(),
            dst.display()
        ))
    })?;
    let meta = fs::metadata(src)
        .map_err(|e| Error::io(format!("failed to stat {}: {e}", src.display())))?;
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    filetime::set_file_mtime(dst, mtime)
        .map_err(|e| Error::io(format!("failed to set mtime on {}: {e}", dst.display())))
}

fn file_len(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path)
        .map_err(|e| Error::io(format!("failed to stat {}: {e}", path.display())))?
        .len())
}

pub fn sha256_file_hex(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};

    let mut f = fs::File::open(path)
        .map_err(|e| Error::io(format!("failed to open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f
            .read(&mut buf)
            .map_err(|e| Error::io(format!("failed to read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn write_manifest(c: &Collection) -> Result<()> {
    let entries: Vec<_> = c
        .artifacts
        .iter()
        .map(|a| {
            serde_json::json!({
                "kind": a.kind,
                "file": a.kind.file_name(),
                "offset": format!("{:#x}", a.kind.flash_offset()),
                "bytes": a.bytes,
                "sha256": a.sha256,
            })
        })
        .collect();
    let manifest = serde_json::json!({
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "artifacts": entries,
        "missing": c.missing,
    });
    let path = c.dest_dir.join(MANIFEST_FILE);
    let text = serde_json::to_string_pretty(&manifest)?;
    fs::write(&path, text).map_err(|e| Error::io(format!("failed to write {}: {e}", path.display())))
}
