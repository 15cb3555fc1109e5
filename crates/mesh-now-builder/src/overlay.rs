use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

use serde::Serialize;

use crate::targets::TargetId;

const OVERLAY_PREFIX: &str = "sdkconfig.";

/// Outcome of checking a target's overlay without building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum OverlayValidation {
    Valid { path: PathBuf },
    Absent { path: PathBuf },
    Mismatch { path: PathBuf, expected: String },
    Unreadable { path: PathBuf, reason: String },
}

impl OverlayValidation {
    /// Absent overlays are allowed; the pipeline just skips applying one.
    pub fn is_acceptable(&self) -> bool {
        matches!(self, Self::Valid { .. } | Self::Absent { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Valid { .. } => "ok",
            Self::Absent { .. } => "missing",
            Self::Mismatch { .. } => "mismatch",
            Self::Unreadable { .. } => "unreadable",
        }
    }
}

impl fmt::Display for OverlayValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid { path } => write!(f, "configuration OK ({})", path.display()),
            Self::Absent { path } => write!(f, "no overlay at {}", path.display()),
            Self::Mismatch { path, expected } => write!(
                f,
                "overlay content mismatch: {} does not contain {}",
                path.display(),
                expected
            ),
            Self::Unreadable { path, reason } => {
                write!(f, "overlay unreadable: {}: {}", path.display(), reason)
            }
        }
    }
}

/// The line an overlay must carry to be accepted for `target`.
pub fn target_marker(target: TargetId) -> String {
    format!("CONFIG_IDF_TARGET=\"{}\"", target.as_str())
}

#[derive(Debug, Clone)]
pub struct OverlayResolver {
    configs_dir: PathBuf,
}

impl OverlayResolver {
    pub fn new(configs_dir: impl Into<PathBuf>) -> Self {
        Self {
            configs_dir: configs_dir.into(),
        }
    }

    /// `configs/sdkconfig.<target>`, whether or not it exists.
    pub fn path_for(&self, target: TargetId) -> PathBuf {
        self.configs_dir
            .join(format!("{OVERLAY_PREFIX}{}", target.as_str()))
    }

    pub fn resolve(&self, target: TargetId) -> Option<PathBuf> {
        let path = self.path_for(target);
        // Any directory entry counts, dangling links included; reading it is
        // validate's job.
        match fs::symlink_metadata(&path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            _ => Some(path),
        }
    }

    pub fn validate(&self, target: TargetId) -> OverlayValidation {
        let path = self.path_for(target);
        match fs::symlink_metadata(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return OverlayValidation::Absent { path };
            }
            Err(e) => {
                return OverlayValidation::Unreadable {
                    path,
                    reason: e.to_string(),
                };
            }
        }
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                return OverlayValidation::Unreadable {
                    path,
                    reason: e.to_string(),
                };
            }
        };
        let expected = target_marker(target);
        if content.contains(&expected) {
            OverlayValidation::Valid { path }
        } else {
            OverlayValidation::Mismatch { path, expected }
        }
    }
}

/// Validate every listed target's overlay without building.
pub fn check_all(resolver: &OverlayResolver, targets: &[TargetId]) -> Vec<(TargetId, OverlayValidation)> {
    targets.iter().map(|&t| (t, resolver.validate(t))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_with(files: &[(&str, &str)]) -> (tempfile::TempDir, OverlayResolver) {
        let tmp = tempfile::tempdir().expect("tempdir");
        for (name, body) in files {
            fs::write(tmp.path().join(name), body).expect("write overlay");
        }
        let r = OverlayResolver::new(tmp.path());
        (tmp, r)
    }

    #[test]
    fn resolve_follows_naming_convention() {
        let (tmp, r) = resolver_with(&[("sdkconfig.esp32s3", "CONFIG_IDF_TARGET=\"esp32s3\"\n")]);
        assert_eq!(
            r.resolve(TargetId::Esp32s3),
            Some(tmp.path().join("sdkconfig.esp32s3"))
        );
        assert_eq!(r.resolve(TargetId::Esp32), None);
    }

    #[test]
    fn validate_reports_each_condition() {
        let (_tmp, r) = resolver_with(&[
            ("sdkconfig.esp32", "# base\nCONFIG_IDF_TARGET=\"esp32\"\n"),
            ("sdkconfig.esp32s2", "CONFIG_IDF_TARGET=\"esp32s3\"\n"),
        ]);
        assert!(matches!(r.validate(TargetId::Esp32), OverlayValidation::Valid { .. }));
        let mismatch = r.validate(TargetId::Esp32s2);
        assert_eq!(mismatch.label(), "mismatch");
        assert!(mismatch.to_string().contains("overlay content mismatch"));
        assert!(!mismatch.is_acceptable());
        let absent = r.validate(TargetId::Esp32c6);
        assert_eq!(absent.label(), "missing");
        assert!(absent.is_acceptable());
    }

    #[test]
    fn marker_is_not_fooled_by_prefix_targets() {
        // "esp32" must not match an overlay written for "esp32c3".
        let (_tmp, r) = resolver_with(&[("sdkconfig.esp32", "CONFIG_IDF_TARGET=\"esp32c3\"\n")]);
        assert_eq!(r.validate(TargetId::Esp32).label(), "mismatch");
    }

    #[test]
    fn unreadable_is_distinct_from_absent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        // A directory where the file should be cannot be read as text.
        fs::create_dir_all(tmp.path().join("sdkconfig.esp32c3")).expect("mkdir");
        let r = OverlayResolver::new(tmp.path());
        assert!(r.resolve(TargetId::Esp32c3).is_some());
        let v = r.validate(TargetId::Esp32c3);
        assert_eq!(v.label(), "unreadable");
        assert!(v.to_string().starts_with("overlay unreadable"));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_link_is_unreadable_not_absent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::os::unix::fs::symlink(
            tmp.path().join("gone"),
            tmp.path().join("sdkconfig.esp32"),
        )
        .expect("symlink");
        let r = OverlayResolver::new(tmp.path());
        assert!(r.resolve(TargetId::Esp32).is_some());
        let v = r.validate(TargetId::Esp32);
        assert_eq!(v.label(), "unreadable");
        assert!(!v.is_acceptable());
    }

    #[test]
    fn check_all_keeps_request_order() {
        let (_tmp, r) = resolver_with(&[("sdkconfig.esp32c3", "CONFIG_IDF_TARGET=\"esp32c3\"\n")]);
        let got = check_all(&r, &[TargetId::Esp32c3, TargetId::Esp32]);
        assert_eq!(got[0].0, TargetId::Esp32c3);
        assert_eq!(got[0].1.label(), "ok");
        assert_eq!(got[1].1.label(), "missing");
    }

    #[test]
    fn non_utf8_overlay_is_unreadable() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("sdkconfig.esp32"), [0xffu8, 0xfe, 0x00]).expect("write");
        let r = OverlayResolver::new(tmp.path());
        assert_eq!(r.validate(TargetId::Esp32).label(), "unreadable");
    }
}
