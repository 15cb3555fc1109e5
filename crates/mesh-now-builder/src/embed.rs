use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::AssetConfig;
use crate::error::{Error, Result};
use crate::executor::{BuildEvent, Invocation, ProcessRunner, ReportSink};

const BYTES_PER_ROW: usize = 12;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
        .unwrap_or_else(|e| panic!("identifier pattern is a constant: {e}"))
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedAsset {
    pub source: PathBuf,
    pub header: PathBuf,
    pub identifier: String,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedOutcome {
    Embedded(EmbeddedAsset),
    /// The source binary does not exist.
    Skipped { source: PathBuf },
}

#[derive(Debug, Clone, Default)]
pub struct EmbedReport {
    pub embedded: Vec<EmbeddedAsset>,
    pub skipped: Vec<(PathBuf, String)>,
}

pub fn validate_identifier(identifier: &str) -> Result<()> {
    if IDENTIFIER.is_match(identifier) {
        Ok(())
    } else {
        Err(Error::config(format!(
            "'{identifier}' is not a valid C identifier"
        )))
    }
}

/// `index.html` -> `INDEX_HTML`, `bundle.min.js` -> `BUNDLE_MIN_JS`.
pub fn identifier_for(file_name: &str) -> String {
    let mut id: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    if id.is_empty() || id.starts_with(|c: char| c.is_ascii_digit()) {
        id.insert(0, '_');
    }
    id
}

/// Identifier and header file name for a configured asset, filling in
/// whichever the config left empty.
fn resolve_names(asset: &AssetConfig) -> (String, String) {
    let identifier = if asset.identifier.is_empty() {
        let file_name = Path::new(&asset.source)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| asset.source.clone());
        identifier_for(&file_name)
    } else {
        asset.identifier.clone()
    };
    let header = if asset.header.is_empty() {
        format!("{}.h", identifier.to_ascii_lowercase())
    } else {
        asset.header.clone()
    };
    (identifier, header)
}

/// Render `bytes` as a self-contained C header. Output depends only on the
/// inputs, so re-embedding unchanged content rewrites identical text.
pub fn render_header(identifier: &str, bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 6 + 256);
    let _ = writeln!(out, "#ifndef {identifier}_H");
    let _ = writeln!(out, "#define {identifier}_H");
    out.push('\n');
    out.push_str("#include <stddef.h>\n");
    out.push('\n');
    let _ = writeln!(out, "const unsigned char {identifier}[] = {{");
    if bytes.is_empty() {
        // C forbids an empty initializer list; the size constant stays 0.
        out.push_str("    0x00\n");
    } else {
        let rows = bytes.len().div_ceil(BYTES_PER_ROW);
        for (i, row) in bytes.chunks(BYTES_PER_ROW).enumerate() {
            out.push_str("    ");
            for (j, b) in row.iter().enumerate() {
                if j > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "0x{b:02x}");
            }
            if i + 1 < rows {
                out.push(',');
            }
            out.push('\n');
        }
    }
    out.push_str("};\n");
    out.push('\n');
    let _ = writeln!(out, "const size_t {identifier}_size = {};", bytes.len());
    out.push('\n');
    let _ = writeln!(out, "#endif // {identifier}_H");
    out
}

/// Convert one binary into a header at `header_path`.
pub fn embed(binary: &Path, identifier: &str, header_path: &Path) -> Result<EmbedOutcome> {
    validate_identifier(identifier)?;
    if !binary.exists() {
        return Ok(EmbedOutcome::Skipped {
            source: binary.to_path_buf(),
        });
    }
    let bytes = fs::read(binary)
        .map_err(|e| Error::io(format!("failed to read {}: {e}", binary.display())))?;
    if let Some(parent) = header_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::io(format!("failed to create {}: {e}", parent.display())))?;
    }
    fs::write(header_path, render_header(identifier, &bytes))
        .map_err(|e| Error::io(format!("failed to write {}: {e}", header_path.display())))?;
    tracing::debug!(
        source = %binary.display(),
        header = %header_path.display(),
        bytes = bytes.len(),
        "embedded asset"
    );
    Ok(EmbedOutcome::Embedded(EmbeddedAsset {
        source: binary.to_path_buf(),
        header: header_path.to_path_buf(),
        identifier: identifier.to_string(),
        bytes: bytes.len(),
    }))
}

/// Embed every configured asset. Assets whose identifier is listed in
/// `required` must convert; the rest are skipped with a reason on any
/// failure. Converting nothing at all is an error.
pub fn embed_all(
    assets: &[AssetConfig],
    dist_dir: &Path,
    headers_dir: &Path,
    required: &[String],
) -> Result<EmbedReport> {
    for r in required {
        if !assets
            .iter()
            .any(|a| &resolve_names(a).0 == r || &a.source == r)
        {
            return Err(Error::config(format!("required asset '{r}' is not configured")));
        }
    }

    let mut report = EmbedReport::default();
    for asset in assets {
        let source = dist_dir.join(&asset.source);
        let (identifier, header_name) = resolve_names(asset);
        let header = headers_dir.join(header_name);
        let is_required = required
            .iter()
            .any(|r| r == &identifier || r == &asset.source);
        let reason = match embed(&source, &identifier, &header) {
            Ok(EmbedOutcome::Embedded(done)) => {
                report.embedded.push(done);
                continue;
            }
            Ok(EmbedOutcome::Skipped { .. }) if is_required => {
                return Err(Error::artifact_missing(format!(
                    "required asset {} not found",
                    source.display()
                )));
            }
            Ok(EmbedOutcome::Skipped { .. }) => "source not found".to_string(),
            Err(e) if is_required => {
                return Err(Error::new(
                    e.kind(),
                    format!("required asset {} could not be embedded: {e}", source.display()),
                ));
            }
            Err(e) => e.to_string(),
        };
        tracing::warn!(source = %source.display(), "skipping asset: {reason}");
        report.skipped.push((source, reason));
    }

    if report.embedded.is_empty() {
        return Err(Error::artifact_missing(format!(
            "no assets embedded from {}",
            dist_dir.display()
        )));
    }
    Ok(report)
}

/// Run the external bundler in the frontend directory. An empty command
/// means the dist files are produced some other way.
pub fn bundle(
    command: &[String],
    frontend_dir: &Path,
    runner: &dyn ProcessRunner,
    sink: &dyn ReportSink,
) -> Result<()> {
    if command.is_empty() {
        sink.emit(BuildEvent::Info {
            message: "no bundler configured; embedding existing dist files".into(),
        });
        return Ok(());
    }
    if !frontend_dir.is_dir() {
        return Err(Error::msg(format!(
            "frontend directory {} not found",
            frontend_dir.display()
        )));
    }
    let inv = Invocation::from_command(command)?.cwd(frontend_dir);
    sink.emit(BuildEvent::Info {
        message: format!("bundling frontend: {}", inv.display()),
    });
    runner.run(&inv, &mut |line| {
        sink.emit(BuildEvent::ToolLog {
            tool: "frontend",
            line: line.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_matches_twelve_per_row() {
        let bytes: Vec<u8> = (0u8..130).collect();
        let h = render_header("INDEX_HTML", &bytes);
        let lines: Vec<&str> = h.lines().collect();
        assert_eq!(lines[0], "#ifndef INDEX_HTML_H");
        assert_eq!(lines[1], "#define INDEX_HTML_H");
        assert_eq!(lines[3], "#include <stddef.h>");
        assert_eq!(lines[5], "const unsigned char INDEX_HTML[] = {");

        let rows: Vec<&str> = lines
            .iter()
            .copied()
            .filter(|l| l.starts_with("    0x"))
            .collect();
        assert_eq!(rows.len(), 11);
        assert!(rows[..10].iter().all(|r| r.ends_with(',')));
        assert_eq!(rows[0].matches("0x").count(), 12);
        assert_eq!(rows[10].matches("0x").count(), 10);
        assert!(!rows[10].ends_with(','));
        assert!(rows[10].ends_with("0x81"));

        assert!(h.contains("const size_t INDEX_HTML_size = 130;"));
        assert!(h.ends_with("#endif // INDEX_HTML_H\n"));
    }

    #[test]
    fn empty_input_still_compiles() {
        let h = render_header("EMPTY", &[]);
        assert!(h.contains("{\n    0x00\n};"));
        assert!(h.contains("EMPTY_size = 0;"));
    }

    #[test]
    fn identifiers_derive_from_file_names() {
        assert_eq!(identifier_for("index.html"), "INDEX_HTML");
        assert_eq!(identifier_for("bundle.min.js"), "BUNDLE_MIN_JS");
        assert_eq!(identifier_for("3d-model.bin"), "_3D_MODEL_BIN");
        assert!(validate_identifier("STYLES_CSS").is_ok());
        assert!(validate_identifier("9lives").is_err());
        assert!(validate_identifier("has-dash").is_err());
    }

    #[test]
    fn unnamed_assets_get_derived_identifier_and_header() {
        let bare = AssetConfig {
            source: "js/app.min.js".into(),
            header: String::new(),
            identifier: String::new(),
        };
        assert_eq!(
            resolve_names(&bare),
            ("APP_MIN_JS".to_string(), "app_min_js.h".to_string())
        );
        let named = AssetConfig {
            identifier: "APP".into(),
            ..bare
        };
        assert_eq!(resolve_names(&named).1, "app.h");
    }

    #[test]
    fn embed_is_idempotent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("styles.css");
        fs::write(&src, b"body{margin:0}").expect("write");
        let header = tmp.path().join("main/styles_css.h");

        embed(&src, "STYLES_CSS", &header).expect("first");
        let first = fs::read(&header).expect("read");
        embed(&src, "STYLES_CSS", &header).expect("second");
        assert_eq!(first, fs::read(&header).expect("read"));
    }

    #[test]
    fn missing_source_is_skipped_not_failed() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let out = embed(
            &tmp.path().join("absent.js"),
            "BUNDLE_JS",
            &tmp.path().join("bundle_js.h"),
        )
        .expect("embed");
        assert!(matches!(out, EmbedOutcome::Skipped { .. }));
        assert!(!tmp.path().join("bundle_js.h").exists());
    }
}
