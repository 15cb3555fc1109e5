use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use toml::Value;

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "meshnow.toml";

fn default_root_dir() -> String {
    ".".into()
}

fn default_build_dir() -> String {
    "build".into()
}

fn default_builds_dir() -> String {
    "builds".into()
}

fn default_configs_dir() -> String {
    "configs".into()
}

fn default_defaults_file() -> String {
    "sdkconfig.defaults".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    #[serde(default = "default_build_dir")]
    pub build_dir: String,
    #[serde(default = "default_builds_dir")]
    pub builds_dir: String,
    #[serde(default = "default_configs_dir")]
    pub configs_dir: String,
    #[serde(default = "default_defaults_file")]
    pub defaults_file: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            build_dir: default_build_dir(),
            builds_dir: default_builds_dir(),
            configs_dir: default_configs_dir(),
            defaults_file: default_defaults_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub command: Vec<String>,
    pub root_env: String,
    pub firmware_name: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            command: vec!["idf.py".into()],
            root_env: "IDF_PATH".into(),
            firmware_name: "mesh-now.bin".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    pub command: Vec<String>,
    pub baud: u32,
    pub flash_mode: String,
    pub flash_freq: String,
    pub flash_size: String,
    pub before: String,
    pub after: String,
    pub default_port: String,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            command: vec!["esptool.py".into()],
            baud: 460_800,
            flash_mode: "dio".into(),
            flash_freq: "40m".into(),
            flash_size: "detect".into(),
            before: "default_reset".into(),
            after: "hard_reset".into(),
            default_port: if cfg!(windows) {
                "COM1".into()
            } else {
                "/dev/ttyUSB0".into()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssetConfig {
    pub source: String,
    /// Derived from `identifier` when empty.
    #[serde(default)]
    pub header: String,
    /// Derived from the source file name when empty.
    #[serde(default)]
    pub identifier: String,
}

impl AssetConfig {
    fn new(source: &str, header: &str, identifier: &str) -> Self {
        Self {
            source: source.into(),
            header: header.into(),
            identifier: identifier.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    pub dir: String,
    pub dist_dir: String,
    pub headers_dir: String,
    pub bundle_command: Vec<String>,
    pub assets: Vec<AssetConfig>,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            dir: "frontend".into(),
            dist_dir: "frontend/dist".into(),
            headers_dir: "main".into(),
            bundle_command: Vec::new(),
            assets: vec![
                AssetConfig::new("index.html", "index_html.h", "INDEX_HTML"),
                AssetConfig::new("bundle.js", "bundle_js.h", "BUNDLE_JS"),
                AssetConfig::new("styles.css", "styles_css.h", "STYLES_CSS"),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub layout: LayoutConfig,
    pub toolchain: ToolchainConfig,
    pub flash: FlashConfig,
    pub frontend: FrontendConfig,
}

impl ProjectConfig {
    pub fn from_value(value: Value) -> Result<Self> {
        let cfg: ProjectConfig = value
            .try_into()
            .map_err(|e| Error::config(format!("invalid project config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.toolchain.command.is_empty() {
            return Err(Error::config("toolchain.command must not be empty"));
        }
        if self.flash.command.is_empty() {
            return Err(Error::config("flash.command must not be empty"));
        }
        if self.toolchain.root_env.trim().is_empty() {
            return Err(Error::config("toolchain.root_env must not be empty"));
        }
        if self.toolchain.firmware_name.trim().is_empty() {
            return Err(Error::config("toolchain.firmware_name must not be empty"));
        }
        Ok(())
    }
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_tbl), Value::Table(over_tbl)) => {
            for (k, v) in over_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

fn relative_to(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}

fn take_string_list(path: &Path, tbl: &mut toml::Table, key: &str) -> Result<Vec<String>> {
    let Some(raw) = tbl.remove(key) else {
        return Ok(Vec::new());
    };
    let Value::Array(items) = raw else {
        return Err(Error::config(format!(
            "'{key}' in {} must be an array of strings",
            path.display()
        )));
    };
    let mut out = Vec::new();
    for item in items {
        let Some(s) = item.as_str() else {
            return Err(Error::config(format!(
                "invalid '{key}' entry in {} (expected string)",
                path.display()
            )));
        };
        if !s.trim().is_empty() {
            out.push(s.trim().to_string());
        }
    }
    Ok(out)
}

fn load_layered(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(key.clone()) {
        return Err(Error::config(format!(
            "config include cycle at {}",
            key.display()
        )));
    }

    let text = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&text)
        .map_err(|e| Error::config(format!("TOML parse error in {}: {e}", path.display())))?;
    let Some(tbl) = value.as_table_mut() else {
        return Err(Error::config(format!(
            "config {} is not a table",
            path.display()
        )));
    };

    // Precedence, lowest first: extends, imports in order, then the file itself.
    let mut acc = Value::Table(Default::default());
    if let Some(ext) = tbl.remove("extends") {
        let Some(ext) = ext.as_str() else {
            return Err(Error::config(format!(
                "'extends' in {} must be a string",
                path.display()
            )));
        };
        acc = load_layered(&relative_to(path, ext), stack)?;
    }
    for imp in take_string_list(path, tbl, "imports")? {
        let loaded = load_layered(&relative_to(path, &imp), stack)?;
        merge_values(&mut acc, loaded);
    }
    merge_values(&mut acc, value);

    stack.remove(&key);
    Ok(acc)
}

/// Load a layered TOML document (resolving `extends` and `imports`).
pub fn load_value(path: &Path) -> Result<Value> {
    let mut stack = HashSet::new();
    load_layered(path, &mut stack)
}

/// Load the project config. An explicit path must exist; the default file
/// is optional and its absence yields built-in defaults.
pub fn load(explicit: Option<&Path>) -> Result<ProjectConfig> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let p = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !p.is_file() {
                tracing::debug!("no {DEFAULT_CONFIG_FILE}; using built-in defaults");
                return Ok(ProjectConfig::default());
            }
            p
        }
    };
    tracing::debug!(config = %path.display(), "loading project config");
    ProjectConfig::from_value(load_value(&path)?)
}

/// Resolve the embedded toolchain root from `var`. The lookup is injected so
/// callers decide where the environment comes from.
pub fn resolve_toolchain_root<F>(var: &str, lookup: F) -> Result<PathBuf>
where
    F: Fn(&str) -> Option<OsString>,
{
    match lookup(var) {
        Some(v) if !v.is_empty() => Ok(PathBuf::from(v)),
        _ => Err(Error::precondition(format!(
            "toolchain environment not set up: {var} is not defined (source the toolchain export script first)"
        ))),
    }
}
