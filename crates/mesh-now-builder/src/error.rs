use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing toolchain environment or another startup precondition.
    Precondition,
    /// Overlay file unreadable or not matching its target.
    Overlay,
    /// An external tool exited non-zero or could not be spawned.
    ExternalProcess,
    /// An expected output file is absent.
    ArtifactMissing,
    Io,
    Config,
    Other,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Precondition => "precondition",
            ErrorKind::Overlay => "overlay",
            ErrorKind::ExternalProcess => "external-process",
            ErrorKind::ArtifactMissing => "artifact-missing",
            ErrorKind::Io => "io",
            ErrorKind::Config => "config",
            ErrorKind::Other => "other",
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
    diagnostics: Option<String>,
}

impl Error {
    pub fn new<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
            diagnostics: None,
        }
    }

    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Other, msg)
    }

    pub fn precondition<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Precondition, msg)
    }

    pub fn overlay<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Overlay, msg)
    }

    pub fn artifact_missing<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::ArtifactMissing, msg)
    }

    pub fn io<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Io, msg)
    }

    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Config, msg)
    }

    pub fn external<M: Into<String>>(msg: M, diagnostics: Option<String>) -> Self {
        Self {
            kind: ErrorKind::ExternalProcess,
            msg: msg.into(),
            diagnostics: diagnostics.filter(|d| !d.trim().is_empty()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn diagnostics(&self) -> Option<&str> {
        self.diagnostics.as_deref()
    }

    /// Message followed by captured tool output, if any.
    pub fn detail(&self) -> String {
        match self.diagnostics.as_deref() {
            Some(d) => format!("{}\n{}", self.msg, d),
            None => self.msg.clone(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::msg(format!("json error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
