//! Custom template functions
//!
//! Every function returns `Result` so that failures surface as template
//! errors instead of panicking inside the render.

use minijinja::value::Rest;
use minijinja::{Error, ErrorKind};
use std::env as std_env;
use std::sync::OnceLock;

// System information is queried once per process.
static HOSTNAME_CACHE: OnceLock<String> = OnceLock::new();
static USERNAME_CACHE: OnceLock<Option<String>> = OnceLock::new();

fn invalid_operation(message: String) -> Error {
    Error::new(ErrorKind::InvalidOperation, message)
}

/// Look up an environment variable, returning the empty string if unset
pub fn env(name: String) -> String {
    std_env::var(&name).unwrap_or_default()
}

/// The operating system the engine was built for (e.g. `linux`, `macos`)
pub fn os() -> &'static str {
    std_env::consts::OS
}

/// The CPU architecture the engine was built for (e.g. `x86_64`)
pub fn arch() -> &'static str {
    std_env::consts::ARCH
}

/// The machine's hostname
pub fn hostname() -> Result<String, Error> {
    if let Some(cached) = HOSTNAME_CACHE.get() {
        return Ok(cached.clone());
    }
    let name = ::hostname::get()
        .map_err(|e| invalid_operation(format!("hostname: {e}")))?
        .to_string_lossy()
        .into_owned();
    Ok(HOSTNAME_CACHE.get_or_init(|| name).clone())
}

#[cfg(unix)]
fn current_username() -> Option<String> {
    uzers::get_current_username().map(|name| name.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
fn current_username() -> Option<String> {
    std_env::var("USERNAME").ok()
}

/// The invoking user's name
pub fn username() -> Result<String, Error> {
    USERNAME_CACHE
        .get_or_init(|| current_username().or_else(|| std_env::var("USER").ok()))
        .clone()
        .ok_or_else(|| invalid_operation("username: cannot determine current user".to_string()))
}

/// The invoking user's home directory
pub fn home_dir() -> Result<String, Error> {
    dirs::home_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .ok_or_else(|| invalid_operation("homeDir: cannot determine home directory".to_string()))
}

/// Join path components with the platform separator
pub fn join_path(parts: Rest<String>) -> String {
    let mut path = std::path::PathBuf::new();
    for part in parts.iter() {
        path.push(part);
    }
    path.to_string_lossy().into_owned()
}

/// Find an executable on `PATH`, erroring if it is not present
pub fn look_path(name: String) -> Result<String, Error> {
    which::which(&name)
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|e| invalid_operation(format!("lookPath: {name}: {e}")))
}
