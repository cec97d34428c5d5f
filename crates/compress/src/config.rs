//! Environment toggles for external decoders.
//!
//! External gzip accelerators are used whenever they're installed, unless
//! switched off with one of these variables. Values follow the usual boolean
//! spellings (`1`, `t`, `true`, `0`, `f`, `false`, ...). A value that can't be
//! parsed is logged and ignored, so the tool stays enabled.
//!
//! The containerd spellings (`CONTAINERD_DISABLE_IGZIP`,
//! `CONTAINERD_DISABLE_PIGZ`) are honoured as well; either variable being
//! true switches the tool off.

use std::env;

/// Set to a true value to stop using `igzip` for gzip decompression.
pub const DISABLE_IGZIP_VAR: &str = "ARCHIVE_COMPRESS_DISABLE_IGZIP";
/// Set to a true value to stop using `unpigz` for gzip decompression.
pub const DISABLE_PIGZ_VAR: &str = "ARCHIVE_COMPRESS_DISABLE_PIGZ";
/// containerd's name for [`DISABLE_IGZIP_VAR`].
pub const CONTAINERD_DISABLE_IGZIP_VAR: &str = "CONTAINERD_DISABLE_IGZIP";
/// containerd's name for [`DISABLE_PIGZ_VAR`].
pub const CONTAINERD_DISABLE_PIGZ_VAR: &str = "CONTAINERD_DISABLE_PIGZ";

/// Parse a boolean the way most command-line tools spell them.
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Read a disable toggle from the environment.
pub fn is_disabled(var: &str) -> bool {
    toggle_value(var, process_env(var).as_deref())
}

/// Look a variable up in this process's environment.
pub(crate) fn process_env(var: &str) -> Option<String> {
    env::var_os(var).map(|value| value.to_string_lossy().into_owned())
}

/// Interpret the raw value of a disable toggle. Unset and empty both mean
/// "not disabled".
pub(crate) fn toggle_value(var: &str, value: Option<&str>) -> bool {
    match value {
        None | Some("") => false,
        Some(raw) => parse_bool(raw).unwrap_or_else(|| {
            tracing::warn!(var, value = raw, "Could not parse boolean toggle; ignoring it");
            false
        }),
    }
}
