use crate::config;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

/// An external command-line decoder this crate knows how to drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExternalTool {
    /// Intel ISA-L gzip (`igzip`).
    Igzip,
    /// Parallel gzip (`unpigz`, from pigz).
    Unpigz,
    /// XZ Utils (`xz`).
    Xz,
}

const TOOL_COUNT: usize = 3;

// Resolved at most once per process, keyed by `ExternalTool::slot`.
static RESOLVED: [OnceLock<Option<PathBuf>>; TOOL_COUNT] = [const { OnceLock::new() }; TOOL_COUNT];

/// Gzip accelerators in order of preference.
const GZIP_ACCELERATORS: [ExternalTool; 2] = [ExternalTool::Igzip, ExternalTool::Unpigz];

impl ExternalTool {
    /// Program name looked up on `PATH`.
    #[must_use]
    pub fn program(&self) -> &'static str {
        match self {
            ExternalTool::Igzip => "igzip",
            ExternalTool::Unpigz => "unpigz",
            ExternalTool::Xz => "xz",
        }
    }

    /// Environment variables that switch this tool off. Empty for tools
    /// that are required rather than optional.
    #[must_use]
    pub fn disable_vars(&self) -> &'static [&'static str] {
        match self {
            ExternalTool::Igzip => &[config::DISABLE_IGZIP_VAR, config::CONTAINERD_DISABLE_IGZIP_VAR],
            ExternalTool::Unpigz => &[config::DISABLE_PIGZ_VAR, config::CONTAINERD_DISABLE_PIGZ_VAR],
            ExternalTool::Xz => &[],
        }
    }

    /// Arguments for decompressing standard input to standard output.
    #[must_use]
    pub fn decompress_args(&self) -> &'static [&'static str] {
        match self {
            ExternalTool::Igzip | ExternalTool::Unpigz => &["-d", "-c"],
            ExternalTool::Xz => &["-d", "-c", "-q"],
        }
    }

    /// Location of the tool, or `None` if it's disabled or not installed.
    ///
    /// The answer is worked out on first use and cached for the lifetime of
    /// the process; later changes to the environment or `PATH` are ignored.
    pub fn path(&self) -> Option<&'static Path> {
        RESOLVED[self.slot()].get_or_init(|| self.discover()).as_deref()
    }

    /// A command that decompresses standard input using this tool found at `path`.
    pub(crate) fn decompress_command(&self, path: &Path) -> Command {
        let mut command = Command::new(path);
        command.args(self.decompress_args());
        command
    }

    fn slot(&self) -> usize {
        match self {
            ExternalTool::Igzip => 0,
            ExternalTool::Unpigz => 1,
            ExternalTool::Xz => 2,
        }
    }

    fn discover(&self) -> Option<PathBuf> {
        self.discover_in(None, config::process_env)
    }

    /// Resolve the tool without caching. `search_path` replaces `PATH` when
    /// given, and `env` stands in for the process environment.
    pub(crate) fn discover_in<F>(&self, search_path: Option<&OsStr>, env: F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        let program = self.program();
        let disabled_by = self.disable_vars().iter().copied().find(|var| config::toggle_value(var, env(var).as_deref()));
        if let Some(var) = disabled_by {
            tracing::debug!(program, var, "External decoder disabled by environment");
            return None;
        }
        let found = match search_path {
            Some(paths) => which::which_in(program, Some(paths), Path::new(".")),
            None => which::which(program),
        };
        match found {
            Ok(path) => {
                tracing::debug!(program, path = %path.display(), "Found external decoder");
                Some(path)
            },
            Err(err) => {
                tracing::debug!(program, error = %err, "External decoder not found");
                None
            },
        }
    }
}

/// The preferred installed gzip accelerator, if any.
pub(crate) fn gzip_accelerator() -> Option<(ExternalTool, &'static Path)> {
    GZIP_ACCELERATORS.into_iter().find_map(|tool| tool.path().map(|path| (tool, path)))
}

/// Like [`gzip_accelerator`], but resolved against `search_path` and `env`
/// instead of the cached process-wide answer.
pub(crate) fn gzip_accelerator_in<F>(search_path: Option<&OsStr>, env: F) -> Option<(ExternalTool, PathBuf)>
where
    F: Fn(&str) -> Option<String>,
{
    GZIP_ACCELERATORS.into_iter().find_map(|tool| tool.discover_in(search_path, &env).map(|path| (tool, path)))
}
