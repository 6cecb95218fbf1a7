//! Launch planning
//!
//! Decides which executable to run and how: directly, or through the user's
//! login shell so the child sees the same environment an interactive
//! terminal would (API keys, proxies, version managers).

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable that points at a specific agent executable
pub const EXECUTABLE_OVERRIDE_VAR: &str = "AGENT_BRIDGE_EXECUTABLE";

/// Shells whose `-lc` behaves like `sh`; anything else is spawned directly
const LOGIN_SHELLS: &[&str] = &["bash", "zsh", "sh"];

// ============================================================================
// Executable Resolution
// ============================================================================

/// Where the executable path came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableSource {
    /// Set explicitly in the bridge configuration
    Configured,
    /// Taken from `AGENT_BRIDGE_EXECUTABLE`
    Override,
    /// Shipped alongside the application resources
    Bundled,
    /// Bare program name, looked up through `PATH` at spawn time
    Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedExecutable {
    pub program: PathBuf,
    pub source: ExecutableSource,
}

/// `<os>-<arch>` directory name used for bundled binaries, e.g. `darwin-arm64`
pub fn platform_dir() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "ia32",
        other => other,
    };
    format!("{os}-{arch}")
}

fn executable_file_name(program_name: &str) -> String {
    if cfg!(windows) {
        format!("{program_name}.exe")
    } else {
        program_name.to_string()
    }
}

/// `<resources>/<program>/bin/<platform>/<program>[.exe]` if it exists
pub fn bundled_executable(resources_dir: &Path, program_name: &str) -> Option<PathBuf> {
    let candidate = resources_dir
        .join(program_name)
        .join("bin")
        .join(platform_dir())
        .join(executable_file_name(program_name));
    candidate.is_file().then_some(candidate)
}

/// Pick the executable: configured path, then override variable, then
/// bundled binary, then `PATH` lookup by name
pub fn resolve_executable(
    configured: Option<&Path>,
    env: &HashMap<String, String>,
    resources_dir: Option<&Path>,
    program_name: &str,
) -> ResolvedExecutable {
    if let Some(path) = configured {
        return ResolvedExecutable {
            program: path.to_path_buf(),
            source: ExecutableSource::Configured,
        };
    }

    if let Some(path) = env
        .get(EXECUTABLE_OVERRIDE_VAR)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
    {
        if path.exists() {
            return ResolvedExecutable {
                program: path,
                source: ExecutableSource::Override,
            };
        }
        debug!(
            "{} points at missing file {}, ignoring",
            EXECUTABLE_OVERRIDE_VAR,
            path.display()
        );
    }

    if let Some(path) = resources_dir.and_then(|dir| bundled_executable(dir, program_name)) {
        return ResolvedExecutable {
            program: path,
            source: ExecutableSource::Bundled,
        };
    }

    ResolvedExecutable {
        program: PathBuf::from(program_name),
        source: ExecutableSource::Path,
    }
}

/// Add missing execute bits to a copied-around binary
#[cfg(unix)]
pub fn ensure_executable_is_runnable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)?;
    let mode = metadata.permissions().mode();
    if mode & 0o111 == 0 {
        warn!(
            "Executable bit missing on {}, setting mode {:o}",
            path.display(),
            mode | 0o755
        );
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode | 0o755))?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn ensure_executable_is_runnable(_path: &Path) -> io::Result<()> {
    Ok(())
}

// ============================================================================
// Launch Strategy
// ============================================================================

/// Quote a value for sh/bash/zsh: `abc'd` becomes `'abc'"'"'d'`
pub fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

fn default_shell() -> &'static str {
    if cfg!(target_os = "macos") {
        "/bin/zsh"
    } else {
        "/bin/bash"
    }
}

/// The user's shell, if it is one we can drive with `-lc`
pub fn resolve_login_shell(env: &HashMap<String, String>) -> Option<PathBuf> {
    if cfg!(windows) {
        return None;
    }

    let shell = env
        .get("SHELL")
        .filter(|shell| !shell.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default_shell()));

    let name = shell.file_name()?.to_str()?;
    LOGIN_SHELLS.contains(&name).then_some(shell)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchStrategy {
    /// Spawn the executable itself
    Direct,
    /// `<shell> -lc "exec <command line>"`
    LoginShell { shell: PathBuf },
}

/// Everything needed to spawn one child
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub strategy: LaunchStrategy,
}

impl LaunchPlan {
    /// Build a plan, choosing the login shell when allowed and available
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        working_directory: Option<PathBuf>,
        env: HashMap<String, String>,
        use_login_shell: bool,
    ) -> Self {
        let strategy = match use_login_shell.then(|| resolve_login_shell(&env)).flatten() {
            Some(shell) => LaunchStrategy::LoginShell { shell },
            None => LaunchStrategy::Direct,
        };

        Self {
            program,
            args,
            working_directory,
            env,
            strategy,
        }
    }

    /// Shell-quoted command line of the executable and its arguments
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .map(|part| sh_quote(&part))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Program and arguments actually handed to the OS
    pub fn argv(&self) -> (PathBuf, Vec<String>) {
        match &self.strategy {
            LaunchStrategy::Direct => (self.program.clone(), self.args.clone()),
            LaunchStrategy::LoginShell { shell } => (
                shell.clone(),
                vec!["-lc".to_string(), format!("exec {}", self.command_line())],
            ),
        }
    }

    /// Human-readable form for diagnostics
    pub fn describe(&self) -> String {
        let (program, args) = self.argv();
        std::iter::once(program.to_string_lossy().into_owned())
            .chain(args)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env_with(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn write_file(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "#!/bin/sh\n").unwrap();
    }

    #[test]
    fn test_sh_quote() {
        assert_eq!(sh_quote("codex"), "'codex'");
        assert_eq!(sh_quote("abc'd"), "'abc'\"'\"'d'");
        assert_eq!(sh_quote("/Applications/My App/codex"), "'/Applications/My App/codex'");
    }

    #[cfg(unix)]
    #[test]
    fn test_login_shell_selection() {
        let shell = resolve_login_shell(&env_with(&[("SHELL", "/usr/bin/zsh")]));
        assert_eq!(shell, Some(PathBuf::from("/usr/bin/zsh")));

        assert_eq!(
            resolve_login_shell(&env_with(&[("SHELL", "/bin/sh")])),
            Some(PathBuf::from("/bin/sh"))
        );
        assert_eq!(
            resolve_login_shell(&env_with(&[("SHELL", "/usr/local/bin/fish")])),
            None
        );
        assert_eq!(
            resolve_login_shell(&env_with(&[])),
            Some(PathBuf::from(default_shell()))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_login_shell_plan() {
        let plan = LaunchPlan::new(
            PathBuf::from("/opt/it's/codex"),
            vec!["app-server".to_string()],
            None,
            env_with(&[("SHELL", "/bin/bash")]),
            true,
        );

        assert_eq!(
            plan.strategy,
            LaunchStrategy::LoginShell {
                shell: PathBuf::from("/bin/bash")
            }
        );
        let (program, args) = plan.argv();
        assert_eq!(program, PathBuf::from("/bin/bash"));
        assert_eq!(
            args,
            vec![
                "-lc".to_string(),
                "exec '/opt/it'\"'\"'s/codex' 'app-server'".to_string()
            ]
        );
    }

    #[test]
    fn test_direct_plan() {
        let plan = LaunchPlan::new(
            PathBuf::from("codex"),
            vec!["app-server".to_string()],
            None,
            env_with(&[("SHELL", "/usr/bin/fish")]),
            true,
        );
        assert_eq!(plan.strategy, LaunchStrategy::Direct);
        assert_eq!(plan.describe(), "codex app-server");

        let plan = LaunchPlan::new(
            PathBuf::from("codex"),
            vec![],
            None,
            env_with(&[("SHELL", "/bin/zsh")]),
            false,
        );
        assert_eq!(plan.strategy, LaunchStrategy::Direct);
    }

    #[test]
    fn test_resolution_order() {
        let resources = TempDir::new().unwrap();
        let bundled = resources
            .path()
            .join("codex")
            .join("bin")
            .join(platform_dir())
            .join(executable_file_name("codex"));
        let override_path = resources.path().join("custom-codex");

        // Nothing available: PATH lookup by name
        let resolved = resolve_executable(None, &env_with(&[]), Some(resources.path()), "codex");
        assert_eq!(resolved.source, ExecutableSource::Path);
        assert_eq!(resolved.program, PathBuf::from("codex"));

        write_file(&bundled);
        let resolved = resolve_executable(None, &env_with(&[]), Some(resources.path()), "codex");
        assert_eq!(resolved.source, ExecutableSource::Bundled);
        assert_eq!(resolved.program, bundled);

        // Override pointing at a missing file is ignored
        let env = env_with(&[(EXECUTABLE_OVERRIDE_VAR, override_path.to_str().unwrap())]);
        let resolved = resolve_executable(None, &env, Some(resources.path()), "codex");
        assert_eq!(resolved.source, ExecutableSource::Bundled);

        write_file(&override_path);
        let resolved = resolve_executable(None, &env, Some(resources.path()), "codex");
        assert_eq!(resolved.source, ExecutableSource::Override);
        assert_eq!(resolved.program, override_path);

        let resolved = resolve_executable(
            Some(Path::new("/explicit/codex")),
            &env,
            Some(resources.path()),
            "codex",
        );
        assert_eq!(resolved.source, ExecutableSource::Configured);
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_executable_adds_execute_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("codex");
        write_file(&path);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        ensure_executable_is_runnable(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_executable_missing_file() {
        assert!(ensure_executable_is_runnable(Path::new("/definitely/not/here")).is_err());
    }
}
