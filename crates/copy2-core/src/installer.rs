use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use copy2_platform::HideWindow;
use log::{debug, info};
use thiserror::Error;

use crate::session::{UpdateSession, UpdateTarget, mark_installer_owned};
use crate::stage::StagedPaths;

/// Hidden argument that makes the application exit 0 before any
/// initialization.
pub const SELF_TEST_FLAG: &str = "--self-test";
pub const SELF_TEST_ATTEMPTS: u32 = 5;
pub const SELF_TEST_BACKOFF_SECS: u32 = 2;
/// Variables exported by single-file bundle launchers. They would point the
/// new binary at the old bundle's mount.
pub const PACKAGING_ENV_VARS: [&str; 4] = ["APPIMAGE", "APPDIR", "ARGV0", "OWD"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlavor {
    /// POSIX `sh`.
    Posix,
    /// `cmd.exe` batch file.
    Batch,
}

impl ScriptFlavor {
    #[must_use]
    pub fn native() -> Self {
        if cfg!(windows) { Self::Batch } else { Self::Posix }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Posix => "sh",
            Self::Batch => "bat",
        }
    }
}

impl fmt::Display for ScriptFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Posix => "sh",
            Self::Batch => "batch",
        })
    }
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("update payload has not been staged")]
    NotStaged,
    #[error("path cannot be embedded in a {flavor} script: {}", .path.display())]
    UnsupportedPath { path: PathBuf, flavor: ScriptFlavor },
    #[error("{context} {}: {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScriptError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Final line the installer appends to its log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallerOutcome {
    /// Self-test passed; the new build is running.
    Committed,
    /// Self-test failed; the previous build was restored.
    RolledBack,
    /// Backup, swap or restore failed before a self-test could decide.
    Aborted,
}

impl InstallerOutcome {
    #[must_use]
    pub fn marker(self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::RolledBack => "rolled-back",
            Self::Aborted => "aborted",
        }
    }

    fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "committed" => Some(Self::Committed),
            "rolled-back" => Some(Self::RolledBack),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }
}

impl fmt::Display for InstallerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Most recent outcome recorded in an installer log.
#[must_use]
pub fn last_outcome(log_path: &Path) -> Option<InstallerOutcome> {
    let log = std::fs::read_to_string(log_path).ok()?;
    log.lines().rev().find_map(|line| {
        let (_, marker) = line.rsplit_once("outcome: ")?;
        InstallerOutcome::from_marker(marker.trim())
    })
}

/// Auxiliary program installed next to the target, best effort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryInstall {
    pub staged: PathBuf,
    pub destination: PathBuf,
}

/// Everything the installer needs, fixed at generation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerParams {
    pub pid: u32,
    pub target: PathBuf,
    pub target_dir: PathBuf,
    pub backup: PathBuf,
    pub staged_executable: PathBuf,
    pub auxiliary: Option<AuxiliaryInstall>,
    /// Removed once the installer is done with the staged files.
    pub staging_dir: Option<PathBuf>,
    pub log_path: PathBuf,
    pub self_test_attempts: u32,
    pub retry_delay_secs: u32,
}

impl InstallerParams {
    #[must_use]
    pub fn new(
        target: &UpdateTarget,
        staged: &StagedPaths,
        staging_dir: Option<PathBuf>,
        log_path: &Path,
    ) -> Self {
        let auxiliary = staged.auxiliary.as_ref().and_then(|staged_aux| {
            target.sibling(staged_aux).map(|destination| AuxiliaryInstall {
                staged: staged_aux.clone(),
                destination,
            })
        });
        Self {
            pid: target.pid,
            target: target.executable.clone(),
            target_dir: target.directory.clone(),
            backup: target.backup.clone(),
            staged_executable: staged.executable.clone(),
            auxiliary,
            staging_dir,
            log_path: log_path.to_path_buf(),
            self_test_attempts: SELF_TEST_ATTEMPTS,
            retry_delay_secs: SELF_TEST_BACKOFF_SECS,
        }
    }
}

/// A generated script on disk, ready to run detached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperScript {
    path: PathBuf,
    flavor: ScriptFlavor,
}

impl HelperScript {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn flavor(&self) -> ScriptFlavor {
        self.flavor
    }

    /// Start the script as an independent process. It is not waited on.
    ///
    /// # Errors
    /// Returns an error if the interpreter cannot be spawned.
    pub fn launch(&self) -> Result<(), ScriptError> {
        let mut command = match self.flavor {
            ScriptFlavor::Posix => {
                let shell = which::which("sh").unwrap_or_else(|_| PathBuf::from("/bin/sh"));
                let mut command = Command::new(shell);
                command.arg(&self.path);
                command
            }
            ScriptFlavor::Batch => {
                let mut command = Command::new("cmd");
                command.arg("/C").arg(&self.path);
                command
            }
        };
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .hide_window();

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command
            .spawn()
            .map_err(|error| ScriptError::io("failed to launch", &self.path, error))?;
        info!("Launched {}", self.path.display());
        Ok(())
    }
}

/// Write the installer for a staged session next to its staging directory.
///
/// The session's staging directory is handed over to the script, which
/// removes it when finished.
///
/// # Errors
/// Returns an error if the session has nothing staged, a path cannot be
/// represented in the native script language, or the script cannot be
/// written.
pub fn build_installer(session: UpdateSession, log_path: &Path) -> Result<HelperScript, ScriptError> {
    if session.staged().is_none() {
        return Err(ScriptError::NotStaged);
    }
    let script_dir = session
        .staging_dir()
        .parent()
        .map_or_else(std::env::temp_dir, Path::to_path_buf);

    let (staging_dir, target, staged) = session.release();
    let Some(staged) = staged else {
        return Err(ScriptError::NotStaged);
    };

    let params = InstallerParams::new(&target, &staged, Some(staging_dir.clone()), log_path);
    let flavor = ScriptFlavor::native();
    let script_path = script_dir.join(format!(
        "copy2-install-{}.{}",
        params.pid,
        flavor.extension()
    ));

    let result = render_installer(&params, flavor)
        .and_then(|contents| write_script(&script_path, &contents))
        .and_then(|()| {
            mark_installer_owned(&staging_dir, &script_path).map_err(|error| {
                ScriptError::io("failed to mark staging directory", &staging_dir, error)
            })
        });
    if let Err(error) = result {
        let _ = std::fs::remove_file(&script_path);
        let _ = std::fs::remove_dir_all(&staging_dir);
        return Err(error);
    }

    debug!("Installer script written to {}", script_path.display());
    Ok(HelperScript {
        path: script_path,
        flavor,
    })
}

/// # Errors
/// Returns an error if a path cannot be represented in `flavor`.
pub fn render_installer(params: &InstallerParams, flavor: ScriptFlavor) -> Result<String, ScriptError> {
    match flavor {
        ScriptFlavor::Posix => render_posix_installer(params),
        ScriptFlavor::Batch => render_batch_installer(params),
    }
}

fn render_posix_installer(params: &InstallerParams) -> Result<String, ScriptError> {
    let empty = "''".to_string();
    let (staged_aux, aux_target) = match &params.auxiliary {
        Some(aux) => (sh_quote(&aux.staged)?, sh_quote(&aux.destination)?),
        None => (empty.clone(), empty.clone()),
    };
    let staging_dir = match &params.staging_dir {
        Some(dir) => sh_quote(dir)?,
        None => empty,
    };

    let mut script = String::from("#!/bin/sh\n");
    script.push_str(&format!(
        "# Copy2 installer for process {pid}. Generated; removes itself when done.\n\
         PID={pid}\n\
         TARGET={target}\n\
         TARGET_DIR={target_dir}\n\
         BACKUP={backup}\n\
         STAGED={staged}\n\
         STAGED_AUX={staged_aux}\n\
         AUX_TARGET={aux_target}\n\
         STAGING_DIR={staging_dir}\n\
         LOG={log}\n\
         ATTEMPTS={attempts}\n\
         BACKOFF={backoff}\n\
         SELF_TEST_FLAG={flag}\n\
         RESET_VARS='{reset}'\n",
        pid = params.pid,
        target = sh_quote(&params.target)?,
        target_dir = sh_quote(&params.target_dir)?,
        backup = sh_quote(&params.backup)?,
        staged = sh_quote(&params.staged_executable)?,
        log = sh_quote(&params.log_path)?,
        attempts = params.self_test_attempts.max(1),
        backoff = params.retry_delay_secs,
        flag = SELF_TEST_FLAG,
        reset = PACKAGING_ENV_VARS.join(" "),
    ));
    script.push_str(POSIX_INSTALLER_BODY);
    Ok(script)
}

fn render_batch_installer(params: &InstallerParams) -> Result<String, ScriptError> {
    let mut script = String::from("@echo off\nsetlocal\n");
    script.push_str(&format!(
        "rem Copy2 installer for process {pid}. Generated; removes itself when done.\n\
         set \"PID={pid}\"\n\
         set \"TARGET={target}\"\n\
         set \"TARGET_DIR={target_dir}\"\n\
         set \"BACKUP={backup}\"\n\
         set \"STAGED={staged}\"\n\
         set \"LOG={log}\"\n\
         set \"ATTEMPTS={attempts}\"\n\
         set \"BACKOFF={backoff}\"\n\
         set \"SELF_TEST_FLAG={flag}\"\n\
         set \"RESET_VARS={reset}\"\n",
        pid = params.pid,
        target = batch_value(&params.target)?,
        target_dir = batch_value(&params.target_dir)?,
        backup = batch_value(&params.backup)?,
        staged = batch_value(&params.staged_executable)?,
        log = batch_value(&params.log_path)?,
        attempts = params.self_test_attempts.max(1),
        backoff = params.retry_delay_secs,
        flag = SELF_TEST_FLAG,
        reset = PACKAGING_ENV_VARS.join(" "),
    ));
    match &params.auxiliary {
        Some(aux) => script.push_str(&format!(
            "set \"STAGED_AUX={}\"\nset \"AUX_TARGET={}\"\n",
            batch_value(&aux.staged)?,
            batch_value(&aux.destination)?
        )),
        None => script.push_str("set \"STAGED_AUX=\"\nset \"AUX_TARGET=\"\n"),
    }
    match &params.staging_dir {
        Some(dir) => script.push_str(&format!("set \"STAGING_DIR={}\"\n", batch_value(dir)?)),
        None => script.push_str("set \"STAGING_DIR=\"\n"),
    }
    script.push_str(BATCH_INSTALLER_BODY);
    Ok(script.replace('\n', "\r\n"))
}

/// Script that waits for `pid` to exit, then deletes `files` and itself.
///
/// # Errors
/// Returns an error if a path cannot be represented in `flavor`.
pub fn render_cleanup(pid: u32, files: &[PathBuf], flavor: ScriptFlavor) -> Result<String, ScriptError> {
    match flavor {
        ScriptFlavor::Posix => {
            let mut script = format!(
                "#!/bin/sh\n\
                 # Copy2 cleanup for process {pid}. Generated; removes itself when done.\n\
                 while kill -0 {pid} 2>/dev/null; do\n    sleep 1\ndone\n"
            );
            for file in files {
                script.push_str(&format!("rm -f {}\n", sh_quote(file)?));
            }
            script.push_str("rm -f \"$0\"\n");
            Ok(script)
        }
        ScriptFlavor::Batch => {
            let mut script = format!(
                "@echo off\n\
                 rem Copy2 cleanup for process {pid}. Generated; removes itself when done.\n\
                 :wait_for_exit\n\
                 tasklist /FI \"PID eq {pid}\" /NH 2>nul | find \" {pid} \" >nul\n\
                 if not errorlevel 1 (\n    timeout /t 1 /nobreak >nul\n    goto wait_for_exit\n)\n"
            );
            for file in files {
                script.push_str(&format!("del /f /q \"{}\" >nul 2>&1\n", batch_value(file)?));
            }
            script.push_str("(goto) 2>nul & del /f /q \"%~f0\"\n");
            Ok(script.replace('\n', "\r\n"))
        }
    }
}

/// Write a cleanup script for the running process into `dir`.
///
/// # Errors
/// Returns an error if a path cannot be represented or the script cannot be
/// written.
pub fn write_cleanup_script(files: &[PathBuf], dir: &Path) -> Result<HelperScript, ScriptError> {
    let pid = std::process::id();
    let flavor = ScriptFlavor::native();
    let contents = render_cleanup(pid, files, flavor)?;
    let path = dir.join(format!("copy2-cleanup-{pid}.{}", flavor.extension()));
    write_script(&path, &contents)?;
    Ok(HelperScript { path, flavor })
}

fn write_script(path: &Path, contents: &str) -> Result<(), ScriptError> {
    std::fs::write(path, contents).map_err(|error| ScriptError::io("failed to write", path, error))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .map_err(|error| ScriptError::io("failed to mark executable", path, error))?;
    }

    Ok(())
}

fn sh_quote(path: &Path) -> Result<String, ScriptError> {
    let text = path.to_str().ok_or_else(|| ScriptError::UnsupportedPath {
        path: path.to_path_buf(),
        flavor: ScriptFlavor::Posix,
    })?;
    Ok(format!("'{}'", text.replace('\'', r"'\''")))
}

fn batch_value(path: &Path) -> Result<String, ScriptError> {
    let unsupported = || ScriptError::UnsupportedPath {
        path: path.to_path_buf(),
        flavor: ScriptFlavor::Batch,
    };
    let text = path.to_str().ok_or_else(unsupported)?;
    if text.contains(['"', '\r', '\n']) {
        return Err(unsupported());
    }
    Ok(text.replace('%', "%%"))
}

const POSIX_INSTALLER_BODY: &str = r#"
log() {
    printf '%s %s\n' "$(date '+%Y-%m-%d %H:%M:%S')" "$*" >> "$LOG"
}

launch() {
    (cd "$TARGET_DIR" && exec "$TARGET" </dev/null >/dev/null 2>&1) &
}

finish() {
    if [ -n "$STAGING_DIR" ]; then
        rm -rf "$STAGING_DIR"
    fi
    log "outcome: $1"
    rm -f "$0"
    exit 0
}

log "installer started, waiting for process $PID to exit"
while kill -0 "$PID" 2>/dev/null; do
    sleep 1
done

log "backing up $TARGET to $BACKUP"
if ! cp -p "$TARGET" "$BACKUP"; then
    log "backup failed, leaving $TARGET untouched"
    launch
    finish aborted
fi

log "replacing $TARGET with $STAGED"
if ! cp "$STAGED" "$TARGET"; then
    log "swap failed, restoring backup"
    if ! cp -p "$BACKUP" "$TARGET"; then
        log "restore failed, backup kept at $BACKUP"
    fi
    finish aborted
fi
chmod 755 "$TARGET"

if [ -n "$STAGED_AUX" ]; then
    if cp "$STAGED_AUX" "$AUX_TARGET"; then
        chmod 755 "$AUX_TARGET"
        log "installed $AUX_TARGET"
    else
        log "could not install $AUX_TARGET, continuing"
    fi
fi

log "clearing packaging environment: $RESET_VARS"
unset $RESET_VARS

attempt=1
while :; do
    if "$TARGET" "$SELF_TEST_FLAG" </dev/null >/dev/null 2>&1; then
        log "self-test passed on attempt $attempt"
        rm -f "$BACKUP"
        launch
        finish committed
    fi
    log "self-test attempt $attempt failed"
    if [ "$attempt" -ge "$ATTEMPTS" ]; then
        break
    fi
    attempt=$((attempt + 1))
    sleep "$BACKOFF"
done

log "self-test failed after $ATTEMPTS attempts, rolling back"
if cp -p "$BACKUP" "$TARGET"; then
    launch
    finish rolled-back
fi
log "rollback failed, backup kept at $BACKUP"
finish aborted
"#;

const BATCH_INSTALLER_BODY: &str = r#"
call :log "installer started, waiting for process %PID% to exit"
:wait_for_exit
tasklist /FI "PID eq %PID%" /NH 2>nul | find " %PID% " >nul
if not errorlevel 1 (
    timeout /t 1 /nobreak >nul
    goto wait_for_exit
)

call :log "backing up target"
copy /Y "%TARGET%" "%BACKUP%" >nul
if errorlevel 1 (
    call :log "backup failed, leaving target untouched"
    call :launch
    set "OUTCOME=aborted"
    goto finish
)

call :log "replacing target with staged build"
copy /Y "%STAGED%" "%TARGET%" >nul
if errorlevel 1 (
    call :log "swap failed, restoring backup"
    copy /Y "%BACKUP%" "%TARGET%" >nul
    set "OUTCOME=aborted"
    goto finish
)

if defined STAGED_AUX (
    copy /Y "%STAGED_AUX%" "%AUX_TARGET%" >nul
    if errorlevel 1 (
        call :log "could not install auxiliary program, continuing"
    ) else (
        call :log "installed auxiliary program"
    )
)

call :log "clearing packaging environment"
for %%V in (%RESET_VARS%) do set "%%V="

set /a ATTEMPT=1
:self_test
"%TARGET%" %SELF_TEST_FLAG% <nul >nul 2>&1
if not errorlevel 1 goto commit
call :log "self-test attempt %ATTEMPT% failed"
if %ATTEMPT% GEQ %ATTEMPTS% goto rollback
set /a ATTEMPT+=1
timeout /t %BACKOFF% /nobreak >nul
goto self_test

:commit
call :log "self-test passed on attempt %ATTEMPT%"
del /f /q "%BACKUP%" >nul 2>&1
call :launch
set "OUTCOME=committed"
goto finish

:rollback
call :log "self-test failed after %ATTEMPTS% attempts, rolling back"
copy /Y "%BACKUP%" "%TARGET%" >nul
if errorlevel 1 (
    call :log "rollback failed, backup kept"
    set "OUTCOME=aborted"
    goto finish
)
call :launch
set "OUTCOME=rolled-back"
goto finish

:finish
if defined STAGING_DIR rmdir /s /q "%STAGING_DIR%" >nul 2>&1
call :log "outcome: %OUTCOME%"
(goto) 2>nul & del /f /q "%~f0"

:launch
start "" /D "%TARGET_DIR%" "%TARGET%"
exit /b 0

:log
>> "%LOG%" echo %date% %time% %~1
exit /b 0
"#;
