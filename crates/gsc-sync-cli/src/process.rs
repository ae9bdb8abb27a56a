//! OS process host: detached worker launch and PID liveness checks.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::info;

use gsc_sync_core::error::AppError;
use gsc_sync_core::traits::{JobHandle, JobLauncher, LaunchRequest, Liveness, LivenessProbe};

/// Starts `gsc-sync sync --job-id N` as a detached background process.
///
/// The child gets its own process group so it survives the terminal that
/// ran `trigger`. Its stdout and stderr are appended to the job's log file.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    config_path: Option<PathBuf>,
    global_args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config_path: None,
            global_args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Launches the currently running executable.
    pub fn current_exe() -> Result<Self, AppError> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Forwards `--config PATH` to the worker.
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Adds flags placed before the `sync` subcommand.
    pub fn with_global_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.global_args.extend(args);
        self
    }

    /// Sets an environment variable on the worker.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn command(&self, request: &LaunchRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(path) = &self.config_path {
            cmd.arg("--config").arg(path);
        }
        cmd.args(&self.global_args);
        cmd.arg("sync").arg("--job-id").arg(request.job_id.to_string());
        if let Some(site_id) = request.site_id {
            cmd.arg("--site-id").arg(site_id.to_string());
        }
        cmd.envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd
    }
}

impl JobLauncher for ProcessLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<JobHandle, AppError> {
        if let Some(parent) = request.log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&request.log_file)?;
        let stderr = stdout.try_clone()?;

        let mut cmd = self.command(request);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn()?;
        let pid = i32::try_from(child.id())
            .map_err(|_| AppError::Generic(format!("process id {} out of range", child.id())))?;

        info!(
            job_id = request.job_id,
            pid,
            log_file = %request.log_file.display(),
            "Worker launched"
        );

        Ok(JobHandle {
            job_id: request.job_id,
            pid: Some(pid),
            log_file: Some(request.log_file.clone()),
        })
    }
}

/// Checks process existence with signal 0 and terminates with SIGTERM.
#[derive(Debug, Clone, Copy, Default)]
pub struct PidProbe;

#[cfg(unix)]
impl LivenessProbe for PidProbe {
    fn probe(&self, pid: i32) -> Liveness {
        if pid <= 0 {
            return Liveness::Unknown;
        }
        // SAFETY: signal 0 only checks existence and permission.
        if unsafe { libc::kill(pid, 0) } == 0 {
            return Liveness::Alive;
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::ESRCH) => Liveness::Dead,
            // Exists but owned by someone else.
            Some(libc::EPERM) => Liveness::Alive,
            _ => Liveness::Unknown,
        }
    }

    fn terminate(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        // SAFETY: plain kill(2) on a positive pid; never a process group.
        unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
    }
}

#[cfg(not(unix))]
impl LivenessProbe for PidProbe {
    fn probe(&self, _pid: i32) -> Liveness {
        Liveness::Unknown
    }

    fn terminate(&self, _pid: i32) -> bool {
        false
    }
}
