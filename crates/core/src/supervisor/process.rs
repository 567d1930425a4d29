//! OS process control behind a mockable trait.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::config::SupervisorConfig;
use super::types::{ProcessHandle, ServiceSpec, SupervisorError};

/// Environment variables passed through to supervised services.
pub const ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "USER", "LANG", "LC_ALL", "TZ", "TMPDIR"];

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const EXIT_POLL: Duration = Duration::from_millis(100);

/// Starts, stops and inspects service processes.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Start a detached instance of the service.
    async fn start(&self, spec: &ServiceSpec) -> Result<ProcessHandle, SupervisorError>;

    /// Terminate a process, escalating to a hard kill if it lingers.
    async fn stop(&self, handle: &ProcessHandle) -> Result<(), SupervisorError>;

    /// Whether something accepts TCP connections on the local port.
    async fn is_listening(&self, port: u16) -> bool;

    /// Pids of the processes listening on the local port.
    async fn port_owners(&self, port: u16) -> Result<Vec<u32>, SupervisorError>;
}

/// [`ProcessSupervisor`] backed by the host operating system.
pub struct OsProcessSupervisor {
    log_dir: PathBuf,
    max_log_bytes: u64,
    max_log_files: u32,
    kill_wait: Duration,
}

impl OsProcessSupervisor {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            log_dir: config.log_dir.clone(),
            max_log_bytes: config.max_log_bytes,
            max_log_files: config.max_log_files,
            kill_wait: config.kill_wait(),
        }
    }

    /// Log file a service writes to.
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", name))
    }

    fn open_log(&self, name: &str) -> Result<(File, File), SupervisorError> {
        let path = self.log_path(name);
        let log_err = |source| SupervisorError::LogFile {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.log_dir).map_err(log_err)?;
        rotate_log(&path, self.max_log_bytes, self.max_log_files).map_err(log_err)?;

        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(log_err)?;
        let stderr = stdout.try_clone().map_err(log_err)?;
        Ok((stdout, stderr))
    }
}

#[async_trait]
impl ProcessSupervisor for OsProcessSupervisor {
    async fn start(&self, spec: &ServiceSpec) -> Result<ProcessHandle, SupervisorError> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| SupervisorError::EmptyCommand(spec.name.clone()))?;
        let (stdout, stderr) = self.open_log(&spec.name)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env_clear()
            .envs(allowed_env())
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .kill_on_drop(false);

        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let child = cmd.spawn().map_err(|source| SupervisorError::SpawnFailed {
            name: spec.name.clone(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| SupervisorError::SpawnFailed {
            name: spec.name.clone(),
            source: std::io::Error::other("process exited before its pid was read"),
        })?;

        info!(service = %spec.name, pid, port = spec.port, "Started service");
        Ok(ProcessHandle {
            name: spec.name.clone(),
            pid,
        })
    }

    async fn stop(&self, handle: &ProcessHandle) -> Result<(), SupervisorError> {
        #[allow(clippy::cast_possible_wrap)]
        let target = Pid::from_raw(handle.pid as i32);

        match kill(target, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return Ok(()),
            Err(e) => {
                return Err(SupervisorError::Signal {
                    pid: handle.pid,
                    message: e.to_string(),
                })
            }
        }

        let deadline = tokio::time::Instant::now() + self.kill_wait;
        while tokio::time::Instant::now() < deadline {
            if kill(target, None).is_err() {
                debug!(pid = handle.pid, "Process exited after SIGTERM");
                return Ok(());
            }
            tokio::time::sleep(EXIT_POLL).await;
        }

        warn!(pid = handle.pid, name = %handle.name, "Process still alive, sending SIGKILL");
        match kill(target, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(SupervisorError::Signal {
                pid: handle.pid,
                message: e.to_string(),
            }),
        }
    }

    async fn is_listening(&self, port: u16) -> bool {
        matches!(
            tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
            Ok(Ok(_))
        )
    }

    async fn port_owners(&self, port: u16) -> Result<Vec<u32>, SupervisorError> {
        let output = Command::new("lsof")
            .arg("-t")
            .arg(format!("-iTCP:{}", port))
            .arg("-sTCP:LISTEN")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SupervisorError::PortLookup {
                port,
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        // lsof exits 1 with no output when nothing matches.
        if !output.status.success() && !stdout.trim().is_empty() {
            return Err(SupervisorError::PortLookup {
                port,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_pids(&stdout))
    }
}

fn allowed_env() -> Vec<(String, String)> {
    ENV_ALLOWLIST
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
        .collect()
}

fn parse_pids(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Shift `name.log` to `name.log.1`, `.1` to `.2` and so on once it reaches `max_bytes`.
///
/// At most `max_files` rotated files are kept; the oldest is overwritten.
pub fn rotate_log(path: &Path, max_bytes: u64, max_files: u32) -> std::io::Result<()> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if size < max_bytes {
        return Ok(());
    }

    if max_files == 0 {
        return fs::remove_file(path);
    }

    let rotated = |n: u32| {
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    };

    for n in (1..max_files).rev() {
        let from = rotated(n);
        if from.exists() {
            fs::rename(&from, rotated(n + 1))?;
        }
    }
    fs::rename(path, rotated(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn supervisor(dir: &Path) -> OsProcessSupervisor {
        OsProcessSupervisor::new(&SupervisorConfig {
            log_dir: dir.to_path_buf(),
            kill_wait_ms: 500,
            ..Default::default()
        })
    }

    #[test]
    fn test_parse_pids() {
        assert_eq!(parse_pids("42\n7\n42\n\n"), vec![7, 42]);
        assert!(parse_pids("").is_empty());
        assert_eq!(parse_pids("12\nnot-a-pid\n"), vec![12]);
    }

    #[test]
    fn test_rotate_log_below_limit_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("svc.log");
        fs::write(&path, b"short").unwrap();

        rotate_log(&path, 1024, 3).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("svc.log.1").exists());
    }

    #[test]
    fn test_rotate_log_shifts_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("svc.log");
        fs::write(dir.path().join("svc.log.1"), b"older").unwrap();
        fs::write(dir.path().join("svc.log.2"), b"oldest").unwrap();
        fs::write(&path, b"current contents").unwrap();

        rotate_log(&path, 4, 2).unwrap();

        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("svc.log.1")).unwrap(),
            "current contents"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("svc.log.2")).unwrap(),
            "older"
        );
        assert!(!dir.path().join("svc.log.3").exists());
    }

    #[test]
    fn test_rotate_missing_log() {
        let dir = TempDir::new().unwrap();
        rotate_log(&dir.path().join("absent.log"), 1, 3).unwrap();
    }

    #[tokio::test]
    async fn test_start_writes_to_service_log() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(dir.path());
        let mut env = BTreeMap::new();
        env.insert("GREETING".to_string(), "hello".to_string());
        let spec = ServiceSpec {
            name: "echoer".to_string(),
            port: 1,
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo $GREETING; echo ${SECRET_TOKEN:-unset}".to_string(),
            ],
            health_url: "http://127.0.0.1:1/health".to_string(),
            cwd: None,
            env,
        };

        let handle = sup.start(&spec).await.unwrap();
        assert!(handle.pid > 0);

        let log = sup.log_path("echoer");
        let mut contents = String::new();
        for _ in 0..50 {
            contents = fs::read_to_string(&log).unwrap_or_default();
            if contents.lines().count() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(contents, "hello\nunset\n");
    }

    #[tokio::test]
    async fn test_start_empty_command_fails() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(dir.path());
        let spec = ServiceSpec {
            name: "nothing".to_string(),
            port: 1,
            command: vec![],
            health_url: "http://127.0.0.1:1/health".to_string(),
            cwd: None,
            env: BTreeMap::new(),
        };
        let err = sup.start(&spec).await.unwrap_err();
        assert!(matches!(err, SupervisorError::EmptyCommand(_)));
    }

    #[tokio::test]
    async fn test_stop_terminates_process() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(dir.path());
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let handle = ProcessHandle {
            name: "sleeper".to_string(),
            pid: child.id().unwrap(),
        };

        sup.stop(&handle).await.unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_is_listening() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(dir.path());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(sup.is_listening(port).await);
        drop(listener);
        assert!(!sup.is_listening(port).await);
    }
}
