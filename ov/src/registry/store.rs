//! Process registry
//!
//! One JSON record per process under `processes/`, side logs under
//! `logs/`, cooperative stop-request sentinels under `stop-requests/`.
//! Liveness is never pushed: the TTL sweep and the dead-pid sweep both
//! run as a side effect of `list()`, so staleness between calls is
//! unbounded by design.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::logs::{ProcessLogs, WhisperEntry};
use super::record::{ProcessKind, ProcessRecord, ProcessStatus, ProcessTarget};

/// Terminal records older than this are purged by the TTL sweep
const RETENTION_SECS: i64 = 300;

/// Env var carrying the launch record id to the child, so the child
/// adopts the launcher's record instead of registering a second one
pub const RECORD_ID_ENV: &str = "OVERSEER_RECORD_ID";

/// How long `launch` polls for the new record to become observable
const LAUNCH_POLL_ATTEMPTS: u32 = 20;
const LAUNCH_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Process not found: {0}")]
    NotFound(String),

    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Launched process record never became observable: {0}")]
    NotObservable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed process record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The process registry rooted at a directory
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    root: PathBuf,
    logs: ProcessLogs,
}

impl ProcessRegistry {
    /// Open or create a registry at the given root
    pub fn open(root: impl AsRef<Path>) -> eyre::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("processes"))?;
        fs::create_dir_all(root.join("stop-requests"))?;
        let logs = ProcessLogs::open(root.join("logs"))?;
        Ok(Self { root, logs })
    }

    /// The side-log store for this registry
    pub fn logs(&self) -> &ProcessLogs {
        &self.logs
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join("processes").join(format!("{}.json", id))
    }

    fn stop_request_path(&self, id: &str) -> PathBuf {
        self.root.join("stop-requests").join(id.to_string())
    }

    /// Spawn an OS process and return its registry id once the
    /// `starting` record is observable. The id is pre-assigned and
    /// handed to the child via [`RECORD_ID_ENV`]; the child adopts the
    /// same record, flipping it to `running` in place. Bounded poll;
    /// never blocks on the child doing anything.
    pub fn launch(&self, kind: ProcessKind, command: &str, args: &[String]) -> Result<String, RegistryError> {
        debug!(%kind, %command, ?args, "ProcessRegistry::launch: called");

        let id = queuestore::generate_id();
        let child = Command::new(command)
            .args(args)
            .env(RECORD_ID_ENV, &id)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RegistryError::SpawnFailed(format!("{}: {}", command, e)))?;

        // A fast child may already have adopted the id; its record wins.
        if self.get(&id).is_none() {
            self.write_record(&ProcessRecord::with_id(&id, kind, child.id()))?;
        }

        // Read-back poll: return only once another reader would see it.
        let path = self.record_path(&id);
        for _ in 0..LAUNCH_POLL_ATTEMPTS {
            if read_record(&path).is_some() {
                info!(%id, pid = child.id(), %kind, "Process launched");
                return Ok(id);
            }
            std::thread::sleep(LAUNCH_POLL_INTERVAL);
        }
        Err(RegistryError::NotObservable(id))
    }

    /// Register the calling process itself as `running`
    pub fn register_self(&self, kind: ProcessKind) -> Result<ProcessRecord, RegistryError> {
        let mut record = ProcessRecord::new(kind, std::process::id());
        record.status = ProcessStatus::Running;
        self.write_record(&record)?;
        info!(id = %record.id, pid = record.pid, %kind, "Registered self");
        Ok(record)
    }

    /// Take over the launch record handed down via [`RECORD_ID_ENV`]:
    /// same id, own pid, `running`. Creates the record when the child
    /// beats the launcher's write.
    pub fn adopt(&self, id: &str, kind: ProcessKind) -> Result<ProcessRecord, RegistryError> {
        debug!(%id, %kind, "ProcessRegistry::adopt: called");
        let mut record = self
            .get(id)
            .unwrap_or_else(|| ProcessRecord::with_id(id, kind, 0));
        record.kind = kind;
        record.pid = std::process::id();
        record.status = ProcessStatus::Running;
        self.write_record(&record)?;
        info!(%id, pid = record.pid, %kind, "Adopted launch record");
        Ok(record)
    }

    /// Read one record
    pub fn get(&self, id: &str) -> Option<ProcessRecord> {
        read_record(&self.record_path(id))
    }

    /// Rewrite a record (temp + atomic rename)
    pub fn write_record(&self, record: &ProcessRecord) -> Result<(), RegistryError> {
        let path = self.record_path(&record.id);
        let json = serde_json::to_string_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Update a record's status. Any terminal status stamps `failed_at`
    /// so the TTL sweep has a terminal instant to age against.
    pub fn set_status(&self, id: &str, status: ProcessStatus) -> Result<ProcessRecord, RegistryError> {
        let mut record = self.get(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        record.status = status;
        if !status.is_live() {
            record.failed_at = Some(Utc::now());
        }
        self.write_record(&record)?;
        Ok(record)
    }

    /// Attach/detach the task and worker session a loop currently holds
    pub fn set_current_task(
        &self,
        id: &str,
        task_id: Option<String>,
        worker_session_id: Option<String>,
    ) -> Result<(), RegistryError> {
        let mut record = self.get(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        record.task_id = task_id;
        record.worker_session_id = worker_session_id;
        self.write_record(&record)?;
        Ok(())
    }

    /// List records matching a target, running both passive sweeps
    /// first. This call is the only death-detection mechanism; read
    /// latency is O(registered processes).
    pub fn list(&self, filter: Option<&ProcessTarget>) -> Result<Vec<ProcessRecord>, RegistryError> {
        debug!(?filter, "ProcessRegistry::list: called");
        self.ttl_sweep()?;
        self.liveness_sweep()?;

        let mut records = self.read_all()?;
        if let Some(target) = filter {
            records.retain(|r| target.matches(r));
        }
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(records)
    }

    fn read_all(&self) -> Result<Vec<ProcessRecord>, RegistryError> {
        let dir = self.root.join("processes");
        let mut records = Vec::new();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match read_record(&path) {
                Some(record) => records.push(record),
                None => warn!(path = %path.display(), "Skipping unreadable process record"),
            }
        }
        Ok(records)
    }

    /// Purge terminal records (and their logs and stop sentinels) past
    /// the retention window
    fn ttl_sweep(&self) -> Result<(), RegistryError> {
        let now = Utc::now();
        for record in self.read_all()? {
            let purgeable = !record.status.is_live();
            if purgeable && record.terminal_age(now) > chrono::Duration::seconds(RETENTION_SECS) {
                debug!(id = %record.id, status = %record.status, "TTL sweep purging record");
                self.remove(&record.id);
            }
        }
        Ok(())
    }

    /// Flip live records (`starting` or `running`) whose pid is gone
    /// from the OS process table to `stopped`, stamping `failed_at`.
    /// Covers children that died before adopting their launch record.
    fn liveness_sweep(&self) -> Result<(), RegistryError> {
        for mut record in self.read_all()? {
            if record.status.is_live() && !is_process_alive(record.pid) {
                warn!(id = %record.id, pid = record.pid, status = %record.status, "Liveness sweep found dead pid");
                record.status = ProcessStatus::Stopped;
                record.failed_at = Some(Utc::now());
                self.write_record(&record)?;
            }
        }
        Ok(())
    }

    /// Remove a record, its logs, and any stop sentinel
    pub fn remove(&self, id: &str) {
        for path in [self.record_path(id), self.stop_request_path(id)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove registry file"),
            }
        }
        self.logs.remove(id);
    }

    /// Write a cooperative stop-request sentinel for every live process
    /// matching the target. A request, not a guarantee: workers observe
    /// it between units of work. Returns the number of requests written.
    pub fn stop(&self, target: &ProcessTarget) -> Result<usize, RegistryError> {
        debug!(?target, "ProcessRegistry::stop: called");
        let mut requested = 0;
        for record in self.read_all()? {
            if target.matches(&record) && record.status.is_live() {
                fs::write(self.stop_request_path(&record.id), b"")?;
                info!(id = %record.id, "Stop requested");
                requested += 1;
            }
        }
        Ok(requested)
    }

    /// Has a cooperative stop been requested for this process?
    pub fn stop_requested(&self, id: &str) -> bool {
        self.stop_request_path(id).exists()
    }

    /// Hard path for workers blocked past the cooperative channel:
    /// SIGTERM the pid, mark the record `stopped`, and also write the
    /// stop sentinel so any racing cooperative check converges.
    pub fn kill(&self, target: &ProcessTarget) -> Result<usize, RegistryError> {
        debug!(?target, "ProcessRegistry::kill: called");
        let mut killed = 0;
        for mut record in self.read_all()? {
            if !target.matches(&record) || !record.status.is_live() {
                continue;
            }

            terminate_process(record.pid);

            record.status = ProcessStatus::Stopped;
            record.failed_at = Some(Utc::now());
            self.write_record(&record)?;
            fs::write(self.stop_request_path(&record.id), b"")?;

            info!(id = %record.id, pid = record.pid, "Process killed");
            killed += 1;
        }
        Ok(killed)
    }

    /// Append an operator instruction to matching whisper logs.
    /// Fire-and-forget: no acknowledgment exists or is awaited.
    pub fn whisper(&self, target: &ProcessTarget, message: &str, priority: &str) -> Result<usize, RegistryError> {
        debug!(?target, %priority, "ProcessRegistry::whisper: called");
        let entry = WhisperEntry {
            at: Utc::now(),
            priority: priority.to_string(),
            message: message.to_string(),
        };
        let mut whispered = 0;
        for record in self.read_all()? {
            if target.matches(&record) && record.status.is_live() {
                self.logs.append_whisper(&record.id, &entry);
                whispered += 1;
            }
        }
        Ok(whispered)
    }

    /// Force-mark every live record `stopped`. Part of the `reset`
    /// escape hatch.
    pub fn force_stop_all(&self) -> Result<usize, RegistryError> {
        let mut stopped = 0;
        for mut record in self.read_all()? {
            if record.status.is_live() {
                record.status = ProcessStatus::Stopped;
                record.failed_at = Some(Utc::now());
                self.write_record(&record)?;
                stopped += 1;
            }
        }
        if stopped > 0 {
            info!(stopped, "Force-stopped all live process records");
        }
        Ok(stopped)
    }

    /// Task ids held by live records whose pid is actually alive. Feeds
    /// the task store's analysing reconciliation.
    pub fn live_claimed_task_ids(&self) -> Result<std::collections::HashSet<String>, RegistryError> {
        let mut ids = std::collections::HashSet::new();
        for record in self.read_all()? {
            if record.status.is_live() && is_process_alive(record.pid) {
                if let Some(task_id) = record.task_id {
                    ids.insert(task_id);
                }
            }
        }
        Ok(ids)
    }
}

/// Read a record, treating disappearance or corruption as absence
fn read_record(path: &Path) -> Option<ProcessRecord> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed process record");
            None
        }
    }
}

/// Check if a process with the given pid is running
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        // Signal 0 checks existence without affecting the process
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[cfg(windows)]
    {
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH"])
            .output()
            .map(|o| !o.stdout.is_empty() && !String::from_utf8_lossy(&o.stdout).contains("No tasks"))
            .unwrap_or(false)
    }
}

/// Send a terminate signal to a pid
fn terminate_process(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(pid, error = %e, "SIGTERM failed");
        }
    }

    #[cfg(windows)]
    {
        let _ = Command::new("taskkill").args(["/PID", &pid.to_string(), "/F"]).output();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry(dir: &Path) -> ProcessRegistry {
        ProcessRegistry::open(dir).unwrap()
    }

    fn dead_running_record(reg: &ProcessRegistry) -> ProcessRecord {
        // Pid 0 is never a real process we own; use an absurd pid instead
        let mut record = ProcessRecord::new(ProcessKind::Execution, u32::MAX - 1);
        record.status = ProcessStatus::Running;
        reg.write_record(&record).unwrap();
        record
    }

    #[test]
    fn test_register_self_is_running_and_alive() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());

        let record = reg.register_self(ProcessKind::Execution).unwrap();
        assert_eq!(record.status, ProcessStatus::Running);
        assert_eq!(record.pid, std::process::id());

        let listed = reg.list(None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, ProcessStatus::Running);
    }

    #[test]
    fn test_launch_and_adopt_share_one_record() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());

        let id = reg.launch(ProcessKind::Execution, "true", &[]).unwrap();
        assert_eq!(reg.get(&id).unwrap().status, ProcessStatus::Starting);

        // The child side of the handoff: same id flips in place, no
        // second record appears
        let adopted = reg.adopt(&id, ProcessKind::Execution).unwrap();
        assert_eq!(adopted.id, id);
        assert_eq!(adopted.status, ProcessStatus::Running);
        assert_eq!(adopted.pid, std::process::id());

        let listed = reg.list(None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].status, ProcessStatus::Running);

        // A stop aimed at the launch id is the stop the loop observes
        assert_eq!(reg.stop(&ProcessTarget::Id(id.clone())).unwrap(), 1);
        assert!(reg.stop_requested(&id));
    }

    #[test]
    fn test_adopt_without_launcher_record_creates_it() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());

        let adopted = reg.adopt("pre-assigned-id", ProcessKind::Analysis).unwrap();
        assert_eq!(adopted.id, "pre-assigned-id");
        assert_eq!(adopted.status, ProcessStatus::Running);
        assert_eq!(adopted.pid, std::process::id());
    }

    #[test]
    fn test_dead_starting_record_is_swept_to_stopped() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());

        // A child that died before adopting leaves a starting record
        // with a dead pid; list() must not let it linger forever
        let record = ProcessRecord::new(ProcessKind::Execution, u32::MAX - 1);
        reg.write_record(&record).unwrap();

        let listed = reg.list(None).unwrap();
        assert_eq!(listed[0].status, ProcessStatus::Stopped);
        assert!(listed[0].failed_at.is_some());
    }

    #[test]
    fn test_liveness_sweep_flips_dead_pid_on_list_only() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        let record = dead_running_record(&reg);

        // Before list(), the record is untouched
        let raw = reg.get(&record.id).unwrap();
        assert_eq!(raw.status, ProcessStatus::Running);
        assert!(raw.failed_at.is_none());

        let listed = reg.list(None).unwrap();
        assert_eq!(listed[0].status, ProcessStatus::Stopped);
        assert!(listed[0].failed_at.is_some());
    }

    #[test]
    fn test_ttl_sweep_purges_old_terminal_records() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());

        let mut old = ProcessRecord::new(ProcessKind::OneShot, 1);
        old.status = ProcessStatus::Stopped;
        old.failed_at = Some(Utc::now() - chrono::Duration::minutes(10));
        reg.write_record(&old).unwrap();
        reg.logs.append_activity(&old.id, &super::super::logs::ActivityEntry::info("x"));

        let mut fresh = ProcessRecord::new(ProcessKind::OneShot, 2);
        fresh.status = ProcessStatus::Stopped;
        fresh.failed_at = Some(Utc::now());
        reg.write_record(&fresh).unwrap();

        let listed = reg.list(None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, fresh.id);
        assert!(!reg.logs.activity_path(&old.id).exists());
    }

    #[test]
    fn test_ttl_sweep_purges_old_completed_records() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());

        let mut record = ProcessRecord::new(ProcessKind::Execution, std::process::id());
        record.status = ProcessStatus::Running;
        reg.write_record(&record).unwrap();

        // A clean exit stamps the terminal instant
        let completed = reg.set_status(&record.id, ProcessStatus::Completed).unwrap();
        assert!(completed.failed_at.is_some());
        assert_eq!(reg.list(None).unwrap().len(), 1);

        // Age it past retention; the next list purges it
        let mut old = completed;
        old.failed_at = Some(Utc::now() - chrono::Duration::minutes(10));
        reg.write_record(&old).unwrap();
        assert!(reg.list(None).unwrap().is_empty());
    }

    #[test]
    fn test_stop_by_kind_targets_only_live_matching_processes() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());

        let mut exec1 = ProcessRecord::new(ProcessKind::Execution, std::process::id());
        exec1.status = ProcessStatus::Running;
        reg.write_record(&exec1).unwrap();

        let mut exec2 = ProcessRecord::new(ProcessKind::Execution, std::process::id());
        exec2.status = ProcessStatus::Starting;
        reg.write_record(&exec2).unwrap();

        let mut analysis = ProcessRecord::new(ProcessKind::Analysis, std::process::id());
        analysis.status = ProcessStatus::Running;
        reg.write_record(&analysis).unwrap();

        let mut done = ProcessRecord::new(ProcessKind::Execution, std::process::id());
        done.status = ProcessStatus::Completed;
        reg.write_record(&done).unwrap();

        let requested = reg.stop(&ProcessTarget::Kind(ProcessKind::Execution)).unwrap();
        assert_eq!(requested, 2);
        assert!(reg.stop_requested(&exec1.id));
        assert!(reg.stop_requested(&exec2.id));
        assert!(!reg.stop_requested(&analysis.id));
        assert!(!reg.stop_requested(&done.id));
    }

    #[test]
    fn test_kill_marks_stopped_and_writes_stop_sentinel() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        let record = dead_running_record(&reg);

        let killed = reg.kill(&ProcessTarget::Id(record.id.clone())).unwrap();
        assert_eq!(killed, 1);

        let after = reg.get(&record.id).unwrap();
        assert_eq!(after.status, ProcessStatus::Stopped);
        assert!(reg.stop_requested(&record.id));
    }

    #[test]
    fn test_whisper_appends_to_live_targets() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());

        let mut record = ProcessRecord::new(ProcessKind::Execution, std::process::id());
        record.status = ProcessStatus::Running;
        reg.write_record(&record).unwrap();

        let count = reg
            .whisper(&ProcessTarget::All, "prefer small commits", "normal")
            .unwrap();
        assert_eq!(count, 1);

        let chunk = reg.logs.tail_whisper(&record.id, 0, None);
        assert_eq!(chunk.lines.len(), 1);
        assert!(chunk.lines[0].contains("prefer small commits"));
    }

    #[test]
    fn test_live_claimed_task_ids_requires_live_pid() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());

        let mut live = ProcessRecord::new(ProcessKind::Analysis, std::process::id());
        live.status = ProcessStatus::Running;
        live.task_id = Some("task-live".into());
        reg.write_record(&live).unwrap();

        let mut dead = ProcessRecord::new(ProcessKind::Analysis, u32::MAX - 1);
        dead.status = ProcessStatus::Running;
        dead.task_id = Some("task-dead".into());
        reg.write_record(&dead).unwrap();

        let ids = reg.live_claimed_task_ids().unwrap();
        assert!(ids.contains("task-live"));
        assert!(!ids.contains("task-dead"));
    }

    #[test]
    fn test_force_stop_all() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());

        let mut a = ProcessRecord::new(ProcessKind::Execution, std::process::id());
        a.status = ProcessStatus::Running;
        reg.write_record(&a).unwrap();

        let mut b = ProcessRecord::new(ProcessKind::Analysis, std::process::id());
        b.status = ProcessStatus::Starting;
        reg.write_record(&b).unwrap();

        assert_eq!(reg.force_stop_all().unwrap(), 2);
        assert_eq!(reg.get(&a.id).unwrap().status, ProcessStatus::Stopped);
        assert_eq!(reg.get(&b.id).unwrap().status, ProcessStatus::Stopped);
    }

    #[test]
    fn test_malformed_record_skipped() {
        let temp = tempdir().unwrap();
        let reg = registry(temp.path());
        fs::write(temp.path().join("processes/bad.json"), "{oops").unwrap();

        let mut good = ProcessRecord::new(ProcessKind::OneShot, std::process::id());
        good.status = ProcessStatus::Running;
        reg.write_record(&good).unwrap();

        let listed = reg.list(None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, good.id);
    }
}
