use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::error_handling::types::StoreError;
use crate::session_management::{HistoryRecord, LifecycleState, Session};
use crate::storage::naming;
use crate::storage::storage_trait::SessionStore;

const HISTORY_DIR: &str = "History";
const HISTORY_FILE: &str = "history.jsonl";
const CLAIMS_DIR: &str = ".claims";
const ARCHIVE_DIR: &str = "Archived";
/// Claim markers older than this belong to a crashed mover.
const STALE_CLAIM_AGE: Duration = Duration::from_secs(60);
/// `EXDEV` on Linux and macOS.
const CROSS_DEVICE_LINK: i32 = 18;

/// Directory-backed session store.
///
/// Layout under `root`: one directory per lifecycle bucket, `History/` with
/// the append-only `history.jsonl`, and `.claims/` holding one marker per
/// record currently being moved.
pub struct FileSessionStore {
    root: PathBuf,
    /// id -> last known file name; a hint only, the directories are authoritative
    name_index: Mutex<HashMap<Uuid, String>>,
    history_lock: Mutex<()>,
}

/// Exclusive right to mutate one record. Removes its marker when dropped.
struct Claim {
    path: PathBuf,
}

impl Drop for Claim {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release claim {}: {}", self.path.display(), e);
        }
    }
}

impl FileSessionStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        let mut dirs: Vec<PathBuf> = LifecycleState::ALL
            .iter()
            .map(|bucket| root.join(bucket.dir_name()))
            .collect();
        dirs.push(root.join(HISTORY_DIR));
        dirs.push(root.join(CLAIMS_DIR));
        for dir in &dirs {
            fs::create_dir_all(dir).map_err(|e| {
                error!("Failed to create bucket dir {}: {}", dir.display(), e);
                e
            })?;
        }
        info!("Session store initialized at {}", root.display());

        Ok(Self {
            root,
            name_index: Mutex::new(HashMap::new()),
            history_lock: Mutex::new(()),
        })
    }

    fn bucket_dir(&self, bucket: LifecycleState) -> PathBuf {
        self.root.join(bucket.dir_name())
    }

    fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_DIR).join(HISTORY_FILE)
    }

    fn remember(&self, id: Uuid, name: &str) {
        if let Ok(mut idx) = self.name_index.lock() {
            idx.insert(id, name.to_string());
        }
    }

    fn forget(&self, id: Uuid) {
        if let Ok(mut idx) = self.name_index.lock() {
            idx.remove(&id);
        }
    }

    fn claim(&self, id: Uuid) -> Result<Claim, StoreError> {
        let path = self.root.join(CLAIMS_DIR).join(format!("{}.claim", id));
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Claim { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if !is_stale(&path) {
                        debug!("Claim for {} is held by another caller", id);
                        return Err(StoreError::ClaimBusy { id });
                    }
                    warn!("Removing stale claim marker {}", path.display());
                    if let Err(e) = fs::remove_file(&path) {
                        if e.kind() != io::ErrorKind::NotFound {
                            return Err(e.into());
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to create claim marker {}: {}", path.display(), e);
                    return Err(e.into());
                }
            }
        }
        Err(StoreError::ClaimBusy { id })
    }

    /// Path of the record for `id` inside `bucket`, if there is one.
    fn find_in(&self, id: Uuid, bucket: LifecycleState) -> Result<Option<PathBuf>, StoreError> {
        let dir = self.bucket_dir(bucket);
        let hint = self
            .name_index
            .lock()
            .ok()
            .and_then(|idx| idx.get(&id).cloned());
        if let Some(name) = hint {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(Some(candidate));
            }
        }
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if naming::parse_id(&name.to_string_lossy()) == Some(id) {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }

    fn load(&self, path: &Path, bucket: LifecycleState) -> Result<Session, StoreError> {
        let file = File::open(path).map_err(|e| {
            error!("Failed to read session file {}: {}", path.display(), e);
            e
        })?;
        let mut session: Session = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            error!("Invalid session file {}: {}", path.display(), e);
            e
        })?;
        session.state = bucket;
        Ok(session)
    }

    /// Writes `session` next to `path` and renames it over `path`.
    fn replace_file(&self, path: &Path, session: &Session) -> Result<(), StoreError> {
        let dir = path.parent().unwrap_or(&self.root);
        let tmp = dir.join(format!(".{}.tmp", session.id));
        let bytes = serde_json::to_vec_pretty(session)?;
        let result = write_synced(&tmp, &bytes, false).and_then(|_| fs::rename(&tmp, path));
        if let Err(e) = result {
            error!("Failed to rewrite session file {}: {}", path.display(), e);
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Renames `src` to `dest`, copying when they sit on different volumes.
fn relocate(src: &Path, dest: &Path) -> Result<(), StoreError> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_LINK) => {
            debug!("{} and {} are on different volumes, copying", src.display(), dest.display());
            move_across_volumes(src, dest)
        }
        Err(e) => Err(e.into()),
    }
}

/// Copy-based move for buckets on different volumes.
///
/// The copy is synced and read back before the source is removed, so a
/// failure at any point leaves the record at `src` and nothing at `dest`.
fn move_across_volumes(src: &Path, dest: &Path) -> Result<(), StoreError> {
    let bytes = fs::read(src)?;
    write_synced(dest, &bytes, true)?;

    let verified = match fs::read(dest) {
        Ok(written) if written == bytes => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "cross-volume copy verification failed",
        )),
        Err(e) => Err(e),
    };
    let result = verified.and_then(|_| fs::remove_file(src));
    if let Err(e) = result {
        error!(
            "Cross-volume move {} -> {} failed, keeping the source: {}",
            src.display(),
            dest.display(),
            e
        );
        if let Err(cleanup) = fs::remove_file(dest) {
            warn!("Failed to remove partial copy {}: {}", dest.display(), cleanup);
        }
        return Err(e.into());
    }
    Ok(())
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age > STALE_CLAIM_AGE)
        .unwrap_or(false)
}

fn write_synced(path: &Path, bytes: &[u8], exclusive: bool) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true);
    if exclusive {
        options.create_new(true);
    } else {
        options.create(true).truncate(true);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

impl SessionStore for FileSessionStore {
    fn create(&self, session: &Session) -> Result<(), StoreError> {
        session.validate()?;
        let _claim = self.claim(session.id)?;
        if let Some(bucket) = self.locate(session.id)? {
            return Err(StoreError::Conflict {
                id: session.id,
                bucket,
            });
        }
        let name = naming::file_name(session);
        let path = self.bucket_dir(LifecycleState::Available).join(&name);
        let bytes = serde_json::to_vec_pretty(session)?;
        write_synced(&path, &bytes, true).map_err(|e| {
            error!("Failed to create session file {}: {}", path.display(), e);
            e
        })?;
        self.remember(session.id, &name);
        info!("[{}] Created session for {}", session.id, session.target_name);
        Ok(())
    }

    fn list(&self, bucket: LifecycleState) -> Result<Vec<Session>, StoreError> {
        let dir = self.bucket_dir(bucket);
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| {
            error!("Failed to read bucket dir {}: {}", dir.display(), e);
            e
        })? {
            let entry = entry?;
            let path = entry.path();
            if naming::parse_id(&entry.file_name().to_string_lossy()).is_none() {
                continue;
            }
            match self.load(&path, bucket) {
                Ok(session) => sessions.push(session),
                // moved away between read_dir and open
                Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Skipping unreadable session {}: {}", path.display(), e),
            }
        }
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        debug!("Loaded {} session(s) from {}", sessions.len(), bucket);
        Ok(sessions)
    }

    fn get(&self, id: Uuid, bucket: LifecycleState) -> Result<Session, StoreError> {
        let path = self
            .find_in(id, bucket)?
            .ok_or(StoreError::NotFound { id, bucket })?;
        self.load(&path, bucket)
    }

    fn locate(&self, id: Uuid) -> Result<Option<LifecycleState>, StoreError> {
        for bucket in LifecycleState::ALL {
            if self.find_in(id, bucket)?.is_some() {
                return Ok(Some(bucket));
            }
        }
        Ok(None)
    }

    fn move_session(
        &self,
        id: Uuid,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Result<(), StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { from, to });
        }
        let _claim = self.claim(id)?;

        let src = self
            .find_in(id, from)?
            .ok_or(StoreError::NotFound { id, bucket: from })?;
        if self.find_in(id, to)?.is_some() {
            return Err(StoreError::Conflict { id, bucket: to });
        }
        let name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or(StoreError::NotFound { id, bucket: from })?;
        let dest = self.bucket_dir(to).join(&name);

        relocate(&src, &dest).map_err(|e| {
            error!("[{}] Failed to move {} -> {}: {}", id, from, to, e);
            e
        })?;
        self.remember(id, &name);
        info!("[{}] Moved {} -> {}", id, from, to);
        Ok(())
    }

    fn update(&self, session: &Session, bucket: LifecycleState) -> Result<(), StoreError> {
        if !matches!(bucket, LifecycleState::Available | LifecycleState::Running) {
            return Err(StoreError::InvalidTransition {
                from: bucket,
                to: bucket,
            });
        }
        if bucket == LifecycleState::Available {
            session.validate()?;
        }
        let _claim = self.claim(session.id)?;
        let current = self.find_in(session.id, bucket)?.ok_or(StoreError::NotFound {
            id: session.id,
            bucket,
        })?;
        self.replace_file(&current, session)?;

        // editing the target or start time changes the file name
        let name = naming::file_name(session);
        let renamed = self.bucket_dir(bucket).join(&name);
        if renamed != current {
            fs::rename(&current, &renamed)?;
        }
        self.remember(session.id, &name);
        debug!("[{}] Updated record in {}", session.id, bucket);
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let bucket = LifecycleState::Available;
        let _claim = self.claim(id)?;
        let path = self.find_in(id, bucket)?.ok_or(StoreError::NotFound { id, bucket })?;
        fs::remove_file(&path)?;
        self.forget(id);
        info!("[{}] Deleted session", id);
        Ok(())
    }

    fn append_history(&self, record: &HistoryRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let path = self.history_path();
        let _guard = self.history_lock.lock().map_err(|_| {
            StoreError::Io(io::Error::new(io::ErrorKind::Other, "history lock poisoned"))
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                error!("Failed to open history {}: {}", path.display(), e);
                e
            })?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        info!(
            "[{}] History recorded: {}",
            record.session_id, record.final_state
        );
        Ok(())
    }

    fn read_history(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        let path = self.history_path();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping malformed history line {}: {}", number + 1, e),
            }
        }
        Ok(records)
    }

    fn archive_finished(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut archived = 0;
        for bucket in [LifecycleState::Done, LifecycleState::Failed] {
            let target = self.root.join(ARCHIVE_DIR).join(bucket.dir_name());
            for entry in fs::read_dir(self.bucket_dir(bucket))? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let Some(id) = naming::parse_id(&name) else {
                    continue;
                };
                match naming::parse_start_time(&name) {
                    Some(start) if start < cutoff => {}
                    _ => continue,
                }
                let _claim = match self.claim(id) {
                    Ok(claim) => claim,
                    Err(StoreError::ClaimBusy { .. }) => continue,
                    Err(e) => return Err(e),
                };
                fs::create_dir_all(&target)?;
                relocate(&entry.path(), &target.join(&name))?;
                self.forget(id);
                info!("[{}] Archived {} from {}", id, name, bucket);
                archived += 1;
            }
        }
        Ok(archived)
    }

    fn quarantine_unreadable(&self, bucket: LifecycleState) -> Result<Vec<Uuid>, StoreError> {
        let failed_dir = self.bucket_dir(LifecycleState::Failed);
        let mut moved = Vec::new();
        for entry in fs::read_dir(self.bucket_dir(bucket))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = naming::parse_id(&name) else {
                continue;
            };
            let path = entry.path();
            let reason = match self.load(&path, bucket) {
                Err(StoreError::Serialization(e)) => e,
                _ => continue,
            };
            let _claim = match self.claim(id) {
                Ok(claim) => claim,
                Err(StoreError::ClaimBusy { .. }) => continue,
                Err(e) => return Err(e),
            };
            let dest = failed_dir.join(&name);
            if dest.exists() {
                warn!("[{}] Unreadable record {} already has a copy in Failed", id, name);
                continue;
            }
            relocate(&path, &dest)?;
            self.remember(id, &name);
            warn!("[{}] Moved unreadable record {} from {} to Failed: {}", id, name, bucket, reason);
            moved.push(id);
        }
        Ok(moved)
    }

    fn census(&self) -> Result<BTreeMap<Uuid, Vec<LifecycleState>>, StoreError> {
        let mut seen: BTreeMap<Uuid, Vec<LifecycleState>> = BTreeMap::new();
        for bucket in LifecycleState::ALL {
            for entry in fs::read_dir(self.bucket_dir(bucket))? {
                let entry = entry?;
                if let Some(id) = naming::parse_id(&entry.file_name().to_string_lossy()) {
                    seen.entry(id).or_default().push(bucket);
                }
            }
        }
        Ok(seen)
    }
}
