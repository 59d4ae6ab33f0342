//! Project records and the stage-driven build cycle.
//!
//! Each project runs the same lifecycle, every step calling the next on
//! success:
//!
//! ```text
//! (load definition) -> fetch -> build -> test -> release -> (wait poll) -> (load definition) -> ...
//! ```
//!
//! The definition file is re-read on every poll or trigger, so edits
//! take effect on the next cycle. If the definition file disappears,
//! the next cycle stops at the load step and moves the project's data
//! directory into the deleted folder.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, Instant};
use std::{fmt, fs, io};

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, error};

use crate::config::Config;
use crate::registry::Registry;
use crate::runner;
use crate::store::{LogEntry, Release, Store, StoreError, TimeKey};

pub const ENABLED_PROJECT_DIR: &str = "enabled";
pub const DELETED_PROJECT_DIR: &str = "deleted";

const STORE_FILE_EXT: &str = "ironsmith";
const VERSION_NOT_SET: &str = "Version not yet set";

/// A step in the project lifecycle; also the value recorded in each
/// log entry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Loading,
    Fetching,
    Building,
    Testing,
    Releasing,
    Released,
    Waiting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Loading => "loading",
            Stage::Fetching => "fetching",
            Stage::Building => "building",
            Stage::Testing => "testing",
            Stage::Releasing => "releasing",
            Stage::Released => "released",
            Stage::Waiting => "waiting",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A project definition as stored in `<projectDir>/enabled/<id>.json`.
///
/// The script fields are command lines, not shell snippets: they are
/// split on whitespace without quoting (see [`crate::runner`]). An
/// empty script ends the cycle at that stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Definition {
    /// Display name of the project.
    pub name: String,
    /// Fetches the project source into the current directory.
    pub fetch: String,
    /// Builds the fetched source.
    pub build: String,
    /// Tests the built source.
    pub test: String,
    /// Produces the release file.
    pub release: String,
    /// Emits the version of the fetched source; should be idempotent.
    pub version: String,
    /// Path of the release artifact, relative to the working directory.
    pub release_file: String,
    /// How often to poll, e.g. "15m". Empty means trigger-only.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub poll_interval: String,
    /// Shared secret required by the trigger endpoint when set.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub trigger_secret: String,
    /// How many versions of history to keep; 0 keeps everything.
    pub max_versions: usize,
    /// KEY=VALUE pairs the stage scripts run with. `@dir` expands to
    /// the working directory.
    pub environment: Vec<String>,
}

/// Read-only projection of a project for listings.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    /// Version of the last completed release, empty when none.
    pub release_version: String,
    pub stage: Stage,
    pub last_log: Option<LogEntry>,
}

#[derive(Debug, Default)]
struct RunState {
    stage: Stage,
    version: String,
    hash: String,
    poll: Duration,
    start: Option<Instant>,
}

/// A single watched project: its definition, runtime state, datastore
/// handle, and the cycle that drives it.
pub struct Project {
    filename: String,
    id: String,
    config: Arc<Config>,
    registry: Weak<Registry>,
    def: RwLock<Definition>,
    state: RwLock<RunState>,
    store: RwLock<Option<Arc<Store>>>,
    /// Serializes cycle execution: at most one cycle runs at a time,
    /// so a trigger arriving mid-cycle waits for `waiting`.
    processing: tokio::sync::Mutex<()>,
}

/// Derives a project id from its definition file name.
pub fn project_id(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Project {
    pub fn new(filename: &str, config: Arc<Config>, registry: Weak<Registry>) -> Arc<Project> {
        let id = project_id(filename);
        assert!(!id.is_empty(), "invalid project file name {:?}", filename);

        Arc::new(Project {
            filename: filename.to_string(),
            id,
            config,
            registry,
            def: RwLock::new(Definition {
                name: filename.to_string(),
                ..Definition::default()
            }),
            state: RwLock::new(RunState::default()),
            store: RwLock::new(None),
            processing: tokio::sync::Mutex::new(()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stage(&self) -> Stage {
        self.state.read().unwrap().stage
    }

    pub fn trigger_secret(&self) -> String {
        self.def.read().unwrap().trigger_secret.clone()
    }

    /// The project's data directory.
    fn dir(&self) -> PathBuf {
        self.config.data_dir.join(&self.id)
    }

    fn store_path(&self) -> PathBuf {
        self.dir().join(format!("{}.{}", self.id, STORE_FILE_EXT))
    }

    /// The per-version working directory, named by the SHA-1 of the
    /// version string so arbitrary version text maps to a safe,
    /// deterministic path. Calling this without a version set is a
    /// programming error.
    fn working_dir(&self) -> PathBuf {
        let hash = self.state.read().unwrap().hash.clone();
        assert!(
            !hash.is_empty(),
            "working dir requested with no version hash set for project {}",
            self.id
        );
        self.dir().join(hash)
    }

    /// Creates the project's data directory and opens its datastore.
    pub async fn open(&self) -> Result<(), StoreError> {
        if self.store.read().unwrap().is_some() {
            return Ok(());
        }

        fs::create_dir_all(self.dir())?;
        let store = Store::open(self.store_path()).await?;
        *self.store.write().unwrap() = Some(Arc::new(store));
        Ok(())
    }

    /// Releases the datastore handle. The backing file closes once the
    /// last in-flight reader drops its reference, so closing twice is
    /// harmless.
    pub fn close(&self) {
        *self.store.write().unwrap() = None;
    }

    fn open_store(&self) -> Result<Arc<Store>, StoreError> {
        self.store.read().unwrap().clone().ok_or(StoreError::Closed)
    }

    fn version(&self) -> String {
        self.state.read().unwrap().version.clone()
    }

    fn set_version(&self, version: &str) {
        let mut state = self.state.write().unwrap();
        state.version = version.to_string();
        state.hash = if version.is_empty() {
            String::new()
        } else {
            hex::encode(Sha1::digest(version.as_bytes()))
        };
    }

    fn set_stage(&self, stage: Stage) {
        let mut state = self.state.write().unwrap();
        if state.version.is_empty() {
            debug!("entering {} stage for project {}", stage, self.id);
        } else {
            debug!(
                "entering {} stage for project {} version {}",
                stage, self.id, state.version
            );
        }
        state.stage = stage;
    }

    // ------------------------------------------------------------------
    // Cycle
    // ------------------------------------------------------------------

    /// Starts a cycle in the background; used by the registry and the
    /// trigger endpoint.
    pub fn spawn_cycle(self: &Arc<Self>, force_build: bool) {
        let project = Arc::clone(self);
        tokio::spawn(async move {
            project.cycle(force_build).await;
        });
    }

    /// One full traversal of the lifecycle. Reloads the definition,
    /// fetches, and on a new version builds, tests, and releases,
    /// ending back at `waiting`. With `force_build` the
    /// already-attempted-version check is skipped.
    ///
    /// Cycles are serialized per project; stage errors are recorded in
    /// the project log and never escape.
    pub fn cycle(
        self: Arc<Self>,
        force_build: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(self.cycle_inner(force_build))
    }

    async fn cycle_inner(self: Arc<Self>, force_build: bool) {
        let _processing = self.processing.lock().await;

        self.set_version(VERSION_NOT_SET);
        self.set_stage(Stage::Loading);
        self.state.write().unwrap().start = None;

        let registered = self
            .registry
            .upgrade()
            .map(|registry| registry.exists(&self.filename))
            .unwrap_or(false);
        if !registered {
            // definition removed: retire the data and stop polling
            self.tombstone();
            return;
        }

        if let Err(err) = self.reload_definition() {
            self.record_error(&format!("{:#}", err));
            self.set_stage(Stage::Waiting);
            return;
        }

        if let Err(err) = self.fetch(force_build).await {
            self.record_error(&format!("{:#}", err));
        }

        self.set_stage(Stage::Waiting);

        let max_versions = self.def.read().unwrap().max_versions;
        if let Ok(store) = self.open_store() {
            if let Err(err) = store.trim_versions(max_versions) {
                error!("error trimming versions for project {}: {}", self.id, err);
            }
        }

        let poll = self.state.read().unwrap().poll;
        if !poll.is_zero() {
            let project = Arc::clone(&self);
            tokio::spawn(async move {
                tokio::time::sleep(poll).await;
                project.cycle(false).await;
            });
        }
    }

    /// Re-reads the definition file so script changes apply on the
    /// next cycle.
    fn reload_definition(&self) -> anyhow::Result<()> {
        let path = self
            .config
            .project_dir
            .join(ENABLED_PROJECT_DIR)
            .join(&self.filename);
        let data = fs::read(&path)
            .with_context(|| format!("reading project definition {}", path.display()))?;
        let parsed: Definition = serde_json::from_slice(&data)
            .with_context(|| format!("parsing project definition {}", path.display()))?;

        let poll = if parsed.poll_interval.is_empty() {
            Duration::ZERO
        } else {
            match humantime::parse_duration(&parsed.poll_interval) {
                Ok(duration) => duration,
                Err(err) => {
                    self.record_error(&format!(
                        "invalid pollInterval {:?}: {}",
                        parsed.poll_interval, err
                    ));
                    Duration::ZERO
                }
            }
        };

        *self.def.write().unwrap() = parsed;
        self.state.write().unwrap().poll = poll;
        Ok(())
    }

    /// Runs the fetch script into a fresh temp directory, then the
    /// version script inside it. Unless forced, a version whose build
    /// was already attempted ends the cycle here; otherwise the temp
    /// directory becomes the working directory and the build begins.
    async fn fetch(&self, force_build: bool) -> anyhow::Result<()> {
        self.set_stage(Stage::Fetching);
        self.state.write().unwrap().start = Some(Instant::now());

        let def = self.def.read().unwrap().clone();
        if def.fetch.is_empty() {
            return Ok(());
        }

        let temp_dir = self.dir().join(Utc::now().timestamp().to_string());
        fs::create_dir_all(&temp_dir)
            .with_context(|| format!("creating temp directory {}", temp_dir.display()))?;

        let fetch_output = runner::run(&def.fetch, &temp_dir, &def.environment).await?;

        let version_output = runner::run(&def.version, &temp_dir, &def.environment).await?;
        let version = version_output.trim().to_string();
        self.set_version(&version);

        if version.is_empty() {
            remove_dir_if_exists(&temp_dir)?;
            debug!("no version emitted for project {}", self.id);
            return Ok(());
        }

        if !force_build {
            // a version counts as attempted once its build stage began,
            // so a failed build is not retried until the version changes
            let last = self.open_store()?.last_version(Stage::Building.as_str())?;
            if last.map(|entry| entry.version == version).unwrap_or(false) {
                remove_dir_if_exists(&temp_dir)?;
                debug!(
                    "no new version found for project {} version {}",
                    self.id, version
                );
                return Ok(());
            }
        }

        let working_dir = self.working_dir();
        remove_dir_if_exists(&working_dir)?;
        if let Err(err) = fs::rename(&temp_dir, &working_dir) {
            self.record_error(&format!(
                "error renaming {} to {}: {}",
                temp_dir.display(),
                working_dir.display(),
                err
            ));
            if let Err(err) = remove_dir_if_exists(&temp_dir) {
                self.record_error(&format!(
                    "error removing temp directory {}: {}",
                    temp_dir.display(),
                    err
                ));
            }
            return Ok(());
        }

        self.add_log(Stage::Fetching, &fetch_output)?;

        self.build().await
    }

    async fn build(&self) -> anyhow::Result<()> {
        self.set_stage(Stage::Building);

        let def = self.def.read().unwrap().clone();
        if def.build.is_empty() {
            return Ok(());
        }

        let output = runner::run(&def.build, &self.working_dir(), &def.environment).await?;
        self.add_log(Stage::Building, &output)?;

        self.test().await
    }

    async fn test(&self) -> anyhow::Result<()> {
        self.set_stage(Stage::Testing);

        let def = self.def.read().unwrap().clone();
        if def.test.is_empty() {
            return Ok(());
        }

        let output = runner::run(&def.test, &self.working_dir(), &def.environment).await?;
        self.add_log(Stage::Testing, &output)?;

        self.release().await
    }

    /// Runs the release script, stores the release file, and removes
    /// the working directory.
    async fn release(&self) -> anyhow::Result<()> {
        self.set_stage(Stage::Releasing);

        let def = self.def.read().unwrap().clone();
        if def.release.is_empty() {
            return Ok(());
        }

        let working_dir = self.working_dir();
        let output = runner::run(&def.release, &working_dir, &def.environment).await?;
        self.add_log(Stage::Releasing, &output)?;

        let release_path = working_dir.join(&def.release_file);
        let data = fs::read(&release_path)
            .with_context(|| format!("reading release file {}", release_path.display()))?;
        let file_name = Path::new(&def.release_file)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| def.release_file.clone());

        let version = self.version();
        self.open_store()?.add_release(&version, &file_name, &data)?;

        self.set_stage(Stage::Released);
        let elapsed = self
            .state
            .read()
            .unwrap()
            .start
            .map(|start| start.elapsed())
            .unwrap_or_default();
        self.add_log(
            Stage::Released,
            &format!(
                "project {} version {} built, tested, and released in {}",
                self.id,
                version,
                humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64)),
            ),
        )?;

        remove_dir_if_exists(&working_dir)?;
        Ok(())
    }

    fn add_log(&self, stage: Stage, entry: &str) -> Result<(), StoreError> {
        let version = self.version();
        self.open_store()?.add_log(&version, stage.as_str(), entry)
    }

    /// The single error sink for cycle work: records the failure in the
    /// project log under the current version and stage, and cleans up
    /// the working directory. With no store open the failure only goes
    /// to the process log.
    fn record_error(&self, message: &str) {
        debug!("error in project {}: {}", self.id, message);

        let (version, stage, hash) = {
            let state = self.state.read().unwrap();
            (state.version.clone(), state.stage, state.hash.clone())
        };

        let Ok(store) = self.open_store() else {
            error!("error in project {}: {}", self.id, message);
            return;
        };

        if let Err(log_err) = store.add_log(&version, stage.as_str(), message) {
            error!(
                "error logging an error in project {}: original error: {}; logging error: {}",
                self.id, message, log_err
            );
        }

        if !version.is_empty() && !hash.is_empty() {
            if let Err(err) = remove_dir_if_exists(&self.dir().join(&hash)) {
                error!(
                    "error deleting the working directory of project {} version {}: {}",
                    self.id, version, err
                );
            }
        }
    }

    /// Retires a project whose definition file was removed: closes the
    /// store and moves the data directory under
    /// `<dataDir>/deleted/<unix-seconds>/<id>`.
    fn tombstone(&self) {
        self.close();

        let deleted_dir = self
            .config
            .data_dir
            .join(DELETED_PROJECT_DIR)
            .join(Utc::now().timestamp().to_string());
        let result = fs::create_dir_all(&deleted_dir)
            .and_then(|_| fs::rename(self.dir(), deleted_dir.join(&self.id)));
        if let Err(err) = result {
            error!(
                "error moving the data directory of removed project {}: {}",
                self.id, err
            );
        }
    }

    // ------------------------------------------------------------------
    // Read-side queries (used by the HTTP surface)
    // ------------------------------------------------------------------

    pub fn web_data(&self) -> Result<ProjectSummary, StoreError> {
        let name = self.def.read().unwrap().name.clone();
        let stage = self.stage();

        let (last_log, release_version) = match self.open_store() {
            Ok(store) => {
                let last = store.last_version("")?;
                let released = store.last_version(Stage::Released.as_str())?;
                (last, released.map(|entry| entry.version).unwrap_or_default())
            }
            // store not opened yet (or closing down): list what we know
            Err(_) => (None, String::new()),
        };

        Ok(ProjectSummary {
            id: self.id.clone(),
            name,
            release_version,
            stage,
            last_log,
        })
    }

    pub fn versions(&self) -> Result<Vec<LogEntry>, StoreError> {
        self.open_store()?.versions()
    }

    pub fn version_log(&self, version: &str) -> Result<Vec<LogEntry>, StoreError> {
        self.open_store()?.version_log(version)
    }

    pub fn stage_log(&self, version: &str, stage: &str) -> Result<LogEntry, StoreError> {
        self.open_store()?.stage_log(version, stage)
    }

    pub fn releases(&self) -> Result<Vec<Release>, StoreError> {
        self.open_store()?.releases()
    }

    pub fn last_release(&self) -> Result<Release, StoreError> {
        self.open_store()?.last_release()
    }

    pub fn release_data(&self, version: &str) -> Result<Release, StoreError> {
        self.open_store()?.release(version)
    }

    pub fn release_file(&self, file_key: &TimeKey) -> Result<Vec<u8>, StoreError> {
        self.open_store()?.release_file(file_key)
    }
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

// ----------------------------------------------------------------------
// Template definition
// ----------------------------------------------------------------------

pub const TEMPLATE_FILENAME: &str = "template.project.json";

fn template_definition() -> Definition {
    Definition {
        name: "Template Project".to_string(),
        fetch: "git clone https://example.com/your/project.git .".to_string(),
        build: "cargo build --release".to_string(),
        test: "cargo test".to_string(),
        release: "tar -czf release.tar.gz -C target/release project".to_string(),
        version: "git describe --tags --long".to_string(),
        release_file: "release.tar.gz".to_string(),
        poll_interval: "15m".to_string(),
        trigger_secret: String::new(),
        max_versions: 10,
        environment: vec!["PATH=/usr/local/bin:/usr/bin:/bin".to_string()],
    }
}

/// Writes the example definition into the project directory on first
/// start, so there is something to copy into `enabled/`.
pub fn prep_template(project_dir: &Path) -> anyhow::Result<()> {
    let path = project_dir.join(TEMPLATE_FILENAME);
    if path.exists() {
        return Ok(());
    }

    debug!("creating template project file in {}", path.display());
    let data = serde_json::to_vec_pretty(&template_definition())?;
    fs::write(&path, data).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        config: Arc<Config>,
        registry: Arc<Registry>,
        bin_dir: PathBuf,
    }

    impl Fixture {
        fn new() -> Fixture {
            let root = TempDir::new().unwrap();
            let project_dir = root.path().join("projects");
            let data_dir = root.path().join("data");
            let bin_dir = root.path().join("bin");
            fs::create_dir_all(project_dir.join(ENABLED_PROJECT_DIR)).unwrap();
            fs::create_dir_all(&data_dir).unwrap();
            fs::create_dir_all(&bin_dir).unwrap();

            let config = Arc::new(Config {
                project_dir,
                data_dir,
                ..Config::default()
            });
            let registry = Registry::new(Arc::clone(&config));

            Fixture {
                _root: root,
                config,
                registry,
                bin_dir,
            }
        }

        fn write_script(&self, name: &str, body: &str) {
            let path = self.bin_dir.join(name);
            fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        fn environment(&self) -> Vec<String> {
            vec![format!(
                "PATH={}:/usr/local/bin:/usr/bin:/bin",
                self.bin_dir.display()
            )]
        }

        fn write_definition(&self, filename: &str, def: &Definition) {
            let path = self
                .config
                .project_dir
                .join(ENABLED_PROJECT_DIR)
                .join(filename);
            fs::write(path, serde_json::to_vec_pretty(def).unwrap()).unwrap();
        }

        async fn attach(&self, filename: &str) -> Arc<Project> {
            let project = self.registry.attach(filename);
            project.open().await.unwrap();
            project
        }
    }

    fn release_definition(fixture: &Fixture, version_script: &str) -> Definition {
        Definition {
            name: "Demo".to_string(),
            fetch: "make-artifact".to_string(),
            build: "true".to_string(),
            test: "true".to_string(),
            release: "true".to_string(),
            version: version_script.to_string(),
            release_file: "artifact.txt".to_string(),
            environment: fixture.environment(),
            ..Definition::default()
        }
    }

    #[tokio::test]
    async fn test_happy_path_cycle() {
        let fixture = Fixture::new();
        fixture.write_script("make-artifact", "echo fetched\necho hi > artifact.txt");

        let def = release_definition(&fixture, "echo 1.0");
        fixture.write_definition("demo.json", &def);
        let project = fixture.attach("demo.json").await;

        Arc::clone(&project).cycle(false).await;

        assert_eq!(project.stage(), Stage::Waiting);

        let release = project.last_release().unwrap();
        assert_eq!(release.version, "1.0");
        assert_eq!(release.file_name, "artifact.txt");
        assert_eq!(project.release_file(&release.file_key).unwrap(), b"hi\n");

        // exactly one log entry per stage
        let log = project.version_log("1.0").unwrap();
        assert_eq!(log.len(), 5);
        for stage in ["fetching", "building", "testing", "releasing", "released"] {
            assert!(project.stage_log("1.0", stage).is_ok(), "missing {}", stage);
        }

        // the working directory is gone after a successful release
        let hash = hex::encode(Sha1::digest(b"1.0"));
        assert!(!fixture.config.data_dir.join("demo").join(hash).exists());
    }

    #[tokio::test]
    async fn test_idempotent_poll() {
        let fixture = Fixture::new();
        fixture.write_script("make-artifact", "echo hi > artifact.txt");

        let def = release_definition(&fixture, "echo 1.0");
        fixture.write_definition("demo.json", &def);
        let project = fixture.attach("demo.json").await;

        Arc::clone(&project).cycle(false).await;
        Arc::clone(&project).cycle(false).await;

        // the unchanged version is skipped: no new logs, no new release
        assert_eq!(project.version_log("1.0").unwrap().len(), 5);
        assert_eq!(project.releases().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_forced_rebuild_of_same_version() {
        let fixture = Fixture::new();
        fixture.write_script("make-artifact", "echo hi > artifact.txt");

        let def = release_definition(&fixture, "echo 1.0");
        fixture.write_definition("demo.json", &def);
        let project = fixture.attach("demo.json").await;

        Arc::clone(&project).cycle(false).await;
        Arc::clone(&project).cycle(true).await;

        assert_eq!(project.version_log("1.0").unwrap().len(), 10);
        assert_eq!(project.releases().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_test_stage() {
        let fixture = Fixture::new();
        fixture.write_script("make-artifact", "echo hi > artifact.txt");

        let mut def = release_definition(&fixture, "echo 1.0");
        def.test = "false".to_string();
        fixture.write_definition("demo.json", &def);
        let project = fixture.attach("demo.json").await;

        Arc::clone(&project).cycle(false).await;

        assert_eq!(project.stage(), Stage::Waiting);

        let entry = project.stage_log("1.0", "testing").unwrap();
        assert!(entry.log.contains("exit status"), "log: {}", entry.log);
        assert!(matches!(project.last_release(), Err(StoreError::NotFound)));

        // the failed version is not retried until it changes
        Arc::clone(&project).cycle(false).await;
        assert_eq!(project.version_log("1.0").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_trim_keeps_newest_versions() {
        let fixture = Fixture::new();
        fixture.write_script("make-artifact", "echo hi > artifact.txt");

        let mut def = release_definition(&fixture, "echo v1");
        def.max_versions = 2;
        fixture.write_definition("demo.json", &def);
        let project = fixture.attach("demo.json").await;

        for version_script in ["echo v1", "echo v2", "echo v3"] {
            def.version = version_script.to_string();
            fixture.write_definition("demo.json", &def);
            Arc::clone(&project).cycle(false).await;
        }

        let names: Vec<String> = project
            .versions()
            .unwrap()
            .into_iter()
            .map(|entry| entry.version)
            .collect();
        assert_eq!(names, vec!["v3", "v2"]);
        assert!(matches!(project.release_data("v1"), Err(StoreError::NotFound)));
        assert!(project.release_data("v2").is_ok());
    }

    #[tokio::test]
    async fn test_empty_fetch_skips_cycle() {
        let fixture = Fixture::new();

        let def = Definition {
            name: "Demo".to_string(),
            environment: fixture.environment(),
            ..Definition::default()
        };
        fixture.write_definition("demo.json", &def);
        let project = fixture.attach("demo.json").await;

        Arc::clone(&project).cycle(false).await;

        assert_eq!(project.stage(), Stage::Waiting);
        assert!(project.versions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_removed_definition_tombstones_data() {
        let fixture = Fixture::new();
        fixture.write_script("make-artifact", "echo hi > artifact.txt");

        let def = release_definition(&fixture, "echo 1.0");
        fixture.write_definition("demo.json", &def);
        let project = fixture.attach("demo.json").await;

        Arc::clone(&project).cycle(false).await;

        fs::remove_file(
            fixture
                .config
                .project_dir
                .join(ENABLED_PROJECT_DIR)
                .join("demo.json"),
        )
        .unwrap();
        fixture.registry.scan();
        assert!(fixture.registry.get("demo").is_none());

        Arc::clone(&project).cycle(false).await;

        assert!(!fixture.config.data_dir.join("demo").exists());
        let deleted = fixture.config.data_dir.join(DELETED_PROJECT_DIR);
        let stamp = fs::read_dir(&deleted).unwrap().next().unwrap().unwrap();
        assert!(stamp.path().join("demo").join("demo.ironsmith").exists());
    }

    #[test]
    fn test_project_id() {
        assert_eq!(project_id("demo.json"), "demo");
        assert_eq!(project_id("my.project.json"), "my.project");
        assert_eq!(project_id("noext"), "noext");
    }

    #[test]
    fn test_template_round_trips() {
        let root = TempDir::new().unwrap();
        prep_template(root.path()).unwrap();

        let data = fs::read(root.path().join(TEMPLATE_FILENAME)).unwrap();
        let def: Definition = serde_json::from_slice(&data).unwrap();
        assert_eq!(def.name, "Template Project");
        assert_eq!(def.poll_interval, "15m");
        assert!(def.max_versions > 0);
    }
}
