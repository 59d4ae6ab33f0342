//! The process-wide registry of watched projects.
//!
//! Holds the id → project map and the scanner that keeps it in sync
//! with the `enabled/` definition directory. The registry is passed
//! explicitly to the HTTP surface and the shutdown path rather than
//! living in a global.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use std::{fs, io};

use tracing::{debug, error};

use crate::config::Config;
use crate::project::{project_id, Project, ProjectSummary, ENABLED_PROJECT_DIR};
use crate::store::StoreError;

/// How often the enabled directory is re-scanned for added or removed
/// definition files.
const PROJECT_FILE_POLL: Duration = Duration::from_secs(30);

pub struct Registry {
    config: Arc<Config>,
    projects: RwLock<HashMap<String, Arc<Project>>>,
}

impl Registry {
    pub fn new(config: Arc<Config>) -> Arc<Registry> {
        Arc::new(Registry {
            config,
            projects: RwLock::new(HashMap::new()),
        })
    }

    /// Loads every enabled definition and starts the periodic scanner.
    pub fn load(self: &Arc<Self>) -> anyhow::Result<()> {
        let enabled = self.config.project_dir.join(ENABLED_PROJECT_DIR);
        debug!(
            "loading projects from the enabled definitions in {}",
            enabled.display()
        );

        for filename in list_definition_files(&enabled)? {
            self.add(&filename);
        }

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROJECT_FILE_POLL);
            // the first tick fires immediately; the initial load above
            // already covered it
            interval.tick().await;
            loop {
                interval.tick().await;
                registry.scan();
            }
        });

        Ok(())
    }

    /// Registers a project and starts its first cycle in the
    /// background.
    pub fn add(self: &Arc<Self>, filename: &str) {
        let project = self.attach(filename);
        tokio::spawn(async move {
            if let Err(err) = project.open().await {
                error!(
                    "error opening the datastore for project {}: {}",
                    project.id(),
                    err
                );
                return;
            }
            project.cycle(false).await;
        });
    }

    /// Inserts a project into the map without starting it.
    pub(crate) fn attach(self: &Arc<Self>, filename: &str) -> Arc<Project> {
        debug!("adding project {} to the registry", filename);
        let project = Project::new(filename, Arc::clone(&self.config), Arc::downgrade(self));
        self.projects
            .write()
            .unwrap()
            .insert(project.id().to_string(), Arc::clone(&project));
        project
    }

    pub fn get(&self, id: &str) -> Option<Arc<Project>> {
        self.projects.read().unwrap().get(id).cloned()
    }

    pub fn exists(&self, filename: &str) -> bool {
        self.projects
            .read()
            .unwrap()
            .contains_key(&project_id(filename))
    }

    /// Re-reads the enabled directory: new definition files become
    /// projects, ids whose file vanished are dropped from the map. The
    /// dropped project's next cycle observes the absence and retires
    /// its data directory.
    pub fn scan(self: &Arc<Self>) {
        let enabled = self.config.project_dir.join(ENABLED_PROJECT_DIR);
        let filenames = match list_definition_files(&enabled) {
            Ok(filenames) => filenames,
            Err(err) => {
                error!("error scanning {}: {}", enabled.display(), err);
                return;
            }
        };

        for filename in &filenames {
            if self.get(&project_id(filename)).is_none() {
                self.add(filename);
            }
        }

        self.remove_missing(&filenames);
    }

    fn remove_missing(&self, filenames: &[String]) {
        let ids: HashSet<String> = filenames.iter().map(|name| project_id(name)).collect();

        self.projects.write().unwrap().retain(|id, _| {
            let keep = ids.contains(id);
            if !keep {
                debug!(
                    "removing project {} from the registry, its definition file was removed",
                    id
                );
            }
            keep
        });
    }

    /// Closes every project's datastore; called on shutdown.
    pub fn stop_all(&self) {
        for project in self.projects.read().unwrap().values() {
            project.close();
        }
    }

    /// The read-only projection of every registered project.
    pub fn web_list(&self) -> Result<Vec<ProjectSummary>, StoreError> {
        let projects: Vec<Arc<Project>> =
            self.projects.read().unwrap().values().cloned().collect();

        let mut list = Vec::with_capacity(projects.len());
        for project in projects {
            list.push(project.web_data()?);
        }
        Ok(list)
    }
}

fn list_definition_files(dir: &Path) -> io::Result<Vec<String>> {
    let mut filenames = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let filename = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_file() && filename.ends_with(".json") {
            filenames.push(filename);
        }
    }
    Ok(filenames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<Registry>) {
        let root = TempDir::new().unwrap();
        let config = Config {
            project_dir: root.path().join("projects"),
            data_dir: root.path().join("data"),
            ..Config::default()
        };
        fs::create_dir_all(config.project_dir.join(ENABLED_PROJECT_DIR)).unwrap();
        fs::create_dir_all(&config.data_dir).unwrap();

        (root, Registry::new(Arc::new(config)))
    }

    fn write_definition(registry: &Registry, filename: &str) {
        fs::write(
            registry
                .config
                .project_dir
                .join(ENABLED_PROJECT_DIR)
                .join(filename),
            b"{}",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_attach_get_exists() {
        let (_root, registry) = setup();

        assert!(registry.get("demo").is_none());
        assert!(!registry.exists("demo.json"));

        write_definition(&registry, "demo.json");
        let project = registry.attach("demo.json");

        assert_eq!(project.id(), "demo");
        assert!(registry.get("demo").is_some());
        assert!(registry.exists("demo.json"));
    }

    #[tokio::test]
    async fn test_scan_picks_up_new_definitions() {
        let (_root, registry) = setup();

        write_definition(&registry, "added.json");
        registry.scan();

        assert!(registry.get("added").is_some());
    }

    #[tokio::test]
    async fn test_scan_drops_removed_definitions() {
        let (_root, registry) = setup();

        write_definition(&registry, "doomed.json");
        registry.attach("doomed.json");
        assert!(registry.exists("doomed.json"));

        fs::remove_file(
            registry
                .config
                .project_dir
                .join(ENABLED_PROJECT_DIR)
                .join("doomed.json"),
        )
        .unwrap();
        registry.scan();

        assert!(registry.get("doomed").is_none());
        assert!(!registry.exists("doomed.json"));
    }

    #[tokio::test]
    async fn test_scan_ignores_non_json_files() {
        let (_root, registry) = setup();

        fs::write(
            registry
                .config
                .project_dir
                .join(ENABLED_PROJECT_DIR)
                .join("notes.txt"),
            b"not a project",
        )
        .unwrap();
        registry.scan();

        assert!(registry.get("notes").is_none());
    }
}
