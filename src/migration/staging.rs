use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::StagingLayout;
use crate::constants::PARTIAL_DOWNLOAD_DIR_SUFFIX;
use crate::error::{MigrationError, StageResult};
use crate::models::ObjectDescriptor;
use crate::utils::paths::{key_basename, key_to_relative_path};

/// Run-scoped staging directory.
///
/// Each run gets `<staging_dir>/<run_id>`, created exclusively so two runs
/// never share a tree. Object keys map to paths inside it according to the
/// configured [`StagingLayout`]. In-progress downloads live in the sibling
/// `<staging_dir>/<run_id>.partial`, which no key can map into.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
    partial_dir: PathBuf,
    layout: StagingLayout,
}

impl StagingArea {
    /// Create the run directory under `base`.
    ///
    /// Fails with `LocalIo` if `base` cannot be created or the run directory
    /// already exists.
    pub fn create(base: &Path, run_id: &str, layout: StagingLayout) -> StageResult<Self> {
        fs::create_dir_all(base)
            .map_err(|e| MigrationError::local_io("create staging directory", base, e))?;

        let root = base.join(run_id);
        fs::create_dir(&root)
            .map_err(|e| MigrationError::local_io("claim run staging directory", &root, e))?;

        let partial_dir = base.join(format!("{}{}", run_id, PARTIAL_DOWNLOAD_DIR_SUFFIX));
        fs::create_dir(&partial_dir)
            .map_err(|e| MigrationError::local_io("claim partial download directory", &partial_dir, e))?;

        info!("Staging objects in {}", root.display());
        Ok(StagingArea {
            root,
            partial_dir,
            layout,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partial_dir(&self) -> &Path {
        &self.partial_dir
    }

    pub fn layout(&self) -> StagingLayout {
        self.layout
    }

    /// Local path an object is fetched to.
    pub fn local_path_for(&self, key: &str) -> StageResult<PathBuf> {
        let relative = match self.layout {
            StagingLayout::PreservePaths => key_to_relative_path(key),
            StagingLayout::Basename => key_basename(key)
                .map(PathBuf::from)
                .ok_or_else(|| "key has no file name component".to_string()),
        };

        relative
            .map(|rel| self.root.join(rel))
            .map_err(|reason| MigrationError::LocalIo {
                operation: "map object key",
                path: PathBuf::from(key),
                source: io::Error::new(io::ErrorKind::InvalidInput, reason),
            })
    }

    /// Split a listing into objects to fetch and keys that cannot be staged
    /// alongside the others.
    ///
    /// A key collides when its local path is already taken by an earlier
    /// key, or when another key needs that path as a directory (`data/x`
    /// next to `data/x/y.txt`). In the first case the first key in listing
    /// order keeps the path; in the second the directory wins. Colliding
    /// keys are reported and not fetched.
    pub fn partition_collisions(
        &self,
        objects: Vec<ObjectDescriptor>,
    ) -> (Vec<ObjectDescriptor>, Vec<String>) {
        let mapped: Vec<(ObjectDescriptor, Option<PathBuf>)> = objects
            .into_iter()
            .map(|object| {
                let path = self.local_path_for(&object.key).ok();
                (object, path)
            })
            .collect();

        let mut directories: HashSet<PathBuf> = HashSet::new();
        for path in mapped.iter().filter_map(|(_, path)| path.as_ref()) {
            for ancestor in path.ancestors().skip(1) {
                if ancestor == self.root.as_path() || !directories.insert(ancestor.to_path_buf()) {
                    break;
                }
            }
        }

        let mut owners: HashMap<PathBuf, String> = HashMap::new();
        let mut unique = Vec::with_capacity(mapped.len());
        let mut collisions = Vec::new();

        for (object, path) in mapped {
            // Unmappable keys surface as fetch failures
            let Some(path) = path else {
                unique.push(object);
                continue;
            };
            if directories.contains(&path) {
                warn!(
                    "Staging collision: {} maps to {} which other keys need as a directory and will not be migrated",
                    object.key,
                    path.display()
                );
                collisions.push(object.key);
                continue;
            }
            match owners.get(&path) {
                Some(owner) => {
                    warn!(
                        "Staging collision: {} maps to the same local file as {} and will not be migrated",
                        object.key, owner
                    );
                    collisions.push(object.key);
                }
                None => {
                    owners.insert(path, object.key.clone());
                    unique.push(object);
                }
            }
        }

        (unique, collisions)
    }

    /// Number of regular files currently staged.
    pub fn file_count(&self) -> usize {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    /// Drop the partial download directory once no fetch is in flight.
    pub fn discard_partials(&self) -> StageResult<()> {
        match fs::remove_dir_all(&self.partial_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MigrationError::local_io(
                "remove partial download directory",
                &self.partial_dir,
                e,
            )),
        }
    }

    /// Remove the run directory and everything in it.
    pub fn cleanup(&self) -> StageResult<()> {
        debug!("Removing staging directory {}", self.root.display());
        self.discard_partials()?;
        fs::remove_dir_all(&self.root)
            .map_err(|e| MigrationError::local_io("remove staging directory", &self.root, e))
    }
}
