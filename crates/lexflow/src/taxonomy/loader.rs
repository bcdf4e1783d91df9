//! Resolving taxonomy packs for matters.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use walkdir::WalkDir;

use super::schema::{LoadedPack, TaxonomyPack};
use super::TaxonomyError;
use crate::db::{matter_repo, Database};

/// Source of taxonomy packs for the classify, extract, reconcile and
/// actions stages.
#[async_trait]
pub trait TaxonomyLoader: Send + Sync {
    /// Pack bound to the matter, or the default pack when it has none.
    async fn load_pack_for_matter(
        &self,
        firm_id: &str,
        matter_id: &str,
    ) -> Result<Option<Arc<LoadedPack>>, TaxonomyError>;

    async fn load_pack_by_id(&self, pack_id: &str) -> Result<Option<Arc<LoadedPack>>, TaxonomyError>;
}

/// Packs held in memory, for embedding and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticTaxonomyLoader {
    packs: HashMap<String, Arc<LoadedPack>>,
    /// Matter id to pack id.
    bindings: HashMap<String, String>,
    default_pack: Option<String>,
}

impl StaticTaxonomyLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pack(mut self, pack: TaxonomyPack) -> Result<Self, TaxonomyError> {
        let loaded = LoadedPack::new(pack)?;
        self.packs
            .insert(loaded.id().to_string(), Arc::new(loaded));
        Ok(self)
    }

    pub fn bind_matter(mut self, matter_id: impl Into<String>, pack_id: impl Into<String>) -> Self {
        self.bindings.insert(matter_id.into(), pack_id.into());
        self
    }

    pub fn with_default(mut self, pack_id: impl Into<String>) -> Self {
        self.default_pack = Some(pack_id.into());
        self
    }
}

#[async_trait]
impl TaxonomyLoader for StaticTaxonomyLoader {
    async fn load_pack_for_matter(
        &self,
        _firm_id: &str,
        matter_id: &str,
    ) -> Result<Option<Arc<LoadedPack>>, TaxonomyError> {
        let pack_id = self
            .bindings
            .get(matter_id)
            .or(self.default_pack.as_ref());
        Ok(pack_id.and_then(|id| self.packs.get(id).cloned()))
    }

    async fn load_pack_by_id(&self, pack_id: &str) -> Result<Option<Arc<LoadedPack>>, TaxonomyError> {
        Ok(self.packs.get(pack_id).cloned())
    }
}

/// Reads packs from YAML or JSON files under a directory.
///
/// Matters are bound to packs through `matters.taxonomy_pack_id`; matters
/// without a binding use the default pack. Loaded packs are cached with a
/// TTL so edited files are picked up without a restart.
pub struct FileTaxonomyLoader {
    directory: PathBuf,
    db: Database,
    default_pack: Option<String>,
    cache: Cache<String, Arc<LoadedPack>>,
}

impl FileTaxonomyLoader {
    pub fn new(
        directory: impl Into<PathBuf>,
        db: Database,
        default_pack: Option<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            directory: directory.into(),
            db,
            default_pack,
            cache: Cache::builder().max_capacity(64).time_to_live(ttl).build(),
        }
    }

    /// Forces the next lookup of every pack to hit the disk.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    async fn resolve(&self, pack_id: &str) -> Result<Option<Arc<LoadedPack>>, TaxonomyError> {
        if let Some(hit) = self.cache.get(pack_id) {
            return Ok(Some(hit));
        }

        let directory = self.directory.clone();
        let packs = tokio::task::spawn_blocking(move || scan_directory(&directory))
            .await
            .map_err(|e| TaxonomyError::Task(e.to_string()))??;

        let mut found = None;
        for pack in packs {
            let id = pack.id().to_string();
            let pack = Arc::new(pack);
            if id == pack_id {
                found = Some(Arc::clone(&pack));
            }
            self.cache.insert(id, pack);
        }
        if found.is_none() {
            log::warn!("Taxonomy pack '{}' not found in {}", pack_id, self.directory.display());
        }
        Ok(found)
    }
}

#[async_trait]
impl TaxonomyLoader for FileTaxonomyLoader {
    async fn load_pack_for_matter(
        &self,
        _firm_id: &str,
        matter_id: &str,
    ) -> Result<Option<Arc<LoadedPack>>, TaxonomyError> {
        let bound = matter_repo::taxonomy_pack_id(&self.db, matter_id)?;
        match bound.or_else(|| self.default_pack.clone()) {
            Some(pack_id) => self.resolve(&pack_id).await,
            None => Ok(None),
        }
    }

    async fn load_pack_by_id(&self, pack_id: &str) -> Result<Option<Arc<LoadedPack>>, TaxonomyError> {
        self.resolve(pack_id).await
    }
}

/// Parses and validates every pack file under `directory`.
pub fn scan_directory(directory: &Path) -> Result<Vec<LoadedPack>, TaxonomyError> {
    if !directory.exists() {
        return Err(TaxonomyError::DirectoryNotFound(directory.to_path_buf()));
    }

    let mut packs: Vec<LoadedPack> = Vec::new();
    for entry in WalkDir::new(directory)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Ok(relative) = path.strip_prefix(directory) {
            let hidden = relative.components().any(|c| {
                c.as_os_str()
                    .to_str()
                    .map(|s| s.starts_with('.'))
                    .unwrap_or(false)
            });
            if hidden {
                continue;
            }
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !matches!(ext, "yaml" | "yml" | "json") {
            continue;
        }

        let pack = load_file(path)?;
        if packs.iter().any(|p| p.id() == pack.id()) {
            return Err(TaxonomyError::DuplicatePack {
                id: pack.id().to_string(),
                path: path.to_path_buf(),
            });
        }
        packs.push(pack);
    }
    Ok(packs)
}

/// Loads one pack file; JSON by extension, YAML otherwise.
pub fn load_file(path: &Path) -> Result<LoadedPack, TaxonomyError> {
    let content = fs::read_to_string(path).map_err(|e| TaxonomyError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let pack: TaxonomyPack = if is_json {
        serde_json::from_str(&content).map_err(|e| TaxonomyError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
    } else {
        serde_yaml::from_str(&content).map_err(|e| TaxonomyError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
    };
    LoadedPack::new(pack)
}
