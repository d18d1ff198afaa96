//! The mounted virtual filesystem.
//!
//! A synthetic root `/` holds one subtree per mounted storage. The in-memory
//! model is authoritative for everything emitted to the service; physical
//! I/O goes through the injected [`StorageBackend`]. Many threads may walk
//! the tree concurrently, one may mutate (reader-writer lock).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use printlink_io::StorageBackend;
use printlink_types::{
    Event, EventKind, EventSink, EventSource, FileChangeKind, StorageType, Timestamp,
};

use crate::arena::{Node, NodeArena, NodeId, NodeKind, StorageMeta};
use crate::cache::{MetadataCache, MetadataExtractor, MetadataRecord};
use crate::error::{FsError, FsResult};
use crate::name::{is_gcode, is_hidden, split_path, validate_name};
use crate::watcher::WatchEvent;

/// Detached description of a subtree, used to mount prebuilt storages.
#[derive(Debug, Clone)]
pub enum FileTree {
    /// A leaf file.
    File {
        name: String,
        size: u64,
        read_only: bool,
        m_timestamp: i64,
    },
    /// A folder with its children.
    Folder {
        name: String,
        read_only: bool,
        m_timestamp: i64,
        children: Vec<FileTree>,
    },
}

impl FileTree {
    /// An empty folder, the usual seed for a fresh storage.
    pub fn empty_folder(name: impl Into<String>) -> Self {
        FileTree::Folder {
            name: name.into(),
            read_only: false,
            m_timestamp: Timestamp::now().as_secs(),
            children: Vec::new(),
        }
    }

    /// Name of the subtree root.
    pub fn name(&self) -> &str {
        match self {
            FileTree::File { name, .. } | FileTree::Folder { name, .. } => name,
        }
    }

    /// Builds a tree by scanning a physical directory through the backend.
    ///
    /// Entries whose names fail validation are skipped with a warning; a
    /// medium formatted elsewhere must not poison the whole mount.
    pub fn scan(
        backend: &dyn StorageBackend,
        physical: &Path,
        name: impl Into<String>,
    ) -> FsResult<Self> {
        let name = name.into();
        let stat = backend.stat(physical)?;
        if !stat.is_dir {
            return Ok(FileTree::File {
                name,
                size: stat.size,
                read_only: stat.read_only,
                m_timestamp: stat.m_timestamp,
            });
        }

        let mut children = Vec::new();
        for entry in backend.listdir(physical)? {
            if validate_name(&entry.name).is_err() {
                warn!(name = %entry.name, "skipping entry with invalid name");
                continue;
            }
            let child_path = physical.join(&entry.name);
            if entry.stat.is_dir {
                children.push(FileTree::scan(backend, &child_path, entry.name)?);
            } else {
                children.push(FileTree::File {
                    name: entry.name,
                    size: entry.stat.size,
                    read_only: entry.stat.read_only,
                    m_timestamp: entry.stat.m_timestamp,
                });
            }
        }
        Ok(FileTree::Folder {
            name,
            read_only: stat.read_only,
            m_timestamp: stat.m_timestamp,
            children,
        })
    }
}

/// Snapshot of one node, safe to hand out without holding the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Absolute virtual path.
    pub path: String,
    /// Bare name.
    pub name: String,
    /// Whether the node is a folder.
    pub is_folder: bool,
    /// File size; 0 for folders.
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub m_timestamp: i64,
    /// Whether the node is read-only.
    pub read_only: bool,
}

/// One row of the flat listing consumed by `SEND_INFO`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatEntry {
    /// Absolute virtual path.
    pub path: String,
    /// `FILE`, `FOLDER` or `STORAGE`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// File size; omitted for folders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Modification time, seconds since the Unix epoch.
    pub m_timestamp: i64,
    /// Whether the entry is read-only.
    pub read_only: bool,
    /// Bytes free; storage roots only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_space: Option<u64>,
    /// Total capacity; storage roots only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_space: Option<u64>,
}

/// Identity and space figures of one mounted storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageSummary {
    /// Mount name.
    pub name: String,
    /// Mount point, `/<name>`.
    pub path: String,
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    pub read_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_space: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_space: Option<u64>,
}

struct Mount {
    node: NodeId,
    physical_root: Option<PathBuf>,
    read_only: bool,
}

struct Inner {
    arena: NodeArena,
    root: NodeId,
    mounts: BTreeMap<String, Mount>,
}

/// The virtual filesystem.
pub struct Filesystem {
    inner: RwLock<Inner>,
    backend: Arc<dyn StorageBackend>,
    sink: Arc<dyn EventSink>,
    cache: Option<MetadataCache>,
}

impl Filesystem {
    /// Creates an empty filesystem over the given backend and event sink.
    pub fn new(backend: Arc<dyn StorageBackend>, sink: Arc<dyn EventSink>) -> Self {
        let mut arena = NodeArena::new();
        let root = arena.insert(Node::folder("", true, 0));
        Self {
            inner: RwLock::new(Inner {
                arena,
                root,
                mounts: BTreeMap::new(),
            }),
            backend,
            sink,
            cache: None,
        }
    }

    /// Attaches a metadata extractor; file info will carry cached metadata.
    pub fn with_metadata_cache(mut self, extractor: Arc<dyn MetadataExtractor>) -> Self {
        self.cache = Some(MetadataCache::new(Arc::clone(&self.backend), extractor));
        self
    }

    // ------------------------------------------------------------------
    // Mounting
    // ------------------------------------------------------------------

    /// Mounts a prebuilt subtree under `/<name>`.
    pub fn mount(
        &self,
        name: &str,
        tree: FileTree,
        storage_type: StorageType,
        read_only: bool,
    ) -> FsResult<()> {
        self.mount_inner(name, tree, storage_type, read_only, None)
    }

    /// Scans a physical directory and mounts it under `/<name>`.
    ///
    /// The mount remembers its physical root, so space queries and physical
    /// mutations (folder creation, deletion, transfers) reach the medium.
    pub fn mount_path(
        &self,
        name: &str,
        physical: &Path,
        storage_type: StorageType,
        read_only: bool,
    ) -> FsResult<()> {
        let tree = FileTree::scan(self.backend.as_ref(), physical, name)?;
        self.mount_inner(name, tree, storage_type, read_only, Some(physical.to_path_buf()))?;
        // Space figures are best-effort; the mount stands even if the medium
        // cannot answer.
        let _ = self.get_space_info(name);
        Ok(())
    }

    fn mount_inner(
        &self,
        name: &str,
        tree: FileTree,
        storage_type: StorageType,
        read_only: bool,
        physical_root: Option<PathBuf>,
    ) -> FsResult<()> {
        validate_name(name)?;
        let mut inner = self.inner.write().expect("filesystem lock poisoned");
        if inner.mounts.contains_key(name) {
            return Err(FsError::AlreadyMounted(name.to_string()));
        }

        let node = insert_tree(&mut inner.arena, tree, name)?;
        if let Some(n) = inner.arena.get_mut(node) {
            n.read_only = read_only;
            if let NodeKind::Folder { storage, .. } = &mut n.kind {
                *storage = Some(StorageMeta {
                    storage_type,
                    free_space: None,
                    total_space: None,
                    last_updated: Timestamp::now(),
                });
            }
        }
        let root = inner.root;
        attach(&mut inner.arena, root, node)?;
        inner.mounts.insert(
            name.to_string(),
            Mount {
                node,
                physical_root,
                read_only,
            },
        );
        drop(inner);

        debug!(storage = name, %storage_type, "storage mounted");
        self.sink.emit(
            Event::new(EventKind::MediumInserted, EventSource::Firmware)
                .with_data("storage", Value::from(name))
                .with_data("root", Value::from(format!("/{name}"))),
        );
        Ok(())
    }

    /// Unmounts a storage and drops its subtree.
    pub fn unmount(&self, name: &str) -> FsResult<()> {
        let mut inner = self.inner.write().expect("filesystem lock poisoned");
        let mount = inner
            .mounts
            .remove(name)
            .ok_or_else(|| FsError::NotMounted(name.to_string()))?;
        let root = inner.root;
        detach(&mut inner.arena, root, mount.node);
        remove_subtree(&mut inner.arena, mount.node);
        drop(inner);

        debug!(storage = name, "storage unmounted");
        self.sink.emit(
            Event::new(EventKind::MediumEjected, EventSource::Firmware)
                .with_data("storage", Value::from(name))
                .with_data("root", Value::from(format!("/{name}"))),
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookup & listing
    // ------------------------------------------------------------------

    /// Looks up a node by absolute virtual path.
    pub fn get(&self, path: &str) -> FsResult<NodeInfo> {
        let inner = self.inner.read().expect("filesystem lock poisoned");
        let id = resolve(&inner, path).ok_or_else(|| FsError::NotFound(path.to_string()))?;
        Ok(snapshot(&inner.arena, id))
    }

    /// True when the path currently resolves.
    pub fn exists(&self, path: &str) -> bool {
        let inner = self.inner.read().expect("filesystem lock poisoned");
        resolve(&inner, path).is_some()
    }

    /// Maps a virtual path to the physical path on its storage's medium.
    ///
    /// `None` when the storage was mounted without a physical root.
    pub fn physical_path(&self, path: &str) -> Option<PathBuf> {
        let inner = self.inner.read().expect("filesystem lock poisoned");
        physical_of(&inner, path)
    }

    /// Flat listing of every visible node, storage roots first.
    ///
    /// Hidden nodes and their descendants are excluded.
    pub fn flat_info(&self) -> Vec<FlatEntry> {
        let inner = self.inner.read().expect("filesystem lock poisoned");
        let mut out = Vec::new();
        let Some(root) = inner.arena.get(inner.root) else {
            return out;
        };
        let NodeKind::Folder { children, .. } = &root.kind else {
            return out;
        };
        for id in children.values() {
            flatten(&inner.arena, *id, &mut out);
        }
        out
    }

    /// The nested listing old servers expect.
    pub fn legacy_info(&self) -> Value {
        let inner = self.inner.read().expect("filesystem lock poisoned");
        nested(&inner.arena, inner.root).unwrap_or_else(|| json!({}))
    }

    /// Identity and space figures of every mounted storage.
    pub fn storage_summaries(&self) -> Vec<StorageSummary> {
        let inner = self.inner.read().expect("filesystem lock poisoned");
        inner
            .mounts
            .iter()
            .map(|(name, mount)| {
                let meta = storage_meta(&inner.arena, mount.node);
                StorageSummary {
                    name: name.clone(),
                    path: format!("/{name}"),
                    storage_type: meta.map_or(StorageType::Local, |m| m.storage_type),
                    read_only: mount.read_only,
                    free_space: meta.and_then(|m| m.free_space),
                    total_space: meta.and_then(|m| m.total_space),
                }
            })
            .collect()
    }

    /// Returns `{free, total}` of a storage, refreshing from the medium when
    /// the mount has a physical root.
    pub fn get_space_info(&self, storage: &str) -> FsResult<(Option<u64>, Option<u64>)> {
        let physical = {
            let inner = self.inner.read().expect("filesystem lock poisoned");
            let mount = inner
                .mounts
                .get(storage)
                .ok_or_else(|| FsError::NotMounted(storage.to_string()))?;
            mount.physical_root.clone()
        };

        let fresh = match &physical {
            Some(root) => match self.backend.statvfs(root) {
                Ok(space) => Some(space),
                Err(err) => {
                    warn!(storage, %err, "space query failed; serving cached figures");
                    None
                }
            },
            None => None,
        };

        let mut inner = self.inner.write().expect("filesystem lock poisoned");
        let mount = inner
            .mounts
            .get(storage)
            .ok_or_else(|| FsError::NotMounted(storage.to_string()))?;
        let node = mount.node;
        if let Some(space) = fresh {
            if let Some(NodeKind::Folder {
                storage: Some(meta),
                ..
            }) = inner.arena.get_mut(node).map(|n| &mut n.kind)
            {
                meta.free_space = Some(space.free);
                meta.total_space = Some(space.total);
                meta.last_updated = Timestamp::now();
            }
        }
        let meta = storage_meta(&inner.arena, node);
        Ok((
            meta.and_then(|m| m.free_space),
            meta.and_then(|m| m.total_space),
        ))
    }

    /// Flat entry plus extracted metadata for one file.
    ///
    /// Metadata is served from the sidecar cache when fresh; extraction
    /// failures are logged and reported as absent metadata, never as errors.
    pub fn file_info(&self, path: &str) -> FsResult<(NodeInfo, Option<MetadataRecord>)> {
        let info = self.get(path)?;
        if info.is_folder {
            return Err(FsError::NotAFile(path.to_string()));
        }
        let metadata = if is_gcode(&info.name) {
            match (&self.cache, self.physical_path(path)) {
                (Some(cache), Some(physical)) => {
                    cache.lookup(&physical, info.m_timestamp, info.size)
                }
                _ => None,
            }
        } else {
            None
        };
        Ok((info, metadata))
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Creates a folder. Creating an existing folder is a no-op; with
    /// `force`, missing ancestors are created too.
    pub fn create_folder(&self, path: &str, force: bool) -> FsResult<()> {
        let components = split_path(path);
        let Some((leaf, ancestors)) = components.split_last() else {
            return Err(FsError::NameInvalid {
                name: path.to_string(),
                reason: "empty",
            });
        };
        validate_name(leaf)?;

        let mut inner = self.inner.write().expect("filesystem lock poisoned");
        if ancestors.is_empty() {
            // Direct children of `/` are storages; they come from mount().
            return Err(FsError::PathNotFound(path.to_string()));
        }
        check_writable(&inner, path)?;

        let mut cursor = child_of(&inner.arena, inner.root, ancestors[0])
            .ok_or_else(|| FsError::PathNotFound(path.to_string()))?;
        for component in &ancestors[1..] {
            match child_of(&inner.arena, cursor, component) {
                Some(next) => cursor = next,
                None if force => {
                    validate_name(component)?;
                    cursor = insert_child(
                        &mut inner.arena,
                        cursor,
                        Node::folder(*component, false, Timestamp::now().as_secs()),
                    )?;
                }
                None => return Err(FsError::PathNotFound(path.to_string())),
            }
        }

        if let Some(existing) = child_of(&inner.arena, cursor, leaf) {
            let node = inner.arena.get(existing).expect("child index is live");
            return if node.is_folder() {
                Ok(())
            } else {
                Err(FsError::NotAFolder(path.to_string()))
            };
        }

        insert_child(
            &mut inner.arena,
            cursor,
            Node::folder(*leaf, false, Timestamp::now().as_secs()),
        )?;
        let physical = physical_of(&inner, path);
        drop(inner);

        // The model is authoritative; the physical mkdir is best-effort.
        if let Some(physical) = physical {
            if let Err(err) = self.backend.mkdir(&physical) {
                warn!(path, %err, "physical mkdir failed");
            }
        }
        self.emit_file_changed(path, FileChangeKind::Created);
        Ok(())
    }

    /// Deletes a file or folder. Non-empty folders need `force`.
    pub fn delete(&self, path: &str, force: bool) -> FsResult<()> {
        let mut inner = self.inner.write().expect("filesystem lock poisoned");
        let id = resolve(&inner, path).ok_or_else(|| FsError::NotFound(path.to_string()))?;
        if inner.mounts.values().any(|m| m.node == id) {
            // Storages leave via unmount, not delete.
            return Err(FsError::ReadOnly(path.to_string()));
        }
        check_writable(&inner, path)?;

        let node = inner.arena.get(id).expect("resolved index is live");
        let is_folder = node.is_folder();
        if let NodeKind::Folder { children, .. } = &node.kind {
            if !children.is_empty() && !force {
                return Err(FsError::NotEmpty(path.to_string()));
            }
        }

        let parent = node.parent;
        if let Some(parent) = parent {
            detach(&mut inner.arena, parent, id);
        }
        remove_subtree(&mut inner.arena, id);
        let physical = physical_of(&inner, path);
        drop(inner);

        if let Some(physical) = &physical {
            let result = if is_folder {
                remove_physical_tree(self.backend.as_ref(), physical, force)
            } else {
                self.backend.unlink(physical)
            };
            if let Err(err) = result {
                if !err.is_not_found() {
                    warn!(path, %err, "physical delete failed");
                }
            }
            if let Some(cache) = &self.cache {
                cache.invalidate(physical);
            }
        }
        self.emit_file_changed(path, FileChangeKind::Deleted);
        Ok(())
    }

    /// Emits a `FILE_CHANGED` event unless the path is hidden.
    pub fn emit_file_changed(&self, path: &str, kind: FileChangeKind) {
        if split_path(path).iter().any(|c| is_hidden(c)) {
            return;
        }
        self.sink.emit(
            Event::new(EventKind::FileChanged, EventSource::Firmware)
                .with_data("path", Value::from(path))
                .with_data("kind", Value::from(kind.as_str())),
        );
    }

    /// Applies one physical-watcher observation to the model.
    ///
    /// `storage` names the mount the watcher is attached to; `event` carries
    /// the physical path. The model is updated, the metadata cache is
    /// invalidated where needed, and a `FILE_CHANGED` event is emitted for
    /// visible paths.
    pub fn apply_watch_event(&self, storage: &str, event: &WatchEvent) -> FsResult<()> {
        let (physical, kind) = match event {
            WatchEvent::Created(p) => (p, FileChangeKind::Created),
            WatchEvent::Modified(p) => (p, FileChangeKind::Modified),
            WatchEvent::Deleted(p) => (p, FileChangeKind::Deleted),
        };

        let virtual_path = {
            let inner = self.inner.read().expect("filesystem lock poisoned");
            let mount = inner
                .mounts
                .get(storage)
                .ok_or_else(|| FsError::NotMounted(storage.to_string()))?;
            let root = mount
                .physical_root
                .as_ref()
                .ok_or_else(|| FsError::NotMounted(storage.to_string()))?;
            let rest = physical
                .strip_prefix(root)
                .map_err(|_| FsError::NotFound(physical.display().to_string()))?;
            let mut path = format!("/{storage}");
            for component in rest.components() {
                path.push('/');
                path.push_str(&component.as_os_str().to_string_lossy());
            }
            path
        };

        match kind {
            FileChangeKind::Created | FileChangeKind::Modified => {
                let stat = self.backend.stat(physical)?;
                let mut inner = self.inner.write().expect("filesystem lock poisoned");
                upsert(&mut inner, &virtual_path, stat.size, stat.m_timestamp, stat.is_dir)?;
            }
            FileChangeKind::Deleted => {
                let mut inner = self.inner.write().expect("filesystem lock poisoned");
                if let Some(id) = resolve(&inner, &virtual_path) {
                    let parent = inner.arena.get(id).and_then(|n| n.parent);
                    if let Some(parent) = parent {
                        detach(&mut inner.arena, parent, id);
                    }
                    remove_subtree(&mut inner.arena, id);
                }
            }
        }

        if matches!(kind, FileChangeKind::Modified | FileChangeKind::Deleted) {
            if let Some(cache) = &self.cache {
                cache.invalidate(physical);
            }
        }
        self.emit_file_changed(&virtual_path, kind);
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Lock-held helpers (free functions so borrows stay narrow)
// ----------------------------------------------------------------------

fn insert_tree(arena: &mut NodeArena, tree: FileTree, rename_to: &str) -> FsResult<NodeId> {
    match tree {
        FileTree::File {
            size,
            read_only,
            m_timestamp,
            ..
        } => Ok(arena.insert(Node::file(rename_to, size, read_only, m_timestamp.max(0)))),
        FileTree::Folder {
            read_only,
            m_timestamp,
            children,
            ..
        } => {
            let id = arena.insert(Node::folder(rename_to, read_only, m_timestamp.max(0)));
            for child in children {
                validate_name(child.name())?;
                let name = child.name().to_string();
                let child_id = insert_tree(arena, child, &name)?;
                attach(arena, id, child_id)?;
            }
            Ok(id)
        }
    }
}

fn attach(arena: &mut NodeArena, parent: NodeId, child: NodeId) -> FsResult<()> {
    let name = arena
        .get(child)
        .map(|n| n.name.clone())
        .unwrap_or_default();
    if let Some(n) = arena.get_mut(child) {
        n.parent = Some(parent);
    }
    match arena.get_mut(parent).map(|n| &mut n.kind) {
        Some(NodeKind::Folder { children, .. }) => {
            children.insert(name, child);
            Ok(())
        }
        _ => Err(FsError::NotAFolder(arena.path_of(parent))),
    }
}

fn detach(arena: &mut NodeArena, parent: NodeId, child: NodeId) {
    let name = arena.get(child).map(|n| n.name.clone());
    if let (Some(name), Some(NodeKind::Folder { children, .. })) =
        (name, arena.get_mut(parent).map(|n| &mut n.kind))
    {
        children.remove(&name);
    }
}

fn remove_subtree(arena: &mut NodeArena, id: NodeId) {
    let children: Vec<NodeId> = match arena.get(id).map(|n| &n.kind) {
        Some(NodeKind::Folder { children, .. }) => children.values().copied().collect(),
        _ => Vec::new(),
    };
    for child in children {
        remove_subtree(arena, child);
    }
    arena.remove(id);
}

fn insert_child(arena: &mut NodeArena, parent: NodeId, node: Node) -> FsResult<NodeId> {
    let id = arena.insert(node);
    attach(arena, parent, id)?;
    Ok(id)
}

fn child_of(arena: &NodeArena, parent: NodeId, name: &str) -> Option<NodeId> {
    match arena.get(parent).map(|n| &n.kind) {
        Some(NodeKind::Folder { children, .. }) => children.get(name).copied(),
        _ => None,
    }
}

fn resolve(inner: &Inner, path: &str) -> Option<NodeId> {
    let mut cursor = inner.root;
    for component in split_path(path) {
        cursor = child_of(&inner.arena, cursor, component)?;
    }
    Some(cursor)
}

fn snapshot(arena: &NodeArena, id: NodeId) -> NodeInfo {
    let node = arena.get(id).expect("snapshot of a live node");
    NodeInfo {
        path: arena.path_of(id),
        name: node.name.clone(),
        is_folder: node.is_folder(),
        size: node.size(),
        m_timestamp: node.m_timestamp,
        read_only: node.read_only,
    }
}

fn storage_meta(arena: &NodeArena, id: NodeId) -> Option<&StorageMeta> {
    match arena.get(id).map(|n| &n.kind) {
        Some(NodeKind::Folder {
            storage: Some(meta),
            ..
        }) => Some(meta),
        _ => None,
    }
}

fn physical_of(inner: &Inner, path: &str) -> Option<PathBuf> {
    let components = split_path(path);
    let (storage, rest) = components.split_first()?;
    let mount = inner.mounts.get(*storage)?;
    let mut physical = mount.physical_root.clone()?;
    for component in rest {
        physical.push(component);
    }
    Some(physical)
}

fn check_writable(inner: &Inner, path: &str) -> FsResult<()> {
    let components = split_path(path);
    let storage = components
        .first()
        .ok_or_else(|| FsError::PathNotFound(path.to_string()))?;
    let mount = inner
        .mounts
        .get(*storage)
        .ok_or_else(|| FsError::PathNotFound(path.to_string()))?;
    if mount.read_only {
        return Err(FsError::ReadOnly(path.to_string()));
    }
    Ok(())
}

fn upsert(
    inner: &mut Inner,
    path: &str,
    size: u64,
    m_timestamp: i64,
    is_dir: bool,
) -> FsResult<()> {
    if let Some(id) = resolve(inner, path) {
        if let Some(node) = inner.arena.get_mut(id) {
            node.m_timestamp = m_timestamp.max(0);
            if let NodeKind::File { size: s } = &mut node.kind {
                *s = size;
            }
        }
        return Ok(());
    }

    let components = split_path(path);
    let (leaf, ancestors) = components
        .split_last()
        .ok_or_else(|| FsError::PathNotFound(path.to_string()))?;
    validate_name(leaf)?;
    let mut cursor = inner.root;
    for component in ancestors {
        cursor = match child_of(&inner.arena, cursor, component) {
            Some(next) => next,
            // Watchers can race ahead of their own create events.
            None => insert_child(
                &mut inner.arena,
                cursor,
                Node::folder(*component, false, m_timestamp.max(0)),
            )?,
        };
    }
    let node = if is_dir {
        Node::folder(*leaf, false, m_timestamp.max(0))
    } else {
        Node::file(*leaf, size, false, m_timestamp.max(0))
    };
    insert_child(&mut inner.arena, cursor, node)?;
    Ok(())
}

fn flatten(arena: &NodeArena, id: NodeId, out: &mut Vec<FlatEntry>) {
    let Some(node) = arena.get(id) else { return };
    if is_hidden(&node.name) {
        return;
    }
    let meta = storage_meta(arena, id);
    let kind = match (&node.kind, meta) {
        (NodeKind::File { .. }, _) => "FILE",
        (NodeKind::Folder { .. }, Some(_)) => "STORAGE",
        (NodeKind::Folder { .. }, None) => "FOLDER",
    };
    out.push(FlatEntry {
        path: arena.path_of(id),
        kind,
        size: match node.kind {
            NodeKind::File { size } => Some(size),
            NodeKind::Folder { .. } => None,
        },
        m_timestamp: node.m_timestamp,
        read_only: node.read_only,
        free_space: meta.and_then(|m| m.free_space),
        total_space: meta.and_then(|m| m.total_space),
    });
    if let NodeKind::Folder { children, .. } = &node.kind {
        for child in children.values() {
            flatten(arena, *child, out);
        }
    }
}

fn nested(arena: &NodeArena, id: NodeId) -> Option<Value> {
    let node = arena.get(id)?;
    if is_hidden(&node.name) {
        return None;
    }
    match &node.kind {
        NodeKind::File { size } => Some(json!({
            "name": node.name,
            "type": "FILE",
            "size": size,
            "m_timestamp": node.m_timestamp,
            "ro": node.read_only,
        })),
        NodeKind::Folder { children, storage } => {
            let child_values: Vec<Value> = children
                .values()
                .filter_map(|c| nested(arena, *c))
                .collect();
            let mut obj = json!({
                "name": if node.name.is_empty() { "/" } else { node.name.as_str() },
                "type": if storage.is_some() { "STORAGE" } else { "FOLDER" },
                "m_timestamp": node.m_timestamp,
                "ro": node.read_only,
                "children": child_values,
            });
            if let Some(meta) = storage {
                let map = obj.as_object_mut().expect("constructed as object");
                if let Some(free) = meta.free_space {
                    map.insert("free_space".into(), Value::from(free));
                }
                if let Some(total) = meta.total_space {
                    map.insert("total_space".into(), Value::from(total));
                }
            }
            Some(obj)
        }
    }
}

fn remove_physical_tree(
    backend: &dyn StorageBackend,
    path: &Path,
    force: bool,
) -> Result<(), printlink_io::IoError> {
    if force {
        for entry in backend.listdir(path)? {
            let child = path.join(&entry.name);
            if entry.stat.is_dir {
                remove_physical_tree(backend, &child, force)?;
            } else {
                backend.unlink(&child)?;
            }
        }
    }
    backend.rmdir(path)
}
