use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
pub const BOOTSTRAP_ENTRY: &str = "/index.tsx";
pub const BOOTSTRAP_HTML: &str = "/public/index.html";

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head><meta charset="UTF-8" /></head>
  <body><div id="root"></div></body>
</html>
"#;

/// A generated multi-file project, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFileSet {
    pub files: BTreeMap<String, String>,
    pub main_file: String,
}

impl ProjectFileSet {
    pub fn new(main_file: impl Into<String>) -> Self {
        Self {
            files: BTreeMap::new(),
            main_file: canonical_path(&main_file.into()),
        }
    }

    pub fn with_file(mut self, path: &str, contents: impl Into<String>) -> Self {
        self.files.insert(canonical_path(path), contents.into());
        self
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(&canonical_path(path)).map(String::as_str)
    }

    pub fn main_contents(&self) -> Option<&str> {
        self.get(&self.main_file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeFile {
    pub code: String,
    pub hidden: bool,
}

pub type RuntimeFileSet = BTreeMap<String, RuntimeFile>;

pub fn runtime_path(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

pub fn canonical_path(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

pub fn is_bootstrap_path(path: &str) -> bool {
    let path = runtime_path(path);
    path == BOOTSTRAP_ENTRY || path == BOOTSTRAP_HTML
}

fn bootstrap_entry(main_file: &str) -> String {
    let module = main_file
        .rsplit_once('.')
        .map_or(main_file, |(stem, _)| stem);
    format!(
        "import {{ createRoot }} from \"react-dom/client\";\n\
         import App from \"./{module}\";\n\n\
         createRoot(document.getElementById(\"root\")!).render(<App />);\n"
    )
}

/// The sandbox's initial files: every canonical file under its sandbox path,
/// plus hidden bootstrap files that mount the main file.
pub fn derive_runtime_files(project: &ProjectFileSet) -> RuntimeFileSet {
    let mut files: RuntimeFileSet = project
        .files
        .iter()
        .map(|(path, code)| {
            (
                runtime_path(path),
                RuntimeFile {
                    code: code.clone(),
                    hidden: false,
                },
            )
        })
        .collect();
    files.insert(
        BOOTSTRAP_ENTRY.to_string(),
        RuntimeFile {
            code: bootstrap_entry(&project.main_file),
            hidden: true,
        },
    );
    files.insert(
        BOOTSTRAP_HTML.to_string(),
        RuntimeFile {
            code: INDEX_HTML.to_string(),
            hidden: true,
        },
    );
    files
}

/// Overlay sandbox contents on `baseline`, skipping bootstrap files.
pub fn merge_runtime(baseline: &ProjectFileSet, runtime: &BTreeMap<String, String>) -> ProjectFileSet {
    let mut merged = baseline.clone();
    for (path, code) in runtime {
        if is_bootstrap_path(path) {
            continue;
        }
        merged.files.insert(canonical_path(path), code.clone());
    }
    merged
}

/// Single-shot cancellable timer. Scheduling replaces any pending callback.
#[derive(Debug, Default)]
pub struct Debouncer {
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn schedule<F>(&mut self, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel_pending();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        }));
    }

    /// Returns true when a callback was still waiting to fire.
    pub fn cancel_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

/// Receives committed project files. Returns whether anything changed.
pub trait ProjectFilesSink: Send + Sync {
    fn commit_project_files(&self, message_id: Uuid, files: &ProjectFileSet) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Committed,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileTreeNode {
    Folder {
        name: String,
        path: String,
        children: Vec<FileTreeNode>,
    },
    File {
        name: String,
        path: String,
    },
}

impl FileTreeNode {
    pub fn name(&self) -> &str {
        match self {
            Self::Folder { name, .. } | Self::File { name, .. } => name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Folder { path, .. } | Self::File { path, .. } => path,
        }
    }
}

/// Folders before files, each group in name order.
pub fn build_file_tree<'a>(paths: impl IntoIterator<Item = &'a String>) -> Vec<FileTreeNode> {
    #[derive(Default)]
    struct Dir {
        dirs: BTreeMap<String, Dir>,
        files: Vec<String>,
    }

    fn into_nodes(dir: Dir, prefix: &str) -> Vec<FileTreeNode> {
        let join = |name: &str| {
            if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}/{name}")
            }
        };
        let mut nodes: Vec<FileTreeNode> = dir
            .dirs
            .into_iter()
            .map(|(name, child)| {
                let path = join(&name);
                FileTreeNode::Folder {
                    children: into_nodes(child, &path),
                    name,
                    path,
                }
            })
            .collect();
        let mut files = dir.files;
        files.sort();
        nodes.extend(files.into_iter().map(|name| FileTreeNode::File {
            path: join(&name),
            name,
        }));
        nodes
    }

    let mut root = Dir::default();
    for path in paths {
        let mut parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
        let Some(file) = parts.pop() else { continue };
        let dir = parts.into_iter().fold(&mut root, |dir, part| {
            dir.dirs.entry(part.to_string()).or_default()
        });
        dir.files.push(file.to_string());
    }
    into_nodes(root, "")
}

struct Shared {
    message_id: Uuid,
    canonical: ProjectFileSet,
    runtime: BTreeMap<String, String>,
}

fn commit(shared: &Mutex<Shared>, sink: &dyn ProjectFilesSink) -> SyncOutcome {
    let (message_id, merged) = {
        let shared = shared.lock();
        let merged = merge_runtime(&shared.canonical, &shared.runtime);
        if merged == shared.canonical {
            tracing::debug!(message_id = %shared.message_id, "project files unchanged, skipping commit");
            return SyncOutcome::Unchanged;
        }
        (shared.message_id, merged)
    };
    if !sink.commit_project_files(message_id, &merged) {
        tracing::debug!(%message_id, "sink rejected project files");
        return SyncOutcome::Unchanged;
    }
    tracing::debug!(%message_id, files = merged.files.len(), "committed project files");
    let mut shared = shared.lock();
    if shared.message_id == message_id {
        shared.canonical = merged;
    }
    SyncOutcome::Committed
}

/// Debounced bridge from sandbox edits to a message's canonical files.
pub struct FileSynchronizer {
    shared: Arc<Mutex<Shared>>,
    sink: Arc<dyn ProjectFilesSink>,
    debouncer: Debouncer,
    delay: Duration,
    runtime_files: RuntimeFileSet,
    selected: Option<String>,
}

impl FileSynchronizer {
    pub fn mount(
        message_id: Uuid,
        canonical: ProjectFileSet,
        sink: Arc<dyn ProjectFilesSink>,
    ) -> Self {
        Self::mount_with_delay(message_id, canonical, sink, DEFAULT_DEBOUNCE)
    }

    pub fn mount_with_delay(
        message_id: Uuid,
        canonical: ProjectFileSet,
        sink: Arc<dyn ProjectFilesSink>,
        delay: Duration,
    ) -> Self {
        let runtime_files = derive_runtime_files(&canonical);
        let selected = canonical
            .files
            .contains_key(&canonical.main_file)
            .then(|| canonical.main_file.clone());
        Self {
            shared: Arc::new(Mutex::new(Shared {
                message_id,
                canonical,
                runtime: BTreeMap::new(),
            })),
            sink,
            debouncer: Debouncer::default(),
            delay,
            runtime_files,
            selected,
        }
    }

    /// Swap in another message's files. Any pending commit for the old
    /// target is dropped.
    pub fn remount(&mut self, message_id: Uuid, canonical: ProjectFileSet) {
        self.debouncer.cancel_pending();
        self.runtime_files = derive_runtime_files(&canonical);
        self.selected = canonical
            .files
            .contains_key(&canonical.main_file)
            .then(|| canonical.main_file.clone());
        let mut shared = self.shared.lock();
        shared.message_id = message_id;
        shared.canonical = canonical;
        shared.runtime.clear();
    }

    pub fn runtime_files(&self) -> &RuntimeFileSet {
        &self.runtime_files
    }

    pub fn visible_runtime_paths(&self) -> impl Iterator<Item = &str> {
        self.runtime_files
            .iter()
            .filter(|(_, file)| !file.hidden)
            .map(|(path, _)| path.as_str())
    }

    /// Record the sandbox's current state and restart the quiet period.
    pub fn on_runtime_change(&mut self, runtime: BTreeMap<String, String>) {
        self.shared.lock().runtime = runtime;
        let shared = Arc::clone(&self.shared);
        let sink = Arc::clone(&self.sink);
        self.debouncer.schedule(self.delay, move || {
            commit(&shared, sink.as_ref());
        });
    }

    /// Commit a pending change now instead of waiting for the timer.
    pub fn flush(&mut self) -> Option<SyncOutcome> {
        if self.debouncer.cancel_pending() {
            Some(commit(&self.shared, self.sink.as_ref()))
        } else {
            None
        }
    }

    pub fn has_pending_commit(&self) -> bool {
        self.debouncer.is_pending()
    }

    pub fn canonical(&self) -> ProjectFileSet {
        self.shared.lock().canonical.clone()
    }

    pub fn select_file(&mut self, path: &str) -> Option<String> {
        let contents = self.shared.lock().canonical.get(path).map(str::to_string)?;
        self.selected = Some(canonical_path(path));
        Some(contents)
    }

    pub fn selected_file(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn file_tree(&self) -> Vec<FileTreeNode> {
        let shared = self.shared.lock();
        build_file_tree(shared.canonical.files.keys())
    }
}
