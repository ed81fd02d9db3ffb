use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use remotion::config::{Config, MountConfig};
use remotion::session::{DocumentId, EditorHost};
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[allow(dead_code)]
pub struct EnvGuard {
    key: String,
    prev: Option<String>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn set(key: &str, val: impl AsRef<str>) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::set_var(key, val.as_ref()) };
        Self {
            key: key.to_string(),
            prev,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(v) => unsafe { std::env::set_var(&self.key, v) },
            None => unsafe { std::env::remove_var(&self.key) },
        }
    }
}

// =============================================================================
// Recording editor host
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct FakeDocument {
    pub path: Option<String>,
    pub text: String,
    pub caret: usize,
    pub selection: String,
}

/// Everything the session asked the editor to do, plus scripted answers.
#[derive(Debug, Default)]
pub struct HostState {
    pub documents: HashMap<DocumentId, FakeDocument>,
    next_id: u64,
    pub pick_answers: VecDeque<Option<usize>>,
    pub prompt_answers: VecDeque<Option<String>>,
    pub picks_shown: Vec<Vec<Vec<String>>>,
    pub prompts_shown: Vec<(String, String)>,
    pub opened: Vec<String>,
    pub carets: Vec<(DocumentId, usize)>,
    pub reloads: Vec<DocumentId>,
    pub statuses: Vec<String>,
}

#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct RecordingHost(Arc<Mutex<HostState>>);

#[allow(dead_code)]
impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, HostState> {
        self.0.lock()
    }

    pub fn add_document(&self, path: Option<&str>, text: &str) -> DocumentId {
        let mut state = self.0.lock();
        state.next_id += 1;
        let id = DocumentId(state.next_id);
        state.documents.insert(
            id,
            FakeDocument {
                path: path.map(str::to_string),
                text: text.to_string(),
                ..Default::default()
            },
        );
        id
    }

    pub fn set_caret(&self, doc: DocumentId, caret: usize) {
        if let Some(d) = self.0.lock().documents.get_mut(&doc) {
            d.caret = caret;
        }
    }

    pub fn set_selection(&self, doc: DocumentId, selection: &str) {
        if let Some(d) = self.0.lock().documents.get_mut(&doc) {
            d.selection = selection.to_string();
        }
    }

    pub fn answer_pick(&self, answer: Option<usize>) {
        self.0.lock().pick_answers.push_back(answer);
    }

    pub fn answer_prompt(&self, answer: Option<&str>) {
        self.0.lock().prompt_answers.push_back(answer.map(str::to_string));
    }
}

impl EditorHost for RecordingHost {
    fn document_path(&self, doc: DocumentId) -> Option<String> {
        self.0.lock().documents.get(&doc)?.path.clone()
    }

    fn selected_text(&self, doc: DocumentId) -> String {
        self.0
            .lock()
            .documents
            .get(&doc)
            .map(|d| d.selection.clone())
            .unwrap_or_default()
    }

    fn buffer(&self, doc: DocumentId) -> Option<(String, usize)> {
        let state = self.0.lock();
        let d = state.documents.get(&doc)?;
        Some((d.text.clone(), d.caret))
    }

    fn prompt(&mut self, caption: &str, initial: &str) -> Option<String> {
        let mut state = self.0.lock();
        state
            .prompts_shown
            .push((caption.to_string(), initial.to_string()));
        state.prompt_answers.pop_front().flatten()
    }

    fn quick_pick(&mut self, rows: &[Vec<String>]) -> Option<usize> {
        let mut state = self.0.lock();
        state.picks_shown.push(rows.to_vec());
        state.pick_answers.pop_front().flatten()
    }

    fn open_file(&mut self, path: &str) -> Option<DocumentId> {
        let text = std::fs::read_to_string(path).ok()?;
        let id = self.add_document(Some(path), &text);
        self.0.lock().opened.push(path.to_string());
        Some(id)
    }

    fn find_literal(&self, doc: DocumentId, needle: &str) -> Option<usize> {
        if needle.is_empty() {
            return None;
        }
        self.0.lock().documents.get(&doc)?.text.find(needle)
    }

    fn place_caret(&mut self, doc: DocumentId, offset: usize) {
        let mut state = self.0.lock();
        state.carets.push((doc, offset));
        if let Some(d) = state.documents.get_mut(&doc) {
            d.caret = offset;
        }
    }

    fn reload(&mut self, doc: DocumentId) {
        self.0.lock().reloads.push(doc);
    }

    fn status_message(&mut self, message: &str) {
        self.0.lock().statuses.push(message.to_string());
    }
}

// =============================================================================
// Mounted project fixture
// =============================================================================

/// A "remote" project directory plus a local symlink standing in for the
/// mount, so commands run through `sh` against real files.
#[allow(dead_code)]
pub struct MountFixture {
    pub dir: TempDir,
    pub local_root: PathBuf,
    pub remote_root: PathBuf,
}

#[allow(dead_code)]
impl MountFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let remote_root = dir.path().join("remote");
        let local_root = dir.path().join("local");
        std::fs::create_dir_all(remote_root.join("proj")).expect("remote dir");
        std::os::unix::fs::symlink(&remote_root, &local_root).expect("mount symlink");
        Self {
            dir,
            local_root,
            remote_root,
        }
    }

    /// Write a file relative to the remote project root.
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.remote_root.join("proj").join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("parent dir");
        }
        std::fs::write(&path, content).expect("write fixture");
        path
    }

    pub fn local_path(&self, relative: &str) -> String {
        path_str(&self.local_root.join("proj").join(relative))
    }

    pub fn remote_path(&self, relative: &str) -> String {
        path_str(&self.remote_root.join("proj").join(relative))
    }

    pub fn mount(&self) -> MountConfig {
        MountConfig::new(
            path_str(&self.local_root),
            path_str(&self.remote_root),
            "",
            path_str(&self.remote_root.join("proj")),
        )
    }

    /// Config with one local-execution mount and one worker per test command.
    pub fn config(&self) -> Config {
        Config {
            mounted_paths: vec![self.mount()],
            worker_threads: 2,
            ..Config::default()
        }
    }
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
