//! The editing session: document events, remote listings, and tag navigation.
//!
//! A [`Session`] is the context every dispatcher job runs against. Editor
//! integrations implement [`EditorHost`] and forward document lifecycle events
//! to the session; remote work happens on the command runner's workers and
//! comes back through the dispatcher.
//!
//! # Architecture
//!
//! - **staleness**: watermarks and the reload decision
//! - **catalog**: cached remote listings for the remote file picker
//! - **tags**: tag index parsing and the word-under-cursor rule
//!
//! # Example
//!
//! ```rust,ignore
//! let mut dispatcher = Dispatcher::new();
//! let mut session = Session::new(config, Box::new(host), &dispatcher)?;
//!
//! session.on_document_loaded(doc);
//! session.on_document_activated(doc);
//! session.search_tag(Some(doc), Some("parse_config"));
//!
//! // On the UI thread, each tick:
//! dispatcher.run_pending(&mut session);
//! ```

pub mod catalog;
pub mod staleness;
pub mod tags;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, MountConfig};
use crate::mapper::{PathMapper, escape_spaces, join_remote};
use crate::shell::{CommandError, CommandHandle, CommandRunner, DispatchHandle, Dispatcher};

pub use catalog::{CatalogEntry, RemoteCatalog, host_key, parse_listing};
pub use staleness::{DocumentState, StalenessTracker, parse_mtime};
pub use tags::{TagRecord, parse_tag_output, strip_pattern, word_at};

pub const NO_TAGS_MESSAGE: &str = "No tags information found";
pub const NO_FILES_MESSAGE: &str = "No remote files found";

/// Editor-assigned identity of an open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub u64);

/// What the session needs from the editor it runs in.
pub trait EditorHost {
    /// File backing the document, if it has one.
    fn document_path(&self, doc: DocumentId) -> Option<String>;

    /// Text of the primary selection (empty when nothing is selected).
    fn selected_text(&self, doc: DocumentId) -> String;

    /// Full text and caret byte offset.
    fn buffer(&self, doc: DocumentId) -> Option<(String, usize)>;

    /// Ask for a line of input. `None` when dismissed.
    fn prompt(&mut self, caption: &str, initial: &str) -> Option<String>;

    /// Let the user choose one row. `None` on cancel.
    fn quick_pick(&mut self, rows: &[Vec<String>]) -> Option<usize>;

    fn open_file(&mut self, path: &str) -> Option<DocumentId>;

    /// Byte offset of the first literal (non-regex) occurrence of `needle`.
    fn find_literal(&self, doc: DocumentId, needle: &str) -> Option<usize>;

    /// Move the caret to `offset` and scroll it into view.
    fn place_caret(&mut self, doc: DocumentId, offset: usize);

    /// Re-read the document from disk.
    fn reload(&mut self, doc: DocumentId);

    fn status_message(&mut self, message: &str);
}

pub struct Session {
    config: Arc<Config>,
    mapper: PathMapper,
    runner: CommandRunner<Session>,
    dispatch: DispatchHandle<Session>,
    staleness: StalenessTracker,
    catalog: RemoteCatalog,
    clock: Arc<dyn Clock>,
    host: Box<dyn EditorHost>,
}

impl Session {
    pub fn new(
        config: impl Into<Arc<Config>>,
        host: Box<dyn EditorHost>,
        dispatcher: &Dispatcher<Session>,
    ) -> Result<Self, CommandError> {
        let config: Arc<Config> = config.into();
        let dispatch = dispatcher.handle();
        let runner = CommandRunner::new(
            dispatch.clone(),
            &config.remote_transport,
            config.worker_threads,
        )?;
        Ok(Self {
            mapper: PathMapper::from_config(&config),
            staleness: StalenessTracker::from_config(&config),
            catalog: RemoteCatalog::new(config.cache_timeout),
            clock: Arc::new(SystemClock),
            config,
            runner,
            dispatch,
            host,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the listing cache, e.g. with one loaded from disk.
    pub fn with_catalog(mut self, catalog: RemoteCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    pub fn staleness(&self) -> &StalenessTracker {
        &self.staleness
    }

    pub fn catalog(&self) -> &RemoteCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut RemoteCatalog {
        &mut self.catalog
    }

    pub fn host(&self) -> &dyn EditorHost {
        self.host.as_ref()
    }

    pub fn host_mut(&mut self) -> &mut dyn EditorHost {
        self.host.as_mut()
    }

    pub fn runner(&self) -> &CommandRunner<Session> {
        &self.runner
    }

    // -------------------------------------------------------------------------
    // Document lifecycle
    // -------------------------------------------------------------------------

    pub fn on_document_loaded(&mut self, doc: DocumentId) {
        let now = self.clock.now();
        self.staleness.stamp_loaded(doc, now);
    }

    pub fn on_document_created(&mut self, doc: DocumentId) {
        self.on_document_loaded(doc);
    }

    pub fn on_document_saved(&mut self, doc: DocumentId) {
        let now = self.clock.now();
        self.staleness.stamp_saved(doc, now);
    }

    pub fn on_document_closed(&mut self, doc: DocumentId) {
        self.staleness.forget(doc);
    }

    /// Ask the remote host whether the document changed behind our back and
    /// reload it if so. Overlapping checks are not de-duplicated.
    pub fn on_document_activated(&mut self, doc: DocumentId) -> Option<CommandHandle> {
        if !self.staleness.is_enabled() {
            return None;
        }
        let path = self.host.document_path(doc)?;
        self.mapper.resolve_for_local(&path)?;
        self.staleness.track(doc);

        self.remote_mtime(&path, move |session, remote_mtime| {
            session.compare_remote_mtime(doc, remote_mtime);
        })
    }

    /// Query the remote modification time of a local file.
    ///
    /// `None` when no mount claims the path.
    pub fn remote_mtime(
        &self,
        local_path: &str,
        on_mtime: impl FnOnce(&mut Session, f64) + Send + 'static,
    ) -> Option<CommandHandle> {
        let mount = self.mapper.resolve_for_local(local_path)?;
        let remote_path = PathMapper::to_remote(local_path, mount);

        let handle = self
            .runner
            .command(
                self.config.remote_last_touched_command.as_str(),
                [remote_path.clone()],
            )
            .remote(mount.host())
            .on_success(move |session: &mut Session, result| {
                let stdout = result.stdout_text();
                match parse_mtime(&stdout) {
                    Some(mtime) => on_mtime(session, mtime),
                    None => tracing::warn!(
                        remote_path = %remote_path,
                        output = %stdout.trim(),
                        "unparsable remote modification time"
                    ),
                }
            })
            .execute();
        Some(handle)
    }

    fn compare_remote_mtime(&mut self, doc: DocumentId, remote_mtime: f64) {
        if !self.staleness.needs_reload(doc, remote_mtime) {
            tracing::debug!(
                doc = doc.0,
                remote_mtime,
                watermark = ?self.staleness.watermark(doc),
                "document is current"
            );
            return;
        }

        tracing::info!(doc = doc.0, remote_mtime, "remote copy changed, scheduling reload");
        self.dispatch
            .post_after(self.staleness.propagation_delay(), move |session| {
                if session.staleness.is_tracked(doc) {
                    session.host.reload(doc);
                }
            });
    }

    // -------------------------------------------------------------------------
    // Remote file picker
    // -------------------------------------------------------------------------

    /// Offer the default mount's project files for opening.
    pub fn open_remote(&mut self, force_reload: bool) -> Option<CommandHandle> {
        let mount = self.mapper.resolve_best(None)?.clone();
        self.list_files(&mount, force_reload)
    }

    /// List `mount`'s project files and offer them in the quick picker.
    pub fn list_files(&mut self, mount: &MountConfig, force_reload: bool) -> Option<CommandHandle> {
        self.list_files_with(mount, force_reload, |session, mount, files| {
            session.present_files(mount, &files);
        })
    }

    /// List `mount`'s project files and hand them to `present`.
    ///
    /// A fresh cached listing is presented immediately and `None` is returned;
    /// otherwise the listing command is started and its handle returned.
    pub fn list_files_with(
        &mut self,
        mount: &MountConfig,
        force_reload: bool,
        present: impl FnOnce(&mut Session, &MountConfig, Vec<String>) + Send + 'static,
    ) -> Option<CommandHandle> {
        let key = host_key(mount);
        let now = self.clock.now();
        if let Some(files) = self.catalog.fresh(&key, now, force_reload) {
            tracing::debug!(host = %key, files = files.len(), "using cached listing");
            let files = files.to_vec();
            present(self, mount, files);
            return None;
        }

        let mount = mount.clone();
        let handle = self
            .runner
            .command(
                self.config.remote_ls_command.as_str(),
                [escape_spaces(&mount.remote_project_path)],
            )
            .remote(mount.host())
            .on_success(move |session: &mut Session, result| {
                let files = parse_listing(&result.stdout_text());
                let now = session.clock.now();
                tracing::info!(host = %key, files = files.len(), "refreshed remote listing");
                session.catalog.store(&key, files.clone(), now);
                present(session, &mount, files);
            })
            .execute();
        Some(handle)
    }

    /// Offer `files` in the quick picker and open the chosen one.
    pub fn present_files(&mut self, mount: &MountConfig, files: &[String]) -> Option<DocumentId> {
        if files.is_empty() {
            self.host.status_message(NO_FILES_MESSAGE);
            return None;
        }
        let rows: Vec<Vec<String>> = files.iter().map(|f| vec![f.clone()]).collect();
        let relative = self.host.quick_pick(&rows).and_then(|idx| files.get(idx))?;
        let local = PathMapper::project_file_to_local(mount, relative);
        tracing::debug!(path = %local, "opening remote file");
        self.host.open_file(&local)
    }

    // -------------------------------------------------------------------------
    // Tag navigation
    // -------------------------------------------------------------------------

    /// Jump to a symbol's definition using the remote tag index.
    ///
    /// Without a symbol, the selection is used; failing that the user is
    /// prompted with the word under the caret.
    pub fn search_tag(
        &mut self,
        doc: Option<DocumentId>,
        symbol: Option<&str>,
    ) -> Option<CommandHandle> {
        let symbol = self.resolve_symbol(doc, symbol)?;
        self.lookup_tag(doc, &symbol, |session, mount, tags| {
            session.present_tags(&mount, tags);
        })
    }

    /// The symbol to look up: the given one, else the selection, else whatever
    /// the user confirms at a prompt prefilled with the word under the caret.
    pub fn resolve_symbol(
        &mut self,
        doc: Option<DocumentId>,
        symbol: Option<&str>,
    ) -> Option<String> {
        if let Some(symbol) = symbol.map(str::trim).filter(|s| !s.is_empty()) {
            return Some(symbol.to_string());
        }

        let selected = doc
            .map(|d| self.host.selected_text(d))
            .unwrap_or_default();
        if !selected.trim().is_empty() {
            return Some(selected.trim().to_string());
        }

        let initial = doc
            .and_then(|d| self.host.buffer(d))
            .map(|(text, caret)| word_at(&text, caret).to_string())
            .unwrap_or_default();
        let answer = self.host.prompt("Search for tag", &initial)?;
        let answer = answer.trim();
        (!answer.is_empty()).then(|| answer.to_string())
    }

    /// Run the tag lookup for `symbol` and hand the matches to `present`.
    pub fn lookup_tag(
        &mut self,
        doc: Option<DocumentId>,
        symbol: &str,
        present: impl FnOnce(&mut Session, MountConfig, Vec<TagRecord>) + Send + 'static,
    ) -> Option<CommandHandle> {
        let path = doc.and_then(|d| self.host.document_path(d));
        let mount = self.mapper.resolve_best(path.as_deref())?.clone();
        tracing::debug!(symbol, host = %host_key(&mount), "searching for tag");

        let handle = self
            .runner
            .command(
                self.config.remote_tags_command.as_str(),
                [escape_spaces(&mount.remote_project_path), symbol.to_string()],
            )
            .remote(mount.host())
            .on_success(move |session: &mut Session, result| {
                let tags = parse_tag_output(&result.stdout_text());
                present(session, mount, tags);
            })
            .execute();
        Some(handle)
    }

    /// Report, open, or offer a choice between tag matches.
    pub fn present_tags(&mut self, mount: &MountConfig, tags: Vec<TagRecord>) -> Option<DocumentId> {
        match tags.as_slice() {
            [] => {
                self.host.status_message(NO_TAGS_MESSAGE);
                None
            }
            [only] => self.open_tag(mount, only),
            _ => {
                let rows: Vec<Vec<String>> = tags.iter().map(|t| t.fields.clone()).collect();
                let tag = self.host.quick_pick(&rows).and_then(|idx| tags.get(idx))?;
                self.open_tag(mount, tag)
            }
        }
    }

    /// Open the file a tag points at and put the caret on its pattern.
    ///
    /// The file stays open when the pattern is not found.
    pub fn open_tag(&mut self, mount: &MountConfig, tag: &TagRecord) -> Option<DocumentId> {
        let remote = join_remote(&mount.remote_project_path, &tag.relative_path);
        let Some(local) = self.mapper.to_local(&remote) else {
            tracing::debug!(remote_path = %remote, "no mount for tag target");
            return None;
        };

        let doc = self.host.open_file(&local)?;
        match self.host.find_literal(doc, &tag.search_pattern) {
            Some(offset) => self.host.place_caret(doc, offset),
            None => tracing::warn!(
                path = %local,
                pattern = %tag.search_pattern,
                "can't find tag text"
            ),
        }
        Some(doc)
    }
}
