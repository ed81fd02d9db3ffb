//! An [`EditorHost`] for the command line.
//!
//! Files are "opened" by reading them into memory so tag patterns can be
//! located; quick picks and prompts use dialoguer when attached to a terminal.
//! Without a terminal, picks resolve to a preselected row (if any) and the
//! candidates are listed on stderr.

use std::fmt::Write as _;

use colored::Colorize;
use dialoguer::{FuzzySelect, Input, theme::ColorfulTheme};

use crate::session::{DocumentId, EditorHost};

#[derive(Debug, Clone)]
pub struct OpenDocument {
    pub path: String,
    pub text: String,
    pub caret: usize,
}

impl OpenDocument {
    /// 1-based line and column of the caret.
    pub fn caret_position(&self) -> (usize, usize) {
        line_col(&self.text, self.caret)
    }
}

pub struct TerminalHost {
    documents: Vec<OpenDocument>,
    interactive: bool,
    preselect: Option<usize>,
    theme: ColorfulTheme,
    messages: Vec<String>,
    reloads: usize,
}

impl Default for TerminalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalHost {
    pub fn new() -> Self {
        Self {
            documents: Vec::new(),
            interactive: console::Term::stdout().is_term(),
            preselect: None,
            theme: ColorfulTheme::default(),
            messages: Vec::new(),
            reloads: 0,
        }
    }

    /// Answer picks with `index` instead of asking.
    pub fn with_preselect(mut self, index: Option<usize>) -> Self {
        self.preselect = index;
        self
    }

    pub fn non_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }

    pub fn document(&self, doc: DocumentId) -> Option<&OpenDocument> {
        let idx = usize::try_from(doc.0).ok()?.checked_sub(1)?;
        self.documents.get(idx)
    }

    fn document_mut(&mut self, doc: DocumentId) -> Option<&mut OpenDocument> {
        let idx = usize::try_from(doc.0).ok()?.checked_sub(1)?;
        self.documents.get_mut(idx)
    }

    pub fn last_opened(&self) -> Option<&OpenDocument> {
        self.documents.last()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn reloads(&self) -> usize {
        self.reloads
    }

    fn format_row(row: &[String]) -> String {
        let mut line = String::new();
        if let Some((first, rest)) = row.split_first() {
            let _ = write!(line, "{}", first.bold());
            for field in rest {
                let _ = write!(line, "  {}", field.dimmed());
            }
        }
        line
    }
}

impl EditorHost for TerminalHost {
    fn document_path(&self, doc: DocumentId) -> Option<String> {
        self.document(doc).map(|d| d.path.clone())
    }

    fn selected_text(&self, _doc: DocumentId) -> String {
        String::new()
    }

    fn buffer(&self, doc: DocumentId) -> Option<(String, usize)> {
        self.document(doc).map(|d| (d.text.clone(), d.caret))
    }

    fn prompt(&mut self, caption: &str, initial: &str) -> Option<String> {
        if !self.interactive {
            return (!initial.is_empty()).then(|| initial.to_string());
        }
        Input::<String>::with_theme(&self.theme)
            .with_prompt(caption)
            .with_initial_text(initial)
            .allow_empty(true)
            .interact_text()
            .map_err(|e| tracing::warn!(error = %e, "prompt failed"))
            .ok()
    }

    fn quick_pick(&mut self, rows: &[Vec<String>]) -> Option<usize> {
        if let Some(idx) = self.preselect {
            return (idx < rows.len()).then_some(idx);
        }
        if !self.interactive {
            for (idx, row) in rows.iter().enumerate() {
                eprintln!("{:>4}  {}", idx, row.join("  "));
            }
            return None;
        }

        let items: Vec<String> = rows.iter().map(|r| Self::format_row(r)).collect();
        FuzzySelect::with_theme(&self.theme)
            .items(&items)
            .default(0)
            .interact_opt()
            .map_err(|e| tracing::warn!(error = %e, "quick pick failed"))
            .ok()
            .flatten()
    }

    fn open_file(&mut self, path: &str) -> Option<DocumentId> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                self.documents.push(OpenDocument {
                    path: path.to_string(),
                    text,
                    caret: 0,
                });
                Some(DocumentId(self.documents.len() as u64))
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "failed to open file");
                None
            }
        }
    }

    fn find_literal(&self, doc: DocumentId, needle: &str) -> Option<usize> {
        if needle.is_empty() {
            return None;
        }
        self.document(doc)?.text.find(needle)
    }

    fn place_caret(&mut self, doc: DocumentId, offset: usize) {
        if let Some(d) = self.document_mut(doc) {
            d.caret = offset.min(d.text.len());
        }
    }

    fn reload(&mut self, doc: DocumentId) {
        let Some(d) = self.document_mut(doc) else {
            return;
        };
        match std::fs::read_to_string(&d.path) {
            Ok(text) => {
                d.caret = d.caret.min(text.len());
                d.text = text;
                self.reloads += 1;
            }
            Err(e) => tracing::warn!(path = %d.path, error = %e, "failed to reload file"),
        }
    }

    fn status_message(&mut self, message: &str) {
        eprintln!("{} {}", "»".yellow(), message);
        self.messages.push(message.to_string());
    }
}

/// 1-based line and column (in chars) of byte `offset`.
pub fn line_col(text: &str, offset: usize) -> (usize, usize) {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    let before = &text[..offset];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rsplit('\n')
        .next()
        .map_or(0, |l| l.chars().count())
        + 1;
    (line, column)
}
