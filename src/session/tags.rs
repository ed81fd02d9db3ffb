//! Tag index lines and the word-under-cursor rule used to pick a symbol.
//!
//! Lines follow the ctags layout: `symbol<TAB>path<TAB>address<TAB>kind...`.
//! The last field is dropped; the address is reduced to literal text that can
//! be searched for in the opened file.

/// One parsed tag index line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub symbol: String,
    pub relative_path: String,
    /// Literal text to search for in the target file.
    pub search_pattern: String,
    /// Raw fields minus the trailing one, as shown in the picker.
    pub fields: Vec<String>,
}

pub fn parse_tag_line(line: &str) -> Option<TagRecord> {
    let mut fields: Vec<String> = line.split('\t').map(str::to_string).collect();
    fields.pop();
    if fields.len() < 3 {
        return None;
    }
    Some(TagRecord {
        symbol: fields[0].clone(),
        relative_path: fields[1].clone(),
        search_pattern: strip_pattern(&fields[2]),
        fields,
    })
}

pub fn parse_tag_output(stdout: &str) -> Vec<TagRecord> {
    stdout
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            let record = parse_tag_line(line);
            if record.is_none() {
                tracing::debug!(line, "skipping malformed tag line");
            }
            record
        })
        .collect()
}

/// Reduce a tag address such as `/^int main()$/;"` to `int main()`.
pub fn strip_pattern(raw: &str) -> String {
    let mut p = raw.trim();
    p = p.strip_suffix(";\"").unwrap_or(p);
    if let Some(delim) = p.chars().next().filter(|c| matches!(c, '/' | '?')) {
        p = &p[1..];
        p = p.strip_suffix(delim).unwrap_or(p);
        p = p.strip_prefix('^').unwrap_or(p);
        p = p.strip_suffix('$').unwrap_or(p);
    }
    p.replace("\\/", "/")
        .replace("\\?", "?")
        .replace("\\\\", "\\")
        .trim()
        .to_string()
}

/// Identifier characters, including `:` and `$` so namespaced and sigiled
/// names (`Foo::bar`, `$value`) come out whole.
pub fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '$')
}

/// The run of word characters around byte `offset` in `text`.
pub fn word_at(text: &str, offset: usize) -> &str {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }

    let start = text[..offset]
        .char_indices()
        .rev()
        .take_while(|&(_, c)| is_word_char(c))
        .last()
        .map_or(offset, |(i, _)| i);
    let end = text[offset..]
        .char_indices()
        .find(|&(_, c)| !is_word_char(c))
        .map_or(text.len(), |(i, _)| offset + i);

    &text[start..end]
}
