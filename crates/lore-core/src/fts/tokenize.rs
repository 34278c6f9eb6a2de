//! Token derivation for the full-text index: URI mangling and splitting,
//! term capping, weighted text accumulation, CJK run extraction and desktop
//! entry lookup for actor enrichment.

use std::collections::HashMap;
use std::path::PathBuf;

/// Terms longer than this many bytes upset the engine; everything written
/// into the index goes through [`cap_term`] first.
pub const MAX_TERM_BYTES: usize = 245;

/// Converts a URI into an index- and query-friendly string: lower-cased,
/// with `:`, space and `/` replaced by `_` so the boolean facet fields see
/// one opaque token. One-way.
pub fn mangle_uri(uri: &str) -> String {
    uri.to_lowercase()
        .chars()
        .map(|c| if matches!(c, ':' | ' ' | '/') { '_' } else { c })
        .collect()
}

/// Cap `s` to [`MAX_TERM_BYTES`] bytes, truncating on a char boundary.
pub fn cap_term(s: &str) -> &str {
    if s.len() <= MAX_TERM_BYTES {
        return s;
    }
    let mut end = MAX_TERM_BYTES;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Split a URI into `(scheme, host, path)`. Anything without a scheme is
/// treated as a bare path; the query part is stripped.
pub fn split_uri(uri: &str) -> (&str, &str, &str) {
    let Some(colon) = uri.find(':') else {
        return ("", "", uri);
    };
    let scheme = &uri[..colon];
    let rest = &uri[colon + 1..];

    let (host, path) = if let Some(authority) = rest.strip_prefix("//") {
        match authority.find('/') {
            Some(slash) => (&authority[..slash], &authority[slash..]),
            None => (authority, ""),
        }
    } else {
        (rest, "")
    };

    let path = match path.find('?') {
        Some(q) => &path[..q],
        None => path,
    };
    (scheme, host, path)
}

/// Decode %XX escapes; bad escapes are kept verbatim.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &input[i + 1..i + 3];
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Scored text accumulated for one document. The engine has no per-posting
/// weights, so weight becomes repetition into the scored fields, plus
/// query-time field boosts on `name`/`app`/`site`.
#[derive(Debug, Default)]
pub struct ScoredText {
    pub content: String,
    pub name: String,
    pub app: String,
    pub site: String,
    pub cjk: String,
}

impl ScoredText {
    fn push_repeated(buf: &mut String, text: &str, weight: u32) {
        let text = cap_term(text);
        if text.is_empty() {
            return;
        }
        for _ in 0..weight.max(1) {
            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(text);
        }
    }

    pub fn add_content(&mut self, text: &str, weight: u32) {
        Self::push_repeated(&mut self.content, text, weight);
        let runs = cjk_runs(text);
        if !runs.is_empty() {
            Self::push_repeated(&mut self.cjk, &runs, 1);
        }
    }

    pub fn add_name(&mut self, text: &str, weight: u32) {
        self.add_content(text, weight);
        Self::push_repeated(&mut self.name, text, 1);
    }

    pub fn add_app(&mut self, text: &str, weight: u32) {
        self.add_content(text, weight);
        Self::push_repeated(&mut self.app, text, 1);
    }

    pub fn add_site(&mut self, text: &str, weight: u32) {
        self.add_content(text, weight);
        Self::push_repeated(&mut self.site, text, 1);
    }

    /// Derive tokens from a subject or origin URI. File URIs contribute
    /// their basename strongly and ancestor names with decaying weight; web
    /// URIs are treated more carefully since paths out there can be
    /// arbitrarily long and useless.
    pub fn add_uri(&mut self, uri: &str) {
        let decoded = percent_decode(uri);
        let (scheme, host, path) = split_uri(&decoded);
        if scheme == "file" || scheme.is_empty() {
            let (mut parent, name) = rsplit_path(path);
            self.add_name(name, 5);
            let mut weight = 5.0f32;
            loop {
                let (rest, component) = rsplit_path(parent);
                if component.is_empty() {
                    break;
                }
                weight /= 1.5;
                self.add_content(component, weight as u32);
                parent = rest;
            }
        } else if scheme == "mailto" {
            let mut tokens = host.splitn(2, '@');
            if let Some(name) = tokens.next() {
                self.add_content(name, 6);
            }
            if let Some(domain) = tokens.next() {
                self.add_content(domain, 1);
            }
        } else {
            let (parent, name) = rsplit_path(path);
            let name = truncate_chars(name, 30);
            let parent = truncate_chars(parent, 30);
            if !name.is_empty() {
                self.add_name(name, 5);
            }
            if !parent.is_empty() {
                self.add_name(parent, 1);
            }
            if !host.is_empty() {
                self.add_site(host, 2);
            }
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Split a path into (parent, last component).
fn rsplit_path(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x1100..=0x11FF       // Hangul Jamo
        | 0x2E80..=0x303F     // CJK radicals, Kangxi, punctuation
        | 0x3040..=0x30FF     // Hiragana, Katakana
        | 0x3130..=0x318F     // Hangul compatibility Jamo
        | 0x3400..=0x4DBF     // CJK extension A
        | 0x4E00..=0x9FFF     // CJK unified ideographs
        | 0xAC00..=0xD7AF     // Hangul syllables
        | 0xF900..=0xFAFF     // CJK compatibility ideographs
        | 0x20000..=0x2FA1F   // CJK extensions B..F
    )
}

/// The CJK character runs of `text`, space-separated. These go to the
/// ngram-tokenised field; word-boundary tokenisation is useless for them.
pub fn cjk_runs(text: &str) -> String {
    let mut out = String::new();
    let mut in_run = false;
    for c in text.chars() {
        if is_cjk(c) {
            if !in_run && !out.is_empty() {
                out.push(' ');
            }
            out.push(c);
            in_run = true;
        } else {
            in_run = false;
        }
    }
    out
}

/// The searchable parts of a desktop entry.
#[derive(Debug, Clone, Default)]
pub struct DesktopEntry {
    pub name: String,
    pub generic_name: String,
    pub comment: String,
    pub categories: Vec<String>,
    pub no_display: bool,
}

/// Loads and caches desktop entries from the XDG data directories. Owned by
/// the index worker; lookups never block the ingress path.
#[derive(Debug, Default)]
pub struct DesktopEntryCache {
    entries: HashMap<String, Option<DesktopEntry>>,
}

impl DesktopEntryCache {
    /// Application id (`gedit.desktop`) for an actor URI, if one can be
    /// derived.
    pub fn app_id(actor: &str) -> Option<String> {
        let decoded = percent_decode(actor);
        let (_, host, path) = split_uri(&decoded);
        let id = if path.is_empty() { host } else { path };
        if id.is_empty() {
            return None;
        }
        let id = match id.rfind('/') {
            Some(idx) => &id[idx + 1..],
            None => id,
        };
        (!id.is_empty()).then(|| id.to_string())
    }

    pub fn lookup(&mut self, app_id: &str) -> Option<&DesktopEntry> {
        if !self.entries.contains_key(app_id) {
            let loaded = Self::load(app_id);
            self.entries.insert(app_id.to_string(), loaded);
        }
        self.entries.get(app_id).and_then(Option::as_ref)
    }

    fn data_dirs() -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(home) = dirs::data_dir() {
            dirs.push(home);
        }
        let system = std::env::var("XDG_DATA_DIRS")
            .unwrap_or_else(|_| "/usr/local/share:/usr/share".to_string());
        dirs.extend(system.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
        dirs
    }

    fn load(app_id: &str) -> Option<DesktopEntry> {
        for dir in Self::data_dirs() {
            let path = dir.join("applications").join(app_id);
            if !path.exists() {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(content) => return Some(Self::parse(&content)),
                Err(e) => {
                    tracing::warn!("unable to load {}: {e}", path.display());
                    return None;
                }
            }
        }
        None
    }

    fn parse(content: &str) -> DesktopEntry {
        let mut entry = DesktopEntry::default();
        let mut in_main_group = false;
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('[') {
                in_main_group = line == "[Desktop Entry]";
                continue;
            }
            if !in_main_group {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "Name" => entry.name = value.trim().to_string(),
                "GenericName" => entry.generic_name = value.trim().to_string(),
                "Comment" => entry.comment = value.trim().to_string(),
                "NoDisplay" => entry.no_display = value.trim() == "true",
                "Categories" => {
                    entry.categories = value
                        .split(';')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(str::to_lowercase)
                        .collect();
                }
                _ => {}
            }
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangling_is_lowercase_with_punctuation_folded() {
        assert_eq!(mangle_uri("file:///tmp/My File"), "file____tmp_my_file");
        assert_eq!(mangle_uri("HTTP://Example.org/a"), "http___example.org_a");
    }

    #[test]
    fn term_cap_respects_char_boundaries() {
        let long = "ä".repeat(200);
        let capped = cap_term(&long);
        assert!(capped.len() <= MAX_TERM_BYTES);
        assert_eq!(capped.len() % 2, 0);
        assert!(cap_term("short").len() == 5);
    }

    #[test]
    fn uri_splitting() {
        assert_eq!(split_uri("file:///tmp/a.txt"), ("file", "", "/tmp/a.txt"));
        assert_eq!(
            split_uri("http://example.org/x/y?q=1"),
            ("http", "example.org", "/x/y")
        );
        assert_eq!(split_uri("mailto:ada@lovelace.net"), ("mailto", "ada@lovelace.net", ""));
        assert_eq!(split_uri("/plain/path"), ("", "", "/plain/path"));
    }

    #[test]
    fn percent_decoding() {
        assert_eq!(percent_decode("a%20b"), "a b");
        assert_eq!(percent_decode("100%"), "100%");
    }

    #[test]
    fn file_uris_index_basename_and_ancestors() {
        let mut text = ScoredText::default();
        text.add_uri("file:///home/ada/notes/draft.txt");
        assert!(text.name.contains("draft.txt"));
        assert!(text.content.contains("notes"));
        assert!(text.content.contains("ada"));
        // Basename is weighted above ancestors.
        let basename_count = text.content.matches("draft.txt").count();
        let parent_count = text.content.matches("notes").count();
        assert!(basename_count > parent_count);
    }

    #[test]
    fn web_uris_index_host_as_site() {
        let mut text = ScoredText::default();
        text.add_uri("https://example.org/articles/lovelace");
        assert!(text.site.contains("example.org"));
        assert!(text.name.contains("lovelace"));
    }

    #[test]
    fn cjk_runs_are_extracted() {
        assert_eq!(cjk_runs("読書 notes 漢字"), "読書 漢字");
        assert_eq!(cjk_runs("plain ascii"), "");
    }

    #[test]
    fn desktop_entry_parse_reads_main_group_only() {
        let entry = DesktopEntryCache::parse(
            "[Desktop Entry]\nName=Text Editor\nGenericName=Editor\nComment=Edit files\n\
             Categories=Utility;TextEditor;\n[Desktop Action new]\nName=New Window\n",
        );
        assert_eq!(entry.name, "Text Editor");
        assert_eq!(entry.generic_name, "Editor");
        assert_eq!(entry.categories, vec!["utility", "texteditor"]);
        assert!(!entry.no_display);
    }

    #[test]
    fn app_id_from_actor_uri() {
        assert_eq!(
            DesktopEntryCache::app_id("application://gedit.desktop"),
            Some("gedit.desktop".to_string())
        );
        assert_eq!(
            DesktopEntryCache::app_id("file:///usr/share/applications/vlc.desktop"),
            Some("vlc.desktop".to_string())
        );
        assert_eq!(DesktopEntryCache::app_id(""), None);
    }
}
