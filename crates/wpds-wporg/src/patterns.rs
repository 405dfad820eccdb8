use regex::Regex;
use wpds::{CatalogItem, dedup_items};

/// Compiled patterns for the textual formats served by the directory.
///
/// Built once and shared by both connectors so they extract identical
/// positions and item names.
#[derive(Debug, Clone)]
pub struct ChangelogPatterns {
    bracketed_position: Regex,
    listing_entry: Regex,
    changelog_bullet: Regex,
    svn_revision: Regex,
    svn_changed_path: Regex,
}

impl Default for ChangelogPatterns {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangelogPatterns {
    pub fn new() -> Self {
        Self {
            bracketed_position: compile(r"\[(\d+)\]"),
            listing_entry: compile(r#">([^\s<>/"]+)/<"#),
            // Both change-list patterns share one token class so the two
            // backends truncate mixed-case names identically.
            changelog_bullet: compile(r"(?m)^[ \t]*\* ([^/A-Z\s]+)"),
            svn_revision: compile(r"(?m)^r(\d+) \|"),
            svn_changed_path: compile(r"(?m)^[ \t]+[ADMR] /([^/A-Z\s]+)"),
        }
    }

    /// First `[<digits>]` in a trac change log.
    pub fn first_bracketed_position(&self, body: &str) -> Option<u64> {
        first_number(&self.bracketed_position, body)
    }

    /// Directory entries (`>name/<`) of a repository HTML listing.
    pub fn listing_entries(&self, html: &str) -> Vec<CatalogItem> {
        collect_items(&self.listing_entry, html)
    }

    /// Top-level names from the bullets of a verbose trac change log.
    pub fn changelog_items(&self, body: &str) -> Vec<CatalogItem> {
        collect_items(&self.changelog_bullet, body)
    }

    /// First `r<digits> |` header of `svn log` output.
    pub fn svn_revision(&self, output: &str) -> Option<u64> {
        first_number(&self.svn_revision, output)
    }

    /// Top-level names from the changed paths of `svn log -v` output.
    pub fn svn_changed_items(&self, output: &str) -> Vec<CatalogItem> {
        collect_items(&self.svn_changed_path, output)
    }

    /// Directory entries of `svn list` output.
    pub fn svn_list_entries(&self, output: &str) -> Vec<CatalogItem> {
        dedup_items(
            output
                .lines()
                .filter_map(|line| line.trim().strip_suffix('/'))
                .filter(|name| !name.is_empty() && !name.contains('/'))
                .map(CatalogItem::new),
        )
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

fn first_number(regex: &Regex, text: &str) -> Option<u64> {
    regex
        .captures_iter(text)
        .find_map(|caps| caps.get(1)?.as_str().parse().ok())
}

fn collect_items(regex: &Regex, text: &str) -> Vec<CatalogItem> {
    dedup_items(
        regex
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| CatalogItem::new(m.as_str())),
    )
}
