use serde::{Deserialize, Serialize};
use wpds::{CatalogItem, CatalogKind, PositionRange};

/// URL templates for the directory hosts. `{kind}` is replaced with
/// `plugins` or `themes`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Endpoints {
    /// Subversion repository root, also served as an HTML listing.
    pub svn: String,
    /// Trac instance exposing the change log.
    pub trac: String,
    /// Host serving packaged archives.
    pub downloads: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            svn: "https://{kind}.svn.wordpress.org".into(),
            trac: "https://{kind}.trac.wordpress.org".into(),
            downloads: "https://downloads.wordpress.org".into(),
        }
    }
}

fn expand(template: &str, kind: CatalogKind) -> String {
    template
        .replace("{kind}", kind.as_str())
        .trim_end_matches('/')
        .to_owned()
}

impl Endpoints {
    /// Point every host at one base URL, e.g. a local mock server.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            svn: format!("{base}/{{kind}}/svn"),
            trac: format!("{base}/{{kind}}/trac"),
            downloads: format!("{base}/downloads"),
        }
    }

    pub fn svn_root(&self, kind: CatalogKind) -> String {
        expand(&self.svn, kind)
    }

    pub fn trac_root(&self, kind: CatalogKind) -> String {
        expand(&self.trac, kind)
    }

    /// Change log stopping at HEAD; its first bracketed number is the latest
    /// position.
    pub fn latest_position_url(&self, kind: CatalogKind) -> String {
        format!("{}/log/?format=changelog&stop_rev=HEAD", self.trac_root(kind))
    }

    /// Directory listing of the repository root.
    pub fn full_listing_url(&self, kind: CatalogKind) -> String {
        format!("{}/", self.svn_root(kind))
    }

    /// Verbose change log covering `range`, newest first.
    pub fn changelog_url(&self, kind: CatalogKind, range: PositionRange) -> String {
        format!(
            "{}/log/?verbose=on&mode=follow_copy&format=changelog&rev={}&limit={}",
            self.trac_root(kind),
            range.to,
            range.len(),
        )
    }

    pub fn archive_url(&self, kind: CatalogKind, item: &CatalogItem) -> String {
        format!(
            "{}/{}/{}.latest-stable.zip?nostats=1",
            expand(&self.downloads, kind),
            kind.singular(),
            item,
        )
    }

    pub fn readme_url(&self, kind: CatalogKind, item: &CatalogItem) -> String {
        format!("{}/{}/trunk/readme.txt", self.svn_root(kind), item)
    }
}
