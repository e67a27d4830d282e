//! Teaching material and its folder tree.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use regex::Regex;
use tracing::{debug, instrument};

use super::file::{FileKind, RemoteFile};
use super::paths::{child_location, root_location};
use super::{Cached, insert_keyed};
use crate::error::PortalError;
use crate::html::{AttrFilter, compile_static_regex, decode_entities, find_elements, strip_tags};
use crate::session::Portal;
use crate::urls::PortalUrls;

static FOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"'(\d+)','(\d+)','(\d+)'"));

static FILE_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(\d+)$"));

static FILE_INFO_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(\w*) *\[([\w ]+)\]"));

/// A course's teaching material for an academic year.
#[derive(Debug, Clone)]
pub struct Material {
    year: u16,
    name: String,
    typ: String,
    mat: String,
    assignments: Cached<Assignment>,
}

impl Material {
    /// Creates a material from the identifiers found in the catalogue.
    #[must_use]
    pub fn new(
        year: u16,
        name: impl Into<String>,
        typ: impl Into<String>,
        mat: impl Into<String>,
    ) -> Self {
        Self {
            year,
            name: name.into(),
            typ: typ.into(),
            mat: mat.into(),
            assignments: Cached::default(),
        }
    }

    /// Academic year.
    #[must_use]
    pub fn year(&self) -> u16 {
        self.year
    }

    /// Course name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Relative directory: `<year>/<name>`.
    #[must_use]
    pub fn location(&self) -> PathBuf {
        root_location(self.year, &self.name)
    }

    /// Lists the teaching assignments, fetching them on first use or when
    /// `force_update` is set.
    ///
    /// # Errors
    ///
    /// Returns any request error of the portal session.
    #[instrument(skip(self, portal), fields(material = %self.name))]
    pub async fn assignments(
        &self,
        portal: &Portal,
        force_update: bool,
    ) -> Result<Vec<Assignment>, PortalError> {
        self.assignments
            .get_or_fetch(force_update, move || async move {
                let url = portal
                    .urls()
                    .assignments(&self.mat, &self.year.to_string(), &self.typ);
                let page = portal.get_page(url).await?;
                let assignments = parse_assignments(&page.body, &self.location());
                debug!(count = assignments.len(), "assignments listed");
                Ok(assignments)
            })
            .await
    }
}

/// A folder of a material tree.
#[derive(Debug, Clone)]
pub struct Folder {
    name: String,
    location: PathBuf,
    inc: String,
    nod: String,
    doc: String,
    children: Cached<Child>,
}

/// A teaching assignment: the root folder of a material's document tree.
pub type Assignment = Folder;

/// An entry of a folder.
#[derive(Debug, Clone)]
pub enum Child {
    /// A subfolder.
    Folder(Folder),
    /// A document.
    File(RemoteFile),
}

impl Child {
    /// Name shown by the portal.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Folder(folder) => folder.name(),
            Self::File(file) => file.name(),
        }
    }
}

impl Folder {
    /// Creates a folder under `parent_location`.
    #[must_use]
    pub fn new(
        parent_location: &Path,
        name: impl Into<String>,
        inc: impl Into<String>,
        nod: impl Into<String>,
        doc: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            location: child_location(parent_location, &name),
            name,
            inc: inc.into(),
            nod: nod.into(),
            doc: doc.into(),
            children: Cached::default(),
        }
    }

    /// Folder name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Relative directory of the folder.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Lists subfolders and documents, fetching them on first use or when
    /// `force_update` is set.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::HttpStatus`] on a non-success answer or any
    /// request error of the portal session.
    #[instrument(skip(self, portal), fields(folder = %self.name))]
    pub async fn children(
        &self,
        portal: &Portal,
        force_update: bool,
    ) -> Result<Vec<Child>, PortalError> {
        self.children
            .get_or_fetch(force_update, move || async move {
                let url = portal.urls().next_level(&self.inc, &self.nod, &self.doc);
                let page = portal.get_page(url).await?;
                Ok(parse_children(&page.body, &self.location, portal.urls()))
            })
            .await
    }

    /// Lists the folder's documents; with `recursive`, followed by the
    /// documents of every subfolder, depth first.
    ///
    /// # Errors
    ///
    /// Returns the first error of [`Folder::children`] along the walk.
    pub fn files<'a>(
        &'a self,
        portal: &'a Portal,
        recursive: bool,
        force_update: bool,
    ) -> BoxFuture<'a, Result<Vec<RemoteFile>, PortalError>> {
        async move {
            let children = self.children(portal, force_update).await?;
            let mut files: Vec<RemoteFile> = children
                .iter()
                .filter_map(|child| match child {
                    Child::File(file) => Some(file.clone()),
                    Child::Folder(_) => None,
                })
                .collect();

            if recursive {
                for child in &children {
                    if let Child::Folder(folder) = child {
                        files.extend(folder.files(portal, true, force_update).await?);
                    }
                }
            }
            Ok(files)
        }
        .boxed()
    }
}

fn parse_assignments(html: &str, material_location: &Path) -> Vec<Assignment> {
    let mut assignments = Vec::new();
    for link in find_elements(html, "a", AttrFilter::HasClass("policorpo")) {
        let Some(caps) = link.attr("href").and_then(|href| FOLDER_RE.captures(href)) else {
            continue;
        };
        let assignment = Folder::new(
            material_location,
            link.text().trim(),
            &caps[1],
            &caps[2],
            &caps[3],
        );
        insert_keyed(&mut assignments, assignment, Folder::name);
    }
    assignments
}

fn parse_children(html: &str, location: &Path, urls: &PortalUrls) -> Vec<Child> {
    let mut children = Vec::new();
    for link in find_elements(html, "a", AttrFilter::Any) {
        let Some(href) = link.attr("href") else {
            continue;
        };
        let name = link.text().trim().to_string();

        let child = if let Some(caps) = FOLDER_RE.captures(href) {
            Child::Folder(Folder::new(location, name, &caps[1], &caps[2], &caps[3]))
        } else if let Some(caps) = FILE_RE.captures(href) {
            let (extension, size) = file_info(&html[link.end..]);
            Child::File(RemoteFile::new(
                name,
                urls.document(&caps[1]),
                location.to_path_buf(),
                FileKind::Document { extension, size },
            ))
        } else {
            continue;
        };
        insert_keyed(&mut children, child, Child::name);
    }
    children
}

/// Reads `type [size]` from the text following a document link.
fn file_info(after_link: &str) -> (Option<String>, Option<String>) {
    let text = after_link
        .find("<a")
        .map_or(after_link, |stop| &after_link[..stop]);
    let text = decode_entities(&strip_tags(text));
    match FILE_INFO_RE.captures(&text) {
        Some(caps) => {
            let extension = Some(caps[1].to_string()).filter(|ext| !ext.is_empty());
            (extension, Some(caps[2].to_string()))
        }
        None => (None, None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const NEXT_LEVEL: &str = r##"
        <table>
        <tr><td><img src="folder.gif"><a href="javascript:apri('11','22','33')">Esercitazioni</a></td></tr>
        <tr><td><img src="pdf.gif"><a href="sviluppo.materiale.download?nod=444">Lezione 1</a>
            <span class="small">pdf [1 MB]</span></td></tr>
        <tr><td><a href="sviluppo.materiale.download?nod=555">Lezione 2</a> &nbsp; [20 KB]</td></tr>
        <tr><td><a href="#top">Torna su</a></td></tr>
        <tr><td><a name="anchor">no href</a></td></tr>
        </table>"##;

    #[test]
    fn test_parse_children_folders_and_files() {
        let location = PathBuf::from("2023/Fisica I/Teoria");
        let children = parse_children(NEXT_LEVEL, &location, &PortalUrls::default());
        let names: Vec<&str> = children.iter().map(Child::name).collect();
        assert_eq!(names, ["Esercitazioni", "Lezione 1", "Lezione 2"]);

        let Child::Folder(folder) = &children[0] else {
            panic!("expected a folder");
        };
        assert_eq!(folder.location(), location.join("Esercitazioni"));
        assert_eq!(
            (folder.inc.as_str(), folder.nod.as_str(), folder.doc.as_str()),
            ("11", "22", "33")
        );

        let Child::File(file) = &children[1] else {
            panic!("expected a file");
        };
        assert_eq!(file.link().query(), Some("nod=444"));
        assert_eq!(file.location(), location);
        assert_eq!(
            file.kind(),
            &FileKind::Document {
                extension: Some("pdf".to_string()),
                size: Some("1 MB".to_string()),
            }
        );
    }

    #[test]
    fn test_file_info_without_extension() {
        assert_eq!(file_info(" [20 KB]"), (None, Some("20 KB".to_string())));
    }

    #[test]
    fn test_file_info_stops_at_next_link() {
        assert_eq!(file_info(" plain <a href='1'>x</a> pdf [1 MB]"), (None, None));
    }

    #[test]
    fn test_parse_assignments_only_policorpo_links() {
        let html = r#"
            <a class="policorpo" href="javascript:inc('1','2','3')">Teoria</a>
            <a class="policorpolink" href="javascript:inc('4','5','6')">Other</a>
            <a class="policorpo" href="javascript:inc('7','8','9')">Laboratorio</a>
            <a class="policorpo" href="javascript:void(0)">Broken</a>"#;
        let location = PathBuf::from("2023/Fisica I");
        let assignments = parse_assignments(html, &location);
        let names: Vec<&str> = assignments.iter().map(Folder::name).collect();
        assert_eq!(names, ["Teoria", "Laboratorio"]);
        assert_eq!(assignments[1].location(), location.join("Laboratorio"));
    }

    #[test]
    fn test_duplicate_names_keep_the_last_entry() {
        let html = r#"
            <a href="sviluppo.materiale.download?nod=1">Slides</a>
            <a href="sviluppo.materiale.download?nod=2">Slides</a>"#;
        let children = parse_children(html, Path::new("x"), &PortalUrls::default());
        assert_eq!(children.len(), 1);
        let Child::File(file) = &children[0] else {
            panic!("expected a file");
        };
        assert_eq!(file.link().query(), Some("nod=2"));
    }

    #[test]
    fn test_material_location() {
        let material = Material::new(2023, "Analisi matematica I", "M", "123");
        assert_eq!(material.location(), PathBuf::from("2023/Analisi matematica I"));
    }
}
