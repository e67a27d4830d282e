//! Videostores and their recorded lessons.
//!
//! Two page layouts exist: the current one served by the teaching portal and
//! the legacy one served by the e-learning host. Both list lessons on an index
//! page and describe each lesson (video link plus a table of details) on a
//! page of its own.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use futures_util::{StreamExt, TryStreamExt, stream};
use serde::Deserialize;
use tracing::{debug, error, instrument};
use url::Url;

use super::file::{FileKind, RemoteFile};
use super::paths::root_location;
use super::{Cached, insert_keyed};
use crate::error::PortalError;
use crate::html::{AttrFilter, Element, find_element, find_elements};
use crate::session::Portal;
use crate::urls::PortalUrls;

/// Lines of the `tmpTitle` script variable holding the details table.
const TMP_TITLE_LINES: usize = 7;

/// Parameters the portal hands out to open a legacy videostore.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LegacyParams {
    /// Signed user identifier.
    pub utente: String,
    /// Signature timestamp.
    pub data: String,
    /// Signature.
    pub token: String,
}

/// Where a videostore's lessons are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideostoreSource {
    /// Teaching portal, identified by the course code.
    Current {
        /// Course code.
        cor: String,
    },
    /// E-learning host.
    Legacy {
        /// Teaching assignment code.
        inc: String,
        /// Signed access parameters.
        params: LegacyParams,
    },
}

/// Details of a recorded lesson.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonInfo {
    /// Lesson title.
    pub name: String,
    /// Recording date.
    pub date: NaiveDate,
    /// Topics covered.
    pub arguments: Vec<String>,
    /// Details table of the lesson page, keyed by lowercased label.
    pub details: BTreeMap<String, String>,
}

/// A course's collection of recorded lessons.
#[derive(Debug, Clone)]
pub struct Videostore {
    year: u16,
    category: String,
    name: String,
    source: VideostoreSource,
    lessons: Cached<RemoteFile>,
}

impl Videostore {
    /// Creates a videostore published on the teaching portal.
    #[must_use]
    pub fn current(
        year: u16,
        category: impl Into<String>,
        name: impl Into<String>,
        cor: impl Into<String>,
    ) -> Self {
        Self::with_source(year, category, name, VideostoreSource::Current { cor: cor.into() })
    }

    /// Creates a videostore published on the e-learning host.
    #[must_use]
    pub fn legacy(
        year: u16,
        category: impl Into<String>,
        name: impl Into<String>,
        inc: impl Into<String>,
        params: LegacyParams,
    ) -> Self {
        Self::with_source(
            year,
            category,
            name,
            VideostoreSource::Legacy {
                inc: inc.into(),
                params,
            },
        )
    }

    fn with_source(
        year: u16,
        category: impl Into<String>,
        name: impl Into<String>,
        source: VideostoreSource,
    ) -> Self {
        Self {
            year,
            category: category.into(),
            name: name.into(),
            source,
            lessons: Cached::default(),
        }
    }

    /// Academic year.
    #[must_use]
    pub fn year(&self) -> u16 {
        self.year
    }

    /// Category heading the videostore is listed under.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Course name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the lessons are published.
    #[must_use]
    pub fn source(&self) -> &VideostoreSource {
        &self.source
    }

    /// Relative directory: `<year>/<name>`.
    #[must_use]
    pub fn location(&self) -> PathBuf {
        root_location(self.year, &self.name)
    }

    /// Lists the recorded lessons, fetching them on first use or when
    /// `force_update` is set. Lesson pages are fetched concurrently; the
    /// result keeps the index order.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::Parse`] when an index or lesson page lacks the
    /// expected structure, or any request error of the portal session.
    #[instrument(skip(self, portal), fields(videostore = %self.name))]
    pub async fn videolessons(
        &self,
        portal: &Portal,
        force_update: bool,
    ) -> Result<Vec<RemoteFile>, PortalError> {
        self.lessons
            .get_or_fetch(force_update, move || self.fetch_videolessons(portal))
            .await
    }

    async fn fetch_videolessons(&self, portal: &Portal) -> Result<Vec<RemoteFile>, PortalError> {
        let urls = portal.urls();
        let (layout, index_url) = match &self.source {
            VideostoreSource::Current { cor } => (Layout::Current, urls.videostore(cor)),
            VideostoreSource::Legacy { inc, params } => (
                Layout::Legacy,
                urls.legacy_videostore(inc, &params.utente, &params.data, &params.token),
            ),
        };

        let index = portal.get_page(index_url).await?;
        let entries = parse_lesson_index(&index.body, &index.url, layout, urls)?;
        debug!(count = entries.len(), "lessons listed");

        let location = self.location();
        let files: Vec<RemoteFile> = stream::iter(
            entries
                .into_iter()
                .map(|entry| fetch_lesson(portal, layout, entry, &location)),
        )
        .buffered(portal.lesson_fetch_concurrency())
        .try_collect()
        .await?;

        let mut lessons = Vec::with_capacity(files.len());
        for file in files {
            insert_keyed(&mut lessons, file, lesson_name);
        }
        Ok(lessons)
    }
}

fn lesson_name(file: &RemoteFile) -> &str {
    match file.kind() {
        FileKind::Lesson(info) => &info.name,
        FileKind::Document { .. } => file.name(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Current,
    Legacy,
}

impl Layout {
    fn date_format(self) -> &'static str {
        match self {
            Self::Current => "%d/%m/%Y",
            Self::Legacy => "%Y-%m-%d",
        }
    }

    fn arguments_class(self) -> &'static str {
        match self {
            Self::Current => "argomentiEspansi",
            Self::Legacy => "argEspansi1",
        }
    }

    fn join(self, urls: &PortalUrls, href: &str) -> Result<Url, PortalError> {
        match self {
            Self::Current => urls.portal_page(href),
            Self::Legacy => urls.legacy_page(href),
        }
    }

    fn join_video(self, urls: &PortalUrls, href: &str) -> Result<Url, PortalError> {
        match self {
            Self::Current => urls.didattica_link(href),
            Self::Legacy => urls.legacy_page(href),
        }
    }
}

/// A lesson as listed on the index page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LessonEntry {
    name: String,
    date: NaiveDate,
    arguments: Vec<String>,
    page: Url,
}

fn parse_lesson_index(
    html: &str,
    page_url: &Url,
    layout: Layout,
    urls: &PortalUrls,
) -> Result<Vec<LessonEntry>, PortalError> {
    let (lessons, scope) = match layout {
        Layout::Current => (
            find_elements(html, "a", AttrFilter::Equals("style", "color:#003576;")),
            html.to_string(),
        ),
        Layout::Legacy => {
            let summary = find_element(html, "ul", AttrFilter::HasClass("lezioni"))
                .ok_or_else(|| PortalError::parse(page_url.as_str(), "no lesson list"))?;
            let lessons: Vec<Element> = find_elements(&summary.inner_html, "a", AttrFilter::Any)
                .into_iter()
                .filter(|link| !link.has_class("argoLink"))
                .collect();
            (lessons, summary.inner_html)
        }
    };
    let dates = find_elements(&scope, "span", AttrFilter::HasClass("small"));
    let arguments = find_elements(&scope, "li", AttrFilter::HasClass(layout.arguments_class()));

    lessons
        .iter()
        .zip(&dates)
        .zip(&arguments)
        .map(|((lesson, date), arguments)| {
            let href = lesson
                .attr("href")
                .ok_or_else(|| PortalError::parse(page_url.as_str(), "lesson link without href"))?;
            Ok(LessonEntry {
                name: lesson.text().trim().to_string(),
                date: parse_lesson_date(&date.text(), layout, page_url)?,
                arguments: find_elements(&arguments.inner_html, "a", AttrFilter::HasClass("argoLink"))
                    .iter()
                    .map(|argument| argument.text().trim().to_string())
                    .collect(),
                page: layout.join(urls, href)?,
            })
        })
        .collect()
}

/// Parses `"del <date>"`.
fn parse_lesson_date(text: &str, layout: Layout, page_url: &Url) -> Result<NaiveDate, PortalError> {
    let text = text.trim();
    let raw = text.strip_prefix("del").unwrap_or(text).trim();
    NaiveDate::parse_from_str(raw, layout.date_format()).map_err(|_| {
        PortalError::parse(page_url.as_str(), format!("invalid lesson date '{raw}'"))
    })
}

async fn fetch_lesson(
    portal: &Portal,
    layout: Layout,
    entry: LessonEntry,
    location: &Path,
) -> Result<RemoteFile, PortalError> {
    let page = portal.get_page(entry.page.clone()).await?;
    parse_lesson_page(&page.body, &page.url, layout, portal.urls(), entry, location)
}

fn parse_lesson_page(
    html: &str,
    page_url: &Url,
    layout: Layout,
    urls: &PortalUrls,
    entry: LessonEntry,
    location: &Path,
) -> Result<RemoteFile, PortalError> {
    let video = find_elements(html, "a", AttrFilter::Any)
        .into_iter()
        .find(|link| link.text().trim() == "Video")
        .and_then(|link| link.attr("href").map(str::to_string))
        .ok_or_else(|| PortalError::parse(page_url.as_str(), "no Video link"))?;
    let link = layout.join_video(urls, &video)?;

    let (details, filename) = match layout {
        Layout::Current => {
            let Some(markup) = find_elements(html, "script", AttrFilter::Any)
                .iter()
                .find_map(|script| tmp_title_markup(&script.inner_html))
            else {
                error!(url = %page_url, "no videolesson info found");
                return Err(PortalError::parse(page_url.as_str(), "no videolesson info"));
            };
            let details = detail_rows(&markup);
            let filename = details.get("file").cloned();
            (details, filename)
        }
        Layout::Legacy => match find_element(html, "div", AttrFilter::Equals("id", "tooltip1")) {
            Some(tooltip) => {
                let filename = find_element(&tooltip.inner_html, "td", AttrFilter::HasClass("value"))
                    .map(|cell| cell.text());
                (detail_rows(&tooltip.inner_html), filename)
            }
            None => (BTreeMap::new(), None),
        },
    };

    let filename = filename
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| entry.name.clone());

    Ok(RemoteFile::new(
        filename,
        link,
        location.to_path_buf(),
        FileKind::Lesson(LessonInfo {
            name: entry.name,
            date: entry.date,
            arguments: entry.arguments,
            details,
        }),
    ))
}

/// Rebuilds the HTML held by the multi-line `tmpTitle` string variable.
fn tmp_title_markup(script: &str) -> Option<String> {
    let lines: Vec<&str> = script.lines().collect();
    let start = lines.iter().position(|line| line.contains("tmpTitle = "))?;
    let markup: String = lines[start..]
        .iter()
        .take(TMP_TITLE_LINES)
        .filter_map(|line| js_string_content(line))
        .collect();
    Some(markup.replace("\\'", "'").replace("\\\"", "\""))
}

/// Content between the first quote of a line and the last quote of the same kind.
fn js_string_content(line: &str) -> Option<&str> {
    let start = line.find(['\'', '"'])?;
    let quote = line[start..].chars().next()?;
    let end = line.rfind(quote)?;
    (end > start).then(|| &line[start + 1..end])
}

/// Two-cell table rows as `label -> value`.
fn detail_rows(html: &str) -> BTreeMap<String, String> {
    find_elements(html, "tr", AttrFilter::Any)
        .iter()
        .filter_map(|row| {
            let cells: Vec<Element> = find_elements(&row.inner_html, "td", AttrFilter::Any);
            match cells.as_slice() {
                [label, value] => Some((
                    label.text().trim().to_lowercase(),
                    value.text().trim().to_string(),
                )),
                _ => None,
            }
        })
        .collect()
}
