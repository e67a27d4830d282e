//! The yearly catalogue of materials and videostores.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{error, info, instrument};

use super::insert_keyed;
use super::material::Material;
use super::videostore::{LegacyParams, Videostore};
use crate::error::PortalError;
use crate::html::{AttrFilter, compile_static_regex, find_elements};
use crate::session::{Page, Portal};
use crate::urls::CatalogKind;

/// Whole body the portal sends when a year is not accessible.
const ACCESS_DENIED_BODY: &str = "Access denied!\n";

static MATERIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"'(\d+)','(\w+)','\d+','(\d+)'"));

static CATEGORY_ONCLICK_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"showDivVideoteca\('\w+'\)"));

static CURRENT_VIDEOSTORE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^sviluppo\.videolezioni\.vis\?cor=(\d+)"));

static LEGACY_VIDEOSTORE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^javascript:void\(null\);"));

static LEGACY_ONCLICK_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^dokeosLez\('(\d+)'\)"));

/// Videostores listed under one catalogue heading.
#[derive(Debug, Clone)]
pub struct VideostoreCategory {
    /// Heading text.
    pub name: String,
    /// Videostores in page order.
    pub videostores: Vec<Videostore>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum VideostoreLink {
    Current { name: String, cor: String },
    Legacy { name: String, inc: String },
}

impl Portal {
    /// Lists the teaching material available for an academic year.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::AccessDenied`] when the year is not accessible,
    /// [`PortalError::HttpStatus`] on a non-success answer, or any request error.
    #[instrument(skip(self))]
    pub async fn materials(&self, year: u16) -> Result<Vec<Material>, PortalError> {
        let page = self.catalog_page(year, CatalogKind::Material).await?;
        let materials = parse_materials(&page.body, year);
        info!(count = materials.len(), "materials listed");
        Ok(materials)
    }

    /// Lists the videostores available for an academic year, grouped by
    /// catalogue heading.
    ///
    /// Legacy videostores need their access parameters, fetched one per
    /// videostore while listing.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::AccessDenied`] when the year is not accessible,
    /// [`PortalError::HttpStatus`] on a non-success answer,
    /// [`PortalError::Json`] on malformed legacy parameters, or any request error.
    #[instrument(skip(self))]
    pub async fn videostores(&self, year: u16) -> Result<Vec<VideostoreCategory>, PortalError> {
        let page = self.catalog_page(year, CatalogKind::Videostores).await?;

        let mut categories = Vec::new();
        for (category, links) in parse_videostore_groups(&page.body) {
            let mut videostores = Vec::new();
            for link in links {
                let videostore = match link {
                    VideostoreLink::Current { name, cor } => {
                        Videostore::current(year, &category, name, cor)
                    }
                    VideostoreLink::Legacy { name, inc } => {
                        let params: LegacyParams =
                            self.get_json(self.urls().legacy_params(&inc)).await?;
                        Videostore::legacy(year, &category, name, inc, params)
                    }
                };
                insert_keyed(&mut videostores, videostore, Videostore::name);
            }
            insert_keyed(
                &mut categories,
                VideostoreCategory {
                    name: category,
                    videostores,
                },
                |category| category.name.as_str(),
            );
        }

        info!(categories = categories.len(), "videostores listed");
        Ok(categories)
    }

    async fn catalog_page(&self, year: u16, kind: CatalogKind) -> Result<Page, PortalError> {
        let page = self.get_page(self.urls().catalog(year, kind)).await?;
        if page.body == ACCESS_DENIED_BODY {
            error!(url = %page.url, "access denied");
            return Err(PortalError::AccessDenied {
                url: page.url.to_string(),
            });
        }
        Ok(page)
    }
}

fn parse_materials(html: &str, year: u16) -> Vec<Material> {
    let mut materials = Vec::new();
    for link in find_elements(html, "a", AttrFilter::HasClass("policorpolink")) {
        let Some(caps) = link.attr("href").and_then(|href| MATERIAL_RE.captures(href)) else {
            continue;
        };
        let material_year = caps[1].parse().unwrap_or(year);
        let material = Material::new(material_year, link.text().trim(), &caps[2], &caps[3]);
        insert_keyed(&mut materials, material, Material::name);
    }
    materials
}

fn parse_videostore_groups(html: &str) -> Vec<(String, Vec<VideostoreLink>)> {
    let headers = find_elements(html, "a", AttrFilter::Matches("onclick", &CATEGORY_ONCLICK_RE));
    let groups = find_elements(html, "div", AttrFilter::HasClass("policorpo"));

    headers
        .iter()
        .zip(&groups)
        .map(|(header, group)| {
            let category = header.text().trim().to_string();
            let links = find_elements(&group.inner_html, "a", AttrFilter::HasClass("policorpolink"))
                .iter()
                .filter_map(|link| {
                    let name = link.text().trim().to_string();
                    let href = link.attr("href").unwrap_or_default();
                    if let Some(caps) = CURRENT_VIDEOSTORE_RE.captures(href) {
                        return Some(VideostoreLink::Current {
                            name,
                            cor: caps[1].to_string(),
                        });
                    }
                    if LEGACY_VIDEOSTORE_RE.is_match(href)
                        && let Some(caps) = link
                            .attr("onclick")
                            .and_then(|onclick| LEGACY_ONCLICK_RE.captures(onclick))
                    {
                        return Some(VideostoreLink::Legacy {
                            name,
                            inc: caps[1].to_string(),
                        });
                    }
                    info!(
                        category = %category,
                        videostore = %name,
                        "skipping videostore, not supported yet"
                    );
                    None
                })
                .collect();
            (category, links)
        })
        .collect()
}
