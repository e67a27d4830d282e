//! Portal hosts and endpoint builders.
//!
//! All endpoints hang off three base URLs (identity provider, teaching portal,
//! e-learning host). Keeping them in one struct lets tests point the whole
//! crate at a single mock server.

use url::Url;

use crate::error::PortalError;

const IDP: &str = "https://idp.polito.it/";
const DIDATTICA: &str = "https://didattica.polito.it/";
const ELEARNING: &str = "https://elearning.polito.it/";

const PORTAL_PREFIX: &str = "pls/portal30/";
const LEGACY_VIDEO_PREFIX: &str = "gadgets/video/";

/// Path of the "your password is about to expire" interstitial.
pub const EXPIRING_PASSWORD_PATH: &str = "/Chpass/chpassservlet/main.htm";

/// Path of the identity provider page carrying the SAML relay form.
pub const SSO_FORM_PATH: &str = "/idp/profile/SAML2/Redirect/SSO";

/// Which half of the catalogue to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    /// Teaching material (`t=M`).
    Material,
    /// Video lessons (`t=E`).
    Videostores,
}

impl CatalogKind {
    fn code(self) -> &'static str {
        match self {
            Self::Material => "M",
            Self::Videostores => "E",
        }
    }
}

/// Base URLs of the portal hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalUrls {
    /// Identity provider.
    pub idp: Url,
    /// Teaching portal.
    pub didattica: Url,
    /// E-learning host serving legacy video lessons.
    pub elearning: Url,
}

impl Default for PortalUrls {
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        Self {
            idp: Url::parse(IDP).expect("static IdP URL is valid"),
            didattica: Url::parse(DIDATTICA).expect("static portal URL is valid"),
            elearning: Url::parse(ELEARNING).expect("static e-learning URL is valid"),
        }
    }
}

impl PortalUrls {
    /// Points every host at the same origin.
    #[must_use]
    pub fn single_origin(base: &Url) -> Self {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            idp: base.clone(),
            didattica: base.clone(),
            elearning: base,
        }
    }

    /// Identity provider login page the portal redirects to when unauthenticated.
    #[must_use]
    pub fn login_page(&self) -> Url {
        join(&self.idp, "idp/x509mixed-login")
    }

    /// Credential POST endpoint.
    #[must_use]
    pub fn login(&self) -> Url {
        join(&self.idp, "idp/Authn/X509Mixed/UserPasswordLogin")
    }

    /// Student home page, used to prime the session after signin.
    #[must_use]
    pub fn home(&self) -> Url {
        self.portal("sviluppo.pagina_studente_2016.main", &[])
    }

    /// Catalogue of materials or videostores for an academic year.
    #[must_use]
    pub fn catalog(&self, year: u16, kind: CatalogKind) -> Url {
        self.portal(
            "sviluppo.materiale.elenco",
            &[("a", &year.to_string()), ("t", kind.code())],
        )
    }

    /// Assignments of a material.
    #[must_use]
    pub fn assignments(&self, mat: &str, year: &str, typ: &str) -> Url {
        self.portal(
            "sviluppo.materiale.incarichi",
            &[("mat", mat), ("aa", year), ("typ", typ)],
        )
    }

    /// Content of a folder.
    #[must_use]
    pub fn next_level(&self, inc: &str, nod: &str, doc: &str) -> Url {
        self.portal(
            "sviluppo.materiale.next_level",
            &[("inc", inc), ("nod", nod), ("doc", doc)],
        )
    }

    /// Download link of a document.
    #[must_use]
    pub fn document(&self, nod: &str) -> Url {
        self.portal("sviluppo.materiale.download", &[("nod", nod)])
    }

    /// Index page of a current videostore.
    #[must_use]
    pub fn videostore(&self, cor: &str) -> Url {
        self.portal("sviluppo.videolezioni.vis", &[("cor", cor)])
    }

    /// JSON endpoint returning the parameters of a legacy videostore.
    #[must_use]
    pub fn legacy_params(&self, inc: &str) -> Url {
        self.portal("sviluppo.materiale.json_dokeos_par", &[("inc", inc)])
    }

    /// Index page of a legacy videostore.
    #[must_use]
    pub fn legacy_videostore(&self, inc: &str, utente: &str, data: &str, token: &str) -> Url {
        let mut url = join(&self.elearning, "gadgets/video/template_video.php");
        url.query_pairs_mut()
            .append_pair("inc", inc)
            .append_pair("utente", utente)
            .append_pair("data", data)
            .append_pair("token", token);
        url
    }

    /// Resolves an href found on a portal page (relative to `pls/portal30/`).
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidUrl`] when the href cannot be joined.
    pub fn portal_page(&self, href: &str) -> Result<Url, PortalError> {
        join_checked(&join(&self.didattica, PORTAL_PREFIX), href)
    }

    /// Resolves an href found on a legacy video page (relative to `gadgets/video/`).
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidUrl`] when the href cannot be joined.
    pub fn legacy_page(&self, href: &str) -> Result<Url, PortalError> {
        join_checked(&join(&self.elearning, LEGACY_VIDEO_PREFIX), href)
    }

    /// Resolves an href against the portal root.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::InvalidUrl`] when the href cannot be joined.
    pub fn didattica_link(&self, href: &str) -> Result<Url, PortalError> {
        join_checked(&self.didattica, href)
    }

    fn portal(&self, procedure: &str, params: &[(&str, &str)]) -> Url {
        let mut url = join(&self.didattica, &format!("{PORTAL_PREFIX}{procedure}"));
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        url
    }
}

/// Returns true when both URLs address the same resource, ignoring the query.
#[must_use]
pub fn same_endpoint(lhs: &Url, rhs: &Url) -> bool {
    lhs.scheme() == rhs.scheme()
        && lhs.host_str() == rhs.host_str()
        && lhs.port_or_known_default() == rhs.port_or_known_default()
        && lhs.path() == rhs.path()
}

// Joining a constant relative path onto a base that ends with '/' cannot fail;
// fall back to the base itself rather than panicking.
fn join(base: &Url, path: &str) -> Url {
    base.join(path).unwrap_or_else(|_| base.clone())
}

fn join_checked(base: &Url, href: &str) -> Result<Url, PortalError> {
    base.join(href.trim())
        .map_err(|_| PortalError::invalid_url(href.to_string()))
}
