//! Shared helpers for integration tests against a mock portal.

#![allow(dead_code)]

use std::time::Duration;

use politodown::{Credentials, Portal, PortalOptions, PortalUrls};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const HOME_PATH: &str = "/pls/portal30/sviluppo.pagina_studente_2016.main";
pub const LOGIN_PAGE_PATH: &str = "/idp/x509mixed-login";
pub const LOGIN_PATH: &str = "/idp/Authn/X509Mixed/UserPasswordLogin";
pub const SSO_PATH: &str = "/idp/profile/SAML2/Redirect/SSO";
pub const EXPIRING_PASSWORD_PATH: &str = "/Chpass/chpassservlet/main.htm";
pub const CATALOG_PATH: &str = "/pls/portal30/sviluppo.materiale.elenco";
pub const ASSIGNMENTS_PATH: &str = "/pls/portal30/sviluppo.materiale.incarichi";
pub const NEXT_LEVEL_PATH: &str = "/pls/portal30/sviluppo.materiale.next_level";
pub const DOCUMENT_PATH: &str = "/pls/portal30/sviluppo.materiale.download";
pub const VIDEOSTORE_PATH: &str = "/pls/portal30/sviluppo.videolezioni.vis";
pub const LEGACY_PARAMS_PATH: &str = "/pls/portal30/sviluppo.materiale.json_dokeos_par";
pub const LEGACY_VIDEOSTORE_PATH: &str = "/gadgets/video/template_video.php";

/// Portal options pointing every host at the mock server, with short delays.
pub fn options(server: &MockServer) -> PortalOptions {
    let base = Url::parse(&server.uri()).expect("mock server URI is a valid URL");
    PortalOptions {
        urls: PortalUrls::single_origin(&base),
        throttle_delay: Duration::from_millis(10),
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(5),
        ..PortalOptions::default()
    }
}

/// Answers the home page directly, as for a session whose cookies are valid.
pub async fn mount_home(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(HOME_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>home</html>"))
        .mount(server)
        .await;
}

/// A portal signed in against a server that never asks for a login.
pub async fn signed_in_portal(server: &MockServer) -> Portal {
    mount_home(server).await;
    let portal = Portal::new(options(server)).expect("portal should build");
    portal
        .signin(Credentials::new("s123456", "secret"), None)
        .await
        .expect("signin should succeed");
    portal
}

/// Redirect to `path` on the mock server.
pub fn redirect_to(server: &MockServer, path: &str) -> ResponseTemplate {
    ResponseTemplate::new(302).insert_header("Location", format!("{}{path}", server.uri()))
}

/// HTML response with the portal's content type.
pub fn html(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into(), "text/html; charset=utf-8")
}
