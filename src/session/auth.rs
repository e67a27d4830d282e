//! Login handshake classification.
//!
//! The portal authenticates through a Shibboleth identity provider. After a
//! request has followed its redirects, the final response tells us which step
//! of the handshake we are in; each step maps to the next request to send.

use reqwest::StatusCode;
use url::Url;

use crate::error::PortalError;
use crate::html::{AttrFilter, find_element, find_elements};
use crate::urls::{EXPIRING_PASSWORD_PATH, PortalUrls, SSO_FORM_PATH, same_endpoint};

/// Next action required after a response has been received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// The response is the requested resource.
    Done,
    /// The portal is throttling; wait and resend the same request.
    Throttled,
    /// The identity provider wants credentials.
    Login,
    /// The identity provider warns that the password is expiring.
    ExpiringPassword,
    /// The identity provider returned the SAML relay form.
    SsoForm,
    /// The credential POST came back to the login endpoint: rejected.
    LoginRejected,
}

/// Classifies a final (post-redirect) response.
pub(crate) fn classify(urls: &PortalUrls, url: &Url, status: StatusCode) -> Step {
    if status == StatusCode::BAD_GATEWAY {
        return Step::Throttled;
    }
    if same_endpoint(url, &urls.login_page()) {
        return Step::Login;
    }
    if url.path() == EXPIRING_PASSWORD_PATH {
        return Step::ExpiringPassword;
    }
    if status.is_success() && url.path() == SSO_FORM_PATH {
        return Step::SsoForm;
    }
    if !status.is_redirection() && same_endpoint(url, &urls.login()) {
        return Step::LoginRejected;
    }
    Step::Done
}

/// Form fields of the credential POST.
pub(crate) fn login_form(username: &str, password: &str) -> Vec<(String, String)> {
    vec![
        ("j_username".to_string(), username.to_string()),
        ("j_password".to_string(), password.to_string()),
    ]
}

/// Form fields of the credential POST that acknowledges the expiring-password notice.
pub(crate) fn expiring_password_form(username: &str, password: &str) -> Vec<(String, String)> {
    let mut form = login_form(username, password);
    form.extend([
        ("p_username".to_string(), username.to_string()),
        ("p_locale".to_string(), "it".to_string()),
        ("j_bypassScad".to_string(), "S".to_string()),
    ]);
    form
}

/// Extracts the action and named inputs of the first form on the SSO page.
pub(crate) fn parse_sso_form(
    html: &str,
    page_url: &Url,
) -> Result<(Url, Vec<(String, String)>), PortalError> {
    let form = find_element(html, "form", AttrFilter::Any)
        .ok_or_else(|| PortalError::parse(page_url.as_str(), "SSO page has no form"))?;
    let action = form
        .attr("action")
        .ok_or_else(|| PortalError::parse(page_url.as_str(), "SSO form has no action"))?;
    let action = page_url
        .join(action)
        .map_err(|_| PortalError::invalid_url(action))?;

    let fields = find_elements(&form.inner_html, "input", AttrFilter::Any)
        .into_iter()
        .filter_map(|input| {
            let name = input.attr("name")?.to_string();
            let value = input.attr("value").unwrap_or_default().to_string();
            Some((name, value))
        })
        .collect();

    Ok((action, fields))
}

/// Extracts the message shown by the identity provider after a failed login.
pub(crate) fn parse_login_error(html: &str) -> String {
    find_element(html, "span", AttrFilter::Equals("id", "loginerror"))
        .map(|span| span.text().trim().to_string())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| "credentials rejected by the identity provider".to_string())
}
