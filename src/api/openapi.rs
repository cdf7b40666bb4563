use super::handlers::{admin, authenticate, enroll, health, me, roles, secrets, users};
use utoipa::openapi::{
    Contact, InfoBuilder, License, OpenApiBuilder, Tag,
    security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_axum::{router::OpenApiRouter, routes};

pub(crate) const BEARER: &str = "bearer";

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, mut openapi) = public_router().split_for_parts();
    let (_router, protected) = protected_router().split_for_parts();
    openapi.merge(protected);

    let mut components = openapi.components.take().unwrap_or_default();
    components.add_security_scheme(
        BEARER,
        SecurityScheme::Http(
            HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("JWT")
                .build(),
        ),
    );
    openapi.components = Some(components);

    openapi.tags = Some(vec![
        tag("health", "Liveness and build information"),
        tag("bootstrap", "One-time initialization"),
        tag("auth", "Login, refresh and logout"),
        tag("users", "Users and roles"),
        tag("secrets", "Signing secret lifecycle"),
    ]);

    openapi
}

/// Routes reachable without a token. The init guard still applies.
pub(crate) fn public_router() -> OpenApiRouter {
    OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(enroll::init))
        .routes(routes!(enroll::enroll))
        .routes(routes!(authenticate::authenticate))
        .routes(routes!(authenticate::refresh))
        .routes(routes!(authenticate::logout))
}

/// Routes that need a verified access token.
pub(crate) fn protected_router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(me::me))
        .routes(routes!(admin::admin))
        .routes(routes!(users::list_users, users::add_user))
        .routes(routes!(users::get_user))
        .routes(routes!(roles::list_roles, roles::add_role))
        .routes(routes!(secrets::list_secrets))
        .routes(routes!(secrets::get_secret))
        .routes(routes!(secrets::rotate_secret))
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, email)) => (
            non_empty(name.trim()),
            non_empty(email.trim_end_matches('>').trim()),
        ),
        None => (non_empty(author.trim()), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));

        let contact = doc.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team Gatehouse"));
            assert_eq!(contact.email.as_deref(), Some("team@gatehouse.dev"));
        }

        let license = doc.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.identifier.as_deref(), Some("BSD-3-Clause"));
        }
    }

    #[test]
    fn openapi_documents_public_and_protected_paths() {
        let doc = openapi();
        for path in [
            "/health",
            "/init",
            "/enroll",
            "/authenticate",
            "/refresh",
            "/logout",
            "/me",
            "/admin",
            "/users",
            "/users/{username}",
            "/roles",
            "/secrets",
            "/secrets/{name}",
            "/secrets/{name}/rotate",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }

        let schemes = doc
            .components
            .as_ref()
            .map(|c| c.security_schemes.clone())
            .unwrap_or_default();
        assert!(schemes.contains_key(BEARER));
    }

    #[test]
    fn parse_author_variants() {
        assert_eq!(
            parse_author("Jane <jane@example.com>"),
            (Some("Jane"), Some("jane@example.com"))
        );
        assert_eq!(parse_author("Jane"), (Some("Jane"), None));
        assert_eq!(parse_author("<jane@example.com>"), (None, Some("jane@example.com")));
    }
}
