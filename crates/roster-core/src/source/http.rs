use super::{ExternalRoleSource, ObservedMember};
use crate::error::{Result, RosterError};
use crate::ladder::RoleCorrection;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;

/// Role source behind a small JSON API:
///
/// - `GET  {base}/members` returns `[ObservedMember]`
/// - `GET  {base}/members/{id}` returns `ObservedMember` or 404
/// - `POST {base}/members/{id}/roles` with `{"remove": [..], "add": [..]}`
pub struct HttpRoleSource {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct CorrectionBody<'a> {
    remove: &'a BTreeSet<String>,
    add: &'a BTreeSet<String>,
}

fn external(e: impl std::fmt::Display) -> RosterError {
    RosterError::ExternalSource(e.to_string())
}

impl HttpRoleSource {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(external)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn send(&self, req: RequestBuilder) -> Result<Response> {
        self.authorize(req).send().map_err(external)
    }

    fn fail(response: Response) -> RosterError {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        RosterError::ExternalSource(format!("HTTP {}: {}", status.as_u16(), body.trim()))
    }

    fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
        if response.status().is_success() {
            response.json().map_err(external)
        } else {
            Err(Self::fail(response))
        }
    }
}

impl ExternalRoleSource for HttpRoleSource {
    fn list_members_with_roles(&self) -> Result<Vec<ObservedMember>> {
        let response = self.send(self.client.get(self.url("/members")))?;
        Self::json(response)
    }

    fn member_roles(&self, member_id: &str) -> Result<Option<ObservedMember>> {
        let response = self.send(self.client.get(self.url(&format!("/members/{member_id}"))))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::json(response).map(Some)
    }

    fn apply_role_correction(&self, member_id: &str, correction: &RoleCorrection) -> Result<()> {
        let body = CorrectionBody {
            remove: &correction.remove,
            add: &correction.add,
        };
        let response = self.send(
            self.client
                .post(self.url(&format!("/members/{member_id}/roles")))
                .json(&body),
        )?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::fail(response))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn source(server: &mockito::Server, token: Option<&str>) -> HttpRoleSource {
        HttpRoleSource::new(
            &format!("{}/", server.url()),
            token.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn lists_members() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/members")
            .match_header("authorization", "Bearer s3cret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id":"1","username":"alice","roles":["Airman"]},{"id":"2"}]"#)
            .create();

        let members = source(&server, Some("s3cret"))
            .list_members_with_roles()
            .unwrap();
        mock.assert();
        assert_eq!(members.len(), 2);
        assert!(members[0].roles.contains("Airman"));
        assert!(members[1].roles.is_empty());
    }

    #[test]
    fn point_lookup_maps_404_to_none() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/members/9").with_status(404).create();
        server
            .mock("GET", "/members/1")
            .with_status(200)
            .with_body(r#"{"id":"1","roles":["Captain"]}"#)
            .create();

        let src = source(&server, None);
        assert!(src.member_roles("9").unwrap().is_none());
        assert!(src.member_roles("1").unwrap().unwrap().roles.contains("Captain"));
    }

    #[test]
    fn posts_correction_body() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/members/7/roles")
            .match_body(Matcher::Json(serde_json::json!({
                "remove": ["Airman"],
                "add": ["Airman First Class"]
            })))
            .with_status(204)
            .create();

        let correction = RoleCorrection {
            remove: ["Airman".to_string()].into_iter().collect(),
            add: ["Airman First Class".to_string()].into_iter().collect(),
        };
        source(&server, None)
            .apply_role_correction("7", &correction)
            .unwrap();
        mock.assert();
    }

    #[test]
    fn server_errors_are_external() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/members/7/roles")
            .with_status(503)
            .with_body("rate limited")
            .create();
        let err = source(&server, None)
            .apply_role_correction("7", &RoleCorrection::default())
            .unwrap_err();
        assert!(err.is_external());
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn unreachable_server_is_external() {
        let src = HttpRoleSource::new("http://127.0.0.1:9", None, Duration::from_millis(200)).unwrap();
        assert!(src.list_members_with_roles().unwrap_err().is_external());
    }
}
