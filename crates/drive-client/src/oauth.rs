use reqwest::Client;
use serde::Deserialize;
use std::path::Path;

use crate::errors::DriveError;

pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Offline credential produced out-of-band by a consent flow
/// (the `authorized_user` JSON layout written by Google tooling).
#[derive(Debug, Deserialize, Clone)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub async fn load_authorized_user(path: &Path) -> Result<AuthorizedUser, DriveError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| DriveError::Credentials {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    parse_authorized_user(path, &content)
}

fn parse_authorized_user(path: &Path, content: &str) -> Result<AuthorizedUser, DriveError> {
    let user: AuthorizedUser =
        serde_json::from_str(content).map_err(|err| DriveError::Credentials {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

    if let Some(kind) = user.kind.as_deref() {
        if kind != "authorized_user" {
            return Err(DriveError::Credentials {
                path: path.to_path_buf(),
                message: format!("unsupported credential type '{kind}'"),
            });
        }
    }
    if user.refresh_token.trim().is_empty() {
        return Err(DriveError::Credentials {
            path: path.to_path_buf(),
            message: "refresh_token is empty".to_string(),
        });
    }

    Ok(user)
}

pub async fn refresh_access_token(
    client: &Client,
    token_url: &str,
    user: &AuthorizedUser,
) -> Result<TokenResponse, DriveError> {
    let token_url = user.token_uri.as_deref().unwrap_or(token_url);
    let params = [
        ("client_id", user.client_id.as_str()),
        ("client_secret", user.client_secret.as_str()),
        ("grant_type", "refresh_token"),
        ("refresh_token", user.refresh_token.as_str()),
    ];

    let response = client.post(token_url).form(&params).send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = match serde_json::from_str::<TokenErrorBody>(&body) {
            Ok(err) => match err.error_description {
                Some(description) => format!("{} ({description})", err.error),
                None => err.error,
            },
            Err(_) => format!("HTTP {}: {}", status.as_u16(), body),
        };
        return Err(DriveError::Auth(message));
    }

    serde_json::from_str::<TokenResponse>(&body).map_err(|source| DriveError::Parse { source, body })
}

#[cfg(test)]
mod tests {
    use super::parse_authorized_user;
    use std::path::Path;

    #[test]
    fn parses_authorized_user_file() {
        let body = r#"{
            "type": "authorized_user",
            "client_id": "id.apps.googleusercontent.com",
            "client_secret": "secret",
            "refresh_token": "1//refresh"
        }"#;
        let user = parse_authorized_user(Path::new("creds.json"), body).unwrap();
        assert_eq!(user.client_id, "id.apps.googleusercontent.com");
        assert_eq!(user.refresh_token, "1//refresh");
        assert!(user.token_uri.is_none());
    }

    #[test]
    fn rejects_service_account_files() {
        let body = r#"{
            "type": "service_account",
            "client_id": "id",
            "client_secret": "secret",
            "refresh_token": "token"
        }"#;
        let err = parse_authorized_user(Path::new("creds.json"), body).unwrap_err();
        assert!(err.to_string().contains("unsupported credential type"));
    }

    #[test]
    fn rejects_blank_refresh_token() {
        let body = r#"{"client_id": "id", "client_secret": "secret", "refresh_token": "  "}"#;
        assert!(parse_authorized_user(Path::new("creds.json"), body).is_err());
    }
}
