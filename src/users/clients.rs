//! HTTP collaborators of the user handlers: email delivery and the CRM.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::CollaboratorsConfig;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
}

/// Outgoing email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Email {
    pub email: String,
    pub subject: String,
    pub body: String,
}

/// User record pushed to the CRM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrmUser {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, email: &Email) -> Result<(), ClientError>;
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn add_user(&self, user: &CrmUser) -> Result<(), ClientError>;
}

/// POST `body` as JSON; anything but 200 is an error.
async fn post_json<T: Serialize + Sync>(
    client: &Client,
    url: &str,
    body: &T,
) -> Result<(), ClientError> {
    let response = client.post(url).json(body).send().await?;
    let status = response.status();
    if status != StatusCode::OK {
        return Err(ClientError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    debug!(%url, "Collaborator request succeeded");
    Ok(())
}

fn build_client(timeout: Duration) -> Result<Client, ClientError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

fn endpoint(gateway_addr: &str, path: &str) -> String {
    format!("{}{}", gateway_addr.trim_end_matches('/'), path)
}

/// Email service behind the gateway.
pub struct HttpEmailSender {
    client: Client,
    url: String,
}

impl HttpEmailSender {
    pub const PATH: &'static str = "/emails-api/email/send";

    pub fn new(config: &CollaboratorsConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_client(Duration::from_millis(config.timeout_ms))?,
            url: endpoint(&config.gateway_addr, Self::PATH),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send_email(&self, email: &Email) -> Result<(), ClientError> {
        post_json(&self.client, &self.url, email).await
    }
}

/// CRM service behind the gateway.
pub struct HttpCrmClient {
    client: Client,
    url: String,
}

impl HttpCrmClient {
    pub const PATH: &'static str = "/crm-api/crm/users";

    pub fn new(config: &CollaboratorsConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_client(Duration::from_millis(config.timeout_ms))?,
            url: endpoint(&config.gateway_addr, Self::PATH),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CrmClient for HttpCrmClient {
    async fn add_user(&self, user: &CrmUser) -> Result<(), ClientError> {
        post_json(&self.client, &self.url, user).await
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    /// Answer one HTTP request with `status_line`, returning the raw request.
    async fn serve_once(status_line: &'static str) -> (CollaboratorsConfig, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = CollaboratorsConfig {
            gateway_addr: format!("http://{}", listener.local_addr().unwrap()),
            ..CollaboratorsConfig::default()
        };

        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !is_complete(&request) {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response =
                format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (config, task)
    }

    fn is_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    #[tokio::test]
    async fn test_send_email_posts_json() {
        let (config, server) = serve_once("HTTP/1.1 200 OK").await;
        let sender = HttpEmailSender::new(&config).unwrap();

        sender
            .send_email(&Email {
                email: "a@example.com".into(),
                subject: "Hi".into(),
                body: "Hello".into(),
            })
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /emails-api/email/send HTTP/1.1"));
        assert!(request.contains(r#""Email":"a@example.com""#));
    }

    #[tokio::test]
    async fn test_non_ok_status_is_an_error() {
        let (config, server) = serve_once("HTTP/1.1 201 Created").await;
        let crm = HttpCrmClient::new(&config).unwrap();

        let err = crm
            .add_user(&CrmUser {
                user_id: Uuid::nil(),
                name: "Ann".into(),
                email: "ann@example.com".into(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Status { status: 201, .. }));
        assert!(server.await.unwrap().starts_with("POST /crm-api/crm/users"));
    }

    #[test]
    fn test_email_wire_format_is_pascal_case() {
        let json = serde_json::to_value(Email {
            email: "a@example.com".into(),
            subject: "Hi".into(),
            body: "Hello".into(),
        })
        .unwrap();

        assert_eq!(
            json,
            serde_json::json!({"Email": "a@example.com", "Subject": "Hi", "Body": "Hello"})
        );
    }

    #[test]
    fn test_crm_wire_format() {
        let user_id = Uuid::nil();
        let json = serde_json::to_value(CrmUser {
            user_id,
            name: "Ann".into(),
            email: "ann@example.com".into(),
        })
        .unwrap();

        assert_eq!(json["user_id"], user_id.to_string());
        assert_eq!(json["name"], "Ann");
    }

    #[test]
    fn test_endpoints_join_gateway_address() {
        let config = CollaboratorsConfig {
            gateway_addr: "http://gateway:8080/".into(),
            ..CollaboratorsConfig::default()
        };

        assert_eq!(
            HttpEmailSender::new(&config).unwrap().url(),
            "http://gateway:8080/emails-api/email/send"
        );
        assert_eq!(
            HttpCrmClient::new(&config).unwrap().url(),
            "http://gateway:8080/crm-api/crm/users"
        );
    }
}
