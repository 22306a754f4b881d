use std::time::Duration;

use agency_common::api::ContactRequest;

use crate::error::Result;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Where accepted contact-form messages are sent.
#[derive(Clone)]
pub enum ContactRelay {
    /// Record the message in the service log only.
    Log,
    /// POST the message as JSON to an email-relay webhook.
    Webhook { client: reqwest::Client, url: String },
}

impl ContactRelay {
    pub fn from_config(webhook_url: Option<String>) -> Self {
        match webhook_url {
            Some(url) => ContactRelay::Webhook {
                client: reqwest::Client::new(),
                url,
            },
            None => ContactRelay::Log,
        }
    }

    pub async fn deliver(&self, message: &ContactRequest) -> Result<()> {
        match self {
            ContactRelay::Log => {
                tracing::info!(
                    name = %message.name,
                    email = %message.email,
                    company = ?message.company,
                    length = message.message.len(),
                    "contact message received"
                );
            }
            ContactRelay::Webhook { client, url } => {
                client
                    .post(url)
                    .timeout(WEBHOOK_TIMEOUT)
                    .json(message)
                    .send()
                    .await?
                    .error_for_status()?;
                tracing::info!(email = %message.email, "contact message relayed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;
    use crate::error::ServerError;

    fn message() -> ContactRequest {
        ContactRequest {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            message: "We need a new site".to_string(),
            company: None,
        }
    }

    async fn spawn_webhook(status: StatusCode) -> (String, Arc<Mutex<Vec<ContactRequest>>>) {
        let received: Arc<Mutex<Vec<ContactRequest>>> = Arc::default();

        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(received): State<Arc<Mutex<Vec<ContactRequest>>>>,
                          Json(body): Json<ContactRequest>| async move {
                        received.lock().unwrap().push(body);
                        status
                    },
                ),
            )
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/hook"), received)
    }

    #[tokio::test]
    async fn test_log_relay_accepts() {
        assert!(ContactRelay::from_config(None).deliver(&message()).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_relay_posts_message() {
        let (url, received) = spawn_webhook(StatusCode::OK).await;
        let relay = ContactRelay::from_config(Some(url));

        relay.deliver(&message()).await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].email, "ada@example.com");
    }

    #[tokio::test]
    async fn test_webhook_failure_is_error() {
        let (url, _received) = spawn_webhook(StatusCode::INTERNAL_SERVER_ERROR).await;
        let relay = ContactRelay::from_config(Some(url));

        let result = relay.deliver(&message()).await;
        assert!(matches!(result, Err(ServerError::Relay(_))));
    }
}
