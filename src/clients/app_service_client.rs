use async_trait::async_trait;
use chrono::{Utc, Duration};
use jsonwebtoken::{encode, Header, EncodingKey};
use reqwest::Client;
use serde::{Serialize, Deserialize};

use crate::storage::{IdentityProvider, StorageError, UserRecord};

/// Client for the app service that owns user accounts. The collaboration
/// engine only ever asks it to resolve a user id.
#[derive(Debug)]
pub struct AppServiceClient {
    client: Client,
    base_url: String,
    jwt_secret: String,
    service_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(rename = "type")]
    type_: String,
    exp: usize,
}

impl AppServiceClient {
    pub fn new(base_url: String, jwt_secret: String, service_name: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            jwt_secret,
            service_name,
        }
    }

    fn generate_token(&self) -> String {
        let expiration = Utc::now()
            .checked_add_signed(Duration::seconds(60)) // 1 minute expiration
            .expect("valid timestamp")
            .timestamp();

        let claims = Claims {
            sub: self.service_name.clone(),
            type_: "service".to_string(),
            exp: expiration as usize,
        };

        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.jwt_secret.as_bytes()))
            .expect("Failed to generate JWT")
    }

    /// Fetch a user record from the app service
    pub async fn fetch_user(&self, uid: &str) -> Result<reqwest::Response, reqwest::Error> {
        let token = self.generate_token();
        let url = format!("{}/auth/users/{}", self.base_url, uid);
        self.client.get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .send().await
    }
}

#[async_trait]
impl IdentityProvider for AppServiceClient {
    async fn get_user(&self, user_id: &str) -> Result<UserRecord, StorageError> {
        let response = self
            .fetch_user(user_id)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound);
        }
        if !response.status().is_success() {
            return Err(StorageError::Unavailable(format!(
                "app service returned {}",
                response.status()
            )));
        }

        response
            .json::<UserRecord>()
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }
}
