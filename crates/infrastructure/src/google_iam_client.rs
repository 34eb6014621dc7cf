//! HTTP adapter for the Google IAM, IAM Credentials, and Resource Manager
//! APIs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credmint_application::{
    AccessTokenMaterial, IamClient, PolicyBinding, ResourcePolicy, ServiceAccountKeyMaterial,
};
use credmint_core::{AppError, AppResult, ProjectId};
use credmint_domain::{
    ServiceAccountRef, KEY_ALGORITHM_RSA_2048, KEY_TYPE_GOOGLE_CREDENTIALS_FILE,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_IAM_BASE_URL: &str = "https://iam.googleapis.com/v1";
const DEFAULT_CREDENTIALS_BASE_URL: &str = "https://iamcredentials.googleapis.com/v1";
const DEFAULT_RESOURCE_MANAGER_BASE_URL: &str = "https://cloudresourcemanager.googleapis.com/v1";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateServiceAccountRequest {
    account_id: String,
    service_account: ServiceAccountBody,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceAccountBody {
    display_name: String,
}

#[derive(Deserialize)]
struct ServiceAccountResource {
    name: String,
    email: String,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PolicyDocument {
    #[serde(default)]
    etag: String,
    #[serde(default)]
    bindings: Vec<PolicyBindingDocument>,
}

#[derive(Serialize, Deserialize)]
struct PolicyBindingDocument {
    role: String,
    members: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetPolicyRequest {
    policy: PolicyDocument,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateKeyRequest {
    private_key_type: String,
    key_algorithm: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyResource {
    name: String,
    #[serde(default)]
    private_key_data: String,
    #[serde(default)]
    key_algorithm: String,
    #[serde(default)]
    private_key_type: String,
}

#[derive(Serialize)]
struct GenerateTokenRequest {
    scope: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateTokenResponse {
    access_token: String,
    expire_time: DateTime<Utc>,
}

/// REST implementation of the IAM port.
///
/// Transient remote failures (429 and 5xx) are retried with linear backoff
/// before surfacing as `TransientRemote`; permission failures surface as
/// `PermanentRemote` immediately.
#[derive(Clone)]
pub struct GoogleIamClient {
    http_client: reqwest::Client,
    auth_token: String,
    iam_base_url: String,
    credentials_base_url: String,
    resource_manager_base_url: String,
    max_attempts: u8,
    retry_backoff_ms: u64,
}

impl GoogleIamClient {
    /// Creates a client against the public Google endpoints.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        auth_token: impl Into<String>,
        max_attempts: u8,
        retry_backoff_ms: u64,
    ) -> Self {
        Self {
            http_client,
            auth_token: auth_token.into(),
            iam_base_url: DEFAULT_IAM_BASE_URL.to_owned(),
            credentials_base_url: DEFAULT_CREDENTIALS_BASE_URL.to_owned(),
            resource_manager_base_url: DEFAULT_RESOURCE_MANAGER_BASE_URL.to_owned(),
            max_attempts: max_attempts.max(1),
            retry_backoff_ms: retry_backoff_ms.max(50),
        }
    }

    /// Redirects every API family to one alternate base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.iam_base_url.clone_from(&base_url);
        self.credentials_base_url.clone_from(&base_url);
        self.resource_manager_base_url = base_url;
        self
    }

    async fn execute<F>(&self, description: &str, mut build: F) -> AppResult<reqwest::Response>
    where
        F: FnMut(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_u8;
        let mut last_error: Option<String> = None;

        while attempt < self.max_attempts {
            attempt = attempt.saturating_add(1);
            let response = build(&self.http_client)
                .bearer_auth(self.auth_token.as_str())
                .send()
                .await;

            match response {
                Ok(response)
                    if response.status().is_server_error()
                        || response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS =>
                {
                    last_error = Some(format!(
                        "transient HTTP status {} while trying to {description}",
                        response.status()
                    ));
                }
                Ok(response) => return Ok(response),
                Err(error) => {
                    last_error = Some(format!("transport error while trying to {description}: {error}"));
                }
            }

            if attempt < self.max_attempts {
                warn!(description, attempt, "remote call failed transiently, retrying");
                let delay = self.retry_backoff_ms.saturating_mul(u64::from(attempt));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        Err(AppError::TransientRemote(last_error.unwrap_or_else(|| {
            format!("exhausted retries while trying to {description}")
        })))
    }

    async fn fail_from_response(
        description: &str,
        response: reqwest::Response,
    ) -> AppError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<response body unavailable>".to_owned());

        match status {
            reqwest::StatusCode::NOT_FOUND => {
                AppError::NotFound(format!("{description}: remote object does not exist"))
            }
            reqwest::StatusCode::CONFLICT => AppError::Conflict(format!(
                "{description}: remote state moved concurrently: {body}"
            )),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                AppError::PermanentRemote(format!(
                    "{description}: insufficient permissions or quota: {body}"
                ))
            }
            _ => AppError::PermanentRemote(format!(
                "{description}: remote rejected the request with status {status}: {body}"
            )),
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        description: &str,
        response: reqwest::Response,
    ) -> AppResult<T> {
        response.json::<T>().await.map_err(|error| {
            AppError::Internal(format!("{description}: malformed remote response: {error}"))
        })
    }
}

#[async_trait]
impl IamClient for GoogleIamClient {
    async fn create_service_account(
        &self,
        project: &ProjectId,
        account_id: &str,
        display_name: &str,
    ) -> AppResult<ServiceAccountRef> {
        let description = "create service account";
        let url = format!(
            "{}/projects/{}/serviceAccounts",
            self.iam_base_url,
            project.as_str()
        );
        let request = CreateServiceAccountRequest {
            account_id: account_id.to_owned(),
            service_account: ServiceAccountBody {
                display_name: display_name.to_owned(),
            },
        };

        let response = self
            .execute(description, |client| client.post(url.as_str()).json(&request))
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail_from_response(description, response).await);
        }

        let resource: ServiceAccountResource = Self::read_json(description, response).await?;
        ServiceAccountRef::new(resource.name, resource.email)
    }

    async fn get_service_account(
        &self,
        resource_name: &str,
    ) -> AppResult<Option<ServiceAccountRef>> {
        let description = "look up service account";
        let url = format!("{}/{resource_name}", self.iam_base_url);

        let response = self
            .execute(description, |client| client.get(url.as_str()))
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::fail_from_response(description, response).await);
        }

        let resource: ServiceAccountResource = Self::read_json(description, response).await?;
        Ok(Some(ServiceAccountRef::new(resource.name, resource.email)?))
    }

    async fn delete_service_account(&self, resource_name: &str) -> AppResult<()> {
        let description = "delete service account";
        let url = format!("{}/{resource_name}", self.iam_base_url);

        let response = self
            .execute(description, |client| client.delete(url.as_str()))
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail_from_response(description, response).await);
        }
        Ok(())
    }

    async fn get_resource_policy(&self, resource: &str) -> AppResult<ResourcePolicy> {
        let description = "fetch resource policy";
        let url = format!("{}/{resource}:getIamPolicy", self.resource_manager_base_url);

        let response = self
            .execute(description, |client| client.post(url.as_str()))
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail_from_response(description, response).await);
        }

        let document: PolicyDocument = Self::read_json(description, response).await?;
        Ok(ResourcePolicy {
            etag: document.etag,
            bindings: document
                .bindings
                .into_iter()
                .map(|binding| PolicyBinding {
                    role: binding.role,
                    members: binding.members.into_iter().collect(),
                })
                .collect(),
        })
    }

    async fn set_resource_policy(&self, resource: &str, policy: ResourcePolicy) -> AppResult<()> {
        let description = "write resource policy";
        let url = format!("{}/{resource}:setIamPolicy", self.resource_manager_base_url);
        let request = SetPolicyRequest {
            policy: PolicyDocument {
                etag: policy.etag,
                bindings: policy
                    .bindings
                    .into_iter()
                    .map(|binding| PolicyBindingDocument {
                        role: binding.role,
                        members: binding.members.into_iter().collect(),
                    })
                    .collect(),
            },
        };

        let response = self
            .execute(description, |client| client.post(url.as_str()).json(&request))
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail_from_response(description, response).await);
        }
        Ok(())
    }

    async fn create_service_account_key(
        &self,
        account: &ServiceAccountRef,
    ) -> AppResult<ServiceAccountKeyMaterial> {
        let description = "create service account key";
        let url = format!("{}/{}/keys", self.iam_base_url, account.resource_name());
        let request = CreateKeyRequest {
            private_key_type: KEY_TYPE_GOOGLE_CREDENTIALS_FILE.to_owned(),
            key_algorithm: KEY_ALGORITHM_RSA_2048.to_owned(),
        };

        let response = self
            .execute(description, |client| client.post(url.as_str()).json(&request))
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail_from_response(description, response).await);
        }

        let resource: KeyResource = Self::read_json(description, response).await?;
        Ok(ServiceAccountKeyMaterial {
            key_name: resource.name,
            private_key_data: resource.private_key_data,
            key_algorithm: resource.key_algorithm,
            key_type: resource.private_key_type,
        })
    }

    async fn service_account_key_exists(&self, key_name: &str) -> AppResult<bool> {
        let description = "look up service account key";
        let url = format!("{}/{key_name}", self.iam_base_url);

        let response = self
            .execute(description, |client| client.get(url.as_str()))
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(Self::fail_from_response(description, response).await);
        }
        Ok(true)
    }

    async fn delete_service_account_key(&self, key_name: &str) -> AppResult<()> {
        let description = "delete service account key";
        let url = format!("{}/{key_name}", self.iam_base_url);

        let response = self
            .execute(description, |client| client.delete(url.as_str()))
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail_from_response(description, response).await);
        }
        Ok(())
    }

    async fn mint_access_token(
        &self,
        account: &ServiceAccountRef,
        scopes: &[String],
    ) -> AppResult<AccessTokenMaterial> {
        let description = "mint access token";
        let url = format!(
            "{}/projects/-/serviceAccounts/{}:generateAccessToken",
            self.credentials_base_url,
            account.email()
        );
        let request = GenerateTokenRequest {
            scope: scopes.to_vec(),
        };

        let response = self
            .execute(description, |client| client.post(url.as_str()).json(&request))
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail_from_response(description, response).await);
        }

        let token: GenerateTokenResponse = Self::read_json(description, response).await?;
        Ok(AccessTokenMaterial {
            token: token.access_token,
            expires_at: token.expire_time,
        })
    }
}
