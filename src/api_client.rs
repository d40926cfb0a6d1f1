// src/api_client.rs

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::model::{Employee, EmployeeId, PayPeriod, PeriodId, RawAttendanceRecord};

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// --- Error Type ---

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON processing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Rate limit exceeded (Status 429)")]
    RateLimitExceeded,

    #[error("Not authorized: Status={status}, Message='{message}'")]
    Unauthorized { status: StatusCode, message: String },

    // Use this for any other non-success status
    #[error("Payroll API error: Status={status}, Message='{message}'")]
    Status { status: StatusCode, message: String },
}

// Error bodies come as {"message": ...} or {"detail": ...}
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiErrorPayload {
    message: Option<String>,
    detail: Option<String>,
}

/// Some endpoints wrap their payload in `{"data": ...}`, others return it bare.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    pub(crate) fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(data) => data,
        }
    }
}

// --- Data Source Seams ---

/// Daily attendance rows for one employee in one pay period.
#[async_trait]
pub trait AttendanceSource: Send + Sync {
    async fn attendance_history(
        &self,
        employee_id: EmployeeId,
        period_id: PeriodId,
    ) -> Result<Vec<RawAttendanceRecord>, ApiError>;
}

/// The employee list backing the directory cache.
#[async_trait]
pub trait EmployeeSource: Send + Sync {
    async fn list_employees(&self) -> Result<Vec<Employee>, ApiError>;
}

// --- Client ---

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone)]
pub struct ApiClient {
    config: ApiConfig,
    http_client: Client,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        // Validate early so a bad base URL fails at startup, not mid-export
        Url::parse(&config.base_url)?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, ApiError> {
        let base = self.config.base_url.trim_end_matches('/');
        let url = if endpoint.starts_with("http") {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{}{}", base, endpoint)
        } else {
            format!("{}/{}", base, endpoint)
        };
        Ok(Url::parse(&url)?)
    }

    pub fn build_request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.endpoint_url(endpoint)?;

        let mut request = self
            .http_client
            .request(method, url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = &self.config.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        Ok(request)
    }

    pub async fn send_and_deserialize<T: DeserializeOwned>(
        &self,
        request_builder: RequestBuilder,
        context_msg: &str,
    ) -> Result<T, ApiError> {
        let request = request_builder.build().map_err(|e| {
            error!("Request build failed for '{}': {}", context_msg, e);
            ApiError::Request(e)
        })?;
        let request_url = request.url().to_string();
        debug!("Sending request for '{}' to URL: {}", context_msg, request_url);

        let response = self.http_client.execute(request).await.map_err(|e| {
            // Network, DNS, timeout: nothing came back
            error!(
                "HTTP execution failed for '{}' (URL: {}): {}",
                context_msg, request_url, e
            );
            ApiError::Request(e)
        })?;

        let status = response.status();
        debug!(
            "Received response for '{}' (URL: {}): Status={}",
            context_msg, request_url, status
        );

        if status.is_success() {
            let bytes = response.bytes().await?;
            return serde_json::from_slice::<Envelope<T>>(&bytes)
                .map(Envelope::into_inner)
                .map_err(|e| {
                    error!(
                        "JSON deserialization failed for '{}' (URL: {}): {}",
                        context_msg, request_url, e
                    );
                    ApiError::Json(e)
                });
        }

        let error_body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("Failed to read error body: {}", e));
        error!(
            "API Error Response: Status={}, Body='{}' for URL: {}",
            status, error_body, request_url
        );
        Err(status_error(status, &error_body))
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        context_msg: &str,
    ) -> Result<T, ApiError> {
        let request = self.build_request(Method::GET, endpoint)?.query(query);
        self.send_and_deserialize(request, context_msg).await
    }

    // --- API Methods ---

    pub async fn get_employees(&self) -> Result<Vec<Employee>, ApiError> {
        let employees: Vec<Employee> = self.get("/employees", &[], "List Employees").await?;
        info!("Fetched {} employees", employees.len());
        Ok(employees)
    }

    pub async fn get_periods(&self) -> Result<Vec<PayPeriod>, ApiError> {
        let periods: Vec<PayPeriod> = self.get("/periods", &[], "List Pay Periods").await?;
        info!("Fetched {} pay periods", periods.len());
        Ok(periods)
    }

    pub async fn get_period(&self, period_id: PeriodId) -> Result<PayPeriod, ApiError> {
        self.get(&format!("/periods/{}", period_id), &[], "Get Pay Period")
            .await
    }

    pub async fn get_attendance_history(
        &self,
        employee_id: EmployeeId,
        period_id: PeriodId,
    ) -> Result<Vec<RawAttendanceRecord>, ApiError> {
        let query = [
            ("employee_id", employee_id.to_string()),
            ("period_id", period_id.to_string()),
        ];
        let records: Vec<RawAttendanceRecord> = self
            .get("/attendance/history", &query, "Get Attendance History")
            .await?;
        debug!(
            "Fetched {} attendance rows for employee {} in period {}",
            records.len(),
            employee_id,
            period_id
        );
        Ok(records)
    }
}

/// Maps a non-success status and its body to an `ApiError`.
pub(crate) fn status_error(status: StatusCode, error_body: &str) -> ApiError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!("Rate limit exceeded by payroll API");
        return ApiError::RateLimitExceeded;
    }

    let message = match serde_json::from_str::<ApiErrorPayload>(error_body) {
        Ok(ApiErrorPayload {
            message: Some(message),
            ..
        }) => message,
        Ok(ApiErrorPayload {
            detail: Some(detail),
            ..
        }) => detail,
        _ => error_body.to_string(),
    };

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ApiError::Unauthorized { status, message }
    } else {
        ApiError::Status { status, message }
    }
}

#[async_trait]
impl AttendanceSource for ApiClient {
    async fn attendance_history(
        &self,
        employee_id: EmployeeId,
        period_id: PeriodId,
    ) -> Result<Vec<RawAttendanceRecord>, ApiError> {
        self.get_attendance_history(employee_id, period_id).await
    }
}

#[async_trait]
impl EmployeeSource for ApiClient {
    async fn list_employees(&self) -> Result<Vec<Employee>, ApiError> {
        self.get_employees().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_client(base_url: &str, token: Option<&str>) -> ApiClient {
        ApiClient::new(ApiConfig {
            base_url: base_url.to_string(),
            token: token.map(str::to_string),
            timeout_secs: 5,
        })
        .expect("Failed to create test client")
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        let result = ApiClient::new(ApiConfig {
            base_url: "not a url".to_string(),
            token: None,
            timeout_secs: 5,
        });
        assert!(matches!(result, Err(ApiError::UrlParse(_))));
    }

    #[test]
    fn test_endpoint_url_joins_paths() {
        let client = create_test_client("https://payroll.example.com/api/", None);
        assert_eq!(
            client.endpoint_url("/employees").unwrap().as_str(),
            "https://payroll.example.com/api/employees"
        );
        assert_eq!(
            client.endpoint_url("periods/4").unwrap().as_str(),
            "https://payroll.example.com/api/periods/4"
        );
    }

    #[test]
    fn test_build_request_sets_bearer_token() {
        let client = create_test_client("https://payroll.example.com/api", Some("secret"));
        let request = client
            .build_request(Method::GET, "/employees")
            .unwrap()
            .build()
            .unwrap();
        let auth = request.headers().get(AUTHORIZATION).unwrap();
        assert_eq!(auth.to_str().unwrap(), "Bearer secret");

        let anonymous = create_test_client("https://payroll.example.com/api", None);
        let request = anonymous
            .build_request(Method::GET, "/employees")
            .unwrap()
            .build()
            .unwrap();
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_status_error_mapping() {
        match status_error(StatusCode::NOT_FOUND, r#"{"detail": "Periodo no encontrado"}"#) {
            ApiError::Status { status, message } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(message, "Periodo no encontrado");
            }
            other => panic!("Unexpected error: {:?}", other),
        }

        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimitExceeded
        ));

        match status_error(StatusCode::UNAUTHORIZED, "token expired") {
            ApiError::Unauthorized { message, .. } => assert_eq!(message, "token expired"),
            other => panic!("Unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_envelope_accepts_wrapped_and_bare() {
        let wrapped: Envelope<Vec<Employee>> =
            serde_json::from_str(r#"{"data": [{"id": 1, "name": "Ana"}]}"#).unwrap();
        assert_eq!(wrapped.into_inner().len(), 1);

        let bare: Envelope<Vec<Employee>> =
            serde_json::from_str(r#"[{"id": 1, "name": "Ana"}, {"id": 2, "fullName": "Luis"}]"#)
                .unwrap();
        let employees = bare.into_inner();
        assert_eq!(employees[1].name, "Luis");
    }
}
