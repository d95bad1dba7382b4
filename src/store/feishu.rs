//! Feishu (Lark) open platform client implementing [`DocumentStore`].
//!
//! Every call authenticates with a tenant access token, fetched from the
//! app credentials and cached until shortly before it expires. Responses use
//! the platform's `{code, msg, data}` envelope; a non-zero `code` becomes a
//! [`StoreError`] categorized by [`StoreError::from_api`].

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use super::{CopiedDocument, DocumentStore, Fields, Filter, Record, StoreError, TableInfo};

pub const DEFAULT_BASE_URL: &str = "https://open.feishu.cn";

/// Page size for record and table listings (the API maximum).
const PAGE_SIZE: u32 = 500;

/// Tokens are refreshed this long before the expiry the server reports.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct FeishuConfig {
    pub base_url: String,
    pub app_id: String,
    pub app_secret: String,
    pub timeout: Duration,
}

impl FeishuConfig {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        FeishuConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct FeishuDocumentStore {
    config: FeishuConfig,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

// ─── Wire types ───

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
    /// Seconds until expiry.
    #[serde(default)]
    expire: u64,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    // Omitted on an empty page.
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    has_more: bool,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordItem {
    record_id: String,
    #[serde(default)]
    fields: Fields,
}

#[derive(Debug, Deserialize)]
struct RecordData {
    record: RecordItem,
}

#[derive(Debug, Deserialize)]
struct TableItem {
    table_id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct CopyData {
    file: CopiedFile,
}

#[derive(Debug, Deserialize)]
struct CopiedFile {
    token: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Serialize)]
struct FieldsBody<'a> {
    fields: &'a Fields,
}

/// Link-sharing settings applied to every generated ledger.
fn public_permission_body() -> serde_json::Value {
    json!({
        "external_access": true,
        "security_entity": "anyone_can_view",
        "comment_entity": "anyone_can_view",
        "share_entity": "anyone",
        "link_share_entity": "anyone_editable",
        "invite_external": true,
    })
}

impl FeishuDocumentStore {
    pub fn new(config: FeishuConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(StoreError::from_reqwest)?;
        Ok(FeishuDocumentStore {
            config,
            http,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn records_path(container: &str, table: &str) -> String {
        format!(
            "/open-apis/bitable/v1/apps/{}/tables/{}/records",
            container, table
        )
    }

    async fn access_token(&self) -> Result<String, StoreError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let response = self
            .http
            .post(self.url("/open-apis/auth/v3/tenant_access_token/internal"))
            .json(&json!({
                "app_id": self.config.app_id,
                "app_secret": self.config.app_secret,
            }))
            .send()
            .await
            .map_err(StoreError::from_reqwest)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(StoreError::from_reqwest)?;
        let parsed: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| StoreError::from_status(status, format!("bad token response: {}", e)))?;
        if parsed.code != 0 {
            return Err(StoreError::from_api(status, parsed.code, parsed.msg));
        }

        let lifetime = Duration::from_secs(parsed.expire).saturating_sub(TOKEN_EXPIRY_MARGIN);
        debug!(expires_in_secs = lifetime.as_secs(), "Fetched tenant access token");
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedToken {
            value: parsed.tenant_access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(parsed.tenant_access_token)
    }

    fn cached_token(&self) -> Option<String> {
        let guard = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|t| t.expires_at > Instant::now())
            .map(|t| t.value.clone())
    }

    /// Sends an authenticated request and unwraps the response envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<Option<T>, StoreError> {
        let token = self.access_token().await?;
        let mut request = self
            .http
            .request(method, self.url(path))
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(StoreError::from_reqwest)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(StoreError::from_reqwest)?;
        let envelope: Envelope<T> = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                return Err(StoreError::from_status(
                    status,
                    format!("undecodable response: {}", e),
                ));
            }
        };
        if envelope.code != 0 {
            return Err(StoreError::from_api(status, envelope.code, envelope.msg));
        }
        Ok(envelope.data)
    }

    async fn call_data<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<T, StoreError> {
        self.call(method, path, query, body)
            .await?
            .ok_or_else(|| StoreError::permanent(format!("response to {} carried no data", path)))
    }

    /// Follows `page_token` until the listing is exhausted.
    async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        base_query: Vec<(&str, String)>,
    ) -> Result<Vec<T>, StoreError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = base_query.clone();
            query.push(("page_size", PAGE_SIZE.to_string()));
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }

            let page: Page<T> = self.call_data(Method::GET, path, &query, None).await?;
            items.extend(page.items);
            match page.page_token {
                Some(next) if page.has_more && !next.is_empty() => page_token = Some(next),
                _ => return Ok(items),
            }
        }
    }
}

fn fields_body(fields: &Fields) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(FieldsBody { fields })
        .map_err(|e| StoreError::permanent(format!("unencodable fields: {}", e)))
}

impl DocumentStore for FeishuDocumentStore {
    #[instrument(skip(self, fields))]
    async fn create_record(
        &self,
        container: &str,
        table: &str,
        fields: Fields,
    ) -> Result<String, StoreError> {
        let body = fields_body(&fields)?;
        let data: RecordData = self
            .call_data(
                Method::POST,
                &Self::records_path(container, table),
                &[],
                Some(&body),
            )
            .await?;
        Ok(data.record.record_id)
    }

    #[instrument(skip(self))]
    async fn read_records(
        &self,
        container: &str,
        table: &str,
        filter: &Filter,
    ) -> Result<Vec<Record>, StoreError> {
        let query = match filter.to_formula() {
            Some(formula) => vec![("filter", formula)],
            None => Vec::new(),
        };
        let items: Vec<RecordItem> = self
            .list_all(&Self::records_path(container, table), query)
            .await?;
        Ok(items
            .into_iter()
            .map(|item| Record {
                id: item.record_id,
                fields: item.fields,
            })
            .collect())
    }

    #[instrument(skip(self, fields))]
    async fn update_record(
        &self,
        container: &str,
        table: &str,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        let body = fields_body(&fields)?;
        let path = format!("{}/{}", Self::records_path(container, table), id);
        self.call::<serde_json::Value>(Method::PUT, &path, &[], Some(&body))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_record(&self, container: &str, table: &str, id: &str) -> Result<(), StoreError> {
        let path = format!("{}/{}", Self::records_path(container, table), id);
        self.call::<serde_json::Value>(Method::DELETE, &path, &[], None)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn copy_template(
        &self,
        template_token: &str,
        target_container: &str,
        name: &str,
    ) -> Result<CopiedDocument, StoreError> {
        let body = json!({
            "name": name,
            "type": "bitable",
            "folder_token": target_container,
        });
        let data: CopyData = self
            .call_data(
                Method::POST,
                &format!("/open-apis/drive/v1/files/{}/copy", template_token),
                &[],
                Some(&body),
            )
            .await?;
        Ok(CopiedDocument {
            token: data.file.token,
            url: data.file.url,
            name: data.file.name,
        })
    }

    #[instrument(skip(self))]
    async fn set_public_permissions(&self, token: &str) -> Result<(), StoreError> {
        self.call::<serde_json::Value>(
            Method::PATCH,
            &format!("/open-apis/drive/v1/permissions/{}/public", token),
            &[("type", "bitable".to_string())],
            Some(&public_permission_body()),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_tables(&self, token: &str) -> Result<Vec<TableInfo>, StoreError> {
        let items: Vec<TableItem> = self
            .list_all(&format!("/open-apis/bitable/v1/apps/{}/tables", token), Vec::new())
            .await?;
        Ok(items
            .into_iter()
            .map(|t| TableInfo {
                id: t.table_id,
                name: t.name,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_with_error_code_decodes() {
        let envelope: Envelope<Page<RecordItem>> =
            serde_json::from_str(r#"{"code":1254040,"msg":"AppTokenNotFound"}"#).unwrap();
        assert_eq!(envelope.code, 1254040);
        assert!(envelope.data.is_none());
    }

    #[test]
    fn record_page_decodes() {
        let raw = r#"{
            "code": 0,
            "msg": "success",
            "data": {
                "has_more": true,
                "page_token": "next",
                "items": [{"record_id": "rec1", "fields": {"uid": "u1"}}]
            }
        }"#;
        let envelope: Envelope<Page<RecordItem>> = serde_json::from_str(raw).unwrap();
        let page = envelope.data.unwrap();
        assert!(page.has_more);
        assert_eq!(page.page_token.as_deref(), Some("next"));
        assert_eq!(page.items[0].record_id, "rec1");
        assert_eq!(page.items[0].fields["uid"], "u1");
    }

    #[test]
    fn empty_page_has_no_items() {
        let envelope: Envelope<Page<RecordItem>> =
            serde_json::from_str(r#"{"code":0,"data":{"has_more":false}}"#).unwrap();
        assert!(envelope.data.unwrap().items.is_empty());
    }

    #[test]
    fn copy_response_decodes() {
        let raw = r#"{"code":0,"data":{"file":{"token":"bascn9","url":"https://x/base/bascn9","name":"飞书记账","type":"bitable"}}}"#;
        let envelope: Envelope<CopyData> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.data.unwrap().file.token, "bascn9");
    }

    #[test]
    fn permission_body_opens_link_sharing() {
        let body = public_permission_body();
        assert_eq!(body["link_share_entity"], "anyone_editable");
        assert_eq!(body["external_access"], true);
    }

    #[test]
    fn url_joins_without_double_slash() {
        let mut config = FeishuConfig::new("id", "secret");
        config.base_url = "http://localhost:9000/".to_string();
        let store = FeishuDocumentStore::new(config).unwrap();
        assert_eq!(
            store.url("/open-apis/x"),
            "http://localhost:9000/open-apis/x"
        );
    }
}
