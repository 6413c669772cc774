//! PostgREST-backed profile store.

use crate::error::{parse_postgrest_error, summarize_response_body, SupabaseError, SupabaseResult};
use crate::session::SupabaseSessionService;
use async_trait::async_trait;
use auth_sync_core::{ProfileRecord, ProfileStore, SessionService, StoreError};
use reqwest::Client;
use std::sync::Arc;
use url::Url;

const PROFILE_COLUMNS: &str = "id,email,first_name,last_name";

/// Makes PostgREST answer a single object and report zero rows as `PGRST116`.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Profile store over the Supabase REST API.
///
/// Requests carry the signed-in user's access token so row-level security
/// applies; without a session the publishable key is used.
#[derive(Clone)]
pub struct SupabaseProfileStore {
    http_client: Client,
    session: Arc<SupabaseSessionService>,
    table: String,
}

impl SupabaseProfileStore {
    pub fn new(session: Arc<SupabaseSessionService>, table: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            session,
            table: table.into(),
        }
    }

    /// Build the REST API URL for the profiles table.
    fn rest_url(&self) -> String {
        format!("{}/rest/v1/{}", self.session.supabase_url(), self.table)
    }

    fn select_url(&self, id: &str) -> SupabaseResult<Url> {
        let mut url = Url::parse(&self.rest_url())?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{}", id))
            .append_pair("select", PROFILE_COLUMNS);
        Ok(url)
    }

    /// Authorization header for a data call, refreshing an expiring access token first.
    async fn bearer(&self) -> SupabaseResult<String> {
        self.session.get_session().await?;
        let token = self
            .session
            .access_token()
            .unwrap_or_else(|| self.session.supabase_publishable_key().to_string());
        Ok(format!("Bearer {}", token))
    }

    async fn fetch(&self, id: &str) -> SupabaseResult<ProfileRecord> {
        let url = self.select_url(id)?;
        let bearer = self.bearer().await?;

        tracing::debug!(user_id = %id, table = %self.table, "Fetching profile");

        let response = self
            .http_client
            .get(url)
            .header("apikey", self.session.supabase_publishable_key())
            .header("Authorization", bearer)
            .header("Accept", SINGLE_OBJECT)
            .send()
            .await?;

        let response = check_response(response, "Failed to fetch profile").await?;
        Ok(response.json().await?)
    }

    async fn write(&self, record: &ProfileRecord, prefer: &str) -> SupabaseResult<()> {
        let bearer = self.bearer().await?;
        let response = self
            .http_client
            .post(self.rest_url())
            .header("apikey", self.session.supabase_publishable_key())
            .header("Authorization", bearer)
            .header("Content-Type", "application/json")
            .header("Prefer", prefer)
            .json(record)
            .send()
            .await?;

        check_response(response, "Failed to write profile").await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for SupabaseProfileStore {
    async fn select(&self, id: &str) -> Result<Option<ProfileRecord>, StoreError> {
        Ok(Some(self.fetch(id).await?))
    }

    async fn insert(&self, record: &ProfileRecord) -> Result<(), StoreError> {
        self.write(record, "return=minimal").await?;
        tracing::info!(user_id = %record.id, "Profile inserted");
        Ok(())
    }

    async fn upsert(&self, record: &ProfileRecord) -> Result<(), StoreError> {
        self.write(record, "resolution=merge-duplicates,return=minimal")
            .await?;
        tracing::info!(user_id = %record.id, "Profile upserted");
        Ok(())
    }
}

async fn check_response(
    response: reqwest::Response,
    context: &str,
) -> Result<reqwest::Response, SupabaseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body_summary = summarize_response_body(&body);
    let error = parse_postgrest_error(status.as_u16(), &body);
    tracing::debug!(status = %status, body_summary = %body_summary, error = %error, "{}", context);
    Err(error)
}
