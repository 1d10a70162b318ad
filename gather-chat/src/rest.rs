//! REST history collaborator.
//!
//! Supplies the authoritative room list and paginated message history used
//! to seed and repair the reducer's state. Failures propagate to the caller;
//! nothing here retries.

use url::Url;

use crate::error::ChatError;
use crate::protocol::{RoomRecord, WireMessage};
use crate::session::Credential;

/// Default page size for history fetches.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Client for the rooms/history endpoints.
pub struct HistoryClient {
    http: reqwest::Client,
    base: Url,
    credential: Credential,
}

impl HistoryClient {
    pub fn new(base: impl AsRef<str>, credential: Credential) -> Result<Self, ChatError> {
        // Url::join drops the last path segment without a trailing slash.
        let mut raw = base.as_ref().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base: Url::parse(&raw)?,
            credential,
        })
    }

    /// `GET {base}/rooms` — the full room list.
    pub async fn rooms(&self) -> Result<Vec<RoomRecord>, ChatError> {
        let url = self.base.join("rooms")?;
        let rooms = self
            .http
            .get(url)
            .bearer_auth(self.credential.as_str())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rooms)
    }

    /// `GET {base}/rooms/{room_id}/history?limit=N` — newest page of a
    /// room's messages, oldest first.
    pub async fn history(&self, room_id: &str, limit: usize) -> Result<Vec<WireMessage>, ChatError> {
        let url = self.base.join(&format!("rooms/{room_id}/history"))?;
        let messages = self
            .http
            .get(url)
            .query(&[("limit", limit)])
            .bearer_auth(self.credential.as_str())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let credential = Credential::new("tok").unwrap();
        let client = HistoryClient::new("https://api.gather.app/v1", credential).unwrap();
        assert_eq!(
            client.base.join("rooms").unwrap().as_str(),
            "https://api.gather.app/v1/rooms"
        );
        assert_eq!(
            client.base.join("rooms/r1/history").unwrap().as_str(),
            "https://api.gather.app/v1/rooms/r1/history"
        );
    }
}
