//! Magasin distant Firestore (API REST v1)
//!
//! Couvre exactement ce dont le moteur de synchronisation a besoin :
//! authentification anonyme Identity Toolkit, lecture de la collection
//! `songs`, document unique `schedules/sunday-service`, écritures
//! unitaires et lots `:commit`. Les abonnements temps réel sont rendus
//! par sondage périodique : l'instantané n'est diffusé que s'il diffère
//! du précédent.

use super::{RemoteStore, WriteBatch, WriteOp, HARD_BATCH_LIMIT};
use crate::model::{Category, ScheduleItem, Song};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 64;
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const PAGE_SIZE: usize = 300;

const SONGS_COLLECTION: &str = "songs";
const SCHEDULE_DOC: &str = "schedules/sunday-service";

/// Client Firestore pour un projet donné
pub struct FirestoreStore {
    client: reqwest::Client,
    project_id: String,
    api_key: String,
    id_token: Mutex<Option<String>>,
    songs_tx: broadcast::Sender<Vec<Song>>,
    schedule_tx: broadcast::Sender<Vec<ScheduleItem>>,
}

impl FirestoreStore {
    pub fn new(project_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        let (songs_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (schedule_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            client: reqwest::Client::new(),
            project_id: project_id.into(),
            api_key: api_key.into(),
            id_token: Mutex::new(None),
            songs_tx,
            schedule_tx,
        }
    }

    /// Construit le client et démarre les tâches de sondage
    pub fn connect(project_id: impl Into<String>, api_key: impl Into<String>) -> Arc<Self> {
        let store = Arc::new(Self::new(project_id, api_key));
        store.clone().spawn_pollers();
        store
    }

    fn spawn_pollers(self: Arc<Self>) {
        let songs_store = self.clone();
        tokio::spawn(async move {
            let mut last: Option<Vec<Song>> = None;
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;
                match songs_store.fetch_songs().await {
                    Ok(songs) => {
                        if last.as_ref() != Some(&songs) {
                            debug!("Songs collection changed ({} documents)", songs.len());
                            let _ = songs_store.songs_tx.send(songs.clone());
                            last = Some(songs);
                        }
                    }
                    Err(e) => warn!("Songs poll failed: {}", e),
                }
            }
        });

        let schedule_store = self;
        tokio::spawn(async move {
            let mut last: Option<Vec<ScheduleItem>> = None;
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;
                match schedule_store.fetch_schedule().await {
                    Ok(Some(items)) => {
                        if last.as_ref() != Some(&items) {
                            debug!("Schedule document changed ({} items)", items.len());
                            let _ = schedule_store.schedule_tx.send(items.clone());
                            last = Some(items);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Schedule poll failed: {}", e),
                }
            }
        });
    }

    fn documents_base(&self) -> String {
        format!(
            "https://firestore.googleapis.com/v1/projects/{}/databases/(default)/documents",
            self.project_id
        )
    }

    fn document_name(&self, path: &str) -> String {
        format!(
            "projects/{}/databases/(default)/documents/{}",
            self.project_id, path
        )
    }

    fn bearer(&self) -> Option<String> {
        self.id_token.lock().unwrap().clone()
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.bearer() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteWrite(format!(
                "{} failed with {}: {}",
                what, status, body
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteStore for FirestoreStore {
    async fn sign_in(&self) -> Result<()> {
        let url = format!(
            "https://identitytoolkit.googleapis.com/v1/accounts:signUp?key={}",
            self.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(&json!({ "returnSecureToken": true }))
            .send()
            .await
            .map_err(|e| Error::Auth(format!("Anonymous sign-in failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Auth(format!(
                "Anonymous sign-in rejected with {}",
                status
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("Malformed sign-in response: {}", e)))?;
        let token = body["idToken"]
            .as_str()
            .ok_or_else(|| Error::Auth("Sign-in response without idToken".to_string()))?;

        *self.id_token.lock().unwrap() = Some(token.to_string());
        debug!("Anonymous sign-in succeeded");
        Ok(())
    }

    async fn fetch_songs(&self) -> Result<Vec<Song>> {
        let base = format!("{}/{}", self.documents_base(), SONGS_COLLECTION);
        let mut songs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .request(self.client.get(&base))
                .query(&[("pageSize", PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| Error::RemoteWrite(format!("Songs fetch failed: {}", e)))?;
            let body: Value = Self::check(response, "Songs fetch")
                .await?
                .json()
                .await
                .map_err(|e| Error::RemoteWrite(format!("Malformed songs page: {}", e)))?;

            if let Some(documents) = body["documents"].as_array() {
                for doc in documents {
                    match decode_song(doc) {
                        Some(song) => songs.push(song),
                        None => warn!("Skipping malformed song document"),
                    }
                }
            }

            match body["nextPageToken"].as_str() {
                Some(token) => page_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(songs)
    }

    async fn fetch_schedule(&self) -> Result<Option<Vec<ScheduleItem>>> {
        let url = format!("{}/{}", self.documents_base(), SCHEDULE_DOC);
        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(|e| Error::RemoteWrite(format!("Schedule fetch failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: Value = Self::check(response, "Schedule fetch")
            .await?
            .json()
            .await
            .map_err(|e| Error::RemoteWrite(format!("Malformed schedule document: {}", e)))?;

        Ok(Some(decode_schedule(&body)))
    }

    async fn set_song(&self, song: &Song) -> Result<()> {
        let url = format!("{}/{}/{}", self.documents_base(), SONGS_COLLECTION, song.id);
        let response = self
            .request(self.client.patch(&url))
            .json(&json!({ "fields": encode_song_fields(song) }))
            .send()
            .await
            .map_err(|e| Error::RemoteWrite(format!("Song write failed: {}", e)))?;
        Self::check(response, "Song write").await?;
        Ok(())
    }

    async fn merge_song(&self, song: &Song) -> Result<()> {
        let url = format!("{}/{}/{}", self.documents_base(), SONGS_COLLECTION, song.id);
        let response = self
            .request(self.client.patch(&url))
            .query(&[
                ("updateMask.fieldPaths", "title"),
                ("updateMask.fieldPaths", "category"),
                ("updateMask.fieldPaths", "slides"),
            ])
            .json(&json!({ "fields": encode_song_fields(song) }))
            .send()
            .await
            .map_err(|e| Error::RemoteWrite(format!("Song merge failed: {}", e)))?;
        Self::check(response, "Song merge").await?;
        Ok(())
    }

    async fn delete_song(&self, id: &str) -> Result<()> {
        let url = format!("{}/{}/{}", self.documents_base(), SONGS_COLLECTION, id);
        let response = self
            .request(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| Error::RemoteWrite(format!("Song delete failed: {}", e)))?;
        Self::check(response, "Song delete").await?;
        Ok(())
    }

    async fn set_schedule(&self, items: &[ScheduleItem]) -> Result<()> {
        let url = format!("{}/{}", self.documents_base(), SCHEDULE_DOC);
        let response = self
            .request(self.client.patch(&url))
            .json(&json!({ "fields": encode_schedule_fields(items) }))
            .send()
            .await
            .map_err(|e| Error::RemoteWrite(format!("Schedule write failed: {}", e)))?;
        Self::check(response, "Schedule write").await?;
        Ok(())
    }

    async fn commit(&self, batch: &WriteBatch) -> Result<()> {
        if batch.len() > HARD_BATCH_LIMIT {
            return Err(Error::RemoteWrite(format!(
                "Batch of {} ops exceeds the {} op limit",
                batch.len(),
                HARD_BATCH_LIMIT
            )));
        }

        let writes: Vec<Value> = batch
            .ops
            .iter()
            .map(|op| match op {
                WriteOp::SetSong(song) => json!({
                    "update": {
                        "name": self.document_name(&format!("{}/{}", SONGS_COLLECTION, song.id)),
                        "fields": encode_song_fields(song),
                    }
                }),
                WriteOp::DeleteSong(id) => json!({
                    "delete": self.document_name(&format!("{}/{}", SONGS_COLLECTION, id)),
                }),
                WriteOp::SetSchedule(items) => json!({
                    "update": {
                        "name": self.document_name(SCHEDULE_DOC),
                        "fields": encode_schedule_fields(items),
                    }
                }),
            })
            .collect();

        let url = format!(
            "https://firestore.googleapis.com/v1/projects/{}/databases/(default)/documents:commit",
            self.project_id
        );
        let response = self
            .request(self.client.post(&url))
            .json(&json!({ "writes": writes }))
            .send()
            .await
            .map_err(|e| Error::RemoteWrite(format!("Batch commit failed: {}", e)))?;
        Self::check(response, "Batch commit").await?;
        Ok(())
    }

    fn subscribe_songs(&self) -> broadcast::Receiver<Vec<Song>> {
        self.songs_tx.subscribe()
    }

    fn subscribe_schedule(&self) -> broadcast::Receiver<Vec<ScheduleItem>> {
        self.schedule_tx.subscribe()
    }
}

fn string_value(s: &str) -> Value {
    json!({ "stringValue": s })
}

fn encode_song_fields(song: &Song) -> Value {
    let slides: Vec<Value> = song.slides.iter().map(|s| string_value(s)).collect();
    json!({
        "title": string_value(&song.title),
        "category": string_value(song.category.as_str()),
        "slides": { "arrayValue": { "values": slides } },
    })
}

fn encode_schedule_fields(items: &[ScheduleItem]) -> Value {
    let values: Vec<Value> = items
        .iter()
        .map(|item| {
            json!({
                "mapValue": {
                    "fields": {
                        "instanceId": string_value(&item.instance_id),
                        "songId": string_value(&item.song_id),
                        "title": string_value(&item.title),
                        "category": string_value(item.category.as_str()),
                    }
                }
            })
        })
        .collect();
    json!({ "items": { "arrayValue": { "values": values } } })
}

fn field_string(fields: &Value, key: &str) -> Option<String> {
    fields[key]["stringValue"].as_str().map(str::to_string)
}

fn decode_song(doc: &Value) -> Option<Song> {
    let name = doc["name"].as_str()?;
    let id = name.rsplit('/').next()?.to_string();
    let fields = &doc["fields"];

    let slides = fields["slides"]["arrayValue"]["values"]
        .as_array()
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v["stringValue"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Some(Song {
        id,
        title: field_string(fields, "title")?,
        category: field_string(fields, "category")?
            .parse::<Category>()
            .ok()?,
        slides,
    })
}

fn decode_schedule(doc: &Value) -> Vec<ScheduleItem> {
    let Some(values) = doc["fields"]["items"]["arrayValue"]["values"].as_array() else {
        return Vec::new();
    };

    values
        .iter()
        .filter_map(|value| {
            let fields = &value["mapValue"]["fields"];
            Some(ScheduleItem {
                instance_id: field_string(fields, "instanceId")?,
                song_id: field_string(fields, "songId")?,
                title: field_string(fields, "title")?,
                category: field_string(fields, "category")?
                    .parse::<Category>()
                    .ok()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_song() -> Song {
        Song {
            id: "H12".into(),
            title: "Amazing Grace".into(),
            category: Category::EnglishHymns,
            slides: vec!["verse 1".into(), "verse 2".into()],
        }
    }

    #[test]
    fn test_song_fields_roundtrip() {
        let song = sample_song();
        let doc = json!({
            "name": "projects/p/databases/(default)/documents/songs/H12",
            "fields": encode_song_fields(&song),
        });

        assert_eq!(decode_song(&doc), Some(song));
    }

    #[test]
    fn test_schedule_fields_roundtrip() {
        let items = vec![ScheduleItem {
            instance_id: "1700000000000-0042".into(),
            song_id: "H12".into(),
            title: "Amazing Grace".into(),
            category: Category::EnglishHymns,
        }];
        let doc = json!({ "fields": encode_schedule_fields(&items) });

        assert_eq!(decode_schedule(&doc), items);
    }

    #[test]
    fn test_malformed_document_is_skipped() {
        let doc = json!({
            "name": "projects/p/databases/(default)/documents/songs/H1",
            "fields": { "title": { "stringValue": "No category" } },
        });
        assert!(decode_song(&doc).is_none());
    }
}
