//! # MongoDB Survey Store
//!
//! Implements the store seam on top of the official `mongodb` driver.
//!
//! The driver manages its own pool and server monitoring, so this module only
//! has to:
//! - map `ConnectOptions` onto `ClientOptions` and prove the connection with a
//!   `ping` before handing the handle out (the driver connects lazily),
//! - bound every call with the socket timeout, which the driver does not
//!   expose as an option,
//! - attach a majority write concern with a `wtimeout` to inserts,
//! - translate documents to and from `SurveyRecord`,
//! - turn driver errors into `StoreError` kinds.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{
    Acknowledgment, ClientOptions, CollectionOptions, IndexOptions, WriteConcern,
};
use mongodb::{Client, Collection, IndexModel};
use tracing::debug;
use uuid::Uuid;

use super::store::{
    ConnectOptions, Durability, StoreConnector, StoreError, SurveyStore, SURVEY_COLLECTION,
};
use crate::models::survey::{NewSurvey, SurveyRecord};

/// Server error code for a unique index violation.
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Opens MongoDB connections.
#[derive(Debug, Clone)]
pub struct MongoConnector {
    app_name: String,
    heartbeat: Duration,
}

impl Default for MongoConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MongoConnector {
    /// Creates a connector that checks open connections every 10 seconds.
    pub fn new() -> Self {
        Self {
            app_name: "server_survey".to_string(),
            heartbeat: Duration::from_secs(10),
        }
    }

    /// Overrides how often an open connection is pinged to detect drops.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

#[async_trait]
impl StoreConnector for MongoConnector {
    async fn connect(
        &self,
        target: &str,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn SurveyStore>, StoreError> {
        let mut client_options = ClientOptions::parse(target).await.map_err(classify)?;
        client_options.app_name = Some(self.app_name.clone());
        client_options.server_selection_timeout = Some(options.server_selection_timeout);
        client_options.connect_timeout = Some(options.connect_timeout);
        client_options.max_pool_size = Some(options.max_pool_size);

        let client = Client::with_options(client_options).map_err(classify)?;
        let handle = MongoHandle::new(client, options, self.heartbeat);
        handle.ping().await?;
        Ok(Arc::new(handle))
    }
}

struct MongoHandle {
    client: Client,
    database: String,
    surveys: Collection<Document>,
    socket_timeout: Duration,
    heartbeat: Duration,
}

impl MongoHandle {
    fn new(client: Client, options: &ConnectOptions, heartbeat: Duration) -> Self {
        let surveys = client
            .database(&options.database)
            .collection::<Document>(SURVEY_COLLECTION);
        Self {
            client,
            database: options.database.clone(),
            surveys,
            socket_timeout: options.socket_timeout,
            heartbeat,
        }
    }

    /// Runs one driver call under the socket timeout.
    async fn bounded<T, F>(&self, operation: &str, call: F) -> Result<T, StoreError>
    where
        F: IntoFuture<Output = Result<T, MongoError>>,
    {
        match tokio::time::timeout(self.socket_timeout, call).await {
            Ok(result) => result.map_err(classify),
            Err(_) => Err(StoreError::Unavailable(format!(
                "{operation} exceeded the socket timeout of {:?}",
                self.socket_timeout
            ))),
        }
    }

    fn surveys_with(&self, durability: &Durability) -> Collection<Document> {
        let acknowledgment = if durability.majority {
            Acknowledgment::Majority
        } else {
            Acknowledgment::Nodes(1)
        };
        let write_concern = WriteConcern::builder()
            .w(acknowledgment)
            .w_timeout(durability.timeout)
            .build();
        self.client
            .database(&self.database)
            .collection_with_options::<Document>(
                SURVEY_COLLECTION,
                CollectionOptions::builder().write_concern(write_concern).build(),
            )
    }
}

#[async_trait]
impl SurveyStore for MongoHandle {
    async fn ping(&self) -> Result<(), StoreError> {
        let database = self.client.database(&self.database);
        self.bounded("ping", database.run_command(doc! { "ping": 1 }))
            .await
            .map(|_| ())
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique_key = IndexOptions::builder().unique(true).sparse(true).build();
        let models = vec![
            IndexModel::builder().keys(doc! { "userEmail": 1 }).build(),
            IndexModel::builder().keys(doc! { "submittedAt": -1 }).build(),
            IndexModel::builder()
                .keys(doc! { "idempotencyKey": 1 })
                .options(unique_key)
                .build(),
        ];
        self.bounded("createIndexes", self.surveys.create_indexes(models))
            .await
            .map(|_| ())
    }

    async fn insert_survey(
        &self,
        draft: &NewSurvey,
        durability: &Durability,
    ) -> Result<SurveyRecord, StoreError> {
        let now = Utc::now();
        let document = to_document(draft, now)?;
        let surveys = self.surveys_with(durability);

        let inserted = self.bounded("insert", surveys.insert_one(&document)).await?;
        let id = match inserted.inserted_id {
            Bson::ObjectId(oid) => oid.to_hex(),
            other => other.to_string(),
        };
        debug!(%id, "survey document inserted");
        Ok(SurveyRecord::from_draft(id, draft, now))
    }

    async fn find_by_idempotency_key(
        &self,
        key: Uuid,
    ) -> Result<Option<SurveyRecord>, StoreError> {
        let filter = doc! { "idempotencyKey": key.to_string() };
        match self.bounded("find", self.surveys.find_one(filter)).await? {
            Some(document) => from_document(&document).map(Some),
            None => Ok(None),
        }
    }

    async fn probe(&self) -> Result<(), StoreError> {
        self.bounded("find", self.surveys.find_one(doc! {}))
            .await
            .map(|_| ())
    }

    async fn closed(&self) -> StoreError {
        loop {
            tokio::time::sleep(self.heartbeat).await;
            if let Err(error) = self.ping().await {
                return error;
            }
        }
    }
}

fn classify(error: MongoError) -> StoreError {
    let message = error.to_string();
    match error.kind.as_ref() {
        ErrorKind::ServerSelection { .. }
        | ErrorKind::Io(_)
        | ErrorKind::ConnectionPoolCleared { .. }
        | ErrorKind::DnsResolve { .. } => StoreError::Unavailable(message),
        ErrorKind::Write(WriteFailure::WriteConcernError(_)) => {
            StoreError::DurabilityTimeout(message)
        }
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE =>
        {
            StoreError::DuplicateKey(message)
        }
        ErrorKind::BsonSerialization(_) | ErrorKind::BsonDeserialization(_) => {
            StoreError::Serialization(message)
        }
        _ => StoreError::Rejected(message),
    }
}

fn to_bson_datetime(at: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(at.timestamp_millis())
}

fn to_chrono(at: &bson::DateTime) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(at.timestamp_millis())
        .single()
        .ok_or_else(|| StoreError::Serialization(format!("timestamp out of range: {at}")))
}

fn to_document(draft: &NewSurvey, now: DateTime<Utc>) -> Result<Document, StoreError> {
    let mut document = Document::new();
    if let Some(name) = &draft.user_name {
        document.insert("userName", name.as_str());
    }
    if let Some(email) = &draft.user_email {
        document.insert("userEmail", email.as_str());
    }
    document.insert("selectedProjects", draft.selected_projects.clone());
    if let Some(comments) = &draft.comments {
        let comments =
            bson::to_bson(comments).map_err(|e| StoreError::Serialization(e.to_string()))?;
        document.insert("comments", comments);
    }
    document.insert("submittedAt", to_bson_datetime(draft.submitted_at));
    document.insert("idempotencyKey", draft.idempotency_key.to_string());
    document.insert("createdAt", to_bson_datetime(now));
    document.insert("updatedAt", to_bson_datetime(now));
    Ok(document)
}

fn bson_integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        Bson::Double(f) if f.fract() == 0.0 => Some(*f as i64),
        _ => None,
    }
}

fn from_document(document: &Document) -> Result<SurveyRecord, StoreError> {
    let conversion = |e: bson::document::ValueAccessError| StoreError::Serialization(e.to_string());

    let id = document.get_object_id("_id").map_err(conversion)?.to_hex();
    let idempotency_key = Uuid::parse_str(document.get_str("idempotencyKey").map_err(conversion)?)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    let submitted_at = to_chrono(document.get_datetime("submittedAt").map_err(conversion)?)?;
    let created_at = match document.get_datetime("createdAt") {
        Ok(at) => to_chrono(at)?,
        Err(_) => submitted_at,
    };
    let updated_at = match document.get_datetime("updatedAt") {
        Ok(at) => to_chrono(at)?,
        Err(_) => created_at,
    };

    Ok(SurveyRecord {
        id,
        user_name: document.get_str("userName").ok().map(str::to_string),
        user_email: document.get_str("userEmail").ok().map(str::to_string),
        selected_projects: document
            .get_array("selectedProjects")
            .map(|items| items.iter().filter_map(bson_integer).collect())
            .unwrap_or_default(),
        comments: document
            .get("comments")
            .map(|comments| comments.clone().into_relaxed_extjson()),
        submitted_at,
        idempotency_key,
        created_at,
        updated_at,
    })
}
