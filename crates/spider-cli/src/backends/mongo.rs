//! Results cache on MongoDB.

use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{Document, doc};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::ClientOptions;
use mongodb::{Client, Database, IndexModel};
use spider_core::ports::{IndexSpec, ResultsCache};
use spider_core::{Result, SpiderError};
use tracing::{debug, info};

/// Replica set created on a fresh single-node server.
const REPLICA_SET: &str = "rs0";
const NAMESPACE_NOT_FOUND: i32 = 26;
/// How long a freshly initiated node gets to elect itself.
const PRIMARY_POLL_ATTEMPTS: u32 = 60;
const PRIMARY_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct MongoResultsCache {
    client: Client,
    database: Database,
}

impl MongoResultsCache {
    /// Connect directly to the node named in `uri`. The URI must name the
    /// database.
    pub async fn connect(uri: &str) -> Result<Self> {
        let mut options = ClientOptions::parse(uri).await.map_err(store_error)?;
        options.direct_connection = Some(true);
        let client = Client::with_options(options).map_err(store_error)?;
        let database = client
            .default_database()
            .ok_or_else(|| SpiderError::Config(format!("results cache uri {uri} names no database")))?;
        Ok(Self { client, database })
    }

    /// Poll `hello` until the node accepts writes. Index builds issued
    /// before that fail with NotWritablePrimary.
    async fn wait_for_primary(&self) -> Result<()> {
        let admin = self.client.database("admin");
        for attempt in 1..=PRIMARY_POLL_ATTEMPTS {
            let hello = admin
                .run_command(doc! { "hello": 1 }, None)
                .await
                .map_err(store_error)?;
            if is_writable_primary(&hello) {
                return Ok(());
            }
            debug!(attempt, "waiting for the replica set to elect a primary");
            tokio::time::sleep(PRIMARY_POLL_INTERVAL).await;
        }
        Err(SpiderError::Store(format!(
            "replica set {REPLICA_SET} elected no primary after {PRIMARY_POLL_ATTEMPTS} polls"
        )))
    }
}

/// Servers older than 4.4 answer `hello` with only the legacy `ismaster`.
fn is_writable_primary(hello: &Document) -> bool {
    hello
        .get_bool("isWritablePrimary")
        .or_else(|_| hello.get_bool("ismaster"))
        .unwrap_or(false)
}

fn store_error(err: MongoError) -> SpiderError {
    SpiderError::Store(err.to_string())
}

fn command_code(err: &MongoError) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        _ => None,
    }
}

fn keys_document(spec: &IndexSpec) -> Document {
    let mut keys = Document::new();
    for key in &spec.keys {
        keys.insert(key.clone(), 1);
    }
    keys
}

#[async_trait]
impl ResultsCache for MongoResultsCache {
    async fn ensure_replica_set(&self) -> Result<bool> {
        let admin = self.client.database("admin");
        match admin.run_command(doc! { "replSetGetStatus": 1 }, None).await {
            Ok(_) => Ok(false),
            Err(err) if command_code(&err).is_some() => {
                admin
                    .run_command(
                        doc! {
                            "replSetInitiate": {
                                "_id": REPLICA_SET,
                                "members": [{ "_id": 0, "host": "localhost:27017" }],
                            }
                        },
                        None,
                    )
                    .await
                    .map_err(store_error)?;
                self.wait_for_primary().await?;
                info!(replica_set = REPLICA_SET, "replica set initiated");
                Ok(true)
            }
            Err(err) => Err(store_error(err)),
        }
    }

    async fn index_names(&self, collection: &str) -> Result<Vec<String>> {
        let collection = self.database.collection::<Document>(collection);
        match collection.list_index_names().await {
            Ok(names) => Ok(names),
            Err(err) if command_code(&err) == Some(NAMESPACE_NOT_FOUND) => Ok(Vec::new()),
            Err(err) => Err(store_error(err)),
        }
    }

    async fn create_indexes(&self, collection: &str, indexes: &[IndexSpec]) -> Result<()> {
        if indexes.is_empty() {
            return Ok(());
        }
        let models: Vec<IndexModel> = indexes
            .iter()
            .map(|spec| IndexModel::builder().keys(keys_document(spec)).build())
            .collect();
        self.database
            .collection::<Document>(collection)
            .create_indexes(models, None)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}
