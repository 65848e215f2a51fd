pub mod coordinator;
pub mod drivers;
pub mod lifecycle;
pub mod updater;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::Driver;
use crate::store::{Collection, Document, DocumentStore};

pub(crate) fn encode<T: Serialize>(record: &T) -> Result<Document, AppError> {
    match serde_json::to_value(record) {
        Ok(Value::Object(doc)) => Ok(doc),
        Ok(other) => Err(AppError::Internal(format!(
            "record encoded to non-object json: {other}"
        ))),
        Err(err) => Err(AppError::Internal(format!("failed to encode record: {err}"))),
    }
}

pub(crate) fn decode<T: DeserializeOwned>(collection: Collection, doc: Document) -> Result<T, AppError> {
    serde_json::from_value(Value::Object(doc))
        .map_err(|err| AppError::Internal(format!("corrupt {collection} record: {err}")))
}

pub(crate) async fn load_driver(store: &dyn DocumentStore, id: Uuid) -> Result<Driver, AppError> {
    let doc = store
        .read(Collection::Drivers, &id.to_string())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    decode(Collection::Drivers, doc)
}
