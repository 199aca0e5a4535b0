//! Entry point for entity wrappers: reads, writes and patches per resource.
//!
//! # Design
//! `LendingClient` owns one `Transport` and builds everything else per call:
//! a `PagedFetcher` for collection reads, a `CustomFieldCodec` loaded with
//! the owner type's set definitions for patches. It keeps no state between
//! calls besides the transport's request counter.

use serde_json::Value;

use crate::config::ServiceConfig;
use crate::custom_field::{CustomFieldCodec, CustomFieldSet};
use crate::entity::{Entity, OwnerType, Resource};
use crate::error::{Error, Result};
use crate::http::{HttpBackend, HttpMethod, UreqBackend};
use crate::paging::{DetailsLevel, PageQuery, PagedFetcher};
use crate::patch::{PatchDiffer, PatchOperation};
use crate::request::RequestDescriptor;
use crate::transport::Transport;

const CUSTOM_FIELD_SETS_PATH: &str = "customfieldsets";

#[derive(Debug)]
pub struct LendingClient<B = UreqBackend> {
    config: ServiceConfig,
    transport: Transport<B>,
}

impl LendingClient<UreqBackend> {
    /// Client over the blocking `ureq` backend.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        Self::with_backend(config, UreqBackend::new())
    }
}

impl<B: HttpBackend> LendingClient<B> {
    pub fn with_backend(config: ServiceConfig, backend: B) -> Result<Self> {
        let transport = Transport::new(backend, &config)?;
        Ok(Self { config, transport })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn transport(&self) -> &Transport<B> {
        &self.transport
    }

    pub fn collection_url(&self, resource: Resource) -> String {
        format!("{}/api/{}", self.config.api_root(), resource.prefix)
    }

    pub fn entity_url(&self, resource: Resource, id: &str) -> String {
        format!("{}/{id}", self.collection_url(resource))
    }

    pub fn fetcher(&self) -> PagedFetcher<'_, B> {
        PagedFetcher::new(&self.transport, self.config.max_window)
    }

    /// Up to `requested` decoded entities (all when 0).
    pub fn fetch_all(
        &self,
        resource: Resource,
        query: &PageQuery,
        requested: usize,
    ) -> Result<Vec<Entity>> {
        let descriptor = query.descriptor(self.collection_url(resource));
        let body = self.fetcher().fetch_all(&descriptor, requested)?;
        let items: Vec<Value> = serde_json::from_slice(&body)
            .map_err(|e| Error::malformed(format!("collection body: {e}")))?;

        let codec = CustomFieldCodec::default();
        items
            .into_iter()
            .map(|item| codec.decode(&Entity::from_value(resource.owner_type, item)?))
            .collect()
    }

    pub fn get(&self, resource: Resource, id: &str, level: DetailsLevel) -> Result<Entity> {
        let descriptor = RequestDescriptor::get(self.entity_url(resource, id))
            .with_param("detailsLevel", level.as_str());
        let body = self.transport.execute(&descriptor)?;
        decode_entity(resource.owner_type, &body)
    }

    pub fn create(&self, resource: Resource, body: Value) -> Result<Entity> {
        let descriptor =
            RequestDescriptor::new(HttpMethod::Post, self.collection_url(resource)).with_body(body);
        let response = self.transport.execute(&descriptor)?;
        decode_entity(resource.owner_type, &response)
    }

    pub fn delete(&self, resource: Resource, id: &str) -> Result<()> {
        let descriptor = RequestDescriptor::new(HttpMethod::Delete, self.entity_url(resource, id));
        self.transport.execute(&descriptor)?;
        Ok(())
    }

    /// Every custom field set definition available to `owner_type`.
    pub fn custom_field_sets(&self, owner_type: OwnerType) -> Result<Vec<CustomFieldSet>> {
        let url = format!("{}/api/{CUSTOM_FIELD_SETS_PATH}", self.config.api_root());
        let descriptor = PageQuery::new()
            .filter("availableFor", owner_type.as_str())
            .details_level(DetailsLevel::Full)
            .descriptor(url);
        let body = self.fetcher().fetch_all(&descriptor, 0)?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::malformed(format!("custom field sets: {e}")))
    }

    /// Diff `original` against `current` and send the result, skipping the
    /// request when there is nothing to change. Returns what was sent.
    pub fn patch<S: AsRef<str>>(
        &self,
        resource: Resource,
        id: &str,
        original: &Entity,
        current: &Entity,
        field_names: &[S],
        autodetect_removals: bool,
    ) -> Result<Vec<PatchOperation>> {
        let codec = CustomFieldCodec::new(self.custom_field_sets(resource.owner_type)?);
        let operations =
            PatchDiffer::new(&codec).diff(original, current, field_names, autodetect_removals)?;
        if operations.is_empty() {
            tracing::debug!(resource = resource.prefix, id, "nothing to patch");
            return Ok(operations);
        }

        let body = serde_json::to_value(&operations).map_err(|e| Error::Serialization {
            message: e.to_string(),
        })?;
        let descriptor = RequestDescriptor::new(HttpMethod::Patch, self.entity_url(resource, id))
            .with_body(body);
        self.transport.execute(&descriptor)?;
        Ok(operations)
    }
}

fn decode_entity(owner_type: OwnerType, body: &[u8]) -> Result<Entity> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::malformed(format!("entity body: {e}")))?;
    CustomFieldCodec::default().decode(&Entity::from_value(owner_type, value)?)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::Credentials;
    use crate::http::HttpResponse;
    use crate::testing::{PagedBackend, ScriptedBackend};

    fn config() -> ServiceConfig {
        ServiceConfig::new("http://localhost:3000/", Credentials::new("api", "pw"))
            .with_max_attempts(2)
            .with_backoff_unit(Duration::ZERO)
    }

    #[test]
    fn urls_are_built_from_trimmed_base() {
        let backend = ScriptedBackend::always(HttpResponse::new(200, "{}"));
        let client = LendingClient::with_backend(config(), backend).unwrap();
        assert_eq!(
            client.collection_url(Resource::LOANS),
            "http://localhost:3000/api/loans"
        );
        assert_eq!(
            client.entity_url(Resource::CLIENTS, "C1"),
            "http://localhost:3000/api/clients/C1"
        );
    }

    #[test]
    fn fetch_all_decodes_every_record() {
        let records = vec![
            json!({"id": "1", "customFieldValues": [{
                "customFieldID": "fieldid",
                "value": "val",
                "customField": {"id": "fieldid", "name": "field"}
            }]}),
            json!({"id": "2"}),
        ];
        let client =
            LendingClient::with_backend(config().with_max_window(1), PagedBackend::new(records, 1))
                .unwrap();

        let entities = client
            .fetch_all(Resource::CLIENTS, &PageQuery::new(), 0)
            .unwrap();

        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].get_str("field"), Some("val"));
        assert_eq!(entities[1].owner_type(), OwnerType::Client);
        assert_eq!(client.transport().counter().get(), 3);
    }

    #[test]
    fn get_sends_details_level() {
        let client = LendingClient::with_backend(
            config(),
            ScriptedBackend::always(HttpResponse::new(200, r#"{"id":"C1"}"#)),
        )
        .unwrap();

        let entity = client.get(Resource::CLIENTS, "C1", DetailsLevel::Full).unwrap();

        assert_eq!(entity.get_str("id"), Some("C1"));
        let sent = &client.transport().backend().requests()[0];
        assert_eq!(sent.url, "http://localhost:3000/api/clients/C1");
        assert!(sent
            .query
            .contains(&("detailsLevel".to_string(), "FULL".to_string())));
    }

    #[test]
    fn get_rejects_non_object_body() {
        let client = LendingClient::with_backend(
            config(),
            ScriptedBackend::always(HttpResponse::new(200, "[]")),
        )
        .unwrap();
        assert!(matches!(
            client.get(Resource::CLIENTS, "C1", DetailsLevel::Basic),
            Err(Error::MalformedResponse { .. })
        ));
    }

    #[test]
    fn empty_patch_skips_the_network() {
        let client = LendingClient::with_backend(
            config(),
            ScriptedBackend::always(HttpResponse::new(200, "[]")),
        )
        .unwrap();
        let entity = Entity::from_value(OwnerType::Client, json!({"a": 1})).unwrap();

        let ops = client
            .patch(Resource::CLIENTS, "C1", &entity, &entity, &["a"], false)
            .unwrap();

        assert!(ops.is_empty());
        let requests = client.transport().backend().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, HttpMethod::Get);
    }

    #[test]
    fn patch_sends_operations_as_json_array() {
        let client = LendingClient::with_backend(
            config(),
            ScriptedBackend::sequence(vec![
                Ok(HttpResponse::new(200, "[]")),
                Ok(HttpResponse::new(204, "")),
            ]),
        )
        .unwrap();
        let original = Entity::from_value(OwnerType::Client, json!({"myProp": "A"})).unwrap();
        let current = Entity::from_value(OwnerType::Client, json!({"myProp": "B"})).unwrap();

        client
            .patch(Resource::CLIENTS, "C1", &original, &current, &["myProp"], false)
            .unwrap();

        let requests = client.transport().backend().requests();
        assert_eq!(requests[1].method, HttpMethod::Patch);
        let body: Value = serde_json::from_slice(requests[1].body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!([{"op": "replace", "path": "/myProp", "value": "B"}]));
    }
}
