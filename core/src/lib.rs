//! Synchronous client core for a hosted lending-platform API.
//!
//! # Overview
//! Four layers, each using only the ones before it:
//! - `transport`: one logical request with classification and retries.
//! - `paging`: many `offset`/`limit` windows presented as one array.
//! - `custom_field`: flattening of nested custom field values and the
//!   reverse lookup of structural paths.
//! - `patch`: minimal add/replace/remove operations between two snapshots.
//!
//! `LendingClient` wires them together for per-entity wrappers.
//!
//! # Design
//! - Network I/O sits behind the `HttpBackend` trait; `UreqBackend` is the
//!   production implementation and tests script their own.
//! - No call keeps state beyond its own stack frame, except the injected
//!   `RequestCounter`.
//! - Verbs and levels are closed enums, parsed once at the boundary.

pub mod client;
pub mod config;
pub mod counter;
pub mod custom_field;
pub mod entity;
pub mod error;
pub mod http;
pub mod paging;
pub mod patch;
pub mod redact;
pub mod request;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::LendingClient;
pub use config::{Credentials, ServiceConfig, SERVICE_MAX_WINDOW};
pub use counter::RequestCounter;
pub use custom_field::{
    CustomFieldCodec, CustomFieldDefinition, CustomFieldKind, CustomFieldSet, CustomFieldValue,
    FieldPath, FieldState,
};
pub use entity::{Entity, OwnerType, Resource};
pub use error::{Error, Result, UnknownVariant};
pub use http::{ConnectionError, HttpBackend, HttpMethod, HttpRequest, HttpResponse, UreqBackend};
pub use paging::{ArraySplicer, DetailsLevel, PageQuery, PagedFetcher, PaginationDetails, Window};
pub use patch::{PatchDiffer, PatchOperation, PatchVerb};
pub use request::RequestDescriptor;
pub use transport::{backoff_delay, Transport, IDEMPOTENCY_HEADER};
