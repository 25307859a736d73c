//! Service registry.
//!
//! Services are named `domain.service` actions invoked with a JSON payload.
//! Each service declares the payload it accepts; payloads are validated
//! before the handler runs. The tracker registers its enable and disable
//! actions here.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use btpresence_core::control::{DOMAIN, ENTITY_ID, SERVICE_TURN_OFF, SERVICE_TURN_ON};
use btpresence_core::TrackerControl;
use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

/// `domain.object_id`, lowercase.
static ENTITY_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]+\.[a-z0-9_]+$").expect("valid entity id regex"));

/// Errors raised while invoking a service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No service is registered under this name.
    #[error("Service not found: {domain}.{service}")]
    NotFound {
        /// Requested domain.
        domain: String,
        /// Requested service.
        service: String,
    },

    /// The payload does not match the service's schema.
    #[error("Invalid service data: {0}")]
    InvalidData(String),
}

/// Payload accepted by a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ServiceSchema {
    /// No fields.
    Empty,
    /// An optional `entity_id`: one entity id or a list of them.
    EntityIdFilter,
}

impl ServiceSchema {
    /// Field names this schema accepts.
    #[must_use]
    pub const fn fields(self) -> &'static [&'static str] {
        match self {
            Self::Empty => &[],
            Self::EntityIdFilter => &["entity_id"],
        }
    }

    /// Validate `data` and extract the entity filter.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidData`] for unknown fields, non-object
    /// payloads, or malformed entity ids.
    pub fn validate(self, data: &Value) -> Result<Option<Vec<String>>, ServiceError> {
        let fields = match data {
            Value::Null => return Ok(None),
            Value::Object(fields) => fields,
            other => {
                return Err(ServiceError::InvalidData(format!(
                    "expected an object, got {other}"
                )))
            }
        };

        if let Some(unknown) = fields.keys().find(|k| !self.fields().contains(&k.as_str())) {
            return Err(ServiceError::InvalidData(format!("unknown field '{unknown}'")));
        }

        match fields.get("entity_id") {
            None => Ok(None),
            Some(value) => parse_entity_ids(value).map(Some),
        }
    }
}

fn parse_entity_ids(value: &Value) -> Result<Vec<String>, ServiceError> {
    let raw: Vec<&str> = match value {
        Value::String(s) => s.split(',').map(str::trim).collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().ok_or_else(|| {
                    ServiceError::InvalidData(format!("entity id must be a string, got {item}"))
                })
            })
            .collect::<Result<_, _>>()?,
        other => {
            return Err(ServiceError::InvalidData(format!(
                "entity_id must be a string or a list, got {other}"
            )))
        }
    };

    raw.into_iter()
        .map(|id| {
            let id = id.to_lowercase();
            if ENTITY_ID_RE.is_match(&id) {
                Ok(id)
            } else {
                Err(ServiceError::InvalidData(format!("invalid entity id '{id}'")))
            }
        })
        .collect()
}

/// A validated service invocation.
#[derive(Debug, Clone)]
pub struct ServiceCall {
    /// Service domain.
    pub domain: String,
    /// Service name.
    pub service: String,
    /// Entity filter, if the caller gave one.
    pub entity_ids: Option<Vec<String>>,
    /// Identifier of this invocation, for log correlation.
    pub context_id: Uuid,
}

impl ServiceCall {
    /// Whether this call applies to `entity_id`. Calls without a filter
    /// apply to every entity.
    #[must_use]
    pub fn targets(&self, entity_id: &str) -> bool {
        self.entity_ids
            .as_ref()
            .map_or(true, |ids| ids.iter().any(|id| id == entity_id))
    }
}

/// Async service handler.
pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> BoxFuture<'static, ()> + Send + Sync>;

/// Public description of a registered service.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ServiceDescription {
    /// Service domain.
    #[schema(example = "device_tracker")]
    pub domain: String,
    /// Service name.
    #[schema(example = "bluetooth_tracker_turn_on")]
    pub service: String,
    /// Accepted payload.
    pub schema: ServiceSchema,
}

struct Registration {
    handler: ServiceHandler,
    schema: ServiceSchema,
}

/// Registry of invocable services.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<BTreeMap<(String, String), Registration>>,
}

impl ServiceRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` as `domain.service`, replacing any previous one.
    pub fn register(
        &self,
        domain: &str,
        service: &str,
        handler: ServiceHandler,
        schema: ServiceSchema,
    ) {
        debug!(%domain, %service, "Registering service");
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        services.insert(
            (domain.to_string(), service.to_string()),
            Registration { handler, schema },
        );
    }

    /// Validate `data` and run the handler to completion.
    ///
    /// Returns the context id assigned to the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is unknown or `data` is invalid.
    pub async fn call(&self, domain: &str, service: &str, data: &Value) -> Result<Uuid, ServiceError> {
        let (handler, schema) = {
            let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
            let registration = services
                .get(&(domain.to_string(), service.to_string()))
                .ok_or_else(|| ServiceError::NotFound {
                    domain: domain.to_string(),
                    service: service.to_string(),
                })?;
            (Arc::clone(&registration.handler), registration.schema)
        };

        let call = ServiceCall {
            domain: domain.to_string(),
            service: service.to_string(),
            entity_ids: schema.validate(data)?,
            context_id: Uuid::now_v7(),
        };
        let context_id = call.context_id;
        info!(%domain, %service, %context_id, entity_ids = ?call.entity_ids, "Calling service");

        handler(call).await;
        Ok(context_id)
    }

    /// All registered services, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<ServiceDescription> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        services
            .iter()
            .map(|((domain, service), registration)| ServiceDescription {
                domain: domain.clone(),
                service: service.clone(),
                schema: registration.schema,
            })
            .collect()
    }
}

/// Register the tracker's turn-on and turn-off services.
///
/// Both accept an optional entity filter; a call whose filter does not name
/// the tracker entity does nothing.
pub fn register_tracker_services(registry: &ServiceRegistry, control: &TrackerControl) {
    let on = control.clone();
    registry.register(
        DOMAIN,
        SERVICE_TURN_ON,
        Arc::new(move |call: ServiceCall| {
            let control = on.clone();
            async move {
                if call.targets(ENTITY_ID) {
                    control.enable();
                } else {
                    debug!(context_id = %call.context_id, "Call does not target the Bluetooth tracker");
                }
            }
            .boxed()
        }),
        ServiceSchema::EntityIdFilter,
    );

    let off = control.clone();
    registry.register(
        DOMAIN,
        SERVICE_TURN_OFF,
        Arc::new(move |call: ServiceCall| {
            let control = off.clone();
            async move {
                if call.targets(ENTITY_ID) {
                    control.disable().await;
                } else {
                    debug!(context_id = %call.context_id, "Call does not target the Bluetooth tracker");
                }
            }
            .boxed()
        }),
        ServiceSchema::EntityIdFilter,
    );
}
