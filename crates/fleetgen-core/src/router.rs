//! The command router.
//!
//! Operation keys have the form `<AggregateType>.<query|mutation>.<Method>`.
//! Each key binds a handler and the role set it requires. Dispatch runs the
//! permission gate first and never reaches the handler when it refuses.
//! Handler results become `{code: 200, data}`; failures become
//! `{code, error}`, except store timeouts, which are re-thrown.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use fleetgen_types::{
    AggregateType, CallerIdentity, CommandRequest, CommandResponse, OperationType,
    PERMISSION_DENIED_CODE,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use crate::error::CommandError;
use crate::permission::PermissionGate;

/// Boxed future returned by a registered handler.
pub type HandlerFuture = BoxFuture<'static, Result<serde_json::Value, CommandError>>;

/// A registered command handler.
pub type Handler = Arc<dyn Fn(serde_json::Value, CallerIdentity) -> HandlerFuture + Send + Sync>;

/// A parsed operation key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OperationKey {
    /// Aggregate the operation belongs to.
    pub aggregate_type: AggregateType,
    /// Read or write.
    pub operation_type: OperationType,
    /// Method name, e.g. `GeneratorCreateGenerator`.
    pub method: String,
}

impl OperationKey {
    /// A query on `aggregate_type`.
    pub fn query(aggregate_type: AggregateType, method: &str) -> Self {
        Self {
            aggregate_type,
            operation_type: OperationType::Query,
            method: method.to_owned(),
        }
    }

    /// A mutation on `aggregate_type`.
    pub fn mutation(aggregate_type: AggregateType, method: &str) -> Self {
        Self {
            aggregate_type,
            operation_type: OperationType::Mutation,
            method: method.to_owned(),
        }
    }

    /// Parse `<AggregateType>.<query|mutation>.<Method>`.
    pub fn parse(key: &str) -> Result<Self, CommandError> {
        let mut parts = key.splitn(3, '.');
        let (Some(aggregate), Some(operation), Some(method)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(CommandError::UnknownOperation(key.to_owned()));
        };

        let aggregate_type = AggregateType::parse(aggregate)
            .ok_or_else(|| CommandError::UnknownOperation(key.to_owned()))?;
        let operation_type = OperationType::parse(operation)
            .ok_or_else(|| CommandError::UnknownOperation(key.to_owned()))?;
        if method.is_empty() {
            return Err(CommandError::UnknownOperation(key.to_owned()));
        }

        Ok(Self {
            aggregate_type,
            operation_type,
            method: method.to_owned(),
        })
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.aggregate_type,
            self.operation_type.as_str(),
            self.method
        )
    }
}

struct Route {
    required_roles: BTreeSet<String>,
    handler: Handler,
}

/// Maps operation keys to permission-gated handlers.
pub struct CommandRouter {
    routes: BTreeMap<OperationKey, Route>,
    gate: Arc<dyn PermissionGate>,
}

impl CommandRouter {
    /// Create an empty router guarded by `gate`.
    pub fn new(gate: Arc<dyn PermissionGate>) -> Self {
        Self {
            routes: BTreeMap::new(),
            gate,
        }
    }

    /// Bind `handler` to `key`, requiring one of `required_roles`.
    ///
    /// Registering the same key twice replaces the earlier handler.
    pub fn register<F, Fut>(
        &mut self,
        key: OperationKey,
        required_roles: BTreeSet<String>,
        handler: F,
    )
    where
        F: Fn(serde_json::Value, CallerIdentity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, CommandError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args, identity| handler(args, identity).boxed());
        self.routes.insert(
            key,
            Route {
                required_roles,
                handler,
            },
        );
    }

    /// Registered operation keys, in order.
    pub fn operations(&self) -> impl Iterator<Item = &OperationKey> {
        self.routes.keys()
    }

    /// Run one command.
    ///
    /// Returns `Err` only for re-thrown store timeouts; every other
    /// outcome is an envelope.
    pub async fn dispatch(&self, request: CommandRequest) -> Result<CommandResponse, CommandError> {
        let route = match OperationKey::parse(&request.operation) {
            Ok(key) => self.routes.get(&key),
            Err(_) => None,
        };
        let Some(route) = route else {
            warn!(operation = %request.operation, "Unknown operation");
            let err = CommandError::UnknownOperation(request.operation);
            return Ok(CommandResponse::failure(err.code(), err.to_string()));
        };

        if !self.gate.allows(&request.identity, &route.required_roles).await {
            warn!(
                operation = %request.operation,
                caller = %request.identity.display_name,
                "Permission denied"
            );
            return Ok(CommandResponse::failure(
                PERMISSION_DENIED_CODE,
                format!("permission denied for {}", request.operation),
            ));
        }

        debug!(
            operation = %request.operation,
            caller = %request.identity.display_name,
            "Dispatching command"
        );
        match (route.handler)(request.args, request.identity).await {
            Ok(data) => Ok(CommandResponse::success(data)),
            Err(e) if e.is_rethrown() => {
                error!(operation = %request.operation, error = %e, "Store timeout, re-throwing");
                Err(e)
            }
            Err(e) => {
                error!(operation = %request.operation, error = %e, "Command failed");
                Ok(CommandResponse::failure(e.code(), e.to_string()))
            }
        }
    }
}

/// Deserialize handler arguments, reporting failures as bad requests.
pub fn parse_args<T: serde::de::DeserializeOwned>(
    args: serde_json::Value,
) -> Result<T, CommandError> {
    // Gateways send `null` for operations without arguments.
    let args = if args.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| CommandError::InvalidArguments(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use fleetgen_db::DbError;
    use serde_json::json;

    use super::*;
    use crate::permission::RoleGate;

    fn roles(name: &str) -> BTreeSet<String> {
        BTreeSet::from([name.to_owned()])
    }

    fn request(operation: &str, roles: &[&str]) -> CommandRequest {
        CommandRequest {
            operation: operation.to_owned(),
            args: json!({"x": 1}),
            identity: CallerIdentity::new("alice", roles.iter().copied()),
        }
    }

    #[test]
    fn operation_keys_round_trip() {
        let key = OperationKey::parse("Generator.mutation.GeneratorCreateGenerator").unwrap();
        assert_eq!(key.aggregate_type, AggregateType::Generator);
        assert_eq!(key.operation_type, OperationType::Mutation);
        assert_eq!(key.to_string(), "Generator.mutation.GeneratorCreateGenerator");
    }

    #[test]
    fn malformed_keys_are_rejected() {
        for key in ["", "Generator", "Generator.query", "Boat.query.X", "Generator.read.X", "Generator.query."] {
            assert!(OperationKey::parse(key).is_err(), "{key}");
        }
    }

    #[tokio::test]
    async fn success_is_wrapped() {
        let mut router = CommandRouter::new(Arc::new(RoleGate));
        router.register(
            OperationKey::query(AggregateType::Generator, "Echo"),
            roles("READ"),
            |args, identity| async move { Ok(json!({"args": args, "user": identity.display_name})) },
        );

        let response = router
            .dispatch(request("Generator.query.Echo", &["READ"]))
            .await
            .unwrap();
        assert_eq!(response.code, 200);
        assert_eq!(response.data, Some(json!({"args": {"x": 1}, "user": "alice"})));
    }

    #[tokio::test]
    async fn denied_callers_never_reach_the_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = CommandRouter::new(Arc::new(RoleGate));
        let counter = Arc::clone(&calls);
        router.register(
            OperationKey::mutation(AggregateType::Generator, "Touch"),
            roles("WRITE"),
            move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(serde_json::Value::Null) }
            },
        );

        let response = router
            .dispatch(request("Generator.mutation.Touch", &["READ"]))
            .await
            .unwrap();
        assert_eq!(response.code, 2);
        assert!(response.data.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_errors_become_envelopes() {
        let mut router = CommandRouter::new(Arc::new(RoleGate));
        router.register(
            OperationKey::query(AggregateType::Vehicle, "Missing"),
            roles("READ"),
            |_, _| async { Err(CommandError::NotFound(String::from("v1"))) },
        );

        let response = router
            .dispatch(request("Vehicle.query.Missing", &["READ"]))
            .await
            .unwrap();
        assert_eq!(response.code, 404);
        assert!(response.error.unwrap().msg.contains("v1"));
    }

    #[tokio::test]
    async fn store_timeouts_are_rethrown() {
        let mut router = CommandRouter::new(Arc::new(RoleGate));
        router.register(
            OperationKey::query(AggregateType::Vehicle, "Slow"),
            roles("READ"),
            |_, _| async { Err(CommandError::from_store(DbError::Timeout(String::from("slow")))) },
        );

        let result = router.dispatch(request("Vehicle.query.Slow", &["READ"])).await;
        assert!(matches!(result, Err(CommandError::StoreTimeout(_))));
    }

    #[tokio::test]
    async fn unknown_operations_are_bad_requests() {
        let router = CommandRouter::new(Arc::new(RoleGate));
        let response = router
            .dispatch(request("Vehicle.query.Nope", &["READ"]))
            .await
            .unwrap();
        assert_eq!(response.code, 400);
    }

    #[test]
    fn null_args_parse_as_empty_object() {
        #[derive(serde::Deserialize)]
        struct NoArgs {}
        assert!(parse_args::<NoArgs>(serde_json::Value::Null).is_ok());
        assert!(matches!(
            parse_args::<u32>(json!("nope")),
            Err(CommandError::InvalidArguments(_))
        ));
    }
}
