//! Service broker reconciliation
//!
//! An application may declare that it implements a service broker. The
//! broker is registered when absent and updated otherwise, since the
//! platform never reports the password needed to detect a change.

use mta_types::{
    DeployError, DeployResult, DeploymentPolicy, DesiredApplication, DesiredServiceBroker,
    ExistingServiceBroker, ServiceBrokerAction, STATUS_BAD_GATEWAY, STATUS_FORBIDDEN,
    STATUS_NOT_IMPLEMENTED,
};
use tracing::warn;

/// Build the broker registration declared by an application, if any.
pub fn resolve_broker(app: &DesiredApplication) -> DeployResult<Option<DesiredServiceBroker>> {
    let spec = match &app.service_broker {
        Some(spec) => spec,
        None => return Ok(None),
    };

    let required = |value: &Option<String>, attribute: &str| {
        value.clone().ok_or_else(|| {
            DeployError::content(format!(
                "Missing service broker {attribute} for application {}",
                app.name
            ))
            .with_resource(&app.name)
        })
    };

    Ok(Some(DesiredServiceBroker {
        name: spec.name.clone().unwrap_or_else(|| app.name.clone()),
        username: required(&spec.username, "username")?,
        password: required(&spec.password, "password")?,
        url: required(&spec.url, "url")?,
        space_scoped: spec.space_scoped,
    }))
}

/// What to do with one broker registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerDecision {
    pub action: ServiceBrokerAction,
    pub warnings: Vec<String>,
}

/// Create when absent, update when present.
pub fn decide_broker(
    desired: &DesiredServiceBroker,
    existing: &[ExistingServiceBroker],
) -> BrokerDecision {
    let found = match existing.iter().find(|b| b.name == desired.name) {
        Some(found) => found,
        None => {
            return BrokerDecision {
                action: ServiceBrokerAction::Create,
                warnings: Vec::new(),
            }
        }
    };

    let mut warnings = Vec::new();
    if found.space_scoped != desired.space_scoped {
        let message = if desired.space_scoped {
            format!(
                "Service broker {} is registered globally and cannot be made space-scoped; visibility stays unchanged",
                desired.name
            )
        } else {
            format!(
                "Service broker {} is space-scoped and cannot be made global; visibility stays unchanged",
                desired.name
            )
        };
        warn!(broker = %desired.name, "{}", message);
        warnings.push(message);
    }

    BrokerDecision {
        action: ServiceBrokerAction::Update,
        warnings,
    }
}

/// How a failed broker call should be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerFailure {
    /// Continue the run with a warning
    Tolerated(String),
    /// Stop the run
    Fatal(DeployError),
}

/// Classify a failed create or update of a broker registration.
pub fn classify_broker_error(
    broker_name: &str,
    action: ServiceBrokerAction,
    error: DeployError,
    policy: &DeploymentPolicy,
) -> BrokerFailure {
    let error = error.with_resource(broker_name).with_action(action);
    match (error.status, action) {
        (Some(STATUS_NOT_IMPLEMENTED), ServiceBrokerAction::Update) => BrokerFailure::Tolerated(
            format!(
                "The platform does not support updating service brokers; {broker_name} was not updated"
            ),
        ),
        (Some(STATUS_FORBIDDEN), _) if policy.no_fail_on_missing_permissions => {
            BrokerFailure::Tolerated(format!(
                "Missing permissions to {action} service broker {broker_name}; continuing as requested"
            ))
        }
        (Some(STATUS_FORBIDDEN), _) => BrokerFailure::Fatal(DeployError {
            message: format!(
                "Missing permissions to {action} service broker {broker_name}: {}",
                error.message
            ),
            ..error
        }),
        (Some(STATUS_BAD_GATEWAY), _) => BrokerFailure::Fatal(DeployError {
            message: format!(
                "Service broker {broker_name} could not be reached or returned an invalid response: {}",
                error.message
            ),
            ..error
        }),
        _ => BrokerFailure::Fatal(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mta_types::{ErrorKind, ServiceBrokerSpec};

    fn broker_app() -> DesiredApplication {
        let mut app = DesiredApplication::new("broker-app", "broker");
        app.service_broker = Some(ServiceBrokerSpec {
            name: None,
            username: Some("admin".into()),
            password: Some("secret".into()),
            url: Some("https://broker.example.com".into()),
            space_scoped: false,
        });
        app
    }

    #[test]
    fn test_name_defaults_to_application() {
        let broker = resolve_broker(&broker_app()).unwrap().unwrap();
        assert_eq!(broker.name, "broker-app");
        assert!(resolve_broker(&DesiredApplication::new("web", "web"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_missing_attribute_is_content_error() {
        let mut app = broker_app();
        if let Some(spec) = app.service_broker.as_mut() {
            spec.password = None;
        }
        let err = resolve_broker(&app).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Content);
        assert!(err.message.contains("password"));
    }

    #[test]
    fn test_create_or_update() {
        let broker = resolve_broker(&broker_app()).unwrap().unwrap();
        assert_eq!(decide_broker(&broker, &[]).action, ServiceBrokerAction::Create);

        let existing = ExistingServiceBroker {
            name: "broker-app".into(),
            url: "https://old".into(),
            username: "admin".into(),
            space_scoped: true,
        };
        let decision = decide_broker(&broker, &[existing]);
        assert_eq!(decision.action, ServiceBrokerAction::Update);
        assert_eq!(decision.warnings.len(), 1);
    }

    #[test]
    fn test_error_classification() {
        let strict = DeploymentPolicy::default();
        let tolerant = DeploymentPolicy {
            no_fail_on_missing_permissions: true,
            ..Default::default()
        };
        let status = |code| DeployError::platform("rejected").with_status(code);

        assert!(matches!(
            classify_broker_error("b", ServiceBrokerAction::Update, status(501), &strict),
            BrokerFailure::Tolerated(_)
        ));
        assert!(matches!(
            classify_broker_error("b", ServiceBrokerAction::Create, status(501), &strict),
            BrokerFailure::Fatal(_)
        ));
        assert!(matches!(
            classify_broker_error("b", ServiceBrokerAction::Create, status(403), &tolerant),
            BrokerFailure::Tolerated(_)
        ));
        assert!(matches!(
            classify_broker_error("b", ServiceBrokerAction::Update, status(403), &strict),
            BrokerFailure::Fatal(_)
        ));
        match classify_broker_error("b", ServiceBrokerAction::Update, status(502), &tolerant) {
            BrokerFailure::Fatal(err) => {
                assert_eq!(err.resource.as_deref(), Some("b"));
                assert!(err.message.contains("could not be reached"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
