use super::PlatformResultExt;
use crate::step::{Step, StepContext};
use async_trait::async_trait;
use mta_reconcile::{classify_broker_error, decide_broker, resolve_broker, BrokerFailure};
use mta_types::{DeployError, DeployResult, DesiredServiceBroker, ServiceBrokerAction, StepOutcome};

/// Registers the service brokers declared by the deployed applications.
pub struct ServiceBrokersStep;

#[async_trait]
impl Step for ServiceBrokersStep {
    fn name(&self) -> &'static str {
        "register-service-brokers"
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> DeployResult<StepOutcome> {
        let desired = ctx.desired_state().await?;

        let mut brokers = Vec::new();
        for app in desired
            .applications
            .iter()
            .filter(|a| desired.includes_module(&a.module_name))
        {
            if let Some(broker) = resolve_broker(app)? {
                brokers.push(broker);
            }
        }
        if brokers.is_empty() {
            return Ok(StepOutcome::Done);
        }

        let existing = ctx
            .reader()
            .list_service_brokers()
            .await
            .for_resource(desired.package_id.as_str(), "list service brokers")?;

        for broker in &brokers {
            let decision = decide_broker(broker, &existing);
            for warning in decision.warnings {
                ctx.log.warn(warning).await;
            }
            if let Err(err) = self.apply(ctx, broker, decision.action).await {
                match classify_broker_error(&broker.name, decision.action, err, ctx.policy()) {
                    BrokerFailure::Tolerated(message) => ctx.log.warn(message).await,
                    BrokerFailure::Fatal(err) => return Err(err),
                }
            }
        }

        Ok(StepOutcome::Done)
    }
}

impl ServiceBrokersStep {
    async fn apply(
        &self,
        ctx: &StepContext<'_>,
        broker: &DesiredServiceBroker,
        action: ServiceBrokerAction,
    ) -> DeployResult<()> {
        let result = match action {
            ServiceBrokerAction::Create => {
                ctx.log
                    .info(format!("Creating service broker {}", broker.name))
                    .await;
                ctx.mutator().create_service_broker(broker).await
            }
            ServiceBrokerAction::Update => {
                ctx.log
                    .info(format!("Updating service broker {}", broker.name))
                    .await;
                ctx.mutator().update_service_broker(broker).await
            }
        };
        result.map_err(DeployError::from)
    }
}
