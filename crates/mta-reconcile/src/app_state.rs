//! Run-state actions for a single application
//!
//! Two calculators decide what to do with an application's run state. The
//! "changed" calculator is used whenever a change the application cares about
//! (per its restart parameters) was detected; it always restages. The
//! "unchanged" calculator only moves the application between run states.

use mta_types::{
    ActionSet, ApplicationStartupState, ApplicationStateAction, RestartParameters,
};
use tracing::debug;

/// Changes detected between the desired and the existing application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeFlags {
    /// Environment differs
    pub env: bool,
    /// Service bindings differ
    pub services: bool,
    /// Routes differ
    pub routes: bool,
    /// New application bits or staging settings; always forces a restage
    pub content: bool,
}

impl ChangeFlags {
    /// Whether any change is relevant under the given restart parameters.
    pub fn triggers_restage(&self, restart: &RestartParameters) -> bool {
        self.content
            || (self.env && restart.on_env_change)
            || (self.services && restart.on_service_change)
            || (self.routes && restart.on_route_change)
    }
}

/// Computes run-state actions for one combination of states.
pub trait ActionCalculator: Send + Sync {
    fn determine(
        &self,
        current: ApplicationStartupState,
        desired: ApplicationStartupState,
    ) -> ActionSet<ApplicationStateAction>;

    fn name(&self) -> &str;
}

fn is_stopped(state: ApplicationStartupState) -> bool {
    matches!(
        state,
        ApplicationStartupState::Stopped | ApplicationStartupState::Executed
    )
}

/// Used when nothing relevant changed.
pub struct UnchangedApplicationActionCalculator;

impl ActionCalculator for UnchangedApplicationActionCalculator {
    fn determine(
        &self,
        current: ApplicationStartupState,
        desired: ApplicationStartupState,
    ) -> ActionSet<ApplicationStateAction> {
        use ApplicationStartupState::*;
        use ApplicationStateAction::*;

        let mut actions = ActionSet::new();
        match desired {
            Stopped => {
                if !is_stopped(current) {
                    actions.insert(Stop);
                }
            }
            Executed => {
                if current != Executed {
                    if !is_stopped(current) {
                        actions.insert(Stop);
                    }
                    actions.insert(Start);
                    actions.insert(Execute);
                }
            }
            Started | Inconsistent => {
                if current != Started {
                    actions.insert(Start);
                }
            }
        }
        if actions.is_empty() {
            actions.insert(Keep);
        }
        actions
    }

    fn name(&self) -> &str {
        "unchanged"
    }
}

/// Used when a relevant change requires a restage.
pub struct ChangedApplicationActionCalculator;

impl ActionCalculator for ChangedApplicationActionCalculator {
    fn determine(
        &self,
        current: ApplicationStartupState,
        desired: ApplicationStartupState,
    ) -> ActionSet<ApplicationStateAction> {
        use ApplicationStartupState::*;
        use ApplicationStateAction::*;

        let mut actions = ActionSet::new();
        actions.insert(Restage);
        if !is_stopped(current) {
            actions.insert(Stop);
        }
        match desired {
            Stopped => {}
            Executed => {
                actions.insert(Start);
                actions.insert(Execute);
            }
            Started | Inconsistent => {
                actions.insert(Start);
            }
        }
        actions
    }

    fn name(&self) -> &str {
        "changed"
    }
}

/// Pick the calculator for the detected changes.
pub fn create_calculator(
    changes: &ChangeFlags,
    restart: &RestartParameters,
) -> Box<dyn ActionCalculator> {
    if changes.triggers_restage(restart) {
        Box::new(ChangedApplicationActionCalculator)
    } else {
        Box::new(UnchangedApplicationActionCalculator)
    }
}

/// Decides START/STOP/RESTAGE/EXECUTE/KEEP for one application.
pub struct ApplicationStateReconciler;

impl ApplicationStateReconciler {
    pub fn decide(
        app_name: &str,
        current: ApplicationStartupState,
        desired: ApplicationStartupState,
        changes: &ChangeFlags,
        restart: &RestartParameters,
    ) -> ActionSet<ApplicationStateAction> {
        let calculator = create_calculator(changes, restart);
        let actions = calculator.determine(current, desired);

        debug!(
            app = %app_name,
            current = %current,
            desired = %desired,
            calculator = calculator.name(),
            actions = %actions,
            "Determined application state actions"
        );

        actions
    }
}
