//! Blue-green color coordination
//!
//! A blue-green run deploys a new generation of applications next to the
//! live one. The new generation takes the idle color; once it is healthy the
//! previous generation is removed.
//!
//! When original application names are kept, `-live`/`-idle` suffixes are
//! used instead of colors and the new generation is renamed back to the
//! original names at the end of the run.

use mta_types::{
    ApplicationColor, DeployedApplication, DeployedPackage, DesiredState, LegacySuffix,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// How the live color was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSource {
    /// Nothing deployed yet
    NoPriorGeneration,
    /// Every deployed application carries the same color
    SingleColor,
    /// Both colors deployed, operator named the live one
    OperatorOverride,
    /// Both colors deployed, the color serving the primary routes wins
    RoutingTarget,
    /// Both colors deployed, the color of the oldest application wins
    OldestGeneration,
}

impl std::fmt::Display for ColorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColorSource::NoPriorGeneration => write!(f, "no prior generation"),
            ColorSource::SingleColor => write!(f, "single color"),
            ColorSource::OperatorOverride => write!(f, "operator override"),
            ColorSource::RoutingTarget => write!(f, "routing target"),
            ColorSource::OldestGeneration => write!(f, "oldest generation"),
        }
    }
}

/// Result of live color detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorDetection {
    pub live: Option<ApplicationColor>,

    /// Color of the generation being deployed
    pub idle: ApplicationColor,

    pub source: ColorSource,

    /// The live color was guessed; an operator should confirm it
    pub needs_confirmation: bool,

    pub warnings: Vec<String>,
}

/// A name change applied to a desired or deployed application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRename {
    pub module_name: String,
    pub from: String,
    pub to: String,
}

/// Names assigned to the new generation and the fate of the old one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorPlan {
    pub renames: Vec<AppRename>,

    /// Previous-generation applications replaced by the new generation
    pub removal_candidates: Vec<String>,

    /// Deployed applications whose module is no longer declared
    pub obsolete: Vec<String>,
}

/// Detects live/idle colors and names the new generation.
pub struct BlueGreenColorCoordinator {
    color_override: Option<ApplicationColor>,
}

impl BlueGreenColorCoordinator {
    pub fn new(color_override: Option<ApplicationColor>) -> Self {
        Self { color_override }
    }

    /// Determine the live color of the deployed generation.
    ///
    /// Never fails: an ambiguous deployment falls back to the operator
    /// override, then the color serving `primary_routes`, then the color of
    /// the oldest application.
    pub fn detect(
        &self,
        deployed: Option<&DeployedPackage>,
        primary_routes: &[String],
    ) -> ColorDetection {
        let apps: &[DeployedApplication] =
            deployed.map(|d| d.applications.as_slice()).unwrap_or(&[]);
        let colors: BTreeSet<ApplicationColor> =
            apps.iter().filter_map(|a| a.effective_color()).collect();

        let detection = match colors.len() {
            0 => ColorDetection {
                live: None,
                idle: ApplicationColor::default(),
                source: ColorSource::NoPriorGeneration,
                needs_confirmation: false,
                warnings: Vec::new(),
            },
            1 => {
                let live = colors.iter().next().copied().unwrap_or_default();
                ColorDetection {
                    live: Some(live),
                    idle: live.alternative(),
                    source: ColorSource::SingleColor,
                    needs_confirmation: false,
                    warnings: Vec::new(),
                }
            }
            _ => self.resolve_ambiguous(apps, primary_routes),
        };

        info!(
            live = ?detection.live,
            idle = %detection.idle,
            source = %detection.source,
            "Detected blue-green colors"
        );
        detection
    }

    fn resolve_ambiguous(
        &self,
        apps: &[DeployedApplication],
        primary_routes: &[String],
    ) -> ColorDetection {
        let (live, source) = if let Some(color) = self.color_override {
            (color, ColorSource::OperatorOverride)
        } else if let Some(color) = routing_target(apps, primary_routes) {
            (color, ColorSource::RoutingTarget)
        } else {
            (oldest_color(apps), ColorSource::OldestGeneration)
        };

        let needs_confirmation = source != ColorSource::OperatorOverride;
        let mut message = format!(
            "Applications of both colors are deployed; assuming {live} is live ({source})"
        );
        if needs_confirmation {
            message.push_str(", set a color override if this is wrong");
        }
        warn!("{}", message);

        ColorDetection {
            live: Some(live),
            idle: live.alternative(),
            source,
            needs_confirmation,
            warnings: vec![message],
        }
    }

    /// Rename the desired applications to the idle color and list the
    /// deployed applications the new generation replaces.
    pub fn assign(
        &self,
        detection: &ColorDetection,
        desired: &mut DesiredState,
        deployed: Option<&DeployedPackage>,
    ) -> ColorPlan {
        let mut plan = ColorPlan::default();
        let mut bases = BTreeSet::new();
        let modules: BTreeSet<String> = desired
            .applications
            .iter()
            .map(|a| a.module_name.clone())
            .collect();

        let scope: Vec<bool> = desired
            .applications
            .iter()
            .map(|a| desired.includes_module(&a.module_name))
            .collect();
        for (app, in_scope) in desired.applications.iter_mut().zip(scope) {
            if !in_scope {
                continue;
            }
            let base = strip_color(&app.name).to_string();
            let name = format!("{base}{}", detection.idle.suffix());
            bases.insert(base);
            if name != app.name {
                plan.renames.push(AppRename {
                    module_name: app.module_name.clone(),
                    from: app.name.clone(),
                    to: name.clone(),
                });
                app.name = name;
            }
        }

        let new_names: BTreeSet<&str> = desired
            .applications
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        for app in deployed.map(|d| d.applications.as_slice()).unwrap_or(&[]) {
            if new_names.contains(app.name.as_str()) {
                continue;
            }
            if bases.contains(strip_color(&app.name)) {
                plan.removal_candidates.push(app.name.clone());
            } else if desired.modules_for_deployment.is_none()
                && !modules.contains(&app.module_name)
            {
                plan.obsolete.push(app.name.clone());
            }
        }

        plan
    }
}

fn strip_color(name: &str) -> &str {
    ApplicationColor::from_app_name(name)
        .and_then(|c| name.strip_suffix(c.suffix()))
        .unwrap_or(name)
}

fn routing_target(
    apps: &[DeployedApplication],
    primary_routes: &[String],
) -> Option<ApplicationColor> {
    let serving: BTreeSet<ApplicationColor> = apps
        .iter()
        .filter(|a| a.routes.iter().any(|r| primary_routes.contains(r)))
        .filter_map(|a| a.effective_color())
        .collect();
    if serving.len() == 1 {
        serving.iter().next().copied()
    } else {
        None
    }
}

fn oldest_color(apps: &[DeployedApplication]) -> ApplicationColor {
    apps.iter()
        .filter_map(|a| a.effective_color().map(|c| (a.created_at, c)))
        .min_by_key(|(created_at, _)| *created_at)
        .map(|(_, color)| color)
        .unwrap_or_default()
}

/// Renames and undeploys needed before a run that keeps original names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyRenamePlan {
    /// Deployed applications to rename to the live suffix
    pub renames: Vec<AppRename>,

    /// Stale applications left over from an earlier run
    pub to_undeploy: Vec<String>,
}

/// Plan the renames of the deployed generation to the `-live` suffix.
///
/// Only applications of modules taking part in the run are renamed. An
/// unsuffixed application whose `-live` counterpart still exists replaces it.
pub fn plan_legacy_renames(
    deployed: Option<&DeployedPackage>,
    desired: &DesiredState,
) -> LegacyRenamePlan {
    let mut plan = LegacyRenamePlan::default();
    let deployed = match deployed {
        Some(deployed) => deployed,
        None => return plan,
    };

    for app in &deployed.applications {
        if !desired.includes_module(&app.module_name) {
            continue;
        }
        if LegacySuffix::from_app_name(&app.name).is_some() {
            continue;
        }
        let live_name = format!("{}{}", app.name, LegacySuffix::Live.suffix());
        if deployed.contains_application(&live_name) {
            plan.to_undeploy.push(live_name.clone());
        }
        plan.renames.push(AppRename {
            module_name: app.module_name.clone(),
            from: app.name.clone(),
            to: live_name,
        });
    }

    plan
}

/// Name the new generation with the `-idle` suffix.
pub fn assign_legacy_idle_names(desired: &mut DesiredState) -> Vec<AppRename> {
    let scope: Vec<bool> = desired
        .applications
        .iter()
        .map(|a| desired.includes_module(&a.module_name))
        .collect();
    let mut renames = Vec::new();
    for (app, in_scope) in desired.applications.iter_mut().zip(scope) {
        if !in_scope || LegacySuffix::from_app_name(&app.name).is_some() {
            continue;
        }
        let name = format!("{}{}", app.name, LegacySuffix::Idle.suffix());
        renames.push(AppRename {
            module_name: app.module_name.clone(),
            from: app.name.clone(),
            to: name.clone(),
        });
        app.name = name;
    }
    renames
}

/// Final swap once the idle generation is healthy: the `-live` application is
/// removed and the `-idle` one takes the original name.
pub fn plan_legacy_finalize(desired: &DesiredState) -> (Vec<String>, Vec<AppRename>) {
    let mut to_delete = Vec::new();
    let mut renames = Vec::new();
    for app in &desired.applications {
        if LegacySuffix::from_app_name(&app.name) != Some(LegacySuffix::Idle) {
            continue;
        }
        let original = LegacySuffix::Idle.strip(&app.name).to_string();
        to_delete.push(format!("{original}{}", LegacySuffix::Live.suffix()));
        renames.push(AppRename {
            module_name: app.module_name.clone(),
            from: app.name.clone(),
            to: original,
        });
    }
    (to_delete, renames)
}
