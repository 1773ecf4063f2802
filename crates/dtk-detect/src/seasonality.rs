//! Seasonality-group adaptive confidence intervals.
//!
//! For each configured component the window is partitioned by the joint
//! value of its seasonality columns; the group containing the current
//! position contributes multiplicative adjustments to the global
//! center/scale. Multipliers (rather than per-group absolute statistics)
//! keep the global distribution center stable while letting each seasonal
//! bucket tighten or widen its interval.

use dtk_common::SeasonalityData;
use serde::Deserialize;
use serde_json::json;

use crate::detectors::StatFamily;
use crate::EPSILON;

/// One component: a single column or an interaction of columns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SeasonalityComponent {
    Column(String),
    Interaction(Vec<String>),
}

impl SeasonalityComponent {
    pub fn columns(&self) -> &[String] {
        match self {
            SeasonalityComponent::Column(c) => std::slice::from_ref(c),
            SeasonalityComponent::Interaction(cs) => cs,
        }
    }

    pub fn label(&self) -> String {
        self.columns().join("*")
    }

    /// Joint key of this component at one position, or `None` when any
    /// column is absent from the blob.
    fn key(&self, data: &SeasonalityData) -> Option<String> {
        let mut parts = Vec::with_capacity(self.columns().len());
        for column in self.columns() {
            let value = data.get(column)?;
            parts.push(match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
        Some(parts.join("|"))
    }
}

/// Result of applying every component at one position.
pub struct Adjustment {
    pub center: f64,
    pub scale: f64,
    /// Per-component records for detection metadata.
    pub groups: Vec<serde_json::Value>,
}

/// Adjust the global `(center, scale)` for the position whose seasonality
/// blob is `current`.
///
/// `samples` are the finite window samples: (window index, value, weight).
/// `seasonality` is indexed by window position. Groups smaller than
/// `min_samples_per_group` are skipped.
#[allow(clippy::too_many_arguments)]
pub fn adjust(
    family: StatFamily,
    global_center: f64,
    global_scale: f64,
    components: &[SeasonalityComponent],
    samples: &[(usize, f64, f64)],
    seasonality: &[SeasonalityData],
    current: &SeasonalityData,
    min_samples_per_group: usize,
) -> Adjustment {
    let mut center = global_center;
    let mut scale = global_scale;
    let mut groups = Vec::with_capacity(components.len());

    for component in components {
        let Some(current_key) = component.key(current) else {
            groups.push(json!({
                "component": component.label(),
                "skipped": "missing_columns",
            }));
            continue;
        };

        let mut values = Vec::new();
        let mut weights = Vec::new();
        for &(idx, value, weight) in samples {
            if seasonality
                .get(idx)
                .and_then(|data| component.key(data))
                .is_some_and(|key| key == current_key)
            {
                values.push(value);
                weights.push(weight);
            }
        }

        if values.len() < min_samples_per_group {
            groups.push(json!({
                "component": component.label(),
                "group": current_key,
                "group_size": values.len(),
                "skipped": "insufficient_group_samples",
            }));
            continue;
        }

        let (group_center, group_scale) = family.center_scale(&values, &weights);
        let center_multiplier = if global_center.abs() < EPSILON {
            1.0
        } else {
            group_center / global_center
        };
        let scale_multiplier = if global_scale.abs() < EPSILON {
            1.0
        } else {
            group_scale / global_scale
        };

        center *= center_multiplier;
        scale *= scale_multiplier;

        groups.push(json!({
            "component": component.label(),
            "group": current_key,
            "group_size": values.len(),
            "center_multiplier": center_multiplier,
            "scale_multiplier": scale_multiplier,
        }));
    }

    Adjustment {
        center,
        scale: scale.max(EPSILON),
        groups,
    }
}
