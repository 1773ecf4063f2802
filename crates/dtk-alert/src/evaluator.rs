use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use dtk_common::{Direction, Interval};
use serde::Deserialize;

use crate::timezone::render_in_timezone;

/// Direction agreement required between anomalous detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertDirection {
    /// All anomalous detectors share one direction, held across the run.
    #[default]
    Same,
    /// No direction constraint.
    Any,
    /// Every anomalous detector reports `above`.
    Up,
    /// Every anomalous detector reports `below`.
    Down,
}

impl std::fmt::Display for AlertDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertDirection::Same => write!(f, "same"),
            AlertDirection::Any => write!(f, "any"),
            AlertDirection::Up => write!(f, "up"),
            AlertDirection::Down => write!(f, "down"),
        }
    }
}

/// Confirmation thresholds for turning detections into an alert.
#[derive(Debug, Clone, Copy)]
pub struct AlertConditions {
    pub min_detectors: u32,
    pub direction: AlertDirection,
    pub consecutive_anomalies: u32,
}

impl Default for AlertConditions {
    fn default() -> Self {
        Self {
            min_detectors: 1,
            direction: AlertDirection::Same,
            consecutive_anomalies: 3,
        }
    }
}

/// One detection row as the evaluator sees it.
#[derive(Debug, Clone)]
pub struct DetectionRecord {
    pub timestamp: NaiveDateTime,
    pub detector_name: String,
    pub detector_hash: String,
    pub value: Option<f64>,
    pub is_anomaly: bool,
    pub confidence_lower: Option<f64>,
    pub confidence_upper: Option<f64>,
    pub direction: Direction,
    pub severity: f64,
}

/// The alert event handed to the dispatcher. At most one per evaluation.
#[derive(Debug, Clone)]
pub struct AlertData {
    pub metric_name: String,
    pub timestamp: NaiveDateTime,
    pub timezone: String,
    /// Timestamp rendered for the display timezone.
    pub local_time: String,
    pub value: Option<f64>,
    pub confidence_lower: Option<f64>,
    pub confidence_upper: Option<f64>,
    pub direction: Direction,
    pub severity: f64,
    pub detector_name: String,
    pub consecutive_count: u32,
    pub is_no_data: bool,
}

/// Whether the cooldown window suppresses a new alert right now.
///
/// With `reset_on_recovery`, one observed recovery after the last alert
/// re-arms the gate early.
pub fn cooldown_blocks(
    last_alert: Option<NaiveDateTime>,
    cooldown_seconds: u64,
    reset_on_recovery: bool,
    recovered_since_alert: bool,
    now: NaiveDateTime,
) -> bool {
    if cooldown_seconds == 0 {
        return false;
    }
    let Some(last) = last_alert else {
        return false;
    };
    if now - last >= chrono::Duration::seconds(cooldown_seconds as i64) {
        return false;
    }
    !(reset_on_recovery && recovered_since_alert)
}

/// Walks recent detections for one metric and decides on an alert event.
pub struct AlertEvaluator {
    pub metric_name: String,
    pub interval: Interval,
    pub conditions: AlertConditions,
    pub timezone: String,
}

impl AlertEvaluator {
    pub fn new(metric_name: &str, interval: Interval) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            interval,
            conditions: AlertConditions::default(),
            timezone: "UTC".to_string(),
        }
    }

    pub fn with_conditions(mut self, conditions: AlertConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_timezone(mut self, timezone: &str) -> Self {
        self.timezone = timezone.to_string();
        self
    }

    /// The newest grid timestamp whose interval has fully elapsed.
    pub fn last_complete_point(&self, now: NaiveDateTime) -> NaiveDateTime {
        self.interval.align(now) - self.interval.duration()
    }

    /// Any detection strictly after `since` that came back non-anomalous?
    pub fn recovered_since(&self, detections: &[DetectionRecord], since: NaiveDateTime) -> bool {
        detections
            .iter()
            .any(|d| d.timestamp > since && !d.is_anomaly && d.reason_free())
    }

    /// Decide whether the given detections warrant an alert.
    ///
    /// Detections may span several fingerprints; they are aligned by
    /// timestamp and the last `consecutive_anomalies` contiguous grid
    /// points must each be jointly anomalous.
    pub fn should_alert(&self, detections: &[DetectionRecord]) -> Option<AlertData> {
        if detections.is_empty() {
            return None;
        }

        let mut by_ts: BTreeMap<NaiveDateTime, Vec<&DetectionRecord>> = BTreeMap::new();
        for d in detections {
            by_ts.entry(d.timestamp).or_default().push(d);
        }

        let needed = self.conditions.consecutive_anomalies.max(1);
        let mut consecutive = 0u32;
        let mut run_direction: Option<Direction> = None;
        let mut expected: Option<NaiveDateTime> = None;
        let mut head: Option<(NaiveDateTime, Vec<&DetectionRecord>)> = None;

        for (ts, records) in by_ts.iter().rev() {
            if let Some(exp) = expected {
                if *ts != exp {
                    break;
                }
            }
            let Some(joint_direction) = self.jointly_anomalous(records) else {
                break;
            };
            if self.conditions.direction == AlertDirection::Same {
                match run_direction {
                    Some(dir) if dir != joint_direction => break,
                    None => run_direction = Some(joint_direction),
                    _ => {}
                }
            }
            if head.is_none() {
                head = Some((*ts, records.clone()));
            }
            consecutive += 1;
            expected = Some(*ts - self.interval.duration());
            if consecutive >= needed {
                break;
            }
        }

        if consecutive < needed {
            return None;
        }

        let (timestamp, records) = head?;
        Some(self.build_event(timestamp, &records, consecutive))
    }

    /// No-data event: the last `consecutive_anomalies` expected grid
    /// timestamps all lack a value.
    ///
    /// `observed` are the datapoint timestamps (with a present value) in
    /// the checked span.
    pub fn no_data_event(
        &self,
        observed: &[NaiveDateTime],
        now: NaiveDateTime,
    ) -> Option<AlertData> {
        let needed = self.conditions.consecutive_anomalies.max(1) as i64;
        let last_complete = self.last_complete_point(now);
        let mut expected = Vec::with_capacity(needed as usize);
        let mut t = last_complete;
        for _ in 0..needed {
            expected.push(t);
            t = t - self.interval.duration();
        }
        if expected.iter().any(|ts| observed.contains(ts)) {
            return None;
        }
        Some(AlertData {
            metric_name: self.metric_name.clone(),
            timestamp: last_complete,
            timezone: self.timezone.clone(),
            local_time: render_in_timezone(last_complete, &self.timezone),
            value: None,
            confidence_lower: None,
            confidence_upper: None,
            direction: Direction::None,
            severity: 0.0,
            detector_name: "no_data".to_string(),
            consecutive_count: needed as u32,
            is_no_data: true,
        })
    }

    /// Joint verdict for one timestamp, or `None` when the alert
    /// predicate fails there.
    fn jointly_anomalous(&self, records: &[&DetectionRecord]) -> Option<Direction> {
        let anomalous: Vec<&&DetectionRecord> =
            records.iter().filter(|r| r.is_anomaly).collect();
        if (anomalous.len() as u32) < self.conditions.min_detectors.max(1) {
            return None;
        }
        let first = anomalous[0].direction;
        match self.conditions.direction {
            AlertDirection::Any => Some(first),
            AlertDirection::Same => anomalous
                .iter()
                .all(|r| r.direction == first && r.direction != Direction::None)
                .then_some(first),
            AlertDirection::Up => anomalous
                .iter()
                .all(|r| r.direction == Direction::Above)
                .then_some(Direction::Above),
            AlertDirection::Down => anomalous
                .iter()
                .all(|r| r.direction == Direction::Below)
                .then_some(Direction::Below),
        }
    }

    fn build_event(
        &self,
        timestamp: NaiveDateTime,
        records: &[&DetectionRecord],
        consecutive: u32,
    ) -> AlertData {
        let anomalous: Vec<&&DetectionRecord> =
            records.iter().filter(|r| r.is_anomaly).collect();
        // The most severe detector speaks for the event.
        let top = anomalous
            .iter()
            .max_by(|a, b| a.severity.total_cmp(&b.severity))
            .expect("jointly anomalous timestamp has anomalous records");

        let detector_name = if anomalous.len() == 1 {
            top.detector_name.clone()
        } else {
            format!("{} detectors", anomalous.len())
        };

        AlertData {
            metric_name: self.metric_name.clone(),
            timestamp,
            timezone: self.timezone.clone(),
            local_time: render_in_timezone(timestamp, &self.timezone),
            value: top.value,
            confidence_lower: top.confidence_lower,
            confidence_upper: top.confidence_upper,
            direction: top.direction,
            severity: top.severity,
            detector_name,
            consecutive_count: consecutive,
            is_no_data: false,
        }
    }
}

impl DetectionRecord {
    /// Rows skipped for missing/insufficient data count as non-anomalous
    /// but not as recoveries.
    fn reason_free(&self) -> bool {
        self.confidence_lower.is_some() || self.confidence_upper.is_some()
    }
}
