use chrono::NaiveDateTime;
use dtk_alert::{cooldown_blocks, AlertConditions, AlertEvaluator, DetectionRecord};
use dtk_config::{AlertingConfig, MetricConfig, ProfilesConfig};
use dtk_notify::{ChannelRegistry, Dispatcher};
use dtk_store::{DetectionRow, InternalStore};

/// Build the dispatcher for a metric's configured channels.
pub fn build_dispatcher(
    alerting: &AlertingConfig,
    profiles: &ProfilesConfig,
) -> anyhow::Result<Dispatcher> {
    let registry = ChannelRegistry::default();
    let mut channels = Vec::with_capacity(alerting.channels.len());
    for name in &alerting.channels {
        let decl = profiles.channel(name)?;
        let channel = registry.create_channel(&decl.channel_type, name, &decl.config)?;
        channels.push(channel);
    }
    Ok(Dispatcher::new(channels).with_templates(
        alerting.template_single.clone(),
        alerting.template_consecutive.clone(),
    ))
}

fn to_record(row: DetectionRow) -> DetectionRecord {
    // The fingerprint is "<type>|<params>"; the type is the display name.
    let detector_name = row
        .detector_hash
        .split('|')
        .next()
        .unwrap_or(&row.detector_hash)
        .to_string();
    DetectionRecord {
        timestamp: row.timestamp,
        detector_name,
        detector_hash: row.detector_hash,
        value: row.value,
        is_anomaly: row.is_anomaly,
        confidence_lower: row.confidence_lower,
        confidence_upper: row.confidence_upper,
        direction: row.direction,
        severity: row.severity,
    }
}

/// Evaluate the alert policy for one metric and dispatch at most one
/// event. Returns the number of alert events emitted (0 or 1).
///
/// `run_started_at` anchors the freshness filter: only detections created
/// by this run may trigger, so historical backfill stays silent.
pub async fn run_alert_step(
    config: &MetricConfig,
    store: &InternalStore,
    profiles: &ProfilesConfig,
    run_started_at: NaiveDateTime,
    now: NaiveDateTime,
) -> anyhow::Result<u32> {
    let Some(alerting) = &config.alerting else {
        return Ok(0);
    };
    if !alerting.enabled {
        return Ok(0);
    }

    let detectors = config.build_detectors()?;
    let hashes: Vec<String> = detectors.iter().map(|d| d.fingerprint()).collect();
    let conditions = AlertConditions {
        min_detectors: alerting.min_detectors,
        direction: alerting.direction,
        consecutive_anomalies: alerting.consecutive_anomalies,
    };
    let evaluator = AlertEvaluator::new(&config.name, config.interval)
        .with_conditions(conditions)
        .with_timezone(&alerting.timezone);

    // Cooldown gate first; it needs no detection rows unless recovery
    // resets are enabled.
    let cooldown_seconds = alerting.alert_cooldown.map(|i| i.seconds()).unwrap_or(0);
    let last_alert = store.get_last_alert_timestamp(&config.name)?;
    if cooldown_seconds > 0 {
        let recovered = match (alerting.cooldown_reset_on_recovery, last_alert) {
            (true, Some(since)) => {
                let rows = store.get_recent_detections(
                    &config.name,
                    &hashes,
                    alerting.consecutive_anomalies as usize,
                    since,
                )?;
                let records: Vec<DetectionRecord> = rows.into_iter().map(to_record).collect();
                evaluator.recovered_since(&records, since)
            }
            _ => false,
        };
        if cooldown_blocks(
            last_alert,
            cooldown_seconds,
            alerting.cooldown_reset_on_recovery,
            recovered,
            now,
        ) {
            tracing::debug!(metric = %config.name, "Alert suppressed by cooldown");
            return Ok(0);
        }
    }

    // Only rows created by this run are eligible; stale backfill rows
    // must not fire.
    let fresh: Vec<DetectionRecord> = store
        .get_recent_detections(
            &config.name,
            &hashes,
            alerting.consecutive_anomalies as usize,
            run_started_at,
        )?
        .into_iter()
        .map(to_record)
        .collect();

    let mut event = evaluator.should_alert(&fresh);

    if event.is_none() && alerting.no_data_alert {
        let needed = alerting.consecutive_anomalies.max(1) as i64;
        let last_complete = evaluator.last_complete_point(now);
        let span_start =
            last_complete - chrono::Duration::seconds((needed - 1) * config.interval.seconds() as i64);
        let observed: Vec<NaiveDateTime> = store
            .load_range(&config.name, span_start, config.interval.next(last_complete))?
            .into_iter()
            .filter(|p| p.value.is_some())
            .map(|p| p.timestamp)
            .collect();
        event = evaluator.no_data_event(&observed, now);
    }

    let Some(event) = event else {
        return Ok(0);
    };

    // Bookkeeping before dispatch: the cooldown must hold even when
    // every channel fails.
    store.record_alert(&config.name, now)?;

    let dispatcher = build_dispatcher(alerting, profiles)?;
    let reports = dispatcher.dispatch(&event).await;
    let failed = reports.iter().filter(|r| !r.ok).count();
    tracing::info!(
        metric = %config.name,
        channels = reports.len(),
        failed,
        detector = %event.detector_name,
        "Alert event emitted"
    );
    Ok(1)
}
