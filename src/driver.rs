use chrono::NaiveDate;

use crate::error::{MaintenanceError, MaintenanceResult};
use crate::models::{MeasurementKind, MeasurementRecord, MetricReading, MetricStatus};
use crate::overdue;
use crate::rules::RuleLookup;

#[derive(Debug)]
pub struct SkippedMetric {
    pub user_id: i32,
    pub kind: MeasurementKind,
    pub reason: MaintenanceError,
}

#[derive(Debug, Default)]
pub struct Evaluation {
    pub statuses: Vec<MetricStatus>,
    pub skipped: Vec<SkippedMetric>,
}

impl Evaluation {
    pub fn overdue_count(&self) -> usize {
        self.statuses.iter().filter(|s| s.overdue).count()
    }
}

pub async fn evaluate_metric<R: RuleLookup + ?Sized>(
    user_id: i32,
    reading: &MetricReading<'_>,
    rules: &R,
    today: NaiveDate,
) -> MaintenanceResult<MetricStatus> {
    let interval = rules.interval_days(reading.kind, reading.level).await?;
    let date_text = reading.date.ok_or_else(|| {
        MaintenanceError::Validation(format!("no {} date recorded", reading.kind))
    })?;
    let last_action = overdue::parse_action_date(date_text)?;
    let overdue = overdue::is_overdue(last_action, interval, today)?;

    Ok(MetricStatus {
        user_id,
        kind: reading.kind,
        overdue,
    })
}

/// Outcome for every metric of `record` that has an evaluation level.
pub async fn evaluate_record<R: RuleLookup + ?Sized>(
    record: &MeasurementRecord,
    rules: &R,
    today: NaiveDate,
) -> Vec<(MeasurementKind, MaintenanceResult<MetricStatus>)> {
    let mut outcomes = Vec::new();
    for reading in record.readings() {
        let outcome = evaluate_metric(record.id_usuario, &reading, rules, today).await;
        outcomes.push((reading.kind, outcome));
    }
    outcomes
}

/// Evaluates every record. Per-metric failures are logged and collected in
/// [`Evaluation::skipped`]; a connection failure aborts the pass.
pub async fn evaluate_all<R: RuleLookup + ?Sized>(
    records: &[MeasurementRecord],
    rules: &R,
    today: NaiveDate,
) -> MaintenanceResult<Evaluation> {
    let mut evaluation = Evaluation::default();

    for record in records {
        for (kind, outcome) in evaluate_record(record, rules, today).await {
            match outcome {
                Ok(status) => evaluation.statuses.push(status),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    let skipped = SkippedMetric {
                        user_id: record.id_usuario,
                        kind,
                        reason: err,
                    };
                    tracing::warn!(
                        user_id = skipped.user_id,
                        metric = %skipped.kind,
                        error = %skipped.reason,
                        "skipping metric"
                    );
                    evaluation.skipped.push(skipped);
                }
            }
        }
    }

    tracing::info!(
        records = records.len(),
        evaluated = evaluation.statuses.len(),
        overdue = evaluation.overdue_count(),
        skipped = evaluation.skipped.len(),
        %today,
        "overdue pass finished"
    );
    Ok(evaluation)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::models::RepetitionRule;
    use crate::rules::CachedRules;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rules(entries: &[(MeasurementKind, i32, i32)]) -> CachedRules {
        CachedRules::from_rules(entries.iter().enumerate().map(|(i, (kind, level, days))| {
            RepetitionRule {
                id: i as i32 + 1,
                medicion: kind.code(),
                evaluacion: *level,
                dias_repeticion: *days,
            }
        }))
    }

    fn user_42() -> MeasurementRecord {
        MeasurementRecord {
            id_usuario: 42,
            eval_peso: Some(2),
            fecha_peso: Some("2020-01-01".to_string()),
            eval_presion: None,
            fecha_sistolica: Some("2020-01-01".to_string()),
            eval_glucosa: Some(1),
            fecha_glucosa: Some("2020-01-01".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn end_to_end_flags_weight_and_glucose() {
        let rules = rules(&[
            (MeasurementKind::Weight, 2, 30),
            (MeasurementKind::Glucose, 1, 15),
        ]);

        let evaluation = evaluate_all(&[user_42()], &rules, date(2020, 2, 1))
            .await
            .unwrap();

        assert_eq!(
            evaluation.statuses,
            vec![
                MetricStatus {
                    user_id: 42,
                    kind: MeasurementKind::Weight,
                    overdue: true,
                },
                MetricStatus {
                    user_id: 42,
                    kind: MeasurementKind::Glucose,
                    overdue: true,
                },
            ]
        );
        assert!(evaluation.skipped.is_empty());
    }

    #[tokio::test]
    async fn missing_rule_skips_only_that_metric() {
        let rules = rules(&[(MeasurementKind::Weight, 2, 30)]);

        let evaluation = evaluate_all(&[user_42()], &rules, date(2020, 1, 15))
            .await
            .unwrap();

        assert_eq!(evaluation.statuses.len(), 1);
        assert!(!evaluation.statuses[0].overdue);
        assert_eq!(evaluation.skipped.len(), 1);
        assert_eq!(evaluation.skipped[0].kind, MeasurementKind::Glucose);
        assert!(matches!(
            evaluation.skipped[0].reason,
            MaintenanceError::RuleNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn malformed_date_does_not_stop_the_batch() {
        let rules = rules(&[
            (MeasurementKind::Weight, 2, 30),
            (MeasurementKind::Glucose, 1, 15),
        ]);
        let mut broken = user_42();
        broken.id_usuario = 7;
        broken.fecha_peso = Some("01/01/2020".to_string());

        let evaluation = evaluate_all(&[broken, user_42()], &rules, date(2020, 1, 10))
            .await
            .unwrap();

        assert_eq!(evaluation.skipped.len(), 1);
        assert_eq!(evaluation.skipped[0].user_id, 7);
        assert!(matches!(
            evaluation.skipped[0].reason,
            MaintenanceError::InvalidDateFormat(_)
        ));
        assert_eq!(evaluation.statuses.len(), 3);
        assert_eq!(evaluation.overdue_count(), 0);
    }

    struct Disconnected;

    #[async_trait]
    impl RuleLookup for Disconnected {
        async fn interval_days(&self, _: MeasurementKind, _: i32) -> MaintenanceResult<i32> {
            Err(MaintenanceError::from(sqlx::Error::PoolClosed))
        }
    }

    #[tokio::test]
    async fn lost_connection_aborts_the_pass() {
        let err = evaluate_all(&[user_42()], &Disconnected, date(2020, 2, 1))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn negative_rule_skips_only_its_metric() {
        let rules = rules(&[
            (MeasurementKind::Weight, 2, 30),
            (MeasurementKind::Pressure, 1, -3),
        ]);
        let record = MeasurementRecord {
            eval_presion: Some(1),
            ..user_42()
        };

        let evaluation = evaluate_all(&[record], &rules, date(2020, 2, 1))
            .await
            .unwrap();

        assert_eq!(
            evaluation.statuses,
            vec![MetricStatus {
                user_id: 42,
                kind: MeasurementKind::Weight,
                overdue: true,
            }]
        );
        let reasons: Vec<(MeasurementKind, bool)> = evaluation
            .skipped
            .iter()
            .map(|s| (s.kind, matches!(s.reason, MaintenanceError::Validation(_))))
            .collect();
        assert_eq!(
            reasons,
            vec![
                (MeasurementKind::Pressure, true),
                (MeasurementKind::Glucose, false),
            ]
        );
    }

    #[tokio::test]
    async fn record_without_levels_yields_nothing() {
        let record = MeasurementRecord {
            id_usuario: 3,
            fecha_peso: Some("2020-01-01".to_string()),
            ..Default::default()
        };
        let outcomes = evaluate_record(&record, &CachedRules::default(), date(2020, 1, 1)).await;
        assert!(outcomes.is_empty());
    }
}
