use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::{MaintenanceError, MaintenanceResult};
use crate::models::{MeasurementKind, RepetitionRule};
use crate::table::{Filter, SqlValue, TableAccessor, TableSpec};

/// Repetition interval lookup keyed by measurement kind and evaluation level.
#[async_trait]
pub trait RuleLookup: Send + Sync {
    /// Days between required actions, or [`MaintenanceError::RuleNotFound`].
    async fn interval_days(&self, kind: MeasurementKind, level: i32) -> MaintenanceResult<i32>;
}

/// Rule table in Postgres, queried once per lookup.
#[derive(Debug, Clone)]
pub struct PgRuleStore {
    table: TableAccessor,
}

impl PgRuleStore {
    pub fn new(pool: PgPool, table_name: &str, timeout: Duration) -> MaintenanceResult<Self> {
        let spec = TableSpec::new(
            table_name,
            Some("id"),
            &["medicion", "evaluacion", "dias_repeticion"],
        )?;
        Ok(Self {
            table: TableAccessor::new(spec, pool, timeout),
        })
    }

    pub async fn list(&self) -> MaintenanceResult<Vec<RepetitionRule>> {
        let rows = self.table.select(Vec::new()).await?;
        rows.iter().map(rule_from_row).collect()
    }

    /// Creates or replaces the interval for `(kind, level)` in one statement;
    /// returns the rule id.
    pub async fn upsert(
        &self,
        kind: MeasurementKind,
        level: i32,
        interval_days: i32,
    ) -> MaintenanceResult<i32> {
        validate_interval(interval_days)?;
        let id = self
            .table
            .upsert_returning(
                vec![
                    SqlValue::Int(kind.code()),
                    SqlValue::Int(level),
                    SqlValue::Int(interval_days),
                ],
                &["medicion", "evaluacion"],
                "id",
            )
            .await?;
        tracing::info!(%kind, level, interval_days, id, "stored repetition rule");
        Ok(id)
    }

    /// Returns whether a rule was removed.
    pub async fn remove(&self, kind: MeasurementKind, level: i32) -> MaintenanceResult<bool> {
        let removed = self.table.delete(key_filters(kind, level)).await?;
        Ok(removed > 0)
    }

    /// Snapshot of the whole rule table for repeated lookups.
    pub async fn load_cache(&self) -> MaintenanceResult<CachedRules> {
        let cached = CachedRules::from_rules(self.list().await?);
        tracing::debug!(count = cached.len(), "loaded repetition rules");
        Ok(cached)
    }
}

#[async_trait]
impl RuleLookup for PgRuleStore {
    async fn interval_days(&self, kind: MeasurementKind, level: i32) -> MaintenanceResult<i32> {
        let row = self
            .table
            .select_first(key_filters(kind, level))
            .await?
            .ok_or(MaintenanceError::RuleNotFound { kind, level })?;
        let days = row.try_get::<i32, _>("dias_repeticion")?;
        validate_interval(days)?;
        Ok(days)
    }
}

/// In-memory rule set. Duplicate keys keep the rule with the lowest id.
/// Rules with a negative interval are kept so that only their own metric
/// fails validation at lookup time.
#[derive(Debug, Clone, Default)]
pub struct CachedRules {
    intervals: HashMap<(i32, i32), (i32, i32)>,
}

impl CachedRules {
    pub fn from_rules(rules: impl IntoIterator<Item = RepetitionRule>) -> Self {
        let mut intervals: HashMap<(i32, i32), (i32, i32)> = HashMap::new();

        for rule in rules {
            if rule.dias_repeticion < 0 {
                tracing::warn!(
                    id = rule.id,
                    medicion = rule.medicion,
                    evaluacion = rule.evaluacion,
                    dias_repeticion = rule.dias_repeticion,
                    "repetition rule has a negative interval"
                );
            }
            let entry = intervals
                .entry((rule.medicion, rule.evaluacion))
                .or_insert((rule.id, rule.dias_repeticion));
            if rule.id < entry.0 {
                *entry = (rule.id, rule.dias_repeticion);
            }
        }

        Self { intervals }
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

#[async_trait]
impl RuleLookup for CachedRules {
    async fn interval_days(&self, kind: MeasurementKind, level: i32) -> MaintenanceResult<i32> {
        let (_, days) = self
            .intervals
            .get(&(kind.code(), level))
            .ok_or(MaintenanceError::RuleNotFound { kind, level })?;
        validate_interval(*days)?;
        Ok(*days)
    }
}

fn key_filters(kind: MeasurementKind, level: i32) -> Vec<Filter> {
    vec![
        Filter::eq("medicion", kind.code()),
        Filter::eq("evaluacion", level),
    ]
}

fn validate_interval(days: i32) -> MaintenanceResult<()> {
    if days < 0 {
        Err(MaintenanceError::Validation(format!(
            "repetition interval must not be negative, got {days}"
        )))
    } else {
        Ok(())
    }
}

fn rule_from_row(row: &PgRow) -> MaintenanceResult<RepetitionRule> {
    Ok(RepetitionRule {
        id: row.try_get("id")?,
        medicion: row.try_get("medicion")?,
        evaluacion: row.try_get("evaluacion")?,
        dias_repeticion: row.try_get("dias_repeticion")?,
    })
}
