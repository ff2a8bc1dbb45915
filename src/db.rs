use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgPool, QueryBuilder, Row};

use crate::error::MaintenanceResult;
use crate::models::{MeasurementKind, MeasurementRecord};
use crate::overdue::parse_action_date;
use crate::table::{with_timeout, Filter, SqlValue, TableAccessor, TableSpec};

pub const EVALUATION_COLUMNS: [&str; 8] = [
    "id_usuario",
    "eval_peso",
    "fecha_peso",
    "eval_estatura",
    "eval_presion",
    "fecha_sistolica",
    "eval_glucosa",
    "fecha_glucosa",
];

pub fn evaluations_spec(table_name: &str) -> MaintenanceResult<TableSpec> {
    TableSpec::new(table_name, None, &EVALUATION_COLUMNS)
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let rules = vec![
        (MeasurementKind::Weight, 1, 60),
        (MeasurementKind::Weight, 2, 30),
        (MeasurementKind::Weight, 3, 15),
        (MeasurementKind::Pressure, 1, 30),
        (MeasurementKind::Pressure, 2, 14),
        (MeasurementKind::Pressure, 3, 7),
        (MeasurementKind::Glucose, 1, 15),
        (MeasurementKind::Glucose, 2, 7),
        (MeasurementKind::Glucose, 3, 3),
    ];

    for (kind, level, days) in rules {
        sqlx::query(
            r#"
            INSERT INTO plan_mantto_general (medicion, evaluacion, dias_repeticion)
            VALUES ($1, $2, $3)
            ON CONFLICT (medicion, evaluacion) DO UPDATE
            SET dias_repeticion = EXCLUDED.dias_repeticion
            "#,
        )
        .bind(kind.code())
        .bind(level)
        .bind(days)
        .execute(pool)
        .await?;
    }

    let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).context("invalid date");
    let evaluations = vec![
        (
            42,
            Some(2),
            date(2020, 1, 1)?,
            Some(1),
            None,
            date(2020, 1, 1)?,
            Some(1),
            date(2020, 1, 1)?,
        ),
        (
            57,
            Some(1),
            date(2026, 9, 1)?,
            Some(2),
            Some(2),
            date(2026, 10, 12)?,
            Some(3),
            date(2026, 10, 17)?,
        ),
        (
            63,
            None,
            date(2026, 8, 3)?,
            None,
            Some(3),
            date(2026, 9, 28)?,
            Some(2),
            date(2026, 10, 1)?,
        ),
    ];

    for (
        id,
        eval_peso,
        fecha_peso,
        eval_estatura,
        eval_presion,
        fecha_sistolica,
        eval_glucosa,
        fecha_glucosa,
    ) in evaluations
    {
        sqlx::query(
            r#"
            INSERT INTO evaluaciones
            (id_usuario, eval_peso, fecha_peso, eval_estatura, eval_presion,
             fecha_sistolica, eval_glucosa, fecha_glucosa)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id_usuario) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(eval_peso)
        .bind(fecha_peso)
        .bind(eval_estatura)
        .bind(eval_presion)
        .bind(fecha_sistolica)
        .bind(eval_glucosa)
        .bind(fecha_glucosa)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Records with all three action dates present, dates rendered as text.
pub async fn fetch_records(
    pool: &PgPool,
    table: &TableSpec,
    user: Option<i32>,
    timeout: Duration,
) -> MaintenanceResult<Vec<MeasurementRecord>> {
    let mut qb = QueryBuilder::new(
        "SELECT id_usuario, eval_peso, fecha_peso::text AS fecha_peso, eval_estatura, \
         eval_presion, fecha_sistolica::text AS fecha_sistolica, eval_glucosa, \
         fecha_glucosa::text AS fecha_glucosa FROM ",
    );
    qb.push(table.quoted_table());

    let mut filters = vec![
        Filter::not_null("fecha_peso"),
        Filter::not_null("fecha_sistolica"),
        Filter::not_null("fecha_glucosa"),
    ];
    if let Some(value) = user {
        filters.push(Filter::eq("id_usuario", value));
    }
    table.push_where(&mut qb, filters)?;
    qb.push(" ORDER BY id_usuario");

    let records = with_timeout(timeout, qb.build().fetch_all(pool)).await?;
    let mut measurements = Vec::with_capacity(records.len());

    for row in records {
        measurements.push(MeasurementRecord {
            id_usuario: row.try_get("id_usuario")?,
            eval_peso: row.try_get("eval_peso")?,
            fecha_peso: row.try_get("fecha_peso")?,
            eval_estatura: row.try_get("eval_estatura")?,
            eval_presion: row.try_get("eval_presion")?,
            fecha_sistolica: row.try_get("fecha_sistolica")?,
            eval_glucosa: row.try_get("eval_glucosa")?,
            fecha_glucosa: row.try_get("fecha_glucosa")?,
        });
    }

    tracing::debug!(count = measurements.len(), "fetched evaluation records");
    Ok(measurements)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// Imports evaluation rows from CSV, replacing rows that share an `id_usuario`.
pub async fn import_csv(
    table: &TableAccessor,
    csv_path: &std::path::Path,
) -> anyhow::Result<ImportSummary> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut summary = ImportSummary::default();

    for (line, result) in reader.deserialize::<MeasurementRecord>().enumerate() {
        let record = result?;
        let values = record_values(&record)
            .with_context(|| format!("row {} (id_usuario {})", line + 1, record.id_usuario))?;
        let key = vec![Filter::eq("id_usuario", record.id_usuario)];

        if table.exists(key.clone()).await? {
            let assignments = EVALUATION_COLUMNS[1..]
                .iter()
                .copied()
                .zip(values.into_iter().skip(1))
                .collect();
            table.update(assignments, key).await?;
            summary.updated += 1;
        } else {
            table.insert(values).await?;
            summary.inserted += 1;
        }
    }

    Ok(summary)
}

/// Values in [`EVALUATION_COLUMNS`] order, with dates parsed up front.
pub fn record_values(record: &MeasurementRecord) -> MaintenanceResult<Vec<SqlValue>> {
    let date = |text: &Option<String>| -> MaintenanceResult<SqlValue> {
        match text.as_deref().map(str::trim) {
            None | Some("") => Ok(SqlValue::Null),
            Some(value) => parse_action_date(value).map(SqlValue::Date),
        }
    };

    Ok(vec![
        SqlValue::Int(record.id_usuario),
        record.eval_peso.into(),
        date(&record.fecha_peso)?,
        record.eval_estatura.into(),
        record.eval_presion.into(),
        date(&record.fecha_sistolica)?,
        record.eval_glucosa.into(),
        date(&record.fecha_glucosa)?,
    ])
}
