use std::fmt;

use serde::{Deserialize, Serialize};

/// Measurement kind, keyed by the `medicion` code of the rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum MeasurementKind {
    Weight,
    Pressure,
    Glucose,
}

impl MeasurementKind {
    pub const ALL: [MeasurementKind; 3] = [
        MeasurementKind::Weight,
        MeasurementKind::Pressure,
        MeasurementKind::Glucose,
    ];

    pub fn code(self) -> i32 {
        match self {
            MeasurementKind::Weight => 1,
            MeasurementKind::Pressure => 3,
            MeasurementKind::Glucose => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Metric name used on output lines.
    pub fn label(self) -> &'static str {
        match self {
            MeasurementKind::Weight => "peso",
            MeasurementKind::Pressure => "presion",
            MeasurementKind::Glucose => "glucosa",
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One row of the evaluations table. Dates stay as the text the store
/// returned; they are parsed when a metric is evaluated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeasurementRecord {
    pub id_usuario: i32,
    pub eval_peso: Option<i32>,
    pub fecha_peso: Option<String>,
    pub eval_estatura: Option<i32>,
    pub eval_presion: Option<i32>,
    pub fecha_sistolica: Option<String>,
    pub eval_glucosa: Option<i32>,
    pub fecha_glucosa: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricReading<'a> {
    pub kind: MeasurementKind,
    pub level: i32,
    pub date: Option<&'a str>,
}

impl MeasurementRecord {
    /// Metrics with an evaluation level, in weight, pressure, glucose order.
    pub fn readings(&self) -> Vec<MetricReading<'_>> {
        [
            (MeasurementKind::Weight, self.eval_peso, &self.fecha_peso),
            (MeasurementKind::Pressure, self.eval_presion, &self.fecha_sistolica),
            (MeasurementKind::Glucose, self.eval_glucosa, &self.fecha_glucosa),
        ]
        .into_iter()
        .filter_map(|(kind, level, date)| {
            level.map(|level| MetricReading {
                kind,
                level,
                date: date.as_deref(),
            })
        })
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepetitionRule {
    pub id: i32,
    pub medicion: i32,
    pub evaluacion: i32,
    pub dias_repeticion: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricStatus {
    pub user_id: i32,
    #[serde(rename = "metric", serialize_with = "serialize_label")]
    pub kind: MeasurementKind,
    pub overdue: bool,
}

fn serialize_label<S: serde::Serializer>(
    kind: &MeasurementKind,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(kind.label())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_rule_table() {
        assert_eq!(MeasurementKind::Weight.code(), 1);
        assert_eq!(MeasurementKind::Pressure.code(), 3);
        assert_eq!(MeasurementKind::Glucose.code(), 4);
        assert_eq!(MeasurementKind::from_code(3), Some(MeasurementKind::Pressure));
        assert_eq!(MeasurementKind::from_code(2), None);
    }

    #[test]
    fn readings_skip_metrics_without_level() {
        let record = MeasurementRecord {
            id_usuario: 42,
            eval_peso: Some(2),
            fecha_peso: Some("2020-01-01".to_string()),
            eval_presion: None,
            fecha_sistolica: Some("2020-01-01".to_string()),
            eval_glucosa: Some(1),
            fecha_glucosa: Some("2020-01-01 08:30:00".to_string()),
            ..Default::default()
        };

        let kinds: Vec<MeasurementKind> = record.readings().iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![MeasurementKind::Weight, MeasurementKind::Glucose]);
        assert_eq!(record.readings()[1].date, Some("2020-01-01 08:30:00"));
    }
}
