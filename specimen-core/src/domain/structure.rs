//! Request structure: which fields the API should return, and under which names.
//!
//! The API takes a JSON object mapping output names to metric names, e.g.
//! `{"date":"date","areaCode":"areaCode","newCasesBySpecimenDate":"newCasesBySpecimenDate"}`.
//! The `date` and `areaCode` metrics are mandatory because the reshape keys on
//! them; `areaName` is optional; every other field is treated as a numeric metric.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DATE_METRIC: &str = "date";
pub const AREA_CODE_METRIC: &str = "areaCode";
pub const AREA_NAME_METRIC: &str = "areaName";

/// Output names that may only carry the metric of the same name.
pub const RESERVED_NAMES: [&str; 3] = [DATE_METRIC, AREA_CODE_METRIC, AREA_NAME_METRIC];

pub const NEW_CASES_BY_SPECIMEN_DATE: &str = "newCasesBySpecimenDate";
pub const NEW_CASES_BY_PUBLISH_DATE: &str = "newCasesByPublishDate";

/// One requested field: `name` is the key in each returned row, `metric` is
/// the API metric it is filled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureField {
    pub name: String,
    pub metric: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct Structure {
    fields: Vec<StructureField>,
    date_field: String,
    area_code_field: String,
}

impl Structure {
    /// Build a structure from `(output name, metric)` pairs, in request order.
    pub fn new<I, K, V>(fields: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut out: Vec<StructureField> = Vec::new();
        for (name, metric) in fields {
            let name = name.into();
            if out.iter().any(|f| f.name == name) {
                return Err(ConfigError::InvalidStructure(format!(
                    "duplicate output name '{name}'"
                )));
            }
            out.push(StructureField {
                name,
                metric: metric.into(),
            });
        }

        // The reshape keys its long frame on these names.
        for f in &out {
            if RESERVED_NAMES.contains(&f.name.as_str()) && f.name != f.metric {
                return Err(ConfigError::InvalidStructure(format!(
                    "output name '{}' is reserved for the '{}' metric, got '{}'",
                    f.name, f.name, f.metric
                )));
            }
        }

        let find = |metric: &str| {
            out.iter()
                .find(|f| f.metric == metric)
                .map(|f| f.name.clone())
                .ok_or_else(|| {
                    ConfigError::InvalidStructure(format!("structure must select '{metric}'"))
                })
        };
        let date_field = find(DATE_METRIC)?;
        let area_code_field = find(AREA_CODE_METRIC)?;

        Ok(Self {
            fields: out,
            date_field,
            area_code_field,
        })
    }

    /// Daily new cases by specimen date. The default structure of the pipeline.
    pub fn specimen() -> Self {
        Self::standard(NEW_CASES_BY_SPECIMEN_DATE)
    }

    /// Daily new cases by publish date.
    pub fn publish() -> Self {
        Self::standard(NEW_CASES_BY_PUBLISH_DATE)
    }

    /// `date`, `areaName`, `areaCode` plus one metric, output names equal to metric names.
    pub fn standard(metric: &str) -> Self {
        let fields = [DATE_METRIC, AREA_NAME_METRIC, AREA_CODE_METRIC, metric]
            .into_iter()
            .map(|m| StructureField {
                name: m.to_string(),
                metric: m.to_string(),
            })
            .collect();
        Self {
            fields,
            date_field: DATE_METRIC.to_string(),
            area_code_field: AREA_CODE_METRIC.to_string(),
        }
    }

    pub fn fields(&self) -> &[StructureField] {
        &self.fields
    }

    /// Output name carrying the observation date.
    pub fn date_field(&self) -> &str {
        &self.date_field
    }

    /// Output name carrying the region code.
    pub fn area_code_field(&self) -> &str {
        &self.area_code_field
    }

    pub fn area_name_field(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.metric == AREA_NAME_METRIC)
            .map(|f| f.name.as_str())
    }

    /// Output names of the numeric fields (everything but date, code and name).
    pub fn metric_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| {
                f.metric != DATE_METRIC && f.metric != AREA_CODE_METRIC && f.metric != AREA_NAME_METRIC
            })
            .map(|f| f.name.as_str())
    }

    pub fn has_metric(&self, name: &str) -> bool {
        self.metric_fields().any(|f| f == name)
    }

    /// JSON object for the `structure` query parameter, in field order.
    pub fn to_query_json(&self) -> String {
        let pairs: Vec<String> = self
            .fields
            .iter()
            .map(|f| {
                let name = serde_json::Value::String(f.name.clone());
                let metric = serde_json::Value::String(f.metric.clone());
                format!("{name}:{metric}")
            })
            .collect();
        format!("{{{}}}", pairs.join(","))
    }
}

impl Default for Structure {
    fn default() -> Self {
        Self::specimen()
    }
}

impl TryFrom<BTreeMap<String, String>> for Structure {
    type Error = ConfigError;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        Self::new(map)
    }
}

impl From<Structure> for BTreeMap<String, String> {
    fn from(s: Structure) -> Self {
        s.fields.into_iter().map(|f| (f.name, f.metric)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specimen_structure_selects_covariate() {
        let s = Structure::specimen();
        assert_eq!(s.date_field(), "date");
        assert_eq!(s.area_code_field(), "areaCode");
        assert_eq!(s.area_name_field(), Some("areaName"));
        assert!(s.has_metric(NEW_CASES_BY_SPECIMEN_DATE));
        assert!(!s.has_metric("date"));
        assert_eq!(s.metric_fields().count(), 1);
    }

    #[test]
    fn query_json_keeps_field_order() {
        let s = Structure::specimen();
        assert_eq!(
            s.to_query_json(),
            r#"{"date":"date","areaName":"areaName","areaCode":"areaCode","newCasesBySpecimenDate":"newCasesBySpecimenDate"}"#
        );
    }

    #[test]
    fn renamed_outputs_are_tracked() {
        let s = Structure::new([("day", "date"), ("code", "areaCode"), ("cases", "newCasesBySpecimenDate")])
            .unwrap();
        assert_eq!(s.date_field(), "day");
        assert_eq!(s.area_code_field(), "code");
        assert_eq!(s.area_name_field(), None);
        assert!(s.has_metric("cases"));
    }

    #[test]
    fn missing_area_code_is_rejected() {
        let err = Structure::new([("date", "date"), ("cases", "newCasesBySpecimenDate")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStructure(_)));
    }

    #[test]
    fn duplicate_output_name_is_rejected() {
        let err = Structure::new([("date", "date"), ("date", "areaCode")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStructure(_)));
    }

    #[test]
    fn metric_under_reserved_name_is_rejected() {
        let err = Structure::new([
            ("day", "date"),
            ("code", "areaCode"),
            ("date", "newCasesBySpecimenDate"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStructure(m) if m.contains("'date'")));

        let err = Structure::new([
            ("date", "date"),
            ("areaCode", "areaCode"),
            ("areaName", "newCasesByPublishDate"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStructure(_)));
    }

    #[test]
    fn reserved_names_in_toml_are_rejected() {
        #[derive(Debug, Deserialize)]
        struct Wrapper {
            #[allow(dead_code)]
            structure: Structure,
        }
        let result: Result<Wrapper, _> = toml::from_str(
            r#"
            [structure]
            day = "date"
            areaCode = "areaCode"
            areaName = "newCasesBySpecimenDate"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn toml_table_deserializes() {
        #[derive(Deserialize)]
        struct Wrapper {
            structure: Structure,
        }
        let w: Wrapper = toml::from_str(
            r#"
            [structure]
            date = "date"
            areaCode = "areaCode"
            newCasesByPublishDate = "newCasesByPublishDate"
            "#,
        )
        .unwrap();
        assert!(w.structure.has_metric("newCasesByPublishDate"));
    }
}
