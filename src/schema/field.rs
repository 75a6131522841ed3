//! Field classification: normalizes a declared field list into typed specs.

use crate::config::FieldConfig;
use crate::error::ConfigError;
use crate::schema::{FieldDefault, ScalarType};
use serde_json::Value;

/// One classified field. Inline tuples from `fields` become `Custom`.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldSpec {
    Plain(String),
    Custom {
        name: String,
        ty: ScalarType,
        default: FieldDefault,
    },
    Optional {
        name: String,
        ty: ScalarType,
    },
    Excluded(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldCategory {
    Plain,
    Custom,
    Optional,
    Excluded,
}

impl FieldCategory {
    pub const ALL: [FieldCategory; 4] = [
        FieldCategory::Plain,
        FieldCategory::Custom,
        FieldCategory::Optional,
        FieldCategory::Excluded,
    ];
}

impl FieldSpec {
    pub fn name(&self) -> &str {
        match self {
            FieldSpec::Plain(name) | FieldSpec::Excluded(name) => name,
            FieldSpec::Custom { name, .. } | FieldSpec::Optional { name, .. } => name,
        }
    }

    pub fn category(&self) -> FieldCategory {
        match self {
            FieldSpec::Plain(_) => FieldCategory::Plain,
            FieldSpec::Custom { .. } => FieldCategory::Custom,
            FieldSpec::Optional { .. } => FieldCategory::Optional,
            FieldSpec::Excluded(_) => FieldCategory::Excluded,
        }
    }
}

/// Classified field list, ordered plain, custom (inline first), optional, excluded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassifiedFields {
    specs: Vec<FieldSpec>,
}

impl ClassifiedFields {
    pub fn specs(&self) -> &[FieldSpec] {
        &self.specs
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn category(&self, category: FieldCategory) -> impl Iterator<Item = &FieldSpec> {
        self.specs.iter().filter(move |s| s.category() == category)
    }

    pub fn has_category(&self, category: FieldCategory) -> bool {
        self.category(category).next().is_some()
    }

    pub fn plain(&self) -> Vec<&str> {
        self.category(FieldCategory::Plain).map(FieldSpec::name).collect()
    }

    pub fn customs(&self) -> Vec<(&str, ScalarType, &FieldDefault)> {
        self.specs
            .iter()
            .filter_map(|s| match s {
                FieldSpec::Custom { name, ty, default } => Some((name.as_str(), *ty, default)),
                _ => None,
            })
            .collect()
    }

    /// Optionals normalized to `(name, type, null)`.
    pub fn optionals(&self) -> Vec<(&str, ScalarType, FieldDefault)> {
        self.specs
            .iter()
            .filter_map(|s| match s {
                FieldSpec::Optional { name, ty } => Some((name.as_str(), *ty, FieldDefault::Null)),
                _ => None,
            })
            .collect()
    }

    pub fn excludes(&self) -> Vec<&str> {
        self.category(FieldCategory::Excluded).map(FieldSpec::name).collect()
    }

    /// Per category: take `primary`'s specs when it has any, else `fallback`'s.
    pub fn merge_per_category(primary: &ClassifiedFields, fallback: &ClassifiedFields) -> ClassifiedFields {
        let mut specs = Vec::new();
        for category in FieldCategory::ALL {
            let source = if primary.has_category(category) { primary } else { fallback };
            specs.extend(source.category(category).cloned());
        }
        ClassifiedFields { specs }
    }
}

/// Classify one context's field config. `entity` only labels errors.
pub fn classify(entity: &str, config: &FieldConfig) -> Result<ClassifiedFields, ConfigError> {
    let invalid = |detail: String| ConfigError::InvalidFieldSpec {
        entity: entity.to_string(),
        detail,
    };

    let mut plain = Vec::new();
    let mut customs = Vec::new();
    for raw in &config.fields {
        match raw {
            Value::String(name) => plain.push(FieldSpec::Plain(name.clone())),
            Value::Array(_) => customs.push(parse_custom(raw).map_err(invalid)?),
            other => return Err(invalid(format!("field entry must be a name or tuple, got {}", other))),
        }
    }
    for raw in &config.customs {
        customs.push(parse_custom(raw).map_err(invalid)?);
    }

    let mut optionals = Vec::new();
    for raw in &config.optionals {
        let (name, ty) = match raw.as_array().map(Vec::as_slice) {
            Some([name, ty]) => (name, ty),
            _ => return Err(invalid(format!("optional must be a (name, type) tuple, got {}", raw))),
        };
        optionals.push(FieldSpec::Optional {
            name: tuple_name(name).map_err(invalid)?,
            ty: tuple_type(ty).map_err(invalid)?,
        });
    }

    let mut specs = plain;
    specs.extend(customs);
    specs.extend(optionals);
    specs.extend(config.excludes.iter().cloned().map(FieldSpec::Excluded));
    Ok(ClassifiedFields { specs })
}

/// `(name, type)` -> required custom; `(name, type, default)` -> custom with default (null allowed).
fn parse_custom(raw: &Value) -> Result<FieldSpec, String> {
    match raw.as_array().map(Vec::as_slice) {
        Some([name, ty]) => Ok(FieldSpec::Custom {
            name: tuple_name(name)?,
            ty: tuple_type(ty)?,
            default: FieldDefault::Required,
        }),
        Some([name, ty, default]) => Ok(FieldSpec::Custom {
            name: tuple_name(name)?,
            ty: tuple_type(ty)?,
            default: if default.is_null() {
                FieldDefault::Null
            } else {
                FieldDefault::Value(default.clone())
            },
        }),
        Some(items) => Err(format!("tuple must have 2 or 3 items, got {}", items.len())),
        None => Err(format!("custom must be a tuple, got {}", raw)),
    }
}

fn tuple_name(v: &Value) -> Result<String, String> {
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("field name must be a string, got {}", v))
}

fn tuple_type(v: &Value) -> Result<ScalarType, String> {
    v.as_str()
        .ok_or_else(|| format!("field type must be a string, got {}", v))?
        .parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(v: Value) -> FieldConfig {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn inline_tuples_move_into_customs_ahead_of_declared_customs() {
        let cfg = config(json!({
            "fields": ["id", ["slug", "text", ""], "name"],
            "customs": [["word_count", "int", 0]],
        }));
        let classified = classify("library.Book", &cfg).unwrap();
        assert_eq!(classified.plain(), vec!["id", "name"]);
        let customs = classified.customs();
        assert_eq!(customs.len(), 2);
        assert_eq!(customs[0].0, "slug");
        assert_eq!(customs[1], ("word_count", ScalarType::Int, &FieldDefault::Value(json!(0))));
    }

    #[test]
    fn two_tuple_is_required_and_null_default_is_not() {
        let cfg = config(json!({ "customs": [["note", "text"], ["tag", "text", null]] }));
        let classified = classify("library.Book", &cfg).unwrap();
        let customs = classified.customs();
        assert_eq!(customs[0].2, &FieldDefault::Required);
        assert_eq!(customs[1].2, &FieldDefault::Null);
    }

    #[test]
    fn optionals_normalize_to_null_default() {
        let cfg = config(json!({ "optionals": [["nickname", "text"]], "excludes": ["secret"] }));
        let classified = classify("library.Author", &cfg).unwrap();
        assert_eq!(classified.optionals(), vec![("nickname", ScalarType::Text, FieldDefault::Null)]);
        assert_eq!(classified.excludes(), vec!["secret"]);
    }

    #[test]
    fn malformed_tuples_are_rejected() {
        for bad in [
            json!({ "fields": [["only_name"]] }),
            json!({ "customs": [["a", "int", 0, 1]] }),
            json!({ "customs": ["not_a_tuple"] }),
            json!({ "optionals": [["a", "int", null]] }),
            json!({ "fields": [42] }),
            json!({ "customs": [["a", "blob"]] }),
        ] {
            let err = classify("library.Book", &config(bad.clone())).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidFieldSpec { .. }),
                "expected InvalidFieldSpec for {}",
                bad
            );
        }
    }

    #[test]
    fn per_category_merge_fills_only_empty_categories() {
        let read = classify(
            "x",
            &config(json!({ "fields": ["id", "name"], "customs": [["score", "int", 0]] })),
        )
        .unwrap();
        let detail = classify("x", &config(json!({ "fields": ["id", "bio"] }))).unwrap();
        let merged = ClassifiedFields::merge_per_category(&detail, &read);
        assert_eq!(merged.plain(), vec!["id", "bio"]);
        assert_eq!(merged.customs().len(), 1);
    }
}
