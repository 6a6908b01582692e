//! Per-field configuration supplied by the field-definition subsystem.

use serde::{Deserialize, Serialize};

use crate::coercion::{SizeClass, ValueKind};
use crate::errors::SettingsError;

/// Which computed field type the settings describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindTag {
    #[serde(alias = "computed_decimal")]
    Decimal,
    #[serde(alias = "computed_integer")]
    Integer,
    #[serde(alias = "computed_string", alias = "string")]
    Text,
}

/// Settings document as stored with the field schema. Missing entries take
/// the defaults of a freshly created field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSettings {
    #[serde(rename = "type")]
    pub kind: KindTag,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default = "default_precision")]
    pub precision: u32,
    #[serde(default = "default_scale")]
    pub scale: u32,
    #[serde(default)]
    pub unsigned: bool,
    #[serde(default)]
    pub size: SizeClass,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default)]
    pub is_ascii: bool,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default = "default_cardinality")]
    pub cardinality: usize,
}

fn default_precision() -> u32 {
    10
}

fn default_scale() -> u32 {
    2
}

fn default_max_length() -> usize {
    255
}

fn default_cardinality() -> usize {
    1
}

impl FieldSettings {
    pub fn new(kind: KindTag) -> Self {
        Self {
            kind,
            code: None,
            precision: default_precision(),
            scale: default_scale(),
            unsigned: false,
            size: SizeClass::default(),
            max_length: default_max_length(),
            is_ascii: false,
            prefix: String::new(),
            suffix: String::new(),
            cardinality: default_cardinality(),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, SettingsError> {
        serde_json::from_str(s).map_err(|e| SettingsError::Malformed(e.to_string()))
    }

    fn default_code(&self) -> &'static str {
        match self.kind {
            KindTag::Decimal | KindTag::Integer => "$value = 0;",
            KindTag::Text => "$value = '';",
        }
    }
}

/// Display-only decoration; the engine never reads it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisplaySettings {
    pub prefix: String,
    pub suffix: String,
}

/// Immutable description of one computed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedFieldDescriptor {
    pub kind: ValueKind,
    pub expression: String,
    #[serde(default)]
    pub display: DisplaySettings,
    /// Minimum number of instances computed on save.
    #[serde(default = "default_cardinality")]
    pub cardinality: usize,
}

impl ComputedFieldDescriptor {
    pub fn new(kind: ValueKind, expression: impl Into<String>) -> Self {
        Self {
            kind,
            expression: expression.into(),
            display: DisplaySettings::default(),
            cardinality: 1,
        }
    }

    pub fn with_cardinality(mut self, cardinality: usize) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Full check used when settings are saved: storage ranges and a
    /// non-empty expression.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.kind.validate()?;
        if self.expression.trim().is_empty() {
            return Err(SettingsError::EmptyExpression);
        }
        Ok(())
    }
}

impl TryFrom<FieldSettings> for ComputedFieldDescriptor {
    type Error = SettingsError;

    /// Maps a settings document onto a descriptor and validates its storage
    /// ranges. An explicitly empty `code` is kept; it is rejected only by
    /// [`ComputedFieldDescriptor::validate`].
    fn try_from(settings: FieldSettings) -> Result<Self, Self::Error> {
        let kind = match settings.kind {
            KindTag::Decimal => ValueKind::Decimal {
                precision: settings.precision,
                scale: settings.scale,
            },
            KindTag::Integer => ValueKind::Integer {
                unsigned: settings.unsigned,
                size: settings.size,
            },
            KindTag::Text => ValueKind::Text {
                max_length: settings.max_length,
                ascii_only: settings.is_ascii,
            },
        };
        kind.validate()?;
        let expression = settings
            .code
            .clone()
            .unwrap_or_else(|| settings.default_code().to_string());
        Ok(Self {
            kind,
            expression,
            display: DisplaySettings {
                prefix: settings.prefix,
                suffix: settings.suffix,
            },
            cardinality: settings.cardinality.max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_a_new_field() {
        let d = ComputedFieldDescriptor::try_from(
            FieldSettings::from_json_str(r#"{"type": "computed_decimal"}"#).unwrap(),
        )
        .unwrap();
        assert_eq!(d.kind, ValueKind::decimal(10, 2));
        assert_eq!(d.expression, "$value = 0;");
        assert_eq!(d.cardinality, 1);

        let t = ComputedFieldDescriptor::try_from(FieldSettings::new(KindTag::Text)).unwrap();
        assert_eq!(
            t.kind,
            ValueKind::Text {
                max_length: 255,
                ascii_only: false
            }
        );
        assert_eq!(t.expression, "$value = '';");
    }

    #[test]
    fn integer_settings_map() {
        let s = FieldSettings::from_json_str(
            r##"{"type": "integer", "code": "$value = 1;", "unsigned": true, "size": "tiny", "prefix": "#"}"##,
        )
        .unwrap();
        let d = ComputedFieldDescriptor::try_from(s).unwrap();
        assert_eq!(d.kind, ValueKind::integer(true, SizeClass::Tiny));
        assert_eq!(d.display.prefix, "#");
    }

    #[test]
    fn out_of_range_settings_are_rejected() {
        let mut s = FieldSettings::new(KindTag::Decimal);
        s.precision = 40;
        assert_eq!(
            ComputedFieldDescriptor::try_from(s).unwrap_err(),
            SettingsError::Precision(40)
        );
        let mut s = FieldSettings::new(KindTag::Text);
        s.max_length = 0;
        assert_eq!(
            ComputedFieldDescriptor::try_from(s).unwrap_err(),
            SettingsError::MaxLength
        );
    }

    #[test]
    fn empty_code_fails_validation_only() {
        let mut s = FieldSettings::new(KindTag::Integer);
        s.code = Some("  ".into());
        let d = ComputedFieldDescriptor::try_from(s).unwrap();
        assert_eq!(d.validate(), Err(SettingsError::EmptyExpression));
    }

    #[test]
    fn malformed_documents() {
        assert!(matches!(
            FieldSettings::from_json_str(r#"{"type": "blob"}"#),
            Err(SettingsError::Malformed(_))
        ));
    }
}
