use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::schema::{FieldSpec, Fields, OutputSchema, ValueRule};

/// The annotation jobs the pipeline knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationTask {
    Translation,
    Classification,
    Root,
    GrammaticalForm,
    Wazn,
    PartOfSpeech,
}

const TRANSLATION_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("english", "english", ValueRule::Any),
    FieldSpec::new("spanish", "spanish", ValueRule::Any),
    FieldSpec::new("urdu", "urdu", ValueRule::Any),
    FieldSpec::new("transliteration", "transliteration", ValueRule::Any),
];

pub const CONCRETE_SUBCLASSES: &[&str] = &["MAA", "HAB", "HGN", "AI"];
pub const ABSTRACT_SUBCLASSES: &[&str] = &["MS", "MP", "SOC", "LS"];
const ALL_SUBCLASSES: &[&str] = &["MAA", "HAB", "HGN", "AI", "MS", "MP", "SOC", "LS"];

const CLASSIFICATION_FIELDS: &[FieldSpec] = &[
    FieldSpec::new(
        "classification",
        "classification",
        ValueRule::OneOf(&["Concrete", "Abstract"]),
    ),
    FieldSpec::new("subclass", "subclass", ValueRule::OneOf(ALL_SUBCLASSES)),
];

pub const GRAMMATICAL_FORMS: &[&str] = &[
    "المصدر",
    "اسم الفاعل",
    "اسم المفعول",
    "اسم المكان",
    "اسم الحال",
    "اسم الآلة",
    "اسم ذات",
    "اسم المبالغة",
    "اسم العلة",
];

const WAZN_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("wazn", "wazn", ValueRule::Any),
    FieldSpec::new("form", "wazn_form", ValueRule::Any),
];

impl AnnotationTask {
    pub const ALL: [AnnotationTask; 6] = [
        AnnotationTask::Translation,
        AnnotationTask::Classification,
        AnnotationTask::Root,
        AnnotationTask::GrammaticalForm,
        AnnotationTask::Wazn,
        AnnotationTask::PartOfSpeech,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AnnotationTask::Translation => "translation",
            AnnotationTask::Classification => "classification",
            AnnotationTask::Root => "root",
            AnnotationTask::GrammaticalForm => "grammatical_form",
            AnnotationTask::Wazn => "wazn",
            AnnotationTask::PartOfSpeech => "part_of_speech",
        }
    }

    pub fn schema(&self) -> OutputSchema {
        match self {
            AnnotationTask::Translation => OutputSchema::Json {
                fields: TRANSLATION_FIELDS,
                id_key: None,
            },
            AnnotationTask::Classification => OutputSchema::Delimited {
                separator: ';',
                fields: CLASSIFICATION_FIELDS,
            },
            AnnotationTask::Root => OutputSchema::Label(FieldSpec::new(
                "root",
                "suggested_root",
                ValueRule::RootLetters,
            )),
            AnnotationTask::GrammaticalForm => OutputSchema::Label(FieldSpec::new(
                "form",
                "form",
                ValueRule::OneOf(GRAMMATICAL_FORMS),
            )),
            AnnotationTask::Wazn => OutputSchema::Json {
                fields: WAZN_FIELDS,
                id_key: Some("id"),
            },
            AnnotationTask::PartOfSpeech => OutputSchema::Label(FieldSpec::new(
                "type",
                "word_type",
                ValueRule::OneOf(&["noun", "verb", "phrase", "letter"]),
            )),
        }
    }

    /// Whether the user prompt includes the record's dictionary context.
    pub fn uses_context(&self) -> bool {
        matches!(
            self,
            AnnotationTask::Translation | AnnotationTask::GrammaticalForm
        )
    }

    /// Checks between fields that a per-field rule cannot express.
    pub fn cross_check(&self, fields: &Fields) -> Result<(), ParseError> {
        if *self != AnnotationTask::Classification {
            return Ok(());
        }
        let Some(subclass) = fields.get("subclass") else {
            return Ok(());
        };
        let Some(class) = fields.get("classification") else {
            return Err(ParseError::Inconsistent(format!(
                "subclass {} given without a classification",
                subclass
            )));
        };
        let allowed = match class.as_str() {
            "Concrete" => CONCRETE_SUBCLASSES,
            _ => ABSTRACT_SUBCLASSES,
        };
        if allowed.contains(&subclass.as_str()) {
            Ok(())
        } else {
            Err(ParseError::Inconsistent(format!(
                "subclass {} is not a {} subclass",
                subclass, class
            )))
        }
    }
}

impl fmt::Display for AnnotationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AnnotationTask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_").to_lowercase();
        Self::ALL
            .into_iter()
            .find(|task| task.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|t| t.name()).collect();
                format!("unknown task '{}', expected one of: {}", s, known.join(", "))
            })
    }
}
