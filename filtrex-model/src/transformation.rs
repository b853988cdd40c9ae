use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Named, pure rule-list transformation recognized by the pipeline.
///
/// The wire names match the configuration format exactly; unrecognized
/// names fail deserialization rather than being silently skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformationKind {
    RemoveComments,
    RemoveEmptyLines,
    TrimLines,
    Deduplicate,
    Compress,
    RemoveModifiers,
    Validate,
    InvertAllow,
    InsertFinalNewLine,
}

impl TransformationKind {
    pub const ALL: [TransformationKind; 9] = [
        TransformationKind::RemoveComments,
        TransformationKind::RemoveEmptyLines,
        TransformationKind::TrimLines,
        TransformationKind::Deduplicate,
        TransformationKind::Compress,
        TransformationKind::RemoveModifiers,
        TransformationKind::Validate,
        TransformationKind::InvertAllow,
        TransformationKind::InsertFinalNewLine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransformationKind::RemoveComments => "RemoveComments",
            TransformationKind::RemoveEmptyLines => "RemoveEmptyLines",
            TransformationKind::TrimLines => "TrimLines",
            TransformationKind::Deduplicate => "Deduplicate",
            TransformationKind::Compress => "Compress",
            TransformationKind::RemoveModifiers => "RemoveModifiers",
            TransformationKind::Validate => "Validate",
            TransformationKind::InvertAllow => "InvertAllow",
            TransformationKind::InsertFinalNewLine => "InsertFinalNewLine",
        }
    }
}

impl fmt::Display for TransformationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformationKind {
    type Err = UnknownTransformation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransformationKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownTransformation(s.to_string()))
    }
}

/// Error returned when a configuration names a transformation that does
/// not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transformation '{0}'")]
pub struct UnknownTransformation(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for kind in TransformationKind::ALL {
            assert_eq!(kind.as_str().parse::<TransformationKind>(), Ok(kind));
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert!("RemoveEverything".parse::<TransformationKind>().is_err());
        assert!(serde_json::from_str::<TransformationKind>("\"Sort\"").is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&TransformationKind::RemoveComments).unwrap();
        assert_eq!(json, "\"RemoveComments\"");
    }
}
