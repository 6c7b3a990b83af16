use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The `noarch` field of a package record.
///
/// Noarch packages are platform independent. Old-style noarch packages are
/// indicated by `noarch: true` in the repodata; new style packages use the
/// strings `generic` or `python`. `noarch: python` packages require special
/// linking: their files move into the interpreter's `site-packages`
/// directory and bytecode is compiled at install time.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub struct NoArchType(pub Option<RawNoArchType>);

/// The actual noarch kinds that occur in repodata.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RawNoArchType {
    /// An old-style noarch package, serialized as `true`.
    GenericV1,

    /// A new-style platform independent package, serialized as `"generic"`.
    GenericV2,

    /// A platform independent python package, serialized as `"python"`.
    Python,
}

impl NoArchType {
    /// A package that is not a noarch package.
    pub fn none() -> Self {
        Self(None)
    }

    /// A `noarch: python` package.
    pub fn python() -> Self {
        Self(Some(RawNoArchType::Python))
    }

    /// A `noarch: generic` package.
    pub fn generic() -> Self {
        Self(Some(RawNoArchType::GenericV2))
    }

    /// Returns true if this is not a noarch package.
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Returns true if this is a `noarch: python` package.
    pub fn is_python(&self) -> bool {
        matches!(self.0, Some(RawNoArchType::Python))
    }
}

impl Serialize for NoArchType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            None => serializer.serialize_none(),
            Some(RawNoArchType::GenericV1) => serializer.serialize_bool(true),
            Some(RawNoArchType::GenericV2) => serializer.serialize_str("generic"),
            Some(RawNoArchType::Python) => serializer.serialize_str("python"),
        }
    }
}

impl<'de> Deserialize<'de> for NoArchType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            String(String),
        }

        let raw = Option::<Raw>::deserialize(deserializer)?;
        Ok(match raw {
            None | Some(Raw::Bool(false)) => NoArchType(None),
            Some(Raw::Bool(true)) => NoArchType(Some(RawNoArchType::GenericV1)),
            Some(Raw::String(str)) => match str.as_str() {
                "generic" => NoArchType(Some(RawNoArchType::GenericV2)),
                "python" => NoArchType(Some(RawNoArchType::Python)),
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "invalid noarch type '{other}'"
                    )))
                }
            },
        })
    }
}

#[cfg(test)]
mod test {
    use super::NoArchType;

    #[derive(serde::Deserialize)]
    struct Record {
        #[serde(default)]
        noarch: NoArchType,
    }

    #[test]
    fn test_deserialize() {
        let record: Record = serde_json::from_str(r#"{"noarch": "python"}"#).unwrap();
        assert!(record.noarch.is_python());

        let record: Record = serde_json::from_str(r#"{"noarch": "generic"}"#).unwrap();
        assert!(!record.noarch.is_python());
        assert!(!record.noarch.is_none());

        let record: Record = serde_json::from_str(r#"{"noarch": true}"#).unwrap();
        assert!(!record.noarch.is_none());

        let record: Record = serde_json::from_str(r#"{}"#).unwrap();
        assert!(record.noarch.is_none());
    }
}
