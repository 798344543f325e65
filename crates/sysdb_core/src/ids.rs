use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::{SysdbError, SysdbResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Id(pub [u8; 16]);

impl Id {
    pub fn new() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// Time-ordered id: byte order follows creation order.
    pub fn new_time_ordered() -> Self {
        Self(*Uuid::now_v7().as_bytes())
    }

    pub fn from_uuid_str(value: &str) -> SysdbResult<Self> {
        let uuid = Uuid::parse_str(value)
            .map_err(|err| SysdbError::invalid(format!("invalid uuid '{value}': {err}")))?;
        Ok(Self(*uuid.as_bytes()))
    }

    pub fn to_uuid_string(self) -> String {
        Uuid::from_bytes(self.0).to_string()
    }

    pub fn to_uuid(self) -> Uuid {
        Uuid::from_bytes(self.0)
    }

    pub fn as_bytes(self) -> [u8; 16] {
        self.0
    }

    pub fn as_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uuid = Uuid::from_bytes(self.0);
        write!(f, "{uuid}")
    }
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_uuid_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Uuid::parse_str(&value)
            .map(|uuid| Id::from_bytes(*uuid.as_bytes()))
            .map_err(|_| serde::de::Error::custom("invalid Id string"))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct DatabaseId(pub Id);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CollectionId(pub Id);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SegmentId(pub Id);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct FunctionId(pub Id);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct AttachedFunctionId(pub Id);

/// Fencing token for one generation of attached-function work. Generated
/// nonces compare in issue order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Nonce(pub Id);

impl Nonce {
    pub fn generate() -> Self {
        Self(Id::new_time_ordered())
    }
}

macro_rules! id_wrapper {
    ($name:ident) => {
        impl $name {
            pub fn new() -> Self {
                Self(Id::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                Ok(Self(Id::deserialize(deserializer)?))
            }
        }
    };
}

id_wrapper!(DatabaseId);
id_wrapper!(CollectionId);
id_wrapper!(SegmentId);
id_wrapper!(FunctionId);
id_wrapper!(AttachedFunctionId);

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for Nonce {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Nonce {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Self(Id::deserialize(deserializer)?))
    }
}
