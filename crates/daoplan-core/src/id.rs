//! Strongly-typed identifiers used across the compiler and runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_name {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(v: impl Into<String>) -> Self {
                Self(v.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

new_name!(InterfaceId);
new_name!(MethodName);

/// Full method identity: `Interface.method`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub struct MethodId {
    pub interface: InterfaceId,
    pub method: MethodName,
}

impl MethodId {
    pub fn new(interface: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            interface: InterfaceId::new(interface),
            method: MethodName::new(method),
        }
    }

    pub fn name(&self) -> &str {
        self.method.as_str()
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.interface, self.method)
    }
}
