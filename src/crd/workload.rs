//! # Workloads
//!
//! Identifiers for the Deployments the operator manages, plus the
//! `ACTIVE_BACKEND` alias used by watch configuration.

use crate::constants::{
    ACTIVE_BACKEND_ALIAS, APP_SERVER_DEPLOYMENT, CONSOLE_DEPLOYMENT, CORE_DEPLOYMENT,
    POSTGRES_DEPLOYMENT,
};
use crate::crd::{ApiBackend, ConditionType};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A concrete managed workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Workload {
    ConsolePlugin,
    Cache,
    AppServer,
    Core,
}

impl Workload {
    #[must_use]
    pub fn deployment_name(self) -> &'static str {
        match self {
            Workload::ConsolePlugin => CONSOLE_DEPLOYMENT,
            Workload::Cache => POSTGRES_DEPLOYMENT,
            Workload::AppServer => APP_SERVER_DEPLOYMENT,
            Workload::Core => CORE_DEPLOYMENT,
        }
    }

    #[must_use]
    pub fn from_deployment_name(name: &str) -> Option<Self> {
        match name {
            CONSOLE_DEPLOYMENT => Some(Workload::ConsolePlugin),
            POSTGRES_DEPLOYMENT => Some(Workload::Cache),
            APP_SERVER_DEPLOYMENT => Some(Workload::AppServer),
            CORE_DEPLOYMENT => Some(Workload::Core),
            _ => None,
        }
    }

    /// Condition type summarizing this workload's health
    #[must_use]
    pub fn condition_type(self) -> ConditionType {
        match self {
            Workload::ConsolePlugin => ConditionType::ConsolePluginReady,
            Workload::Cache => ConditionType::CacheReady,
            Workload::AppServer | Workload::Core => ConditionType::ApiReady,
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.deployment_name())
    }
}

impl ApiBackend {
    #[must_use]
    pub fn workload(self) -> Workload {
        match self {
            ApiBackend::AppServer => Workload::AppServer,
            ApiBackend::Core => Workload::Core,
        }
    }
}

/// A workload named directly or through the active-backend alias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadRef {
    Workload(Workload),
    ActiveBackend,
}

impl WorkloadRef {
    #[must_use]
    pub fn resolve(self, active_backend: ApiBackend) -> Workload {
        match self {
            WorkloadRef::Workload(workload) => workload,
            WorkloadRef::ActiveBackend => active_backend.workload(),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadRef::Workload(workload) => workload.deployment_name(),
            WorkloadRef::ActiveBackend => ACTIVE_BACKEND_ALIAS,
        }
    }
}

impl From<Workload> for WorkloadRef {
    fn from(workload: Workload) -> Self {
        WorkloadRef::Workload(workload)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown workload identifier '{0}'")]
pub struct UnknownWorkload(pub String);

impl FromStr for WorkloadRef {
    type Err = UnknownWorkload;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == ACTIVE_BACKEND_ALIAS {
            return Ok(WorkloadRef::ActiveBackend);
        }
        Workload::from_deployment_name(s)
            .map(WorkloadRef::Workload)
            .ok_or_else(|| UnknownWorkload(s.to_string()))
    }
}

impl Serialize for WorkloadRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for WorkloadRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_resolves_to_active_backend() {
        assert_eq!(
            WorkloadRef::ActiveBackend.resolve(ApiBackend::AppServer),
            Workload::AppServer
        );
        assert_eq!(
            WorkloadRef::ActiveBackend.resolve(ApiBackend::Core),
            Workload::Core
        );
        assert_eq!(
            WorkloadRef::Workload(Workload::Cache).resolve(ApiBackend::Core),
            Workload::Cache
        );
    }

    #[test]
    fn test_parse_workload_identifiers() {
        assert_eq!(
            "ACTIVE_BACKEND".parse::<WorkloadRef>().unwrap(),
            WorkloadRef::ActiveBackend
        );
        assert_eq!(
            CONSOLE_DEPLOYMENT.parse::<WorkloadRef>().unwrap(),
            WorkloadRef::Workload(Workload::ConsolePlugin)
        );
        assert!("lightspeed".parse::<WorkloadRef>().is_err());
    }

    #[test]
    fn test_both_backends_share_condition() {
        assert_eq!(Workload::AppServer.condition_type(), ConditionType::ApiReady);
        assert_eq!(Workload::Core.condition_type(), ConditionType::ApiReady);
    }
}
