//! Named tool sets a run can be bound to.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use infrapilot_core::tool::ToolRegistry;
use serde::{Deserialize, Serialize};

use crate::{ToolContext, infra_registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolProfile {
    /// Plain chat, no tools offered to the model
    None,
    /// The Terraform and AWS tools
    #[default]
    Infra,
}

impl ToolProfile {
    pub const ALL: [ToolProfile; 2] = [Self::None, Self::Infra];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Infra => "infra",
        }
    }
}

impl fmt::Display for ToolProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "infra" => Ok(Self::Infra),
            "none" => Ok(Self::None),
            other => Err(format!("Unsupported tool profile: {other}")),
        }
    }
}

/// One shared, immutable registry per profile.
#[derive(Clone)]
pub struct ToolProfiles {
    registries: BTreeMap<ToolProfile, Arc<ToolRegistry>>,
}

impl ToolProfiles {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        let mut registries = BTreeMap::new();
        registries.insert(ToolProfile::None, Arc::new(ToolRegistry::new()));
        registries.insert(ToolProfile::Infra, Arc::new(infra_registry(ctx)));
        Self { registries }
    }

    /// Profiles backed by caller-supplied registries.
    pub fn from_registries(registries: impl IntoIterator<Item = (ToolProfile, ToolRegistry)>) -> Self {
        let mut map: BTreeMap<_, _> = registries
            .into_iter()
            .map(|(profile, registry)| (profile, Arc::new(registry)))
            .collect();
        for profile in ToolProfile::ALL {
            map.entry(profile).or_insert_with(|| Arc::new(ToolRegistry::new()));
        }
        Self { registries: map }
    }

    pub fn get(&self, profile: ToolProfile) -> Arc<ToolRegistry> {
        self.registries
            .get(&profile)
            .cloned()
            .unwrap_or_else(|| Arc::new(ToolRegistry::new()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ToolProfile, &Arc<ToolRegistry>)> {
        self.registries.iter().map(|(p, r)| (*p, r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticAccess;
    use crate::test_support::echo_context;

    #[test]
    fn parse_profiles() {
        assert_eq!("infra".parse::<ToolProfile>().unwrap(), ToolProfile::Infra);
        assert_eq!(" NONE ".parse::<ToolProfile>().unwrap(), ToolProfile::None);
        assert_eq!("".parse::<ToolProfile>().unwrap(), ToolProfile::Infra);
        assert!("all".parse::<ToolProfile>().unwrap_err().contains("Unsupported tool profile"));
    }

    #[test]
    fn profiles_share_registries() {
        let profiles = ToolProfiles::new(echo_context(std::path::Path::new("/tmp"), StaticAccess::allow_all()));
        assert!(profiles.get(ToolProfile::None).is_empty());
        assert_eq!(profiles.get(ToolProfile::Infra).len(), 10);
        assert!(Arc::ptr_eq(&profiles.get(ToolProfile::Infra), &profiles.get(ToolProfile::Infra)));
    }

    #[test]
    fn missing_profiles_are_empty() {
        let profiles = ToolProfiles::from_registries(Vec::new());
        assert_eq!(profiles.iter().count(), 2);
        assert!(profiles.get(ToolProfile::Infra).is_empty());
    }
}
