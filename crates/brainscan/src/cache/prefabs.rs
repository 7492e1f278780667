//! # Config Prefabs for Well-Known Model Configurations
//!
//! A prefab is a named model config; each prefab may carry a map of
//! pretrained weights for that config. A pretrained model is addressed as
//! ``"{prefab}.{weights}"``, e.g. ``"resnet18.tv_in1k"``.

use crate::cache::weights::{PretrainedWeightsDescriptor, StaticPretrainedWeightsMap};
use anyhow::bail;
use burn::config::Config;
use std::fmt::Debug;

/// Static builder for a well-known config.
pub struct StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the model config pre-fab.
    pub name: &'static str,

    /// Description of the model config pre-fab.
    pub description: &'static str,

    /// Builder function for the config.
    pub builder: fn() -> C,

    /// Pretrained weights for this config.
    pub weights: Option<&'static StaticPretrainedWeightsMap<'static>>,
}

impl<C> StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Build a new config.
    pub fn to_config(&self) -> C {
        (self.builder)()
    }

    /// Names of the available pretrained weights.
    pub fn weight_names(&self) -> Vec<&'static str> {
        match self.weights {
            Some(map) => map.items.iter().map(|d| d.name).collect(),
            None => Vec::new(),
        }
    }

    /// Lookup pretrained weights by name.
    pub fn try_lookup_pretrained_weights(
        &self,
        name: &str,
    ) -> anyhow::Result<PretrainedWeightsDescriptor> {
        match self.weights {
            Some(map) => map.to_map().try_lookup_by_name(name),
            None => bail!("Prefab \"{}\" has no pretrained weights", self.name),
        }
    }
}

impl<C> Debug for StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let pretty = f.alternate();

        let type_name = std::any::type_name::<C>();
        let mut handle = f.debug_struct(&format!("StaticPreFabConfig<{type_name}>"));

        handle
            .field("name", &self.name)
            .field("description", &self.description)
            .field("weights", &self.weight_names());

        if pretty {
            handle.field("config", &self.to_config());
        }

        handle.finish()
    }
}

/// A named catalogue of [`StaticPreFabConfig`]s.
#[derive(Debug)]
pub struct StaticPreFabMap<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the catalogue.
    pub name: &'static str,

    /// Description of the catalogue.
    pub description: &'static str,

    /// Catalogue entries.
    pub items: &'static [&'static StaticPreFabConfig<C>],
}

impl<C> StaticPreFabMap<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Lookup a prefab by name.
    pub fn lookup_prefab(
        &self,
        name: &str,
    ) -> Option<&'static StaticPreFabConfig<C>> {
        self.items.iter().copied().find(|p| p.name == name)
    }

    /// Lookup a prefab by name, failing on unknown names.
    pub fn try_lookup_prefab(
        &self,
        name: &str,
    ) -> anyhow::Result<&'static StaticPreFabConfig<C>> {
        match self.lookup_prefab(name) {
            Some(prefab) => Ok(prefab),
            None => bail!(
                "Unknown {} prefab: {name} (available: {:?})",
                self.name,
                self.items.iter().map(|p| p.name).collect::<Vec<_>>()
            ),
        }
    }

    /// Resolve ``"{prefab}"`` or ``"{prefab}.{weights}"``.
    ///
    /// # Returns
    ///
    /// The prefab config, and the weights descriptor when one was named.
    pub fn resolve(
        &self,
        qualified_name: &str,
    ) -> anyhow::Result<(C, Option<PretrainedWeightsDescriptor>)> {
        let (prefab_name, weights_name) = match qualified_name.split_once('.') {
            Some((prefab, weights)) => (prefab, Some(weights)),
            None => (qualified_name, None),
        };

        let prefab = self.try_lookup_prefab(prefab_name)?;
        let weights = match weights_name {
            Some(name) => Some(prefab.try_lookup_pretrained_weights(name)?),
            None => None,
        };

        Ok((prefab.to_config(), weights))
    }

    /// All fully qualified ``"{prefab}.{weights}"`` names.
    pub fn pretrained_names(&self) -> Vec<String> {
        self.items
            .iter()
            .flat_map(|prefab| {
                prefab
                    .weight_names()
                    .into_iter()
                    .map(move |w| format!("{}.{}", prefab.name, w))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::weights::StaticPretrainedWeightsDescriptor;

    #[derive(Config, Debug)]
    struct ToyConfig {
        width: usize,
    }

    static TOY_MAP: StaticPreFabMap<ToyConfig> = StaticPreFabMap {
        name: "toy",
        description: "toy configs",
        items: &[
            &StaticPreFabConfig {
                name: "small",
                description: "a small toy",
                builder: || ToyConfig::new(4),
                weights: Some(&StaticPretrainedWeightsMap {
                    items: &[&StaticPretrainedWeightsDescriptor {
                        name: "v1",
                        description: "toy weights",
                        license: None,
                        origin: None,
                        urls: &["https://example.com/small-v1.pth"],
                    }],
                }),
            },
            &StaticPreFabConfig {
                name: "large",
                description: "a large toy",
                builder: || ToyConfig::new(64),
                weights: None,
            },
        ],
    };

    #[test]
    fn test_resolve_with_weights() {
        let (config, weights) = TOY_MAP.resolve("small.v1").unwrap();
        assert_eq!(config.width, 4);
        assert_eq!(weights.unwrap().name, "v1");
    }

    #[test]
    fn test_resolve_without_weights() {
        let (config, weights) = TOY_MAP.resolve("large").unwrap();
        assert_eq!(config.width, 64);
        assert!(weights.is_none());
    }

    #[test]
    fn test_resolve_errors() {
        assert!(TOY_MAP.resolve("medium").is_err());
        assert!(TOY_MAP.resolve("small.v2").is_err());
        assert!(TOY_MAP.resolve("large.v1").is_err());
    }

    #[test]
    fn test_pretrained_names() {
        assert_eq!(TOY_MAP.pretrained_names(), vec!["small.v1".to_string()]);
    }

    #[test]
    fn test_debug_format() {
        let prefab = TOY_MAP.lookup_prefab("small").unwrap();
        let text = format!("{prefab:?}");
        assert!(text.contains("small"));
        assert!(!text.contains("width"));

        let pretty = format!("{prefab:#?}");
        assert!(pretty.contains("width"));
    }
}
