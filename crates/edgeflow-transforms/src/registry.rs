//! Built-in transform registry.
//!
//! An explicit name-to-factory map; configured function names are resolved
//! by case-insensitive prefix against it, and a prefix matching more than
//! one entry is a configuration error.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use edgeflow_runtime::Transform;

use crate::batch::Batch;
use crate::compress::Compress;
use crate::convert::Conversion;
use crate::encrypt::Encrypt;
use crate::error::{ConfigurationError, Result};
use crate::export_http::HttpExport;
use crate::export_mqtt::MqttExport;
use crate::filters::{Filter, FilterField};
use crate::jsonlogic::JsonLogic;
use crate::push::PushToCore;
use crate::response::SetResponseData;
use crate::secrets::SecretProvider;
use crate::tags::AddTags;

type Factory =
    Arc<dyn Fn(&HashMap<String, String>) -> Result<Arc<dyn Transform>> + Send + Sync>;

/// Name-indexed factory map for configurable transforms.
pub struct TransformRegistry {
    factories: BTreeMap<String, Factory>,
}

impl TransformRegistry {
    /// An empty registry; useful for services with only custom functions.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry holding the complete built-in catalog.
    pub fn with_builtins(secrets: Arc<dyn SecretProvider>) -> Self {
        let mut registry = Self::empty();

        registry.register("FilterByDeviceName", |params| {
            Ok(Arc::new(Filter::from_params(FilterField::DeviceName, params)?))
        });
        registry.register("FilterByProfileName", |params| {
            Ok(Arc::new(Filter::from_params(
                FilterField::ProfileName,
                params,
            )?))
        });
        registry.register("FilterBySourceName", |params| {
            Ok(Arc::new(Filter::from_params(FilterField::SourceName, params)?))
        });
        registry.register("FilterByResourceName", |params| {
            Ok(Arc::new(Filter::from_params(
                FilterField::ResourceName,
                params,
            )?))
        });
        registry.register("Transform", |params| {
            Ok(Arc::new(Conversion::from_params(params)?))
        });
        registry.register("Compress", |params| {
            Ok(Arc::new(Compress::from_params(params)?))
        });
        registry.register("SetResponseData", |params| {
            Ok(Arc::new(SetResponseData::from_params(params)?))
        });
        registry.register("AddTags", |params| Ok(Arc::new(AddTags::from_params(params)?)));
        registry.register("Batch", |params| Ok(Arc::new(Batch::from_params(params)?)));
        registry.register("JSONLogic", |params| {
            Ok(Arc::new(JsonLogic::from_params(params)?))
        });
        registry.register("PushToCore", |params| {
            Ok(Arc::new(PushToCore::from_params(params)?))
        });

        let provider = secrets.clone();
        registry.register("Encrypt", move |params| {
            Ok(Arc::new(Encrypt::from_params(params, provider.as_ref())?))
        });
        let provider = secrets.clone();
        registry.register("HTTPExport", move |params| {
            Ok(Arc::new(HttpExport::from_params(params, provider.as_ref())?))
        });
        let provider = secrets;
        registry.register("MQTTExport", move |params| {
            Ok(Arc::new(MqttExport::from_params(params, provider.clone())?))
        });

        registry
    }

    /// Register a factory under an exact name.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&HashMap<String, String>) -> Result<Arc<dyn Transform>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Resolve a configured name to its canonical registered name.
    ///
    /// An exact case-insensitive match wins outright; otherwise the name
    /// must be a case-insensitive prefix of exactly one registered name.
    pub fn resolve(&self, name: &str) -> Result<&str> {
        let wanted = name.trim().to_lowercase();
        if wanted.is_empty() {
            return Err(ConfigurationError::UnknownFunction(name.to_string()));
        }

        let mut matches: Vec<&str> = Vec::new();
        for registered in self.factories.keys() {
            let lowered = registered.to_lowercase();
            if lowered == wanted {
                return Ok(registered);
            }
            if lowered.starts_with(&wanted) {
                matches.push(registered);
            }
        }

        match matches.as_slice() {
            [single] => Ok(single),
            [] => Err(ConfigurationError::UnknownFunction(name.to_string())),
            many => Err(ConfigurationError::AmbiguousFunction {
                name: name.to_string(),
                matches: many.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }

    /// Resolve a name and build the transform from its parameter map.
    ///
    /// Parameter keys are lowercased before the factory sees them.
    pub fn create(
        &self,
        name: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<Arc<dyn Transform>> {
        let canonical = self.resolve(name)?;
        let factory = self
            .factories
            .get(canonical)
            .ok_or_else(|| ConfigurationError::UnknownFunction(name.to_string()))?;
        let lowered: HashMap<String, String> = parameters
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();
        factory(&lowered)
    }
}
