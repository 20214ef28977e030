//! Configurable pipeline loader.
//!
//! Turns the writable `Pipeline` configuration block into executable
//! [`FunctionPipeline`]s by resolving each configured function name
//! through the [`TransformRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use edgeflow_core::config::PipelineConfig;
use edgeflow_runtime::{FunctionPipeline, Transform, DEFAULT_PIPELINE_ID};

use crate::error::{ConfigurationError, Result};
use crate::params;
use crate::registry::TransformRegistry;

/// Build every configured pipeline.
///
/// Unknown or ambiguous function names, duplicate pipeline ids and blank
/// topic strings are hard errors, as is a configuration that yields no
/// pipeline at all.
pub fn load_pipelines(
    config: &PipelineConfig,
    registry: &TransformRegistry,
) -> Result<Vec<FunctionPipeline>> {
    let mut pipelines = Vec::new();

    if !config.execution_order.trim().is_empty() {
        let transforms = build_transforms(&config.execution_order, config, registry)?;
        pipelines.push(FunctionPipeline::new_default(transforms));
    }

    for (id, topic_pipeline) in &config.per_topic_pipelines {
        let id = id.trim();
        if id.is_empty() || id == DEFAULT_PIPELINE_ID {
            return Err(ConfigurationError::DuplicatePipeline(id.to_string()));
        }
        if pipelines.iter().any(|p| p.id() == id) {
            return Err(ConfigurationError::DuplicatePipeline(id.to_string()));
        }

        let mut topics = Vec::new();
        for topic in topic_pipeline.topics.split(',') {
            let topic = topic.trim();
            if topic.is_empty() {
                return Err(ConfigurationError::BlankTopic(id.to_string()));
            }
            topics.push(topic.to_string());
        }
        if topics.is_empty() {
            return Err(ConfigurationError::BlankTopic(id.to_string()));
        }

        let transforms = build_transforms(&topic_pipeline.execution_order, config, registry)?;
        pipelines.push(FunctionPipeline::new(id, topics, transforms));
    }

    if pipelines.is_empty() {
        return Err(ConfigurationError::NoPipelines);
    }

    for pipeline in &pipelines {
        info!(
            pipeline = pipeline.id(),
            transforms = pipeline.transforms().len(),
            hash = pipeline.hash(),
            "pipeline loaded"
        );
    }
    Ok(pipelines)
}

fn build_transforms(
    execution_order: &str,
    config: &PipelineConfig,
    registry: &TransformRegistry,
) -> Result<Vec<Arc<dyn Transform>>> {
    let names = params::csv(execution_order);
    if names.is_empty() {
        return Err(ConfigurationError::EmptyExecutionOrder);
    }

    let empty = HashMap::new();
    let mut transforms = Vec::with_capacity(names.len());
    for name in names {
        let canonical = registry.resolve(&name)?;
        let parameters = config
            .functions
            .get(canonical)
            .or_else(|| config.functions.get(&name))
            .map(|f| &f.parameters)
            .unwrap_or(&empty);
        transforms.push(registry.create(&name, parameters)?);
    }
    Ok(transforms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::InMemorySecretProvider;
    use edgeflow_core::config::{PipelineFunctionConfig, TopicPipelineConfig};

    fn registry() -> TransformRegistry {
        TransformRegistry::with_builtins(Arc::new(InMemorySecretProvider::new()))
    }

    fn function(parameters: &[(&str, &str)]) -> PipelineFunctionConfig {
        PipelineFunctionConfig {
            parameters: parameters
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn default_pipeline_from_execution_order() {
        let mut config = PipelineConfig {
            execution_order: "FilterByDeviceName, SetResponseData".to_string(),
            ..Default::default()
        };
        config.functions.insert(
            "FilterByDeviceName".to_string(),
            function(&[("FilterValues", "DevA")]),
        );

        let pipelines = load_pipelines(&config, &registry()).unwrap();
        assert_eq!(pipelines.len(), 1);
        assert!(pipelines[0].is_default());
        assert_eq!(pipelines[0].topics(), ["#"]);
        assert_eq!(pipelines[0].transforms().len(), 2);
    }

    #[test]
    fn per_topic_pipelines_carry_their_topics() {
        let mut config = PipelineConfig {
            execution_order: "SetResponseData".to_string(),
            ..Default::default()
        };
        config.per_topic_pipelines.insert(
            "floor2".to_string(),
            TopicPipelineConfig {
                execution_order: "SetResponseData".to_string(),
                topics: "edgeflow/events/#, building/floor2/#".to_string(),
            },
        );

        let pipelines = load_pipelines(&config, &registry()).unwrap();
        assert_eq!(pipelines.len(), 2);
        let floor2 = pipelines.iter().find(|p| p.id() == "floor2").unwrap();
        assert_eq!(floor2.topics(), ["edgeflow/events/#", "building/floor2/#"]);
    }

    #[test]
    fn unknown_function_is_a_hard_error() {
        let config = PipelineConfig {
            execution_order: "NotARealFunction".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            load_pipelines(&config, &registry()),
            Err(ConfigurationError::UnknownFunction(_))
        ));
    }

    #[test]
    fn blank_topic_is_a_hard_error() {
        let mut config = PipelineConfig::default();
        config.per_topic_pipelines.insert(
            "p1".to_string(),
            TopicPipelineConfig {
                execution_order: "SetResponseData".to_string(),
                topics: "edgeflow/events/#,,other/#".to_string(),
            },
        );
        assert!(matches!(
            load_pipelines(&config, &registry()),
            Err(ConfigurationError::BlankTopic(_))
        ));
    }

    #[test]
    fn per_topic_pipeline_cannot_shadow_default_id() {
        let mut config = PipelineConfig::default();
        config.per_topic_pipelines.insert(
            DEFAULT_PIPELINE_ID.to_string(),
            TopicPipelineConfig {
                execution_order: "SetResponseData".to_string(),
                topics: "#".to_string(),
            },
        );
        assert!(matches!(
            load_pipelines(&config, &registry()),
            Err(ConfigurationError::DuplicatePipeline(_))
        ));
    }

    #[test]
    fn empty_configuration_is_rejected() {
        assert!(matches!(
            load_pipelines(&PipelineConfig::default(), &registry()),
            Err(ConfigurationError::NoPipelines)
        ));
    }

    #[test]
    fn function_parameters_reach_the_factory() {
        let mut config = PipelineConfig {
            execution_order: "Compress".to_string(),
            ..Default::default()
        };
        config.functions.insert(
            "Compress".to_string(),
            function(&[("Algorithm", "gzip")]),
        );
        assert!(load_pipelines(&config, &registry()).is_ok());

        config.functions.insert(
            "Compress".to_string(),
            function(&[("Algorithm", "lz4")]),
        );
        assert!(load_pipelines(&config, &registry()).is_err());
    }
}
