//! Named transform chains.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use edgeflow_core::topics::topic_matches;

use crate::data::Transform;

/// Id of the default pipeline.
pub const DEFAULT_PIPELINE_ID: &str = "default";

/// A named, ordered chain of transforms with a topic pattern list.
///
/// The hash fingerprints the transform list and changes whenever the list
/// does; store-and-forward uses it to invalidate retained items after a
/// pipeline is reconfigured.
#[derive(Clone)]
pub struct FunctionPipeline {
    id: String,
    topics: Vec<String>,
    transforms: Vec<Arc<dyn Transform>>,
    hash: String,
}

impl FunctionPipeline {
    /// Create a pipeline with the given topic patterns.
    pub fn new(
        id: impl Into<String>,
        topics: Vec<String>,
        transforms: Vec<Arc<dyn Transform>>,
    ) -> Self {
        let hash = compute_hash(&transforms);
        Self {
            id: id.into(),
            topics,
            transforms,
            hash,
        }
    }

    /// Create the default pipeline: id `default`, topics `["#"]`.
    pub fn new_default(transforms: Vec<Arc<dyn Transform>>) -> Self {
        Self::new(DEFAULT_PIPELINE_ID, vec!["#".to_string()], transforms)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_PIPELINE_ID
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn transforms(&self) -> &[Arc<dyn Transform>] {
        &self.transforms
    }

    /// Content fingerprint of the transform list.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Replace the transform list, recomputing the hash.
    pub fn set_transforms(&mut self, transforms: Vec<Arc<dyn Transform>>) {
        self.hash = compute_hash(&transforms);
        self.transforms = transforms;
    }

    /// Whether any of this pipeline's patterns matches the topic.
    pub fn matches_topic(&self, topic: &str) -> bool {
        self.topics.iter().any(|p| topic_matches(p, topic))
    }
}

fn compute_hash(transforms: &[Arc<dyn Transform>]) -> String {
    let mut hasher = Sha256::new();
    for transform in transforms {
        hasher.update(transform.fingerprint().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PipelineData, TransformResult};
    use async_trait::async_trait;
    use edgeflow_core::context::Context;

    struct Named(&'static str);

    #[async_trait]
    impl Transform for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _ctx: &mut Context, input: PipelineData) -> TransformResult {
            Ok(Some(input))
        }
    }

    fn transforms(names: &[&'static str]) -> Vec<Arc<dyn Transform>> {
        names
            .iter()
            .map(|n| Arc::new(Named(n)) as Arc<dyn Transform>)
            .collect()
    }

    #[test]
    fn test_hash_is_stable() {
        let mut a = FunctionPipeline::new_default(transforms(&["A", "B"]));
        let first = a.hash().to_string();
        a.set_transforms(transforms(&["A", "B"]));
        assert_eq!(a.hash(), first);
    }

    #[test]
    fn test_swapping_transforms_changes_hash() {
        let a = FunctionPipeline::new_default(transforms(&["A", "B"]));
        let b = FunctionPipeline::new_default(transforms(&["B", "A"]));
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_set_transforms_recomputes_hash() {
        let mut pipeline = FunctionPipeline::new_default(transforms(&["A"]));
        let before = pipeline.hash().to_string();
        pipeline.set_transforms(transforms(&["A", "B"]));
        assert_ne!(pipeline.hash(), before);
    }

    #[test]
    fn test_default_pipeline_matches_everything() {
        let pipeline = FunctionPipeline::new_default(transforms(&["A"]));
        assert!(pipeline.is_default());
        assert!(pipeline.matches_topic("any/topic/at/all"));
    }

    #[test]
    fn test_matches_any_of_multiple_topics() {
        let pipeline = FunctionPipeline::new(
            "p1",
            vec!["a/#".to_string(), "b/c".to_string()],
            transforms(&["A"]),
        );
        assert!(pipeline.matches_topic("a/x/y"));
        assert!(pipeline.matches_topic("b/c"));
        assert!(!pipeline.matches_topic("c/d"));
    }
}
