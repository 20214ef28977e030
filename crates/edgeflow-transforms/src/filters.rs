//! Event attribute filters.
//!
//! All four filters share one implementation parameterized by the Event
//! field they inspect. A filter that drops the message short-circuits the
//! pipeline with no output; it is not an error.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use edgeflow_core::Context;
use edgeflow_runtime::{PipelineData, Transform, TransformError};

use crate::error::Result;
use crate::params::{self, bool_param};

/// Which Event attribute a [`Filter`] matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    DeviceName,
    ProfileName,
    SourceName,
    ResourceName,
}

impl FilterField {
    fn transform_name(self) -> &'static str {
        match self {
            FilterField::DeviceName => "FilterByDeviceName",
            FilterField::ProfileName => "FilterByProfileName",
            FilterField::SourceName => "FilterBySourceName",
            FilterField::ResourceName => "FilterByResourceName",
        }
    }

    /// Typed parameter key accepted alongside the generic `FilterValues`.
    fn typed_key(self) -> &'static str {
        match self {
            FilterField::DeviceName => "devicenames",
            FilterField::ProfileName => "profilenames",
            FilterField::SourceName => "sourcenames",
            FilterField::ResourceName => "resourcenames",
        }
    }
}

/// Filters Events by one attribute against a configured value list.
pub struct Filter {
    field: FilterField,
    values: Vec<String>,
    filter_out: bool,
}

impl Filter {
    pub fn new(field: FilterField, values: Vec<String>, filter_out: bool) -> Self {
        Self {
            field,
            values,
            filter_out,
        }
    }

    pub fn from_params(field: FilterField, params: &HashMap<String, String>) -> Result<Self> {
        let name = field.transform_name();
        let raw = params::optional(params, "filtervalues")
            .or_else(|| params::optional(params, field.typed_key()))
            .unwrap_or_default();
        let filter_out = bool_param(params, name, "filterout", false)?;
        Ok(Self::new(field, params::csv(&raw), filter_out))
    }

    fn keeps(&self, value: &str) -> bool {
        let matched = self.values.iter().any(|v| v == value);
        matched != self.filter_out
    }
}

#[async_trait]
impl Transform for Filter {
    fn name(&self) -> &str {
        self.field.transform_name()
    }

    fn fingerprint(&self) -> String {
        params::fingerprint(
            self.name(),
            &[&self.values.join(","), &self.filter_out.to_string()],
        )
    }

    async fn run(
        &self,
        _ctx: &mut Context,
        input: PipelineData,
    ) -> std::result::Result<Option<PipelineData>, TransformError> {
        let event = input
            .as_event()
            .ok_or_else(|| TransformError::new(format!("{}: expected an Event", self.name())))?;

        // An empty value list filters nothing.
        if self.values.is_empty() {
            return Ok(Some(input));
        }

        match self.field {
            FilterField::DeviceName => {
                if self.keeps(&event.device_name) {
                    Ok(Some(input))
                } else {
                    debug!(device = %event.device_name, "event filtered by device name");
                    Ok(None)
                }
            }
            FilterField::ProfileName => {
                if self.keeps(&event.profile_name) {
                    Ok(Some(input))
                } else {
                    debug!(profile = %event.profile_name, "event filtered by profile name");
                    Ok(None)
                }
            }
            FilterField::SourceName => {
                if self.keeps(&event.source_name) {
                    Ok(Some(input))
                } else {
                    debug!(source = %event.source_name, "event filtered by source name");
                    Ok(None)
                }
            }
            FilterField::ResourceName => {
                let mut filtered = event.clone();
                filtered
                    .readings
                    .retain(|r| self.keeps(&r.resource_name));
                if filtered.readings.is_empty() {
                    debug!(event = %event.id, "no readings left after resource filter");
                    Ok(None)
                } else {
                    Ok(Some(PipelineData::Event(filtered)))
                }
            }
        }
    }
}
