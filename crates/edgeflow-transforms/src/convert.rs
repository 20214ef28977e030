//! Event format conversion (the catalog's `Transform` function).

use std::collections::HashMap;

use async_trait::async_trait;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event as XmlEvent};
use quick_xml::Writer;

use edgeflow_core::envelope::CONTENT_TYPE_JSON;
use edgeflow_core::{Context, Event, Reading};
use edgeflow_runtime::{PipelineData, Transform, TransformError, TransformResult};

use crate::error::{ConfigurationError, Result};
use crate::params;

pub const CONTENT_TYPE_XML: &str = "application/xml";

/// Target format for [`Conversion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionType {
    Xml,
    Json,
}

/// Serializes the Event into XML or JSON text and marks the response
/// content type accordingly.
pub struct Conversion {
    kind: ConversionType,
}

impl Conversion {
    pub fn new(kind: ConversionType) -> Self {
        Self { kind }
    }

    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let kind = params::required(params, "Transform", "type")?;
        match kind.to_lowercase().as_str() {
            "xml" => Ok(Self::new(ConversionType::Xml)),
            "json" => Ok(Self::new(ConversionType::Json)),
            other => Err(ConfigurationError::InvalidParameter {
                function: "Transform".to_string(),
                parameter: "type".to_string(),
                message: format!("{other} is not xml or json"),
            }),
        }
    }
}

#[async_trait]
impl Transform for Conversion {
    fn name(&self) -> &str {
        "Transform"
    }

    fn fingerprint(&self) -> String {
        let kind = match self.kind {
            ConversionType::Xml => "xml",
            ConversionType::Json => "json",
        };
        params::fingerprint(self.name(), &[kind])
    }

    async fn run(&self, ctx: &mut Context, input: PipelineData) -> TransformResult {
        let event = input
            .as_event()
            .ok_or_else(|| TransformError::new("Transform: expected an Event"))?;
        match self.kind {
            ConversionType::Xml => {
                let xml = event_to_xml(event)?;
                ctx.set_response_content_type(CONTENT_TYPE_XML);
                Ok(Some(PipelineData::Text(xml)))
            }
            ConversionType::Json => {
                let bytes = edgeflow_core::encode_json(event)
                    .map_err(|e| TransformError::new(e.to_string()))?;
                ctx.set_response_content_type(CONTENT_TYPE_JSON);
                Ok(Some(PipelineData::Bytes(bytes)))
            }
        }
    }
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    tag: &str,
    value: &str,
) -> std::result::Result<(), TransformError> {
    writer
        .write_event(XmlEvent::Start(BytesStart::new(tag)))
        .and_then(|_| writer.write_event(XmlEvent::Text(BytesText::new(value))))
        .and_then(|_| writer.write_event(XmlEvent::End(BytesEnd::new(tag))))
        .map_err(|e| TransformError::new(format!("xml write failed: {e}")))
}

fn write_reading<W: std::io::Write>(
    writer: &mut Writer<W>,
    reading: &Reading,
) -> std::result::Result<(), TransformError> {
    let xml_err = |e| TransformError::new(format!("xml write failed: {e}"));
    writer
        .write_event(XmlEvent::Start(BytesStart::new("Readings")))
        .map_err(xml_err)?;
    write_text_element(writer, "Id", &reading.id)?;
    write_text_element(writer, "Origin", &reading.origin.to_string())?;
    write_text_element(writer, "DeviceName", &reading.device_name)?;
    write_text_element(writer, "ResourceName", &reading.resource_name)?;
    write_text_element(writer, "ProfileName", &reading.profile_name)?;
    write_text_element(writer, "ValueType", &reading.value_type)?;
    if !reading.value.is_empty() {
        write_text_element(writer, "Value", &reading.value)?;
    }
    if let Some(binary) = &reading.binary_value {
        use base64::Engine as _;
        let encoded = base64::engine::general_purpose::STANDARD.encode(binary);
        write_text_element(writer, "BinaryValue", &encoded)?;
        write_text_element(writer, "MediaType", &reading.media_type)?;
    }
    if let Some(object) = &reading.object_value {
        write_text_element(writer, "ObjectValue", &object.to_string())?;
    }
    writer
        .write_event(XmlEvent::End(BytesEnd::new("Readings")))
        .map_err(xml_err)
}

/// Renders the Event DTO as an XML document.
pub fn event_to_xml(event: &Event) -> std::result::Result<String, TransformError> {
    let xml_err = |e| TransformError::new(format!("xml write failed: {e}"));
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(XmlEvent::Start(BytesStart::new("Event")))
        .map_err(xml_err)?;
    write_text_element(&mut writer, "Id", &event.id)?;
    write_text_element(&mut writer, "DeviceName", &event.device_name)?;
    write_text_element(&mut writer, "ProfileName", &event.profile_name)?;
    write_text_element(&mut writer, "SourceName", &event.source_name)?;
    write_text_element(&mut writer, "Origin", &event.origin.to_string())?;
    for reading in &event.readings {
        write_reading(&mut writer, reading)?;
    }
    if let Some(tags) = &event.tags {
        for (key, value) in tags {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            writer
                .write_event(XmlEvent::Start(BytesStart::new("Tags")))
                .map_err(xml_err)?;
            write_text_element(&mut writer, key, &rendered)?;
            writer
                .write_event(XmlEvent::End(BytesEnd::new("Tags")))
                .map_err(xml_err)?;
        }
    }
    writer
        .write_event(XmlEvent::End(BytesEnd::new("Event")))
        .map_err(xml_err)?;
    String::from_utf8(writer.into_inner())
        .map_err(|e| TransformError::new(format!("xml output not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgeflow_core::envelope::CONTENT_TYPE_JSON;

    fn event() -> Event {
        let mut event = Event::new("ProfA", "DevA", "SourceX");
        event.add_simple_reading("Temperature", "Int64", "72");
        event
    }

    #[tokio::test]
    async fn xml_conversion_produces_document_and_content_type() {
        let mut ctx = Context::new("corr", CONTENT_TYPE_JSON);
        let transform = Conversion::new(ConversionType::Xml);
        let out = transform
            .run(&mut ctx, PipelineData::Event(event()))
            .await
            .unwrap()
            .unwrap();
        match out {
            PipelineData::Text(xml) => {
                assert!(xml.starts_with("<Event>"));
                assert!(xml.contains("<DeviceName>DevA</DeviceName>"));
                assert!(xml.contains("<ResourceName>Temperature</ResourceName>"));
                assert!(xml.ends_with("</Event>"));
            }
            other => panic!("expected text output, got {other:?}"),
        }
        assert_eq!(ctx.response_content_type(), CONTENT_TYPE_XML);
    }

    #[tokio::test]
    async fn json_conversion_round_trips() {
        let mut ctx = Context::new("corr", CONTENT_TYPE_JSON);
        let transform = Conversion::new(ConversionType::Json);
        let source = event();
        let out = transform
            .run(&mut ctx, PipelineData::Event(source.clone()))
            .await
            .unwrap()
            .unwrap();
        let bytes = out.to_bytes().unwrap();
        let decoded: Event = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, source);
    }

    #[test]
    fn from_params_rejects_unknown_type() {
        let mut params = HashMap::new();
        params.insert("type".to_string(), "yaml".to_string());
        assert!(Conversion::from_params(&params).is_err());
    }
}
