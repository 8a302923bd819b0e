use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::catalog::{AttributeMap, MetricType};
use crate::error::{AgentError, Result};

/// Reference to one object on the management interface
///
/// Written as `domain:key=value,key=value`. Properties are kept in key
/// order, so two names with the same properties compare equal whatever
/// order they were written in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectName {
    domain: String,
    properties: BTreeMap<String, String>,
}

impl ObjectName {
    /// Build a name from a domain and its key properties
    pub fn new<I, K, V>(domain: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            domain: domain.into(),
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Value of a key property
    ///
    /// The remote side writes the literal string `null` for unset values;
    /// those are reported as absent, as are empty values.
    pub fn key_property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty() && *value != "null")
    }

    /// All key properties, in key order
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.domain)?;
        for (i, (key, value)) in self.properties.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

impl FromStr for ObjectName {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        let (domain, list) = split_domain(s)?;
        let mut properties = BTreeMap::new();

        for (key, value) in parse_property_list(s, list)? {
            if key == "*" || value.contains('*') {
                return Err(AgentError::Entity(format!(
                    "Object name '{}' contains a wildcard",
                    s
                )));
            }
            if properties.insert(key.clone(), value).is_some() {
                return Err(AgentError::Entity(format!(
                    "Duplicate key '{}' in object name '{}'",
                    key, s
                )));
            }
        }

        if properties.is_empty() {
            return Err(AgentError::Entity(format!(
                "Object name '{}' has no key properties",
                s
            )));
        }

        Ok(Self {
            domain: domain.to_string(),
            properties,
        })
    }
}

impl TryFrom<String> for ObjectName {
    type Error = AgentError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ObjectName> for String {
    fn from(name: ObjectName) -> Self {
        name.to_string()
    }
}

/// Name query with wildcards
///
/// Supports an exact domain (or `*`), `key=*` value wildcards, and a
/// trailing `*` in the property list meaning "any other keys too".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNamePattern {
    raw: String,
    domain: String,
    properties: Vec<(String, Option<String>)>,
    open_property_list: bool,
}

impl ObjectNamePattern {
    pub fn parse(s: &str) -> Result<Self> {
        let (domain, list) = split_domain(s)?;
        let mut properties = Vec::new();
        let mut open_property_list = false;

        for part in split_unquoted(list, ',') {
            if part == "*" {
                open_property_list = true;
                continue;
            }
            let (key, value) = parse_property(s, part)?;
            let value = if value == "*" { None } else { Some(value) };
            properties.push((key, value));
        }

        Ok(Self {
            raw: s.to_string(),
            domain: domain.to_string(),
            properties,
            open_property_list,
        })
    }

    /// Whether a name is selected by this pattern
    pub fn matches(&self, name: &ObjectName) -> bool {
        if self.domain != "*" && self.domain != name.domain {
            return false;
        }

        if !self.open_property_list && name.properties.len() != self.properties.len() {
            return false;
        }

        self.properties.iter().all(|(key, expected)| {
            match (name.properties.get(key), expected) {
                (Some(actual), Some(expected)) => actual == expected,
                (Some(_), None) => true,
                (None, _) => false,
            }
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ObjectNamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_domain(s: &str) -> Result<(&str, &str)> {
    match s.split_once(':') {
        Some((domain, list)) if !domain.is_empty() && !list.is_empty() => Ok((domain, list)),
        _ => Err(AgentError::Entity(format!("Malformed object name '{}'", s))),
    }
}

fn parse_property_list(raw: &str, list: &str) -> Result<Vec<(String, String)>> {
    split_unquoted(list, ',')
        .into_iter()
        .map(|part| parse_property(raw, part))
        .collect()
}

fn parse_property(raw: &str, part: &str) -> Result<(String, String)> {
    match part.split_once('=') {
        Some((key, value)) if !key.is_empty() && !value.is_empty() => {
            Ok((key.to_string(), value.to_string()))
        }
        _ => Err(AgentError::Entity(format!(
            "Malformed key property '{}' in '{}'",
            part, raw
        ))),
    }
}

/// Split on `sep`, ignoring separators inside double-quoted values
fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            c if c == sep && !quoted => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// A classified entity, ready to be sampled
#[derive(Debug, Clone)]
pub struct MetricSource {
    name: ObjectName,
    host: Option<String>,
    kind: String,
    attributes: AttributeMap,
}

impl MetricSource {
    /// Create a source; kind and attributes must both be non-empty
    pub fn new(
        name: ObjectName,
        host: Option<String>,
        kind: impl Into<String>,
        attributes: AttributeMap,
    ) -> Result<Self> {
        let kind = kind.into();

        if kind.is_empty() {
            return Err(AgentError::Entity(format!("Empty kind for {}", name)));
        }
        if attributes.is_empty() {
            return Err(AgentError::Entity(format!(
                "No attributes for {} (kind {})",
                name, kind
            )));
        }

        Ok(Self {
            name,
            host,
            kind,
            attributes,
        })
    }

    pub fn name(&self) -> &ObjectName {
        &self.name
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// Attribute names to request from the connection
    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.keys().cloned().collect()
    }

    pub fn metric_type(&self, attribute: &str) -> Option<MetricType> {
        self.attributes.get(attribute).copied()
    }
}

impl fmt::Display for MetricSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MetricSource{{name={}, host={}, kind={}}}",
            self.name,
            self.host.as_deref().unwrap_or("-"),
            self.kind
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use std::sync::Arc;

    #[test]
    fn test_parse_and_display() {
        let name: ObjectName = "org.cloudfoundry:job=router,deployment=cf,index=0,ip=10.0.0.1"
            .parse()
            .unwrap();
        assert_eq!(name.domain(), "org.cloudfoundry");
        assert_eq!(name.key_property("job"), Some("router"));
        assert_eq!(
            name.to_string(),
            "org.cloudfoundry:deployment=cf,index=0,ip=10.0.0.1,job=router"
        );
    }

    #[test]
    fn test_key_property_order_does_not_matter() {
        let a: ObjectName = "d:a=1,b=2".parse().unwrap();
        let b: ObjectName = "d:b=2,a=1".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_null_property_is_absent() {
        let name: ObjectName = "org.cloudfoundry:deployment=p-mysql,ip=null,job=mysql"
            .parse()
            .unwrap();
        assert_eq!(name.key_property("ip"), None);
        assert_eq!(name.key_property("job"), Some("mysql"));
        assert_eq!(name.key_property("index"), None);
    }

    #[test]
    fn test_quoted_value_with_comma() {
        let name: ObjectName = r#"d:name="a,b",type=x"#.parse().unwrap();
        assert_eq!(name.key_property("name"), Some(r#""a,b""#));
        assert_eq!(name.key_property("type"), Some("x"));
    }

    #[test]
    fn test_malformed_names() {
        assert!("no-colon".parse::<ObjectName>().is_err());
        assert!("d:".parse::<ObjectName>().is_err());
        assert!("d:key".parse::<ObjectName>().is_err());
        assert!("d:a=1,a=2".parse::<ObjectName>().is_err());
        assert!("d:*".parse::<ObjectName>().is_err());
    }

    #[test]
    fn test_closed_pattern() {
        let pattern =
            ObjectNamePattern::parse("org.cloudfoundry:deployment=cf,job=*,index=*,ip=*").unwrap();

        let platform: ObjectName = "org.cloudfoundry:deployment=cf,index=0,ip=10.0.0.1,job=uaa"
            .parse()
            .unwrap();
        let extra_key: ObjectName =
            "org.cloudfoundry:deployment=cf,index=0,ip=10.0.0.1,job=uaa,zone=z1"
                .parse()
                .unwrap();
        let other_deployment: ObjectName =
            "org.cloudfoundry:deployment=p-redis,index=0,ip=10.0.0.1,job=redis"
                .parse()
                .unwrap();

        assert!(pattern.matches(&platform));
        assert!(!pattern.matches(&extra_key));
        assert!(!pattern.matches(&other_deployment));
    }

    #[test]
    fn test_open_pattern() {
        let pattern = ObjectNamePattern::parse("org.cloudfoundry:*").unwrap();
        let name: ObjectName = "org.cloudfoundry:deployment=p-redis,job=redis".parse().unwrap();
        let foreign: ObjectName = "java.lang:type=Memory".parse().unwrap();

        assert!(pattern.matches(&name));
        assert!(!pattern.matches(&foreign));
        assert_eq!(pattern.to_string(), "org.cloudfoundry:*");
    }

    #[test]
    fn test_metric_source_invariants() {
        let catalog = Catalog::cloudfoundry();
        let name: ObjectName = "d:job=router".parse().unwrap();

        let source = MetricSource::new(
            name.clone(),
            Some("10.0.0.1".to_string()),
            "router",
            catalog.for_kind("router").unwrap().clone(),
        )
        .unwrap();
        assert_eq!(source.kind(), "router");
        assert_eq!(source.host(), Some("10.0.0.1"));
        assert_eq!(source.attribute_names().len(), 4);

        assert!(MetricSource::new(name.clone(), None, "", catalog.system().clone()).is_err());
        assert!(MetricSource::new(name, None, "router", Arc::default()).is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let name: ObjectName = "d:a=1".parse().unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"d:a=1\"");
        let back: ObjectName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }
}
