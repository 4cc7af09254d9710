use model::record::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// The label set that tells series of the same metric apart.
///
/// Label names and values are lower-cased on insertion. The map is sorted, so
/// the canonical encoding does not depend on the order labels were added in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Facet(BTreeMap<String, String>);

impl Facet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: &Value) {
        self.0.insert(name.to_lowercase(), value.render().to_lowercase());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn labels(&self) -> HashMap<String, String> {
        self.0.clone().into_iter().collect()
    }

    /// Canonical encoding: a JSON object with keys in sorted order.
    pub fn encode(&self) -> String {
        let pairs: Vec<String> = self
            .0
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}:{}",
                    serde_json::Value::from(name.as_str()),
                    serde_json::Value::from(value.as_str())
                )
            })
            .collect();
        format!("{{{}}}", pairs.join(","))
    }
}

impl<'a, V: Into<Value>> FromIterator<(&'a str, V)> for Facet {
    fn from_iter<T: IntoIterator<Item = (&'a str, V)>>(iter: T) -> Self {
        let mut facet = Facet::new();
        for (name, value) in iter {
            facet.insert(name, &value.into());
        }
        facet
    }
}

/// Identifies one series within a metric registry: the metric base name
/// followed by the facet encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey(String);

impl SeriesKey {
    pub fn new(base_name: &str, facet: &Facet) -> Self {
        Self(format!("{base_name}{}", facet.encode()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
