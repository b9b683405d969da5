//! Shared data models: the normalized location tuple and the response shape.

use serde::{Deserialize, Serialize};

/// Normalized administrative location.
///
/// All five fields are plain strings where the empty string means "unknown
/// at this layer". Equality is tuple equality of all five fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub country: String,
    pub region: String,
    pub province: String,
    pub city: String,
    pub isp: String,
}

impl Location {
    /// Returns whether every field is unknown.
    pub fn is_empty(&self) -> bool {
        self.country.is_empty()
            && self.region.is_empty()
            && self.province.is_empty()
            && self.city.is_empty()
            && self.isp.is_empty()
    }

    /// Returns whether the fine-grained fields (province or city) are missing.
    ///
    /// A partial location is what triggers the optional fusion pass on cache
    /// and local-index hits.
    pub fn is_partial(&self) -> bool {
        self.province.is_empty() || self.city.is_empty()
    }
}

/// The serialized query response: the echoed IP plus the resolved location.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryResult {
    pub ip: String,
    pub country: String,
    pub region: String,
    pub province: String,
    pub city: String,
    pub isp: String,
}

impl QueryResult {
    pub fn new(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            ..Self::default()
        }
    }

    /// Overwrites the location fields from a resolved `Location`.
    pub fn fill(&mut self, loc: &Location) {
        self.country = loc.country.clone();
        self.region = loc.region.clone();
        self.province = loc.province.clone();
        self.city = loc.city.clone();
        self.isp = loc.isp.clone();
    }

    /// Extracts the location fields back out of the response.
    pub fn location(&self) -> Location {
        Location {
            country: self.country.clone(),
            region: self.region.clone(),
            province: self.province.clone(),
            city: self.city.clone(),
            isp: self.isp.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_is_empty() {
        assert!(Location::default().is_empty());
        let loc = Location {
            city: "南京".into(),
            ..Default::default()
        };
        assert!(!loc.is_empty());
    }

    #[test]
    fn test_location_is_partial() {
        let mut loc = Location {
            country: "中国".into(),
            region: "华东".into(),
            province: "江苏".into(),
            city: "南京".into(),
            isp: "电信".into(),
        };
        assert!(!loc.is_partial());
        loc.city.clear();
        assert!(loc.is_partial());
        loc.city = "南京".into();
        loc.province.clear();
        assert!(loc.is_partial());
    }

    #[test]
    fn test_query_result_serialization_keys() {
        let mut res = QueryResult::new("1.2.3.4");
        res.fill(&Location {
            country: "中国".into(),
            region: "华东".into(),
            province: "江苏".into(),
            city: "南京".into(),
            isp: "电信".into(),
        });
        let json = serde_json::to_string(&res).expect("serialize");
        assert!(json.contains("\"ip\":\"1.2.3.4\""));
        assert!(json.contains("\"isp\":\"电信\""));
        let back: QueryResult = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, res);
    }

    #[test]
    fn test_fill_and_location_round_trip() {
        let loc = Location {
            country: "中国".into(),
            region: "".into(),
            province: "广东".into(),
            city: "深圳".into(),
            isp: "".into(),
        };
        let mut res = QueryResult::new("9.9.9.9");
        res.fill(&loc);
        assert_eq!(res.location(), loc);
    }
}
