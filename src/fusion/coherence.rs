//! Country/region coherence checks.
//!
//! A location whose region or city clearly belongs to China while its
//! country field says otherwise is contradictory: such answers take a score
//! penalty during fusion and get their country corrected before the result
//! leaves the system.

use crate::models::Location;

/// Penalty multiplier applied to incoherent locations.
pub const COHERENCE_PENALTY: f64 = 0.7;

/// Country value enforced by the post-fusion fallback.
pub const COUNTRY_CHINA: &str = "中国";

/// Province-level and special-administrative names used as China markers.
/// Common names only; the suffix check below covers the long tail.
const PROVINCES: [&str; 34] = [
    "广东", "浙江", "上海", "北京", "江苏", "山东", "河南", "河北", "湖南", "湖北",
    "福建", "安徽", "江西", "辽宁", "吉林", "黑龙江", "云南", "贵州", "四川", "重庆",
    "天津", "山西", "内蒙古", "广西", "海南", "宁夏", "新疆", "西藏", "青海", "甘肃",
    "香港", "澳门", "台湾", "中国",
];

const SUFFIX_HINTS: [&str; 4] = ["省", "市", "自治区", "特别行政区"];

/// Whether the location reads as Chinese: the country says so outright, the
/// region or city names a province, or either carries an administrative
/// suffix.
pub fn is_china_like(loc: &Location) -> bool {
    if loc.country == COUNTRY_CHINA {
        return true;
    }
    for p in PROVINCES {
        if loc.region == p || loc.city == p {
            return true;
        }
    }
    for h in SUFFIX_HINTS {
        if loc.region.contains(h) || loc.city.contains(h) {
            return true;
        }
    }
    false
}

/// Coherence coefficient: 1.0 normally, [`COHERENCE_PENALTY`] when the
/// region/city is China-like but the country is not China.
pub fn coherence_coeff(loc: &Location) -> f64 {
    if is_china_like(loc) && loc.country != COUNTRY_CHINA {
        return COHERENCE_PENALTY;
    }
    1.0
}
