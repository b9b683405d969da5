//! Fusion engine: reconciles disagreeing source answers into one location
//! with a confidence score.
//!
//! Each healthy source contributes a `(location, confidence, weight)`
//! report. Reports are scored, the top three become finalists, one finalist
//! is chosen as the anchor, and fields are fused anchor-first with weighted
//! voting as the fallback. The result carries the top raw score, which
//! drives the write decision.

pub mod coherence;

pub use coherence::{coherence_coeff, is_china_like, COUNTRY_CHINA};

use log::debug;

use crate::config::MAX_SOURCE_WEIGHT;
use crate::models::Location;

/// One source's answer for one IP, as collected by the source manager.
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub name: String,
    pub assoc_key: String,
    pub location: Location,
    pub confidence: f64,
    pub weight: f64,
}

/// The fused answer plus the metadata the promotion step needs.
#[derive(Debug, Clone, Default)]
pub struct FusionOutcome {
    pub location: Location,
    pub top_score: f64,
    pub top_confidence: f64,
    /// Association key of the anchor finalist, used as the write key.
    pub anchor_assoc: Option<String>,
}

#[derive(Debug, Clone)]
struct Scored {
    report: SourceReport,
    score: f64,
}

/// Quality coefficient: field completeness as a quality proxy.
/// 0.2 each for country/region, 0.3 each for province/city.
pub fn quality_coeff(loc: &Location) -> f64 {
    let mut q = 0.0;
    if !loc.country.is_empty() {
        q += 0.2;
    }
    if !loc.region.is_empty() {
        q += 0.2;
    }
    if !loc.province.is_empty() {
        q += 0.3;
    }
    if !loc.city.is_empty() {
        q += 0.3;
    }
    q
}

/// Raw score of one report: `100 x (weight/10) x quality x confidence x
/// coherence`, with the weight clamped to [0, 10].
pub fn raw_score(report: &SourceReport) -> f64 {
    let weight = report.weight.clamp(0.0, MAX_SOURCE_WEIGHT);
    100.0
        * (weight / MAX_SOURCE_WEIGHT)
        * quality_coeff(&report.location)
        * report.confidence
        * coherence_coeff(&report.location)
}

/// Fuses the collected reports into a single location.
///
/// With no reports the outcome is empty with score 0 and no anchor, which
/// the caller treats as "nothing to write".
pub fn fuse(reports: Vec<SourceReport>) -> FusionOutcome {
    let mut scored: Vec<Scored> = reports
        .into_iter()
        .map(|report| {
            let score = raw_score(&report);
            Scored { report, score }
        })
        .collect();
    // Stable sort: equal scores keep their collection order, which makes
    // tie-breaks deterministic.
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let finalists = &scored[..scored.len().min(3)];
    if finalists.is_empty() {
        return FusionOutcome::default();
    }

    let anchor = select_anchor(finalists);
    debug!(
        "fusion_anchor name={} score={:.1}",
        anchor.report.name, anchor.score
    );

    let mut out = Location {
        country: pick_field(finalists, anchor, |l| l.country.as_str()),
        region: pick_field(finalists, anchor, |l| l.region.as_str()),
        province: pick_field(finalists, anchor, |l| l.province.as_str()),
        city: pick_field(finalists, anchor, |l| l.city.as_str()),
        isp: pick_field(finalists, anchor, |l| l.isp.as_str()),
    };

    // Country fallback: a fused answer whose region/city is China-like must
    // not leave with a contradicting country.
    if coherence_coeff(&out) < 1.0 {
        debug!(
            "fusion_country_fallback prev={} region={} city={}",
            out.country, out.region, out.city
        );
        out.country = COUNTRY_CHINA.to_string();
    }

    FusionOutcome {
        location: out,
        top_score: scored[0].score,
        top_confidence: scored[0].report.confidence,
        anchor_assoc: Some(anchor.report.assoc_key.clone()),
    }
}

/// Anchor selection among the finalists:
/// 1. a "kv" finalist with a non-empty city or region;
/// 2. else an "edgeone" finalist with a non-empty city or region and
///    confidence >= 0.8;
/// 3. else the highest-scoring finalist.
fn select_anchor(finalists: &[Scored]) -> &Scored {
    if let Some(kv) = finalists.iter().find(|s| {
        s.report.name == "kv"
            && (!s.report.location.city.is_empty() || !s.report.location.region.is_empty())
    }) {
        return kv;
    }
    if let Some(edge) = finalists.iter().find(|s| {
        s.report.name == "edgeone"
            && (!s.report.location.city.is_empty() || !s.report.location.region.is_empty())
            && s.report.confidence >= 0.8
    }) {
        return edge;
    }
    &finalists[0]
}

/// Field fusion: the anchor's non-empty value wins outright; otherwise
/// candidates vote with their scores, ties broken by order of appearance in
/// the score-sorted finalists. Empty values do not vote.
fn pick_field<'a, F>(finalists: &'a [Scored], anchor: &'a Scored, get: F) -> String
where
    F: Fn(&Location) -> &str,
{
    let anchor_value = get(&anchor.report.location);
    if !anchor_value.is_empty() {
        return anchor_value.to_string();
    }

    // First-appearance order doubles as the tie-break order
    let mut tallies: Vec<(&str, f64)> = Vec::new();
    for s in finalists {
        let value = get(&s.report.location);
        if value.is_empty() {
            continue;
        }
        match tallies.iter_mut().find(|(v, _)| *v == value) {
            Some((_, total)) => *total += s.score,
            None => tallies.push((value, s.score)),
        }
    }

    let mut best: Option<(&str, f64)> = None;
    for &(value, total) in &tallies {
        match best {
            Some((_, best_total)) if total <= best_total => {}
            _ => best = Some((value, total)),
        }
    }
    best.map(|(v, _)| v.to_string()).unwrap_or_default()
}

/// Write decision from the top raw score: the KV override is always
/// written; an exact entry is added once the score clears the threshold.
pub fn decide_write(score: f64, min_score_for_exact: f64) -> (bool, bool) {
    (true, score >= min_score_for_exact)
}
