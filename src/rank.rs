use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::dataset::FacilityRecord;
use crate::geo::{Coordinates, haversine_km};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RankError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("origin out of range: lat={lat} lon={lon}")]
    InvalidLocation { lat: f64, lon: f64 },
}

/// Which metric orders the result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Complaint-adjusted quality points, descending.
    AdjustedQualityPoints,
    /// Average time spent in the ED, ascending (shorter wait first).
    AvgEdMinutes,
    /// Overall patient rating, descending.
    PatientRating,
    /// Mortality contribution: "better" facilities first, then "worse",
    /// then facilities where the measure is not used.
    Mortality,
}

impl SortKey {
    /// Unrecognized keys fall back to quality, mirroring the API default.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "avg_ed_minutes" => Self::AvgEdMinutes,
            "patient_rating" => Self::PatientRating,
            "mortality" => Self::Mortality,
            _ => Self::AdjustedQualityPoints,
        }
    }
}

/// Chief complaint selected by the user; chooses which quality column feeds
/// `adjusted_quality_points`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Complaint {
    #[default]
    Overall,
    HeartAttack,
    Stroke,
    Breathing,
}

impl Complaint {
    /// Accepts both the canonical keys and the free-text chief-complaint
    /// labels the UI offers. Unknown values fall back to Overall.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "heart_attack" | "heart attack" | "chest pain" => Self::HeartAttack,
            "stroke" | "slurred speech" | "facial droop" => Self::Stroke,
            "breathing" | "shortness of breath" | "trouble breathing" | "cough" | "fever" => {
                Self::Breathing
            }
            _ => Self::Overall,
        }
    }

    /// The quality column this complaint selects.
    pub fn quality_points(&self, record: &FacilityRecord) -> Option<f64> {
        match self {
            Self::Overall => record.total_quality_points,
            Self::HeartAttack => record.adj_total_heartattack,
            Self::Stroke => record.adj_total_stroke,
            Self::Breathing => record.adj_total_pneu,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MortalityType {
    Better,
    Worse,
    NotUsed,
}

impl MortalityType {
    fn order(self) -> u8 {
        match self {
            Self::Better => 0,
            Self::Worse => 1,
            Self::NotUsed => 2,
        }
    }
}

static MORTALITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*%?\s*(better|worse)").expect("valid regex"));

/// Parse a free-form mortality string such as "46% better" or "12% worse".
/// Anything unparseable ("Not Available", empty, absent) degrades to
/// `NotUsed` with sort value 0 rather than excluding the record.
pub fn parse_mortality(text: Option<&str>) -> (MortalityType, f64) {
    let Some(text) = text else {
        return (MortalityType::NotUsed, 0.0);
    };
    let Some(caps) = MORTALITY_RE.captures(text) else {
        return (MortalityType::NotUsed, 0.0);
    };
    let Ok(pct) = caps[1].parse::<f64>() else {
        return (MortalityType::NotUsed, 0.0);
    };
    if caps[2].eq_ignore_ascii_case("better") {
        (MortalityType::Better, pct)
    } else {
        (MortalityType::Worse, -pct)
    }
}

#[derive(Debug, Clone)]
pub struct RankParams {
    pub origin: Coordinates,
    pub radius_km: f64,
    pub sort: SortKey,
    pub complaint: Complaint,
    /// Optional 2-letter state code; compared case-insensitively.
    pub state: Option<String>,
    pub top_k: usize,
}

/// A facility plus the per-request derived fields. The shared table is never
/// mutated; each request materializes its own view.
#[derive(Debug, Clone, Serialize)]
pub struct RankedFacility {
    #[serde(flatten)]
    pub facility: FacilityRecord,
    pub distance_km: f64,
    pub adjusted_quality_points: Option<f64>,
    pub mortality_type: MortalityType,
    pub mortality_sort_value: f64,
}

/// Rank facilities around an origin: filter to the radius (and optional
/// state), order by the requested key with distance as the final tie-break,
/// and truncate to `top_k`. Pure function of its inputs; an empty result is
/// a valid outcome, not an error.
pub fn rank(
    records: &[FacilityRecord],
    params: &RankParams,
) -> Result<Vec<RankedFacility>, RankError> {
    if !(params.radius_km > 0.0) {
        return Err(RankError::InvalidParameter("radius_km must be positive"));
    }
    if params.top_k == 0 {
        return Err(RankError::InvalidParameter("top_k must be positive"));
    }
    if !params.origin.in_range() {
        return Err(RankError::InvalidLocation {
            lat: params.origin.lat,
            lon: params.origin.lon,
        });
    }

    let state = params
        .state
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_uppercase);

    let mut out: Vec<RankedFacility> = Vec::new();
    for record in records {
        if let Some(want) = state.as_deref() {
            let matches = record
                .state
                .as_deref()
                .map(|s| s.trim().eq_ignore_ascii_case(want))
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }

        let here = Coordinates::new(record.lat, record.lon);
        let distance_km = haversine_km(params.origin, here);
        if distance_km > params.radius_km {
            continue;
        }

        let (mortality_type, mortality_sort_value) =
            parse_mortality(record.mortality_text.as_deref());
        out.push(RankedFacility {
            adjusted_quality_points: params.complaint.quality_points(record),
            facility: record.clone(),
            distance_km,
            mortality_type,
            mortality_sort_value,
        });
    }

    out.sort_by(|a, b| compare(a, b, params.sort));
    out.truncate(params.top_k);
    Ok(out)
}

fn compare(a: &RankedFacility, b: &RankedFacility, sort: SortKey) -> Ordering {
    let primary = match sort {
        SortKey::AdjustedQualityPoints => {
            cmp_desc_absent_last(a.adjusted_quality_points, b.adjusted_quality_points)
        }
        SortKey::AvgEdMinutes => {
            cmp_asc_absent_last(a.facility.avg_ed_minutes, b.facility.avg_ed_minutes)
        }
        SortKey::PatientRating => {
            cmp_desc_absent_last(a.facility.patient_rating, b.facility.patient_rating)
        }
        SortKey::Mortality => a
            .mortality_type
            .order()
            .cmp(&b.mortality_type.order())
            // Descending signed value: larger "better" percentage first and,
            // within "worse", the smaller magnitude first.
            .then_with(|| b.mortality_sort_value.total_cmp(&a.mortality_sort_value)),
    };
    primary.then_with(|| a.distance_km.total_cmp(&b.distance_km))
}

fn cmp_desc_absent_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn cmp_asc_absent_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Origin for all scenario tests: downtown Chicago.
    const ORIGIN: Coordinates = Coordinates {
        lat: 41.8781,
        lon: -87.6298,
    };

    fn facility(name: &str, lat: f64, lon: f64) -> FacilityRecord {
        FacilityRecord {
            hospital_name: name.to_string(),
            address: None,
            city: None,
            state: Some("IL".to_string()),
            zip: None,
            lat,
            lon,
            avg_ed_minutes: None,
            patient_rating: None,
            mortality_text: None,
            total_quality_points: None,
            adj_total_heartattack: None,
            adj_total_stroke: None,
            adj_total_pneu: None,
        }
    }

    /// A facility roughly `km` kilometers due north of ORIGIN.
    fn facility_at_km(name: &str, km: f64) -> FacilityRecord {
        // One degree of latitude is ~111.19 km on a 6371 km sphere.
        facility(name, ORIGIN.lat + km / 111.19, ORIGIN.lon)
    }

    fn params(sort: SortKey) -> RankParams {
        RankParams {
            origin: ORIGIN,
            radius_km: 10.0,
            sort,
            complaint: Complaint::Overall,
            state: None,
            top_k: 50,
        }
    }

    #[test]
    fn mortality_parse_better() {
        assert_eq!(
            parse_mortality(Some("46% better")),
            (MortalityType::Better, 46.0)
        );
    }

    #[test]
    fn mortality_parse_worse() {
        assert_eq!(
            parse_mortality(Some("12% worse")),
            (MortalityType::Worse, -12.0)
        );
    }

    #[test]
    fn mortality_parse_decimal_and_case() {
        assert_eq!(
            parse_mortality(Some("  4.5% BETTER ")),
            (MortalityType::Better, 4.5)
        );
    }

    #[test]
    fn mortality_parse_unusable_text() {
        assert_eq!(
            parse_mortality(Some("Not Available")),
            (MortalityType::NotUsed, 0.0)
        );
        assert_eq!(parse_mortality(Some("")), (MortalityType::NotUsed, 0.0));
        assert_eq!(parse_mortality(None), (MortalityType::NotUsed, 0.0));
    }

    #[test]
    fn complaint_parsing_and_aliases() {
        assert_eq!(Complaint::parse("overall"), Complaint::Overall);
        assert_eq!(Complaint::parse("heart_attack"), Complaint::HeartAttack);
        assert_eq!(Complaint::parse("Chest Pain"), Complaint::HeartAttack);
        assert_eq!(Complaint::parse("Slurred Speech"), Complaint::Stroke);
        assert_eq!(Complaint::parse("Trouble Breathing"), Complaint::Breathing);
        assert_eq!(Complaint::parse("no such thing"), Complaint::Overall);
    }

    #[test]
    fn complaint_selects_column() {
        let mut f = facility("A", ORIGIN.lat, ORIGIN.lon);
        f.total_quality_points = Some(1.0);
        f.adj_total_heartattack = Some(2.0);
        f.adj_total_stroke = Some(3.0);
        f.adj_total_pneu = Some(4.0);
        assert_eq!(Complaint::Overall.quality_points(&f), Some(1.0));
        assert_eq!(Complaint::HeartAttack.quality_points(&f), Some(2.0));
        assert_eq!(Complaint::Stroke.quality_points(&f), Some(3.0));
        assert_eq!(Complaint::Breathing.quality_points(&f), Some(4.0));
    }

    #[test]
    fn rejects_bad_parameters() {
        let recs = vec![facility("A", ORIGIN.lat, ORIGIN.lon)];
        let mut p = params(SortKey::AdjustedQualityPoints);
        p.radius_km = 0.0;
        assert!(matches!(
            rank(&recs, &p),
            Err(RankError::InvalidParameter(_))
        ));

        let mut p = params(SortKey::AdjustedQualityPoints);
        p.top_k = 0;
        assert!(matches!(
            rank(&recs, &p),
            Err(RankError::InvalidParameter(_))
        ));

        let mut p = params(SortKey::AdjustedQualityPoints);
        p.origin = Coordinates::new(95.0, 0.0);
        assert!(matches!(
            rank(&recs, &p),
            Err(RankError::InvalidLocation { .. })
        ));
    }

    #[test]
    fn empty_input_is_a_valid_outcome() {
        let out = rank(&[], &params(SortKey::AdjustedQualityPoints)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn radius_filter_excludes_far_facilities() {
        let recs = vec![
            facility_at_km("near", 2.0),
            facility_at_km("mid", 8.0),
            facility_at_km("far", 15.0),
        ];
        let out = rank(&recs, &params(SortKey::AdjustedQualityPoints)).unwrap();
        let names: Vec<&str> = out.iter().map(|r| r.facility.hospital_name.as_str()).collect();
        assert_eq!(names, vec!["near", "mid"]);
        for r in &out {
            assert!(r.distance_km <= 10.0);
        }
    }

    #[test]
    fn state_filter_applies() {
        let mut wi = facility_at_km("wisconsin", 3.0);
        wi.state = Some("WI".to_string());
        let recs = vec![facility_at_km("illinois", 5.0), wi];

        let mut p = params(SortKey::AdjustedQualityPoints);
        p.state = Some("il".to_string());
        let out = rank(&recs, &p).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].facility.hospital_name, "illinois");
    }

    #[test]
    fn top_k_caps_result_length() {
        let recs: Vec<_> = (0..6)
            .map(|i| facility_at_km(&format!("f{i}"), i as f64))
            .collect();
        let mut p = params(SortKey::AdjustedQualityPoints);
        p.top_k = 3;
        let out = rank(&recs, &p).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn quality_sorts_descending_with_absent_last() {
        let mut a = facility_at_km("low", 1.0);
        a.total_quality_points = Some(10.0);
        let mut b = facility_at_km("high", 2.0);
        b.total_quality_points = Some(30.0);
        let c = facility_at_km("unknown", 3.0);

        let out = rank(&[a, b, c], &params(SortKey::AdjustedQualityPoints)).unwrap();
        let names: Vec<&str> = out.iter().map(|r| r.facility.hospital_name.as_str()).collect();
        assert_eq!(names, vec!["high", "low", "unknown"]);
    }

    #[test]
    fn ed_minutes_sorts_ascending_with_absent_last() {
        let mut a = facility_at_km("slow", 1.0);
        a.avg_ed_minutes = Some(240.0);
        let mut b = facility_at_km("fast", 2.0);
        b.avg_ed_minutes = Some(90.0);
        let c = facility_at_km("unknown", 3.0);

        let out = rank(&[a, b, c], &params(SortKey::AvgEdMinutes)).unwrap();
        let names: Vec<&str> = out.iter().map(|r| r.facility.hospital_name.as_str()).collect();
        assert_eq!(names, vec!["fast", "slow", "unknown"]);
    }

    #[test]
    fn equal_quality_breaks_tie_by_distance() {
        let mut far = facility_at_km("far", 3.0);
        far.total_quality_points = Some(20.0);
        let mut near = facility_at_km("near", 1.0);
        near.total_quality_points = Some(20.0);

        let out = rank(&[far, near], &params(SortKey::AdjustedQualityPoints)).unwrap();
        let names: Vec<&str> = out.iter().map(|r| r.facility.hospital_name.as_str()).collect();
        assert_eq!(names, vec!["near", "far"]);
    }

    #[test]
    fn mortality_sort_orders_better_worse_not_used() {
        let mut a = facility_at_km("a-much-better", 1.0);
        a.mortality_text = Some("46% better".to_string());
        let mut b = facility_at_km("b-slightly-better", 2.0);
        b.mortality_text = Some("5% better".to_string());
        let mut c = facility_at_km("c-slightly-worse", 3.0);
        c.mortality_text = Some("3% worse".to_string());
        let mut d = facility_at_km("d-much-worse", 4.0);
        d.mortality_text = Some("12% worse".to_string());
        let e = facility_at_km("e-not-used", 5.0);

        let out = rank(&[e, d, c, b, a], &params(SortKey::Mortality)).unwrap();
        let names: Vec<&str> = out.iter().map(|r| r.facility.hospital_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "a-much-better",
                "b-slightly-better",
                "c-slightly-worse",
                "d-much-worse",
                "e-not-used"
            ]
        );
    }

    #[test]
    fn ranking_is_deterministic() {
        let recs: Vec<_> = (0..10)
            .map(|i| {
                let mut f = facility_at_km(&format!("f{i}"), (i % 4) as f64);
                f.total_quality_points = Some(f64::from(i % 3));
                f
            })
            .collect();
        let p = params(SortKey::AdjustedQualityPoints);
        let first = rank(&recs, &p).unwrap();
        let second = rank(&recs, &p).unwrap();
        let names = |v: &[RankedFacility]| {
            v.iter()
                .map(|r| r.facility.hospital_name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&first), names(&second));
    }

    #[test]
    fn sort_key_parsing_defaults_to_quality() {
        assert_eq!(SortKey::parse("mortality"), SortKey::Mortality);
        assert_eq!(SortKey::parse("avg_ed_minutes"), SortKey::AvgEdMinutes);
        assert_eq!(SortKey::parse("patient_rating"), SortKey::PatientRating);
        assert_eq!(
            SortKey::parse("adjusted_quality_points"),
            SortKey::AdjustedQualityPoints
        );
        assert_eq!(SortKey::parse("bogus"), SortKey::AdjustedQualityPoints);
    }
}
