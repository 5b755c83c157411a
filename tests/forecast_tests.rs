use analog_forecast::diversity::MarketPhase;
use analog_forecast::error::ForecastError;
use analog_forecast::forecast::{
    aggregate, ForecastEngine, ForecastRequest, ForecastSettings, NEUTRAL_HIT_RATE,
};
use analog_forecast::model::PriceSeries;
use analog_forecast::scanner::{scan, Match, RetrievalMode};
use analog_forecast::vector::NormalizationMode;
use chrono::{Duration, NaiveDate};
use quickcheck_macros::quickcheck;

fn day(offset: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2018, 6, 1).unwrap() + Duration::days(offset as i64)
}

fn linear_series(len: usize) -> PriceSeries {
    PriceSeries::from_closes("LIN", (0..len).map(|i| (day(i), 100.0 + i as f64))).unwrap()
}

fn wavy_series(len: usize) -> PriceSeries {
    let mut price = 50.0;
    let points: Vec<(NaiveDate, f64)> = (0..len)
        .map(|i| {
            let t = i as f64;
            let drift = (t / 7.0).sin() * 0.012 + (t / 23.0).cos() * 0.006;
            price *= 1.0 + drift + (t * 1.3).sin() * 0.004;
            (day(i), price)
        })
        .collect();
    PriceSeries::from_closes("WAVE", points).unwrap()
}

fn match_ending_at(series: &PriceSeries, end_index: usize, rank: usize) -> Match {
    let window = series.window(end_index - 4, 5).unwrap();
    Match {
        window,
        similarity: 0.9,
        phase: MarketPhase::Markup,
        rank,
    }
}

#[test]
/// Each day's percentiles are reprojected from the anchor using the
/// candidate's own forward returns; the summary uses the last forward day.
fn aggregate_reprojects_forward_returns_from_anchor() {
    let series = linear_series(20);
    let matches = vec![match_ending_at(&series, 4, 1), match_ending_at(&series, 9, 2)];

    let dist = aggregate(&matches, &series, 3, 200.0);
    assert_eq!(dist.days.len(), 3);
    assert!((dist.anchor_price - 200.0).abs() < f64::EPSILON);

    // Two samples: nearest rank picks the lower one for every level.
    let day0 = &dist.days[0];
    assert_eq!(day0.sample_size, 2);
    let expected = 200.0 * (1.0 + 1.0 / 109.0);
    assert!(day0.as_array().iter().all(|p| (p - expected).abs() < 1e-9));

    let s = &dist.summary;
    assert_eq!(s.sample_size, 2);
    assert_eq!(s.terminal_sample_size, 2);
    assert!((s.median_return - 3.0 / 109.0).abs() < 1e-12);
    assert!((s.mean_return - (3.0 / 109.0 + 3.0 / 104.0) / 2.0).abs() < 1e-12);
    assert!((s.hit_rate - 1.0).abs() < f64::EPSILON);
}

#[test]
fn truncated_aftermath_counts_only_where_data_exists() {
    let series = linear_series(20);
    let matches = vec![
        match_ending_at(&series, 4, 1),
        match_ending_at(&series, 9, 2),
        match_ending_at(&series, 18, 3),
    ];
    let dist = aggregate(&matches, &series, 3, 100.0);
    assert_eq!(dist.days[0].sample_size, 3);
    assert_eq!(dist.days[1].sample_size, 2);
    assert_eq!(dist.days[2].sample_size, 2);
    assert_eq!(dist.summary.sample_size, 3);
    assert_eq!(dist.summary.terminal_sample_size, 2);
}

#[test]
fn no_matches_gives_flat_neutral_forecast() {
    let series = linear_series(10);
    let dist = aggregate(&[], &series, 5, 123.0);
    assert_eq!(dist.days.len(), 5);
    assert!(dist.is_empty());
    assert!(dist.days.iter().all(|d| d.as_array() == [123.0; 5]));
    assert!((dist.summary.hit_rate - NEUTRAL_HIT_RATE).abs() < f64::EPSILON);
    assert!(dist.summary.median_return.abs() < f64::EPSILON);
}

#[test]
fn matches_without_aftermath_give_flat_forecast() {
    let series = linear_series(10);
    let matches = vec![match_ending_at(&series, 9, 1)];
    let dist = aggregate(&matches, &series, 4, 109.0);
    assert!(dist.is_empty());
    assert!((dist.summary.hit_rate - 0.5).abs() < f64::EPSILON);
}

#[test]
fn losing_aftermath_lowers_hit_rate() {
    let closes = [10.0, 11.0, 12.0, 13.0, 14.0, 13.0, 15.0, 16.0, 15.0, 17.0];
    let points: Vec<(NaiveDate, f64)> = closes
        .iter()
        .enumerate()
        .map(|(i, c)| (day(i), *c))
        .collect();
    let series = PriceSeries::from_closes("MIX", points).unwrap();
    // Window ending at index 4 (14.0) is followed by 13.0; ending at 6 (15.0) by 16.0.
    let matches = vec![match_ending_at(&series, 4, 1), match_ending_at(&series, 6, 2)];
    let dist = aggregate(&matches, &series, 1, 100.0);
    assert!((dist.summary.hit_rate - 0.5).abs() < f64::EPSILON);
    assert!(dist.summary.p10_return < 0.0);
}

#[test]
/// 400 closes, 60-day windows, 120-day gap, top 10, 14-day horizon.
fn fourteen_day_distribution_is_monotonic() {
    let series = wavy_series(400);
    let matches = scan(&series, 60, 120, 10, NormalizationMode::ZScore).unwrap();
    assert_eq!(matches.len(), 10);

    let dist = aggregate(&matches, &series, 14, series.last_close());
    assert_eq!(dist.days.len(), 14);
    for (offset, d) in dist.days.iter().enumerate() {
        assert_eq!(d.offset, offset);
        let p = d.as_array();
        assert!(p.windows(2).all(|w| w[0] <= w[1]), "day {} not monotonic", offset);
    }
    assert_eq!(dist.summary.sample_size, 10);
    assert!(dist.summary.p10_return <= dist.summary.median_return);
    assert!(dist.summary.median_return <= dist.summary.p90_return);
}

#[test]
fn aggregate_is_deterministic() {
    let series = wavy_series(300);
    let matches = scan(&series, 30, 50, 12, NormalizationMode::RawReturns).unwrap();
    let a = aggregate(&matches, &series, 10, 77.0);
    let b = aggregate(&matches, &series, 10, 77.0);
    assert_eq!(a, b);
}

#[test]
fn engine_truncates_to_as_of() {
    let series = wavy_series(500);
    let engine = ForecastEngine::new(ForecastSettings {
        window_len: 40,
        min_gap_days: 60,
        candidate_pool: 30,
        max_per_phase: 3,
        max_total: 8,
        ..ForecastSettings::default()
    })
    .unwrap();

    let as_of = day(449);
    let report = engine
        .forecast(
            &series,
            &ForecastRequest {
                horizon_days: 7,
                as_of: Some(as_of),
            },
        )
        .unwrap();
    assert_eq!(report.as_of, as_of);
    assert!((report.anchor_price - series.closes()[449]).abs() < f64::EPSILON);
    assert_eq!(report.horizon_days, 7);
    assert_eq!(report.distribution.days.len(), 7);
    assert_eq!(report.strategy, "single_stage");
    assert!(report.matches.len() <= 8);
    let current_start = 450 - 40;
    assert!(report
        .matches
        .iter()
        .all(|m| m.window.gap_before(current_start) >= 60));
    // Aftermath never reads past the as-of date.
    assert!(report
        .matches
        .iter()
        .all(|m| m.window.end_date < as_of));
}

#[test]
fn engine_forecasts_several_horizons_from_one_scan() {
    let series = wavy_series(400);
    let engine = ForecastEngine::new(ForecastSettings::default()).unwrap();
    let reports = engine.forecast_horizons(&series, &[7, 14, 30], None).unwrap();
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[1].distribution.days.len(), 14);
    assert_eq!(reports[0].matches, reports[2].matches);
    assert!(reports.iter().all(|r| r.as_of == series.last_date()));

    for (report, horizon_days) in reports.iter().zip([7, 14, 30]) {
        let single = engine
            .forecast(
                &series,
                &ForecastRequest {
                    horizon_days,
                    as_of: None,
                },
            )
            .unwrap();
        assert_eq!(report.horizon_days, horizon_days);
        assert_eq!(report.matches, single.matches);
        assert_eq!(report.distribution, single.distribution);
    }
}

#[test]
fn engine_surfaces_insufficient_history() {
    let series = wavy_series(100);
    let engine = ForecastEngine::new(ForecastSettings::default()).unwrap();
    let err = engine
        .forecast(
            &series,
            &ForecastRequest {
                horizon_days: 7,
                as_of: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, ForecastError::InsufficientData { .. }));
    assert!(err.is_retryable());

    let before_start = day(0) - Duration::days(1);
    let err = engine
        .forecast(
            &wavy_series(400),
            &ForecastRequest {
                horizon_days: 7,
                as_of: Some(before_start),
            },
        )
        .unwrap_err();
    assert!(matches!(err, ForecastError::InsufficientData { .. }));
}

#[test]
fn forced_two_stage_is_reported() {
    let series = wavy_series(400);
    let engine = ForecastEngine::new(ForecastSettings {
        retrieval: RetrievalMode::TwoStage,
        ..ForecastSettings::default()
    })
    .unwrap();
    let report = engine
        .forecast(
            &series,
            &ForecastRequest {
                horizon_days: 5,
                as_of: None,
            },
        )
        .unwrap();
    assert_eq!(report.strategy, "two_stage");
    assert_eq!(report.candidates, 162);
}

#[test]
fn engine_rejects_invalid_settings() {
    let err = ForecastEngine::new(ForecastSettings {
        max_per_phase: 0,
        ..ForecastSettings::default()
    })
    .unwrap_err();
    assert!(matches!(err, ForecastError::InvalidParameter(_)));
}

#[quickcheck]
fn percentiles_never_cross(ends: Vec<u8>, horizon: u8) -> bool {
    let series = wavy_series(120);
    let horizon = usize::from(horizon % 20) + 1;
    let matches: Vec<Match> = ends
        .iter()
        .enumerate()
        .map(|(i, e)| match_ending_at(&series, usize::from(*e) % 115 + 4, i + 1))
        .collect();
    let dist = aggregate(&matches, &series, horizon, 10.0);
    dist.days.len() == horizon
        && dist
            .days
            .iter()
            .all(|d| d.as_array().windows(2).all(|w| w[0] <= w[1]))
        && (0.0..=1.0).contains(&dist.summary.hit_rate)
}
